//! Recording lifecycle support
//!
//! - Phase machine for the movie recording lifecycle
//! - Background-execution leases bracketing in-flight recordings

pub mod background;
pub mod state;

pub use background::{BackgroundExecution, BackgroundTaskToken, NoopBackground};
pub use state::{RecordingOutcome, RecordingPhase};
