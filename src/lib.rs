//! camsession - safe camera capture session coordination, made simple.
//!
//! The crate owns a capture session's configuration state and serializes
//! every mutation onto a single session context: device discovery and
//! switching, movie recording with background-execution bracketing, still
//! capture, focus/exposure/flash control, and a typed event stream for the
//! UI-owning context. Hardware, preview rendering, and media persistence
//! stay behind trait seams.
//!
//! ```no_run
//! use camsession::capture::{SharedPreview, WebcamBackend};
//! use camsession::library::FolderLibrary;
//! use camsession::recording::NoopBackground;
//! use camsession::session::{SessionController, SessionHandles};
//! use std::sync::Arc;
//!
//! # async fn run() -> camsession::error::CaptureResult<()> {
//! let controller = SessionController::spawn(SessionHandles {
//!     backend: Arc::new(WebcamBackend::new()),
//!     library: Arc::new(FolderLibrary::new("recordings")),
//!     background: Arc::new(NoopBackground::new()),
//!     preview: Arc::new(SharedPreview::default()),
//! });
//!
//! controller.initialize().await?;
//! controller.activate();
//! controller.toggle_recording();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod error;
pub mod library;
pub mod recording;
pub mod session;

pub use capture::{CaptureBackend, DeviceInfo, DeviceKind, DevicePosition, PreviewSurface};
pub use error::{CaptureError, CaptureResult};
pub use library::MediaLibrary;
pub use recording::BackgroundExecution;
pub use session::{CaptureEvent, SessionController, SessionHandles};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries and tests embedding the crate
///
/// Honors `RUST_LOG`; defaults to debug-level output for this crate only.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camsession=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
