//! Capture session coordination
//!
//! This module implements the session lifecycle architecture:
//! - a configuration actor that owns the session and serializes every
//!   mutation onto one command loop
//! - an observation hub that republishes backend state changes as discrete
//!   UI-facing events
//! - a cloneable controller handle for the UI-owning context

mod actor;
mod hub;

pub mod controller;

pub use controller::SessionController;

use crate::capture::traits::{CaptureBackend, DeviceKind, PreviewSurface};
use crate::error::ErrorResponse;
use crate::library::{AssetRef, MediaLibrary};
use crate::recording::{BackgroundExecution, RecordingOutcome};
use std::sync::Arc;

/// Collaborators wired into a session at spawn time
pub struct SessionHandles {
    pub backend: Arc<dyn CaptureBackend>,
    pub library: Arc<dyn MediaLibrary>,
    pub background: Arc<dyn BackgroundExecution>,
    pub preview: Arc<dyn PreviewSurface>,
}

/// Discrete events delivered to the UI-facing observer
///
/// The core never renders UI; observers react to these on their own
/// context.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Movie recording became active; disable the camera-switch control
    /// and relabel the record control to "Stop"
    RecordingStarted,

    /// Movie recording stopped; re-enable camera switching and relabel
    /// the record control to "Record"
    RecordingStopped,

    /// A still exposure began; drives the one-shot preview opacity pulse
    StillCaptureBegan,

    /// The still exposure completed
    StillCaptureEnded,

    /// The derived authorized-and-running state changed
    SessionAvailability { available: bool },

    /// A device of the given kind could not be attached; dependent
    /// controls should be disabled
    DeviceUnavailable { kind: DeviceKind },

    /// Camera access was denied; the capture feature is disabled
    PermissionDenied,

    /// A finished movie was handed to the media library
    RecordingSaved(RecordingOutcome),

    /// A captured still was handed to the media library
    StillSaved(AssetRef),

    /// A recoverable failure, reported for diagnostics
    Error(ErrorResponse),
}
