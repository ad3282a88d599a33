//! Error types and handling
//!
//! Capture-facing error taxonomy. Backend-originated failures are translated
//! into one of these kinds at the boundary where they occur; raw backend
//! errors never propagate past the session actor.

use crate::capture::traits::DeviceKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the capture session coordinator
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no {0} device available")]
    NoDeviceAvailable(DeviceKind),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("device busy or session at capacity: {0}")]
    DeviceBusyOrAtCapacity(String),

    #[error("device configuration lock failed: {0}")]
    ConfigurationLockFailure(String),

    #[error("session runtime error: {0}")]
    SessionRuntimeError(String),

    #[error("library write failed: {0}")]
    LibraryWriteFailure(String),

    #[error("session not initialized")]
    NotInitialized,

    #[error("recording already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error report for the UI-facing observer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        let code = match error {
            CaptureError::PermissionDenied => "PERMISSION_DENIED",
            CaptureError::NoDeviceAvailable(_) => "NO_DEVICE_AVAILABLE",
            CaptureError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            CaptureError::DeviceBusyOrAtCapacity(_) => "DEVICE_BUSY",
            CaptureError::ConfigurationLockFailure(_) => "CONFIGURATION_LOCK_FAILURE",
            CaptureError::SessionRuntimeError(_) => "SESSION_RUNTIME_ERROR",
            CaptureError::LibraryWriteFailure(_) => "LIBRARY_WRITE_FAILURE",
            CaptureError::NotInitialized => "NOT_INITIALIZED",
            CaptureError::AlreadyRecording => "ALREADY_RECORDING",
            CaptureError::NotRecording => "NOT_RECORDING",
            CaptureError::Io(_) => "IO_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
