//! Capture stack abstraction and backends
//!
//! The session coordinator drives hardware exclusively through the traits
//! in [`traits`]; [`webcam`] is the bundled desktop backend and [`device`]
//! holds the pure device selector.

pub mod device;
pub mod traits;
pub mod webcam;

#[cfg(test)]
pub mod mock;

pub use device::{pick_device, select_device};
pub use traits::{
    Authorization, BackendEvent, CaptureBackend, CaptureSession, DeviceCapabilities, DeviceConfig,
    DeviceInfo, DeviceKind, DevicePosition, ExposureMode, FlashMode, FocusMode, InputBinding,
    InputId, OutputId, PointOfInterest, PreviewSurface, SessionId, SharedPreview,
    StabilizationMode, StillImage, TrackedProperty, VideoOrientation,
};
pub use webcam::WebcamBackend;
