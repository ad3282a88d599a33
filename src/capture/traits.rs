//! Capture trait definitions
//!
//! Platform-agnostic seam between the session coordinator and the hardware
//! capture stack. The coordinator only ever talks to these traits; concrete
//! backends live in sibling modules.

use crate::error::CaptureResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of media a capture device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Video,
    Audio,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Video => write!(f, "video"),
            DeviceKind::Audio => write!(f, "audio"),
        }
    }
}

/// Physical placement of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Front,
    Back,
    Unspecified,
}

impl DevicePosition {
    /// The position to prefer when toggling away from this one
    pub fn toggled(self) -> Self {
        match self {
            DevicePosition::Front => DevicePosition::Back,
            DevicePosition::Back => DevicePosition::Front,
            DevicePosition::Unspecified => DevicePosition::Back,
        }
    }
}

/// Capability flags reported by a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    /// Device has a flash unit
    pub has_flash: bool,

    /// Device supports a focus point of interest
    pub focus_point_of_interest: bool,

    /// Device supports an exposure point of interest
    pub exposure_point_of_interest: bool,

    /// Movie connections from this device support stabilization
    pub supports_stabilization: bool,
}

/// Immutable snapshot describing a physical capture device
///
/// Replaced wholesale when the user switches cameras, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Media kind
    pub kind: DeviceKind,

    /// Physical position
    pub position: DevicePosition,

    /// Capability flags
    pub capabilities: DeviceCapabilities,
}

/// Authorization state for a media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Denied,
    NotDetermined,
}

/// Flash behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    Off,
    On,
    Auto,
}

/// Focus behavior for a point of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// One-shot autofocus at the point of interest
    AutoFocus,
    /// Continuous autofocus, re-evaluated by the device
    ContinuousAutoFocus,
}

/// Exposure behavior for a point of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    /// One-shot auto exposure at the point of interest
    AutoExpose,
    /// Continuous auto exposure, re-evaluated by the device
    ContinuousAutoExposure,
}

/// Orientation applied to output connections and the preview surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Default for VideoOrientation {
    fn default() -> Self {
        Self::Portrait
    }
}

/// Stabilization applied to a movie connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilizationMode {
    Off,
    Auto,
}

/// Normalized point of interest in the capture frame, (0, 0) top-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub x: f32,
    pub y: f32,
}

impl PointOfInterest {
    /// Center of the frame, used for automatic recentering
    pub const CENTER: PointOfInterest = PointOfInterest { x: 0.5, y: 0.5 };
}

/// Opaque identity of a session created by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque identity of an input attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(Uuid);

impl InputId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InputId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque identity of an output attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(Uuid);

impl OutputId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OutputId {
    fn default() -> Self {
        Self::new()
    }
}

/// An opened device paired with the session
///
/// Switching devices is a remove-old/add-new transaction over these
/// bindings, never an in-place mutation.
#[derive(Debug, Clone)]
pub struct InputBinding {
    pub id: InputId,
    pub device: DeviceInfo,
}

impl InputBinding {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            id: InputId::new(),
            device,
        }
    }
}

/// Session/output property tracked by the observation hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedProperty {
    SessionRunning,
    MovieRecordingActive,
    StillCaptureInProgress,
}

/// Event published by a backend on its event stream
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A tracked boolean property changed value
    PropertyChanged {
        property: TrackedProperty,
        old: bool,
        new: bool,
    },

    /// The session hit a runtime error but was not torn down
    RuntimeError { message: String },

    /// The subject area in front of a device changed
    SubjectAreaChanged { device_id: String },

    /// A movie recording finished writing its output file
    MovieFinished {
        output: OutputId,
        path: PathBuf,
        error: Option<String>,
    },
}

/// Encoded still image handed to the media library
#[derive(Debug, Clone)]
pub struct StillImage {
    pub bytes: Vec<u8>,
    pub orientation: VideoOrientation,
}

/// Exclusive device-configuration bracket
///
/// Obtained from [`CaptureBackend::lock_for_configuration`]; dropping the
/// guard releases the lock on every exit path.
pub trait DeviceConfig: Send {
    fn set_flash_mode(&mut self, mode: FlashMode);
    fn set_focus(&mut self, mode: FocusMode, point: PointOfInterest);
    fn set_exposure(&mut self, mode: ExposureMode, point: PointOfInterest);
    fn set_subject_area_monitoring(&mut self, enabled: bool);
}

/// A capture session owned by the configuration actor
///
/// All mutation goes through the actor's command loop; implementations only
/// need to be internally consistent, not to serialize callers.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Open a transactional configuration boundary
    fn begin_configuration(&self);

    /// Commit the configuration boundary opened by `begin_configuration`
    fn commit_configuration(&self);

    /// Attach an input; at most one input per media kind is accepted
    fn add_input(&self, binding: &InputBinding) -> CaptureResult<()>;

    /// Detach an input by id; unknown ids are ignored
    fn remove_input(&self, id: InputId);

    /// Attach the still-image output
    fn add_still_output(&self) -> CaptureResult<OutputId>;

    /// Attach the movie-file output
    fn add_movie_output(&self) -> CaptureResult<OutputId>;

    fn supports_stabilization(&self, output: OutputId) -> bool;

    fn set_stabilization(&self, output: OutputId, mode: StabilizationMode);

    fn set_output_orientation(&self, output: OutputId, orientation: VideoOrientation);

    fn start_running(&self);

    fn stop_running(&self);

    fn is_running(&self) -> bool;

    /// Begin writing a movie to `path`; completion arrives as
    /// [`BackendEvent::MovieFinished`] on the event stream
    async fn start_recording(&self, output: OutputId, path: &Path) -> CaptureResult<()>;

    /// Request the end of an in-flight recording; idempotent
    async fn stop_recording(&self, output: OutputId);

    /// Expose a single still frame
    async fn capture_still(&self, output: OutputId) -> CaptureResult<StillImage>;

    /// Subscribe to the backend event stream
    fn events(&self) -> broadcast::Receiver<BackendEvent>;
}

/// Entry point to a concrete capture stack
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    fn authorization(&self, kind: DeviceKind) -> Authorization;

    /// Ask the platform for access to `kind` devices; returns whether
    /// access is granted once the user has answered
    async fn request_access(&self, kind: DeviceKind) -> bool;

    fn enumerate_devices(&self, kind: DeviceKind) -> Vec<DeviceInfo>;

    fn make_session(&self) -> CaptureResult<Box<dyn CaptureSession>>;

    /// Open a device for attachment to a session
    fn open_input(&self, device: &DeviceInfo) -> CaptureResult<InputBinding>;

    /// Acquire the exclusive configuration bracket for a device
    fn lock_for_configuration<'a>(
        &'a self,
        device: &DeviceInfo,
    ) -> CaptureResult<Box<dyn DeviceConfig + 'a>>;
}

/// The surface rendering the live preview
///
/// The core only ever writes a session binding and a video orientation;
/// rendering itself happens elsewhere.
pub trait PreviewSurface: Send + Sync {
    fn attach_session(&self, session: Option<SessionId>);
    fn set_video_orientation(&self, orientation: VideoOrientation);
    fn video_orientation(&self) -> VideoOrientation;
}

/// Minimal preview-surface state holder for headless hosts and tests
#[derive(Default)]
pub struct SharedPreview {
    state: RwLock<PreviewState>,
}

#[derive(Default)]
struct PreviewState {
    session: Option<SessionId>,
    orientation: VideoOrientation,
}

impl SharedPreview {
    pub fn new(orientation: VideoOrientation) -> Self {
        Self {
            state: RwLock::new(PreviewState {
                session: None,
                orientation,
            }),
        }
    }

    pub fn session(&self) -> Option<SessionId> {
        self.state.read().session
    }
}

impl PreviewSurface for SharedPreview {
    fn attach_session(&self, session: Option<SessionId>) {
        self.state.write().session = session;
    }

    fn set_video_orientation(&self, orientation: VideoOrientation) {
        self.state.write().orientation = orientation;
    }

    fn video_orientation(&self) -> VideoOrientation {
        self.state.read().orientation
    }
}
