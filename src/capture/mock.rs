//! Scripted capture backend for tests
//!
//! Behaves like a tiny in-memory capture stack: one session, one input slot
//! per media kind, property-change events on the backend stream, and
//! injectable failures for the paths the coordinator has to survive.

use super::traits::{
    Authorization, BackendEvent, CaptureBackend, CaptureSession, DeviceCapabilities, DeviceConfig,
    DeviceInfo, DeviceKind, DevicePosition, ExposureMode, FlashMode, FocusMode, InputBinding,
    InputId, OutputId, PointOfInterest, SessionId, StabilizationMode, StillImage, TrackedProperty,
    VideoOrientation,
};
use crate::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Configuration mutation recorded by the mock device bracket
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOp {
    Flash {
        device: String,
        mode: FlashMode,
    },
    Focus {
        device: String,
        mode: FocusMode,
        point: PointOfInterest,
    },
    Exposure {
        device: String,
        mode: ExposureMode,
        point: PointOfInterest,
    },
    Monitoring {
        device: String,
        enabled: bool,
    },
    Unlock {
        device: String,
    },
}

#[derive(Default)]
struct MockSessionState {
    inputs: Vec<InputBinding>,
    still_output: Option<OutputId>,
    movie_output: Option<OutputId>,
    running: bool,
    recording_path: Option<PathBuf>,
    orientations: Vec<(OutputId, VideoOrientation)>,
    stabilization: Option<StabilizationMode>,
}

#[derive(Default)]
struct Counters {
    start_running: AtomicUsize,
    stop_running: AtomicUsize,
    start_recording: AtomicUsize,
    stop_recording: AtomicUsize,
    capture_still: AtomicUsize,
    begin_configuration: AtomicUsize,
    commit_configuration: AtomicUsize,
}

struct MockInner {
    session_id: SessionId,
    devices: Mutex<Vec<DeviceInfo>>,
    video_authorization: Mutex<Authorization>,
    events: broadcast::Sender<BackendEvent>,
    state: Mutex<MockSessionState>,
    counters: Counters,
    fail_next_add_input: AtomicBool,
    fail_open_input: AtomicBool,
    fail_config_lock: AtomicBool,
    config_lock: Mutex<()>,
    config_ops: Mutex<Vec<ConfigOp>>,
}

impl MockInner {
    fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }
}

/// Test backend; clone-cheap via the shared inner
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

impl MockBackend {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MockInner {
                session_id: SessionId::new(),
                devices: Mutex::new(devices),
                video_authorization: Mutex::new(Authorization::Authorized),
                events,
                state: Mutex::new(MockSessionState::default()),
                counters: Counters::default(),
                fail_next_add_input: AtomicBool::new(false),
                fail_open_input: AtomicBool::new(false),
                fail_config_lock: AtomicBool::new(false),
                config_lock: Mutex::new(()),
                config_ops: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn video_device(id: &str, position: DevicePosition) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: format!("{id} camera"),
            kind: DeviceKind::Video,
            position,
            capabilities: DeviceCapabilities {
                has_flash: true,
                focus_point_of_interest: true,
                exposure_point_of_interest: true,
                supports_stabilization: true,
            },
        }
    }

    pub fn audio_device(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: format!("{id} microphone"),
            kind: DeviceKind::Audio,
            position: DevicePosition::Unspecified,
            capabilities: DeviceCapabilities::default(),
        }
    }

    pub fn deny_video_access(&self) {
        *self.inner.video_authorization.lock() = Authorization::Denied;
    }

    /// Make the next video `add_input` fail with `DeviceBusyOrAtCapacity`
    pub fn fail_next_add_input(&self) {
        self.inner.fail_next_add_input.store(true, Ordering::SeqCst);
    }

    pub fn fail_open_input(&self, fail: bool) {
        self.inner.fail_open_input.store(fail, Ordering::SeqCst);
    }

    pub fn fail_config_lock(&self, fail: bool) {
        self.inner.fail_config_lock.store(fail, Ordering::SeqCst);
    }

    pub fn fire_runtime_error(&self, message: &str) {
        self.inner.emit(BackendEvent::RuntimeError {
            message: message.to_string(),
        });
    }

    pub fn fire_subject_area_changed(&self, device_id: &str) {
        self.inner.emit(BackendEvent::SubjectAreaChanged {
            device_id: device_id.to_string(),
        });
    }

    /// Simulate the session dropping out of the running state on its own,
    /// as happens right before a runtime error is reported
    pub fn simulate_stall(&self) {
        let mut state = self.inner.state.lock();
        if state.running {
            state.running = false;
            drop(state);
            self.inner.emit(BackendEvent::PropertyChanged {
                property: TrackedProperty::SessionRunning,
                old: true,
                new: false,
            });
        }
    }

    pub fn input_count(&self, kind: DeviceKind) -> usize {
        self.inner
            .state
            .lock()
            .inputs
            .iter()
            .filter(|binding| binding.device.kind == kind)
            .count()
    }

    /// Id of the currently attached video device, if any
    pub fn attached_video_device(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .inputs
            .iter()
            .find(|binding| binding.device.kind == DeviceKind::Video)
            .map(|binding| binding.device.id.clone())
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        self.inner.state.lock().recording_path.clone()
    }

    pub fn stabilization(&self) -> Option<StabilizationMode> {
        self.inner.state.lock().stabilization
    }

    pub fn orientation_of(&self, output: OutputId) -> Option<VideoOrientation> {
        self.inner
            .state
            .lock()
            .orientations
            .iter()
            .find(|(id, _)| *id == output)
            .map(|(_, orientation)| *orientation)
    }

    pub fn start_running_count(&self) -> usize {
        self.inner.counters.start_running.load(Ordering::SeqCst)
    }

    pub fn stop_running_count(&self) -> usize {
        self.inner.counters.stop_running.load(Ordering::SeqCst)
    }

    pub fn start_recording_count(&self) -> usize {
        self.inner.counters.start_recording.load(Ordering::SeqCst)
    }

    pub fn stop_recording_count(&self) -> usize {
        self.inner.counters.stop_recording.load(Ordering::SeqCst)
    }

    pub fn capture_still_count(&self) -> usize {
        self.inner.counters.capture_still.load(Ordering::SeqCst)
    }

    pub fn begin_configuration_count(&self) -> usize {
        self.inner
            .counters
            .begin_configuration
            .load(Ordering::SeqCst)
    }

    pub fn commit_configuration_count(&self) -> usize {
        self.inner
            .counters
            .commit_configuration
            .load(Ordering::SeqCst)
    }

    pub fn config_ops(&self) -> Vec<ConfigOp> {
        self.inner.config_ops.lock().clone()
    }
}

#[async_trait]
impl CaptureBackend for MockBackend {
    fn authorization(&self, kind: DeviceKind) -> Authorization {
        match kind {
            DeviceKind::Video => *self.inner.video_authorization.lock(),
            DeviceKind::Audio => Authorization::Authorized,
        }
    }

    async fn request_access(&self, kind: DeviceKind) -> bool {
        self.authorization(kind) == Authorization::Authorized
    }

    fn enumerate_devices(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        self.inner
            .devices
            .lock()
            .iter()
            .filter(|device| device.kind == kind)
            .cloned()
            .collect()
    }

    fn make_session(&self) -> CaptureResult<Box<dyn CaptureSession>> {
        Ok(Box::new(MockSession {
            inner: self.inner.clone(),
        }))
    }

    fn open_input(&self, device: &DeviceInfo) -> CaptureResult<InputBinding> {
        if self.inner.fail_open_input.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable(device.name.clone()));
        }
        Ok(InputBinding::new(device.clone()))
    }

    fn lock_for_configuration<'a>(
        &'a self,
        device: &DeviceInfo,
    ) -> CaptureResult<Box<dyn DeviceConfig + 'a>> {
        if self.inner.fail_config_lock.load(Ordering::SeqCst) {
            return Err(CaptureError::ConfigurationLockFailure(device.name.clone()));
        }

        let guard = self
            .inner
            .config_lock
            .try_lock()
            .ok_or_else(|| CaptureError::ConfigurationLockFailure(device.name.clone()))?;

        Ok(Box::new(MockDeviceConfig {
            device: device.id.clone(),
            inner: &self.inner,
            _guard: guard,
        }))
    }
}

struct MockSession {
    inner: Arc<MockInner>,
}

#[async_trait]
impl CaptureSession for MockSession {
    fn id(&self) -> SessionId {
        self.inner.session_id
    }

    fn begin_configuration(&self) {
        self.inner
            .counters
            .begin_configuration
            .fetch_add(1, Ordering::SeqCst);
    }

    fn commit_configuration(&self) {
        self.inner
            .counters
            .commit_configuration
            .fetch_add(1, Ordering::SeqCst);
    }

    fn add_input(&self, binding: &InputBinding) -> CaptureResult<()> {
        if binding.device.kind == DeviceKind::Video
            && self.inner.fail_next_add_input.swap(false, Ordering::SeqCst)
        {
            return Err(CaptureError::DeviceBusyOrAtCapacity(
                binding.device.name.clone(),
            ));
        }

        let mut state = self.inner.state.lock();
        if state
            .inputs
            .iter()
            .any(|existing| existing.device.kind == binding.device.kind)
        {
            return Err(CaptureError::DeviceBusyOrAtCapacity(format!(
                "session already has a {} input",
                binding.device.kind
            )));
        }

        state.inputs.push(binding.clone());
        Ok(())
    }

    fn remove_input(&self, id: InputId) {
        self.inner
            .state
            .lock()
            .inputs
            .retain(|binding| binding.id != id);
    }

    fn add_still_output(&self) -> CaptureResult<OutputId> {
        let mut state = self.inner.state.lock();
        if state.still_output.is_some() {
            return Err(CaptureError::DeviceBusyOrAtCapacity(
                "still output already attached".to_string(),
            ));
        }
        let id = OutputId::new();
        state.still_output = Some(id);
        Ok(id)
    }

    fn add_movie_output(&self) -> CaptureResult<OutputId> {
        let mut state = self.inner.state.lock();
        if state.movie_output.is_some() {
            return Err(CaptureError::DeviceBusyOrAtCapacity(
                "movie output already attached".to_string(),
            ));
        }
        let id = OutputId::new();
        state.movie_output = Some(id);
        Ok(id)
    }

    fn supports_stabilization(&self, output: OutputId) -> bool {
        self.inner.state.lock().movie_output == Some(output)
    }

    fn set_stabilization(&self, _output: OutputId, mode: StabilizationMode) {
        self.inner.state.lock().stabilization = Some(mode);
    }

    fn set_output_orientation(&self, output: OutputId, orientation: VideoOrientation) {
        let mut state = self.inner.state.lock();
        state.orientations.retain(|(id, _)| *id != output);
        state.orientations.push((output, orientation));
    }

    fn start_running(&self) {
        self.inner
            .counters
            .start_running
            .fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        if !state.running {
            state.running = true;
            drop(state);
            self.inner.emit(BackendEvent::PropertyChanged {
                property: TrackedProperty::SessionRunning,
                old: false,
                new: true,
            });
        }
    }

    fn stop_running(&self) {
        self.inner
            .counters
            .stop_running
            .fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        if state.running {
            state.running = false;
            drop(state);
            self.inner.emit(BackendEvent::PropertyChanged {
                property: TrackedProperty::SessionRunning,
                old: true,
                new: false,
            });
        }
    }

    fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    async fn start_recording(&self, _output: OutputId, path: &Path) -> CaptureResult<()> {
        self.inner
            .counters
            .start_recording
            .fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        if state.recording_path.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        state.recording_path = Some(path.to_path_buf());
        drop(state);

        self.inner.emit(BackendEvent::PropertyChanged {
            property: TrackedProperty::MovieRecordingActive,
            old: false,
            new: true,
        });
        Ok(())
    }

    async fn stop_recording(&self, output: OutputId) {
        self.inner
            .counters
            .stop_recording
            .fetch_add(1, Ordering::SeqCst);

        let finished = self.inner.state.lock().recording_path.take();
        if let Some(path) = finished {
            self.inner.emit(BackendEvent::PropertyChanged {
                property: TrackedProperty::MovieRecordingActive,
                old: true,
                new: false,
            });
            self.inner.emit(BackendEvent::MovieFinished {
                output,
                path,
                error: None,
            });
        }
    }

    async fn capture_still(&self, output: OutputId) -> CaptureResult<StillImage> {
        self.inner
            .counters
            .capture_still
            .fetch_add(1, Ordering::SeqCst);

        self.inner.emit(BackendEvent::PropertyChanged {
            property: TrackedProperty::StillCaptureInProgress,
            old: false,
            new: true,
        });

        let orientation = self
            .inner
            .state
            .lock()
            .orientations
            .iter()
            .find(|(id, _)| *id == output)
            .map(|(_, orientation)| *orientation)
            .unwrap_or_default();

        self.inner.emit(BackendEvent::PropertyChanged {
            property: TrackedProperty::StillCaptureInProgress,
            old: true,
            new: false,
        });

        Ok(StillImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            orientation,
        })
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.inner.events.subscribe()
    }
}

struct MockDeviceConfig<'a> {
    device: String,
    inner: &'a MockInner,
    _guard: parking_lot::MutexGuard<'a, ()>,
}

impl MockDeviceConfig<'_> {
    fn record(&self, op: ConfigOp) {
        self.inner.config_ops.lock().push(op);
    }
}

impl DeviceConfig for MockDeviceConfig<'_> {
    fn set_flash_mode(&mut self, mode: FlashMode) {
        self.record(ConfigOp::Flash {
            device: self.device.clone(),
            mode,
        });
    }

    fn set_focus(&mut self, mode: FocusMode, point: PointOfInterest) {
        self.record(ConfigOp::Focus {
            device: self.device.clone(),
            mode,
            point,
        });
    }

    fn set_exposure(&mut self, mode: ExposureMode, point: PointOfInterest) {
        self.record(ConfigOp::Exposure {
            device: self.device.clone(),
            mode,
            point,
        });
    }

    fn set_subject_area_monitoring(&mut self, enabled: bool) {
        self.record(ConfigOp::Monitoring {
            device: self.device.clone(),
            enabled,
        });
    }
}

impl Drop for MockDeviceConfig<'_> {
    fn drop(&mut self) {
        self.record(ConfigOp::Unlock {
            device: self.device.clone(),
        });
    }
}
