//! Capture session actor
//!
//! Owns the only mutable handle to the capture session and serializes every
//! mutation onto a single command loop: one task, strict submission order,
//! one command at a time. Device hardware configuration is not safely
//! reentrant, so this loop is the central correctness mechanism; nothing
//! else in the crate touches the session, an input binding, or a device.

use super::hub::{HubHandle, ObservationHub};
use super::{CaptureEvent, SessionHandles};
use crate::capture::device;
use crate::capture::traits::{
    CaptureBackend, CaptureSession, DeviceInfo, DeviceKind, DevicePosition, ExposureMode,
    FlashMode, FocusMode, PointOfInterest, PreviewSurface, StabilizationMode, VideoOrientation,
};
use crate::capture::traits::{InputBinding, OutputId};
use crate::error::{CaptureError, CaptureResult, ErrorResponse};
use crate::library::MediaLibrary;
use crate::recording::{BackgroundExecution, BackgroundTaskToken, RecordingOutcome, RecordingPhase};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Commands accepted by the session context
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Initialize {
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Activate,
    Deactivate,
    StartRunning,
    SwitchCamera {
        preferred: Option<DevicePosition>,
        reply: oneshot::Sender<CaptureResult<DeviceInfo>>,
    },
    ToggleRecording,
    SnapStillImage,
    FocusAndExpose {
        focus: FocusMode,
        exposure: ExposureMode,
        point: PointOfInterest,
        monitor_subject_area: bool,
    },
    SetFlashMode {
        mode: FlashMode,
    },
    UpdateOrientation {
        orientation: VideoOrientation,
    },
    /// Backend acknowledged (or dropped) the movie write; from the hub
    RecordingActive {
        active: bool,
    },
    /// Backend closed the movie output file; from the hub
    MovieFinished {
        path: PathBuf,
        error: Option<String>,
    },
    /// The subject area in front of a device changed; from the hub
    SubjectAreaChanged {
        device_id: String,
    },
    /// The library hand-off task finished; internal
    FinishCompleted,
    Shutdown,
}

pub(crate) struct SessionActor {
    backend: Arc<dyn CaptureBackend>,
    library: Arc<dyn MediaLibrary>,
    background: Arc<dyn BackgroundExecution>,
    preview: Arc<dyn PreviewSurface>,

    session: Option<Arc<dyn CaptureSession>>,
    video_input: Option<InputBinding>,
    audio_input: Option<InputBinding>,
    movie_output: Option<OutputId>,
    still_output: Option<OutputId>,

    phase: RecordingPhase,
    pending_token: Option<BackgroundTaskToken>,
    recording_started: Option<Instant>,
    rotation_lock: Arc<AtomicBool>,

    authorized: bool,
    hub: Option<HubHandle>,

    event_tx: broadcast::Sender<CaptureEvent>,
    self_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionActor {
    pub(crate) fn new(
        handles: SessionHandles,
        event_tx: broadcast::Sender<CaptureEvent>,
        self_tx: mpsc::UnboundedSender<SessionCommand>,
        rotation_lock: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend: handles.backend,
            library: handles.library,
            background: handles.background,
            preview: handles.preview,
            session: None,
            video_input: None,
            audio_input: None,
            movie_output: None,
            still_output: None,
            phase: RecordingPhase::Idle,
            pending_token: None,
            recording_started: None,
            rotation_lock,
            authorized: false,
            hub: None,
            event_tx,
            self_tx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        tracing::debug!("session context started");

        while let Some(command) = commands.recv().await {
            if !self.handle(command).await {
                break;
            }
        }

        tracing::debug!("session context stopped");
    }

    async fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Initialize { reply } => {
                let result = self.initialize().await;
                let _ = reply.send(result);
            }
            SessionCommand::Activate => self.activate(),
            SessionCommand::Deactivate => self.deactivate(),
            SessionCommand::StartRunning => {
                if let Some(session) = &self.session {
                    session.start_running();
                }
            }
            SessionCommand::SwitchCamera { preferred, reply } => {
                let result = self.switch_camera(preferred).await;
                if let Err(error) = &result {
                    self.report(error);
                }
                let _ = reply.send(result);
            }
            SessionCommand::ToggleRecording => self.toggle_recording().await,
            SessionCommand::SnapStillImage => self.snap_still_image(),
            SessionCommand::FocusAndExpose {
                focus,
                exposure,
                point,
                monitor_subject_area,
            } => self.focus_and_expose(focus, exposure, point, monitor_subject_area),
            SessionCommand::SetFlashMode { mode } => {
                if let Some(device) = self.current_video_device() {
                    if let Err(error) = apply_flash_mode(self.backend.as_ref(), &device, mode) {
                        self.report(&error);
                    }
                }
            }
            SessionCommand::UpdateOrientation { orientation } => {
                self.update_orientation(orientation)
            }
            SessionCommand::RecordingActive { active } => self.note_recording_active(active),
            SessionCommand::MovieFinished { path, error } => self.movie_finished(path, error),
            SessionCommand::SubjectAreaChanged { device_id } => {
                self.subject_area_changed(&device_id)
            }
            SessionCommand::FinishCompleted => {
                self.phase = RecordingPhase::Idle;
            }
            SessionCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Open default devices and attach outputs
    ///
    /// Runs to completion before any capture intent is accepted; command
    /// serialization guarantees the ordering.
    async fn initialize(&mut self) -> CaptureResult<()> {
        if self.session.is_some() {
            tracing::debug!("session already initialized");
            return Ok(());
        }

        if !self.backend.request_access(DeviceKind::Video).await {
            tracing::warn!("camera access denied");
            self.authorized = false;
            self.emit(CaptureEvent::PermissionDenied);
            return Err(CaptureError::PermissionDenied);
        }
        self.authorized = true;

        let session: Arc<dyn CaptureSession> = Arc::from(self.backend.make_session()?);
        self.preview.attach_session(Some(session.id()));

        let video_result = self.attach_video(&session, DevicePosition::Back);
        if let Err(error) = &video_result {
            tracing::warn!(%error, "no usable video device");
            self.emit(CaptureEvent::DeviceUnavailable {
                kind: DeviceKind::Video,
            });
        }

        // A system without any audio device is not an error; recording
        // proceeds video-only.
        match device::pick_device(
            self.backend.as_ref(),
            DeviceKind::Audio,
            DevicePosition::Unspecified,
        ) {
            Ok(device) => {
                let attached = self.backend.open_input(&device).and_then(|binding| {
                    session.add_input(&binding)?;
                    Ok(binding)
                });
                match attached {
                    Ok(binding) => {
                        tracing::info!(device = %binding.device.name, "audio input attached");
                        self.audio_input = Some(binding);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "audio device could not be attached");
                        self.emit(CaptureEvent::DeviceUnavailable {
                            kind: DeviceKind::Audio,
                        });
                    }
                }
            }
            Err(_) => tracing::info!("no audio device; recording will be video-only"),
        }

        match session.add_movie_output() {
            Ok(output) => {
                if session.supports_stabilization(output) {
                    session.set_stabilization(output, StabilizationMode::Auto);
                }
                self.movie_output = Some(output);
            }
            Err(error) => tracing::warn!(%error, "movie output not attached"),
        }

        match session.add_still_output() {
            Ok(output) => self.still_output = Some(output),
            Err(error) => tracing::warn!(%error, "still output not attached"),
        }

        self.session = Some(session);
        tracing::info!("capture session initialized");
        video_result.map(|_| ())
    }

    fn attach_video(
        &mut self,
        session: &Arc<dyn CaptureSession>,
        preferred: DevicePosition,
    ) -> CaptureResult<DeviceInfo> {
        let selected = device::pick_device(self.backend.as_ref(), DeviceKind::Video, preferred)?;
        let binding = self.backend.open_input(&selected)?;
        session.add_input(&binding)?;

        tracing::info!(device = %selected.name, "video input attached");
        self.video_input = Some(binding);
        Ok(selected)
    }

    /// Register observers and start the session running
    fn activate(&mut self) {
        let Some(session) = &self.session else {
            self.report(&CaptureError::NotInitialized);
            return;
        };

        if self.hub.is_some() {
            tracing::debug!("observers already registered");
            return;
        }

        let hub = ObservationHub::spawn(
            session.events(),
            self.event_tx.clone(),
            self.self_tx.clone(),
            self.authorized,
        );
        self.hub = Some(hub);
        session.start_running();
    }

    /// Remove every observer registered on activation, then stop the session
    ///
    /// Observers go first so backend events emitted during teardown cannot
    /// trigger another restart.
    fn deactivate(&mut self) {
        if let Some(hub) = self.hub.take() {
            hub.shutdown();
        }
        if let Some(session) = &self.session {
            session.stop_running();
        }
    }

    /// Atomic device-switch protocol
    ///
    /// The session is never left without a video input: when the
    /// replacement cannot be attached, the previous binding is restored
    /// inside the same configuration boundary.
    async fn switch_camera(
        &mut self,
        preferred: Option<DevicePosition>,
    ) -> CaptureResult<DeviceInfo> {
        let session = self.session.clone().ok_or(CaptureError::NotInitialized)?;
        let (preferred, current_id) = match &self.video_input {
            Some(binding) => (
                preferred.unwrap_or_else(|| binding.device.position.toggled()),
                binding.device.id.clone(),
            ),
            None => {
                return Err(CaptureError::DeviceUnavailable(
                    "no active video device".to_string(),
                ))
            }
        };

        let next = device::pick_device(self.backend.as_ref(), DeviceKind::Video, preferred)?;
        if next.id == current_id {
            tracing::debug!(device = %next.name, "already using requested camera");
            return Ok(next);
        }

        let replacement = self.backend.open_input(&next)?;
        let Some(previous) = self.video_input.take() else {
            return Err(CaptureError::DeviceUnavailable(
                "no active video device".to_string(),
            ));
        };

        session.begin_configuration();
        session.remove_input(previous.id);

        let result = match session.add_input(&replacement) {
            Ok(()) => {
                if let Err(error) =
                    apply_flash_mode(self.backend.as_ref(), &replacement.device, FlashMode::Auto)
                {
                    tracing::warn!(%error, "flash mode not reset on new device");
                }
                tracing::info!(
                    from = %previous.device.name,
                    to = %replacement.device.name,
                    "switched active camera"
                );
                self.video_input = Some(replacement);

                // Output connections are re-created around a device switch;
                // re-apply the preview orientation to them.
                let orientation = self.preview.video_orientation();
                for output in [self.movie_output, self.still_output].into_iter().flatten() {
                    session.set_output_orientation(output, orientation);
                }
                Ok(next)
            }
            Err(error) => {
                tracing::warn!(%error, "replacement camera rejected, restoring previous device");
                if let Err(restore) = session.add_input(&previous) {
                    tracing::error!(%restore, "previous video input could not be restored");
                }
                self.video_input = Some(previous);
                Err(error)
            }
        };

        session.commit_configuration();
        result
    }

    /// Start or stop the movie recording; the same control toggles both
    async fn toggle_recording(&mut self) {
        let Some(session) = self.session.clone() else {
            self.report(&CaptureError::NotInitialized);
            return;
        };
        let Some(output) = self.movie_output else {
            self.report(&CaptureError::DeviceUnavailable(
                "movie output unavailable".to_string(),
            ));
            return;
        };

        if self.phase.is_active() {
            if !self.phase.accepts_stop() {
                tracing::debug!(phase = ?self.phase, "recording already finishing");
                return;
            }
            tracing::info!("stopping movie recording");
            session.stop_recording(output).await;
            return;
        }

        // Idle -> Starting: lease background execution and lock interface
        // rotation for the life of the write.
        let token = self.background.begin("movie-recording");
        self.rotation_lock.store(true, Ordering::SeqCst);
        session.set_output_orientation(output, self.preview.video_orientation());

        // Flash during video capture is disallowed.
        if let Some(device) = self.current_video_device() {
            if let Err(error) = apply_flash_mode(self.backend.as_ref(), &device, FlashMode::Off) {
                tracing::warn!(%error, "flash not forced off for recording");
            }
        }

        let path = temp_movie_path();
        tracing::info!(path = %path.display(), "starting movie recording");

        match session.start_recording(output, &path).await {
            Ok(()) => {
                self.phase = RecordingPhase::Starting;
                self.recording_started = Some(Instant::now());
                self.pending_token = Some(token);
            }
            Err(error) => {
                self.rotation_lock.store(false, Ordering::SeqCst);
                token.release();
                self.report(&error);
            }
        }
    }

    fn note_recording_active(&mut self, active: bool) {
        if active && self.phase == RecordingPhase::Starting {
            self.phase = RecordingPhase::Recording;
        }
    }

    /// The backend closed the output file; hand it to the media library
    ///
    /// The temporary file and the background token transfer to the
    /// completion task, which releases the token exactly once on every
    /// outcome.
    fn movie_finished(&mut self, path: PathBuf, error: Option<String>) {
        // Rotation unlocks as soon as the file is closed, regardless of how
        // the library hand-off goes.
        self.rotation_lock.store(false, Ordering::SeqCst);

        if !self.phase.is_active() {
            tracing::debug!("ignoring finish event with no recording in flight");
            return;
        }
        self.phase = RecordingPhase::Finishing;

        if let Some(message) = &error {
            tracing::warn!(%message, "movie recording finished with backend error");
        }

        let duration_ms = self
            .recording_started
            .take()
            .map(|started| started.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let token = self.pending_token.take();
        let library = Arc::clone(&self.library);
        let event_tx = self.event_tx.clone();
        let self_tx = self.self_tx.clone();

        tokio::spawn(async move {
            let written = library.write_video(&path).await;

            // The temporary file is cleaned up on every outcome.
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                tracing::debug!(
                    path = %path.display(),
                    error = %remove,
                    "temporary recording file already gone"
                );
            }

            match written {
                Ok(asset) => {
                    let outcome = RecordingOutcome {
                        asset: Some(asset),
                        duration_ms,
                        finished_at: Utc::now(),
                    };
                    let _ = event_tx.send(CaptureEvent::RecordingSaved(outcome));
                }
                Err(error) => {
                    // Logged, not retried.
                    tracing::warn!(%error, "finished recording could not be saved");
                    let _ = event_tx.send(CaptureEvent::Error(ErrorResponse::from(&error)));
                }
            }

            if let Some(token) = token {
                token.release();
            }
            let _ = self_tx.send(SessionCommand::FinishCompleted);
        });
    }

    /// Capture a still and hand the encoded bytes to the media library
    fn snap_still_image(&mut self) {
        let Some(session) = self.session.clone() else {
            self.report(&CaptureError::NotInitialized);
            return;
        };
        let Some(output) = self.still_output else {
            self.report(&CaptureError::DeviceUnavailable(
                "still output unavailable".to_string(),
            ));
            return;
        };

        session.set_output_orientation(output, self.preview.video_orientation());

        // Flash auto for still capture.
        if let Some(device) = self.current_video_device() {
            if let Err(error) = apply_flash_mode(self.backend.as_ref(), &device, FlashMode::Auto) {
                tracing::warn!(%error, "flash not set to auto for still capture");
            }
        }

        let library = Arc::clone(&self.library);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match session.capture_still(output).await {
                Ok(image) => match library.write_image(&image.bytes, image.orientation).await {
                    Ok(asset) => {
                        tracing::info!(path = %asset.path.display(), "still image saved");
                        let _ = event_tx.send(CaptureEvent::StillSaved(asset));
                    }
                    Err(error) => {
                        tracing::warn!(%error, "captured still could not be saved");
                        let _ = event_tx.send(CaptureEvent::Error(ErrorResponse::from(&error)));
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, "still capture failed");
                    let _ = event_tx.send(CaptureEvent::Error(ErrorResponse::from(&error)));
                }
            }
        });
    }

    fn focus_and_expose(
        &mut self,
        focus: FocusMode,
        exposure: ExposureMode,
        point: PointOfInterest,
        monitor_subject_area: bool,
    ) {
        let Some(device) = self.current_video_device() else {
            self.report(&CaptureError::DeviceUnavailable(
                "no active video device".to_string(),
            ));
            return;
        };

        if let Err(error) = apply_focus_exposure(
            self.backend.as_ref(),
            &device,
            focus,
            exposure,
            point,
            monitor_subject_area,
        ) {
            self.report(&error);
        }
    }

    /// One-shot recentering after the subject area changed
    ///
    /// Continuous modes with monitoring off, as opposed to tap-to-focus,
    /// which is one-shot with monitoring on.
    fn subject_area_changed(&mut self, device_id: &str) {
        let Some(device) = self.current_video_device() else {
            return;
        };
        // Events from a just-detached device are stale.
        if device.id != device_id {
            tracing::debug!(device_id, "subject-area event from inactive device");
            return;
        }

        if let Err(error) = apply_focus_exposure(
            self.backend.as_ref(),
            &device,
            FocusMode::ContinuousAutoFocus,
            ExposureMode::ContinuousAutoExposure,
            PointOfInterest::CENTER,
            false,
        ) {
            tracing::warn!(%error, "subject-area recentering skipped");
        }
    }

    fn update_orientation(&mut self, orientation: VideoOrientation) {
        if self.rotation_lock.load(Ordering::SeqCst) {
            tracing::debug!("ignoring orientation change while recording");
            return;
        }

        self.preview.set_video_orientation(orientation);
        if let Some(session) = &self.session {
            for output in [self.movie_output, self.still_output].into_iter().flatten() {
                session.set_output_orientation(output, orientation);
            }
        }
    }

    fn shutdown(&mut self) {
        self.deactivate();
        self.preview.attach_session(None);
        self.video_input = None;
        self.audio_input = None;
        self.session = None;
        tracing::info!("capture session shut down");
    }

    fn current_video_device(&self) -> Option<DeviceInfo> {
        self.video_input
            .as_ref()
            .map(|binding| binding.device.clone())
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.event_tx.send(event);
    }

    fn report(&self, error: &CaptureError) {
        tracing::warn!(%error, "capture operation failed");
        self.emit(CaptureEvent::Error(ErrorResponse::from(error)));
    }
}

/// Temporary recording output: fixed base name and extension in the
/// platform temporary directory
fn temp_movie_path() -> PathBuf {
    std::env::temp_dir().join("movie.mov")
}

/// Apply a flash mode under the exclusive device bracket
///
/// Only devices that report flash capability are touched. A lock failure is
/// returned for the caller to report, never retried.
pub(crate) fn apply_flash_mode(
    backend: &dyn CaptureBackend,
    device: &DeviceInfo,
    mode: FlashMode,
) -> CaptureResult<()> {
    if !device.capabilities.has_flash {
        return Ok(());
    }

    let mut config = backend.lock_for_configuration(device)?;
    config.set_flash_mode(mode);
    Ok(())
}

/// Apply focus/exposure point-of-interest under the exclusive device bracket
pub(crate) fn apply_focus_exposure(
    backend: &dyn CaptureBackend,
    device: &DeviceInfo,
    focus: FocusMode,
    exposure: ExposureMode,
    point: PointOfInterest,
    monitor_subject_area: bool,
) -> CaptureResult<()> {
    let mut config = backend.lock_for_configuration(device)?;

    if device.capabilities.focus_point_of_interest {
        config.set_focus(focus, point);
    }
    if device.capabilities.exposure_point_of_interest {
        config.set_exposure(exposure, point);
    }
    config.set_subject_area_monitoring(monitor_subject_area);
    Ok(())
}
