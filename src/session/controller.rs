//! Session controller
//!
//! Cloneable handle the UI-owning context uses to reach the session
//! context. Every call is an asynchronous hand-off onto the actor's command
//! loop; nothing here blocks, so the interface stays responsive while
//! hardware reconfiguration proceeds.

use super::actor::{SessionActor, SessionCommand};
use super::{CaptureEvent, SessionHandles};
use crate::capture::traits::{
    DeviceInfo, DevicePosition, ExposureMode, FlashMode, FocusMode, PointOfInterest,
    VideoOrientation,
};
use crate::error::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Handle to a running session context
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<CaptureEvent>,
    rotation_lock: Arc<AtomicBool>,
}

impl SessionController {
    /// Spawn the session context and return its handle
    pub fn spawn(handles: SessionHandles) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let rotation_lock = Arc::new(AtomicBool::new(false));

        let actor = SessionActor::new(
            handles,
            events.clone(),
            commands.clone(),
            rotation_lock.clone(),
        );
        tokio::spawn(actor.run(command_rx));

        Self {
            commands,
            events,
            rotation_lock,
        }
    }

    /// Open default devices and attach outputs
    ///
    /// Completes before any subsequent capture intent is handled.
    pub async fn initialize(&self) -> CaptureResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Initialize { reply });
        response.await.map_err(|_| context_stopped())?
    }

    /// Register observers and start the session running (view-appear)
    pub fn activate(&self) {
        self.send(SessionCommand::Activate);
    }

    /// Stop the session and remove observers (view-disappear)
    pub fn deactivate(&self) {
        self.send(SessionCommand::Deactivate);
    }

    /// Switch the active camera
    ///
    /// With no explicit preference the position opposite the current
    /// device is chosen.
    pub async fn switch_camera(
        &self,
        preferred: Option<DevicePosition>,
    ) -> CaptureResult<DeviceInfo> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::SwitchCamera { preferred, reply });
        response.await.map_err(|_| context_stopped())?
    }

    /// Start the movie recording, or stop the one in flight
    pub fn toggle_recording(&self) {
        self.send(SessionCommand::ToggleRecording);
    }

    /// Capture a still image and save it to the media library
    pub fn snap_still_image(&self) {
        self.send(SessionCommand::SnapStillImage);
    }

    /// Tap-to-focus: one-shot focus/exposure at `point` with subject-area
    /// monitoring enabled
    pub fn focus_at(&self, point: PointOfInterest) {
        self.focus_and_expose(
            FocusMode::AutoFocus,
            ExposureMode::AutoExpose,
            point,
            true,
        );
    }

    pub fn focus_and_expose(
        &self,
        focus: FocusMode,
        exposure: ExposureMode,
        point: PointOfInterest,
        monitor_subject_area: bool,
    ) {
        self.send(SessionCommand::FocusAndExpose {
            focus,
            exposure,
            point,
            monitor_subject_area,
        });
    }

    pub fn set_flash_mode(&self, mode: FlashMode) {
        self.send(SessionCommand::SetFlashMode { mode });
    }

    /// Propagate an interface rotation; ignored while a recording locks
    /// rotation
    pub fn update_orientation(&self, orientation: VideoOrientation) {
        self.send(SessionCommand::UpdateOrientation { orientation });
    }

    /// Whether interface rotation is currently locked by a recording
    pub fn rotation_locked(&self) -> bool {
        self.rotation_lock.load(Ordering::SeqCst)
    }

    /// Subscribe to the UI-facing event stream
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    /// Tear the session down and end the session context
    pub fn shutdown(&self) {
        self.send(SessionCommand::Shutdown);
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("session context is gone; command dropped");
        }
    }
}

fn context_stopped() -> CaptureError {
    CaptureError::SessionRuntimeError("session context stopped".to_string())
}
