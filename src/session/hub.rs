//! Observation hub
//!
//! Subscribes to the backend event stream and republishes state changes as
//! discrete events for the UI-facing observer. One hub task exists per
//! activation; deactivation stops it, so observer registration is strictly
//! bracketed and never duplicated.

use super::actor::SessionCommand;
use super::CaptureEvent;
use crate::capture::traits::{BackendEvent, TrackedProperty};
use crate::error::ErrorResponse;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Handle used by the actor to stop the hub on deactivation
pub(crate) struct HubHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HubHandle {
    pub(crate) fn shutdown(self) {
        let _ = self.shutdown.send(true);
        // The task drains its select loop and exits on its own; aborting
        // here would race an event already being handled.
        drop(self.task);
    }
}

pub(crate) struct ObservationHub {
    events: broadcast::Receiver<BackendEvent>,
    event_tx: broadcast::Sender<CaptureEvent>,
    commands: mpsc::UnboundedSender<SessionCommand>,

    authorized: bool,
    session_running: bool,
    still_in_progress: bool,
    recording_active: bool,
}

impl ObservationHub {
    pub(crate) fn spawn(
        events: broadcast::Receiver<BackendEvent>,
        event_tx: broadcast::Sender<CaptureEvent>,
        commands: mpsc::UnboundedSender<SessionCommand>,
        authorized: bool,
    ) -> HubHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = Self {
            events,
            event_tx,
            commands,
            authorized,
            session_running: false,
            still_in_progress: false,
            recording_active: false,
        };
        let task = tokio::spawn(hub.run(shutdown_rx));

        HubHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("observation hub started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.events.recv() => match event {
                    // Once the shutdown flag is raised, late events are
                    // dropped rather than handled.
                    Ok(_) if *shutdown.borrow() => break,
                    Ok(event) => self.handle(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "observation hub lagged behind backend events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!("observation hub stopped");
    }

    fn handle(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::PropertyChanged { property, new, .. } => {
                self.property_changed(property, new)
            }

            BackendEvent::RuntimeError { message } => {
                // One restart submission per error event; the session is
                // never abandoned for a transient runtime error.
                tracing::warn!(%message, "session runtime error, restarting");
                let _ = self.commands.send(SessionCommand::StartRunning);
                self.emit(CaptureEvent::Error(ErrorResponse {
                    code: "SESSION_RUNTIME_ERROR".to_string(),
                    message,
                }));
            }

            BackendEvent::SubjectAreaChanged { device_id } => {
                let _ = self
                    .commands
                    .send(SessionCommand::SubjectAreaChanged { device_id });
            }

            BackendEvent::MovieFinished { path, error, .. } => {
                let _ = self
                    .commands
                    .send(SessionCommand::MovieFinished { path, error });
            }
        }
    }

    fn property_changed(&mut self, property: TrackedProperty, value: bool) {
        match property {
            TrackedProperty::SessionRunning => {
                if self.session_running != value {
                    self.session_running = value;
                    self.emit(CaptureEvent::SessionAvailability {
                        available: self.authorized && value,
                    });
                }
            }

            TrackedProperty::StillCaptureInProgress => {
                if !self.still_in_progress && value {
                    self.emit(CaptureEvent::StillCaptureBegan);
                } else if self.still_in_progress && !value {
                    self.emit(CaptureEvent::StillCaptureEnded);
                }
                self.still_in_progress = value;
            }

            TrackedProperty::MovieRecordingActive => {
                if self.recording_active != value {
                    self.recording_active = value;
                    let _ = self
                        .commands
                        .send(SessionCommand::RecordingActive { active: value });
                    self.emit(if value {
                        CaptureEvent::RecordingStarted
                    } else {
                        CaptureEvent::RecordingStopped
                    });
                }
            }
        }
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.event_tx.send(event);
    }
}
