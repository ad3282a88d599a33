//! Recording state management
//!
//! The recording phase machine and the outcome type handed to observers
//! when a finished movie has been saved.

use crate::library::AssetRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the movie recording lifecycle
///
/// `Idle -> Starting -> Recording -> Finishing -> Idle`. `Starting` becomes
/// `Recording` once the backend acknowledges the write; `Finishing` covers
/// the library hand-off after the output file is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingPhase {
    /// No recording in progress
    Idle,
    /// Write requested, waiting for the backend to acknowledge
    Starting,
    /// Backend is writing the output file
    Recording,
    /// Output file closed, library hand-off in flight
    Finishing,
}

impl Default for RecordingPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingPhase {
    /// Whether a recording is in flight in any form
    ///
    /// A start intent arriving while active is treated as a stop; the same
    /// control toggles both.
    pub fn is_active(self) -> bool {
        self != RecordingPhase::Idle
    }

    /// Whether a stop request still has something to stop
    ///
    /// Stopping during `Finishing` is an idempotent no-op; the output file
    /// is already closed.
    pub fn accepts_stop(self) -> bool {
        matches!(self, RecordingPhase::Starting | RecordingPhase::Recording)
    }
}

/// Result of a completed, saved recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutcome {
    /// Library reference for the saved movie, if the hand-off succeeded
    pub asset: Option<AssetRef>,

    /// Wall-clock duration of the recording in milliseconds
    pub duration_ms: f64,

    /// When the recording finished
    pub finished_at: DateTime<Utc>,
}
