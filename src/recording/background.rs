//! Background execution leases
//!
//! A recording in flight must be allowed to finish writing even if the host
//! application is suspended. The lease is acquired when the recording starts
//! and released exactly once, after the finished file has been handed to the
//! media library (or the hand-off irrecoverably fails).

use std::sync::atomic::{AtomicU64, Ordering};

/// Provider of background-execution allowances
pub trait BackgroundExecution: Send + Sync {
    /// Begin a background task; the returned token must be released once
    /// the bracketed work is done
    fn begin(&self, label: &str) -> BackgroundTaskToken;
}

/// Single-owner lease on background execution
///
/// Released exactly once: explicitly via [`release`](Self::release) on the
/// normal path, or by the drop guard if the token is abandoned.
pub struct BackgroundTaskToken {
    label: String,
    end: Option<Box<dyn FnOnce() + Send>>,
}

impl BackgroundTaskToken {
    pub fn new(label: impl Into<String>, on_end: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            end: Some(Box::new(on_end)),
        }
    }

    /// Release the lease
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(end) = self.end.take() {
            tracing::debug!(label = %self.label, "background task ended");
            end();
        }
    }
}

impl Drop for BackgroundTaskToken {
    fn drop(&mut self) {
        if self.end.is_some() {
            tracing::warn!(
                label = %self.label,
                "background task token dropped without explicit release"
            );
            self.finish();
        }
    }
}

impl std::fmt::Debug for BackgroundTaskToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTaskToken")
            .field("label", &self.label)
            .field("released", &self.end.is_none())
            .finish()
    }
}

/// Provider for platforms without background-execution support
///
/// Tokens still track the bracket for diagnostics; ending them is a no-op.
#[derive(Debug, Default)]
pub struct NoopBackground {
    active: std::sync::Arc<AtomicU64>,
}

impl NoopBackground {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently outstanding tokens
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

impl BackgroundExecution for NoopBackground {
    fn begin(&self, label: &str) -> BackgroundTaskToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(label, "background task began");

        let active = self.active.clone();
        BackgroundTaskToken::new(label, move || {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}
