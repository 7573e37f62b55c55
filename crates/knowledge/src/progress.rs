//! Structured progress reporting for bulk ingestion.
//!
//! Events are pushed through a callback and mirrored to `tracing::debug!`.
//! Phases: `embed`, `train`, `index`, `persist`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted during ingestion.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Phase of the operation
    pub phase: String,

    /// Items processed so far
    pub current: u64,

    /// Total expected items (if known)
    pub total: Option<u64>,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: Option<f64>,

    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: Option<f64>,
}

impl ProgressEvent {
    pub fn new(
        phase: impl Into<String>,
        current: u64,
        total: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let percentage = total.map(|t| {
            if t > 0 {
                (current as f64 / t as f64) * 100.0
            } else {
                0.0
            }
        });

        Self {
            phase: phase.into(),
            current,
            total,
            percentage,
            message: message.into(),
            elapsed_secs: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self
    }

    /// Format as a single user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => format!("{}", self.current),
        };

        let pct = match self.percentage {
            Some(p) => format!(" ({:.0}%)", p),
            None => String::new(),
        };

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress reporter that emits events through a callback.
///
/// Per-item phases (`embed`, `index`) only emit when the whole-number
/// percentage advances, so a large corpus produces at most ~100 events.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Arc<Instant>,
    last_percent: Arc<AtomicU64>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Arc::new(Instant::now()),
            last_percent: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    /// A reporter that emits nothing.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Arc::new(Instant::now()),
            last_percent: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(callback) = &self.callback else {
            return;
        };

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let event = event.with_elapsed(elapsed);

        tracing::debug!(
            phase = %event.phase,
            current = event.current,
            total = ?event.total,
            percentage = ?event.percentage,
            message = %event.message,
            elapsed_secs = elapsed,
            "Progress event"
        );

        callback(event);
    }

    /// Emit only if the integer percentage moved since the last throttled event.
    fn emit_throttled(&self, event: ProgressEvent) {
        let percent = event.percentage.map_or(0, |p| p.floor() as u64);
        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            self.emit(event);
        }
    }

    /// Start a new throttled phase.
    pub fn reset(&self) {
        self.last_percent.store(u64::MAX, Ordering::Relaxed);
    }

    pub fn embed(&self, current: u64, total: u64, model: &str) {
        self.emit_throttled(ProgressEvent::new(
            "embed",
            current,
            Some(total),
            format!("model={}", model),
        ));
    }

    pub fn train(&self, training_vectors: u64) {
        self.emit(ProgressEvent::new(
            "train",
            training_vectors,
            None,
            "training clustered index",
        ));
    }

    pub fn index(&self, current: u64, total: u64) {
        self.emit_throttled(ProgressEvent::new(
            "index",
            current,
            Some(total),
            "adding vectors",
        ));
    }

    pub fn persist(&self, path: &str) {
        self.emit(ProgressEvent::new(
            "persist",
            1,
            Some(1),
            format!("writing {}", path),
        ));
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}
