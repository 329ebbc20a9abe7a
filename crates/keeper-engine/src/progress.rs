//! Progress reporting: a phase marker plus running call counters, pushed
//! to an arbitrary sink via a plain callback rather than a channel — the
//! CLI renders it straight to a progress bar, and tests can capture it
//! into a `Vec` with no async plumbing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Preflight,
    PersonaObservation,
    MemoryExtraction,
    PersonaSynthesis,
    MemorySynthesis,
    Manifest,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    pub started_calls: u64,
    pub completed_calls: u64,
    pub failed_calls: u64,
    pub active_calls: u64,
    pub total_calls: u64,
}

pub type OnProgress = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Shared mutable call counters behind an `Arc`, so every spawned worker
/// can report through the same tallies without the caller threading a
/// `&mut` through `tokio::spawn`.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<std::sync::Mutex<Counters>>,
    on_progress: Option<OnProgress>,
    total_calls: u64,
}

#[derive(Default)]
struct Counters {
    started: u64,
    completed: u64,
    failed: u64,
}

impl ProgressTracker {
    pub fn new(total_calls: u64, on_progress: Option<OnProgress>) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(Counters::default())),
            on_progress,
            total_calls,
        }
    }

    fn emit(&self, phase: Phase, message: impl Into<String>) {
        let Some(cb) = &self.on_progress else { return };
        let counters = self.inner.lock().expect("progress counters lock poisoned");
        cb(ProgressEvent {
            phase,
            message: message.into(),
            started_calls: counters.started,
            completed_calls: counters.completed,
            failed_calls: counters.failed,
            active_calls: counters.started - counters.completed - counters.failed,
            total_calls: self.total_calls,
        });
    }

    pub fn call_started(&self, phase: Phase, message: impl Into<String>) {
        {
            let mut counters = self.inner.lock().expect("progress counters lock poisoned");
            counters.started += 1;
        }
        self.emit(phase, message);
    }

    pub fn call_completed(&self, phase: Phase, message: impl Into<String>) {
        {
            let mut counters = self.inner.lock().expect("progress counters lock poisoned");
            counters.completed += 1;
        }
        self.emit(phase, message);
    }

    pub fn call_failed(&self, phase: Phase, message: impl Into<String>) {
        {
            let mut counters = self.inner.lock().expect("progress counters lock poisoned");
            counters.failed += 1;
        }
        self.emit(phase, message);
    }

    pub fn phase_changed(&self, phase: Phase, message: impl Into<String>) {
        self.emit(phase, message);
    }

    /// A call is being retried; doesn't touch started/completed/failed since
    /// the call itself hasn't resolved yet.
    pub fn call_retried(&self, phase: Phase, message: impl Into<String>) {
        self.emit(phase, message);
    }
}
