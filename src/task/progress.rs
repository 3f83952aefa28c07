use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const INDETERMINATE: u64 = u64::MAX;

/// Snapshot of how far a task got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Completion in `0.0..=100.0`, `None` when it cannot be estimated.
    pub percent: Option<f64>,
    pub label: String,
}

impl TaskProgress {
    pub fn new(percent: f64, label: impl Into<String>) -> Self {
        Self {
            percent: Some(percent.clamp(0.0, 100.0)),
            label: label.into(),
        }
    }

    pub fn indeterminate(label: impl Into<String>) -> Self {
        Self {
            percent: None,
            label: label.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent.is_some_and(|p| p >= 100.0)
    }
}

/// Last known progress of a running task.
///
/// Written by the task while it runs and read by pollers on other threads.
/// The percentage is an atomic; the label sits behind a short lock that is
/// never held across an await.
#[derive(Debug)]
pub struct ProgressCell {
    percent_bits: AtomicU64,
    label: Mutex<String>,
}

impl ProgressCell {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            percent_bits: AtomicU64::new(0.0f64.to_bits()),
            label: Mutex::new(label.into()),
        }
    }

    pub fn set_percent(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        self.percent_bits.store(percent.to_bits(), Ordering::Release);
    }

    pub fn set_indeterminate(&self) {
        self.percent_bits.store(INDETERMINATE, Ordering::Release);
    }

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        match self.label.lock() {
            Ok(mut guard) => *guard = label,
            Err(poisoned) => *poisoned.into_inner() = label,
        }
    }

    pub fn percent(&self) -> Option<f64> {
        match self.percent_bits.load(Ordering::Acquire) {
            INDETERMINATE => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    pub fn snapshot(&self) -> TaskProgress {
        let label = match self.label.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        TaskProgress {
            percent: self.percent(),
            label,
        }
    }
}
