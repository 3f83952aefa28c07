use super::{CancelFlag, Task, TaskProgress};
use crate::core::{MigrationError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct WeightedTask {
    task: Arc<dyn Task>,
    weight: u32,
}

/// Ordered sequence of weighted child tasks.
///
/// Children run strictly in order. Overall progress is
/// `Σ(weight × child%) / Σ(weight)`: finished children count fully, the
/// running one contributes its live percentage, the rest nothing. A child
/// with weight 0 still runs but never moves the percentage. When every
/// weight is 0 the percentage is indeterminate until the composite finishes.
pub struct CompositeTask {
    name: String,
    children: Vec<WeightedTask>,
    total_weight: u64,
    cursor: AtomicUsize,
    started: AtomicBool,
    finished: AtomicBool,
    cancel: CancelFlag,
}

pub struct CompositeTaskBuilder {
    name: String,
    children: Vec<WeightedTask>,
}

impl CompositeTaskBuilder {
    /// Appends a child. Order of calls is execution order.
    pub fn step(mut self, task: impl Task + 'static, weight: u32) -> Self {
        self.children.push(WeightedTask {
            task: Arc::new(task),
            weight,
        });
        self
    }

    pub fn step_arc(mut self, task: Arc<dyn Task>, weight: u32) -> Self {
        self.children.push(WeightedTask { task, weight });
        self
    }

    pub fn build(self) -> CompositeTask {
        let total_weight = self.children.iter().map(|c| u64::from(c.weight)).sum();
        CompositeTask {
            name: self.name,
            children: self.children,
            total_weight,
            cursor: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cancel: CancelFlag::new(),
        }
    }

    pub fn build_phase(self) -> Phase {
        Phase {
            inner: self.build(),
        }
    }
}

impl CompositeTask {
    pub fn builder(name: impl Into<String>) -> CompositeTaskBuilder {
        CompositeTaskBuilder {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn current_label(&self, cursor: usize) -> String {
        match self.children.get(cursor.min(self.children.len().saturating_sub(1))) {
            Some(child) => child.task.progress().label,
            None => self.name.clone(),
        }
    }
}

#[async_trait]
impl Task for CompositeTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::TaskAlreadyRun(self.name.clone()));
        }

        for (index, child) in self.children.iter().enumerate() {
            self.cursor.store(index, Ordering::Release);
            self.cancel.check()?;
            child.task.run().await?;
        }

        self.cursor.store(self.children.len(), Ordering::Release);
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
        let cursor = self.cursor.load(Ordering::Acquire);
        for child in self.children.iter().skip(cursor) {
            child.task.cancel();
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn progress(&self) -> TaskProgress {
        if self.children.is_empty() {
            return TaskProgress::new(100.0, self.name.clone());
        }

        let cursor = self.cursor.load(Ordering::Acquire);
        let label = self.current_label(cursor);

        if self.total_weight == 0 {
            return if self.is_finished() {
                TaskProgress::new(100.0, label)
            } else {
                TaskProgress::indeterminate(label)
            };
        }

        let mut weighted = 0.0;
        for (index, child) in self.children.iter().enumerate() {
            let weight = f64::from(child.weight);
            if index < cursor {
                weighted += weight * 100.0;
            } else if index == cursor && child.weight > 0 {
                weighted += weight * child.task.progress().percent.unwrap_or(0.0);
            }
        }

        TaskProgress::new(weighted / self.total_weight as f64, label)
    }
}

/// Named composite; child labels are reported as `"<phase>: <child>"`.
pub struct Phase {
    inner: CompositeTask,
}

impl Phase {
    pub fn builder(name: impl Into<String>) -> CompositeTaskBuilder {
        CompositeTask::builder(name)
    }
}

#[async_trait]
impl Task for Phase {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self) -> Result<()> {
        self.inner.run().await
    }

    fn cancel(&self) {
        self.inner.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    fn progress(&self) -> TaskProgress {
        let mut progress = self.inner.progress();
        if progress.label != self.inner.name {
            progress.label = format!("{}: {}", self.inner.name, progress.label);
        }
        progress
    }
}
