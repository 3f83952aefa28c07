use super::{CancelFlag, ProgressCell, Task, TaskProgress};
use crate::core::{MigrationError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type StepFn = Box<dyn FnOnce(StepContext) -> BoxFuture<'static, Result<()>> + Send>;

/// What a running step can see of its own task.
#[derive(Clone)]
pub struct StepContext {
    progress: Arc<ProgressCell>,
    cancel: CancelFlag,
}

impl StepContext {
    pub fn report(&self, percent: f64) {
        self.progress.set_percent(percent);
    }

    pub fn report_fraction(&self, done: usize, total: usize) {
        if total == 0 {
            self.progress.set_percent(100.0);
        } else {
            self.progress.set_percent(done as f64 * 100.0 / total as f64);
        }
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.progress.set_label(label);
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.cancel.check()
    }
}

/// Leaf task running an async closure once.
pub struct FnTask {
    name: String,
    step: Mutex<Option<StepFn>>,
    progress: Arc<ProgressCell>,
    cancel: CancelFlag,
    started: AtomicBool,
}

impl FnTask {
    pub fn new<F, Fut>(name: impl Into<String>, step: F) -> Self
    where
        F: FnOnce(StepContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let step: StepFn = Box::new(move |ctx| step(ctx).boxed());
        Self {
            progress: Arc::new(ProgressCell::new(name.clone())),
            name,
            step: Mutex::new(Some(step)),
            cancel: CancelFlag::new(),
            started: AtomicBool::new(false),
        }
    }

    fn take_step(&self) -> Option<StepFn> {
        match self.step.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::TaskAlreadyRun(self.name.clone()));
        }
        self.cancel.check()?;

        let step = self
            .take_step()
            .ok_or_else(|| MigrationError::TaskAlreadyRun(self.name.clone()))?;
        let ctx = StepContext {
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        };

        step(ctx).await?;
        self.progress.set_percent(100.0);
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn progress(&self) -> TaskProgress {
        self.progress.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_once_and_completes() {
        let task = FnTask::new("copy", |ctx| async move {
            ctx.report(40.0);
            Ok(())
        });

        task.run().await.unwrap();
        assert!(task.progress().is_complete());
        assert!(matches!(
            task.run().await,
            Err(MigrationError::TaskAlreadyRun(name)) if name == "copy"
        ));
    }

    #[tokio::test]
    async fn canceled_before_run_does_nothing() {
        let touched = Arc::new(AtomicBool::new(false));
        let task = {
            let touched = Arc::clone(&touched);
            FnTask::new("noop", move |_| async move {
                touched.store(true, Ordering::SeqCst);
                Ok(())
            })
        };

        task.cancel();
        assert!(matches!(task.run().await, Err(MigrationError::Canceled)));
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failure_keeps_partial_progress() {
        let task = FnTask::new("restore", |ctx| async move {
            ctx.report_fraction(1, 4);
            Err(MigrationError::failed("disk full"))
        });

        assert!(task.run().await.is_err());
        assert_eq!(task.progress().percent, Some(25.0));
    }
}
