use super::monitor::{MaintenanceTaskInfo, TaskMonitor, TaskOutcome};
use crate::core::{MigrationError, Result};
use crate::task::Task;
use futures::FutureExt;
use log::{error, info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

/// Admission control for maintenance work: at most one task at a time.
///
/// The slot keeps the last monitor after it finishes; a terminal monitor
/// does not block the next start.
#[derive(Default)]
pub struct MaintenanceService {
    active: Arc<Mutex<Option<TaskMonitor>>>,
}

fn lock_active(active: &Mutex<Option<TaskMonitor>>) -> MutexGuard<'_, Option<TaskMonitor>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MaintenanceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task currently tracked by this service, if it has not finished yet.
    pub fn active_monitor(&self) -> Option<TaskMonitor> {
        lock_active(&self.active)
            .as_ref()
            .filter(|monitor| !monitor.state().is_terminal())
            .cloned()
    }

    pub fn active_task(&self) -> Option<MaintenanceTaskInfo> {
        self.active_monitor().map(|monitor| monitor.info())
    }

    /// Most recently started task, running or finished.
    pub fn latest_task(&self) -> Option<MaintenanceTaskInfo> {
        lock_active(&self.active).as_ref().map(TaskMonitor::info)
    }

    /// Fails with [`MigrationError::AlreadyRunning`] while a task is active.
    pub fn ensure_idle(&self) -> Result<()> {
        match self.active_monitor() {
            Some(monitor) => Err(MigrationError::AlreadyRunning(monitor.id().to_string())),
            None => Ok(()),
        }
    }

    /// Starts `task` on a background tokio task under a fresh id.
    pub fn start(&self, task: Arc<dyn Task>) -> Result<TaskMonitor> {
        self.start_with_id(uuid::Uuid::new_v4().to_string(), task)
    }

    /// Starts `task` under a caller-chosen id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with_id(&self, id: String, task: Arc<dyn Task>) -> Result<TaskMonitor> {
        let monitor = {
            let mut active = lock_active(&self.active);
            if let Some(running) = active.as_ref() {
                if !running.state().is_terminal() {
                    warn!(
                        "Refusing maintenance task '{}': '{}' is still running",
                        id,
                        running.id()
                    );
                    return Err(MigrationError::AlreadyRunning(running.id().to_string()));
                }
            }
            let monitor = TaskMonitor::new(id, Arc::clone(&task));
            monitor.mark_running();
            *active = Some(monitor.clone());
            monitor
        };

        info!("Starting maintenance task '{}' ({})", monitor.id(), task.name());
        let completion = monitor.clone();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(task.run()).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Succeeded,
                Ok(Err(err)) if err.is_canceled() => TaskOutcome::Canceled,
                Ok(Err(err)) => TaskOutcome::Failed(Arc::new(err)),
                Err(_) => {
                    error!("Maintenance task '{}' panicked", completion.id());
                    TaskOutcome::Failed(Arc::new(MigrationError::failed("maintenance task panicked")))
                }
            };
            info!(
                "Maintenance task '{}' finished: {:?}",
                completion.id(),
                outcome.state()
            );
            completion.complete(outcome);
        });

        Ok(monitor)
    }
}
