use crate::core::MigrationError;
use crate::task::{Task, TaskProgress};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTaskState {
    Created,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl MaintenanceTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// What a node tells its peers about the maintenance task it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTaskInfo {
    pub id: String,
    pub state: MaintenanceTaskState,
}

impl MaintenanceTaskInfo {
    pub fn is_running(&self) -> bool {
        self.state == MaintenanceTaskState::Running
    }
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded,
    Failed(Arc<MigrationError>),
    Canceled,
}

impl TaskOutcome {
    pub fn state(&self) -> MaintenanceTaskState {
        match self {
            Self::Succeeded => MaintenanceTaskState::Succeeded,
            Self::Failed(_) => MaintenanceTaskState::Failed,
            Self::Canceled => MaintenanceTaskState::Canceled,
        }
    }
}

/// Completion hooks for a maintenance task.
///
/// Exactly one of `on_success`, `on_failure` or `on_cancellation` fires,
/// once, followed by `on_completion`.
pub trait TaskCallback: Send + Sync {
    fn on_success(&self) {}

    fn on_failure(&self, _cause: &MigrationError) {}

    fn on_cancellation(&self) {}

    fn on_completion(&self) {}
}

struct MonitorState {
    status: MaintenanceTaskState,
    outcome: Option<TaskOutcome>,
    callbacks: Vec<Arc<dyn TaskCallback>>,
}

struct MonitorInner {
    id: String,
    task: Arc<dyn Task>,
    state: Mutex<MonitorState>,
    done: watch::Sender<Option<TaskOutcome>>,
}

/// Handle on a started maintenance task.
#[derive(Clone)]
pub struct TaskMonitor {
    inner: Arc<MonitorInner>,
}

impl TaskMonitor {
    pub(crate) fn new(id: String, task: Arc<dyn Task>) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            inner: Arc::new(MonitorInner {
                id,
                task,
                state: Mutex::new(MonitorState {
                    status: MaintenanceTaskState::Created,
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                done,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> MaintenanceTaskState {
        self.lock_state().status
    }

    pub fn info(&self) -> MaintenanceTaskInfo {
        MaintenanceTaskInfo {
            id: self.inner.id.clone(),
            state: self.state(),
        }
    }

    pub fn progress(&self) -> TaskProgress {
        self.inner.task.progress()
    }

    /// Requests cooperative cancellation; the outcome arrives through callbacks.
    pub fn cancel(&self) {
        self.inner.task.cancel();
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.lock_state().outcome.clone()
    }

    /// Registers a callback. If the task already finished, it fires right away.
    pub fn register_callback(&self, callback: Arc<dyn TaskCallback>) {
        let outcome = {
            let mut state = self.lock_state();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(callback);
                    return;
                }
            }
        };
        fire(callback.as_ref(), &outcome);
    }

    /// Waits for the task to finish.
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx = self.inner.done.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // The sender lives in `inner`, which we hold.
                continue;
            }
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.lock_state();
        if state.status == MaintenanceTaskState::Created {
            state.status = MaintenanceTaskState::Running;
        }
    }

    pub(crate) fn complete(&self, outcome: TaskOutcome) {
        let callbacks = {
            let mut state = self.lock_state();
            if state.outcome.is_some() {
                return;
            }
            state.status = outcome.state();
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.callbacks)
        };

        self.inner.done.send_replace(Some(outcome.clone()));
        for callback in callbacks {
            fire(callback.as_ref(), &outcome);
        }
    }
}

fn fire(callback: &dyn TaskCallback, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Succeeded => callback.on_success(),
        TaskOutcome::Failed(cause) => callback.on_failure(cause),
        TaskOutcome::Canceled => callback.on_cancellation(),
    }
    callback.on_completion();
}

impl std::fmt::Debug for TaskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMonitor")
            .field("id", &self.inner.id)
            .field("task", &self.inner.task.name())
            .field("state", &self.state())
            .finish()
    }
}
