use super::MigrationContext;
use super::state::MigrationState;
use super::steps;
use crate::core::{MigrationError, Result};
use crate::database::{DatabaseHandle, DrainHelper, LatchMode};
use crate::events::{MigrationEvent, MigrationKind};
use crate::task::{CancelFlag, CompositeTask, Phase, Task, TaskProgress};
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Instrument, Level, event, info_span};

/// How much of the running system a migration takes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPolicy {
    /// Configured system: the service goes into maintenance mode and the
    /// latch is taken cluster-wide.
    WithMaintenanceMode,
    /// First-time bootstrap: no maintenance mode, local latch.
    Bare,
}

impl WorkflowPolicy {
    pub fn latch_mode(&self) -> LatchMode {
        match self {
            Self::WithMaintenanceMode => LatchMode::Cluster,
            Self::Bare => LatchMode::Local,
        }
    }
}

/// Moves the service from its current database to a target database.
///
/// Runs backup (latch and drain, release components, database backup,
/// configuration backup), then restore (unpack, restore, switch), then
/// finalize. Any failure or cancellation reverts traffic to the source
/// database and closes the target.
pub struct MigrationTask {
    id: String,
    kind: MigrationKind,
    policy: WorkflowPolicy,
    context: MigrationContext,
    state: Arc<MigrationState>,
    workflow: CompositeTask,
    cancel: CancelFlag,
    started: AtomicBool,
}

impl MigrationTask {
    /// Migration of a configured system.
    pub fn migrate(
        id: impl Into<String>,
        context: MigrationContext,
        target: Arc<DatabaseHandle>,
    ) -> Result<Self> {
        Self::new(
            id,
            MigrationKind::Migrate,
            WorkflowPolicy::WithMaintenanceMode,
            context,
            target,
        )
    }

    /// Bootstrap of a system that has no real database yet.
    pub fn setup(
        id: impl Into<String>,
        context: MigrationContext,
        target: Arc<DatabaseHandle>,
    ) -> Result<Self> {
        Self::new(id, MigrationKind::Setup, WorkflowPolicy::Bare, context, target)
    }

    pub fn new(
        id: impl Into<String>,
        kind: MigrationKind,
        policy: WorkflowPolicy,
        context: MigrationContext,
        target: Arc<DatabaseHandle>,
    ) -> Result<Self> {
        let source = context.database.handle();
        if Arc::ptr_eq(&source, &target) {
            return Err(MigrationError::Validation(
                "target database is already the current database".to_string(),
            ));
        }
        if target.is_closed() {
            return Err(MigrationError::HandleClosed(target.id()));
        }

        let state = Arc::new(MigrationState::new(
            source,
            target,
            context.settings.scratch_root.as_deref(),
        )?);
        let workflow = build_workflow(kind, policy, &context, &state);

        Ok(Self {
            id: id.into(),
            kind,
            policy,
            context,
            state,
            workflow,
            cancel: CancelFlag::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MigrationKind {
        self.kind
    }

    pub fn policy(&self) -> WorkflowPolicy {
        self.policy
    }

    pub fn state(&self) -> &Arc<MigrationState> {
        &self.state
    }

    /// Points traffic back at the source database and discards the target.
    ///
    /// Works whether or not a latch is currently held, and may be called
    /// repeatedly. Every step is attempted; the first error is returned.
    pub async fn revert(&self) -> Result<()> {
        let database = &self.context.database;
        let source = self.state.source_database();
        let target = self.state.target_database();
        let mut first_error: Option<MigrationError> = None;

        let held = self.state.take_latch().filter(|latch| !latch.is_released());
        let latch = match held {
            Some(latch) => Some(latch),
            None => match database.acquire_latch(self.policy.latch_mode()) {
                Ok(latch) => {
                    let drained = DrainHelper::drain(
                        &latch,
                        self.context.settings.drain_soft_timeout(),
                        self.context.settings.drain_force_timeout(),
                    )
                    .await;
                    if !drained {
                        warn!("Reverting without a complete drain of {}", latch.latched_handle());
                    }
                    Some(latch)
                }
                Err(MigrationError::AlreadyLatched(owner)) => {
                    warn!("Not reverting through database latch {}: held elsewhere", owner);
                    None
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                    None
                }
            },
        };

        if let Some(latch) = latch {
            if let Err(err) = latch.unlatch_to(Arc::clone(source)) {
                first_error.get_or_insert(err);
            }
        }

        if Arc::ptr_eq(&database.handle(), target) {
            first_error.get_or_insert(MigrationError::failed(format!(
                "traffic still routed to target database {}",
                target
            )));
        } else if let Err(err) = database.close_handle(target).await {
            first_error.get_or_insert(err);
        }

        if let Err(err) = self.state.cleanup() {
            warn!("Could not remove migration scratch directory: {}", err);
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Reverted to database {}", source);
                Ok(())
            }
        }
    }

    async fn execute(&self) -> Result<()> {
        let _maintenance = match self.policy {
            WorkflowPolicy::WithMaintenanceMode => Some(self.context.maintenance_mode.enter()),
            WorkflowPolicy::Bare => None,
        };

        self.context.events.publish(MigrationEvent::MigrationStarted {
            task_id: self.id.clone(),
            kind: self.kind,
            target_url: self.state.target_database().config().url(),
        });
        info!(
            "Migrating from {} to {}",
            self.state.source_database(),
            self.state.target_database()
        );

        let result = match self.cancel.check() {
            Ok(()) => self.workflow.run().await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                if let Err(err) = self.state.cleanup() {
                    warn!("Could not remove migration scratch directory: {}", err);
                }
                info!("Migration '{}' completed", self.id);
                self.context.events.publish(MigrationEvent::MigrationSucceeded {
                    task_id: self.id.clone(),
                    kind: self.kind,
                });
                Ok(())
            }
            Err(cause) => {
                let err = self.fail(cause).await;
                if err.is_canceled() {
                    self.context.events.publish(MigrationEvent::MigrationCanceled {
                        task_id: self.id.clone(),
                        kind: self.kind,
                    });
                } else {
                    self.context.events.publish(MigrationEvent::MigrationFailed {
                        task_id: self.id.clone(),
                        kind: self.kind,
                        reason: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    async fn fail(&self, cause: MigrationError) -> MigrationError {
        let cause = if cause.is_canceled() {
            info!("Migration '{}' canceled; reverting", self.id);
            MigrationError::Canceled
        } else {
            event!(Level::ERROR, error = %cause, "migration step failed; reverting");
            cause.into_domain()
        };

        match self.revert().await {
            Ok(()) => cause,
            Err(revert_error) => {
                error!(
                    "Revert of migration '{}' failed: {} (original cause: {})",
                    self.id, revert_error, cause
                );
                MigrationError::RevertFailed {
                    cause: Box::new(cause),
                    revert_error: revert_error.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl Task for MigrationTask {
    fn name(&self) -> &str {
        self.workflow.name()
    }

    async fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::TaskAlreadyRun(self.id.clone()));
        }
        let span = info_span!(
            "migration.run",
            task_id = %self.id,
            kind = ?self.kind,
            policy = ?self.policy
        );
        self.execute().instrument(span).await
    }

    fn cancel(&self) {
        self.cancel.cancel();
        self.workflow.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn progress(&self) -> TaskProgress {
        self.workflow.progress()
    }
}

fn build_workflow(
    kind: MigrationKind,
    policy: WorkflowPolicy,
    ctx: &MigrationContext,
    state: &Arc<MigrationState>,
) -> CompositeTask {
    let backup = Phase::builder("backup")
        .step(
            steps::latch_and_drain(ctx.clone(), Arc::clone(state), policy.latch_mode()),
            5,
        )
        .step(steps::release_affixed(ctx.clone()), 2)
        .step(steps::backup_database(ctx.clone(), Arc::clone(state)), 90)
        .step(steps::backup_configuration(ctx.clone(), Arc::clone(state)), 3)
        .build_phase();

    let restore = Phase::builder("restore")
        .step(steps::unpack_backup(ctx.clone(), Arc::clone(state)), 0)
        .step(steps::restore_database(ctx.clone(), Arc::clone(state)), 100)
        .step(steps::unlatch_to_target(Arc::clone(state)), 0)
        .build_phase();

    let (name, note) = match kind {
        MigrationKind::Migrate => (
            "database migration",
            format!(
                "Migrated data source from {} to {}",
                state.source_database().config().to_redacted_url(),
                state.target_database().config().to_redacted_url()
            ),
        ),
        MigrationKind::Setup => (
            "database setup",
            format!(
                "Initial data source {}",
                state.target_database().config().to_redacted_url()
            ),
        ),
    };

    CompositeTask::builder(name)
        .step(backup, 82)
        .step(restore, 18)
        .step(steps::finalize(ctx.clone(), Arc::clone(state), note), 0)
        .build()
}
