use super::MigrationContext;
use super::task::MigrationTask;
use crate::config::DataSourceConfig;
use crate::core::{MigrationError, Result};
use crate::events::MigrationKind;
use crate::maintenance::{MaintenanceService, TaskMonitor};
use log::warn;
use std::sync::Arc;

/// Entry point used by the outer layers to start migrations.
pub struct MigrationService {
    context: MigrationContext,
    maintenance: Arc<MaintenanceService>,
}

impl MigrationService {
    pub fn new(context: MigrationContext, maintenance: Arc<MaintenanceService>) -> Self {
        Self {
            context,
            maintenance,
        }
    }

    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    pub fn maintenance(&self) -> &Arc<MaintenanceService> {
        &self.maintenance
    }

    /// Rejects configurations that are malformed, unreachable, or that point
    /// at the database already in use.
    pub async fn validate_configuration(&self, config: &DataSourceConfig) -> Result<()> {
        self.context.database.validate_configuration(config).await?;
        if config.identity() == self.context.database.handle().config().identity() {
            return Err(MigrationError::Validation(format!(
                "{} is already the current database",
                config.to_redacted_url()
            )));
        }
        Ok(())
    }

    /// Moves a configured system onto `config`.
    pub async fn migrate(&self, config: DataSourceConfig) -> Result<TaskMonitor> {
        self.start(config, MigrationKind::Migrate).await
    }

    /// Bootstraps a fresh system onto `config`.
    pub async fn setup(&self, config: DataSourceConfig) -> Result<TaskMonitor> {
        self.start(config, MigrationKind::Setup).await
    }

    async fn start(&self, config: DataSourceConfig, kind: MigrationKind) -> Result<TaskMonitor> {
        self.maintenance.ensure_idle()?;
        self.validate_configuration(&config).await?;

        let target = self.context.database.open_handle(config).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let built = match kind {
            MigrationKind::Migrate => {
                MigrationTask::migrate(id.clone(), self.context.clone(), Arc::clone(&target))
            }
            MigrationKind::Setup => {
                MigrationTask::setup(id.clone(), self.context.clone(), Arc::clone(&target))
            }
        };

        let started = built.and_then(|task| self.maintenance.start_with_id(id, Arc::new(task)));
        if started.is_err() {
            if let Err(err) = self.context.database.close_handle(&target).await {
                warn!("Could not close unused target database {}: {}", target, err);
            }
        }
        started
    }
}
