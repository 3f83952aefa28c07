//! Collaborators a migration drives but does not implement.

use crate::config::DataSourceConfig;
use crate::core::Result;
use crate::database::DatabaseHandle;
use crate::task::StepContext;
use async_trait::async_trait;
use std::path::Path;

/// Produces and consumes the backup payload moved between databases.
#[async_trait]
pub trait BackupEngine: Send + Sync {
    /// Writes a backup of `source` to the `archive` file.
    async fn backup_database(
        &self,
        source: &DatabaseHandle,
        archive: &Path,
        step: &StepContext,
    ) -> Result<()>;

    /// Expands `archive` into the directory `dest`.
    async fn unpack(&self, archive: &Path, dest: &Path, step: &StepContext) -> Result<()>;

    /// Loads the unpacked payload in `payload` into `target`.
    async fn restore_database(
        &self,
        target: &DatabaseHandle,
        payload: &Path,
        step: &StepContext,
    ) -> Result<()>;
}

/// Persistence of the active data source configuration.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn save_data_source_configuration(
        &self,
        config: &DataSourceConfig,
        note: &str,
    ) -> Result<()>;

    /// `None` when nothing was saved yet.
    async fn load_data_source_configuration(&self) -> Result<Option<DataSourceConfig>>;
}

/// Component holding on to the current database handle.
///
/// Released before the backup so nothing keeps using a handle that is about
/// to be replaced; such components reacquire through the manager afterwards.
pub trait DatabaseAffixed: Send + Sync {
    fn name(&self) -> &str;

    fn release(&self) -> Result<()>;
}
