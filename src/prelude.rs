//! Entry points grouped by who uses them.
//!
//! `host` is what an embedding service needs to trigger and observe
//! migrations. `cluster` is for the node membership layer.

pub mod host {
    //! Triggering, observing and reverting migrations.
    pub use crate::{
        DataSourceConfig, DatabaseManager, MigrationContext, MigrationError, MigrationService,
        MigrationSettings, TaskCallback, TaskMonitor,
    };
    pub use crate::database::{DatabaseConnector, NoopConnector};
    pub use crate::maintenance::{MaintenanceTaskState, TaskOutcome};
    pub use crate::migration::{
        BackupEngine, ConfigurationStore, DatabaseAffixed, DirectoryBackupEngine,
        FileConfigurationStore,
    };
}

pub mod cluster {
    //! Join-check handshake between nodes.
    pub use crate::cluster::checks::{
        MaintenanceStateCheck, RequirementValue, RequirementsCheck, SharedIdentityCheck,
    };
    pub use crate::cluster::{
        ClusterJoinCheck, JoinCheckRegistry, JoinCheckResult, JoinDecision, JoinRequest,
        JoinRole, PassivationTarget,
    };
}
