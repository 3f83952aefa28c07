// ============================================================================
// livemigrate Library
// ============================================================================

//! Live database migration for clustered services.
//!
//! A [`MigrationService`] swaps the database a running system uses without
//! taking it down: traffic is latched and drained, the data is backed up and
//! restored into the new target, and the current handle is switched over in
//! one step. Any failure or cancellation reverts to the source database.
//!
//! The [`cluster`] module holds the join checks two nodes run before they
//! merge, so that a node in the middle of a migration, or one pointing at a
//! different database, does not rejoin a cluster it no longer belongs to.

pub mod cluster;
pub mod config;
pub mod core;
pub mod database;
pub mod events;
pub mod maintenance;
pub mod migration;
pub mod prelude;
pub mod task;

// Re-export main types for convenience
pub use config::{DataSourceConfig, DatabaseIdentity, MigrationSettings};
pub use core::{MigrationError, Result};
pub use database::{DatabaseHandle, DatabaseLatch, DatabaseManager, LatchMode};
pub use events::{BroadcastEventPublisher, EventPublisher, MigrationEvent};
pub use maintenance::{MaintenanceService, TaskCallback, TaskMonitor};
pub use migration::{MigrationContext, MigrationService, MigrationTask, WorkflowPolicy};

// Re-export join-check API
pub use cluster::{
    ClusterJoinCheck, JoinCheckRegistry, JoinCheckResult, JoinRequest, PassivationTarget,
    checks::{MaintenanceStateCheck, RequirementsCheck, SharedIdentityCheck},
};
