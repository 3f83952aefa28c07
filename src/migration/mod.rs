//! Database migration and first-time setup.

pub mod backup;
pub mod config_store;
pub mod ports;
pub mod service;
pub mod state;
mod steps;
pub mod task;

pub use backup::DirectoryBackupEngine;
pub use config_store::{FileConfigurationStore, StoredDataSource};
pub use ports::{BackupEngine, ConfigurationStore, DatabaseAffixed};
pub use service::MigrationService;
pub use state::MigrationState;
pub use task::{MigrationTask, WorkflowPolicy};

use crate::config::MigrationSettings;
use crate::database::DatabaseManager;
use crate::events::{BroadcastEventPublisher, EventPublisher};
use crate::maintenance::MaintenanceMode;
use std::sync::Arc;

/// Collaborators shared by every migration step.
#[derive(Clone)]
pub struct MigrationContext {
    pub database: Arc<DatabaseManager>,
    pub backup: Arc<dyn BackupEngine>,
    pub config_store: Arc<dyn ConfigurationStore>,
    pub events: Arc<dyn EventPublisher>,
    pub maintenance_mode: Arc<MaintenanceMode>,
    pub affixed: Vec<Arc<dyn DatabaseAffixed>>,
    pub settings: MigrationSettings,
}

impl MigrationContext {
    /// Context with default settings, a broadcast publisher nobody listens
    /// to yet, and no affixed components.
    pub fn new(
        database: Arc<DatabaseManager>,
        backup: Arc<dyn BackupEngine>,
        config_store: Arc<dyn ConfigurationStore>,
    ) -> Self {
        let events: Arc<dyn EventPublisher> = Arc::new(BroadcastEventPublisher::default());
        Self {
            database,
            backup,
            config_store,
            maintenance_mode: Arc::new(MaintenanceMode::new(Some(Arc::clone(&events)))),
            events,
            affixed: Vec::new(),
            settings: MigrationSettings::default(),
        }
    }

    /// Replaces the publisher; maintenance mode reports through it as well.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.maintenance_mode = Arc::new(MaintenanceMode::new(Some(Arc::clone(&events))));
        self.events = events;
        self
    }

    pub fn with_settings(mut self, settings: MigrationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_affixed(mut self, component: Arc<dyn DatabaseAffixed>) -> Self {
        self.affixed.push(component);
        self
    }
}
