use super::handle::{DatabaseHandle, OperationGuard};
use super::latch::{DatabaseGate, DatabaseLatch, LatchMode};
use crate::config::DataSourceConfig;
use crate::core::{MigrationError, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

/// Driver-side hooks for opening and closing connection targets.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Checks that `config` points at a reachable database.
    async fn probe(&self, _config: &DataSourceConfig) -> Result<()> {
        Ok(())
    }

    /// Releases the resources behind a handle that was just closed.
    async fn disconnect(&self, _handle: &DatabaseHandle) -> Result<()> {
        Ok(())
    }
}

/// Connector for embedders whose pools need no driver-level work.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConnector;

impl DatabaseConnector for NoopConnector {}

/// Owns the current database and the latch guarding it.
pub struct DatabaseManager {
    gate: Arc<DatabaseGate>,
    connector: Arc<dyn DatabaseConnector>,
}

impl DatabaseManager {
    /// Opens `config` and makes it the current database.
    pub async fn open(config: DataSourceConfig, connector: Arc<dyn DatabaseConnector>) -> Result<Self> {
        config.validate().map_err(MigrationError::Validation)?;
        connector.probe(&config).await?;
        let handle = DatabaseHandle::new(config);
        info!("Current database is {}", handle);
        Ok(Self {
            gate: DatabaseGate::new(handle),
            connector,
        })
    }

    /// Opens an additional handle without routing any traffic to it.
    pub async fn open_handle(&self, config: DataSourceConfig) -> Result<Arc<DatabaseHandle>> {
        self.validate_configuration(&config).await?;
        Ok(DatabaseHandle::new(config))
    }

    /// Handle new operations are currently routed to
    pub fn handle(&self) -> Arc<DatabaseHandle> {
        self.gate.current.load()
    }

    /// Starts an operation on the current database, parking while a latch is held.
    pub async fn acquire(&self) -> Result<OperationGuard> {
        loop {
            self.gate.wait_open().await;
            let handle = self.gate.current.load();
            match handle.begin_operation() {
                Ok(guard) => {
                    // A latch taken between the wait and the registration must
                    // not see this operation slip past it.
                    if !self.gate.is_latched() && Arc::ptr_eq(&handle, &self.gate.current.load()) {
                        return Ok(guard);
                    }
                }
                Err(err) => {
                    if Arc::ptr_eq(&handle, &self.gate.current.load()) {
                        return Err(err);
                    }
                }
            }
        }
    }

    pub fn acquire_latch(&self, mode: LatchMode) -> Result<Arc<DatabaseLatch>> {
        self.gate.try_latch(mode)
    }

    pub fn current_latch(&self) -> Option<Arc<DatabaseLatch>> {
        self.gate.current_latch()
    }

    pub fn is_latched(&self) -> bool {
        self.gate.is_latched()
    }

    pub async fn validate_configuration(&self, config: &DataSourceConfig) -> Result<()> {
        config.validate().map_err(MigrationError::Validation)?;
        self.connector.probe(config).await.map_err(|err| match err {
            MigrationError::Validation(_) => err,
            other => MigrationError::Validation(format!(
                "cannot reach {}: {}",
                config.to_redacted_url(),
                other
            )),
        })
    }

    /// Closes a handle. Closing the current database is refused; closing an
    /// already closed handle does nothing.
    pub async fn close_handle(&self, handle: &Arc<DatabaseHandle>) -> Result<()> {
        if Arc::ptr_eq(handle, &self.gate.current.load()) {
            return Err(MigrationError::failed(format!(
                "refusing to close current database {}",
                handle
            )));
        }
        if !handle.mark_closed() {
            return Ok(());
        }
        if handle.in_flight() > 0 {
            warn!(
                "Closing {} with {} operation(s) still running",
                handle,
                handle.in_flight()
            );
        }
        self.connector.disconnect(handle).await?;
        info!("Closed database {}", handle);
        Ok(())
    }
}
