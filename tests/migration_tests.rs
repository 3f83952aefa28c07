//! End-to-end migration tests
//!
//! Drive MigrationService against a directory-backed engine and a JSON
//! configuration store in temporary directories.
//! Run with: cargo test --test migration_tests

use async_trait::async_trait;
use livemigrate::database::NoopConnector;
use livemigrate::events::MigrationEvent;
use livemigrate::maintenance::{MaintenanceTaskState, TaskOutcome};
use livemigrate::migration::{
    BackupEngine, ConfigurationStore, DirectoryBackupEngine, FileConfigurationStore,
};
use livemigrate::task::StepContext;
use livemigrate::{
    BroadcastEventPublisher, DataSourceConfig, DatabaseHandle, DatabaseManager, EventPublisher,
    MaintenanceService, MigrationContext, MigrationError, MigrationService, MigrationSettings,
    Result,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast};

fn source_config() -> DataSourceConfig {
    DataSourceConfig::new("db-a", "app", "secret").database("main")
}

fn target_config() -> DataSourceConfig {
    DataSourceConfig::new("db-b", "app", "secret").database("main")
}

fn quick_settings() -> MigrationSettings {
    MigrationSettings::default().drain_timeouts(Duration::ZERO, Duration::ZERO)
}

struct Fixture {
    dir: TempDir,
    manager: Arc<DatabaseManager>,
    store: Arc<FileConfigurationStore>,
    events: broadcast::Receiver<MigrationEvent>,
    service: MigrationService,
}

async fn fixture(backup: Arc<dyn BackupEngine>, settings: MigrationSettings) -> Fixture {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(
        DatabaseManager::open(source_config(), Arc::new(NoopConnector))
            .await
            .unwrap(),
    );
    let store = Arc::new(FileConfigurationStore::new(dir.path().join("datasource.json")));
    let publisher = Arc::new(BroadcastEventPublisher::default());
    let events = publisher.subscribe();
    let publisher: Arc<dyn EventPublisher> = publisher;

    let context = MigrationContext::new(
        Arc::clone(&manager),
        backup,
        Arc::clone(&store) as Arc<dyn ConfigurationStore>,
    )
    .with_events(publisher)
    .with_settings(settings.scratch_root(dir.path().join("scratch")));
    let service = MigrationService::new(context, Arc::new(MaintenanceService::new()));

    Fixture {
        dir,
        manager,
        store,
        events,
        service,
    }
}

fn drain_events(rx: &mut broadcast::Receiver<MigrationEvent>) -> Vec<MigrationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Engine whose backup fails, standing in for a full disk or a lost source.
struct FailingBackup;

#[async_trait]
impl BackupEngine for FailingBackup {
    async fn backup_database(&self, _: &DatabaseHandle, _: &Path, _: &StepContext) -> Result<()> {
        Err(MigrationError::failed("disk full"))
    }

    async fn unpack(&self, _: &Path, _: &Path, _: &StepContext) -> Result<()> {
        Ok(())
    }

    async fn restore_database(&self, _: &DatabaseHandle, _: &Path, _: &StepContext) -> Result<()> {
        Ok(())
    }
}

/// Engine whose backup waits until the test lets it go.
struct GatedBackup {
    release: Arc<Notify>,
}

#[async_trait]
impl BackupEngine for GatedBackup {
    async fn backup_database(&self, _: &DatabaseHandle, archive: &Path, _: &StepContext) -> Result<()> {
        self.release.notified().await;
        tokio::fs::write(archive, b"gated").await?;
        Ok(())
    }

    async fn unpack(&self, _: &Path, dest: &Path, _: &StepContext) -> Result<()> {
        tokio::fs::create_dir_all(dest).await?;
        Ok(())
    }

    async fn restore_database(&self, _: &DatabaseHandle, _: &Path, _: &StepContext) -> Result<()> {
        Ok(())
    }
}

/// Store that cannot persist, standing in for a read-only configuration
/// volume. Remembers the database serving traffic when the save came in.
struct ReadOnlyStore {
    manager: Arc<DatabaseManager>,
    current_at_save: Mutex<Option<Arc<DatabaseHandle>>>,
}

#[async_trait]
impl ConfigurationStore for ReadOnlyStore {
    async fn save_data_source_configuration(&self, _: &DataSourceConfig, _: &str) -> Result<()> {
        *self.current_at_save.lock().unwrap() = Some(self.manager.handle());
        Err(MigrationError::failed("configuration volume is read-only"))
    }

    async fn load_data_source_configuration(&self) -> Result<Option<DataSourceConfig>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_migration_cuts_over_to_target() {
    let root = TempDir::new().unwrap();
    let engine = Arc::new(DirectoryBackupEngine::new(root.path()));
    let source_dir = engine.data_dir(&source_config());
    std::fs::create_dir_all(source_dir.join("tables")).unwrap();
    std::fs::write(source_dir.join("tables/users.dat"), b"alice,bob").unwrap();
    std::fs::write(source_dir.join("catalog"), b"users").unwrap();

    let mut fx = fixture(engine.clone(), quick_settings()).await;
    let source = fx.manager.handle();

    let monitor = fx.service.migrate(target_config()).await.unwrap();
    assert!(matches!(monitor.wait().await, TaskOutcome::Succeeded));
    assert_eq!(monitor.state(), MaintenanceTaskState::Succeeded);
    assert_eq!(monitor.progress().percent, Some(100.0));

    let current = fx.manager.handle();
    assert_eq!(current.config(), &target_config());
    assert!(source.is_closed());
    assert!(!current.is_closed());
    assert!(!fx.manager.is_latched());

    let target_dir = engine.data_dir(&target_config());
    assert_eq!(std::fs::read(target_dir.join("tables/users.dat")).unwrap(), b"alice,bob");
    assert_eq!(std::fs::read(target_dir.join("catalog")).unwrap(), b"users");

    let stored = fx.store.load_data_source_configuration().await.unwrap();
    assert_eq!(stored, Some(target_config()));

    // Scratch directories are gone once the task completes
    let scratch = fx.dir.path().join("scratch");
    let leftovers = std::fs::read_dir(&scratch).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);

    let events = drain_events(&mut fx.events);
    assert_eq!(events.first(), Some(&MigrationEvent::MaintenanceModeEntered));
    assert!(matches!(events[1], MigrationEvent::MigrationStarted { .. }));
    assert!(matches!(events[2], MigrationEvent::MigrationSucceeded { .. }));
    assert_eq!(events.last(), Some(&MigrationEvent::MaintenanceModeExited));
}

#[tokio::test]
async fn test_failed_backup_reverts_to_source() {
    let mut fx = fixture(Arc::new(FailingBackup), quick_settings()).await;
    let source = fx.manager.handle();

    let monitor = fx.service.migrate(target_config()).await.unwrap();
    match monitor.wait().await {
        TaskOutcome::Failed(cause) => assert!(cause.to_string().contains("disk full")),
        other => panic!("expected failure, got {other:?}"),
    }

    let current = fx.manager.handle();
    assert!(Arc::ptr_eq(&current, &source));
    assert!(!source.is_closed());
    assert!(!fx.manager.is_latched());
    assert_eq!(fx.store.load_data_source_configuration().await.unwrap(), None);

    // Operations flow again after the revert
    let guard = fx.manager.acquire().await.unwrap();
    assert!(Arc::ptr_eq(guard.handle(), &source));

    let events = drain_events(&mut fx.events);
    assert!(events.iter().any(|e| matches!(
        e,
        MigrationEvent::MigrationFailed { reason, .. } if reason.contains("disk full")
    )));
}

#[tokio::test]
async fn test_cancel_during_drain_reverts() {
    let settings = MigrationSettings::default().drain_timeouts(Duration::from_secs(30), Duration::from_secs(30));
    let mut fx = fixture(Arc::new(FailingBackup), settings).await;
    let source = fx.manager.handle();
    let busy = fx.manager.acquire().await.unwrap();

    let monitor = fx.service.migrate(target_config()).await.unwrap();
    while !fx.manager.is_latched() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    monitor.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), monitor.wait())
        .await
        .expect("cancellation should interrupt the drain");
    assert!(matches!(outcome, TaskOutcome::Canceled));
    assert!(Arc::ptr_eq(&fx.manager.handle(), &source));
    assert!(!fx.manager.is_latched());
    drop(busy);

    let events = drain_events(&mut fx.events);
    assert!(events.iter().any(|e| matches!(e, MigrationEvent::MigrationCanceled { .. })));
}

#[tokio::test]
async fn test_second_migration_is_refused_while_running() {
    let release = Arc::new(Notify::new());
    let engine = Arc::new(GatedBackup {
        release: Arc::clone(&release),
    });
    let fx = fixture(engine, quick_settings()).await;

    let first = fx.service.migrate(target_config()).await.unwrap();
    let second = fx
        .service
        .migrate(DataSourceConfig::new("db-c", "app", "secret"))
        .await;
    match second {
        Err(MigrationError::AlreadyRunning(id)) => assert_eq!(id, first.id()),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(
        fx.service.maintenance().active_task().map(|t| t.id),
        Some(first.id().to_string())
    );

    release.notify_one();
    assert!(matches!(first.wait().await, TaskOutcome::Succeeded));
    assert!(fx.service.maintenance().active_task().is_none());
}

#[tokio::test]
async fn test_setup_skips_maintenance_mode() {
    let root = TempDir::new().unwrap();
    let mut fx = fixture(Arc::new(DirectoryBackupEngine::new(root.path())), quick_settings()).await;

    let monitor = fx.service.setup(target_config()).await.unwrap();
    assert!(matches!(monitor.wait().await, TaskOutcome::Succeeded));
    assert_eq!(fx.manager.handle().config(), &target_config());

    let events = drain_events(&mut fx.events);
    assert!(!events.contains(&MigrationEvent::MaintenanceModeEntered));
    assert!(matches!(events[0], MigrationEvent::MigrationStarted { .. }));
    assert!(matches!(events[1], MigrationEvent::MigrationSucceeded { .. }));
}

#[tokio::test]
async fn test_undrained_operations_do_not_block_cutover() {
    let root = TempDir::new().unwrap();
    let fx = fixture(Arc::new(DirectoryBackupEngine::new(root.path())), quick_settings()).await;
    let straggler = fx.manager.acquire().await.unwrap();

    let monitor = fx.service.migrate(target_config()).await.unwrap();
    assert!(matches!(monitor.wait().await, TaskOutcome::Succeeded));

    // The straggler was asked to stop and its handle is now closed
    assert!(straggler.is_interrupted());
    assert!(straggler.handle().is_closed());
    assert_eq!(fx.manager.handle().config(), &target_config());
}

#[tokio::test]
async fn test_invalid_target_is_rejected_without_side_effects() {
    let fx = fixture(Arc::new(FailingBackup), quick_settings()).await;
    let source = fx.manager.handle();

    let err = fx
        .service
        .migrate(DataSourceConfig::new("", "app", "secret"))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Validation(_)));

    let err = fx.service.migrate(source_config()).await.unwrap_err();
    assert!(matches!(err, MigrationError::Validation(_)));

    assert!(Arc::ptr_eq(&fx.manager.handle(), &source));
    assert!(fx.service.maintenance().active_task().is_none());
}

#[tokio::test]
async fn test_failure_after_cutover_switches_back_to_source() {
    let root = TempDir::new().unwrap();
    let engine = Arc::new(DirectoryBackupEngine::new(root.path().join("data")));
    let source_dir = engine.data_dir(&source_config());
    std::fs::create_dir_all(&source_dir).unwrap();
    std::fs::write(source_dir.join("catalog"), b"users").unwrap();

    let manager = Arc::new(
        DatabaseManager::open(source_config(), Arc::new(NoopConnector))
            .await
            .unwrap(),
    );
    let source = manager.handle();
    let store = Arc::new(ReadOnlyStore {
        manager: Arc::clone(&manager),
        current_at_save: Mutex::new(None),
    });
    let publisher = Arc::new(BroadcastEventPublisher::default());
    let mut events = publisher.subscribe();
    let context = MigrationContext::new(
        Arc::clone(&manager),
        engine,
        Arc::clone(&store) as Arc<dyn ConfigurationStore>,
    )
    .with_events(publisher as Arc<dyn EventPublisher>)
    .with_settings(quick_settings().scratch_root(root.path().join("scratch")));
    let service = MigrationService::new(context, Arc::new(MaintenanceService::new()));

    let monitor = service.migrate(target_config()).await.unwrap();
    match monitor.wait().await {
        TaskOutcome::Failed(cause) => assert!(cause.to_string().contains("read-only")),
        other => panic!("expected failure, got {other:?}"),
    }

    let target = store
        .current_at_save
        .lock()
        .unwrap()
        .clone()
        .expect("finalize should have tried to save");
    assert_eq!(target.config(), &target_config());
    assert!(target.is_closed());

    assert!(Arc::ptr_eq(&manager.handle(), &source));
    assert!(!source.is_closed());
    assert!(!manager.is_latched());
    let guard = manager.acquire().await.unwrap();
    assert!(Arc::ptr_eq(guard.handle(), &source));

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        MigrationEvent::MigrationFailed { reason, .. } if reason.contains("read-only")
    )));
}
