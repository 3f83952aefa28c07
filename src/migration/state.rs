use crate::core::Result;
use crate::database::{DatabaseHandle, DatabaseLatch};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

const DATABASE_BACKUP_FILE: &str = "database.backup";
const CONFIGURATION_BACKUP_FILE: &str = "datasource.json";
const UNPACKED_DIR: &str = "unpacked";

/// Everything one migration attempt owns.
///
/// The scratch directory is removed by [`MigrationState::cleanup`] or, at the
/// latest, when the state is dropped.
pub struct MigrationState {
    source_database: Arc<DatabaseHandle>,
    target_database: Arc<DatabaseHandle>,
    work_dir: PathBuf,
    scratch: Mutex<Option<TempDir>>,
    latch: Mutex<Option<Arc<DatabaseLatch>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MigrationState {
    pub fn new(
        source_database: Arc<DatabaseHandle>,
        target_database: Arc<DatabaseHandle>,
        scratch_root: Option<&Path>,
    ) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("livemigrate-");
        let scratch = match scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        Ok(Self {
            source_database,
            target_database,
            work_dir: scratch.path().to_path_buf(),
            scratch: Mutex::new(Some(scratch)),
            latch: Mutex::new(None),
        })
    }

    pub fn source_database(&self) -> &Arc<DatabaseHandle> {
        &self.source_database
    }

    pub fn target_database(&self) -> &Arc<DatabaseHandle> {
        &self.target_database
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn database_backup_path(&self) -> PathBuf {
        self.work_dir.join(DATABASE_BACKUP_FILE)
    }

    pub fn configuration_backup_path(&self) -> PathBuf {
        self.work_dir.join(CONFIGURATION_BACKUP_FILE)
    }

    pub fn unpacked_dir(&self) -> PathBuf {
        self.work_dir.join(UNPACKED_DIR)
    }

    pub(crate) fn set_latch(&self, latch: Arc<DatabaseLatch>) {
        *lock(&self.latch) = Some(latch);
    }

    pub(crate) fn take_latch(&self) -> Option<Arc<DatabaseLatch>> {
        lock(&self.latch).take()
    }

    pub fn holds_latch(&self) -> bool {
        lock(&self.latch).is_some()
    }

    /// Removes the scratch directory. Safe to call more than once.
    pub fn cleanup(&self) -> Result<()> {
        let scratch = lock(&self.scratch).take();
        if let Some(scratch) = scratch {
            scratch.close()?;
        }
        Ok(())
    }
}
