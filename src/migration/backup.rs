use super::ports::BackupEngine;
use crate::config::DataSourceConfig;
use crate::core::{MigrationError, Result};
use crate::database::DatabaseHandle;
use crate::task::StepContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

const BACKUP_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct BackupArchive {
    version: u16,
    created_at: DateTime<Utc>,
    source_url: String,
    files: Vec<ArchivedFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchivedFile {
    path: String,
    bytes: Vec<u8>,
}

/// Backup engine for databases that keep their data in a directory.
///
/// Each data source maps to `<root>/<host>_<port>_<database>`. A backup is a
/// single MessagePack archive of every file under that directory; restore
/// replaces the target directory with the unpacked files.
#[derive(Debug, Clone)]
pub struct DirectoryBackupEngine {
    root: PathBuf,
}

impl DirectoryBackupEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn data_dir(&self, config: &DataSourceConfig) -> PathBuf {
        let name: String = format!("{}_{}_{}", config.host, config.port, config.database)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(name)
    }
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !fs::try_exists(dir).await? {
        return Ok(files);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn relative_name(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| {
        MigrationError::failed(format!("{} is outside {}", path.display(), base.display()))
    })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// Rejects archive entries that would escape the destination directory.
fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(MigrationError::failed(format!(
            "backup entry '{}' is not a plain relative path",
            relative.display()
        )));
    }
    Ok(base.join(relative))
}

#[async_trait]
impl BackupEngine for DirectoryBackupEngine {
    async fn backup_database(
        &self,
        source: &DatabaseHandle,
        archive: &Path,
        step: &StepContext,
    ) -> Result<()> {
        let data_dir = self.data_dir(source.config());
        let paths = list_files(&data_dir).await?;
        let mut files = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            step.check_canceled()?;
            files.push(ArchivedFile {
                path: relative_name(&data_dir, path)?,
                bytes: fs::read(path).await?,
            });
            // Writing the archive accounts for the last tenth.
            step.report(90.0 * (index + 1) as f64 / paths.len() as f64);
        }

        let archived = BackupArchive {
            version: BACKUP_FORMAT_VERSION,
            created_at: Utc::now(),
            source_url: source.config().url(),
            files,
        };
        let bytes = rmp_serde::to_vec(&archived)?;
        fs::write(archive, &bytes).await?;
        info!(
            "Backed up {} file(s) from {} ({} bytes)",
            archived.files.len(),
            source,
            bytes.len()
        );
        Ok(())
    }

    async fn unpack(&self, archive: &Path, dest: &Path, step: &StepContext) -> Result<()> {
        let bytes = fs::read(archive).await?;
        let archived: BackupArchive = rmp_serde::from_slice(&bytes)?;
        if archived.version != BACKUP_FORMAT_VERSION {
            return Err(MigrationError::failed(format!(
                "unsupported backup format version {}",
                archived.version
            )));
        }

        fs::create_dir_all(dest).await?;
        let total = archived.files.len();
        for (index, file) in archived.files.iter().enumerate() {
            step.check_canceled()?;
            let path = safe_join(dest, &file.path)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, &file.bytes).await?;
            step.report_fraction(index + 1, total);
        }
        debug!(
            "Unpacked backup of {} taken at {}",
            archived.source_url, archived.created_at
        );
        Ok(())
    }

    async fn restore_database(
        &self,
        target: &DatabaseHandle,
        payload: &Path,
        step: &StepContext,
    ) -> Result<()> {
        let data_dir = self.data_dir(target.config());
        if fs::try_exists(&data_dir).await? {
            fs::remove_dir_all(&data_dir).await?;
        }
        fs::create_dir_all(&data_dir).await?;

        let files = list_files(payload).await?;
        for (index, path) in files.iter().enumerate() {
            step.check_canceled()?;
            let dest = safe_join(&data_dir, &relative_name(payload, path)?)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(path, &dest).await?;
            step.report_fraction(index + 1, files.len());
        }
        info!("Restored {} file(s) into {}", files.len(), target);
        Ok(())
    }
}
