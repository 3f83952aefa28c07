use super::ports::ConfigurationStore;
use crate::config::DataSourceConfig;
use crate::core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// On-disk record of the active data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDataSource {
    pub config: DataSourceConfig,
    pub note: String,
    pub saved_at: DateTime<Utc>,
}

/// Keeps the active data source configuration in a JSON file.
#[derive(Debug, Clone)]
pub struct FileConfigurationStore {
    path: PathBuf,
}

impl FileConfigurationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load_record(&self) -> Result<Option<StoredDataSource>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let raw = fs::read(&self.path).await?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ConfigurationStore for FileConfigurationStore {
    async fn save_data_source_configuration(
        &self,
        config: &DataSourceConfig,
        note: &str,
    ) -> Result<()> {
        let record = StoredDataSource {
            config: config.clone(),
            note: note.to_string(),
            saved_at: Utc::now(),
        };
        atomic_write(&self.path, &serde_json::to_vec_pretty(&record)?).await
    }

    async fn load_data_source_configuration(&self) -> Result<Option<DataSourceConfig>> {
        Ok(self.load_record().await?.map(|record| record.config))
    }
}
