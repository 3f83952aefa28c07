use crate::core::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_DRAIN_SOFT_SECS: &str = "LIVEMIGRATE_DRAIN_SOFT_SECS";
const ENV_DRAIN_FORCE_SECS: &str = "LIVEMIGRATE_DRAIN_FORCE_SECS";
const ENV_SCRATCH_ROOT: &str = "LIVEMIGRATE_SCRATCH_ROOT";

/// Tunables for migrations and for the join-check handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationSettings {
    /// Seconds to wait for in-flight operations to finish on their own.
    pub drain_soft_timeout_secs: u64,
    /// Seconds to wait after in-flight operations were interrupted.
    pub drain_force_timeout_secs: u64,
    /// Parent directory for per-migration scratch directories.
    /// `None` uses the system temp directory.
    pub scratch_root: Option<PathBuf>,
    /// Upper bound for a single read on the join-check stream.
    pub join_read_timeout_ms: u64,
    /// Largest join-check frame accepted from a peer.
    pub max_frame_bytes: u32,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            drain_soft_timeout_secs: 30,
            drain_force_timeout_secs: 15,
            scratch_root: None,
            join_read_timeout_ms: 10_000,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl MigrationSettings {
    /// Loads settings from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies `LIVEMIGRATE_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(secs) = env_secs(ENV_DRAIN_SOFT_SECS)? {
            self.drain_soft_timeout_secs = secs;
        }
        if let Some(secs) = env_secs(ENV_DRAIN_FORCE_SECS)? {
            self.drain_force_timeout_secs = secs;
        }
        if let Ok(root) = std::env::var(ENV_SCRATCH_ROOT) {
            if !root.trim().is_empty() {
                self.scratch_root = Some(PathBuf::from(root));
            }
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.join_read_timeout_ms == 0 {
            return Err(MigrationError::Validation(
                "join_read_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(MigrationError::Validation(
                "max_frame_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn drain_soft_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_soft_timeout_secs)
    }

    pub fn drain_force_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_force_timeout_secs)
    }

    pub fn join_read_timeout(&self) -> Duration {
        Duration::from_millis(self.join_read_timeout_ms)
    }

    pub fn drain_timeouts(mut self, soft: Duration, force: Duration) -> Self {
        self.drain_soft_timeout_secs = soft.as_secs();
        self.drain_force_timeout_secs = force.as_secs();
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

fn env_secs(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| MigrationError::Validation(format!("{key} must be a number of seconds"))),
        Err(_) => Ok(None),
    }
}
