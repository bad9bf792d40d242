//! Persister configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::{PersistenceError, Result};

/// Main persister configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersisterConfig {
    /// Tenant bound to the handle. When absent the network is determined
    /// from the `networks` table.
    pub network_id: Option<Uuid>,

    /// Database settings
    pub database: DatabaseSettings,

    /// Migration settings
    pub migrations: MigrationSettings,

    /// Cleanup job defaults
    pub cleanup: CleanupSettings,
}

impl PersisterConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database path
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database.path = path.into();
        self
    }

    /// Bind the handle to a fixed network
    pub fn with_network_id(mut self, nid: Uuid) -> Self {
        self.network_id = Some(nid);
        self
    }

    /// Add a directory of externally contributed migrations
    pub fn with_migration_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations.directories.push(dir.into());
        self
    }

    /// Set the cleanup batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.cleanup.batch_size = batch_size;
        self
    }

    /// Reject values the persister cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(PersistenceError::InvalidConfig(
                "database.path must not be empty".to_string(),
            ));
        }
        if self.cleanup.batch_size == 0 {
            return Err(PersistenceError::InvalidConfig(
                "cleanup.batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PersistenceError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file, or `:memory:`
    pub path: PathBuf,

    /// How long a statement waits on a locked database
    pub busy_timeout_ms: u64,

    /// Enable write-ahead logging
    pub wal: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warden.db"),
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}

/// Migration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Directories holding `<version>_<name>.up.sql` / `.down.sql` pairs
    pub directories: Vec<PathBuf>,

    /// Merge the network registry migrations into the primary source
    pub include_networks: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            include_networks: true,
        }
    }
}

/// Cleanup job defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Pause between two cleanup targets, in milliseconds
    pub wait_ms: u64,

    /// Records whose expiry is older than this are removed, in seconds
    pub older_than_secs: u64,

    /// Maximum rows removed per target per run
    pub batch_size: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            wait_ms: 1000,
            older_than_secs: 0,
            batch_size: 100,
        }
    }
}

impl CleanupSettings {
    /// Pause between two targets
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    /// Retention window
    pub fn older_than(&self) -> Duration {
        Duration::from_secs(self.older_than_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PersisterConfig::default();
        assert_eq!(config.database.path, PathBuf::from("warden.db"));
        assert!(config.network_id.is_none());
        assert!(config.migrations.include_networks);
        assert_eq!(config.cleanup.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let nid = Uuid::new_v4();
        let config = PersisterConfig::new()
            .with_database_path(":memory:")
            .with_network_id(nid)
            .with_migration_dir("plugins/migrations")
            .with_batch_size(10);

        assert_eq!(config.database.path, PathBuf::from(":memory:"));
        assert_eq!(config.network_id, Some(nid));
        assert_eq!(config.migrations.directories.len(), 1);
        assert_eq!(config.cleanup.batch_size, 10);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = PersisterConfig::new().with_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(PersistenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PersisterConfig = toml::from_str(
            r#"
            [cleanup]
            batch_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.cleanup.batch_size, 25);
        assert_eq!(config.cleanup.wait_ms, 1000);
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        let config = PersisterConfig::new().with_network_id(Uuid::new_v4());

        config.to_file(&path).unwrap();
        let loaded = PersisterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.network_id, config.network_id);
    }
}
