//! Migration sources
//!
//! A source is a set of versioned scripts. The primary schema is compiled into
//! the binary; further sources may be contributed by other components (the
//! network registry) or by configuration (directories on disk).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PersistenceError, Result};

/// One versioned schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Global ordering key, unique across all merged sources
    pub version: u64,
    /// Human readable name
    pub name: String,
    /// Script applying the change
    pub up: String,
    /// Script reverting the change; empty when irreversible
    pub down: String,
    /// Name of the source that declared it
    pub source: String,
}

/// Anything able to list migrations
pub trait MigrationSource: Send + Sync {
    /// Name used in logs and duplicate-version errors
    fn name(&self) -> &str;

    /// Every migration declared by this source, in any order
    fn migrations(&self) -> Result<Vec<Migration>>;
}

/// A migration compiled into the binary
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub version: u64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// Static list of migrations compiled into the binary
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    name: &'static str,
    entries: &'static [EmbeddedMigration],
}

impl EmbeddedSource {
    pub const fn new(name: &'static str, entries: &'static [EmbeddedMigration]) -> Self {
        Self { name, entries }
    }
}

impl MigrationSource for EmbeddedSource {
    fn name(&self) -> &str {
        self.name
    }

    fn migrations(&self) -> Result<Vec<Migration>> {
        Ok(self
            .entries
            .iter()
            .map(|m| Migration {
                version: m.version,
                name: m.name.to_string(),
                up: m.up.to_string(),
                down: m.down.to_string(),
                source: self.name.to_string(),
            })
            .collect())
    }
}

static CORE_MIGRATIONS: &[EmbeddedMigration] = &[
    EmbeddedMigration {
        version: 20240101000001,
        name: "identities",
        up: include_str!("sql/20240101000001_identities.up.sql"),
        down: include_str!("sql/20240101000001_identities.down.sql"),
    },
    EmbeddedMigration {
        version: 20240101000002,
        name: "sessions",
        up: include_str!("sql/20240101000002_sessions.up.sql"),
        down: include_str!("sql/20240101000002_sessions.down.sql"),
    },
    EmbeddedMigration {
        version: 20240101000003,
        name: "selfservice_flows",
        up: include_str!("sql/20240101000003_selfservice_flows.up.sql"),
        down: include_str!("sql/20240101000003_selfservice_flows.down.sql"),
    },
];

/// The primary schema: identities, sessions, continuity containers and flows
pub fn core_migrations() -> EmbeddedSource {
    EmbeddedSource::new("core", CORE_MIGRATIONS)
}

/// Reads `<version>_<name>.up.sql` / `<version>_<name>.down.sql` pairs
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
    name: String,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Split `20240101000001_add_column.up.sql` into version, name and direction
fn parse_file_name(file_name: &str) -> Option<(u64, &str, bool)> {
    let (stem, up) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
        (stem, true)
    } else {
        (file_name.strip_suffix(".down.sql")?, false)
    };
    let (version, name) = stem.split_once('_')?;
    if name.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, name, up))
}

impl MigrationSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn migrations(&self) -> Result<Vec<Migration>> {
        let mut ups = std::collections::BTreeMap::new();
        let mut downs = std::collections::BTreeMap::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(".sql") {
                continue;
            }
            let (version, name, up) = parse_file_name(&file_name).ok_or_else(|| {
                PersistenceError::InvalidMigrationFile(entry.path().display().to_string())
            })?;
            let script = fs::read_to_string(entry.path())?;
            let target = if up { &mut ups } else { &mut downs };
            if let Some((existing, _)) = target.get(&version) {
                let direction = if up { "up" } else { "down" };
                return Err(PersistenceError::DuplicateMigration {
                    version,
                    first: format!("{}/{version}_{existing}.{direction}.sql", self.name),
                    second: format!("{}/{file_name}", self.name),
                });
            }
            target.insert(version, (name.to_string(), script));
        }

        for (version, (name, _)) in &downs {
            match ups.get(version) {
                None => {
                    return Err(PersistenceError::InvalidMigrationFile(format!(
                        "{}: down script for {} has no matching up script",
                        self.path.display(),
                        version
                    )))
                }
                Some((up_name, _)) if up_name != name => {
                    return Err(PersistenceError::InvalidMigrationFile(format!(
                        "{}: down script {}_{} does not match up script {}_{}",
                        self.path.display(),
                        version,
                        name,
                        version,
                        up_name
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(ups
            .into_iter()
            .map(|(version, (name, up))| Migration {
                version,
                down: downs.remove(&version).map(|(_, s)| s).unwrap_or_default(),
                name,
                up,
                source: self.name.clone(),
            })
            .collect())
    }
}
