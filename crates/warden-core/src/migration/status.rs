//! Migration status and its cache

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Whether a declared migration has been executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Applied,
    Pending,
}

/// Status of one declared migration.
///
/// Serialized with an additional `applied` flag next to `state`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationStatus {
    pub version: u64,
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.state == MigrationState::Applied
    }
}

impl Serialize for MigrationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("MigrationStatus", 5)?;
        out.serialize_field("version", &self.version)?;
        out.serialize_field("name", &self.name)?;
        out.serialize_field("state", &self.state)?;
        out.serialize_field("applied", &self.is_applied())?;
        out.serialize_field("applied_at", &self.applied_at)?;
        out.end()
    }
}

/// Status of every declared migration, ordered by version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationStatuses(Vec<MigrationStatus>);

impl MigrationStatuses {
    pub fn new(entries: Vec<MigrationStatus>) -> Self {
        Self(entries)
    }

    pub fn has_pending(&self) -> bool {
        self.0.iter().any(|s| !s.is_applied())
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.0.iter().filter(|s| !s.is_applied())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationStatus> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a MigrationStatuses {
    type Item = &'a MigrationStatus;
    type IntoIter = std::slice::Iter<'a, MigrationStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Status cached once a handle has seen a fully migrated store.
///
/// Transitions only from empty to filled; a status with pending entries is
/// never stored. Staleness is bounded by the lifetime of the handle.
#[derive(Debug, Default)]
pub struct StatusCache {
    cached: RwLock<Option<MigrationStatuses>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached status, if any
    pub fn get(&self) -> Option<MigrationStatuses> {
        self.cached.read().clone()
    }

    /// Cache `status` unless it has pending entries; returns whether it was stored
    pub fn store_if_complete(&self, status: &MigrationStatuses) -> bool {
        if status.has_pending() {
            return false;
        }
        let mut cached = self.cached.write();
        if cached.is_none() {
            *cached = Some(status.clone());
        }
        true
    }

    pub fn is_valid(&self) -> bool {
        self.cached.read().is_some()
    }
}

impl Clone for StatusCache {
    fn clone(&self) -> Self {
        Self {
            cached: RwLock::new(self.get()),
        }
    }
}
