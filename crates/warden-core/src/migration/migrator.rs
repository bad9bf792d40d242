//! MigrationBox: merged migration sources applied against the store
//!
//! Sources are merged once, at construction, into a single sequence ordered by
//! version. Applied versions are recorded in `schema_migration`; each step runs
//! in its own transaction together with its bookkeeping row, so a failing
//! step leaves no trace while the steps before it stay applied.

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

use super::source::{Migration, MigrationSource};
use super::status::{MigrationState, MigrationStatus, MigrationStatuses};
use crate::error::{Direction, PersistenceError, Result, StoreResultExt};
use crate::store::Store;

const SCHEMA_MIGRATION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_migration (
        version       INTEGER PRIMARY KEY,
        name          TEXT NOT NULL,
        applied_at_ms INTEGER NOT NULL
    );";

/// Merge sources into one sequence ordered by version.
///
/// A version declared by two sources is rejected rather than resolved.
pub fn merge_sources(sources: &[Box<dyn MigrationSource>]) -> Result<Vec<Migration>> {
    let mut merged: BTreeMap<u64, Migration> = BTreeMap::new();
    for source in sources {
        for migration in source.migrations()? {
            if let Some(existing) = merged.get(&migration.version) {
                return Err(PersistenceError::DuplicateMigration {
                    version: migration.version,
                    first: existing.source.clone(),
                    second: migration.source,
                });
            }
            merged.insert(migration.version, migration);
        }
    }
    Ok(merged.into_values().collect())
}

/// Declared migrations plus the store they are applied to
#[derive(Debug, Clone)]
pub struct MigrationBox {
    store: Store,
    migrations: Vec<Migration>,
}

impl MigrationBox {
    pub fn new(store: Store, sources: &[Box<dyn MigrationSource>]) -> Result<Self> {
        let migrations = merge_sources(sources)?;
        tracing::debug!("Merged {} migrations from {} sources", migrations.len(), sources.len());
        Ok(Self { store, migrations })
    }

    /// Declared migrations in version order
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every pending migration in order, stopping at the first failure.
    ///
    /// Returns how many migrations were applied.
    pub fn up(&self) -> Result<usize> {
        let mut conn = self.store.lock();
        let applied = applied_versions(&conn)?;

        let mut count = 0;
        for migration in self.migrations.iter().filter(|m| !applied.contains_key(&m.version)) {
            tracing::info!("Applying migration {} ({})", migration.version, migration.name);
            apply(&mut conn, migration).map_err(|source| PersistenceError::Migration {
                version: migration.version,
                name: migration.name.clone(),
                direction: Direction::Up,
                source,
            })?;
            count += 1;
        }

        tracing::info!("Applied {} migrations", count);
        Ok(count)
    }

    /// Revert the `steps` most recently applied migrations, newest first.
    ///
    /// `steps == 0` reverts every applied migration.
    pub fn down(&self, steps: usize) -> Result<usize> {
        let mut conn = self.store.lock();
        let applied = applied_versions(&conn)?;

        let limit = if steps == 0 { applied.len() } else { steps };
        let mut count = 0;
        for version in applied.keys().rev().take(limit) {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.version == *version)
                .ok_or(PersistenceError::UndeclaredMigration(*version))?;

            tracing::info!("Reverting migration {} ({})", migration.version, migration.name);
            revert(&mut conn, migration).map_err(|source| PersistenceError::Migration {
                version: migration.version,
                name: migration.name.clone(),
                direction: Direction::Down,
                source,
            })?;
            count += 1;
        }

        tracing::info!("Reverted {} migrations", count);
        Ok(count)
    }

    /// Applied/pending partition of the declared migrations, read live from the store
    pub fn status(&self) -> Result<MigrationStatuses> {
        let conn = self.store.lock();
        let applied = applied_versions(&conn)?;

        let entries = self
            .migrations
            .iter()
            .map(|m| {
                let applied_at = applied
                    .get(&m.version)
                    .and_then(|ms| Utc.timestamp_millis_opt(*ms).single());
                MigrationStatus {
                    version: m.version,
                    name: m.name.clone(),
                    state: if applied.contains_key(&m.version) {
                        MigrationState::Applied
                    } else {
                        MigrationState::Pending
                    },
                    applied_at,
                }
            })
            .collect();
        Ok(MigrationStatuses::new(entries))
    }
}

/// Applied versions and their timestamps, creating the bookkeeping table if needed
fn applied_versions(conn: &Connection) -> Result<BTreeMap<u64, i64>> {
    conn.execute_batch(SCHEMA_MIGRATION_DDL)
        .store_op("create schema_migration")?;

    let mut stmt = conn
        .prepare("SELECT version, applied_at_ms FROM schema_migration")
        .store_op("read schema_migration")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)?)))
        .store_op("read schema_migration")?;

    rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
        .store_op("read schema_migration")
}

fn apply(conn: &mut Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(&migration.up)?;
    tx.execute(
        "INSERT INTO schema_migration (version, name, applied_at_ms) VALUES (?1, ?2, ?3)",
        params![
            migration.version as i64,
            migration.name,
            Utc::now().timestamp_millis()
        ],
    )?;
    tx.commit()
}

fn revert(conn: &mut Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    if !migration.down.trim().is_empty() {
        tx.execute_batch(&migration.down)?;
    }
    tx.execute(
        "DELETE FROM schema_migration WHERE version = ?1",
        params![migration.version as i64],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::source::{core_migrations, EmbeddedMigration, EmbeddedSource};

    static EXTRA: &[EmbeddedMigration] = &[EmbeddedMigration {
        version: 20240101000002,
        name: "clash",
        up: "SELECT 1;",
        down: "",
    }];

    static PLUGIN: &[EmbeddedMigration] = &[EmbeddedMigration {
        version: 20230101000000,
        name: "plugin_first",
        up: "CREATE TABLE plugin (id TEXT PRIMARY KEY);",
        down: "DROP TABLE plugin;",
    }];

    fn table_exists(store: &Store, name: &str) -> bool {
        store
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            == 1
    }

    #[test]
    fn test_merge_orders_across_sources() {
        let sources: Vec<Box<dyn MigrationSource>> = vec![
            Box::new(core_migrations()),
            Box::new(EmbeddedSource::new("plugin", PLUGIN)),
        ];
        let merged = merge_sources(&sources).unwrap();

        assert_eq!(merged[0].name, "plugin_first");
        assert_eq!(merged[0].source, "plugin");
        assert!(merged.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn test_merge_rejects_duplicate_versions() {
        let sources: Vec<Box<dyn MigrationSource>> = vec![
            Box::new(core_migrations()),
            Box::new(EmbeddedSource::new("extra", EXTRA)),
        ];
        let err = merge_sources(&sources).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::DuplicateMigration { version: 20240101000002, .. }
        ));
    }

    #[test]
    fn test_up_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let sources: Vec<Box<dyn MigrationSource>> = vec![Box::new(core_migrations())];
        let mb = MigrationBox::new(store.clone(), &sources).unwrap();

        assert_eq!(mb.up().unwrap(), 3);
        assert_eq!(mb.up().unwrap(), 0);
        assert!(table_exists(&store, "sessions"));
        assert!(!mb.status().unwrap().has_pending());
    }

    #[test]
    fn test_down_reverts_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let sources: Vec<Box<dyn MigrationSource>> = vec![Box::new(core_migrations())];
        let mb = MigrationBox::new(store.clone(), &sources).unwrap();
        mb.up().unwrap();

        assert_eq!(mb.down(1).unwrap(), 1);
        assert!(!table_exists(&store, "selfservice_login_flows"));
        assert!(table_exists(&store, "sessions"));

        let status = mb.status().unwrap();
        let pending: Vec<_> = status.pending().map(|s| s.version).collect();
        assert_eq!(pending, vec![20240101000003]);
    }

    #[test]
    fn test_down_zero_reverts_everything() {
        let store = Store::open_in_memory().unwrap();
        let sources: Vec<Box<dyn MigrationSource>> = vec![Box::new(core_migrations())];
        let mb = MigrationBox::new(store.clone(), &sources).unwrap();
        mb.up().unwrap();

        assert_eq!(mb.down(0).unwrap(), 3);
        assert!(!table_exists(&store, "identities"));
        assert_eq!(mb.status().unwrap().pending().count(), 3);
    }

    #[test]
    fn test_status_reports_applied_at() {
        let store = Store::open_in_memory().unwrap();
        let sources: Vec<Box<dyn MigrationSource>> = vec![Box::new(core_migrations())];
        let mb = MigrationBox::new(store, &sources).unwrap();

        let before = mb.status().unwrap();
        assert!(before.iter().all(|s| s.applied_at.is_none()));

        mb.up().unwrap();
        let after = mb.status().unwrap();
        assert!(after.iter().all(|s| s.applied_at.is_some()));
    }
}
