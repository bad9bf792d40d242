//! Network registry
//!
//! A network is the tenant partitioning every managed table through its `nid`
//! column. The registry ships its own migration source, merged with the core
//! schema at startup.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreResultExt};
use crate::migration::{EmbeddedMigration, EmbeddedSource};
use crate::store::Store;

static NETWORK_MIGRATIONS: &[EmbeddedMigration] = &[EmbeddedMigration {
    version: 20150100000001,
    name: "networks",
    up: "CREATE TABLE IF NOT EXISTS networks (
            id            TEXT PRIMARY KEY,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );",
    down: "DROP TABLE IF EXISTS networks;",
}];

/// Migration source creating the `networks` table
pub fn network_migrations() -> EmbeddedSource {
    EmbeddedSource::new("networks", NETWORK_MIGRATIONS)
}

/// A registered network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Looks up, and on first boot creates, the network of this deployment
#[derive(Debug, Clone)]
pub struct NetworkManager {
    store: Store,
}

impl NetworkManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Oldest registered network, created if the registry is empty
    pub fn determine(&self) -> Result<Network> {
        let conn = self.store.lock();
        let existing = conn
            .query_row(
                "SELECT id, created_at_ms, updated_at_ms FROM networks
                 ORDER BY created_at_ms ASC, id ASC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .store_op("determine network")?;

        if let Some((id, created, updated)) = existing {
            let id = Uuid::parse_str(&id).map_err(|e| {
                crate::PersistenceError::store(
                    "determine network",
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    ),
                )
            })?;
            return Ok(Network {
                id,
                created_at: from_millis(created),
                updated_at: from_millis(updated),
            });
        }

        let now = Utc::now();
        let network = Network {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO networks (id, created_at_ms, updated_at_ms) VALUES (?1, ?2, ?3)",
            params![
                network.id.to_string(),
                now.timestamp_millis(),
                now.timestamp_millis()
            ],
        )
        .store_op("create network")?;

        tracing::info!("Created network {}", network.id);
        Ok(network)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MigrationBox, MigrationSource};

    fn migrated_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let sources: Vec<Box<dyn MigrationSource>> = vec![Box::new(network_migrations())];
        MigrationBox::new(store.clone(), &sources).unwrap().up().unwrap();
        store
    }

    #[test]
    fn test_determine_creates_once() {
        let manager = NetworkManager::new(migrated_store());

        let first = manager.determine().unwrap();
        let second = manager.determine().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_determine_prefers_oldest() {
        let store = migrated_store();
        let old = Uuid::new_v4();
        store
            .lock()
            .execute(
                "INSERT INTO networks (id, created_at_ms, updated_at_ms) VALUES (?1, 1, 1), (?2, 2, 2)",
                params![old.to_string(), Uuid::new_v4().to_string()],
            )
            .unwrap();

        let network = NetworkManager::new(store).determine().unwrap();
        assert_eq!(network.id, old);
        assert_eq!(network.created_at.timestamp_millis(), 1);
    }

    #[test]
    fn test_determine_without_table_is_store_error() {
        let manager = NetworkManager::new(Store::open_in_memory().unwrap());
        assert!(matches!(
            manager.determine(),
            Err(crate::PersistenceError::Store { .. })
        ));
    }
}
