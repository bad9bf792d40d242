//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use rusqlite::types::Value;
use rusqlite::params;
use std::sync::Arc;
use uuid::Uuid;
use warden_core::record::uuid_value;
use warden_core::{
    Column, DefaultContextualizer, Node, OpContext, Persister, PersisterConfig, Record, Store,
    TableName,
};

/// Identity row as a domain repository would model it
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    pub nid: Uuid,
    pub schema_id: String,
    pub traits: String,
    pub state: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

static IDENTITY_COLUMNS: &[Column] = &[
    Column::writable("id"),
    Column::writable("nid"),
    Column::writable("schema_id"),
    Column::writable("traits"),
    Column::writable("state"),
    Column::read_only("created_at_ms"),
    Column::writable("updated_at_ms"),
];

impl Identity {
    pub fn new(nid: Uuid, traits: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            nid,
            schema_id: "default".to_string(),
            traits: traits.to_string(),
            state: "active".to_string(),
            created_at_ms: now,
            updated_at_ms: now,
        }
    }
}

impl Node for Identity {
    fn id(&self) -> Uuid {
        self.id
    }

    fn nid(&self) -> Uuid {
        self.nid
    }
}

impl TableName for Identity {
    fn table_name(&self, _ctx: &OpContext) -> String {
        "identities".to_string()
    }
}

impl Record for Identity {
    fn columns() -> &'static [Column] {
        IDENTITY_COLUMNS
    }

    fn value(&self, column: &str) -> Option<Value> {
        Some(match column {
            "id" => uuid_value(self.id),
            "nid" => uuid_value(self.nid),
            "schema_id" => Value::Text(self.schema_id.clone()),
            "traits" => Value::Text(self.traits.clone()),
            "state" => Value::Text(self.state.clone()),
            "created_at_ms" => Value::Integer(self.created_at_ms),
            "updated_at_ms" => Value::Integer(self.updated_at_ms),
            _ => return None,
        })
    }
}

/// Table name accessor for session deletes
pub struct Sessions;

impl TableName for Sessions {
    fn table_name(&self, _ctx: &OpContext) -> String {
        "sessions".to_string()
    }
}

/// Fully migrated persister over an in-memory store, bound to `nid`
pub fn migrated_persister(nid: Uuid) -> Persister {
    let persister = Persister::new(
        Store::open_in_memory().expect("in-memory SQLite should open"),
        &PersisterConfig::default().with_network_id(nid),
        Arc::new(DefaultContextualizer),
        Vec::new(),
    )
    .expect("persister should build");
    persister.migrate_up().expect("migrations should apply");
    persister
}

pub fn insert_identity(store: &Store, identity: &Identity) {
    store
        .lock()
        .execute(
            "INSERT INTO identities (id, nid, schema_id, traits, state, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                identity.id.to_string(),
                identity.nid.to_string(),
                identity.schema_id,
                identity.traits,
                identity.state,
                identity.created_at_ms,
                identity.updated_at_ms
            ],
        )
        .expect("identity insert should succeed");
}

pub fn load_identity(store: &Store, id: Uuid) -> Option<Identity> {
    store
        .lock()
        .query_row(
            "SELECT id, nid, schema_id, traits, state, created_at_ms, updated_at_ms
             FROM identities WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok(Identity {
                    id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
                    nid: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap(),
                    schema_id: row.get(2)?,
                    traits: row.get(3)?,
                    state: row.get(4)?,
                    created_at_ms: row.get(5)?,
                    updated_at_ms: row.get(6)?,
                })
            },
        )
        .ok()
}

/// Insert a session of `nid` expiring `expires_in` from now (negative: already expired)
pub fn insert_session(store: &Store, nid: Uuid, expires_in: Duration) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    store
        .lock()
        .execute(
            "INSERT INTO sessions (id, nid, identity_id, active, authenticated_at_ms, expires_at_ms, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?4, ?4)",
            params![
                id.to_string(),
                nid.to_string(),
                Uuid::new_v4().to_string(),
                now.timestamp_millis(),
                (now + expires_in).timestamp_millis()
            ],
        )
        .expect("session insert should succeed");
    id
}

/// Insert a flow into `table` expiring `expires_in` from now
pub fn insert_flow(store: &Store, table: &str, nid: Uuid, expires_in: Duration) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    store
        .lock()
        .execute(
            &format!(
                "INSERT INTO {table} (id, nid, issued_at_ms, expires_at_ms, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?3, ?3)"
            ),
            params![
                id.to_string(),
                nid.to_string(),
                now.timestamp_millis(),
                (now + expires_in).timestamp_millis()
            ],
        )
        .expect("flow insert should succeed");
    id
}

pub fn count_rows(store: &Store, table: &str) -> i64 {
    store
        .lock()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count should succeed")
}

pub fn row_exists(store: &Store, table: &str, id: Uuid) -> bool {
    store
        .lock()
        .query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE id = ?1"),
            [id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .expect("lookup should succeed")
        == 1
}
