//! Warden Core - tenant-isolated persistence for a multi-tenant identity backend
//!
//! Warden sits between domain repositories and a relational store. It owns
//! the cross-cutting guarantees every domain entity relies on:
//!
//! 1. **Tenant isolation** (`mutation`): generic update/delete scoped by
//!    `id = ? AND nid = ?`, with a uniform `NotFound` for rows of other tenants
//! 2. **Migrations** (`migration`): merged migration sources, up/down, and a
//!    status view cached once the store is fully migrated
//! 3. **Retention cleanup** (`cleanup`): an ordered, batched, throttled purge
//!    of expired records that aborts on the first failing target
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_core::{DefaultContextualizer, OpContext, Persister, PersisterConfig, Store};
//!
//! let store = Store::open_in_memory().unwrap();
//! let persister = Persister::new(
//!     store,
//!     &PersisterConfig::default(),
//!     Arc::new(DefaultContextualizer),
//!     Vec::new(),
//! )
//! .unwrap();
//!
//! persister.migrate_up().unwrap();
//! assert!(!persister.migration_status().unwrap().has_pending());
//!
//! let network = persister.determine_network().unwrap();
//! let persister = persister.with_network_id(network.id);
//!
//! persister
//!     .cleanup_database(&OpContext::new(), Duration::ZERO, Duration::from_secs(3600), 100)
//!     .unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod migration;
pub mod mutation;
pub mod network;
pub mod persister;
pub mod record;
pub mod store;

pub use cleanup::{CleanupOrchestrator, CleanupReport, CleanupTarget, ExpiredRowsTarget};
pub use config::PersisterConfig;
pub use context::{
    CancelFlag, Contextualizer, DefaultContextualizer, OpContext, StaticContextualizer,
    TenantResolver,
};
pub use error::{PersistenceError, Result, ResultExt};
pub use migration::{MigrationSource, MigrationState, MigrationStatus, MigrationStatuses};
pub use mutation::MutationEngine;
pub use network::Network;
pub use persister::Persister;
pub use record::{Column, Node, Record, TableName};
pub use store::Store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
