//! Schema migrations
//!
//! ```text
//! core (embedded) ─┐
//! networks ────────┼──► merge by version ──► MigrationBox ──► up / down / status
//! directories ─────┘                                   │
//!                                                      └──► StatusCache (fully migrated only)
//! ```

pub mod migrator;
pub mod source;
pub mod status;

pub use migrator::{merge_sources, MigrationBox};
pub use source::{core_migrations, DirectorySource, EmbeddedMigration, EmbeddedSource, Migration, MigrationSource};
pub use status::{MigrationState, MigrationStatus, MigrationStatuses, StatusCache};
