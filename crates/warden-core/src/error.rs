//! Error types for Warden Core
//!
//! Every operation in this crate returns [`PersistenceError`]. Nothing is retried
//! here: the first failure is handed back to the caller with enough context to
//! diagnose it, and re-invoking after remediation is always safe.

use thiserror::Error;

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Direction of a migration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Applying a pending migration
    Up,
    /// Reverting an applied migration
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Main error type for persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The `(id, nid)` predicate matched no row.
    ///
    /// Returned identically when the row is missing and when it belongs to
    /// another tenant, so callers cannot probe other tenants' data.
    #[error("Unable to locate the resource in {table}")]
    NotFound { table: String },

    /// Lower-level failure from the store
    #[error("Store error during {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Applying or reverting a migration step failed
    #[error("Migration {version} ({name}) failed while migrating {direction}: {source}")]
    Migration {
        version: u64,
        name: String,
        direction: Direction,
        #[source]
        source: rusqlite::Error,
    },

    /// A cleanup target's hook failed; the remaining targets were skipped
    #[error("Cleanup of {target} failed: {source}")]
    CleanupStep {
        target: String,
        #[source]
        source: Box<PersistenceError>,
    },

    /// Two migration sources declared the same version
    #[error("Migration version {version} declared twice: {first} and {second}")]
    DuplicateMigration {
        version: u64,
        first: String,
        second: String,
    },

    /// A recorded migration is no longer declared by any source
    #[error("Applied migration {0} is not declared by any migration source")]
    UndeclaredMigration(u64),

    /// An explicit update column is not part of the record's descriptor
    #[error("Column {column} is not a writable column of {table}")]
    UnknownColumn { table: String, column: String },

    /// A migration file on disk does not follow the naming convention
    #[error("Invalid migration file {0}")]
    InvalidMigrationFile(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store cannot be closed while other handles still share it
    #[error("Store is still shared by {handles} other handle(s)")]
    StoreInUse { handles: usize },

    /// Cancellation observed at a step boundary
    #[error("Operation cancelled before {before}")]
    Cancelled { before: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse errors
    #[error("Configuration parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<PersistenceError>,
    },
}

impl PersistenceError {
    /// Wrap a store error with the name of the operation that raised it
    pub fn store(operation: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Store {
            operation: operation.into(),
            source,
        }
    }

    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when the error, or any error it wraps, is [`PersistenceError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::WithContext { source, .. } | Self::CleanupStep { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Maps a raw rusqlite result into a [`PersistenceError::Store`]
pub(crate) trait StoreResultExt<T> {
    fn store_op(self, operation: &str) -> Result<T>;
}

impl<T> StoreResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn store_op(self, operation: &str) -> Result<T> {
        self.map_err(|e| PersistenceError::store(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_hides_tenant() {
        let err = PersistenceError::NotFound {
            table: "identities".to_string(),
        };
        assert_eq!(err.to_string(), "Unable to locate the resource in identities");
    }

    #[test]
    fn test_is_not_found_through_context() {
        let err = PersistenceError::NotFound {
            table: "sessions".to_string(),
        }
        .context("persistence.sql.delete");

        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("persistence.sql.delete"));
        assert!(!PersistenceError::InvalidConfig("x".into()).is_not_found());
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(PersistenceError::InvalidConfig("batch_size".into()));
        let result = result.with_context(|| "loading config".to_string());

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("loading config"));
    }

    #[test]
    fn test_store_op_wraps_operation() {
        let raw: std::result::Result<(), rusqlite::Error> =
            Err(rusqlite::Error::QueryReturnedNoRows);
        let err = raw.store_op("persistence.sql.update").unwrap_err();
        assert!(matches!(err, PersistenceError::Store { ref operation, .. } if operation == "persistence.sql.update"));
    }
}
