//! Record capabilities
//!
//! Domain records opt into the generic mutation primitives by implementing
//! these traits. Instead of deriving column sets at runtime, each record type
//! declares a static descriptor table of its columns and hands out values by
//! column name.

use rusqlite::types::Value;
use uuid::Uuid;

use crate::context::OpContext;

/// Primary key column of every managed table
pub const ID_COLUMN: &str = "id";

/// Tenant column of every managed table
pub const NID_COLUMN: &str = "nid";

/// A persisted row addressed by `(id, nid)`
pub trait Node {
    /// Globally unique identifier of the row within its table
    fn id(&self) -> Uuid;

    /// Network (tenant) owning the row
    fn nid(&self) -> Uuid;
}

/// Context-aware table naming
pub trait TableName {
    /// Table holding this kind of record for the given context
    fn table_name(&self, ctx: &OpContext) -> String;
}

/// One entry of a record's column descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name as it appears in SQL
    pub name: &'static str,
    /// Whether updates may write this column
    pub writable: bool,
}

impl Column {
    /// A column updates may write
    pub const fn writable(name: &'static str) -> Self {
        Self {
            name,
            writable: true,
        }
    }

    /// A column updates never touch (e.g. `created_at_ms`)
    pub const fn read_only(name: &'static str) -> Self {
        Self {
            name,
            writable: false,
        }
    }

    /// Key columns are addressing only and never part of a SET clause
    pub fn is_key(&self) -> bool {
        self.name == ID_COLUMN || self.name == NID_COLUMN
    }
}

/// A record eligible for generic updates
pub trait Record: Node + TableName {
    /// Every column of the table, keys included
    fn columns() -> &'static [Column];

    /// Current value of `column`, or `None` for unknown names
    fn value(&self, column: &str) -> Option<Value>;
}

/// Binds a UUID the way every managed table stores it
pub fn uuid_value(id: Uuid) -> Value {
    Value::Text(id.hyphenated().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_columns() {
        assert!(Column::writable("id").is_key());
        assert!(Column::writable("nid").is_key());
        assert!(!Column::writable("traits").is_key());
        assert!(!Column::read_only("created_at_ms").writable);
    }

    #[test]
    fn test_uuid_value_is_hyphenated_text() {
        let id = Uuid::new_v4();
        assert_eq!(uuid_value(id), Value::Text(id.to_string()));
    }
}
