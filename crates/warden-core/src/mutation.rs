//! Tenant-scoped mutation primitives
//!
//! Every statement issued here is scoped by `id = ? AND nid = ?`, where `nid`
//! is the tenant resolved for the operation. A predicate matching nothing is
//! reported as [`PersistenceError::NotFound`], whether the row is missing or
//! belongs to another network.
//!
//! Update runs an existence check followed by the write, as two separate
//! statements outside any transaction. A concurrent delete landing between the
//! two makes the write affect zero rows; that outcome is logged and returned
//! as success.

use rusqlite::types::Value;
use rusqlite::ToSql;
use uuid::Uuid;

use crate::context::{OpContext, TenantResolver};
use crate::error::{PersistenceError, Result, StoreResultExt};
use crate::record::{uuid_value, Column, Record, TableName, ID_COLUMN, NID_COLUMN};
use crate::store::Store;

/// Quote an SQL identifier
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Generic update/delete over any record type
#[derive(Debug, Clone)]
pub struct MutationEngine {
    store: Store,
    resolver: TenantResolver,
}

impl MutationEngine {
    /// Engine issuing statements against `store` for the tenant chosen by `resolver`
    pub fn new(store: Store, resolver: TenantResolver) -> Self {
        Self { store, resolver }
    }

    /// Update an existing row.
    ///
    /// With an empty `columns` slice every writable, non-key column of the
    /// record's descriptor is written; otherwise exactly the named columns.
    pub fn update<R: Record>(&self, ctx: &OpContext, record: &R, columns: &[&str]) -> Result<()> {
        let nid = self.resolver.resolve(ctx);
        let table = record.table_name(ctx);
        let id = record.id();
        let writable = writable_columns::<R>(&table, columns)?;

        let count: i64 = self
            .store
            .lock()
            .query_row(
                &format!(
                    "SELECT COUNT({id_col}) FROM {t} WHERE {id_col} = ?1 AND {nid_col} = ?2",
                    t = quote(&table),
                    id_col = quote(ID_COLUMN),
                    nid_col = quote(NID_COLUMN),
                ),
                [uuid_value(id), uuid_value(nid)],
                |row| row.get(0),
            )
            .store_op(&format!("update {table}: existence check for {id}"))?;
        if count == 0 {
            return Err(PersistenceError::NotFound { table });
        }

        if writable.is_empty() {
            tracing::debug!("Nothing to write for {} in {}", id, table);
            return Ok(());
        }

        let mut bound: Vec<(String, Value)> = Vec::with_capacity(writable.len() + 2);
        for column in &writable {
            let value = record
                .value(column.name)
                .ok_or_else(|| PersistenceError::UnknownColumn {
                    table: table.clone(),
                    column: column.name.to_string(),
                })?;
            bound.push((format!(":{}", column.name), value));
        }
        bound.push((format!(":{ID_COLUMN}"), uuid_value(id)));
        bound.push((format!(":{NID_COLUMN}"), uuid_value(nid)));

        let assignments = writable
            .iter()
            .map(|c| format!("{} = :{}", quote(c.name), c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {t} SET {assignments} WHERE {id_col} = :{ID_COLUMN} AND {nid_col} = :{NID_COLUMN}",
            t = quote(&table),
            id_col = quote(ID_COLUMN),
            nid_col = quote(NID_COLUMN),
        );
        let params: Vec<(&str, &dyn ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        let affected = self
            .store
            .lock()
            .execute(&sql, params.as_slice())
            .store_op(&format!("update {table}: write {id}"))?;
        if affected == 0 {
            tracing::warn!(
                "Row {} in {} vanished between existence check and update",
                id,
                table
            );
        }
        Ok(())
    }

    /// Delete the row `id` of the table named by `model`.
    ///
    /// One statement: the affected-row count doubles as the existence check.
    pub fn delete<T: TableName + ?Sized>(&self, ctx: &OpContext, model: &T, id: Uuid) -> Result<()> {
        let nid = self.resolver.resolve(ctx);
        let table = model.table_name(ctx);

        let affected = self
            .store
            .lock()
            .execute(
                &format!(
                    "DELETE FROM {t} WHERE {id_col} = ?1 AND {nid_col} = ?2",
                    t = quote(&table),
                    id_col = quote(ID_COLUMN),
                    nid_col = quote(NID_COLUMN),
                ),
                [uuid_value(id), uuid_value(nid)],
            )
            .store_op(&format!("delete {table}: {id}"))?;
        if affected == 0 {
            return Err(PersistenceError::NotFound { table });
        }
        Ok(())
    }
}

/// Columns an update will write, in descriptor order
fn writable_columns<R: Record>(table: &str, requested: &[&str]) -> Result<Vec<Column>> {
    let descriptor = R::columns();
    if requested.is_empty() {
        return Ok(descriptor
            .iter()
            .filter(|c| c.writable && !c.is_key())
            .copied()
            .collect());
    }

    for name in requested {
        let known = descriptor
            .iter()
            .any(|c| c.name == *name && c.writable && !c.is_key());
        if !known {
            return Err(PersistenceError::UnknownColumn {
                table: table.to_string(),
                column: (*name).to_string(),
            });
        }
    }
    Ok(descriptor
        .iter()
        .filter(|c| requested.contains(&c.name))
        .copied()
        .collect())
}
