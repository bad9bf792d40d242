//! Retention cleanup
//!
//! A fixed, ordered list of targets is purged one after the other. Each target
//! deletes at most `batch_size` expired rows per run, and the orchestrator
//! pauses between targets to bound the sustained load on the shared store.
//! The first failing target aborts the run; what earlier targets deleted
//! stays deleted. Re-running is always safe: only rows expired strictly before
//! the cutoff are ever considered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::context::OpContext;
use crate::error::{PersistenceError, Result, StoreResultExt};
use crate::mutation::quote;
use crate::record::{uuid_value, ID_COLUMN, NID_COLUMN};
use crate::store::Store;

/// A named table plus its bounded "delete expired rows" hook
pub trait CleanupTarget: Send + Sync {
    /// Name reported in logs and errors
    fn name(&self) -> &str;

    /// Delete at most `batch_size` rows of network `nid` that expired strictly
    /// before `cutoff`, returning how many were deleted
    fn delete_expired(
        &self,
        ctx: &OpContext,
        nid: Uuid,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<usize>;
}

/// Deletes expired rows of one table, oldest first, scoped to one network
#[derive(Debug, Clone)]
pub struct ExpiredRowsTarget {
    name: String,
    table: String,
    expiry_column: String,
    store: Store,
}

impl ExpiredRowsTarget {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        expiry_column: impl Into<String>,
        store: Store,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            expiry_column: expiry_column.into(),
            store,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl CleanupTarget for ExpiredRowsTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn delete_expired(
        &self,
        _ctx: &OpContext,
        nid: Uuid,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {t} WHERE {id} IN (
                SELECT {id} FROM {t}
                WHERE {expiry} < ?1 AND {nid_col} = ?2
                ORDER BY {expiry} ASC
                LIMIT ?3
            )",
            t = quote(&self.table),
            id = quote(ID_COLUMN),
            nid_col = quote(NID_COLUMN),
            expiry = quote(&self.expiry_column),
        );

        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        self.store
            .lock()
            .execute(
                &sql,
                rusqlite::params![cutoff.timestamp_millis(), uuid_value(nid), limit],
            )
            .store_op(&format!("delete expired {}", self.table))
    }
}

/// Tables purged by the standard job, in the order they are processed
pub const STANDARD_TARGETS: &[(&str, &str)] = &[
    ("sessions", "sessions"),
    ("continuity containers", "continuity_containers"),
    ("login flows", "selfservice_login_flows"),
    ("recovery flows", "selfservice_recovery_flows"),
    ("registration flows", "selfservice_registration_flows"),
    ("settings flows", "selfservice_settings_flows"),
    ("verification flows", "selfservice_verification_flows"),
];

/// Rows deleted per target during one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub deleted: Vec<(String, usize)>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.deleted.iter().map(|(_, n)| n).sum()
    }
}

/// Runs the cleanup targets in their declared order
pub struct CleanupOrchestrator {
    targets: Vec<Box<dyn CleanupTarget>>,
}

impl CleanupOrchestrator {
    /// Orchestrator over `targets`; the order is kept as given
    pub fn new(targets: Vec<Box<dyn CleanupTarget>>) -> Self {
        Self { targets }
    }

    /// The seven targets of the identity backend, expiring on `expires_at_ms`
    pub fn standard(store: &Store) -> Self {
        let targets = STANDARD_TARGETS
            .iter()
            .map(|(name, table)| {
                Box::new(ExpiredRowsTarget::new(
                    *name,
                    *table,
                    "expires_at_ms",
                    store.clone(),
                )) as Box<dyn CleanupTarget>
            })
            .collect();
        Self::new(targets)
    }

    /// Names of the targets, in processing order
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name()).collect()
    }

    /// Purge records of network `nid` that expired more than `older_than` ago
    pub fn run(
        &self,
        ctx: &OpContext,
        nid: Uuid,
        wait: Duration,
        older_than: Duration,
        batch_size: usize,
    ) -> Result<()> {
        self.run_with_report(ctx, nid, wait, older_than, batch_size)
            .map(|_| ())
    }

    /// Same as [`CleanupOrchestrator::run`], returning per-target counts
    pub fn run_with_report(
        &self,
        ctx: &OpContext,
        nid: Uuid,
        wait: Duration,
        older_than: Duration,
        batch_size: usize,
    ) -> Result<CleanupReport> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| PersistenceError::InvalidConfig(format!("older_than: {e}")))?;
        let cutoff = Utc::now().checked_sub_signed(older_than).ok_or_else(|| {
            PersistenceError::InvalidConfig(
                "older_than reaches past the earliest representable timestamp".to_string(),
            )
        })?;
        tracing::info!("Cleaning up records older than {}", cutoff);

        let mut report = CleanupReport {
            cutoff: Some(cutoff),
            deleted: Vec::with_capacity(self.targets.len()),
        };

        for (i, target) in self.targets.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::warn!("Cleanup cancelled before {}", target.name());
                return Err(PersistenceError::Cancelled {
                    before: target.name().to_string(),
                });
            }

            tracing::info!("Cleaning up expired {}", target.name());
            let deleted = target
                .delete_expired(ctx, nid, cutoff, batch_size)
                .map_err(|e| {
                    tracing::warn!("Cleanup of {} failed, aborting run: {}", target.name(), e);
                    PersistenceError::CleanupStep {
                        target: target.name().to_string(),
                        source: Box::new(e),
                    }
                })?;
            tracing::debug!("Deleted {} expired {}", deleted, target.name());
            report.deleted.push((target.name().to_string(), deleted));

            if i + 1 < self.targets.len() && !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }

        tracing::info!(
            "Successfully cleaned up the latest batch ({} records). \
             This should be re-run periodically, to be sure that all expired data is purged.",
            report.total()
        );
        Ok(report)
    }
}

impl fmt::Debug for CleanupOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupOrchestrator")
            .field("targets", &self.target_names())
            .finish()
    }
}
