//! Persister: the tenant-scoped persistence handle
//!
//! Domain repositories receive a [`Persister`] and go through it for every
//! mutation. The handle bundles the shared store, the tenant it is bound to,
//! the merged migration box with its status cache, and the cleanup job.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cleanup::{CleanupOrchestrator, CleanupReport};
use crate::config::PersisterConfig;
use crate::context::{Contextualizer, OpContext, TenantResolver};
use crate::error::{Result, ResultExt};
use crate::migration::{
    core_migrations, DirectorySource, MigrationBox, MigrationSource, MigrationStatuses, StatusCache,
};
use crate::mutation::MutationEngine;
use crate::network::{network_migrations, Network, NetworkManager};
use crate::record::{Record, TableName};
use crate::store::Store;

/// Tenant-scoped persistence handle
#[derive(Debug, Clone)]
pub struct Persister {
    store: Store,
    resolver: TenantResolver,
    mutations: MutationEngine,
    migrations: Arc<MigrationBox>,
    status: StatusCache,
    cleanup: Arc<CleanupOrchestrator>,
    networks: NetworkManager,
}

impl Persister {
    /// Build a handle over `store`.
    ///
    /// Migration sources are composed here: the core schema, the network
    /// registry (unless disabled), every configured directory, then
    /// `extra_sources`. The handle is bound to `config.network_id`, or to the
    /// nil network until [`Persister::with_network_id`] is called.
    pub fn new(
        store: Store,
        config: &PersisterConfig,
        contextualizer: Arc<dyn Contextualizer>,
        extra_sources: Vec<Box<dyn MigrationSource>>,
    ) -> Result<Self> {
        let mut sources: Vec<Box<dyn MigrationSource>> = vec![Box::new(core_migrations())];
        if config.migrations.include_networks {
            sources.push(Box::new(network_migrations()));
        }
        for dir in &config.migrations.directories {
            sources.push(Box::new(DirectorySource::new(dir)));
        }
        sources.extend(extra_sources);

        let migrations = MigrationBox::new(store.clone(), &sources)
            .context("composing migration sources")?;
        let resolver = TenantResolver::new(config.network_id.unwrap_or_else(Uuid::nil), contextualizer);

        Ok(Self {
            mutations: MutationEngine::new(store.clone(), resolver.clone()),
            cleanup: Arc::new(CleanupOrchestrator::standard(&store)),
            networks: NetworkManager::new(store.clone()),
            migrations: Arc::new(migrations),
            status: StatusCache::new(),
            resolver,
            store,
        })
    }

    /// Open the configured database and build a handle over it
    pub fn open(config: &PersisterConfig, contextualizer: Arc<dyn Contextualizer>) -> Result<Self> {
        config.validate()?;
        let store = Store::open(&config.database)?;
        Self::new(store, config, contextualizer, Vec::new())
    }

    /// Replace the cleanup targets; the list is fixed once the handle is in use
    pub fn with_cleanup(mut self, orchestrator: CleanupOrchestrator) -> Self {
        self.cleanup = Arc::new(orchestrator);
        self
    }

    /// Network the operation acts upon
    pub fn network_id(&self, ctx: &OpContext) -> Uuid {
        self.resolver.resolve(ctx)
    }

    /// Copy of this handle bound to `nid`.
    ///
    /// The copy starts from this handle's cached migration status and caches
    /// independently afterwards.
    pub fn with_network_id(&self, nid: Uuid) -> Self {
        let resolver = self.resolver.rebind(nid);
        Self {
            mutations: MutationEngine::new(self.store.clone(), resolver.clone()),
            resolver,
            ..self.clone()
        }
    }

    /// Oldest registered network, created on first boot
    pub fn determine_network(&self) -> Result<Network> {
        self.networks.determine()
    }

    /// The underlying store
    pub fn connection(&self) -> &Store {
        &self.store
    }

    /// The merged migration box
    pub fn migrator(&self) -> &MigrationBox {
        &self.migrations
    }

    pub fn ping(&self) -> Result<()> {
        self.store.ping()
    }

    /// Release the connection; fails while other handles still share it
    pub fn close(self) -> Result<()> {
        let store = self.store.clone();
        drop(self);
        store.close()
    }

    /// Apply all pending migrations
    pub fn migrate_up(&self) -> Result<()> {
        self.migrations.up().map(|_| ())
    }

    /// Revert the `steps` most recent migrations (`0` reverts all)
    pub fn migrate_down(&self, steps: usize) -> Result<()> {
        self.migrations.down(steps).map(|_| ())
    }

    /// Migration status, served from cache once the store is fully migrated
    pub fn migration_status(&self) -> Result<MigrationStatuses> {
        if let Some(cached) = self.status.get() {
            return Ok(cached);
        }

        let status = self.migrations.status()?;
        if self.status.store_if_complete(&status) {
            tracing::debug!("Caching migration status ({} migrations)", status.len());
        }
        Ok(status)
    }

    /// Purge expired records of the resolved network across every cleanup target
    pub fn cleanup_database(
        &self,
        ctx: &OpContext,
        wait: Duration,
        older_than: Duration,
        batch_size: usize,
    ) -> Result<()> {
        self.cleanup_database_with_report(ctx, wait, older_than, batch_size)
            .map(|_| ())
    }

    /// Same as [`Persister::cleanup_database`], returning per-target counts
    pub fn cleanup_database_with_report(
        &self,
        ctx: &OpContext,
        wait: Duration,
        older_than: Duration,
        batch_size: usize,
    ) -> Result<CleanupReport> {
        let nid = self.network_id(ctx);
        self.cleanup.run_with_report(ctx, nid, wait, older_than, batch_size)
    }

    /// Update `record` within the resolved network; see [`MutationEngine::update`]
    pub fn update<R: Record>(&self, ctx: &OpContext, record: &R, columns: &[&str]) -> Result<()> {
        self.mutations.update(ctx, record, columns)
    }

    /// Delete row `id` within the resolved network; see [`MutationEngine::delete`]
    pub fn delete<T: TableName + ?Sized>(&self, ctx: &OpContext, model: &T, id: Uuid) -> Result<()> {
        self.mutations.delete(ctx, model, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DefaultContextualizer;

    fn persister() -> Persister {
        Persister::new(
            Store::open_in_memory().unwrap(),
            &PersisterConfig::default(),
            Arc::new(DefaultContextualizer),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_unbound_handle_uses_nil_network() {
        let p = persister();
        assert_eq!(p.network_id(&OpContext::new()), Uuid::nil());
    }

    #[test]
    fn test_with_network_id_leaves_original_untouched() {
        let p = persister();
        let nid = Uuid::new_v4();
        let bound = p.with_network_id(nid);

        assert_eq!(bound.network_id(&OpContext::new()), nid);
        assert_eq!(p.network_id(&OpContext::new()), Uuid::nil());
    }

    #[test]
    fn test_migrations_include_networks() {
        let p = persister();
        let names: Vec<_> = p.migrator().migrations().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["networks", "identities", "sessions", "selfservice_flows"]);
    }

    #[test]
    fn test_close_waits_for_last_handle() {
        let p = persister();
        let other = p.with_network_id(Uuid::new_v4());

        assert!(matches!(
            p.close(),
            Err(crate::PersistenceError::StoreInUse { .. })
        ));
        other.close().unwrap();
    }

    #[test]
    fn test_determine_then_bind() {
        let p = persister();
        p.migrate_up().unwrap();
        let network = p.determine_network().unwrap();
        let bound = p.with_network_id(network.id);
        assert_eq!(bound.network_id(&OpContext::new()), network.id);
        bound.ping().unwrap();
    }
}
