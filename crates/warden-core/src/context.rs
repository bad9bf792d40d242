//! Operation context and tenant resolution
//!
//! Every persistence call receives an [`OpContext`]. The context carries the
//! ambient values an operation may need: an optional tenant override for
//! control-plane calls acting on behalf of another network, and a cancellation
//! flag honoured by long-running jobs at their step boundaries.
//!
//! The effective tenant is decided by a [`Contextualizer`], consulted by the
//! [`TenantResolver`] bound to each persistence handle. Resolution never fails:
//! without an override the handle's own network is used.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a flag that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at the next step boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-operation context
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    network: Option<Uuid>,
    cancel: CancelFlag,
}

impl OpContext {
    /// Empty context: no override, never cancelled unless the flag is tripped
    pub fn new() -> Self {
        Self::default()
    }

    /// Act on behalf of another network
    pub fn with_network(mut self, nid: Uuid) -> Self {
        self.network = Some(nid);
        self
    }

    /// Share an existing cancellation flag
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// The network override carried by this context, if any
    pub fn network_override(&self) -> Option<Uuid> {
        self.network
    }

    /// The cancellation flag of this context
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Decides which network an operation acts upon
pub trait Contextualizer: Send + Sync {
    /// Return the network for `ctx`, falling back to the handle's own network
    fn network(&self, ctx: &OpContext, fallback: Uuid) -> Uuid;
}

/// Honours the override carried by the context, otherwise the fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextualizer;

impl Contextualizer for DefaultContextualizer {
    fn network(&self, ctx: &OpContext, fallback: Uuid) -> Uuid {
        ctx.network_override().unwrap_or(fallback)
    }
}

/// Ignores context overrides; every operation stays on the bound network
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticContextualizer;

impl Contextualizer for StaticContextualizer {
    fn network(&self, _ctx: &OpContext, fallback: Uuid) -> Uuid {
        fallback
    }
}

/// Resolves the effective tenant for an operation
#[derive(Clone)]
pub struct TenantResolver {
    nid: Uuid,
    contextualizer: Arc<dyn Contextualizer>,
}

impl TenantResolver {
    /// Bind a resolver to `nid`
    pub fn new(nid: Uuid, contextualizer: Arc<dyn Contextualizer>) -> Self {
        Self {
            nid,
            contextualizer,
        }
    }

    /// The network bound to the handle
    pub fn bound(&self) -> Uuid {
        self.nid
    }

    /// Same contextualizer, different bound network
    pub fn rebind(&self, nid: Uuid) -> Self {
        Self {
            nid,
            contextualizer: Arc::clone(&self.contextualizer),
        }
    }

    /// The network the operation must be scoped to
    pub fn resolve(&self, ctx: &OpContext) -> Uuid {
        self.contextualizer.network(ctx, self.nid)
    }
}

impl fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantResolver")
            .field("nid", &self.nid)
            .finish_non_exhaustive()
    }
}
