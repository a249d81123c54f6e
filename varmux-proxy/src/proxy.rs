//! Front server assembly.
//!
//! [`VariantProxy`] owns the registry, the ranker, the capability union
//! probed from every backend, and the live session tables. A front
//! [`McpServer`] is minted per lifecycle mode: stateful (inner sessions
//! per front session) or stateless (one shared set of inner sessions for
//! the whole process, built eagerly).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::info;

use varmux_mcp::messages::{Implementation, ServerCapabilities};
use varmux_mcp::server::{McpServer, ServeHandle};
use varmux_mcp::transport::StdioTransport;
use varmux_mcp::McpResult;

use crate::backend::Backend;
use crate::capabilities;
use crate::rank::{default_rank, promote_stable_first, RankFn};
use crate::registry::{Registry, RegistryBuilder, VariantDescriptor, VariantHints};
use crate::session::{ProxyCore, VariantSessionLayer};

/// Current version of the varmux-proxy library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for [`VariantProxy`].
pub struct VariantProxyBuilder {
    info: Implementation,
    instructions: Option<String>,
    registry: RegistryBuilder,
    ranker: Option<Arc<RankFn>>,
}

impl VariantProxyBuilder {
    /// Register a variant with its backend and ranking priority.
    ///
    /// # Panics
    ///
    /// Panics on an empty or duplicate variant id (caller bug at
    /// construction time).
    pub fn variant(
        mut self,
        descriptor: VariantDescriptor,
        backend: Arc<dyn Backend>,
        priority: i64,
    ) -> Self {
        self.registry = self.registry.register(descriptor, backend, priority);
        self
    }

    /// Install a custom ranking function.
    ///
    /// Stable-first promotion still runs on top of whatever order the
    /// custom ranker produces.
    pub fn ranker<F>(mut self, ranker: F) -> Self
    where
        F: Fn(&VariantHints, &[VariantDescriptor]) -> Vec<VariantDescriptor>
            + Send
            + Sync
            + 'static,
    {
        self.ranker = Some(Arc::new(ranker));
        self
    }

    /// Set usage instructions returned from `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Probe every backend's capabilities and assemble the proxy.
    pub async fn build(self) -> McpResult<VariantProxy> {
        let registry = Arc::new(self.registry.build());

        // One transient probe per backend; the front advertises the union.
        let mut capability_sets = Vec::with_capacity(registry.len());
        for entry in registry.entries() {
            capability_sets.push(entry.backend.capabilities().await?);
        }
        let union = capabilities::union(&capability_sets);

        let ranker = self.ranker.unwrap_or_else(|| Arc::new(default_rank));
        let empty = VariantHints::default();
        let ranked = promote_stable_first(&empty, (ranker)(&empty, &registry.descriptors()));
        let default_order: Vec<String> = ranked.into_iter().map(|d| d.id).collect();

        info!(
            variants = registry.len(),
            default = default_order.first().map(String::as_str).unwrap_or(""),
            "variant proxy assembled"
        );

        Ok(VariantProxy {
            core: Arc::new(ProxyCore {
                registry,
                ranker,
                default_rank: Arc::new(default_order),
                sessions: DashMap::new(),
                ranks: DashMap::new(),
                shared: RwLock::new(None),
            }),
            info: self.info,
            instructions: self.instructions,
            union,
        })
    }
}

/// A variant-aware multiplexing proxy.
pub struct VariantProxy {
    pub(crate) core: Arc<ProxyCore>,
    info: Implementation,
    instructions: Option<String>,
    union: ServerCapabilities,
}

impl VariantProxy {
    /// Start a builder for a proxy with the given front-server identity.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> VariantProxyBuilder {
        VariantProxyBuilder {
            info: Implementation::new(name, version),
            instructions: None,
            registry: Registry::builder(),
            ranker: None,
        }
    }

    /// The unioned capabilities the front server advertises.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.union
    }

    /// Build a front server.
    ///
    /// Stateful mode opens inner sessions lazily, per front `initialize`.
    /// Stateless mode builds one shared set of inner sessions right here
    /// (notifications are dropped, there is no front session to forward
    /// them to) and reuses it for every request.
    pub async fn server(&self, stateless: bool) -> McpResult<McpServer> {
        if stateless {
            let mut shared = self.core.shared.write().await;
            if shared.is_none() {
                *shared = Some(Arc::new(self.core.connect_all(None).await?));
            }
        }

        let mut builder = McpServer::builder(self.info.name.clone(), self.info.version.clone())
            .capabilities(self.union.clone())
            .middleware(Arc::new(VariantSessionLayer::new(
                Arc::clone(&self.core),
                stateless,
            )));
        if let Some(instructions) = &self.instructions {
            builder = builder.instructions(instructions.clone());
        }
        Ok(builder.build())
    }

    /// Serve one stateful session over the process stdin/stdout pair.
    pub async fn serve_stdio(&self) -> McpResult<ServeHandle> {
        let server = self.server(false).await?;
        Ok(server.serve(Arc::new(StdioTransport::stdio())))
    }

    /// Number of live per-session states.
    pub fn active_sessions(&self) -> usize {
        self.core.sessions.len()
    }

    /// Tear down everything this proxy owns: the shared stateless state,
    /// every live per-session state, and the backends.
    pub async fn close(&self) {
        if let Some(state) = self.core.shared.write().await.take() {
            state.teardown().await;
        }

        let session_ids: Vec<String> = self
            .core
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in session_ids {
            if let Some((_, state)) = self.core.sessions.remove(&session_id) {
                state.teardown().await;
            }
        }
        self.core.ranks.clear();

        for entry in self.core.registry.entries() {
            entry.backend.close().await;
        }
        info!("variant proxy closed");
    }
}
