//! Per-session state and the front server's session middleware.
//!
//! The middleware wraps every inbound request on the front server. For
//! `initialize` it builds (stateful) or reuses (stateless) the inner
//! connections, ranks the variants against the client's hints, caches that
//! ranking as the session default, and enriches the response with the
//! variant extension block. Every routed method is handed to the
//! dispatcher against the located state; anything else passes through to
//! the front server's own router.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use varmux_mcp::messages::JsonRpcError;
use varmux_mcp::server::{Middleware, Next, RequestContext, ServerSession};
use varmux_mcp::McpResult;

use crate::backend::InnerConnection;
use crate::dispatch::Dispatcher;
use crate::rank::{promote_stable_first, RankFn};
use crate::registry::{Registry, VariantDescriptor, VariantHints};
use crate::VARIANTS_CAPABILITY_KEY;

/// The inner connections backing one front session (or, in stateless
/// mode, the whole process).
pub struct SessionState {
    connections: HashMap<String, InnerConnection>,
    // Subscription URI -> owning variant.
    subscriptions: Mutex<HashMap<String, String>>,
}

impl SessionState {
    pub(crate) fn new(connections: HashMap<String, InnerConnection>) -> Self {
        Self {
            connections,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// The connection for the given variant id, if registered.
    pub fn connection(&self, variant: &str) -> Option<&InnerConnection> {
        self.connections.get(variant)
    }

    /// Record which variant owns a subscription.
    pub async fn bind_subscription(&self, uri: String, variant: String) {
        self.subscriptions.lock().await.insert(uri, variant);
    }

    /// Forget a subscription binding. Unknown URIs are fine.
    pub async fn unbind_subscription(&self, uri: &str) {
        self.subscriptions.lock().await.remove(uri);
    }

    /// The variant that owns a subscription, if any.
    pub async fn subscription_variant(&self, uri: &str) -> Option<String> {
        self.subscriptions.lock().await.get(uri).cloned()
    }

    /// Tear down every inner connection. Idempotent per connection.
    pub async fn teardown(&self) {
        for connection in self.connections.values() {
            connection.close().await;
        }
        self.subscriptions.lock().await.clear();
    }
}

// Shared guts of one proxy: the registry, the ranker, and the live state
// tables. Session entries are written once at initialize and removed once
// at session close.
pub(crate) struct ProxyCore {
    pub(crate) registry: Arc<Registry>,
    pub(crate) ranker: Arc<RankFn>,
    pub(crate) default_rank: Arc<Vec<String>>,
    pub(crate) sessions: DashMap<String, Arc<SessionState>>,
    pub(crate) ranks: DashMap<String, Arc<Vec<String>>>,
    pub(crate) shared: RwLock<Option<Arc<SessionState>>>,
}

impl ProxyCore {
    // Rank with stable-first promotion applied on top.
    pub(crate) fn rank_descriptors(&self, hints: &VariantHints) -> Vec<VariantDescriptor> {
        let ranked = (self.ranker)(hints, &self.registry.descriptors());
        promote_stable_first(hints, ranked)
    }

    // One connect per variant; on any failure the already-open connections
    // are closed and the whole operation fails.
    pub(crate) async fn connect_all(
        &self,
        front: Option<Arc<ServerSession>>,
    ) -> McpResult<SessionState> {
        let mut connections = HashMap::new();
        for entry in self.registry.entries() {
            match entry.backend.connect(&entry.descriptor, front.clone()).await {
                Ok(connection) => {
                    connections.insert(entry.descriptor.id.clone(), connection);
                }
                Err(e) => {
                    warn!(
                        variant = %entry.descriptor.id,
                        error = %e,
                        "backend connect failed, rolling back"
                    );
                    for connection in connections.values() {
                        connection.close().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(SessionState::new(connections))
    }
}

/// The front server's sole middleware.
pub struct VariantSessionLayer {
    core: Arc<ProxyCore>,
    stateless: bool,
}

impl VariantSessionLayer {
    pub(crate) fn new(core: Arc<ProxyCore>, stateless: bool) -> Self {
        Self { core, stateless }
    }

    async fn state_for(&self, session_id: &str) -> Option<Arc<SessionState>> {
        if self.stateless {
            self.core.shared.read().await.clone()
        } else {
            self.core
                .sessions
                .get(session_id)
                .map(|entry| Arc::clone(entry.value()))
        }
    }

    fn rank_for(&self, session_id: &str) -> Arc<Vec<String>> {
        self.core
            .ranks
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::clone(&self.core.default_rank))
    }

    async fn handle_initialize(
        &self,
        ctx: RequestContext,
        next: Next<'_>,
    ) -> Result<Value, JsonRpcError> {
        let hints = extract_hints(ctx.params.as_ref());
        let session = Arc::clone(&ctx.session);

        let mut baseline = next.run(ctx).await?;

        if !self.stateless {
            let state = self
                .core
                .connect_all(Some(Arc::clone(&session)))
                .await
                .map_err(|e| {
                    JsonRpcError::internal_error(format!("backend connect failed: {e}"))
                })?;
            let replaced = self
                .core
                .sessions
                .insert(session.id().to_string(), Arc::new(state));
            if let Some(previous) = replaced {
                // A repeated initialize on the same session; retire the
                // connections it no longer owns.
                tokio::spawn(async move { previous.teardown().await });
            }
        }

        // The ranking computed here is the session default for every
        // later request that carries no selector.
        let ranked = self.core.rank_descriptors(&hints);
        let rank_ids: Vec<String> = ranked.iter().map(|d| d.id.clone()).collect();
        self.core
            .ranks
            .insert(session.id().to_string(), Arc::new(rank_ids));

        self.watch_session_close(&session);

        inject_variant_block(&mut baseline, &ranked, self.core.registry.len())?;
        debug!(
            session = %session.id(),
            default = ranked.first().map(|d| d.id.as_str()).unwrap_or(""),
            "front session initialized"
        );
        Ok(baseline)
    }

    // Destroy per-session state when the front session ends.
    fn watch_session_close(&self, session: &Arc<ServerSession>) {
        let core = Arc::clone(&self.core);
        let session_id = session.id().to_string();
        let token = session.cancelled();
        let stateful = !self.stateless;
        tokio::spawn(async move {
            token.cancelled().await;
            core.ranks.remove(&session_id);
            if stateful {
                if let Some((_, state)) = core.sessions.remove(&session_id) {
                    state.teardown().await;
                    debug!(session = %session_id, "session state torn down");
                }
            }
        });
    }
}

#[async_trait]
impl Middleware for VariantSessionLayer {
    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Value, JsonRpcError> {
        match ctx.method.as_str() {
            "initialize" => self.handle_initialize(ctx, next).await,
            "tools/list"
            | "tools/call"
            | "resources/list"
            | "resources/templates/list"
            | "resources/read"
            | "resources/subscribe"
            | "resources/unsubscribe"
            | "prompts/list"
            | "prompts/get"
            | "completion/complete" => match self.state_for(ctx.session.id()).await {
                Some(state) => {
                    let rank = self.rank_for(ctx.session.id());
                    Dispatcher::new(&state, &rank).dispatch(&ctx).await
                }
                None => next.run(ctx).await,
            },
            _ => next.run(ctx).await,
        }
    }
}

// Pull variantHints out of
// params.capabilities.experimental["io.modelcontextprotocol/server-variants"].
// Malformed hints degrade to empty with a warning.
fn extract_hints(params: Option<&Value>) -> VariantHints {
    let Some(raw) = params
        .and_then(|p| p.get("capabilities"))
        .and_then(|c| c.get("experimental"))
        .and_then(|e| e.get(VARIANTS_CAPABILITY_KEY))
        .and_then(|v| v.get("variantHints"))
    else {
        return VariantHints::default();
    };
    match serde_json::from_value(raw.clone()) {
        Ok(hints) => hints,
        Err(e) => {
            warn!(error = %e, "ignoring malformed variant hints");
            VariantHints::default()
        }
    }
}

// Insert the extension block under
// result.capabilities.experimental["io.modelcontextprotocol/server-variants"].
fn inject_variant_block(
    result: &mut Value,
    ranked: &[VariantDescriptor],
    registered: usize,
) -> Result<(), JsonRpcError> {
    let available = serde_json::to_value(ranked)
        .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
    let block = json!({
        "availableVariants": available,
        "moreVariantsAvailable": ranked.len() < registered,
    });

    let capabilities = ensure_object(result, "capabilities")?;
    let experimental = ensure_object(capabilities, "experimental")?;
    experimental
        .as_object_mut()
        .map(|map| map.insert(VARIANTS_CAPABILITY_KEY.to_string(), block));
    Ok(())
}

fn ensure_object<'a>(value: &'a mut Value, key: &str) -> Result<&'a mut Value, JsonRpcError> {
    let map = value
        .as_object_mut()
        .ok_or_else(|| JsonRpcError::internal_error("initialize result is not an object"))?;
    Ok(map.entry(key.to_string()).or_insert_with(|| json!({})))
}
