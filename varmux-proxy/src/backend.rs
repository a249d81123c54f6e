//! Backend abstraction: how the proxy reaches a variant's server.
//!
//! The proxy core depends only on the [`Backend`] trait. The reference
//! implementation is in-memory: a cross-wired transport pair between the
//! inner server and a proxy-side client session. Remote backends (HTTP,
//! spawned processes) slot in behind the same trait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use varmux_mcp::client::{ClientOptions, ClientSession, NotificationHandler};
use varmux_mcp::messages::{Implementation, ServerCapabilities};
use varmux_mcp::server::{McpServer, ServeHandle, ServerSession};
use varmux_mcp::transport::memory;
use varmux_mcp::{McpError, McpResult};

use crate::notify::NotificationBridge;
use crate::registry::VariantDescriptor;

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A live inner session for one variant, plus its teardown.
pub struct InnerConnection {
    /// The client-side session against the variant's server
    pub session: Arc<ClientSession>,
    cleanup: Mutex<Option<CleanupFn>>,
}

impl InnerConnection {
    /// Bundle a session with its teardown. The teardown runs at most once,
    /// whichever exit path triggers it.
    pub fn new(
        session: Arc<ClientSession>,
        cleanup: impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    ) -> Self {
        Self {
            session,
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        }
    }

    /// Tear the connection down. Idempotent.
    pub async fn close(&self) {
        let cleanup = self.cleanup.lock().await.take();
        if let Some(cleanup) = cleanup {
            cleanup().await;
        }
    }
}

/// Opens sessions against one variant's server.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read the inner server's advertised capabilities through a transient
    /// session. Invoked once per backend at proxy assembly time.
    async fn capabilities(&self) -> McpResult<ServerCapabilities>;

    /// Open a durable inner session.
    ///
    /// When `front` is given, progress and logging notifications from the
    /// inner server are forwarded onto it with the variant id stamped into
    /// `_meta`; without it (stateless assembly) notifications are dropped.
    async fn connect(
        &self,
        descriptor: &VariantDescriptor,
        front: Option<Arc<ServerSession>>,
    ) -> McpResult<InnerConnection>;

    /// Release backend-level resources.
    async fn close(&self);
}

/// The reference backend: the inner server lives in-process and sessions
/// run over an in-memory transport pair.
pub struct InMemoryBackend {
    server: McpServer,
    client_info: Implementation,
    open: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Wrap an in-process server.
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            client_info: Implementation::new("varmux-proxy", crate::proxy::VERSION),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of currently open durable connections.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_session(
        &self,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> McpResult<(Arc<ClientSession>, ServeHandle)> {
        let (client_end, server_end) = memory::pair();
        let serving = self.server.serve(Arc::new(server_end));

        let options = ClientOptions {
            info: self.client_info.clone(),
            handler,
            ..Default::default()
        };
        match ClientSession::connect(Arc::new(client_end), options).await {
            Ok(session) => Ok((session, serving)),
            Err(e) => {
                serving.close();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn capabilities(&self) -> McpResult<ServerCapabilities> {
        let (session, serving) = self.open_session(None).await?;
        let capabilities = session
            .initialize_result()
            .map(|result| result.capabilities.clone())
            .ok_or_else(|| McpError::internal("probe session has no initialize result"));
        session.close().await;
        serving.close();
        capabilities
    }

    async fn connect(
        &self,
        descriptor: &VariantDescriptor,
        front: Option<Arc<ServerSession>>,
    ) -> McpResult<InnerConnection> {
        let bridge: Arc<dyn NotificationHandler> =
            Arc::new(NotificationBridge::new(descriptor.id.clone(), front));
        let (session, serving) = self.open_session(Some(bridge)).await?;
        debug!(variant = %descriptor.id, "inner session opened");

        self.open.fetch_add(1, Ordering::SeqCst);
        let open = Arc::clone(&self.open);
        let cleanup_session = Arc::clone(&session);
        let variant = descriptor.id.clone();
        Ok(InnerConnection::new(session, move || {
            Box::pin(async move {
                cleanup_session.close().await;
                serving.close();
                open.fetch_sub(1, Ordering::SeqCst);
                debug!(variant = %variant, "inner session closed");
            })
        }))
    }

    async fn close(&self) {}
}
