//! MCP server runtime.
//!
//! [`McpServer`] hosts a set of registered tools, resources, resource
//! templates and prompts behind the standard MCP method surface, advertises
//! capabilities during `initialize`, and lets receiving middleware wrap
//! every inbound request. One server instance serves any number of
//! concurrent sessions: each call to [`McpServer::serve`] (byte transports)
//! or [`McpServer::open_session`] (request-at-a-time adapters such as
//! HTTP) creates an isolated [`ServerSession`].
//!
//! The middleware chain is the extension point the varmux proxy hangs off:
//! its session layer intercepts routed methods before they ever reach the
//! built-in router.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{McpError, McpResult, TransportError};
use crate::messages::{
    CallToolRequest, CallToolResult, CompleteRequest, CompleteResult, CompletionsCapability,
    GetPromptRequest, GetPromptResult, Implementation, InitializeRequest, InitializeResult,
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListPromptsRequest, ListPromptsResult, ListResourceTemplatesRequest,
    ListResourceTemplatesResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, LoggingMessageNotification, ProgressNotification, Prompt, PromptsCapability,
    ProtocolVersion, ReadResourceRequest, ReadResourceResult, Resource, ResourceTemplate,
    ResourcesCapability, ServerCapabilities, SubscribeRequest, Tool, ToolsCapability,
    UnsubscribeRequest,
};
use crate::transport::Transport;

type ToolHandler = Arc<
    dyn Fn(CallToolRequest, Arc<ServerSession>) -> BoxFuture<'static, Result<CallToolResult, JsonRpcError>>
        + Send
        + Sync,
>;
type ResourceHandler = Arc<
    dyn Fn(
            ReadResourceRequest,
            Arc<ServerSession>,
        ) -> BoxFuture<'static, Result<ReadResourceResult, JsonRpcError>>
        + Send
        + Sync,
>;
type PromptHandler = Arc<
    dyn Fn(GetPromptRequest, Arc<ServerSession>) -> BoxFuture<'static, Result<GetPromptResult, JsonRpcError>>
        + Send
        + Sync,
>;
type CompletionHandler = Arc<
    dyn Fn(CompleteRequest, Arc<ServerSession>) -> BoxFuture<'static, Result<CompleteResult, JsonRpcError>>
        + Send
        + Sync,
>;

/// A request as seen by receiving middleware.
#[derive(Clone)]
pub struct RequestContext {
    /// The JSON-RPC method name
    pub method: String,

    /// The raw request params
    pub params: Option<Value>,

    /// The session the request arrived on
    pub session: Arc<ServerSession>,
}

/// Receiving middleware: wraps every inbound request, including
/// `initialize`.
///
/// A middleware either produces the result itself or delegates to
/// [`Next::run`], which invokes the remaining chain and finally the
/// server's built-in router.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle one inbound request.
    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Value, JsonRpcError>;
}

/// The remainder of the middleware chain for one request.
pub struct Next<'a> {
    inner: &'a ServerInner,
    rest: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    /// Invoke the rest of the chain, ending at the built-in router.
    pub async fn run(self, ctx: RequestContext) -> Result<Value, JsonRpcError> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        ctx,
                        Next {
                            inner: self.inner,
                            rest,
                        },
                    )
                    .await
            }
            None => self.inner.dispatch(ctx).await,
        }
    }
}

/// One server-side MCP session.
///
/// Request handlers and middleware reach the session through
/// [`RequestContext::session`]; adapters keep it to emit notifications and
/// to observe teardown.
pub struct ServerSession {
    id: String,
    outbox: mpsc::UnboundedSender<JsonRpcNotification>,
    cancel: CancellationToken,
    subscriptions: Mutex<HashSet<String>>,
}

impl ServerSession {
    fn new(outbox: mpsc::UnboundedSender<JsonRpcNotification>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            outbox,
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    /// Unique identifier of this session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Emit `notifications/progress` to the client.
    pub fn send_progress(&self, notification: ProgressNotification) -> McpResult<()> {
        self.notify("notifications/progress", serde_json::to_value(notification)?)
    }

    /// Emit `notifications/message` to the client.
    pub fn send_logging(&self, notification: LoggingMessageNotification) -> McpResult<()> {
        self.notify("notifications/message", serde_json::to_value(notification)?)
    }

    /// A token that fires when the session ends (transport EOF or
    /// [`ServerSession::close`]).
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// End the session. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn notify(&self, method: &str, params: Value) -> McpResult<()> {
        if self.is_closed() {
            return Err(TransportError::closed("session", "session closed").into());
        }
        self.outbox
            .send(JsonRpcNotification::new(method, params))
            .map_err(|_| TransportError::closed("session", "notification outbox dropped").into())
    }

    pub(crate) async fn track_subscription(&self, uri: String) {
        self.subscriptions.lock().await.insert(uri);
    }

    pub(crate) async fn drop_subscription(&self, uri: &str) {
        self.subscriptions.lock().await.remove(uri);
    }
}

/// Builder for [`McpServer`].
pub struct McpServerBuilder {
    info: Implementation,
    instructions: Option<String>,
    capabilities: Option<ServerCapabilities>,
    page_size: Option<usize>,
    middleware: Vec<Arc<dyn Middleware>>,
    tools: Vec<(Tool, ToolHandler)>,
    resources: Vec<(Resource, ResourceHandler)>,
    templates: Vec<ResourceTemplate>,
    prompts: Vec<(Prompt, PromptHandler)>,
    completion: Option<CompletionHandler>,
}

impl McpServerBuilder {
    /// Start a builder for a server with the given identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            instructions: None,
            capabilities: None,
            page_size: None,
            middleware: Vec::new(),
            tools: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
            prompts: Vec::new(),
            completion: None,
        }
    }

    /// Set usage instructions returned from `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Advertise exactly these capabilities instead of deriving them from
    /// the registered handlers.
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Paginate list results in pages of `size` items.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Append receiving middleware. Middleware run in registration order.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Register a tool with its call handler.
    pub fn tool<F, Fut>(mut self, tool: Tool, handler: F) -> Self
    where
        F: Fn(CallToolRequest, Arc<ServerSession>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallToolResult, JsonRpcError>> + Send + 'static,
    {
        self.tools
            .push((tool, Arc::new(move |req, session| Box::pin(handler(req, session)))));
        self
    }

    /// Register a resource with its read handler.
    pub fn resource<F, Fut>(mut self, resource: Resource, handler: F) -> Self
    where
        F: Fn(ReadResourceRequest, Arc<ServerSession>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ReadResourceResult, JsonRpcError>> + Send + 'static,
    {
        self.resources
            .push((resource, Arc::new(move |req, session| Box::pin(handler(req, session)))));
        self
    }

    /// Register a resource template (listing only).
    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Register a prompt with its expansion handler.
    pub fn prompt<F, Fut>(mut self, prompt: Prompt, handler: F) -> Self
    where
        F: Fn(GetPromptRequest, Arc<ServerSession>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<GetPromptResult, JsonRpcError>> + Send + 'static,
    {
        self.prompts
            .push((prompt, Arc::new(move |req, session| Box::pin(handler(req, session)))));
        self
    }

    /// Register the `completion/complete` handler.
    pub fn completion<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CompleteRequest, Arc<ServerSession>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CompleteResult, JsonRpcError>> + Send + 'static,
    {
        self.completion = Some(Arc::new(move |req, session| Box::pin(handler(req, session))));
        self
    }

    /// Finish the builder.
    pub fn build(self) -> McpServer {
        let capabilities = self
            .capabilities
            .clone()
            .unwrap_or_else(|| self.derived_capabilities());
        McpServer {
            inner: Arc::new(ServerInner {
                info: self.info,
                instructions: self.instructions,
                capabilities,
                page_size: self.page_size,
                middleware: self.middleware,
                tools: self.tools,
                resources: self.resources,
                templates: self.templates,
                prompts: self.prompts,
                completion: self.completion,
            }),
        }
    }

    fn derived_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: (!self.tools.is_empty()).then(|| ToolsCapability {
                list_changed: Some(false),
            }),
            resources: (!self.resources.is_empty() || !self.templates.is_empty()).then(|| {
                ResourcesCapability {
                    subscribe: Some(!self.resources.is_empty()),
                    list_changed: Some(false),
                }
            }),
            prompts: (!self.prompts.is_empty()).then(|| PromptsCapability {
                list_changed: Some(false),
            }),
            completions: self.completion.as_ref().map(|_| CompletionsCapability::default()),
            logging: None,
            experimental: None,
        }
    }
}

/// An MCP server: registered handlers, advertised capabilities and a
/// middleware chain, shareable across sessions.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl McpServer {
    /// Start a builder for a server with the given identity.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name, version)
    }

    /// The capabilities this server advertises during `initialize`.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.inner.capabilities
    }

    /// The server's implementation info.
    pub fn info(&self) -> &Implementation {
        &self.inner.info
    }

    /// Open a session without a byte transport.
    ///
    /// The returned handle delivers requests one at a time and exposes the
    /// session's notification outbox; the HTTP adapter is built on this.
    pub fn open_session(&self) -> SessionHandle {
        let (handle, receiver) = self.session_parts();
        *handle
            .notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(receiver);
        handle
    }

    /// Serve one session over a byte transport.
    ///
    /// Spawns the session pumps and returns immediately. The session ends
    /// when the transport reaches end-of-stream or the handle is closed.
    pub fn serve(&self, transport: Arc<dyn Transport>) -> ServeHandle {
        let (handle, mut notifications) = self.session_parts();
        let handle = Arc::new(handle);
        let session = handle.session();

        // Writer pump: session outbox -> transport.
        {
            let transport = Arc::clone(&transport);
            let cancel = session.cancelled();
            tokio::spawn(async move {
                loop {
                    let notification = tokio::select! {
                        _ = cancel.cancelled() => break,
                        n = notifications.recv() => n,
                    };
                    match notification {
                        Some(notification) => {
                            if let Err(e) = transport
                                .send(JsonRpcMessage::Notification(notification))
                                .await
                            {
                                debug!(error = %e, "notification send failed");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            });
        }

        // Reader pump: transport -> handlers, one spawned task per request.
        {
            let handle = Arc::clone(&handle);
            let session = Arc::clone(session);
            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = session.cancel.cancelled() => break,
                        received = transport.recv() => received,
                    };
                    match received {
                        Ok(Some(JsonRpcMessage::Request(request))) => {
                            let handle = Arc::clone(&handle);
                            let transport = Arc::clone(&transport);
                            tokio::spawn(async move {
                                let response = handle.handle_request(request).await;
                                if let Err(e) =
                                    transport.send(JsonRpcMessage::Response(response)).await
                                {
                                    debug!(error = %e, "response send failed");
                                }
                            });
                        }
                        Ok(Some(JsonRpcMessage::Notification(notification))) => {
                            handle.handle_notification(notification).await;
                        }
                        Ok(Some(JsonRpcMessage::Response(_))) => {
                            warn!("unexpected response message on server session");
                        }
                        Ok(None) => break,
                        Err(McpError::Transport(TransportError::Framing { reason, .. })) => {
                            warn!(%reason, "skipping unparseable message");
                        }
                        Err(e) => {
                            warn!(error = %e, "receive failed, ending session");
                            break;
                        }
                    }
                }
                session.close();
                transport.close().await;
                debug!(session = %session.id(), "server session ended");
            });
        }

        ServeHandle {
            session: Arc::clone(handle.session()),
        }
    }

    fn session_parts(&self) -> (SessionHandle, mpsc::UnboundedReceiver<JsonRpcNotification>) {
        let (outbox, receiver) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            inner: Arc::clone(&self.inner),
            session: Arc::new(ServerSession::new(outbox)),
            notifications: std::sync::Mutex::new(None),
        };
        (handle, receiver)
    }
}

/// Handle to a session created by [`McpServer::serve`].
pub struct ServeHandle {
    session: Arc<ServerSession>,
}

impl ServeHandle {
    /// The session being served.
    pub fn session(&self) -> &Arc<ServerSession> {
        &self.session
    }

    /// End the session. Idempotent.
    pub fn close(&self) {
        self.session.close();
    }

    /// Wait for the session to end.
    pub async fn closed(&self) {
        self.session.cancelled().cancelled().await;
    }
}

/// Handle to a session created by [`McpServer::open_session`].
pub struct SessionHandle {
    inner: Arc<ServerInner>,
    session: Arc<ServerSession>,
    notifications: std::sync::Mutex<Option<mpsc::UnboundedReceiver<JsonRpcNotification>>>,
}

impl SessionHandle {
    /// The session behind this handle.
    pub fn session(&self) -> &Arc<ServerSession> {
        &self.session
    }

    /// Take the session's notification outbox. Returns `None` after the
    /// first call.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcNotification>> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Run one request through the middleware chain and the built-in
    /// router.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let ctx = RequestContext {
            method: request.method.clone(),
            params: request.params.clone(),
            session: Arc::clone(&self.session),
        };
        let next = Next {
            inner: &self.inner,
            rest: &self.inner.middleware,
        };
        let outcome = tokio::select! {
            _ = self.session.cancel.cancelled() => {
                Err(JsonRpcError::internal_error("session closed"))
            }
            outcome = next.run(ctx) => outcome,
        };
        match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        }
    }

    /// Absorb a client notification.
    pub async fn handle_notification(&self, notification: JsonRpcNotification) {
        debug!(method = %notification.method, "client notification");
    }

    /// End the session. Idempotent.
    pub fn close(&self) {
        self.session.close();
    }
}

struct ServerInner {
    info: Implementation,
    instructions: Option<String>,
    capabilities: ServerCapabilities,
    page_size: Option<usize>,
    middleware: Vec<Arc<dyn Middleware>>,
    tools: Vec<(Tool, ToolHandler)>,
    resources: Vec<(Resource, ResourceHandler)>,
    templates: Vec<ResourceTemplate>,
    prompts: Vec<(Prompt, PromptHandler)>,
    completion: Option<CompletionHandler>,
}

impl ServerInner {
    async fn dispatch(&self, ctx: RequestContext) -> Result<Value, JsonRpcError> {
        match ctx.method.as_str() {
            "initialize" => self.handle_initialize(&ctx),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let request: ListToolsRequest = parse_params(&ctx)?;
                let tools: Vec<Tool> = self.tools.iter().map(|(t, _)| t.clone()).collect();
                let (tools, next_cursor) =
                    paginate(&tools, request.cursor.as_deref(), self.page_size)?;
                to_result(ListToolsResult { tools, next_cursor })
            }
            "tools/call" => {
                let request: CallToolRequest = parse_params(&ctx)?;
                let handler = self
                    .tools
                    .iter()
                    .find(|(tool, _)| tool.name == request.name)
                    .map(|(_, handler)| Arc::clone(handler))
                    .ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown tool: {}", request.name))
                    })?;
                let result = handler(request, Arc::clone(&ctx.session)).await?;
                to_result(result)
            }
            "resources/list" => {
                let request: ListResourcesRequest = parse_params(&ctx)?;
                let resources: Vec<Resource> =
                    self.resources.iter().map(|(r, _)| r.clone()).collect();
                let (resources, next_cursor) =
                    paginate(&resources, request.cursor.as_deref(), self.page_size)?;
                to_result(ListResourcesResult {
                    resources,
                    next_cursor,
                })
            }
            "resources/templates/list" => {
                let request: ListResourceTemplatesRequest = parse_params(&ctx)?;
                let (resource_templates, next_cursor) =
                    paginate(&self.templates, request.cursor.as_deref(), self.page_size)?;
                to_result(ListResourceTemplatesResult {
                    resource_templates,
                    next_cursor,
                })
            }
            "resources/read" => {
                let request: ReadResourceRequest = parse_params(&ctx)?;
                let handler = self
                    .resources
                    .iter()
                    .find(|(resource, _)| resource.uri == request.uri)
                    .map(|(_, handler)| Arc::clone(handler))
                    .ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown resource: {}", request.uri))
                    })?;
                let result = handler(request, Arc::clone(&ctx.session)).await?;
                to_result(result)
            }
            "resources/subscribe" => {
                let request: SubscribeRequest = parse_params(&ctx)?;
                if !self.resources.iter().any(|(r, _)| r.uri == request.uri) {
                    return Err(JsonRpcError::invalid_params(format!(
                        "Unknown resource: {}",
                        request.uri
                    )));
                }
                ctx.session.track_subscription(request.uri).await;
                Ok(json!({}))
            }
            "resources/unsubscribe" => {
                // Accepts URIs that were never subscribed or whose resource
                // is gone.
                let request: UnsubscribeRequest = parse_params(&ctx)?;
                ctx.session.drop_subscription(&request.uri).await;
                Ok(json!({}))
            }
            "prompts/list" => {
                let request: ListPromptsRequest = parse_params(&ctx)?;
                let prompts: Vec<Prompt> = self.prompts.iter().map(|(p, _)| p.clone()).collect();
                let (prompts, next_cursor) =
                    paginate(&prompts, request.cursor.as_deref(), self.page_size)?;
                to_result(ListPromptsResult {
                    prompts,
                    next_cursor,
                })
            }
            "prompts/get" => {
                let request: GetPromptRequest = parse_params(&ctx)?;
                let handler = self
                    .prompts
                    .iter()
                    .find(|(prompt, _)| prompt.name == request.name)
                    .map(|(_, handler)| Arc::clone(handler))
                    .ok_or_else(|| {
                        JsonRpcError::invalid_params(format!("Unknown prompt: {}", request.name))
                    })?;
                let result = handler(request, Arc::clone(&ctx.session)).await?;
                to_result(result)
            }
            "completion/complete" => {
                let request: CompleteRequest = parse_params(&ctx)?;
                match &self.completion {
                    Some(handler) => {
                        let result = handler(request, Arc::clone(&ctx.session)).await?;
                        to_result(result)
                    }
                    None => Err(JsonRpcError::method_not_found("completion/complete")),
                }
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn handle_initialize(&self, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = parse_params(ctx)?;
        let version = if request.protocol_version.is_supported() {
            request.protocol_version
        } else {
            ProtocolVersion::default()
        };
        let mut result = InitializeResult::new(version, self.capabilities.clone(), self.info.clone());
        result.instructions = self.instructions.clone();
        to_result(result)
    }
}

fn parse_params<T: DeserializeOwned>(ctx: &RequestContext) -> Result<T, JsonRpcError> {
    let value = ctx.params.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

// Offset pagination with opaque "offset:<n>" cursors. No page size means
// a single page and no cursor.
fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: Option<usize>,
) -> Result<(Vec<T>, Option<String>), JsonRpcError> {
    let offset = match cursor {
        None => 0,
        Some(cursor) => cursor
            .strip_prefix("offset:")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|offset| *offset <= items.len())
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Invalid cursor: {cursor}")))?,
    };
    match page_size {
        None => Ok((items[offset..].to_vec(), None)),
        Some(size) => {
            let end = (offset + size).min(items.len());
            let next = (end < items.len()).then(|| format!("offset:{end}"));
            Ok((items[offset..end].to_vec(), next))
        }
    }
}
