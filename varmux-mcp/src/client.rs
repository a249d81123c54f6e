//! MCP client session.
//!
//! [`ClientSession`] drives one MCP session over a [`Transport`]: it runs
//! the initialize handshake, correlates requests with responses, applies
//! timeouts, and feeds server notifications to a [`NotificationHandler`].
//!
//! Unlike a classic one-owner client, every RPC takes `&self` and the
//! session is handed out as an `Arc`, so any number of concurrent request
//! handlers can share one inner session. The varmux dispatcher depends on
//! this: a front session fans concurrent requests onto the same inner
//! sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{McpError, McpResult, ProtocolError, TransportError};
use crate::messages::{
    CallToolRequest, CallToolResult, ClientCapabilities, CompleteRequest, CompleteResult,
    GetPromptRequest, GetPromptResult, Implementation, InitializeRequest, InitializeResult,
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListChangedKind, ListPromptsRequest, ListPromptsResult, ListResourceTemplatesRequest,
    ListResourceTemplatesResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, LoggingMessageNotification, ProgressNotification, ProtocolVersion,
    ReadResourceRequest, ReadResourceResult, ResourceUpdatedNotification, SubscribeRequest,
    UnsubscribeRequest,
};
use crate::transport::Transport;

/// Handler for notifications pushed by the server.
///
/// All methods default to a debug log, so implementations override only
/// what they care about.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle `notifications/progress`.
    async fn on_progress(&self, notification: ProgressNotification) {
        debug!("progress notification: {:?}", notification);
    }

    /// Handle `notifications/message`.
    async fn on_logging_message(&self, notification: LoggingMessageNotification) {
        debug!("logging notification: {:?}", notification);
    }

    /// Handle `notifications/resources/updated`.
    async fn on_resource_updated(&self, notification: ResourceUpdatedNotification) {
        debug!("resource updated: {:?}", notification);
    }

    /// Handle a tools/resources/prompts `list_changed` notification.
    async fn on_list_changed(&self, kind: ListChangedKind) {
        debug!("list changed: {:?}", kind);
    }
}

/// Notification handler that keeps the default logging behavior.
#[derive(Debug, Default)]
pub struct DefaultNotificationHandler;

#[async_trait]
impl NotificationHandler for DefaultNotificationHandler {}

/// Options for establishing a client session.
pub struct ClientOptions {
    /// Information about this client implementation
    pub info: Implementation,

    /// Capabilities to declare during the handshake
    pub capabilities: ClientCapabilities,

    /// Timeout for individual requests
    pub request_timeout: Duration,

    /// Timeout for the initialize handshake
    pub init_timeout: Duration,

    /// Receiver for server notifications
    pub handler: Option<Arc<dyn NotificationHandler>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            info: Implementation::new("varmux-client", crate::VERSION),
            capabilities: ClientCapabilities::default(),
            request_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(10),
            handler: None,
        }
    }
}

/// A connected MCP client session.
pub struct ClientSession {
    transport: Arc<dyn Transport>,
    pending: Arc<RwLock<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>,
    request_counter: AtomicU64,
    request_timeout: Duration,
    server: OnceLock<InitializeResult>,
    closed: CancellationToken,
}

impl ClientSession {
    /// Connect over the given transport and run the initialize handshake.
    ///
    /// On handshake failure the transport is closed before the error is
    /// returned.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> McpResult<Arc<Self>> {
        let handler = options
            .handler
            .unwrap_or_else(|| Arc::new(DefaultNotificationHandler));

        let session = Arc::new(Self {
            transport,
            pending: Arc::new(RwLock::new(HashMap::new())),
            request_counter: AtomicU64::new(1),
            request_timeout: options.request_timeout,
            server: OnceLock::new(),
            closed: CancellationToken::new(),
        });
        session.spawn_reader(handler);

        match session
            .initialize(options.info, options.capabilities, options.init_timeout)
            .await
        {
            Ok(result) => {
                let _ = session.server.set(result);
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                Err(McpError::Protocol(ProtocolError::InitializationFailed {
                    reason: e.to_string(),
                }))
            }
        }
    }

    /// The server's initialize result, recorded during `connect`.
    pub fn initialize_result(&self) -> Option<&InitializeResult> {
        self.server.get()
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send a raw request and wait for its result value.
    ///
    /// An error response from the server surfaces as [`McpError::Rpc`]
    /// carrying the wire error unchanged.
    pub async fn request(&self, method: &str, params: serde_json::Value) -> McpResult<serde_json::Value> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// `tools/list`
    pub async fn list_tools(&self, request: ListToolsRequest) -> McpResult<ListToolsResult> {
        let result = self
            .request("tools/list", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `tools/call`
    pub async fn call_tool(&self, request: CallToolRequest) -> McpResult<CallToolResult> {
        let result = self
            .request("tools/call", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `resources/list`
    pub async fn list_resources(
        &self,
        request: ListResourcesRequest,
    ) -> McpResult<ListResourcesResult> {
        let result = self
            .request("resources/list", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `resources/templates/list`
    pub async fn list_resource_templates(
        &self,
        request: ListResourceTemplatesRequest,
    ) -> McpResult<ListResourceTemplatesResult> {
        let result = self
            .request("resources/templates/list", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `resources/read`
    pub async fn read_resource(
        &self,
        request: ReadResourceRequest,
    ) -> McpResult<ReadResourceResult> {
        let result = self
            .request("resources/read", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `resources/subscribe`
    pub async fn subscribe(&self, request: SubscribeRequest) -> McpResult<()> {
        self.request("resources/subscribe", serde_json::to_value(request)?)
            .await?;
        Ok(())
    }

    /// `resources/unsubscribe`
    pub async fn unsubscribe(&self, request: UnsubscribeRequest) -> McpResult<()> {
        self.request("resources/unsubscribe", serde_json::to_value(request)?)
            .await?;
        Ok(())
    }

    /// `prompts/list`
    pub async fn list_prompts(&self, request: ListPromptsRequest) -> McpResult<ListPromptsResult> {
        let result = self
            .request("prompts/list", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `prompts/get`
    pub async fn get_prompt(&self, request: GetPromptRequest) -> McpResult<GetPromptResult> {
        let result = self
            .request("prompts/get", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `completion/complete`
    pub async fn complete(&self, request: CompleteRequest) -> McpResult<CompleteResult> {
        let result = self
            .request("completion/complete", serde_json::to_value(request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `ping`
    pub async fn ping(&self) -> McpResult<()> {
        self.request("ping", serde_json::json!({})).await?;
        Ok(())
    }

    /// Close the session: the transport is shut down and every pending
    /// request fails. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        self.transport.close().await;
        self.fail_pending().await;
    }

    // Handshake: initialize request followed by the initialized
    // notification.
    async fn initialize(
        &self,
        info: Implementation,
        capabilities: ClientCapabilities,
        init_timeout: Duration,
    ) -> McpResult<InitializeResult> {
        let request = InitializeRequest {
            protocol_version: ProtocolVersion::default(),
            capabilities,
            client_info: info,
            meta: None,
        };

        let result = self
            .request_with_timeout("initialize", serde_json::to_value(request)?, init_timeout)
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        self.transport
            .send(JsonRpcMessage::Notification(
                JsonRpcNotification::without_params("notifications/initialized"),
            ))
            .await?;

        debug!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "client session initialized"
        );
        Ok(result)
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: serde_json::Value,
        duration: Duration,
    ) -> McpResult<serde_json::Value> {
        if self.is_closed() {
            return Err(TransportError::closed("client", "session closed").into());
        }

        let id = format!(
            "req_{}",
            self.request_counter.fetch_add(1, Ordering::SeqCst)
        );
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.transport.send(JsonRpcMessage::Request(request)).await {
            self.pending.write().await.remove(&id);
            return Err(e);
        }

        let response = match timeout(duration, rx).await {
            Err(_) => {
                self.pending.write().await.remove(&id);
                return Err(McpError::timeout(method, duration));
            }
            Ok(Err(_)) => {
                return Err(TransportError::closed("client", "session closed").into());
            }
            Ok(Ok(response)) => response,
        };

        match response.error {
            Some(error) => Err(McpError::Rpc(error)),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        }
    }

    fn spawn_reader(self: &Arc<Self>, handler: Arc<dyn NotificationHandler>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = session.closed.cancelled() => break,
                    received = session.transport.recv() => received,
                };
                match received {
                    Ok(Some(JsonRpcMessage::Response(response))) => {
                        session.complete_request(response).await;
                    }
                    Ok(Some(JsonRpcMessage::Notification(notification))) => {
                        Self::handle_notification(&*handler, notification).await;
                    }
                    Ok(Some(JsonRpcMessage::Request(request))) => {
                        // Server-to-client requests are not supported here.
                        warn!(method = %request.method, "rejecting server-to-client request");
                        let reply = JsonRpcResponse::error(
                            request.id,
                            JsonRpcError::method_not_found(request.method),
                        );
                        let _ = session.transport.send(JsonRpcMessage::Response(reply)).await;
                    }
                    Ok(None) => break,
                    Err(McpError::Transport(TransportError::Framing { reason, .. })) => {
                        warn!(%reason, "skipping unparseable message");
                    }
                    Err(e) => {
                        warn!(error = %e, "receive failed, closing session");
                        break;
                    }
                }
            }
            session.closed.cancel();
            session.fail_pending().await;
        });
    }

    async fn complete_request(&self, response: JsonRpcResponse) {
        let key = response.id.to_string();
        match self.pending.write().await.remove(&key) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!(id = %key, "response for unknown request id"),
        }
    }

    async fn handle_notification(handler: &dyn NotificationHandler, n: JsonRpcNotification) {
        match n.method.as_str() {
            "notifications/progress" => match n.params_as::<ProgressNotification>() {
                Ok(params) => handler.on_progress(params).await,
                Err(e) => warn!(error = %e, "malformed progress notification"),
            },
            "notifications/message" => match n.params_as::<LoggingMessageNotification>() {
                Ok(params) => handler.on_logging_message(params).await,
                Err(e) => warn!(error = %e, "malformed logging notification"),
            },
            "notifications/resources/updated" => {
                match n.params_as::<ResourceUpdatedNotification>() {
                    Ok(params) => handler.on_resource_updated(params).await,
                    Err(e) => warn!(error = %e, "malformed resource update"),
                }
            }
            "notifications/tools/list_changed" => {
                handler.on_list_changed(ListChangedKind::Tools).await;
            }
            "notifications/resources/list_changed" => {
                handler.on_list_changed(ListChangedKind::Resources).await;
            }
            "notifications/prompts/list_changed" => {
                handler.on_list_changed(ListChangedKind::Prompts).await;
            }
            other => debug!(method = %other, "ignoring notification"),
        }
    }

    async fn fail_pending(&self) {
        // Dropping the senders resolves every waiter with a closed error.
        self.pending.write().await.clear();
    }
}
