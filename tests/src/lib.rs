//! Shared fixtures for the varmux integration tests: inner variant
//! servers, proxy assemblies and a front-session helper.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use varmux_mcp::client::{ClientOptions, ClientSession, NotificationHandler};
use varmux_mcp::messages::{
    CallToolResult, ClientCapabilities, Completion, CompleteResult, GetPromptResult, JsonRpcError,
    LoggingMessageNotification, ProgressNotification, Prompt, PromptMessage, ReadResourceResult,
    Resource, ResourceContents, ResourceTemplate, Tool,
};
use varmux_mcp::server::{McpServer, ServeHandle};
use varmux_mcp::transport::memory;
use varmux_mcp::McpResult;
use varmux_proxy::{
    DeprecationInfo, InMemoryBackend, VariantDescriptor, VariantProxy, VariantStatus,
};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("varmux_mcp=debug,varmux_proxy=debug")
        .with_test_writer()
        .try_init();
}

/// The `coding` variant: full toolchain, paginated lists, progress and
/// logging emission.
pub fn coding_server() -> McpServer {
    McpServer::builder("coding-server", "1.0.0")
        .page_size(1)
        .tool(
            Tool::new("analyze_code", "Static analysis over a source file"),
            |request, session| async move {
                let _ = session.send_progress(ProgressNotification::new("analyze", 0.5));
                let _ = session.send_logging(LoggingMessageNotification::info("analysis started"));
                let file = request
                    .arguments
                    .as_ref()
                    .and_then(|a| a.get("file"))
                    .and_then(|f| f.as_str())
                    .unwrap_or("<unnamed>");
                Ok(CallToolResult::text(format!("analyzed {file}")))
            },
        )
        .tool(
            Tool::new("refactor", "Apply a refactoring"),
            |_request, _session| async move { Ok(CallToolResult::text("refactored")) },
        )
        .resource(
            Resource::new("mem://coding/readme", "readme"),
            |request, _session| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(request.uri, "coding readme")],
                })
            },
        )
        .resource_template(ResourceTemplate::new("mem://coding/src/{path}", "sources"))
        .prompt(
            Prompt::new("review", "Review a diff"),
            |_request, _session| async move {
                Ok(GetPromptResult {
                    description: None,
                    messages: vec![PromptMessage::user("Review the following diff")],
                })
            },
        )
        .completion(|request, _session| async move {
            let values = ["rust", "ruby"]
                .iter()
                .filter(|v| v.starts_with(&request.argument.value))
                .map(|v| v.to_string())
                .collect::<Vec<_>>();
            Ok(CompleteResult {
                completion: Completion {
                    total: Some(values.len() as u64),
                    has_more: Some(false),
                    values,
                },
            })
        })
        .build()
}

/// The `compact` variant: a small packaging with a disjoint tool set.
pub fn compact_server() -> McpServer {
    McpServer::builder("compact-server", "1.0.0")
        .page_size(1)
        .tool(
            Tool::new("summarize", "Summarize a document"),
            |_request, _session| async move { Ok(CallToolResult::text("summary")) },
        )
        .tool(
            Tool::new("lookup", "Look up a fact"),
            |_request, _session| async move { Ok(CallToolResult::text("fact")) },
        )
        .tool(
            Tool::new("broken", "Always fails with an application error"),
            |_request, _session| async move {
                Err(JsonRpcError::new(
                    -32000,
                    "tool exploded",
                    Some(json!({"fatal": true})),
                ))
            },
        )
        .build()
}

/// A minimal server for filler variants.
pub fn trivial_server(name: &str, tool: &str) -> McpServer {
    let reply = format!("{tool} done");
    McpServer::builder(name, "0.1.0")
        .tool(
            Tool::new(tool, "Trivial tool"),
            move |_request, _session| {
                let reply = reply.clone();
                async move { Ok(CallToolResult::text(reply)) }
            },
        )
        .build()
}

/// The standard two-variant registry: `coding` (priority 0, stable) and
/// `compact` (priority 1, experimental), each with an observable backend.
pub struct TwoVariantFixture {
    /// The assembled proxy
    pub proxy: VariantProxy,
    /// Backend serving `coding`
    pub coding: Arc<InMemoryBackend>,
    /// Backend serving `compact`
    pub compact: Arc<InMemoryBackend>,
}

/// Assemble the standard two-variant proxy.
pub async fn two_variant_proxy() -> TwoVariantFixture {
    let coding = Arc::new(InMemoryBackend::new(coding_server()));
    let compact = Arc::new(InMemoryBackend::new(compact_server()));
    let proxy = VariantProxy::builder("code-assist", "1.0.0")
        .variant(
            VariantDescriptor::new("coding", "Full coding toolchain")
                .with_status(VariantStatus::Stable),
            Arc::clone(&coding) as Arc<dyn varmux_proxy::Backend>,
            0,
        )
        .variant(
            VariantDescriptor::new("compact", "Small-context packaging")
                .with_status(VariantStatus::Experimental),
            Arc::clone(&compact) as Arc<dyn varmux_proxy::Backend>,
            1,
        )
        .build()
        .await
        .expect("proxy assembly");
    TwoVariantFixture {
        proxy,
        coding,
        compact,
    }
}

/// A deprecated `v1-legacy` variant descriptor with the canonical record.
pub fn legacy_descriptor() -> VariantDescriptor {
    VariantDescriptor::new("v1-legacy", "Legacy packaging").with_deprecation(DeprecationInfo {
        message: "v1 tools are frozen".to_string(),
        replacement: Some("v2-stable".to_string()),
        removal_date: Some("2026-06-30".to_string()),
    })
}

/// Collects forwarded notifications on the front client.
#[derive(Default)]
pub struct RecordingHandler {
    /// Progress notifications received, in order
    pub progress: Mutex<Vec<ProgressNotification>>,
    /// Logging notifications received, in order
    pub logging: Mutex<Vec<LoggingMessageNotification>>,
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    async fn on_progress(&self, notification: ProgressNotification) {
        self.progress.lock().await.push(notification);
    }

    async fn on_logging_message(&self, notification: LoggingMessageNotification) {
        self.logging.lock().await.push(notification);
    }
}

/// A connected front session over an in-memory pair.
pub struct FrontSession {
    /// The client side
    pub client: Arc<ClientSession>,
    /// Handle to the serving side
    pub serving: ServeHandle,
}

/// Connect a front client to a stateful front server of the proxy.
pub async fn connect_front(
    proxy: &VariantProxy,
    capabilities: ClientCapabilities,
    handler: Option<Arc<dyn NotificationHandler>>,
) -> McpResult<FrontSession> {
    let server = proxy.server(false).await?;
    let (client_end, server_end) = memory::pair();
    let serving = server.serve(Arc::new(server_end));

    let options = ClientOptions {
        capabilities,
        handler,
        ..Default::default()
    };
    let client = ClientSession::connect(Arc::new(client_end), options).await?;
    Ok(FrontSession { client, serving })
}

/// Client capabilities carrying variant hints.
pub fn capabilities_with_hints(hints: serde_json::Value) -> ClientCapabilities {
    ClientCapabilities::default().with_experimental(
        "io.modelcontextprotocol/server-variants",
        json!({ "variantHints": hints }),
    )
}

/// A `_meta` object selecting the given variant.
pub fn select_variant(variant: &str) -> varmux_mcp::messages::RequestMeta {
    let mut meta = varmux_mcp::messages::RequestMeta::new();
    meta.insert(
        "io.modelcontextprotocol/server-variant".to_string(),
        json!(variant),
    );
    meta
}
