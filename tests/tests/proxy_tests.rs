//! End-to-end proxy behavior over in-memory transports: ranking,
//! routing, cursors, error enrichment, notifications and teardown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use varmux_mcp::client::NotificationHandler;
use varmux_mcp::messages::{
    CallToolRequest, CompleteRequest, CompletionArgument, CompletionReference, GetPromptRequest,
    ListToolsRequest, ReadResourceRequest, ServerCapabilities, SubscribeRequest, ToolContent,
    UnsubscribeRequest,
};
use varmux_mcp::server::ServerSession;
use varmux_mcp::{McpError, McpResult};
use varmux_proxy::{
    Backend, InMemoryBackend, InnerConnection, VariantDescriptor, VariantProxy, VariantStatus,
};
use varmux_tests::{
    capabilities_with_hints, coding_server, connect_front, init_logging, legacy_descriptor,
    select_variant, trivial_server, two_variant_proxy, RecordingHandler,
};

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn variant_ids(block: &serde_json::Value) -> Vec<String> {
    block["availableVariants"]
        .as_array()
        .expect("availableVariants array")
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect()
}

fn extension_block(capabilities: &ServerCapabilities) -> serde_json::Value {
    capabilities
        .experimental
        .as_ref()
        .expect("experimental capabilities")
        .get("io.modelcontextprotocol/server-variants")
        .expect("variant extension block")
        .clone()
}

#[tokio::test]
async fn two_variant_init_lists_rank_order() {
    init_logging();
    let fixture = two_variant_proxy().await;

    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();
    let block = extension_block(&front.client.initialize_result().unwrap().capabilities);

    assert_eq!(variant_ids(&block), vec!["coding", "compact"]);
    assert_eq!(block["moreVariantsAvailable"], json!(false));
    assert_eq!(
        block["availableVariants"][0]["status"],
        json!("stable"),
        "the recommended default ought to be stable"
    );

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn hint_driven_reranking_sets_session_default() {
    init_logging();
    let proxy = VariantProxy::builder("model-tuned", "1.0.0")
        .variant(
            VariantDescriptor::new("claude-optimized", "Tuned for Claude")
                .with_status(VariantStatus::Stable)
                .with_hint("modelFamily", "claude"),
            Arc::new(InMemoryBackend::new(trivial_server("claude-srv", "claude_tool"))),
            0,
        )
        .variant(
            VariantDescriptor::new("gpt-optimized", "Tuned for GPT")
                .with_status(VariantStatus::Stable)
                .with_hint("modelFamily", "openai"),
            Arc::new(InMemoryBackend::new(trivial_server("gpt-srv", "gpt_tool"))),
            1,
        )
        .ranker(|hints, descriptors| {
            let mut ranked = varmux_proxy::default_rank(hints, descriptors);
            if let Some(family) = hints.get("modelFamily") {
                ranked.sort_by_key(|d| {
                    let matched = d
                        .hints
                        .as_ref()
                        .and_then(|h| h.get("modelFamily"))
                        .map(|v| family.contains(v))
                        .unwrap_or(false);
                    u8::from(!matched)
                });
            }
            ranked
        })
        .build()
        .await
        .unwrap();

    let front = connect_front(
        &proxy,
        capabilities_with_hints(json!({"hints": {"modelFamily": "openai"}})),
        None,
    )
    .await
    .unwrap();

    let block = extension_block(&front.client.initialize_result().unwrap().capabilities);
    assert_eq!(
        variant_ids(&block),
        vec!["gpt-optimized", "claude-optimized"]
    );

    // The initialize-time ranking is the session default: an unselected
    // call lands on gpt-optimized.
    let result = front
        .client
        .call_tool(CallToolRequest::new("gpt_tool", json!({})))
        .await
        .unwrap();
    assert_matches::assert_matches!(&result.content[0], ToolContent::Text { text } if text == "gpt_tool done");

    front.client.close().await;
    proxy.close().await;
}

#[tokio::test]
async fn cross_variant_calls_are_isolated() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    // A coding tool under the compact variant fails, enriched with the
    // active variant.
    let mut request = CallToolRequest::new("analyze_code", json!({"file": "main.rs"}));
    request.meta = Some(select_variant("compact"));
    let err = front.client.call_tool(request).await.unwrap_err();
    let rpc = err.as_rpc_error().expect("rpc error");
    assert_eq!(rpc.code, -32602);
    assert_eq!(rpc.data.as_ref().unwrap()["activeVariant"], json!("compact"));

    // The same tool under its own variant succeeds.
    let mut request = CallToolRequest::new("summarize", json!({}));
    request.meta = Some(select_variant("compact"));
    assert!(front.client.call_tool(request).await.is_ok());

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn unknown_variant_reports_available_ids() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    let mut request = ListToolsRequest::default();
    request.meta = Some(select_variant("nonexistent"));
    let err = front.client.list_tools(request).await.unwrap_err();

    let rpc = err.as_rpc_error().expect("rpc error");
    assert_eq!(rpc.code, -32602);
    assert_eq!(rpc.message, "Invalid server variant");
    let data = rpc.data.as_ref().unwrap();
    assert_eq!(data["requestedVariant"], json!("nonexistent"));
    assert_eq!(data["availableVariants"], json!(["coding", "compact"]));

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn cursors_are_variant_scoped() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    // First page under the default variant (coding, page size 1).
    let first = front
        .client
        .list_tools(ListToolsRequest::default())
        .await
        .unwrap();
    assert_eq!(first.tools[0].name, "analyze_code");
    let cursor = first.next_cursor.clone().expect("second page");

    // Replaying the cursor against another variant is rejected with both
    // ids in the error data.
    let mut misrouted = ListToolsRequest::default();
    misrouted.cursor = Some(cursor.clone());
    misrouted.meta = Some(select_variant("compact"));
    let err = front.client.list_tools(misrouted).await.unwrap_err();
    let rpc = err.as_rpc_error().expect("rpc error");
    assert_eq!(rpc.code, -32602);
    let data = rpc.data.as_ref().unwrap();
    assert_eq!(data["cursorVariant"], json!("coding"));
    assert_eq!(data["requestedVariant"], json!("compact"));

    // The same cursor keeps paginating its own variant.
    let mut second_page = ListToolsRequest::default();
    second_page.cursor = Some(cursor);
    let second = front.client.list_tools(second_page).await.unwrap();
    assert_eq!(second.tools[0].name, "refactor");
    assert!(second.next_cursor.is_none());

    // Garbage cursors are invalid params.
    let mut garbage = ListToolsRequest::default();
    garbage.cursor = Some("???definitely-not-a-cursor".to_string());
    let err = front.client.list_tools(garbage).await.unwrap_err();
    assert_eq!(err.as_rpc_error().unwrap().code, -32602);

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn deprecation_record_is_advertised_verbatim() {
    init_logging();
    let proxy = VariantProxy::builder("aging", "1.0.0")
        .variant(
            VariantDescriptor::new("v2-stable", "Current packaging")
                .with_status(VariantStatus::Stable),
            Arc::new(InMemoryBackend::new(trivial_server("v2", "current_tool"))),
            0,
        )
        .variant(
            legacy_descriptor(),
            Arc::new(InMemoryBackend::new(trivial_server("v1", "legacy_tool"))),
            1,
        )
        .build()
        .await
        .unwrap();

    let front = connect_front(&proxy, Default::default(), None).await.unwrap();
    let block = extension_block(&front.client.initialize_result().unwrap().capabilities);

    let legacy = block["availableVariants"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["id"] == json!("v1-legacy"))
        .expect("legacy variant advertised");
    assert_eq!(legacy["status"], json!("deprecated"));
    assert_eq!(
        legacy["deprecationInfo"],
        json!({
            "message": "v1 tools are frozen",
            "replacement": "v2-stable",
            "removalDate": "2026-06-30",
        })
    );

    front.client.close().await;
    proxy.close().await;
}

#[tokio::test]
async fn non_resolution_errors_pass_through_verbatim() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    let mut request = CallToolRequest::new("broken", json!({}));
    request.meta = Some(select_variant("compact"));
    let err = front.client.call_tool(request).await.unwrap_err();

    let rpc = err.as_rpc_error().expect("rpc error");
    assert_eq!(rpc.code, -32000);
    assert_eq!(rpc.message, "tool exploded");
    assert_eq!(rpc.data, Some(json!({"fatal": true})));

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn routed_reads_prompts_and_completions_work() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    let read = front
        .client
        .read_resource(ReadResourceRequest::new("mem://coding/readme"))
        .await
        .unwrap();
    assert_eq!(read.contents[0].uri(), "mem://coding/readme");

    let templates = front
        .client
        .list_resource_templates(Default::default())
        .await
        .unwrap();
    assert_eq!(templates.resource_templates[0].uri_template, "mem://coding/src/{path}");

    let prompt = front
        .client
        .get_prompt(GetPromptRequest::new("review"))
        .await
        .unwrap();
    assert_eq!(prompt.messages.len(), 1);

    let completion = front
        .client
        .complete(CompleteRequest {
            reference: CompletionReference::Prompt {
                name: "review".to_string(),
            },
            argument: CompletionArgument {
                name: "language".to_string(),
                value: "ru".to_string(),
            },
            meta: None,
        })
        .await
        .unwrap();
    assert_eq!(completion.completion.values, vec!["rust", "ruby"]);

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn subscriptions_forward_and_tolerate_gone_resources() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    front
        .client
        .subscribe(SubscribeRequest {
            uri: "mem://coding/readme".to_string(),
            meta: None,
        })
        .await
        .unwrap();

    // Unsubscribing a URI that never existed still succeeds.
    front
        .client
        .unsubscribe(UnsubscribeRequest {
            uri: "mem://coding/vanished".to_string(),
            meta: None,
        })
        .await
        .unwrap();

    front
        .client
        .unsubscribe(UnsubscribeRequest {
            uri: "mem://coding/readme".to_string(),
            meta: None,
        })
        .await
        .unwrap();

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn notifications_carry_variant_provenance() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let handler = Arc::new(RecordingHandler::default());
    let front = connect_front(
        &fixture.proxy,
        Default::default(),
        Some(Arc::clone(&handler) as Arc<dyn NotificationHandler>),
    )
    .await
    .unwrap();

    front
        .client
        .call_tool(CallToolRequest::new("analyze_code", json!({"file": "lib.rs"})))
        .await
        .unwrap();

    // Notifications race the response; wait for both kinds.
    for _ in 0..200 {
        if !handler.progress.lock().await.is_empty() && !handler.logging.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let progress = handler.progress.lock().await;
    let forwarded = progress.first().expect("forwarded progress notification");
    assert_eq!(
        forwarded.meta.as_ref().unwrap()["io.modelcontextprotocol/server-variant"],
        json!("coding")
    );

    let logging = handler.logging.lock().await;
    let forwarded = logging.first().expect("forwarded logging notification");
    assert_eq!(
        forwarded.meta.as_ref().unwrap()["io.modelcontextprotocol/server-variant"],
        json!("coding")
    );

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn front_session_close_tears_down_inner_connections() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    assert_eq!(fixture.proxy.active_sessions(), 1);
    assert_eq!(fixture.coding.open_connections(), 1);
    assert_eq!(fixture.compact.open_connections(), 1);

    front.client.close().await;

    let proxy = &fixture.proxy;
    let coding = &fixture.coding;
    let compact = &fixture.compact;
    wait_until("session teardown", || {
        proxy.active_sessions() == 0
            && coding.open_connections() == 0
            && compact.open_connections() == 0
    })
    .await;

    fixture.proxy.close().await;
}

#[tokio::test]
async fn stateless_mode_shares_inner_connections() {
    init_logging();
    let fixture = two_variant_proxy().await;

    // Build the stateless server; the shared connections exist before any
    // client shows up.
    let server = fixture.proxy.server(true).await.unwrap();
    assert_eq!(fixture.coding.open_connections(), 1);

    let connect = |server: varmux_mcp::server::McpServer| async move {
        let (client_end, server_end) = varmux_mcp::transport::memory::pair();
        let serving = server.serve(Arc::new(server_end));
        let client = varmux_mcp::client::ClientSession::connect(
            Arc::new(client_end),
            Default::default(),
        )
        .await
        .unwrap();
        (client, serving)
    };

    let (first, _serving_a) = connect(server.clone()).await;
    let (second, _serving_b) = connect(server.clone()).await;

    // Two front sessions, still one inner connection per variant and no
    // per-session state.
    assert_eq!(fixture.coding.open_connections(), 1);
    assert_eq!(fixture.proxy.active_sessions(), 0);

    let tools = first.list_tools(ListToolsRequest::default()).await.unwrap();
    assert_eq!(tools.tools[0].name, "analyze_code");

    let mut request = CallToolRequest::new("lookup", json!({}));
    request.meta = Some(select_variant("compact"));
    second.call_tool(request).await.unwrap();

    first.close().await;
    second.close().await;

    fixture.proxy.close().await;
    let coding = &fixture.coding;
    wait_until("shared teardown", || coding.open_connections() == 0).await;
}

// A backend whose connect always fails, for initialize atomicity.
struct FailingBackend;

#[async_trait]
impl Backend for FailingBackend {
    async fn capabilities(&self) -> McpResult<ServerCapabilities> {
        Ok(ServerCapabilities::default())
    }

    async fn connect(
        &self,
        _descriptor: &VariantDescriptor,
        _front: Option<Arc<ServerSession>>,
    ) -> McpResult<InnerConnection> {
        Err(McpError::internal("backend offline"))
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn initialize_fails_atomically_when_a_backend_is_down() {
    init_logging();
    let coding = Arc::new(InMemoryBackend::new(coding_server()));
    let proxy = VariantProxy::builder("flaky", "1.0.0")
        .variant(
            VariantDescriptor::new("coding", "Works").with_status(VariantStatus::Stable),
            Arc::clone(&coding) as Arc<dyn Backend>,
            0,
        )
        .variant(
            VariantDescriptor::new("offline", "Never connects"),
            Arc::new(FailingBackend),
            1,
        )
        .build()
        .await
        .unwrap();

    let result = connect_front(&proxy, Default::default(), None).await;
    assert!(result.is_err(), "initialize should fail");

    // The coding connection opened before the failure must be rolled back.
    let coding_ref = &coding;
    wait_until("rollback", || coding_ref.open_connections() == 0).await;
    assert_eq!(proxy.active_sessions(), 0);

    proxy.close().await;
}

#[tokio::test]
async fn variant_unaware_clients_see_plain_mcp() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();

    // ping is not routed: the front server answers it itself.
    front.client.ping().await.unwrap();

    // Plain list/call flow against the first-ranked variant, no extension
    // fields touched.
    let tools = front
        .client
        .list_tools(ListToolsRequest::default())
        .await
        .unwrap();
    assert_eq!(tools.tools[0].name, "analyze_code");

    let result = front
        .client
        .call_tool(CallToolRequest::new("analyze_code", json!({"file": "x.rs"})))
        .await
        .unwrap();
    assert_matches::assert_matches!(&result.content[0], ToolContent::Text { text } if text == "analyzed x.rs");

    front.client.close().await;
    fixture.proxy.close().await;
}

#[tokio::test]
async fn union_capabilities_cover_every_variant() {
    init_logging();
    let fixture = two_variant_proxy().await;

    // coding advertises resources/prompts/completions, compact only tools;
    // the front advertises the union.
    let front = connect_front(&fixture.proxy, Default::default(), None)
        .await
        .unwrap();
    let capabilities = &front.client.initialize_result().unwrap().capabilities;

    assert!(capabilities.tools.is_some());
    assert!(capabilities.resources.is_some());
    assert!(capabilities.prompts.is_some());
    assert!(capabilities.completions.is_some());

    front.client.close().await;
    fixture.proxy.close().await;
}
