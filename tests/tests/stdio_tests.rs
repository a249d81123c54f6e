//! One full proxied session over the newline-delimited stdio framing,
//! driven through an in-process duplex pipe.

use std::sync::Arc;

use serde_json::json;

use varmux_mcp::client::ClientSession;
use varmux_mcp::messages::{CallToolRequest, ListToolsRequest, ToolContent};
use varmux_mcp::transport::StdioTransport;
use varmux_tests::{init_logging, select_variant, two_variant_proxy};

#[tokio::test]
async fn full_session_over_line_framing() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let server = fixture.proxy.server(false).await.unwrap();

    let (near, far) = tokio::io::duplex(64 * 1024);
    let (near_read, near_write) = tokio::io::split(near);
    let (far_read, far_write) = tokio::io::split(far);

    let serving = server.serve(Arc::new(StdioTransport::new(near_read, near_write)));
    let client = ClientSession::connect(
        Arc::new(StdioTransport::new(far_read, far_write)),
        Default::default(),
    )
    .await
    .unwrap();

    // The variant extension rode the handshake over the wire.
    let capabilities = &client.initialize_result().unwrap().capabilities;
    let block = capabilities
        .experimental
        .as_ref()
        .unwrap()
        .get("io.modelcontextprotocol/server-variants")
        .unwrap();
    assert_eq!(block["availableVariants"][0]["id"], json!("coding"));

    // Default-variant listing, then an explicit cross-variant call.
    let tools = client.list_tools(ListToolsRequest::default()).await.unwrap();
    assert_eq!(tools.tools[0].name, "analyze_code");

    let mut request = CallToolRequest::new("summarize", json!({}));
    request.meta = Some(select_variant("compact"));
    let result = client.call_tool(request).await.unwrap();
    assert_matches::assert_matches!(&result.content[0], ToolContent::Text { text } if text == "summary");

    client.close().await;
    serving.closed().await;
    fixture.proxy.close().await;
}
