//! Streamable-HTTP wire tests: session lifecycle, cross-client isolation
//! and stateless mode.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;

use varmux_mcp::messages::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use varmux_tests::{init_logging, two_variant_proxy};

const SESSION_HEADER: &str = "mcp-session-id";

fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn init_request(id: &str) -> JsonRpcRequest {
    JsonRpcRequest::new(
        id,
        "initialize",
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "http-client", "version": "0.0.1"}
        }),
    )
}

fn list_request(id: &str, variant: Option<&str>) -> JsonRpcRequest {
    let params = match variant {
        Some(variant) => {
            json!({"_meta": {"io.modelcontextprotocol/server-variant": variant}})
        }
        None => json!({}),
    };
    JsonRpcRequest::new(id, "tools/list", params)
}

fn call_request(id: &str, tool: &str, variant: Option<&str>) -> JsonRpcRequest {
    let mut params = json!({"name": tool, "arguments": {}});
    if let Some(variant) = variant {
        params["_meta"] = json!({"io.modelcontextprotocol/server-variant": variant});
    }
    JsonRpcRequest::new(id, "tools/call", params)
}

async fn post(
    client: &reqwest::Client,
    addr: SocketAddr,
    session: Option<&str>,
    request: JsonRpcRequest,
) -> (reqwest::StatusCode, Option<String>, Option<JsonRpcResponse>) {
    let mut builder = client
        .post(format!("http://{addr}/mcp"))
        .json(&JsonRpcMessage::Request(request));
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    let response = builder.send().await.expect("http request");

    let status = response.status();
    let session_id = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = if status.is_success() {
        response.json::<JsonRpcResponse>().await.ok()
    } else {
        None
    };
    (status, session_id, body)
}

fn first_tool(response: &JsonRpcResponse) -> String {
    response.result.as_ref().unwrap()["tools"][0]["name"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn http_session_lifecycle() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let server = fixture.proxy.serve_http(any_addr(), false).await.unwrap();
    let addr = server.local_addr();
    let client = reqwest::Client::new();

    // Requests before initialize are rejected.
    let (status, _, _) = post(&client, addr, None, list_request("0", None)).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    // initialize opens a session and returns its id in the header.
    let (status, session_id, body) = post(&client, addr, None, init_request("1")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let session_id = session_id.expect("session header");
    let body = body.unwrap();
    let block = &body.result.as_ref().unwrap()["capabilities"]["experimental"]
        ["io.modelcontextprotocol/server-variants"];
    assert_eq!(block["availableVariants"][0]["id"], json!("coding"));

    // The session id routes follow-up requests.
    let (status, _, body) = post(&client, addr, Some(&session_id), list_request("2", None)).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(first_tool(&body.unwrap()), "analyze_code");

    // The notification stream is reachable while the session lives.
    let sse = client
        .get(format!("http://{addr}/mcp"))
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(sse.status(), reqwest::StatusCode::OK);
    assert!(sse
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .starts_with("text/event-stream"));
    drop(sse);

    // DELETE tears the session down; its inner connections follow.
    let delete = client
        .delete(format!("http://{addr}/mcp"))
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), reqwest::StatusCode::NO_CONTENT);

    let (status, _, _) = post(&client, addr, Some(&session_id), list_request("3", None)).await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    for _ in 0..200 {
        if fixture.coding.open_connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fixture.coding.open_connections(), 0);

    server.shutdown();
    fixture.proxy.close().await;
}

#[tokio::test]
async fn concurrent_http_clients_stay_isolated() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let server = fixture.proxy.serve_http(any_addr(), false).await.unwrap();
    let addr = server.local_addr();

    let client_a = reqwest::Client::new();
    let client_b = reqwest::Client::new();

    let (_, session_a, _) = post(&client_a, addr, None, init_request("a1")).await;
    let (_, session_b, _) = post(&client_b, addr, None, init_request("b1")).await;
    let session_a = session_a.unwrap();
    let session_b = session_b.unwrap();
    assert_ne!(session_a, session_b);

    // Each client sees only the tools of the variant it selects.
    let (_, _, body_a) = post(&client_a, addr, Some(&session_a), list_request("a2", None)).await;
    let (_, _, body_b) = post(
        &client_b,
        addr,
        Some(&session_b),
        list_request("b2", Some("compact")),
    )
    .await;
    assert_eq!(first_tool(&body_a.unwrap()), "analyze_code");
    assert_eq!(first_tool(&body_b.unwrap()), "summarize");

    // Concurrent calls to different variants do not cross-talk.
    let (a, b) = tokio::join!(
        post(
            &client_a,
            addr,
            Some(&session_a),
            call_request("a3", "analyze_code", None),
        ),
        post(
            &client_b,
            addr,
            Some(&session_b),
            call_request("b3", "summarize", Some("compact")),
        ),
    );
    let body_a = a.2.unwrap();
    let body_b = b.2.unwrap();
    assert!(body_a.is_success());
    assert!(body_b.is_success());
    assert!(
        body_a.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("analyzed")
    );
    assert_eq!(
        body_b.result.unwrap()["content"][0]["text"],
        json!("summary")
    );

    server.shutdown();
    fixture.proxy.close().await;
}

#[tokio::test]
async fn stateless_http_serves_headerless_requests() {
    init_logging();
    let fixture = two_variant_proxy().await;
    let server = fixture.proxy.serve_http(any_addr(), true).await.unwrap();
    let addr = server.local_addr();
    let client = reqwest::Client::new();

    // No initialize, no session header: requests ride the shared state.
    let (status, _, body) = post(&client, addr, None, list_request("1", None)).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(first_tool(&body.unwrap()), "analyze_code");

    let (status, _, body) = post(
        &client,
        addr,
        None,
        call_request("2", "lookup", Some("compact")),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(body.unwrap().is_success());

    // initialize still works but pins no session.
    let (status, session_id, body) = post(&client, addr, None, init_request("3")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(session_id.is_none());
    assert!(body.unwrap().is_success());

    // Only the shared inner connections exist.
    assert_eq!(fixture.coding.open_connections(), 1);
    assert_eq!(fixture.proxy.active_sessions(), 0);

    server.shutdown();
    fixture.proxy.close().await;
}
