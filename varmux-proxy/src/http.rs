//! Streamable-HTTP adapter for the front server.
//!
//! One MCP endpoint:
//! - `POST` carries a JSON-RPC message and returns the JSON response. An
//!   `initialize` without a session header opens a session and returns its
//!   id in `Mcp-Session-Id`; later requests present the header.
//! - `GET` with the header streams the session's notifications as SSE.
//! - `DELETE` with the header tears the session down.
//!
//! The `stateless` flag maps straight through to the proxy's stateless
//! mode: requests need no session header and each one runs on an
//! ephemeral server session over the shared inner connections.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use varmux_mcp::messages::JsonRpcMessage;
use varmux_mcp::server::{McpServer, SessionHandle};
use varmux_mcp::McpResult;

use crate::proxy::VariantProxy;

/// Session id header, per the streamable-HTTP transport.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

struct HttpState {
    server: McpServer,
    sessions: DashMap<String, Arc<SessionHandle>>,
    stateless: bool,
}

impl HttpState {
    fn session(&self, headers: &HeaderMap) -> Option<Arc<SessionHandle>> {
        let id = header_session_id(headers)?;
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Build the axum router serving the given front server.
pub fn router(server: McpServer, stateless: bool) -> Router {
    let state = Arc::new(HttpState {
        server,
        sessions: DashMap::new(),
        stateless,
    });
    Router::new()
        .route(
            "/mcp",
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(state)
}

async fn handle_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(message): Json<JsonRpcMessage>,
) -> Response {
    match message {
        JsonRpcMessage::Request(request) => {
            if let Some(id) = header_session_id(&headers) {
                let Some(handle) = state
                    .sessions
                    .get(&id)
                    .map(|entry| Arc::clone(entry.value()))
                else {
                    return (StatusCode::NOT_FOUND, "unknown session").into_response();
                };
                let response = handle.handle_request(request).await;
                return Json(response).into_response();
            }

            if state.stateless {
                // Ephemeral session per request over the shared state.
                let handle = state.server.open_session();
                let response = handle.handle_request(request).await;
                handle.close();
                return Json(response).into_response();
            }

            if request.method == "initialize" {
                let handle = Arc::new(state.server.open_session());
                let session_id = handle.session().id().to_string();
                let response = handle.handle_request(request).await;
                if response.is_error() {
                    handle.close();
                    return Json(response).into_response();
                }
                state.sessions.insert(session_id.clone(), handle);
                debug!(session = %session_id, "http session opened");
                return ([(SESSION_ID_HEADER, session_id)], Json(response)).into_response();
            }

            (
                StatusCode::BAD_REQUEST,
                "missing Mcp-Session-Id header; initialize first",
            )
                .into_response()
        }
        JsonRpcMessage::Notification(notification) => {
            if let Some(handle) = state.session(&headers) {
                handle.handle_notification(notification).await;
            }
            StatusCode::ACCEPTED.into_response()
        }
        JsonRpcMessage::Response(_) => {
            (StatusCode::BAD_REQUEST, "unexpected response message").into_response()
        }
    }
}

async fn handle_get(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(handle) = state.session(&headers) else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };
    let Some(receiver) = handle.take_notifications() else {
        return (StatusCode::CONFLICT, "notification stream already taken").into_response();
    };

    let stream = UnboundedReceiverStream::new(receiver).map(|notification| {
        let message = JsonRpcMessage::Notification(notification);
        let data = serde_json::to_string(&message).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, Infallible>(Event::default().data(data))
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_delete(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(id) = header_session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response();
    };
    match state.sessions.remove(&id) {
        Some((_, handle)) => {
            handle.close();
            debug!(session = %id, "http session deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        None => (StatusCode::NOT_FOUND, "unknown session").into_response(),
    }
}

/// A bound, running HTTP front server.
pub struct HttpServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl HttpServerHandle {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl VariantProxy {
    /// Build the axum router for this proxy.
    pub async fn http_router(&self, stateless: bool) -> McpResult<Router> {
        let server = self.server(stateless).await?;
        Ok(router(server, stateless))
    }

    /// Bind and serve the streamable-HTTP front server.
    pub async fn serve_http(
        &self,
        addr: SocketAddr,
        stateless: bool,
    ) -> McpResult<HttpServerHandle> {
        let app = self.http_router(stateless).await?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "http server exited with error");
            }
        });

        info!(%local_addr, stateless, "http front server listening");
        Ok(HttpServerHandle { local_addr, cancel })
    }
}
