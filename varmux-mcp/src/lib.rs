//! # varmux MCP runtime
//!
//! `varmux-mcp` provides the Model Context Protocol (MCP) building blocks
//! the varmux variant proxy is assembled from. It is a deliberately small
//! runtime rather than a full framework:
//!
//! - **Message types**: the JSON-RPC 2.0 structures and every MCP request,
//!   result and notification the proxy routes
//! - **Transports**: a cross-wired in-memory pair and newline-delimited
//!   JSON over arbitrary byte pipes (stdio included)
//! - **Client session**: a shareable, request-correlating MCP client with
//!   typed RPCs and a notification handler hook
//! - **Server runtime**: an MCP server with capability advertisement,
//!   registered tool/resource/prompt handlers, cursor pagination and a
//!   receiving-middleware chain
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use varmux_mcp::client::{ClientOptions, ClientSession};
//! use varmux_mcp::server::McpServer;
//! use varmux_mcp::transport::memory;
//!
//! # async fn example(server: McpServer) -> varmux_mcp::McpResult<()> {
//! let (local, remote) = memory::pair();
//! let serving = server.serve(Arc::new(remote));
//!
//! let session = ClientSession::connect(Arc::new(local), ClientOptions::default()).await?;
//! session.ping().await?;
//!
//! session.close().await;
//! serving.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod client;
pub mod error;
pub mod messages;
pub mod server;
pub mod transport;

// Re-export commonly used types for convenience
pub use client::{ClientOptions, ClientSession, NotificationHandler};
pub use error::{McpError, McpResult, ProtocolError, TransportError};
pub use messages::{
    Implementation, InitializeRequest, InitializeResult, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProtocolVersion, RequestId,
    ServerCapabilities,
};
pub use server::{McpServer, McpServerBuilder, Middleware, RequestContext, ServerSession};
pub use transport::Transport;

/// Current version of the varmux-mcp library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current MCP protocol version supported by this library
pub const PROTOCOL_VERSION: &str = "2025-03-26";
