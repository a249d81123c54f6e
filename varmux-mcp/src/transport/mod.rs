//! MCP transport layer abstraction and implementations.
//!
//! Two transports are provided:
//! - [`memory`]: a cross-wired in-memory pair, the reference wiring
//!   between the varmux proxy and its inner variant servers
//! - [`stdio`]: newline-delimited JSON over arbitrary byte pipes,
//!   including the process stdin/stdout pair
//!
//! Transports are message-oriented and shareable: every method takes
//! `&self` so a single endpoint can serve concurrent request handlers.

pub mod memory;
pub mod stdio;

pub use memory::InMemoryTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;

use crate::error::McpResult;
use crate::messages::JsonRpcMessage;

/// Core transport trait for MCP communication.
///
/// Implementations deliver whole [`JsonRpcMessage`]s in order and signal
/// end-of-stream by returning `Ok(None)` from [`Transport::recv`]. After
/// [`Transport::close`] both directions are dead: sends fail and pending
/// receives resolve to `Ok(None)`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the peer.
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()>;

    /// Receive the next message from the peer.
    ///
    /// Returns `Ok(None)` once the transport is closed from either side.
    /// Only one task may receive at a time; the session pumps in this
    /// crate are the sole receivers.
    async fn recv(&self) -> McpResult<Option<JsonRpcMessage>>;

    /// Close the transport, releasing both directions.
    ///
    /// Closing is idempotent.
    async fn close(&self);

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool;
}
