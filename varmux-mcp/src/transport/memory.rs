//! In-memory transport pair.
//!
//! [`pair`] returns two endpoints whose send/receive sides are
//! cross-wired over unbounded channels. The varmux proxy uses one pair
//! per inner variant session: the inner server serves one endpoint and a
//! proxy-side client session connects through the other.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::Transport;
use crate::error::{McpResult, TransportError};
use crate::messages::JsonRpcMessage;

/// One endpoint of an in-memory transport pair.
pub struct InMemoryTransport {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    // Shared between both endpoints: cancelling it closes the pair.
    closed: CancellationToken,
}

/// Create a cross-wired transport pair.
///
/// Messages sent on one endpoint arrive on the other, in order. Closing
/// either endpoint closes both.
pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();

    let a = InMemoryTransport {
        tx: a_tx,
        rx: Mutex::new(a_rx),
        closed: closed.clone(),
    };
    let b = InMemoryTransport {
        tx: b_tx,
        rx: Mutex::new(b_rx),
        closed,
    };
    (a, b)
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::closed("memory", "pair closed").into());
        }
        self.tx
            .send(message)
            .map_err(|_| TransportError::closed("memory", "peer receiver dropped").into())
    }

    async fn recv(&self) -> McpResult<Option<JsonRpcMessage>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            message = rx.recv() => Ok(message),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
