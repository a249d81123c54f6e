//! Newline-delimited JSON transport over byte pipes.
//!
//! One JSON-RPC message per line, the framing MCP uses for stdio
//! servers. [`StdioTransport::stdio`] binds the process pipes (one
//! session per process); [`StdioTransport::new`] accepts any reader and
//! writer pair, which is how the wire tests drive the framing through an
//! in-process duplex pipe.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::Transport;
use crate::error::{McpResult, TransportError};
use crate::messages::JsonRpcMessage;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-delimited JSON transport over an arbitrary byte pipe.
pub struct StdioTransport {
    reader: Mutex<BufReader<BoxReader>>,
    writer: Mutex<BoxWriter>,
    closed: CancellationToken,
}

impl StdioTransport {
    /// Create a transport over the given reader and writer.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(Box::new(reader) as BoxReader)),
            writer: Mutex::new(Box::new(writer) as BoxWriter),
            closed: CancellationToken::new(),
        }
    }

    /// Create a transport over the process stdin/stdout pair.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    async fn read_message(&self) -> McpResult<Option<JsonRpcMessage>> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await.map_err(|e| {
                TransportError::ReceiveFailed {
                    transport_type: "stdio".to_string(),
                    reason: e.to_string(),
                }
            })?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str::<JsonRpcMessage>(trimmed)
                .map(Some)
                .map_err(|e| {
                    TransportError::Framing {
                        transport_type: "stdio".to_string(),
                        reason: e.to_string(),
                    }
                    .into()
                });
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::closed("stdio", "transport closed").into());
        }
        let mut encoded = serde_json::to_string(&message)?;
        encoded.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| TransportError::SendFailed {
                transport_type: "stdio".to_string(),
                reason: e.to_string(),
            })?;
        writer.flush().await.map_err(|e| {
            TransportError::SendFailed {
                transport_type: "stdio".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn recv(&self) -> McpResult<Option<JsonRpcMessage>> {
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            message = self.read_message() => message,
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
