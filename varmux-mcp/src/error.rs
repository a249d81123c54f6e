//! Error types for MCP operations.
//!
//! The error system follows the structure of the wire protocol: everything
//! a peer reported comes through as a [`crate::messages::JsonRpcError`]
//! (the `Rpc` variant) so callers can inspect codes and data unchanged,
//! while local failures are grouped into transport and protocol errors.

use std::time::Duration;
use thiserror::Error;

use crate::messages::JsonRpcError;

/// The main error type for all MCP operations.
#[derive(Error, Debug)]
pub enum McpError {
    /// Transport-related errors (channel closed, framing, IO)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors (handshake, correlation, unexpected messages)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A JSON-RPC error returned by the peer, carried verbatim
    #[error("{0}")]
    Rpc(JsonRpcError),

    /// Operation exceeded its time limit
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        /// The underlying serde_json error
        source: serde_json::Error,
    },

    /// IO errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Generic errors for cases not covered by specific variants
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

/// Transport-specific errors.
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum TransportError {
    /// The transport (or its peer endpoint) has been closed
    #[error("Transport closed ({transport_type}): {reason}")]
    Closed {
        transport_type: String,
        reason: String,
    },

    /// Failed to send a message
    #[error("Failed to send message via {transport_type}: {reason}")]
    SendFailed {
        transport_type: String,
        reason: String,
    },

    /// Failed to receive a message
    #[error("Failed to receive message via {transport_type}: {reason}")]
    ReceiveFailed {
        transport_type: String,
        reason: String,
    },

    /// A line on the wire was not a valid JSON-RPC message
    #[error("Framing error ({transport_type}): {reason}")]
    Framing {
        transport_type: String,
        reason: String,
    },
}

/// Protocol-level errors related to MCP message handling.
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum ProtocolError {
    /// Protocol initialization failed
    #[error("Protocol initialization failed: {reason}")]
    InitializationFailed { reason: String },

    /// Operation attempted before the session was initialized
    #[error("Session not initialized: {reason}")]
    NotInitialized { reason: String },

    /// The peer sent a message the session cannot correlate or use
    #[error("Unexpected message: {reason}")]
    UnexpectedMessage { reason: String },

    /// Invalid or malformed response payload
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },
}

/// Convenience type alias for Results using McpError.
pub type McpResult<T> = Result<T, McpError>;

impl McpError {
    /// Create a new internal error with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// The JSON-RPC error a server should return when a handler fails with
    /// this error.
    ///
    /// A `Rpc` variant passes through verbatim; every local failure maps to
    /// an internal error so transport details never leak onto the wire as
    /// structured data.
    pub fn into_rpc_error(self) -> JsonRpcError {
        match self {
            Self::Rpc(err) => err,
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }

    /// Borrow the wire-level error if the peer reported one.
    pub fn as_rpc_error(&self) -> Option<&JsonRpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }

    /// Get the error category for this error, for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Rpc(_) => "rpc",
            Self::Timeout { .. } => "timeout",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        Self::Rpc(err)
    }
}

impl TransportError {
    /// Closed-transport error for the given transport type.
    pub fn closed(transport_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Closed {
            transport_type: transport_type.into(),
            reason: reason.into(),
        }
    }
}
