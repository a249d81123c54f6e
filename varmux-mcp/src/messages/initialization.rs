//! MCP initialization and protocol negotiation message types.
//!
//! The initialization sequence:
//! 1. Client sends an `initialize` request with capabilities and client info
//! 2. Server responds with its capabilities and server info
//! 3. Client sends a `notifications/initialized` notification
//!
//! Capability extensions (such as the variant-selection extension the
//! varmux proxy implements) ride inside the `experimental` maps on both
//! sides of the exchange.

use serde::{Deserialize, Serialize};

use super::{ClientCapabilities, Implementation, ProtocolVersion, RequestMeta, ServerCapabilities};

/// Client-to-server `initialize` request params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Protocol version requested by the client
    pub protocol_version: ProtocolVersion,

    /// Capabilities offered by the client
    #[serde(default)]
    pub capabilities: ClientCapabilities,

    /// Information about the client implementation
    pub client_info: Implementation,

    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

impl InitializeRequest {
    /// Create an initialization request with default capabilities.
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: ProtocolVersion::default(),
            capabilities: ClientCapabilities::default(),
            client_info,
            meta: None,
        }
    }

    /// Replace the client capabilities.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Server-to-client `initialize` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version that will be used for the session
    pub protocol_version: ProtocolVersion,

    /// Capabilities advertised by the server
    #[serde(default)]
    pub capabilities: ServerCapabilities,

    /// Information about the server implementation
    pub server_info: Implementation,

    /// Optional usage instructions for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Create an initialization result.
    pub fn new(
        protocol_version: ProtocolVersion,
        capabilities: ServerCapabilities,
        server_info: Implementation,
    ) -> Self {
        Self {
            protocol_version,
            capabilities,
            server_info,
            instructions: None,
        }
    }
}
