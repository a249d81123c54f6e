//! MCP message types and JSON-RPC structures.
//!
//! All message types follow the MCP JSON-RPC 2.0 wire format: camelCase
//! field names, optional fields omitted when absent, and the `_meta`
//! extension point carried inside `params`.
//!
//! # Message categories
//!
//! - [`core`]: JSON-RPC request/response/notification/error structures
//! - [`initialization`]: protocol version negotiation and capability discovery
//! - [`tools`], [`resources`], [`prompts`], [`completion`]: the MCP surface
//!   the varmux dispatcher routes
//! - [`notifications`]: server-to-client progress, logging and change events

pub mod completion;
pub mod core;
pub mod initialization;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use completion::{CompleteRequest, CompleteResult, Completion, CompletionArgument, CompletionReference};
pub use self::core::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};
pub use initialization::{InitializeRequest, InitializeResult};
pub use notifications::{
    ListChangedKind, LogLevel, LoggingMessageNotification, ProgressNotification, ProgressToken,
    ResourceUpdatedNotification,
};
pub use prompts::{
    GetPromptRequest, GetPromptResult, ListPromptsRequest, ListPromptsResult, Prompt,
    PromptArgument, PromptContent, PromptMessage, PromptRole,
};
pub use resources::{
    ListResourceTemplatesRequest, ListResourceTemplatesResult, ListResourcesRequest,
    ListResourcesResult, ReadResourceRequest, ReadResourceResult, Resource, ResourceContents,
    ResourceTemplate, SubscribeRequest, UnsubscribeRequest,
};
pub use tools::{CallToolRequest, CallToolResult, ListToolsRequest, ListToolsResult, Tool, ToolContent};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The `_meta` object attached to MCP request params and notifications.
pub type RequestMeta = serde_json::Map<String, Value>;

/// MCP protocol version identifier.
///
/// Date-based versions; unknown versions round-trip as `Custom` for
/// forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// MCP protocol version 2024-11-05 (legacy)
    #[serde(rename = "2024-11-05")]
    V2024_11_05,

    /// MCP protocol version 2025-03-26 (current stable)
    #[serde(rename = "2025-03-26")]
    V2025_03_26,

    /// Custom version string for forward compatibility
    #[serde(untagged)]
    Custom(String),
}

impl ProtocolVersion {
    /// Get the string representation of the protocol version.
    pub fn as_str(&self) -> &str {
        match self {
            Self::V2024_11_05 => "2024-11-05",
            Self::V2025_03_26 => "2025-03-26",
            Self::Custom(version) => version,
        }
    }

    /// Check if this version is supported by the current implementation.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::V2024_11_05 | Self::V2025_03_26)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2025_03_26
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Implementation information for a client or server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name of the implementation
    pub name: String,

    /// Version of the implementation
    pub version: String,
}

impl Implementation {
    /// Create a new implementation info structure.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities a client declares during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities keyed by extension name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,

    /// Client support for server-initiated sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<HashMap<String, Value>>,

    /// Client support for filesystem roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
}

impl ClientCapabilities {
    /// Attach an experimental capability under the given extension key.
    pub fn with_experimental(mut self, key: impl Into<String>, value: Value) -> Self {
        self.experimental
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Capabilities a server advertises during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// The server exposes tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,

    /// The server exposes resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    /// The server exposes prompt templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,

    /// The server supports argument completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionsCapability>,

    /// The server emits logging notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,

    /// Experimental, non-standard capabilities keyed by extension name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

/// Tool-related server capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server emits `notifications/tools/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resource-related server capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether the server supports `resources/subscribe`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    /// Whether the server emits `notifications/resources/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompt-related server capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    /// Whether the server emits `notifications/prompts/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Marker capability: the server supports `completion/complete`.
///
/// The object is usually empty; unknown members are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompletionsCapability {
    /// Forward-compatible extension members
    #[serde(flatten)]
    pub extra: RequestMeta,
}

/// Marker capability: the server emits `notifications/message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingCapability {
    /// Forward-compatible extension members
    #[serde(flatten)]
    pub extra: RequestMeta,
}

/// Roots-related client capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// Whether the client emits `notifications/roots/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}
