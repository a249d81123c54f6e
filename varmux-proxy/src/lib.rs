//! # varmux-proxy
//!
//! A variant-aware multiplexing proxy for the Model Context Protocol.
//!
//! A single front MCP server advertises the union of several *variants* --
//! distinct packagings of tools, resources and prompts targeted at
//! different model families, use cases or context budgets. Each variant is
//! backed by its own inner MCP session; every client request routes to one
//! of them based on the `io.modelcontextprotocol/server-variant` selector
//! in `_meta`, falling back to the ranking negotiated at `initialize`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use varmux_proxy::{InMemoryBackend, VariantDescriptor, VariantProxy, VariantStatus};
//! # async fn example(coding: varmux_mcp::server::McpServer, compact: varmux_mcp::server::McpServer) -> varmux_mcp::McpResult<()> {
//! let proxy = VariantProxy::builder("code-assist", "1.0.0")
//!     .variant(
//!         VariantDescriptor::new("coding", "Full coding toolchain")
//!             .with_status(VariantStatus::Stable),
//!         Arc::new(InMemoryBackend::new(coding)),
//!         0,
//!     )
//!     .variant(
//!         VariantDescriptor::new("compact", "Small-context packaging")
//!             .with_status(VariantStatus::Experimental),
//!         Arc::new(InMemoryBackend::new(compact)),
//!         1,
//!     )
//!     .build()
//!     .await?;
//!
//! let front = proxy.server(false).await?;
//! front.serve(Arc::new(varmux_mcp::transport::StdioTransport::stdio()));
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod backend;
pub mod capabilities;
pub mod cursor;
pub mod dispatch;
pub mod http;
pub mod notify;
pub mod proxy;
pub mod rank;
pub mod registry;
pub mod session;

pub use backend::{Backend, InMemoryBackend, InnerConnection};
pub use proxy::{VariantProxy, VariantProxyBuilder};
pub use rank::{default_rank, RankFn};
pub use registry::{
    DeprecationInfo, HintValue, Registry, RegistryBuilder, VariantDescriptor, VariantHints,
    VariantStatus,
};

/// `_meta` key selecting the variant for a single request.
pub const VARIANT_META_KEY: &str = "io.modelcontextprotocol/server-variant";

/// Experimental-capability key used in both directions of `initialize`.
pub const VARIANTS_CAPABILITY_KEY: &str = "io.modelcontextprotocol/server-variants";
