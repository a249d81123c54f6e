//! Variant descriptors and the immutable variant registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;

/// Lifecycle status of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantStatus {
    /// Production-ready
    Stable,
    /// Available for evaluation, may change
    Experimental,
    /// Scheduled for removal
    Deprecated,
}

impl VariantStatus {
    /// Ranking weight: stable sorts before experimental, experimental
    /// before deprecated. Unknown (absent) status sorts last.
    pub fn weight(status: Option<VariantStatus>) -> u8 {
        match status {
            Some(Self::Stable) => 0,
            Some(Self::Experimental) => 1,
            Some(Self::Deprecated) => 2,
            None => 3,
        }
    }

    /// The wire spelling of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Experimental => "experimental",
            Self::Deprecated => "deprecated",
        }
    }
}

/// Deprecation details advertised alongside a deprecated variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeprecationInfo {
    /// Human-readable deprecation message
    pub message: String,

    /// Id of the variant replacing this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,

    /// ISO date after which the variant may disappear
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_date: Option<String>,
}

/// Description of one variant, as advertised to clients.
///
/// `priority` is registry-internal (lower ranks earlier under the default
/// ranker) and never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDescriptor {
    /// Unique variant id
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// Matchable metadata (model family, use case, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<HashMap<String, String>>,

    /// Lifecycle status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VariantStatus>,

    /// Deprecation details, for deprecated variants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation_info: Option<DeprecationInfo>,

    /// Ranking priority, lower ranks earlier
    #[serde(skip, default)]
    pub priority: i64,
}

impl VariantDescriptor {
    /// Create a descriptor with the given id and description.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hints: None,
            status: None,
            deprecation_info: None,
            priority: 0,
        }
    }

    /// Set the lifecycle status.
    pub fn with_status(mut self, status: VariantStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a hint key/value pair.
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Mark the variant deprecated with the given details.
    pub fn with_deprecation(mut self, info: DeprecationInfo) -> Self {
        self.status = Some(VariantStatus::Deprecated);
        self.deprecation_info = Some(info);
        self
    }
}

/// A single hint value: a string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    /// One value
    One(String),
    /// Ordered alternatives, most preferred first
    Many(Vec<String>),
}

impl HintValue {
    /// Whether the hint names the given value.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(v) => v == value,
            Self::Many(vs) => vs.iter().any(|v| v == value),
        }
    }

    /// The first (most preferred) value.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(vs) => vs.first().map(String::as_str),
        }
    }
}

/// Ranking hints a client sends inside its `initialize` capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantHints {
    /// Free-form description of what the client wants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Structured hints; unknown keys are ignored
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub hints: HashMap<String, HintValue>,
}

impl VariantHints {
    /// Whether the client expressed no preferences at all.
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.hints.is_empty()
    }

    /// Look up a hint by key.
    pub fn get(&self, key: &str) -> Option<&HintValue> {
        self.hints.get(key)
    }
}

/// One registry entry: a descriptor plus the backend serving it.
#[derive(Clone)]
pub struct RegistryEntry {
    /// The variant's descriptor, priority included
    pub descriptor: VariantDescriptor,

    /// The backend serving this variant
    pub backend: Arc<dyn Backend>,
}

/// Immutable, ordered collection of variants.
///
/// Built once through [`RegistryBuilder`]; there is no mutation after
/// construction.
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Descriptors in registration order, cloned.
    pub fn descriptors(&self) -> Vec<VariantDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Number of registered variants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a variant with the given id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.descriptor.id == id)
    }
}

/// One-shot builder for [`Registry`].
pub struct RegistryBuilder {
    entries: Vec<RegistryEntry>,
}

impl RegistryBuilder {
    /// Register a variant.
    ///
    /// The priority is recorded on the descriptor for the ranker.
    ///
    /// # Panics
    ///
    /// Panics on an empty or duplicate variant id. Registration happens
    /// during construction, so either is a caller bug, not a runtime
    /// condition.
    pub fn register(
        mut self,
        mut descriptor: VariantDescriptor,
        backend: Arc<dyn Backend>,
        priority: i64,
    ) -> Self {
        assert!(!descriptor.id.is_empty(), "variant id must not be empty");
        assert!(
            !self.entries.iter().any(|e| e.descriptor.id == descriptor.id),
            "duplicate variant id: {}",
            descriptor.id
        );
        descriptor.priority = priority;
        self.entries.push(RegistryEntry {
            descriptor,
            backend,
        });
        self
    }

    /// Finish the builder.
    ///
    /// # Panics
    ///
    /// Panics when no variant was registered.
    pub fn build(self) -> Registry {
        assert!(
            !self.entries.is_empty(),
            "a variant registry needs at least one variant"
        );
        Registry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::backend::InnerConnection;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use varmux_mcp::messages::ServerCapabilities;
    use varmux_mcp::server::ServerSession;
    use varmux_mcp::McpResult;

    struct NullBackend;

    #[async_trait]
    impl Backend for NullBackend {
        async fn capabilities(&self) -> McpResult<ServerCapabilities> {
            Ok(ServerCapabilities::default())
        }

        async fn connect(
            &self,
            _descriptor: &VariantDescriptor,
            _front: Option<Arc<ServerSession>>,
        ) -> McpResult<InnerConnection> {
            Err(varmux_mcp::McpError::internal("null backend"))
        }

        async fn close(&self) {}
    }

    fn null() -> Arc<dyn Backend> {
        Arc::new(NullBackend)
    }

    #[test]
    fn test_registration_order_and_priority() {
        let registry = Registry::builder()
            .register(VariantDescriptor::new("b", "second"), null(), 5)
            .register(VariantDescriptor::new("a", "first"), null(), 1)
            .build();

        let descriptors = registry.descriptors();
        assert_eq!(descriptors[0].id, "b");
        assert_eq!(descriptors[0].priority, 5);
        assert_eq!(descriptors[1].id, "a");
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }

    #[test]
    #[should_panic(expected = "duplicate variant id")]
    fn test_duplicate_id_panics() {
        let _ = Registry::builder()
            .register(VariantDescriptor::new("dup", "one"), null(), 0)
            .register(VariantDescriptor::new("dup", "two"), null(), 1);
    }

    #[test]
    #[should_panic(expected = "at least one variant")]
    fn test_empty_registry_panics() {
        let _ = Registry::builder().build();
    }

    #[test]
    fn test_descriptor_wire_shape_hides_priority() {
        let descriptor = VariantDescriptor::new("v1-legacy", "Old packaging")
            .with_deprecation(DeprecationInfo {
                message: "Use v2".to_string(),
                replacement: Some("v2-stable".to_string()),
                removal_date: Some("2026-06-30".to_string()),
            });

        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["status"], json!("deprecated"));
        assert_eq!(value["deprecationInfo"]["removalDate"], json!("2026-06-30"));
        assert!(value.get("priority").is_none());
    }

    #[test]
    fn test_hint_value_shapes() {
        let hints: VariantHints = serde_json::from_value(json!({
            "description": "fast and small",
            "hints": {
                "modelFamily": "openai",
                "useCase": ["coding", "chat"]
            }
        }))
        .unwrap();

        assert!(hints.get("modelFamily").unwrap().contains("openai"));
        assert_eq!(hints.get("useCase").unwrap().first(), Some("coding"));
        assert!(hints.get("unknown").is_none());
        assert!(!hints.is_empty());
    }
}
