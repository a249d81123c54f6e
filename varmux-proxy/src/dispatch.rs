//! The dispatcher: routes one front request to the right inner session.
//!
//! Resolution order: an explicit `_meta` selector wins; otherwise the
//! session's cached ranking from `initialize` picks the default. Cursors
//! are unwrapped against the active variant on the way in and re-wrapped
//! on the way out, and resolution-class errors from inner sessions are
//! enriched with the active variant id.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use varmux_mcp::messages::{
    CallToolRequest, CompleteRequest, GetPromptRequest, JsonRpcError, ListPromptsRequest,
    ListResourceTemplatesRequest, ListResourcesRequest, ListToolsRequest, ReadResourceRequest,
    SubscribeRequest, UnsubscribeRequest, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use varmux_mcp::server::RequestContext;
use varmux_mcp::McpError;

use crate::backend::InnerConnection;
use crate::cursor;
use crate::session::SessionState;
use crate::VARIANT_META_KEY;

/// Routes the methods of one request against one session's state.
pub struct Dispatcher<'a> {
    state: &'a SessionState,
    rank: &'a [String],
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher over the session's state and cached ranking.
    pub fn new(state: &'a SessionState, rank: &'a [String]) -> Self {
        Self { state, rank }
    }

    /// Dispatch one routed method.
    pub async fn dispatch(&self, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let variant = self.resolve_variant(ctx.params.as_ref())?;
        debug!(method = %ctx.method, variant = %variant, "dispatching");

        match ctx.method.as_str() {
            "tools/list" => self.list_tools(&variant, ctx).await,
            "tools/call" => self.call_tool(&variant, ctx).await,
            "resources/list" => self.list_resources(&variant, ctx).await,
            "resources/templates/list" => self.list_resource_templates(&variant, ctx).await,
            "resources/read" => self.read_resource(&variant, ctx).await,
            "resources/subscribe" => self.subscribe(&variant, ctx).await,
            "resources/unsubscribe" => self.unsubscribe(&variant, ctx).await,
            "prompts/list" => self.list_prompts(&variant, ctx).await,
            "prompts/get" => self.get_prompt(&variant, ctx).await,
            "completion/complete" => self.complete(&variant, ctx).await,
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    // `_meta` selector if present and valid, else the first-ranked variant.
    fn resolve_variant(&self, params: Option<&Value>) -> Result<String, JsonRpcError> {
        let requested = params
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get(VARIANT_META_KEY))
            .and_then(|v| v.as_str());

        match requested {
            Some(id) if self.state.connection(id).is_some() => Ok(id.to_string()),
            Some(id) => Err(JsonRpcError::invalid_params_with_data(
                "Invalid server variant",
                json!({
                    "requestedVariant": id,
                    "availableVariants": self.rank,
                }),
            )),
            None => self
                .rank
                .first()
                .cloned()
                .ok_or_else(|| JsonRpcError::internal_error("no ranked variants")),
        }
    }

    fn connection(&self, variant: &str) -> Result<&InnerConnection, JsonRpcError> {
        self.state.connection(variant).ok_or_else(|| {
            JsonRpcError::internal_error(format!("no inner session for variant {variant}"))
        })
    }

    async fn list_tools(&self, variant: &str, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let mut request: ListToolsRequest = parse_params(ctx)?;
        request.meta = None;
        request.cursor = unwrap_cursor(request.cursor, variant)?;

        let mut result = self
            .connection(variant)?
            .session
            .list_tools(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        result.next_cursor = result.next_cursor.map(|c| cursor::wrap(&c, variant));
        to_result(result)
    }

    async fn call_tool(&self, variant: &str, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let mut request: CallToolRequest = parse_params(ctx)?;
        request.meta = None;

        let result = self
            .connection(variant)?
            .session
            .call_tool(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        to_result(result)
    }

    async fn list_resources(
        &self,
        variant: &str,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let mut request: ListResourcesRequest = parse_params(ctx)?;
        request.meta = None;
        request.cursor = unwrap_cursor(request.cursor, variant)?;

        let mut result = self
            .connection(variant)?
            .session
            .list_resources(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        result.next_cursor = result.next_cursor.map(|c| cursor::wrap(&c, variant));
        to_result(result)
    }

    async fn list_resource_templates(
        &self,
        variant: &str,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let mut request: ListResourceTemplatesRequest = parse_params(ctx)?;
        request.meta = None;
        request.cursor = unwrap_cursor(request.cursor, variant)?;

        let mut result = self
            .connection(variant)?
            .session
            .list_resource_templates(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        result.next_cursor = result.next_cursor.map(|c| cursor::wrap(&c, variant));
        to_result(result)
    }

    async fn read_resource(
        &self,
        variant: &str,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let mut request: ReadResourceRequest = parse_params(ctx)?;
        request.meta = None;

        let result = self
            .connection(variant)?
            .session
            .read_resource(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        to_result(result)
    }

    async fn subscribe(&self, variant: &str, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let mut request: SubscribeRequest = parse_params(ctx)?;
        request.meta = None;
        let uri = request.uri.clone();

        self.connection(variant)?
            .session
            .subscribe(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        self.state
            .bind_subscription(uri, variant.to_string())
            .await;
        Ok(json!({}))
    }

    async fn unsubscribe(
        &self,
        variant: &str,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let mut request: UnsubscribeRequest = parse_params(ctx)?;
        request.meta = None;
        let uri = request.uri.clone();

        // Inner servers accept unsubscribes for resources that no longer
        // exist, so this stays forwardable even after a variant drops the
        // resource.
        self.connection(variant)?
            .session
            .unsubscribe(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        self.state.unbind_subscription(&uri).await;
        Ok(json!({}))
    }

    async fn list_prompts(
        &self,
        variant: &str,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let mut request: ListPromptsRequest = parse_params(ctx)?;
        request.meta = None;
        request.cursor = unwrap_cursor(request.cursor, variant)?;

        let mut result = self
            .connection(variant)?
            .session
            .list_prompts(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        result.next_cursor = result.next_cursor.map(|c| cursor::wrap(&c, variant));
        to_result(result)
    }

    async fn get_prompt(&self, variant: &str, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let mut request: GetPromptRequest = parse_params(ctx)?;
        request.meta = None;

        let result = self
            .connection(variant)?
            .session
            .get_prompt(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        to_result(result)
    }

    async fn complete(&self, variant: &str, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
        let mut request: CompleteRequest = parse_params(ctx)?;
        request.meta = None;

        let result = self
            .connection(variant)?
            .session
            .complete(request)
            .await
            .map_err(|e| enrich_error(e, variant))?;
        to_result(result)
    }
}

// Client cursor -> inner cursor for the active variant. The wrapped empty
// cursor degenerates to no cursor at all.
fn unwrap_cursor(cursor: Option<String>, variant: &str) -> Result<Option<String>, JsonRpcError> {
    match cursor {
        None => Ok(None),
        Some(cursor) => {
            let inner = cursor::unwrap(&cursor, variant)?;
            Ok((!inner.is_empty()).then_some(inner))
        }
    }
}

/// Enrich resolution-class inner errors with the active variant.
///
/// Only `-32602` and `-32601` gain an `activeVariant` key; every other
/// code passes through byte-identical. The enriched error is a fresh
/// object, the inner error is never mutated in place.
pub(crate) fn enrich_error(error: McpError, variant: &str) -> JsonRpcError {
    match error {
        McpError::Rpc(inner)
            if inner.code == INVALID_PARAMS || inner.code == METHOD_NOT_FOUND =>
        {
            let data = match &inner.data {
                Some(Value::Object(map)) => {
                    let mut merged = map.clone();
                    merged.insert("activeVariant".to_string(), json!(variant));
                    Value::Object(merged)
                }
                Some(other) => json!({
                    "detail": other,
                    "activeVariant": variant,
                }),
                None => json!({"activeVariant": variant}),
            };
            JsonRpcError::new(inner.code, inner.message.clone(), Some(data))
        }
        McpError::Rpc(inner) => inner,
        other => JsonRpcError::internal_error(other.to_string()),
    }
}

fn parse_params<T: DeserializeOwned>(ctx: &RequestContext) -> Result<T, JsonRpcError> {
    let value = ctx.params.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
