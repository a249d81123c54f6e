//! Variant-scoped pagination cursors.
//!
//! Inner servers hand out opaque cursors that are only meaningful to the
//! variant that produced them. The proxy wraps each one with its owning
//! variant id before it crosses to the client, and rejects cursors replayed
//! against a different variant.
//!
//! Wire format: base64url (no padding) of `{"v": <variant>, "c": <cursor>}`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use varmux_mcp::messages::JsonRpcError;

#[derive(Debug, Serialize, Deserialize)]
struct VariantCursor {
    v: String,
    c: String,
}

/// Wrap an inner cursor with its owning variant id.
///
/// The empty cursor wraps to itself.
pub fn wrap(inner_cursor: &str, variant_id: &str) -> String {
    if inner_cursor.is_empty() {
        return String::new();
    }
    let payload = VariantCursor {
        v: variant_id.to_string(),
        c: inner_cursor.to_string(),
    };
    // Serializing two strings cannot fail.
    let encoded = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(encoded)
}

/// Unwrap a client-supplied cursor, checking it belongs to the expected
/// variant.
///
/// The empty cursor unwraps to itself. A malformed cursor or one minted
/// under a different variant yields an invalid-params error; the mismatch
/// error carries both variant ids in its data.
pub fn unwrap(cursor: &str, expected_variant: &str) -> Result<String, JsonRpcError> {
    if cursor.is_empty() {
        return Ok(String::new());
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| JsonRpcError::invalid_params_with_data("Invalid cursor format", json!({})))?;
    let payload: VariantCursor = serde_json::from_slice(&decoded)
        .map_err(|_| JsonRpcError::invalid_params_with_data("Invalid cursor format", json!({})))?;

    if payload.v != expected_variant {
        return Err(JsonRpcError::invalid_params_with_data(
            "Cursor invalid for requested variant",
            json!({
                "cursorVariant": payload.v,
                "requestedVariant": expected_variant,
            }),
        ));
    }
    Ok(payload.c)
}
