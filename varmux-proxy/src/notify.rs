//! Notification bridge: inner session -> front session.
//!
//! Each inner variant session gets one bridge. Progress and logging
//! notifications are re-emitted on the front session with the originating
//! variant id stamped into `_meta`; the remaining notification kinds are
//! absorbed. The bridge never fails: a front session that is already gone
//! (or was never there, in stateless mode) just drops the notification.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use varmux_mcp::client::NotificationHandler;
use varmux_mcp::messages::{
    ListChangedKind, LoggingMessageNotification, ProgressNotification, RequestMeta,
    ResourceUpdatedNotification,
};
use varmux_mcp::server::ServerSession;

use crate::VARIANT_META_KEY;

/// Forwards one variant's notifications to the front session.
pub struct NotificationBridge {
    variant_id: String,
    front: Option<Arc<ServerSession>>,
}

impl NotificationBridge {
    /// Create a bridge for the given variant. Without a front session
    /// (stateless assembly) every notification is dropped.
    pub fn new(variant_id: impl Into<String>, front: Option<Arc<ServerSession>>) -> Self {
        Self {
            variant_id: variant_id.into(),
            front,
        }
    }

    // Insert the variant id into `_meta`, keeping existing entries.
    fn stamp(&self, meta: Option<RequestMeta>) -> Option<RequestMeta> {
        let mut meta = meta.unwrap_or_default();
        meta.insert(
            VARIANT_META_KEY.to_string(),
            Value::String(self.variant_id.clone()),
        );
        Some(meta)
    }

    /// Hook for forwarding list-changed and resource-updated events to the
    /// front session.
    ///
    /// Currently a no-op: re-emitting these requires a generic
    /// send-notification operation on the front session that the runtime
    /// does not expose yet, so dynamic-capability changes inside a variant
    /// stay invisible to the client.
    fn forward_change_event(&self, kind: &str) {
        debug!(variant = %self.variant_id, kind, "change notification absorbed");
    }
}

#[async_trait]
impl NotificationHandler for NotificationBridge {
    async fn on_progress(&self, mut notification: ProgressNotification) {
        let Some(front) = &self.front else {
            debug!(variant = %self.variant_id, "dropping progress notification (no front session)");
            return;
        };
        notification.meta = self.stamp(notification.meta.take());
        if let Err(e) = front.send_progress(notification) {
            debug!(variant = %self.variant_id, error = %e, "dropping progress notification");
        }
    }

    async fn on_logging_message(&self, mut notification: LoggingMessageNotification) {
        let Some(front) = &self.front else {
            debug!(variant = %self.variant_id, "dropping logging notification (no front session)");
            return;
        };
        notification.meta = self.stamp(notification.meta.take());
        if let Err(e) = front.send_logging(notification) {
            debug!(variant = %self.variant_id, error = %e, "dropping logging notification");
        }
    }

    async fn on_resource_updated(&self, _notification: ResourceUpdatedNotification) {
        self.forward_change_event("resources/updated");
    }

    async fn on_list_changed(&self, kind: ListChangedKind) {
        self.forward_change_event(kind.method());
    }
}
