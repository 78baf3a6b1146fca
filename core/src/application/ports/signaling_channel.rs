use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SignalingError;

/// Child-added/child-removed notification for an append-ordered list or a
/// keyed subtree. Subscriptions replay existing children before delivering
/// live changes, so consumers see at-least-once delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    Added { key: String, value: Value },
    Removed { key: String },
}

pub type ChildStream = mpsc::UnboundedReceiver<ChildEvent>;

/// Scalar-value subscription stream. `None` means the value is absent
/// (initially, or after removal).
pub type ValueStream = mpsc::UnboundedReceiver<Option<Value>>;

/// Narrow port over the hierarchical key-value signaling store. Paths are
/// `/`-separated; all session paths are namespaced under `rooms/{roomId}`.
///
/// Delivery is asynchronous and ordered only within a single append-ordered
/// list. A network partition surfaces as non-delivery, not as an error, so
/// callers needing failure detection must layer their own timeouts.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Idempotent point write; last write wins.
    async fn write_value(&self, path: &str, value: Value) -> Result<(), SignalingError>;

    /// Append a uniquely-keyed child, preserving insertion order for
    /// iteration. Returns the generated key.
    async fn push_value(&self, path: &str, value: Value) -> Result<String, SignalingError>;

    /// Current value at `path`, if any.
    async fn read_value(&self, path: &str) -> Result<Option<Value>, SignalingError>;

    /// Subscribe to direct children of `path`: existing children are
    /// replayed in order, then additions and removals stream live.
    async fn subscribe_child_added(&self, path: &str) -> Result<ChildStream, SignalingError>;

    /// Subscribe to every change of the scalar at `path`, starting with its
    /// current state.
    async fn subscribe_value(&self, path: &str) -> Result<ValueStream, SignalingError>;

    /// Delete the subtree rooted at `path`.
    async fn remove_value(&self, path: &str) -> Result<(), SignalingError>;
}
