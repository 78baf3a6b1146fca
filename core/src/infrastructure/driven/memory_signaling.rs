use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::application::ports::{ChildEvent, ChildStream, SignalingChannel, ValueStream};
use crate::error::SignalingError;

/// In-memory hierarchical key-value store with the delivery semantics the
/// managers are written against: point writes are last-write-wins, pushed
/// children keep insertion order, child subscriptions replay existing
/// children before live changes. Stands in for the vendor's real-time tree.
pub struct MemorySignaling {
    inner: RwLock<Tree>,
}

struct Tree {
    /// Leaf path -> value; interior nodes are implicit
    values: BTreeMap<String, Value>,
    child_subs: Vec<ChildSub>,
    value_subs: Vec<ValueSub>,
    push_seq: u64,
}

struct ChildSub {
    path: String,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

struct ValueSub {
    path: String,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tree {
                values: BTreeMap::new(),
                child_subs: Vec::new(),
                value_subs: Vec::new(),
                push_seq: 0,
            }),
        }
    }
}

impl Default for MemorySignaling {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(path: &str) -> Result<(), SignalingError> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(SignalingError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Direct parent of a leaf path, if it has one
fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn key_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, key)| key).unwrap_or(path)
}

impl Tree {
    fn notify_write(&mut self, path: &str, value: &Value) {
        self.value_subs.retain(|sub| {
            if sub.path == path {
                sub.tx.send(Some(value.clone())).is_ok()
            } else {
                true
            }
        });
        let parent = parent_of(path);
        let key = key_of(path).to_string();
        self.child_subs.retain(|sub| {
            if Some(sub.path.as_str()) == parent {
                sub.tx
                    .send(ChildEvent::Added {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .is_ok()
            } else {
                true
            }
        });
    }

    fn notify_removed(&mut self, path: &str) {
        self.value_subs.retain(|sub| {
            if sub.path == path {
                sub.tx.send(None).is_ok()
            } else {
                true
            }
        });
        let parent = parent_of(path);
        let key = key_of(path).to_string();
        self.child_subs.retain(|sub| {
            if Some(sub.path.as_str()) == parent {
                sub.tx.send(ChildEvent::Removed { key: key.clone() }).is_ok()
            } else {
                true
            }
        });
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn write_value(&self, path: &str, value: Value) -> Result<(), SignalingError> {
        validate(path)?;
        let mut tree = self.inner.write().await;
        tree.values.insert(path.to_string(), value.clone());
        tree.notify_write(path, &value);
        Ok(())
    }

    async fn push_value(&self, path: &str, value: Value) -> Result<String, SignalingError> {
        validate(path)?;
        let mut tree = self.inner.write().await;
        tree.push_seq += 1;
        // Sortable key so iteration preserves insertion order
        let key = format!(
            "{:012}-{}",
            tree.push_seq,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let child_path = format!("{}/{}", path, key);
        tree.values.insert(child_path.clone(), value.clone());
        tree.notify_write(&child_path, &value);
        Ok(key)
    }

    async fn read_value(&self, path: &str) -> Result<Option<Value>, SignalingError> {
        validate(path)?;
        let tree = self.inner.read().await;
        Ok(tree.values.get(path).cloned())
    }

    async fn subscribe_child_added(&self, path: &str) -> Result<ChildStream, SignalingError> {
        validate(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tree = self.inner.write().await;
        // Replay existing direct children in order before going live
        let prefix = format!("{}/", path);
        for (leaf, value) in tree.values.range(prefix.clone()..) {
            if !leaf.starts_with(&prefix) {
                break;
            }
            let relative = &leaf[prefix.len()..];
            if relative.contains('/') {
                continue;
            }
            let _ = tx.send(ChildEvent::Added {
                key: relative.to_string(),
                value: value.clone(),
            });
        }
        tree.child_subs.push(ChildSub {
            path: path.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn subscribe_value(&self, path: &str) -> Result<ValueStream, SignalingError> {
        validate(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tree = self.inner.write().await;
        let _ = tx.send(tree.values.get(path).cloned());
        tree.value_subs.push(ValueSub {
            path: path.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn remove_value(&self, path: &str) -> Result<(), SignalingError> {
        validate(path)?;
        let mut tree = self.inner.write().await;
        let prefix = format!("{}/", path);
        let removed: Vec<String> = tree
            .values
            .keys()
            .filter(|leaf| leaf.as_str() == path || leaf.starts_with(&prefix))
            .cloned()
            .collect();
        for leaf in removed {
            tree.values.remove(&leaf);
            tree.notify_removed(&leaf);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn point_writes_are_last_write_wins() {
        let store = MemorySignaling::new();
        store
            .write_value("rooms/r1/webrtc/p1/offer", json!({"sdp": "first"}))
            .await
            .unwrap();
        store
            .write_value("rooms/r1/webrtc/p1/offer", json!({"sdp": "second"}))
            .await
            .unwrap();
        let current = store.read_value("rooms/r1/webrtc/p1/offer").await.unwrap();
        assert_eq!(current, Some(json!({"sdp": "second"})));
    }

    #[tokio::test]
    async fn pushed_children_keep_insertion_order_on_replay() {
        let store = MemorySignaling::new();
        for n in 1..=3 {
            store
                .push_value("rooms/r1/list", json!(n))
                .await
                .unwrap();
        }
        let mut stream = store.subscribe_child_added("rooms/r1/list").await.unwrap();
        let mut replayed = Vec::new();
        while let Ok(ChildEvent::Added { value, .. }) = stream.try_recv() {
            replayed.push(value);
        }
        assert_eq!(replayed, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn live_child_additions_are_delivered_after_replay() {
        let store = MemorySignaling::new();
        store.push_value("rooms/r1/list", json!("a")).await.unwrap();
        let mut stream = store.subscribe_child_added("rooms/r1/list").await.unwrap();
        store.push_value("rooms/r1/list", json!("b")).await.unwrap();

        assert!(matches!(
            stream.recv().await,
            Some(ChildEvent::Added { value, .. }) if value == json!("a")
        ));
        assert!(matches!(
            stream.recv().await,
            Some(ChildEvent::Added { value, .. }) if value == json!("b")
        ));
    }

    #[tokio::test]
    async fn value_subscription_replays_current_state_first() {
        let store = MemorySignaling::new();
        let mut before = store.subscribe_value("rooms/r1/status").await.unwrap();
        assert_eq!(before.recv().await, Some(None));

        store
            .write_value("rooms/r1/status", json!("waiting"))
            .await
            .unwrap();
        assert_eq!(before.recv().await, Some(Some(json!("waiting"))));

        let mut after = store.subscribe_value("rooms/r1/status").await.unwrap();
        assert_eq!(after.recv().await, Some(Some(json!("waiting"))));
    }

    #[tokio::test]
    async fn subtree_removal_notifies_subscribers() {
        let store = MemorySignaling::new();
        store
            .write_value("rooms/r1/participants/p1", json!({"id": "p1"}))
            .await
            .unwrap();
        store
            .write_value("rooms/r1/status", json!("live"))
            .await
            .unwrap();

        let mut children = store
            .subscribe_child_added("rooms/r1/participants")
            .await
            .unwrap();
        let mut status = store.subscribe_value("rooms/r1/status").await.unwrap();
        // drain replays
        let _ = children.try_recv();
        let _ = status.try_recv();

        store.remove_value("rooms/r1").await.unwrap();
        assert_eq!(
            children.try_recv().ok(),
            Some(ChildEvent::Removed {
                key: "p1".to_string()
            })
        );
        assert_eq!(status.try_recv().ok(), Some(None));
        assert_eq!(store.read_value("rooms/r1/status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn paths_are_validated() {
        let store = MemorySignaling::new();
        assert!(store.write_value("", json!(1)).await.is_err());
        assert!(store.write_value("/leading", json!(1)).await.is_err());
        assert!(store.write_value("trailing/", json!(1)).await.is_err());
    }
}
