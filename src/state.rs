//! Which node, if any, the tunnel is currently up against.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// The node a tunnel was last activated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedNode {
    pub node_id: String,
    pub node_ip: String,
}

/// Shared handle to the connected-node record. Cloning shares the record.
#[derive(Debug, Clone, Default)]
pub struct ConnectedNodeRef {
    inner: Arc<RwLock<Option<ConnectedNode>>>,
}

impl ConnectedNodeRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, node_id: &str, node_ip: &str) {
        *self.inner.write().await = Some(ConnectedNode {
            node_id: node_id.to_string(),
            node_ip: node_ip.to_string(),
        });
    }

    /// Forget the current node, returning what was recorded.
    pub async fn clear(&self) -> Option<ConnectedNode> {
        self.inner.write().await.take()
    }

    pub async fn current(&self) -> Option<ConnectedNode> {
        self.inner.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_clear() {
        let state = ConnectedNodeRef::new();
        assert!(!state.is_connected().await);

        state.set("node-a", "10.0.0.1").await;
        let copy = state.clone();
        assert_eq!(
            copy.current().await,
            Some(ConnectedNode {
                node_id: "node-a".into(),
                node_ip: "10.0.0.1".into()
            })
        );

        state.set("node-b", "10.0.0.2").await;
        assert_eq!(copy.current().await.unwrap().node_id, "node-b");

        assert_eq!(copy.clear().await.unwrap().node_ip, "10.0.0.2");
        assert!(!state.is_connected().await);
        assert_eq!(state.clear().await, None);
    }
}
