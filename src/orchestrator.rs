//! Tunnel negotiation: ask a node for credentials, then hand them to the tray.
//!
//! ```text
//! connect_to_node ─▶ NodeApi::generate_peer (https ×3, then http ×3)
//!                 ─▶ TunnelControl::activate(config, dvpn-<id>.conf)
//!                 ─▶ ConnectedNodeRef::set
//!
//! delete_peer     ─▶ TunnelControl::deactivate
//!                 ─▶ NodeApi::delete_peer (https ×3, then http ×3)
//!                 ─▶ ConnectedNodeRef::clear      (always)
//! ```
//!
//! Only connection-level failures are retried or fall back to HTTP. A node
//! that answers with an error status stops the operation at once.

use std::future::Future;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ConnectError, NodeError, TrayError};
use crate::node::retry::with_fallback;
use crate::node::{NodeApi, RetryPolicy, TunnelConfig};
use crate::state::ConnectedNodeRef;
use crate::tray::TrayClient;

/// Brings the local tunnel up and down. Implemented by [`TrayClient`].
pub trait TunnelControl: Send + Sync {
    fn activate(
        &self,
        config: &str,
        filename: &str,
    ) -> impl Future<Output = Result<(), TrayError>> + Send;

    fn deactivate(&self) -> impl Future<Output = Result<(), TrayError>> + Send;
}

impl TunnelControl for TrayClient {
    async fn activate(&self, config: &str, filename: &str) -> Result<(), TrayError> {
        self.activate_vpn(config, filename).await.map(|_| ())
    }

    async fn deactivate(&self) -> Result<(), TrayError> {
        self.deactivate_vpn().await.map(|_| ())
    }
}

/// How far a best-effort teardown got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// Tunnel deactivated and peer removed on the node.
    FullySucceeded,
    /// Tunnel deactivated, but the node could not be told.
    LocalOnly { remote: String },
    /// The tray refused or could not be reached. `remote` is `None` when the
    /// node cleanup itself went through.
    Incomplete {
        local: String,
        remote: Option<String>,
    },
}

impl TeardownOutcome {
    fn from_results(local: Result<(), TrayError>, remote: Result<(), NodeError>) -> Self {
        match (local, remote) {
            (Ok(()), Ok(())) => TeardownOutcome::FullySucceeded,
            (Ok(()), Err(remote)) => TeardownOutcome::LocalOnly {
                remote: remote.to_string(),
            },
            (Err(local), remote) => TeardownOutcome::Incomplete {
                local: local.to_string(),
                remote: remote.err().map(|e| e.to_string()),
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        *self == TeardownOutcome::FullySucceeded
    }
}

/// Drives negotiation against nodes and activation through the tray.
pub struct TunnelOrchestrator<N, T> {
    node: N,
    tray: T,
    policy: RetryPolicy,
    connected: ConnectedNodeRef,
}

impl<N: NodeApi, T: TunnelControl> TunnelOrchestrator<N, T> {
    pub fn new(node: N, tray: T, policy: RetryPolicy, connected: ConnectedNodeRef) -> Self {
        Self {
            node,
            tray,
            policy,
            connected,
        }
    }

    /// The shared connected-node record.
    pub fn connected(&self) -> &ConnectedNodeRef {
        &self.connected
    }

    /// Negotiate a tunnel with `node_ip` for `user_id` and activate it.
    pub async fn connect_to_node(
        &self,
        node_id: &str,
        node_ip: &str,
        user_id: &str,
    ) -> Result<TunnelConfig, ConnectError> {
        info!(node_id, node_ip, "negotiating tunnel");
        let (scheme, mut tunnel) = with_fallback(&self.policy, "generate-peer", |scheme| {
            self.node.generate_peer(scheme, node_ip, user_id)
        })
        .await
        .map_err(|e| {
            warn!(node_ip, "negotiation failed: {e}");
            ConnectError::from_node(e)
        })?;
        tunnel.fill_missing(node_id, node_ip);

        let filename = tunnel_filename(node_id);
        self.tray
            .activate(&tunnel.config, &filename)
            .await
            .map_err(ConnectError::Activation)?;

        self.connected.set(node_id, node_ip).await;
        info!(node_id, %scheme, filename = %filename, "tunnel active");
        Ok(tunnel)
    }

    /// Deactivate the local tunnel, then remove the peer on `node_ip`.
    ///
    /// Never fails; the connected-node record is cleared whatever happens.
    pub async fn delete_peer(&self, node_ip: &str, user_id: &str) -> TeardownOutcome {
        let local = self.tray.deactivate().await;
        if let Err(e) = &local {
            warn!("tunnel deactivation failed: {e}");
        }

        let remote = with_fallback(&self.policy, "delete-peer", |scheme| {
            self.node.delete_peer(scheme, node_ip, user_id)
        })
        .await
        .map(|_| ());
        if let Err(e) = &remote {
            warn!(node_ip, "peer cleanup failed: {e}");
        }

        self.connected.clear().await;
        let outcome = TeardownOutcome::from_results(local, remote);
        info!(node_ip, ?outcome, "tunnel torn down");
        outcome
    }

    /// Tear down whichever node is currently connected. `None` if none is.
    pub async fn disconnect(&self, user_id: &str) -> Option<TeardownOutcome> {
        let node = self.connected.current().await?;
        Some(self.delete_peer(&node.node_ip, user_id).await)
    }
}

/// `dvpn-<first 8 alphanumerics of node_id, lowercased>.conf`, with a
/// leading `0x` dropped.
pub fn tunnel_filename(node_id: &str) -> String {
    let trimmed = node_id
        .strip_prefix("0x")
        .or_else(|| node_id.strip_prefix("0X"))
        .unwrap_or(node_id);
    let stem: String = trimmed
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if stem.is_empty() {
        "dvpn-node.conf".to_string()
    } else {
        format!("dvpn-{stem}.conf")
    }
}
