//! Negotiated tunnel material as returned by a node's `/generate-peer`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a successful negotiation. Handed once to the tray for
/// activation, otherwise only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Opaque tunnel credential blob (a WireGuard config).
    pub config: String,
    #[serde(rename = "nodeAddress", default, skip_serializing_if = "Option::is_none")]
    pub node_address: Option<String>,
    /// Older nodes report their identity as `peer_id` instead of `nodeAddress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(rename = "nodeIP", default, skip_serializing_if = "Option::is_none")]
    pub node_ip: Option<String>,
    /// QR-encodable form of `config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<ConnectionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionInfo>,
}

/// Human-readable connection summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Subscription status as seen by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    /// Unix seconds; some nodes send floats, so kept loosely typed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<Value>,
}

impl TunnelConfig {
    /// The node's network identity, whichever field it was reported in.
    pub fn node_identity(&self) -> Option<&str> {
        self.node_address.as_deref().or(self.peer_id.as_deref())
    }

    /// Fill identity fields the node left out from what the caller asked for.
    pub(crate) fn fill_missing(&mut self, node_id: &str, node_ip: &str) {
        if self.node_identity().is_none() {
            self.node_address = Some(node_id.to_string());
        }
        if self.node_ip.is_none() {
            self.node_ip = Some(node_ip.to_string());
        }
    }
}
