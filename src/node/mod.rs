//! Remote node peer API.
//!
//! - `client.rs`: [`NodeClient`], reqwest-backed implementation of [`NodeApi`]
//! - `peer.rs`: [`TunnelConfig`] and its presentation metadata
//! - `retry.rs`: [`RetryPolicy`], `with_retry`, `with_fallback`

use std::fmt;
use std::future::Future;

pub mod client;
pub mod peer;
pub mod retry;

pub use client::NodeClient;
pub use peer::{ConnectionInfo, SubscriptionInfo, TunnelConfig};
pub use retry::RetryPolicy;

use crate::error::NodeError;

/// Transport variant for a node call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    /// Secure first, then insecure.
    pub const FALLBACK_ORDER: [Scheme; 2] = [Scheme::Https, Scheme::Http];

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The node calls the orchestrator needs. Implemented by [`NodeClient`].
pub trait NodeApi: Send + Sync {
    /// `POST /generate-peer`: negotiate tunnel credentials for `user_id`.
    fn generate_peer(
        &self,
        scheme: Scheme,
        node_ip: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<TunnelConfig, NodeError>> + Send;

    /// `POST /delete-peer`: drop `user_id`'s peer on the node.
    fn delete_peer(
        &self,
        scheme: Scheme,
        node_ip: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<(), NodeError>> + Send;
}
