//! HTTP client for a node's peer API.
//!
//! [`NodeClient`] wraps `reqwest::Client` and provides typed methods for the
//! two endpoints every node serves on port 8000:
//!
//! - `POST /generate-peer`: `{ "user_id" }` → [`TunnelConfig`]
//! - `POST /delete-peer`: `{ "user_id" }` → any 2xx
//!
//! The scheme is chosen per call so the orchestrator can fall back from
//! HTTPS to HTTP.
//!
//! ## Error handling
//!
//! Transport failures are classified by [`NodeError::from_reqwest`]. Non-2xx
//! responses are parsed for an `error`, `detail` or `message` field in the
//! JSON body; if none is found the raw body is used as the message.

use serde_json::{json, Value};

use super::peer::TunnelConfig;
use super::{NodeApi, Scheme};
use crate::config::NodeConfig;
use crate::error::NodeError;

/// HTTP client shared by all node calls.
pub struct NodeClient {
    http: reqwest::Client,
    https_port: u16,
    http_port: u16,
}

impl NodeClient {
    pub fn new(config: &NodeConfig) -> Result<Self, NodeError> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::HeaderName::from_static("x-dvpn-client"),
            reqwest::header::HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| NodeError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            https_port: config.https_port,
            http_port: config.http_port,
        })
    }

    /// `{scheme}://{node_ip}:{port}/{path}`
    pub fn endpoint(&self, scheme: Scheme, node_ip: &str, path: &str) -> String {
        let port = match scheme {
            Scheme::Https => self.https_port,
            Scheme::Http => self.http_port,
        };
        format!("{scheme}://{node_ip}:{port}/{path}")
    }

    async fn post(&self, url: String, body: &Value) -> Result<Value, NodeError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest(&e))?;
        Self::handle_response(resp).await
    }

    /// Parse an HTTP response: returns the JSON body on success (`null` for
    /// an empty body), or a [`NodeError`] with the node's message on failure.
    async fn handle_response(resp: reqwest::Response) -> Result<Value, NodeError> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| NodeError::from_reqwest(&e))?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body)
                .map_err(|e| NodeError::Protocol(format!("invalid JSON from node: {e}")))
        } else {
            Err(NodeError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }
}

impl NodeApi for NodeClient {
    async fn generate_peer(
        &self,
        scheme: Scheme,
        node_ip: &str,
        user_id: &str,
    ) -> Result<TunnelConfig, NodeError> {
        let url = self.endpoint(scheme, node_ip, "generate-peer");
        let body = self.post(url, &json!({ "user_id": user_id })).await?;
        serde_json::from_value(body)
            .map_err(|e| NodeError::Protocol(format!("invalid peer configuration: {e}")))
    }

    async fn delete_peer(&self, scheme: Scheme, node_ip: &str, user_id: &str) -> Result<(), NodeError> {
        let url = self.endpoint(scheme, node_ip, "delete-peer");
        self.post(url, &json!({ "user_id": user_id })).await?;
        Ok(())
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|key| v[*key].as_str().map(String::from))
        })
        .unwrap_or_else(|| body.to_string())
}
