//! Error types for the control channel, the node client, the orchestrator
//! and configuration loading.
//!
//! The split mirrors where a failure happened:
//!
//! - [`TrayError`]: anything between us and the local tray process
//! - [`NodeError`]: one HTTP exchange with a remote node
//! - [`ConnectError`]: the consolidated, user-facing result of
//!   [`TunnelOrchestrator::connect_to_node`](crate::orchestrator::TunnelOrchestrator::connect_to_node)
//! - [`ConfigError`]: reading or parsing the TOML config

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`TrayClient`](crate::tray::TrayClient) operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrayError {
    /// The tray process could not be reached, or the connection dropped
    /// while a request was in flight.
    #[error("tray process unavailable: {0}")]
    TransportUnavailable(String),
    /// Waited past the connect ceiling for the channel to open.
    #[error("timed out after {}ms waiting for the tray control channel", .0.as_millis())]
    ConnectTimeout(Duration),
    /// No correlated reply arrived within the request timeout.
    #[error("tray process did not reply within {}ms", .0.as_millis())]
    RequestTimeout(Duration),
    /// The tray replied with `status: "error"`.
    #[error("tray process reported an error: {0}")]
    Application(String),
    /// The reconnect ceiling was reached.
    #[error("gave up on the tray control channel after {attempts} reconnect attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    /// The command could not be encoded.
    #[error("invalid control message: {0}")]
    Protocol(String),
}

/// Errors from a single HTTP exchange with a node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// Connection-level failure: refused, reset, DNS, or a timeout before
    /// any response. Eligible for retry and transport fallback.
    #[error("could not reach node: {0}")]
    Network(String),
    /// The request failed for a reason retrying will not fix (bad URL,
    /// body read failure after the response started, ...).
    #[error("request to node failed: {0}")]
    Transport(String),
    /// The node answered with a non-2xx status.
    #[error("node rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    /// A 2xx response whose body could not be understood.
    #[error("unexpected response from node: {0}")]
    Protocol(String),
}

impl NodeError {
    /// Whether this failure qualifies for retry and insecure-transport fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Network(_))
    }

    /// Classify a `reqwest` failure.
    ///
    /// Anything that happened after a response started arriving (status,
    /// decode, body) or before a request could even be built is treated as
    /// non-transient; everything else is a connection-level failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = error_chain(err);
        if err.is_builder()
            || err.is_decode()
            || err.is_body()
            || err.is_redirect()
            || err.status().is_some()
        {
            NodeError::Transport(message)
        } else {
            NodeError::Network(message)
        }
    }
}

/// The user-facing outcome of a failed connect.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every attempt over both transports failed at the connection level.
    #[error("failed to connect to node, check your network")]
    Unreachable(#[source] NodeError),
    /// The node answered, but refused or returned something unusable.
    #[error("failed to connect to node: {0}")]
    Rejected(#[source] NodeError),
    /// Negotiation succeeded but the tray could not bring the tunnel up.
    #[error("failed to activate tunnel: {0}")]
    Activation(#[source] TrayError),
}

impl ConnectError {
    /// Wrap a node failure, keeping "could not reach" apart from "rejected".
    pub fn from_node(err: NodeError) -> Self {
        if err.is_transient() {
            ConnectError::Unreachable(err)
        } else {
            ConnectError::Rejected(err)
        }
    }

    /// The underlying cause, for diagnostics.
    pub fn detail(&self) -> String {
        match self {
            ConnectError::Unreachable(e) | ConnectError::Rejected(e) => e.to_string(),
            ConnectError::Activation(e) => e.to_string(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Render an error with its `source()` chain, `a: b: c`. A source whose text
/// the outer message already carries is not repeated.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let text = s.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = s.source();
    }
    out
}
