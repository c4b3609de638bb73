#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! dvpn-link library: tunnel setup and teardown for a dVPN client.
//!
//! Two channels are coordinated:
//!
//! - `tray`: one persistent WebSocket to the local tray process, which owns
//!   the tunnel device. Commands queue while it is down and are correlated
//!   with replies by `request_id`.
//! - `node`: HTTP calls to a remote node that issues tunnel credentials,
//!   HTTPS first with HTTP as a fallback.
//!
//! `orchestrator` ties them together, `state` records which node is up,
//! `config` and `error` are shared by everything.

pub mod config;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod state;
pub mod tray;

pub use config::Config;
pub use error::{ConfigError, ConnectError, NodeError, TrayError};
pub use node::{NodeApi, NodeClient, RetryPolicy, Scheme, TunnelConfig};
pub use orchestrator::{TeardownOutcome, TunnelControl, TunnelOrchestrator};
pub use state::{ConnectedNode, ConnectedNodeRef};
pub use tray::{ChannelState, TrayClient, TrayCommand};
