//! Control channel to the local tray process.
//!
//! The tray process owns the tunnel device and listens on a local WebSocket.
//! Everything that needs the tunnel brought up or down goes through a single
//! [`TrayClient`].
//!
//! - `client.rs`: [`TrayClient`], connection state machine, queue, reconnect
//! - `correlator.rs`: matches replies to pending requests by `request_id`
//! - `protocol.rs`: [`TrayCommand`] wire shape and reply classification
//! - `backoff.rs`: reconnect delay schedule

pub mod backoff;
pub mod client;
pub mod correlator;
pub mod protocol;

pub use client::{ChannelState, TrayClient};
pub use protocol::TrayCommand;
