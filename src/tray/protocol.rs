//! Control-channel wire format.
//!
//! Outbound commands are JSON objects with a `command` discriminator:
//!
//! ```json
//! {"command": "connect", "config": "<wg config>", "filename": "dvpn-ab12cd34.conf", "request_id": "..."}
//! {"command": "disconnect", "request_id": "..."}
//! ```
//!
//! `request_id` is attached by the client at send time. Replies carry a
//! `status` discriminator; `"error"` means failure and comes with a
//! `message`, anything else is success and is handed back verbatim.

use serde::Serialize;
use serde_json::Value;

use crate::error::TrayError;

/// Key under which every outbound command carries its correlation id.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Commands understood by the tray process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TrayCommand {
    /// Bring a tunnel up from `config`, stored on the tray side as `filename`.
    Connect { config: String, filename: String },
    /// Tear the active tunnel down.
    Disconnect,
}

impl TrayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TrayCommand::Connect { .. } => "connect",
            TrayCommand::Disconnect => "disconnect",
        }
    }

    pub fn to_value(&self) -> Result<Value, TrayError> {
        serde_json::to_value(self).map_err(|e| TrayError::Protocol(e.to_string()))
    }
}

/// Turn a tray reply into the caller's result.
pub fn classify_reply(reply: Value) -> Result<Value, TrayError> {
    if reply.get("status").and_then(Value::as_str) == Some("error") {
        let message = reply
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("tray process reported an error without a message")
            .to_string();
        return Err(TrayError::Application(message));
    }
    Ok(reply)
}
