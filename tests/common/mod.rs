//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use dvpn_link::config::TrayConfig;

pub fn tray_config(port: u16) -> TrayConfig {
    TrayConfig {
        url: format!("ws://127.0.0.1:{port}"),
        connect_timeout_ms: 2_000,
        request_timeout_ms: 2_000,
        max_reconnect_attempts: 5,
        reconnect_base_delay_ms: 10,
    }
}

/// Serve WebSocket connections forever. Every text frame is passed to
/// `reply`; `Some((delay, value))` is sent back after `delay`. Received
/// frames are forwarded on the returned channel.
pub async fn spawn_tray<F>(reply: F) -> (u16, Arc<AtomicUsize>, mpsc::UnboundedReceiver<Value>)
where
    F: Fn(&Value) -> Option<(Duration, Value)> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let reply = Arc::new(reply);

    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let reply = Arc::clone(&reply);
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (sink, mut reader) = ws.split();
                let sink = Arc::new(tokio::sync::Mutex::new(sink));
                while let Some(Ok(msg)) = reader.next().await {
                    let Message::Text(text) = msg else { continue };
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    let _ = seen_tx.send(value.clone());
                    if let Some((delay, out)) = reply(&value) {
                        let sink = Arc::clone(&sink);
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = sink.lock().await.send(Message::Text(out.to_string().into())).await;
                        });
                    }
                }
            });
        }
    });

    (port, accepts, seen_rx)
}

/// Echo the command back with `status: "ok"` and the same `request_id`.
pub fn ok_reply(cmd: &Value) -> Option<(Duration, Value)> {
    Some((
        Duration::ZERO,
        json!({
            "status": "ok",
            "command": cmd["command"],
            "n": cmd["n"],
            "request_id": cmd["request_id"],
        }),
    ))
}

/// A loopback port with nothing listening on it.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
