//! End-to-end tests for the tray control channel against an in-process
//! WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

mod common;

use common::{free_port, ok_reply, spawn_tray, tray_config};
use dvpn_link::config::TrayConfig;
use dvpn_link::{ChannelState, TrayClient, TrayError};

#[tokio::test]
async fn activate_round_trip() {
    let (port, _, mut seen) = spawn_tray(ok_reply).await;
    let client = TrayClient::new(tray_config(port));

    let reply = client
        .activate_vpn("[Interface]\nPrivateKey = k", "dvpn-abc.conf")
        .await
        .unwrap();
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["command"], "connect");
    assert!(reply.get("request_id").is_none());

    let sent = seen.recv().await.unwrap();
    assert_eq!(sent["command"], "connect");
    assert_eq!(sent["config"], "[Interface]\nPrivateKey = k");
    assert_eq!(sent["filename"], "dvpn-abc.conf");
    assert!(sent["request_id"].is_string());

    assert_eq!(client.state(), ChannelState::Open);
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn queued_commands_flush_once_in_order() {
    let (port, accepts, mut seen) = spawn_tray(ok_reply).await;
    let client = TrayClient::new(tray_config(port));

    // All three are queued on the first poll, before any handshake completes.
    let (a, b, c) = tokio::join!(
        client.send_message(json!({"command": "ping", "n": 1})),
        client.send_message(json!({"command": "ping", "n": 2})),
        client.send_message(json!({"command": "ping", "n": 3})),
    );
    assert_eq!(a.unwrap()["n"], 1);
    assert_eq!(b.unwrap()["n"], 2);
    assert_eq!(c.unwrap()["n"], 3);

    let mut order = Vec::new();
    while let Ok(v) = seen.try_recv() {
        order.push(v["n"].as_i64().unwrap());
    }
    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(client.queued_len(), 0);
}

#[tokio::test]
async fn error_reply_becomes_application_error() {
    let (port, _, _seen) = spawn_tray(|cmd| {
        Some((
            Duration::ZERO,
            json!({"status": "error", "message": "wg-quick failed", "request_id": cmd["request_id"]}),
        ))
    })
    .await;
    let client = TrayClient::new(tray_config(port));

    let err = client.deactivate_vpn().await.unwrap_err();
    assert_eq!(err, TrayError::Application("wg-quick failed".into()));
}

#[tokio::test]
async fn reply_without_request_id_goes_to_oldest_pending() {
    let (port, _, _seen) = spawn_tray(|cmd| {
        Some((Duration::ZERO, json!({"status": "ok", "n": cmd["n"]})))
    })
    .await;
    let client = TrayClient::new(tray_config(port));

    let reply = client
        .send_message(json!({"command": "ping", "n": 7}))
        .await
        .unwrap();
    assert_eq!(reply["n"], 7);
}

#[tokio::test]
async fn late_reply_after_timeout_is_ignored() {
    let (port, _, _seen) = spawn_tray(|cmd| {
        let delay = if cmd["slow"] == true {
            Duration::from_millis(300)
        } else {
            Duration::ZERO
        };
        Some((
            delay,
            json!({"status": "ok", "n": cmd["n"], "request_id": cmd["request_id"]}),
        ))
    })
    .await;
    let client = TrayClient::new(TrayConfig {
        request_timeout_ms: 100,
        ..tray_config(port)
    });

    let err = client
        .send_message(json!({"command": "ping", "n": 1, "slow": true}))
        .await
        .unwrap_err();
    assert_eq!(err, TrayError::RequestTimeout(Duration::from_millis(100)));
    assert_eq!(client.pending_len(), 0);

    // Let the late reply arrive, then make sure it did not leak into the next request.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let reply = client
        .send_message(json!({"command": "ping", "n": 2}))
        .await
        .unwrap();
    assert_eq!(reply["n"], 2);
}

#[tokio::test]
async fn refused_endpoint_reports_unavailable() {
    let port = free_port().await;
    let client = TrayClient::new(tray_config(port));

    let err = client.connect().await.unwrap_err();
    assert!(
        matches!(err, TrayError::TransportUnavailable(_)),
        "got {err:?}"
    );
    client.close();
}

#[tokio::test]
async fn connect_times_out_when_handshake_never_completes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    let client = TrayClient::new(TrayConfig {
        connect_timeout_ms: 100,
        ..tray_config(port)
    });

    let err = client.connect().await.unwrap_err();
    assert_eq!(err, TrayError::ConnectTimeout(Duration::from_millis(100)));
    client.close();
}

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let (port, accepts, _seen) = spawn_tray(ok_reply).await;
    let client = TrayClient::new(tray_config(port));

    let (a, b, c) = tokio::join!(client.connect(), client.connect(), client.connect());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausts_after_five_reconnects_then_restarts_on_request() {
    // Accept and drop: every handshake fails.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    let client = TrayClient::new(TrayConfig {
        reconnect_base_delay_ms: 1,
        ..tray_config(port)
    });
    let mut states = client.subscribe();

    assert!(client.connect().await.is_err());
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| matches!(s, ChannelState::Exhausted { .. })),
    )
    .await
    .unwrap()
    .unwrap();
    // Initial attempt plus five reconnects.
    assert_eq!(accepts.load(Ordering::SeqCst), 6);

    // Stays down until someone asks again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);

    let err = client
        .send_message(json!({"command": "ping"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TrayError::Exhausted { attempts: 5, .. }), "got {err:?}");
    assert_eq!(accepts.load(Ordering::SeqCst), 12);
    assert_eq!(client.queued_len(), 0);
}

#[tokio::test]
async fn close_fails_in_flight_and_returns_to_idle() {
    let (port, _, mut seen) = spawn_tray(|_| None).await;
    let client = TrayClient::new(tray_config(port));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.send_message(json!({"command": "ping"})).await }
    });
    seen.recv().await.unwrap();
    assert_eq!(client.pending_len(), 1);

    client.close();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, TrayError::TransportUnavailable(_)), "got {err:?}");

    assert_eq!(client.state(), ChannelState::Idle);
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn send_right_after_close_reconnects() {
    let (port, accepts, _seen) = spawn_tray(ok_reply).await;
    let client = TrayClient::new(tray_config(port));
    client.connect().await.unwrap();

    client.close();
    assert_eq!(client.state(), ChannelState::Idle);

    let reply = client
        .send_message(json!({"command": "ping", "n": 1}))
        .await
        .unwrap();
    assert_eq!(reply["n"], 1);
    assert_eq!(client.state(), ChannelState::Open);
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connect_right_after_close_stays_open() {
    let (port, accepts, _seen) = spawn_tray(ok_reply).await;
    let client = TrayClient::new(tray_config(port));
    client.connect().await.unwrap();

    client.close();
    client.connect().await.unwrap();
    assert_eq!(client.state(), ChannelState::Open);

    // The retired connection winding down must not drag the state back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ChannelState::Open);
    assert_eq!(accepts.load(Ordering::SeqCst), 2);

    let reply = client
        .send_message(json!({"command": "ping", "n": 2}))
        .await
        .unwrap();
    assert_eq!(reply["n"], 2);
}
