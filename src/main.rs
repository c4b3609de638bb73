#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # dvpn-link
//!
//! Command-line front end for bringing a dVPN tunnel up or down.
//!
//! ## Subcommands
//!
//! - `dvpn-link connect --node-id <id> --node-ip <ip> --user-id <user>`
//! - `dvpn-link disconnect --node-ip <ip> --user-id <user>`
//! - `dvpn-link tray-status`
//!
//! Results go to stdout as JSON, logs go to stderr. Exit status is non-zero
//! when the operation failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{error, info};

use dvpn_link::{
    ChannelState, Config, ConnectedNodeRef, NodeClient, RetryPolicy, TrayClient,
    TunnelOrchestrator,
};

/// Bring a dVPN tunnel up or down through the local tray process.
#[derive(Parser)]
#[command(name = "dvpn-link", version)]
struct Cli {
    /// Path to TOML config file (default: ./dvpn.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate a tunnel with a node and activate it.
    Connect {
        #[arg(long)]
        node_id: String,
        #[arg(long)]
        node_ip: String,
        #[arg(long)]
        user_id: String,
    },
    /// Deactivate the tunnel and remove the peer on the node.
    Disconnect {
        #[arg(long)]
        node_ip: String,
        #[arg(long)]
        user_id: String,
    },
    /// Open the tray control channel and report its state.
    TrayStatus,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("dvpn-link: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    info!("dvpn-link v{} starting", env!("CARGO_PKG_VERSION"));

    let tray = TrayClient::new(config.tray.clone());
    let (ok, output) = match cli.command {
        Commands::TrayStatus => tray_status(&tray).await,
        Commands::Connect {
            node_id,
            node_ip,
            user_id,
        } => match orchestrator(&config, &tray) {
            Ok(o) => connect(&o, &node_id, &node_ip, &user_id).await,
            Err(output) => (false, output),
        },
        Commands::Disconnect { node_ip, user_id } => match orchestrator(&config, &tray) {
            Ok(o) => {
                let outcome = o.delete_peer(&node_ip, &user_id).await;
                let complete = outcome.is_complete();
                (complete, json!({ "success": complete, "teardown": outcome }))
            }
            Err(output) => (false, output),
        },
    };
    tray.close();

    println!(
        "{}",
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
    );
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

type Orchestrator = TunnelOrchestrator<NodeClient, TrayClient>;

fn orchestrator(config: &Config, tray: &TrayClient) -> Result<Orchestrator, Value> {
    let node = NodeClient::new(&config.node)
        .map_err(|e| json!({ "success": false, "error": e.to_string() }))?;
    Ok(TunnelOrchestrator::new(
        node,
        tray.clone(),
        RetryPolicy::from(&config.node),
        ConnectedNodeRef::new(),
    ))
}

async fn connect(o: &Orchestrator, node_id: &str, node_ip: &str, user_id: &str) -> (bool, Value) {
    match o.connect_to_node(node_id, node_ip, user_id).await {
        Ok(tunnel) => (true, json!({ "success": true, "tunnel": tunnel })),
        Err(e) => {
            error!("connect failed: {}", e.detail());
            (
                false,
                json!({ "success": false, "error": e.to_string(), "detail": e.detail() }),
            )
        }
    }
}

async fn tray_status(tray: &TrayClient) -> (bool, Value) {
    let result = tray.connect().await;
    let state = match tray.state() {
        ChannelState::Idle => json!({ "state": "idle" }),
        ChannelState::Connecting => json!({ "state": "connecting" }),
        ChannelState::Open => json!({ "state": "open" }),
        ChannelState::Retrying {
            attempt,
            retry_in,
            last_error,
        } => json!({
            "state": "retrying",
            "attempt": attempt,
            "retry_in_ms": u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
            "last_error": last_error,
        }),
        ChannelState::Exhausted { last_error } => {
            json!({ "state": "exhausted", "last_error": last_error })
        }
    };
    match result {
        Ok(()) => (true, json!({ "success": true, "tray": state })),
        Err(e) => (
            false,
            json!({ "success": false, "error": e.to_string(), "tray": state }),
        ),
    }
}
