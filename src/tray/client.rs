//! Reconnecting WebSocket client for the tray control channel.
//!
//! [`TrayClient`] owns at most one WebSocket to the tray process. The socket
//! itself lives in a background driver task; callers talk to it through a
//! small mutex-guarded `Link` record (state, outbound queue, writer handle)
//! and never hold that lock across an await.
//!
//! ```text
//! Idle ──send/connect──▶ Connecting ──handshake ok──▶ Open
//!                          ▲    │                      │
//!                  backoff │    │ handshake failed     │ closed / error
//!                          │    ▼                      ▼
//!                        Retrying { attempt } ◀────────┘
//!                               │ attempt == max
//!                               ▼
//!                           Exhausted ──send/connect──▶ Connecting (counter reset)
//! ```
//!
//! Commands submitted while the channel is not open are queued and flushed in
//! submission order as soon as it opens. Every command carries a `request_id`
//! and its reply is routed back through the [`Correlator`].

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::backoff::reconnect_delay;
use super::correlator::Correlator;
use super::protocol::{TrayCommand, REQUEST_ID_KEY};
use crate::config::TrayConfig;
use crate::error::TrayError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Observable state of the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Never connected, or deliberately closed.
    Idle,
    /// A handshake is in progress.
    Connecting,
    /// Connected; commands are written straight to the socket.
    Open,
    /// Last attempt failed; the next one starts after `retry_in`.
    Retrying {
        attempt: u32,
        retry_in: Duration,
        last_error: String,
    },
    /// Reconnect ceiling reached; only an explicit send/connect restarts.
    Exhausted { last_error: String },
}

/// A serialized command waiting for the channel to open.
struct Outbound {
    request_id: String,
    text: String,
}

/// Everything callers and the driver share about the single connection.
struct Link {
    state: ChannelState,
    queue: VecDeque<Outbound>,
    /// Set only while `Open`; feeds the driver's socket writer.
    writer: Option<mpsc::UnboundedSender<Message>>,
    driver_running: bool,
    /// Bumped by `close()`. A driver started under an older epoch exits at
    /// its next checkpoint without touching the link.
    epoch: u64,
}

struct Shared {
    config: TrayConfig,
    link: Mutex<Link>,
    state_tx: watch::Sender<ChannelState>,
    correlator: Correlator,
}

impl Shared {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, link: &mut Link, state: ChannelState) {
        link.state = state.clone();
        self.state_tx.send_replace(state);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock_link().epoch == epoch
    }

    /// Make sure a connection attempt is underway. Must be called with the
    /// link locked; spawns the driver if none is running.
    fn ensure_connecting(self: &Arc<Self>, link: &mut Link) {
        match link.state {
            ChannelState::Open | ChannelState::Connecting => {}
            ChannelState::Retrying { .. } => {
                // The driver's backoff wait ends as soon as the state moves on.
                debug!("tray: explicit request, skipping remaining backoff");
                self.set_state(link, ChannelState::Connecting);
            }
            ChannelState::Idle | ChannelState::Exhausted { .. } => {
                self.set_state(link, ChannelState::Connecting);
                if !link.driver_running {
                    link.driver_running = true;
                    tokio::spawn(run_channel(Arc::clone(self), link.epoch));
                }
            }
        }
    }
}

/// Handle to the tray control channel.
///
/// Cheap to clone; all clones share the same connection. Construct one per
/// process at the composition root and pass it to whoever needs the tray.
#[derive(Clone)]
pub struct TrayClient {
    shared: Arc<Shared>,
}

impl TrayClient {
    /// Create a client. Nothing connects until the first send or `connect()`.
    pub fn new(config: TrayConfig) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        Self {
            shared: Arc::new(Shared {
                config,
                link: Mutex::new(Link {
                    state: ChannelState::Idle,
                    queue: VecDeque::new(),
                    writer: None,
                    driver_running: false,
                    epoch: 0,
                }),
                state_tx,
                correlator: Correlator::new(),
            }),
        }
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch channel state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// Commands waiting for the channel to open.
    pub fn queued_len(&self) -> usize {
        self.shared.lock_link().queue.len()
    }

    /// Commands waiting for a reply (queued or already sent).
    pub fn pending_len(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Wait until the channel is open, starting a connection if needed.
    ///
    /// Concurrent callers share one attempt. Fails with
    /// [`TrayError::TransportUnavailable`] when that attempt fails, and with
    /// [`TrayError::ConnectTimeout`] when nothing is decided within the
    /// configured ceiling.
    pub async fn connect(&self) -> Result<(), TrayError> {
        let mut rx = self.shared.state_tx.subscribe();
        {
            let mut link = self.shared.lock_link();
            if link.state == ChannelState::Open {
                return Ok(());
            }
            self.shared.ensure_connecting(&mut link);
        }

        let max_attempts = self.shared.config.max_reconnect_attempts;
        let wait = async {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    ChannelState::Open => return Ok(()),
                    ChannelState::Retrying { last_error, .. } => {
                        return Err(TrayError::TransportUnavailable(last_error))
                    }
                    ChannelState::Exhausted { last_error } => {
                        return Err(TrayError::Exhausted {
                            attempts: max_attempts,
                            last_error,
                        })
                    }
                    ChannelState::Idle | ChannelState::Connecting => {}
                }
                if rx.changed().await.is_err() {
                    return Err(TrayError::TransportUnavailable(
                        "control channel dropped".into(),
                    ));
                }
            }
        };

        let timeout = self.shared.config.connect_timeout();
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TrayError::ConnectTimeout(timeout))?
    }

    /// Send a command object and wait for its correlated reply.
    ///
    /// A `request_id` is added to `payload`. If the channel is not open the
    /// command is queued and a connection is started. A reply with
    /// `status: "error"` becomes [`TrayError::Application`].
    pub async fn send_message(&self, payload: Value) -> Result<Value, TrayError> {
        let Value::Object(mut command) = payload else {
            return Err(TrayError::Protocol(
                "command payload must be a JSON object".into(),
            ));
        };
        let request_id = uuid::Uuid::new_v4().to_string();
        command.insert(REQUEST_ID_KEY.into(), Value::String(request_id.clone()));
        let text = serde_json::to_string(&command).map_err(|e| TrayError::Protocol(e.to_string()))?;

        let reply = self.shared.correlator.register(&request_id);
        let _in_flight = InFlight {
            shared: &self.shared,
            request_id: &request_id,
        };

        {
            let mut link = self.shared.lock_link();
            let sent = link
                .writer
                .as_ref()
                .is_some_and(|w| w.send(Message::Text(text.clone().into())).is_ok());
            if sent {
                debug!(request_id = %request_id, "tray: command sent");
            } else {
                link.queue.push_back(Outbound {
                    request_id: request_id.clone(),
                    text,
                });
                debug!(request_id = %request_id, queued = link.queue.len(), "tray: command queued");
                self.shared.ensure_connecting(&mut link);
            }
        }

        let timeout = self.shared.config.request_timeout();
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TrayError::TransportUnavailable(
                "reply channel dropped".into(),
            )),
            Err(_) => {
                warn!(request_id = %request_id, "tray: no reply within {}ms", timeout.as_millis());
                Err(TrayError::RequestTimeout(timeout))
            }
        }
    }

    /// Send a typed command.
    pub async fn send_command(&self, command: &TrayCommand) -> Result<Value, TrayError> {
        debug!(command = command.name(), "tray: sending command");
        self.send_message(command.to_value()?).await
    }

    /// Ask the tray to bring a tunnel up from `config`, saved as `filename`.
    pub async fn activate_vpn(&self, config: &str, filename: &str) -> Result<Value, TrayError> {
        self.send_command(&TrayCommand::Connect {
            config: config.to_string(),
            filename: filename.to_string(),
        })
        .await
    }

    /// Ask the tray to tear the active tunnel down.
    pub async fn deactivate_vpn(&self) -> Result<Value, TrayError> {
        self.send_command(&TrayCommand::Disconnect).await
    }

    /// Close the channel without reconnecting. Queued and in-flight
    /// commands fail and the state is `Idle` by the time this returns, so a
    /// later send or `connect()` starts a fresh connection.
    pub fn close(&self) {
        let mut link = self.shared.lock_link();
        if link.state == ChannelState::Idle && !link.driver_running {
            return;
        }
        info!("tray: closing control channel");
        link.epoch += 1;
        link.driver_running = false;
        // Dropping the writer ends the retired driver's socket pump.
        link.writer = None;
        let err = TrayError::TransportUnavailable("control channel closed".into());
        for out in link.queue.drain(..) {
            self.shared.correlator.fail(&out.request_id, err.clone());
        }
        self.shared.correlator.fail_unless(|_| false, &err);
        self.shared.set_state(&mut link, ChannelState::Idle);
    }
}

/// Removes a request's reply slot and any still-queued copy of it when the
/// `send_message` future finishes, times out, or is dropped.
struct InFlight<'a> {
    shared: &'a Shared,
    request_id: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.correlator.cancel(self.request_id);
        self.shared
            .lock_link()
            .queue
            .retain(|out| out.request_id != self.request_id);
    }
}

/// Driver task: connect, pump, and reconnect with backoff until the channel
/// is closed or the reconnect ceiling is reached.
///
/// Every time the link is locked the driver first checks `epoch`; once
/// `close()` has bumped it the link belongs to whoever runs next.
async fn run_channel(shared: Arc<Shared>, epoch: u64) {
    let url = shared.config.url.clone();
    let max_attempts = shared.config.max_reconnect_attempts;
    let base_delay = shared.config.reconnect_base_delay();
    let mut reconnects: u32 = 0;

    loop {
        {
            let mut link = shared.lock_link();
            if link.epoch != epoch {
                return;
            }
            shared.set_state(&mut link, ChannelState::Connecting);
        }

        debug!(url = %url, "tray: connecting");
        let last_error = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let mut link = shared.lock_link();
                    if link.epoch != epoch {
                        debug!("tray: channel closed during handshake");
                        return;
                    }
                    reconnects = 0;
                    let flushed = link.queue.len();
                    for out in link.queue.drain(..) {
                        let _ = tx.send(Message::Text(out.text.into()));
                    }
                    link.writer = Some(tx);
                    shared.set_state(&mut link, ChannelState::Open);
                    info!(flushed, "tray: control channel open");
                }

                let reason = pump(&shared, epoch, ws_stream, rx).await;

                let mut link = shared.lock_link();
                if link.epoch != epoch {
                    debug!("tray: retired connection ended: {reason}");
                    return;
                }
                link.writer = None;
                // Anything already on the wire will never be answered.
                let queued: HashSet<&str> =
                    link.queue.iter().map(|o| o.request_id.as_str()).collect();
                let failed = shared.correlator.fail_unless(
                    |id| queued.contains(id),
                    &TrayError::TransportUnavailable(format!("connection lost: {reason}")),
                );
                warn!(failed, "tray: control channel lost: {reason}");
                reason
            }
            Err(e) => {
                warn!("tray: connect to {url} failed: {e}");
                e.to_string()
            }
        };

        let delay = {
            let mut link = shared.lock_link();
            if link.epoch != epoch {
                return;
            }
            if reconnects >= max_attempts {
                let err = TrayError::Exhausted {
                    attempts: reconnects,
                    last_error: last_error.clone(),
                };
                for out in link.queue.drain(..) {
                    shared.correlator.fail(&out.request_id, err.clone());
                }
                link.driver_running = false;
                shared.set_state(&mut link, ChannelState::Exhausted { last_error });
                warn!(
                    attempts = reconnects,
                    "tray: giving up on control channel until the next request"
                );
                return;
            }
            reconnects += 1;
            let delay = reconnect_delay(base_delay, reconnects);
            shared.set_state(
                &mut link,
                ChannelState::Retrying {
                    attempt: reconnects,
                    retry_in: delay,
                    last_error,
                },
            );
            delay
        };

        info!(
            attempt = reconnects,
            "tray: reconnecting in {}ms",
            delay.as_millis()
        );
        // Level-triggered on the state: an explicit request (Connecting) or
        // close() (Idle) that lands before or during the sleep ends it.
        let mut state_rx = shared.state_tx.subscribe();
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = async {
                let _ = state_rx
                    .wait_for(|s| !matches!(s, ChannelState::Retrying { .. }))
                    .await;
            } => {}
        }
    }
}

/// Shuttle frames between the socket and the correlator until the
/// connection ends. Returns why it ended.
async fn pump(
    shared: &Shared,
    epoch: u64,
    ws_stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) -> String {
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Frames still arriving on a closed channel belong to nobody.
                        if shared.is_current(epoch) {
                            shared.correlator.dispatch(&text);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return "closed by tray".to_string();
                    }
                    Some(Err(e)) => return e.to_string(),
                    _ => {} // Binary/Ping/Pong
                }
            }
            out = out_rx.recv() => {
                match out {
                    Some(msg) => {
                        if let Err(e) = ws_sink.send(msg).await {
                            return format!("send failed: {e}");
                        }
                    }
                    None => {
                        // Writer dropped by close()
                        let _ = ws_sink.send(Message::Close(None)).await;
                        return "closed locally".to_string();
                    }
                }
            }
        }
    }
}
