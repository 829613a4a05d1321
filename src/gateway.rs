//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect + RESUME on disconnect
//!   - gateway send rate limiting (120 events / 60s)
//!   - presence updates and explicit shutdown
//!
//! The rest of the crate consumes a stream of [`GatewayEvent`] values and
//! talks back through [`GatewaySender`] without touching `tokio_tungstenite`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bitflags::bitflags;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::status::PresenceSink;
use crate::types::{GatewayPayload, UpdatePresence};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_PRESENCE_UPDATE: u8 = 3;
const OP_RESUME: u8 = 6;
const OP_HELLO: u8 = 10;

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

bitflags! {
    /// Gateway intents: which event groups Discord should deliver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        const GUILD_MESSAGES = 1 << 9;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl Intents {
    /// What the command bot needs: message events with their text.
    pub fn bot_default() -> Self {
        Intents::GUILDS
            | Intents::GUILD_MESSAGES
            | Intents::DIRECT_MESSAGES
            | Intents::MESSAGE_CONTENT
    }
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter for outbound gateway messages.
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// Returns how long the caller should wait before sending, or `None` if
    /// it can send immediately. Does **not** record the send.
    fn delay(&self) -> Option<Duration> {
        let now = Instant::now();
        let in_window = self
            .timestamps
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window);

        if (in_window.clone().count() as u32) < self.budget {
            return None;
        }

        // At capacity: wait until the oldest send inside the window expires.
        let oldest = in_window.min().copied()?;
        let expires_at = oldest + self.window;
        (expires_at > now).then(|| expires_at - now)
    }

    /// Record a send at the current instant and prune old entries.
    fn record(&mut self) {
        let now = Instant::now();
        self.timestamps
            .retain(|&t| now.duration_since(t) < self.window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    /// From the READY event.
    session_id: Option<String>,
    /// Resume URL provided by Discord in the READY event.
    resume_gateway_url: Option<String>,
    /// Last sequence number seen on a dispatch.
    sequence: Option<u64>,
}

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsStream = futures_util::stream::SplitStream<WsConnection>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Outbound side of the gateway. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GatewaySender {
    tx: mpsc::Sender<serde_json::Value>,
}

impl GatewaySender {
    /// Queue a raw payload for sending (rate-limited by the driver).
    async fn send(&self, payload: serde_json::Value) -> Result<(), String> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| "gateway driver is not running".to_string())
    }

    /// Set the "Playing <text>" activity, or clear it with `None`.
    pub async fn update_presence(&self, text: Option<&str>) -> Result<(), String> {
        self.send(presence_payload(text)).await
    }
}

#[async_trait]
impl PresenceSink for GatewaySender {
    async fn set_presence(&self, text: Option<&str>) -> Result<(), String> {
        self.update_presence(text).await
    }
}

/// Build an op-3 presence update payload.
pub fn presence_payload(text: Option<&str>) -> serde_json::Value {
    json!({
        "op": OP_PRESENCE_UPDATE,
        "d": UpdatePresence::playing(text),
    })
}

/// A running gateway connection.
///
/// Events arrive on `events`; the stream ends when the driver gives up
/// (fatal close code, too many reconnects) or after [`GatewayHandle::shutdown`].
pub struct GatewayHandle {
    pub sender: GatewaySender,
    pub events: mpsc::Receiver<GatewayEvent>,
    shutdown_tx: mpsc::Sender<()>,
    driver_handle: tokio::task::JoinHandle<()>,
}

impl GatewayHandle {
    /// Close the WebSocket and wait for the driver task to finish.
    pub async fn shutdown(self) {
        let GatewayHandle {
            events,
            shutdown_tx,
            driver_handle,
            ..
        } = self;
        // Nobody reads events any more; a blocked forward must not stall the close.
        drop(events);
        let _ = shutdown_tx.send(()).await;
        if let Err(e) = driver_handle.await {
            warn!(error = %e, "gateway driver did not exit cleanly");
        }
    }
}

/// Connect to the Discord gateway, returning a [`GatewayHandle`].
///
/// This spawns a background driver that handles heartbeating, reconnects,
/// resumes, and rate-limited sends.
///
/// If the very first session cannot be opened (connect, HELLO or handshake
/// fails) the driver stops at once and the event stream ends. Later drops are
/// reconnected and resumed.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    connect_to(config, DEFAULT_GATEWAY_URL)
}

fn connect_to(config: GatewayConfig, base_url: impl Into<String>) -> GatewayHandle {
    let (event_tx, event_rx) = mpsc::channel::<GatewayEvent>(256);
    let (send_tx, send_rx) = mpsc::channel::<serde_json::Value>(64);
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    let driver_handle = tokio::spawn(gateway_driver(
        config,
        base_url.into(),
        event_tx,
        send_rx,
        shutdown_rx,
    ));

    GatewayHandle {
        sender: GatewaySender { tx: send_tx },
        events: event_rx,
        shutdown_tx,
        driver_handle,
    }
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal,
    EventChannelClosed,
    Shutdown,
}

async fn gateway_driver(
    config: GatewayConfig,
    base_url: String,
    event_tx: mpsc::Sender<GatewayEvent>,
    mut send_rx: mpsc::Receiver<serde_json::Value>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut reconnect_attempts: u32 = 0;
    // Set once a handshake has gone out; before that every failure is fatal.
    let mut connected_once = false;

    loop {
        let url = {
            let s = session.lock().await;
            gateway_url(s.resume_gateway_url.as_deref(), &base_url)
        };

        info!(url = %url, "connecting to Discord gateway");

        let ws_stream = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => match result {
                Ok((ws, _)) => ws,
                Err(e) => {
                    error!(error = %e, "failed to connect to gateway");
                    if !connected_once {
                        error!("could not open the first gateway session, giving up");
                        return;
                    }
                    reconnect_attempts += 1;
                    if !wait_before_reconnect(reconnect_attempts, &mut shutdown_rx).await {
                        return;
                    }
                    continue;
                }
            },
            _ = shutdown_rx.recv() => {
                info!("shutdown requested before connect");
                return;
            }
        };

        info!("WebSocket connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));
        let rate_limiter = Arc::new(Mutex::new(SendRateLimiter::new(
            SEND_BUDGET_MAX,
            SEND_BUDGET_WINDOW,
        )));

        // 1. HELLO
        let heartbeat_interval = match read_hello(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO from gateway");
                if !connected_once {
                    error!("could not open the first gateway session, giving up");
                    return;
                }
                reconnect_attempts += 1;
                if !wait_before_reconnect(reconnect_attempts, &mut shutdown_rx).await {
                    return;
                }
                continue;
            }
        };

        info!(interval_ms = heartbeat_interval, "received HELLO");
        reconnect_attempts = 0;

        // 2. IDENTIFY or RESUME
        let handshake = {
            let s = session.lock().await;
            match (&s.session_id, s.sequence) {
                (Some(session_id), Some(seq)) => {
                    info!("sending RESUME");
                    json!({
                        "op": OP_RESUME,
                        "d": {
                            "token": config.token,
                            "session_id": session_id,
                            "seq": seq,
                        }
                    })
                }
                _ => {
                    info!("sending IDENTIFY");
                    json!({
                        "op": OP_IDENTIFY,
                        "d": {
                            "token": config.token,
                            "properties": {
                                "os": std::env::consts::OS,
                                "browser": "fedai-bot",
                                "device": "fedai-bot"
                            },
                            "intents": config.intents.bits(),
                        }
                    })
                }
            }
        };

        if let Err(e) = rate_limited_send(&ws_write, &rate_limiter, &handshake).await {
            error!(error = %e, "failed to send handshake");
            if !connected_once {
                error!("could not open the first gateway session, giving up");
                return;
            }
            reconnect_attempts += 1;
            if !wait_before_reconnect(reconnect_attempts, &mut shutdown_rx).await {
                return;
            }
            continue;
        }

        connected_once = true;

        // 3. Heartbeat task
        let heartbeat_handle = tokio::spawn(heartbeat_loop(
            heartbeat_interval,
            Arc::clone(&ws_write),
            Arc::clone(&rate_limiter),
            Arc::clone(&session),
        ));

        // 4. Main read loop
        let disconnect_reason = read_loop(
            &mut ws_read,
            &ws_write,
            &rate_limiter,
            &event_tx,
            &session,
            &mut send_rx,
            &mut shutdown_rx,
        )
        .await;

        // 5. Cleanup
        heartbeat_handle.abort();
        {
            let mut w = ws_write.lock().await;
            let _ = w.send(WsMessage::Close(None)).await;
        }

        match disconnect_reason {
            DisconnectReason::ShouldResume => {
                info!("will attempt RESUME");
            }
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway error, shutting down");
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
            DisconnectReason::Shutdown => {
                info!("gateway closed on request");
                return;
            }
        }

        reconnect_attempts += 1;
        if !wait_before_reconnect(reconnect_attempts, &mut shutdown_rx).await {
            return;
        }
    }
}

/// Sleep for the backoff delay. Returns `false` if the driver should stop
/// instead (too many attempts, or shutdown requested while waiting).
async fn wait_before_reconnect(attempt: u32, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
    if attempt > MAX_RECONNECT_ATTEMPTS {
        error!("exceeded max reconnect attempts, giving up");
        return false;
    }
    let backoff = backoff_delay(attempt);
    warn!(
        delay_ms = backoff.as_millis() as u64,
        attempt,
        "reconnecting after backoff"
    );
    tokio::select! {
        _ = tokio::time::sleep(backoff) => true,
        _ = shutdown_rx.recv() => false,
    }
}

async fn heartbeat_loop(
    interval_ms: u64,
    ws_write: Arc<Mutex<WsSink>>,
    rate_limiter: Arc<Mutex<SendRateLimiter>>,
    session: Arc<Mutex<SessionState>>,
) {
    // First heartbeat after `interval * jitter`, jitter ∈ [0, 1).
    let jitter = rand::random::<f64>();
    tokio::time::sleep(Duration::from_millis((interval_ms as f64 * jitter) as u64)).await;

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        interval.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = rate_limited_send(&ws_write, &rate_limiter, &heartbeat_payload(seq)).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(seq = ?seq, "sent heartbeat");
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
    session: &Arc<Mutex<SessionState>>,
    send_rx: &mut mpsc::Receiver<serde_json::Value>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> DisconnectReason {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                return DisconnectReason::Shutdown;
            }

            // Outbound sends from the bot logic (e.g. presence updates).
            Some(payload) = send_rx.recv() => {
                if let Err(e) = rate_limited_send(ws_write, rate_limiter, &payload).await {
                    warn!(error = %e, "failed to send payload on gateway");
                }
            }

            msg = ws_read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return DisconnectReason::ShouldResume;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return DisconnectReason::ShouldResume;
                    }
                };

                match msg {
                    WsMessage::Text(text) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "failed to parse gateway payload");
                                continue;
                            }
                        };

                        if payload.op == OP_DISPATCH {
                            if let Some(s) = payload.s {
                                session.lock().await.sequence = Some(s);
                            }
                        }

                        let event = GatewayEvent::from_payload(payload);

                        match &event {
                            GatewayEvent::Ready(ready) => {
                                let mut sess = session.lock().await;
                                sess.session_id = Some(ready.session_id.clone());
                                sess.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                                info!(
                                    session_id = %ready.session_id,
                                    user = %ready.user.tag(),
                                    "gateway READY"
                                );
                            }

                            GatewayEvent::HeartbeatRequest => {
                                let seq = session.lock().await.sequence;
                                if let Err(e) = rate_limited_send(ws_write, rate_limiter, &heartbeat_payload(seq)).await {
                                    warn!(error = %e, "failed to send requested heartbeat");
                                }
                                debug!("sent requested heartbeat");
                                continue;
                            }

                            GatewayEvent::HeartbeatAck => {
                                debug!("heartbeat acknowledged");
                                continue;
                            }

                            GatewayEvent::Reconnect => {
                                info!("gateway requested reconnect (op 7)");
                                return DisconnectReason::ShouldResume;
                            }

                            GatewayEvent::InvalidSession(resumable) => {
                                warn!(resumable, "session invalidated (op 9)");
                                tokio::time::sleep(Duration::from_secs(2)).await;
                                return if *resumable {
                                    DisconnectReason::ShouldResume
                                } else {
                                    DisconnectReason::ShouldReidentify
                                };
                            }

                            _ => {}
                        }

                        if event_tx.send(event).await.is_err() {
                            info!("event channel closed by consumer");
                            return DisconnectReason::EventChannelClosed;
                        }
                    }

                    WsMessage::Close(frame) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        warn!(close_code = ?code, "WebSocket closed by server");
                        return code
                            .map(disconnect_reason_for_close)
                            .unwrap_or(DisconnectReason::ShouldResume);
                    }

                    // Ping/Pong/Binary — ignore.
                    _ => {}
                }
            }
        }
    }
}

/// Map a gateway close code to what the driver should do next.
fn disconnect_reason_for_close(code: u16) -> DisconnectReason {
    match code {
        4004 => {
            error!("authentication failed (close 4004)");
            DisconnectReason::Fatal
        }
        4010..=4014 => {
            error!(code, "unrecoverable gateway configuration error");
            DisconnectReason::Fatal
        }
        // Invalid seq or session timed out.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pick the connect URL, appending version/encoding to a resume URL.
fn gateway_url(resume_url: Option<&str>, base_url: &str) -> String {
    match resume_url {
        None => base_url.to_string(),
        Some(url) if url.contains("v=10") => url.to_string(),
        Some(url) if url.contains('?') => format!("{}&v=10&encoding=json", url),
        Some(url) => format!("{}/?v=10&encoding=json", url.trim_end_matches('/')),
    }
}

fn heartbeat_payload(seq: Option<u64>) -> serde_json::Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// Read the HELLO payload and return the heartbeat interval in ms.
async fn read_hello(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {}", e))?;

    let text = match msg {
        WsMessage::Text(t) => t,
        other => return Err(format!("expected text message for HELLO, got {:?}", other)),
    };

    parse_hello(&text)
}

fn parse_hello(text: &str) -> Result<u64, String> {
    let payload: GatewayPayload =
        serde_json::from_str(text).map_err(|e| format!("failed to parse HELLO: {}", e))?;

    if payload.op != OP_HELLO {
        return Err(format!("expected op 10 (HELLO), got op {}", payload.op));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "HELLO missing heartbeat_interval".to_string())
}

/// Send a JSON payload on the WebSocket, respecting the send rate limiter.
async fn rate_limited_send(
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &serde_json::Value,
) -> Result<(), String> {
    loop {
        let delay = rate_limiter.lock().await.delay();
        match delay {
            Some(d) => {
                debug!(
                    delay_ms = d.as_millis() as u64,
                    "gateway send rate-limited, waiting"
                );
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }

    rate_limiter.lock().await.record();

    let text = serde_json::to_string(payload).map_err(|e| e.to_string())?;

    let mut w = ws_write.lock().await;
    w.send(WsMessage::Text(text))
        .await
        .map_err(|e| format!("WS send error: {}", e))
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}
