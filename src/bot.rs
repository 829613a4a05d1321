//! Session wiring: connect the gateway, start the status updater, and run
//! the event loop until a termination signal arrives.
//!
//! State transitions (`!setgame`) run inline in the loop, so they are applied
//! in the order Discord delivered them. Completion requests are spawned so a
//! slow API call never stalls the gateway.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, trace, warn};

use crate::commands::Command;
use crate::completion::CompletionClient;
use crate::config::Config;
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, GatewayHandle, Intents};
use crate::handlers::{self, HandlerContext};
use crate::http::DiscordHttpClient;
use crate::status::{spawn_status_updater, SharedStatus};
use crate::types::ReadyEvent;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Bot identity and lifecycle state, owned by the event loop.
#[derive(Debug)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<String>,
    /// When the session started.
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            bot_user_id: None,
            start_time: Instant::now(),
        }
    }
}

impl BotState {
    /// Record identity from READY. Runs again after every re-identify.
    pub fn on_ready(&mut self, ready: &ReadyEvent) {
        info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "bot is ready!");
        self.bot_user_id = Some(ready.user.id.clone());
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum BotError {
    /// A client could not be constructed.
    Setup(String),
    /// The gateway driver stopped on its own (first connect failed, bad token,
    /// too many reconnects).
    EventStreamEnded,
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotError::Setup(e) => write!(f, "failed to set up bot: {}", e),
            BotError::EventStreamEnded => write!(f, "gateway event stream ended"),
        }
    }
}

impl std::error::Error for BotError {}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run one bot session until SIGINT/SIGTERM (`Ok`) or until the gateway
/// gives up (`Err`).
pub async fn run(config: Config) -> Result<(), BotError> {
    let http = DiscordHttpClient::new(config.discord_token.clone())
        .map_err(|e| BotError::Setup(e.to_string()))?;
    let completer =
        CompletionClient::from_config(&config).map_err(|e| BotError::Setup(e.to_string()))?;
    info!(model = completer.model(), "completion client ready");

    let status = SharedStatus::new();
    let ctx = HandlerContext {
        status: status.clone(),
        channel: Arc::new(http),
        completer: Arc::new(completer),
    };

    let mut gw = gateway::connect(GatewayConfig {
        token: config.discord_token.clone(),
        intents: Intents::bot_default(),
    });

    let updater = spawn_status_updater(status, gw.sender.clone(), config.status_interval());

    info!("bot running, press CTRL-C to stop");
    let outcome = tokio::select! {
        outcome = event_loop(&mut gw, &ctx) => outcome,
        _ = shutdown_signal() => {
            info!("termination signal received, shutting down");
            Ok(())
        }
    };

    updater.shutdown().await;
    gw.shutdown().await;
    info!("bot stopped");
    outcome
}

/// Process gateway events until the stream ends.
async fn event_loop(gw: &mut GatewayHandle, ctx: &HandlerContext) -> Result<(), BotError> {
    let mut state = BotState::default();

    while let Some(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => state.on_ready(&ready),

            GatewayEvent::MessageCreate(msg) => {
                match handlers::command_for(state.bot_user_id.as_deref(), &msg) {
                    Some(Command::SetGame(text)) => {
                        handlers::on_set_game(ctx, &msg.channel_id, &text).await;
                    }
                    Some(Command::Ask(prompt)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            handlers::on_ask(&ctx, &msg.channel_id, &prompt).await;
                        });
                    }
                    None => {}
                }
            }

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => {
                trace!(event = %name, "unhandled gateway event");
            }

            // Heartbeats, reconnects, and invalid sessions are handled by the
            // gateway driver.
            _ => {}
        }
    }

    warn!(
        uptime_s = state.start_time.elapsed().as_secs(),
        "event stream ended"
    );
    Err(BotError::EventStreamEnded)
}

/// Resolves on CTRL-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for CTRL-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
