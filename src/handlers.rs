//! Command handlers.
//!
//! [`command_for`] decides whether a gateway message is a command meant for
//! us; the `on_*` functions carry the command out. Handlers talk to Discord
//! through a [`ChannelSink`] and to the model through a [`Completer`], both
//! held in a [`HandlerContext`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::commands::{parse_command, Command};
use crate::completion::Completer;
use crate::http::ChannelSink;
use crate::status::{SharedStatus, StatusChange};
use crate::types::{Embed, Message};

/// Title of the embed that carries a generated answer.
pub const ANSWER_TITLE: &str = "Fedai-YapayZeka Destekli Discord Botu:";
/// Accent color of the answer embed (green).
pub const ANSWER_COLOR: u32 = 0x00ff00;

/// Everything a handler needs. Cheap to clone.
#[derive(Clone)]
pub struct HandlerContext {
    pub status: SharedStatus,
    pub channel: Arc<dyn ChannelSink>,
    pub completer: Arc<dyn Completer>,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Returns the command carried by `msg`, or `None` if the bot should ignore it.
///
/// Messages written by the bot itself (`bot_user_id`, known after READY) or
/// by any other bot account are never commands.
pub fn command_for(bot_user_id: Option<&str>, msg: &Message) -> Option<Command> {
    if bot_user_id == Some(msg.author.id.as_str()) || msg.author.bot {
        return None;
    }
    parse_command(&msg.content)
}

// ---------------------------------------------------------------------------
// !setgame
// ---------------------------------------------------------------------------

/// Confirmation text for a status change.
pub fn status_reply(change: &StatusChange) -> String {
    match change {
        StatusChange::Set(text) => format!("Oyun metni güncellendi: {}", text),
        StatusChange::Cleared => "Oyun metni temizlendi.".to_string(),
    }
}

/// Update the shared status and confirm in `channel_id`.
pub async fn on_set_game(ctx: &HandlerContext, channel_id: &str, text: &str) -> StatusChange {
    let change = ctx.status.set(text).await;
    info!(channel_id, change = ?change, "status text changed");

    if let Err(e) = ctx.channel.send_text(channel_id, &status_reply(&change)).await {
        error!(error = %e, "failed to send !setgame reply");
    }
    change
}

// ---------------------------------------------------------------------------
// !f
// ---------------------------------------------------------------------------

/// Build the embed that carries a generated answer.
pub fn answer_embed(answer: &str) -> Embed {
    Embed::new()
        .title(ANSWER_TITLE)
        .color(ANSWER_COLOR)
        .description(answer)
        .timestamp(chrono::Utc::now().to_rfc3339())
}

/// Ask the model about `prompt` and post the answer to `channel_id`.
///
/// Failures are logged and nothing is posted.
pub async fn on_ask(ctx: &HandlerContext, channel_id: &str, prompt: &str) {
    if prompt.is_empty() {
        debug!(channel_id, "ignoring !f without text");
        return;
    }

    let answer = match ctx.completer.complete(prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            error!(error = %e, channel_id, "failed to generate completion");
            return;
        }
    };

    if let Err(e) = ctx.channel.send_embed(channel_id, answer_embed(&answer)).await {
        warn!(error = %e, "failed to send !f answer");
    }
}
