//! A small Discord bot that relays `!f` questions to the OpenAI chat API and
//! lets users set its "now playing" status with `!setgame`.
//!
//! Transport lives in [`gateway`] (WebSocket) and [`http`] (REST); the bot
//! behaviour lives in [`commands`], [`handlers`], and [`status`]. [`bot::run`]
//! wires them together for one session.

pub mod bot;
pub mod commands;
pub mod completion;
pub mod config;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod status;
pub mod types;

pub use bot::{run, BotError};
pub use config::{Config, ConfigError};
