//! Telegram control channel: operator commands in, trade alerts out.

pub mod commands;
pub mod render;

pub use commands::{send_alert, start_bot, BotDeps, Command};
