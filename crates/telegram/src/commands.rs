use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    utils::command::BotCommands,
};
use tracing::{info, warn};

use engine::ControlSurface;

use crate::render;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub control: ControlSurface,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Scalper commands:")]
pub enum Command {
    #[command(description = "Stop opening new positions")]
    Pause,
    #[command(description = "Allow new positions again")]
    Resume,
    #[command(description = "Show positions, cooldowns and thresholds")]
    Status,
    #[command(description = "Show closed-trade statistics")]
    Summary,
    #[command(description = "Force-clear every position (use for stuck exits)")]
    Reset,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Pause].endpoint(handle_pause))
        .branch(case![Command::Resume].endpoint(handle_resume))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Summary].endpoint(handle_summary))
        .branch(case![Command::Reset].endpoint(handle_reset));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

/// `@username`, or the numeric id for users without one.
fn operator(msg: &Message) -> String {
    match msg.from() {
        Some(user) => match &user.username {
            Some(name) => format!("telegram:@{name}"),
            None => format!("telegram:{}", user.id.0),
        },
        None => "telegram:unknown".to_string(),
    }
}

async fn reply(bot: &Bot, msg: &Message, text: String) -> HandlerResult {
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_pause(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.control.pause(&operator(&msg)).await {
        Ok(()) => "Paused. Open positions are still monitored.".to_string(),
        Err(e) => format!("Pause failed: {e}"),
    };
    reply(&bot, &msg, text).await
}

async fn handle_resume(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.control.resume(&operator(&msg)).await {
        Ok(()) => "Resumed.".to_string(),
        Err(e) => format!("Resume failed: {e}"),
    };
    reply(&bot, &msg, text).await
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.control.status().await {
        Ok(status) => render::status(&status),
        Err(e) => format!("Status unavailable: {e}"),
    };
    reply(&bot, &msg, text).await
}

async fn handle_summary(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.control.summary().await {
        Ok(summary) => render::summary(&summary),
        Err(e) => format!("Summary unavailable: {e}"),
    };
    reply(&bot, &msg, text).await
}

async fn handle_reset(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match deps.control.reset(&operator(&msg)).await {
        Ok(cleared) if cleared.is_empty() => "Nothing to reset.".to_string(),
        Ok(cleared) => format!(
            "Cleared {} position(s): {}",
            cleared.len(),
            cleared
                .iter()
                .map(|p| format!("{} ({})", p.market, p.status))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Err(e) => format!("Reset failed: {e}"),
    };
    reply(&bot, &msg, text).await
}

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}
