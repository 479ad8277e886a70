//! Telegram notification implementation.
//!
//! Requires the `telegram` feature to be enabled.

use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{render, Notice, Notifier};

/// Configuration for the Telegram notifier.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Chat ID to send notifications to.
    pub chat_id: i64,
}

impl TelegramConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .ok()
            .and_then(|s| s.parse().ok())?;
        Some(Self { bot_token, chat_id })
    }
}

/// Telegram notifier that sends notices to a chat.
pub struct TelegramNotifier {
    sender: mpsc::UnboundedSender<Notice>,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier and spawn the background task.
    pub fn new(config: TelegramConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(telegram_worker(config, receiver));
        Self { sender }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, notice: Notice) {
        if self.sender.send(notice).is_err() {
            warn!("Telegram notifier channel closed");
        }
    }
}

/// Background worker that sends Telegram messages.
async fn telegram_worker(config: TelegramConfig, mut receiver: mpsc::UnboundedReceiver<Notice>) {
    let bot = Bot::new(&config.bot_token);
    let chat_id = ChatId(config.chat_id);

    info!(chat_id = config.chat_id, "Telegram notifier started");

    while let Some(notice) = receiver.recv().await {
        let text = render(&notice);
        if let Err(e) = bot.send_message(chat_id, text).await {
            warn!(error = %e, "failed to send Telegram notification");
        }
    }
}
