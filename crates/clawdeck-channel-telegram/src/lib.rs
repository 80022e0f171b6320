//! clawdeck-channel-telegram: report delivery over Telegram.
//!
//! Wraps the Bot API client in the scheduler's `Messenger` contract.
//! Delivery is best-effort: when no channel is configured the message
//! is logged instead of lost, and the caller sees an undelivered
//! result rather than an error.

pub mod api;
pub mod types;

use tracing::{info, warn};

use clawdeck_scheduler::{Delivery, Messenger};

use api::TelegramApi;

/// Sends scheduler reports to one fixed Telegram chat.
pub struct TelegramMessenger {
    api: Option<TelegramApi>,
    chat_id: Option<String>,
}

impl TelegramMessenger {
    /// Build from a bot token and a "telegram:<chat_id>" target.
    ///
    /// Missing pieces degrade to log-only delivery instead of failing:
    /// a dashboard without a configured bot still runs its schedules.
    pub fn new(bot_token: Option<&str>, target: Option<&str>) -> Self {
        let api = bot_token.map(TelegramApi::new);
        let chat_id = target.map(|t| t.strip_prefix("telegram:").unwrap_or(t).to_string());
        if api.is_none() || chat_id.is_none() {
            warn!("Telegram not fully configured; messages will be logged only");
        }
        Self { api, chat_id }
    }
}

#[async_trait::async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, text: &str) -> anyhow::Result<Delivery> {
        let (Some(api), Some(chat_id)) = (&self.api, &self.chat_id) else {
            info!("[TELEGRAM MESSAGE]: {text}");
            return Ok(Delivery {
                delivered: false,
                detail: Some("telegram not configured, message logged".into()),
            });
        };

        match api.send_message(chat_id, text).await {
            Ok(message) => Ok(Delivery {
                delivered: true,
                detail: Some(format!("message_id {}", message.message_id)),
            }),
            Err(e) => {
                // Keep the text visible even when the channel is down
                warn!("Telegram send failed: {e}");
                info!("[FAILED MESSAGE TO {chat_id}]: {text}");
                Err(e)
            }
        }
    }
}
