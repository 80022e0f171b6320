//! Telegram Bot API HTTP client.

use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::Client;

use crate::types::{ApiResponse, BotInfo, SendMessageParams, TgMessage};

/// HTTP client for the Telegram Bot API.
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    /// Create a new API client with the given bot token.
    pub fn new(bot_token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    /// Verify the bot token by calling `getMe`.
    pub async fn get_me(&self) -> anyhow::Result<BotInfo> {
        let resp: ApiResponse<BotInfo> = self
            .client
            .get(format!("{}/getMe", self.base_url))
            .send()
            .await
            .context("getMe request failed")?
            .json()
            .await
            .context("getMe response parse failed")?;

        if !resp.ok {
            bail!(
                "getMe failed: {}",
                resp.description.unwrap_or_else(|| "unknown error".into())
            );
        }
        resp.result.context("getMe returned no result")
    }

    /// Send a Markdown-formatted message to a chat.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<TgMessage> {
        let params = SendMessageParams {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode: Some("Markdown".to_string()),
        };
        let resp: ApiResponse<TgMessage> = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&params)
            .send()
            .await
            .context("sendMessage request failed")?
            .json()
            .await
            .context("sendMessage response parse failed")?;

        if !resp.ok {
            bail!(
                "sendMessage failed: {}",
                resp.description.unwrap_or_else(|| "unknown error".into())
            );
        }
        resp.result.context("sendMessage returned no result")
    }
}
