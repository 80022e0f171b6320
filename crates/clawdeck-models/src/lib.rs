//! clawdeck-models: OpenAI-compatible chat completions client.
//!
//! One client covers every compatible endpoint; deployments differ only
//! by base URL and credentials. Credential and availability problems
//! come back as user-facing explanatory text so a scheduled prompt can
//! still tell the user what went wrong.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{info, warn};

use clawdeck_scheduler::ModelProvider;

const DEFAULT_BASE_URL: &str = "https://api.moonshot.cn/v1";
const CHAT_PATH: &str = "/chat/completions";

/// Env vars consulted when a task carries no credential reference.
const DEFAULT_ENV_KEYS: &[&str] = &["MOONSHOT_API_KEY", "OPENCLAW_MOONSHOT_KEY"];

/// HTTP client for an OpenAI-compatible chat completions API.
pub struct ModelClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for ModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a different endpoint (local model server, testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolve the API key: the task's credential reference names an
    /// env var; without one, fall back to the default env vars.
    fn resolve_api_key(api_key_ref: Option<&str>) -> Option<String> {
        if let Some(key_ref) = api_key_ref {
            if let Ok(key) = std::env::var(key_ref) {
                return Some(key);
            }
            warn!(key_ref, "Credential reference names an unset env var");
        }
        DEFAULT_ENV_KEYS
            .iter()
            .find_map(|key| std::env::var(key).ok())
    }
}

#[async_trait::async_trait]
impl ModelProvider for ModelClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        context: Option<&str>,
        api_key_ref: Option<&str>,
    ) -> anyhow::Result<String> {
        let full_prompt = match context {
            Some(context) if !context.is_empty() => format!("{context}\n\n{prompt}"),
            _ => prompt.to_string(),
        };

        let Some(api_key) = Self::resolve_api_key(api_key_ref) else {
            return Ok(format!(
                "⚠️ *AI Response Unavailable*\n\nPrompt: \"{prompt}\"\n\n\
                 No API key configured. Set one of {DEFAULT_ENV_KEYS:?} or a \
                 credential reference on the task."
            ));
        };

        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": full_prompt }],
            "temperature": 0.7,
            "max_tokens": 1000,
        });

        let resp = self
            .client
            .post(format!("{}{CHAT_PATH}", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok("⚠️ *Invalid API Key*\n\nThe API key you provided is invalid \
                       or expired.\n\nPlease check it and try again."
                .to_string());
        }
        if !status.is_success() {
            let detail: Value = resp.json().await.unwrap_or(Value::Null);
            let message = detail["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("HTTP {status}"));
            anyhow::bail!("API error: {message}");
        }

        let data: Value = resp.json().await?;
        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("No response from AI")
            .to_string();

        info!(model, "Generated model response ({} chars)", text.len());
        Ok(text)
    }
}
