use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token for authentication (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            auth_token: None,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default IANA timezone for daily schedules. The translator is the
    /// only consumer; nothing else should hard-code a zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Default Telegram target for delivered reports ("telegram:<chat_id>").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_target: Option<String>,
    /// Default model for ai_prompt tasks that don't pick one.
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_timezone() -> String {
    "Europe/Vienna".to_string()
}

fn default_model() -> String {
    "kimi-coding/k2p5".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            telegram_target: None,
            default_model: default_model(),
        }
    }
}

/// Weather lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Default location when a weather task doesn't specify one.
    #[serde(default = "default_location")]
    pub location: String,
}

fn default_location() -> String {
    "Vienna".to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
        }
    }
}

/// Usage alert thresholds, in percent of the daily token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_threshold_low")]
    pub threshold_low: u8,
    #[serde(default = "default_threshold_medium")]
    pub threshold_medium: u8,
    #[serde(default = "default_threshold_high")]
    pub threshold_high: u8,
    /// Daily token budget the percentages are computed against.
    #[serde(default = "default_daily_token_budget")]
    pub daily_token_budget: i64,
}

fn default_threshold_low() -> u8 {
    80
}

fn default_threshold_medium() -> u8 {
    90
}

fn default_threshold_high() -> u8 {
    95
}

fn default_daily_token_budget() -> i64 {
    1_000_000
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold_low: default_threshold_low(),
            threshold_medium: default_threshold_medium(),
            threshold_high: default_threshold_high(),
            daily_token_budget: default_daily_token_budget(),
        }
    }
}

/// Retention windows for the daily cleanup job, in days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_work_item_days")]
    pub work_item_days: u32,
    #[serde(default = "default_usage_days")]
    pub usage_days: u32,
    #[serde(default = "default_event_days")]
    pub event_days: u32,
}

fn default_work_item_days() -> u32 {
    90
}

fn default_usage_days() -> u32 {
    30
}

fn default_event_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            work_item_days: default_work_item_days(),
            usage_days: default_usage_days(),
            event_days: default_event_days(),
        }
    }
}

/// Top-level clawdeck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClawdeckConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Resolve the clawdeck config directory (~/.clawdeck/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".clawdeck"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.clawdeck/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<ClawdeckConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<ClawdeckConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(ClawdeckConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: ClawdeckConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &ClawdeckConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
