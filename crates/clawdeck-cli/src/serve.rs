//! `serve` command: wire storage, scheduler and collaborators, then
//! hand off to the gateway.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use clawdeck_channel_telegram::TelegramMessenger;
use clawdeck_gateway::{GatewayState, ws::EventHub};
use clawdeck_models::ModelClient;
use clawdeck_scheduler::{ActionExecutor, ExecutorConfig, TaskScheduler};
use clawdeck_storage::DashboardStore;
use clawdeck_weather::WeatherClient;

pub async fn run_serve(port: Option<u16>, db: Option<String>) -> anyhow::Result<()> {
    let config = clawdeck_config::load_config().unwrap_or_default();

    let db_path = match db {
        Some(path) => PathBuf::from(path),
        None => clawdeck_config::ensure_config_dir()?.join("clawdeck.db"),
    };
    let store = Arc::new(DashboardStore::open(&db_path)?);

    let hub = Arc::new(EventHub::new(256));

    // Bot credentials stay in the environment, not the config file
    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok();
    let messenger = Arc::new(TelegramMessenger::new(
        bot_token.as_deref(),
        config.scheduler.telegram_target.as_deref(),
    ));

    let executor = Arc::new(ActionExecutor::new(
        store.clone(),
        messenger,
        Arc::new(ModelClient::new()),
        Arc::new(WeatherClient::new()),
        hub.clone(),
        ExecutorConfig {
            default_location: config.weather.location.clone(),
            default_model: config.scheduler.default_model.clone(),
        },
    ));

    let scheduler = Arc::new(TaskScheduler::new(
        store.clone(),
        executor,
        hub.clone(),
        config.scheduler.timezone.clone(),
    ));

    let armed = scheduler.initialize_scheduled_tasks().await?;
    info!("Scheduler ready with {armed} armed tasks");

    let state = Arc::new(GatewayState {
        store,
        scheduler,
        hub,
        config,
    });

    clawdeck_gateway::start_gateway(state, port).await
}
