//! Housekeeping loops: stats broadcast, usage threshold alerts, daily
//! retention cleanup. Plain polling intervals, nothing stateful beyond
//! alert dedupe.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use clawdeck_config::AlertConfig;
use clawdeck_scheduler::Notifier;

use crate::GatewayState;

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const THRESHOLD_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Alert once per hour per level, not on every check cycle.
const ALERT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Spawn all housekeeping loops. The handles keep them owned; dropping
/// the result aborts nothing (the gateway runs them for its lifetime).
pub fn spawn_housekeeping(state: Arc<GatewayState>) -> Vec<JoinHandle<()>> {
    info!("Housekeeping loops started");
    vec![
        tokio::spawn(stats_loop(state.clone())),
        tokio::spawn(threshold_loop(state.clone())),
        tokio::spawn(cleanup_loop(state)),
    ]
}

/// Push fresh dashboard aggregates to connected observers.
async fn stats_loop(state: Arc<GatewayState>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        interval.tick().await;
        match state.store.dashboard_stats().await {
            Ok(stats) => {
                state
                    .hub
                    .publish("stats:update", serde_json::to_value(stats).unwrap_or_default());
            }
            Err(e) => error!("Error updating stats: {e}"),
        }
    }
}

/// Check today's token usage against the alert thresholds.
async fn threshold_loop(state: Arc<GatewayState>) {
    let mut interval = tokio::time::interval(THRESHOLD_INTERVAL);
    let mut memory = AlertMemory::default();
    loop {
        interval.tick().await;
        if let Err(e) = check_usage_thresholds(&state, &mut memory).await {
            error!("Error checking thresholds: {e}");
        }
    }
}

/// Trim old rows once a day.
async fn cleanup_loop(state: Arc<GatewayState>) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    // The first tick completes immediately; skip the boot-time purge
    interval.tick().await;
    loop {
        interval.tick().await;
        let retention = &state.config.retention;
        match state
            .store
            .purge_old_data(
                retention.work_item_days,
                retention.usage_days,
                retention.event_days,
            )
            .await
        {
            Ok((work_items, usage, events)) => info!(
                work_items, usage, events, "Old data cleanup completed"
            ),
            Err(e) => error!("Error cleaning up old data: {e}"),
        }
    }
}

/// Per-level alert timestamps for cooldown.
#[derive(Debug, Default)]
struct AlertMemory {
    high: Option<Instant>,
    medium: Option<Instant>,
}

impl AlertMemory {
    fn slot(&mut self, level: AlertLevel) -> &mut Option<Instant> {
        match level {
            AlertLevel::High => &mut self.high,
            AlertLevel::Medium => &mut self.medium,
        }
    }

    /// Whether to alert now, stamping the slot if so.
    fn should_alert(&mut self, level: AlertLevel, now: Instant) -> bool {
        let slot = self.slot(level);
        match slot {
            Some(last) if now.duration_since(*last) < ALERT_COOLDOWN => false,
            _ => {
                *slot = Some(now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertLevel {
    Medium,
    High,
}

/// Percentage of the daily token budget consumed, capped at 100.
fn usage_percent(today_tokens: i64, daily_budget: i64) -> f64 {
    if daily_budget <= 0 {
        return 0.0;
    }
    (today_tokens as f64 / daily_budget as f64 * 100.0).min(100.0)
}

/// Which alert level a usage percentage trips, if any.
fn threshold_level(percent: f64, alerts: &AlertConfig) -> Option<(AlertLevel, u8)> {
    if percent >= alerts.threshold_high as f64 {
        Some((AlertLevel::High, alerts.threshold_high))
    } else if percent >= alerts.threshold_medium as f64 {
        Some((AlertLevel::Medium, alerts.threshold_medium))
    } else {
        None
    }
}

async fn check_usage_thresholds(
    state: &GatewayState,
    memory: &mut AlertMemory,
) -> anyhow::Result<()> {
    let stats = state.store.dashboard_stats().await?;
    let percent = usage_percent(
        stats.usage.today.total_tokens,
        state.config.alerts.daily_token_budget,
    );

    let Some((level, threshold)) = threshold_level(percent, &state.config.alerts) else {
        return Ok(());
    };
    if !memory.should_alert(level, Instant::now()) {
        return Ok(());
    }

    let (kind, severity, channel) = match level {
        AlertLevel::High => ("usage.threshold.exceeded", "critical", "alert:critical"),
        AlertLevel::Medium => ("usage.threshold.warning", "warning", "alert:warning"),
    };

    state
        .store
        .insert_event(
            kind,
            severity,
            &format!("Usage exceeded {threshold}% threshold"),
            Some(json!({ "usage": percent, "threshold": threshold })),
        )
        .await?;
    state.hub.publish(
        channel,
        json!({ "type": "usage", "message": format!("Usage at {percent:.0}%") }),
    );

    Ok(())
}
