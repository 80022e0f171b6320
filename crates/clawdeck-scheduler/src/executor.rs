//! Action execution: dispatch a task's action to its handler and record
//! what happened, uniformly across handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use clawdeck_storage::DashboardStore;
use clawdeck_types::{LogStatus, ScheduledTask, TaskAction};

use crate::{Result, SchedulerError};

// ─── Collaborators ───────────────────────────────────

/// Outcome of one message delivery attempt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivered: bool,
    pub detail: Option<String>,
}

/// Delivers report text to the user's message channel. Best-effort:
/// implementations should prefer an undelivered `Delivery` over an error.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<Delivery>;
}

/// Generates a model response for ai_prompt tasks.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        context: Option<&str>,
        api_key_ref: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// Current conditions for a location.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WeatherReport {
    pub location: String,
    pub country: String,
    pub condition: String,
    pub temperature_c: i32,
    pub feels_like_c: i32,
    pub humidity_pct: i32,
    pub wind_speed_kmh: i32,
}

/// Weather lookup. Never fails: implementations return a plausible
/// fallback report when the upstream is unreachable.
#[async_trait::async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, location: &str) -> WeatherReport;
}

/// Fire-and-forget event fan-out to connected observers.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: &str, payload: Value);
}

// ─── Executor ───────────────────────────────────

/// What one execution produced. `error` carries a recorded soft failure
/// (the run completed, but something went wrong worth surfacing).
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: LogStatus,
    pub output: Value,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    fn success(output: Value) -> Self {
        Self {
            status: LogStatus::Success,
            output,
            error: None,
        }
    }

    fn failure(output: Value, error: String) -> Self {
        Self {
            status: LogStatus::Failure,
            output,
            error: Some(error),
        }
    }
}

/// Defaults applied when a task doesn't specify its own.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub default_location: String,
    pub default_model: String,
}

/// Dispatches task actions to their side-effecting handlers.
///
/// Every execution appends exactly one log entry and publishes exactly
/// one event; a failed delivery step propagates as an error so the
/// scheduler can record it instead.
pub struct ActionExecutor {
    store: Arc<DashboardStore>,
    messenger: Arc<dyn Messenger>,
    models: Arc<dyn ModelProvider>,
    weather: Arc<dyn WeatherProvider>,
    notifier: Arc<dyn Notifier>,
    http: reqwest::Client,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<DashboardStore>,
        messenger: Arc<dyn Messenger>,
        models: Arc<dyn ModelProvider>,
        weather: Arc<dyn WeatherProvider>,
        notifier: Arc<dyn Notifier>,
        config: ExecutorConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            store,
            messenger,
            models,
            weather,
            notifier,
            http,
            config,
        }
    }

    /// Run the task's action, append its log entry and publish the
    /// execution event. Returns the outcome, or an error if a delivery
    /// step threw (the caller records it and appends the failure log).
    pub async fn execute(&self, task: &ScheduledTask) -> Result<ExecutionOutcome> {
        let outcome = match &task.action {
            TaskAction::SystemStatus {} => self.system_status(task).await?,
            TaskAction::TelegramMessage { message, context } => {
                self.telegram_message(task, message, context.as_deref()).await?
            }
            TaskAction::Weather { location } => self.weather_report(task, location.as_deref()).await?,
            TaskAction::AiPrompt { prompt, context } => {
                self.ai_prompt(task, prompt, context.as_deref()).await?
            }
            TaskAction::Webhook { url, payload } => self.webhook(url, payload).await,
            TaskAction::Command { command } => self.command(task, command),
        };

        self.store
            .append_execution_log(&task.id, outcome.status, outcome.output.clone())
            .await?;
        self.notifier.publish(
            "scheduled-task:executed",
            json!({
                "task_id": task.id,
                "name": task.name,
                "status": outcome.status,
                "output": outcome.output,
                "executed_at": Utc::now().to_rfc3339(),
            }),
        );

        Ok(outcome)
    }

    async fn system_status(&self, task: &ScheduledTask) -> Result<ExecutionOutcome> {
        let stats = self.store.dashboard_stats().await?;

        let text = format!(
            "📊 *System Status Report*\n\n\
             *Tasks:* {} total\n  • Pending: {}\n  • In Progress: {}\n  • Completed: {}\n\n\
             *Agents:* {} active / {} total\n\n\
             *Usage Today:*\n  • Tokens: {}\n  • Cost: ${:.4}\n\n\
             _Report generated: {}_",
            stats.tasks.total,
            stats.tasks.pending,
            stats.tasks.in_progress,
            stats.tasks.completed,
            stats.agents.active,
            stats.agents.total,
            stats.usage.today.total_tokens,
            stats.usage.today.total_cost,
            Utc::now().format("%d.%m.%Y %H:%M"),
        );
        self.deliver(&text).await?;

        info!(task = %task.name, "System status report sent");
        Ok(ExecutionOutcome::success(json!({
            "type": "system_status",
            "timestamp": Utc::now().to_rfc3339(),
            "data": stats,
        })))
    }

    async fn telegram_message(
        &self,
        task: &ScheduledTask,
        message: &str,
        context: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        // Short texts and questions read like prompts: wrap them with
        // the task name and a timestamp instead of sending verbatim.
        let text = if message.contains('?') || message.chars().count() < 50 {
            let stamp = Utc::now().format("%d.%m. %H:%M");
            let mut text = format!("🤖 *{}*\n\n{}\n\n_{stamp}_", task.name, message);
            if let Some(context) = context {
                text.push_str(&format!("\n\nContext: {context}"));
            }
            text
        } else {
            message.to_string()
        };

        self.deliver(&text).await?;

        info!(task = %task.name, "Telegram message sent");
        Ok(ExecutionOutcome::success(json!({
            "status": "sent",
            "message": text,
        })))
    }

    async fn weather_report(
        &self,
        task: &ScheduledTask,
        location: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        let location = location.unwrap_or(&self.config.default_location);
        // The provider falls back internally; a fallback report is a
        // normal result here, not an error.
        let report = self.weather.current(location).await;

        let text = format!(
            "🌤️ *Good Morning!*\n\n\
             *Weather in {}:*\n  • Condition: {}\n  • Temperature: {}°C\n  • Feels like: {}°C\n  • Humidity: {}%\n\n\
             _Have a great day! ☀️_",
            report.location,
            report.condition,
            report.temperature_c,
            report.feels_like_c,
            report.humidity_pct,
        );
        self.deliver(&text).await?;

        info!(task = %task.name, location, "Weather report sent");
        let output = serde_json::to_value(&report)
            .map_err(|e| SchedulerError::Execution(e.to_string()))?;
        Ok(ExecutionOutcome::success(output))
    }

    async fn ai_prompt(
        &self,
        task: &ScheduledTask,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        let model = task.model.as_deref().unwrap_or(&self.config.default_model);

        // A provider failure is recorded, not thrown: the user still
        // gets told their scheduled prompt failed.
        let (response, error) = match self
            .models
            .generate(model, prompt, context, task.api_key_ref.as_deref())
            .await
        {
            Ok(response) => (response, None),
            Err(e) => {
                warn!(task = %task.name, model, "AI generation failed: {e}");
                (
                    format!("❌ Failed to generate AI response: {e}"),
                    Some(e.to_string()),
                )
            }
        };

        let text = format!(
            "📅 *Scheduled Task: {}*\n\n🤖 *AI Response*\n\n{}\n\n_Model: {}_\n_Time: {}_",
            task.name,
            response,
            model,
            Utc::now().format("%d.%m.%Y %H:%M"),
        );
        self.deliver(&text).await?;

        info!(task = %task.name, model, "AI prompt response sent");
        let output = json!({
            "prompt": prompt,
            "response": response,
            "model": model,
            "error": error,
        });
        Ok(match error {
            Some(error) => ExecutionOutcome::failure(output, error),
            None => ExecutionOutcome::success(output),
        })
    }

    /// Outbound webhook call. Failures are logged, never raised.
    async fn webhook(&self, url: &str, payload: &Value) -> ExecutionOutcome {
        match self.http.post(url).json(payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                info!(url, %status, "Webhook called");
                ExecutionOutcome::success(json!({
                    "url": url,
                    "status_code": status.as_u16(),
                }))
            }
            Err(e) => {
                warn!(url, "Webhook call failed: {e}");
                ExecutionOutcome::failure(
                    json!({ "url": url, "error": e.to_string() }),
                    format!("webhook call failed: {e}"),
                )
            }
        }
    }

    /// Commands from stored configuration are never executed, only
    /// recorded. Documented restriction.
    fn command(&self, task: &ScheduledTask, command: &str) -> ExecutionOutcome {
        info!(task = %task.name, command, "Command execution is disabled; recording only");
        ExecutionOutcome::success(json!({
            "command": command,
            "executed": false,
            "reason": "command execution is disabled",
        }))
    }

    /// Delivery step shared by all report handlers. An error here
    /// propagates to the scheduler's fire handler.
    async fn deliver(&self, text: &str) -> Result<()> {
        let delivery = self
            .messenger
            .send(text)
            .await
            .map_err(|e| SchedulerError::Execution(format!("message delivery failed: {e}")))?;
        if !delivery.delivered {
            warn!(
                detail = delivery.detail.as_deref().unwrap_or("none"),
                "Message not delivered"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdeck_storage::DashboardStore;
    use clawdeck_types::{NewScheduledTask, Schedule};
    use std::sync::Mutex;

    struct RecordingMessenger {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingMessenger {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Messenger for RecordingMessenger {
        async fn send(&self, text: &str) -> anyhow::Result<Delivery> {
            if self.fail {
                anyhow::bail!("channel down");
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(Delivery {
                delivered: true,
                detail: None,
            })
        }
    }

    struct StaticModels {
        response: Option<String>,
    }

    #[async_trait::async_trait]
    impl ModelProvider for StaticModels {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _context: Option<&str>,
            _api_key_ref: Option<&str>,
        ) -> anyhow::Result<String> {
            match &self.response {
                Some(r) => Ok(r.clone()),
                None => anyhow::bail!("invalid API key"),
            }
        }
    }

    struct StaticWeather;

    #[async_trait::async_trait]
    impl WeatherProvider for StaticWeather {
        async fn current(&self, location: &str) -> WeatherReport {
            WeatherReport {
                location: location.to_string(),
                country: "Austria".into(),
                condition: "Partly cloudy".into(),
                temperature_c: 15,
                feels_like_c: 13,
                humidity_pct: 65,
                wind_speed_kmh: 12,
            }
        }
    }

    struct CountingNotifier {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl CountingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<(String, Value)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Notifier for CountingNotifier {
        fn publish(&self, event: &str, payload: Value) {
            self.events.lock().unwrap().push((event.to_string(), payload));
        }
    }

    struct TestContext {
        store: Arc<DashboardStore>,
        messenger: Arc<RecordingMessenger>,
        notifier: Arc<CountingNotifier>,
        executor: ActionExecutor,
    }

    fn context(messenger_fails: bool, model_response: Option<&str>) -> TestContext {
        let store = Arc::new(DashboardStore::open_in_memory().unwrap());
        let messenger = RecordingMessenger::new(messenger_fails);
        let notifier = CountingNotifier::new();
        let executor = ActionExecutor::new(
            store.clone(),
            messenger.clone(),
            Arc::new(StaticModels {
                response: model_response.map(String::from),
            }),
            Arc::new(StaticWeather),
            notifier.clone(),
            ExecutorConfig {
                default_location: "Vienna".into(),
                default_model: "kimi-coding/k2p5".into(),
            },
        );
        TestContext {
            store,
            messenger,
            notifier,
            executor,
        }
    }

    async fn stored_task(ctx: &TestContext, action: TaskAction) -> ScheduledTask {
        ctx.store
            .create_task(NewScheduledTask {
                name: "test task".into(),
                description: None,
                schedule: Schedule::Interval { minutes: 1 },
                action,
                model: None,
                api_key_ref: None,
                enabled: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_weather_logs_and_publishes_once() {
        let ctx = context(false, Some("unused"));
        let task = stored_task(
            &ctx,
            TaskAction::Weather {
                location: Some("Vienna".into()),
            },
        )
        .await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Success);
        assert_eq!(outcome.output["location"], "Vienna");

        let logs = ctx.store.execution_logs(&task.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].output["location"], "Vienna");

        let sent = ctx.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Weather in Vienna"));

        let events = ctx.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "scheduled-task:executed");
    }

    #[tokio::test]
    async fn test_weather_default_location() {
        let ctx = context(false, None);
        let task = stored_task(&ctx, TaskAction::Weather { location: None }).await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.output["location"], "Vienna");
    }

    #[tokio::test]
    async fn test_ai_prompt_soft_failure_still_delivers() {
        let ctx = context(false, None); // model errors
        let task = stored_task(
            &ctx,
            TaskAction::AiPrompt {
                prompt: "Daily summary".into(),
                context: None,
            },
        )
        .await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Failure);
        assert!(outcome.error.as_deref().unwrap().contains("invalid API key"));

        // The failure notice was still sent to the user
        let sent = ctx.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Failed to generate AI response"));

        // And the log entry is failure-shaped with the error text
        let logs = ctx.store.execution_logs(&task.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failure);
        assert!(logs[0].output["error"].as_str().unwrap().contains("invalid API key"));
        assert_eq!(logs[0].output["prompt"], "Daily summary");
    }

    #[tokio::test]
    async fn test_ai_prompt_success_records_model_and_response() {
        let ctx = context(false, Some("All systems nominal."));
        let task = stored_task(
            &ctx,
            TaskAction::AiPrompt {
                prompt: "Status?".into(),
                context: Some("be brief".into()),
            },
        )
        .await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Success);
        assert_eq!(outcome.output["response"], "All systems nominal.");
        assert_eq!(outcome.output["model"], "kimi-coding/k2p5");
    }

    #[tokio::test]
    async fn test_delivery_failure_propagates_without_log() {
        let ctx = context(true, Some("ok"));
        let task = stored_task(
            &ctx,
            TaskAction::TelegramMessage {
                message: "ping".into(),
                context: None,
            },
        )
        .await;

        let result = ctx.executor.execute(&task).await;
        assert!(matches!(result, Err(SchedulerError::Execution(_))));

        // The caller owns failure bookkeeping; nothing was logged here
        assert!(ctx.store.execution_logs(&task.id, 10).await.unwrap().is_empty());
        assert!(ctx.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_telegram_short_message_is_enriched() {
        let ctx = context(false, None);
        let task = stored_task(
            &ctx,
            TaskAction::TelegramMessage {
                message: "Anything new?".into(),
                context: Some("daily check".into()),
            },
        )
        .await;

        ctx.executor.execute(&task).await.unwrap();
        let sent = ctx.messenger.sent();
        assert!(sent[0].contains("test task"));
        assert!(sent[0].contains("Anything new?"));
        assert!(sent[0].contains("Context: daily check"));
    }

    #[tokio::test]
    async fn test_telegram_long_statement_sent_verbatim() {
        let ctx = context(false, None);
        let message =
            "Reminder: the weekly report is due tomorrow morning before the standup meeting."
                .to_string();
        let task = stored_task(
            &ctx,
            TaskAction::TelegramMessage {
                message: message.clone(),
                context: None,
            },
        )
        .await;

        ctx.executor.execute(&task).await.unwrap();
        assert_eq!(ctx.messenger.sent(), vec![message]);
    }

    #[tokio::test]
    async fn test_command_is_never_executed() {
        let ctx = context(false, None);
        let task = stored_task(
            &ctx,
            TaskAction::Command {
                command: "rm -rf /".into(),
            },
        )
        .await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Success);
        assert_eq!(outcome.output["executed"], false);
        // No delivery happens for command tasks
        assert!(ctx.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_failure_is_swallowed() {
        let ctx = context(false, None);
        // Nothing listens on port 1; the call fails fast
        let task = stored_task(
            &ctx,
            TaskAction::Webhook {
                url: "http://127.0.0.1:1/hook".into(),
                payload: json!({"ping": true}),
            },
        )
        .await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Failure);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.output["url"], "http://127.0.0.1:1/hook");

        let logs = ctx.store.execution_logs(&task.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_system_status_reports_aggregates() {
        let ctx = context(false, None);
        ctx.store.record_usage("m", 1000, 500, 3, 0.05).await.unwrap();
        let task = stored_task(&ctx, TaskAction::SystemStatus {}).await;

        let outcome = ctx.executor.execute(&task).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Success);
        assert_eq!(outcome.output["data"]["usage"]["today"]["total_tokens"], 1500);

        let sent = ctx.messenger.sent();
        assert!(sent[0].contains("System Status Report"));
        assert!(sent[0].contains("Tokens: 1500"));
    }
}
