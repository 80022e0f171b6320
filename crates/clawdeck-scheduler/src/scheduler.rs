//! The task scheduler: one live timer per enabled task.
//!
//! The timer registry is a derived cache keyed by task id; the store
//! stays the single source of truth for task content. Every fire
//! re-fetches its task before doing anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use clawdeck_storage::{DashboardStore, TaskFilter};
use clawdeck_types::{ExecutionLogEntry, LogStatus, NewScheduledTask, ScheduledTask, ScheduledTaskPatch};

use crate::executor::{ActionExecutor, ExecutionOutcome, Notifier};
use crate::schedule::{self, TriggerRule};
use crate::{Result, SchedulerError};

/// Owns the timer registry and the run bookkeeping around fires.
///
/// Constructor-injected dependencies; independent instances (e.g. under
/// test) do not interfere.
pub struct TaskScheduler {
    store: Arc<DashboardStore>,
    executor: Arc<ActionExecutor>,
    notifier: Arc<dyn Notifier>,
    default_timezone: String,
    /// At most one live timer per task id. Replacement is
    /// cancel-then-install under the lock, with no await in between.
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<DashboardStore>,
        executor: Arc<ActionExecutor>,
        notifier: Arc<dyn Notifier>,
        default_timezone: impl Into<String>,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            default_timezone: default_timezone.into(),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Load all enabled tasks and arm them. Tasks that fail schedule
    /// validation are skipped with a warning, never fatal.
    pub async fn initialize_scheduled_tasks(&self) -> Result<usize> {
        let tasks = self
            .store
            .list_tasks(TaskFilter {
                enabled: Some(true),
                kind: None,
            })
            .await?;

        let mut armed = 0;
        for task in &tasks {
            match self.schedule_task(task) {
                Ok(true) => armed += 1,
                Ok(false) => {}
                Err(e) => warn!(task = %task.name, id = %task.id, "Skipping unschedulable task: {e}"),
            }
        }

        info!("Initialized {armed} scheduled tasks");
        Ok(armed)
    }

    /// Idempotent re-arm: cancel any existing timer for the task id,
    /// then install a new one if the task is enabled and its schedule
    /// validates. Used for first registration and every re-registration.
    ///
    /// Returns whether a timer is now armed. A validation error leaves
    /// the task stored but unscheduled.
    pub fn schedule_task(&self, task: &ScheduledTask) -> Result<bool> {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.remove(&task.id) {
            handle.abort();
        }

        if !task.enabled {
            return Ok(false);
        }

        let rule = schedule::trigger_rule(&task.schedule, &self.default_timezone)?;
        let handle = tokio::spawn(run_timer(
            task.id.clone(),
            rule,
            self.store.clone(),
            self.executor.clone(),
            self.notifier.clone(),
        ));
        timers.insert(task.id.clone(), handle);

        info!(task = %task.name, id = %task.id, "Scheduled task armed");
        Ok(true)
    }

    /// Persist a new task, then arm it. The task stays stored even if
    /// its schedule fails validation; the error still reaches the caller.
    pub async fn create_task(&self, data: NewScheduledTask) -> Result<ScheduledTask> {
        let task = self.store.create_task(data).await?;
        self.schedule_task(&task)?;
        Ok(task)
    }

    /// Persist updates, then re-arm if scheduling-relevant fields moved.
    pub async fn update_task(
        &self,
        id: &str,
        patch: ScheduledTaskPatch,
    ) -> Result<ScheduledTask> {
        let touches_scheduling = patch.touches_scheduling();
        let task = self
            .store
            .update_task(id, patch)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;

        if touches_scheduling {
            self.schedule_task(&task)?;
        }
        Ok(task)
    }

    /// Tear down the timer, then delete the record (logs first).
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        {
            let mut timers = self.timers.lock().unwrap();
            if let Some(handle) = timers.remove(id) {
                handle.abort();
            }
        }

        if !self.store.delete_task(id).await? {
            return Err(SchedulerError::TaskNotFound(id.to_string()));
        }
        info!(id, "Scheduled task deleted");
        Ok(())
    }

    /// Manual trigger, bypassing the timer. Updates run bookkeeping
    /// exactly as a scheduled fire would; never touches the registry,
    /// so the next scheduled fire is unaffected.
    pub async fn run_task_action(&self, id: &str) -> Result<ExecutionOutcome> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;

        let task = self
            .store
            .record_run(&task.id, Utc::now())
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;

        match self.executor.execute(&task).await {
            Ok(outcome) => {
                if let Some(err) = &outcome.error {
                    self.store.record_error(&task.id, err).await?;
                }
                Ok(outcome)
            }
            Err(e) => {
                record_failure(&self.store, &self.notifier, &task.id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Best-effort next-fire estimate for display.
    pub fn next_fire(&self, task: &ScheduledTask) -> Option<DateTime<Utc>> {
        schedule::next_fire(task, &self.default_timezone, Utc::now())
    }

    /// Recent execution logs, newest first.
    pub async fn execution_logs(&self, id: &str, limit: usize) -> Result<Vec<ExecutionLogEntry>> {
        Ok(self.store.execution_logs(id, limit).await?)
    }

    /// Whether a live timer exists for the task id.
    pub fn is_armed(&self, id: &str) -> bool {
        let timers = self.timers.lock().unwrap();
        timers.get(id).is_some_and(|h| !h.is_finished())
    }

    /// Number of live timers.
    pub fn armed_count(&self) -> usize {
        let timers = self.timers.lock().unwrap();
        timers.values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        let timers = self.timers.lock().unwrap();
        for handle in timers.values() {
            handle.abort();
        }
    }
}

/// The per-task timer loop. Sleeps until the rule's next occurrence,
/// fires, repeats. Stops on its own when the task disappears or is
/// disabled; `abort()` stops it immediately otherwise.
async fn run_timer(
    task_id: String,
    rule: TriggerRule,
    store: Arc<DashboardStore>,
    executor: Arc<ActionExecutor>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        let now = Utc::now();
        let Some(next) = rule.next_after(now) else {
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        if !fire(&task_id, &store, &executor, &notifier).await {
            break;
        }
    }
}

/// One fire: re-fetch, bump bookkeeping, execute, record the outcome.
/// Nothing escapes this boundary; a failing fire leaves the timer
/// running. Returns false when the timer should stop (task gone or
/// disabled underneath us — do not resurrect it).
async fn fire(
    task_id: &str,
    store: &Arc<DashboardStore>,
    executor: &Arc<ActionExecutor>,
    notifier: &Arc<dyn Notifier>,
) -> bool {
    // The registry is not authoritative: use the stored record.
    let task = match store.get_task(task_id).await {
        Ok(Some(task)) if task.enabled => task,
        Ok(_) => return false,
        Err(e) => {
            error!(task_id, "Fire aborted, task fetch failed: {e}");
            return true;
        }
    };

    info!(task = %task.name, id = %task.id, "Executing scheduled task");

    let task = match store.record_run(task_id, Utc::now()).await {
        Ok(Some(task)) => task,
        Ok(None) => return false,
        Err(e) => {
            error!(task_id, "Fire aborted, run bookkeeping failed: {e}");
            return true;
        }
    };

    match executor.execute(&task).await {
        Ok(outcome) => {
            if let Some(err) = &outcome.error {
                if let Err(e) = store.record_error(task_id, err).await {
                    error!(task_id, "Failed to record soft failure: {e}");
                }
            }
        }
        Err(e) => {
            error!(task = %task.name, "Scheduled task failed: {e}");
            record_failure(store, notifier, task_id, &e.to_string()).await;
        }
    }

    true
}

/// Shared failure bookkeeping for fires and manual runs whose executor
/// call threw: last_error fields, a failure log entry, an error event.
async fn record_failure(
    store: &Arc<DashboardStore>,
    notifier: &Arc<dyn Notifier>,
    task_id: &str,
    message: &str,
) {
    if let Err(e) = store.record_error(task_id, message).await {
        error!(task_id, "Failed to record error: {e}");
    }
    if let Err(e) = store
        .append_execution_log(task_id, LogStatus::Failure, json!({ "error": message }))
        .await
    {
        error!(task_id, "Failed to append failure log: {e}");
    }
    notifier.publish(
        "scheduled-task:error",
        json!({
            "task_id": task_id,
            "error": message,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{
        Delivery, ExecutorConfig, Messenger, ModelProvider, WeatherProvider, WeatherReport,
    };
    use clawdeck_types::{Schedule, TaskAction};
    use std::time::Duration;

    struct QuietMessenger {
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Messenger for QuietMessenger {
        async fn send(&self, _text: &str) -> anyhow::Result<Delivery> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("channel down");
            }
            Ok(Delivery {
                delivered: true,
                detail: None,
            })
        }
    }

    struct FailingModels;

    #[async_trait::async_trait]
    impl ModelProvider for FailingModels {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _context: Option<&str>,
            _api_key_ref: Option<&str>,
        ) -> anyhow::Result<String> {
            anyhow::bail!("no credentials")
        }
    }

    struct StaticWeather;

    #[async_trait::async_trait]
    impl WeatherProvider for StaticWeather {
        async fn current(&self, location: &str) -> WeatherReport {
            WeatherReport {
                location: location.to_string(),
                country: "Austria".into(),
                condition: "Clear".into(),
                temperature_c: 20,
                feels_like_c: 20,
                humidity_pct: 50,
                wind_speed_kmh: 5,
            }
        }
    }

    struct NoopNotifier;

    impl Notifier for NoopNotifier {
        fn publish(&self, _event: &str, _payload: serde_json::Value) {}
    }

    struct TestContext {
        store: Arc<DashboardStore>,
        messenger: Arc<QuietMessenger>,
        scheduler: Arc<TaskScheduler>,
    }

    fn context() -> TestContext {
        let store = Arc::new(DashboardStore::open_in_memory().unwrap());
        let messenger = Arc::new(QuietMessenger {
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let notifier: Arc<dyn Notifier> = Arc::new(NoopNotifier);
        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            messenger.clone(),
            Arc::new(FailingModels),
            Arc::new(StaticWeather),
            notifier.clone(),
            ExecutorConfig {
                default_location: "Vienna".into(),
                default_model: "kimi-coding/k2p5".into(),
            },
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            executor,
            notifier,
            "Europe/Vienna",
        ));
        TestContext {
            store,
            messenger,
            scheduler,
        }
    }

    fn minute_weather_task() -> NewScheduledTask {
        NewScheduledTask {
            name: "weather every minute".into(),
            description: None,
            schedule: Schedule::Interval { minutes: 1 },
            action: TaskAction::Weather {
                location: Some("Vienna".into()),
            },
            model: None,
            api_key_ref: None,
            enabled: true,
        }
    }

    /// The fire path does real blocking I/O that the paused clock does
    /// not cover; poll until the bookkeeping lands.
    async fn wait_for_run_count(store: &DashboardStore, id: &str, want: i64) {
        for _ in 0..1000 {
            if let Some(task) = store.get_task(id).await.unwrap() {
                if task.run_count >= want {
                    return;
                }
            }
            tokio::task::yield_now().await;
        }
        panic!("run_count never reached {want}");
    }

    /// Log entries land after the run bookkeeping; wait for them
    /// separately before asserting on (or deleting) log rows.
    async fn wait_for_log_count(store: &DashboardStore, id: &str, want: usize) {
        for _ in 0..1000 {
            if store.execution_logs(id, want + 1).await.unwrap().len() >= want {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("log count never reached {want}");
    }

    async fn settle(store: &DashboardStore, id: &str) {
        for _ in 0..50 {
            let _ = store.get_task(id).await.unwrap();
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_one_minute_interval() {
        let ctx = context();
        let task = ctx.scheduler.create_task(minute_weather_task()).await.unwrap();
        assert!(ctx.scheduler.is_armed(&task.id));

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_run_count(&ctx.store, &task.id, 1).await;
        wait_for_log_count(&ctx.store, &task.id, 1).await;

        let logs = ctx.store.execution_logs(&task.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].output["location"], "Vienna");

        let stored = ctx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert!(stored.last_run_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_rearm_no_double_fires() {
        let ctx = context();
        let task = ctx.scheduler.create_task(minute_weather_task()).await.unwrap();

        // Re-arm twice in a row; the old timer must be replaced, not doubled
        ctx.scheduler.schedule_task(&task).unwrap();
        ctx.scheduler.schedule_task(&task).unwrap();
        assert_eq!(ctx.scheduler.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_run_count(&ctx.store, &task.id, 1).await;
        settle(&ctx.store, &task.id).await;

        let stored = ctx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_tears_down() {
        let ctx = context();
        let task = ctx.scheduler.create_task(minute_weather_task()).await.unwrap();

        ctx.scheduler
            .update_task(
                &task.id,
                ScheduledTaskPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!ctx.scheduler.is_armed(&task.id));

        // Several would-be trigger points pass without a fire
        tokio::time::sleep(Duration::from_secs(600)).await;
        settle(&ctx.store, &task.id).await;

        let stored = ctx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 0);
        assert!(ctx.store.execution_logs(&task.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_stops_fires_and_removes_rows() {
        let ctx = context();
        let task = ctx.scheduler.create_task(minute_weather_task()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_run_count(&ctx.store, &task.id, 1).await;
        wait_for_log_count(&ctx.store, &task.id, 1).await;

        ctx.scheduler.delete_task(&task.id).await.unwrap();
        assert!(!ctx.scheduler.is_armed(&task.id));
        assert!(ctx.store.get_task(&task.id).await.unwrap().is_none());
        // Logs go with the task
        assert!(ctx.store.execution_logs(&task.id, 10).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(300)).await;
        settle(&ctx.store, &task.id).await;
        assert!(ctx.store.get_task(&task.id).await.unwrap().is_none());
        assert!(ctx.store.execution_logs(&task.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_task() {
        let ctx = context();
        let result = ctx.scheduler.delete_task("missing").await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_run_leaves_timer_alone() {
        let ctx = context();
        let task = ctx.scheduler.create_task(minute_weather_task()).await.unwrap();

        let outcome = ctx.scheduler.run_task_action(&task.id).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Success);
        assert!(ctx.scheduler.is_armed(&task.id));

        let stored = ctx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);

        // The scheduled fire still happens on its own cadence
        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_run_count(&ctx.store, &task.id, 2).await;
        assert!(ctx.scheduler.is_armed(&task.id));
    }

    #[tokio::test]
    async fn test_manual_run_unknown_task() {
        let ctx = context();
        let result = ctx.scheduler.run_task_action("missing").await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failure_keeps_task_armed() {
        let ctx = context();
        let task = ctx
            .scheduler
            .create_task(NewScheduledTask {
                name: "ai digest".into(),
                description: None,
                schedule: Schedule::Interval { minutes: 1 },
                action: TaskAction::AiPrompt {
                    prompt: "Summarize".into(),
                    context: None,
                },
                model: None,
                api_key_ref: None,
                enabled: true,
            })
            .await
            .unwrap();

        // Models always fail in this context; the run completes anyway
        let outcome = ctx.scheduler.run_task_action(&task.id).await.unwrap();
        assert_eq!(outcome.status, LogStatus::Failure);

        let stored = ctx.store.get_task(&task.id).await.unwrap().unwrap();
        assert!(stored.last_error.as_deref().unwrap().contains("no credentials"));
        assert!(stored.last_error_at.is_some());
        assert!(ctx.scheduler.is_armed(&task.id));

        let logs = ctx.store.execution_logs(&task.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_recorded_timer_survives() {
        let ctx = context();
        let task = ctx
            .scheduler
            .create_task(NewScheduledTask {
                name: "status ping".into(),
                description: None,
                schedule: Schedule::Interval { minutes: 1 },
                action: TaskAction::TelegramMessage {
                    message: "ping".into(),
                    context: None,
                },
                model: None,
                api_key_ref: None,
                enabled: true,
            })
            .await
            .unwrap();

        ctx.messenger
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_run_count(&ctx.store, &task.id, 1).await;
        wait_for_log_count(&ctx.store, &task.id, 1).await;

        let stored = ctx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("channel down"));
        // Transient failures never disarm a recurring job
        assert!(ctx.scheduler.is_armed(&task.id));

        let logs = ctx.store.execution_logs(&task.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failure);

        // Next cycle keeps firing and keeps updating last_error
        tokio::time::sleep(Duration::from_secs(120)).await;
        wait_for_run_count(&ctx.store, &task.id, 2).await;
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_stored_but_unscheduled() {
        let ctx = context();
        let result = ctx
            .scheduler
            .create_task(NewScheduledTask {
                name: "broken".into(),
                description: None,
                schedule: Schedule::Interval { minutes: 0 },
                action: TaskAction::SystemStatus {},
                model: None,
                api_key_ref: None,
                enabled: true,
            })
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidSchedule(_))));

        // Stored, but no timer
        let tasks = ctx.store.list_tasks(TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(ctx.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_initialize_skips_invalid_tasks() {
        let ctx = context();
        // Two valid, one invalid, one disabled
        ctx.store.create_task(minute_weather_task()).await.unwrap();
        ctx.store.create_task(minute_weather_task()).await.unwrap();
        ctx.store
            .create_task(NewScheduledTask {
                name: "bad cron".into(),
                description: None,
                schedule: Schedule::Cron {
                    expression: "not a cron".into(),
                },
                action: TaskAction::SystemStatus {},
                model: None,
                api_key_ref: None,
                enabled: true,
            })
            .await
            .unwrap();
        let mut disabled = minute_weather_task();
        disabled.enabled = false;
        ctx.store.create_task(disabled).await.unwrap();

        let armed = ctx.scheduler.initialize_scheduled_tasks().await.unwrap();
        assert_eq!(armed, 2);
        assert_eq!(ctx.scheduler.armed_count(), 2);
    }

    #[tokio::test]
    async fn test_rename_does_not_rearm() {
        let ctx = context();
        let task = ctx.scheduler.create_task(minute_weather_task()).await.unwrap();
        // Disarm behind the scheduler's back to observe whether update re-arms
        {
            let mut timers = ctx.scheduler.timers.lock().unwrap();
            if let Some(h) = timers.remove(&task.id) {
                h.abort();
            }
        }

        ctx.scheduler
            .update_task(
                &task.id,
                ScheduledTaskPatch {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!ctx.scheduler.is_armed(&task.id));

        // Touching the schedule does re-arm
        ctx.scheduler
            .update_task(
                &task.id,
                ScheduledTaskPatch {
                    schedule: Some(Schedule::Interval { minutes: 2 }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(ctx.scheduler.is_armed(&task.id));
    }
}
