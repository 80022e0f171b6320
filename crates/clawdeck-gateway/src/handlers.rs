//! REST route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use clawdeck_scheduler::SchedulerError;
use clawdeck_storage::TaskFilter;
use clawdeck_types::{NewScheduledTask, ScheduledTask, ScheduledTaskPatch, TaskKind};

use crate::GatewayState;

/// Error surface for the REST routes: validation maps to 400, unknown
/// ids to 404, everything else to 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::InvalidSchedule(msg) => ApiError::Validation(msg),
            SchedulerError::TaskNotFound(id) => {
                ApiError::NotFound(format!("Scheduled task not found: {id}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<clawdeck_storage::StorageError> for ApiError {
    fn from(e: clawdeck_storage::StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub enabled: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn parse_kind(kind: &str) -> ApiResult<TaskKind> {
    serde_json::from_value(Value::String(kind.to_string()))
        .map_err(|_| ApiError::Validation(format!("unknown task type '{kind}'")))
}

/// Serialize a task with its computed next-fire estimate attached.
fn task_with_next_run(state: &GatewayState, task: &ScheduledTask) -> Value {
    let next_run_at = state.scheduler.next_fire(task).map(|t| t.to_rfc3339());
    let mut value = serde_json::to_value(task).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("next_run_at".into(), json!(next_run_at));
    }
    value
}

/// GET /api/scheduled-tasks?enabled=&type=
pub async fn list_scheduled_tasks(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Value>> {
    let filter = TaskFilter {
        enabled: query.enabled,
        kind: query.kind.as_deref().map(parse_kind).transpose()?,
    };
    let tasks = state.store.list_tasks(filter).await?;
    let count = tasks.len();
    let tasks: Vec<Value> = tasks
        .iter()
        .map(|t| task_with_next_run(&state, t))
        .collect();
    Ok(Json(json!({ "tasks": tasks, "count": count })))
}

/// GET /api/scheduled-tasks/{id}
pub async fn get_scheduled_task(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = state
        .store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scheduled task not found: {id}")))?;
    let logs = state.store.execution_logs(&id, 5).await?;

    let mut value = task_with_next_run(&state, &task);
    if let Value::Object(map) = &mut value {
        map.insert("recent_logs".into(), serde_json::to_value(logs).unwrap_or_default());
    }
    Ok(Json(value))
}

/// POST /api/scheduled-tasks
pub async fn create_scheduled_task(
    State(state): State<Arc<GatewayState>>,
    Json(data): Json<NewScheduledTask>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let task = state.scheduler.create_task(data).await?;
    Ok((StatusCode::CREATED, Json(task_with_next_run(&state, &task))))
}

/// PATCH /api/scheduled-tasks/{id}
pub async fn update_scheduled_task(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(patch): Json<ScheduledTaskPatch>,
) -> ApiResult<Json<Value>> {
    let task = state.scheduler.update_task(&id, patch).await?;
    Ok(Json(task_with_next_run(&state, &task)))
}

/// POST /api/scheduled-tasks/{id}/run
pub async fn run_scheduled_task(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.scheduler.run_task_action(&id).await?;
    Ok(Json(json!({
        "executed": true,
        "status": outcome.status,
    })))
}

/// DELETE /api/scheduled-tasks/{id}
pub async fn delete_scheduled_task(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.scheduler.delete_task(&id).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_logs_limit")]
    pub limit: usize,
}

fn default_logs_limit() -> usize {
    10
}

/// GET /api/scheduled-tasks/{id}/logs?limit=
pub async fn get_task_logs(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Value>> {
    if state.store.get_task(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Scheduled task not found: {id}")));
    }
    let logs = state.store.execution_logs(&id, query.limit).await?;
    Ok(Json(json!({ "logs": logs })))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<Arc<GatewayState>>) -> ApiResult<Json<Value>> {
    let stats = state.store.dashboard_stats().await?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

/// GET /api/agents
pub async fn get_agents(State(state): State<Arc<GatewayState>>) -> ApiResult<Json<Value>> {
    let agents = state.store.list_agents().await?;
    Ok(Json(json!({ "agents": agents })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    20
}

/// GET /api/tasks — the agents' work items, not scheduled tasks.
pub async fn get_work_items(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let tasks = state.store.list_work_items(query.limit).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

/// GET /api/events
pub async fn get_events(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let events = state.store.recent_events(query.limit).await?;
    Ok(Json(json!({ "events": events })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::EventHub;
    use clawdeck_config::ClawdeckConfig;
    use clawdeck_scheduler::{
        ActionExecutor, Delivery, ExecutorConfig, Messenger, ModelProvider, TaskScheduler,
        WeatherProvider, WeatherReport,
    };
    use clawdeck_storage::DashboardStore;
    use clawdeck_types::Schedule;
    use clawdeck_types::TaskAction;

    struct OkMessenger;

    #[async_trait::async_trait]
    impl Messenger for OkMessenger {
        async fn send(&self, _text: &str) -> anyhow::Result<Delivery> {
            Ok(Delivery {
                delivered: true,
                detail: None,
            })
        }
    }

    struct OkModels;

    #[async_trait::async_trait]
    impl ModelProvider for OkModels {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _context: Option<&str>,
            _api_key_ref: Option<&str>,
        ) -> anyhow::Result<String> {
            Ok("ok".into())
        }
    }

    struct OkWeather;

    #[async_trait::async_trait]
    impl WeatherProvider for OkWeather {
        async fn current(&self, location: &str) -> WeatherReport {
            WeatherReport {
                location: location.to_string(),
                country: "Austria".into(),
                condition: "Clear".into(),
                temperature_c: 18,
                feels_like_c: 17,
                humidity_pct: 55,
                wind_speed_kmh: 8,
            }
        }
    }

    fn state() -> Arc<GatewayState> {
        let store = Arc::new(DashboardStore::open_in_memory().unwrap());
        let hub = Arc::new(EventHub::new(64));
        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            Arc::new(OkMessenger),
            Arc::new(OkModels),
            Arc::new(OkWeather),
            hub.clone(),
            ExecutorConfig {
                default_location: "Vienna".into(),
                default_model: "kimi-coding/k2p5".into(),
            },
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            executor,
            hub.clone(),
            "Europe/Vienna",
        ));
        Arc::new(GatewayState {
            store,
            scheduler,
            hub,
            config: ClawdeckConfig::default(),
        })
    }

    fn new_task(name: &str) -> NewScheduledTask {
        NewScheduledTask {
            name: name.into(),
            description: None,
            schedule: Schedule::Interval { minutes: 5 },
            action: TaskAction::Weather {
                location: Some("Vienna".into()),
            },
            model: None,
            api_key_ref: None,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let state = state();
        let (status, Json(created)) =
            create_scheduled_task(State(state.clone()), Json(new_task("hourly weather")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "hourly weather");
        assert_eq!(created["kind"], "weather");

        let Json(listed) = list_scheduled_tasks(State(state), Query(ListTasksQuery::default()))
            .await
            .unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["tasks"][0]["name"], "hourly weather");
    }

    #[tokio::test]
    async fn test_create_invalid_schedule_is_400() {
        let state = state();
        let mut task = new_task("broken");
        task.schedule = Schedule::Interval { minutes: 0 };
        let result = create_scheduled_task(State(state.clone()), Json(task)).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));

        // Stored but unscheduled: the row exists, nothing is armed
        let Json(listed) = list_scheduled_tasks(State(state.clone()), Query(ListTasksQuery::default()))
            .await
            .unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(state.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_get_unknown_task_is_404() {
        let state = state();
        let result = get_scheduled_task(State(state), Path("missing".into())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_includes_recent_logs_and_next_run() {
        let state = state();
        let (_, Json(created)) =
            create_scheduled_task(State(state.clone()), Json(new_task("detailed")))
                .await
                .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        // Manual run produces one log and a last_run for the estimate
        let Json(run) = run_scheduled_task(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(run["executed"], true);

        let Json(task) = get_scheduled_task(State(state), Path(id)).await.unwrap();
        assert_eq!(task["recent_logs"].as_array().unwrap().len(), 1);
        assert!(task["next_run_at"].is_string());
        assert_eq!(task["run_count"], 1);
    }

    #[tokio::test]
    async fn test_update_unknown_task_is_404() {
        let state = state();
        let result = update_scheduled_task(
            State(state),
            Path("missing".into()),
            Json(ScheduledTaskPatch::default()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_roundtrip() {
        let state = state();
        let (_, Json(created)) =
            create_scheduled_task(State(state.clone()), Json(new_task("short lived")))
                .await
                .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let Json(deleted) = delete_scheduled_task(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(deleted["deleted"], true);

        let result = get_scheduled_task(State(state), Path(id)).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filter_by_type() {
        let state = state();
        create_scheduled_task(State(state.clone()), Json(new_task("weather one")))
            .await
            .unwrap();
        let mut status_task = new_task("status one");
        status_task.action = TaskAction::SystemStatus {};
        create_scheduled_task(State(state.clone()), Json(status_task))
            .await
            .unwrap();

        let Json(listed) = list_scheduled_tasks(
            State(state.clone()),
            Query(ListTasksQuery {
                enabled: None,
                kind: Some("system_status".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["tasks"][0]["name"], "status one");

        let result = list_scheduled_tasks(
            State(state),
            Query(ListTasksQuery {
                enabled: None,
                kind: Some("bogus".into()),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stats_endpoint_shape() {
        let state = state();
        let Json(stats) = get_stats(State(state)).await.unwrap();
        assert!(stats["tasks"]["total"].is_number());
        assert!(stats["agents"]["total"].is_number());
        assert!(stats["usage"]["today"]["total_tokens"].is_number());
    }

    #[tokio::test]
    async fn test_logs_endpoint_404_for_unknown() {
        let state = state();
        let result = get_task_logs(
            State(state),
            Path("missing".into()),
            Query(LogsQuery { limit: 10 }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
