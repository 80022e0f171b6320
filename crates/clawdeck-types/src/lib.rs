//! clawdeck-types: shared data shapes for the dashboard.
//!
//! Scheduled task definitions, their schedules and actions, execution
//! logs, and the aggregate shapes the dashboard renders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ──────────────────── Scheduled Tasks ────────────────────

/// Category of a scheduled task. Mirrors the action's discriminant;
/// stored separately for display and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SystemStatus,
    Weather,
    TelegramMessage,
    AiPrompt,
    Webhook,
    Command,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SystemStatus => "system_status",
            TaskKind::Weather => "weather",
            TaskKind::TelegramMessage => "telegram_message",
            TaskKind::AiPrompt => "ai_prompt",
            TaskKind::Webhook => "webhook",
            TaskKind::Command => "command",
        }
    }
}

/// When a scheduled task fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Once per calendar day at a wall-clock time in the given zone.
    Daily {
        /// "HH:MM", 24-hour.
        time: String,
        /// IANA zone name; the configured default applies if absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Every N minutes, N >= 1.
    Interval { minutes: i64 },
    /// Raw cron expression, passed through after validation.
    Cron { expression: String },
}

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskAction {
    /// Aggregate dashboard counts into a status report and deliver it.
    SystemStatus {},
    /// Send a message, enriched if it reads like a prompt.
    TelegramMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Fetch and deliver current conditions for a location.
    Weather {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    /// Generate a model response to a prompt and deliver it.
    AiPrompt {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// POST a JSON payload to a URL.
    Webhook {
        url: String,
        #[serde(default)]
        payload: Value,
    },
    /// Never executed; recorded only.
    Command { command: String },
}

impl TaskAction {
    /// The task kind this action belongs to.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskAction::SystemStatus {} => TaskKind::SystemStatus,
            TaskAction::TelegramMessage { .. } => TaskKind::TelegramMessage,
            TaskAction::Weather { .. } => TaskKind::Weather,
            TaskAction::AiPrompt { .. } => TaskKind::AiPrompt,
            TaskAction::Webhook { .. } => TaskKind::Webhook,
            TaskAction::Command { .. } => TaskKind::Command,
        }
    }
}

/// A user-defined periodic job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task ID, assigned at creation.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display/filter category; matches `action`.
    pub kind: TaskKind,
    pub schedule: Schedule,
    pub action: TaskAction,
    /// Model ID for AI-driven actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Credential reference for AI-driven actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
    pub enabled: bool,
    /// Incremented exactly once per fire, scheduled or manual.
    pub run_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schedule: Schedule,
    pub action: TaskAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial update for a scheduled task. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledTaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<TaskAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ScheduledTaskPatch {
    /// Whether applying this patch requires re-arming the task's timer.
    pub fn touches_scheduling(&self) -> bool {
        self.schedule.is_some() || self.enabled.is_some()
    }
}

// ──────────────────── Execution Logs ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failure,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failure => "failure",
        }
    }
}

/// Append-only record of one firing. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: i64,
    pub task_id: String,
    pub status: LogStatus,
    /// Free-form structured payload: message sent, AI response, error detail.
    pub output: Value,
    pub executed_at: DateTime<Utc>,
}

// ──────────────────── Dashboard Records ────────────────────

/// An assistant agent tracked by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    /// "active" | "idle" | "error" | "offline"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// A work item executed by an agent. Distinct from `ScheduledTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    /// "pending" | "in_progress" | "completed" | "failed" | "cancelled"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A system event / alert row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: i64,
    pub kind: String,
    /// "debug" | "info" | "warning" | "error" | "critical"
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

// ──────────────────── Aggregates ────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCounts {
    pub total: i64,
    pub active: i64,
    pub idle: i64,
    pub error: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total_tokens: i64,
    pub total_requests: i64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub today: UsageTotals,
    pub month: UsageTotals,
}

/// The dashboard-level aggregate the stats endpoint and the status
/// report action both consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStats {
    pub tasks: TaskCounts,
    pub agents: AgentCounts,
    pub usage: UsageSnapshot,
}
