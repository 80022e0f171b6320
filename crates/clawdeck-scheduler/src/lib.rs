//! clawdeck-scheduler: the scheduled-task execution subsystem.
//!
//! Three pieces:
//! - [`schedule`] turns a declarative schedule into a validated trigger
//!   rule and computes next-fire estimates.
//! - [`executor`] performs the side effect a task describes and records
//!   what happened.
//! - [`scheduler`] owns one timer per enabled task, re-arms on every
//!   create/update, and keeps run bookkeeping consistent.

pub mod executor;
pub mod schedule;
pub mod scheduler;

pub use executor::{
    ActionExecutor, Delivery, ExecutionOutcome, ExecutorConfig, Messenger, ModelProvider,
    Notifier, WeatherProvider, WeatherReport,
};
pub use schedule::{TriggerRule, next_fire, trigger_rule};
pub use scheduler::TaskScheduler;

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Schedule shape or expression failed validation; the task may
    /// exist in storage but stays unscheduled.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// Operation on an unknown task id.
    #[error("scheduled task not found: {0}")]
    TaskNotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] clawdeck_storage::StorageError),
    /// A fire handler step failed (delivery, collaborator call).
    #[error("execution failed: {0}")]
    Execution(String),
}
