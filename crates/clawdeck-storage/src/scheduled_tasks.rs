//! Scheduled task CRUD, run bookkeeping and execution logs.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use clawdeck_types::{
    ExecutionLogEntry, LogStatus, NewScheduledTask, ScheduledTask, ScheduledTaskPatch, TaskKind,
};

use crate::{DashboardStore, Result};

/// Filter for listing scheduled tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub enabled: Option<bool>,
    pub kind: Option<TaskKind>,
}

const TASK_COLUMNS: &str = "id, name, description, kind, schedule, action, model, api_key_ref, \
     enabled, run_count, last_run_at, last_error, last_error_at, created_at, updated_at";

fn json_err(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let kind: String = row.get(3)?;
    let schedule: String = row.get(4)?;
    let action: String = row.get(5)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind: serde_json::from_value(Value::String(kind)).map_err(|e| json_err(3, e))?,
        schedule: serde_json::from_str(&schedule).map_err(|e| json_err(4, e))?,
        action: serde_json::from_str(&action).map_err(|e| json_err(5, e))?,
        model: row.get(6)?,
        api_key_ref: row.get(7)?,
        enabled: row.get::<_, i64>(8)? != 0,
        run_count: row.get(9)?,
        last_run_at: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| s.parse().ok()),
        last_error: row.get(11)?,
        last_error_at: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| s.parse().ok()),
        created_at: row
            .get::<_, String>(13)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        updated_at: row
            .get::<_, String>(14)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn select_task(conn: &Connection, id: &str) -> rusqlite::Result<Option<ScheduledTask>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
        rusqlite::params![id],
        task_from_row,
    )
    .optional()
}

impl DashboardStore {
    /// List scheduled tasks, newest first.
    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut query = format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE 1=1");
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(enabled) = filter.enabled {
                query.push_str(" AND enabled = ?");
                params.push(Box::new(enabled as i64));
            }
            if let Some(kind) = filter.kind {
                query.push_str(" AND kind = ?");
                params.push(Box::new(kind.as_str().to_string()));
            }
            query.push_str(" ORDER BY created_at DESC");

            let mut stmt = conn.prepare(&query)?;
            let tasks = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), task_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await?
    }

    /// Get a scheduled task by ID.
    pub async fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.conn();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Ok(select_task(&conn, &id)?)
        })
        .await?
    }

    /// Persist a new scheduled task and return the stored record.
    pub async fn create_task(&self, data: NewScheduledTask) -> Result<ScheduledTask> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            let kind = data.action.kind();
            conn.execute(
                "INSERT INTO scheduled_tasks
                    (id, name, description, kind, schedule, action, model, api_key_ref,
                     enabled, run_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10)",
                rusqlite::params![
                    id,
                    data.name,
                    data.description,
                    kind.as_str(),
                    serde_json::to_string(&data.schedule)?,
                    serde_json::to_string(&data.action)?,
                    data.model,
                    data.api_key_ref,
                    data.enabled as i64,
                    now,
                ],
            )?;
            let task = select_task(&conn, &id)?;
            task.ok_or(crate::StorageError::Sqlite(
                rusqlite::Error::QueryReturnedNoRows,
            ))
        })
        .await?
    }

    /// Apply a partial update and return the refreshed record.
    /// Returns None if the task does not exist. Run bookkeeping fields
    /// are never touched here.
    pub async fn update_task(
        &self,
        id: &str,
        patch: ScheduledTaskPatch,
    ) -> Result<Option<ScheduledTask>> {
        let conn = self.conn();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let Some(current) = select_task(&conn, &id)? else {
                return Ok(None);
            };

            let name = patch.name.unwrap_or(current.name);
            let description = patch.description.or(current.description);
            let schedule = patch.schedule.unwrap_or(current.schedule);
            let action = patch.action.unwrap_or(current.action);
            let kind = action.kind();
            let model = patch.model.or(current.model);
            let api_key_ref = patch.api_key_ref.or(current.api_key_ref);
            let enabled = patch.enabled.unwrap_or(current.enabled);

            conn.execute(
                "UPDATE scheduled_tasks SET
                    name = ?1, description = ?2, kind = ?3, schedule = ?4, action = ?5,
                    model = ?6, api_key_ref = ?7, enabled = ?8, updated_at = ?9
                 WHERE id = ?10",
                rusqlite::params![
                    name,
                    description,
                    kind.as_str(),
                    serde_json::to_string(&schedule)?,
                    serde_json::to_string(&action)?,
                    model,
                    api_key_ref,
                    enabled as i64,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )?;
            Ok(select_task(&conn, &id)?)
        })
        .await?
    }

    /// Delete a task and its execution logs (logs first, to respect the
    /// log rows' reference to the task). Returns false if absent.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM scheduled_task_logs WHERE task_id = ?1",
                rusqlite::params![id],
            )?;
            let count = tx.execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1",
                rusqlite::params![id],
            )?;
            tx.commit()?;
            Ok(count > 0)
        })
        .await?
    }

    /// Record one fire: bump run_count and stamp last_run_at in a single
    /// statement, so concurrent manual and scheduled fires never lose an
    /// increment. Returns the refreshed record.
    pub async fn record_run(&self, id: &str, at: DateTime<Utc>) -> Result<Option<ScheduledTask>> {
        let conn = self.conn();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE scheduled_tasks
                 SET run_count = run_count + 1, last_run_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![at.to_rfc3339(), id],
            )?;
            Ok(select_task(&conn, &id)?)
        })
        .await?
    }

    /// Overwrite the most-recent-error bookkeeping.
    pub async fn record_error(&self, id: &str, message: &str) -> Result<()> {
        let conn = self.conn();
        let id = id.to_string();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE scheduled_tasks
                 SET last_error = ?1, last_error_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![message, now, id],
            )?;
            Ok(())
        })
        .await?
    }

    /// Append one execution log entry. Entries are never mutated.
    pub async fn append_execution_log(
        &self,
        task_id: &str,
        status: LogStatus,
        output: Value,
    ) -> Result<()> {
        let conn = self.conn();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO scheduled_task_logs (task_id, status, output, executed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    task_id,
                    status.as_str(),
                    output.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Fetch the most recent execution logs for a task.
    pub async fn execution_logs(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionLogEntry>> {
        let conn = self.conn();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, task_id, status, output, executed_at
                 FROM scheduled_task_logs
                 WHERE task_id = ?1
                 ORDER BY executed_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let entries = stmt
                .query_map(rusqlite::params![task_id, limit as i64], |row| {
                    let status: String = row.get(2)?;
                    let output: String = row.get(3)?;
                    Ok(ExecutionLogEntry {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        status: serde_json::from_value(Value::String(status))
                            .map_err(|e| json_err(2, e))?,
                        output: serde_json::from_str(&output).map_err(|e| json_err(3, e))?,
                        executed_at: row
                            .get::<_, String>(4)?
                            .parse()
                            .unwrap_or_else(|_| Utc::now()),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await?
    }
}
