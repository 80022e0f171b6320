//! Dashboard records: agents, work items, usage rows, system events,
//! and the aggregate queries the stats endpoint and status reports use.

use chrono::{Timelike, Utc};
use rusqlite::{Connection, Row};
use serde_json::Value;

use clawdeck_types::{
    AgentCounts, AgentRecord, DashboardStats, SystemEvent, TaskCounts, UsageSnapshot, UsageTotals,
    WorkItem,
};

use crate::{DashboardStore, Result};

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        model: row.get(3)?,
        last_seen_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| s.parse().ok()),
    })
}

fn work_item_from_row(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    Ok(WorkItem {
        id: row.get(0)?,
        title: row.get(1)?,
        status: row.get(2)?,
        agent_id: row.get(3)?,
        created_at: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        completed_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| s.parse().ok()),
    })
}

fn usage_totals(conn: &Connection, where_clause: &str, param: &str) -> rusqlite::Result<UsageTotals> {
    conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(tokens_input + tokens_output), 0),
                    COALESCE(SUM(requests_count), 0),
                    COALESCE(SUM(cost_estimate), 0)
             FROM usage_stats WHERE {where_clause}"
        ),
        rusqlite::params![param],
        |row| {
            Ok(UsageTotals {
                total_tokens: row.get(0)?,
                total_requests: row.get(1)?,
                total_cost: row.get(2)?,
            })
        },
    )
}

impl DashboardStore {
    // ─── Agents ───────────────────────────────────

    /// Insert or update an agent record.
    pub async fn upsert_agent(&self, agent: AgentRecord) -> Result<()> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO agents (id, name, status, model, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    status = excluded.status,
                    model = excluded.model,
                    last_seen_at = excluded.last_seen_at",
                rusqlite::params![
                    agent.id,
                    agent.name,
                    agent.status,
                    agent.model,
                    agent.last_seen_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// List all agents.
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, name, status, model, last_seen_at FROM agents ORDER BY name",
            )?;
            let agents = stmt
                .query_map([], agent_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(agents)
        })
        .await?
    }

    // ─── Work Items ───────────────────────────────────

    /// Insert a work item (used by seeding and external sync).
    pub async fn insert_work_item(&self, item: WorkItem) -> Result<()> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO work_items (id, title, status, agent_id, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    item.id,
                    item.title,
                    item.status,
                    item.agent_id,
                    item.created_at.to_rfc3339(),
                    item.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// List the most recent work items.
    pub async fn list_work_items(&self, limit: usize) -> Result<Vec<WorkItem>> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, title, status, agent_id, created_at, completed_at
                 FROM work_items ORDER BY created_at DESC LIMIT ?1",
            )?;
            let items = stmt
                .query_map(rusqlite::params![limit as i64], work_item_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await?
    }

    // ─── Usage ───────────────────────────────────

    /// Record one slice of model usage, accumulating into the
    /// (date, hour, model) bucket.
    pub async fn record_usage(
        &self,
        model: &str,
        tokens_input: i64,
        tokens_output: i64,
        requests: i64,
        cost: f64,
    ) -> Result<()> {
        let conn = self.conn();
        let model = model.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO usage_stats (date, hour, model, tokens_input, tokens_output, requests_count, cost_estimate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(date, hour, model) DO UPDATE SET
                    tokens_input = tokens_input + excluded.tokens_input,
                    tokens_output = tokens_output + excluded.tokens_output,
                    requests_count = requests_count + excluded.requests_count,
                    cost_estimate = cost_estimate + excluded.cost_estimate",
                rusqlite::params![
                    now.format("%Y-%m-%d").to_string(),
                    now.hour() as i64,
                    model,
                    tokens_input,
                    tokens_output,
                    requests,
                    cost,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    // ─── Events ───────────────────────────────────

    /// Append a system event.
    pub async fn insert_event(
        &self,
        kind: &str,
        severity: &str,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<i64> {
        let conn = self.conn();
        let kind = kind.to_string();
        let severity = severity.to_string();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO system_events (kind, severity, message, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    kind,
                    severity,
                    message,
                    metadata.map(|m| m.to_string()),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await?
    }

    /// List the most recent system events.
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<SystemEvent>> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, kind, severity, message, metadata, acknowledged, created_at
                 FROM system_events ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let events = stmt
                .query_map(rusqlite::params![limit as i64], |row| {
                    let metadata: Option<String> = row.get(4)?;
                    Ok(SystemEvent {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        severity: row.get(2)?,
                        message: row.get(3)?,
                        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                        acknowledged: row.get::<_, i64>(5)? != 0,
                        created_at: row
                            .get::<_, String>(6)?
                            .parse()
                            .unwrap_or_else(|_| Utc::now()),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await?
    }

    /// Mark an event as acknowledged.
    pub async fn acknowledge_event(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn.execute(
                "UPDATE system_events SET acknowledged = 1 WHERE id = ?1",
                rusqlite::params![id],
            )?;
            Ok(count > 0)
        })
        .await?
    }

    // ─── Aggregates ───────────────────────────────────

    /// The dashboard-level aggregate: task counts by status, agent
    /// counts by status, and today's/this month's usage totals.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let mut tasks = TaskCounts::default();
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM work_items GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                tasks.total += count;
                match status.as_str() {
                    "pending" => tasks.pending = count,
                    "in_progress" => tasks.in_progress = count,
                    "completed" => tasks.completed = count,
                    "failed" => tasks.failed = count,
                    _ => {}
                }
            }

            let mut agents = AgentCounts::default();
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM agents GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                agents.total += count;
                match status.as_str() {
                    "active" => agents.active = count,
                    "idle" => agents.idle = count,
                    "error" => agents.error = count,
                    _ => {}
                }
            }

            let today = Utc::now().format("%Y-%m-%d").to_string();
            let month_start = Utc::now().format("%Y-%m-01").to_string();
            let usage = UsageSnapshot {
                today: usage_totals(&conn, "date = ?1", &today)?,
                month: usage_totals(&conn, "date >= ?1", &month_start)?,
            };

            Ok(DashboardStats {
                tasks,
                agents,
                usage,
            })
        })
        .await?
    }

    // ─── Retention ───────────────────────────────────

    /// Trim old rows: finished work items, stale usage buckets, and
    /// acknowledged events past their windows. Returns deleted counts.
    pub async fn purge_old_data(
        &self,
        work_item_days: u32,
        usage_days: u32,
        event_days: u32,
    ) -> Result<(usize, usize, usize)> {
        let conn = self.conn();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let work_items = conn.execute(
                &format!(
                    "DELETE FROM work_items
                     WHERE status IN ('completed', 'failed', 'cancelled')
                     AND completed_at < datetime('now', '-{work_item_days} days')"
                ),
                [],
            )?;
            let usage = conn.execute(
                &format!("DELETE FROM usage_stats WHERE date < date('now', '-{usage_days} days')"),
                [],
            )?;
            let events = conn.execute(
                &format!(
                    "DELETE FROM system_events
                     WHERE created_at < datetime('now', '-{event_days} days')
                     AND acknowledged = 1"
                ),
                [],
            )?;
            Ok((work_items, usage, events))
        })
        .await?
    }
}
