//! Removal task repository
//!
//! Tasks are stored as one row each, with spec and status kept as JSON documents.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::models::{RemovalTask, TaskSpec, TaskStatus};

/// Repository for removal task operations
#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new task; fails on a duplicate name
    pub async fn create(&self, name: &str, spec: &TaskSpec) -> Result<RemovalTask> {
        let now = Utc::now();
        let spec_json = serde_json::to_string(spec).context("Failed to serialize task spec")?;

        sqlx::query(
            r#"
            INSERT INTO removal_tasks (name, spec, status, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?4)
            "#,
        )
        .bind(name)
        .bind(&spec_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create task '{}'", name))?;

        Ok(RemovalTask {
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            spec: spec.clone(),
            status: None,
        })
    }

    /// Check if a task with the given name exists
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM removal_tasks WHERE name = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check task existence")?;

        Ok(count > 0)
    }

    pub async fn get(&self, name: &str) -> Result<Option<RemovalTask>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM removal_tasks WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;

        row.map(RemovalTask::try_from).transpose()
    }

    /// All tasks, oldest first
    pub async fn list(&self) -> Result<Vec<RemovalTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM removal_tasks
            ORDER BY created_at ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch tasks")?;

        rows.into_iter().map(RemovalTask::try_from).collect()
    }

    /// Replace the spec; returns false when the task is missing
    pub async fn update_spec(&self, name: &str, spec: &TaskSpec) -> Result<bool> {
        let spec_json = serde_json::to_string(spec).context("Failed to serialize task spec")?;

        let result = sqlx::query(
            r#"
            UPDATE removal_tasks SET spec = ?2, updated_at = ?3
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .bind(&spec_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update spec of task '{}'", name))?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the status; returns false when the task is missing
    pub async fn update_status(&self, name: &str, status: &TaskStatus) -> Result<bool> {
        let status_json =
            serde_json::to_string(status).context("Failed to serialize task status")?;

        let result = sqlx::query(
            r#"
            UPDATE removal_tasks SET status = ?2, updated_at = ?3
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .bind(&status_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update status of task '{}'", name))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM removal_tasks WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete task '{}'", name))?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, FromRow)]
struct TaskRow {
    name: String,
    spec: String,
    status: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl TryFrom<TaskRow> for RemovalTask {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let spec = serde_json::from_str(&row.spec)
            .with_context(|| format!("Corrupted spec of task '{}'", row.name))?;
        let status = row
            .status
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| format!("Corrupted status of task '{}'", row.name))?;

        Ok(Self {
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            name: row.name,
            spec,
            status,
        })
    }
}
