//! SQLite-backed task store.
//!
//! The atomic claim is an `UPDATE ... WHERE status='ready' AND
//! assigned_agent IS NULL` with an affected-row check. Other writes go
//! through read-modify-write guarded by `updated_at`, which serializes
//! concurrent updates to one task id.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FailureKind, Task, TaskFilter, TaskPatch, TaskPriority, TaskStatus,
};
use crate::domain::ports::task_store::{TaskStats, TaskStore};

/// sqlx/SQLite [`TaskStore`].
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut task = row.into_task()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn load_dependencies(&self, task: &mut Task) -> DomainResult<()> {
        let deps: Vec<(String,)> =
            sqlx::query_as("SELECT depends_on_id FROM task_dependencies WHERE task_id = ?")
                .bind(task.id.to_string())
                .fetch_all(&self.pool)
                .await?;
        task.dependencies = deps
            .into_iter()
            .filter_map(|(id,)| Uuid::parse_str(&id).ok())
            .collect();
        Ok(())
    }

    /// Write every mutable column, guarded on the previously observed
    /// `updated_at` so a concurrent writer loses cleanly.
    async fn save(&self, task: &Task, observed_updated_at: &str) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE tasks SET
                   title = ?, description = ?, status = ?, priority = ?,
                   required_skills = ?, assigned_agent = ?, updated_at = ?,
                   estimated_minutes = ?, actual_minutes = ?, retry_count = ?,
                   max_retries = ?, last_error = ?, last_attempt_at = ?,
                   completed_at = ?, failure_type = ?, tags = ?
               WHERE id = ? AND updated_at = ?"#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(serde_json::to_string(&task.required_skills)?)
        .bind(task.assigned_agent.map(|a| a.to_string()))
        .bind(task.updated_at.to_rfc3339())
        .bind(task.estimated_minutes.map(i64::from))
        .bind(task.actual_minutes.map(i64::from))
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(task.last_error.as_deref())
        .bind(task.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.failure_type.map(|f| f.as_str()))
        .bind(serde_json::to_string(&task.tags)?)
        .bind(task.id.to_string())
        .bind(observed_updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict {
                entity: "task".to_string(),
                id: task.id.to_string(),
            });
        }
        Ok(())
    }

    /// Promote satisfied pending/blocked tasks to ready and park pending
    /// tasks behind a failed dependency as blocked.
    async fn reconcile_readiness(&self) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"UPDATE tasks SET status = 'ready', assigned_agent = NULL, updated_at = ?
               WHERE status IN ('pending', 'blocked') AND NOT EXISTS (
                   SELECT 1 FROM task_dependencies td
                   LEFT JOIN tasks d ON d.id = td.depends_on_id
                   WHERE td.task_id = tasks.id
                     AND (d.id IS NULL OR d.status != 'completed'))"#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"UPDATE tasks SET status = 'blocked', updated_at = ?
               WHERE status = 'pending' AND EXISTS (
                   SELECT 1 FROM task_dependencies td
                   JOIN tasks d ON d.id = td.depends_on_id
                   WHERE td.task_id = tasks.id AND d.status = 'failed')"#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: Task) -> DomainResult<Task> {
        task.validate()?;
        sqlx::query(
            r#"INSERT INTO tasks (
                   id, title, description, status, priority, required_skills,
                   assigned_agent, created_at, updated_at, estimated_minutes,
                   actual_minutes, retry_count, max_retries, last_error,
                   last_attempt_at, completed_at, failure_type, tags
               ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(serde_json::to_string(&task.required_skills)?)
        .bind(task.assigned_agent.map(|a| a.to_string()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.estimated_minutes.map(i64::from))
        .bind(task.actual_minutes.map(i64::from))
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(task.last_error.as_deref())
        .bind(task.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.failure_type.map(|f| f.as_str()))
        .bind(serde_json::to_string(&task.tags)?)
        .execute(&self.pool)
        .await?;

        for dep in &task.dependencies {
            sqlx::query(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)",
            )
            .bind(task.id.to_string())
            .bind(dep.to_string())
            .execute(&self.pool)
            .await?;
        }
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        self.load(id).await
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::new();
        for row in rows {
            let mut task = row.into_task()?;
            self.load_dependencies(&mut task).await?;
            if filter.matches(&task) {
                out.push(task);
            }
        }
        Ok(out)
    }

    async fn get_ready(&self) -> DomainResult<Vec<Task>> {
        self.reconcile_readiness().await?;
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE status = 'ready' ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        let mut ready = Vec::new();
        for row in rows {
            let mut task = row.into_task()?;
            self.load_dependencies(&mut task).await?;
            ready.push(task);
        }
        ready.sort_by(|a: &Task, b: &Task| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(ready)
    }

    async fn claim(&self, id: Uuid, agent_id: Uuid) -> DomainResult<Option<Task>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE tasks
               SET status = 'claimed', assigned_agent = ?, updated_at = ?
               WHERE id = ? AND status = 'ready' AND assigned_agent IS NULL"#,
        )
        .bind(agent_id.to_string())
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load(id).await
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> DomainResult<Option<Task>> {
        let Some(mut task) = self.load(id).await? else {
            return Ok(None);
        };
        let observed = task.updated_at.to_rfc3339();
        task.apply(patch)?;
        self.save(&task, &observed).await?;
        Ok(Some(task))
    }

    async fn update_owned(
        &self,
        id: Uuid,
        agent_id: Uuid,
        patch: TaskPatch,
    ) -> DomainResult<Option<Task>> {
        let Some(mut task) = self.load(id).await? else {
            return Ok(None);
        };
        if task.assigned_agent != Some(agent_id) {
            return Err(DomainError::NotTaskOwner {
                task_id: id,
                agent_id,
            });
        }
        let observed = task.updated_at.to_rfc3339();
        task.apply(patch)?;
        self.save(&task, &observed).await?;
        Ok(Some(task))
    }

    async fn stats(&self) -> DomainResult<TaskStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut stats = TaskStats::default();
        for (status_str, count) in rows {
            if let Some(status) = TaskStatus::parse_str(&status_str) {
                stats.total += count as u64;
                stats.by_status.insert(status, count as u64);
            }
        }
        Ok(stats)
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: String,
    status: String,
    priority: String,
    required_skills: String,
    assigned_agent: Option<String>,
    created_at: String,
    updated_at: String,
    estimated_minutes: Option<i64>,
    actual_minutes: Option<i64>,
    retry_count: i64,
    max_retries: i64,
    last_error: Option<String>,
    last_attempt_at: Option<String>,
    completed_at: Option<String>,
    failure_type: Option<String>,
    tags: String,
}

impl TaskRow {
    fn into_task(self) -> DomainResult<Task> {
        let parse_time = |s: &str| -> DomainResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| DomainError::Storage(format!("bad timestamp {s}: {e}")))
        };
        let parse_opt_time = |s: &Option<String>| -> DomainResult<Option<DateTime<Utc>>> {
            s.as_deref().map(parse_time).transpose()
        };

        let required_skills: BTreeSet<String> = serde_json::from_str(&self.required_skills)?;
        let tags: Vec<String> = serde_json::from_str(&self.tags)?;

        Ok(Task {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| DomainError::Storage(format!("bad task id: {e}")))?,
            title: self.title,
            description: self.description,
            status: TaskStatus::parse_str(&self.status)
                .ok_or_else(|| DomainError::Storage(format!("bad status {}", self.status)))?,
            priority: TaskPriority::parse_str(&self.priority)
                .ok_or_else(|| DomainError::Storage(format!("bad priority {}", self.priority)))?,
            required_skills,
            dependencies: Vec::new(),
            assigned_agent: self
                .assigned_agent
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| DomainError::Storage(format!("bad agent id: {e}")))?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            estimated_minutes: self.estimated_minutes.map(|v| v as u32),
            actual_minutes: self.actual_minutes.map(|v| v as u32),
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            last_error: self.last_error,
            last_attempt_at: parse_opt_time(&self.last_attempt_at)?,
            completed_at: parse_opt_time(&self.completed_at)?,
            failure_type: self.failure_type.as_deref().and_then(FailureKind::parse_str),
            tags,
        })
    }
}
