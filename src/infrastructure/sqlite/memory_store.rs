//! SQLite-backed memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MemoryEntry, MemoryKind};
use crate::domain::ports::memory_store::MemoryStore;

/// How many recent rows the search scans before scoring in process.
const SEARCH_WINDOW: i64 = 500;

/// sqlx/SQLite [`MemoryStore`].
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> DomainResult<MemoryEntry> {
        sqlx::query(
            r#"INSERT INTO memories (id, kind, content, importance, agent_id, task_id, tags, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.kind.as_str())
        .bind(&entry.content)
        .bind(entry.importance)
        .bind(entry.agent_id.map(|a| a.to_string()))
        .bind(entry.task_id.map(|t| t.to_string()))
        .bind(serde_json::to_string(&entry.tags)?)
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<MemoryEntry>> {
        let row: Option<MemoryRow> = sqlx::query_as("SELECT * FROM memories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(MemoryRow::into_entry).transpose()
    }

    async fn search(&self, query: &str, limit: usize) -> DomainResult<Vec<MemoryEntry>> {
        let tokens = Self::tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<MemoryRow> =
            sqlx::query_as("SELECT * FROM memories ORDER BY created_at DESC LIMIT ?")
                .bind(SEARCH_WINDOW)
                .fetch_all(&self.pool)
                .await?;

        let mut scored: Vec<(f64, MemoryEntry)> = Vec::new();
        for row in rows {
            let entry = row.into_entry()?;
            let haystack = format!("{} {}", entry.content, entry.tags.join(" ")).to_lowercase();
            let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
            if hits > 0 {
                let score =
                    (hits as f64 / tokens.len() as f64) * (0.5 + entry.importance / 2.0);
                scored.push((score, entry));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    async fn list_by_agent(&self, agent_id: Uuid) -> DomainResult<Vec<MemoryEntry>> {
        let rows: Vec<MemoryRow> =
            sqlx::query_as("SELECT * FROM memories WHERE agent_id = ? ORDER BY created_at DESC")
                .bind(agent_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(MemoryRow::into_entry).collect()
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: String,
    kind: String,
    content: String,
    importance: f64,
    agent_id: Option<String>,
    task_id: Option<String>,
    tags: String,
    metadata: String,
    created_at: String,
}

impl MemoryRow {
    fn into_entry(self) -> DomainResult<MemoryEntry> {
        Ok(MemoryEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| DomainError::Storage(format!("bad memory id: {e}")))?,
            kind: MemoryKind::parse_str(&self.kind)
                .ok_or_else(|| DomainError::Storage(format!("bad memory kind {}", self.kind)))?,
            content: self.content,
            importance: self.importance,
            agent_id: self
                .agent_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| DomainError::Storage(format!("bad agent id: {e}")))?,
            task_id: self
                .task_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|e| DomainError::Storage(format!("bad task id: {e}")))?,
            tags: serde_json::from_str(&self.tags)?,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| DomainError::Storage(format!("bad timestamp: {e}")))?,
        })
    }
}
