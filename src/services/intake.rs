//! Task-file intake watcher.
//!
//! Polls a directory for `*.md` files whose YAML frontmatter describes a
//! task. Ingested files are renamed with the task id as prefix and moved
//! into a sibling `processed/` directory. Invalid files are skipped with
//! a warning (once) and left in place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{topics, Message, Task, TaskFilter, TaskPriority};
use crate::domain::ports::mail_bus::MailBus;
use crate::domain::ports::task_store::TaskStore;

/// YAML frontmatter of a task file.
#[derive(Debug, Deserialize)]
struct Frontmatter {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    skills: Option<Vec<String>>,
    #[serde(default)]
    estimate: Option<u32>,
    #[serde(default)]
    dependencies: Option<Vec<String>>,
}

/// A task file parsed but not yet resolved against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTaskFile {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub skills: Vec<String>,
    pub estimated_minutes: Option<u32>,
    /// Task ids or titles, resolved at ingestion time
    pub dependencies: Vec<String>,
}

/// Parse one task file: `---` delimited YAML frontmatter, body as the
/// description fallback.
pub fn parse_task_file(content: &str) -> Result<ParsedTaskFile, String> {
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| "missing frontmatter delimiter".to_string())?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| "unterminated frontmatter block".to_string())?;
    let frontmatter_raw = &rest[..end];
    let body = rest[end + 4..].trim();

    let frontmatter: Frontmatter = serde_yaml::from_str(frontmatter_raw)
        .map_err(|e| format!("bad frontmatter: {e}"))?;
    if frontmatter.title.trim().is_empty() {
        return Err("title is required".to_string());
    }

    let priority = match frontmatter.priority.as_deref() {
        Some(p) => TaskPriority::parse_str(p).ok_or_else(|| format!("unknown priority: {p}"))?,
        None => TaskPriority::default(),
    };
    let description = frontmatter
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| body.to_string());

    Ok(ParsedTaskFile {
        title: frontmatter.title.trim().to_string(),
        description,
        priority,
        skills: frontmatter.skills.unwrap_or_default(),
        estimated_minutes: frontmatter.estimate,
        dependencies: frontmatter.dependencies.unwrap_or_default(),
    })
}

/// Directory watcher that turns task files into queue entries.
pub struct TaskIntake {
    directory: PathBuf,
    processed: PathBuf,
    tasks: Arc<dyn TaskStore>,
    bus: Arc<dyn MailBus>,
    default_max_retries: u32,
    poll_interval: Duration,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
    rejected: Mutex<HashSet<PathBuf>>,
}

impl TaskIntake {
    pub fn new(
        directory: impl Into<PathBuf>,
        tasks: Arc<dyn TaskStore>,
        bus: Arc<dyn MailBus>,
        default_max_retries: u32,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let directory = directory.into();
        let processed = directory.join("processed");
        Arc::new(Self {
            directory,
            processed,
            tasks,
            bus,
            default_max_retries,
            poll_interval,
            cancel: CancellationToken::new(),
            ticker: Mutex::new(None),
            rejected: Mutex::new(HashSet::new()),
        })
    }

    /// Start watching. The intake directory must already exist; a missing
    /// directory is a startup error.
    pub async fn start(self: &Arc<Self>) -> DomainResult<()> {
        if !self.directory.is_dir() {
            return Err(DomainError::ValidationFailed(format!(
                "intake directory {} does not exist",
                self.directory.display()
            )));
        }
        tokio::fs::create_dir_all(&self.processed)
            .await
            .map_err(|e| DomainError::Storage(format!("create processed directory: {e}")))?;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.scan().await,
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
        info!(directory = %self.directory.display(), "task intake watching");
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// One pass over the directory. Public so tests can drive it directly.
    pub async fn scan(&self) {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "intake directory scan failed");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if self.rejected.lock().await.contains(&path) {
                continue;
            }
            if let Err(reason) = self.ingest_file(&path).await {
                warn!(file = %path.display(), reason, "skipping invalid task file");
                self.rejected.lock().await.insert(path);
            }
        }
    }

    async fn ingest_file(&self, path: &Path) -> Result<(), String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        let parsed = parse_task_file(&content)?;

        let dependencies = self
            .resolve_dependencies(&parsed.dependencies)
            .await
            .map_err(|e| format!("dependency resolution failed: {e}"))?;

        let mut task = Task::new(parsed.title, parsed.description)
            .with_priority(parsed.priority)
            .with_max_retries(self.default_max_retries);
        for skill in parsed.skills {
            task.required_skills.insert(skill);
        }
        task.estimated_minutes = parsed.estimated_minutes;
        task.dependencies = dependencies;

        let task = self
            .tasks
            .create(task)
            .await
            .map_err(|e| format!("store insert failed: {e}"))?;

        if let Err(e) = self
            .bus
            .publish(
                Message::new(topics::TASK_CREATED, "task-intake").with_payload(json!({
                    "task_id": task.id.to_string(),
                    "task_title": task.title,
                    "source": path.display().to_string(),
                })),
            )
            .await
        {
            warn!(error = %e, "task.created publish failed");
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("task.md");
        let target = self.processed.join(format!("{}-{file_name}", task.id));
        tokio::fs::rename(path, &target)
            .await
            .map_err(|e| format!("move to processed failed: {e}"))?;

        info!(task_id = %task.id, file = %target.display(), "task ingested");
        Ok(())
    }

    /// Dependencies may be task ids or titles of already-known tasks.
    async fn resolve_dependencies(&self, refs: &[String]) -> DomainResult<Vec<Uuid>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let known = self.tasks.list(TaskFilter::default()).await?;
        let mut resolved = Vec::new();
        for reference in refs {
            if let Ok(id) = Uuid::parse_str(reference) {
                resolved.push(id);
                continue;
            }
            match known.iter().find(|t| t.title == *reference) {
                Some(task) => resolved.push(task.id),
                None => {
                    return Err(DomainError::ValidationFailed(format!(
                        "unknown dependency reference: {reference}"
                    )))
                }
            }
        }
        Ok(resolved)
    }
}
