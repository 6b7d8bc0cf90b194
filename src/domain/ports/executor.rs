//! Executor port: runs one external worker process per task.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{MemoryEntry, Task};

/// Everything one execution needs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task: Task,
    /// Relevant memories recalled for prompt context
    pub memories: Vec<MemoryEntry>,
    pub work_dir: PathBuf,
    pub agent_id: Uuid,
    pub agent_name: String,
    pub agent_skills: Vec<String>,
}

/// Outcome of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timed_out: bool,
}

/// Which stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One streamed line of worker output.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub task_id: Uuid,
    pub chunk: String,
    pub stream: OutputStream,
    pub timestamp: DateTime<Utc>,
}

/// Runs external work. One execution in flight per instance; callers must
/// serialize. `abort` triggers the staged termination path of a live child.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, context: ExecutionContext) -> DomainResult<ExecutionResult>;

    /// Whether a child process is currently live.
    fn is_executing(&self) -> bool;

    /// Ask a live execution to stop. Returns immediately; `execute` resolves
    /// once termination finishes.
    fn abort(&self);

    /// Stream of worker output lines.
    fn subscribe_output(&self) -> broadcast::Receiver<ExecutionOutput>;
}
