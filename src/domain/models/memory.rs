//! Memory domain model.
//!
//! Agents persist learnings after each task and recall relevant entries
//! as context for the next execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What kind of knowledge a memory entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Post-task learning written by an agent
    AgentLearning,
    /// Observation recorded during execution
    Observation,
    /// A decision and its rationale
    Decision,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentLearning => "agent_learning",
            Self::Observation => "observation",
            Self::Decision => "decision",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent_learning" => Some(Self::AgentLearning),
            "observation" => Some(Self::Observation),
            "decision" => Some(Self::Decision),
            _ => None,
        }
    }
}

/// One stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub kind: MemoryKind,
    /// The remembered text
    pub content: String,
    /// Relevance weight in [0, 1]
    pub importance: f64,
    /// Agent that wrote the entry
    pub agent_id: Option<Uuid>,
    /// Task the entry is about
    pub task_id: Option<Uuid>,
    pub tags: Vec<String>,
    /// Structured context (agent name, shutdown timestamps, ...)
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            importance: 0.5,
            agent_id: None,
            task_id: None,
            tags: Vec::new(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
