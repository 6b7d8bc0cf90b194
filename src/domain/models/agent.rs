//! Agent domain model.
//!
//! Agents are autonomous workers that claim and execute tasks matching
//! their skills. Skills can be acquired on demand from a configured
//! registry of acquirable skills.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Task;

/// Status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Waiting for work
    Idle,
    /// Executing a task
    Busy,
    /// Stopped (graceful shutdown finished)
    Offline,
    /// Unrecoverable internal error
    Error,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Running totals for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_completion_ms: u64,
    pub start_time: DateTime<Utc>,
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            tasks_completed: 0,
            tasks_failed: 0,
            total_completion_ms: 0,
            start_time: Utc::now(),
        }
    }

    pub fn record_completion(&mut self, duration_ms: u64) {
        self.tasks_completed += 1;
        self.total_completion_ms += duration_ms;
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    /// Mean completion time, zero before the first completion.
    pub fn average_completion_ms(&self) -> u64 {
        if self.tasks_completed == 0 {
            0
        } else {
            self.total_completion_ms / self.tasks_completed
        }
    }
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

/// How well an agent's skills cover a task's requirements.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillMatch {
    /// Coverage in [0, 1]; 1 means every required skill is already held.
    pub score: f64,
    /// Required skills the agent holds.
    pub matched: Vec<String>,
    /// Required skills the agent lacks.
    pub missing: Vec<String>,
    /// Missing skills the registry marks acquirable.
    pub acquirable: Vec<String>,
}

impl SkillMatch {
    /// Whether every missing skill can be acquired.
    pub fn can_acquire(&self) -> bool {
        !self.missing.is_empty() && self.acquirable.len() == self.missing.len()
    }

    /// Whether the agent is a viable candidate for the task.
    pub fn is_candidate(&self) -> bool {
        self.score > 0.0 || self.can_acquire()
    }
}

/// State of one worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// Current status
    pub status: AgentStatus,
    /// Skills this agent holds
    pub skills: BTreeSet<String>,
    /// Subset of skills learned at claim time rather than configured
    pub acquired_skills: BTreeSet<String>,
    /// Task the agent currently holds
    pub current_task: Option<Uuid>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// Last time the agent did anything observable
    pub last_active: DateTime<Utc>,
    /// Running totals
    pub stats: AgentStats,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, skills: impl IntoIterator<Item = String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: AgentStatus::Idle,
            skills: skills.into_iter().collect(),
            acquired_skills: BTreeSet::new(),
            current_task: None,
            created_at: now,
            last_active: now,
            stats: AgentStats::new(),
        }
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.contains(skill)
    }

    /// Learn a skill at claim time. Recorded in both sets so the next
    /// `agent.status` broadcast makes the acquisition visible.
    pub fn learn_skill(&mut self, skill: impl Into<String>) {
        let skill = skill.into();
        self.acquired_skills.insert(skill.clone());
        self.skills.insert(skill);
    }

    /// Mark recent activity.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Score this agent's skills against a task.
    ///
    /// Coverage of the required set; a task with no required skills matches
    /// everyone at 1.0. Partial matches only count when at least one skill
    /// overlaps. Missing skills present in `acquirable_registry` are
    /// reported so the caller may decide to learn them.
    pub fn evaluate_skills(
        &self,
        task: &Task,
        acquirable_registry: &BTreeSet<String>,
    ) -> SkillMatch {
        if task.required_skills.is_empty() {
            return SkillMatch {
                score: 1.0,
                matched: Vec::new(),
                missing: Vec::new(),
                acquirable: Vec::new(),
            };
        }

        let mut matched = Vec::new();
        let mut missing = Vec::new();
        let mut acquirable = Vec::new();
        for skill in &task.required_skills {
            if self.skills.contains(skill) {
                matched.push(skill.clone());
            } else {
                missing.push(skill.clone());
                if acquirable_registry.contains(skill) {
                    acquirable.push(skill.clone());
                }
            }
        }

        let score = if matched.is_empty() {
            0.0
        } else {
            matched.len() as f64 / task.required_skills.len() as f64
        };

        SkillMatch {
            score,
            matched,
            missing,
            acquirable,
        }
    }
}
