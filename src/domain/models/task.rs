//! Task domain model.
//!
//! Tasks are discrete units of work that agents claim and execute.
//! Dependencies gate readiness; retries bounce a task back to ready.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but dependencies not met
    Pending,
    /// Task can be picked up (dependencies met)
    Ready,
    /// Dependencies are unsatisfied and the store has parked the task
    Blocked,
    /// An agent won the atomic claim but has not started execution
    Claimed,
    /// The owning agent is executing the task
    InProgress,
    /// Task completed successfully
    Completed,
    /// Task failed permanently
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "blocked" => Some(Self::Blocked),
            "claimed" => Some(Self::Claimed),
            "in_progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a task in this status counts as unfinished queue depth.
    pub fn is_unfinished(&self) -> bool {
        !self.is_terminal()
    }

    /// Valid transitions from this status.
    ///
    /// The store moves tasks between pending/ready/blocked; the atomic claim
    /// is the only path into claimed; the owning agent advances claimed and
    /// in_progress; failed may be re-armed to ready for a retry.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Ready, Self::Blocked],
            Self::Ready => &[Self::Claimed, Self::Pending, Self::Blocked],
            Self::Blocked => &[Self::Ready, Self::Pending],
            Self::Claimed => &[Self::InProgress, Self::Ready, Self::Failed],
            Self::InProgress => &[Self::Completed, Self::Failed, Self::Ready],
            Self::Completed => &[],
            Self::Failed => &[Self::Ready],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Priority level for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Numeric rank for descending sort (critical first).
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

/// Classification of an execution failure, driving the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Generic execution error
    Error,
    /// The per-task timeout fired
    Timeout,
    /// The worker produced no output / stopped making progress
    Stalled,
    /// A required resource was leased by another agent
    Blocked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Stalled => "stalled",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            "stalled" => Some(Self::Stalled),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Classify a failure from its error message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("stalled") || lower.contains("no output") {
            Self::Stalled
        } else if message.starts_with("FILE_LOCKED") || lower.contains("blocked") {
            Self::Blocked
        } else {
            Self::Error
        }
    }
}

/// A discrete unit of work that can be claimed and executed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Detailed description of the work
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Priority
    pub priority: TaskPriority,
    /// Skills an agent needs to take this task
    pub required_skills: BTreeSet<String>,
    /// Task IDs that must complete before this task is ready
    pub dependencies: Vec<Uuid>,
    /// Agent currently holding the task (claimed/in_progress only)
    pub assigned_agent: Option<Uuid>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// Producer's effort estimate, used for the dynamic execution timeout
    pub estimated_minutes: Option<u32>,
    /// Wall-clock minutes the successful execution actually took
    pub actual_minutes: Option<u32>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Maximum retries before the task fails permanently
    pub max_retries: u32,
    /// Error message from the last failed attempt
    pub last_error: Option<String>,
    /// When the last attempt started
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the task reached completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Classification of the last failure
    pub failure_type: Option<FailureKind>,
    /// Free-form labels
    pub tags: Vec<String>,
}

impl Task {
    /// Create a new task with a title and description.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            required_skills: BTreeSet::new(),
            dependencies: Vec::new(),
            assigned_agent: None,
            created_at: now,
            updated_at: now,
            estimated_minutes: None,
            actual_minutes: None,
            retry_count: 0,
            max_retries: 2,
            last_error: None,
            last_attempt_at: None,
            completed_at: None,
            failure_type: None,
            tags: Vec::new(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Require a skill.
    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.required_skills.insert(skill.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.dependencies.contains(&task_id) && task_id != self.id {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Set the effort estimate in minutes.
    pub fn with_estimate(mut self, minutes: u32) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the initial status of a freshly created task, before persistence.
    pub fn with_initial_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt fits inside the retry budget.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Validate task fields.
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task title cannot be empty".to_string(),
            ));
        }
        if self.dependencies.contains(&self.id) {
            return Err(DomainError::ValidationFailed(
                "task cannot depend on itself".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update, enforcing the status state machine and the
    /// assignment invariants.
    ///
    /// Statuses outside claimed/in_progress carry no assignment (failed keeps
    /// the last holder for diagnostics). A retry count pushed past the budget
    /// forces the task to failed instead of violating the bound.
    pub fn apply(&mut self, patch: TaskPatch) -> DomainResult<()> {
        if let Some(new_status) = patch.status {
            if !self.status.can_transition_to(new_status) {
                return Err(DomainError::InvalidStateTransition {
                    from: self.status.as_str().to_string(),
                    to: new_status.as_str().to_string(),
                });
            }
            self.status = new_status;
            if matches!(
                new_status,
                TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Blocked | TaskStatus::Completed
            ) {
                self.assigned_agent = None;
            }
            if new_status == TaskStatus::Completed {
                self.completed_at = Some(patch.completed_at.unwrap_or_else(Utc::now));
            }
        }
        if let Some(assignment) = patch.assigned_agent {
            self.assigned_agent = assignment;
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
            if self.retry_count > self.max_retries && self.status != TaskStatus::Failed {
                // The bound would be violated; the task fails instead.
                self.status = TaskStatus::Failed;
            }
        }
        if let Some(last_error) = patch.last_error {
            self.last_error = last_error;
        }
        if let Some(at) = patch.last_attempt_at {
            self.last_attempt_at = Some(at);
        }
        if let Some(failure_type) = patch.failure_type {
            self.failure_type = failure_type;
        }
        if let Some(minutes) = patch.actual_minutes {
            self.actual_minutes = Some(minutes);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update of a task's mutable fields.
///
/// `Option<Option<_>>` fields distinguish "leave alone" from "set to null".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub assigned_agent: Option<Option<Uuid>>,
    pub retry_count: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_type: Option<Option<FailureKind>>,
    pub actual_minutes: Option<u32>,
    pub priority: Option<TaskPriority>,
    pub description: Option<String>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn assign(mut self, agent_id: Uuid) -> Self {
        self.assigned_agent = Some(Some(agent_id));
        self
    }

    pub fn clear_assignment(mut self) -> Self {
        self.assigned_agent = Some(None);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn last_attempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_attempt_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn failure_type(mut self, kind: FailureKind) -> Self {
        self.failure_type = Some(Some(kind));
        self
    }

    pub fn actual_minutes(mut self, minutes: u32) -> Self {
        self.actual_minutes = Some(minutes);
        self
    }
}

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_agent: Option<Uuid>,
    pub tag: Option<String>,
}

impl TaskFilter {
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn by_agent(agent_id: Uuid) -> Self {
        Self {
            assigned_agent: Some(agent_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(agent) = self.assigned_agent {
            if task.assigned_agent != Some(agent) {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !task.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("Fix login", "The login form rejects valid users");
        assert_eq!(task.title, "Fix login");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_retries, 2);
        assert!(task.assigned_agent.is_none());
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_valid_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Ready));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Blocked));
        assert!(TaskStatus::Ready.can_transition_to(TaskStatus::Claimed));
        assert!(TaskStatus::Claimed.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Claimed.can_transition_to(TaskStatus::Ready));
        // A claim holder may fail without ever starting (lease contention
        // with an exhausted retry budget).
        assert!(TaskStatus::Claimed.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Ready));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Ready));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::Ready));
    }

    #[test]
    fn test_invalid_status_transitions() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Claimed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Ready.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Ready.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Ready));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Claimed));
    }

    #[test]
    fn test_apply_rejects_illegal_transition() {
        let mut task = Task::new("t", "d");
        let err = task
            .apply(TaskPatch::new().status(TaskStatus::Completed))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { from, to } => {
                assert_eq!(from, "pending");
                assert_eq!(to, "completed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_apply_clears_assignment_on_requeue() {
        let mut task = Task::new("t", "d").with_initial_status(TaskStatus::Ready);
        let agent = Uuid::new_v4();
        task.apply(TaskPatch::new().status(TaskStatus::Claimed).assign(agent))
            .unwrap();
        assert_eq!(task.assigned_agent, Some(agent));

        task.apply(TaskPatch::new().status(TaskStatus::Ready)).unwrap();
        assert!(task.assigned_agent.is_none());
    }

    #[test]
    fn test_failed_retains_assignment_for_diagnostics() {
        let mut task = Task::new("t", "d").with_initial_status(TaskStatus::Ready);
        let agent = Uuid::new_v4();
        task.apply(TaskPatch::new().status(TaskStatus::Claimed).assign(agent))
            .unwrap();
        task.apply(TaskPatch::new().status(TaskStatus::InProgress))
            .unwrap();
        task.apply(
            TaskPatch::new()
                .status(TaskStatus::Failed)
                .failure_type(FailureKind::Timeout),
        )
        .unwrap();
        assert_eq!(task.assigned_agent, Some(agent));
        assert_eq!(task.failure_type, Some(FailureKind::Timeout));
    }

    #[test]
    fn test_retry_over_budget_forces_failed() {
        let mut task = Task::new("t", "d")
            .with_max_retries(1)
            .with_initial_status(TaskStatus::Ready);
        task.apply(TaskPatch::new().retry_count(1)).unwrap();
        assert_eq!(task.status, TaskStatus::Ready);

        task.apply(TaskPatch::new().retry_count(2)).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_completed_sets_timestamp() {
        let mut task = Task::new("t", "d").with_initial_status(TaskStatus::InProgress);
        assert!(task.completed_at.is_none());
        task.apply(TaskPatch::new().status(TaskStatus::Completed).actual_minutes(3))
            .unwrap();
        assert!(task.completed_at.is_some());
        assert_eq!(task.actual_minutes, Some(3));
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            FailureKind::classify("process timed out after 60000ms"),
            FailureKind::Timeout
        );
        assert_eq!(FailureKind::classify("worker stalled"), FailureKind::Stalled);
        assert_eq!(
            FailureKind::classify("no output for 5 minutes"),
            FailureKind::Stalled
        );
        assert_eq!(
            FailureKind::classify("FILE_LOCKED:src/a.ts:1234"),
            FailureKind::Blocked
        );
        assert_eq!(
            FailureKind::classify("resource is blocked by peer"),
            FailureKind::Blocked
        );
        assert_eq!(FailureKind::classify("segfault"), FailureKind::Error);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical.rank() > TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() > TaskPriority::Medium.rank());
        assert!(TaskPriority::Medium.rank() > TaskPriority::Low.rank());
        assert_eq!(TaskPriority::parse_str("CRITICAL"), Some(TaskPriority::Critical));
        assert_eq!(TaskPriority::parse_str("weird"), None);
    }

    #[test]
    fn test_filter_matching() {
        let agent = Uuid::new_v4();
        let task = Task::new("t", "d")
            .with_tag("infra")
            .with_initial_status(TaskStatus::Ready);

        assert!(TaskFilter::by_status(TaskStatus::Ready).matches(&task));
        assert!(!TaskFilter::by_status(TaskStatus::Failed).matches(&task));
        assert!(!TaskFilter::by_agent(agent).matches(&task));
        let tag_filter = TaskFilter {
            tag: Some("infra".to_string()),
            ..TaskFilter::default()
        };
        assert!(tag_filter.matches(&task));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut task = Task::new("t", "d");
        let id = task.id;
        task = task.with_dependency(id);
        assert!(task.dependencies.is_empty());
    }
}
