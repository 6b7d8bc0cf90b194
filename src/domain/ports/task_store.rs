//! Task store port.
//!
//! The atomic claim is the only synchronization point among agents;
//! everything else is optimistic. Any backend with a single-row
//! compare-and-set can implement this.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskFilter, TaskPatch, TaskStatus};

/// Queue-depth snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    pub total: u64,
    pub by_status: HashMap<TaskStatus, u64>,
}

impl TaskStats {
    pub fn count(&self, status: TaskStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Tasks not yet started: pending plus ready.
    pub fn queued(&self) -> u64 {
        self.count(TaskStatus::Pending) + self.count(TaskStatus::Ready)
    }

    /// Whether the pool once had work and now has none in flight.
    pub fn is_drained(&self) -> bool {
        self.total > 0
            && self.count(TaskStatus::Pending) == 0
            && self.count(TaskStatus::Ready) == 0
            && self.count(TaskStatus::Claimed) == 0
            && self.count(TaskStatus::InProgress) == 0
    }
}

/// Repository interface for durable tasks.
///
/// All operations are atomic and serializable with respect to a single
/// task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Validates before insert.
    async fn create(&self, task: Task) -> DomainResult<Task>;

    /// Get a task by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// List tasks matching a filter.
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// All ready tasks. Pending tasks whose dependencies have completed are
    /// promoted to ready first; pending tasks with a failed dependency are
    /// parked as blocked.
    async fn get_ready(&self) -> DomainResult<Vec<Task>>;

    /// Atomic claim: `status == ready && assigned_agent == null` becomes
    /// `claimed` by `agent_id`. Returns the updated task, or `None` when the
    /// compare-and-set lost (someone else claimed, or state moved).
    async fn claim(&self, id: Uuid, agent_id: Uuid) -> DomainResult<Option<Task>>;

    /// Partial update. Illegal status transitions are rejected at this
    /// boundary. Returns `None` for an unknown id.
    async fn update(&self, id: Uuid, patch: TaskPatch) -> DomainResult<Option<Task>>;

    /// Like [`update`](TaskStore::update), but fails unless `agent_id`
    /// currently owns the task.
    async fn update_owned(
        &self,
        id: Uuid,
        agent_id: Uuid,
        patch: TaskPatch,
    ) -> DomainResult<Option<Task>>;

    /// Count tasks by status.
    async fn stats(&self) -> DomainResult<TaskStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_drained_detection() {
        let mut stats = TaskStats::default();
        assert!(!stats.is_drained(), "an empty pool is not drained");

        stats.total = 2;
        stats.by_status.insert(TaskStatus::Completed, 1);
        stats.by_status.insert(TaskStatus::Failed, 1);
        assert!(stats.is_drained());

        stats.by_status.insert(TaskStatus::Ready, 1);
        assert!(!stats.is_drained());
    }

    #[test]
    fn test_stats_queued() {
        let mut stats = TaskStats::default();
        stats.by_status.insert(TaskStatus::Pending, 2);
        stats.by_status.insert(TaskStatus::Ready, 3);
        stats.by_status.insert(TaskStatus::InProgress, 4);
        assert_eq!(stats.queued(), 5);
    }
}
