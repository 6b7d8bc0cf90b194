//! In-memory task store.
//!
//! Backs tests and single-process runs. One mutex over the whole map makes
//! every operation trivially atomic and serializable per task id; the claim
//! is a compare-and-set under that lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskFilter, TaskPatch, TaskStatus};
use crate::domain::ports::task_store::{TaskStats, TaskStore};

/// HashMap-backed [`TaskStore`].
#[derive(Default)]
pub struct MemTaskStore {
    inner: Mutex<HashMap<Uuid, Task>>,
}

impl MemTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promote pending tasks whose dependencies all completed; park tasks
    /// with a permanently failed dependency as blocked.
    fn reconcile_readiness(tasks: &mut HashMap<Uuid, Task>) {
        let snapshot: Vec<(Uuid, Vec<Uuid>, TaskStatus)> = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Blocked))
            .map(|t| (t.id, t.dependencies.clone(), t.status))
            .collect();

        for (id, deps, status) in snapshot {
            let all_complete = deps.iter().all(|dep| {
                tasks
                    .get(dep)
                    .map(|d| d.status == TaskStatus::Completed)
                    .unwrap_or(false)
            });
            let any_failed = deps.iter().any(|dep| {
                tasks
                    .get(dep)
                    .map(|d| d.status == TaskStatus::Failed)
                    .unwrap_or(false)
            });

            let next = if all_complete {
                Some(TaskStatus::Ready)
            } else if any_failed && status == TaskStatus::Pending {
                Some(TaskStatus::Blocked)
            } else {
                None
            };

            if let Some(next) = next {
                if let Some(task) = tasks.get_mut(&id) {
                    if task.status != next && task.status.can_transition_to(next) {
                        task.status = next;
                        task.assigned_agent = None;
                        task.updated_at = Utc::now();
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TaskStore for MemTaskStore {
    async fn create(&self, task: Task) -> DomainResult<Task> {
        task.validate()?;
        let mut tasks = self.inner.lock().await;
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let tasks = self.inner.lock().await;
        Ok(tasks.get(&id).cloned())
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let tasks = self.inner.lock().await;
        let mut out: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn get_ready(&self) -> DomainResult<Vec<Task>> {
        let mut tasks = self.inner.lock().await;
        Self::reconcile_readiness(&mut tasks);
        let mut ready: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Ready)
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(ready)
    }

    async fn claim(&self, id: Uuid, agent_id: Uuid) -> DomainResult<Option<Task>> {
        let mut tasks = self.inner.lock().await;
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Ready && task.assigned_agent.is_none() => {
                task.status = TaskStatus::Claimed;
                task.assigned_agent = Some(agent_id);
                task.updated_at = Utc::now();
                Ok(Some(task.clone()))
            }
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> DomainResult<Option<Task>> {
        let mut tasks = self.inner.lock().await;
        match tasks.get_mut(&id) {
            Some(task) => {
                task.apply(patch)?;
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_owned(
        &self,
        id: Uuid,
        agent_id: Uuid,
        patch: TaskPatch,
    ) -> DomainResult<Option<Task>> {
        let mut tasks = self.inner.lock().await;
        match tasks.get_mut(&id) {
            Some(task) => {
                if task.assigned_agent != Some(agent_id) {
                    return Err(DomainError::NotTaskOwner {
                        task_id: id,
                        agent_id,
                    });
                }
                task.apply(patch)?;
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    async fn stats(&self) -> DomainResult<TaskStats> {
        let tasks = self.inner.lock().await;
        let mut stats = TaskStats {
            total: tasks.len() as u64,
            ..TaskStats::default()
        };
        for task in tasks.values() {
            *stats.by_status.entry(task.status).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
