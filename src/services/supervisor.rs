//! Supervisor reconciler: the periodic background sweep that repairs the
//! queue independently of any agent.
//!
//! Each sweep nudges agents at unassigned ready work, re-arms retryable
//! failures, recovers tasks held by stalled agents, and unblocks tasks
//! whose dependencies have completed. Steps are best-effort; a failure in
//! one never aborts the others. In objective mode the sweep also drives
//! the objective service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    topics, AgentProfile, AgentStatus, Message, TaskFilter, TaskPatch, TaskStatus,
};
use crate::domain::ports::mail_bus::MailBus;
use crate::domain::ports::task_store::TaskStore;
use crate::services::objective::ObjectiveService;

/// Read access to live agent state, behind a trait so the sweep can be
/// tested without real controllers.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn agent_snapshots(&self) -> Vec<AgentProfile>;
}

/// Sweep cadence and stall threshold.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub interval: Duration,
    /// Busy agents silent for longer than this are considered stalled
    pub stall_after: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stall_after: Duration::from_secs(120),
        }
    }
}

/// The reconciliation loop.
pub struct SupervisorReconciler {
    tasks: Arc<dyn TaskStore>,
    bus: Arc<dyn MailBus>,
    agents: Arc<dyn AgentDirectory>,
    objective: Option<Arc<ObjectiveService>>,
    config: SupervisorConfig,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorReconciler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        bus: Arc<dyn MailBus>,
        agents: Arc<dyn AgentDirectory>,
        objective: Option<Arc<ObjectiveService>>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks,
            bus,
            agents,
            objective,
            config,
            cancel: CancellationToken::new(),
            ticker: Mutex::new(None),
        })
    }

    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.run_sweep().await,
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
        info!(interval_ms = self.config.interval.as_millis() as u64, "supervisor started");
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// One full sweep. Public so tests can drive it directly.
    pub async fn run_sweep(&self) {
        if let Err(e) = self.nudge_ready_tasks().await {
            warn!(error = %e, "ready-task nudge failed");
        }
        if let Err(e) = self.rearm_retryable_failures().await {
            warn!(error = %e, "retry re-arm failed");
        }
        if let Err(e) = self.recover_stalled_agents().await {
            warn!(error = %e, "stalled-agent recovery failed");
        }
        if let Err(e) = self.unblock_satisfied_tasks().await {
            warn!(error = %e, "dependency unblock failed");
        }
        if let Some(objective) = &self.objective {
            objective.tick().await;
        }
    }

    /// Step 1: tell idle agents there is claimable work.
    async fn nudge_ready_tasks(&self) -> DomainResult<()> {
        let ready = self.tasks.list(TaskFilter::by_status(TaskStatus::Ready)).await?;
        let unassigned = ready.iter().filter(|t| t.assigned_agent.is_none()).count();
        if unassigned > 0 {
            debug!(count = unassigned, "announcing available work");
            self.bus
                .publish(
                    Message::new(topics::TASK_AVAILABLE, "supervisor").with_payload(json!({
                        "count": unassigned,
                    })),
                )
                .await?;
        }
        Ok(())
    }

    /// Step 2: failed tasks with retry budget left go back to ready.
    async fn rearm_retryable_failures(&self) -> DomainResult<()> {
        let failed = self.tasks.list(TaskFilter::by_status(TaskStatus::Failed)).await?;
        for task in failed {
            if !task.retries_remaining() {
                continue;
            }
            let patch = TaskPatch::new()
                .status(TaskStatus::Ready)
                .clear_assignment()
                .retry_count(task.retry_count + 1);
            match self.tasks.update(task.id, patch).await {
                Ok(_) => info!(task_id = %task.id, "re-armed failed task for retry"),
                Err(e) => warn!(task_id = %task.id, error = %e, "re-arm failed"),
            }
        }
        Ok(())
    }

    /// Step 3: recover in-progress tasks held by busy-but-silent agents.
    async fn recover_stalled_agents(&self) -> DomainResult<()> {
        let stall_ms = self.config.stall_after.as_millis() as i64;
        let now = Utc::now();
        for agent in self.agents.agent_snapshots().await {
            if agent.status != AgentStatus::Busy {
                continue;
            }
            if (now - agent.last_active).num_milliseconds() < stall_ms {
                continue;
            }
            warn!(agent = %agent.name, "agent is stalled, recovering its tasks");
            let mut held = self
                .tasks
                .list(TaskFilter {
                    status: Some(TaskStatus::InProgress),
                    assigned_agent: Some(agent.id),
                    ..TaskFilter::default()
                })
                .await?;
            for task in held.drain(..) {
                let patch = TaskPatch::new().status(TaskStatus::Ready).clear_assignment();
                match self.tasks.update(task.id, patch).await {
                    Ok(_) => info!(task_id = %task.id, "reset stalled task to ready"),
                    Err(e) => warn!(task_id = %task.id, error = %e, "stalled reset failed"),
                }
            }
        }
        Ok(())
    }

    /// Step 4: blocked tasks whose dependencies all completed go ready.
    async fn unblock_satisfied_tasks(&self) -> DomainResult<()> {
        let blocked = self.tasks.list(TaskFilter::by_status(TaskStatus::Blocked)).await?;
        for task in blocked {
            let mut all_complete = true;
            for dep in &task.dependencies {
                match self.tasks.get(*dep).await? {
                    Some(dep_task) if dep_task.status == TaskStatus::Completed => {}
                    _ => {
                        all_complete = false;
                        break;
                    }
                }
            }
            if all_complete {
                match self
                    .tasks
                    .update(task.id, TaskPatch::new().status(TaskStatus::Ready))
                    .await
                {
                    Ok(_) => info!(task_id = %task.id, "unblocked task"),
                    Err(e) => warn!(task_id = %task.id, error = %e, "unblock failed"),
                }
            }
        }
        Ok(())
    }
}

/// Static directory for tests and simple embeddings.
pub struct FixedAgentDirectory {
    profiles: Mutex<Vec<AgentProfile>>,
}

impl FixedAgentDirectory {
    pub fn new(profiles: Vec<AgentProfile>) -> Arc<Self> {
        Arc::new(Self {
            profiles: Mutex::new(profiles),
        })
    }

    pub async fn set(&self, profiles: Vec<AgentProfile>) {
        *self.profiles.lock().await = profiles;
    }
}

#[async_trait]
impl AgentDirectory for FixedAgentDirectory {
    async fn agent_snapshots(&self) -> Vec<AgentProfile> {
        self.profiles.lock().await.clone()
    }
}
