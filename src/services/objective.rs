//! Objective mode: watermark-driven batch generation and milestone
//! completion detection.
//!
//! Runs on the supervisor's tick. When the unstarted queue depth falls
//! below the low watermark (and no cooldown is active), the planner is
//! asked for a batch sized to refill toward the high watermark, capped by
//! the queue ceiling and at eight tasks. Once every task of the current
//! milestone is terminal, the analyzer judges the completion criteria;
//! full satisfaction advances the milestone or completes the objective.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    topics, Message, Milestone, MilestoneStatus, Objective, Task, TaskStatus, WatermarkConfig,
};
use crate::domain::ports::mail_bus::MailBus;
use crate::domain::ports::memory_store::MemoryStore;
use crate::domain::ports::planner::{AnalysisRequest, PlanRequest, ProgressAnalyzer, TaskPlanner};
use crate::domain::ports::task_store::TaskStore;
use crate::services::runtime_governor::RuntimeGovernor;

/// YAML shape of an objective file passed to `drover run --objective`.
#[derive(Debug, Deserialize)]
pub struct ObjectiveFile {
    pub title: String,
    pub milestones: Vec<MilestoneFile>,
}

#[derive(Debug, Deserialize)]
pub struct MilestoneFile {
    pub title: String,
    #[serde(default)]
    pub completion_criteria: Vec<String>,
    #[serde(default)]
    pub estimated_tasks: u32,
}

/// Load an objective definition from a YAML file.
pub fn load_objective_file(path: impl AsRef<Path>) -> DomainResult<Objective> {
    let raw = std::fs::read_to_string(path.as_ref())
        .map_err(|e| DomainError::ValidationFailed(format!("read objective file: {e}")))?;
    let file: ObjectiveFile = serde_yaml::from_str(&raw)
        .map_err(|e| DomainError::ValidationFailed(format!("parse objective file: {e}")))?;
    if file.milestones.is_empty() {
        return Err(DomainError::ValidationFailed(
            "objective needs at least one milestone".to_string(),
        ));
    }
    let milestones = file
        .milestones
        .into_iter()
        .map(|m| {
            let mut milestone = Milestone::new(m.title, m.completion_criteria);
            milestone.estimated_tasks = m.estimated_tasks;
            milestone
        })
        .collect();
    Ok(Objective::new(file.title, milestones))
}

/// Drives one objective through its milestones.
pub struct ObjectiveService {
    objective: Mutex<Objective>,
    planner: Arc<dyn TaskPlanner>,
    analyzer: Arc<dyn ProgressAnalyzer>,
    tasks: Arc<dyn TaskStore>,
    memories: Arc<dyn MemoryStore>,
    bus: Arc<dyn MailBus>,
    governor: Arc<RuntimeGovernor>,
    watermarks: WatermarkConfig,
    last_generation: Mutex<Option<Instant>>,
}

impl ObjectiveService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        objective: Objective,
        planner: Arc<dyn TaskPlanner>,
        analyzer: Arc<dyn ProgressAnalyzer>,
        tasks: Arc<dyn TaskStore>,
        memories: Arc<dyn MemoryStore>,
        bus: Arc<dyn MailBus>,
        governor: Arc<RuntimeGovernor>,
        watermarks: WatermarkConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            objective: Mutex::new(objective),
            planner,
            analyzer,
            tasks,
            memories,
            bus,
            governor,
            watermarks,
            last_generation: Mutex::new(None),
        })
    }

    pub async fn objective_id(&self) -> Uuid {
        self.objective.lock().await.id
    }

    pub async fn snapshot(&self) -> Objective {
        self.objective.lock().await.clone()
    }

    /// One supervisor tick in objective mode.
    pub async fn tick(&self) {
        if let Err(e) = self.check_milestone().await {
            warn!(error = %e, "milestone check failed");
        }
        if let Err(e) = self.replenish().await {
            warn!(error = %e, "task replenishment failed");
        }
    }

    /// Judge the current milestone once all its tasks are terminal.
    async fn check_milestone(&self) -> DomainResult<()> {
        let (milestone_id, title, criteria, task_ids) = {
            let objective = self.objective.lock().await;
            let Some(milestone) = objective.current_milestone() else {
                return Ok(());
            };
            if milestone.status == MilestoneStatus::Completed || milestone.task_ids.is_empty() {
                return Ok(());
            }
            (
                milestone.id,
                milestone.title.clone(),
                milestone.completion_criteria.clone(),
                milestone.task_ids.clone(),
            )
        };

        let mut summaries = Vec::new();
        for task_id in &task_ids {
            match self.tasks.get(*task_id).await? {
                Some(task) if task.is_terminal() => {
                    let outcome = match task.status {
                        TaskStatus::Completed => "completed".to_string(),
                        _ => format!(
                            "failed ({})",
                            task.last_error.as_deref().unwrap_or("no detail")
                        ),
                    };
                    summaries.push(format!("{}: {outcome}", task.title));
                }
                Some(_) => return Ok(()), // still running somewhere
                None => summaries.push(format!("{task_id}: missing")),
            }
        }

        let assessment = self
            .analyzer
            .assess(&AnalysisRequest {
                milestone_title: title.clone(),
                completion_criteria: criteria,
                task_summaries: summaries,
            })
            .await?;

        let satisfied_count = assessment.judgements.iter().filter(|j| j.satisfied).count();
        info!(
            milestone = %title,
            satisfied = assessment.satisfied,
            criteria_satisfied = satisfied_count,
            criteria_total = assessment.judgements.len(),
            "milestone assessed"
        );
        if !assessment.satisfied {
            // Not done: replenishment generates another round of tasks.
            return Ok(());
        }

        let objective_done = {
            let mut objective = self.objective.lock().await;
            // Milestone may have advanced while the analyzer ran.
            if objective.current_milestone().map(|m| m.id) != Some(milestone_id) {
                return Ok(());
            }
            !objective.complete_current_milestone()
        };
        if objective_done {
            info!("objective complete");
            self.governor.signal_objective_complete().await;
        }
        Ok(())
    }

    /// Generate a batch when the queue runs low.
    async fn replenish(&self) -> DomainResult<()> {
        {
            let objective = self.objective.lock().await;
            if objective.current_milestone().is_none()
                || objective.status == crate::domain::models::ObjectiveStatus::Completed
            {
                return Ok(());
            }
        }

        let stats = self.tasks.stats().await?;
        let pending = stats.queued() as usize;
        if !self.watermarks.should_generate(pending) {
            return Ok(());
        }
        {
            let last = self.last_generation.lock().await;
            if let Some(at) = *last {
                if (at.elapsed().as_millis() as u64) < self.watermarks.cooldown_ms {
                    debug!("generation cooldown active");
                    return Ok(());
                }
            }
        }
        let batch_size = self.watermarks.batch_size(pending);
        if batch_size == 0 {
            return Ok(());
        }

        let request = {
            let objective = self.objective.lock().await;
            let milestone = objective
                .current_milestone()
                .ok_or_else(|| DomainError::ValidationFailed("no current milestone".to_string()))?;

            let mut completed_summaries = Vec::new();
            for task_id in &milestone.task_ids {
                if let Some(task) = self.tasks.get(*task_id).await? {
                    if task.status == TaskStatus::Completed {
                        completed_summaries.push(task.title);
                    }
                }
            }
            let memory_context = self
                .memories
                .search(&milestone.title, 3)
                .await
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.content)
                .collect();

            PlanRequest {
                objective_title: objective.title.clone(),
                milestone_title: milestone.title.clone(),
                completion_criteria: milestone.completion_criteria.clone(),
                completed_summaries,
                memory_context,
                max_tasks: batch_size,
            }
        };

        let planned = self.planner.plan_tasks(&request).await?;
        if planned.is_empty() {
            debug!("planner proposed no tasks");
            return Ok(());
        }

        // Resolve intra-batch dependency indices to ids up front.
        let ids: Vec<Uuid> = planned.iter().map(|_| Uuid::new_v4()).collect();
        let (objective_id, milestone_id) = {
            let objective = self.objective.lock().await;
            let milestone = objective
                .current_milestone()
                .ok_or_else(|| DomainError::ValidationFailed("no current milestone".to_string()))?;
            (objective.id, milestone.id)
        };

        let mut created = Vec::new();
        for (index, plan) in planned.iter().enumerate() {
            let dependencies: Vec<Uuid> = plan
                .depends_on
                .iter()
                .filter_map(|i| ids.get(*i).copied())
                .filter(|id| *id != ids[index])
                .collect();
            let initial_status = if dependencies.is_empty() {
                TaskStatus::Ready
            } else {
                TaskStatus::Pending
            };

            let mut task = Task::new(plan.title.clone(), plan.description.clone())
                .with_tag(format!("objective:{objective_id}"))
                .with_tag(format!("milestone:{milestone_id}"))
                .with_initial_status(initial_status);
            task.id = ids[index];
            for skill in &plan.skills {
                task.required_skills.insert(skill.clone());
            }
            task.estimated_minutes = plan.estimated_minutes;
            task.dependencies = dependencies;

            let task = self.tasks.create(task).await?;
            if let Err(e) = self
                .bus
                .publish(
                    Message::new(topics::TASK_CREATED, "objective-planner").with_payload(json!({
                        "task_id": task.id.to_string(),
                        "task_title": task.title,
                        "milestone_id": milestone_id.to_string(),
                    })),
                )
                .await
            {
                warn!(error = %e, "task.created publish failed");
            }
            created.push(task.id);
        }

        {
            let mut objective = self.objective.lock().await;
            objective.generation_round += 1;
            if let Some(milestone) = objective.current_milestone_mut() {
                milestone.task_ids.extend(created.iter().copied());
                if milestone.status == MilestoneStatus::Pending {
                    milestone.status = MilestoneStatus::InProgress;
                }
            }
        }
        *self.last_generation.lock().await = Some(Instant::now());
        info!(count = created.len(), "planner batch created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MilestoneAssessment, PlannedTask};
    use crate::domain::models::GovernorConfig;
    use crate::infrastructure::memstore::{MemMemoryStore, MemTaskStore, MessageHub};
    use crate::infrastructure::planner::{ScriptedAnalyzer, ScriptedPlanner};

    fn planned(title: &str, depends_on: Vec<usize>) -> PlannedTask {
        PlannedTask {
            title: title.to_string(),
            description: "generated".to_string(),
            skills: vec![],
            estimated_minutes: Some(5),
            depends_on,
        }
    }

    async fn service(
        planner: ScriptedPlanner,
        analyzer: ScriptedAnalyzer,
        tasks: Arc<MemTaskStore>,
        state_dir: &std::path::Path,
    ) -> (Arc<ObjectiveService>, Arc<RuntimeGovernor>) {
        let governor = RuntimeGovernor::new(GovernorConfig {
            state_path: state_dir.join("state.json").to_string_lossy().into_owned(),
            ..GovernorConfig::default()
        });
        governor.start().await.unwrap();
        let hub = Arc::new(MessageHub::new());
        let bus = Arc::new(hub.agent_bus(Uuid::new_v4(), "planner-test"));
        let objective = Objective::new(
            "ship it",
            vec![Milestone::new("m1", vec!["all green".to_string()])],
        );
        let service = ObjectiveService::new(
            objective,
            Arc::new(planner),
            Arc::new(analyzer),
            tasks,
            Arc::new(MemMemoryStore::new()),
            bus,
            Arc::clone(&governor),
            WatermarkConfig::default(),
        );
        (service, governor)
    }

    #[tokio::test]
    async fn test_replenish_generates_when_below_low_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(MemTaskStore::new());
        let (service, governor) = service(
            ScriptedPlanner::new(vec![vec![
                planned("a", vec![]),
                planned("b", vec![0]),
            ]]),
            ScriptedAnalyzer::default(),
            Arc::clone(&tasks),
            dir.path(),
        )
        .await;

        service.tick().await;

        let stats = tasks.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        // Independent task starts ready; the dependent one pending.
        assert_eq!(stats.count(TaskStatus::Ready), 1);
        assert_eq!(stats.count(TaskStatus::Pending), 1);

        let objective = service.snapshot().await;
        assert_eq!(objective.generation_round, 1);
        assert_eq!(objective.milestones[0].task_ids.len(), 2);
        governor.stop(crate::services::runtime_governor::EndState::ManualStop).await;
    }

    #[tokio::test]
    async fn test_replenish_respects_cooldown_and_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(MemTaskStore::new());
        let (service, governor) = service(
            ScriptedPlanner::new(vec![
                vec![planned("a", vec![])],
                vec![planned("b", vec![])],
            ]),
            ScriptedAnalyzer::default(),
            Arc::clone(&tasks),
            dir.path(),
        )
        .await;

        service.tick().await;
        assert_eq!(tasks.stats().await.unwrap().total, 1);

        // Second tick is inside the cooldown window: nothing generated.
        service.tick().await;
        assert_eq!(tasks.stats().await.unwrap().total, 1);
        governor.stop(crate::services::runtime_governor::EndState::ManualStop).await;
    }

    #[tokio::test]
    async fn test_milestone_completion_signals_governor() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(MemTaskStore::new());
        let (service, governor) = service(
            ScriptedPlanner::new(vec![vec![planned("only", vec![])]]),
            ScriptedAnalyzer::new(vec![MilestoneAssessment {
                satisfied: true,
                judgements: vec![],
            }]),
            Arc::clone(&tasks),
            dir.path(),
        )
        .await;

        // Round one: generate the batch.
        service.tick().await;
        let objective = service.snapshot().await;
        let task_id = objective.milestones[0].task_ids[0];

        // Complete the generated task out-of-band.
        let agent = Uuid::new_v4();
        tasks.claim(task_id, agent).await.unwrap().unwrap();
        tasks
            .update(task_id, crate::domain::models::TaskPatch::new().status(TaskStatus::InProgress))
            .await
            .unwrap();
        tasks
            .update(task_id, crate::domain::models::TaskPatch::new().status(TaskStatus::Completed))
            .await
            .unwrap();

        // Round two: analyzer satisfied, single milestone -> objective done.
        service.tick().await;
        let snapshot = governor.snapshot().await;
        assert!(!snapshot.running);
        assert_eq!(
            snapshot.end_state,
            Some(crate::services::runtime_governor::EndState::ObjectiveComplete)
        );
    }
}
