//! Planner and progress-analyzer ports (objective mode).

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{MilestoneAssessment, PlannedTask};

/// Everything the planner needs to propose the next batch of tasks.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub objective_title: String,
    pub milestone_title: String,
    pub completion_criteria: Vec<String>,
    /// Summaries of the milestone's already-completed tasks
    pub completed_summaries: Vec<String>,
    /// Optional relevant memory snippets
    pub memory_context: Vec<String>,
    /// Hard cap on batch size
    pub max_tasks: usize,
}

/// Generates task batches for the current milestone.
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    async fn plan_tasks(&self, request: &PlanRequest) -> DomainResult<Vec<PlannedTask>>;
}

/// Everything the analyzer needs to judge a milestone.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub milestone_title: String,
    pub completion_criteria: Vec<String>,
    /// One line per terminal task: title plus outcome
    pub task_summaries: Vec<String>,
}

/// Judges whether a milestone's completion criteria are satisfied.
#[async_trait]
pub trait ProgressAnalyzer: Send + Sync {
    async fn assess(&self, request: &AnalysisRequest) -> DomainResult<MilestoneAssessment>;
}
