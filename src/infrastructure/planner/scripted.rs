//! Deterministic planner and analyzer for tests and offline runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{MilestoneAssessment, PlannedTask};
use crate::domain::ports::planner::{AnalysisRequest, PlanRequest, ProgressAnalyzer, TaskPlanner};

/// Pops pre-scripted batches; empty once the script runs out.
#[derive(Default)]
pub struct ScriptedPlanner {
    batches: Mutex<VecDeque<Vec<PlannedTask>>>,
}

impl ScriptedPlanner {
    pub fn new(batches: Vec<Vec<PlannedTask>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
        }
    }
}

#[async_trait]
impl TaskPlanner for ScriptedPlanner {
    async fn plan_tasks(&self, request: &PlanRequest) -> DomainResult<Vec<PlannedTask>> {
        let mut batches = self.batches.lock().await;
        let mut batch = batches.pop_front().unwrap_or_default();
        batch.truncate(request.max_tasks);
        Ok(batch)
    }
}

/// Pops pre-scripted assessments; defaults to "not satisfied".
#[derive(Default)]
pub struct ScriptedAnalyzer {
    assessments: Mutex<VecDeque<MilestoneAssessment>>,
}

impl ScriptedAnalyzer {
    pub fn new(assessments: Vec<MilestoneAssessment>) -> Self {
        Self {
            assessments: Mutex::new(assessments.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ProgressAnalyzer for ScriptedAnalyzer {
    async fn assess(&self, _request: &AnalysisRequest) -> DomainResult<MilestoneAssessment> {
        let mut assessments = self.assessments.lock().await;
        Ok(assessments.pop_front().unwrap_or(MilestoneAssessment {
            satisfied: false,
            judgements: Vec::new(),
        }))
    }
}
