//! Objective and milestone domain models.
//!
//! In objective mode the supervisor keeps the queue fed: it asks a planner
//! for milestone-sized task batches whenever the pending count drops below
//! the low watermark, and a progress analyzer decides when a milestone's
//! completion criteria are satisfied.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Status of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Active,
    Completed,
}

/// A phase of an objective with explicit completion criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub title: String,
    /// Human-readable acceptance criteria judged by the progress analyzer
    pub completion_criteria: Vec<String>,
    /// Rough sizing hint for the planner
    pub estimated_tasks: u32,
    /// Tasks generated for this milestone so far
    pub task_ids: Vec<Uuid>,
    pub status: MilestoneStatus,
}

impl Milestone {
    pub fn new(title: impl Into<String>, completion_criteria: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            completion_criteria,
            estimated_tasks: 0,
            task_ids: Vec::new(),
            status: MilestoneStatus::Pending,
        }
    }
}

/// A long-running goal decomposed into milestones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: Uuid,
    pub title: String,
    pub status: ObjectiveStatus,
    pub milestones: Vec<Milestone>,
    pub current_milestone_index: usize,
    pub progress_percent: f64,
    /// How many planner generation rounds have run
    pub generation_round: u32,
}

impl Objective {
    pub fn new(title: impl Into<String>, mut milestones: Vec<Milestone>) -> Self {
        if let Some(first) = milestones.first_mut() {
            first.status = MilestoneStatus::InProgress;
        }
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            status: ObjectiveStatus::Active,
            milestones,
            current_milestone_index: 0,
            progress_percent: 0.0,
            generation_round: 0,
        }
    }

    pub fn current_milestone(&self) -> Option<&Milestone> {
        self.milestones.get(self.current_milestone_index)
    }

    pub fn current_milestone_mut(&mut self) -> Option<&mut Milestone> {
        self.milestones.get_mut(self.current_milestone_index)
    }

    /// Complete the current milestone and move to the next one.
    ///
    /// Returns `true` while milestones remain; `false` marks the whole
    /// objective completed.
    pub fn complete_current_milestone(&mut self) -> bool {
        if let Some(current) = self.milestones.get_mut(self.current_milestone_index) {
            current.status = MilestoneStatus::Completed;
        }
        self.recompute_progress();
        if self.current_milestone_index + 1 < self.milestones.len() {
            self.current_milestone_index += 1;
            if let Some(next) = self.milestones.get_mut(self.current_milestone_index) {
                next.status = MilestoneStatus::InProgress;
            }
            true
        } else {
            self.status = ObjectiveStatus::Completed;
            self.progress_percent = 100.0;
            false
        }
    }

    fn recompute_progress(&mut self) {
        if self.milestones.is_empty() {
            return;
        }
        let done = self
            .milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Completed)
            .count();
        self.progress_percent = done as f64 / self.milestones.len() as f64 * 100.0;
    }
}

/// Pending-count thresholds that gate planner batch generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Generation runs only when pending falls below this
    pub low: usize,
    /// Target fill level for one batch
    pub high: usize,
    /// Absolute queue ceiling
    pub max: usize,
    /// Minimum time between generation rounds
    pub cooldown_ms: u64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            low: 2,
            high: 8,
            max: 15,
            cooldown_ms: 30_000,
        }
    }
}

impl WatermarkConfig {
    /// Whether a generation round should run for the given pending depth.
    pub fn should_generate(&self, pending: usize) -> bool {
        pending < self.low
    }

    /// Batch size for one generation round, capped at eight tasks.
    pub fn batch_size(&self, pending: usize) -> usize {
        self.high
            .saturating_sub(pending)
            .min(self.max.saturating_sub(pending))
            .min(8)
    }
}

/// A task as proposed by the planner, before persistence.
///
/// Dependencies are indices into the same batch; they are resolved to task
/// ids as the batch is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// Judgement of a single completion criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionJudgement {
    pub criterion: String,
    pub satisfied: bool,
    #[serde(default)]
    pub reason: String,
}

/// The analyzer's verdict on a milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneAssessment {
    pub satisfied: bool,
    pub judgements: Vec<CriterionJudgement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objective_with(n: usize) -> Objective {
        let milestones = (0..n)
            .map(|i| Milestone::new(format!("m{i}"), vec!["done".to_string()]))
            .collect();
        Objective::new("obj", milestones)
    }

    #[test]
    fn test_first_milestone_starts_in_progress() {
        let obj = objective_with(2);
        assert_eq!(obj.current_milestone().unwrap().status, MilestoneStatus::InProgress);
        assert_eq!(obj.milestones[1].status, MilestoneStatus::Pending);
    }

    #[test]
    fn test_milestone_advance_and_objective_completion() {
        let mut obj = objective_with(2);
        assert!(obj.complete_current_milestone());
        assert_eq!(obj.current_milestone_index, 1);
        assert_eq!(obj.milestones[0].status, MilestoneStatus::Completed);
        assert_eq!(obj.milestones[1].status, MilestoneStatus::InProgress);
        assert!((obj.progress_percent - 50.0).abs() < f64::EPSILON);

        assert!(!obj.complete_current_milestone());
        assert_eq!(obj.status, ObjectiveStatus::Completed);
        assert!((obj.progress_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_watermark_gating() {
        let w = WatermarkConfig::default();
        assert!(w.should_generate(0));
        assert!(w.should_generate(1));
        assert!(!w.should_generate(2));
        assert!(!w.should_generate(9));
    }

    #[test]
    fn test_watermark_batch_size() {
        let w = WatermarkConfig::default();
        // high - pending = 8, max - pending = 15, capped at 8
        assert_eq!(w.batch_size(0), 8);
        assert_eq!(w.batch_size(1), 7);
        let tight = WatermarkConfig {
            low: 2,
            high: 20,
            max: 10,
            cooldown_ms: 0,
        };
        // max - pending binds before high - pending
        assert_eq!(tight.batch_size(4), 6);
    }
}
