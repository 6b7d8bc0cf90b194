//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod config;
pub mod memory;
pub mod message;
pub mod objective;
pub mod task;

pub use agent::{AgentProfile, AgentStats, AgentStatus, SkillMatch};
pub use config::{
    AgentSpec, AgentsConfig, Config, ExecutorConfig, GovernorConfig, IntakeConfig,
    IntervalsConfig, LeaseConfig, LoggingConfig, MemoryGovernorConfig, PlannerConfig,
    RegistryConfig, RetryConfig, StoreBackend, StoreConfig,
};
pub use memory::{MemoryEntry, MemoryKind};
pub use message::{topics, Lease, LeaseStatus, Message};
pub use objective::{
    CriterionJudgement, Milestone, MilestoneAssessment, MilestoneStatus, Objective,
    ObjectiveStatus, PlannedTask, WatermarkConfig,
};
pub use task::{FailureKind, Task, TaskFilter, TaskPatch, TaskPriority, TaskStatus};
