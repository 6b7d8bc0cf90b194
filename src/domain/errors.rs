//! Domain errors for the drover orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the orchestrator.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Task {task_id} is not owned by agent {agent_id}")]
    NotTaskOwner { task_id: Uuid, agent_id: Uuid },

    #[error("Lease on {key} is held by {holder}")]
    LeaseHeld { key: String, holder: Uuid },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Message bus is closed")]
    BusClosed,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Planner error: {0}")]
    Planner(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
