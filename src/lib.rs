//! Drover - Multi-Agent Work Orchestrator
//!
//! A pool of worker agents drains a durable task queue:
//! - Task queue with priority, skill matching, and dependency management
//! - Lease-based exclusive file locking between agents
//! - External worker processes with dynamic timeouts and staged termination
//! - Supervisor reconciliation (stalled claims, retries, unblocking)
//! - Runtime and memory governors with explicit end states
//! - Optional objective mode: milestone-batched task generation via an LLM planner

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::config::Config;
