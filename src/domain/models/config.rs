//! Configuration model.
//!
//! All sections have serde defaults so a partial YAML file or a handful of
//! environment variables is enough to run. Validation happens in the
//! loader after the figment merge.

use serde::{Deserialize, Serialize};

use super::objective::WatermarkConfig;

/// Top-level configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub intervals: IntervalsConfig,
    pub executor: ExecutorConfig,
    pub governor: GovernorConfig,
    pub memory_governor: MemoryGovernorConfig,
    pub store: StoreConfig,
    pub intake: IntakeConfig,
    pub registry: RegistryConfig,
    pub lease: LeaseConfig,
    pub retry: RetryConfig,
    pub watermarks: WatermarkConfig,
    pub planner: PlannerConfig,
    pub logging: LoggingConfig,
}

/// One named agent with its configured skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Agent pool shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Pool size when `roster` is empty
    pub count: usize,
    /// Name prefix for generated agents
    pub name_prefix: String,
    /// Skills given to generated agents
    pub default_skills: Vec<String>,
    /// Explicit roster; overrides `count` when non-empty
    pub roster: Vec<AgentSpec>,
    /// Skills any agent may learn at claim time
    pub acquirable_skills: Vec<String>,
    /// Whether `start()` also starts every agent
    pub auto_start: bool,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            count: 3,
            name_prefix: "agent".to_string(),
            default_skills: Vec::new(),
            roster: Vec::new(),
            acquirable_skills: Vec::new(),
            auto_start: true,
        }
    }
}

/// Ticker cadences, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub heartbeat_ms: u64,
    pub status_ms: u64,
    pub work_poll_ms: u64,
    pub supervisor_ms: u64,
    pub registry_ms: u64,
    pub intake_poll_ms: u64,
    /// An agent busy but silent for longer than this is considered stalled
    pub stall_after_ms: u64,
    /// Delay before re-polling after a finished cycle
    pub post_cycle_delay_ms: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 30_000,
            status_ms: 10_000,
            work_poll_ms: 30_000,
            supervisor_ms: 30_000,
            registry_ms: 5_000,
            intake_poll_ms: 2_000,
            stall_after_ms: 120_000,
            post_cycle_delay_ms: 1_000,
        }
    }
}

/// External worker process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker binary; receives the prompt on stdin
    pub binary: String,
    /// Fixed arguments passed before the prompt
    pub args: Vec<String>,
    /// Working directory for spawned workers
    pub work_dir: String,
    /// Multiplier applied to the task's estimate
    pub timeout_multiplier: f64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Timeout when no estimate exists and the heuristic has nothing to go on
    pub fallback_timeout_ms: u64,
    /// Stage-one grace after the interrupt signal
    pub interrupt_grace_ms: u64,
    /// Stage-two grace after the terminate signal
    pub graceful_shutdown_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "drover-worker".to_string(),
            args: Vec::new(),
            work_dir: ".".to_string(),
            timeout_multiplier: 2.0,
            min_timeout_ms: 5 * 60 * 1000,
            max_timeout_ms: 2 * 60 * 60 * 1000,
            fallback_timeout_ms: 30 * 60 * 1000,
            interrupt_grace_ms: 5_000,
            graceful_shutdown_ms: 30_000,
        }
    }
}

/// Runtime governor ceilings; zero disables a limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub max_cycles: u64,
    pub max_runtime_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_consecutive_failures: u64,
    /// Queue floor; `signal_all_tasks_complete` only ends the run at zero
    pub min_queue_size: u64,
    pub check_interval_ms: u64,
    /// Crash-recovery state file
    pub state_path: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 0,
            max_runtime_ms: 0,
            idle_timeout_ms: 0,
            max_consecutive_failures: 0,
            min_queue_size: 0,
            check_interval_ms: 1_000,
            state_path: ".drover/runtime-state.json".to_string(),
        }
    }
}

/// Memory governor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryGovernorConfig {
    /// Heap budget in MB; zero disables the governor
    pub heap_budget_mb: u64,
    /// Fraction of the budget where agents start throttling
    pub soft_fraction: f64,
    /// Fraction where claiming pauses
    pub hard_fraction: f64,
    /// Fraction where the orchestrator shuts down
    pub critical_fraction: f64,
    pub sample_interval_ms: u64,
}

impl Default for MemoryGovernorConfig {
    fn default() -> Self {
        Self {
            heap_budget_mb: 4096,
            soft_fraction: 0.75,
            hard_fraction: 0.90,
            critical_fraction: 0.97,
            sample_interval_ms: 5_000,
        }
    }
}

/// Which backing store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// Store selection and location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: ".drover/drover.db".to_string(),
        }
    }
}

/// Task-file intake directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub directory: String,
    /// Whether the watcher runs at all
    pub enabled: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            directory: "tasks".to_string(),
            enabled: true,
        }
    }
}

/// Agent registry snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: ".drover/agents.json".to_string(),
        }
    }
}

/// File lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl_ms: 120_000 }
    }
}

/// Retry backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base of the exponential advisory backoff
    pub base_backoff_ms: u64,
    /// Default retry budget for new tasks
    pub default_max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 30_000,
            default_max_retries: 2,
        }
    }
}

impl RetryConfig {
    /// Advisory backoff before the next attempt: `base * 2^retry_count`.
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        self.base_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry_count))
    }
}

/// LLM planner settings (objective mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub base_url: String,
    pub model: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    pub max_retries: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 4096,
            timeout_secs: 120,
            requests_per_minute: 30,
            max_retries: 3,
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// pretty | json
    pub format: String,
    /// When set, also log to daily-rotated files in this directory
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}
