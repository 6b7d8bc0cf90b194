//! Runtime governor: global termination conditions and the end-state
//! machine.
//!
//! Counts cycles, completions, failures, and idle time against configured
//! ceilings (zero disables a ceiling). The first ceiling crossed stops the
//! run with an end state, broadcast on a watch channel. State persists to
//! a small JSON file: written at start and on every check so a crash
//! leaves `end_state: null` behind, which the next start detects to
//! resume the counters.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::GovernorConfig;

/// Terminal classification of a governor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndState {
    MaxCyclesReached,
    MaxRuntimeReached,
    IdleTimeout,
    MaxFailuresReached,
    AllTasksComplete,
    ObjectiveComplete,
    ManualStop,
}

impl EndState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxCyclesReached => "max_cycles_reached",
            Self::MaxRuntimeReached => "max_runtime_reached",
            Self::IdleTimeout => "idle_timeout",
            Self::MaxFailuresReached => "max_failures_reached",
            Self::AllTasksComplete => "all_tasks_complete",
            Self::ObjectiveComplete => "objective_complete",
            Self::ManualStop => "manual_stop",
        }
    }
}

/// The persisted runtime-state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStateFile {
    pub cycle_count: u64,
    pub started_at: DateTime<Utc>,
    pub last_work_at: Option<DateTime<Utc>>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub active_objective_id: Option<Uuid>,
    pub end_state: Option<EndState>,
}

#[derive(Debug, Clone)]
struct Counters {
    cycle_count: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    consecutive_failures: u64,
    started_at: DateTime<Utc>,
    last_work_at: Option<DateTime<Utc>>,
    running: bool,
    end_state: Option<EndState>,
    active_objective_id: Option<Uuid>,
}

impl Counters {
    fn fresh() -> Self {
        Self {
            cycle_count: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            consecutive_failures: 0,
            started_at: Utc::now(),
            last_work_at: None,
            running: false,
            end_state: None,
            active_objective_id: None,
        }
    }
}

/// Read-only copy of the governor's counters.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub cycle_count: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub consecutive_failures: u64,
    pub started_at: DateTime<Utc>,
    pub last_work_at: Option<DateTime<Utc>>,
    pub running: bool,
    pub end_state: Option<EndState>,
}

/// Tracks run progress against ceilings and owns the end state.
pub struct RuntimeGovernor {
    limits: GovernorConfig,
    state_path: PathBuf,
    counters: Mutex<Counters>,
    end_tx: watch::Sender<Option<EndState>>,
    end_rx: watch::Receiver<Option<EndState>>,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeGovernor {
    pub fn new(limits: GovernorConfig) -> Arc<Self> {
        let state_path = PathBuf::from(&limits.state_path);
        let (end_tx, end_rx) = watch::channel(None);
        Arc::new(Self {
            limits,
            state_path,
            counters: Mutex::new(Counters::fresh()),
            end_tx,
            end_rx,
            cancel: CancellationToken::new(),
            ticker: Mutex::new(None),
        })
    }

    /// Begin a run, resuming counters from a crashed predecessor if its
    /// state file ended with `end_state: null`. A corrupted state file
    /// refuses to start.
    pub async fn start(self: &Arc<Self>) -> DomainResult<()> {
        let resumed = self.load_prior_state()?;
        {
            let mut counters = self.counters.lock().await;
            *counters = Counters::fresh();
            if let Some(prior) = resumed {
                info!(
                    cycles = prior.cycle_count,
                    completed = prior.tasks_completed,
                    failed = prior.tasks_failed,
                    "resuming counters from crashed run"
                );
                counters.cycle_count = prior.cycle_count;
                counters.tasks_completed = prior.tasks_completed;
                counters.tasks_failed = prior.tasks_failed;
                counters.active_objective_id = prior.active_objective_id;
            }
            counters.running = true;
            self.persist(&counters)?;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
                this.limits.check_interval_ms,
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.check_time_limits().await,
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
        Ok(())
    }

    fn load_prior_state(&self) -> DomainResult<Option<RuntimeStateFile>> {
        if !self.state_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.state_path)
            .map_err(|e| DomainError::Storage(format!("read runtime state: {e}")))?;
        let prior: RuntimeStateFile = serde_json::from_str(&raw).map_err(|e| {
            DomainError::Storage(format!(
                "corrupted runtime state file {}: {e}",
                self.state_path.display()
            ))
        })?;
        if prior.end_state.is_none() {
            Ok(Some(prior))
        } else {
            Ok(None)
        }
    }

    fn persist(&self, counters: &Counters) -> DomainResult<()> {
        let state = RuntimeStateFile {
            cycle_count: counters.cycle_count,
            started_at: counters.started_at,
            last_work_at: counters.last_work_at,
            tasks_completed: counters.tasks_completed,
            tasks_failed: counters.tasks_failed,
            active_objective_id: counters.active_objective_id,
            end_state: counters.end_state,
        };
        if let Some(parent) = self.state_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DomainError::Storage(format!("create state dir: {e}")))?;
            }
        }
        let json = serde_json::to_string_pretty(&state)?;
        let tmp = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| DomainError::Storage(format!("write runtime state: {e}")))?;
        std::fs::rename(&tmp, &self.state_path)
            .map_err(|e| DomainError::Storage(format!("rename runtime state: {e}")))?;
        Ok(())
    }

    async fn check_time_limits(&self) {
        let decision = {
            let counters = self.counters.lock().await;
            if !counters.running {
                None
            } else if self.limits.max_runtime_ms > 0
                && (Utc::now() - counters.started_at).num_milliseconds() as u64
                    >= self.limits.max_runtime_ms
            {
                Some(EndState::MaxRuntimeReached)
            } else if self.limits.idle_timeout_ms > 0 {
                match counters.last_work_at {
                    Some(last) if (Utc::now() - last).num_milliseconds() as u64
                        >= self.limits.idle_timeout_ms =>
                    {
                        Some(EndState::IdleTimeout)
                    }
                    _ => {
                        if let Err(e) = self.persist(&counters) {
                            warn!(error = %e, "periodic state persist failed");
                        }
                        None
                    }
                }
            } else {
                if let Err(e) = self.persist(&counters) {
                    warn!(error = %e, "periodic state persist failed");
                }
                None
            }
        };
        if let Some(end) = decision {
            self.stop(end).await;
        }
    }

    /// End the run. Idempotent; the first caller wins.
    pub async fn stop(&self, end_state: EndState) {
        {
            let mut counters = self.counters.lock().await;
            if !counters.running {
                return;
            }
            counters.running = false;
            counters.end_state = Some(end_state);
            if let Err(e) = self.persist(&counters) {
                warn!(error = %e, "final state persist failed");
            }
        }
        self.cancel.cancel();
        // The ticker loop exits on the cancel token. Not awaited: stop may
        // be running on the ticker task itself.
        drop(self.ticker.lock().await.take());
        info!(end_state = end_state.as_str(), "runtime governor stopped");
        let _ = self.end_tx.send(Some(end_state));
    }

    /// One agent cycle finished.
    pub async fn record_cycle(&self) {
        let decision = {
            let mut counters = self.counters.lock().await;
            if !counters.running {
                return;
            }
            counters.cycle_count += 1;
            counters.last_work_at = Some(Utc::now());
            if self.limits.max_cycles > 0 && counters.cycle_count >= self.limits.max_cycles {
                Some(EndState::MaxCyclesReached)
            } else {
                None
            }
        };
        if let Some(end) = decision {
            self.stop(end).await;
        }
    }

    /// A task completed; resets the consecutive-failure streak.
    pub async fn record_task_complete(&self, task_id: Uuid) {
        let mut counters = self.counters.lock().await;
        if !counters.running {
            return;
        }
        counters.tasks_completed += 1;
        counters.consecutive_failures = 0;
        counters.last_work_at = Some(Utc::now());
        tracing::debug!(%task_id, total = counters.tasks_completed, "task completion recorded");
    }

    /// A task failed permanently.
    pub async fn record_task_failed(&self, task_id: Uuid, error: &str) {
        let decision = {
            let mut counters = self.counters.lock().await;
            if !counters.running {
                return;
            }
            counters.tasks_failed += 1;
            counters.consecutive_failures += 1;
            counters.last_work_at = Some(Utc::now());
            warn!(%task_id, error, streak = counters.consecutive_failures, "task failure recorded");
            if self.limits.max_consecutive_failures > 0
                && counters.consecutive_failures >= self.limits.max_consecutive_failures
            {
                Some(EndState::MaxFailuresReached)
            } else {
                None
            }
        };
        if let Some(end) = decision {
            self.stop(end).await;
        }
    }

    /// The task pool drained. Only ends the run when no queue floor is
    /// configured.
    pub async fn signal_all_tasks_complete(&self) {
        if self.limits.min_queue_size == 0 {
            self.stop(EndState::AllTasksComplete).await;
        }
    }

    /// The objective's last milestone completed.
    pub async fn signal_objective_complete(&self) {
        self.stop(EndState::ObjectiveComplete).await;
    }

    pub async fn set_active_objective(&self, objective_id: Uuid) {
        let mut counters = self.counters.lock().await;
        counters.active_objective_id = Some(objective_id);
    }

    /// Watch for the end state; `None` until the run ends.
    pub fn subscribe_end(&self) -> watch::Receiver<Option<EndState>> {
        self.end_rx.clone()
    }

    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let counters = self.counters.lock().await;
        RuntimeSnapshot {
            cycle_count: counters.cycle_count,
            tasks_completed: counters.tasks_completed,
            tasks_failed: counters.tasks_failed,
            consecutive_failures: counters.consecutive_failures,
            started_at: counters.started_at,
            last_work_at: counters.last_work_at,
            running: counters.running,
            end_state: counters.end_state,
        }
    }
}
