//! Memory governor.
//!
//! Samples the process RSS on an interval and classifies it against the
//! configured heap budget. Agents consult the resulting work permit
//! before claiming: soft pressure throttles, hard pressure pauses, and
//! critical pressure tells the orchestrator to shut the run down.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::models::MemoryGovernorConfig;

/// Severity ladder for heap pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal,
    Soft,
    Hard,
    Critical,
}

impl MemoryPressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Soft => "soft",
            Self::Hard => "hard",
            Self::Critical => "critical",
        }
    }

    /// What an agent may do under this pressure.
    pub fn work_permit(&self) -> WorkPermit {
        match self {
            Self::Normal => WorkPermit::Proceed,
            Self::Soft => WorkPermit::Throttle,
            Self::Hard | Self::Critical => WorkPermit::Pause,
        }
    }
}

/// Claiming permission derived from memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkPermit {
    Proceed,
    Throttle,
    Pause,
}

/// Samples heap usage and broadcasts pressure transitions.
pub struct MemoryGovernor {
    config: MemoryGovernorConfig,
    pressure_tx: watch::Sender<MemoryPressure>,
    pressure_rx: watch::Receiver<MemoryPressure>,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryGovernor {
    pub fn new(config: MemoryGovernorConfig) -> Arc<Self> {
        let (pressure_tx, pressure_rx) = watch::channel(MemoryPressure::Normal);
        Arc::new(Self {
            config,
            pressure_tx,
            pressure_rx,
            cancel: CancellationToken::new(),
            ticker: Mutex::new(None),
        })
    }

    /// Classify a usage sample against the budget.
    pub fn classify(used_mb: u64, config: &MemoryGovernorConfig) -> MemoryPressure {
        if config.heap_budget_mb == 0 {
            return MemoryPressure::Normal;
        }
        let fraction = used_mb as f64 / config.heap_budget_mb as f64;
        if fraction >= config.critical_fraction {
            MemoryPressure::Critical
        } else if fraction >= config.hard_fraction {
            MemoryPressure::Hard
        } else if fraction >= config.soft_fraction {
            MemoryPressure::Soft
        } else {
            MemoryPressure::Normal
        }
    }

    /// Watch pressure transitions.
    pub fn subscribe(&self) -> watch::Receiver<MemoryPressure> {
        self.pressure_rx.clone()
    }

    /// Current pressure.
    pub fn pressure(&self) -> MemoryPressure {
        *self.pressure_rx.borrow()
    }

    /// Start sampling. Disabled (no-op) when the budget is zero.
    pub async fn start(self: &Arc<Self>) {
        if self.config.heap_budget_mb == 0 {
            info!("memory governor disabled (no heap budget)");
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker =
                tokio::time::interval(Duration::from_millis(this.config.sample_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(used_mb) = sample_process_rss_mb(&mut system) else {
                            continue;
                        };
                        let next = Self::classify(used_mb, &this.config);
                        let previous = *this.pressure_rx.borrow();
                        if next != previous {
                            match next {
                                MemoryPressure::Normal => {
                                    info!(used_mb, "memory pressure cleared");
                                }
                                MemoryPressure::Soft => {
                                    info!(used_mb, "memory pressure soft: throttling claims");
                                }
                                MemoryPressure::Hard => {
                                    warn!(used_mb, "memory pressure hard: pausing claims");
                                }
                                MemoryPressure::Critical => {
                                    warn!(used_mb, "memory pressure critical: requesting shutdown");
                                }
                            }
                            let _ = this.pressure_tx.send(next);
                        } else {
                            debug!(used_mb, pressure = next.as_str(), "memory sample");
                        }
                    }
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

fn sample_process_rss_mb(system: &mut System) -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory() / 1024 / 1024)
}
