//! Orchestrator: owns the agent pool, the intake watcher, the registry
//! writer, the supervisor, and the governors, and wires task lifecycle
//! events into the runtime governor.
//!
//! Ownership is acyclic: the orchestrator owns agents, agents own their
//! executor; stores and the message hub are shared by handle. Governors
//! read agent state only through controller accessors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    topics, AgentProfile, Config, Message, Objective, Task,
};
use crate::domain::ports::mail_bus::{handler, MailBus};
use crate::domain::ports::memory_store::MemoryStore;
use crate::domain::ports::planner::{ProgressAnalyzer, TaskPlanner};
use crate::domain::ports::task_store::{TaskStats, TaskStore};
use crate::infrastructure::memstore::{AgentBus, MessageHub};
use crate::services::agent_controller::{AgentController, AgentControllerConfig};
use crate::services::executor::ProcessExecutor;
use crate::services::intake::TaskIntake;
use crate::services::memory_governor::{MemoryGovernor, MemoryPressure};
use crate::services::objective::ObjectiveService;
use crate::services::registry::RegistryWriter;
use crate::services::runtime_governor::{EndState, RuntimeGovernor};
use crate::services::supervisor::{AgentDirectory, SupervisorConfig, SupervisorReconciler};

/// Objective mode wiring: the objective plus its planner and analyzer.
pub struct ObjectiveMode {
    pub objective: Objective,
    pub planner: Arc<dyn TaskPlanner>,
    pub analyzer: Arc<dyn ProgressAnalyzer>,
}

/// Live view over the controller pool.
struct ControllerDirectory {
    controllers: RwLock<Vec<Arc<AgentController>>>,
}

#[async_trait]
impl AgentDirectory for ControllerDirectory {
    async fn agent_snapshots(&self) -> Vec<AgentProfile> {
        let controllers = self.controllers.read().await;
        let mut snapshots = Vec::with_capacity(controllers.len());
        for controller in controllers.iter() {
            snapshots.push(controller.snapshot().await);
        }
        snapshots
    }
}

/// The top-level runtime.
pub struct Orchestrator {
    config: Config,
    tasks: Arc<dyn TaskStore>,
    memories: Arc<dyn MemoryStore>,
    hub: Arc<MessageHub>,
    /// Broadcast handle, usable before any agent exists
    broadcast: Arc<AgentBus>,
    directory: Arc<ControllerDirectory>,
    runtime_governor: Arc<RuntimeGovernor>,
    memory_governor: Arc<MemoryGovernor>,
    objective: Option<Arc<ObjectiveService>>,
    supervisor: Mutex<Option<Arc<SupervisorReconciler>>>,
    intake: Mutex<Option<Arc<TaskIntake>>>,
    registry: Mutex<Option<Arc<RegistryWriter>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        tasks: Arc<dyn TaskStore>,
        memories: Arc<dyn MemoryStore>,
        objective_mode: Option<ObjectiveMode>,
    ) -> Arc<Self> {
        let hub = Arc::new(MessageHub::new());
        let broadcast = Arc::new(hub.agent_bus(Uuid::new_v4(), "orchestrator"));
        let runtime_governor = RuntimeGovernor::new(config.governor.clone());
        let memory_governor = MemoryGovernor::new(config.memory_governor.clone());

        let objective = objective_mode.map(|mode| {
            ObjectiveService::new(
                mode.objective,
                mode.planner,
                mode.analyzer,
                Arc::clone(&tasks),
                Arc::clone(&memories),
                Arc::clone(&broadcast) as Arc<dyn MailBus>,
                Arc::clone(&runtime_governor),
                config.watermarks.clone(),
            )
        });

        Arc::new(Self {
            config,
            tasks,
            memories,
            hub,
            broadcast,
            directory: Arc::new(ControllerDirectory {
                controllers: RwLock::new(Vec::new()),
            }),
            runtime_governor,
            memory_governor,
            objective,
            supervisor: Mutex::new(None),
            intake: Mutex::new(None),
            registry: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.tasks)
    }

    pub fn hub(&self) -> Arc<MessageHub> {
        Arc::clone(&self.hub)
    }

    pub fn runtime_governor(&self) -> Arc<RuntimeGovernor> {
        Arc::clone(&self.runtime_governor)
    }

    pub async fn agent_snapshots(&self) -> Vec<AgentProfile> {
        self.directory.agent_snapshots().await
    }

    pub async fn task_stats(&self) -> DomainResult<TaskStats> {
        self.tasks.stats().await
    }

    /// Insert a task and announce it.
    pub async fn create_task(&self, task: Task) -> DomainResult<Task> {
        let task = self.tasks.create(task).await?;
        self.broadcast
            .publish(
                Message::new(topics::TASK_CREATED, "orchestrator").with_payload(json!({
                    "task_id": task.id.to_string(),
                    "task_title": task.title.clone(),
                })),
            )
            .await?;
        Ok(task)
    }

    /// Bring the whole runtime up.
    pub async fn start(self: &Arc<Self>) -> DomainResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("orchestrator starting");

        self.memory_governor.start().await;
        self.runtime_governor.start().await?;
        if let Some(objective) = &self.objective {
            self.runtime_governor
                .set_active_objective(objective.objective_id().await)
                .await;
        }

        self.wire_governor_routing().await?;

        // Build the pool in parallel, then start it in parallel.
        let specs = self.agent_specs();
        let pressure = self.memory_governor.subscribe();
        let controller_config = AgentControllerConfig::from_config(&self.config);
        let build_futures = specs.into_iter().map(|(name, skills)| {
            let hub = Arc::clone(&self.hub);
            let tasks = Arc::clone(&self.tasks);
            let memories = Arc::clone(&self.memories);
            let executor_config = self.config.executor.clone();
            let controller_config = controller_config.clone();
            let pressure = pressure.clone();
            async move {
                let profile = AgentProfile::new(name.clone(), skills);
                let bus = Arc::new(hub.agent_bus(profile.id, name)) as Arc<dyn MailBus>;
                let executor = Arc::new(ProcessExecutor::new(executor_config));
                AgentController::new(
                    profile,
                    bus,
                    tasks,
                    memories,
                    executor,
                    controller_config,
                    Some(pressure),
                )
            }
        });
        let controllers: Vec<Arc<AgentController>> = join_all(build_futures).await;

        if self.config.agents.auto_start {
            let start_results =
                join_all(controllers.iter().map(|controller| controller.start())).await;
            for result in start_results {
                result?;
            }
        }
        *self.directory.controllers.write().await = controllers;

        let registry = RegistryWriter::new(
            &self.config.registry.path,
            Arc::clone(&self.directory) as Arc<dyn AgentDirectory>,
            Duration::from_millis(self.config.intervals.registry_ms),
        );
        registry.start().await?;
        *self.registry.lock().await = Some(registry);

        if self.config.intake.enabled {
            let intake = TaskIntake::new(
                &self.config.intake.directory,
                Arc::clone(&self.tasks),
                Arc::clone(&self.broadcast) as Arc<dyn MailBus>,
                self.config.retry.default_max_retries,
                Duration::from_millis(self.config.intervals.intake_poll_ms),
            );
            intake.start().await?;
            *self.intake.lock().await = Some(intake);
        }

        let supervisor = SupervisorReconciler::new(
            Arc::clone(&self.tasks),
            Arc::clone(&self.broadcast) as Arc<dyn MailBus>,
            Arc::clone(&self.directory) as Arc<dyn AgentDirectory>,
            self.objective.clone(),
            SupervisorConfig {
                interval: Duration::from_millis(self.config.intervals.supervisor_ms),
                stall_after: Duration::from_millis(self.config.intervals.stall_after_ms),
            },
        );
        supervisor.start().await;
        *self.supervisor.lock().await = Some(supervisor);

        self.spawn_end_watcher();
        self.spawn_pressure_watcher();

        info!("orchestrator started");
        Ok(())
    }

    fn agent_specs(&self) -> Vec<(String, Vec<String>)> {
        if self.config.agents.roster.is_empty() {
            (0..self.config.agents.count)
                .map(|i| {
                    (
                        format!("{}-{}", self.config.agents.name_prefix, i + 1),
                        self.config.agents.default_skills.clone(),
                    )
                })
                .collect()
        } else {
            self.config
                .agents
                .roster
                .iter()
                .map(|spec| (spec.name.clone(), spec.skills.clone()))
                .collect()
        }
    }

    /// Route terminal task events into the runtime governor. A cycle ends
    /// with exactly one of completed / failed / retry_scheduled.
    async fn wire_governor_routing(&self) -> DomainResult<()> {
        let governor = Arc::clone(&self.runtime_governor);
        let tasks = Arc::clone(&self.tasks);
        self.broadcast
            .subscribe(
                topics::TASK_COMPLETED,
                handler(move |msg: Message| {
                    let governor = Arc::clone(&governor);
                    let tasks = Arc::clone(&tasks);
                    async move {
                        if let Some(task_id) = msg.task_id() {
                            governor.record_task_complete(task_id).await;
                        }
                        governor.record_cycle().await;
                        match tasks.stats().await {
                            Ok(stats) if stats.is_drained() => {
                                governor.signal_all_tasks_complete().await;
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "drain check failed"),
                        }
                    }
                }),
            )
            .await?;

        let governor = Arc::clone(&self.runtime_governor);
        self.broadcast
            .subscribe(
                topics::TASK_FAILED,
                handler(move |msg: Message| {
                    let governor = Arc::clone(&governor);
                    async move {
                        if let Some(task_id) = msg.task_id() {
                            let error = msg.field_str("error").unwrap_or("unknown").to_string();
                            governor.record_task_failed(task_id, &error).await;
                        }
                        governor.record_cycle().await;
                    }
                }),
            )
            .await?;

        let governor = Arc::clone(&self.runtime_governor);
        self.broadcast
            .subscribe(
                topics::TASK_RETRY_SCHEDULED,
                handler(move |_msg: Message| {
                    let governor = Arc::clone(&governor);
                    async move {
                        governor.record_cycle().await;
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Stop the runtime when the governor reaches an end state.
    fn spawn_end_watcher(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut end_rx = self.runtime_governor.subscribe_end();
        tokio::spawn(async move {
            loop {
                if end_rx.borrow().is_some() {
                    break;
                }
                if end_rx.changed().await.is_err() {
                    return;
                }
            }
            let end = *end_rx.borrow();
            if let Some(end) = end {
                info!(end_state = end.as_str(), "governor ended the run");
            }
            this.stop().await;
        });
    }

    /// Escalate critical memory pressure into a shutdown.
    fn spawn_pressure_watcher(self: &Arc<Self>) {
        let governor = Arc::clone(&self.runtime_governor);
        let mut pressure_rx = self.memory_governor.subscribe();
        tokio::spawn(async move {
            loop {
                if *pressure_rx.borrow() == MemoryPressure::Critical {
                    warn!("critical memory pressure, stopping run");
                    governor.stop(EndState::ManualStop).await;
                    return;
                }
                if pressure_rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Wait until the governor reports an end state.
    pub async fn wait_for_end(&self) -> EndState {
        let mut end_rx = self.runtime_governor.subscribe_end();
        loop {
            if let Some(end) = *end_rx.borrow() {
                return end;
            }
            if end_rx.changed().await.is_err() {
                return EndState::ManualStop;
            }
        }
    }

    /// Tear everything down: registry ticker first, then agents (each runs
    /// its full graceful-stop), then the background loops, bus handles,
    /// and a final empty registry snapshot.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator stopping");

        if let Some(registry) = self.registry.lock().await.as_ref() {
            registry.stop().await;
        }

        let controllers: Vec<Arc<AgentController>> =
            self.directory.controllers.read().await.clone();
        join_all(controllers.iter().map(|c| c.graceful_stop())).await;

        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.stop().await;
        }
        if let Some(intake) = self.intake.lock().await.take() {
            intake.stop().await;
        }

        self.hub.shutdown().await;

        if let Some(registry) = self.registry.lock().await.take() {
            if let Err(e) = registry.write_empty().await {
                warn!(error = %e, "final registry write failed");
            }
        }

        self.memory_governor.stop().await;
        self.runtime_governor.stop(EndState::ManualStop).await;
        info!("orchestrator stopped");
    }
}
