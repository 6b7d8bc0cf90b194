//! Agent controller: the scheduling and execution loop of one worker.
//!
//! All cycle state is owned by a single actor task fed through a command
//! inbox; bus handlers and the work-poll ticker only send wake-ups, which
//! removes the status-race window between "check idle" and "mark busy".
//! Heartbeat and rich-status tickers run on their own tasks so liveness
//! keeps flowing while a long execution blocks the actor.
//!
//! A cycle is: look for ready work, match skills (acquiring missing ones
//! when the registry allows), win the atomic claim, lease the files the
//! task mentions, execute, then record completion or schedule a retry.
//! The cycle's finally always releases leases and returns the agent to
//! idle, whatever happened in between.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    topics, AgentProfile, AgentStatus, Config, FailureKind, MemoryEntry, MemoryKind, Message,
    RetryConfig, SkillMatch, Task, TaskPatch, TaskStatus,
};
use crate::domain::ports::executor::{ExecutionContext, Executor};
use crate::domain::ports::mail_bus::{handler, MailBus, SubscriptionToken};
use crate::domain::ports::memory_store::MemoryStore;
use crate::domain::ports::task_store::TaskStore;
use crate::services::memory_governor::{MemoryPressure, WorkPermit};

/// Where the agent is inside its current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Analyzing,
    Executing,
    Testing,
    Finalizing,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Executing => "executing",
            Self::Testing => "testing",
            Self::Finalizing => "finalizing",
        }
    }
}

/// Knobs for one controller.
#[derive(Debug, Clone)]
pub struct AgentControllerConfig {
    pub heartbeat_interval: Duration,
    pub status_interval: Duration,
    pub work_poll_interval: Duration,
    pub post_cycle_delay: Duration,
    pub lease_ttl_ms: u64,
    pub retry: RetryConfig,
    pub work_dir: PathBuf,
    pub acquirable_skills: BTreeSet<String>,
    /// How long a throttled agent waits before claiming anyway
    pub throttle_delay: Duration,
}

impl AgentControllerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.intervals.heartbeat_ms),
            status_interval: Duration::from_millis(config.intervals.status_ms),
            work_poll_interval: Duration::from_millis(config.intervals.work_poll_ms),
            post_cycle_delay: Duration::from_millis(config.intervals.post_cycle_delay_ms),
            lease_ttl_ms: config.lease.ttl_ms,
            retry: config.retry.clone(),
            work_dir: PathBuf::from(&config.executor.work_dir),
            acquirable_skills: config.agents.acquirable_skills.iter().cloned().collect(),
            throttle_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
enum AgentCommand {
    Wake,
    Stop(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default)]
struct CycleState {
    phase: Option<AgentPhase>,
    started_at: Option<DateTime<Utc>>,
}

/// One worker agent.
pub struct AgentController {
    profile: Arc<RwLock<AgentProfile>>,
    cycle: Arc<RwLock<CycleState>>,
    bus: Arc<dyn MailBus>,
    tasks: Arc<dyn TaskStore>,
    memories: Arc<dyn MemoryStore>,
    executor: Arc<dyn Executor>,
    config: AgentControllerConfig,
    memory_pressure: Option<watch::Receiver<MemoryPressure>>,
    cmd_tx: mpsc::UnboundedSender<AgentCommand>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<AgentCommand>>>,
    subscriptions: Mutex<Vec<SubscriptionToken>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
    actor: Mutex<Option<JoinHandle<()>>>,
    held_leases: Mutex<Vec<String>>,
    cycle_start: Mutex<Option<Instant>>,
    stopping: CancellationToken,
}

impl AgentController {
    pub fn new(
        profile: AgentProfile,
        bus: Arc<dyn MailBus>,
        tasks: Arc<dyn TaskStore>,
        memories: Arc<dyn MemoryStore>,
        executor: Arc<dyn Executor>,
        config: AgentControllerConfig,
        memory_pressure: Option<watch::Receiver<MemoryPressure>>,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            profile: Arc::new(RwLock::new(profile)),
            cycle: Arc::new(RwLock::new(CycleState::default())),
            bus,
            tasks,
            memories,
            executor,
            config,
            memory_pressure,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            subscriptions: Mutex::new(Vec::new()),
            tickers: Mutex::new(Vec::new()),
            actor: Mutex::new(None),
            held_leases: Mutex::new(Vec::new()),
            cycle_start: Mutex::new(None),
            stopping: CancellationToken::new(),
        })
    }

    pub async fn agent_id(&self) -> Uuid {
        self.profile.read().await.id
    }

    /// Point-in-time copy of the agent's state.
    pub async fn snapshot(&self) -> AgentProfile {
        self.profile.read().await.clone()
    }

    /// Current cycle phase, if a cycle is running.
    pub async fn current_phase(&self) -> Option<AgentPhase> {
        self.cycle.read().await.phase
    }

    /// Subscribe, start tickers, announce, and look for work once.
    pub async fn start(self: &Arc<Self>) -> DomainResult<()> {
        let mut tokens = Vec::new();
        for topic in [topics::TASK_CREATED, topics::TASK_UPDATED, topics::TASK_ASSIGNED] {
            let tx = self.cmd_tx.clone();
            let token = self
                .bus
                .subscribe(
                    topic,
                    handler(move |_msg: Message| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(AgentCommand::Wake);
                        }
                    }),
                )
                .await?;
            tokens.push(token);
        }
        *self.subscriptions.lock().await = tokens;

        let mut tickers = self.tickers.lock().await;
        tickers.push(self.spawn_heartbeat_ticker());
        tickers.push(self.spawn_status_ticker());
        drop(tickers);

        let rx = self
            .cmd_rx
            .lock()
            .await
            .take()
            .ok_or(crate::domain::errors::DomainError::ValidationFailed(
                "agent already started".to_string(),
            ))?;
        let actor = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.actor_loop(rx).await })
        };
        *self.actor.lock().await = Some(actor);

        let profile = self.snapshot().await;
        self.publish_logged(
            Message::new(topics::AGENT_STARTED, profile.name.clone()).with_payload(json!({
                "agent_id": profile.id.to_string(),
                "name": profile.name.clone(),
                "skills": profile.skills.iter().cloned().collect::<Vec<_>>(),
            })),
        )
        .await;

        let _ = self.cmd_tx.send(AgentCommand::Wake);
        info!(agent = %profile.name, "agent started");
        Ok(())
    }

    /// Three-part stop: finish/abort the in-flight cycle, persist a
    /// shutdown memory, then cancel tickers, unsubscribe, announce, and go
    /// offline.
    pub async fn graceful_stop(&self) {
        if self.stopping.is_cancelled() {
            return;
        }
        self.stopping.cancel();

        // Unblock a cycle stuck in the executor; the staged termination
        // runs and the cycle's finally still executes.
        if self.executor.is_executing() {
            self.executor.abort();
        }

        // Only handshake with the actor if start() ever spawned one.
        let actor = self.actor.lock().await.take();
        if let Some(actor) = actor {
            let (ack_tx, ack_rx) = oneshot::channel();
            if self.cmd_tx.send(AgentCommand::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
            let _ = actor.await;
        }

        for ticker in self.tickers.lock().await.drain(..) {
            ticker.abort();
        }

        let tokens: Vec<SubscriptionToken> = self.subscriptions.lock().await.drain(..).collect();
        for token in tokens {
            if let Err(e) = self.bus.unsubscribe(token).await {
                warn!(error = %e, "unsubscribe failed during shutdown");
            }
        }

        let (agent_id, name) = {
            let mut profile = self.profile.write().await;
            profile.status = AgentStatus::Offline;
            profile.current_task = None;
            profile.touch();
            (profile.id, profile.name.clone())
        };
        self.publish_logged(
            Message::new(topics::AGENT_STOPPED, name.clone()).with_payload(json!({
                "agent_id": agent_id.to_string(),
                "name": name.clone(),
            })),
        )
        .await;
        info!(agent = %name, "agent stopped");
    }

    fn spawn_heartbeat_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = this.stopping.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.bus.send_heartbeat().await {
                            warn!(error = %e, "heartbeat failed");
                        }
                        this.profile.write().await.touch();
                    }
                }
            }
        })
    }

    fn spawn_status_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.status_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = this.stopping.cancelled() => break,
                    _ = ticker.tick() => {
                        this.broadcast_status().await;
                        this.profile.write().await.touch();
                    }
                }
            }
        })
    }

    async fn broadcast_status(&self) {
        let profile = self.profile.read().await.clone();
        let cycle = self.cycle.read().await.clone();
        let elapsed_ms = cycle
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64);
        self.publish_logged(
            Message::new(topics::AGENT_STATUS, profile.name.clone()).with_payload(json!({
                "agent_id": profile.id.to_string(),
                "name": profile.name,
                "status": profile.status.as_str(),
                "current_task": profile.current_task.map(|t| t.to_string()),
                "phase": cycle.phase.map(|p| p.as_str()),
                "elapsed_ms": elapsed_ms,
                "skills": profile.skills.iter().cloned().collect::<Vec<_>>(),
                "tasks_completed": profile.stats.tasks_completed,
                "tasks_failed": profile.stats.tasks_failed,
            })),
        )
        .await;
    }

    async fn actor_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<AgentCommand>) {
        let mut poll = tokio::time::interval(self.config.work_poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        poll.tick().await;
        loop {
            tokio::select! {
                maybe_cmd = rx.recv() => match maybe_cmd {
                    Some(AgentCommand::Wake) => self.look_for_work().await,
                    Some(AgentCommand::Stop(ack)) => {
                        self.persist_shutdown_memory().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
                _ = poll.tick() => self.look_for_work().await,
            }
        }
    }

    fn work_permit(&self) -> WorkPermit {
        self.memory_pressure
            .as_ref()
            .map(|rx| rx.borrow().work_permit())
            .unwrap_or(WorkPermit::Proceed)
    }

    /// One discovery pass. Never lets an error escape its tick.
    async fn look_for_work(&self) {
        if self.stopping.is_cancelled() {
            return;
        }
        if self.profile.read().await.status != AgentStatus::Idle {
            return;
        }
        match self.work_permit() {
            WorkPermit::Pause => {
                debug!("claiming paused under memory pressure");
                return;
            }
            WorkPermit::Throttle => tokio::time::sleep(self.config.throttle_delay).await,
            WorkPermit::Proceed => {}
        }

        let ready = match self.tasks.get_ready().await {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "fetching ready tasks failed");
                return;
            }
        };
        if ready.is_empty() {
            return;
        }

        let profile = self.profile.read().await.clone();
        let mut candidates: Vec<(Task, SkillMatch)> = ready
            .into_iter()
            .map(|task| {
                let skill_match = profile.evaluate_skills(&task, &self.config.acquirable_skills);
                (task, skill_match)
            })
            .filter(|(_, m)| m.is_candidate())
            .collect();
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|(ta, ma), (tb, mb)| {
            tb.priority
                .rank()
                .cmp(&ta.priority.rank())
                .then(mb.score.partial_cmp(&ma.score).unwrap_or(std::cmp::Ordering::Equal))
        });

        let alternatives = candidates.len() - 1;
        let (task, skill_match) = candidates.swap_remove(0);

        if skill_match.can_acquire() {
            let mut profile = self.profile.write().await;
            for skill in &skill_match.acquirable {
                info!(agent = %profile.name, skill, "acquiring skill for task");
                profile.learn_skill(skill.clone());
            }
        }

        self.claim_and_execute(task, skill_match, alternatives).await;
    }

    async fn claim_and_execute(&self, task: Task, skill_match: SkillMatch, alternatives: usize) {
        let me = self.profile.read().await.id;
        let claimed = match self.tasks.claim(task.id, me).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!(task_id = %task.id, "lost claim race");
                return;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "claim failed");
                return;
            }
        };

        let name = {
            let mut profile = self.profile.write().await;
            profile.status = AgentStatus::Busy;
            profile.current_task = Some(claimed.id);
            profile.touch();
            profile.name.clone()
        };
        {
            let mut cycle = self.cycle.write().await;
            cycle.phase = Some(AgentPhase::Analyzing);
            cycle.started_at = Some(Utc::now());
        }
        *self.cycle_start.lock().await = Some(Instant::now());

        self.publish_logged(
            Message::new(topics::TASK_CLAIMED, name.clone()).with_payload(json!({
                "task_id": claimed.id.to_string(),
                "task_title": claimed.title.clone(),
                "agent_id": me.to_string(),
                "agent": name,
                "matched_skills": skill_match.matched.clone(),
                "acquired_skills": skill_match.acquirable.clone(),
                "score": skill_match.score,
                "estimated_minutes": claimed.estimated_minutes,
                "priority": claimed.priority.as_str(),
                "alternatives_considered": alternatives,
                "tags": claimed.tags.clone(),
            })),
        )
        .await;

        let outcome = self.run_cycle(&claimed).await;
        if let Err(failure) = outcome {
            self.handle_failure(&claimed, &failure).await;
        }
        self.finish_cycle().await;
    }

    /// Steps 4-9 of the cycle. An `Err` is the failure message to classify.
    async fn run_cycle(&self, task: &Task) -> Result<(), String> {
        let me = self.profile.read().await.id;
        let name = self.profile.read().await.name.clone();

        let memories = match self
            .memories
            .search(&format!("{} {}", task.title, task.description), 5)
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "memory recall failed, continuing without context");
                Vec::new()
            }
        };

        self.progress(task, AgentPhase::Analyzing, 10).await;

        let paths = extract_file_paths(&format!("{} {}", task.title, task.description));
        for path in &paths {
            let acquired = self
                .bus
                .acquire_lease(path, self.config.lease_ttl_ms)
                .await
                .unwrap_or(false);
            if acquired {
                self.held_leases.lock().await.push(path.clone());
            } else {
                let holder = self
                    .bus
                    .lease_status(path)
                    .await
                    .ok()
                    .and_then(|s| s.holder_id)
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.release_held_leases().await;
                return Err(format!("FILE_LOCKED:{path}:{holder}"));
            }
        }
        if !paths.is_empty() {
            self.publish_logged(
                Message::new(topics::FILE_LOCK, name.clone()).with_payload(json!({
                    "task_id": task.id.to_string(),
                    "paths": paths,
                })),
            )
            .await;
        }

        self.cycle.write().await.phase = Some(AgentPhase::Executing);
        self.progress(task, AgentPhase::Executing, 30).await;

        if let Err(e) = self
            .tasks
            .update_owned(
                task.id,
                me,
                TaskPatch::new()
                    .status(TaskStatus::InProgress)
                    .last_attempt_at(Utc::now()),
            )
            .await
        {
            return Err(format!("task update rejected: {e}"));
        }

        let skills: Vec<String> = self.profile.read().await.skills.iter().cloned().collect();
        let context = ExecutionContext {
            task: task.clone(),
            memories,
            work_dir: self.config.work_dir.clone(),
            agent_id: me,
            agent_name: name.clone(),
            agent_skills: skills,
        };
        let result = self
            .executor
            .execute(context)
            .await
            .map_err(|e| e.to_string())?;

        if result.success {
            self.record_success(task, result.duration_ms).await;
            Ok(())
        } else {
            Err(result
                .error
                .unwrap_or_else(|| "execution failed without error detail".to_string()))
        }
    }

    async fn record_success(&self, task: &Task, duration_ms: u64) {
        let me;
        let name;
        {
            let mut profile = self.profile.write().await;
            profile.stats.record_completion(duration_ms);
            profile.touch();
            me = profile.id;
            name = profile.name.clone();
        }
        self.cycle.write().await.phase = Some(AgentPhase::Finalizing);

        let actual_minutes = ((duration_ms as f64) / 60_000.0).round() as u32;
        if let Err(e) = self
            .tasks
            .update_owned(
                task.id,
                me,
                TaskPatch::new()
                    .status(TaskStatus::Completed)
                    .completed_at(Utc::now())
                    .actual_minutes(actual_minutes),
            )
            .await
        {
            warn!(task_id = %task.id, error = %e, "completion update failed");
        }

        let learning = MemoryEntry::new(
            MemoryKind::AgentLearning,
            format!(
                "Completed task '{}' in {} ms; approach and output were accepted.",
                task.title, duration_ms
            ),
        )
        .with_importance(0.6)
        .with_agent(me)
        .with_task(task.id)
        .with_metadata("agent_name", json!(name.clone()));
        if let Err(e) = self.memories.store(learning).await {
            warn!(error = %e, "storing learning memory failed");
        }

        self.publish_logged(
            Message::new(topics::TASK_COMPLETED, name).with_payload(json!({
                "task_id": task.id.to_string(),
                "task_title": task.title.clone(),
                "agent_id": me.to_string(),
                "duration_ms": duration_ms,
                "actual_minutes": actual_minutes,
            })),
        )
        .await;
    }

    async fn handle_failure(&self, task: &Task, message: &str) {
        let kind = FailureKind::classify(message);
        let will_retry = task.retry_count + 1 <= task.max_retries;
        let me;
        let name;
        {
            let mut profile = self.profile.write().await;
            if !will_retry {
                profile.stats.record_failure();
            }
            profile.touch();
            me = profile.id;
            name = profile.name.clone();
        }

        let new_retry_count = task.retry_count + 1;
        if will_retry {
            let patch = TaskPatch::new()
                .status(TaskStatus::Ready)
                .retry_count(new_retry_count)
                .last_error(message)
                .last_attempt_at(Utc::now())
                .failure_type(kind);
            if let Err(e) = self.tasks.update_owned(task.id, me, patch).await {
                warn!(task_id = %task.id, error = %e, "retry re-queue failed");
                return;
            }
            // Advisory only: any agent may claim the task as soon as it is
            // ready again; the delay is realized by polling cadence.
            let backoff_ms = self.config.retry.backoff_ms(task.retry_count);
            self.publish_logged(
                Message::new(topics::TASK_RETRY_SCHEDULED, name).with_payload(json!({
                    "task_id": task.id.to_string(),
                    "task_title": task.title.clone(),
                    "retry_count": new_retry_count,
                    "max_retries": task.max_retries,
                    "next_retry_in_ms": backoff_ms,
                    "failure_type": kind.as_str(),
                    "error": message,
                })),
            )
            .await;
            info!(task_id = %task.id, retry = new_retry_count, backoff_ms, "retry scheduled");
        } else {
            let patch = TaskPatch::new()
                .status(TaskStatus::Failed)
                .retry_count(new_retry_count)
                .last_error(message)
                .last_attempt_at(Utc::now())
                .failure_type(kind);
            if let Err(e) = self.tasks.update_owned(task.id, me, patch).await {
                warn!(task_id = %task.id, error = %e, "failure update failed");
            }
            self.publish_logged(
                Message::new(topics::TASK_FAILED, name).with_payload(json!({
                    "task_id": task.id.to_string(),
                    "task_title": task.title.clone(),
                    "agent_id": me.to_string(),
                    "retry_count": new_retry_count,
                    "failure_type": kind.as_str(),
                    "error": message,
                })),
            )
            .await;
            warn!(task_id = %task.id, failure = kind.as_str(), "task failed permanently");
        }
    }

    /// The cycle's finally: leases released, state reset, idle again, and a
    /// re-poll scheduled shortly after.
    async fn finish_cycle(&self) {
        let released = self.release_held_leases().await;
        let name = {
            let mut profile = self.profile.write().await;
            profile.current_task = None;
            if profile.status == AgentStatus::Busy {
                profile.status = AgentStatus::Idle;
            }
            profile.touch();
            profile.name.clone()
        };
        if !released.is_empty() {
            self.publish_logged(
                Message::new(topics::FILE_UNLOCK, name).with_payload(json!({
                    "paths": released,
                })),
            )
            .await;
        }
        {
            let mut cycle = self.cycle.write().await;
            cycle.phase = None;
            cycle.started_at = None;
        }
        *self.cycle_start.lock().await = None;

        if !self.stopping.is_cancelled() {
            let tx = self.cmd_tx.clone();
            let delay = self.config.post_cycle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(AgentCommand::Wake);
            });
        }
    }

    async fn release_held_leases(&self) -> Vec<String> {
        let held: Vec<String> = self.held_leases.lock().await.drain(..).collect();
        for path in &held {
            if let Err(e) = self.bus.release_lease(path).await {
                warn!(path, error = %e, "lease release failed");
            }
        }
        held
    }

    async fn progress(&self, task: &Task, phase: AgentPhase, percent: u8) {
        let name = self.profile.read().await.name.clone();
        self.publish_logged(
            Message::new(topics::TASK_PROGRESS, name).with_payload(json!({
                "task_id": task.id.to_string(),
                "phase": phase.as_str(),
                "percent": percent,
            })),
        )
        .await;
    }

    async fn persist_shutdown_memory(&self) {
        let profile = self.profile.read().await.clone();
        let entry = MemoryEntry::new(
            MemoryKind::AgentLearning,
            format!(
                "Agent {} shutdown after completing {} tasks ({} failed).",
                profile.name, profile.stats.tasks_completed, profile.stats.tasks_failed
            ),
        )
        .with_agent(profile.id)
        .with_metadata("agent_name", json!(profile.name))
        .with_metadata("shutdown_at", json!(Utc::now().to_rfc3339()));
        if let Err(e) = self.memories.store(entry).await {
            warn!(error = %e, "persisting shutdown memory failed");
        }
    }

    /// Publish failures are logged and swallowed; they never crash the agent.
    async fn publish_logged(&self, message: Message) {
        if let Err(e) = self.bus.publish(message).await {
            warn!(error = %e, "publish failed");
        }
    }
}

static PATH_RE: OnceLock<Regex> = OnceLock::new();

/// Probable file paths mentioned in task text.
///
/// Deliberately conservative: only paths rooted in common source
/// directories count, so prose with slashes does not turn into leases.
pub fn extract_file_paths(text: &str) -> Vec<String> {
    let re = PATH_RE.get_or_init(|| {
        Regex::new(r"\b(?:src|lib|tests?|app|pkg|crates|include|scripts|internal)/[A-Za-z0-9_\-./]*[A-Za-z0-9_\-]\.[A-Za-z0-9]{1,8}\b")
            .expect("path pattern compiles")
    });
    let mut seen = std::collections::HashSet::new();
    let mut paths = Vec::new();
    for capture in re.find_iter(text) {
        let path = capture.as_str().to_string();
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    }
    paths
}
