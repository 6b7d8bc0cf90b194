//! In-process message hub and the per-agent bus handles onto it.
//!
//! One `MessageHub` is shared by every agent in the process. Each
//! subscription owns an unbounded channel drained by a dedicated driver
//! task, so handler invocations for one subscription are strictly
//! sequential and publish order per topic is preserved.
//!
//! The hub retains a bounded backlog per topic and a cursor per
//! (topic, subscriber key); a handle that re-subscribes under the same key
//! within the retention window replays the messages it has not seen yet
//! (at-least-once; handlers must tolerate duplicates).
//!
//! Leases live here too: exclusive per key, wall-clock expiry, non-blocking
//! acquire.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Lease, LeaseStatus, Message};
use crate::domain::ports::mail_bus::{MailBus, MessageHandler, SubscriptionToken};

const DEFAULT_RETENTION: usize = 1024;

struct SubscriberEntry {
    key: String,
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct TopicState {
    next_seq: u64,
    retained: VecDeque<(u64, Message)>,
    /// Next sequence each subscriber key should see
    cursors: HashMap<String, u64>,
    subscribers: HashMap<u64, SubscriberEntry>,
}

#[derive(Default)]
struct HubState {
    topics: HashMap<String, TopicState>,
    leases: HashMap<String, Lease>,
    heartbeats: HashMap<Uuid, DateTime<Utc>>,
    acks: HashMap<Uuid, HashSet<Uuid>>,
    next_sub_id: u64,
}

/// Shared in-process message hub.
pub struct MessageHub {
    state: Mutex<HubState>,
    retention: usize,
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHub {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            retention,
        }
    }

    /// A bus handle bound to one agent identity.
    pub fn agent_bus(self: &Arc<Self>, agent_id: Uuid, agent_name: impl Into<String>) -> AgentBus {
        AgentBus {
            agent_id,
            agent_name: agent_name.into(),
            hub: Arc::clone(self),
        }
    }

    pub async fn subscribe(
        &self,
        topic: &str,
        subscriber_key: &str,
        handler: MessageHandler,
    ) -> SubscriptionToken {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let closed = Arc::new(AtomicBool::new(false));
        let driver_closed = Arc::clone(&closed);
        let driver = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if driver_closed.load(Ordering::Acquire) {
                    break;
                }
                handler(msg).await;
            }
        });

        let mut state = self.state.lock().await;
        let id = state.next_sub_id;
        state.next_sub_id += 1;
        let topic_state = state.topics.entry(topic.to_string()).or_default();

        // Replay anything this subscriber key has not seen yet.
        let cursor = topic_state
            .cursors
            .get(subscriber_key)
            .copied()
            .unwrap_or(0);
        for (seq, msg) in &topic_state.retained {
            if *seq >= cursor {
                let _ = tx.send(msg.clone());
            }
        }
        let caught_up = topic_state.next_seq;
        topic_state
            .cursors
            .insert(subscriber_key.to_string(), caught_up);

        topic_state.subscribers.insert(
            id,
            SubscriberEntry {
                key: subscriber_key.to_string(),
                tx,
                closed,
                driver: Some(driver),
            },
        );

        SubscriptionToken {
            topic: topic.to_string(),
            id,
        }
    }

    pub async fn unsubscribe(&self, token: SubscriptionToken) {
        let entry = {
            let mut state = self.state.lock().await;
            state
                .topics
                .get_mut(&token.topic)
                .and_then(|t| t.subscribers.remove(&token.id))
        };
        if let Some(mut entry) = entry {
            entry.closed.store(true, Ordering::Release);
            drop(entry.tx);
            if let Some(driver) = entry.driver.take() {
                // The driver finishes the in-flight handler (if any) and
                // exits; nothing starts after this await returns.
                let _ = driver.await;
            }
        }
    }

    pub async fn publish(&self, message: Message) {
        let mut state = self.state.lock().await;
        let retention = self.retention;
        let topic_state = state.topics.entry(message.kind.clone()).or_default();
        let seq = topic_state.next_seq;
        topic_state.next_seq += 1;

        topic_state.retained.push_back((seq, message.clone()));
        while topic_state.retained.len() > retention {
            topic_state.retained.pop_front();
        }

        let mut advanced: Vec<String> = Vec::new();
        for entry in topic_state.subscribers.values() {
            let _ = entry.tx.send(message.clone());
            advanced.push(entry.key.clone());
        }
        for key in advanced {
            topic_state.cursors.insert(key, seq + 1);
        }
    }

    pub async fn record_heartbeat(&self, agent_id: Uuid) {
        let mut state = self.state.lock().await;
        state.heartbeats.insert(agent_id, Utc::now());
    }

    pub async fn last_heartbeat(&self, agent_id: Uuid) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.heartbeats.get(&agent_id).copied()
    }

    pub async fn acknowledge(&self, message_id: Uuid, agent_id: Uuid) {
        let mut state = self.state.lock().await;
        state.acks.entry(message_id).or_default().insert(agent_id);
    }

    pub async fn acknowledged_by(&self, message_id: Uuid) -> HashSet<Uuid> {
        let state = self.state.lock().await;
        state.acks.get(&message_id).cloned().unwrap_or_default()
    }

    pub async fn acquire_lease(&self, key: &str, holder: Uuid, ttl_ms: u64) -> bool {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        match state.leases.get(key) {
            Some(lease) if !lease.is_expired(now) && lease.holder_agent_id != holder => false,
            _ => {
                state
                    .leases
                    .insert(key.to_string(), Lease::new(key, holder, ttl_ms));
                true
            }
        }
    }

    pub async fn lease_status(&self, key: &str) -> LeaseStatus {
        let state = self.state.lock().await;
        match state.leases.get(key) {
            Some(lease) if !lease.is_expired(Utc::now()) => {
                LeaseStatus::held_by(lease.holder_agent_id)
            }
            _ => LeaseStatus::free(),
        }
    }

    pub async fn release_lease(&self, key: &str, holder: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(lease) = state.leases.get(key) {
            if lease.holder_agent_id == holder {
                state.leases.remove(key);
            }
        }
    }

    /// Active subscriptions on a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    /// Tear down every subscription. Used at orchestrator stop. Unlike
    /// `unsubscribe`, already-queued messages are still delivered before
    /// each driver exits.
    pub async fn shutdown(&self) {
        let entries: Vec<SubscriberEntry> = {
            let mut state = self.state.lock().await;
            state
                .topics
                .values_mut()
                .flat_map(|t| t.subscribers.drain().map(|(_, e)| e))
                .collect()
        };
        for mut entry in entries {
            drop(entry.tx);
            if let Some(driver) = entry.driver.take() {
                let _ = driver.await;
            }
        }
    }
}

/// [`MailBus`] handle bound to one agent.
#[derive(Clone)]
pub struct AgentBus {
    agent_id: Uuid,
    agent_name: String,
    hub: Arc<MessageHub>,
}

impl AgentBus {
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn hub(&self) -> &Arc<MessageHub> {
        &self.hub
    }
}

#[async_trait]
impl MailBus for AgentBus {
    fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> DomainResult<SubscriptionToken> {
        Ok(self.hub.subscribe(topic, &self.agent_name, handler).await)
    }

    async fn unsubscribe(&self, token: SubscriptionToken) -> DomainResult<()> {
        self.hub.unsubscribe(token).await;
        Ok(())
    }

    async fn publish(&self, message: Message) -> DomainResult<()> {
        self.hub.publish(message).await;
        Ok(())
    }

    async fn send_heartbeat(&self) -> DomainResult<()> {
        self.hub.record_heartbeat(self.agent_id).await;
        Ok(())
    }

    async fn acknowledge(&self, message_id: Uuid) -> DomainResult<()> {
        self.hub.acknowledge(message_id, self.agent_id).await;
        Ok(())
    }

    async fn acquire_lease(&self, key: &str, ttl_ms: u64) -> DomainResult<bool> {
        Ok(self.hub.acquire_lease(key, self.agent_id, ttl_ms).await)
    }

    async fn lease_status(&self, key: &str) -> DomainResult<LeaseStatus> {
        Ok(self.hub.lease_status(key).await)
    }

    async fn release_lease(&self, key: &str) -> DomainResult<()> {
        self.hub.release_lease(key, self.agent_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::topics;
    use crate::domain::ports::handler;
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    fn collector() -> (Arc<TokioMutex<Vec<Message>>>, MessageHandler) {
        let seen: Arc<TokioMutex<Vec<Message>>> = Arc::new(TokioMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let h = handler(move |msg| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(msg);
            }
        });
        (seen, h)
    }

    async fn wait_for_len(seen: &Arc<TokioMutex<Vec<Message>>>, n: usize) {
        for _ in 0..200 {
            if seen.lock().await.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("collector never reached {n} messages");
    }

    #[tokio::test]
    async fn test_publish_delivers_in_order() {
        let hub = Arc::new(MessageHub::new());
        let bus = hub.agent_bus(Uuid::new_v4(), "a1");
        let (seen, h) = collector();
        bus.subscribe(topics::TASK_CREATED, h).await.unwrap();

        for i in 0..5 {
            bus.publish(
                Message::new(topics::TASK_CREATED, "producer")
                    .with_payload(serde_json::json!({ "n": i })),
            )
            .await
            .unwrap();
        }
        wait_for_len(&seen, 5).await;

        let seen = seen.lock().await;
        let order: Vec<u64> = seen.iter().filter_map(|m| m.field_u64("n")).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_exact_topic_matching() {
        let hub = Arc::new(MessageHub::new());
        let bus = hub.agent_bus(Uuid::new_v4(), "a1");
        let (seen, h) = collector();
        bus.subscribe(topics::TASK_CREATED, h).await.unwrap();

        bus.publish(Message::new(topics::TASK_UPDATED, "p")).await.unwrap();
        bus.publish(Message::new(topics::TASK_CREATED, "p")).await.unwrap();
        wait_for_len(&seen, 1).await;

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, topics::TASK_CREATED);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = Arc::new(MessageHub::new());
        let bus = hub.agent_bus(Uuid::new_v4(), "a1");
        let (seen, h) = collector();
        let token = bus.subscribe(topics::TASK_CREATED, h).await.unwrap();

        bus.publish(Message::new(topics::TASK_CREATED, "p")).await.unwrap();
        wait_for_len(&seen, 1).await;

        bus.unsubscribe(token).await.unwrap();
        assert_eq!(hub.subscriber_count(topics::TASK_CREATED).await, 0);

        bus.publish(Message::new(topics::TASK_CREATED, "p")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_replays_unread() {
        let hub = Arc::new(MessageHub::new());
        let bus = hub.agent_bus(Uuid::new_v4(), "a1");
        let (seen, h) = collector();
        let token = bus.subscribe(topics::TASK_CREATED, h).await.unwrap();

        bus.publish(Message::new(topics::TASK_CREATED, "p")).await.unwrap();
        wait_for_len(&seen, 1).await;
        bus.unsubscribe(token).await.unwrap();

        // Published while "restarted": unread for subscriber key "a1".
        bus.publish(Message::new(topics::TASK_CREATED, "p")).await.unwrap();
        bus.publish(Message::new(topics::TASK_CREATED, "p")).await.unwrap();

        let (seen2, h2) = collector();
        bus.subscribe(topics::TASK_CREATED, h2).await.unwrap();
        wait_for_len(&seen2, 2).await;
        assert_eq!(seen2.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_lease_exclusive_and_release() {
        let hub = Arc::new(MessageHub::new());
        let a = hub.agent_bus(Uuid::new_v4(), "a");
        let b = hub.agent_bus(Uuid::new_v4(), "b");

        assert!(a.acquire_lease("src/a.ts", 120_000).await.unwrap());
        assert!(!b.acquire_lease("src/a.ts", 120_000).await.unwrap());

        let status = b.lease_status("src/a.ts").await.unwrap();
        assert!(status.is_leased);
        assert_eq!(status.holder_id, Some(a.agent_id()));

        // Release by a non-holder is a no-op.
        b.release_lease("src/a.ts").await.unwrap();
        assert!(a.lease_status("src/a.ts").await.unwrap().is_leased);

        a.release_lease("src/a.ts").await.unwrap();
        assert!(!b.lease_status("src/a.ts").await.unwrap().is_leased);
        assert!(b.acquire_lease("src/a.ts", 120_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_reacquire_by_holder_refreshes() {
        let hub = Arc::new(MessageHub::new());
        let a = hub.agent_bus(Uuid::new_v4(), "a");
        assert!(a.acquire_lease("k", 120_000).await.unwrap());
        assert!(a.acquire_lease("k", 120_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_claimable() {
        let hub = Arc::new(MessageHub::new());
        let a = hub.agent_bus(Uuid::new_v4(), "a");
        let b = hub.agent_bus(Uuid::new_v4(), "b");

        assert!(a.acquire_lease("k", 10).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!b.lease_status("k").await.unwrap().is_leased);
        assert!(b.acquire_lease("k", 120_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_and_ack() {
        let hub = Arc::new(MessageHub::new());
        let id = Uuid::new_v4();
        let bus = hub.agent_bus(id, "a");

        assert!(hub.last_heartbeat(id).await.is_none());
        bus.send_heartbeat().await.unwrap();
        assert!(hub.last_heartbeat(id).await.is_some());

        let msg_id = Uuid::new_v4();
        bus.acknowledge(msg_id).await.unwrap();
        assert!(hub.acknowledged_by(msg_id).await.contains(&id));
    }
}
