//! Mail bus port.
//!
//! Per-agent messaging handle: topic subscriptions with exact-string
//! matching, broadcast publish, heartbeats, acknowledgements, and
//! exclusive resource leases.
//!
//! Delivery is at-least-once; messages from a single producer to a single
//! topic arrive in producer order at each subscriber. Handlers must be
//! idempotent.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{LeaseStatus, Message};

/// An async message handler.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque token identifying one subscription. Unsubscribing requires the
/// exact token handed out at subscribe time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    pub topic: String,
    pub id: u64,
}

/// Messaging capability bound to one agent identity.
#[async_trait]
pub trait MailBus: Send + Sync {
    /// Identity of the agent this handle speaks for.
    fn agent_id(&self) -> Uuid;

    /// Register a handler for messages whose `type` equals `topic` exactly.
    async fn subscribe(&self, topic: &str, handler: MessageHandler)
        -> DomainResult<SubscriptionToken>;

    /// Remove a subscription. Best-effort, but once this returns no further
    /// handler invocation will begin.
    async fn unsubscribe(&self, token: SubscriptionToken) -> DomainResult<()>;

    /// Fan a message out to every subscriber of its topic.
    async fn publish(&self, message: Message) -> DomainResult<()>;

    /// Lightweight liveness signal.
    async fn send_heartbeat(&self) -> DomainResult<()>;

    /// Mark an ack-required message as received.
    async fn acknowledge(&self, message_id: Uuid) -> DomainResult<()>;

    /// Try to take an exclusive lease. Never blocks: `true` iff acquired
    /// (or already held by this agent, which refreshes the expiry).
    async fn acquire_lease(&self, key: &str, ttl_ms: u64) -> DomainResult<bool>;

    /// Who currently holds a lease on `key`, if anyone.
    async fn lease_status(&self, key: &str) -> DomainResult<LeaseStatus>;

    /// Release a lease. No-op unless this agent is the holder.
    async fn release_lease(&self, key: &str) -> DomainResult<()>;
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}
