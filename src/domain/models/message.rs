//! Message and lease domain models for the mail bus.
//!
//! Messages are append-only with at-least-once delivery; subscribers must
//! be idempotent. Leases are short-lived exclusive reservations, keyed by
//! resource (typically a file path), that expire on wall-clock time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Well-known message topics.
pub mod topics {
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_UPDATED: &str = "task.updated";
    pub const TASK_ASSIGNED: &str = "task.assigned";
    pub const TASK_CLAIMED: &str = "task.claimed";
    pub const TASK_PROGRESS: &str = "task.progress";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
    pub const TASK_AVAILABLE: &str = "task.available";
    pub const AGENT_STARTED: &str = "agent.started";
    pub const AGENT_STOPPED: &str = "agent.stopped";
    pub const AGENT_STATUS: &str = "agent.status";
    pub const FILE_LOCK: &str = "file.lock";
    pub const FILE_UNLOCK: &str = "file.unlock";
}

/// A message published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: Uuid,
    /// Topic string, dotted (e.g. `task.claimed`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender identity (agent name or a system component)
    pub from: String,
    /// Addressee, absent for broadcasts
    pub to: Option<String>,
    /// Free-form payload; subscribers must tolerate unknown fields
    pub payload: Map<String, Value>,
    /// When published
    pub timestamp: DateTime<Utc>,
    /// Whether the sender expects an acknowledgement
    pub ack_required: bool,
}

impl Message {
    pub fn new(kind: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            from: from.into(),
            to: None,
            payload: Map::new(),
            timestamp: Utc::now(),
            ack_required: false,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Attach a payload. Non-object values are wrapped under `"value"`.
    pub fn with_payload(mut self, payload: Value) -> Self {
        match payload {
            Value::Object(map) => self.payload = map,
            other => {
                self.payload.insert("value".to_string(), other);
            }
        }
        self
    }

    pub fn with_ack_required(mut self) -> Self {
        self.ack_required = true;
        self
    }

    /// Fetch a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Fetch a payload field as a string.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Fetch a payload field as a u64.
    pub fn field_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// Fetch the task id most task events carry.
    pub fn task_id(&self) -> Option<Uuid> {
        self.field_str("task_id").and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// An exclusive, expiring reservation on a resource key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub resource_key: String,
    pub holder_agent_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(resource_key: impl Into<String>, holder: Uuid, ttl_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            resource_key: resource_key.into(),
            holder_agent_id: holder,
            acquired_at: now,
            expires_at: now + chrono::Duration::milliseconds(ttl_ms as i64),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Answer to a lease query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseStatus {
    pub is_leased: bool,
    pub holder_id: Option<Uuid>,
}

impl LeaseStatus {
    pub fn free() -> Self {
        Self {
            is_leased: false,
            holder_id: None,
        }
    }

    pub fn held_by(holder: Uuid) -> Self {
        Self {
            is_leased: true,
            holder_id: Some(holder),
        }
    }
}
