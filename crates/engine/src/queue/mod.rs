//! Named queues, idempotency-keyed deduplication, and the bounded-lifetime
//! visibility-timeout contract spec §4.4 describes.

mod lifetime;
mod memory;

pub use lifetime::{LifetimeDecision, LifetimeManager};
pub use memory::InMemoryQueue;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} not found")]
    NotFound(String),

    #[error("message {0} not found")]
    MessageNotFound(String),
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub deployment_id: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    /// A prior send with the same idempotency key already succeeded.
    /// Callers must not depend on this id per spec's explicit contract.
    Deduped { message_id: String },
}

/// What a [`QueueHandler`] tells the queue to do after processing a
/// message: acknowledge (default success path) or request redelivery after
/// a delay it computes itself (e.g. from `step.retry_after`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerOutcome {
    Ack,
    RequestRedelivery { timeout_seconds: u64 },
}

/// Metadata handed to a handler alongside its payload — spec §6's "queue
/// payloads" wire contract.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub message_id: String,
    pub delivery_count: u32,
    pub created_at: DateTime<Utc>,
    pub age: Duration,
}

#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>, meta: MessageMeta) -> HandlerOutcome;
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, name: &str, payload: Vec<u8>, opts: SendOptions) -> Result<SendOutcome, QueueError>;

    /// Changes a claimed message's visibility timeout, applying the
    /// clamp/re-enqueue algorithm in [`LifetimeManager`]. `message_id`
    /// identifies the message a worker currently leases.
    async fn change_visibility(&self, name: &str, message_id: &str, timeout: Duration) -> Result<(), QueueError>;

    async fn delete(&self, name: &str, message_id: &str) -> Result<(), QueueError>;

    /// Claims up to `max` messages currently visible on queues whose name
    /// starts with `prefix`.
    async fn claim(&self, prefix: &str, max: usize) -> Result<Vec<(String, String, Vec<u8>, MessageMeta)>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_outcome_round_trips_through_json() {
        let outcome = HandlerOutcome::RequestRedelivery { timeout_seconds: 30 };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: HandlerOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
    }
}
