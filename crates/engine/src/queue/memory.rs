//! In-memory reference `Queue`, backed by a `tokio::sync::Mutex` over
//! per-queue `VecDeque`s, ages computed from a stored `created_at` — used
//! by tests and the single-process demo path, not meant for production
//! fan-out.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{MessageMeta, Queue, QueueError, SendOptions, SendOutcome};

struct QueuedMessage {
    message_id: String,
    payload: Vec<u8>,
    delivery_count: u32,
    created_at: chrono::DateTime<Utc>,
    visible_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    dedup: HashMap<String, HashMap<String, String>>, // queue -> idempotency_key -> message_id
}

pub struct InMemoryQueue {
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn send(&self, name: &str, payload: Vec<u8>, opts: SendOptions) -> Result<SendOutcome, QueueError> {
        let mut state = self.state.lock().await;

        if let Some(key) = &opts.idempotency_key {
            if let Some(existing) = state.dedup.get(name).and_then(|m| m.get(key)) {
                return Ok(SendOutcome::Deduped { message_id: existing.clone() });
            }
        }

        let message_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        state.queues.entry(name.to_string()).or_default().push_back(QueuedMessage {
            message_id: message_id.clone(),
            payload,
            delivery_count: 0,
            created_at: now,
            visible_at: now,
        });

        if let Some(key) = opts.idempotency_key {
            state.dedup.entry(name.to_string()).or_default().insert(key, message_id.clone());
        }

        Ok(SendOutcome::Sent { message_id })
    }

    async fn change_visibility(&self, name: &str, message_id: &str, timeout: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let queue = state.queues.get_mut(name).ok_or_else(|| QueueError::NotFound(name.to_string()))?;
        let message = queue
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;
        message.visible_at = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(())
    }

    async fn delete(&self, name: &str, message_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(queue) = state.queues.get_mut(name) {
            queue.retain(|m| m.message_id != message_id);
        }
        Ok(())
    }

    async fn claim(&self, prefix: &str, max: usize) -> Result<Vec<(String, String, Vec<u8>, MessageMeta)>, QueueError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut claimed = Vec::new();

        let names: Vec<String> = state.queues.keys().filter(|n| n.starts_with(prefix)).cloned().collect();
        for name in names {
            let queue = state.queues.get_mut(&name).unwrap();
            for message in queue.iter_mut() {
                if claimed.len() >= max {
                    break;
                }
                if message.visible_at > now {
                    continue;
                }
                message.delivery_count += 1;
                message.visible_at = now + chrono::Duration::seconds(30);
                let age = (now - message.created_at).to_std().unwrap_or(Duration::ZERO);
                claimed.push((
                    name.clone(),
                    message.message_id.clone(),
                    message.payload.clone(),
                    MessageMeta {
                        message_id: message.message_id.clone(),
                        delivery_count: message.delivery_count,
                        created_at: message.created_at,
                        age,
                    },
                ));
            }
            if claimed.len() >= max {
                break;
            }
        }

        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduplicates_sends_with_the_same_idempotency_key() {
        let queue = InMemoryQueue::new();
        let opts = SendOptions { deployment_id: None, idempotency_key: Some("order-1".into()) };

        let first = queue.send("workflow:order", b"a".to_vec(), opts.clone()).await.unwrap();
        let second = queue.send("workflow:order", b"b".to_vec(), opts).await.unwrap();

        match (first, second) {
            (SendOutcome::Sent { message_id: a }, SendOutcome::Deduped { message_id: b }) => assert_eq!(a, b),
            other => panic!("expected Sent then Deduped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claims_only_messages_matching_the_prefix() {
        let queue = InMemoryQueue::new();
        queue.send("workflow:order", b"1".to_vec(), SendOptions::default()).await.unwrap();
        queue.send("step:abc", b"2".to_vec(), SendOptions::default()).await.unwrap();

        let claimed = queue.claim("workflow:", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].0, "workflow:order");
    }

    #[tokio::test]
    async fn does_not_reclaim_a_message_before_its_visibility_timeout() {
        let queue = InMemoryQueue::new();
        queue.send("workflow:order", b"1".to_vec(), SendOptions::default()).await.unwrap();

        let first = queue.claim("workflow:", 10).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = queue.claim("workflow:", 10).await.unwrap();
        assert!(second.is_empty());
    }
}
