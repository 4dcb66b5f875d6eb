//! Hook tokens: external rendezvous points a run can suspend on, resumed
//! out-of-band by `resume_hook`/`resume_webhook`.
//!
//! Grounded on `workflow/signal.rs`'s `WorkflowSignal` delivery shape
//! (external payload in, appended as an event, the owning run's queue
//! message re-enqueued so its worker picks the resumption up) generalized
//! from "one signal type enum" to "one token per hook call site". Token
//! generation follows `crypto.rs`'s `rand`+`base64` pairing.

use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use thiserror::Error;

use crate::codec::{Codec, Value};
use crate::event::{Event, EventKind};
use crate::ids::CorrelationId;
use crate::queue::{Queue, QueueError, SendOptions};
use crate::storage::{EventStore, StoreError};
use crate::views::HookView;

const TOKEN_BYTES: usize = 21;

/// Generates a URL-safe, base64-encoded random token from 21 CSPRNG bytes
/// (the same width `nanoid`-style token generators default to).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook token not recognized")]
    UnknownToken,

    #[error("hook already disposed, run no longer awaits it")]
    AlreadyDisposed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// The payload an external caller delivers to resume a suspended hook.
pub struct HookDelivery {
    pub token: String,
    pub payload: Value,
}

/// Resumes a hook: looks it up by token, appends `hook_received` carrying
/// the payload, and nudges the owning run's workflow queue so its worker
/// picks the resumption up on the next claim.
pub struct HookResumer<'a> {
    pub store: &'a dyn EventStore,
    pub queue: &'a dyn Queue,
    pub codec: &'a Codec,
}

impl<'a> HookResumer<'a> {
    pub fn new(store: &'a dyn EventStore, queue: &'a dyn Queue, codec: &'a Codec) -> Self {
        Self { store, queue, codec }
    }

    pub async fn resume(&self, delivery: HookDelivery) -> Result<HookView, HookError> {
        let hook = self.store.hooks_get_by_token(&delivery.token).await.map_err(|e| match e {
            StoreError::HookTokenNotFound => HookError::UnknownToken,
            other => HookError::Store(other),
        })?;

        if hook.is_disposed() {
            return Err(HookError::AlreadyDisposed);
        }

        let encoded = self.codec.encode(&delivery.payload).unwrap_or_default();
        let event = Event::new(hook.run_id, EventKind::HookReceived, Some(hook.correlation_id), encoded);
        let run = self.store.runs_get(hook.run_id).await?;
        self.store.events_create(hook.run_id, run.next_ordinal, vec![event]).await?;

        self.queue
            .send(
                &format!("workflow:{}", run.workflow_name.as_str()),
                hook.run_id.to_string().into_bytes(),
                SendOptions::default(),
            )
            .await?;

        self.store.hooks_get(hook.hook_id).await.map_err(HookError::from)
    }
}

/// Thin wrapper so HTTP webhook callers don't need to construct a `Value`
/// themselves: the raw body is decoded through the codec before the normal
/// hook-resume path runs.
pub async fn resume_webhook<'a>(
    resumer: &HookResumer<'a>,
    token: &str,
    body: &[u8],
) -> Result<HookView, HookError> {
    let payload = resumer.codec.decode_any(body).map_err(|_| HookError::UnknownToken)?;
    resumer.resume(HookDelivery { token: token.to_string(), payload }).await
}

pub fn correlation_for(hook: &HookView) -> CorrelationId {
    hook.correlation_id
}

pub fn unix_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecBuilder;
    use crate::ids::WorkflowName;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryEventStore;

    #[tokio::test]
    async fn resumes_a_hook_and_nudges_the_owning_run_queue() {
        let store = InMemoryEventStore::new();
        let queue = InMemoryQueue::new();
        let codec = CodecBuilder::with_defaults().build();

        let run_id = RunId::new();
        store.runs_create(run_id, WorkflowName::new("onboarding"), vec![]).await.unwrap();

        let run = store.runs_get(run_id).await.unwrap();
        let correlation_id = CorrelationId::from_counter(0);
        let token = generate_token();
        let created = Event::new(run_id, EventKind::HookCreated, Some(correlation_id), token.clone().into_bytes());
        store.events_create(run_id, run.next_ordinal, vec![created]).await.unwrap();

        let resumer = HookResumer::new(&store, &queue, &codec);
        let result = resumer
            .resume(HookDelivery { token: token.clone(), payload: Value::Str("approved".into()) })
            .await
            .unwrap();

        assert!(result.is_disposed());

        let claimed = queue.claim("workflow:", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn rejects_an_unknown_token() {
        let store = InMemoryEventStore::new();
        let queue = InMemoryQueue::new();
        let codec = CodecBuilder::with_defaults().build();
        let resumer = HookResumer::new(&store, &queue, &codec);

        let err = resumer
            .resume(HookDelivery { token: "does-not-exist".into(), payload: Value::Null })
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UnknownToken));
    }
}
