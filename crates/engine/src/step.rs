//! Step execution: hydrate args, invoke the handler, commit the outcome.
//!
//! `StepRegistry` is grounded on `engine/registry.rs`'s factory-map
//! pattern, generalized from "JSON workflow factory" to "`Value` step
//! handler factory". At-most-once commitment is the store's job, not this
//! module's: `EventStore::events_create` silently no-ops a second terminal
//! event for a correlation id that already has one, checked atomically
//! with the append (a locked map scan in-memory, `ON CONFLICT` on Postgres).
//! `execute` itself makes no such check before committing — a check here
//! and the store's own guard running separately would leave the same race
//! the guard exists to close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::codec::{Codec, Value};
use crate::crypto::Encryptor;
use crate::event::{Event, EventKind};
use crate::ids::{RunId, StepId};
use crate::reliability::RetryPolicy;
use crate::storage::{EventStore, StoreError};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),
}

/// Whether a failed step attempt should be retried. Left to a
/// caller-supplied classifier (spec's Open Question, decided: no default
/// policy is shipped — see DESIGN.md). [`always_fatal`] is provided as the
/// explicit "never retry" default callers can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryable {
    Transient,
    Fatal,
}

pub fn always_fatal(_err: &StepError) -> Retryable {
    Retryable::Fatal
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, StepError>;
}

#[async_trait]
impl<F> StepHandler for F
where
    F: Fn(Value) -> Result<Value, StepError> + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, StepError> {
        self(args)
    }
}

#[derive(Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl StepHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

pub type RetryClassifier = fn(&StepError) -> Retryable;

pub struct StepOptions {
    pub retry_policy: RetryPolicy,
    pub retry_classifier: RetryClassifier,
}

impl StepOptions {
    pub fn new(retry_classifier: RetryClassifier) -> Self {
        Self { retry_policy: RetryPolicy::exponential(), retry_classifier }
    }
}

/// One claimed step invocation: the args/handler are already resolved by
/// the scheduler, this struct just carries what the runner needs to act.
#[derive(Debug)]
pub struct ClaimedStep {
    pub run_id: RunId,
    pub step_id: StepId,
    pub step_name: String,
    pub project_id: String,
    pub attempt: u32,
    pub args_ciphertext: Vec<u8>,
}

pub struct StepRunner {
    codec: Arc<Codec>,
    encryptor: Arc<dyn Encryptor>,
    options: StepOptions,
}

impl StepRunner {
    pub fn new(codec: Arc<Codec>, encryptor: Arc<dyn Encryptor>, options: StepOptions) -> Self {
        Self { codec, encryptor, options }
    }

    #[instrument(skip(self, registry, store), fields(run_id = %claimed.run_id, step = %claimed.step_name, attempt = claimed.attempt))]
    pub async fn execute(
        &self,
        claimed: ClaimedStep,
        registry: &StepRegistry,
        store: &dyn EventStore,
    ) -> Result<(), StoreError> {
        let correlation_id = claimed.step_id.correlation_id();

        let Some(handler) = registry.get(&claimed.step_name) else {
            return self.commit_failure(&claimed, store, "no handler registered for this step name".into()).await;
        };

        let plaintext = match self.encryptor.decrypt(&claimed.run_id, &claimed.project_id, &claimed.args_ciphertext) {
            Ok(p) => p,
            Err(e) => return self.commit_failure(&claimed, store, format!("decrypt failed: {e}")).await,
        };
        let args = match self.codec.decode_any(&plaintext) {
            Ok(v) => v,
            Err(e) => return self.commit_failure(&claimed, store, format!("decode failed: {e}")).await,
        };

        match handler.call(args).await {
            Ok(result) => {
                let encoded = self.codec.encode(&result).unwrap_or_default();
                let ciphertext = self
                    .encryptor
                    .encrypt(&claimed.run_id, &claimed.project_id, &encoded)
                    .unwrap_or(encoded);
                let event = Event::new(claimed.run_id, EventKind::StepCompleted, Some(correlation_id), ciphertext);
                store.events_create(claimed.run_id, next_ordinal(store, claimed.run_id).await?, vec![event]).await?;
                Ok(())
            }
            Err(err) => {
                let retryable = (self.options.retry_classifier)(&err);
                // `claimed.attempt` counts prior attempts (0 before the
                // first try); `RetryPolicy` numbers attempts from 1, so the
                // try that just failed is `claimed.attempt + 1` and, if
                // retried, the next one is one past that.
                let attempt_number = claimed.attempt + 1;
                if retryable == Retryable::Transient && self.options.retry_policy.has_attempts_remaining(attempt_number) {
                    let delay = self.options.retry_policy.delay_for_attempt(attempt_number + 1);
                    self.commit_retry(&claimed, store, delay).await
                } else {
                    self.commit_failure(&claimed, store, err.to_string()).await
                }
            }
        }
    }

    async fn commit_failure(&self, claimed: &ClaimedStep, store: &dyn EventStore, message: String) -> Result<(), StoreError> {
        let event = Event::new(claimed.run_id, EventKind::StepFailed, Some(claimed.step_id.correlation_id()), message.into_bytes());
        store.events_create(claimed.run_id, next_ordinal(store, claimed.run_id).await?, vec![event]).await?;
        Ok(())
    }

    async fn commit_retry(&self, claimed: &ClaimedStep, store: &dyn EventStore, delay: Duration) -> Result<(), StoreError> {
        let retry_after = chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let event_data = crate::event::pack_step_retrying(retry_after);
        let event = Event::new(claimed.run_id, EventKind::StepRetrying, Some(claimed.step_id.correlation_id()), event_data);
        store.events_create(claimed.run_id, next_ordinal(store, claimed.run_id).await?, vec![event]).await?;
        Ok(())
    }
}

async fn next_ordinal(store: &dyn EventStore, run_id: RunId) -> Result<i64, StoreError> {
    Ok(store.runs_get(run_id).await?.next_ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopEncryptor;
    use crate::storage::InMemoryEventStore;

    fn codec() -> Arc<Codec> {
        Arc::new(crate::codec::CodecBuilder::with_defaults().build())
    }

    #[tokio::test]
    async fn commits_step_completed_on_success() {
        let store = InMemoryEventStore::new();
        let run_id = RunId::new();
        store.runs_create(run_id, crate::ids::WorkflowName::new("demo"), vec![]).await.unwrap();

        let codec = codec();
        let mut registry = StepRegistry::new();
        registry.register("double", |v: Value| match v {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            _ => Err(StepError::Failed("expected int".into())),
        });

        let args = codec.encode(&Value::Int(21)).unwrap();
        let claimed = ClaimedStep {
            run_id,
            step_id: StepId::from_correlation(CorrelationId::from_counter(0)),
            step_name: "double".into(),
            project_id: "proj-1".into(),
            attempt: 0,
            args_ciphertext: args,
        };

        let runner = StepRunner::new(codec, Arc::new(NoopEncryptor), StepOptions::new(always_fatal));
        runner.execute(claimed, &registry, &store).await.unwrap();

        let events = store
            .events_list_by_correlation_id(run_id, CorrelationId::from_counter(0))
            .await
            .unwrap();
        assert!(events.iter().any(|e| e.event_type == EventKind::StepCompleted));
    }

    #[tokio::test]
    async fn second_delivery_of_a_completed_step_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let run_id = RunId::new();
        store.runs_create(run_id, crate::ids::WorkflowName::new("demo"), vec![]).await.unwrap();

        let codec = codec();
        let mut registry = StepRegistry::new();
        registry.register("double", |v: Value| match v {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            _ => Err(StepError::Failed("expected int".into())),
        });

        let args = codec.encode(&Value::Int(5)).unwrap();
        let make_claim = || ClaimedStep {
            run_id,
            step_id: StepId::from_correlation(CorrelationId::from_counter(0)),
            step_name: "double".into(),
            project_id: "proj-1".into(),
            attempt: 0,
            args_ciphertext: args.clone(),
        };

        let runner = StepRunner::new(codec, Arc::new(NoopEncryptor), StepOptions::new(always_fatal));
        runner.execute(make_claim(), &registry, &store).await.unwrap();
        runner.execute(make_claim(), &registry, &store).await.unwrap();

        let events = store
            .events_list_by_correlation_id(run_id, CorrelationId::from_counter(0))
            .await
            .unwrap();
        assert_eq!(events.iter().filter(|e| e.event_type == EventKind::StepCompleted).count(), 1);
    }
}
