//! Drives claimed queue messages through the replay engine or the step
//! runner. Workers hold no per-run state: `Scheduler` only owns the shared
//! store/queue/registries, grounded on spec §4.10's "any worker can claim
//! any run's next message" requirement and `worker/pool.rs`'s pool-owns-
//! shared-state shape (stripped of its per-worker task lease bookkeeping,
//! since [`crate::queue::Queue`] already owns message visibility).

mod backpressure;
mod poller;

pub use backpressure::{BackpressureConfig, BackpressureState};
pub use poller::{PollerConfig, PollerError, QueuePoller};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

use crate::codec::Codec;
use crate::crypto::Encryptor;
use crate::event::{Event, EventKind};
use crate::ids::{CorrelationId, RunId, WorkflowName};
use crate::orchestration::{OrchestratorRegistry, ReplayEngine, ReplayOutcome};
use crate::queue::{Queue, QueueError, SendOptions};
use crate::sandbox::Intent;
use crate::step::{ClaimedStep, StepOptions, StepRegistry, StepRunner};
use crate::storage::{EventStore, StoreError};
use crate::trace::TraceCarrier;

pub const WORKFLOW_QUEUE_PREFIX: &str = "workflow:";
pub const STEP_QUEUE_PREFIX: &str = "step:default";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("malformed queue message: {0}")]
    MalformedMessage(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowMessage {
    run_id: RunId,
    #[serde(default, skip_serializing_if = "TraceCarrier::is_empty")]
    trace_carrier: TraceCarrier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepMessage {
    run_id: RunId,
    correlation_id: u32,
}

pub struct Scheduler {
    store: Arc<dyn EventStore>,
    queue: Arc<dyn Queue>,
    codec: Arc<Codec>,
    encryptor: Arc<dyn Encryptor>,
    orchestrators: Arc<OrchestratorRegistry>,
    steps: Arc<StepRegistry>,
    replay: ReplayEngine,
    step_runner: StepRunner,
    deployment_project_id: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn EventStore>,
        queue: Arc<dyn Queue>,
        codec: Arc<Codec>,
        encryptor: Arc<dyn Encryptor>,
        orchestrators: Arc<OrchestratorRegistry>,
        steps: Arc<StepRegistry>,
        step_options: StepOptions,
        deployment_project_id: impl Into<String>,
    ) -> Self {
        let replay = ReplayEngine::new(codec.clone());
        let step_runner = StepRunner::new(codec.clone(), encryptor.clone(), step_options);
        Self {
            store,
            queue,
            codec,
            encryptor,
            orchestrators,
            steps,
            replay,
            step_runner,
            deployment_project_id: deployment_project_id.into(),
        }
    }

    /// Starts a brand-new run: materializes `run_started`, then enqueues the
    /// first workflow message so a worker drives the initial replay pass.
    #[instrument(skip(self, input), fields(run_id = %run_id, workflow = %workflow_name))]
    pub async fn start_run(&self, run_id: RunId, workflow_name: WorkflowName, input: Vec<u8>) -> Result<(), SchedulerError> {
        let ciphertext = self.encryptor.encrypt(&run_id, &self.deployment_project_id, &input).unwrap_or(input);
        self.store.runs_create(run_id, workflow_name.clone(), ciphertext).await?;
        let run = self.store.runs_get(run_id).await?;
        let event = Event::new(run_id, EventKind::RunStarted, None, Vec::new());
        self.store.events_create(run_id, run.next_ordinal, vec![event]).await?;
        self.enqueue_workflow(run_id, &workflow_name, None).await
    }

    async fn enqueue_workflow(&self, run_id: RunId, workflow_name: &WorkflowName, delay: Option<Duration>) -> Result<(), SchedulerError> {
        let message = WorkflowMessage { run_id, trace_carrier: TraceCarrier::capture() };
        let payload = serde_json::to_vec(&message).unwrap();
        let queue_name = format!("{WORKFLOW_QUEUE_PREFIX}{}", workflow_name.as_str());
        let outcome = self.queue.send(&queue_name, payload, SendOptions::default()).await?;
        if let Some(delay) = delay {
            let message_id = match outcome {
                crate::queue::SendOutcome::Sent { message_id } | crate::queue::SendOutcome::Deduped { message_id } => message_id,
            };
            self.queue.change_visibility(&queue_name, &message_id, delay).await?;
        }
        Ok(())
    }

    /// Claims and processes up to `max` workflow messages.
    #[instrument(skip(self), fields(prefix = prefix))]
    pub async fn poll_workflows(&self, prefix: &str, max: usize) -> Result<usize, SchedulerError> {
        let claimed = self.queue.claim(prefix, max).await?;
        let count = claimed.len();
        for (queue_name, message_id, payload, _meta) in claimed {
            self.process_workflow_message(&queue_name, &message_id, &payload).await?;
        }
        Ok(count)
    }

    #[instrument(skip(self, payload), fields(run_id = tracing::field::Empty))]
    async fn process_workflow_message(&self, queue_name: &str, message_id: &str, payload: &[u8]) -> Result<(), SchedulerError> {
        let message: WorkflowMessage =
            serde_json::from_slice(payload).map_err(|e| SchedulerError::MalformedMessage(e.to_string()))?;
        let run_id = message.run_id;
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        if !message.trace_carrier.is_empty() {
            message.trace_carrier.set_as_parent();
        }

        let run = self.store.runs_get(run_id).await?;
        if run.status.is_terminal() {
            self.queue.delete(queue_name, message_id).await?;
            return Ok(());
        }

        let events = self
            .store
            .events_list(run_id, Default::default(), crate::storage::Pagination { offset: 0, limit: i64::MAX }, true)
            .await?;

        let input_plain = self.encryptor.decrypt(&run_id, &self.deployment_project_id, &run.input).unwrap_or_default();
        let input = self.codec.decode_any(&input_plain).unwrap_or(crate::codec::Value::Null);

        let orchestrators = &self.orchestrators;
        let workflow_name = run.workflow_name.clone();
        let outcome = self.replay.drive(run_id, run.created_at, &events, |ctx| {
            orchestrators
                .build_future(&workflow_name, ctx, input)
                .unwrap_or_else(|e| Box::pin(async move { Err(e) }))
        });

        match outcome {
            ReplayOutcome::Completed(output) => {
                let encoded = self.codec.encode(&output).unwrap_or_default();
                let ciphertext = self.encryptor.encrypt(&run_id, &self.deployment_project_id, &encoded).unwrap_or(encoded);
                let event = Event::new(run_id, EventKind::RunCompleted, None, ciphertext);
                let next = self.store.runs_get(run_id).await?.next_ordinal;
                self.store.events_create(run_id, next, vec![event]).await?;
                self.queue.delete(queue_name, message_id).await?;
            }
            ReplayOutcome::Failed(err) => {
                let event = Event::new(run_id, EventKind::RunFailed, None, err.to_string().into_bytes());
                let next = self.store.runs_get(run_id).await?.next_ordinal;
                self.store.events_create(run_id, next, vec![event]).await?;
                self.queue.delete(queue_name, message_id).await?;
            }
            ReplayOutcome::Suspended(intents) => {
                self.apply_intents(run_id, &workflow_name, intents).await?;
                self.queue.delete(queue_name, message_id).await?;
            }
        }

        Ok(())
    }

    async fn apply_intents(&self, run_id: RunId, workflow_name: &WorkflowName, intents: Vec<Intent>) -> Result<(), SchedulerError> {
        for intent in intents {
            match intent {
                Intent::Step { correlation_id, name, args } => {
                    // Read before this pass's own StepScheduled event clears
                    // it: a retry's backoff, set by the prior StepRetrying
                    // event, is what tells the resend below how long to
                    // stay invisible.
                    let retry_after = self.store.steps_get(run_id, correlation_id).await.ok().and_then(|s| s.retry_after);

                    let next = self.store.runs_get(run_id).await?.next_ordinal;
                    let ciphertext = self.encryptor.encrypt(&run_id, &self.deployment_project_id, &args).unwrap_or(args);
                    let event_data = crate::event::pack_step_scheduled(&name, ciphertext);
                    let event = Event::new(run_id, EventKind::StepScheduled, Some(correlation_id), event_data);
                    self.store.events_create(run_id, next, vec![event]).await?;

                    let payload = serde_json::to_vec(&StepMessage { run_id, correlation_id: correlation_id.as_u32() }).unwrap();
                    let outcome = self.queue.send(STEP_QUEUE_PREFIX, payload, SendOptions::default()).await?;
                    if let Some(retry_after) = retry_after {
                        let delay = (retry_after - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        let message_id = match outcome {
                            crate::queue::SendOutcome::Sent { message_id } | crate::queue::SendOutcome::Deduped { message_id } => message_id,
                        };
                        self.queue.change_visibility(STEP_QUEUE_PREFIX, &message_id, delay).await?;
                    }
                }
                Intent::Hook { correlation_id, token } => {
                    let next = self.store.runs_get(run_id).await?.next_ordinal;
                    let event = Event::new(run_id, EventKind::HookCreated, Some(correlation_id), token.into_bytes());
                    self.store.events_create(run_id, next, vec![event]).await?;
                }
                Intent::Wait { correlation_id, fire_at } => {
                    let next = self.store.runs_get(run_id).await?.next_ordinal;
                    let event = Event::new(run_id, EventKind::WaitStarted, Some(correlation_id), Vec::new());
                    self.store.events_create(run_id, next, vec![event]).await?;

                    let delay = (fire_at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    self.enqueue_workflow(run_id, workflow_name, Some(delay)).await?;
                }
            }
        }
        Ok(())
    }

    /// Claims and executes up to `max` step messages.
    #[instrument(skip(self))]
    pub async fn poll_steps(&self, max: usize) -> Result<usize, SchedulerError> {
        let claimed = self.queue.claim(STEP_QUEUE_PREFIX, max).await?;
        let count = claimed.len();
        for (queue_name, message_id, payload, _meta) in claimed {
            self.process_step_message(&queue_name, &message_id, &payload).await?;
        }
        Ok(count)
    }

    #[instrument(skip(self, payload), fields(run_id = tracing::field::Empty, correlation_id = tracing::field::Empty))]
    async fn process_step_message(&self, queue_name: &str, message_id: &str, payload: &[u8]) -> Result<(), SchedulerError> {
        let message: StepMessage =
            serde_json::from_slice(payload).map_err(|e| SchedulerError::MalformedMessage(e.to_string()))?;
        let correlation_id = CorrelationId::from_counter(message.correlation_id);
        let span = tracing::Span::current();
        span.record("run_id", tracing::field::display(message.run_id));
        span.record("correlation_id", message.correlation_id);

        let step_view = self.store.steps_get(message.run_id, correlation_id).await?;
        let run = self.store.runs_get(message.run_id).await?;

        let claimed = ClaimedStep {
            run_id: message.run_id,
            step_id: crate::ids::StepId::from_correlation(correlation_id),
            step_name: step_view.name,
            project_id: self.deployment_project_id.clone(),
            attempt: step_view.attempt,
            args_ciphertext: step_view.args,
        };

        self.step_runner.execute(claimed, &self.steps, self.store.as_ref()).await?;
        self.queue.delete(queue_name, message_id).await?;

        // A retrying step's backoff applies to when the workflow next looks
        // at it too, not just to the step queue's own redelivery — there's
        // no point replaying the orchestrator before the step is due again.
        let retry_after = self.store.steps_get(message.run_id, correlation_id).await.ok().and_then(|s| s.retry_after);
        let delay = retry_after.map(|at| (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO));
        self.enqueue_workflow(message.run_id, &run.workflow_name, delay).await?;
        Ok(())
    }
}

/// Runs `poll_workflows`/`poll_steps` in a loop with adaptive backoff until
/// `shutdown_rx` fires, the shape `worker/pool.rs`'s main loop takes,
/// generalized to two message classes sharing one scheduler. Any worker can
/// run this over the same `Scheduler`; none holds per-run state, so two
/// workers racing to claim the same run's next message is safe — exactly
/// one of them wins the claim.
pub async fn run_forever(scheduler: Arc<Scheduler>, batch_size: usize, poller_config: PollerConfig, shutdown_rx: watch::Receiver<bool>) {
    let mut interval = poller_config.min_interval;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let workflow_count = scheduler.poll_workflows(WORKFLOW_QUEUE_PREFIX, batch_size).await.unwrap_or(0);
        let step_count = scheduler.poll_steps(batch_size).await.unwrap_or(0);

        interval = if workflow_count + step_count == 0 {
            Duration::from_secs_f64(interval.as_secs_f64() * poller_config.backoff_multiplier).min(poller_config.max_interval)
        } else {
            poller_config.min_interval
        };

        let mut shutdown_rx2 = shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx2.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecBuilder, Value};
    use crate::crypto::NoopEncryptor;
    use crate::orchestration::{Orchestrator, OrchestrationContext};
    use crate::queue::InMemoryQueue;
    use crate::step::{always_fatal, StepError};
    use crate::storage::InMemoryEventStore;
    use async_trait::async_trait;
    use serde::{Deserialize as SDeserialize, Serialize as SSerialize};

    #[derive(SSerialize, SDeserialize)]
    struct EchoInput {
        value: i64,
    }

    #[derive(SSerialize, SDeserialize)]
    struct EchoOutput {
        value: i64,
    }

    struct Echo;

    #[async_trait]
    impl Orchestrator for Echo {
        const TYPE: &'static str = "echo";
        type Input = EchoInput;
        type Output = EchoOutput;

        async fn run(&self, ctx: &OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestratorError> {
            let doubled = ctx.step("double", Value::Int(input.value)).await?;
            match doubled {
                Value::Int(n) => Ok(EchoOutput { value: n }),
                _ => Err(OrchestratorError::Custom("unexpected step result".into())),
            }
        }
    }

    fn build_scheduler() -> (Arc<Scheduler>, Arc<InMemoryEventStore>, Arc<InMemoryQueue>) {
        let store = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let codec = Arc::new(CodecBuilder::with_defaults().build());

        let mut orchestrators = OrchestratorRegistry::new();
        orchestrators.register(Echo);

        let mut steps = StepRegistry::new();
        steps.register("double", |v: Value| match v {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            _ => Err(StepError::Failed("expected int".into())),
        });

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            queue.clone(),
            codec,
            Arc::new(NoopEncryptor),
            Arc::new(orchestrators),
            Arc::new(steps),
            StepOptions::new(always_fatal),
            "default",
        ));
        (scheduler, store, queue)
    }

    #[tokio::test]
    async fn drives_a_run_through_suspension_and_completion() {
        let (scheduler, store, _queue) = build_scheduler();
        let codec = CodecBuilder::with_defaults().build();
        let input = codec.encode(&Value::Int(21)).unwrap();

        let run_id = RunId::new();
        scheduler.start_run(run_id, WorkflowName::new("echo"), input).await.unwrap();

        scheduler.poll_workflows(WORKFLOW_QUEUE_PREFIX, 10).await.unwrap();
        let run = store.runs_get(run_id).await.unwrap();
        assert_eq!(run.status, crate::views::RunStatus::Running);

        scheduler.poll_steps(10).await.unwrap();
        scheduler.poll_workflows(WORKFLOW_QUEUE_PREFIX, 10).await.unwrap();

        let run = store.runs_get(run_id).await.unwrap();
        assert_eq!(run.status, crate::views::RunStatus::Completed);
    }

    fn always_transient(_err: &StepError) -> crate::step::Retryable {
        crate::step::Retryable::Transient
    }

    #[tokio::test]
    async fn a_transient_step_failure_delays_both_the_workflow_wakeup_and_the_step_requeue() {
        let store = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let codec = Arc::new(CodecBuilder::with_defaults().build());

        let mut orchestrators = OrchestratorRegistry::new();
        orchestrators.register(Echo);

        let mut steps = StepRegistry::new();
        steps.register("double", |_: Value| Err(StepError::Failed("always fails".into())));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            queue.clone(),
            codec.clone(),
            Arc::new(NoopEncryptor),
            Arc::new(orchestrators),
            Arc::new(steps),
            StepOptions::new(always_transient),
            "default",
        ));

        let input = codec.encode(&Value::Int(21)).unwrap();
        let run_id = RunId::new();
        scheduler.start_run(run_id, WorkflowName::new("echo"), input).await.unwrap();

        scheduler.poll_workflows(WORKFLOW_QUEUE_PREFIX, 10).await.unwrap();
        scheduler.poll_steps(10).await.unwrap();

        let step = store.steps_get(run_id, CorrelationId::from_counter(0)).await.unwrap();
        assert_eq!(step.status, crate::views::StepStatus::Retrying);
        assert_eq!(step.attempt, 1);
        assert!(step.retry_after.is_some_and(|at| at > chrono::Utc::now()));

        // The default exponential policy's first backoff is the initial
        // interval (~1 second), so neither queue should hand back anything
        // claimable yet: the step requeue and the workflow's own wakeup
        // both got pushed out by that same delay.
        assert_eq!(scheduler.poll_workflows(WORKFLOW_QUEUE_PREFIX, 10).await.unwrap(), 0);
        assert_eq!(scheduler.poll_steps(10).await.unwrap(), 0);
    }
}
