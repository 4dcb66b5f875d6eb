//! Drives one orchestrator exactly once against a prefix of its event log.
//!
//! Keeps the teacher's engine shape — a replay loop that walks the event
//! log and a single outcome summary per pass — and replaces only the
//! per-event-type callback dispatch `engine/executor.rs::process_workflow`
//! used, with the capability-future resolution rules spec §4.7 step 3
//! describes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use chrono::Utc;
use tracing::instrument;

use crate::codec::Codec;
use crate::event::{Event, EventKind};
use crate::ids::{CorrelationId, RunId};
use crate::sandbox::{GlobalBag, Intent};

use super::context::{OrchestrationContext, OrchestratorError, ResolvedCall};
use super::noop_waker::noop_waker;

#[derive(Debug)]
pub enum ReplayOutcome<Output> {
    Completed(Output),
    Failed(OrchestratorError),
    Suspended(Vec<Intent>),
}

/// Builds the `correlation_id -> resolved outcome` index a
/// [`OrchestrationContext`] resolves capability futures against (spec
/// §4.7 step 1): the last event for a given correlation id wins, since the
/// log only ever appends monotonically-progressing states for one call.
pub fn build_index(codec: &Codec, events: &[Event]) -> HashMap<CorrelationId, ResolvedCall> {
    let mut index: HashMap<CorrelationId, ResolvedCall> = HashMap::new();

    for event in events {
        let Some(correlation_id) = event.correlation_id else { continue };

        match event.event_type {
            EventKind::StepCompleted => {
                let value = codec.decode_any(&event.event_data).unwrap_or(crate::codec::Value::Null);
                index.insert(correlation_id, ResolvedCall::StepCompleted(value));
            }
            EventKind::StepFailed => {
                let message = String::from_utf8_lossy(&event.event_data).into_owned();
                index.insert(correlation_id, ResolvedCall::StepFailed(message));
            }
            EventKind::HookCreated => {
                let token = String::from_utf8_lossy(&event.event_data).into_owned();
                index
                    .entry(correlation_id)
                    .and_modify(|r| {
                        if let ResolvedCall::HookCreated { token: t, .. } = r {
                            *t = token.clone();
                        }
                    })
                    .or_insert(ResolvedCall::HookCreated { token, received: None });
            }
            EventKind::HookReceived => {
                let value = codec.decode_any(&event.event_data).unwrap_or(crate::codec::Value::Null);
                index
                    .entry(correlation_id)
                    .and_modify(|r| {
                        if let ResolvedCall::HookCreated { received, .. } = r {
                            *received = Some(value.clone());
                        }
                    })
                    .or_insert(ResolvedCall::HookCreated { token: String::new(), received: Some(value) });
            }
            EventKind::WaitFired => {
                index.insert(correlation_id, ResolvedCall::WaitFired(event.created_at));
            }
            _ => {}
        }
    }

    index
}

pub struct ReplayEngine {
    codec: Arc<Codec>,
}

impl ReplayEngine {
    pub fn new(codec: Arc<Codec>) -> Self {
        Self { codec }
    }

    /// Polls `orchestrator.run(ctx, input)` exactly once with a no-op
    /// waker. Correct because every capability future's `poll` is itself
    /// synchronous (resolve from the index, or record an intent and park
    /// forever) — see module docs on [`super::noop_waker`].
    #[instrument(skip(self, run_created_at, events, make_future), fields(run_id = %run_id, events = events.len()))]
    pub fn drive<F, Output>(
        &self,
        run_id: RunId,
        run_created_at: chrono::DateTime<Utc>,
        events: &[Event],
        make_future: F,
    ) -> ReplayOutcome<Output>
    where
        F: for<'a> FnOnce(&'a OrchestrationContext) -> Pin<Box<dyn Future<Output = Result<Output, OrchestratorError>> + 'a>>,
    {
        let index = build_index(&self.codec, events);
        let globals = GlobalBag::new(run_id, run_created_at, events.len() as u32);
        let ctx = OrchestrationContext::new(index, self.codec.clone(), globals);

        let mut future = make_future(&ctx);
        let waker = noop_waker();
        let mut task_cx = TaskContext::from_waker(&waker);

        match future.as_mut().poll(&mut task_cx) {
            Poll::Ready(Ok(output)) => ReplayOutcome::Completed(output),
            Poll::Ready(Err(err)) => ReplayOutcome::Failed(err),
            Poll::Pending => {
                drop(future);
                ReplayOutcome::Suspended(ctx.take_intents())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecBuilder, Value};
    use crate::ids::EventId;

    fn codec() -> Arc<Codec> {
        Arc::new(CodecBuilder::with_defaults().build())
    }

    #[test]
    fn completes_when_no_capability_is_awaited() {
        let engine = ReplayEngine::new(codec());
        let run_id = RunId::new();

        let outcome = engine.drive(run_id, Utc::now(), &[], |_ctx| {
            Box::pin(async move { Ok::<_, OrchestratorError>(42) })
        });

        assert!(matches!(outcome, ReplayOutcome::Completed(42)));
    }

    #[test]
    fn suspends_on_first_unresolved_step() {
        let engine = ReplayEngine::new(codec());
        let run_id = RunId::new();

        let outcome = engine.drive(run_id, Utc::now(), &[], |ctx| {
            Box::pin(async move {
                ctx.step("charge_card", Value::Int(100)).await?;
                Ok::<_, OrchestratorError>(())
            })
        });

        match outcome {
            ReplayOutcome::Suspended(intents) => assert_eq!(intents.len(), 1),
            other => panic!("expected suspension, got {other:?}"),
        }
    }

    #[test]
    fn resumes_past_a_resolved_step_on_the_next_drive() {
        let engine = ReplayEngine::new(codec());
        let run_id = RunId::new();
        let codec_ref = codec();

        let mut event = Event::new(run_id, EventKind::StepCompleted, Some(CorrelationId::from_counter(0)), vec![]);
        event.event_id = EventId::new();
        event.event_data = codec_ref.encode(&Value::Int(7)).unwrap();

        let outcome = engine.drive(run_id, Utc::now(), std::slice::from_ref(&event), |ctx| {
            Box::pin(async move {
                let result = ctx.step("charge_card", Value::Int(100)).await?;
                Ok::<_, OrchestratorError>(result)
            })
        });

        match outcome {
            ReplayOutcome::Completed(Value::Int(7)) => {}
            other => panic!("expected Completed(Int(7)), got {other:?}"),
        }
    }
}
