//! `OrchestrationContext`: hands out the three capability futures an
//! orchestrator awaits, each keyed by a `CorrelationId` assigned
//! deterministically from an incrementing call-site counter local to one
//! replay. Simplified from the `rivet` reference example's cursor/location
//! addressing down to spec's "incrementing local counter".

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::codec::{Codec, Value};
use crate::ids::CorrelationId;
use crate::sandbox::{GlobalBag, Intent};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("step {name} failed: {message}")]
    StepFailed { name: String, message: String },

    #[error("run was cancelled")]
    Cancelled,

    #[error("{0}")]
    Custom(String),
}

/// What the replay index has on file for one correlation id, resolved by
/// [`crate::orchestration::replay::build_index`] from the event log.
#[derive(Debug, Clone)]
pub enum ResolvedCall {
    StepCompleted(Value),
    StepFailed(String),
    HookCreated { token: String, received: Option<Value> },
    WaitFired(DateTime<Utc>),
}

pub struct OrchestrationContext {
    index: HashMap<CorrelationId, ResolvedCall>,
    counter: RefCell<u32>,
    intents: RefCell<Vec<Intent>>,
    codec: std::sync::Arc<Codec>,
    globals: RefCell<GlobalBag>,
}

impl OrchestrationContext {
    pub fn new(index: HashMap<CorrelationId, ResolvedCall>, codec: std::sync::Arc<Codec>, globals: GlobalBag) -> Self {
        Self {
            index,
            counter: RefCell::new(0),
            intents: RefCell::new(Vec::new()),
            codec,
            globals: RefCell::new(globals),
        }
    }

    fn next_correlation(&self) -> CorrelationId {
        let mut counter = self.counter.borrow_mut();
        let id = CorrelationId::from_counter(*counter);
        *counter += 1;
        id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.globals.borrow().now()
    }

    pub fn new_id(&self) -> String {
        self.globals.borrow_mut().next_id()
    }

    pub(crate) fn take_intents(self) -> Vec<Intent> {
        self.intents.into_inner()
    }

    pub fn step(&self, name: &str, args: Value) -> StepFuture<'_> {
        let correlation_id = self.next_correlation();
        let encoded = self.codec.encode(&args).unwrap_or_default();
        StepFuture { ctx: self, correlation_id, name: name.to_string(), args: encoded }
    }

    pub fn hook(&self, name: &str) -> HookFuture<'_> {
        let correlation_id = self.next_correlation();
        let token = match self.index.get(&correlation_id) {
            Some(ResolvedCall::HookCreated { token, .. }) => token.clone(),
            _ => format!("hk_{}", self.globals.borrow_mut().next_id()),
        };
        HookFuture { ctx: self, correlation_id, name: name.to_string(), token }
    }

    pub fn wait(&self, duration: Duration) -> WaitFuture<'_> {
        let correlation_id = self.next_correlation();
        let fire_at = self.now() + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        WaitFuture { ctx: self, correlation_id, fire_at }
    }
}

pub struct StepFuture<'a> {
    ctx: &'a OrchestrationContext,
    correlation_id: CorrelationId,
    name: String,
    args: Vec<u8>,
}

impl<'a> Future for StepFuture<'a> {
    type Output = Result<Value, OrchestratorError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match self.ctx.index.get(&self.correlation_id) {
            Some(ResolvedCall::StepCompleted(value)) => Poll::Ready(Ok(value.clone())),
            Some(ResolvedCall::StepFailed(message)) => {
                Poll::Ready(Err(OrchestratorError::StepFailed { name: self.name.clone(), message: message.clone() }))
            }
            _ => {
                self.ctx.intents.borrow_mut().push(Intent::Step {
                    correlation_id: self.correlation_id,
                    name: self.name.clone(),
                    args: self.args.clone(),
                });
                Poll::Pending
            }
        }
    }
}

pub struct HookFuture<'a> {
    ctx: &'a OrchestrationContext,
    correlation_id: CorrelationId,
    #[allow(dead_code)]
    name: String,
    token: String,
}

impl<'a> HookFuture<'a> {
    /// The hook's externally-addressable token, available synchronously so
    /// orchestrator code can hand it to a step before awaiting resolution.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl<'a> Future for HookFuture<'a> {
    type Output = Result<Value, OrchestratorError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match self.ctx.index.get(&self.correlation_id) {
            Some(ResolvedCall::HookCreated { received: Some(value), .. }) => Poll::Ready(Ok(value.clone())),
            _ => {
                self.ctx.intents.borrow_mut().push(Intent::Hook {
                    correlation_id: self.correlation_id,
                    token: self.token.clone(),
                });
                Poll::Pending
            }
        }
    }
}

pub struct WaitFuture<'a> {
    ctx: &'a OrchestrationContext,
    correlation_id: CorrelationId,
    fire_at: DateTime<Utc>,
}

impl<'a> Future for WaitFuture<'a> {
    type Output = Result<(), OrchestratorError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match self.ctx.index.get(&self.correlation_id) {
            Some(ResolvedCall::WaitFired(_)) => Poll::Ready(Ok(())),
            _ => {
                self.ctx.intents.borrow_mut().push(Intent::Wait {
                    correlation_id: self.correlation_id,
                    fire_at: self.fire_at,
                });
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecBuilder;
    use std::sync::Arc;

    fn ctx_with(index: HashMap<CorrelationId, ResolvedCall>) -> OrchestrationContext {
        let codec = Arc::new(CodecBuilder::with_defaults().build());
        let globals = GlobalBag::new(crate::ids::RunId::new(), Utc::now(), 0);
        OrchestrationContext::new(index, codec, globals)
    }

    #[test]
    fn correlation_ids_increment_per_call() {
        let ctx = ctx_with(HashMap::new());
        let a = ctx.next_correlation();
        let b = ctx.next_correlation();
        assert_eq!(a.as_u32(), 0);
        assert_eq!(b.as_u32(), 1);
    }

    #[test]
    fn hook_token_is_stable_across_replays_once_recorded() {
        let mut index = HashMap::new();
        index.insert(CorrelationId::from_counter(0), ResolvedCall::HookCreated { token: "hk_fixed".into(), received: None });
        let ctx = ctx_with(index);
        let hook = ctx.hook("approval");
        assert_eq!(hook.token(), "hk_fixed");
    }
}
