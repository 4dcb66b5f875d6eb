//! Orchestrator authoring interface and the replay engine that drives it.
//!
//! Keeps the teacher's engine shape from `engine/{executor,registry}.rs` — a
//! factory registry, a replay loop, an outcome summary — and replaces only
//! the authoring interface: the teacher's `Workflow` trait is a callback
//! state machine (`on_start`/`on_activity_completed`/…), this crate's
//! `Orchestrator` trait is a single `async fn` that awaits capability
//! futures. See `replay.rs` module docs for why one poll suffices.

mod context;
mod noop_waker;
mod replay;

pub use context::{HookFuture, OrchestrationContext, OrchestratorError, ResolvedCall, StepFuture, WaitFuture};
pub use noop_waker::noop_waker;
pub use replay::{build_index, ReplayEngine, ReplayOutcome};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Value;
use crate::ids::WorkflowName;

/// One registered orchestrator type. `run` is written as ordinary
/// `async fn` code that awaits `ctx.step`/`ctx.hook`/`ctx.wait` — the
/// replay engine, not the orchestrator author, is responsible for ever
/// calling it more than once.
#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    const TYPE: &'static str;
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(&self, ctx: &OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestratorError>;
}

/// Type-erased orchestrator interface, grounded on `engine/registry.rs`'s
/// `AnyWorkflow`, generalized from "JSON in, JSON out" to "closed `Value`
/// in, closed `Value` out" via [`Value::to_json`]/[`Value::from_json`].
trait AnyOrchestrator: Send + Sync {
    fn orchestrator_type(&self) -> &'static str;

    fn run_any<'a>(
        &'a self,
        ctx: &'a OrchestrationContext,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, OrchestratorError>> + 'a>>;
}

struct OrchestratorWrapper<O> {
    inner: O,
}

impl<O: Orchestrator> AnyOrchestrator for OrchestratorWrapper<O> {
    fn orchestrator_type(&self) -> &'static str {
        O::TYPE
    }

    fn run_any<'a>(
        &'a self,
        ctx: &'a OrchestrationContext,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, OrchestratorError>> + 'a>> {
        Box::pin(async move {
            let typed_input: O::Input = serde_json::from_value(input.to_json())
                .map_err(|e| OrchestratorError::Custom(format!("input decode: {e}")))?;
            let output = self.inner.run(ctx, typed_input).await?;
            let json = serde_json::to_value(&output).map_err(|e| OrchestratorError::Custom(format!("output encode: {e}")))?;
            Ok(Value::from_json(json))
        })
    }
}

/// Maps workflow names to the orchestrator type that handles them, built
/// once before the scheduler starts accepting work.
#[derive(Default)]
pub struct OrchestratorRegistry {
    factories: HashMap<WorkflowName, Box<dyn AnyOrchestrator>>,
}

impl OrchestratorRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register<O: Orchestrator>(&mut self, orchestrator: O) {
        self.factories.insert(WorkflowName::new(O::TYPE), Box::new(OrchestratorWrapper { inner: orchestrator }));
    }

    pub fn contains(&self, workflow_name: &WorkflowName) -> bool {
        self.factories.contains_key(workflow_name)
    }

    pub async fn run(
        &self,
        workflow_name: &WorkflowName,
        ctx: &OrchestrationContext,
        input: Value,
    ) -> Result<Value, OrchestratorError> {
        let orchestrator = self
            .factories
            .get(workflow_name)
            .ok_or_else(|| OrchestratorError::Custom(format!("unknown orchestrator type: {workflow_name}")))?;
        orchestrator.run_any(ctx, input).await
    }

    /// Builds the orchestrator's top-level future without awaiting it, so a
    /// caller can hand it to [`ReplayEngine::drive`] for a single,
    /// noop-waker poll instead of running it to completion directly.
    pub fn build_future<'a>(
        &'a self,
        workflow_name: &WorkflowName,
        ctx: &'a OrchestrationContext,
        input: Value,
    ) -> Result<Pin<Box<dyn Future<Output = Result<Value, OrchestratorError>> + 'a>>, OrchestratorError> {
        let orchestrator = self
            .factories
            .get(workflow_name)
            .ok_or_else(|| OrchestratorError::Custom(format!("unknown orchestrator type: {workflow_name}")))?;
        Ok(orchestrator.run_any(ctx, input))
    }
}

impl fmt::Debug for OrchestratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorRegistry").field("types", &self.factories.keys().collect::<Vec<_>>()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecBuilder;
    use crate::sandbox::GlobalBag;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Serialize, Deserialize)]
    struct DoubleInput {
        n: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct DoubleOutput {
        doubled: i64,
    }

    struct Doubler;

    #[async_trait]
    impl Orchestrator for Doubler {
        const TYPE: &'static str = "doubler";
        type Input = DoubleInput;
        type Output = DoubleOutput;

        async fn run(&self, _ctx: &OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestratorError> {
            Ok(DoubleOutput { doubled: input.n * 2 })
        }
    }

    #[tokio::test]
    async fn runs_a_registered_orchestrator_through_the_value_bridge() {
        let mut registry = OrchestratorRegistry::new();
        registry.register(Doubler);

        let codec = Arc::new(CodecBuilder::with_defaults().build());
        let globals = GlobalBag::new(crate::ids::RunId::new(), chrono::Utc::now(), 0);
        let ctx = OrchestrationContext::new(HashMap::new(), codec, globals);

        let input = Value::from_json(serde_json::json!({ "n": 21 }));
        let output = registry.run(&WorkflowName::new("doubler"), &ctx, input).await.unwrap();
        assert_eq!(output.to_json(), serde_json::json!({ "doubled": 42 }));
    }

    #[tokio::test]
    async fn rejects_an_unregistered_workflow_name() {
        let registry = OrchestratorRegistry::new();
        let codec = Arc::new(CodecBuilder::with_defaults().build());
        let globals = GlobalBag::new(crate::ids::RunId::new(), chrono::Utc::now(), 0);
        let ctx = OrchestrationContext::new(HashMap::new(), codec, globals);

        let result = registry.run(&WorkflowName::new("missing"), &ctx, Value::Null).await;
        assert!(result.is_err());
    }
}
