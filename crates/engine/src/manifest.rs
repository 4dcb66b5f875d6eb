//! Composes the three process-wide registries a deployment must build once,
//! before the scheduler starts accepting work: orchestrator types, step
//! handlers, and the codec's user-class reducers/revivers.
//!
//! Grounded on `engine/registry.rs`'s `AnyWorkflow`/`WorkflowRegistry`
//! type-erasure pattern, generalized from one registry to three. Unlike the
//! teacher, where the registry alone is enough to drive the executor, this
//! crate's scheduler also needs a built [`Codec`] — so `Manifest::build`
//! folds the class registrations into a `CodecBuilder` and returns the
//! finished codec alongside the two handler registries.

use std::sync::Arc;

use crate::codec::{Codec, CodecBuilder, Reducer, Reviver};
use crate::orchestration::{Orchestrator, OrchestratorRegistry};
use crate::step::{StepHandler, StepRegistry};

/// Accumulates user-class reducers/revivers ahead of building the codec.
/// Kept as its own type (rather than exposing `CodecBuilder` directly on
/// `Manifest`) so a deployment's setup code reads as "register orchestrators,
/// steps, classes" symmetrically across all three.
#[derive(Default)]
pub struct ClassRegistry {
    builder: CodecBuilder,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self { builder: CodecBuilder::with_defaults() }
    }

    pub fn register_reducer(mut self, reducer: impl Reducer + 'static) -> Self {
        self.builder = self.builder.register_reducer(reducer);
        self
    }

    pub fn register_reviver(mut self, reviver: impl Reviver + 'static) -> Self {
        self.builder = self.builder.register_reviver(reviver);
        self
    }
}

/// Builds up the three registries, then hands back the immutable, `Arc`-
/// wrapped set a [`crate::scheduler::Scheduler`] is constructed from.
#[derive(Default)]
pub struct Manifest {
    orchestrators: OrchestratorRegistry,
    steps: StepRegistry,
    classes: ClassRegistry,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            orchestrators: OrchestratorRegistry::new(),
            steps: StepRegistry::new(),
            classes: ClassRegistry::new(),
        }
    }

    pub fn register_orchestrator<O: Orchestrator>(mut self, orchestrator: O) -> Self {
        self.orchestrators.register(orchestrator);
        self
    }

    pub fn register_step(mut self, name: impl Into<String>, handler: impl StepHandler + 'static) -> Self {
        self.steps.register(name, handler);
        self
    }

    pub fn register_reducer(mut self, reducer: impl Reducer + 'static) -> Self {
        self.classes = self.classes.register_reducer(reducer);
        self
    }

    pub fn register_reviver(mut self, reviver: impl Reviver + 'static) -> Self {
        self.classes = self.classes.register_reviver(reviver);
        self
    }

    /// Consumes the manifest, returning the finished, `Arc`-wrapped
    /// registries plus codec ready for [`crate::scheduler::Scheduler::new`].
    pub fn build(self) -> (Arc<OrchestratorRegistry>, Arc<StepRegistry>, Arc<Codec>) {
        let codec = self.classes.builder.build();
        (Arc::new(self.orchestrators), Arc::new(self.steps), Arc::new(codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::orchestration::{OrchestrationContext, OrchestratorError};
    use crate::step::StepError;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct PingInput;
    #[derive(Serialize, Deserialize)]
    struct PingOutput {
        ok: bool,
    }

    struct Ping;

    #[async_trait]
    impl Orchestrator for Ping {
        const TYPE: &'static str = "ping";
        type Input = PingInput;
        type Output = PingOutput;

        async fn run(&self, _ctx: &OrchestrationContext, _input: Self::Input) -> Result<Self::Output, OrchestratorError> {
            Ok(PingOutput { ok: true })
        }
    }

    #[test]
    fn builds_registries_and_a_usable_codec() {
        let manifest = Manifest::new()
            .register_orchestrator(Ping)
            .register_step("noop", |_: Value| Ok(Value::Null) as Result<Value, StepError>);

        let (orchestrators, steps, codec) = manifest.build();
        assert!(orchestrators.contains(&crate::ids::WorkflowName::new("ping")));
        assert!(steps.contains("noop"));

        let encoded = codec.encode(&Value::Int(7)).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), Value::Int(7));
    }
}
