//! # Durable Execution Engine
//!
//! An event-sourced orchestrator replay engine for asynchronous workflows:
//! deterministic replay over an append-only event log, a queue-driven
//! scheduler that claims workflow/step messages from stateless workers, and
//! a framed, optionally-encrypted serialization codec tying it together.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                             │
//! │  (claims queue messages, drives replay, runs step handlers)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!            ▼                 ▼                 ▼
//! ┌───────────────────┐ ┌────────────────┐ ┌───────────────────┐
//! │     EventStore      │ │      Queue       │ │      Streamer       │
//! │ (Postgres / memory) │ │ (visibility-     │ │ (ordered byte       │
//! │                    │ │  timeout claim)  │ │  channels)          │
//! └───────────────────┘ └────────────────┘ └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use durable_orchestrator::prelude::*;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct ChargeInput { amount_cents: i64 }
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct ChargeOutput { charge_id: String }
//!
//! struct ChargeCustomer;
//!
//! #[async_trait::async_trait]
//! impl Orchestrator for ChargeCustomer {
//!     const TYPE: &'static str = "charge_customer";
//!     type Input = ChargeInput;
//!     type Output = ChargeOutput;
//!
//!     async fn run(&self, ctx: &OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestratorError> {
//!         let result = ctx.step("charge_card", Value::Int(input.amount_cents)).await?;
//!         Ok(ChargeOutput { charge_id: result.to_json().to_string() })
//!     }
//! }
//! ```

pub mod bench;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod event;
pub mod hooks;
pub mod http;
pub mod ids;
pub mod manifest;
pub mod orchestration;
pub mod queue;
pub mod reliability;
pub mod sandbox;
pub mod scheduler;
pub mod step;
pub mod storage;
pub mod stream;
pub mod trace;
pub mod views;

/// Prelude for common imports
pub mod prelude {
    pub use crate::codec::{Codec, CodecBuilder, Value};
    pub use crate::config::{Config, ConfigError, TargetWorld};
    pub use crate::crypto::{AesGcmEncryptor, Encryptor, NoopEncryptor};
    pub use crate::event::{Event, EventKind};
    pub use crate::hooks::{HookDelivery, HookError, HookResumer};
    pub use crate::http::HookState;
    pub use crate::ids::{CorrelationId, EventId, HookId, RunId, StepId, WorkflowName};
    pub use crate::manifest::{ClassRegistry, Manifest};
    pub use crate::orchestration::{
        OrchestrationContext, Orchestrator, OrchestratorError, OrchestratorRegistry, ReplayEngine, ReplayOutcome,
    };
    pub use crate::queue::{InMemoryQueue, Queue, QueueError, SendOptions};
    pub use crate::reliability::RetryPolicy;
    pub use crate::scheduler::{run_forever, PollerConfig, Scheduler, SchedulerError};
    pub use crate::step::{always_fatal, RetryClassifier, StepError, StepHandler, StepOptions, StepRegistry};
    pub use crate::storage::{EventStore, InMemoryEventStore, PostgresEventStore, StoreError};
    pub use crate::stream::{InMemoryStreamer, StreamError, Streamer};
    pub use crate::trace::TraceCarrier;
    pub use crate::views::{HookView, RunStatus, RunView, StepStatus, StepView};
}

// Re-export key types at crate root
pub use codec::{Codec, CodecBuilder, Value};
pub use config::{Config, ConfigError};
pub use crypto::{Encryptor, NoopEncryptor};
pub use event::{Event, EventKind};
pub use ids::{CorrelationId, EventId, HookId, RunId, StepId, WorkflowName};
pub use manifest::Manifest;
pub use orchestration::{OrchestrationContext, Orchestrator, OrchestratorError, OrchestratorRegistry};
pub use queue::{Queue, QueueError};
pub use reliability::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerError};
pub use step::{StepError, StepRegistry};
pub use storage::{EventStore, StoreError};
pub use views::{RunStatus, RunView};
