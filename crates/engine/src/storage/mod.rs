//! Event log storage contract — spec §4.3.
//!
//! Grounded on `persistence/store.rs`'s `WorkflowEventStore`, restructured
//! to spec's exact operation names (`events.create`, `runs.get`, ...).
//! `events.create` is the sole mutator; everything else is a paginated
//! read, optionally eliding `event_data` via `resolve_data: false` so a
//! listing endpoint doesn't have to ship every payload over the wire.

mod memory;
mod postgres;

pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Event, EventKind};
use crate::ids::{CorrelationId, HookId, RunId, WorkflowName};
use crate::views::{HookView, RunView, StepView};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("step with correlation id {0} not found")]
    StepNotFound(CorrelationId),

    #[error("hook {0} not found")]
    HookNotFound(HookId),

    #[error("no hook registered for token")]
    HookTokenNotFound,

    #[error("append rejected: run {run_id} is already in terminal status")]
    RunTerminal { run_id: RunId },

    #[error("optimistic concurrency conflict: expected ordinal {expected}, store is at {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 100 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub correlation_id: Option<CorrelationId>,
}

/// The event log and its materialized run/step/hook views.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The sole mutator. Validates against the run's current status,
    /// assigns the next dense ordinal, and atomically materializes the
    /// affected run/step/hook view. A `StepCompleted`/`StepFailed` event
    /// whose correlation id already has one on file is a no-op: the call
    /// returns `Ok` with the ordinal already on file rather than appending
    /// a second terminal outcome. Implementations must make that check and
    /// the append atomic with each other — a caller-side check before
    /// calling `events_create` can't close the race two concurrent
    /// deliveries of the same step open.
    async fn events_create(
        &self,
        run_id: RunId,
        expected_ordinal: i64,
        events: Vec<Event>,
    ) -> Result<i64, StoreError>;

    async fn events_list(
        &self,
        run_id: RunId,
        filter: EventFilter,
        pagination: Pagination,
        resolve_data: bool,
    ) -> Result<Vec<Event>, StoreError>;

    async fn events_list_by_correlation_id(
        &self,
        run_id: RunId,
        correlation_id: CorrelationId,
    ) -> Result<Vec<Event>, StoreError>;

    async fn runs_create(
        &self,
        run_id: RunId,
        workflow_name: WorkflowName,
        input: Vec<u8>,
    ) -> Result<(), StoreError>;

    async fn runs_get(&self, run_id: RunId) -> Result<RunView, StoreError>;

    async fn runs_list(
        &self,
        workflow_name: Option<WorkflowName>,
        pagination: Pagination,
    ) -> Result<Vec<RunView>, StoreError>;

    async fn steps_get(&self, run_id: RunId, correlation_id: CorrelationId) -> Result<StepView, StoreError>;

    async fn steps_list(&self, run_id: RunId, pagination: Pagination) -> Result<Vec<StepView>, StoreError>;

    async fn hooks_get(&self, hook_id: HookId) -> Result<HookView, StoreError>;

    async fn hooks_get_by_token(&self, token: &str) -> Result<HookView, StoreError>;

    async fn hooks_list(&self, run_id: RunId, pagination: Pagination) -> Result<Vec<HookView>, StoreError>;
}
