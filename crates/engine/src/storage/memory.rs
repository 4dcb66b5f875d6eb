//! In-memory `EventStore`, grounded on `persistence/memory.rs`'s
//! single-lock design: one `parking_lot::Mutex` guards the event log and
//! all three materialized views, so `events_create` can validate, append,
//! and materialize atomically without a second synchronization primitive.
//! That same lock is what makes the at-most-once guard below correct: the
//! "does a terminal event already exist for this correlation id" check and
//! the append it gates run inside one critical section, so two concurrent
//! `events_create` calls for the same step can never both observe "no
//! terminal event yet" and both append one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{EventFilter, EventStore, Pagination, StoreError};
use crate::event::{Event, EventKind};
use crate::ids::{CorrelationId, HookId, RunId, WorkflowName};
use crate::views::{HookView, RunStatus, RunView, StepStatus, StepView};

struct State {
    events: HashMap<RunId, Vec<Event>>,
    runs: HashMap<RunId, RunView>,
    steps: HashMap<(RunId, CorrelationId), StepView>,
    hooks: HashMap<HookId, HookView>,
    hooks_by_token: HashMap<String, HookId>,
}

pub struct InMemoryEventStore {
    state: Mutex<State>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                events: HashMap::new(),
                runs: HashMap::new(),
                steps: HashMap::new(),
                hooks: HashMap::new(),
                hooks_by_token: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_event(state: &mut State, event: &Event) {
    let now = Utc::now();
    match event.event_type {
        EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled => {
            if let Some(run) = state.runs.get_mut(&event.run_id) {
                run.status = match event.event_type {
                    EventKind::RunCompleted => RunStatus::Completed,
                    EventKind::RunFailed => RunStatus::Failed,
                    _ => RunStatus::Cancelled,
                };
                if event.event_type == EventKind::RunCompleted {
                    run.result = Some(event.event_data.clone());
                } else {
                    run.error = Some(String::from_utf8_lossy(&event.event_data).into_owned());
                }
                run.updated_at = now;
            }
            // Auto-dispose every hook owned by this run (spec §4.3's
            // terminal-run cascade), not a separate sweep.
            for hook in state.hooks.values_mut() {
                if hook.run_id == event.run_id && hook.disposed_at.is_none() {
                    hook.disposed_at = Some(now);
                }
            }
        }
        EventKind::StepScheduled | EventKind::StepStarted | EventKind::StepCompleted
        | EventKind::StepFailed | EventKind::StepRetrying => {
            if let Some(correlation_id) = event.correlation_id {
                let key = (event.run_id, correlation_id);
                let status = match event.event_type {
                    EventKind::StepScheduled => StepStatus::Scheduled,
                    EventKind::StepStarted => StepStatus::Started,
                    EventKind::StepCompleted => StepStatus::Completed,
                    EventKind::StepFailed => StepStatus::Failed,
                    _ => StepStatus::Retrying,
                };
                let entry = state.steps.entry(key).or_insert_with(|| StepView {
                    run_id: event.run_id,
                    correlation_id,
                    name: String::new(),
                    status,
                    attempt: 0,
                    args: Vec::new(),
                    result: None,
                    error: None,
                    retry_after: None,
                    updated_at: now,
                });
                entry.status = status;
                entry.updated_at = now;
                match event.event_type {
                    EventKind::StepScheduled => {
                        let (name, args) = crate::event::unpack_step_scheduled(&event.event_data);
                        entry.name = name;
                        entry.args = args;
                        entry.retry_after = None;
                    }
                    EventKind::StepCompleted => {
                        entry.result = Some(event.event_data.clone());
                        entry.retry_after = None;
                    }
                    EventKind::StepFailed => {
                        entry.error = Some(String::from_utf8_lossy(&event.event_data).into_owned());
                        entry.retry_after = None;
                    }
                    EventKind::StepRetrying => {
                        entry.attempt += 1;
                        entry.retry_after = crate::event::unpack_step_retrying(&event.event_data);
                    }
                    _ => {}
                }
            }
        }
        EventKind::HookCreated => {
            if let Some(correlation_id) = event.correlation_id {
                let token = String::from_utf8_lossy(&event.event_data).into_owned();
                let hook_id = HookId::new();
                let hook = HookView {
                    hook_id,
                    run_id: event.run_id,
                    correlation_id,
                    token: token.clone(),
                    created_at: now,
                    disposed_at: None,
                    result: None,
                };
                state.hooks.insert(hook_id, hook);
                state.hooks_by_token.insert(token, hook_id);
            }
        }
        EventKind::HookReceived => {
            if let Some(correlation_id) = event.correlation_id {
                if let Some(hook) = state
                    .hooks
                    .values_mut()
                    .find(|h| h.run_id == event.run_id && h.correlation_id == correlation_id)
                {
                    hook.result = Some(event.event_data.clone());
                }
            }
        }
        EventKind::RunStarted | EventKind::WaitStarted | EventKind::WaitFired | EventKind::WaitCancelled => {}
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn events_create(
        &self,
        run_id: RunId,
        expected_ordinal: i64,
        events: Vec<Event>,
    ) -> Result<i64, StoreError> {
        let mut state = self.state.lock();

        let current_ordinal = state.runs.get(&run_id).map(|r| r.next_ordinal).unwrap_or(0);
        if current_ordinal != expected_ordinal {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_ordinal,
                actual: current_ordinal,
            });
        }
        if let Some(run) = state.runs.get(&run_id) {
            if run.status.is_terminal() {
                return Err(StoreError::RunTerminal { run_id });
            }
        }

        // A terminal event for a correlation id that's already terminal is
        // a redelivered step commit, not a new outcome: report success on
        // the ordinal already recorded rather than double-apply it.
        for event in &events {
            if !matches!(event.event_type, EventKind::StepCompleted | EventKind::StepFailed) {
                continue;
            }
            let Some(correlation_id) = event.correlation_id else { continue };
            if state
                .steps
                .get(&(run_id, correlation_id))
                .is_some_and(|step| matches!(step.status, StepStatus::Completed | StepStatus::Failed))
            {
                return Ok(current_ordinal);
            }
        }

        let mut ordinal = current_ordinal;
        let log = state.events.entry(run_id).or_default();
        let mut stamped = Vec::with_capacity(events.len());
        for mut event in events {
            event.ordinal = ordinal;
            ordinal += 1;
            log.push(event.clone());
            stamped.push(event);
        }

        if let Some(run) = state.runs.get_mut(&run_id) {
            run.next_ordinal = ordinal;
        }
        for event in &stamped {
            apply_event(&mut state, event);
        }
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.next_ordinal = ordinal;
        }

        Ok(ordinal)
    }

    async fn events_list(
        &self,
        run_id: RunId,
        filter: EventFilter,
        pagination: Pagination,
        resolve_data: bool,
    ) -> Result<Vec<Event>, StoreError> {
        let state = self.state.lock();
        let events = state.events.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;

        let filtered: Vec<Event> = events
            .iter()
            .filter(|e| filter.kind.map(|k| k == e.event_type).unwrap_or(true))
            .filter(|e| filter.correlation_id.map(|c| Some(c) == e.correlation_id).unwrap_or(true))
            .skip(pagination.offset.max(0) as usize)
            .take(pagination.limit.max(0) as usize)
            .map(|e| {
                let mut e = e.clone();
                if !resolve_data {
                    e.event_data.clear();
                }
                e
            })
            .collect();
        Ok(filtered)
    }

    async fn events_list_by_correlation_id(
        &self,
        run_id: RunId,
        correlation_id: CorrelationId,
    ) -> Result<Vec<Event>, StoreError> {
        self.events_list(
            run_id,
            EventFilter { kind: None, correlation_id: Some(correlation_id) },
            Pagination { offset: 0, limit: i64::MAX },
            true,
        )
        .await
    }

    async fn runs_create(
        &self,
        run_id: RunId,
        workflow_name: WorkflowName,
        input: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        state.runs.insert(
            run_id,
            RunView {
                run_id,
                workflow_name,
                status: RunStatus::Running,
                input,
                result: None,
                error: None,
                next_ordinal: 0,
                created_at: now,
                updated_at: now,
            },
        );
        state.events.insert(run_id, Vec::new());
        Ok(())
    }

    async fn runs_get(&self, run_id: RunId) -> Result<RunView, StoreError> {
        self.state
            .lock()
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn runs_list(
        &self,
        workflow_name: Option<WorkflowName>,
        pagination: Pagination,
    ) -> Result<Vec<RunView>, StoreError> {
        let state = self.state.lock();
        let mut runs: Vec<RunView> = state
            .runs
            .values()
            .filter(|r| workflow_name.as_ref().map(|n| n == &r.workflow_name).unwrap_or(true))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs
            .into_iter()
            .skip(pagination.offset.max(0) as usize)
            .take(pagination.limit.max(0) as usize)
            .collect())
    }

    async fn steps_get(&self, run_id: RunId, correlation_id: CorrelationId) -> Result<StepView, StoreError> {
        self.state
            .lock()
            .steps
            .get(&(run_id, correlation_id))
            .cloned()
            .ok_or(StoreError::StepNotFound(correlation_id))
    }

    async fn steps_list(&self, run_id: RunId, pagination: Pagination) -> Result<Vec<StepView>, StoreError> {
        let state = self.state.lock();
        let mut steps: Vec<StepView> = state
            .steps
            .iter()
            .filter(|((r, _), _)| *r == run_id)
            .map(|(_, v)| v.clone())
            .collect();
        steps.sort_by_key(|s| s.correlation_id.as_u32());
        Ok(steps
            .into_iter()
            .skip(pagination.offset.max(0) as usize)
            .take(pagination.limit.max(0) as usize)
            .collect())
    }

    async fn hooks_get(&self, hook_id: HookId) -> Result<HookView, StoreError> {
        self.state
            .lock()
            .hooks
            .get(&hook_id)
            .cloned()
            .ok_or(StoreError::HookNotFound(hook_id))
    }

    async fn hooks_get_by_token(&self, token: &str) -> Result<HookView, StoreError> {
        let state = self.state.lock();
        let hook_id = state
            .hooks_by_token
            .get(token)
            .ok_or(StoreError::HookTokenNotFound)?;
        state
            .hooks
            .get(hook_id)
            .cloned()
            .ok_or(StoreError::HookTokenNotFound)
    }

    async fn hooks_list(&self, run_id: RunId, pagination: Pagination) -> Result<Vec<HookView>, StoreError> {
        let state = self.state.lock();
        let mut hooks: Vec<HookView> = state
            .hooks
            .values()
            .filter(|h| h.run_id == run_id)
            .cloned()
            .collect();
        hooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(hooks
            .into_iter()
            .skip(pagination.offset.max(0) as usize)
            .take(pagination.limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[tokio::test]
    async fn appends_and_materializes_run_completion() {
        let store = InMemoryEventStore::new();
        let run_id = RunId::new();
        store.runs_create(run_id, WorkflowName::new("demo"), vec![]).await.unwrap();

        let seq = store
            .events_create(
                run_id,
                0,
                vec![Event::new(run_id, EventKind::RunStarted, None, vec![])],
            )
            .await
            .unwrap();
        assert_eq!(seq, 1);

        store
            .events_create(
                run_id,
                1,
                vec![Event::new(run_id, EventKind::RunCompleted, None, b"done".to_vec())],
            )
            .await
            .unwrap();

        let run = store.runs_get(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result, Some(b"done".to_vec()));
    }

    #[tokio::test]
    async fn rejects_stale_expected_ordinal() {
        let store = InMemoryEventStore::new();
        let run_id = RunId::new();
        store.runs_create(run_id, WorkflowName::new("demo"), vec![]).await.unwrap();

        let result = store
            .events_create(run_id, 5, vec![Event::new(run_id, EventKind::RunStarted, None, vec![])])
            .await;
        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn rejects_append_to_terminal_run() {
        let store = InMemoryEventStore::new();
        let run_id = RunId::new();
        store.runs_create(run_id, WorkflowName::new("demo"), vec![]).await.unwrap();
        store
            .events_create(run_id, 0, vec![Event::new(run_id, EventKind::RunCompleted, None, vec![])])
            .await
            .unwrap();

        let result = store
            .events_create(run_id, 1, vec![Event::new(run_id, EventKind::RunStarted, None, vec![])])
            .await;
        assert!(matches!(result, Err(StoreError::RunTerminal { .. })));
    }

    #[tokio::test]
    async fn materializes_step_view_across_lifecycle() {
        let store = InMemoryEventStore::new();
        let run_id = RunId::new();
        let correlation_id = CorrelationId::from_counter(0);
        store.runs_create(run_id, WorkflowName::new("demo"), vec![]).await.unwrap();

        store
            .events_create(
                run_id,
                0,
                vec![Event::new(run_id, EventKind::StepScheduled, Some(correlation_id), b"args".to_vec())],
            )
            .await
            .unwrap();
        store
            .events_create(
                run_id,
                1,
                vec![Event::new(run_id, EventKind::StepCompleted, Some(correlation_id), b"result".to_vec())],
            )
            .await
            .unwrap();

        let step = store.steps_get(run_id, correlation_id).await.unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.result, Some(b"result".to_vec()));
    }
}
