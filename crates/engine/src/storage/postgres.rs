//! PostgreSQL `EventStore`, grounded on `persistence/postgres.rs`'s
//! `PostgresWorkflowEventStore`: optimistic concurrency via a `SELECT ...
//! FOR UPDATE` sequence check inside the append transaction, events
//! inserted one row per event, status materialized into a sibling table in
//! the same transaction. Split into the four tables (`runs`, `events`,
//! `steps`, `hooks`) the new query surface names instead of one
//! `durable_workflow_instances` + `durable_workflow_events` pair.
//!
//! `idx_events_one_terminal_step_event` (a partial unique index, see the
//! migration) is what makes step commitment at-most-once: a redelivered
//! `StepCompleted`/`StepFailed` for a correlation id that already has one
//! loses the `ON CONFLICT ... DO NOTHING` race and `events_create` reports
//! success without re-applying it, instead of a separate read-then-write
//! check racing the insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use super::{EventFilter, EventStore, Pagination, StoreError};
use crate::event::{Event, EventKind};
use crate::ids::{CorrelationId, EventId, HookId, RunId, WorkflowName};
use crate::views::{HookView, RunStatus, RunView, StepStatus, StepView};

#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn run_status_from_str(s: &str) -> RunStatus {
    match s {
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        _ => RunStatus::Running,
    }
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Scheduled => "scheduled",
        StepStatus::Started => "started",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Retrying => "retrying",
    }
}

fn step_status_from_str(s: &str) -> StepStatus {
    match s {
        "started" => StepStatus::Started,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "retrying" => StepStatus::Retrying,
        _ => StepStatus::Scheduled,
    }
}

fn event_kind_from_str(s: &str) -> Result<EventKind, StoreError> {
    Ok(match s {
        "run_started" => EventKind::RunStarted,
        "run_completed" => EventKind::RunCompleted,
        "run_failed" => EventKind::RunFailed,
        "run_cancelled" => EventKind::RunCancelled,
        "step_scheduled" => EventKind::StepScheduled,
        "step_started" => EventKind::StepStarted,
        "step_completed" => EventKind::StepCompleted,
        "step_failed" => EventKind::StepFailed,
        "step_retrying" => EventKind::StepRetrying,
        "wait_started" => EventKind::WaitStarted,
        "wait_fired" => EventKind::WaitFired,
        "wait_cancelled" => EventKind::WaitCancelled,
        "hook_created" => EventKind::HookCreated,
        "hook_received" => EventKind::HookReceived,
        other => return Err(StoreError::Database(format!("unknown event_type {other}"))),
    })
}

fn row_to_event(row: &sqlx::postgres::PgRow, resolve_data: bool) -> Result<Event, StoreError> {
    let event_type = event_kind_from_str(row.get::<String, _>("event_type").as_str())?;
    Ok(Event {
        event_id: EventId::from_uuid(row.get("event_id")),
        run_id: RunId::from_uuid(row.get("run_id")),
        ordinal: row.get("ordinal"),
        event_type,
        correlation_id: row
            .get::<Option<i64>, _>("correlation_id")
            .map(|v| CorrelationId::from_counter(v as u32)),
        event_data: if resolve_data { row.get("event_data") } else { Vec::new() },
        spec_version: row.get::<i32, _>("spec_version") as u32,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, events))]
    async fn events_create(
        &self,
        run_id: RunId,
        expected_ordinal: i64,
        events: Vec<Event>,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT status, next_ordinal FROM runs WHERE run_id = $1 FOR UPDATE")
            .bind(run_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::RunNotFound(run_id))?;

        let status = run_status_from_str(row.get("status"));
        if status.is_terminal() {
            return Err(StoreError::RunTerminal { run_id });
        }
        let current_ordinal: i64 = row.get("next_ordinal");
        if current_ordinal != expected_ordinal {
            return Err(StoreError::ConcurrencyConflict { expected: expected_ordinal, actual: current_ordinal });
        }

        let mut ordinal = current_ordinal;
        for event in &events {
            let inserted = sqlx::query(
                r#"
                INSERT INTO events (event_id, run_id, ordinal, event_type, correlation_id, event_data, spec_version, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (run_id, correlation_id) WHERE event_type IN ('step_completed', 'step_failed')
                DO NOTHING
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(run_id.as_uuid())
            .bind(ordinal)
            .bind(event.event_type.as_str())
            .bind(event.correlation_id.map(|c| c.as_u32() as i64))
            .bind(&event.event_data)
            .bind(event.spec_version as i32)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            if inserted.rows_affected() == 0
                && matches!(event.event_type, EventKind::StepCompleted | EventKind::StepFailed)
            {
                // `idx_events_one_terminal_step_event` caught a redelivered
                // commit of an already-terminal step. Drop the whole
                // transaction (it rolls back on drop) and report success on
                // the ordinal already on file instead of double-applying.
                return Ok(current_ordinal);
            }

            apply_event_sql(&mut tx, run_id, event, ordinal).await?;
            ordinal += 1;
        }

        sqlx::query("UPDATE runs SET next_ordinal = $1, updated_at = now() WHERE run_id = $2")
            .bind(ordinal)
            .bind(run_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Database(e.to_string()))?;
        debug!(%run_id, ordinal, "appended events");
        Ok(ordinal)
    }

    async fn events_list(
        &self,
        run_id: RunId,
        filter: EventFilter,
        pagination: Pagination,
        resolve_data: bool,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, run_id, ordinal, event_type, correlation_id, event_data, spec_version, created_at
            FROM events
            WHERE run_id = $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::bigint IS NULL OR correlation_id = $3)
            ORDER BY ordinal
            OFFSET $4 LIMIT $5
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(filter.kind.map(|k| k.as_str().to_string()))
        .bind(filter.correlation_id.map(|c| c.as_u32() as i64))
        .bind(pagination.offset)
        .bind(pagination.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(|r| row_to_event(r, resolve_data)).collect()
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

    async fn runs_create(&self, run_id: RunId, workflow_name: WorkflowName, input: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO runs (run_id, workflow_name, input) VALUES ($1, $2, $3)")
            .bind(run_id.as_uuid())
            .bind(workflow_name.as_str())
            .bind(&input)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn runs_get(&self, run_id: RunId) -> Result<RunView, StoreError> {
        let row = sqlx::query(
            "SELECT run_id, workflow_name, status, input, result, error, next_ordinal, created_at, updated_at FROM runs WHERE run_id = $1",
        )
        .bind(run_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::RunNotFound(run_id))?;

        Ok(RunView {
            run_id: RunId::from_uuid(row.get("run_id")),
            workflow_name: WorkflowName::new(row.get::<String, _>("workflow_name")),
            status: run_status_from_str(row.get("status")),
            input: row.get("input"),
            result: row.get("result"),
            error: row.get("error"),
            next_ordinal: row.get("next_ordinal"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn runs_list(&self, workflow_name: Option<WorkflowName>, pagination: Pagination) -> Result<Vec<RunView>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, workflow_name, status, input, result, error, next_ordinal, created_at, updated_at
            FROM runs
            WHERE $1::text IS NULL OR workflow_name = $1
            ORDER BY created_at DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(workflow_name.map(|n| n.as_str().to_string()))
        .bind(pagination.offset)
        .bind(pagination.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| RunView {
                run_id: RunId::from_uuid(row.get("run_id")),
                workflow_name: WorkflowName::new(row.get::<String, _>("workflow_name")),
                status: run_status_from_str(row.get("status")),
                input: row.get("input"),
                result: row.get("result"),
                error: row.get("error"),
                next_ordinal: row.get("next_ordinal"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn steps_get(&self, run_id: RunId, correlation_id: CorrelationId) -> Result<StepView, StoreError> {
        let row = sqlx::query(
            "SELECT run_id, correlation_id, name, status, attempt, args, result, error, retry_after, updated_at FROM steps WHERE run_id = $1 AND correlation_id = $2",
        )
        .bind(run_id.as_uuid())
        .bind(correlation_id.as_u32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::StepNotFound(correlation_id))?;

        Ok(row_to_step(&row))
    }

    async fn steps_list(&self, run_id: RunId, pagination: Pagination) -> Result<Vec<StepView>, StoreError> {
        let rows = sqlx::query(
            "SELECT run_id, correlation_id, name, status, attempt, args, result, error, retry_after, updated_at FROM steps WHERE run_id = $1 ORDER BY correlation_id OFFSET $2 LIMIT $3",
        )
        .bind(run_id.as_uuid())
        .bind(pagination.offset)
        .bind(pagination.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_step).collect())
    }

    async fn hooks_get(&self, hook_id: HookId) -> Result<HookView, StoreError> {
        let row = sqlx::query(
            "SELECT hook_id, run_id, correlation_id, token, created_at, disposed_at, result FROM hooks WHERE hook_id = $1",
        )
        .bind(hook_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::HookNotFound(hook_id))?;

        Ok(row_to_hook(&row))
    }

    async fn hooks_get_by_token(&self, token: &str) -> Result<HookView, StoreError> {
        let row = sqlx::query(
            "SELECT hook_id, run_id, correlation_id, token, created_at, disposed_at, result FROM hooks WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::HookTokenNotFound)?;

        Ok(row_to_hook(&row))
    }

    async fn hooks_list(&self, run_id: RunId, pagination: Pagination) -> Result<Vec<HookView>, StoreError> {
        let rows = sqlx::query(
            "SELECT hook_id, run_id, correlation_id, token, created_at, disposed_at, result FROM hooks WHERE run_id = $1 ORDER BY created_at OFFSET $2 LIMIT $3",
        )
        .bind(run_id.as_uuid())
        .bind(pagination.offset)
        .bind(pagination.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_hook).collect())
    }
}

fn row_to_step(row: &sqlx::postgres::PgRow) -> StepView {
    StepView {
        run_id: RunId::from_uuid(row.get("run_id")),
        correlation_id: CorrelationId::from_counter(row.get::<i64, _>("correlation_id") as u32),
        name: row.get("name"),
        status: step_status_from_str(row.get("status")),
        attempt: row.get::<i32, _>("attempt") as u32,
        args: row.get("args"),
        result: row.get("result"),
        error: row.get("error"),
        retry_after: row.get::<Option<DateTime<Utc>>, _>("retry_after"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_hook(row: &sqlx::postgres::PgRow) -> HookView {
    HookView {
        hook_id: HookId::from_uuid(row.get("hook_id")),
        run_id: RunId::from_uuid(row.get("run_id")),
        correlation_id: CorrelationId::from_counter(row.get::<i64, _>("correlation_id") as u32),
        token: row.get("token"),
        created_at: row.get("created_at"),
        disposed_at: row.get("disposed_at"),
        result: row.get("result"),
    }
}

/// Applies one event's side effects to the `runs`/`steps`/`hooks`
/// projections, inside the same transaction as its insert into `events`.
async fn apply_event_sql(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: RunId,
    event: &Event,
    _ordinal: i64,
) -> Result<(), StoreError> {
    match event.event_type {
        EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled => {
            let status = run_status_str(match event.event_type {
                EventKind::RunCompleted => RunStatus::Completed,
                EventKind::RunFailed => RunStatus::Failed,
                _ => RunStatus::Cancelled,
            });
            if event.event_type == EventKind::RunCompleted {
                sqlx::query("UPDATE runs SET status = $1, result = $2, updated_at = now() WHERE run_id = $3")
                    .bind(status)
                    .bind(&event.event_data)
                    .bind(run_id.as_uuid())
                    .execute(&mut **tx)
                    .await
            } else {
                let error = String::from_utf8_lossy(&event.event_data).into_owned();
                sqlx::query("UPDATE runs SET status = $1, error = $2, updated_at = now() WHERE run_id = $3")
                    .bind(status)
                    .bind(error)
                    .bind(run_id.as_uuid())
                    .execute(&mut **tx)
                    .await
            }
            .map_err(|e| StoreError::Database(e.to_string()))?;

            sqlx::query("UPDATE hooks SET disposed_at = now() WHERE run_id = $1 AND disposed_at IS NULL")
                .bind(run_id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        EventKind::StepScheduled | EventKind::StepStarted | EventKind::StepCompleted
        | EventKind::StepFailed | EventKind::StepRetrying => {
            if let Some(correlation_id) = event.correlation_id {
                let status = step_status_str(match event.event_type {
                    EventKind::StepScheduled => StepStatus::Scheduled,
                    EventKind::StepStarted => StepStatus::Started,
                    EventKind::StepCompleted => StepStatus::Completed,
                    EventKind::StepFailed => StepStatus::Failed,
                    _ => StepStatus::Retrying,
                });

                let (name, args) = if event.event_type == EventKind::StepScheduled {
                    crate::event::unpack_step_scheduled(&event.event_data)
                } else {
                    (String::new(), Vec::new())
                };

                sqlx::query(
                    r#"
                    INSERT INTO steps (run_id, correlation_id, name, status, args, updated_at)
                    VALUES ($1, $2, $3, $4, $5, now())
                    ON CONFLICT (run_id, correlation_id) DO UPDATE SET status = $4, updated_at = now()
                    "#,
                )
                .bind(run_id.as_uuid())
                .bind(correlation_id.as_u32() as i64)
                .bind(name)
                .bind(status)
                .bind(args)
                .execute(&mut **tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

                match event.event_type {
                    EventKind::StepScheduled => {
                        sqlx::query("UPDATE steps SET retry_after = NULL WHERE run_id = $1 AND correlation_id = $2")
                            .bind(run_id.as_uuid())
                            .bind(correlation_id.as_u32() as i64)
                            .execute(&mut **tx)
                            .await
                            .map_err(|e| StoreError::Database(e.to_string()))?;
                    }
                    EventKind::StepCompleted => {
                        sqlx::query("UPDATE steps SET result = $1, retry_after = NULL WHERE run_id = $2 AND correlation_id = $3")
                            .bind(&event.event_data)
                            .bind(run_id.as_uuid())
                            .bind(correlation_id.as_u32() as i64)
                            .execute(&mut **tx)
                            .await
                            .map_err(|e| StoreError::Database(e.to_string()))?;
                    }
                    EventKind::StepFailed => {
                        let error = String::from_utf8_lossy(&event.event_data).into_owned();
                        sqlx::query("UPDATE steps SET error = $1, retry_after = NULL WHERE run_id = $2 AND correlation_id = $3")
                            .bind(error)
                            .bind(run_id.as_uuid())
                            .bind(correlation_id.as_u32() as i64)
                            .execute(&mut **tx)
                            .await
                            .map_err(|e| StoreError::Database(e.to_string()))?;
                    }
                    EventKind::StepRetrying => {
                        let retry_after = crate::event::unpack_step_retrying(&event.event_data);
                        sqlx::query("UPDATE steps SET attempt = attempt + 1, retry_after = $1 WHERE run_id = $2 AND correlation_id = $3")
                            .bind(retry_after)
                            .bind(run_id.as_uuid())
                            .bind(correlation_id.as_u32() as i64)
                            .execute(&mut **tx)
                            .await
                            .map_err(|e| StoreError::Database(e.to_string()))?;
                    }
                    _ => {}
                }
            }
        }
        EventKind::HookCreated => {
            if let Some(correlation_id) = event.correlation_id {
                let token = String::from_utf8_lossy(&event.event_data).into_owned();
                sqlx::query(
                    "INSERT INTO hooks (hook_id, run_id, correlation_id, token) VALUES ($1, $2, $3, $4)",
                )
                .bind(HookId::new().as_uuid())
                .bind(run_id.as_uuid())
                .bind(correlation_id.as_u32() as i64)
                .bind(token)
                .execute(&mut **tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        EventKind::HookReceived => {
            if let Some(correlation_id) = event.correlation_id {
                sqlx::query("UPDATE hooks SET result = $1 WHERE run_id = $2 AND correlation_id = $3")
                    .bind(&event.event_data)
                    .bind(run_id.as_uuid())
                    .bind(correlation_id.as_u32() as i64)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        EventKind::RunStarted | EventKind::WaitStarted | EventKind::WaitFired | EventKind::WaitCancelled => {}
    }
    Ok(())
}
