//! Materialized views derived from the event log.
//!
//! `events.create` is the sole mutator of the event log (spec §4.3); every
//! append atomically updates the run/step/hook view it affects. These
//! structs are what `runs.get`/`steps.get`/`hooks.get` return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, HookId, RunId, WorkflowName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub run_id: RunId,
    pub workflow_name: WorkflowName,
    pub status: RunStatus,
    pub input: Vec<u8>,
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
    pub next_ordinal: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Scheduled,
    Started,
    Completed,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepView {
    pub run_id: RunId,
    pub correlation_id: CorrelationId,
    pub name: String,
    pub status: StepStatus,
    pub attempt: u32,
    pub args: Vec<u8>,
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookView {
    pub hook_id: HookId,
    pub run_id: RunId,
    pub correlation_id: CorrelationId,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub disposed_at: Option<DateTime<Utc>>,
    pub result: Option<Vec<u8>>,
}

impl HookView {
    pub fn is_disposed(&self) -> bool {
        self.disposed_at.is_some()
    }
}
