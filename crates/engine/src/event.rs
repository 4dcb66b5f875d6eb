//! The append-only event record, uniform across storage backends.
//!
//! Grounded on `workflow/event.rs`'s `WorkflowEvent` enum, but restructured
//! per spec: the storage-facing record carries an opaque, codec-encoded
//! `event_data` blob rather than an inline Rust payload, so the `events`
//! table (and any non-Rust consumer reading it) never needs this crate's
//! types. The fourteen event kinds spec.md §3 names are kept as a fieldless
//! enum for indexing/filtering; strongly-typed payloads live in
//! `orchestration`/`step`/`hooks` and are encoded through the codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, EventId, RunId};

/// The fourteen event kinds the event log distinguishes. Carries no payload
/// itself — `event_data` on [`Event`] holds the codec-encoded typed record
/// for whichever kind this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunCompleted,
    RunFailed,
    RunCancelled,
    StepScheduled,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetrying,
    WaitStarted,
    WaitFired,
    WaitCancelled,
    HookCreated,
    HookReceived,
}

impl EventKind {
    pub fn is_terminal_run_event(&self) -> bool {
        matches!(
            self,
            EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunStarted => "run_started",
            EventKind::RunCompleted => "run_completed",
            EventKind::RunFailed => "run_failed",
            EventKind::RunCancelled => "run_cancelled",
            EventKind::StepScheduled => "step_scheduled",
            EventKind::StepStarted => "step_started",
            EventKind::StepCompleted => "step_completed",
            EventKind::StepFailed => "step_failed",
            EventKind::StepRetrying => "step_retrying",
            EventKind::WaitStarted => "wait_started",
            EventKind::WaitFired => "wait_fired",
            EventKind::WaitCancelled => "wait_cancelled",
            EventKind::HookCreated => "hook_created",
            EventKind::HookReceived => "hook_received",
        }
    }
}

/// One append-only record. `ordinal` is the dense, zero-based sequence
/// number within `run_id`, assigned by the store at append time — never by
/// the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub run_id: RunId,
    pub ordinal: i64,
    pub event_type: EventKind,
    /// Present for step/hook/wait events, ties this event back to the
    /// call-site counter that produced the intent it resolves.
    pub correlation_id: Option<CorrelationId>,
    /// Codec-encoded (and possibly encrypted) payload. Opaque to storage.
    pub event_data: Vec<u8>,
    pub spec_version: u32,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        run_id: RunId,
        event_type: EventKind,
        correlation_id: Option<CorrelationId>,
        event_data: Vec<u8>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            run_id,
            ordinal: -1, // assigned by the store
            event_type,
            correlation_id,
            event_data,
            spec_version: 1,
            created_at: Utc::now(),
        }
    }
}

/// Wire format for `StepScheduled`'s `event_data`. A step's name isn't a
/// field on [`Event`] itself, so it travels packed ahead of the (possibly
/// encrypted) args blob: `[u16 BE name_len][name bytes][args]`.
pub fn pack_step_scheduled(name: &str, args: Vec<u8>) -> Vec<u8> {
    let name_bytes = name.as_bytes();
    let mut out = Vec::with_capacity(2 + name_bytes.len() + args.len());
    out.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(name_bytes);
    out.extend_from_slice(&args);
    out
}

/// Inverse of [`pack_step_scheduled`]. Falls back to an empty name over the
/// whole blob as args if the packed header is malformed.
pub fn unpack_step_scheduled(data: &[u8]) -> (String, Vec<u8>) {
    if data.len() < 2 {
        return (String::new(), data.to_vec());
    }
    let name_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() < 2 + name_len {
        return (String::new(), data.to_vec());
    }
    let name = String::from_utf8_lossy(&data[2..2 + name_len]).into_owned();
    let args = data[2 + name_len..].to_vec();
    (name, args)
}

/// Wire format for `StepRetrying`'s `event_data`: the absolute instant the
/// step becomes eligible for redelivery, as `[i64 BE millis since epoch]`.
/// `StepRunner::commit_retry` is the only producer; `EventStore` impls read
/// it back to populate `StepView.retry_after`.
pub fn pack_step_retrying(retry_after: DateTime<Utc>) -> Vec<u8> {
    retry_after.timestamp_millis().to_be_bytes().to_vec()
}

/// Inverse of [`pack_step_retrying`]. Returns `None` if the field is
/// missing or malformed rather than failing the whole event apply.
pub fn unpack_step_retrying(data: &[u8]) -> Option<DateTime<Utc>> {
    let millis = i64::from_be_bytes(data.get(0..8)?.try_into().ok()?);
    chrono::TimeZone::timestamp_millis_opt(&Utc, millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_step_scheduled_payloads() {
        let packed = pack_step_scheduled("charge_card", b"ciphertext".to_vec());
        let (name, args) = unpack_step_scheduled(&packed);
        assert_eq!(name, "charge_card");
        assert_eq!(args, b"ciphertext");
    }

    #[test]
    fn terminal_run_events_are_recognized() {
        assert!(EventKind::RunCompleted.is_terminal_run_event());
        assert!(EventKind::RunFailed.is_terminal_run_event());
        assert!(!EventKind::StepScheduled.is_terminal_run_event());
    }

    #[test]
    fn packs_and_unpacks_step_retrying_payloads() {
        let retry_after = Utc::now();
        let packed = pack_step_retrying(retry_after);
        let unpacked = unpack_step_retrying(&packed).unwrap();
        assert_eq!(unpacked.timestamp_millis(), retry_after.timestamp_millis());
    }

    #[test]
    fn unpack_step_retrying_rejects_a_short_buffer() {
        assert!(unpack_step_retrying(&[1, 2, 3]).is_none());
    }
}
