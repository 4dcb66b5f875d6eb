//! The "controlled globals" an orchestrator invocation is allowed to touch.
//!
//! No network/filesystem/OS handle is placed in [`GlobalBag`]: the type
//! simply has no constructor for them, so "no ambient I/O" is enforced at
//! the type level rather than policed at runtime.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::ids::RunId;

/// Deterministic clock: seeded from the run's `created_at`, advances only
/// when the orchestrator code explicitly asks it to (e.g. after a resolved
/// `ctx.wait`), never by real wall-clock time during a single replay pass.
#[derive(Debug, Clone)]
pub struct SandboxClock {
    current: DateTime<Utc>,
}

impl SandboxClock {
    pub fn new(run_created_at: DateTime<Utc>) -> Self {
        Self { current: run_created_at }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.current
    }

    /// Advances the clock by a resolved wait duration. Only the replay
    /// engine calls this, after confirming the corresponding `wait_fired`
    /// event is in the log — orchestrator code never calls it directly.
    pub fn advance(&mut self, by: ChronoDuration) {
        self.current += by;
    }
}

/// Deterministic id generation seeded from `(run_id, ordinal)`, so two
/// replays of the same prefix produce byte-identical ids without either
/// replay touching the OS RNG.
pub struct DeterministicIdGen {
    rng: SmallRng,
}

impl DeterministicIdGen {
    pub fn new(run_id: RunId, ordinal: u32) -> Self {
        let mut seed = [0u8; 32];
        let run_bytes = run_id.as_uuid().into_bytes();
        seed[..16].copy_from_slice(&run_bytes);
        seed[16..20].copy_from_slice(&ordinal.to_le_bytes());
        Self { rng: SmallRng::from_seed(seed) }
    }

    /// A 16-byte, ULID-shaped identifier: fresh 128 bits of the
    /// deterministic stream, hex-encoded.
    pub fn next_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Everything an orchestrator invocation is handed: a deterministic clock
/// and id generator, nothing else. Passed by reference into
/// `Orchestrator::run` via `OrchestrationContext`.
pub struct GlobalBag {
    clock: SandboxClock,
    id_gen: DeterministicIdGen,
}

impl GlobalBag {
    pub fn new(run_id: RunId, run_created_at: DateTime<Utc>, ordinal: u32) -> Self {
        Self {
            clock: SandboxClock::new(run_created_at),
            id_gen: DeterministicIdGen::new(run_id, ordinal),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn next_id(&mut self) -> String {
        self.id_gen.next_id()
    }

    pub(crate) fn clock_mut(&mut self) -> &mut SandboxClock {
        &mut self.clock
    }
}

/// One outstanding capability call an orchestrator made during a replay
/// pass that the log could not resolve yet.
#[derive(Debug, Clone)]
pub enum Intent {
    Step { correlation_id: crate::ids::CorrelationId, name: String, args: Vec<u8> },
    Hook { correlation_id: crate::ids::CorrelationId, token: String },
    Wait { correlation_id: crate::ids::CorrelationId, fire_at: DateTime<Utc> },
}

/// The value propagated as the `Err` arm of the orchestrator's top-level
/// `Result` when its future parks on an unresolved capability — a plain
/// Rust value, not a panic/exception (see `orchestration` module docs).
#[derive(Debug, Clone, Default)]
pub struct Suspension {
    pub intents: Vec<Intent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_produces_same_ids() {
        let run_id = RunId::new();
        let mut a = DeterministicIdGen::new(run_id, 0);
        let mut b = DeterministicIdGen::new(run_id, 0);
        assert_eq!(a.next_id(), b.next_id());
    }

    #[test]
    fn different_ordinals_diverge() {
        let run_id = RunId::new();
        let mut a = DeterministicIdGen::new(run_id, 0);
        let mut b = DeterministicIdGen::new(run_id, 1);
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn clock_only_advances_explicitly() {
        let start = Utc::now();
        let clock = SandboxClock::new(start);
        assert_eq!(clock.now(), start);
    }
}
