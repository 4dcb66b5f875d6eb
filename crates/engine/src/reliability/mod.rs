//! Reliability patterns for durable execution
//!
//! - [`RetryPolicy`] - Configurable retry with exponential backoff and
//!   jitter, consulted by [`crate::step::StepRunner`] via a caller-supplied
//!   classifier (no default retry-classification policy is shipped, see
//!   DESIGN.md).
//!
//! The teacher's circuit breaker (`CircuitBreakerConfig`/`CircuitState`)
//! and its distributed, store-backed variant are dropped here: the
//! teacher's own module doc called the distributed version "FUTURE
//! FEATURE... not yet integrated", and nothing in this crate's scheduler
//! or step runner calls either — see DESIGN.md.

mod retry;

pub use retry::RetryPolicy;
