//! Load-aware task acceptance, independent of what is being accepted.
//!
//! Carried over from the teacher's worker pool: nothing about watermark
//! hysteresis is specific to workflows versus any other task, so the
//! acceptance state machine is reused unchanged.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackpressureConfig {
    pub high_watermark: f64,
    pub low_watermark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self { high_watermark: 0.9, low_watermark: 0.7 }
    }
}

impl BackpressureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Result<(), BackpressureError> {
        if self.low_watermark >= self.high_watermark {
            return Err(BackpressureError::InvalidConfig("low_watermark must be less than high_watermark".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackpressureError {
    #[error("invalid backpressure configuration: {0}")]
    InvalidConfig(String),
}

/// Tracks current load and applies high/low watermark hysteresis so a
/// scheduler doesn't flap between accepting and rejecting work near the
/// threshold.
pub struct BackpressureState {
    config: BackpressureConfig,
    current_load: AtomicUsize,
    max_concurrency: usize,
    accepting: AtomicBool,
}

impl BackpressureState {
    pub fn new(config: BackpressureConfig, max_concurrency: usize) -> Self {
        Self {
            config,
            current_load: AtomicUsize::new(0),
            max_concurrency,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn should_accept(&self) -> bool {
        let currently_accepting = self.accepting.load(Ordering::Relaxed);
        let ratio = self.load_ratio();

        if currently_accepting {
            if ratio >= self.config.high_watermark {
                self.accepting.store(false, Ordering::Relaxed);
                return false;
            }
            true
        } else if ratio <= self.config.low_watermark {
            self.accepting.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn load_ratio(&self) -> f64 {
        self.current_load.load(Ordering::Relaxed) as f64 / self.max_concurrency.max(1) as f64
    }

    pub fn task_started(&self) {
        self.current_load.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.current_load.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn available_slots(&self) -> usize {
        self.max_concurrency.saturating_sub(self.current_load.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_accepting_at_high_watermark_and_resumes_at_low() {
        let config = BackpressureConfig::new().with_high_watermark(0.8).with_low_watermark(0.5);
        let state = BackpressureState::new(config, 10);

        for _ in 0..8 {
            state.task_started();
        }
        assert!(!state.should_accept());

        for _ in 0..5 {
            state.task_completed();
        }
        assert!(state.should_accept());
    }

    #[test]
    fn hysteresis_prevents_oscillation_between_watermarks() {
        let config = BackpressureConfig::new().with_high_watermark(0.8).with_low_watermark(0.5);
        let state = BackpressureState::new(config, 10);

        for _ in 0..8 {
            state.task_started();
        }
        assert!(!state.should_accept());

        state.task_completed(); // 70% load, between watermarks
        assert!(!state.should_accept());
    }
}
