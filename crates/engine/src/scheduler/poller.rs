//! Adaptive-interval claiming from a queue prefix.
//!
//! Grounded on `worker/poller.rs`'s `TaskPoller`, rebased from
//! `WorkflowEventStore::claim_task(worker_id, activity_types, batch)` onto
//! [`Queue::claim`]'s prefix-scan contract — this crate has no per-worker
//! task lease, just queue visibility timeouts, so there is no worker id to
//! thread through.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::instrument;

use crate::queue::{MessageMeta, Queue, QueueError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    pub backoff_multiplier: f64,
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One claimed message: queue name, message id (for delete/change-visibility),
/// payload, and delivery metadata.
pub type ClaimedMessage = (String, String, Vec<u8>, MessageMeta);

pub struct QueuePoller {
    queue: Arc<dyn Queue>,
    prefix: String,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl QueuePoller {
    pub fn new(queue: Arc<dyn Queue>, prefix: impl Into<String>, config: PollerConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            queue,
            prefix: prefix.into(),
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    #[instrument(skip(self), fields(prefix = %self.prefix, interval_ms = tracing::field::Empty))]
    pub async fn poll(&mut self) -> Result<Vec<ClaimedMessage>, PollerError> {
        if *self.shutdown_rx.borrow() {
            return Ok(vec![]);
        }

        let claimed = self.queue.claim(&self.prefix, self.config.batch_size).await?;

        if claimed.is_empty() {
            self.increase_backoff();
        } else {
            self.reset_backoff();
        }

        tracing::Span::current().record("interval_ms", self.current_interval.as_millis());
        Ok(claimed)
    }

    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => true,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(self.current_interval.as_secs_f64() * self.config.backoff_multiplier);
        self.current_interval = next.min(self.config.max_interval);
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
