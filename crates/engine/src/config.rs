//! Per-deployment environment configuration.
//!
//! Grounded on `engine/executor.rs`'s `ExecutorConfig` (typed struct,
//! `Default` for the overridable fields) generalized to read from the
//! process environment, in the shape spec §6's configuration table
//! describes. CLI flag parsing is out of scope; a deployment sets
//! environment variables and the supervisor that runs the worker binary
//! restarts it on change.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::ids::WorkflowName;

/// Selects which [`crate::storage::EventStore`]/[`crate::queue::Queue`]/
/// [`crate::stream::Streamer`] implementation a deployment runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetWorld {
    Memory,
    Postgres,
}

impl TargetWorld {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(ConfigError::InvalidValue {
                name: "TARGET_WORLD",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("{name} must be 32 bytes of base64, got invalid value {value:?}")]
    InvalidKey { name: &'static str, value: String },

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// The environment table spec §6 names, plus the overridable queue-lifetime
/// constants `queue/lifetime.rs`'s `LifetimeManager` otherwise defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub deployment_key: [u8; 32],
    pub project_id: String,
    pub deployment_id: String,
    pub target_world: TargetWorld,
    pub queue_message_lifetime: Duration,
    pub queue_lifetime_buffer: Duration,
    pub workflow_queue_prefix: String,
    pub step_queue_prefix: String,
}

impl Config {
    /// Reads the full table from the process environment. `.env` files are
    /// loaded by the binary entrypoint via `dotenvy::dotenv()` before this
    /// runs, not here — this function only ever reads `std::env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let deployment_key = read_deployment_key("DEPLOYMENT_KEY")?;
        let project_id = require_env("PROJECT_ID")?;
        let deployment_id = require_env("DEPLOYMENT_ID")?;
        let target_world = TargetWorld::parse(&require_env("TARGET_WORLD")?)?;

        let queue_message_lifetime = optional_secs("QUEUE_MESSAGE_LIFETIME_SECS")?
            .unwrap_or_else(|| Duration::from_secs(24 * 60 * 60));
        let queue_lifetime_buffer =
            optional_secs("QUEUE_LIFETIME_BUFFER_SECS")?.unwrap_or_else(|| Duration::from_secs(60 * 60));

        Ok(Self {
            deployment_key,
            project_id,
            deployment_id,
            target_world,
            queue_message_lifetime,
            queue_lifetime_buffer,
            workflow_queue_prefix: crate::scheduler::WORKFLOW_QUEUE_PREFIX.to_string(),
            step_queue_prefix: crate::scheduler::STEP_QUEUE_PREFIX.to_string(),
        })
    }

    pub fn workflow_queue_name(&self, workflow_name: &WorkflowName) -> String {
        format!("{}{}", self.workflow_queue_prefix, workflow_name.as_str())
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}

fn read_deployment_key(name: &'static str) -> Result<[u8; 32], ConfigError> {
    use base64::Engine;
    let raw = require_env(name)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&raw)
        .map_err(|_| ConfigError::InvalidKey { name, value: raw.clone() })?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::InvalidKey { name, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_world_parses_known_values() {
        assert_eq!(TargetWorld::parse("memory").unwrap(), TargetWorld::Memory);
        assert_eq!(TargetWorld::parse("postgres").unwrap(), TargetWorld::Postgres);
        assert!(TargetWorld::parse("bogus").is_err());
    }

    #[test]
    fn rejects_a_deployment_key_that_is_not_32_bytes() {
        use base64::Engine;
        std::env::set_var("DEPLOYMENT_KEY_TEST", base64::engine::general_purpose::STANDARD.encode(b"too short"));
        let err = read_deployment_key("DEPLOYMENT_KEY_TEST");
        std::env::remove_var("DEPLOYMENT_KEY_TEST");
        assert!(matches!(err, Err(ConfigError::InvalidKey { .. })));
    }

    #[test]
    fn workflow_queue_name_uses_the_scheduler_prefix() {
        let config = Config {
            deployment_key: [0u8; 32],
            project_id: "proj".into(),
            deployment_id: "dep".into(),
            target_world: TargetWorld::Memory,
            queue_message_lifetime: Duration::from_secs(1),
            queue_lifetime_buffer: Duration::from_secs(1),
            workflow_queue_prefix: crate::scheduler::WORKFLOW_QUEUE_PREFIX.to_string(),
            step_queue_prefix: crate::scheduler::STEP_QUEUE_PREFIX.to_string(),
        };
        assert_eq!(config.workflow_queue_name(&WorkflowName::new("billing")), "workflow:billing");
    }
}
