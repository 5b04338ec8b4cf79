//! Service configuration.
//!
//! The only behavioural switch is the [`ExecutionModel`]. It is fixed when an
//! [`crate::ActionQueueService`] is constructed and never changes afterwards.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How the background context behaves over the lifetime of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// The background context can be suspended or terminated and later
    /// resumed. Calls go through the retry queue.
    #[default]
    Suspendable,
    /// The background context stays connected for the life of the process.
    /// Calls bypass the queue and have no retry semantics.
    Persistent,
}

impl ExecutionModel {
    /// Returns `true` if calls must be queued.
    pub fn requires_queueing(self) -> bool {
        matches!(self, Self::Suspendable)
    }
}

impl std::fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspendable => write!(f, "suspendable"),
            Self::Persistent => write!(f, "persistent"),
        }
    }
}

impl std::str::FromStr for ExecutionModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suspendable" => Ok(Self::Suspendable),
            "persistent" => Ok(Self::Persistent),
            other => Err(ConfigError::Invalid {
                message: format!(
                    "unknown execution model '{other}' (expected 'suspendable' or 'persistent')"
                ),
            }),
        }
    }
}

/// Configuration for an [`crate::ActionQueueService`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Execution model of the background context.
    pub execution_model: ExecutionModel,
}

impl BridgeConfig {
    /// Creates a configuration for the given execution model.
    pub fn new(execution_model: ExecutionModel) -> Self {
        Self { execution_model }
    }

    /// Parses a JSON configuration document. Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }
}
