//! Lifecycle errors reported to the control plane.

use super::ModuleStatus;
use crate::config::ConfigError;
use crate::modules::rule_engine::EngineError;
use thiserror::Error;

/// Result of a lifecycle call.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Why a lifecycle call was refused.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// The supplied TOML did not describe a usable configuration.
    #[error("configuration rejected: {0}")]
    Config(String),

    /// The engine refused to start or reconfigure.
    #[error("rule engine: {0}")]
    Engine(#[from] EngineError),

    /// The call is not valid in the current lifecycle state.
    #[error("cannot {operation} while {status}")]
    WrongState {
        /// What the caller asked for.
        operation: &'static str,
        /// State the module was in.
        status: ModuleStatus,
    },
}

impl From<ConfigError> for ModuleError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
