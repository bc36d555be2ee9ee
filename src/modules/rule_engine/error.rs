//! Rule engine error types

use thiserror::Error;

/// Errors produced while building or executing rules.
///
/// The variants follow the status classes the engine reasons about:
/// `NotFound` is a normal resolution outcome, `Declined` is an accepted
/// "not mine" answer from a callback, and `Resource` is the only class the
/// top-level runners hand back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A named item (rule, field, transformation, driver) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid argument or state.
    #[error("invalid: {0}")]
    Invalid(String),

    /// A value conflicts with an existing definition.
    #[error("bad value: {0}")]
    BadValue(String),

    /// An item with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A callback declined to handle the request.
    #[error("declined")]
    Declined,

    /// The requested feature is not supported by this item.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A list or chain recursion budget was exhausted.
    #[error("{kind} recursion limit reached")]
    RecursionLimit {
        /// Which budget ran out ("list" or "chain").
        kind: &'static str,
    },

    /// Operator execution failed.
    #[error("operator '{name}' failed: {message}")]
    Operator {
        /// Operator name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// Transformation execution failed.
    #[error("transformation '{name}' failed: {message}")]
    Transformation {
        /// Transformation name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// Action execution failed.
    #[error("action '{name}' failed: {message}")]
    Action {
        /// Action name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// Resource exhaustion; aborts the current phase.
    #[error("resource error: {0}")]
    Resource(String),

    /// A callback failed with an unclassified error.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for rule engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Shorthand for [`EngineError::Invalid`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Shorthand for [`EngineError::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Returns `true` for "not found" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` when a callback declined.
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::Declined)
    }

    /// Returns `true` for errors that must abort phase processing.
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::not_found("ARGS:a");
        assert_eq!(err.to_string(), "not found: ARGS:a");

        let err = EngineError::RecursionLimit { kind: "list" };
        assert_eq!(err.to_string(), "list recursion limit reached");

        let err = EngineError::Operator {
            name: "rx".to_string(),
            message: "bad input".to_string(),
        };
        assert!(err.to_string().contains("rx"));
    }

    #[test]
    fn test_error_classes() {
        assert!(EngineError::not_found("x").is_not_found());
        assert!(EngineError::Declined.is_declined());
        assert!(EngineError::Resource("oom".into()).is_resource());
        assert!(!EngineError::invalid("x").is_resource());
    }
}
