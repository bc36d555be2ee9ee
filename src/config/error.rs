//! Errors from loading and saving rule engine configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded or saved.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("no configuration at {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// File being written.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or has the wrong shape.
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("cannot render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    /// A validator rejected the configuration.
    #[error("rejected: {}", .issues.join("; "))]
    Rejected {
        /// One `field: message` entry per error.
        issues: Vec<String>,
    },
}

/// Result of a configuration operation.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_lists_issues() {
        let err = ConfigError::Rejected {
            issues: vec!["a: bad".to_string(), "b: worse".to_string()],
        };
        assert_eq!(err.to_string(), "rejected: a: bad; b: worse");
    }
}
