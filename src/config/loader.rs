//! Reading and writing `RuleEngineConfig` as TOML.

use super::error::{ConfigError, ConfigResult};
use super::validation::{Report, Validator};
use crate::modules::rule_engine::RuleEngineConfig;
use std::io;
use std::path::Path;
use tracing::debug;

/// Parses configuration and runs it past a chain of validators.
///
/// ```ignore
/// let config = ConfigLoader::new()
///     .with_validator(LimitsValidator::new())
///     .load("/etc/r0n/rule_engine.toml")?;
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// A loader with no validators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validator; validators run in the order added.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<RuleEngineConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        debug!(path = %path.display(), bytes = text.len(), "Read rule engine configuration");
        self.load_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn load_str(&self, text: &str) -> ConfigResult<RuleEngineConfig> {
        let config = toml::from_str(text)?;
        self.check(&config)?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<RuleEngineConfig> {
        match self.load(path) {
            Err(ConfigError::NotFound(path)) => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(RuleEngineConfig::default())
            },
            other => other,
        }
    }

    /// Runs every validator over `config`.
    pub fn check(&self, config: &RuleEngineConfig) -> ConfigResult<()> {
        let mut report = Report::new();
        for validator in &self.validators {
            validator.check(config, &mut report);
        }
        report.finish()
    }

    /// Writes `config` to `path` as TOML.
    pub fn save<P: AsRef<Path>>(&self, config: &RuleEngineConfig, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(config)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
