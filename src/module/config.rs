//! Raw module configuration as forwarded by the control plane.

use crate::config::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use std::path::Path;

/// The module's TOML section, untouched.
///
/// The module decides how to type it; an absent or blank section means
/// "use defaults".
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    raw: Option<String>,
}

impl ModuleConfig {
    /// No configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a TOML section.
    #[must_use]
    pub fn from_raw(raw: String) -> Self {
        Self { raw: Some(raw) }
    }

    /// Reads a TOML section from `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_raw(raw))
    }

    /// The TOML text, if any was supplied.
    #[must_use]
    pub fn raw_config(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// `true` when nothing but whitespace was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.as_deref().map_or(true, |raw| raw.trim().is_empty())
    }

    /// Deserializes the section, or `None` when it is empty.
    pub fn parse<T: DeserializeOwned>(&self) -> ConfigResult<Option<T>> {
        match self.raw.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Ok(Some(toml::from_str(raw)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::rule_engine::RuleEngineConfig;
    use tempfile::tempdir;

    #[test]
    fn test_module_config_raw() {
        assert!(ModuleConfig::new().is_empty());
        assert!(ModuleConfig::from_raw("  \n".to_string()).is_empty());
        let config = ModuleConfig::from_raw("enabled = false".to_string());
        assert_eq!(config.raw_config(), Some("enabled = false"));
    }

    #[test]
    fn test_module_config_parse() {
        let parsed: Option<RuleEngineConfig> = ModuleConfig::new().parse().unwrap();
        assert!(parsed.is_none());

        let config = ModuleConfig::from_raw("list_recursion_limit = 2".to_string());
        let parsed: RuleEngineConfig = config.parse().unwrap().unwrap();
        assert_eq!(parsed.list_recursion_limit, 2);

        let bad = ModuleConfig::from_raw("list_recursion_limit = \"deep\"".to_string());
        assert!(matches!(bad.parse::<RuleEngineConfig>(), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_module_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rule_engine.toml");
        std::fs::write(&path, "trace_rules = true\n").unwrap();

        let config = ModuleConfig::from_file(&path).unwrap();
        assert_eq!(config.raw_config(), Some("trace_rules = true\n"));

        let missing = ModuleConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }
}
