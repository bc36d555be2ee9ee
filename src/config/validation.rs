//! Checks applied to a parsed configuration before the engine sees it.

use super::error::{ConfigError, ConfigResult};
use crate::modules::rule_engine::RuleEngineConfig;
use std::fmt;
use tracing::warn;

/// How serious an [`Issue`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The configuration cannot be used.
    Error,
    /// Usable, but probably not what was meant.
    Warning,
}

/// One finding against one configuration key.
#[derive(Debug, Clone)]
pub struct Issue {
    /// Dotted key path, e.g. `exec_log.max_records`.
    pub field: &'static str,
    /// What is wrong.
    pub message: String,
    /// Error or warning.
    pub severity: Severity,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Findings collected across every validator.
#[derive(Debug, Default)]
pub struct Report {
    issues: Vec<Issue>,
}

impl Report {
    /// Empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error.
    pub fn error(&mut self, field: &'static str, message: impl Into<String>) {
        self.push(field, message.into(), Severity::Error);
    }

    /// Records a warning.
    pub fn warn(&mut self, field: &'static str, message: impl Into<String>) {
        self.push(field, message.into(), Severity::Warning);
    }

    fn push(&mut self, field: &'static str, message: String, severity: Severity) {
        self.issues.push(Issue {
            field,
            message,
            severity,
        });
    }

    /// Every finding, in the order recorded.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Findings of `severity`.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    /// `true` when no errors were recorded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.with_severity(Severity::Error).next().is_none()
    }

    /// Logs the warnings and turns any errors into [`ConfigError::Rejected`].
    pub fn finish(self) -> ConfigResult<()> {
        for issue in self.with_severity(Severity::Warning) {
            warn!(field = issue.field, "{}", issue.message);
        }
        if self.is_ok() {
            return Ok(());
        }
        Err(ConfigError::Rejected {
            issues: self
                .with_severity(Severity::Error)
                .map(ToString::to_string)
                .collect(),
        })
    }
}

/// A check over a parsed configuration.
pub trait Validator: fmt::Debug + Send + Sync {
    /// Adds findings about `config` to `report`.
    fn check(&self, config: &RuleEngineConfig, report: &mut Report);
}

/// Rejects unusable recursion budgets, an unnamed capture collection and an
/// exec log that can hold nothing.
#[derive(Debug, Default)]
pub struct LimitsValidator;

impl LimitsValidator {
    /// Create a new limits validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn check_budget(report: &mut Report, field: &'static str, value: usize, warn_above: usize) {
    if value == 0 {
        report.error(field, "must be at least 1");
    } else if value > warn_above {
        report.warn(field, format!("{value} is far above the usual depth of {warn_above} or less"));
    }
}

impl Validator for LimitsValidator {
    fn check(&self, config: &RuleEngineConfig, report: &mut Report) {
        check_budget(report, "list_recursion_limit", config.list_recursion_limit, 32);
        check_budget(report, "chain_recursion_limit", config.chain_recursion_limit, 64);

        if config.capture_collection.trim().is_empty() {
            report.error("capture_collection", "needs a collection name");
        }
        if config.exec_log.enabled && config.exec_log.max_records == 0 {
            report.error("exec_log.max_records", "must be at least 1 while the exec log is enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(config: &RuleEngineConfig) -> Report {
        let mut report = Report::new();
        LimitsValidator::new().check(config, &mut report);
        report
    }

    #[test]
    fn test_defaults_pass() {
        let report = check(&RuleEngineConfig::default());
        assert!(report.is_ok());
        assert!(report.issues().is_empty());
    }

    #[test]
    fn test_zero_budgets_rejected() {
        let mut config = RuleEngineConfig::default();
        config.list_recursion_limit = 0;
        config.chain_recursion_limit = 0;

        let report = check(&config);
        let fields: Vec<&str> = report.with_severity(Severity::Error).map(|i| i.field).collect();
        assert_eq!(fields, vec!["list_recursion_limit", "chain_recursion_limit"]);
    }

    #[test]
    fn test_deep_budget_only_warns() {
        let mut config = RuleEngineConfig::default();
        config.chain_recursion_limit = 1000;
        let report = check(&config);
        assert!(report.is_ok());
        assert_eq!(report.with_severity(Severity::Warning).count(), 1);
        assert!(report.finish().is_ok());
    }

    #[test]
    fn test_exec_log_cap() {
        let mut config = RuleEngineConfig::default();
        config.exec_log.max_records = 0;
        assert!(!check(&config).is_ok());

        config.exec_log.enabled = false;
        assert!(check(&config).is_ok());
    }

    #[test]
    fn test_finish_reports_errors() {
        let mut config = RuleEngineConfig::default();
        config.capture_collection = "  ".to_string();
        match check(&config).finish() {
            Err(ConfigError::Rejected { issues }) => {
                assert_eq!(issues, vec!["capture_collection: needs a collection name".to_string()]);
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
