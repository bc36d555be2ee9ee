//! Rule engine configuration types

use super::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verbosity of rule engine diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDebugLevel {
    /// Errors only.
    Error = 0,
    /// Warnings.
    Warning,
    /// Notable events.
    #[default]
    Notice,
    /// Informational.
    Info,
    /// Debugging; enables injected-rule phase checks.
    Debug,
    /// Everything.
    Trace,
}

impl RuleDebugLevel {
    const ALL: [RuleDebugLevel; 6] = [
        Self::Error,
        Self::Warning,
        Self::Notice,
        Self::Info,
        Self::Debug,
        Self::Trace,
    ];

    /// Lower-case level name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Parses a level number or a case-insensitive level name.
    pub fn parse(value: &str) -> EngineResult<Self> {
        let value = value.trim();
        if let Ok(number) = value.parse::<usize>() {
            return Self::ALL.get(number).copied().ok_or_else(|| {
                EngineError::invalid(format!("rule debug level {number} out of range"))
            });
        }
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| EngineError::invalid(format!("unknown rule debug level '{value}'")))
    }
}

impl fmt::Display for RuleDebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecLogConfig {
    /// Build per-rule execution records.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records kept per transaction.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for ExecLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records: default_max_records(),
        }
    }
}

/// Main rule engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngineConfig {
    /// Whether rules run at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rule debug level
    #[serde(default)]
    pub debug_log_level: RuleDebugLevel,

    /// Nesting depth of list values the operator descends into
    #[serde(default = "default_list_recursion_limit")]
    pub list_recursion_limit: usize,

    /// Maximum number of chained rules run below a rule
    #[serde(default = "default_chain_recursion_limit")]
    pub chain_recursion_limit: usize,

    /// Collection capture data goes to when a rule names none
    #[serde(default = "default_capture_collection")]
    pub capture_collection: String,

    /// Record per-rule timing on the transaction
    #[serde(default)]
    pub trace_rules: bool,

    /// Execution log
    #[serde(default)]
    pub exec_log: ExecLogConfig,
}

fn default_true() -> bool {
    true
}

fn default_max_records() -> usize {
    1024
}

fn default_list_recursion_limit() -> usize {
    5
}

fn default_chain_recursion_limit() -> usize {
    10
}

fn default_capture_collection() -> String {
    "CAPTURE".to_string()
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_log_level: RuleDebugLevel::default(),
            list_recursion_limit: default_list_recursion_limit(),
            chain_recursion_limit: default_chain_recursion_limit(),
            capture_collection: default_capture_collection(),
            trace_rules: false,
            exec_log: ExecLogConfig::default(),
        }
    }
}

impl RuleEngineConfig {
    /// Applies a configuration directive by name.
    ///
    /// Only `RuleEngineDebugLogLevel` is recognized; other names are
    /// [`EngineError::NotFound`].
    pub fn set_directive(&mut self, name: &str, value: &str) -> EngineResult<()> {
        if name.eq_ignore_ascii_case("RuleEngineDebugLogLevel") {
            self.debug_log_level = RuleDebugLevel::parse(value)?;
            return Ok(());
        }
        Err(EngineError::not_found(format!("directive '{name}'")))
    }

    /// Debug-level diagnostics are on.
    pub fn debug_enabled(&self) -> bool {
        self.debug_log_level >= RuleDebugLevel::Debug
    }
}
