//! # Rule Engine Configuration
//!
//! `RuleEngineConfig` is read from TOML by [`ConfigLoader`] and checked by
//! [`Validator`]s before an engine is built from it.
//!
//! ## Example Configuration
//!
//! ```toml
//! enabled = true
//! debug_log_level = "info"
//! list_recursion_limit = 5
//! chain_recursion_limit = 10
//! capture_collection = "CAPTURE"
//! trace_rules = false
//!
//! [exec_log]
//! enabled = true
//! max_records = 1024
//! ```

mod error;
mod loader;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::{Issue, LimitsValidator, Report, Severity, Validator};
