//! # Module Contract
//!
//! How the gateway control plane drives the rule engine: identity,
//! configuration, start/stop, metrics and liveness.

mod config;
mod contract;
mod error;

pub use config::ModuleConfig;
pub use contract::{Capability, MetricsPayload, ModuleContract, ModuleInfo, ModuleStatus};
pub use error::{ModuleError, ModuleResult};
