//! The contract the control plane drives the rule engine through.

use super::{ModuleConfig, ModuleResult};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

/// Where a module is in its lifecycle.
///
/// `Stopped -> Configured -> Running -> Stopped`; any step may land in
/// `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    /// No configuration applied, or stopped after running.
    Stopped,
    /// Configuration applied; rules may be loaded but no traffic is seen.
    Configured,
    /// Inspecting transactions.
    Running,
    /// Gave up; the reason is kept for the operator.
    Failed {
        /// Why the module failed.
        reason: String,
    },
}

impl ModuleStatus {
    /// Transactions are inspected only in this state.
    #[must_use]
    pub fn accepts_traffic(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Rules can be registered before the module starts.
    #[must_use]
    pub fn accepts_rules(&self) -> bool {
        matches!(self, Self::Configured)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Configured => f.write_str("configured"),
            Self::Running => f.write_str("running"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// What a module offers the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Evaluates rules at buffered phase boundaries.
    RuleExecution,
    /// Evaluates rules over header and body streams.
    StreamInspection,
    /// Accepts configuration changes while running.
    HotReload,
    /// Exports counters and gauges.
    Metrics,
}

/// Identity reported to the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Registry name.
    pub name: &'static str,
    /// Crate version the module was built from.
    pub version: &'static str,
    /// One-line summary.
    pub description: &'static str,
    /// Advertised capabilities.
    pub capabilities: &'static [Capability],
}

impl ModuleInfo {
    /// `true` if `capability` is advertised.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Counters and gauges exported by a module, keyed by metric name.
#[derive(Debug, Clone, Default)]
pub struct MetricsPayload {
    /// Monotonic counts.
    pub counters: BTreeMap<String, u64>,
    /// Point-in-time values.
    pub gauges: BTreeMap<String, f64>,
}

impl MetricsPayload {
    /// Empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a counter.
    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.counters.insert(name.into(), value);
    }

    /// Sets a gauge.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    /// Renders the Prometheus text exposition format, counters first.
    #[must_use]
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut out = String::new();
        for (name, value) in &self.counters {
            let _ = writeln!(out, "# TYPE {prefix}_{name} counter");
            let _ = writeln!(out, "{prefix}_{name} {value}");
        }
        for (name, value) in &self.gauges {
            let _ = writeln!(out, "# TYPE {prefix}_{name} gauge");
            let _ = writeln!(out, "{prefix}_{name} {value}");
        }
        out
    }
}

/// Lifecycle contract between the control plane and the rule engine.
///
/// The control plane calls `init`, optionally loads rules, calls `start`,
/// polls `status` / `metrics` / `heartbeat`, may `reload`, and finally
/// calls `stop`.
pub trait ModuleContract: Send + Sync {
    /// Identity and capabilities.
    fn info(&self) -> ModuleInfo;

    /// Applies `config`, moving `Stopped -> Configured`.
    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()>;

    /// Begins inspecting traffic, moving `Configured -> Running`.
    fn start(&mut self) -> ModuleResult<()>;

    /// Stops inspecting traffic, moving `Running -> Stopped`.
    fn stop(&mut self) -> ModuleResult<()>;

    /// Applies new configuration without a restart.
    fn reload(&mut self, config: ModuleConfig) -> ModuleResult<()>;

    /// Current lifecycle state.
    fn status(&self) -> ModuleStatus;

    /// Current counters and gauges.
    fn metrics(&self) -> MetricsPayload;

    /// Liveness probe.
    fn heartbeat(&self) -> bool {
        self.status().accepts_traffic()
    }
}
