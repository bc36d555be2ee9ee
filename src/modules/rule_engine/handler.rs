//! Rule engine handler implementing ModuleContract

use super::config::RuleEngineConfig;
use super::engine::{EngineStats, RuleEngine};
use super::error::{EngineError, EngineResult};
use super::phase::HostState;
use super::tx::Transaction;
use crate::config::{LimitsValidator, Report, Validator};
use crate::module::{
    Capability, MetricsPayload, ModuleConfig, ModuleContract, ModuleError, ModuleInfo,
    ModuleResult, ModuleStatus,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rule engine handler implementing ModuleContract
pub struct RuleEngineHandler {
    /// Configuration
    config: RuleEngineConfig,

    /// Rule engine
    engine: Option<RuleEngine>,

    /// Current status
    status: ModuleStatus,

    /// Start time for uptime calculation
    started_at: Option<Instant>,
}

impl std::fmt::Debug for RuleEngineHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngineHandler")
            .field("config", &self.config)
            .field("engine", &self.engine.is_some())
            .field("status", &self.status)
            .finish()
    }
}

impl RuleEngineHandler {
    /// Create a new handler
    pub fn new() -> Self {
        Self::with_config(RuleEngineConfig::default())
    }

    /// Create a handler with custom configuration
    pub fn with_config(config: RuleEngineConfig) -> Self {
        Self {
            config,
            engine: None,
            status: ModuleStatus::Stopped,
            started_at: None,
        }
    }

    /// The engine, once initialized
    pub fn engine(&self) -> Option<&RuleEngine> {
        self.engine.as_ref()
    }

    /// Mutable engine access for loading rules before `start()`
    pub fn engine_mut(&mut self) -> Option<&mut RuleEngine> {
        self.engine.as_mut()
    }

    /// Engine statistics, once initialized
    pub fn stats(&self) -> Option<&Arc<EngineStats>> {
        self.engine.as_ref().map(RuleEngine::stats)
    }

    /// Number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.registry().rules().len())
    }

    /// Runs every buffered request and response phase over a transaction.
    ///
    /// Starts the transaction when needed. Rule errors are logged, never
    /// returned; only resource errors come back.
    pub fn inspect(&self, tx: &mut Transaction) -> EngineResult<()> {
        if !self.status.accepts_traffic() {
            return Err(EngineError::invalid(format!(
                "rule engine handler is {}",
                self.status
            )));
        }
        let Some(engine) = &self.engine else {
            return Err(EngineError::invalid("rule engine not initialized"));
        };
        if tx.rule_exec().is_none() {
            engine.tx_started(tx)?;
        }
        tx.flags.req_started = true;
        for state in [
            HostState::RequestHeader,
            HostState::Request,
            HostState::ResponseHeader,
            HostState::Response,
            HostState::Postprocess,
            HostState::Logging,
        ] {
            engine.notify_state(tx, state)?;
        }
        Ok(())
    }

    fn load_config(&mut self, config: &ModuleConfig) -> ModuleResult<()> {
        let Some(parsed) = config.parse::<RuleEngineConfig>()? else {
            return Ok(());
        };
        let mut report = Report::new();
        LimitsValidator::new().check(&parsed, &mut report);
        report.finish()?;
        self.config = parsed;
        debug!("Loaded rule engine configuration from TOML");
        Ok(())
    }

    fn expect_status(&self, operation: &'static str, expected: &ModuleStatus) -> ModuleResult<()> {
        if &self.status == expected {
            Ok(())
        } else {
            Err(ModuleError::WrongState {
                operation,
                status: self.status.clone(),
            })
        }
    }
}

impl Default for RuleEngineHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleContract for RuleEngineHandler {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "rule-engine",
            version: env!("CARGO_PKG_VERSION"),
            description: "Phase-ordered WAF rule execution engine",
            capabilities: &[
                Capability::RuleExecution,
                Capability::StreamInspection,
                Capability::HotReload,
                Capability::Metrics,
            ],
        }
    }

    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        self.expect_status("init", &ModuleStatus::Stopped)?;

        info!("Initializing rule engine handler");
        self.load_config(&config)?;

        match RuleEngine::new(self.config.clone()) {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => {
                self.status = ModuleStatus::Failed {
                    reason: e.to_string(),
                };
                return Err(e.into());
            },
        }

        self.status = ModuleStatus::Configured;
        info!(
            debug_level = %self.config.debug_log_level,
            "Rule engine handler initialized"
        );
        Ok(())
    }

    fn start(&mut self) -> ModuleResult<()> {
        self.expect_status("start", &ModuleStatus::Configured)?;

        self.started_at = Some(Instant::now());
        self.status = ModuleStatus::Running;

        info!("Rule engine handler started with {} rules", self.rule_count());
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        self.expect_status("stop", &ModuleStatus::Running)?;

        self.status = ModuleStatus::Stopped;
        self.started_at = None;

        info!("Rule engine handler stopped");
        Ok(())
    }

    fn reload(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        self.load_config(&config)?;
        match self.engine.as_mut() {
            Some(engine) => *engine.config_mut() = self.config.clone(),
            None => warn!("Reload before init; configuration kept for init"),
        }
        info!("Rule engine configuration reloaded");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        self.status.clone()
    }

    fn metrics(&self) -> MetricsPayload {
        let mut payload = MetricsPayload::new();

        if let Some(stats) = self.stats() {
            payload.counter("transactions", stats.transaction_count());
            payload.counter("phases", stats.phases.load(Ordering::Relaxed));
            payload.counter("rules_executed", stats.rule_count());
            payload.counter("actions_executed", stats.action_count());
            payload.counter("blocks", stats.block_count());
            payload.counter("errors", stats.error_count());
            payload.gauge("rules_per_transaction", stats.rules_per_transaction());
        }
        payload.gauge("rule_count", self.rule_count() as f64);

        if let Some(started) = self.started_at {
            payload.gauge("uptime_secs", started.elapsed().as_secs() as f64);
        }

        payload
    }

    fn heartbeat(&self) -> bool {
        self.status.accepts_traffic() && self.engine.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::rule_engine::registry::{ContextKind, EnableDirective, RuleMatcher};
    use crate::modules::rule_engine::rule::{ActionList, ContextId, Target};
    use crate::modules::rule_engine::field::Field;
    use crate::modules::rule_engine::phase::Phase;

    fn create_test_handler() -> RuleEngineHandler {
        let mut handler = RuleEngineHandler::new();
        handler.init(ModuleConfig::new()).unwrap();
        handler.start().unwrap();
        handler
    }

    #[test]
    fn test_handler_lifecycle() {
        let mut handler = RuleEngineHandler::new();
        assert_eq!(handler.status(), ModuleStatus::Stopped);

        handler.init(ModuleConfig::new()).unwrap();
        assert_eq!(handler.status(), ModuleStatus::Configured);
        assert!(matches!(
            handler.init(ModuleConfig::new()),
            Err(ModuleError::WrongState { operation: "init", .. })
        ));

        handler.start().unwrap();
        assert_eq!(handler.status(), ModuleStatus::Running);
        assert!(handler.heartbeat());

        handler.stop().unwrap();
        assert_eq!(handler.status(), ModuleStatus::Stopped);
        assert!(!handler.heartbeat());
    }

    #[test]
    fn test_handler_info() {
        let handler = RuleEngineHandler::new();
        let info = handler.info();
        assert_eq!(info.name, "rule-engine");
        assert!(info.supports(Capability::StreamInspection));
    }

    #[test]
    fn test_handler_toml_config() {
        let mut handler = RuleEngineHandler::new();
        let config = ModuleConfig::from_raw(
            "chain_recursion_limit = 4\ndebug_log_level = \"trace\"\n".to_string(),
        );
        handler.init(config).unwrap();
        let engine = handler.engine().unwrap();
        assert_eq!(engine.config().chain_recursion_limit, 4);
        assert!(engine.config().debug_enabled());
    }

    #[test]
    fn test_handler_bad_toml() {
        let mut handler = RuleEngineHandler::new();
        let config = ModuleConfig::from_raw("chain_recursion_limit = \"many\"".to_string());
        assert!(matches!(handler.init(config), Err(ModuleError::Config(_))));
        assert_eq!(handler.status(), ModuleStatus::Stopped);
    }

    #[test]
    fn test_handler_rejects_zero_limits() {
        let mut handler = RuleEngineHandler::new();
        let config = ModuleConfig::from_raw("list_recursion_limit = 0".to_string());
        match handler.init(config) {
            Err(ModuleError::Config(reason)) => assert!(reason.contains("list_recursion_limit")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_handler_reload() {
        let mut handler = create_test_handler();
        handler
            .reload(ModuleConfig::from_raw("enabled = false".to_string()))
            .unwrap();
        assert!(!handler.engine().unwrap().config().enabled);
    }

    #[test]
    fn test_handler_inspect_requires_running() {
        let handler = RuleEngineHandler::new();
        let mut tx = Transaction::new("t1");
        assert!(handler.inspect(&mut tx).is_err());
    }

    #[test]
    fn test_handler_inspect_and_metrics() {
        let mut handler = RuleEngineHandler::new();
        handler.init(ModuleConfig::new()).unwrap();

        let engine = handler.engine_mut().unwrap();
        let (registry, services) = engine.parts_mut();
        let site = registry
            .open_context("site", ContextKind::Site, ContextId::MAIN, Some("s1"))
            .unwrap();
        let r = registry.create_rule(site, false, None, 1).unwrap();
        registry.set_id(r, "block-admin").unwrap();
        registry.set_phase(r, Phase::RequestHeader).unwrap();
        registry
            .set_operator(r, services.operator("contains", Some("admin"), false).unwrap())
            .unwrap();
        registry
            .add_target(r, Target::new("REQUEST_URI", Vec::new()).unwrap())
            .unwrap();
        registry
            .add_action(r, services.action("block", Some("phase")).unwrap(), ActionList::True)
            .unwrap();
        registry.register(site, r).unwrap();
        registry
            .enable(site, EnableDirective::enable(RuleMatcher::All))
            .unwrap();
        let loc = registry
            .open_context("loc", ContextKind::Location, site, None)
            .unwrap();
        engine.close_context(loc).unwrap();
        handler.start().unwrap();

        let mut tx = Transaction::new("t1").with_context(loc);
        tx.flags.req_has_data = true;
        tx.set_var(Field::string("REQUEST_URI", "/admin/login"));
        handler.inspect(&mut tx).unwrap();
        assert!(tx.is_blocked());

        let metrics = handler.metrics();
        assert_eq!(metrics.counters.get("transactions"), Some(&1));
        assert_eq!(metrics.counters.get("rules_executed"), Some(&1));
        assert_eq!(metrics.counters.get("blocks"), Some(&1));
        assert_eq!(metrics.gauges.get("rule_count"), Some(&1.0));
        assert!(metrics.gauges.contains_key("uptime_secs"));
    }
}
