//! Rule engine entry points.
//!
//! [`RuleEngine`] owns the rule registry, the engine services and the
//! configuration. The host drives it through [`RuleEngine::tx_started`] and
//! the `notify_*` calls; each call maps a host state onto the phase table and
//! runs the matching phase or stream rules.

use super::config::RuleEngineConfig;
use super::error::{EngineError, EngineResult};
use super::exec::{ExecState, ExecutionContext};
use super::hooks::EngineServices;
use super::phase::{find_phase_meta, metas_for_state, HookKind, HostState, Phase, PhaseMeta};
use super::registry::RuleRegistry;
use super::rule::ContextId;
use super::runner::run_phase_rules;
use super::stream::{stream_headers, stream_tx, stream_txdata};
use super::tx::{HeaderPair, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Counters shared by every transaction.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Transactions started
    pub transactions: AtomicU64,
    /// Phases run, buffered and streamed
    pub phases: AtomicU64,
    /// Rules executed, chained rules included
    pub rules: AtomicU64,
    /// Actions executed
    pub actions: AtomicU64,
    /// Transactions blocked
    pub blocks: AtomicU64,
    /// Rule errors swallowed by the runners
    pub errors: AtomicU64,
}

impl EngineStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction start
    pub fn record_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a phase run
    pub fn record_phase(&self) {
        self.phases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rule execution
    pub fn record_rule(&self) {
        self.rules.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an action execution
    pub fn record_action(&self) {
        self.actions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a block
    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a swallowed error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Transactions started so far
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Rules executed so far
    pub fn rule_count(&self) -> u64 {
        self.rules.load(Ordering::Relaxed)
    }

    /// Actions executed so far
    pub fn action_count(&self) -> u64 {
        self.actions.load(Ordering::Relaxed)
    }

    /// Blocks so far
    pub fn block_count(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Swallowed errors so far
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Average rules executed per transaction
    pub fn rules_per_transaction(&self) -> f64 {
        let transactions = self.transaction_count();
        if transactions == 0 {
            0.0
        } else {
            self.rule_count() as f64 / transactions as f64
        }
    }
}

/// The rule engine.
pub struct RuleEngine {
    registry: RuleRegistry,
    services: EngineServices,
    config: RuleEngineConfig,
    stats: Arc<EngineStats>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("rules", &self.registry.rules().len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl RuleEngine {
    /// Engine with the built-in catalogs.
    pub fn new(config: RuleEngineConfig) -> EngineResult<Self> {
        Ok(Self::with_services(config, EngineServices::new()?))
    }

    /// Engine over caller-supplied services.
    pub fn with_services(config: RuleEngineConfig, services: EngineServices) -> Self {
        Self {
            registry: RuleRegistry::new(),
            services,
            config,
            stats: Arc::new(EngineStats::new()),
        }
    }

    /// Configuration.
    pub fn config(&self) -> &RuleEngineConfig {
        &self.config
    }

    /// Mutable configuration.
    pub fn config_mut(&mut self) -> &mut RuleEngineConfig {
        &mut self.config
    }

    /// Rule registry.
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Mutable rule registry.
    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    /// Engine services.
    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Mutable engine services.
    pub fn services_mut(&mut self) -> &mut EngineServices {
        &mut self.services
    }

    /// Registry and services together, for building rules.
    pub fn parts_mut(&mut self) -> (&mut RuleRegistry, &mut EngineServices) {
        (&mut self.registry, &mut self.services)
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Finalizes a configuration context.
    pub fn close_context(&mut self, ctx: ContextId) -> EngineResult<()> {
        self.registry.close_context(ctx, &self.services)
    }

    /// Prepares a transaction for rule execution.
    pub fn tx_started(&self, tx: &mut Transaction) -> EngineResult<()> {
        if tx.rule_exec.is_some() {
            error!(tx_id = tx.id(), "Rule execution state already exists");
            return Err(EngineError::invalid(format!(
                "transaction '{}' already started",
                tx.id()
            )));
        }
        tx.exec_log_mut()
            .configure(self.config.exec_log.enabled, self.config.exec_log.max_records);
        tx.rule_exec = Some(ExecState::new());
        self.stats.record_transaction();
        debug!(tx_id = tx.id(), "Transaction started");
        Ok(())
    }

    fn with_exec<R>(
        &self,
        tx: &mut Transaction,
        f: impl FnOnce(&mut ExecutionContext<'_>) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let Some(mut state) = tx.rule_exec.take() else {
            return Err(EngineError::Unknown(format!(
                "transaction '{}' has no rule execution state",
                tx.id()
            )));
        };
        let status = {
            let mut exec = ExecutionContext::new(self, tx, &mut state);
            f(&mut exec)
        };
        tx.rule_exec = Some(state);
        status
    }

    fn run_buffered(&self, tx: &mut Transaction, meta: &'static PhaseMeta) -> EngineResult<()> {
        if !(tx.flags.req_has_data || tx.flags.res_has_data) {
            debug!(tx_id = tx.id(), phase = %meta.phase, "Skipping phase: empty transaction");
            return Ok(());
        }
        if tx.rule_exec.is_none() {
            if !tx.flags.req_started {
                return Ok(());
            }
            error!(tx_id = tx.id(), phase = %meta.phase, "Rule execution state missing");
            return Err(EngineError::Unknown("rule execution state missing".to_string()));
        }
        self.with_exec(tx, |exec| run_phase_rules(exec, meta))
    }

    /// Runs one buffered phase and returns its status.
    ///
    /// Unlike the `notify_*` entry points, rule errors are handed back.
    pub fn run_phase(&self, tx: &mut Transaction, phase: Phase) -> EngineResult<()> {
        let meta = find_phase_meta(false, phase)
            .filter(|meta| meta.caps.valid)
            .ok_or_else(|| EngineError::invalid(format!("{phase} is not a buffered phase")))?;
        self.run_buffered(tx, meta)
    }

    fn swallow(&self, tx: &Transaction, meta: &PhaseMeta, status: EngineResult<()>) -> EngineResult<()> {
        match status {
            Ok(()) => Ok(()),
            Err(e) if e.is_resource() => Err(e),
            Err(e) => {
                warn!(tx_id = tx.id(), phase = %meta.phase, "Phase finished with error: {}", e);
                self.stats.record_error();
                Ok(())
            },
        }
    }

    /// Handles a transaction state change.
    pub fn notify_state(&self, tx: &mut Transaction, state: HostState) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        for meta in metas_for_state(state).filter(|meta| meta.hook == Some(HookKind::Tx)) {
            let status = if meta.is_stream {
                self.with_exec(tx, |exec| stream_tx(exec, meta))
            } else {
                self.run_buffered(tx, meta)
            };
            self.swallow(tx, meta, status)?;
        }
        Ok(())
    }

    /// Handles a chunk of body data.
    pub fn notify_data(&self, tx: &mut Transaction, state: HostState, data: &[u8]) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        for meta in metas_for_state(state).filter(|meta| meta.hook == Some(HookKind::TxData)) {
            let status = self.with_exec(tx, |exec| stream_txdata(exec, meta, data));
            self.swallow(tx, meta, status)?;
        }
        Ok(())
    }

    /// Handles a batch of parsed headers.
    pub fn notify_headers(&self, tx: &mut Transaction, state: HostState, pairs: &[HeaderPair]) -> EngineResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        for meta in metas_for_state(state).filter(|meta| meta.hook == Some(HookKind::Header)) {
            let status = self.with_exec(tx, |exec| stream_headers(exec, meta, pairs));
            self.swallow(tx, meta, status)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_started_twice() {
        let engine = RuleEngine::new(RuleEngineConfig::default()).unwrap();
        let mut tx = Transaction::new("t1");
        engine.tx_started(&mut tx).unwrap();
        assert!(tx.rule_exec().is_some());
        assert!(matches!(engine.tx_started(&mut tx), Err(EngineError::Invalid(_))));
        assert_eq!(engine.stats().transaction_count(), 1);
    }

    #[test]
    fn test_exec_log_follows_config() {
        let mut config = RuleEngineConfig::default();
        config.exec_log.enabled = false;
        let engine = RuleEngine::new(config).unwrap();
        let mut tx = Transaction::new("t1");
        engine.tx_started(&mut tx).unwrap();
        assert!(!tx.exec_log().is_enabled());
    }

    #[test]
    fn test_missing_exec_state() {
        let engine = RuleEngine::new(RuleEngineConfig::default()).unwrap();
        let mut tx = Transaction::new("t1");
        tx.flags.req_has_data = true;
        engine.run_phase(&mut tx, Phase::Request).unwrap();

        tx.flags.req_started = true;
        assert!(matches!(
            engine.run_phase(&mut tx, Phase::Request),
            Err(EngineError::Unknown(_))
        ));
    }

    #[test]
    fn test_run_phase_rejects_non_buffered() {
        let engine = RuleEngine::new(RuleEngineConfig::default()).unwrap();
        let mut tx = Transaction::new("t1");
        engine.tx_started(&mut tx).unwrap();
        assert!(engine.run_phase(&mut tx, Phase::None).is_err());
        assert!(engine.run_phase(&mut tx, Phase::RequestBodyStream).is_err());
    }

    #[test]
    fn test_empty_transaction_is_skipped() {
        let engine = RuleEngine::new(RuleEngineConfig::default()).unwrap();
        let mut tx = Transaction::new("t1");
        engine.tx_started(&mut tx).unwrap();
        engine.notify_state(&mut tx, HostState::Request).unwrap();
        assert_eq!(engine.stats().phases.load(Ordering::Relaxed), 0);

        tx.flags.req_has_data = true;
        engine.notify_state(&mut tx, HostState::Request).unwrap();
        assert_eq!(engine.stats().phases.load(Ordering::Relaxed), 2);
        assert_eq!(tx.rule_exec().unwrap().phase(), Phase::RequestProcess);
    }

    #[test]
    fn test_rules_per_transaction() {
        let stats = EngineStats::new();
        assert_eq!(stats.rules_per_transaction(), 0.0);
        stats.record_transaction();
        stats.record_transaction();
        stats.record_rule();
        assert_eq!(stats.rules_per_transaction(), 0.5);
    }
}
