//! Buffered phase execution.

use super::error::{EngineError, EngineResult};
use super::exec::ExecutionContext;
use super::phase::{Phase, PhaseMeta};
use super::registry::CtxRule;
use super::rule::RuleRef;
use super::tx::Transaction;
use tracing::{debug, error, info};

/// Whether allow flags let the transaction skip `meta`'s rules.
///
/// A blocked transaction is never skipped. `check_phase` also honors the
/// phase-scoped allow flag.
pub(crate) fn rule_allow(tx: &Transaction, meta: &PhaseMeta, check_phase: bool) -> bool {
    if tx.is_blocked() {
        return false;
    }
    if tx.flags.allow_all && meta.phase != Phase::Postprocess && meta.phase != Phase::Logging {
        debug!(tx_id = tx.id(), phase = %meta.phase, "Skipping phase: ALLOW_ALL set");
        return true;
    }
    if meta.caps.request && tx.flags.allow_request {
        debug!(tx_id = tx.id(), phase = %meta.phase, "Skipping phase: ALLOW_REQUEST set");
        return true;
    }
    if check_phase && tx.flags.allow_phase {
        debug!(tx_id = tx.id(), phase = %meta.phase, "Skipping remaining rules: ALLOW_PHASE set");
        return true;
    }
    false
}

/// Collects injected rules followed by the context's runnable rules.
pub(crate) fn build_phase_rules(exec: &ExecutionContext<'_>, phase: Phase, bucket: &[CtxRule]) -> EngineResult<Vec<RuleRef>> {
    let engine = exec.engine();
    let registry = engine.registry();
    let mut rules = Vec::new();

    for hook in engine.services().injection_fns(phase) {
        let before = rules.len();
        (hook.func())(exec, &mut rules).map_err(|e| {
            error!(phase = %phase, "Rule injection function \"{}\" failed: {}", hook.name(), e);
            e
        })?;
        if engine.config().debug_enabled() {
            for &r in &rules[before..] {
                let rule = registry.rule(r)?;
                if rule.phase() != Phase::None && rule.phase() != phase {
                    error!(
                        "Injection function \"{}\" injected rule \"{}\" of phase {} into phase {}",
                        hook.name(),
                        rule.id(),
                        rule.phase(),
                        phase
                    );
                    return Err(EngineError::invalid(format!(
                        "rule '{}' injected into the wrong phase",
                        rule.id()
                    )));
                }
            }
        }
    }

    for ctx_rule in bucket.iter().filter(|c| c.enabled) {
        if registry.rule(ctx_rule.rule)?.flags.valid {
            rules.push(ctx_rule.rule);
        }
    }
    Ok(rules)
}

fn finish_phase(exec: &mut ExecutionContext<'_>, meta: &PhaseMeta) {
    exec.tx_mut().flags.allow_phase = false;
    debug!(tx_id = exec.tx().id(), phase = %meta.phase, "Phase end");
}

/// Runs the rules of a buffered phase.
///
/// Rule failures are recorded and the phase goes on; the first one is
/// returned once the phase completes. Only resource errors stop the phase.
pub(crate) fn run_phase_rules(exec: &mut ExecutionContext<'_>, meta: &'static PhaseMeta) -> EngineResult<()> {
    let engine = exec.engine();
    let phase = meta.phase;
    engine.stats().record_phase();
    debug!(tx_id = exec.tx().id(), phase = %phase, "Phase start");

    if rule_allow(exec.tx(), meta, true) {
        finish_phase(exec, meta);
        return Ok(());
    }

    let flags = exec.tx().flags;
    if (flags.block_phase || flags.block_immediate) && !meta.caps.force {
        match exec.block() {
            Ok(()) => {
                debug!(
                    tx_id = exec.tx().id(),
                    phase = %phase,
                    "Not executing rules: transaction was blocked"
                );
                finish_phase(exec, meta);
                return Ok(());
            },
            Err(e) if e.is_resource() => return Err(e),
            Err(_) => {},
        }
    }

    exec.tx_mut().flags.allow_phase = false;

    let ruleset = engine.registry().ruleset(exec.tx().context())?;
    let bucket = ruleset
        .phase(phase)
        .ok_or_else(|| EngineError::invalid(format!("no ruleset for phase {phase}")))?;
    if bucket.phase != phase {
        error!("Rule engine: phase {} bucket holds phase {}", phase, bucket.phase);
        finish_phase(exec, meta);
        return Err(EngineError::invalid(format!(
            "ruleset phase {} is {}",
            phase, bucket.phase
        )));
    }

    {
        let state = exec.state_mut();
        state.phase = phase;
        state.is_stream = false;
        state.phase_rules.clear();
    }
    let candidates = build_phase_rules(exec, phase, &bucket.rules)?;
    exec.state_mut().phase_rules = candidates.clone();

    if candidates.is_empty() {
        debug!(tx_id = exec.tx().id(), phase = %phase, "No rules for phase");
        finish_phase(exec, meta);
        return Ok(());
    }
    debug!(
        tx_id = exec.tx().id(),
        phase = %phase,
        "Executing {} rules",
        candidates.len()
    );

    let limit = engine.config().chain_recursion_limit;
    let mut failed = None;
    for r in candidates {
        if rule_allow(exec.tx(), meta, true) {
            break;
        }
        if let Err(e) = exec.execute_phase_rule(r, limit) {
            if e.is_resource() {
                return Err(e);
            }
            info!(tx_id = exec.tx().id(), phase = %phase, "Error executing rule: {}", e);
            engine.stats().record_error();
            failed.get_or_insert(e);
        }
        if exec.tx().flags.block_immediate {
            debug!(tx_id = exec.tx().id(), phase = %phase, "Immediate block requested");
            exec.block()?;
            finish_phase(exec, meta);
            return failed.map_or(Ok(()), Err);
        }
    }

    if exec.tx().flags.block_phase {
        exec.block()?;
    }
    finish_phase(exec, meta);
    failed.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::rule_engine::phase::find_phase_meta;

    fn meta(phase: Phase) -> &'static PhaseMeta {
        find_phase_meta(false, phase).unwrap()
    }

    #[test]
    fn test_rule_allow_scopes() {
        let mut tx = Transaction::new("t1");
        assert!(!rule_allow(&tx, meta(Phase::Request), true));

        tx.flags.allow_all = true;
        assert!(rule_allow(&tx, meta(Phase::Response), true));
        assert!(!rule_allow(&tx, meta(Phase::Postprocess), true));
        assert!(!rule_allow(&tx, meta(Phase::Logging), true));

        tx.flags.allow_all = false;
        tx.flags.allow_request = true;
        assert!(rule_allow(&tx, meta(Phase::RequestHeader), false));
        assert!(!rule_allow(&tx, meta(Phase::ResponseHeader), false));

        tx.flags.allow_request = false;
        tx.flags.allow_phase = true;
        assert!(rule_allow(&tx, meta(Phase::Response), true));
        assert!(!rule_allow(&tx, meta(Phase::Response), false));
    }

    #[test]
    fn test_blocked_tx_is_never_allowed() {
        let mut tx = Transaction::new("t1");
        tx.flags.allow_all = true;
        tx.block().unwrap();
        assert!(!rule_allow(&tx, meta(Phase::Request), true));
    }
}
