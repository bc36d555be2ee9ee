//! Per-transaction execution state and the rule evaluation core.
//!
//! [`ExecState`] lives on the transaction between phases. While a phase
//! runs it is borrowed into an [`ExecutionContext`] together with the
//! engine and the transaction; operators, actions and hooks all see the
//! same context.

use super::engine::RuleEngine;
use super::error::{EngineError, EngineResult};
use super::exec_log::RuleExecRecord;
use super::field::Field;
use super::hooks::OperatorOutcome;
use super::operator::{Capture, OperatorInst};
use super::phase::Phase;
use super::rule::{ActionList, Rule, RuleRef, Target, FIELD_KEYS};
use super::tx::Transaction;
use super::var::VarStore;
use std::collections::HashMap;
use std::mem;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Saved state of an interrupted rule.
#[derive(Debug)]
struct RuleFrame {
    rule: Option<RuleRef>,
    target: Option<usize>,
    rule_result: i64,
    rule_status: EngineResult<()>,
    exec_log: Option<RuleExecRecord>,
}

/// Accumulated timing for one rule.
#[derive(Debug, Clone, Default)]
pub struct RuleTrace {
    /// Rule id.
    pub rule_id: String,
    /// Times the rule ran.
    pub evaluations: u64,
    /// Total time spent, chained rules included.
    pub elapsed: Duration,
}

/// Rule execution state of one transaction.
#[derive(Debug)]
pub struct ExecState {
    pub(crate) phase: Phase,
    pub(crate) is_stream: bool,
    rule: Option<RuleRef>,
    target: Option<usize>,
    rule_result: i64,
    rule_status: EngineResult<()>,
    cur_result: i64,
    cur_status: EngineResult<()>,
    cur_value: Option<Field>,
    rule_stack: Vec<RuleFrame>,
    value_stack: Vec<Option<Field>>,
    pub(crate) phase_rules: Vec<RuleRef>,
    exec_log: Option<RuleExecRecord>,
    traces: HashMap<RuleRef, RuleTrace>,
}

impl Default for ExecState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecState {
    /// Fresh state, outside any phase.
    pub fn new() -> Self {
        Self {
            phase: Phase::None,
            is_stream: false,
            rule: None,
            target: None,
            rule_result: 0,
            rule_status: Ok(()),
            cur_result: 0,
            cur_status: Ok(()),
            cur_value: None,
            rule_stack: Vec::new(),
            value_stack: Vec::new(),
            phase_rules: Vec::new(),
            exec_log: None,
            traces: HashMap::new(),
        }
    }

    /// Phase being executed.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Executing a stream phase.
    pub fn is_stream(&self) -> bool {
        self.is_stream
    }

    /// Rule on top of the rule stack.
    pub fn current_rule(&self) -> Option<RuleRef> {
        self.rule
    }

    /// Index of the target being evaluated.
    pub fn current_target(&self) -> Option<usize> {
        self.target
    }

    /// Cumulative result of the current rule; sticky once non-zero.
    pub fn rule_result(&self) -> i64 {
        self.rule_result
    }

    /// Cumulative status of the current rule; sticky on the first error.
    pub fn rule_status(&self) -> &EngineResult<()> {
        &self.rule_status
    }

    /// Result of the latest operator invocation.
    pub fn cur_result(&self) -> i64 {
        self.cur_result
    }

    /// Status of the latest operator invocation.
    pub fn cur_status(&self) -> &EngineResult<()> {
        &self.cur_status
    }

    /// Value of the latest operator invocation.
    pub fn cur_value(&self) -> Option<&Field> {
        self.cur_value.as_ref()
    }

    /// Rules interrupted by chained execution.
    pub fn rule_depth(&self) -> usize {
        self.rule_stack.len()
    }

    /// Values on the value stack.
    pub fn value_depth(&self) -> usize {
        self.value_stack.len()
    }

    /// Candidate rules of the running phase.
    pub fn phase_rules(&self) -> &[RuleRef] {
        &self.phase_rules
    }

    /// Colon-joined names of the named values on the value stack.
    pub fn field_name_full(&self) -> String {
        self.value_stack
            .iter()
            .flatten()
            .map(|field| field.name.as_str())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Per-rule timing, when tracing is on.
    pub fn traces(&self) -> impl Iterator<Item = &RuleTrace> {
        self.traces.values()
    }

    /// Timing of one rule.
    pub fn trace_for(&self, rule: RuleRef) -> Option<&RuleTrace> {
        self.traces.get(&rule)
    }

    fn reset_rule(&mut self) {
        self.target = None;
        self.rule_result = 0;
        self.rule_status = Ok(());
        self.cur_result = 0;
        self.cur_status = Ok(());
        self.cur_value = None;
    }
}

/// What operators, actions and hooks see while a rule runs.
pub struct ExecutionContext<'a> {
    engine: &'a RuleEngine,
    tx: &'a mut Transaction,
    state: &'a mut ExecState,
}

fn first_error(slot: &mut Option<EngineError>, err: EngineError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(engine: &'a RuleEngine, tx: &'a mut Transaction, state: &'a mut ExecState) -> Self {
        Self { engine, tx, state }
    }

    /// The engine.
    pub fn engine(&self) -> &'a RuleEngine {
        self.engine
    }

    /// The transaction.
    pub fn tx(&self) -> &Transaction {
        &*self.tx
    }

    /// The transaction, mutably.
    pub fn tx_mut(&mut self) -> &mut Transaction {
        &mut *self.tx
    }

    /// The execution state.
    pub fn state(&self) -> &ExecState {
        &*self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut ExecState {
        &mut *self.state
    }

    /// The executing rule.
    pub fn rule(&self) -> Option<&'a Rule> {
        let engine = self.engine;
        self.state
            .rule
            .and_then(|r| engine.registry().rule(r).ok())
    }

    /// Id of the executing rule, or `""`.
    pub fn rule_id(&self) -> &'a str {
        self.rule().map_or("", Rule::id)
    }

    /// Phase being executed.
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Executing a stream phase.
    pub fn is_stream(&self) -> bool {
        self.state.is_stream
    }

    /// Value of the latest operator invocation.
    pub fn cur_value(&self) -> Option<&Field> {
        self.state.cur_value.as_ref()
    }

    /// Result of the latest operator invocation.
    pub fn cur_result(&self) -> i64 {
        self.state.cur_result
    }

    /// Cumulative result of the executing rule.
    pub fn rule_result(&self) -> i64 {
        self.state.rule_result
    }

    /// Colon-joined names on the value stack.
    pub fn field_name_full(&self) -> String {
        self.state.field_name_full()
    }

    /// Saves the current rule and makes `r` current with cleared results.
    pub(crate) fn push_rule(&mut self, r: RuleRef) -> EngineResult<()> {
        let engine = self.engine;
        let rule = engine.registry().rule(r)?;
        let frame = RuleFrame {
            rule: self.state.rule,
            target: self.state.target,
            rule_result: self.state.rule_result,
            rule_status: mem::replace(&mut self.state.rule_status, Ok(())),
            exec_log: self.state.exec_log.take(),
        };
        self.state.rule_stack.push(frame);
        self.state.rule = Some(r);
        self.state.reset_rule();
        if engine.config().exec_log.enabled && self.tx.exec_log().is_enabled() {
            self.state.exec_log = Some(RuleExecRecord::new(rule, self.state.phase));
        }
        trace!(rule_id = rule.id(), depth = self.state.rule_stack.len(), "Pushed rule");
        Ok(())
    }

    /// Finishes the current rule's record and restores the saved rule.
    pub(crate) fn pop_rule(&mut self) -> EngineResult<()> {
        let frame = self
            .state
            .rule_stack
            .pop()
            .ok_or_else(|| EngineError::invalid("rule stack is empty"))?;

        if let Some(mut record) = self.state.exec_log.take() {
            record.finish(self.state.rule_result, &self.state.rule_status);
            self.tx.exec_log_mut().push(record);
        }

        self.state.rule = frame.rule;
        self.state.target = frame.target;
        self.state.rule_result = frame.rule_result;
        self.state.rule_status = frame.rule_status;
        self.state.exec_log = frame.exec_log;
        Ok(())
    }

    /// Runs `f` with `value` pushed on the value stack.
    ///
    /// The value is popped on every return path of `f`.
    pub(crate) fn with_value<R>(&mut self, value: Option<Field>, f: impl FnOnce(&mut Self) -> R) -> R {
        self.state.value_stack.push(value);
        let out = f(self);
        self.state.value_stack.pop();
        out
    }

    fn log_record(&mut self) -> Option<&mut RuleExecRecord> {
        self.state.exec_log.as_mut()
    }

    /// Stores an operator outcome, applying the rule's invert flag.
    ///
    /// Returns the stored result.
    fn store_results(&mut self, operator: &OperatorInst, result: i64, status: EngineResult<()>) -> i64 {
        let result = if operator.invert {
            i64::from(result == 0)
        } else {
            result
        };
        self.state.cur_result = result;
        if result != 0 {
            self.state.rule_result = result;
        }
        if status.is_err() && self.state.rule_status.is_ok() {
            self.state.rule_status = status.clone();
        }
        self.state.cur_status = status;
        result
    }

    fn execute_action_list(&mut self, rule: &'a Rule, which: ActionList, result: i64) -> EngineResult<()> {
        let services = self.engine.services();
        let stats = self.engine.stats();
        let mut last_error = None;

        for action in rule.actions(which) {
            for hook in services.pre_action_fns() {
                (hook.func())(&*self, action, result);
            }
            let status = action.execute(self);
            for hook in services.post_action_fns() {
                (hook.func())(&*self, action, result, &status);
            }
            stats.record_action();
            if let Some(record) = self.log_record() {
                record.add_action(action.name(), &status);
            }

            if let Err(e) = status {
                if e.is_resource() {
                    return Err(e);
                }
                if which == ActionList::Aux {
                    debug!(rule_id = rule.id(), "Auxiliary action \"{}\" failed: {}", action.name(), e);
                } else {
                    warn!(rule_id = rule.id(), "Action \"{}\" failed: {}", action.name(), e);
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Runs the true or false list for the current result, then the
    /// auxiliary list. A failed operator runs neither true nor false list.
    fn execute_rule_actions(&mut self, rule: &'a Rule) -> EngineResult<()> {
        let result = self.state.cur_result;
        let mut status = Ok(());
        if self.state.cur_status.is_ok() {
            let which = if result != 0 {
                ActionList::True
            } else {
                ActionList::False
            };
            status = self.execute_action_list(rule, which, result);
            if matches!(&status, Err(e) if e.is_resource()) {
                return status;
            }
        } else {
            debug!(rule_id = rule.id(), "Operator failed, not running true/false actions");
        }
        self.execute_action_list(rule, ActionList::Aux, result)?;
        status
    }

    fn set_target_fields(&mut self, rule: &Rule, target_str: &str, tfn_value: Option<&Field>) {
        if !rule.flags.fields {
            return;
        }
        let top = self.state.value_stack.last().cloned().flatten();
        let name_full = self.state.field_name_full();
        let vars = self.tx.vars_mut();

        match &top {
            Some(field) => vars.set(field.renamed("FIELD")),
            None => {
                vars.remove("FIELD");
            },
        }
        match tfn_value {
            Some(field) => vars.set(field.renamed("FIELD_TFN")),
            None => {
                vars.remove("FIELD_TFN");
            },
        }
        vars.set(Field::string("FIELD_TARGET", target_str));
        vars.set(Field::string(
            "FIELD_NAME",
            top.as_ref().map_or("", |field| field.name.as_str()),
        ));
        vars.set(Field::string("FIELD_NAME_FULL", name_full));
    }

    fn clear_target_fields(&mut self, rule: &Rule) {
        if !rule.flags.fields {
            return;
        }
        let vars = self.tx.vars_mut();
        for key in FIELD_KEYS {
            vars.remove(key);
        }
    }

    /// Runs a target's transformations over `value`.
    ///
    /// A transformation that fails or produces nothing fails the target.
    pub(crate) fn execute_tfns(&mut self, target: &Target, value: Option<&Field>) -> EngineResult<Option<Field>> {
        let Some(value) = value else {
            return Ok(None);
        };
        let mut current = value.clone();
        for tfn in &target.tfns {
            let out = tfn.tfn.execute(&current).and_then(|out| {
                out.ok_or_else(|| EngineError::Transformation {
                    name: tfn.name().to_string(),
                    message: "no output".to_string(),
                })
            });
            if let Some(record) = self.log_record() {
                record.add_tfn(tfn.name(), &out);
            }
            match out {
                Ok(next) => current = next,
                Err(e) => {
                    error!(
                        target = %target.target_str,
                        "Error executing transformation \"{}\": {}",
                        tfn.name(),
                        e
                    );
                    return Err(e);
                },
            }
        }
        Ok(Some(current))
    }

    /// One operator invocation with bookkeeping, hooks and actions.
    fn invoke_operator(&mut self, rule: &'a Rule, target_str: &str, value: Option<&Field>) -> EngineResult<()> {
        let services = self.engine.services();
        let operator = rule
            .operator
            .as_ref()
            .ok_or_else(|| EngineError::invalid(format!("rule '{}' has no operator", rule.id())))?;

        self.set_target_fields(rule, target_str, value);
        self.state.cur_value = value.cloned();

        for hook in services.pre_operator_fns() {
            (hook.func())(&*self, operator, value);
        }

        let mut capture = rule.flags.capture.then(|| {
            Capture::new(
                rule.capture_collection
                    .as_deref()
                    .unwrap_or(self.engine.config().capture_collection.as_str()),
            )
        });
        let (raw, status) = match operator.operator.execute(&*self.tx, value, capture.as_mut()) {
            Ok(result) => (result, Ok(())),
            Err(e) => {
                warn!(
                    rule_id = rule.id(),
                    target = target_str,
                    "Operator \"{}\" failed: {}",
                    operator.name(),
                    e
                );
                (0, Err(e))
            },
        };

        let outcome = OperatorOutcome {
            value,
            status: &status,
            result: raw,
            capture: capture.as_ref(),
        };
        for hook in services.post_operator_fns() {
            (hook.func())(&*self, operator, &outcome);
        }
        if let Some(capture) = capture {
            self.tx.set_var(capture.into_field());
        }

        if let Err(e) = &status {
            if e.is_resource() {
                self.clear_target_fields(rule);
                return status;
            }
        }

        let result = self.store_results(operator, raw, status.clone());
        if let Some(record) = self.log_record() {
            record.add_result(value, result, &status);
        }
        trace!(rule_id = rule.id(), target = target_str, result, "Operator executed");

        let actions = self.execute_rule_actions(rule);
        self.clear_target_fields(rule);
        actions
    }

    /// Runs the operator on `value`, descending into lists.
    ///
    /// Each list level consumes one unit of `remaining`; a list met with no
    /// budget left fails that branch only.
    pub(crate) fn execute_phase_operator(
        &mut self,
        rule: &'a Rule,
        target: &Target,
        value: Option<&Field>,
        remaining: usize,
    ) -> EngineResult<()> {
        let Some(items) = value.and_then(Field::as_list) else {
            return self.invoke_operator(rule, &target.target_str, value);
        };

        if remaining == 0 {
            error!(
                rule_id = rule.id(),
                target = %target.target_str,
                "List recursion limit reached"
            );
            return Err(EngineError::RecursionLimit { kind: "list" });
        }

        let mut failed = None;
        for item in items {
            let status = self.with_value(Some(item.clone()), |exec| {
                exec.execute_phase_operator(rule, target, Some(item), remaining - 1)
            });
            if let Err(e) = status {
                if e.is_resource() {
                    return Err(e);
                }
                warn!(
                    rule_id = rule.id(),
                    target = %target.target_str,
                    "Error operating on list element \"{}\": {}",
                    item.name,
                    e
                );
                first_error(&mut failed, e);
            }
        }
        failed.map_or(Ok(()), Err)
    }

    /// Runs an external rule's operator once with no value.
    fn execute_external_rule(&mut self, rule: &'a Rule) -> EngineResult<()> {
        let services = self.engine.services();
        let operator = rule
            .operator
            .as_ref()
            .ok_or_else(|| EngineError::invalid(format!("rule '{}' has no operator", rule.id())))?;

        for hook in services.pre_operator_fns() {
            (hook.func())(&*self, operator, None);
        }
        let (result, status) = match operator.operator.execute(&*self.tx, None, None) {
            Ok(result) => (result, Ok(())),
            Err(e) => (0, Err(e)),
        };
        let outcome = OperatorOutcome {
            value: None,
            status: &status,
            result,
            capture: None,
        };
        for hook in services.post_operator_fns() {
            (hook.func())(&*self, operator, &outcome);
        }

        self.state.rule_result = result;
        self.state.cur_result = result;
        if let Some(record) = self.log_record() {
            record.add_result(None, result, &status);
        }
        if let Err(e) = &status {
            error!(rule_id = rule.id(), "External rule failed: {}", e);
            self.state.cur_status = status.clone();
            self.state.rule_status = status.clone();
        }
        status
    }

    /// Resolves, transforms and operates on each target of a rule.
    ///
    /// A failing target is recorded and the remaining targets still run;
    /// the first failure is returned.
    fn execute_phase_rule_targets(&mut self, rule: &'a Rule) -> EngineResult<()> {
        if rule.flags.external {
            return self.execute_external_rule(rule);
        }
        let operator = rule
            .operator
            .as_ref()
            .ok_or_else(|| EngineError::invalid(format!("rule '{}' has no operator", rule.id())))?;
        let allow_null = operator.capabilities().allow_null;
        let limit = self.engine.config().list_recursion_limit;
        let mut failed = None;

        for (index, target) in rule.targets.iter().enumerate() {
            self.state.target = Some(index);

            let mut list_source = None;
            let value = match &target.expr {
                None => None,
                Some(expr) => match expr.resolve(self.tx.vars()) {
                    Ok(mut values) => {
                        if self
                            .tx
                            .vars()
                            .get(expr.source())
                            .is_some_and(Field::is_list)
                        {
                            list_source = Some(expr.source().to_string());
                        }
                        if values.len() == 1 {
                            values.pop()
                        } else {
                            Some(Field::list("", values))
                        }
                    },
                    Err(e) if e.is_not_found() => {
                        if !allow_null {
                            debug!(
                                rule_id = rule.id(),
                                target = %target.target_str,
                                "Target not found, skipping"
                            );
                            if let Some(record) = self.log_record() {
                                record.add_target(&target.target_str, None);
                            }
                            continue;
                        }
                        None
                    },
                    Err(e) => {
                        warn!(
                            rule_id = rule.id(),
                            target = %target.target_str,
                            "Error resolving target: {}",
                            e
                        );
                        if let Some(record) = self.log_record() {
                            record.add_target(&target.target_str, None);
                        }
                        continue;
                    },
                },
            };

            if let Some(record) = self.log_record() {
                record.add_target(&target.target_str, value.as_ref());
            }

            let tfn_value = if rule.allow_tfns() {
                match self.execute_tfns(target, value.as_ref()) {
                    Ok(tfn_value) => tfn_value,
                    Err(e) => {
                        first_error(&mut failed, e);
                        continue;
                    },
                }
            } else {
                value.clone()
            };
            if let Some(record) = self.log_record() {
                record.set_target_final(tfn_value.as_ref());
            }

            let run = |exec: &mut Self| {
                exec.with_value(value.clone(), |exec| {
                    exec.execute_phase_operator(rule, target, tfn_value.as_ref(), limit)
                })
            };
            let status = match list_source {
                Some(source) => self.with_value(Some(Field::generic(source)), run),
                None => run(self),
            };

            if let Err(e) = status {
                if e.is_resource() {
                    self.state.target = None;
                    return Err(e);
                }
                warn!(
                    rule_id = rule.id(),
                    target = %target.target_str,
                    "Error executing rule target: {}",
                    e
                );
                first_error(&mut failed, e);
            }
        }

        self.state.target = None;
        failed.map_or(Ok(()), Err)
    }

    fn record_trace(&mut self, r: RuleRef, rule: &Rule, elapsed: Duration) {
        if !(rule.flags.trace || self.engine.config().trace_rules) {
            return;
        }
        let entry = self.state.traces.entry(r).or_insert_with(|| RuleTrace {
            rule_id: rule.id().to_string(),
            ..RuleTrace::default()
        });
        entry.evaluations += 1;
        entry.elapsed += elapsed;
    }

    /// Executes a buffered rule and, when it matched, its chained child.
    ///
    /// `remaining` bounds the chain depth; a child runs even if its parent
    /// recorded errors, as long as the parent's result is non-zero.
    pub(crate) fn execute_phase_rule(&mut self, r: RuleRef, remaining: usize) -> EngineResult<()> {
        let engine = self.engine;
        let rule = engine.registry().rule(r)?;
        if remaining == 0 {
            error!(rule_id = rule.id(), "Chain recursion limit reached");
            return Err(EngineError::RecursionLimit { kind: "chain" });
        }

        let started = Instant::now();
        self.push_rule(r)?;
        engine.stats().record_rule();
        for hook in engine.services().pre_rule_fns() {
            (hook.func())(&*self);
        }

        let mut status = self.execute_phase_rule_targets(rule);
        if let Err(e) = &status {
            if e.is_resource() {
                self.pop_rule()?;
                return status;
            }
            debug!(rule_id = rule.id(), "Rule targets reported an error: {}", e);
        }

        if self.state.rule_result != 0 {
            if let Some(child) = rule.chained_rule {
                debug!(rule_id = rule.id(), "Rule matched, executing chained rule");
                if let Err(e) = self.execute_phase_rule(child, remaining - 1) {
                    if e.is_resource() {
                        self.pop_rule()?;
                        return Err(e);
                    }
                    warn!(rule_id = rule.id(), "Chained rule failed: {}", e);
                    if status.is_ok() {
                        status = Err(e);
                    }
                }
            }
        }

        for hook in engine.services().post_rule_fns() {
            (hook.func())(&*self);
        }
        self.pop_rule()?;
        self.record_trace(r, rule, started.elapsed());
        status
    }

    /// Operates on one stream unit (a header pair or a data chunk).
    pub(crate) fn execute_stream_operator(&mut self, rule: &'a Rule, value: Field) -> EngineResult<()> {
        let name = value.name.clone();
        self.with_value(Some(value.clone()), |exec| {
            if let Some(record) = exec.log_record() {
                record.add_stream_target(&value);
            }
            let status = exec.invoke_operator(rule, &name, Some(&value));
            if matches!(&status, Err(e) if e.is_resource()) {
                return status;
            }
            if exec.tx.flags.block_immediate {
                exec.block()?;
            }
            status
        })
    }

    /// Blocks the transaction; a declined block is not an error.
    pub(crate) fn block(&mut self) -> EngineResult<()> {
        let was_blocked = self.tx.is_blocked();
        match self.tx.block() {
            Ok(()) => {
                if !was_blocked {
                    self.engine.stats().record_block();
                }
                debug!(tx_id = self.tx.id(), phase = %self.state.phase, "Transaction blocked");
                Ok(())
            },
            Err(EngineError::Declined) => {
                debug!(tx_id = self.tx.id(), "Block declined by handler");
                Ok(())
            },
            Err(e) => {
                error!(tx_id = self.tx.id(), "Failed to block transaction: {}", e);
                Err(e)
            },
        }
    }
}
