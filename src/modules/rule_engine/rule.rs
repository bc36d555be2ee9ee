//! Rule definitions and their targets.
//!
//! Rules live in the registry's arena and refer to each other by
//! [`RuleRef`]; a chain is the singly linked list formed by
//! `chained_from` / `chained_rule`.

use super::action::ActionInst;
use super::error::{EngineError, EngineResult};
use super::operator::OperatorInst;
use super::phase::{find_phase_meta, Phase, PhaseMeta};
use super::transformation::TransformationInst;
use super::var::TargetExpr;
use std::fmt;

/// Names of the per-value bookkeeping variables.
pub const FIELD_KEYS: [&str; 5] = [
    "FIELD",
    "FIELD_TFN",
    "FIELD_TARGET",
    "FIELD_NAME",
    "FIELD_NAME_FULL",
];

/// Index of a rule in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleRef(pub(crate) usize);

impl RuleRef {
    /// Arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a configuration context in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) usize);

impl ContextId {
    /// The main (root) context.
    pub const MAIN: ContextId = ContextId(0);

    /// Context index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Rule state flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleFlags {
    /// Registered successfully and still usable.
    pub valid: bool,
    /// The next rule created in the context chains to this one.
    pub chain_parent: bool,
    /// This rule is chained from another.
    pub chain_child: bool,
    /// Defined in the main context.
    pub main_ctx: bool,
    /// Scratch mark used while finalizing a context.
    pub marked: bool,
    /// Operator results are captured.
    pub capture: bool,
    /// FIELD* bookkeeping variables are maintained.
    pub fields: bool,
    /// Driven by an external rule driver; targets are bypassed.
    pub external: bool,
    /// Action-only rule with a synthetic target.
    pub no_target: bool,
    /// Record per-rule evaluation timing.
    pub trace: bool,
}

impl RuleFlags {
    /// Either chain flag is set.
    pub fn in_chain(&self) -> bool {
        self.chain_parent || self.chain_child
    }
}

/// Which action list an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionList {
    /// Run when the operator result is true.
    True,
    /// Run when the operator result is false.
    False,
    /// Always run.
    Aux,
}

/// A rule target: an expression plus its transformation pipeline.
#[derive(Debug, Clone)]
pub struct Target {
    /// Expression as written in the configuration.
    pub target_str: String,
    /// Compiled expression; `None` for the synthetic target of action rules.
    pub expr: Option<TargetExpr>,
    /// Transformations applied in order.
    pub tfns: Vec<TransformationInst>,
}

impl Target {
    /// Parses `target_str` into a target with the given transformations.
    pub fn new(target_str: &str, tfns: Vec<TransformationInst>) -> EngineResult<Self> {
        let expr = TargetExpr::parse(target_str)
            .map_err(|e| EngineError::Other(format!("error creating target '{target_str}': {e}")))?;
        Ok(Self {
            target_str: target_str.to_string(),
            expr: Some(expr),
            tfns,
        })
    }

    /// The synthetic target given to action-only rules.
    pub fn null() -> Self {
        Self {
            target_str: "NULL".to_string(),
            expr: None,
            tfns: Vec::new(),
        }
    }

    /// Appends a transformation.
    pub fn add_tfn(&mut self, tfn: TransformationInst) {
        self.tfns.push(tfn);
    }
}

/// Rule identity and placement.
#[derive(Debug, Clone)]
pub struct RuleMeta {
    /// Rule id; generated (`chain_id/position`) for chain children.
    pub id: Option<String>,
    /// Id qualified by scope (`main/<id>` or `site/<site>/<id>`).
    pub full_id: Option<String>,
    /// Id shared by every rule in a chain.
    pub chain_id: Option<String>,
    /// Revision; a higher revision replaces a lower one.
    pub revision: u32,
    /// Assigned phase.
    pub phase: Phase,
    /// Tags.
    pub tags: Vec<String>,
    /// Source file of the definition.
    pub config_file: Option<String>,
    /// Source line of the definition.
    pub config_line: u32,
    /// Creation sequence number.
    pub index: usize,
}

/// A rule.
#[derive(Clone)]
pub struct Rule {
    /// Identity.
    pub meta: RuleMeta,
    /// Metadata of the assigned phase.
    pub phase_meta: &'static PhaseMeta,
    /// Operator; required for registration.
    pub operator: Option<OperatorInst>,
    /// Targets in evaluation order.
    pub targets: Vec<Target>,
    /// Actions run on a true result.
    pub true_actions: Vec<ActionInst>,
    /// Actions run on a false result.
    pub false_actions: Vec<ActionInst>,
    /// Actions always run.
    pub aux_actions: Vec<ActionInst>,
    /// State flags.
    pub flags: RuleFlags,
    /// Capture collection name when capture is enabled.
    pub capture_collection: Option<String>,
    /// Parent in the chain.
    pub chained_from: Option<RuleRef>,
    /// Child in the chain.
    pub chained_rule: Option<RuleRef>,
    /// Defining context.
    pub ctx: ContextId,
}

impl Rule {
    pub(crate) fn new(ctx: ContextId, is_stream: bool, index: usize) -> EngineResult<Self> {
        let phase_meta = find_phase_meta(is_stream, Phase::None)
            .ok_or_else(|| EngineError::invalid("generic phase metadata missing"))?;
        Ok(Self {
            meta: RuleMeta {
                id: None,
                full_id: None,
                chain_id: None,
                revision: 1,
                phase: Phase::None,
                tags: Vec::new(),
                config_file: None,
                config_line: 0,
                index,
            },
            phase_meta,
            operator: None,
            targets: Vec::new(),
            true_actions: Vec::new(),
            false_actions: Vec::new(),
            aux_actions: Vec::new(),
            flags: RuleFlags::default(),
            capture_collection: None,
            chained_from: None,
            chained_rule: None,
            ctx,
        })
    }

    /// Rule id, or `""` when unset.
    pub fn id(&self) -> &str {
        self.meta.id.as_deref().unwrap_or("")
    }

    /// Fully qualified id, or `""` before registration.
    pub fn full_id(&self) -> &str {
        self.meta.full_id.as_deref().unwrap_or("")
    }

    /// Chain id, or `""` when not chained.
    pub fn chain_id(&self) -> &str {
        self.meta.chain_id.as_deref().unwrap_or("")
    }

    /// Assigned phase.
    pub fn phase(&self) -> Phase {
        self.meta.phase
    }

    /// Streaming rule.
    pub fn is_stream(&self) -> bool {
        self.phase_meta.is_stream
    }

    /// Transformations are allowed: never for action-only rules.
    pub fn allow_tfns(&self) -> bool {
        !self.flags.no_target && self.phase_meta.caps.allow_tfns
    }

    /// Chaining is allowed in the rule's phase.
    pub fn allow_chain(&self) -> bool {
        self.phase_meta.caps.allow_chain
    }

    /// This rule is a chain child.
    pub fn is_chained(&self) -> bool {
        self.flags.chain_child
    }

    /// The context-finalization mark is set.
    pub fn is_marked(&self) -> bool {
        self.flags.marked
    }

    /// The action list `which`.
    pub fn actions(&self, which: ActionList) -> &[ActionInst] {
        match which {
            ActionList::True => &self.true_actions,
            ActionList::False => &self.false_actions,
            ActionList::Aux => &self.aux_actions,
        }
    }

    pub(crate) fn actions_mut(&mut self, which: ActionList) -> &mut Vec<ActionInst> {
        match which {
            ActionList::True => &mut self.true_actions,
            ActionList::False => &mut self.false_actions,
            ActionList::Aux => &mut self.aux_actions,
        }
    }

    /// Number of actions named `name` (case-insensitive) in list `which`.
    pub fn search_action(&self, which: ActionList, name: &str) -> usize {
        self.actions(which)
            .iter()
            .filter(|a| a.name().eq_ignore_ascii_case(name))
            .count()
    }

    /// Turns on FIELD* bookkeeping if `params` references a FIELD variable.
    ///
    /// Returns whether the parameters referenced one.
    pub fn check_params(&mut self, params: Option<&str>) -> bool {
        let Some(params) = params else {
            return false;
        };
        let references = params.to_ascii_uppercase().contains("%{FIELD")
            || FIELD_KEYS
                .iter()
                .any(|key| params.eq_ignore_ascii_case(key));
        if references {
            self.flags.fields = true;
        }
        references
    }

    /// Has the tag (case-insensitive).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.meta.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.meta.id)
            .field("full_id", &self.meta.full_id)
            .field("phase", &self.meta.phase)
            .field("revision", &self.meta.revision)
            .field("operator", &self.operator)
            .field("targets", &self.targets.len())
            .field("flags", &self.flags)
            .field("chained_from", &self.chained_from)
            .field("chained_rule", &self.chained_rule)
            .finish()
    }
}
