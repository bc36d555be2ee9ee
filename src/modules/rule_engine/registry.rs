//! Rule registry: construction, registration and context finalization.
//!
//! Rules live in a single arena owned by the registry. Configuration
//! contexts (main, site, location) hold ordered rule lists, an id index and
//! deferred enable/disable directives. Closing a location context resolves
//! those into a [`Ruleset`] of per-phase buckets that transactions execute.

use super::action::ActionInst;
use super::error::{EngineError, EngineResult};
use super::hooks::EngineServices;
use super::operator::OperatorInst;
use super::phase::{find_phase_meta, Phase, PhaseMeta};
use super::rule::{ActionList, ContextId, Rule, RuleRef, Target};
use super::transformation::TransformationInst;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Kind of configuration context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// The root context.
    Main,
    /// A site.
    Site,
    /// A location within a site.
    Location,
}

/// Selects rules for an enable/disable directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    /// Every rule.
    All,
    /// Rules whose id or full id equals the value, anywhere in the chain.
    Id(String),
    /// Rules whose id starts with the value, anywhere in the chain.
    IdPrefix(String),
    /// Rules carrying the tag, anywhere in the chain.
    Tag(String),
    /// Rules carrying a tag with the prefix, anywhere in the chain.
    TagPrefix(String),
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// The rule followed by its ancestors and then its descendants.
fn chain_members(rules: &[Rule], start: RuleRef) -> Vec<&Rule> {
    let mut seen = HashSet::new();
    let mut members = Vec::new();

    let mut cursor = Some(start);
    while let Some(r) = cursor {
        let Some(rule) = rules.get(r.0) else { break };
        if !seen.insert(r) {
            break;
        }
        members.push(rule);
        cursor = rule.chained_from;
    }

    cursor = rules.get(start.0).and_then(|rule| rule.chained_rule);
    while let Some(r) = cursor {
        let Some(rule) = rules.get(r.0) else { break };
        if !seen.insert(r) {
            break;
        }
        members.push(rule);
        cursor = rule.chained_rule;
    }
    members
}

impl RuleMatcher {
    /// Tests `r` against the matcher.
    pub fn matches(&self, rules: &[Rule], r: RuleRef) -> bool {
        match self {
            Self::All => true,
            Self::Id(id) => chain_members(rules, r).iter().any(|rule| {
                rule.id().eq_ignore_ascii_case(id) || rule.full_id().eq_ignore_ascii_case(id)
            }),
            Self::IdPrefix(prefix) => chain_members(rules, r)
                .iter()
                .any(|rule| starts_with_ignore_case(rule.id(), prefix)),
            Self::Tag(tag) => chain_members(rules, r).iter().any(|rule| rule.has_tag(tag)),
            Self::TagPrefix(prefix) => chain_members(rules, r).iter().any(|rule| {
                rule.meta
                    .tags
                    .iter()
                    .any(|tag| starts_with_ignore_case(tag, prefix))
            }),
        }
    }
}

/// A deferred enable or disable directive.
#[derive(Debug, Clone)]
pub struct EnableDirective {
    /// Rule selector.
    pub matcher: RuleMatcher,
    /// Enable (`true`) or disable matching rules.
    pub enable: bool,
    /// Fail when nothing matches.
    pub require_match: bool,
    /// Source file of the directive.
    pub file: Option<String>,
    /// Source line of the directive.
    pub line: u32,
}

impl EnableDirective {
    /// Enables rules selected by `matcher`.
    pub fn enable(matcher: RuleMatcher) -> Self {
        Self {
            matcher,
            enable: true,
            require_match: false,
            file: None,
            line: 0,
        }
    }

    /// Disables rules selected by `matcher`.
    pub fn disable(matcher: RuleMatcher) -> Self {
        Self {
            enable: false,
            ..Self::enable(matcher)
        }
    }

    /// Requires at least one match.
    pub fn require_match(mut self) -> Self {
        self.require_match = true;
        self
    }

    /// Records where the directive was written.
    pub fn at(mut self, file: &str, line: u32) -> Self {
        self.file = Some(file.to_string());
        self.line = line;
        self
    }

    fn verb(&self) -> &'static str {
        if self.enable {
            "enable"
        } else {
            "disable"
        }
    }
}

/// A rule as seen by one context, with its enabled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxRule {
    /// The rule.
    pub rule: RuleRef,
    /// Enabled in this context.
    pub enabled: bool,
}

/// Rules of one phase in a finalized context.
#[derive(Debug, Clone)]
pub struct RulesetPhase {
    /// Phase number; always equal to the bucket index.
    pub phase: Phase,
    /// Phase metadata.
    pub meta: Option<&'static PhaseMeta>,
    /// Rules in execution order.
    pub rules: Vec<CtxRule>,
}

/// Per-phase rule buckets of a context.
#[derive(Debug, Clone)]
pub struct Ruleset {
    phases: Vec<RulesetPhase>,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self::new()
    }
}

impl Ruleset {
    /// Empty buckets for every phase.
    pub fn new() -> Self {
        let phases = Phase::ALL
            .iter()
            .map(|&phase| RulesetPhase {
                phase,
                meta: find_phase_meta(false, phase).or_else(|| find_phase_meta(true, phase)),
                rules: Vec::new(),
            })
            .collect();
        Self { phases }
    }

    /// Bucket for `phase`.
    pub fn phase(&self, phase: Phase) -> Option<&RulesetPhase> {
        self.phases.get(phase.index())
    }

    /// Rules of `phase`; empty for an invalid phase.
    pub fn rules(&self, phase: Phase) -> &[CtxRule] {
        self.phase(phase).map(|bucket| bucket.rules.as_slice()).unwrap_or(&[])
    }

    /// Every bucket sits at its own phase number.
    pub fn is_consistent(&self) -> bool {
        self.phases.len() == Phase::COUNT
            && self
                .phases
                .iter()
                .enumerate()
                .all(|(index, bucket)| bucket.phase.index() == index)
    }

    /// Total number of bucketed rules.
    pub fn len(&self) -> usize {
        self.phases.iter().map(|bucket| bucket.rules.len()).sum()
    }

    /// No rules in any bucket.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, phase: Phase, rule: CtxRule) -> EngineResult<()> {
        let bucket = self
            .phases
            .get_mut(phase.index())
            .ok_or_else(|| EngineError::invalid(format!("no ruleset bucket for phase {phase}")))?;
        if bucket.phase != phase {
            return Err(EngineError::invalid(format!(
                "ruleset bucket {} holds phase {}",
                phase.index(),
                bucket.phase
            )));
        }
        bucket.rules.push(rule);
        Ok(())
    }
}

/// A configuration context.
#[derive(Debug, Clone)]
pub struct RuleContext {
    name: String,
    kind: ContextKind,
    site_id: Option<String>,
    parent: Option<ContextId>,
    rule_list: Vec<RuleRef>,
    enable_list: Vec<EnableDirective>,
    index: HashMap<String, RuleRef>,
    ruleset: Ruleset,
    owners: HashMap<RuleRef, String>,
    previous: Option<RuleRef>,
}

impl RuleContext {
    fn new(name: &str, kind: ContextKind, parent: Option<ContextId>, site_id: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            site_id,
            parent,
            rule_list: Vec::new(),
            enable_list: Vec::new(),
            index: HashMap::new(),
            ruleset: Ruleset::new(),
            owners: HashMap::new(),
            previous: None,
        }
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context kind.
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Site id, for site and location contexts.
    pub fn site_id(&self) -> Option<&str> {
        self.site_id.as_deref()
    }

    /// Parent context.
    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// Rules registered in (or imported into) this context, in order.
    pub fn rule_list(&self) -> &[RuleRef] {
        &self.rule_list
    }

    /// Pending enable/disable directives.
    pub fn enable_list(&self) -> &[EnableDirective] {
        &self.enable_list
    }

    /// Finalized rules.
    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    /// Name of the ownership callback that claimed `rule`.
    pub fn owner_of(&self, rule: RuleRef) -> Option<&str> {
        self.owners.get(&rule).map(String::as_str)
    }
}

/// Applies `directives` in order to `candidates`.
///
/// Returns one outcome per directive: the number of rules it matched, or
/// [`EngineError::NotFound`] when it required a match and found none.
pub fn apply_directives(
    rules: &[Rule],
    candidates: &mut [CtxRule],
    directives: &[EnableDirective],
) -> Vec<EngineResult<usize>> {
    directives
        .iter()
        .map(|directive| {
            let mut matched = 0;
            for candidate in candidates.iter_mut() {
                if directive.matcher.matches(rules, candidate.rule) {
                    candidate.enabled = directive.enable;
                    matched += 1;
                }
            }
            if matched == 0 && directive.require_match {
                Err(EngineError::not_found(format!(
                    "{} {:?} matched no rules",
                    directive.verb(),
                    directive.matcher
                )))
            } else {
                Ok(matched)
            }
        })
        .collect()
}

/// Arena of rules plus the configuration context tree.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
    contexts: Vec<RuleContext>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// Registry holding only the main context.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            contexts: vec![RuleContext::new("main", ContextKind::Main, None, None)],
        }
    }

    /// Opens a child context.
    ///
    /// A location context imports its parent's rules, id index and enable
    /// directives; a site context starts empty. Location contexts inherit
    /// the site id of their parent when none is given.
    pub fn open_context(
        &mut self,
        name: &str,
        kind: ContextKind,
        parent: ContextId,
        site_id: Option<&str>,
    ) -> EngineResult<ContextId> {
        if kind == ContextKind::Main {
            return Err(EngineError::invalid("only one main context may exist"));
        }
        let parent_ctx = self.context(parent)?;

        let site_id = site_id
            .map(str::to_string)
            .or_else(|| parent_ctx.site_id.clone());
        let mut ctx = RuleContext::new(name, kind, Some(parent), site_id);
        if kind == ContextKind::Location {
            ctx.rule_list = parent_ctx.rule_list.clone();
            ctx.enable_list = parent_ctx.enable_list.clone();
            ctx.index = parent_ctx.index.clone();
        }

        let id = ContextId(self.contexts.len());
        debug!(context = name, ?kind, "Opened rule context");
        self.contexts.push(ctx);
        Ok(id)
    }

    /// Context by id.
    pub fn context(&self, ctx: ContextId) -> EngineResult<&RuleContext> {
        self.contexts
            .get(ctx.0)
            .ok_or_else(|| EngineError::not_found(format!("context {}", ctx.0)))
    }

    fn context_mut(&mut self, ctx: ContextId) -> EngineResult<&mut RuleContext> {
        self.contexts
            .get_mut(ctx.0)
            .ok_or_else(|| EngineError::not_found(format!("context {}", ctx.0)))
    }

    /// Finalized rules of a context.
    pub fn ruleset(&self, ctx: ContextId) -> EngineResult<&Ruleset> {
        self.context(ctx).map(RuleContext::ruleset)
    }

    /// Rule by reference.
    pub fn rule(&self, r: RuleRef) -> EngineResult<&Rule> {
        self.rules
            .get(r.0)
            .ok_or_else(|| EngineError::not_found(format!("rule #{}", r.0)))
    }

    /// Mutable rule by reference.
    pub fn rule_mut(&mut self, r: RuleRef) -> EngineResult<&mut Rule> {
        self.rules
            .get_mut(r.0)
            .ok_or_else(|| EngineError::not_found(format!("rule #{}", r.0)))
    }

    /// Every rule in creation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Creates a rule in the generic phase.
    ///
    /// When the context's previously registered rule is a chain parent, the
    /// new rule becomes its child and inherits its phase and chain id.
    pub fn create_rule(
        &mut self,
        ctx: ContextId,
        is_stream: bool,
        file: Option<&str>,
        line: u32,
    ) -> EngineResult<RuleRef> {
        let previous = self.context(ctx)?.previous;
        let r = RuleRef(self.rules.len());

        let mut rule = Rule::new(ctx, is_stream, r.0)?;
        rule.meta.config_file = file.map(str::to_string);
        rule.meta.config_line = line;
        rule.flags.main_ctx = ctx == ContextId::MAIN;

        if let Some(parent_ref) = previous {
            let parent = self.rule_mut(parent_ref)?;
            if parent.flags.chain_parent {
                parent.chained_rule = Some(r);
                rule.meta.phase = parent.meta.phase;
                rule.phase_meta = parent.phase_meta;
                rule.meta.chain_id = parent
                    .meta
                    .chain_id
                    .clone()
                    .or_else(|| parent.meta.id.clone());
                rule.chained_from = Some(parent_ref);
                rule.flags.chain_child = true;
                debug!(parent = parent.id(), "Created chained rule");
            }
        }

        self.rules.push(rule);
        Ok(r)
    }

    /// Assigns a phase.
    ///
    /// Fails if a different phase is already set or the phase does not
    /// exist for the rule's stream-ness.
    pub fn set_phase(&mut self, r: RuleRef, phase: Phase) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        if rule.meta.phase != Phase::None && rule.meta.phase != phase {
            error!(
                "Cannot set phase {} of rule \"{}\": already set to {}",
                phase,
                rule.id(),
                rule.meta.phase
            );
            return Err(EngineError::invalid(format!(
                "phase of rule '{}' already set to {}",
                rule.id(),
                rule.meta.phase
            )));
        }
        if !phase.is_valid_num() {
            return Err(EngineError::invalid(format!("invalid phase {}", phase.index())));
        }
        let meta = find_phase_meta(rule.is_stream(), phase).ok_or_else(|| {
            EngineError::invalid(format!(
                "phase {} not available to {} rules",
                phase,
                if rule.is_stream() { "stream" } else { "buffered" }
            ))
        })?;
        rule.meta.phase = phase;
        rule.phase_meta = meta;
        Ok(())
    }

    /// Sets the user id; chain children get generated ids instead.
    pub fn set_id(&mut self, r: RuleRef, id: &str) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        if rule.chained_from.is_some() {
            error!("Error setting rule id of chained rule");
            return Err(EngineError::invalid("cannot set the id of a chained rule"));
        }
        if let Some(existing) = &rule.meta.id {
            return Err(EngineError::invalid(format!(
                "rule id already set to '{existing}'"
            )));
        }
        rule.meta.id = Some(id.to_string());
        Ok(())
    }

    /// Makes the next rule created in the context a child of this one.
    pub fn set_chain(&mut self, r: RuleRef) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        if !rule.allow_chain() {
            return Err(EngineError::invalid(format!(
                "rule '{}' is in phase {} which does not allow chaining",
                rule.id(),
                rule.meta.phase
            )));
        }
        rule.flags.chain_parent = true;
        Ok(())
    }

    /// Sets the operator instance.
    ///
    /// Parameters naming a FIELD variable turn on FIELD bookkeeping.
    pub fn set_operator(&mut self, r: RuleRef, operator: OperatorInst) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        rule.check_params(operator.params.as_deref());
        rule.operator = Some(operator);
        Ok(())
    }

    /// Sets the revision.
    pub fn set_revision(&mut self, r: RuleRef, revision: u32) -> EngineResult<()> {
        self.rule_mut(r)?.meta.revision = revision;
        Ok(())
    }

    /// Adds a tag.
    pub fn add_tag(&mut self, r: RuleRef, tag: &str) -> EngineResult<()> {
        self.rule_mut(r)?.meta.tags.push(tag.to_string());
        Ok(())
    }

    /// Sets the external and action-only flags.
    pub fn set_flags(&mut self, r: RuleRef, external: bool, no_target: bool) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        rule.flags.external = external;
        rule.flags.no_target = no_target;
        Ok(())
    }

    /// Hands an external rule to the driver registered for `tag`.
    pub fn set_external_driver(
        &mut self,
        services: &EngineServices,
        r: RuleRef,
        tag: &str,
        source: &str,
    ) -> EngineResult<()> {
        let driver = services.lookup_external_driver(tag)?.clone();
        self.rule_mut(r)?.flags.external = true;
        (driver.func())(self, r, source)
    }

    /// Enables capture into `collection`, or the configured default.
    pub fn set_capture(&mut self, r: RuleRef, collection: Option<&str>) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        let operator = rule
            .operator
            .as_ref()
            .ok_or_else(|| EngineError::invalid("capture requires an operator"))?;
        if !operator.capabilities().capture {
            return Err(EngineError::NotImplemented(format!(
                "operator '{}' does not support capture",
                operator.name()
            )));
        }
        rule.flags.capture = true;
        if let Some(collection) = collection.filter(|c| !c.is_empty()) {
            rule.capture_collection = Some(collection.to_string());
        }
        Ok(())
    }

    /// Appends a target.
    pub fn add_target(&mut self, r: RuleRef, target: Target) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        if rule.flags.no_target {
            error!(
                "Error adding target to action rule \"{}\": No targets allowed",
                rule.id()
            );
            return Err(EngineError::invalid(format!(
                "rule '{}' is action-only and takes no targets",
                rule.id()
            )));
        }
        rule.targets.push(target);
        Ok(())
    }

    /// Appends the transformation `name` to a target.
    pub fn target_add_tfn(
        services: &EngineServices,
        target: &mut Target,
        name: &str,
        arg: Option<&str>,
    ) -> EngineResult<()> {
        let tfn = services.transformations.create(name, arg).map_err(|e| {
            error!(
                "Error looking up transformation \"{}\" for target \"{}\": {}",
                name, target.target_str, e
            );
            e
        })?;
        target.add_tfn(TransformationInst::new(tfn, arg));
        Ok(())
    }

    /// Appends the transformation `name` to every target of a rule.
    ///
    /// An unknown name fails; per-target failures are only logged.
    pub fn add_tfn(
        &mut self,
        services: &EngineServices,
        r: RuleRef,
        name: &str,
        arg: Option<&str>,
    ) -> EngineResult<()> {
        if !services.transformations.contains(name) {
            error!(
                "Error looking up transformation \"{}\" for rule \"{}\": Unknown transformation",
                name,
                self.rule(r)?.id()
            );
            return Err(EngineError::not_found(format!("transformation '{name}'")));
        }
        let rule = self.rule_mut(r)?;
        let rule_id = rule.id().to_string();
        for target in &mut rule.targets {
            if let Err(e) = Self::target_add_tfn(services, target, name, arg) {
                info!(
                    rule_id = %rule_id,
                    target = %target.target_str,
                    "Error adding transformation \"{}\": {}",
                    name,
                    e
                );
            }
        }
        Ok(())
    }

    /// Resolves `(name, argument)` pairs into transformation instances.
    ///
    /// Every unknown name is reported before failing with
    /// [`EngineError::NotFound`].
    pub fn tfn_fields_to_inst(
        services: &EngineServices,
        tfns: &[(&str, Option<&str>)],
    ) -> EngineResult<Vec<TransformationInst>> {
        let mut insts = Vec::with_capacity(tfns.len());
        let mut missing = Vec::new();
        for &(name, arg) in tfns {
            match services.transformations.create(name, arg) {
                Ok(tfn) => insts.push(TransformationInst::new(tfn, arg)),
                Err(e) if e.is_not_found() => {
                    error!("Cannot find transformation \"{}\"", name);
                    missing.push(name);
                },
                Err(e) => return Err(e),
            }
        }
        if missing.is_empty() {
            Ok(insts)
        } else {
            Err(EngineError::not_found(format!(
                "transformations: {}",
                missing.join(", ")
            )))
        }
    }

    /// Appends an action to one of the rule's lists.
    pub fn add_action(&mut self, r: RuleRef, action: ActionInst, which: ActionList) -> EngineResult<()> {
        let rule = self.rule_mut(r)?;
        rule.check_params(action.params.as_deref());
        if action.name().to_ascii_lowercase().contains("event") {
            rule.flags.fields = true;
        }
        rule.actions_mut(which).push(action);
        Ok(())
    }

    /// Looks `id` up in `ctx`, then in the main context.
    pub fn lookup(&self, ctx: ContextId, id: &str) -> EngineResult<RuleRef> {
        let key = id.to_ascii_lowercase();
        if ctx != ContextId::MAIN {
            if let Some(&r) = self.context(ctx)?.index.get(&key) {
                return Ok(r);
            }
        }
        self.context(ContextId::MAIN)?
            .index
            .get(&key)
            .copied()
            .ok_or_else(|| EngineError::not_found(format!("rule '{id}'")))
    }

    /// Finds an existing rule with the same id as `r`.
    ///
    /// [`EngineError::NotFound`] means `r` is new; a match in a different
    /// phase is [`EngineError::BadValue`].
    pub fn match_rule(&self, ctx: ContextId, r: RuleRef) -> EngineResult<RuleRef> {
        let rule = self.rule(r)?;
        let existing = self.lookup(ctx, rule.id())?;
        let found = self.rule(existing)?;
        if found.meta.phase != rule.meta.phase {
            error!(
                "Rule \"{}\" exists in phase {}, cannot redefine it in phase {}",
                rule.id(),
                found.meta.phase,
                rule.meta.phase
            );
            return Err(EngineError::BadValue(format!(
                "rule '{}' already defined in phase {}",
                rule.id(),
                found.meta.phase
            )));
        }
        Ok(existing)
    }

    fn chain_position(&self, r: RuleRef) -> usize {
        let mut seen = HashSet::new();
        let mut cursor = Some(r);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                break;
            }
            cursor = self.rules.get(current.0).and_then(|rule| rule.chained_from);
        }
        seen.len()
    }

    /// Registers a rule with a context.
    ///
    /// A rule whose id already exists with an equal or higher revision is
    /// left out and reported as [`EngineError::AlreadyExists`]; a higher
    /// revision replaces the old rule in the index and in place in the rule
    /// list.
    pub fn register(&mut self, ctx: ContextId, r: RuleRef) -> EngineResult<()> {
        self.context(ctx)?;
        let chain_position = self.chain_position(r);

        let rule = self.rule_mut(r)?;
        if rule.operator.is_none() {
            error!("Rule \"{}\" has no operator", rule.id());
            return Err(EngineError::invalid(format!("rule '{}' has no operator", rule.id())));
        }
        if rule.flags.no_target {
            if !rule.targets.is_empty() {
                return Err(EngineError::invalid(format!(
                    "action rule '{}' has targets",
                    rule.id()
                )));
            }
            rule.targets.push(Target::null());
        } else if rule.targets.is_empty() {
            error!("Rule \"{}\" has no targets", rule.id());
            return Err(EngineError::invalid(format!("rule '{}' has no targets", rule.id())));
        }
        if rule.meta.id.is_none() && rule.meta.chain_id.is_none() {
            error!("Rule has no id");
            return Err(EngineError::invalid("rule has no id"));
        }

        if rule.flags.chain_child {
            let chain_id = rule.chain_id().to_string();
            rule.meta.id = Some(format!("{chain_id}/{chain_position}"));
        } else if rule.flags.chain_parent && rule.meta.chain_id.is_none() {
            rule.meta.chain_id = rule.meta.id.clone();
        }

        let id = rule.id().to_string();
        let main_ctx = rule.flags.main_ctx;
        let parent = rule.chained_from;

        let context = self.context(ctx)?;
        let full_id = if main_ctx {
            format!("main/{id}")
        } else {
            match context.kind {
                ContextKind::Site | ContextKind::Location => {
                    let site_id = context.site_id().filter(|s| !s.is_empty()).ok_or_else(|| {
                        EngineError::invalid(format!("context '{}' has no site id", context.name))
                    })?;
                    format!("site/{site_id}/{id}")
                },
                ContextKind::Main => format!("site/{}/{id}", context.name),
            }
        };
        self.rule_mut(r)?.meta.full_id = Some(full_id);

        if let Some(parent) = parent {
            if !self.rule(parent)?.flags.valid {
                error!("Chain parent of rule \"{}\" is not valid", id);
                return Err(EngineError::invalid(format!("chain parent of rule '{id}' is not valid")));
            }
        }

        let existing = match self.match_rule(ctx, r) {
            Ok(existing) => Some(existing),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(existing) = existing {
            let old_revision = self.rule(existing)?.meta.revision;
            let new_revision = self.rule(r)?.meta.revision;
            if old_revision >= new_revision {
                info!(
                    "Not replacing rule \"{}\" revision {} with revision {}",
                    id, old_revision, new_revision
                );
                return Err(EngineError::AlreadyExists(format!(
                    "rule '{id}' revision {old_revision}"
                )));
            }
            debug!(
                "Replacing rule \"{}\" revision {} with revision {}",
                id, old_revision, new_revision
            );
        }

        let context = self.context_mut(ctx)?;
        context.index.insert(id.to_ascii_lowercase(), r);
        let mut replaced = false;
        if let Some(old) = existing {
            for slot in context.rule_list.iter_mut().filter(|slot| **slot == old) {
                *slot = r;
                replaced = true;
            }
        }
        if !replaced {
            context.rule_list.push(r);
        }
        context.previous = Some(r);

        let rule = self.rule_mut(r)?;
        rule.flags.valid = true;
        debug!(
            rule_id = %id,
            phase = %rule.meta.phase,
            "Registered rule"
        );
        Ok(())
    }

    /// Clears the valid flag on the whole chain containing `r` and forgets
    /// the context's previous rule.
    pub fn chain_invalidate(&mut self, ctx: Option<ContextId>, r: RuleRef) -> EngineResult<()> {
        self.rule(r)?;
        let mut seen = HashSet::new();
        let mut head = r;
        while let Some(parent) = self.rules.get(head.0).and_then(|rule| rule.chained_from) {
            if !seen.insert(parent) {
                break;
            }
            head = parent;
        }

        seen.clear();
        let mut cursor = Some(head);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                break;
            }
            let rule = self.rule_mut(current)?;
            rule.flags.valid = false;
            cursor = rule.chained_rule;
        }

        if let Some(ctx) = ctx {
            self.context_mut(ctx)?.previous = None;
        }
        Ok(())
    }

    /// Records an enable/disable directive, applied when the context closes.
    pub fn enable(&mut self, ctx: ContextId, directive: EnableDirective) -> EngineResult<()> {
        debug!(
            "Recorded {} directive for {:?}",
            directive.verb(),
            directive.matcher
        );
        self.context_mut(ctx)?.enable_list.push(directive);
        Ok(())
    }

    /// Finalizes a location context into its ruleset.
    ///
    /// Closing main or site contexts does nothing. Closing twice yields the
    /// same ruleset.
    pub fn close_context(&mut self, ctx: ContextId, services: &EngineServices) -> EngineResult<()> {
        let context = self.context(ctx)?;
        if context.kind != ContextKind::Location {
            debug!(context = %context.name, "Nothing to finalize");
            return Ok(());
        }
        let ctx_name = context.name.clone();
        let local_rules = context.rule_list.clone();
        let directives = context.enable_list.clone();

        for &r in &local_rules {
            self.rule_mut(r)?.flags.marked = false;
        }

        let mut candidates = Vec::new();
        let main_rules = self.context(ContextId::MAIN)?.rule_list.clone();
        for main_rule in main_rules {
            let rule = self.rule(main_rule)?;
            if rule.is_chained() {
                continue;
            }
            let found = self.lookup(ctx, rule.id()).map_err(|e| {
                error!(
                    "Failed to find rule \"{}\" in context \"{}\": {}",
                    rule.id(),
                    ctx_name,
                    e
                );
                e
            })?;
            let found_rule = self.rule_mut(found)?;
            if found_rule.flags.main_ctx {
                candidates.push(CtxRule {
                    rule: found,
                    enabled: false,
                });
            } else {
                found_rule.flags.marked = true;
                candidates.push(CtxRule {
                    rule: found,
                    enabled: true,
                });
            }
        }

        for &r in &local_rules {
            let rule = self.rule(r)?;
            if rule.is_chained() || rule.is_marked() || rule.flags.main_ctx {
                continue;
            }
            candidates.push(CtxRule {
                rule: r,
                enabled: true,
            });
        }

        let outcomes = apply_directives(&self.rules, &mut candidates, &directives);
        for (directive, outcome) in directives.iter().zip(outcomes) {
            if let Err(e) = outcome {
                info!(
                    file = directive.file.as_deref().unwrap_or(""),
                    line = directive.line,
                    "Rule {} directive failed: {}",
                    directive.verb(),
                    e
                );
            }
        }

        let mut ruleset = Ruleset::new();
        let mut owners = HashMap::new();
        for candidate in candidates.iter().filter(|c| c.enabled) {
            let mut owner: Option<String> = None;
            for hook in services.ownership_fns() {
                match (hook.func())(&*self, candidate.rule, ctx) {
                    Ok(()) => match &owner {
                        Some(first) => warn!(
                            "Ownership conflict on rule \"{}\": claimed by \"{}\" and \"{}\"",
                            self.rule(candidate.rule)?.id(),
                            first,
                            hook.name()
                        ),
                        None => owner = Some(hook.name().to_string()),
                    },
                    Err(e) if e.is_declined() => {},
                    Err(e) if owner.is_some() => warn!(
                        "Ownership function \"{}\" failed on claimed rule \"{}\": {}",
                        hook.name(),
                        self.rule(candidate.rule)?.id(),
                        e
                    ),
                    Err(e) => {
                        error!(
                            "Ownership function \"{}\" failed on rule \"{}\": {}",
                            hook.name(),
                            self.rule(candidate.rule)?.id(),
                            e
                        );
                        return Err(EngineError::Unknown(format!(
                            "ownership function '{}' failed: {e}",
                            hook.name()
                        )));
                    },
                }
            }

            if let Some(owner) = owner {
                debug!(
                    "Rule \"{}\" owned by \"{}\"",
                    self.rule(candidate.rule)?.id(),
                    owner
                );
                owners.insert(candidate.rule, owner);
                continue;
            }

            let rule = self.rule(candidate.rule)?;
            if !rule.phase_meta.caps.valid || rule.phase() == Phase::None {
                error!(
                    "Cannot add rule \"{}\" in phase {} to context \"{}\"",
                    rule.id(),
                    rule.phase(),
                    ctx_name
                );
                return Err(EngineError::invalid(format!(
                    "rule '{}' has no valid phase",
                    rule.id()
                )));
            }
            ruleset.push(rule.phase(), *candidate)?;
        }

        debug!(
            context = %ctx_name,
            rules = ruleset.len(),
            owned = owners.len(),
            "Finalized rule context"
        );
        let context = self.context_mut(ctx)?;
        context.ruleset = ruleset;
        context.owners = owners;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::rule_engine::rule::Target;

    struct Fixture {
        registry: RuleRegistry,
        services: EngineServices,
        site: ContextId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut registry = RuleRegistry::new();
            let site = registry
                .open_context("site1", ContextKind::Site, ContextId::MAIN, Some("s1"))
                .unwrap();
            Self {
                registry,
                services: EngineServices::new().unwrap(),
                site,
            }
        }

        fn rule(&mut self, ctx: ContextId, id: Option<&str>, phase: Phase) -> RuleRef {
            let r = self.registry.create_rule(ctx, false, Some("test.conf"), 1).unwrap();
            if let Some(id) = id {
                self.registry.set_id(r, id).unwrap();
            }
            self.registry.set_phase(r, phase).unwrap();
            let op = self.services.operator("streq", Some("x"), false).unwrap();
            self.registry.set_operator(r, op).unwrap();
            self.registry
                .add_target(r, Target::new("ARGS", Vec::new()).unwrap())
                .unwrap();
            r
        }

        fn location(&mut self) -> ContextId {
            self.registry
                .open_context("loc", ContextKind::Location, self.site, None)
                .unwrap()
        }
    }

    #[test]
    fn test_chain_inherits_phase_and_chain_id() {
        let mut f = Fixture::new();
        let head = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.set_chain(head).unwrap();
        f.registry.register(ContextId::MAIN, head).unwrap();

        let child = f.registry.create_rule(ContextId::MAIN, false, None, 2).unwrap();
        assert!(f.registry.set_id(child, "nope").is_err());
        let op = f.services.operator("nop", None, false).unwrap();
        f.registry.set_operator(child, op).unwrap();
        f.registry
            .add_target(child, Target::new("ARGS", Vec::new()).unwrap())
            .unwrap();
        f.registry.register(ContextId::MAIN, child).unwrap();

        let head_rule = f.registry.rule(head).unwrap();
        let child_rule = f.registry.rule(child).unwrap();
        assert_eq!(head_rule.chained_rule, Some(child));
        assert_eq!(child_rule.chained_from, Some(head));
        assert_eq!(child_rule.phase(), head_rule.phase());
        assert_eq!(child_rule.chain_id(), "r1");
        assert_eq!(child_rule.id(), "r1/2");
        assert_eq!(child_rule.full_id(), "main/r1/2");
        assert_eq!(head_rule.full_id(), "main/r1");
    }

    #[test]
    fn test_chain_child_cannot_change_phase() {
        let mut f = Fixture::new();
        let head = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.set_chain(head).unwrap();
        f.registry.register(ContextId::MAIN, head).unwrap();
        let child = f.registry.create_rule(ContextId::MAIN, false, None, 2).unwrap();
        assert!(f.registry.set_phase(child, Phase::Response).is_err());
        assert!(f.registry.set_phase(child, Phase::Request).is_ok());
    }

    #[test]
    fn test_register_validation() {
        let mut f = Fixture::new();
        let r = f.registry.create_rule(ContextId::MAIN, false, None, 0).unwrap();
        f.registry.set_id(r, "r1").unwrap();
        assert!(matches!(
            f.registry.register(ContextId::MAIN, r),
            Err(EngineError::Invalid(_))
        ));

        let r = f.rule(ContextId::MAIN, None, Phase::Request);
        assert!(matches!(
            f.registry.register(ContextId::MAIN, r),
            Err(EngineError::Invalid(_))
        ));

        let r = f.registry.create_rule(ContextId::MAIN, false, None, 0).unwrap();
        f.registry.set_id(r, "action").unwrap();
        f.registry.set_phase(r, Phase::Request).unwrap();
        f.registry.set_flags(r, false, true).unwrap();
        let op = f.services.operator("nop", None, false).unwrap();
        f.registry.set_operator(r, op).unwrap();
        assert!(f
            .registry
            .add_target(r, Target::new("ARGS", Vec::new()).unwrap())
            .is_err());
        f.registry.register(ContextId::MAIN, r).unwrap();
        assert_eq!(f.registry.rule(r).unwrap().targets[0].target_str, "NULL");
    }

    #[test]
    fn test_revision_replace_and_noop() {
        let mut f = Fixture::new();
        let first = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.set_revision(first, 2).unwrap();
        f.registry.register(ContextId::MAIN, first).unwrap();
        let other = f.rule(ContextId::MAIN, Some("r2"), Phase::Request);
        f.registry.register(ContextId::MAIN, other).unwrap();

        let same = f.rule(ContextId::MAIN, Some("R1"), Phase::Request);
        f.registry.set_revision(same, 2).unwrap();
        assert!(matches!(
            f.registry.register(ContextId::MAIN, same),
            Err(EngineError::AlreadyExists(_))
        ));
        assert_eq!(f.registry.lookup(ContextId::MAIN, "r1").unwrap(), first);

        let newer = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.set_revision(newer, 3).unwrap();
        f.registry.register(ContextId::MAIN, newer).unwrap();
        assert_eq!(f.registry.lookup(ContextId::MAIN, "r1").unwrap(), newer);
        let list = f.registry.context(ContextId::MAIN).unwrap().rule_list();
        assert_eq!(list, &[newer, other]);
    }

    #[test]
    fn test_phase_mismatch_is_bad_value() {
        let mut f = Fixture::new();
        let first = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.register(ContextId::MAIN, first).unwrap();
        let other = f.rule(ContextId::MAIN, Some("r1"), Phase::Response);
        f.registry.set_revision(other, 5).unwrap();
        assert!(matches!(
            f.registry.register(ContextId::MAIN, other),
            Err(EngineError::BadValue(_))
        ));
    }

    #[test]
    fn test_site_full_id() {
        let mut f = Fixture::new();
        let site = f.site;
        let r = f.rule(site, Some("r9"), Phase::Request);
        f.registry.register(site, r).unwrap();
        assert_eq!(f.registry.rule(r).unwrap().full_id(), "site/s1/r9");

        let bare = f
            .registry
            .open_context("nosite", ContextKind::Site, ContextId::MAIN, None)
            .unwrap();
        let r = f.rule(bare, Some("r10"), Phase::Request);
        assert!(f.registry.register(bare, r).is_err());
    }

    #[test]
    fn test_matchers_walk_the_chain() {
        let mut f = Fixture::new();
        let head = f.rule(ContextId::MAIN, Some("abc"), Phase::Request);
        f.registry.add_tag(head, "owasp/sqli").unwrap();
        f.registry.set_chain(head).unwrap();
        f.registry.register(ContextId::MAIN, head).unwrap();
        let child = f.rule(ContextId::MAIN, None, Phase::Request);
        f.registry.register(ContextId::MAIN, child).unwrap();

        let rules = f.registry.rules();
        assert!(RuleMatcher::Id("ABC".into()).matches(rules, child));
        assert!(RuleMatcher::Id("main/abc".into()).matches(rules, head));
        assert!(RuleMatcher::Id("abc/2".into()).matches(rules, head));
        assert!(RuleMatcher::IdPrefix("ab".into()).matches(rules, child));
        assert!(RuleMatcher::Tag("OWASP/SQLI".into()).matches(rules, child));
        assert!(RuleMatcher::TagPrefix("owasp/".into()).matches(rules, child));
        assert!(!RuleMatcher::Tag("xss".into()).matches(rules, head));
        assert!(RuleMatcher::All.matches(rules, head));
    }

    #[test]
    fn test_apply_directives_in_order() {
        let mut f = Fixture::new();
        let r1 = f.rule(ContextId::MAIN, Some("rule1"), Phase::Request);
        f.registry.add_tag(r1, "x").unwrap();
        f.registry.register(ContextId::MAIN, r1).unwrap();
        let r2 = f.rule(ContextId::MAIN, Some("rule2"), Phase::Request);
        f.registry.add_tag(r2, "x").unwrap();
        f.registry.register(ContextId::MAIN, r2).unwrap();

        let mut candidates = vec![
            CtxRule { rule: r1, enabled: false },
            CtxRule { rule: r2, enabled: false },
        ];
        let directives = vec![
            EnableDirective::enable(RuleMatcher::Tag("x".into())),
            EnableDirective::disable(RuleMatcher::Id("rule1".into())),
            EnableDirective::disable(RuleMatcher::Id("missing".into())).require_match(),
        ];
        let outcomes = apply_directives(f.registry.rules(), &mut candidates, &directives);
        assert_eq!(outcomes[0], Ok(2));
        assert_eq!(outcomes[1], Ok(1));
        assert!(outcomes[2].as_ref().unwrap_err().is_not_found());
        assert!(!candidates[0].enabled);
        assert!(candidates[1].enabled);
    }

    #[test]
    fn test_close_location_is_idempotent() {
        let mut f = Fixture::new();
        let main_rule = f.rule(ContextId::MAIN, Some("m1"), Phase::Request);
        f.registry.register(ContextId::MAIN, main_rule).unwrap();
        f.registry
            .enable(f.site, EnableDirective::enable(RuleMatcher::All))
            .unwrap();
        let loc = f.location();
        let local = f.rule(loc, Some("l1"), Phase::Response);
        f.registry.register(loc, local).unwrap();

        f.registry.close_context(loc, &f.services).unwrap();
        let first: Vec<CtxRule> = f
            .registry
            .ruleset(loc)
            .unwrap()
            .rules(Phase::Request)
            .to_vec();
        f.registry.close_context(loc, &f.services).unwrap();
        let ruleset = f.registry.ruleset(loc).unwrap();
        assert!(ruleset.is_consistent());
        assert_eq!(ruleset.rules(Phase::Request), first.as_slice());
        assert_eq!(ruleset.rules(Phase::Request).len(), 1);
        assert_eq!(ruleset.rules(Phase::Response).len(), 1);
        assert_eq!(ruleset.len(), 2);
    }

    #[test]
    fn test_main_rules_default_disabled_in_location() {
        let mut f = Fixture::new();
        let main_rule = f.rule(ContextId::MAIN, Some("m1"), Phase::Request);
        f.registry.register(ContextId::MAIN, main_rule).unwrap();
        let loc = f.location();
        f.registry.close_context(loc, &f.services).unwrap();
        assert!(f.registry.ruleset(loc).unwrap().is_empty());
    }

    #[test]
    fn test_location_override_replaces_main_rule() {
        let mut f = Fixture::new();
        let main_rule = f.rule(ContextId::MAIN, Some("m1"), Phase::Request);
        f.registry.register(ContextId::MAIN, main_rule).unwrap();
        let loc = f.location();
        let local = f.rule(loc, Some("m1"), Phase::Request);
        f.registry.set_revision(local, 2).unwrap();
        f.registry.register(loc, local).unwrap();
        assert_eq!(f.registry.lookup(loc, "m1").unwrap(), local);
        assert_eq!(f.registry.lookup(ContextId::MAIN, "m1").unwrap(), main_rule);

        f.registry.close_context(loc, &f.services).unwrap();
        let rules = f.registry.ruleset(loc).unwrap().rules(Phase::Request);
        assert_eq!(rules, &[CtxRule { rule: local, enabled: true }]);
    }

    #[test]
    fn test_ownership_is_exclusive() {
        let mut f = Fixture::new();
        f.services
            .register_ownership_fn("first", |_, _, _| Ok(()));
        f.services
            .register_ownership_fn("second", |_, _, _| Ok(()));
        let loc = f.location();
        let r = f.rule(loc, Some("owned"), Phase::Request);
        f.registry.register(loc, r).unwrap();

        f.registry.close_context(loc, &f.services).unwrap();
        let ctx = f.registry.context(loc).unwrap();
        assert!(ctx.ruleset().is_empty());
        assert_eq!(ctx.owner_of(r), Some("first"));
    }

    #[test]
    fn test_ownership_error_aborts_close() {
        let mut f = Fixture::new();
        f.services.register_ownership_fn("broken", |_, _, _| {
            Err(EngineError::Other("boom".into()))
        });
        let loc = f.location();
        let r = f.rule(loc, Some("r1"), Phase::Request);
        f.registry.register(loc, r).unwrap();
        assert!(matches!(
            f.registry.close_context(loc, &f.services),
            Err(EngineError::Unknown(_))
        ));
    }

    #[test]
    fn test_close_rejects_phaseless_rule() {
        let mut f = Fixture::new();
        let loc = f.location();
        let r = f.rule(loc, Some("r1"), Phase::None);
        f.registry.register(loc, r).unwrap();
        assert!(f.registry.close_context(loc, &f.services).is_err());
    }

    #[test]
    fn test_chain_invalidate_clears_whole_chain() {
        let mut f = Fixture::new();
        let head = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.set_chain(head).unwrap();
        f.registry.register(ContextId::MAIN, head).unwrap();
        let child = f.rule(ContextId::MAIN, None, Phase::Request);
        f.registry.register(ContextId::MAIN, child).unwrap();

        f.registry.chain_invalidate(None, child).unwrap();
        assert!(!f.registry.rule(head).unwrap().flags.valid);
        assert!(!f.registry.rule(child).unwrap().flags.valid);
    }

    #[test]
    fn test_chain_invalidate_forgets_previous() {
        let mut f = Fixture::new();
        let head = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry.set_chain(head).unwrap();
        f.registry.register(ContextId::MAIN, head).unwrap();
        f.registry.chain_invalidate(Some(ContextId::MAIN), head).unwrap();

        let next = f.registry.create_rule(ContextId::MAIN, false, None, 9).unwrap();
        assert!(f.registry.rule(next).unwrap().chained_from.is_none());
    }

    #[test]
    fn test_tfn_helpers() {
        let mut f = Fixture::new();
        let r = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        f.registry
            .add_target(r, Target::new("ARGS:b", Vec::new()).unwrap())
            .unwrap();
        f.registry.add_tfn(&f.services, r, "lowercase", None).unwrap();
        assert!(f
            .registry
            .add_tfn(&f.services, r, "nosuch", None)
            .unwrap_err()
            .is_not_found());
        let rule = f.registry.rule(r).unwrap();
        assert!(rule.targets.iter().all(|t| t.tfns.len() == 1));

        let insts = RuleRegistry::tfn_fields_to_inst(&f.services, &[("trim", None), ("lowercase", None)]).unwrap();
        assert_eq!(insts.len(), 2);
        let err = RuleRegistry::tfn_fields_to_inst(&f.services, &[("a", None), ("trim", None), ("b", None)])
            .unwrap_err();
        assert_eq!(err, EngineError::not_found("transformations: a, b"));
    }

    #[test]
    fn test_capture_and_actions() {
        let mut f = Fixture::new();
        let r = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        let nop = f.services.operator("nop", None, false).unwrap();
        f.registry.set_operator(r, nop).unwrap();
        assert!(matches!(
            f.registry.set_capture(r, None),
            Err(EngineError::NotImplemented(_))
        ));
        let op = f.services.operator("rx", Some("a(b)"), false).unwrap();
        f.registry.set_operator(r, op).unwrap();
        f.registry.set_capture(r, Some("MYCAP")).unwrap();
        assert!(f.registry.rule(r).unwrap().flags.capture);

        let event = f.services.action("event", Some("hit")).unwrap();
        f.registry.add_action(r, event, ActionList::True).unwrap();
        let rule = f.registry.rule(r).unwrap();
        assert!(rule.flags.fields);
        assert_eq!(rule.search_action(ActionList::True, "event"), 1);
        assert_eq!(rule.search_action(ActionList::False, "event"), 0);
    }

    #[test]
    fn test_operator_params_enable_field_bookkeeping() {
        let mut f = Fixture::new();
        let plain = f.rule(ContextId::MAIN, Some("plain"), Phase::Request);
        assert!(!f.registry.rule(plain).unwrap().flags.fields);

        let r = f.rule(ContextId::MAIN, Some("r1"), Phase::Request);
        let op = f
            .services
            .operator("streq", Some("%{FIELD_NAME}"), false)
            .unwrap();
        f.registry.set_operator(r, op).unwrap();
        let rule = f.registry.rule(r).unwrap();
        assert!(rule.flags.fields);
        assert!(rule.actions(ActionList::True).is_empty());
    }

    #[test]
    fn test_close_fails_on_unresolvable_main_rule() {
        let mut f = Fixture::new();
        let main_rule = f.rule(ContextId::MAIN, Some("m1"), Phase::Request);
        f.registry.register(ContextId::MAIN, main_rule).unwrap();
        f.registry.contexts[ContextId::MAIN.0].index.clear();
        let loc = f.location();
        assert!(f
            .registry
            .close_context(loc, &f.services)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_location_imports_parent_rules() {
        let mut f = Fixture::new();
        let site = f.site;
        let r = f.rule(site, Some("s1"), Phase::Request);
        f.registry.register(site, r).unwrap();
        let loc = f.location();
        let ctx = f.registry.context(loc).unwrap();
        assert_eq!(ctx.rule_list(), &[r]);
        assert_eq!(ctx.site_id(), Some("s1"));
        assert_eq!(f.registry.lookup(loc, "S1").unwrap(), r);
        assert!(f
            .registry
            .open_context("m2", ContextKind::Main, ContextId::MAIN, None)
            .is_err());
    }
}
