//! Engine services: catalogs and the callback registries.
//!
//! Everything extensions plug into lives here and is handed to the registry
//! and the runners explicitly. Callbacks are kept in registration order.

use super::action::{builtin_actions, Action, ActionInst};
use super::catalog::Catalog;
use super::error::{EngineError, EngineResult};
use super::exec::ExecutionContext;
use super::field::Field;
use super::operator::{builtin_operators, Capture, Operator, OperatorInst};
use super::phase::Phase;
use super::registry::RuleRegistry;
use super::rule::{ContextId, RuleRef};
use super::transformation::{builtin_transformations, Transformation};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Claims a rule (`Ok`) or declines it ([`EngineError::Declined`]).
pub type OwnershipFn = dyn Fn(&RuleRegistry, RuleRef, ContextId) -> EngineResult<()> + Send + Sync;

/// Appends extra rules to a phase's candidate list.
pub type InjectionFn =
    dyn Fn(&ExecutionContext<'_>, &mut Vec<RuleRef>) -> EngineResult<()> + Send + Sync;

/// Runs before or after each rule.
pub type RuleHookFn = dyn Fn(&ExecutionContext<'_>) + Send + Sync;

/// Runs before each operator invocation.
pub type PreOperatorFn = dyn Fn(&ExecutionContext<'_>, &OperatorInst, Option<&Field>) + Send + Sync;

/// Runs after each operator invocation.
pub type PostOperatorFn =
    dyn Fn(&ExecutionContext<'_>, &OperatorInst, &OperatorOutcome<'_>) + Send + Sync;

/// Runs before each action; gets the result that selected the action list.
pub type PreActionFn = dyn Fn(&ExecutionContext<'_>, &ActionInst, i64) + Send + Sync;

/// Runs after each action with the action's own status.
pub type PostActionFn =
    dyn Fn(&ExecutionContext<'_>, &ActionInst, i64, &EngineResult<()>) + Send + Sync;

/// Sets up an external rule from its driver source.
pub type ExternalDriverFn = dyn Fn(&mut RuleRegistry, RuleRef, &str) -> EngineResult<()> + Send + Sync;

/// What a post-operator hook sees.
#[derive(Debug)]
pub struct OperatorOutcome<'o> {
    /// Value operated on.
    pub value: Option<&'o Field>,
    /// Operator status.
    pub status: &'o EngineResult<()>,
    /// Raw operator result (before inversion).
    pub result: i64,
    /// Capture data, for capturing rules.
    pub capture: Option<&'o Capture>,
}

/// A named callback.
pub struct Hook<F: ?Sized> {
    name: String,
    func: Arc<F>,
}

impl<F: ?Sized> Hook<F> {
    fn new(name: &str, func: Arc<F>) -> Self {
        Self {
            name: name.to_string(),
            func,
        }
    }

    /// Registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The callback.
    pub fn func(&self) -> &F {
        &self.func
    }
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.name).finish()
    }
}

/// Catalogs and callback registries shared by every transaction.
pub struct EngineServices {
    /// Operator catalog.
    pub operators: Catalog<dyn Operator>,
    /// Transformation catalog.
    pub transformations: Catalog<dyn Transformation>,
    /// Action catalog.
    pub actions: Catalog<dyn Action>,
    ownership: Vec<Hook<OwnershipFn>>,
    injection: Vec<Vec<Hook<InjectionFn>>>,
    pre_rule: Vec<Hook<RuleHookFn>>,
    post_rule: Vec<Hook<RuleHookFn>>,
    pre_operator: Vec<Hook<PreOperatorFn>>,
    post_operator: Vec<Hook<PostOperatorFn>>,
    pre_action: Vec<Hook<PreActionFn>>,
    post_action: Vec<Hook<PostActionFn>>,
    external_drivers: HashMap<String, Hook<ExternalDriverFn>>,
}

impl EngineServices {
    /// Services with the built-in catalogs and no callbacks.
    pub fn new() -> EngineResult<Self> {
        Ok(Self::with_catalogs(
            builtin_operators()?,
            builtin_transformations()?,
            builtin_actions()?,
        ))
    }

    /// Services over caller-supplied catalogs.
    pub fn with_catalogs(
        operators: Catalog<dyn Operator>,
        transformations: Catalog<dyn Transformation>,
        actions: Catalog<dyn Action>,
    ) -> Self {
        Self {
            operators,
            transformations,
            actions,
            ownership: Vec::new(),
            injection: (0..Phase::COUNT).map(|_| Vec::new()).collect(),
            pre_rule: Vec::new(),
            post_rule: Vec::new(),
            pre_operator: Vec::new(),
            post_operator: Vec::new(),
            pre_action: Vec::new(),
            post_action: Vec::new(),
            external_drivers: HashMap::new(),
        }
    }

    /// Creates an operator instance by name.
    pub fn operator(&self, name: &str, params: Option<&str>, invert: bool) -> EngineResult<OperatorInst> {
        let op = self.operators.create(name, params)?;
        Ok(OperatorInst::new(op, params, invert))
    }

    /// Creates an action instance by name.
    pub fn action(&self, name: &str, params: Option<&str>) -> EngineResult<ActionInst> {
        let action = self.actions.create(name, params)?;
        Ok(ActionInst::new(action, params))
    }

    /// Registers an ownership callback.
    pub fn register_ownership_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&RuleRegistry, RuleRef, ContextId) -> EngineResult<()> + Send + Sync + 'static,
    {
        let func: Arc<OwnershipFn> = Arc::new(func);
        self.ownership.push(Hook::new(name, func));
    }

    /// Registers an injection callback for `phase`.
    pub fn register_injection_fn<F>(&mut self, name: &str, phase: Phase, func: F) -> EngineResult<()>
    where
        F: Fn(&ExecutionContext<'_>, &mut Vec<RuleRef>) -> EngineResult<()> + Send + Sync + 'static,
    {
        let Some(list) = self.injection.get_mut(phase.index()) else {
            return Err(EngineError::invalid(format!(
                "cannot register injection function '{name}' for phase {phase}"
            )));
        };
        let func: Arc<InjectionFn> = Arc::new(func);
        list.push(Hook::new(name, func));
        Ok(())
    }

    /// Registers a pre-rule hook.
    pub fn register_pre_rule_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ExecutionContext<'_>) + Send + Sync + 'static,
    {
        let func: Arc<RuleHookFn> = Arc::new(func);
        self.pre_rule.push(Hook::new(name, func));
    }

    /// Registers a post-rule hook.
    pub fn register_post_rule_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ExecutionContext<'_>) + Send + Sync + 'static,
    {
        let func: Arc<RuleHookFn> = Arc::new(func);
        self.post_rule.push(Hook::new(name, func));
    }

    /// Registers a pre-operator hook.
    pub fn register_pre_operator_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ExecutionContext<'_>, &OperatorInst, Option<&Field>) + Send + Sync + 'static,
    {
        let func: Arc<PreOperatorFn> = Arc::new(func);
        self.pre_operator.push(Hook::new(name, func));
    }

    /// Registers a post-operator hook.
    pub fn register_post_operator_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ExecutionContext<'_>, &OperatorInst, &OperatorOutcome<'_>) + Send + Sync + 'static,
    {
        let func: Arc<PostOperatorFn> = Arc::new(func);
        self.post_operator.push(Hook::new(name, func));
    }

    /// Registers a pre-action hook.
    pub fn register_pre_action_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ExecutionContext<'_>, &ActionInst, i64) + Send + Sync + 'static,
    {
        let func: Arc<PreActionFn> = Arc::new(func);
        self.pre_action.push(Hook::new(name, func));
    }

    /// Registers a post-action hook.
    pub fn register_post_action_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ExecutionContext<'_>, &ActionInst, i64, &EngineResult<()>) + Send + Sync + 'static,
    {
        let func: Arc<PostActionFn> = Arc::new(func);
        self.post_action.push(Hook::new(name, func));
    }

    /// Registers the driver for external rules tagged `tag`.
    pub fn register_external_driver<F>(&mut self, tag: &str, func: F) -> EngineResult<()>
    where
        F: Fn(&mut RuleRegistry, RuleRef, &str) -> EngineResult<()> + Send + Sync + 'static,
    {
        let key = tag.to_ascii_lowercase();
        if self.external_drivers.contains_key(&key) {
            return Err(EngineError::invalid(format!(
                "external rule driver for '{tag}' already registered"
            )));
        }
        let func: Arc<ExternalDriverFn> = Arc::new(func);
        self.external_drivers.insert(key, Hook::new(tag, func));
        Ok(())
    }

    /// Finds the driver for `tag`.
    pub fn lookup_external_driver(&self, tag: &str) -> EngineResult<&Hook<ExternalDriverFn>> {
        self.external_drivers
            .get(&tag.to_ascii_lowercase())
            .ok_or_else(|| EngineError::not_found(format!("external rule driver '{tag}'")))
    }

    /// Ownership callbacks in registration order.
    pub fn ownership_fns(&self) -> &[Hook<OwnershipFn>] {
        &self.ownership
    }

    /// Injection callbacks for `phase`.
    pub fn injection_fns(&self, phase: Phase) -> &[Hook<InjectionFn>] {
        self.injection
            .get(phase.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn pre_rule_fns(&self) -> &[Hook<RuleHookFn>] {
        &self.pre_rule
    }

    pub(crate) fn post_rule_fns(&self) -> &[Hook<RuleHookFn>] {
        &self.post_rule
    }

    pub(crate) fn pre_operator_fns(&self) -> &[Hook<PreOperatorFn>] {
        &self.pre_operator
    }

    pub(crate) fn post_operator_fns(&self) -> &[Hook<PostOperatorFn>] {
        &self.post_operator
    }

    pub(crate) fn pre_action_fns(&self) -> &[Hook<PreActionFn>] {
        &self.pre_action
    }

    pub(crate) fn post_action_fns(&self) -> &[Hook<PostActionFn>] {
        &self.post_action
    }
}

impl fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineServices")
            .field("operators", &self.operators)
            .field("transformations", &self.transformations)
            .field("actions", &self.actions)
            .field("ownership", &self.ownership)
            .field("external_drivers", &self.external_drivers.len())
            .finish()
    }
}
