//! # Rule Engine Module
//!
//! Phase-ordered execution of inspection rules against HTTP transactions.
//!
//! ## Features
//!
//! - Rule registry with site/location contexts, revisions, chains and
//!   enable/disable directives
//! - Buffered phases with chained rules, list recursion and transformations
//! - Streaming phases over header pairs and body chunks
//! - Ownership, injection and pre/post hooks for other modules
//! - Per-transaction execution log
//!
//! ## Example
//!
//! ```ignore
//! use r0n_rule_engine::modules::rule_engine::*;
//!
//! let mut engine = RuleEngine::new(RuleEngineConfig::default())?;
//! let (registry, services) = engine.parts_mut();
//! let site = registry.open_context("site", ContextKind::Site, ContextId::MAIN, Some("s1"))?;
//! let r = registry.create_rule(site, false, None, 0)?;
//! registry.set_id(r, "deny-admin")?;
//! registry.set_phase(r, Phase::Request)?;
//! registry.set_operator(r, services.operator("contains", Some("admin"), false)?)?;
//! registry.add_target(r, Target::new("REQUEST_URI", Vec::new())?)?;
//! registry.add_action(r, services.action("block", None)?, ActionList::True)?;
//! registry.register(site, r)?;
//! registry.enable(site, EnableDirective::enable(RuleMatcher::All))?;
//! let loc = registry.open_context("loc", ContextKind::Location, site, None)?;
//! engine.close_context(loc)?;
//!
//! let mut tx = Transaction::new("tx-1").with_context(loc);
//! engine.tx_started(&mut tx)?;
//! engine.notify_state(&mut tx, HostState::Request)?;
//! ```

mod action;
mod catalog;
mod config;
mod engine;
mod error;
mod exec;
mod exec_log;
mod field;
mod handler;
mod hooks;
mod operator;
mod phase;
mod registry;
mod rule;
mod runner;
mod stream;
mod transformation;
mod tx;
mod var;

pub use action::{builtin_actions, Action, ActionInst, AllowScope, BlockMode};
pub use catalog::{Catalog, Factory};
pub use config::{ExecLogConfig, RuleDebugLevel, RuleEngineConfig};
pub use engine::{EngineStats, RuleEngine};
pub use error::{EngineError, EngineResult};
pub use exec::{ExecState, ExecutionContext, RuleTrace};
pub use exec_log::{ActionRecord, ExecLog, ResultRecord, RuleExecRecord, TargetRecord, TfnRecord};
pub use field::{Field, FieldType, FieldValue};
pub use handler::RuleEngineHandler;
pub use hooks::{
    EngineServices, ExternalDriverFn, Hook, InjectionFn, OperatorOutcome, OwnershipFn,
    PostActionFn, PostOperatorFn, PreActionFn, PreOperatorFn, RuleHookFn,
};
pub use operator::{builtin_operators, Capture, Operator, OperatorCapabilities, OperatorInst};
pub use phase::{
    find_phase_meta, lookup_phase, metas_for_state, HookKind, HostState, Phase,
    PhaseCapabilities, PhaseMeta, PHASE_TABLE,
};
pub use registry::{
    apply_directives, ContextKind, CtxRule, EnableDirective, RuleContext, RuleMatcher,
    RuleRegistry, Ruleset, RulesetPhase,
};
pub use rule::{ActionList, ContextId, Rule, RuleFlags, RuleMeta, RuleRef, Target, FIELD_KEYS};
pub use stream::StreamUnit;
pub use transformation::{builtin_transformations, Transformation, TransformationInst};
pub use tx::{BlockHandler, HeaderPair, RequestLine, Transaction, TxEvent, TxFlags};
pub use var::{expand_vars, MemoryVarStore, TargetExpr, TargetFilter, VarStore};
