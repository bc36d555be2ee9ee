//! Action invocation contract and the built-in actions.
//!
//! Actions run after a rule's operator has produced a result. They receive
//! the execution context and may change transaction state (blocking and
//! allow flags, variables, events).

use super::catalog::Catalog;
use super::error::{EngineError, EngineResult};
use super::exec::ExecutionContext;
use super::field::Field;
use super::var::expand_vars;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An action instance, configured with its parameters.
pub trait Action: Send + Sync {
    /// Action name.
    fn name(&self) -> &str;

    /// Runs the action for the current rule and value.
    fn execute(&self, exec: &mut ExecutionContext<'_>) -> EngineResult<()>;
}

/// A configured action attached to one of a rule's action lists.
#[derive(Clone)]
pub struct ActionInst {
    /// Configured action.
    pub action: Arc<dyn Action>,
    /// Raw parameter string.
    pub params: Option<String>,
}

impl ActionInst {
    /// Wraps a configured action.
    pub fn new(action: Arc<dyn Action>, params: Option<&str>) -> Self {
        Self {
            action,
            params: params.map(str::to_string),
        }
    }

    /// Action name.
    pub fn name(&self) -> &str {
        self.action.name()
    }

    /// Runs the action.
    pub fn execute(&self, exec: &mut ExecutionContext<'_>) -> EngineResult<()> {
        self.action.execute(exec)
    }
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name()).finish()
    }
}

impl fmt::Debug for ActionInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionInst")
            .field("name", &self.action.name())
            .field("params", &self.params)
            .finish()
    }
}

/// How a `block` action blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Block once the current phase completes.
    Phase,
    /// Block right after the current rule.
    Immediate,
    /// Only record that a block was advised.
    Advisory,
}

impl BlockMode {
    fn parse(params: Option<&str>) -> EngineResult<Self> {
        match params.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("phase") => Ok(Self::Phase),
            Some("immediate") => Ok(Self::Immediate),
            Some("advisory") => Ok(Self::Advisory),
            Some(other) => Err(EngineError::invalid(format!(
                "unknown block mode '{other}'"
            ))),
        }
    }
}

struct Block {
    mode: BlockMode,
}

impl Action for Block {
    fn name(&self) -> &str {
        "block"
    }

    fn execute(&self, exec: &mut ExecutionContext<'_>) -> EngineResult<()> {
        let flags = &mut exec.tx_mut().flags;
        match self.mode {
            BlockMode::Phase => {
                flags.block_advisory = true;
                flags.block_phase = true;
            },
            BlockMode::Immediate => {
                flags.block_advisory = true;
                flags.block_immediate = true;
            },
            BlockMode::Advisory => flags.block_advisory = true,
        }
        debug!(rule_id = exec.rule_id(), mode = ?self.mode, "block requested");
        Ok(())
    }
}

/// Scope of an `allow` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowScope {
    /// Skip the rest of the current phase.
    Phase,
    /// Skip the remaining request phases.
    Request,
    /// Skip everything except post-processing and logging.
    All,
}

impl AllowScope {
    fn parse(params: Option<&str>) -> EngineResult<Self> {
        match params.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("all") => Ok(Self::All),
            Some("phase") => Ok(Self::Phase),
            Some("request") => Ok(Self::Request),
            Some(other) => Err(EngineError::invalid(format!(
                "unknown allow scope '{other}'"
            ))),
        }
    }
}

struct Allow {
    scope: AllowScope,
}

impl Action for Allow {
    fn name(&self) -> &str {
        "allow"
    }

    fn execute(&self, exec: &mut ExecutionContext<'_>) -> EngineResult<()> {
        let flags = &mut exec.tx_mut().flags;
        match self.scope {
            AllowScope::Phase => flags.allow_phase = true,
            AllowScope::Request => flags.allow_request = true,
            AllowScope::All => flags.allow_all = true,
        }
        Ok(())
    }
}

/// `setvar:NAME=value`; the value may reference `%{VAR}`.
struct SetVar {
    name: String,
    value: String,
}

impl Action for SetVar {
    fn name(&self) -> &str {
        "setvar"
    }

    fn execute(&self, exec: &mut ExecutionContext<'_>) -> EngineResult<()> {
        let value = expand_vars(&self.value, exec.tx().vars());
        exec.tx_mut().vars_mut().set(Field::string(self.name.clone(), value));
        Ok(())
    }
}

/// Records an event on the transaction; the message may reference `%{VAR}`.
struct Event {
    message: String,
}

impl Action for Event {
    fn name(&self) -> &str {
        "event"
    }

    fn execute(&self, exec: &mut ExecutionContext<'_>) -> EngineResult<()> {
        let message = expand_vars(&self.message, exec.tx().vars());
        let rule_id = exec.rule_id().to_string();
        let phase = exec.phase();
        exec.tx_mut().add_event(rule_id, phase, message);
        Ok(())
    }
}

/// Catalog with the built-in actions registered.
pub fn builtin_actions() -> EngineResult<Catalog<dyn Action>> {
    let mut catalog: Catalog<dyn Action> = Catalog::new("action");
    catalog.register("block", |params| {
        Ok(Arc::new(Block {
            mode: BlockMode::parse(params)?,
        }) as Arc<dyn Action>)
    })?;
    catalog.register("allow", |params| {
        Ok(Arc::new(Allow {
            scope: AllowScope::parse(params)?,
        }) as Arc<dyn Action>)
    })?;
    catalog.register("setvar", |params| {
        let raw = params.ok_or_else(|| EngineError::invalid("setvar requires NAME=value"))?;
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| EngineError::invalid(format!("setvar '{raw}' is not NAME=value")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::invalid("setvar has an empty variable name"));
        }
        Ok(Arc::new(SetVar {
            name: name.to_string(),
            value: value.to_string(),
        }) as Arc<dyn Action>)
    })?;
    catalog.register("event", |params| {
        Ok(Arc::new(Event {
            message: params.unwrap_or_default().to_string(),
        }) as Arc<dyn Action>)
    })?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_and_allow_params() {
        assert_eq!(BlockMode::parse(None).unwrap(), BlockMode::Phase);
        assert_eq!(BlockMode::parse(Some("Immediate")).unwrap(), BlockMode::Immediate);
        assert!(BlockMode::parse(Some("never")).is_err());

        assert_eq!(AllowScope::parse(None).unwrap(), AllowScope::All);
        assert_eq!(AllowScope::parse(Some("request")).unwrap(), AllowScope::Request);
        assert!(AllowScope::parse(Some("forever")).is_err());
    }

    #[test]
    fn test_builtin_action_catalog() {
        let catalog = builtin_actions().unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.create("BLOCK", Some("phase")).unwrap().name(), "block");
        assert!(catalog.create("setvar", Some("novalue")).is_err());
        assert!(catalog.create("setvar", Some("=x")).is_err());
        assert!(catalog.create("setvar", None).is_err());
        assert!(catalog.create("event", None).is_ok());
        assert!(catalog.create("redirect", None).unwrap_err().is_not_found());
    }
}
