//! Transactions as seen by the rule engine.

use super::error::{EngineError, EngineResult};
use super::exec::ExecState;
use super::exec_log::ExecLog;
use super::field::Field;
use super::phase::Phase;
use super::rule::ContextId;
use super::var::{MemoryVarStore, VarStore};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Transaction flags the engine reads and actions set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxFlags {
    /// The request has started.
    pub req_started: bool,
    /// Request data (line, headers or body) has been seen.
    pub req_has_data: bool,
    /// Response data has been seen.
    pub res_has_data: bool,
    /// A block was advised.
    pub block_advisory: bool,
    /// Block at the end of the current phase.
    pub block_phase: bool,
    /// Block right away.
    pub block_immediate: bool,
    /// Skip the rest of the current phase.
    pub allow_phase: bool,
    /// Skip the remaining request phases.
    pub allow_request: bool,
    /// Skip everything but post-processing and logging.
    pub allow_all: bool,
}

/// Parsed request line.
#[derive(Debug, Clone, Default)]
pub struct RequestLine {
    /// Method, e.g. `GET`.
    pub method: Option<String>,
    /// Raw URI.
    pub uri: Option<String>,
    /// Protocol, e.g. `HTTP/1.1`.
    pub protocol: Option<String>,
}

impl RequestLine {
    /// Builds a request line with all three parts.
    pub fn new(method: &str, uri: &str, protocol: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            uri: Some(uri.to_string()),
            protocol: Some(protocol.to_string()),
        }
    }
}

/// One header (or request-line part) as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPair {
    /// Header name.
    pub name: String,
    /// Raw header value.
    pub value: Bytes,
}

impl HeaderPair {
    /// Creates a pair.
    pub fn new(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An event recorded by the `event` action.
#[derive(Debug, Clone, Serialize)]
pub struct TxEvent {
    /// Id of the rule that raised it.
    pub rule_id: String,
    /// Phase the rule ran in.
    pub phase: Phase,
    /// Expanded message.
    pub message: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Host callback that carries out a block.
pub trait BlockHandler: Send + Sync {
    /// Blocks the transaction. [`EngineError::Declined`] means the handler
    /// chose not to block.
    fn block(&self, tx: &Transaction) -> EngineResult<()>;
}

/// A single request/response exchange under inspection.
pub struct Transaction {
    id: String,
    ctx: ContextId,
    /// Flags.
    pub flags: TxFlags,
    vars: Box<dyn VarStore>,
    /// Parsed request line, if any.
    pub request_line: Option<RequestLine>,
    /// Parsed request headers.
    pub request_headers: Vec<HeaderPair>,
    /// Parsed response headers.
    pub response_headers: Vec<HeaderPair>,
    blocked: bool,
    block_handler: Option<Arc<dyn BlockHandler>>,
    pub(crate) rule_exec: Option<ExecState>,
    exec_log: ExecLog,
    events: Vec<TxEvent>,
}

impl Transaction {
    /// Creates a transaction in the main context with an in-memory var store.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ctx: ContextId::MAIN,
            flags: TxFlags::default(),
            vars: Box::new(MemoryVarStore::new()),
            request_line: None,
            request_headers: Vec::new(),
            response_headers: Vec::new(),
            blocked: false,
            block_handler: None,
            rule_exec: None,
            exec_log: ExecLog::default(),
            events: Vec::new(),
        }
    }

    /// Selects the configuration context whose ruleset applies.
    pub fn with_context(mut self, ctx: ContextId) -> Self {
        self.ctx = ctx;
        self
    }

    /// Replaces the var store.
    pub fn with_vars(mut self, vars: impl VarStore + 'static) -> Self {
        self.vars = Box::new(vars);
        self
    }

    /// Installs a block handler.
    pub fn with_block_handler(mut self, handler: Arc<dyn BlockHandler>) -> Self {
        self.block_handler = Some(handler);
        self
    }

    /// Transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configuration context.
    pub fn context(&self) -> ContextId {
        self.ctx
    }

    /// Variables.
    pub fn vars(&self) -> &dyn VarStore {
        self.vars.as_ref()
    }

    /// Mutable variables.
    pub fn vars_mut(&mut self) -> &mut dyn VarStore {
        self.vars.as_mut()
    }

    /// Shorthand for setting a variable.
    pub fn set_var(&mut self, field: Field) {
        self.vars.set(field);
    }

    /// Execution state, once [`RuleEngine::tx_started`] has run.
    ///
    /// [`RuleEngine::tx_started`]: super::engine::RuleEngine::tx_started
    pub fn rule_exec(&self) -> Option<&ExecState> {
        self.rule_exec.as_ref()
    }

    /// Rule execution records.
    pub fn exec_log(&self) -> &ExecLog {
        &self.exec_log
    }

    pub(crate) fn exec_log_mut(&mut self) -> &mut ExecLog {
        &mut self.exec_log
    }

    /// Recorded events.
    pub fn events(&self) -> &[TxEvent] {
        &self.events
    }

    pub(crate) fn add_event(&mut self, rule_id: String, phase: Phase, message: String) {
        self.events.push(TxEvent {
            rule_id,
            phase,
            message,
            timestamp: Utc::now(),
        });
    }

    /// The transaction has been blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Blocks the transaction.
    ///
    /// With a handler installed the handler decides; a declined block leaves
    /// the transaction running and returns [`EngineError::Declined`].
    pub fn block(&mut self) -> EngineResult<()> {
        if self.blocked {
            return Ok(());
        }
        if let Some(handler) = self.block_handler.clone() {
            handler.block(self)?;
        }
        self.blocked = true;
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("ctx", &self.ctx)
            .field("flags", &self.flags)
            .field("blocked", &self.blocked)
            .field("has_rule_exec", &self.rule_exec.is_some())
            .field("events", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decline;

    impl BlockHandler for Decline {
        fn block(&self, _tx: &Transaction) -> EngineResult<()> {
            Err(EngineError::Declined)
        }
    }

    #[test]
    fn test_block_without_handler() {
        let mut tx = Transaction::new("t1");
        assert!(!tx.is_blocked());
        tx.block().unwrap();
        assert!(tx.is_blocked());
        tx.block().unwrap();
    }

    #[test]
    fn test_block_declined() {
        let mut tx = Transaction::new("t1").with_block_handler(Arc::new(Decline));
        assert!(tx.block().unwrap_err().is_declined());
        assert!(!tx.is_blocked());
    }

    #[test]
    fn test_vars_and_events() {
        let mut tx = Transaction::new("t1");
        tx.set_var(Field::string("A", "1"));
        assert_eq!(tx.vars().get("a").unwrap().as_text().unwrap(), "1");
        tx.add_event("r1".to_string(), Phase::Request, "hit".to_string());
        assert_eq!(tx.events()[0].rule_id, "r1");
        assert!(tx.rule_exec().is_none());
    }
}
