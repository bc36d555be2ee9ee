//! Per-transaction rule execution records.

use super::error::{EngineError, EngineResult};
use super::field::Field;
use super::phase::Phase;
use super::rule::Rule;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Longest value text kept in a record.
const MAX_VALUE_LEN: usize = 200;

/// Outcome of one action invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    /// Action name.
    pub name: String,
    /// Error text, if the action failed.
    pub error: Option<String>,
}

/// Outcome of one operator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    /// Value the operator saw.
    pub value: Option<String>,
    /// Result after inversion.
    pub result: i64,
    /// Operator error text.
    pub error: Option<String>,
    /// Actions fired for this result.
    pub actions: Vec<ActionRecord>,
}

/// Outcome of one transformation step.
#[derive(Debug, Clone, Serialize)]
pub struct TfnRecord {
    /// Transformation name.
    pub name: String,
    /// Error text, if the step failed.
    pub error: Option<String>,
}

/// One evaluated target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRecord {
    /// Target expression.
    pub target: String,
    /// Resolved value before transformations; `None` when not found.
    pub original: Option<String>,
    /// Value after transformations.
    pub transformed: Option<String>,
    /// Transformation steps.
    pub tfns: Vec<TfnRecord>,
    /// Operator results.
    pub results: Vec<ResultRecord>,
}

/// Everything one rule did during one execution.
#[derive(Debug, Clone, Serialize)]
pub struct RuleExecRecord {
    /// Rule id.
    pub rule_id: String,
    /// Fully qualified id.
    pub full_id: String,
    /// Phase executed in.
    pub phase: Phase,
    /// Stream rule.
    pub is_stream: bool,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Evaluated targets.
    pub targets: Vec<TargetRecord>,
    /// Cumulative rule result.
    pub result: i64,
    /// First error the rule ran into.
    pub error: Option<String>,
}

fn render(value: Option<&Field>) -> Option<String> {
    value.map(|field| {
        let text = field.to_string();
        match text.char_indices().nth(MAX_VALUE_LEN) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text,
        }
    })
}

fn error_text<T>(status: &EngineResult<T>) -> Option<String> {
    status.as_ref().err().map(ToString::to_string)
}

impl RuleExecRecord {
    /// Starts a record for `rule`.
    pub fn new(rule: &Rule, phase: Phase) -> Self {
        Self {
            rule_id: rule.id().to_string(),
            full_id: rule.full_id().to_string(),
            phase,
            is_stream: rule.is_stream(),
            started_at: Utc::now(),
            targets: Vec::new(),
            result: 0,
            error: None,
        }
    }

    /// Opens a target entry.
    pub fn add_target(&mut self, target: &str, value: Option<&Field>) {
        self.targets.push(TargetRecord {
            target: target.to_string(),
            original: render(value),
            transformed: None,
            tfns: Vec::new(),
            results: Vec::new(),
        });
    }

    /// Opens a target entry for a stream unit.
    pub fn add_stream_target(&mut self, value: &Field) {
        self.add_target(&value.name, Some(value));
    }

    /// Records the transformed value of the open target.
    pub fn set_target_final(&mut self, value: Option<&Field>) {
        if let Some(target) = self.targets.last_mut() {
            target.transformed = render(value);
        }
    }

    /// Records a transformation step on the open target.
    pub fn add_tfn<T>(&mut self, name: &str, status: &EngineResult<T>) {
        if let Some(target) = self.targets.last_mut() {
            target.tfns.push(TfnRecord {
                name: name.to_string(),
                error: error_text(status),
            });
        }
    }

    /// Records an operator result on the open target.
    pub fn add_result(&mut self, value: Option<&Field>, result: i64, status: &EngineResult<()>) {
        if self.targets.is_empty() {
            self.add_target("", None);
        }
        if let Some(target) = self.targets.last_mut() {
            target.results.push(ResultRecord {
                value: render(value),
                result,
                error: error_text(status),
                actions: Vec::new(),
            });
        }
    }

    /// Records an action on the latest result.
    pub fn add_action(&mut self, name: &str, status: &EngineResult<()>) {
        if let Some(result) = self
            .targets
            .last_mut()
            .and_then(|target| target.results.last_mut())
        {
            result.actions.push(ActionRecord {
                name: name.to_string(),
                error: error_text(status),
            });
        }
    }

    /// Closes the record with the rule's cumulative outcome.
    pub fn finish(&mut self, result: i64, status: &EngineResult<()>) {
        self.result = result;
        self.error = error_text(status);
    }
}

/// Bounded log of execution records kept on a transaction.
#[derive(Debug, Clone)]
pub struct ExecLog {
    enabled: bool,
    max_records: usize,
    records: VecDeque<RuleExecRecord>,
    dropped: u64,
}

impl Default for ExecLog {
    fn default() -> Self {
        Self::new(true, 1024)
    }
}

impl ExecLog {
    /// Creates an empty log.
    pub fn new(enabled: bool, max_records: usize) -> Self {
        Self {
            enabled,
            max_records,
            records: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Applies configuration.
    pub fn configure(&mut self, enabled: bool, max_records: usize) {
        self.enabled = enabled;
        self.max_records = max_records;
    }

    /// Records are being kept.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Appends a record, evicting the oldest once full.
    pub fn push(&mut self, record: RuleExecRecord) {
        if !self.enabled || self.max_records == 0 {
            return;
        }
        while self.records.len() >= self.max_records {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(record);
    }

    /// Records in execution order.
    pub fn records(&self) -> impl Iterator<Item = &RuleExecRecord> {
        self.records.iter()
    }

    /// Number of kept records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No records kept.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records evicted to respect the cap.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Records for rule `id`.
    pub fn for_rule<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a RuleExecRecord> + 'a {
        self.records.iter().filter(move |r| r.rule_id == id)
    }

    /// Renders all records as a JSON array.
    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string(&self.records)
            .map_err(|e| EngineError::Other(format!("failed to serialize execution log: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::rule_engine::rule::ContextId;

    fn record(id: &str) -> RuleExecRecord {
        let mut rule = Rule::new(ContextId::MAIN, false, 0).unwrap();
        rule.meta.id = Some(id.to_string());
        RuleExecRecord::new(&rule, Phase::Request)
    }

    #[test]
    fn test_record_building() {
        let mut rec = record("r1");
        rec.add_target("ARGS:a", Some(&Field::string("a", "HeLLo")));
        rec.add_tfn::<()>("lowercase", &Ok(()));
        rec.set_target_final(Some(&Field::string("a", "hello")));
        rec.add_result(Some(&Field::string("a", "hello")), 1, &Ok(()));
        rec.add_action("block", &Ok(()));
        rec.finish(1, &Ok(()));

        let target = &rec.targets[0];
        assert_eq!(target.original.as_deref(), Some("a=HeLLo"));
        assert_eq!(target.transformed.as_deref(), Some("a=hello"));
        assert_eq!(target.results[0].actions[0].name, "block");
        assert_eq!(rec.result, 1);
        assert!(rec.error.is_none());
    }

    #[test]
    fn test_long_values_truncated() {
        let mut rec = record("r1");
        rec.add_target("X", Some(&Field::string("x", "y".repeat(500))));
        let original = rec.targets[0].original.as_ref().unwrap();
        assert!(original.ends_with("..."));
        assert_eq!(original.chars().count(), MAX_VALUE_LEN + 3);
    }

    #[test]
    fn test_log_cap_and_json() {
        let mut log = ExecLog::new(true, 2);
        log.push(record("a"));
        log.push(record("b"));
        log.push(record("c"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.for_rule("c").count(), 1);
        assert_eq!(log.for_rule("a").count(), 0);

        let json: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["rule_id"], "b");
        assert_eq!(json[1]["phase"], "REQUEST");
    }

    #[test]
    fn test_disabled_log_keeps_nothing() {
        let mut log = ExecLog::new(false, 10);
        log.push(record("a"));
        assert!(log.is_empty());
    }
}
