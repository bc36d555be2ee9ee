//! Operator invocation contract and the built-in operators.

use super::catalog::Catalog;
use super::error::{EngineError, EngineResult};
use super::field::Field;
use super::tx::Transaction;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Operator capability set, queried before invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperatorCapabilities {
    /// Runs with a null value when the target is missing.
    pub allow_null: bool,
    /// Can fill a capture collection.
    pub capture: bool,
}

impl OperatorCapabilities {
    /// No capabilities.
    pub const NONE: Self = Self {
        allow_null: false,
        capture: false,
    };
}

/// Sub-match data collected by a capture-capable operator.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    collection: String,
    items: Vec<Field>,
}

impl Capture {
    /// Creates an empty capture bound for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            items: Vec::new(),
        }
    }

    /// Collection the capture is stored under.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Stores `value` at position `index`, named by its index.
    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        let field = Field::string(index.to_string(), value);
        match self.items.get_mut(index) {
            Some(slot) => *slot = field,
            None => {
                while self.items.len() < index {
                    let pos = self.items.len();
                    self.items.push(Field::string(pos.to_string(), ""));
                }
                self.items.push(field);
            },
        }
    }

    /// Captured items.
    pub fn items(&self) -> &[Field] {
        &self.items
    }

    /// Drops all captured items.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Converts the capture into a list field named after the collection.
    pub fn into_field(self) -> Field {
        Field::list(self.collection, self.items)
    }
}

/// An operator instance, configured with its parameters.
pub trait Operator: Send + Sync {
    /// Operator name.
    fn name(&self) -> &str;

    /// Advertised capabilities.
    fn capabilities(&self) -> OperatorCapabilities {
        OperatorCapabilities::NONE
    }

    /// Runs the operator; a non-zero result means "matched".
    ///
    /// `value` is `None` only for allow-null operators and external rules.
    fn execute(
        &self,
        tx: &Transaction,
        value: Option<&Field>,
        capture: Option<&mut Capture>,
    ) -> EngineResult<i64>;
}

/// A rule's operator with its parameter string and invert flag.
#[derive(Clone)]
pub struct OperatorInst {
    /// Configured operator.
    pub operator: Arc<dyn Operator>,
    /// Raw parameter string.
    pub params: Option<String>,
    /// Invert the result (`!op`).
    pub invert: bool,
}

impl OperatorInst {
    /// Wraps a configured operator.
    pub fn new(operator: Arc<dyn Operator>, params: Option<&str>, invert: bool) -> Self {
        Self {
            operator,
            params: params.map(str::to_string),
            invert,
        }
    }

    /// Operator name.
    pub fn name(&self) -> &str {
        self.operator.name()
    }

    /// Operator capabilities.
    pub fn capabilities(&self) -> OperatorCapabilities {
        self.operator.capabilities()
    }
}

impl fmt::Debug for OperatorInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorInst")
            .field("name", &self.operator.name())
            .field("params", &self.params)
            .field("invert", &self.invert)
            .finish()
    }
}

/// String comparison kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringMatchKind {
    Equals,
    Contains,
    BeginsWith,
    EndsWith,
}

/// Literal string comparison operators (`streq`, `contains`, ...).
#[derive(Debug)]
struct StringMatch {
    name: &'static str,
    kind: StringMatchKind,
    pattern: String,
}

impl Operator for StringMatch {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> OperatorCapabilities {
        OperatorCapabilities {
            allow_null: false,
            capture: true,
        }
    }

    fn execute(
        &self,
        _tx: &Transaction,
        value: Option<&Field>,
        capture: Option<&mut Capture>,
    ) -> EngineResult<i64> {
        let Some(text) = value.and_then(Field::as_text) else {
            return Ok(0);
        };
        let matched = match self.kind {
            StringMatchKind::Equals => text == self.pattern.as_str(),
            StringMatchKind::Contains => text.contains(self.pattern.as_str()),
            StringMatchKind::BeginsWith => text.starts_with(self.pattern.as_str()),
            StringMatchKind::EndsWith => text.ends_with(self.pattern.as_str()),
        };
        if matched {
            if let Some(capture) = capture {
                capture.clear();
                capture.set(0, text.into_owned());
            }
        }
        Ok(i64::from(matched))
    }
}

/// Regular expression match with group capture (`rx`).
#[derive(Debug)]
struct RegexMatch {
    regex: Regex,
}

impl Operator for RegexMatch {
    fn name(&self) -> &str {
        "rx"
    }

    fn capabilities(&self) -> OperatorCapabilities {
        OperatorCapabilities {
            allow_null: false,
            capture: true,
        }
    }

    fn execute(
        &self,
        _tx: &Transaction,
        value: Option<&Field>,
        capture: Option<&mut Capture>,
    ) -> EngineResult<i64> {
        let Some(text) = value.and_then(Field::as_text) else {
            return Ok(0);
        };
        let Some(caps) = self.regex.captures(&text) else {
            return Ok(0);
        };
        if let Some(capture) = capture {
            capture.clear();
            for (index, group) in caps.iter().enumerate() {
                capture.set(index, group.map_or("", |m| m.as_str()));
            }
        }
        Ok(1)
    }
}

/// Numeric comparison kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumericKind {
    Eq,
    Gt,
    Lt,
}

/// Numeric comparison operators (`eq`, `gt`, `lt`).
#[derive(Debug)]
struct NumericCompare {
    name: &'static str,
    kind: NumericKind,
    rhs: i64,
}

impl Operator for NumericCompare {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(
        &self,
        _tx: &Transaction,
        value: Option<&Field>,
        _capture: Option<&mut Capture>,
    ) -> EngineResult<i64> {
        let Some(field) = value else {
            return Ok(0);
        };
        let lhs = field.as_num().ok_or_else(|| EngineError::Operator {
            name: self.name.to_string(),
            message: format!("'{}' is not numeric", field.name),
        })?;
        let matched = match self.kind {
            NumericKind::Eq => lhs == self.rhs,
            NumericKind::Gt => lhs > self.rhs,
            NumericKind::Lt => lhs < self.rhs,
        };
        Ok(i64::from(matched))
    }
}

/// Always matches; runs even without a value (`nop`).
#[derive(Debug)]
struct Nop;

impl Operator for Nop {
    fn name(&self) -> &str {
        "nop"
    }

    fn capabilities(&self) -> OperatorCapabilities {
        OperatorCapabilities {
            allow_null: true,
            capture: false,
        }
    }

    fn execute(
        &self,
        _tx: &Transaction,
        _value: Option<&Field>,
        _capture: Option<&mut Capture>,
    ) -> EngineResult<i64> {
        Ok(1)
    }
}

fn required_param<'a>(name: &str, params: Option<&'a str>) -> EngineResult<&'a str> {
    params.ok_or_else(|| EngineError::invalid(format!("operator '{name}' requires a parameter")))
}

fn string_match(
    catalog: &mut Catalog<dyn Operator>,
    name: &'static str,
    kind: StringMatchKind,
) -> EngineResult<()> {
    catalog.register(name, move |params| {
        let pattern = required_param(name, params)?.to_string();
        Ok(Arc::new(StringMatch {
            name,
            kind,
            pattern,
        }) as Arc<dyn Operator>)
    })
}

fn numeric(
    catalog: &mut Catalog<dyn Operator>,
    name: &'static str,
    kind: NumericKind,
) -> EngineResult<()> {
    catalog.register(name, move |params| {
        let raw = required_param(name, params)?;
        let rhs = raw
            .trim()
            .parse()
            .map_err(|_| EngineError::invalid(format!("operator '{name}': '{raw}' is not a number")))?;
        Ok(Arc::new(NumericCompare { name, kind, rhs }) as Arc<dyn Operator>)
    })
}

/// Catalog with the built-in operators registered.
pub fn builtin_operators() -> EngineResult<Catalog<dyn Operator>> {
    let mut catalog: Catalog<dyn Operator> = Catalog::new("operator");
    string_match(&mut catalog, "streq", StringMatchKind::Equals)?;
    string_match(&mut catalog, "contains", StringMatchKind::Contains)?;
    string_match(&mut catalog, "beginsWith", StringMatchKind::BeginsWith)?;
    string_match(&mut catalog, "endsWith", StringMatchKind::EndsWith)?;
    numeric(&mut catalog, "eq", NumericKind::Eq)?;
    numeric(&mut catalog, "gt", NumericKind::Gt)?;
    numeric(&mut catalog, "lt", NumericKind::Lt)?;
    catalog.register("rx", |params| {
        let pattern = required_param("rx", params)?;
        let regex = Regex::new(pattern)
            .map_err(|e| EngineError::invalid(format!("operator 'rx': {e}")))?;
        Ok(Arc::new(RegexMatch { regex }) as Arc<dyn Operator>)
    })?;
    catalog.register("nop", |_| Ok(Arc::new(Nop) as Arc<dyn Operator>))?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, params: &str, value: Option<&Field>) -> EngineResult<i64> {
        let catalog = builtin_operators().unwrap();
        let op = catalog.create(name, Some(params)).unwrap();
        let tx = Transaction::new("t1");
        op.execute(&tx, value, None)
    }

    #[test]
    fn test_string_operators() {
        let hello = Field::string("a", "hello world");
        assert_eq!(run("streq", "hello world", Some(&hello)).unwrap(), 1);
        assert_eq!(run("streq", "hello", Some(&hello)).unwrap(), 0);
        assert_eq!(run("contains", "lo w", Some(&hello)).unwrap(), 1);
        assert_eq!(run("beginswith", "hell", Some(&hello)).unwrap(), 1);
        assert_eq!(run("endsWith", "world", Some(&hello)).unwrap(), 1);
        assert_eq!(run("streq", "x", None).unwrap(), 0);
    }

    #[test]
    fn test_numeric_operators() {
        let n = Field::string("n", "10");
        assert_eq!(run("gt", "5", Some(&n)).unwrap(), 1);
        assert_eq!(run("lt", "5", Some(&n)).unwrap(), 0);
        assert_eq!(run("eq", "10", Some(&n)).unwrap(), 1);

        let bad = Field::string("n", "ten");
        assert!(matches!(
            run("eq", "10", Some(&bad)),
            Err(EngineError::Operator { .. })
        ));

        let catalog = builtin_operators().unwrap();
        assert!(catalog.create("eq", Some("x")).is_err());
        assert!(catalog.create("eq", None).is_err());
    }

    #[test]
    fn test_rx_capture() {
        let catalog = builtin_operators().unwrap();
        let op = catalog.create("rx", Some(r"id=(\d+)")).unwrap();
        assert!(op.capabilities().capture);

        let tx = Transaction::new("t1");
        let mut capture = Capture::new("CAPTURE");
        let value = Field::string("q", "x id=42 y");
        assert_eq!(op.execute(&tx, Some(&value), Some(&mut capture)).unwrap(), 1);
        assert_eq!(capture.items().len(), 2);
        assert_eq!(capture.items()[1].as_text().unwrap(), "42");
        assert_eq!(capture.items()[1].name, "1");
    }

    #[test]
    fn test_capture_set_fills_gaps() {
        let mut capture = Capture::new("C");
        capture.set(2, "two");
        assert_eq!(capture.items().len(), 3);
        capture.set(0, "zero");
        assert_eq!(capture.items()[0].as_text().unwrap(), "zero");
        let field = capture.into_field();
        assert_eq!(field.name, "C");
    }

    #[test]
    fn test_builtin_capabilities() {
        assert_eq!(
            builtin_operators().unwrap().create("streq", Some("x")).unwrap().capabilities(),
            OperatorCapabilities {
                allow_null: false,
                capture: true,
            }
        );
        assert!(builtin_operators()
            .unwrap()
            .create("nop", None)
            .unwrap()
            .capabilities()
            .allow_null);
    }
}
