//! Transaction variable store and compiled target expressions.
//!
//! A target expression names a source variable and optionally filters a
//! list-valued source by element name:
//!
//! - `ARGS` selects the source (its elements, if it is a list)
//! - `ARGS:id` selects elements named `id` (case-insensitive)
//! - `ARGS:/^user_/` selects elements whose name matches the pattern

use super::error::{EngineError, EngineResult};
use super::field::{Field, FieldType, FieldValue};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Get/set interface to per-transaction variables.
///
/// Names are case-insensitive.
pub trait VarStore: Send {
    /// Returns the variable, if present.
    fn get(&self, name: &str) -> Option<&Field>;

    /// Sets a variable, replacing any previous value; the field name is the key.
    fn set(&mut self, field: Field);

    /// Removes and returns a variable.
    fn remove(&mut self, name: &str) -> Option<Field>;
}

/// In-memory [`VarStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryVarStore {
    vars: HashMap<String, Field>,
}

impl MemoryVarStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field to a list variable, creating the list if needed.
    ///
    /// A scalar variable of the same name is replaced by a new list.
    pub fn push_to_list(&mut self, collection: &str, field: Field) {
        let key = collection.to_ascii_lowercase();
        let entry = self
            .vars
            .entry(key)
            .or_insert_with(|| Field::list(collection, Vec::new()));
        match &mut entry.value {
            FieldValue::List(items) => items.push(field),
            _ => *entry = Field::list(collection, vec![field]),
        }
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl VarStore for MemoryVarStore {
    fn get(&self, name: &str) -> Option<&Field> {
        self.vars.get(&name.to_ascii_lowercase())
    }

    fn set(&mut self, field: Field) {
        self.vars.insert(field.name.to_ascii_lowercase(), field);
    }

    fn remove(&mut self, name: &str) -> Option<Field> {
        self.vars.remove(&name.to_ascii_lowercase())
    }
}

/// Expands `%{NAME}` references from `store`.
///
/// Missing variables expand to the empty string; list variables expand to
/// their element count. An unterminated reference is kept literally.
pub fn expand_vars(input: &str, store: &dyn VarStore) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if let Some(field) = store.get(name) {
            match &field.value {
                FieldValue::List(items) => out.push_str(&items.len().to_string()),
                _ => out.push_str(&field.as_text().unwrap_or_default()),
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Element filter of a target expression.
#[derive(Debug, Clone)]
pub enum TargetFilter {
    /// Whole source.
    None,
    /// Elements with this exact (case-insensitive) name.
    Key(String),
    /// Elements whose name matches the pattern.
    Pattern(Regex),
}

/// A compiled target expression.
#[derive(Debug, Clone)]
pub struct TargetExpr {
    source: String,
    filter: TargetFilter,
}

impl TargetExpr {
    /// Parses a target expression.
    pub fn parse(expr: &str) -> EngineResult<Self> {
        let expr = expr.trim();
        let (source, filter) = match expr.split_once(':') {
            None => (expr, TargetFilter::None),
            Some((source, rest)) => (source, Self::parse_filter(rest)?),
        };

        if source.is_empty() {
            return Err(EngineError::Other(format!(
                "target expression '{expr}' has no source name"
            )));
        }

        Ok(Self {
            source: source.to_string(),
            filter,
        })
    }

    fn parse_filter(rest: &str) -> EngineResult<TargetFilter> {
        if rest.is_empty() {
            return Err(EngineError::Other("empty target filter".to_string()));
        }
        if let Some(body) = rest.strip_prefix('/') {
            let pattern = body.strip_suffix('/').ok_or_else(|| {
                EngineError::Other(format!("unterminated target pattern '{rest}'"))
            })?;
            let regex = Regex::new(pattern)
                .map_err(|e| EngineError::Other(format!("bad target pattern '{pattern}': {e}")))?;
            return Ok(TargetFilter::Pattern(regex));
        }
        Ok(TargetFilter::Key(rest.to_string()))
    }

    /// Name of the source variable.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Element filter.
    pub fn filter(&self) -> &TargetFilter {
        &self.filter
    }

    /// Type of the source variable in `store`.
    pub fn source_type(&self, store: &dyn VarStore) -> Option<FieldType> {
        store.get(&self.source).map(Field::field_type)
    }

    /// Resolves the expression against `store`.
    ///
    /// A missing source, or a filter that selects nothing, is
    /// [`EngineError::NotFound`]. Filtering a scalar source is
    /// [`EngineError::Invalid`].
    pub fn resolve(&self, store: &dyn VarStore) -> EngineResult<Vec<Field>> {
        let source = store
            .get(&self.source)
            .ok_or_else(|| EngineError::not_found(self.source.clone()))?;

        let selected: Vec<Field> = match (&self.filter, &source.value) {
            (TargetFilter::None, FieldValue::List(items)) => items.clone(),
            (TargetFilter::None, _) => vec![source.clone()],
            (TargetFilter::Key(key), FieldValue::List(items)) => items
                .iter()
                .filter(|f| f.name.eq_ignore_ascii_case(key))
                .cloned()
                .collect(),
            (TargetFilter::Pattern(re), FieldValue::List(items)) => items
                .iter()
                .filter(|f| re.is_match(&f.name))
                .cloned()
                .collect(),
            (_, _) => {
                return Err(EngineError::invalid(format!(
                    "cannot filter non-list variable '{}'",
                    self.source
                )))
            },
        };

        if selected.is_empty() && !matches!(self.filter, TargetFilter::None) {
            return Err(EngineError::not_found(self.to_string()));
        }
        Ok(selected)
    }
}

impl fmt::Display for TargetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            TargetFilter::None => write!(f, "{}", self.source),
            TargetFilter::Key(key) => write!(f, "{}:{}", self.source, key),
            TargetFilter::Pattern(re) => write!(f, "{}:/{}/", self.source, re.as_str()),
        }
    }
}
