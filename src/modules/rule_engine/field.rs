//! Named, typed values flowing through targets, transformations and operators.

use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;

/// A value carried by a [`Field`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Opaque value with no inspectable content.
    Generic,
    /// Signed integer.
    Num(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Ordered list of sub-fields.
    List(Vec<Field>),
}

/// Kind of a [`FieldValue`], without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// See [`FieldValue::Generic`].
    Generic,
    /// See [`FieldValue::Num`].
    Num,
    /// See [`FieldValue::Float`].
    Float,
    /// See [`FieldValue::Str`].
    Str,
    /// See [`FieldValue::Bytes`].
    Bytes,
    /// See [`FieldValue::List`].
    List,
}

/// A named value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name; may be empty for anonymous values.
    pub name: String,
    /// Field value.
    pub value: FieldValue,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Creates a string field.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldValue::Str(value.into()))
    }

    /// Creates a bytes field.
    pub fn bytes(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::new(name, FieldValue::Bytes(value.into()))
    }

    /// Creates a numeric field.
    pub fn num(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, FieldValue::Num(value))
    }

    /// Creates a list field.
    pub fn list(name: impl Into<String>, items: Vec<Field>) -> Self {
        Self::new(name, FieldValue::List(items))
    }

    /// Creates a generic placeholder field.
    pub fn generic(name: impl Into<String>) -> Self {
        Self::new(name, FieldValue::Generic)
    }

    /// Returns the value kind.
    pub fn field_type(&self) -> FieldType {
        match &self.value {
            FieldValue::Generic => FieldType::Generic,
            FieldValue::Num(_) => FieldType::Num,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Str(_) => FieldType::Str,
            FieldValue::Bytes(_) => FieldType::Bytes,
            FieldValue::List(_) => FieldType::List,
        }
    }

    /// Returns `true` for list values.
    pub fn is_list(&self) -> bool {
        matches!(self.value, FieldValue::List(_))
    }

    /// Returns list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Field]> {
        match &self.value {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text view of scalar values; lossy for non-UTF-8 bytes.
    ///
    /// Lists and generic values have no text form.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match &self.value {
            FieldValue::Str(s) => Some(Cow::Borrowed(s.as_str())),
            FieldValue::Bytes(b) => Some(String::from_utf8_lossy(b)),
            FieldValue::Num(n) => Some(Cow::Owned(n.to_string())),
            FieldValue::Float(f) => Some(Cow::Owned(f.to_string())),
            FieldValue::Generic | FieldValue::List(_) => None,
        }
    }

    /// Numeric view of the value, parsing text when needed.
    pub fn as_num(&self) -> Option<i64> {
        match &self.value {
            FieldValue::Num(n) => Some(*n),
            FieldValue::Float(f) => Some(*f as i64),
            _ => self.as_text().and_then(|t| t.trim().parse().ok()),
        }
    }

    /// Copy of this field with a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: self.value.clone(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            FieldValue::List(items) => write!(f, "{}[{}]", self.name, items.len()),
            FieldValue::Generic => write!(f, "{}=<generic>", self.name),
            _ => write!(
                f,
                "{}={}",
                self.name,
                self.as_text().unwrap_or(Cow::Borrowed(""))
            ),
        }
    }
}
