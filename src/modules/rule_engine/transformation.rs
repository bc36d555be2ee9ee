//! Transformation contract and the built-in text transformations.

use super::catalog::Catalog;
use super::error::{EngineError, EngineResult};
use super::field::{Field, FieldValue};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A value transformation applied to a target before the operator runs.
pub trait Transformation: Send + Sync {
    /// Transformation name.
    fn name(&self) -> &str;

    /// Transforms `value`. Returning `Ok(None)` is treated as a failure.
    fn execute(&self, value: &Field) -> EngineResult<Option<Field>>;
}

/// A transformation bound to a target, with its optional argument.
#[derive(Clone)]
pub struct TransformationInst {
    /// Configured transformation.
    pub tfn: Arc<dyn Transformation>,
    /// Argument given at configuration time.
    pub arg: Option<String>,
}

impl TransformationInst {
    /// Wraps a configured transformation.
    pub fn new(tfn: Arc<dyn Transformation>, arg: Option<&str>) -> Self {
        Self {
            tfn,
            arg: arg.map(str::to_string),
        }
    }

    /// Transformation name.
    pub fn name(&self) -> &str {
        self.tfn.name()
    }
}

impl fmt::Debug for TransformationInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationInst")
            .field("name", &self.tfn.name())
            .field("arg", &self.arg)
            .finish()
    }
}

/// Text-to-text transformation; lists are transformed element-wise.
struct TextTransform {
    name: &'static str,
    apply: fn(&str) -> Cow<'_, str>,
}

impl TextTransform {
    fn transform(&self, value: &Field) -> EngineResult<Field> {
        match &value.value {
            FieldValue::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.transform(item))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok(Field::list(value.name.clone(), items))
            },
            _ => {
                let text = value.as_text().ok_or_else(|| EngineError::Transformation {
                    name: self.name.to_string(),
                    message: format!("'{}' has no text value", value.name),
                })?;
                Ok(Field::string(value.name.clone(), (self.apply)(&text).into_owned()))
            },
        }
    }
}

impl Transformation for TextTransform {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, value: &Field) -> EngineResult<Option<Field>> {
        self.transform(value).map(Some)
    }
}

/// Replaces a value by its length (lists: element count).
struct Length;

impl Transformation for Length {
    fn name(&self) -> &str {
        "length"
    }

    fn execute(&self, value: &Field) -> EngineResult<Option<Field>> {
        let len = match &value.value {
            FieldValue::List(items) => items.len(),
            FieldValue::Bytes(b) => b.len(),
            _ => value.as_text().map_or(0, |t| t.len()),
        };
        Ok(Some(Field::num(value.name.clone(), len as i64)))
    }
}

fn lowercase(input: &str) -> Cow<'_, str> {
    Cow::Owned(input.to_lowercase())
}

fn uppercase(input: &str) -> Cow<'_, str> {
    Cow::Owned(input.to_uppercase())
}

fn trim(input: &str) -> Cow<'_, str> {
    Cow::Borrowed(input.trim())
}

fn remove_whitespace(input: &str) -> Cow<'_, str> {
    Cow::Owned(input.chars().filter(|c| !c.is_whitespace()).collect())
}

fn remove_nulls(input: &str) -> Cow<'_, str> {
    Cow::Owned(input.replace('\0', ""))
}

fn url_decode(input: &str) -> Cow<'_, str> {
    if !input.contains(['%', '+']) {
        return Cow::Borrowed(input);
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    },
                    None => {
                        out.push(b'%');
                        i += 1;
                    },
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            },
            b => {
                out.push(b);
                i += 1;
            },
        }
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

fn html_entity_decode(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    const ENTITIES: [(&str, &str); 6] = [
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&nbsp;", " "),
        ("&amp;", "&"),
    ];

    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        result.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some((entity, replacement)) = ENTITIES.iter().find(|(e, _)| tail.starts_with(e)) {
            result.push_str(replacement);
            rest = &tail[entity.len()..];
            continue;
        }
        if let Some(decoded) = numeric_entity(tail) {
            result.push(decoded.0);
            rest = &tail[decoded.1..];
            continue;
        }
        result.push('&');
        rest = &tail[1..];
    }
    result.push_str(rest);
    Cow::Owned(result)
}

/// Decodes `&#NNN;` / `&#xHH;` at the start of `input`: (char, consumed).
fn numeric_entity(input: &str) -> Option<(char, usize)> {
    let body = input.strip_prefix("&#")?;
    let end = body.find(';')?;
    let digits = &body[..end];
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some((char::from_u32(code)?, end + 3))
}

fn compress_whitespace(input: &str) -> Cow<'_, str> {
    let mut result = String::with_capacity(input.len());
    let mut prev_ws = false;
    for c in input.chars() {
        if c.is_whitespace() {
            if !prev_ws {
                result.push(' ');
            }
            prev_ws = true;
        } else {
            result.push(c);
            prev_ws = false;
        }
    }
    Cow::Owned(result)
}

fn normalize_path(input: &str) -> Cow<'_, str> {
    let mut parts: Vec<&str> = Vec::new();
    for part in input.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                parts.pop();
            },
            _ => parts.push(part),
        }
    }
    if input.starts_with('/') {
        Cow::Owned(format!("/{}", parts.join("/")))
    } else {
        Cow::Owned(parts.join("/"))
    }
}

fn base64_decode(input: &str) -> Cow<'_, str> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .ok()
        .map(|bytes| Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()))
        .unwrap_or(Cow::Borrowed(input))
}

fn hex_decode(input: &str) -> Cow<'_, str> {
    let bytes = input.as_bytes();
    if bytes.len() % 2 != 0 || !bytes.iter().all(u8::is_ascii_hexdigit) {
        return Cow::Borrowed(input);
    }
    let decoded: Vec<u8> = bytes
        .chunks(2)
        .filter_map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
        })
        .collect();
    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

/// Catalog with the built-in transformations registered.
pub fn builtin_transformations() -> EngineResult<Catalog<dyn Transformation>> {
    let text: [(&'static str, fn(&str) -> Cow<'_, str>); 11] = [
        ("lowercase", lowercase),
        ("uppercase", uppercase),
        ("trim", trim),
        ("urlDecode", url_decode),
        ("htmlEntityDecode", html_entity_decode),
        ("removeWhitespace", remove_whitespace),
        ("compressWhitespace", compress_whitespace),
        ("removeNulls", remove_nulls),
        ("normalizePath", normalize_path),
        ("base64Decode", base64_decode),
        ("hexDecode", hex_decode),
    ];

    let mut catalog: Catalog<dyn Transformation> = Catalog::new("transformation");
    for (name, apply) in text {
        catalog.register(name, move |_| {
            Ok(Arc::new(TextTransform { name, apply }) as Arc<dyn Transformation>)
        })?;
    }
    catalog.register("length", |_| Ok(Arc::new(Length) as Arc<dyn Transformation>))?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(name: &str, input: &str) -> String {
        let catalog = builtin_transformations().unwrap();
        let tfn = catalog.create(name, None).unwrap();
        let out = tfn.execute(&Field::string("v", input)).unwrap().unwrap();
        out.as_text().unwrap().into_owned()
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(apply("lowercase", "HeLLo"), "hello");
        assert_eq!(apply("UPPERCASE", "abc"), "ABC");
        assert_eq!(apply("trim", "  x  "), "x");
        assert_eq!(apply("removeWhitespace", "a b\tc"), "abc");
        assert_eq!(apply("compressWhitespace", "a   b\t\tc"), "a b c");
        assert_eq!(apply("removeNulls", "a\0b"), "ab");
    }

    #[test]
    fn test_decoders() {
        assert_eq!(apply("urlDecode", "a%20b+c%zz"), "a b c%zz");
        assert_eq!(apply("urlDecode", "100%"), "100%");
        assert_eq!(apply("htmlEntityDecode", "&lt;b&gt; &#65;&#x42; &amp;"), "<b> AB &");
        assert_eq!(apply("htmlEntityDecode", "a & b"), "a & b");
        assert_eq!(apply("base64Decode", "aGVsbG8="), "hello");
        assert_eq!(apply("base64Decode", "not base64!"), "not base64!");
        assert_eq!(apply("hexDecode", "414243"), "ABC");
        assert_eq!(apply("hexDecode", "xyz"), "xyz");
        assert_eq!(apply("normalizePath", "/a/./b/../c"), "/a/c");
    }

    #[test]
    fn test_list_and_length() {
        let catalog = builtin_transformations().unwrap();
        let lower = catalog.create("lowercase", None).unwrap();
        let list = Field::list("ARGS", vec![Field::string("a", "X"), Field::string("b", "Y")]);
        let out = lower.execute(&list).unwrap().unwrap();
        assert_eq!(out.as_list().unwrap()[1].as_text().unwrap(), "y");

        let length = catalog.create("length", None).unwrap();
        let out = length.execute(&Field::string("v", "four")).unwrap().unwrap();
        assert_eq!(out.as_num(), Some(4));
        let out = length.execute(&list).unwrap().unwrap();
        assert_eq!(out.as_num(), Some(2));
    }

    #[test]
    fn test_generic_value_fails() {
        let catalog = builtin_transformations().unwrap();
        let tfn = catalog.create("lowercase", None).unwrap();
        let err = tfn.execute(&Field::generic("g")).unwrap_err();
        assert!(matches!(err, EngineError::Transformation { .. }));
    }
}
