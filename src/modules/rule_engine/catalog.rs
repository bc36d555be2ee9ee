//! Case-insensitive name registries for operators, transformations and actions.

use super::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a configured instance from an optional parameter string.
pub type Factory<T> = Arc<dyn Fn(Option<&str>) -> EngineResult<Arc<T>> + Send + Sync>;

/// Registry mapping names to instance factories.
pub struct Catalog<T: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> Catalog<T> {
    /// Creates an empty catalog; `kind` names the item type in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Registers a factory under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F) -> EngineResult<()>
    where
        F: Fn(Option<&str>) -> EngineResult<Arc<T>> + Send + Sync + 'static,
    {
        let key = name.to_ascii_lowercase();
        if self.entries.contains_key(&key) {
            return Err(EngineError::AlreadyExists(format!("{} '{name}'", self.kind)));
        }
        self.entries.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Creates an instance of `name` with `params`.
    pub fn create(&self, name: &str, params: Option<&str>) -> EngineResult<Arc<T>> {
        let factory = self
            .entries
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| EngineError::not_found(format!("{} '{name}'", self.kind)))?;
        factory(params)
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> fmt::Debug for Catalog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Catalog")
            .field("kind", &self.kind)
            .field("names", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_register_and_create() {
        let mut catalog: Catalog<str> = Catalog::new("greeting");
        catalog
            .register("Hello", |params| {
                Ok(Arc::from(params.unwrap_or("world").to_string().as_str()))
            })
            .unwrap();

        assert!(catalog.contains("hello"));
        assert_eq!(&*catalog.create("HELLO", Some("there")).unwrap(), "there");
        assert_eq!(&*catalog.create("hello", None).unwrap(), "world");

        let err = catalog.create("bye", None).unwrap_err();
        assert!(err.is_not_found());

        let dup = catalog.register("hello", |_| Ok(Arc::from("x")));
        assert!(matches!(dup, Err(EngineError::AlreadyExists(_))));
        assert_eq!(catalog.len(), 1);
    }
}
