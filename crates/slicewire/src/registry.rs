//! Process-wide type-id to constructor registry.
//!
//! Registration happens once at startup; lookups happen from every stream on
//! every thread, so the tables sit behind a read-mostly lock and are shared
//! through an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::{UserException, ValuePtr};

/// Builds an instance for the given type-id, or declines with `None`.
pub type ValueFactory = Arc<dyn Fn(&str) -> Option<ValuePtr> + Send + Sync>;

/// Builds an empty exception ready to be read.
pub type ExceptionFactory = Arc<dyn Fn() -> Box<dyn UserException> + Send + Sync>;

/// Maps a compact numeric type-id to its string form.
pub type CompactIdResolver = Arc<dyn Fn(i32) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct Tables {
    values: HashMap<String, ValueFactory>,
    default_value: Option<ValueFactory>,
    compact: HashMap<i32, ValueFactory>,
    exceptions: HashMap<String, ExceptionFactory>,
    compact_resolver: Option<CompactIdResolver>,
}

#[derive(Default)]
pub struct FactoryRegistry {
    tables: RwLock<Tables>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the registry ready to share.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn register_value<F>(&self, type_id: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Option<ValuePtr> + Send + Sync + 'static,
    {
        self.tables
            .write()
            .values
            .insert(type_id.into(), Arc::new(factory));
    }

    /// Installs the wildcard factory consulted when no type-specific one
    /// matches.
    pub fn register_default<F>(&self, factory: F)
    where
        F: Fn(&str) -> Option<ValuePtr> + Send + Sync + 'static,
    {
        self.tables.write().default_value = Some(Arc::new(factory));
    }

    pub fn register_compact<F>(&self, compact_id: i32, factory: F)
    where
        F: Fn(&str) -> Option<ValuePtr> + Send + Sync + 'static,
    {
        self.tables
            .write()
            .compact
            .insert(compact_id, Arc::new(factory));
    }

    pub fn register_exception<F>(&self, type_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn UserException> + Send + Sync + 'static,
    {
        self.tables
            .write()
            .exceptions
            .insert(type_id.into(), Arc::new(factory));
    }

    pub fn set_compact_id_resolver<F>(&self, resolver: F)
    where
        F: Fn(i32) -> Option<String> + Send + Sync + 'static,
    {
        self.tables.write().compact_resolver = Some(Arc::new(resolver));
    }

    pub fn lookup(&self, type_id: &str) -> Option<ValueFactory> {
        self.tables.read().values.get(type_id).cloned()
    }

    pub fn lookup_default(&self) -> Option<ValueFactory> {
        self.tables.read().default_value.clone()
    }

    pub fn lookup_compact(&self, compact_id: i32) -> Option<ValueFactory> {
        self.tables.read().compact.get(&compact_id).cloned()
    }

    pub fn lookup_exception(&self, type_id: &str) -> Option<ExceptionFactory> {
        self.tables.read().exceptions.get(type_id).cloned()
    }

    /// Runs the application resolver, if one is installed.
    pub fn resolve_compact_id(&self, compact_id: i32) -> Option<String> {
        let resolver = self.tables.read().compact_resolver.clone()?;
        resolver(compact_id).filter(|id| !id.is_empty())
    }

    /// Instantiates `type_id` through its own factory, falling back to the
    /// default factory. The lock is released before any factory runs.
    pub fn create_value(&self, type_id: &str) -> Option<ValuePtr> {
        if let Some(factory) = self.lookup(type_id) {
            if let Some(v) = factory(type_id) {
                return Some(v);
            }
        }
        self.lookup_default().and_then(|factory| factory(type_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{value_ptr, UnknownSlicedValue};

    #[test]
    fn default_factory_is_a_fallback() {
        let registry = FactoryRegistry::new();
        registry.register_value("::A", |id| Some(value_ptr(UnknownSlicedValue::new(id))));
        assert!(registry.create_value("::A").is_some());
        assert!(registry.create_value("::B").is_none());

        registry.register_default(|id| {
            (id == "::B").then(|| value_ptr(UnknownSlicedValue::new(id)))
        });
        assert!(registry.create_value("::B").is_some());
        assert!(registry.create_value("::C").is_none());
    }

    #[test]
    fn compact_resolver_ignores_empty_answers() {
        let registry = FactoryRegistry::new();
        assert_eq!(registry.resolve_compact_id(3), None);
        registry.set_compact_id_resolver(|id| match id {
            3 => Some("::Three".to_owned()),
            4 => Some(String::new()),
            _ => None,
        });
        assert_eq!(registry.resolve_compact_id(3).as_deref(), Some("::Three"));
        assert_eq!(registry.resolve_compact_id(4), None);
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        let registry = FactoryRegistry::shared();
        registry.register_value("::A", |id| Some(value_ptr(UnknownSlicedValue::new(id))));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.lookup("::A").is_some())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
