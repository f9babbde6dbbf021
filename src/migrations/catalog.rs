//! Migration catalog: class name to constructor.
//!
//! Migrations written in Rust are compiled into the embedding application,
//! so nothing can be discovered by reflection. The application registers a
//! factory per migration class at startup and the registry resolves class
//! names (from directory scans or configuration files) through it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::errors::{MigrationError, MigrationResult};
use super::migration::Migration;

/// Builds a fresh migration body.
pub type MigrationFactory = Arc<dyn Fn() -> Box<dyn Migration> + Send + Sync>;

/// Wrap a closure as a [`MigrationFactory`].
pub fn factory<F, M>(build: F) -> MigrationFactory
where
    F: Fn() -> M + Send + Sync + 'static,
    M: Migration + 'static,
{
    Arc::new(move || Box::new(build()) as Box<dyn Migration>)
}

/// Named migration factories.
#[derive(Clone, Default)]
pub struct MigrationCatalog {
    factories: BTreeMap<String, MigrationFactory>,
}

impl MigrationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a fully qualified class name.
    pub fn register(&mut self, class: impl Into<String>, factory: MigrationFactory) -> &mut Self {
        self.factories.insert(class.into(), factory);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, class: impl Into<String>, factory: MigrationFactory) -> Self {
        self.register(class, factory);
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Look up the factory for `class`.
    pub fn resolve(&self, class: &str) -> MigrationResult<MigrationFactory> {
        self.factories
            .get(class)
            .cloned()
            .ok_or_else(|| MigrationError::UnknownMigrationClass(class.to_string()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for MigrationCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationCatalog")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::migration::MigrationContext;

    struct Noop;

    impl Migration for Noop {
        fn description(&self) -> String {
            "noop".to_string()
        }

        fn up(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            Ok(())
        }

        fn down(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resolve_registered_class() {
        let catalog = MigrationCatalog::new().with("app::Version20140101000000", factory(|| Noop));

        assert!(catalog.contains("app::Version20140101000000"));
        let build = catalog.resolve("app::Version20140101000000").unwrap();
        assert_eq!(build().description(), "noop");
    }

    #[test]
    fn test_resolve_unknown_class() {
        let catalog = MigrationCatalog::new();
        let result = catalog.resolve("app::Missing");
        assert!(matches!(result, Err(MigrationError::UnknownMigrationClass(c)) if c == "app::Missing"));
    }
}
