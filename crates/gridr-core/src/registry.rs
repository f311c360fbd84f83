//! Registry mapping backend type names to adapter factories.
//!
//! Configuration files name resources by *type* (`type: slurm`); the
//! [`LrmsRegistry`] turns each [`ResourceConfig`] into a live backend via
//! the factory registered under that type. Adapter crates register their
//! factories here, so the driver layer never links against a specific
//! scheduler.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::ResourceConfig;
use crate::error::{LrmsError, LrmsResult};
use crate::lrms::Lrms;

/// Factory function building a backend from its resource configuration.
type LrmsFactory = Box<dyn Fn(&ResourceConfig) -> LrmsResult<Arc<dyn Lrms>> + Send + Sync>;

/// Central registry of backend types.
pub struct LrmsRegistry {
    factories: FxHashMap<String, LrmsFactory>,
}

impl LrmsRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Register a factory for a backend type.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn(&ResourceConfig) -> LrmsResult<Arc<dyn Lrms>> + Send + Sync + 'static,
    ) {
        let kind = kind.into();
        debug!("Registering backend type: {}", kind);
        self.factories.insert(kind, Box::new(factory));
    }

    /// Build a backend for `config`, dispatching on its `type` field.
    pub fn create(&self, config: &ResourceConfig) -> LrmsResult<Arc<dyn Lrms>> {
        match self.factories.get(&config.kind) {
            Some(factory) => factory(config),
            None => Err(LrmsError::Configuration(format!(
                "no backend registered for type '{}' (resource '{}')",
                config.kind, config.name
            ))),
        }
    }

    /// List all registered backend types.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Check whether a backend type is registered.
    pub fn has(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

impl Default for LrmsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
