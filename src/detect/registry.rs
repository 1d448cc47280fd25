use std::collections::HashMap;
use std::sync::Arc;

use crate::detect::adapter::{InferenceAdapter, ModelSpec};
use crate::detect::backend::InferenceBackend;
use crate::error::{BridgeError, Result};

/// Builds a fresh backend instance for one adapter.
pub type BackendFactory =
    Arc<dyn Fn(&ModelSpec) -> anyhow::Result<Box<dyn InferenceBackend>> + Send + Sync>;

/// Named backend factories.
///
/// Every adapter gets its own backend instance, so loaded models are never
/// shared between workers.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the backends compiled into this build.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("motion", |_spec: &ModelSpec| {
            Ok(Box::new(super::backends::MotionBackend::new()) as Box<dyn InferenceBackend>)
        });
        registry.register("stub", |_spec: &ModelSpec| {
            Ok(Box::new(super::backends::StubBackend::new()) as Box<dyn InferenceBackend>)
        });
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |spec: &ModelSpec| {
            Ok(Box::new(super::backends::TractBackend::new(&spec.network)?)
                as Box<dyn InferenceBackend>)
        });
        registry
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ModelSpec) -> anyhow::Result<Box<dyn InferenceBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(BridgeError::config(format!(
                "backend '{}' not registered",
                name
            )));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the backend named by `spec`, or the default when unnamed.
    pub fn create(&self, spec: &ModelSpec) -> Result<Box<dyn InferenceBackend>> {
        let name = if spec.backend.is_empty() {
            self.default_name
                .as_deref()
                .ok_or_else(|| BridgeError::config("no inference backends registered"))?
        } else {
            spec.backend.as_str()
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            BridgeError::config(format!(
                "unknown inference backend '{}' (available: {})",
                name,
                self.list().join(", ")
            ))
        })?;
        factory(spec).map_err(|err| BridgeError::inference(&spec.network, err))
    }

    /// Build a ready adapter for `spec`.
    pub fn build_adapter(&self, spec: &ModelSpec) -> Result<InferenceAdapter> {
        spec.validate()?;
        let backend = self.create(spec)?;
        InferenceAdapter::new(spec, backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
