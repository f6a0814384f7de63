//! # Stage Definition Registry
//!
//! Maps stage type keys to [`StageDefinitionBuilder`]s. Populated at process
//! start; lookups are read-mostly.

use crate::constants::context_keys;
use crate::models::Stage;
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::stage_definition::{RestrictExecutionDuringTimeWindow, StageDefinitionBuilder};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct StageDefinitionRegistry {
    builders: RwLock<HashMap<String, Arc<dyn StageDefinitionBuilder>>>,
}

impl StageDefinitionRegistry {
    /// Registry holding only the built-in stage types
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(RestrictExecutionDuringTimeWindow));
        registry
    }

    pub fn empty() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builders(builders: Vec<Arc<dyn StageDefinitionBuilder>>) -> Self {
        let registry = Self::new();
        for builder in builders {
            registry.register(builder);
        }
        registry
    }

    /// Register a builder under its declared type, replacing any previous one
    pub fn register(&self, builder: Arc<dyn StageDefinitionBuilder>) {
        let stage_type = builder.stage_type();
        let mut builders = self.builders.write();
        if builders.contains_key(&stage_type) {
            warn!(stage_type = %stage_type, "Stage builder already registered, replacing");
        }
        info!(stage_type = %stage_type, "Registering stage definition builder");
        builders.insert(stage_type, builder);
    }

    /// Builder for `stage`: its declared type first, then `context.alias`
    pub fn resolve(&self, stage: &Stage) -> OrchestrationResult<Arc<dyn StageDefinitionBuilder>> {
        let alias = stage
            .context
            .get(context_keys::ALIAS)
            .and_then(|value| value.as_str());
        self.resolve_type(&stage.stage_type, alias)
    }

    pub fn resolve_type(
        &self,
        stage_type: &str,
        alias: Option<&str>,
    ) -> OrchestrationResult<Arc<dyn StageDefinitionBuilder>> {
        let builders = self.builders.read();
        if let Some(builder) = builders.get(stage_type) {
            return Ok(Arc::clone(builder));
        }
        if let Some(builder) = alias.and_then(|alias| builders.get(alias)) {
            debug!(stage_type = %stage_type, alias = ?alias, "Resolved stage builder by alias");
            return Ok(Arc::clone(builder));
        }
        Err(OrchestrationError::no_builder(stage_type))
    }

    /// Like [`Self::resolve`], for callers where a missing builder is not an error
    pub fn find(&self, stage: &Stage) -> Option<Arc<dyn StageDefinitionBuilder>> {
        self.resolve(stage).ok()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.builders.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for StageDefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StageDefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDefinitionRegistry")
            .field("stage_types", &self.registered_types())
            .finish()
    }
}
