//! Registry of workflow definitions
//!
//! Definitions are looked up by the name recorded on each instance, so an
//! instance created before a restart resolves to the same definition after it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::workflow::WorkflowDefinition;

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No definition registered under this name
    #[error("unknown workflow definition: {0}")]
    UnknownDefinition(String),

    /// A definition with this name is already registered
    #[error("workflow definition already registered: {0}")]
    DuplicateDefinition(String),

    /// An activity with this name is already registered
    #[error("activity already registered: {0}")]
    DuplicateActivity(String),
}

/// Name → definition map shared by the engine
#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl DefinitionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its own name
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), RegistryError> {
        let name = definition.name().to_string();
        if self.definitions.contains_key(&name) {
            return Err(RegistryError::DuplicateDefinition(name));
        }
        self.definitions.insert(name, Arc::new(definition));
        Ok(())
    }

    /// Look up a definition
    pub fn get(&self, name: &str) -> Result<Arc<WorkflowDefinition>, RegistryError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDefinition(name.to_string()))
    }

    /// Check if a definition is registered
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Get the number of registered definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Get all registered definition names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ActivityStep;

    fn definition(name: &str) -> WorkflowDefinition {
        WorkflowDefinition::builder(name)
            .step(ActivityStep::new("only", "noop"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = DefinitionRegistry::new();
        registry.register(definition("process_order")).unwrap();

        assert!(registry.contains("process_order"));
        assert_eq!(registry.get("process_order").unwrap().name(), "process_order");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["process_order"]);
    }

    #[test]
    fn test_unknown_definition() {
        let registry = DefinitionRegistry::new();
        assert_eq!(
            registry.get("missing").unwrap_err(),
            RegistryError::UnknownDefinition("missing".to_string())
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_definition() {
        let mut registry = DefinitionRegistry::new();
        registry.register(definition("a")).unwrap();

        let result = registry.register(definition("a"));
        assert_eq!(result.unwrap_err(), RegistryError::DuplicateDefinition("a".to_string()));
        assert_eq!(registry.len(), 1);
    }
}
