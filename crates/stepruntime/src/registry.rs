use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{StepError, StepHandler};

/// Registry of step handlers keyed by step type
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    fallback: Option<Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    /// Register a handler under its own step type
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        let step_type = handler.step_type().to_string();
        self.register_as(step_type, handler);
    }

    /// Register a handler under an extra step type name
    pub fn register_as(&mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let step_type = step_type.into();
        tracing::info!("Registering step type: {}", step_type);
        self.handlers.insert(step_type, handler);
    }

    /// Handler used for step types nobody registered
    pub fn set_fallback(&mut self, handler: Arc<dyn StepHandler>) {
        self.fallback = Some(handler);
    }

    pub fn resolve(&self, step_type: &str) -> Result<Arc<dyn StepHandler>, StepError> {
        self.handlers
            .get(step_type)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| StepError::UnknownStepType(step_type.to_string()))
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Registered step types, sorted
    pub fn list_step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn describe(&self, step_type: &str) -> Option<String> {
        self.handlers
            .get(step_type)
            .map(|h| h.description().to_string())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
