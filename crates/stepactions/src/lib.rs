//! Standard step library
//!
//! Built-in handlers for the step types a workflow graph usually contains

mod ai;
mod debug;
mod passthrough;
mod time;
mod variables;

pub use ai::{
    AiGenerateHandler, ContentProvider, ContentProviderConfig, GeneratedContent,
    HttpContentProvider, PlaceholderContentProvider, TokenUsage,
};
pub use debug::DebugLogHandler;
pub use passthrough::{NoopHandler, PassThroughHandler};
pub use time::DelayHandler;
pub use variables::SetVariablesHandler;

use std::sync::Arc;
use stepruntime::HandlerRegistry;

/// Step types that carry no behaviour of their own
pub const PASS_THROUGH_TYPES: &[&str] = &["start", "end", "startEnd", "branch"];

/// Register all built-in handlers, with the content provider taken from the
/// environment
pub fn register_all(registry: &mut HandlerRegistry) {
    register_with_provider(registry, ai::provider_from_env());
}

/// Register all built-in handlers around a given content provider
pub fn register_with_provider(registry: &mut HandlerRegistry, provider: Arc<dyn ContentProvider>) {
    let pass: Arc<dyn stepcore::StepHandler> = Arc::new(PassThroughHandler);
    for step_type in PASS_THROUGH_TYPES {
        registry.register_as(*step_type, pass.clone());
    }
    registry.register(Arc::new(DebugLogHandler));
    registry.register(Arc::new(DelayHandler));
    registry.register(Arc::new(SetVariablesHandler));
    registry.register(Arc::new(AiGenerateHandler::new(provider)));
    registry.set_fallback(Arc::new(NoopHandler));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_builtins_and_fallback() {
        let mut registry = HandlerRegistry::new();
        register_with_provider(&mut registry, Arc::new(PlaceholderContentProvider));

        for step_type in ["start", "end", "startEnd", "branch", "debug.log", "time.delay", "variables.set", "ai.generate"] {
            assert!(registry.contains(step_type), "{} missing", step_type);
        }
        assert!(!registry.contains("aemStep"));
        assert!(registry.resolve("aemStep").is_ok());
    }
}
