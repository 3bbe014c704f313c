use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Cap on runs that are not yet completed, failed or cancelled
    pub max_active_executions: usize,
    pub event_buffer_size: usize,
    /// Retention window used by `cleanup_expired`
    pub cleanup_after_days: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_active_executions: 50,
            event_buffer_size: 1000,
            cleanup_after_days: 30,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `STEPFLOW_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay("STEPFLOW_MAX_ACTIVE_EXECUTIONS", &mut config.max_active_executions);
        overlay("STEPFLOW_EVENT_BUFFER_SIZE", &mut config.event_buffer_size);
        overlay("STEPFLOW_CLEANUP_AFTER_DAYS", &mut config.cleanup_after_days);
        config
    }

    pub fn with_max_active_executions(mut self, max: usize) -> Self {
        self.max_active_executions = max;
        self
    }
}

fn overlay<T: FromStr>(key: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!("Ignoring unparsable {}={:?}", key, raw),
    }
}
