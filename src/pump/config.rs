//! Event-loop configuration.

use super::BackendKind;
use crate::observability::TracingConfig;

/// Environment variable selecting the loop backend (`poll` or `epoll`).
pub const BACKEND_ENV: &str = "PIPEFLOW_BACKEND";

/// Configuration for a [`PumpManager`](super::PumpManager).
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name for debugging/logging purposes.
    pub name: String,

    /// Backend driving descriptor readiness.
    pub backend: BackendKind,

    /// Maximum readiness events collected per wait (epoll only).
    ///
    /// Default is 64.
    pub max_events: usize,

    /// Which tracing spans the loop creates.
    pub tracing: TracingConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            name: String::from("loop"),
            backend: BackendKind::default(),
            max_events: 64,
            tracing: TracingConfig::default(),
        }
    }
}

impl LoopConfig {
    /// Create a config with the backend taken from [`BACKEND_ENV`].
    ///
    /// Unknown values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            match BackendKind::from_name(&value) {
                Some(kind) => config.backend = kind,
                None => tracing::warn!("{}: unknown backend '{}', using default", BACKEND_ENV, value),
            }
        }
        config
    }

    /// Set the loop name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the tracing configuration.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.name, "loop");
        assert_eq!(config.backend, BackendKind::Poll);
        assert_eq!(config.max_events, 64);
    }

    #[test]
    fn test_loop_config_builder() {
        let config = LoopConfig::default()
            .with_name("worker")
            .with_backend(BackendKind::Epoll)
            .with_tracing(TracingConfig::none());
        assert_eq!(config.name, "worker");
        assert_eq!(config.backend, BackendKind::Epoll);
        assert!(!config.tracing.loop_spans);
    }
}
