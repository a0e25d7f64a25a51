//! Tracing integration for structured logging and spans.

use crate::signature::Signature;
use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create a span around each loop run.
    pub loop_spans: bool,
    /// Whether to create a span around each pump callback.
    pub pump_spans: bool,
    /// Whether to create a span around each pipe input.
    pub pipe_spans: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            loop_spans: true,
            pump_spans: false, // One per callback, can be expensive
            pipe_spans: false,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with all spans enabled.
    pub fn all() -> Self {
        Self {
            loop_spans: true,
            pump_spans: true,
            pipe_spans: true,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            loop_spans: false,
            pump_spans: false,
            pipe_spans: false,
        }
    }
}

/// Create a span for an event-loop run.
#[inline]
pub fn span_loop(name: &str) -> Span {
    span!(Level::INFO, "loop", name = %name)
}

/// Create a span for one pump callback.
#[inline]
pub fn span_pump(loop_name: &str, kind: &str, index: u32) -> Span {
    span!(
        Level::TRACE,
        "pump",
        loop_name = %loop_name,
        kind = %kind,
        index = index
    )
}

/// Create a span for input on a pipe.
#[inline]
pub fn span_pipe(name: &str, signature: Signature) -> Span {
    span!(
        Level::TRACE,
        "pipe",
        name = %name,
        signature = %signature
    )
}

/// Enter a loop span and return the guard.
///
/// # Example
///
/// ```rust,ignore
/// use pipeflow::observability::instrument_loop;
///
/// let _guard = instrument_loop("main");
/// ```
pub fn instrument_loop(name: &str) -> tracing::span::EnteredSpan {
    span_loop(name).entered()
}

/// Log a buffer crossing an output link.
#[inline]
pub fn trace_buffer_forwarded(from: &str, to: &str, size: usize, sequence: u64) {
    tracing::trace!(
        from = %from,
        to = %to,
        size = size,
        sequence = sequence,
        "buffer forwarded"
    );
}

/// Log an event that reached the end of a probe chain.
#[inline]
pub fn trace_unclaimed(pipe: &str, event: &str) {
    tracing::debug!(
        pipe = %pipe,
        event = %event,
        "event unclaimed by probe chain"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert!(config.loop_spans);
        assert!(!config.pump_spans);
        assert!(!config.pipe_spans);
    }

    #[test]
    fn test_tracing_config_presets() {
        let all = TracingConfig::all();
        assert!(all.pump_spans && all.pipe_spans);

        let none = TracingConfig::none();
        assert!(!none.loop_spans && !none.pump_spans && !none.pipe_spans);
    }

    #[test]
    fn test_spans_without_subscriber() {
        // No subscriber installed: spans are disabled but must be usable.
        let _guard = instrument_loop("test");
        let span = span_pump("test", "timer", 3);
        let _entered = span.enter();
        let _pipe = span_pipe("relay", Signature::new(*b"rlay")).entered();
    }
}
