//! Observability: tracing spans and structured events.
//!
//! pipeflow emits spans for:
//! - Event-loop runs (`loop`)
//! - Pump callback dispatch (`pump`)
//! - Pipe input (`pipe`)
//!
//! Which spans are created is controlled per loop by [`TracingConfig`].
//! Events (pump start/stop, queue leftovers, unclaimed probe events) are
//! always emitted through `tracing` and filtered by the subscriber.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pipeflow::observability::instrument_loop;
//!
//! let _guard = instrument_loop("main");
//! // Loop execution is automatically traced
//! ```

mod tracing_support;

pub use tracing_support::{
    TracingConfig, instrument_loop, span_loop, span_pipe, span_pump, trace_buffer_forwarded,
    trace_unclaimed,
};
