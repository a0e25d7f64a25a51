//! Built-in pipe kinds.
//!
//! Generic nodes for wiring, testing and benchmarking pipelines:
//!
//! ## Sources
//! - [`AppSrc`]: Injects buffers from application code
//! - [`TimerSrc`]: Emits pattern buffers from a timer pump
//! - [`QueueSrc`]: Pops buffers pushed by another thread
//!
//! ## Sinks
//! - [`AppSink`]: Collects buffers for application code
//! - [`NullSink`]: Counts and discards buffers
//! - [`QueueSink`]: Pushes buffers for another thread
//!
//! ## Flow
//! - [`Relay`]: Bounded FIFO with upstream backpressure

mod app;
mod flow;
mod testing;

pub use app::{
    AppSink, AppSinkArgs, AppSinkCommand, AppSinkStats, AppSrc, AppSrcArgs, AppSrcCommand,
    AppSrcStats,
};
pub use flow::{QueueSink, QueueSinkArgs, QueueSrc, QueueSrcArgs, Relay, RelayArgs, RelayCommand};
pub use testing::{
    NullSink, NullSinkArgs, NullSinkCommand, TIMER_SRC_PRODUCED, TestPattern, TimerSrc,
    TimerSrcArgs,
};
