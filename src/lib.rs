//! # pipeflow
//!
//! A single-threaded, event-loop driven dataflow runtime.
//!
//! Processing nodes ([`pipe::Pipe`]) are wired output-to-input and driven by
//! pumps ([`pump::Pump`]) registered with a per-thread event loop
//! ([`pump::PumpManager`]). Pipes report lifecycle transitions, errors and
//! requests upward through chains of event handlers ([`probe::Probe`]).
//! Threads exchange buffers through lock-free bounded queues
//! ([`queue::Queue`]) whose readiness wakes the consuming loop.
//!
//! ## Features
//!
//! - **Bounded queues**: SPSC/MPSC/SPMC/MPMC ring with pollable readiness
//! - **Pumps**: descriptor, timer, signal, idle and queue watchers with
//!   blocker semantics deciding when a loop has run dry
//! - **Probes**: chain-of-responsibility event handling with claim/forward
//! - **Backpressure**: bounded nodes stop the upstream pump until room frees
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeflow::prelude::*;
//!
//! let mgr = PumpManager::new(LoopConfig::from_env())?;
//! let probe = Probe::new(PumpManagerProbe::new(mgr.clone()), None);
//!
//! let sink = Manager::<AppSink>::new(()).alloc(Some(probe.clone()), AppSinkArgs::default())?;
//! let relay = Manager::<Relay>::new(()).alloc(Some(probe.clone()), RelayArgs { bound: 2 })?;
//! let src = Manager::<AppSrc>::new(()).alloc(Some(probe), AppSrcArgs::default())?;
//! relay.set_output(Some(sink.clone()));
//! src.set_output(Some(relay));
//!
//! AppSrc::push(&src, Buffer::from_static(b"hello", 0))?;
//! AppSrc::end_of_stream(&src)?;
//! mgr.run(None)?;
//! assert_eq!(AppSink::take(&sink)?.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod elements;
pub mod error;
pub mod observability;
pub mod pipe;
pub mod probe;
pub mod pump;
pub mod queue;
pub mod signature;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::elements::{
        AppSink, AppSinkArgs, AppSrc, AppSrcArgs, NullSink, NullSinkArgs, QueueSink,
        QueueSinkArgs, QueueSrc, QueueSrcArgs, Relay, RelayArgs, TimerSrc, TimerSrcArgs,
    };
    pub use crate::error::{Error, Result};
    pub use crate::pipe::{Control, Manager, Pipe, PipeKind};
    pub use crate::probe::{Event, LogProbe, Outcome, Probe, PumpManagerProbe};
    pub use crate::pump::{LoopConfig, Pump, PumpManager, PumpRef, RunStatus};
    pub use crate::queue::{Queue, QueueConfig, SharedQueue, shared_queue};
    pub use crate::signature::Signature;
}

pub use buffer::Buffer;
pub use error::{Error, Result};
pub use signature::Signature;
