//! Pumps: registered interests in an event loop.
//!
//! A pump ties one readiness source to a callback. Sources are:
//!
//! - **Descriptors**: readable or writable file descriptors
//! - **Timers**: one-shot or repeating deadlines
//! - **Signals**: POSIX signals, delivered through a self-pipe
//! - **Idle**: deferred work run when nothing else is pending
//! - **Queues**: the non-empty / non-full transitions of a
//!   [`Queue`](crate::queue::Queue)
//!
//! # Lifecycle
//!
//! ```text
//! alloc_*() ──> allocated ──start()──> started ──stop()──> stopped ──┐
//!                   │                     ▲                           │
//!                   │                     └─────────start()───────────┘
//!                   └────────────── drop / free() ──> released
//! ```
//!
//! A [`PumpManager`] owns the backend loop and the pump arena. Pumps are
//! addressed by generational [`PumpId`]s, so a stale handle is harmless:
//! operations on a freed pump are no-ops.
//!
//! # Blockers
//!
//! [`PumpManager::run`] returns once no started pump is a *blocker*. Pumps
//! are blockers by default; background work that should not keep the loop
//! alive clears the flag with [`Pump::set_blocker`].
//!
//! # Example
//!
//! ```rust
//! use pipeflow::pump::{LoopConfig, PumpManager, RunStatus};
//! use std::time::Duration;
//!
//! let mgr = PumpManager::new(LoopConfig::default()).unwrap();
//! let timer = mgr
//!     .alloc_timer(Duration::from_millis(1), None, |_, _| println!("tick"))
//!     .unwrap();
//! timer.start().unwrap();
//!
//! // One-shot timer fires, stops, and nothing keeps the loop alive.
//! assert_eq!(mgr.run(None).unwrap(), RunStatus::Drained);
//! ```

mod backend;
mod config;
mod handle;
mod manager;
mod signal;

pub use backend::{Backend, BackendKind, Interest, PollBackend, Token};
#[cfg(target_os = "linux")]
pub use backend::EpollBackend;
pub use config::{BACKEND_ENV, LoopConfig};
pub use handle::{Pump, PumpRef};
pub use manager::{LoopStats, PumpManager, QuitHandle, RunStatus};

use std::fmt;

/// Generational handle to a pump slot in a [`PumpManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PumpId {
    index: u32,
    generation: u32,
}

impl PumpId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index within the manager.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this pump was allocated.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn token(&self) -> Token {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub(crate) fn from_token(token: Token) -> Self {
        Self {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

/// The readiness source a pump watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpKind {
    /// Descriptor became readable.
    FdRead,
    /// Descriptor became writable.
    FdWrite,
    /// Deadline reached.
    Timer,
    /// Signal received.
    Signal,
    /// Nothing else pending this iteration.
    Idle,
    /// Queue holds at least one value.
    QueuePop,
    /// Queue has room for one value.
    QueuePush,
}

impl PumpKind {
    /// Get a human-readable name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            PumpKind::FdRead => "fd-read",
            PumpKind::FdWrite => "fd-write",
            PumpKind::Timer => "timer",
            PumpKind::Signal => "signal",
            PumpKind::Idle => "idle",
            PumpKind::QueuePop => "queue-pop",
            PumpKind::QueuePush => "queue-push",
        }
    }
}

impl fmt::Display for PumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callback invoked when a pump's source is ready.
///
/// Receives the manager running the loop and the id of the firing pump, so
/// a callback may stop itself, start or allocate other pumps, or request
/// quit. Context travels in the closure's captures; capture a
/// [`PumpRef`] rather than a [`PumpManager`] to avoid reference cycles.
pub type PumpCallback = Box<dyn FnMut(&PumpManager, PumpId)>;
