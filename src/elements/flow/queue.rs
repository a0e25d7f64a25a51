//! Cross-thread queue elements.
//!
//! A [`QueueSink`] on one loop and a [`QueueSrc`] on another share a
//! [`Queue`](crate::queue::Queue). Buffers are the only thing that crosses
//! threads; each pipe stays on the loop that allocated it.
//!
//! ```text
//!   thread A                                     thread B
//!   ... ──> QueueSink ──push──> [ queue ] ──pop──> QueueSrc ──> ...
//!              ▲                    │  │               ▲
//!              └──── writable ──────┘  └── readable ───┘
//! ```

use super::alloc_drain_pump;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::{Control, Pipe, PipeKind, Throttle};
use crate::pump::{Pump, PumpRef};
use crate::queue::SharedQueue;
use crate::signature::Signature;

/// Arguments for allocating a [`QueueSink`].
#[derive(Debug, Clone)]
pub struct QueueSinkArgs {
    /// The queue to push into.
    pub queue: SharedQueue<Buffer>,
}

/// Pushes every input into a shared queue.
///
/// When the queue is full the input is rejected with [`Error::Blocked`]
/// and the upstream pump is stopped until the consumer makes room.
pub struct QueueSink {
    queue: SharedQueue<Buffer>,
    throttle: Throttle,
    pushed: u64,
}

impl PipeKind for QueueSink {
    const SIGNATURE: Signature = Signature::new(*b"qsnk");
    const NAME: &'static str = "queue-sink";
    type Config = ();
    type Args = QueueSinkArgs;

    fn alloc(_config: &(), args: QueueSinkArgs) -> Result<Self> {
        Ok(Self {
            queue: args.queue,
            throttle: Throttle::new(),
            pushed: 0,
        })
    }

    fn init(&mut self, pipe: &Pipe) -> Result<()> {
        let mgr = pipe.pump_manager()?;
        let weak = pipe.downgrade();
        let wake = mgr.alloc_queue_push(&self.queue, move |_, _| {
            let Some(pipe) = weak.upgrade() else {
                return;
            };
            let released = pipe.with_node(|sink: &mut QueueSink, pipe| {
                pipe.set_blocked(false);
                sink.throttle.release()
            });
            if let Err(e) = released.and_then(|r| r) {
                pipe.throw_error(&e);
            }
        })?;
        self.throttle.set_wake(wake);
        Ok(())
    }

    fn input(&mut self, pipe: &Pipe, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()> {
        match self.queue.push(buffer) {
            Ok(()) => {
                self.pushed += 1;
                Ok(())
            }
            Err(buffer) => {
                self.throttle.hold(pump)?;
                pipe.set_blocked(true);
                Err(Error::Blocked(buffer))
            }
        }
    }

    fn free(&mut self, pipe: &Pipe) {
        tracing::debug!(
            pipe = %pipe.name(),
            pushed = self.pushed,
            left = self.queue.len(),
            "queue sink released"
        );
    }
}

/// Arguments for allocating a [`QueueSrc`].
#[derive(Debug, Clone)]
pub struct QueueSrcArgs {
    /// The queue to pop from.
    pub queue: SharedQueue<Buffer>,
}

/// Pops buffers from a shared queue and forwards them downstream.
///
/// Its pump stays a blocker: the loop keeps waiting for the producer
/// until the pipe is released or the loop is asked to quit.
pub struct QueueSrc {
    queue: SharedQueue<Buffer>,
    pump: Option<Pump>,
}

impl PipeKind for QueueSrc {
    const SIGNATURE: Signature = Signature::new(*b"qsrc");
    const NAME: &'static str = "queue-src";
    type Config = ();
    type Args = QueueSrcArgs;

    fn alloc(_config: &(), args: QueueSrcArgs) -> Result<Self> {
        Ok(Self {
            queue: args.queue,
            pump: None,
        })
    }

    fn init(&mut self, pipe: &Pipe) -> Result<()> {
        let pump = alloc_drain_pump(pipe, &self.queue, true)?;
        pump.start()?;
        self.pump = Some(pump);
        Ok(())
    }

    fn input(&mut self, _pipe: &Pipe, buffer: Buffer, _pump: Option<&PumpRef>) -> Result<()> {
        Err(Error::invalid(format!(
            "queue source takes no input (buffer {})",
            buffer.sequence()
        )))
    }

    fn control(&mut self, pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
        match command {
            Control::Block => {
                if let Some(pump) = &self.pump {
                    pump.stop()?;
                }
                pipe.set_blocked(true);
                Ok(())
            }
            Control::Unblock => {
                if let Some(pump) = &self.pump {
                    pump.start()?;
                }
                pipe.set_blocked(false);
                Ok(())
            }
            _ => Err(Error::Unhandled),
        }
    }

    fn free(&mut self, _pipe: &Pipe) {
        self.pump = None;
    }
}
