//! Flow control elements.
//!
//! ## Buffering
//! - [`Relay`]: Bounded FIFO drained by a queue pump on the same loop
//!
//! ## Cross-thread
//! - [`QueueSink`]: Pushes buffers into a shared queue
//! - [`QueueSrc`]: Pops buffers from a shared queue on another loop

mod queue;
mod relay;

pub use queue::{QueueSink, QueueSinkArgs, QueueSrc, QueueSrcArgs};
pub use relay::{Relay, RelayArgs, RelayCommand};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::Pipe;
use crate::pump::{Pump, PumpRef};
use crate::queue::SharedQueue;

/// Offer the oldest queued buffer downstream, popping it once accepted.
///
/// A refused buffer stays at the head of the queue; the downstream node
/// has stopped `pump` and restarts it when it has room. With `linger`
/// unset the pump stops keeping the loop alive once the queue is empty.
fn forward_head(pipe: &Pipe, queue: &SharedQueue<Buffer>, pump: &PumpRef, linger: bool) {
    let Some(buffer) = queue.peek() else {
        return;
    };

    match pipe.output(buffer, Some(pump)) {
        Ok(()) => {
            queue.pop();
        }
        Err(Error::Blocked(_)) => {
            tracing::trace!(pipe = %pipe.name(), "downstream full, keeping head buffer");
        }
        Err(e) => {
            queue.pop();
            pipe.throw_error(&e);
        }
    }

    if !linger && queue.is_empty() {
        pump.set_blocker(false);
    }
}

/// Allocate a pop pump on `queue` that forwards one buffer per firing.
fn alloc_drain_pump(pipe: &Pipe, queue: &SharedQueue<Buffer>, linger: bool) -> Result<Pump> {
    let mgr = pipe.pump_manager()?;
    let weak = pipe.downgrade();
    let source = queue.clone();
    mgr.alloc_queue_pop(queue, move |mgr, id| {
        if let (Some(pipe), Some(pump)) = (weak.upgrade(), mgr.pump_ref(id)) {
            forward_head(&pipe, &source, &pump, linger);
        }
    })
}
