//! Relay element: a bounded FIFO between two pipes on one loop.

use super::alloc_drain_pump;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::{Control, LOCAL_BASE, Pipe, PipeKind, Throttle};
use crate::pump::{Pump, PumpRef};
use crate::queue::{Queue, QueueConfig, SharedQueue};
use crate::signature::Signature;
use std::sync::Arc;

/// Arguments for allocating a [`Relay`].
#[derive(Debug, Clone, Copy)]
pub struct RelayArgs {
    /// Maximum number of buffers held.
    pub bound: usize,
}

impl Default for RelayArgs {
    fn default() -> Self {
        Self { bound: 8 }
    }
}

/// Commands understood by a relay, on top of the standard ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    /// Read the number of resident buffers (`usize`).
    GetResident,
    /// Read the bound (`usize`).
    GetBound,
}

impl RelayCommand {
    /// Opcode of this command.
    pub fn opcode(self) -> u32 {
        match self {
            RelayCommand::GetResident => LOCAL_BASE,
            RelayCommand::GetBound => LOCAL_BASE + 1,
        }
    }

    /// Decode an opcode.
    pub fn from_opcode(opcode: u32) -> Option<Self> {
        match opcode.checked_sub(LOCAL_BASE)? {
            0 => Some(RelayCommand::GetResident),
            1 => Some(RelayCommand::GetBound),
            _ => None,
        }
    }
}

/// Holds up to `bound` buffers and forwards them downstream from a queue
/// pump, one per loop iteration.
///
/// When full, the relay rejects input with [`Error::Blocked`] and stops the
/// upstream pump that delivered it; the pump is restarted as soon as a
/// buffer leaves. When downstream refuses a buffer, the relay keeps it at
/// the head and waits for downstream to restart its pump.
///
/// The relay's pump keeps the loop alive only while buffers are resident.
///
/// # Example
///
/// ```rust,ignore
/// use pipeflow::elements::{Relay, RelayArgs};
/// use pipeflow::pipe::Manager;
///
/// let relays = Manager::<Relay>::new(());
/// let relay = relays.alloc(Some(probe), RelayArgs { bound: 2 })?;
/// relay.set_output(Some(sink));
/// ```
pub struct Relay {
    queue: SharedQueue<Buffer>,
    pump: Option<Pump>,
    throttle: Throttle,
    blocked_by_control: bool,
}

impl Relay {
    /// Number of buffers resident in a relay pipe.
    pub fn resident(pipe: &Pipe) -> Result<usize> {
        Self::query(pipe, RelayCommand::GetResident)
    }

    /// Bound of a relay pipe.
    pub fn bound(pipe: &Pipe) -> Result<usize> {
        Self::query(pipe, RelayCommand::GetBound)
    }

    fn query(pipe: &Pipe, command: RelayCommand) -> Result<usize> {
        let mut value = 0usize;
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(command.opcode(), &mut value),
        )?;
        Ok(value)
    }

    fn on_room(&mut self, pipe: &Pipe) {
        match self.throttle.release() {
            Ok(n) => tracing::trace!(pipe = %pipe.name(), released = n, "relay has room"),
            Err(e) => {
                pipe.throw_error(&e);
            }
        }
        if !self.blocked_by_control {
            pipe.set_blocked(self.queue.is_full());
        }
    }
}

impl PipeKind for Relay {
    const SIGNATURE: Signature = Signature::new(*b"rely");
    const NAME: &'static str = "relay";
    type Config = ();
    type Args = RelayArgs;

    fn alloc(_config: &(), args: RelayArgs) -> Result<Self> {
        let queue = Queue::new(QueueConfig::with_capacity(args.bound).with_name("relay"))?;
        Ok(Self {
            queue: Arc::new(queue),
            pump: None,
            throttle: Throttle::new(),
            blocked_by_control: false,
        })
    }

    fn init(&mut self, pipe: &Pipe) -> Result<()> {
        let mgr = pipe.pump_manager()?;

        let pump = alloc_drain_pump(pipe, &self.queue, false)?;
        pump.set_blocker(false);
        pump.start()?;
        self.pump = Some(pump);

        let weak = pipe.downgrade();
        let wake = mgr.alloc_queue_push(&self.queue, move |_, _| {
            if let Some(pipe) = weak.upgrade() {
                if let Err(e) = pipe.with_node(|relay: &mut Relay, pipe| relay.on_room(pipe)) {
                    pipe.throw_error(&e);
                }
            }
        })?;
        self.throttle.set_wake(wake);
        Ok(())
    }

    fn input(&mut self, pipe: &Pipe, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()> {
        match self.queue.push(buffer) {
            Ok(()) => {
                if let Some(own) = &self.pump {
                    own.set_blocker(true);
                }
                if self.queue.is_full() {
                    pipe.set_blocked(true);
                    // Wake once a buffer leaves, to clear the blocked state.
                    self.throttle.hold(None)?;
                }
                Ok(())
            }
            Err(buffer) => {
                tracing::debug!(
                    pipe = %pipe.name(),
                    resident = self.queue.len(),
                    "relay full, holding upstream"
                );
                self.throttle.hold(pump)?;
                pipe.set_blocked(true);
                Err(Error::Blocked(buffer))
            }
        }
    }

    fn control(&mut self, pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
        match command {
            Control::Block => {
                if let Some(pump) = &self.pump {
                    pump.stop()?;
                }
                self.blocked_by_control = true;
                pipe.set_blocked(true);
                Ok(())
            }
            Control::Unblock => {
                self.blocked_by_control = false;
                if let Some(pump) = &self.pump {
                    pump.start()?;
                }
                pipe.set_blocked(self.queue.is_full());
                Ok(())
            }
            Control::Local { .. } => match RelayCommand::from_opcode(command.opcode()) {
                Some(RelayCommand::GetResident) => {
                    *command.local_args::<usize>()? = self.queue.len();
                    Ok(())
                }
                Some(RelayCommand::GetBound) => {
                    *command.local_args::<usize>()? = self.queue.capacity();
                    Ok(())
                }
                None => Err(Error::Unhandled),
            },
            _ => Err(Error::Unhandled),
        }
    }

    fn free(&mut self, pipe: &Pipe) {
        self.pump = None;
        let dropped = self.queue.drain();
        if !dropped.is_empty() {
            tracing::debug!(pipe = %pipe.name(), dropped = dropped.len(), "relay released with buffers");
        }
    }
}
