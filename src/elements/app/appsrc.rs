//! AppSrc element for injecting buffers from application code.
//!
//! The application pushes buffers into the node; an idle pump forwards
//! them downstream whenever the loop has nothing else to do.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::{Control, LOCAL_BASE, Pipe, PipeKind};
use crate::probe::Event;
use crate::pump::{Pump, PumpRef};
use crate::signature::Signature;
use std::collections::VecDeque;

/// Arguments for allocating an [`AppSrc`].
#[derive(Debug, Clone, Copy)]
pub struct AppSrcArgs {
    /// Maximum number of buffers waiting to be forwarded.
    pub bound: usize,
    /// Maximum number of buffers forwarded per pump firing.
    pub burst: usize,
}

impl Default for AppSrcArgs {
    fn default() -> Self {
        Self {
            bound: 64,
            burst: 16,
        }
    }
}

/// Statistics for an [`AppSrc`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppSrcStats {
    /// Buffers waiting to be forwarded.
    pub pending: usize,
    /// Total buffers pushed by the application.
    pub total_pushed: u64,
    /// Total buffers accepted downstream.
    pub total_forwarded: u64,
    /// Times downstream pushed back.
    pub total_blocked: u64,
    /// Whether end of stream was signalled.
    pub eos: bool,
}

/// Commands understood by an app source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSrcCommand {
    /// Queue a buffer (`Option<Buffer>`, taken).
    Push,
    /// Signal end of stream (`()`).
    EndOfStream,
    /// Read the statistics (`AppSrcStats`).
    Stats,
}

impl AppSrcCommand {
    /// Opcode of this command.
    pub fn opcode(self) -> u32 {
        match self {
            AppSrcCommand::Push => LOCAL_BASE,
            AppSrcCommand::EndOfStream => LOCAL_BASE + 1,
            AppSrcCommand::Stats => LOCAL_BASE + 2,
        }
    }

    /// Decode an opcode.
    pub fn from_opcode(opcode: u32) -> Option<Self> {
        match opcode.checked_sub(LOCAL_BASE)? {
            0 => Some(AppSrcCommand::Push),
            1 => Some(AppSrcCommand::EndOfStream),
            2 => Some(AppSrcCommand::Stats),
            _ => None,
        }
    }
}

/// A source fed by the application.
///
/// Once end of stream is signalled and every pending buffer has been
/// forwarded, the source throws [`Event::SourceEnd`] and its pump stops
/// keeping the loop alive.
///
/// # Example
///
/// ```rust,ignore
/// use pipeflow::elements::{AppSrc, AppSrcArgs};
///
/// let src = Manager::<AppSrc>::new(()).alloc(Some(probe), AppSrcArgs::default())?;
/// src.set_output(Some(sink));
///
/// AppSrc::push(&src, Buffer::from_static(b"hello", 0))?;
/// AppSrc::end_of_stream(&src)?;
/// mgr.run(None)?;
/// ```
pub struct AppSrc {
    pending: VecDeque<Buffer>,
    bound: usize,
    burst: usize,
    pump: Option<Pump>,
    stats: AppSrcStats,
    ended: bool,
}

impl AppSrc {
    /// Queue `buffer` on an app source pipe.
    ///
    /// Fails with [`Error::Blocked`] (handing the buffer back) when the
    /// source already holds its bound, and with [`Error::Invalid`] after
    /// end of stream.
    pub fn push(pipe: &Pipe, buffer: Buffer) -> Result<()> {
        let mut slot = Some(buffer);
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(AppSrcCommand::Push.opcode(), &mut slot),
        )
    }

    /// Signal that no more buffers will be pushed.
    pub fn end_of_stream(pipe: &Pipe) -> Result<()> {
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(AppSrcCommand::EndOfStream.opcode(), &mut ()),
        )
    }

    /// Statistics of an app source pipe.
    pub fn stats(pipe: &Pipe) -> Result<AppSrcStats> {
        let mut stats = AppSrcStats::default();
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(AppSrcCommand::Stats.opcode(), &mut stats),
        )?;
        Ok(stats)
    }

    fn enqueue(&mut self, buffer: Buffer) -> Result<()> {
        if self.stats.eos {
            return Err(Error::invalid(format!(
                "buffer {} pushed after end of stream",
                buffer.sequence()
            )));
        }
        if self.pending.len() >= self.bound {
            return Err(Error::Blocked(buffer));
        }
        self.pending.push_back(buffer);
        self.stats.total_pushed += 1;
        Ok(())
    }

    /// Start the pump unless the pipe was blocked by control.
    fn wake(&self, pipe: &Pipe) -> Result<()> {
        match &self.pump {
            Some(pump) if !pipe.is_blocked() => pump.start(),
            _ => Ok(()),
        }
    }

    /// Pump body: forward up to `burst` buffers.
    ///
    /// The node is not borrowed while a buffer travels downstream, so
    /// downstream probes may push more buffers into this source.
    fn forward(pipe: &Pipe, pump: &PumpRef) -> Result<()> {
        let burst = pipe.with_node(|src: &mut AppSrc, _| src.burst)?;

        for _ in 0..burst {
            let Some(buffer) = pipe.with_node(|src: &mut AppSrc, _| src.pending.pop_front())? else {
                break;
            };
            match pipe.output(buffer, Some(pump)) {
                Ok(()) => {
                    pipe.with_node(|src: &mut AppSrc, _| src.stats.total_forwarded += 1)?;
                }
                Err(Error::Blocked(buffer)) => {
                    pipe.with_node(|src: &mut AppSrc, _| {
                        src.pending.push_front(buffer);
                        src.stats.total_blocked += 1;
                    })?;
                    return Ok(());
                }
                Err(e) => {
                    pipe.throw_error(&e);
                }
            }
        }

        let finished = pipe.with_node(|src: &mut AppSrc, _| {
            if !src.pending.is_empty() {
                return Ok(false);
            }
            pump.stop()?;
            Ok::<_, Error>(src.stats.eos && !std::mem::replace(&mut src.ended, true))
        })??;
        if finished {
            tracing::debug!(pipe = %pipe.name(), "app source reached end of stream");
            pipe.throw(&mut Event::SourceEnd);
        }
        Ok(())
    }
}

impl PipeKind for AppSrc {
    const SIGNATURE: Signature = Signature::new(*b"asrc");
    const NAME: &'static str = "appsrc";
    type Config = ();
    type Args = AppSrcArgs;

    fn alloc(_config: &(), args: AppSrcArgs) -> Result<Self> {
        if args.bound == 0 || args.burst == 0 {
            return Err(Error::invalid("app source bound and burst must be at least 1"));
        }
        Ok(Self {
            pending: VecDeque::with_capacity(args.bound.min(256)),
            bound: args.bound,
            burst: args.burst,
            pump: None,
            stats: AppSrcStats::default(),
            ended: false,
        })
    }

    fn init(&mut self, pipe: &Pipe) -> Result<()> {
        let mgr = pipe.pump_manager()?;
        let weak = pipe.downgrade();
        let pump = mgr.alloc_idle(move |mgr, id| {
            let (Some(pipe), Some(pump)) = (weak.upgrade(), mgr.pump_ref(id)) else {
                return;
            };
            if let Err(e) = AppSrc::forward(&pipe, &pump) {
                pipe.throw_error(&e);
            }
        })?;
        self.pump = Some(pump);
        Ok(())
    }

    fn input(&mut self, _pipe: &Pipe, buffer: Buffer, _pump: Option<&PumpRef>) -> Result<()> {
        Err(Error::invalid(format!(
            "app source takes no input (buffer {})",
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
                return Ok(());
            }
            Control::Unblock => {
                pipe.set_blocked(false);
                if !self.pending.is_empty() || (self.stats.eos && !self.ended) {
                    self.wake(pipe)?;
                }
                return Ok(());
            }
            Control::Local { .. } => {}
            _ => return Err(Error::Unhandled),
        }

        match AppSrcCommand::from_opcode(command.opcode()) {
            Some(AppSrcCommand::Push) => {
                let buffer = command
                    .local_args::<Option<Buffer>>()?
                    .take()
                    .ok_or_else(|| Error::invalid("push without a buffer"))?;
                self.enqueue(buffer)?;
                self.wake(pipe)
            }
            Some(AppSrcCommand::EndOfStream) => {
                self.stats.eos = true;
                self.wake(pipe)
            }
            Some(AppSrcCommand::Stats) => {
                let mut stats = self.stats;
                stats.pending = self.pending.len();
                *command.local_args::<AppSrcStats>()? = stats;
                Ok(())
            }
            None => Err(Error::Unhandled),
        }
    }

    fn free(&mut self, pipe: &Pipe) {
        self.pump = None;
        if !self.pending.is_empty() {
            tracing::debug!(pipe = %pipe.name(), left = self.pending.len(), "app source released with buffers");
        }
    }
}
