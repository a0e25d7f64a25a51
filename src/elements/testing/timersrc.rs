//! TimerSrc element: a timer-driven buffer generator.
//!
//! Emits one buffer per period from a repeating timer pump. A buffer
//! refused downstream is kept and offered again on the next tick after the
//! pump has been restarted.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::{Control, LOCAL_BASE, Pipe, PipeKind};
use crate::probe::Event;
use crate::pump::{Pump, PumpRef};
use crate::signature::Signature;
use std::time::Duration;

/// Fill pattern of generated buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestPattern {
    /// All zeros.
    #[default]
    Zero,
    /// Incrementing bytes (0, 1, 2, ..., 255, 0, 1, ...).
    Counter,
    /// Low byte of the sequence number repeated to fill the buffer.
    Sequence,
}

impl TestPattern {
    fn fill(self, size: usize, sequence: u64) -> Vec<u8> {
        match self {
            TestPattern::Zero => vec![0; size],
            TestPattern::Counter => (0..size).map(|i| i as u8).collect(),
            TestPattern::Sequence => vec![sequence as u8; size],
        }
    }
}

/// Arguments for allocating a [`TimerSrc`].
#[derive(Debug, Clone, Copy)]
pub struct TimerSrcArgs {
    /// Time between buffers.
    pub period: Duration,
    /// Size of each buffer in bytes.
    pub size: usize,
    /// Number of buffers to emit; unbounded if `None`.
    pub count: Option<u64>,
    /// Fill pattern.
    pub pattern: TestPattern,
}

impl Default for TimerSrcArgs {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(10),
            size: 64,
            count: None,
            pattern: TestPattern::Zero,
        }
    }
}

impl TimerSrcArgs {
    /// Emit `count` buffers, one every `period`.
    pub fn new(period: Duration, count: u64) -> Self {
        Self {
            period,
            count: Some(count),
            ..Self::default()
        }
    }

    /// Set the buffer size.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the fill pattern.
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }
}

/// Opcode reading how many buffers a timer source has emitted (`u64`).
pub const TIMER_SRC_PRODUCED: u32 = LOCAL_BASE;

/// A source emitting a buffer on every timer tick.
pub struct TimerSrc {
    args: TimerSrcArgs,
    pump: Option<Pump>,
    held: Option<Buffer>,
    produced: u64,
    ended: bool,
}

impl TimerSrc {
    /// Number of buffers a timer source pipe has emitted.
    pub fn produced(pipe: &Pipe) -> Result<u64> {
        let mut produced = 0u64;
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(TIMER_SRC_PRODUCED, &mut produced),
        )?;
        Ok(produced)
    }

    /// Take the held buffer or generate the next one.
    fn next_buffer(&mut self) -> Option<Buffer> {
        if let Some(held) = self.held.take() {
            return Some(held);
        }
        if self.ended || self.args.count.is_some_and(|count| self.produced >= count) {
            return None;
        }
        let data = self.args.pattern.fill(self.args.size, self.produced);
        Some(Buffer::from_vec(data, self.produced))
    }

    fn tick(pipe: &Pipe, pump: &PumpRef) -> Result<()> {
        let Some(buffer) = pipe.with_node(|src: &mut TimerSrc, _| src.next_buffer())? else {
            return Ok(());
        };

        let finished = match pipe.output(buffer, Some(pump)) {
            Ok(()) => pipe.with_node(|src: &mut TimerSrc, _| {
                src.produced += 1;
                let done = src.args.count.is_some_and(|count| src.produced >= count);
                done && !std::mem::replace(&mut src.ended, true)
            })?,
            Err(Error::Blocked(buffer)) => {
                pipe.with_node(|src: &mut TimerSrc, _| src.held = Some(buffer))?;
                false
            }
            Err(e) => return Err(e),
        };

        if finished {
            pump.stop()?;
            pipe.throw(&mut Event::SourceEnd);
        }
        Ok(())
    }
}

impl PipeKind for TimerSrc {
    const SIGNATURE: Signature = Signature::new(*b"tsrc");
    const NAME: &'static str = "timersrc";
    type Config = ();
    type Args = TimerSrcArgs;

    fn alloc(_config: &(), args: TimerSrcArgs) -> Result<Self> {
        if args.period.is_zero() {
            return Err(Error::invalid("timer source period must be non-zero"));
        }
        Ok(Self {
            args,
            pump: None,
            held: None,
            produced: 0,
            ended: false,
        })
    }

    fn init(&mut self, pipe: &Pipe) -> Result<()> {
        let mgr = pipe.pump_manager()?;
        let weak = pipe.downgrade();
        let pump = mgr.alloc_timer(self.args.period, Some(self.args.period), move |mgr, id| {
            let (Some(pipe), Some(pump)) = (weak.upgrade(), mgr.pump_ref(id)) else {
                return;
            };
            if let Err(e) = TimerSrc::tick(&pipe, &pump) {
                pipe.throw_error(&e);
            }
        })?;
        if self.args.count != Some(0) {
            pump.start()?;
        }
        self.pump = Some(pump);
        Ok(())
    }

    fn input(&mut self, _pipe: &Pipe, buffer: Buffer, _pump: Option<&PumpRef>) -> Result<()> {
        Err(Error::invalid(format!(
            "timer source takes no input (buffer {})",
            buffer.sequence()
        )))
    }

    fn control(&mut self, pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
        match command {
            Control::Block | Control::Unblock => {
                let blocked = matches!(command, Control::Block);
                if let Some(pump) = &self.pump {
                    if blocked {
                        pump.stop()?;
                    } else if !self.ended {
                        pump.start()?;
                    }
                }
                pipe.set_blocked(blocked);
                Ok(())
            }
            Control::Local { .. } if command.opcode() == TIMER_SRC_PRODUCED => {
                *command.local_args::<u64>()? = self.produced;
                Ok(())
            }
            _ => Err(Error::Unhandled),
        }
    }

    fn free(&mut self, pipe: &Pipe) {
        self.pump = None;
        tracing::debug!(pipe = %pipe.name(), produced = self.produced, "timer source released");
    }
}
