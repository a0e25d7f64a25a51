//! AppSink element for extracting buffers to application code.
//!
//! Buffers are collected in the node until the application takes them.
//! With a bound set, a full sink either drops new buffers or rejects them
//! and stops the upstream pump until the next [`AppSink::take`].

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::{Control, LOCAL_BASE, Pipe, PipeKind, Throttle};
use crate::probe::Event;
use crate::pump::PumpRef;
use crate::signature::Signature;
use std::collections::VecDeque;

/// Arguments for allocating an [`AppSink`].
#[derive(Debug, Clone, Copy)]
pub struct AppSinkArgs {
    /// Maximum number of buffers held before the sink pushes back.
    pub bound: usize,
    /// Drop incoming buffers instead of rejecting them when full.
    pub drop_on_full: bool,
}

impl Default for AppSinkArgs {
    fn default() -> Self {
        Self {
            bound: 64,
            drop_on_full: false,
        }
    }
}

impl AppSinkArgs {
    /// Collect at most `bound` buffers.
    pub fn with_bound(bound: usize) -> Self {
        Self {
            bound,
            ..Self::default()
        }
    }

    /// Set whether buffers are dropped when full.
    pub fn drop_on_full(mut self, drop: bool) -> Self {
        self.drop_on_full = drop;
        self
    }
}

/// Statistics for an [`AppSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppSinkStats {
    /// Number of buffers currently held.
    pub queued_buffers: usize,
    /// Total buffers accepted.
    pub total_received: u64,
    /// Total buffers taken by the application.
    pub total_taken: u64,
    /// Total buffers dropped (when `drop_on_full` is set).
    pub total_dropped: u64,
    /// Total buffers rejected with [`Error::Blocked`].
    pub total_rejected: u64,
}

/// Commands understood by an app sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSinkCommand {
    /// Move every held buffer out (`Vec<Buffer>`).
    Take,
    /// Read the number of held buffers (`usize`).
    Len,
    /// Read the statistics (`AppSinkStats`).
    Stats,
}

impl AppSinkCommand {
    /// Opcode of this command.
    pub fn opcode(self) -> u32 {
        match self {
            AppSinkCommand::Take => LOCAL_BASE,
            AppSinkCommand::Len => LOCAL_BASE + 1,
            AppSinkCommand::Stats => LOCAL_BASE + 2,
        }
    }

    /// Decode an opcode.
    pub fn from_opcode(opcode: u32) -> Option<Self> {
        match opcode.checked_sub(LOCAL_BASE)? {
            0 => Some(AppSinkCommand::Take),
            1 => Some(AppSinkCommand::Len),
            2 => Some(AppSinkCommand::Stats),
            _ => None,
        }
    }
}

/// A sink that collects buffers for the application.
///
/// # Example
///
/// ```rust,ignore
/// use pipeflow::elements::{AppSink, AppSinkArgs};
/// use pipeflow::pipe::Manager;
///
/// let sinks = Manager::<AppSink>::new(());
/// let sink = sinks.alloc(Some(probe), AppSinkArgs::with_bound(16))?;
/// upstream.set_output(Some(sink.clone()));
///
/// mgr.run(None)?;
/// for buffer in AppSink::take(&sink)? {
///     // Process buffer
/// }
/// ```
pub struct AppSink {
    queue: VecDeque<Buffer>,
    bound: usize,
    drop_on_full: bool,
    throttle: Throttle,
    stats: AppSinkStats,
}

impl AppSink {
    /// Take every buffer held by an app sink pipe, restarting any upstream
    /// pump it had stopped.
    pub fn take(pipe: &Pipe) -> Result<Vec<Buffer>> {
        let mut buffers: Vec<Buffer> = Vec::new();
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(AppSinkCommand::Take.opcode(), &mut buffers),
        )?;
        Ok(buffers)
    }

    /// Number of buffers held by an app sink pipe.
    pub fn len(pipe: &Pipe) -> Result<usize> {
        let mut len = 0usize;
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(AppSinkCommand::Len.opcode(), &mut len),
        )?;
        Ok(len)
    }

    /// Statistics of an app sink pipe.
    pub fn stats(pipe: &Pipe) -> Result<AppSinkStats> {
        let mut stats = AppSinkStats::default();
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(AppSinkCommand::Stats.opcode(), &mut stats),
        )?;
        Ok(stats)
    }

    fn take_all(&mut self, pipe: &Pipe) -> Result<Vec<Buffer>> {
        let taken: Vec<Buffer> = self.queue.drain(..).collect();
        self.stats.total_taken += taken.len() as u64;
        if !taken.is_empty() {
            let restarted = self.throttle.release()?;
            if restarted > 0 {
                tracing::debug!(pipe = %pipe.name(), restarted, "app sink drained, resuming upstream");
            }
            pipe.set_blocked(false);
        }
        Ok(taken)
    }
}

impl PipeKind for AppSink {
    const SIGNATURE: Signature = Signature::new(*b"asnk");
    const NAME: &'static str = "appsink";
    type Config = ();
    type Args = AppSinkArgs;

    fn alloc(_config: &(), args: AppSinkArgs) -> Result<Self> {
        if args.bound == 0 {
            return Err(Error::invalid("app sink bound must be at least 1"));
        }
        Ok(Self {
            queue: VecDeque::with_capacity(args.bound.min(256)),
            bound: args.bound,
            drop_on_full: args.drop_on_full,
            throttle: Throttle::new(),
            stats: AppSinkStats::default(),
        })
    }

    fn input(&mut self, pipe: &Pipe, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()> {
        if self.queue.len() < self.bound {
            self.queue.push_back(buffer);
            self.stats.total_received += 1;
            return Ok(());
        }

        if self.drop_on_full {
            self.stats.total_dropped += 1;
            let message = format!("app sink full, dropping buffer {}", buffer.sequence());
            pipe.throw(&mut Event::Warning(&message));
            return Ok(());
        }

        self.stats.total_rejected += 1;
        self.throttle.hold(pump)?;
        pipe.set_blocked(true);
        Err(Error::Blocked(buffer))
    }

    fn control(&mut self, pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
        match AppSinkCommand::from_opcode(command.opcode()).filter(|_| command.is_local()) {
            Some(AppSinkCommand::Take) => {
                let slot = command.local_args::<Vec<Buffer>>()?;
                slot.extend(self.take_all(pipe)?);
                Ok(())
            }
            Some(AppSinkCommand::Len) => {
                *command.local_args::<usize>()? = self.queue.len();
                Ok(())
            }
            Some(AppSinkCommand::Stats) => {
                let mut stats = self.stats;
                stats.queued_buffers = self.queue.len();
                *command.local_args::<AppSinkStats>()? = stats;
                Ok(())
            }
            None => Err(Error::Unhandled),
        }
    }

    fn free(&mut self, pipe: &Pipe) {
        if !self.queue.is_empty() {
            tracing::debug!(pipe = %pipe.name(), left = self.queue.len(), "app sink released with buffers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Manager;
    use crate::probe::{Outcome, Probe};
    use crate::pump::{LoopConfig, PumpManager};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_collects_until_bound() {
        let sink = Manager::<AppSink>::new(())
            .alloc(None, AppSinkArgs::with_bound(2))
            .unwrap();
        sink.input(Buffer::empty(0), None).unwrap();
        sink.input(Buffer::empty(1), None).unwrap();

        let err = sink.input(Buffer::empty(2), None).unwrap_err();
        assert_eq!(err.into_buffer().map(|b| b.sequence()), Some(2));
        assert!(sink.is_blocked());
        assert_eq!(AppSink::len(&sink).unwrap(), 2);

        let taken = AppSink::take(&sink).unwrap();
        assert_eq!(taken.len(), 2);
        assert!(!sink.is_blocked());

        let stats = AppSink::stats(&sink).unwrap();
        assert_eq!(stats.total_received, 2);
        assert_eq!(stats.total_taken, 2);
        assert_eq!(stats.total_rejected, 1);
        assert_eq!(stats.queued_buffers, 0);
    }

    #[test]
    fn test_take_restarts_held_pump() {
        let mgr = PumpManager::new(LoopConfig::default()).unwrap();
        let upstream = mgr.alloc_idle(|_, _| {}).unwrap();
        upstream.start().unwrap();

        let sink = Manager::<AppSink>::new(())
            .alloc(None, AppSinkArgs::with_bound(1))
            .unwrap();
        sink.input(Buffer::empty(0), Some(&upstream.to_ref())).unwrap();
        assert!(sink.input(Buffer::empty(1), Some(&upstream.to_ref())).is_err());
        assert!(!upstream.is_started());

        AppSink::take(&sink).unwrap();
        assert!(upstream.is_started());
    }

    #[test]
    fn test_drop_on_full_warns() {
        let warnings = Rc::new(Cell::new(0));
        let seen = warnings.clone();
        let probe = Probe::from_fn(
            move |_, event| {
                if matches!(event, Event::Warning(_)) {
                    seen.set(seen.get() + 1);
                    return Outcome::Claimed;
                }
                Outcome::Forward
            },
            None,
        );
        let sink = Manager::<AppSink>::new(())
            .alloc(Some(probe), AppSinkArgs::with_bound(1).drop_on_full(true))
            .unwrap();

        for seq in 0..3 {
            sink.input(Buffer::empty(seq), None).unwrap();
        }
        assert_eq!(warnings.get(), 2);
        assert_eq!(AppSink::stats(&sink).unwrap().total_dropped, 2);
        assert_eq!(AppSink::take(&sink).unwrap()[0].sequence(), 0);
    }

    #[test]
    fn test_zero_bound_rejected() {
        let result = Manager::<AppSink>::new(()).alloc(None, AppSinkArgs::with_bound(0));
        assert!(result.unwrap_err().is_invalid());
    }
}
