//! NullSink: counts and discards buffers.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipe::{Control, LOCAL_BASE, Pipe, PipeKind};
use crate::probe::Event;
use crate::pump::PumpRef;
use crate::signature::Signature;

/// Arguments for allocating a [`NullSink`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSinkArgs {
    /// Throw [`Event::SinkEnd`] once this many buffers were counted.
    pub limit: Option<u64>,
}

impl NullSinkArgs {
    /// End after `limit` buffers.
    pub fn with_limit(limit: u64) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Commands understood by a null sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullSinkCommand {
    /// Read the buffer count (`u64`).
    Count,
    /// Read the byte count (`u64`).
    Bytes,
}

impl NullSinkCommand {
    /// Opcode of this command.
    pub fn opcode(self) -> u32 {
        match self {
            NullSinkCommand::Count => LOCAL_BASE,
            NullSinkCommand::Bytes => LOCAL_BASE + 1,
        }
    }

    /// Decode an opcode.
    pub fn from_opcode(opcode: u32) -> Option<Self> {
        match opcode.checked_sub(LOCAL_BASE)? {
            0 => Some(NullSinkCommand::Count),
            1 => Some(NullSinkCommand::Bytes),
            _ => None,
        }
    }
}

/// A sink that discards all buffers.
///
/// This is useful for:
/// - Benchmarking pipeline throughput
/// - Testing source elements
/// - Draining a pipeline without side effects
pub struct NullSink {
    count: u64,
    bytes: u64,
    limit: Option<u64>,
}

impl NullSink {
    /// Number of buffers a null sink pipe has discarded.
    pub fn count(pipe: &Pipe) -> Result<u64> {
        Self::query(pipe, NullSinkCommand::Count)
    }

    /// Number of bytes a null sink pipe has discarded.
    pub fn bytes(pipe: &Pipe) -> Result<u64> {
        Self::query(pipe, NullSinkCommand::Bytes)
    }

    fn query(pipe: &Pipe, command: NullSinkCommand) -> Result<u64> {
        let mut value = 0u64;
        pipe.control(
            Self::SIGNATURE,
            &mut Control::local(command.opcode(), &mut value),
        )?;
        Ok(value)
    }
}

impl PipeKind for NullSink {
    const SIGNATURE: Signature = Signature::new(*b"null");
    const NAME: &'static str = "nullsink";
    type Config = ();
    type Args = NullSinkArgs;

    fn alloc(_config: &(), args: NullSinkArgs) -> Result<Self> {
        Ok(Self {
            count: 0,
            bytes: 0,
            limit: args.limit,
        })
    }

    fn input(&mut self, pipe: &Pipe, buffer: Buffer, _pump: Option<&PumpRef>) -> Result<()> {
        self.count += 1;
        self.bytes += buffer.len() as u64;
        if self.limit == Some(self.count) {
            pipe.throw(&mut Event::SinkEnd);
        }
        Ok(())
    }

    fn control(&mut self, _pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
        if !command.is_local() {
            return Err(Error::Unhandled);
        }
        let value = match NullSinkCommand::from_opcode(command.opcode()) {
            Some(NullSinkCommand::Count) => self.count,
            Some(NullSinkCommand::Bytes) => self.bytes,
            None => return Err(Error::Unhandled),
        };
        *command.local_args::<u64>()? = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Manager;
    use crate::probe::{Outcome, Probe};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_counts_buffers_and_bytes() {
        let sink = Manager::<NullSink>::new(())
            .alloc(None, NullSinkArgs::default())
            .unwrap();
        sink.input(Buffer::from_static(b"abcd", 0), None).unwrap();
        sink.input(Buffer::from_static(b"ef", 1), None).unwrap();

        assert_eq!(NullSink::count(&sink).unwrap(), 2);
        assert_eq!(NullSink::bytes(&sink).unwrap(), 6);
    }

    #[test]
    fn test_limit_throws_sink_end_once() {
        let ends = Rc::new(Cell::new(0));
        let seen = ends.clone();
        let probe = Probe::from_fn(
            move |_, event| {
                if matches!(event, Event::SinkEnd) {
                    seen.set(seen.get() + 1);
                    return Outcome::Claimed;
                }
                Outcome::Forward
            },
            None,
        );
        let sink = Manager::<NullSink>::new(())
            .alloc(Some(probe), NullSinkArgs::with_limit(2))
            .unwrap();
        for seq in 0..4 {
            sink.input(Buffer::empty(seq), None).unwrap();
        }
        assert_eq!(ends.get(), 1);
    }

    #[test]
    fn test_unknown_local_command() {
        let sink = Manager::<NullSink>::new(())
            .alloc(None, NullSinkArgs::default())
            .unwrap();
        let mut value = 0u64;
        let err = sink
            .control(
                NullSink::SIGNATURE,
                &mut Control::local(LOCAL_BASE + 9, &mut value),
            )
            .unwrap_err();
        assert!(err.is_unhandled());
    }
}
