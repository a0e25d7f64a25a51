//! Signal delivery through a self-pipe.

use crate::error::{Error, Result};
use signal_hook::SigId;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// A signal turned into a readable descriptor.
///
/// While armed, the process-wide handler writes one byte to `writer` per
/// delivery; the loop watches `reader`. Registration and removal are plain
/// calls, safe from inside another pump's callback.
pub(crate) struct SignalSource {
    signal: i32,
    reader: UnixStream,
    writer: UnixStream,
    registration: Option<SigId>,
}

impl SignalSource {
    pub(crate) fn new(signal: i32) -> Result<Self> {
        if signal_hook::consts::FORBIDDEN.contains(&signal) {
            return Err(Error::invalid(format!("signal {} cannot be handled", signal)));
        }

        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            signal,
            reader,
            writer,
            registration: None,
        })
    }

    pub(crate) fn signal(&self) -> i32 {
        self.signal
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub(crate) fn arm(&mut self) -> Result<()> {
        if self.registration.is_none() {
            // The registration owns and closes its own copy of the writer.
            let id = signal_hook::low_level::pipe::register(self.signal, self.writer.try_clone()?)?;
            self.registration = Some(id);
        }
        Ok(())
    }

    pub(crate) fn disarm(&mut self) {
        if let Some(id) = self.registration.take() {
            signal_hook::low_level::unregister(id);
        }
    }

    /// Consume pending deliveries, returning how many were read.
    pub(crate) fn drain(&self) -> usize {
        let mut buf = [0u8; 32];
        let mut count = 0;
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return count,
                Ok(n) => count += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return count,
                Err(e) => {
                    tracing::warn!("signal {}: self-pipe read failed: {}", self.signal, e);
                    return count;
                }
            }
        }
    }
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_signal_rejected() {
        assert!(matches!(
            SignalSource::new(signal_hook::consts::SIGKILL),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_raise_reaches_pipe() {
        let mut source = SignalSource::new(signal_hook::consts::SIGUSR2).unwrap();
        assert_eq!(source.drain(), 0);

        source.arm().unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGUSR2).unwrap();
        assert!(source.drain() >= 1);

        source.disarm();
        assert_eq!(source.signal(), signal_hook::consts::SIGUSR2);
    }

    #[test]
    fn test_rearm_after_disarm_still_delivers() {
        let mut source = SignalSource::new(signal_hook::consts::SIGWINCH).unwrap();
        source.arm().unwrap();
        source.disarm();
        source.arm().unwrap();

        signal_hook::low_level::raise(signal_hook::consts::SIGWINCH).unwrap();
        assert!(source.drain() >= 1);

        source.disarm();
        source.arm().unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGWINCH).unwrap();
        assert!(source.drain() >= 1);
        drop(source);
    }
}
