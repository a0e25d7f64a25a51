//! Cross-thread wakeup primitive with a pollable descriptor.

use crate::error::Result;
use std::os::fd::{AsFd, BorrowedFd};

#[cfg(target_os = "linux")]
use rustix::event::{EventfdFlags, eventfd};
#[cfg(target_os = "linux")]
use rustix::fd::OwnedFd;

/// A wakeup signal that any thread may raise and an event loop may watch.
///
/// On Linux this is an eventfd. Elsewhere it falls back to a nonblocking
/// socket pair, where one byte is written per notification.
///
/// Notifications coalesce: several `notify` calls before a `try_wait` are
/// observed as one.
#[cfg(target_os = "linux")]
pub struct Notifier {
    fd: OwnedFd,
}

#[cfg(target_os = "linux")]
impl Notifier {
    /// Create a new, unsignaled notifier.
    pub fn new() -> Result<Self> {
        let fd = eventfd(0, EventfdFlags::NONBLOCK | EventfdFlags::CLOEXEC)?;
        Ok(Self { fd })
    }

    /// Raise the signal. Safe to call from any thread.
    pub fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        match rustix::io::write(&self.fd, &val.to_ne_bytes()) {
            Ok(_) => Ok(()),
            // Counter saturated: the signal is already raised.
            Err(rustix::io::Errno::AGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Consume the signal without blocking.
    ///
    /// Returns `true` if the notifier was signaled.
    pub fn try_wait(&self) -> Result<bool> {
        let mut buf = [0u8; 8];
        match rustix::io::read(&self.fd, &mut buf) {
            Ok(8) => Ok(true),
            Ok(_) => Ok(false),
            Err(rustix::io::Errno::AGAIN) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(target_os = "linux")]
impl AsFd for Notifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Fallback Notifier for non-Linux Unix platforms using a socket pair.
#[cfg(not(target_os = "linux"))]
pub struct Notifier {
    reader: std::os::unix::net::UnixStream,
    writer: std::os::unix::net::UnixStream,
}

#[cfg(not(target_os = "linux"))]
impl Notifier {
    /// Create a new, unsignaled notifier.
    pub fn new() -> Result<Self> {
        let (reader, writer) = std::os::unix::net::UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Raise the signal. Safe to call from any thread.
    pub fn notify(&self) -> Result<()> {
        use std::io::Write;
        match (&self.writer).write(&[1u8]) {
            Ok(_) => Ok(()),
            // Socket buffer full: the signal is already raised.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Consume the signal without blocking.
    ///
    /// Returns `true` if the notifier was signaled.
    pub fn try_wait(&self) -> Result<bool> {
        use std::io::Read;
        let mut buf = [0u8; 64];
        let mut signaled = false;
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return Ok(signaled),
                Ok(_) => signaled = true,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(signaled),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl AsFd for Notifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::os::fd::AsRawFd;
        f.debug_struct("Notifier")
            .field("fd", &self.as_fd().as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_basic() {
        let n = Notifier::new().unwrap();

        // Initially not signaled
        assert!(!n.try_wait().unwrap());

        n.notify().unwrap();
        assert!(n.try_wait().unwrap());
        assert!(!n.try_wait().unwrap());

        // Multiple signals coalesce
        n.notify().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        assert!(n.try_wait().unwrap());
        assert!(!n.try_wait().unwrap());
    }

    #[test]
    fn test_notify_from_other_thread() {
        let n = std::sync::Arc::new(Notifier::new().unwrap());
        let remote = n.clone();
        std::thread::spawn(move || remote.notify().unwrap())
            .join()
            .unwrap();
        assert!(n.try_wait().unwrap());
    }
}
