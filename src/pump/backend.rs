//! Loop backends: descriptor readiness over the platform's native reactor.
//!
//! A [`Backend`] only knows about descriptors. Timers, idle work, signals and
//! queue readiness are layered on top by the
//! [`PumpManager`](super::PumpManager): timers become the wait timeout,
//! signals and queues become descriptors (a self-pipe, a notifier).

use super::PumpKind;
use crate::error::Result;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

/// Opaque key identifying one registration.
pub type Token = u64;

/// Readiness a descriptor registration waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Descriptor is readable (or hung up / in error).
    Readable,
    /// Descriptor is writable (or in error).
    Writable,
}

/// Register interest, deliver readiness.
///
/// Implementations must be level-triggered: a descriptor that stays ready is
/// reported again on the next `wait`.
pub trait Backend {
    /// Backend name, for logging.
    fn name(&self) -> &'static str;

    /// Whether pumps of `kind` can be driven by this backend.
    fn supports(&self, kind: PumpKind) -> bool {
        let _ = kind;
        true
    }

    /// Start watching `fd` for `interest` under `token`.
    fn register(&mut self, token: Token, fd: RawFd, interest: Interest) -> Result<()>;

    /// Stop watching the registration `token`.
    fn deregister(&mut self, token: Token) -> Result<()>;

    /// Block until a registration is ready or `timeout` elapses, appending
    /// the ready tokens to `ready`. `None` waits indefinitely.
    ///
    /// An interrupted wait returns `Ok` with nothing appended.
    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<Token>) -> Result<()>;
}

/// Built-in backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// `poll(2)`, available on every Unix.
    #[default]
    Poll,
    /// `epoll(7)`, Linux only. Falls back to `Poll` elsewhere.
    Epoll,
}

impl BackendKind {
    /// Parse a backend name (`"poll"` or `"epoll"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "poll" => Some(Self::Poll),
            "epoll" => Some(Self::Epoll),
            _ => None,
        }
    }

    /// Instantiate the backend.
    pub fn create(self, max_events: usize) -> Result<Box<dyn Backend>> {
        match self {
            Self::Poll => Ok(Box::new(PollBackend::new())),
            #[cfg(target_os = "linux")]
            Self::Epoll => Ok(Box::new(EpollBackend::new(max_events)?)),
            #[cfg(not(target_os = "linux"))]
            Self::Epoll => {
                let _ = max_events;
                tracing::warn!("epoll unavailable on this platform, using poll");
                Ok(Box::new(PollBackend::new()))
            }
        }
    }
}

fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            // Round up so a timer is never woken before its deadline.
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(i32::MAX as u128) as i32
        }
    }
}

// ============================================================================
// poll(2)
// ============================================================================

/// Portable backend built on `poll(2)`.
///
/// The descriptor set is rebuilt on every wait, which is linear in the
/// number of registrations; fine for the small static topologies pipelines
/// use.
#[derive(Debug, Default)]
pub struct PollBackend {
    entries: Vec<(Token, RawFd, Interest)>,
}

impl PollBackend {
    /// Create an empty poll backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn register(&mut self, token: Token, fd: RawFd, interest: Interest) -> Result<()> {
        self.entries.retain(|(t, _, _)| *t != token);
        self.entries.push((token, fd, interest));
        Ok(())
    }

    fn deregister(&mut self, token: Token) -> Result<()> {
        self.entries.retain(|(t, _, _)| *t != token);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<Token>) -> Result<()> {
        use rustix::event::{PollFd, PollFlags, poll};

        let mut fds: Vec<PollFd<'_>> = self
            .entries
            .iter()
            .map(|&(_, fd, interest)| {
                let flags = match interest {
                    Interest::Readable => PollFlags::IN,
                    Interest::Writable => PollFlags::OUT,
                };
                // SAFETY: pump owners keep registered descriptors open until
                // the pump is stopped, which deregisters it first.
                PollFd::from_borrowed_fd(unsafe { BorrowedFd::borrow_raw(fd) }, flags)
            })
            .collect();

        match poll(&mut fds, timeout_ms(timeout)) {
            Ok(_) => {}
            Err(rustix::io::Errno::INTR) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        for (pfd, &(token, _, interest)) in fds.iter().zip(&self.entries) {
            let revents = pfd.revents();
            let hit = match interest {
                Interest::Readable => {
                    revents.intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR)
                }
                Interest::Writable => revents.intersects(PollFlags::OUT | PollFlags::ERR),
            };
            if hit || revents.contains(PollFlags::NVAL) {
                ready.push(token);
            }
        }
        Ok(())
    }
}

// ============================================================================
// epoll(7)
// ============================================================================

/// Linux backend built on `epoll(7)`, level-triggered.
///
/// epoll accepts one registration per descriptor, so interests on the same
/// descriptor are merged and demultiplexed back to tokens on wakeup.
#[cfg(target_os = "linux")]
pub struct EpollBackend {
    epoll: rustix::fd::OwnedFd,
    events: rustix::event::epoll::EventVec,
    by_fd: std::collections::HashMap<RawFd, Vec<(Token, Interest)>>,
    by_token: std::collections::HashMap<Token, RawFd>,
}

#[cfg(target_os = "linux")]
impl EpollBackend {
    /// Create an epoll instance reporting at most `max_events` per wait.
    pub fn new(max_events: usize) -> Result<Self> {
        use rustix::event::epoll;

        let epoll = epoll::create(epoll::CreateFlags::CLOEXEC)?;
        Ok(Self {
            epoll,
            events: epoll::EventVec::with_capacity(max_events.max(1)),
            by_fd: std::collections::HashMap::new(),
            by_token: std::collections::HashMap::new(),
        })
    }

    fn flags_for(interests: &[(Token, Interest)]) -> rustix::event::epoll::EventFlags {
        use rustix::event::epoll::EventFlags;

        interests
            .iter()
            .fold(EventFlags::empty(), |acc, (_, interest)| match interest {
                Interest::Readable => acc | EventFlags::IN,
                Interest::Writable => acc | EventFlags::OUT,
            })
    }
}

#[cfg(target_os = "linux")]
impl Backend for EpollBackend {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn register(&mut self, token: Token, fd: RawFd, interest: Interest) -> Result<()> {
        use rustix::event::epoll;

        if self.by_token.contains_key(&token) {
            self.deregister(token)?;
        }

        // SAFETY: see PollBackend::wait.
        let source = unsafe { BorrowedFd::borrow_raw(fd) };
        let data = epoll::EventData::new_u64(fd as u64);
        let interests = self.by_fd.entry(fd).or_default();
        let fresh = interests.is_empty();
        interests.push((token, interest));
        let flags = Self::flags_for(interests);

        let result = if fresh {
            epoll::add(&self.epoll, source, data, flags)
        } else {
            epoll::modify(&self.epoll, source, data, flags)
        };
        if let Err(e) = result {
            if let Some(interests) = self.by_fd.get_mut(&fd) {
                interests.retain(|(t, _)| *t != token);
                if interests.is_empty() {
                    self.by_fd.remove(&fd);
                }
            }
            return Err(e.into());
        }

        self.by_token.insert(token, fd);
        Ok(())
    }

    fn deregister(&mut self, token: Token) -> Result<()> {
        use rustix::event::epoll;

        let Some(fd) = self.by_token.remove(&token) else {
            return Ok(());
        };
        // SAFETY: see PollBackend::wait.
        let source = unsafe { BorrowedFd::borrow_raw(fd) };

        let remaining = match self.by_fd.get_mut(&fd) {
            Some(interests) => {
                interests.retain(|(t, _)| *t != token);
                interests.len()
            }
            None => 0,
        };

        if remaining == 0 {
            self.by_fd.remove(&fd);
            epoll::delete(&self.epoll, source)?;
        } else if let Some(interests) = self.by_fd.get(&fd) {
            let data = epoll::EventData::new_u64(fd as u64);
            epoll::modify(&self.epoll, source, data, Self::flags_for(interests))?;
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<Token>) -> Result<()> {
        use rustix::event::epoll::{self, EventFlags};

        match epoll::wait(&self.epoll, &mut self.events, timeout_ms(timeout)) {
            Ok(()) => {}
            Err(rustix::io::Errno::INTR) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        for event in self.events.iter() {
            let fd = event.data.u64() as RawFd;
            let Some(interests) = self.by_fd.get(&fd) else {
                continue;
            };
            for &(token, interest) in interests {
                let hit = match interest {
                    Interest::Readable => { event.flags }
                        .intersects(EventFlags::IN | EventFlags::HUP | EventFlags::ERR),
                    Interest::Writable => {
                        { event.flags }.intersects(EventFlags::OUT | EventFlags::ERR)
                    }
                };
                if hit {
                    ready.push(token);
                }
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl std::fmt::Debug for EpollBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpollBackend")
            .field("registrations", &self.by_token.len())
            .finish()
    }
}
