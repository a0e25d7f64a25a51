//! The pump manager: pump arena, dispatch and the run loop.

use super::backend::{Backend, Interest, Token};
use super::handle::{Pump, PumpRef};
use super::signal::SignalSource;
use super::{LoopConfig, PumpCallback, PumpId, PumpKind};
use crate::error::{Error, Result};
use crate::observability::{span_loop, span_pump};
use crate::queue::{Direction, Notifier, QueueWatch};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::Span;

/// Token of the internal quit waker. Generations never reach `u32::MAX`,
/// so no pump token collides with it.
const QUIT_TOKEN: Token = u64::MAX;

pub(crate) type LoopShared = RefCell<LoopState>;

/// Why [`PumpManager::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No started blocker pump remained.
    Drained,
    /// [`PumpManager::quit`] or a [`QuitHandle`] was used.
    Quit,
    /// The deadline passed to `run` elapsed.
    DeadlineElapsed,
}

/// Counters kept by a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Backend waits performed.
    pub iterations: u64,
    /// Callbacks invoked.
    pub dispatched: u64,
    /// Pumps allocated.
    pub allocated: u64,
    /// Pumps freed.
    pub freed: u64,
}

enum Source {
    Fd(RawFd),
    Timer {
        after: Duration,
        repeat: Option<Duration>,
        deadline: Option<Instant>,
    },
    Signal(SignalSource),
    Idle,
    Queue {
        watch: Arc<dyn QueueWatch>,
        direction: Direction,
    },
}

struct Entry {
    kind: PumpKind,
    source: Source,
    /// `None` while the callback is running.
    callback: Option<PumpCallback>,
    started: bool,
    blocker: bool,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

pub(crate) struct LoopState {
    config: LoopConfig,
    backend: Box<dyn Backend>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    quit: Arc<AtomicBool>,
    waker: Arc<Notifier>,
    running: bool,
    stats: LoopStats,
}

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        u32::MAX => 0,
        next => next,
    }
}

impl LoopState {
    fn lookup(slots: &mut [Slot], id: PumpId) -> Option<&mut Entry> {
        slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_mut())
    }

    fn entry(&self, id: PumpId) -> Option<&Entry> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entries(&self) -> impl Iterator<Item = (PumpId, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|entry| (PumpId::new(index as u32, slot.generation), entry))
        })
    }

    fn insert(&mut self, entry: Entry) -> PumpId {
        self.stats.allocated += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                PumpId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                PumpId::new(index, 0)
            }
        }
    }

    fn start(&mut self, id: PumpId) -> Result<()> {
        let Self {
            slots,
            backend,
            config,
            ..
        } = self;
        let Some(entry) = Self::lookup(slots, id) else {
            tracing::trace!(?id, "start on stale pump ignored");
            return Ok(());
        };
        if entry.started {
            return Ok(());
        }

        let token = id.token();
        match &mut entry.source {
            Source::Fd(fd) => {
                let interest = match entry.kind {
                    PumpKind::FdWrite => Interest::Writable,
                    _ => Interest::Readable,
                };
                backend.register(token, *fd, interest)?;
            }
            Source::Timer {
                after, deadline, ..
            } => {
                *deadline = Some(Instant::now() + *after);
            }
            Source::Signal(signal) => {
                signal.arm()?;
                if let Err(e) = backend.register(token, signal.fd(), Interest::Readable) {
                    signal.disarm();
                    return Err(e);
                }
            }
            Source::Idle => {}
            Source::Queue { watch, direction } => {
                let notifier = watch.notifier(*direction);
                backend.register(token, notifier.as_fd().as_raw_fd(), Interest::Readable)?;
                // Already ready: the transition happened before we watched.
                if watch.is_ready(*direction) {
                    notifier.notify()?;
                }
            }
        }

        entry.started = true;
        tracing::trace!(
            loop_name = %config.name,
            kind = %entry.kind,
            index = id.index(),
            "pump started"
        );
        Ok(())
    }

    fn stop(&mut self, id: PumpId) -> Result<()> {
        let Self {
            slots,
            backend,
            config,
            ..
        } = self;
        let Some(entry) = Self::lookup(slots, id) else {
            return Ok(());
        };
        if !entry.started {
            return Ok(());
        }

        entry.started = false;
        let token = id.token();
        match &mut entry.source {
            Source::Fd(_) | Source::Queue { .. } => backend.deregister(token)?,
            Source::Signal(signal) => {
                signal.disarm();
                backend.deregister(token)?;
            }
            Source::Timer { deadline, .. } => *deadline = None,
            Source::Idle => {}
        }

        tracing::trace!(
            loop_name = %config.name,
            kind = %entry.kind,
            index = id.index(),
            "pump stopped"
        );
        Ok(())
    }

    /// Detach an entry from the arena. The caller drops it after releasing
    /// the borrow, since callbacks may own pumps of this manager.
    fn remove(&mut self, id: PumpId) -> Option<Entry> {
        if let Err(e) = self.stop(id) {
            tracing::warn!(?id, "failed to stop pump while freeing: {}", e);
        }
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())?;
        let entry = slot.entry.take()?;
        slot.generation = next_generation(slot.generation);
        self.free.push(id.index());
        self.stats.freed += 1;
        Some(entry)
    }

    fn has_active_blocker(&self) -> bool {
        self.entries()
            .any(|(_, entry)| entry.started && entry.blocker)
    }

    fn next_timeout(&self, now: Instant, deadline: Option<Instant>) -> Option<Duration> {
        let mut wake = deadline;
        for (_, entry) in self.entries().filter(|(_, e)| e.started) {
            match entry.source {
                Source::Idle => return Some(Duration::ZERO),
                Source::Timer {
                    deadline: Some(at), ..
                } => wake = Some(wake.map_or(at, |w| w.min(at))),
                _ => {}
            }
        }
        wake.map(|w| w.saturating_duration_since(now))
    }

    fn collect_due_timers(&self, now: Instant, batch: &mut SmallVec<[PumpId; 16]>) {
        let mut due: SmallVec<[(Instant, PumpId); 8]> = self
            .entries()
            .filter_map(|(id, entry)| match entry.source {
                Source::Timer {
                    deadline: Some(at), ..
                } if entry.started && at <= now => Some((at, id)),
                _ => None,
            })
            .collect();
        due.sort_by_key(|(at, _)| *at);
        batch.extend(due.into_iter().map(|(_, id)| id));
    }

    fn collect_idle(&self, batch: &mut SmallVec<[PumpId; 16]>) {
        batch.extend(
            self.entries()
                .filter(|(_, entry)| entry.started && matches!(entry.source, Source::Idle))
                .map(|(id, _)| id),
        );
    }

    /// Consume the readiness of a firing pump and take out its callback.
    fn prepare(&mut self, id: PumpId) -> Option<(PumpCallback, Span)> {
        let Self {
            slots,
            config,
            stats,
            ..
        } = self;
        let entry = Self::lookup(slots, id)?;
        if !entry.started {
            return None;
        }

        match &mut entry.source {
            Source::Timer {
                repeat, deadline, ..
            } => match *repeat {
                Some(period) => {
                    // Re-arm from the schedule, skipping ticks we fell behind on.
                    let now = Instant::now();
                    let mut next = deadline.unwrap_or(now) + period;
                    while next <= now {
                        next += period;
                    }
                    *deadline = Some(next);
                }
                None => {
                    *deadline = None;
                    entry.started = false;
                }
            },
            Source::Signal(signal) => {
                signal.drain();
            }
            Source::Queue { watch, direction } => {
                if let Err(e) = watch.notifier(*direction).try_wait() {
                    tracing::warn!(queue = %watch.name(), "failed to drain notifier: {}", e);
                }
                if !watch.is_ready(*direction) {
                    return None;
                }
            }
            Source::Fd(_) | Source::Idle => {}
        }

        let callback = entry.callback.take()?;
        stats.dispatched += 1;
        let span = if config.tracing.pump_spans {
            span_pump(&config.name, entry.kind.name(), id.index())
        } else {
            Span::none()
        };
        Some((callback, span))
    }

    /// Put a callback back after it ran. Returns it if the pump is gone.
    fn restore(&mut self, id: PumpId, callback: PumpCallback) -> Option<PumpCallback> {
        let Some(entry) = Self::lookup(&mut self.slots, id) else {
            return Some(callback);
        };
        if entry.started {
            if let Source::Queue { watch, direction } = &entry.source {
                if watch.is_ready(*direction) {
                    if let Err(e) = watch.notifier(*direction).notify() {
                        tracing::warn!(queue = %watch.name(), "failed to re-arm notifier: {}", e);
                    }
                }
            }
        }
        entry.callback = Some(callback);
        None
    }

    fn drain_waker(&self) {
        if let Err(e) = self.waker.try_wait() {
            tracing::warn!("failed to drain quit waker: {}", e);
        }
    }
}

impl Drop for LoopState {
    fn drop(&mut self) {
        let leaked = self.entries().count();
        if leaked > 0 {
            tracing::warn!(
                loop_name = %self.config.name,
                leaked,
                "pump manager dropped with pumps still allocated"
            );
        }
    }
}

/// An event loop and the pumps registered with it.
///
/// `PumpManager` is a cheap, clonable handle. It is tied to the thread
/// that created it; other threads reach it through a [`QuitHandle`] or
/// through [`Queue`](crate::queue::Queue) pumps.
#[derive(Clone)]
pub struct PumpManager {
    shared: Rc<LoopShared>,
}

impl PumpManager {
    /// Create a manager with the backend named in `config`.
    pub fn new(config: LoopConfig) -> Result<Self> {
        let backend = config.backend.create(config.max_events)?;
        Self::with_backend(config, backend)
    }

    /// Create a manager on a caller-provided backend.
    pub fn with_backend(config: LoopConfig, mut backend: Box<dyn Backend>) -> Result<Self> {
        let waker = Arc::new(Notifier::new()?);
        backend.register(QUIT_TOKEN, waker.as_fd().as_raw_fd(), Interest::Readable)?;

        tracing::debug!(
            loop_name = %config.name,
            backend = backend.name(),
            "pump manager created"
        );

        Ok(Self {
            shared: Rc::new(RefCell::new(LoopState {
                config,
                backend,
                slots: Vec::new(),
                free: Vec::new(),
                quit: Arc::new(AtomicBool::new(false)),
                waker,
                running: false,
                stats: LoopStats::default(),
            })),
        })
    }

    pub(crate) fn from_shared(shared: Rc<LoopShared>) -> Self {
        Self { shared }
    }

    /// Loop name from the config.
    pub fn name(&self) -> String {
        self.shared.borrow().config.name.clone()
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.shared.borrow().backend.name()
    }

    /// Whether both handles refer to the same loop.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    fn alloc(&self, kind: PumpKind, source: Source, callback: PumpCallback) -> Result<Pump> {
        let id = {
            let mut state = self.shared.borrow_mut();
            if !state.backend.supports(kind) {
                return Err(Error::Unsupported {
                    backend: state.backend.name(),
                    kind: kind.name(),
                });
            }
            state.insert(Entry {
                kind,
                source,
                callback: Some(callback),
                started: false,
                blocker: true,
            })
        };
        tracing::trace!(?id, kind = %kind, "pump allocated");
        Ok(Pump::new(PumpRef::new(Rc::downgrade(&self.shared), id, kind)))
    }

    /// Watch `fd` for readability.
    ///
    /// The descriptor is not owned; it must stay open while the pump is
    /// started.
    pub fn alloc_fd_read(
        &self,
        fd: impl AsFd,
        callback: impl FnMut(&PumpManager, PumpId) + 'static,
    ) -> Result<Pump> {
        let raw = fd.as_fd().as_raw_fd();
        self.alloc(PumpKind::FdRead, Source::Fd(raw), Box::new(callback))
    }

    /// Watch `fd` for writability.
    ///
    /// The descriptor is not owned; it must stay open while the pump is
    /// started.
    pub fn alloc_fd_write(
        &self,
        fd: impl AsFd,
        callback: impl FnMut(&PumpManager, PumpId) + 'static,
    ) -> Result<Pump> {
        let raw = fd.as_fd().as_raw_fd();
        self.alloc(PumpKind::FdWrite, Source::Fd(raw), Box::new(callback))
    }

    /// A timer firing `after` the pump is started, then every `repeat` if
    /// given. A one-shot timer stops itself after firing.
    pub fn alloc_timer(
        &self,
        after: Duration,
        repeat: Option<Duration>,
        callback: impl FnMut(&PumpManager, PumpId) + 'static,
    ) -> Result<Pump> {
        if repeat.is_some_and(|period| period.is_zero()) {
            return Err(Error::invalid("timer repeat period must be non-zero"));
        }
        self.alloc(
            PumpKind::Timer,
            Source::Timer {
                after,
                repeat,
                deadline: None,
            },
            Box::new(callback),
        )
    }

    /// Fire when `signal` is delivered to the process.
    ///
    /// Deliveries that arrive between two iterations are coalesced into a
    /// single callback.
    pub fn alloc_signal(
        &self,
        signal: i32,
        callback: impl FnMut(&PumpManager, PumpId) + 'static,
    ) -> Result<Pump> {
        let source = SignalSource::new(signal)?;
        self.alloc(PumpKind::Signal, Source::Signal(source), Box::new(callback))
    }

    /// Fire on every iteration in which no descriptor or timer was ready.
    pub fn alloc_idle(&self, callback: impl FnMut(&PumpManager, PumpId) + 'static) -> Result<Pump> {
        self.alloc(PumpKind::Idle, Source::Idle, Box::new(callback))
    }

    /// Fire while `queue` holds at least one value.
    pub fn alloc_queue_pop<Q: QueueWatch + 'static>(
        &self,
        queue: &Arc<Q>,
        callback: impl FnMut(&PumpManager, PumpId) + 'static,
    ) -> Result<Pump> {
        let watch: Arc<dyn QueueWatch> = queue.clone();
        self.alloc(
            PumpKind::QueuePop,
            Source::Queue {
                watch,
                direction: Direction::Pop,
            },
            Box::new(callback),
        )
    }

    /// Fire while `queue` has room for at least one value.
    pub fn alloc_queue_push<Q: QueueWatch + 'static>(
        &self,
        queue: &Arc<Q>,
        callback: impl FnMut(&PumpManager, PumpId) + 'static,
    ) -> Result<Pump> {
        let watch: Arc<dyn QueueWatch> = queue.clone();
        self.alloc(
            PumpKind::QueuePush,
            Source::Queue {
                watch,
                direction: Direction::Push,
            },
            Box::new(callback),
        )
    }

    /// A non-owning reference to a live pump.
    pub fn pump_ref(&self, id: PumpId) -> Option<PumpRef> {
        let kind = self.shared.borrow().entry(id)?.kind;
        Some(PumpRef::new(Rc::downgrade(&self.shared), id, kind))
    }

    /// Arm a pump. Idempotent; stale ids are ignored.
    pub fn start(&self, id: PumpId) -> Result<()> {
        self.shared.borrow_mut().start(id)
    }

    /// Disarm a pump. Idempotent; stale ids are ignored.
    pub fn stop(&self, id: PumpId) -> Result<()> {
        self.shared.borrow_mut().stop(id)
    }

    /// Stop and release a pump. Stale ids are ignored.
    pub fn free(&self, id: PumpId) {
        let entry = self.shared.borrow_mut().remove(id);
        if entry.is_some() {
            tracing::trace!(?id, "pump freed");
        }
        drop(entry);
    }

    /// Whether a pump is armed.
    pub fn is_started(&self, id: PumpId) -> bool {
        self.shared
            .borrow()
            .entry(id)
            .is_some_and(|entry| entry.started)
    }

    /// Set whether a pump keeps [`run`](Self::run) from returning.
    pub fn set_blocker(&self, id: PumpId, blocker: bool) {
        let mut state = self.shared.borrow_mut();
        if let Some(entry) = LoopState::lookup(&mut state.slots, id) {
            entry.blocker = blocker;
        }
    }

    /// Whether a pump keeps the loop alive while started.
    pub fn is_blocker(&self, id: PumpId) -> bool {
        self.shared
            .borrow()
            .entry(id)
            .is_some_and(|entry| entry.blocker)
    }

    /// Number of pumps allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.shared.borrow().entries().count()
    }

    /// Counters since creation.
    pub fn stats(&self) -> LoopStats {
        self.shared.borrow().stats
    }

    /// Ask the running loop to return [`RunStatus::Quit`].
    ///
    /// A request made while the loop is not running is consumed by the
    /// next [`run`](Self::run).
    pub fn quit(&self) {
        self.quit_handle().quit();
    }

    /// A thread-safe handle that stops this loop.
    pub fn quit_handle(&self) -> QuitHandle {
        let state = self.shared.borrow();
        QuitHandle {
            flag: state.quit.clone(),
            waker: state.waker.clone(),
        }
    }

    /// Run the loop until no started blocker pump remains, quit is
    /// requested, or `deadline` passes.
    ///
    /// Returns [`Error::Busy`] if called from inside a callback of the same
    /// loop.
    pub fn run(&self, deadline: Option<Instant>) -> Result<RunStatus> {
        let (span, quit) = {
            let mut state = self.shared.try_borrow_mut().map_err(|_| Error::Busy)?;
            if state.running {
                return Err(Error::Busy);
            }
            state.running = true;
            let span = if state.config.tracing.loop_spans {
                span_loop(&state.config.name)
            } else {
                Span::none()
            };
            (span, state.quit.clone())
        };
        let _running = RunningGuard {
            shared: &self.shared,
        };
        let _entered = span.enter();
        tracing::debug!("loop running");

        let mut ready: Vec<Token> = Vec::new();
        let mut batch: SmallVec<[PumpId; 16]> = SmallVec::new();
        let status = loop {
            batch.clear();
            {
                let mut state = self.shared.borrow_mut();
                if quit.swap(false, Ordering::AcqRel) {
                    break RunStatus::Quit;
                }
                if !state.has_active_blocker() {
                    break RunStatus::Drained;
                }
                let now = Instant::now();
                if deadline.is_some_and(|d| now >= d) {
                    break RunStatus::DeadlineElapsed;
                }

                let timeout = state.next_timeout(now, deadline);
                ready.clear();
                state.backend.wait(timeout, &mut ready)?;
                state.stats.iterations += 1;

                for &token in &ready {
                    if token == QUIT_TOKEN {
                        state.drain_waker();
                    } else {
                        batch.push(PumpId::from_token(token));
                    }
                }
                state.collect_due_timers(Instant::now(), &mut batch);
                if batch.is_empty() {
                    state.collect_idle(&mut batch);
                }
            }

            for &id in &batch {
                if quit.load(Ordering::Acquire) {
                    break;
                }
                self.dispatch(id);
            }
        };

        tracing::debug!(?status, "loop finished");
        Ok(status)
    }

    /// Run for at most `timeout`.
    pub fn run_for(&self, timeout: Duration) -> Result<RunStatus> {
        self.run(Some(Instant::now() + timeout))
    }

    fn dispatch(&self, id: PumpId) {
        let prepared = self.shared.borrow_mut().prepare(id);
        let Some((mut callback, span)) = prepared else {
            return;
        };

        span.in_scope(|| callback(self, id));

        let leftover = self.shared.borrow_mut().restore(id, callback);
        drop(leftover);
    }
}

impl fmt::Debug for PumpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.try_borrow() {
            Ok(state) => f
                .debug_struct("PumpManager")
                .field("name", &state.config.name)
                .field("backend", &state.backend.name())
                .field("outstanding", &state.entries().count())
                .finish(),
            Err(_) => f.debug_struct("PumpManager").finish_non_exhaustive(),
        }
    }
}

struct RunningGuard<'a> {
    shared: &'a LoopShared,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.try_borrow_mut() {
            state.running = false;
        }
    }
}

/// Stops a [`PumpManager`] from any thread.
#[derive(Clone)]
pub struct QuitHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Notifier>,
}

impl QuitHandle {
    /// Request the loop to return [`RunStatus::Quit`].
    pub fn quit(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.notify() {
            tracing::warn!("failed to wake loop for quit: {}", e);
        }
    }
}

impl fmt::Debug for QuitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuitHandle")
            .field("requested", &self.flag.load(Ordering::Relaxed))
            .finish()
    }
}
