//! Pipes: refcounted dataflow nodes.
//!
//! A [`Pipe`] is one node of a processing graph. It receives buffers
//! through [`Pipe::input`], forwards them through at most one output link,
//! accepts control commands gated by its kind's [`Signature`], and reports
//! events up its own probe chain.
//!
//! ```text
//!            ┌────────────┐  link   ┌────────────┐  link   ┌──────────┐
//!  pump ───> │   source   │ ──────> │   relay    │ ──────> │   sink   │
//!            └─────┬──────┘         └─────┬──────┘         └────┬─────┘
//!                  │ throw                │ throw               │ throw
//!                  ▼                      ▼                     ▼
//!               probes                 probes                probes
//! ```
//!
//! # Lifecycle
//!
//! `Allocated → Linked → {Receiving, Blocked} → Released`
//!
//! Cloning a pipe takes a reference; dropping the last reference releases
//! it: [`Event::Dead`] is thrown, the kind's `free` runs, and the output
//! link and probe chain are released. The link graph must stay acyclic;
//! a pipe reachable from its own output is never released.
//!
//! # Backpressure
//!
//! A bounded node that cannot take an input returns [`Error::Blocked`]
//! with the rejected buffer and stops the upstream pump it was given,
//! restarting it once it has room again.

mod control;
mod manager;
mod throttle;

pub use control::{Control, LOCAL_BASE, opcode};
pub use manager::{Manager, PipeKind};
pub use throttle::Throttle;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::observability::{span_pipe, trace_buffer_forwarded};
use crate::probe::{self, Event, FlowDef, Probe, Thrown};
use crate::pump::{PumpManager, PumpRef};
use crate::signature::Signature;
use manager::{ManagerShared, Node};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::Span;

/// Where a pipe is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Allocated, no output linked, no input seen.
    Allocated,
    /// Output linked, no input seen.
    Linked,
    /// Has accepted input.
    Receiving,
    /// Full, or blocked by [`Control::Block`].
    Blocked,
    /// Torn down, or cut off after an unclaimed fatal event.
    Released,
}

/// The output link of a pipe: the downstream pipe and the probe chain
/// used for events about that link.
#[derive(Debug, Clone, Default)]
pub struct Link {
    /// Downstream pipe.
    pub pipe: Option<Pipe>,
    /// Probe for events concerning the link.
    pub probe: Option<Probe>,
}

pub(crate) struct PipeCell {
    shared: Rc<ManagerShared>,
    name: String,
    probe: RefCell<Option<Probe>>,
    link: RefCell<Link>,
    uri: RefCell<Option<String>>,
    flow_def: RefCell<Option<FlowDef>>,
    pump_manager: RefCell<Option<PumpManager>>,
    node: RefCell<Box<dyn Node>>,
    blocked: Cell<bool>,
    gate: RefCell<Option<Throttle>>,
    received: Cell<bool>,
    released: Cell<bool>,
    ready: Cell<bool>,
    dead: Cell<bool>,
}

impl PipeCell {
    fn new(
        shared: Rc<ManagerShared>,
        name: String,
        probe: Option<Probe>,
        node: Box<dyn Node>,
    ) -> Self {
        Self {
            shared,
            name,
            probe: RefCell::new(probe),
            link: RefCell::new(Link::default()),
            uri: RefCell::new(None),
            flow_def: RefCell::new(None),
            pump_manager: RefCell::new(None),
            node: RefCell::new(node),
            blocked: Cell::new(false),
            gate: RefCell::new(None),
            received: Cell::new(false),
            released: Cell::new(false),
            ready: Cell::new(false),
            dead: Cell::new(false),
        }
    }
}

/// A refcounted handle to a dataflow node.
///
/// Pipes are confined to the thread of the loop driving them.
pub struct Pipe(Rc<PipeCell>);

impl Pipe {
    fn from_cell(cell: PipeCell) -> Self {
        Self(Rc::new(cell))
    }

    /// Instance name, e.g. `relay#2`.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Signature of this pipe's kind.
    pub fn signature(&self) -> Signature {
        self.0.shared.signature
    }

    /// Name of this pipe's kind.
    pub fn kind_name(&self) -> &'static str {
        self.0.shared.name
    }

    /// Number of references to this pipe.
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// A non-owning handle.
    pub fn downgrade(&self) -> WeakPipe {
        WeakPipe(Rc::downgrade(&self.0))
    }

    /// Check if both handles are the same pipe.
    pub fn ptr_eq(&self, other: &Pipe) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipeState {
        if self.0.released.get() {
            PipeState::Released
        } else if self.is_blocked() {
            PipeState::Blocked
        } else if self.0.received.get() {
            PipeState::Receiving
        } else if self.0.link.borrow().pipe.is_some() {
            PipeState::Linked
        } else {
            PipeState::Allocated
        }
    }

    /// Check if the pipe is blocked.
    pub fn is_blocked(&self) -> bool {
        self.0.blocked.get() || self.0.gate.borrow().is_some()
    }

    /// Mark the pipe blocked or unblocked. Nodes call this as their bound
    /// fills and drains.
    pub fn set_blocked(&self, blocked: bool) {
        if self.0.blocked.replace(blocked) != blocked {
            tracing::trace!(pipe = %self.name(), blocked, "pipe block state changed");
        }
    }

    /// Close the gate in front of the node: inputs are handed back with
    /// [`Error::Blocked`] and their upstream pumps held until
    /// [`open_gate`](Self::open_gate).
    pub(crate) fn close_gate(&self) {
        let mut gate = self.0.gate.borrow_mut();
        if gate.is_none() {
            tracing::trace!(pipe = %self.name(), "input gate closed");
            *gate = Some(Throttle::new());
        }
    }

    /// Reopen the gate, restarting every upstream pump it held.
    pub(crate) fn open_gate(&self) -> Result<()> {
        let gate = self.0.gate.borrow_mut().take();
        match gate {
            Some(mut throttle) => {
                let restarted = throttle.release()?;
                tracing::trace!(pipe = %self.name(), restarted, "input gate opened");
                Ok(())
            }
            None => Ok(()),
        }
    }

    // ========================================================================
    // Data path
    // ========================================================================

    /// Deliver one buffer to this pipe.
    ///
    /// `pump` is the upstream pump that produced it, if any.
    pub fn input(&self, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()> {
        if self.0.released.get() {
            return Err(Error::Released);
        }

        let span = if self.0.shared.pipe_spans {
            span_pipe(&self.0.name, self.signature())
        } else {
            Span::none()
        };
        let _entered = span.enter();

        if let Some(gate) = self.0.gate.borrow_mut().as_mut() {
            gate.hold(pump)?;
            return Err(Error::Blocked(buffer));
        }

        let mut node = self.0.node.try_borrow_mut().map_err(|_| Error::Busy)?;
        self.0.received.set(true);
        node.input(self, buffer, pump)
    }

    /// Forward a buffer through the output link.
    ///
    /// Without a link, [`Event::NeedOutput`] is thrown first so a probe can
    /// provide one; [`Error::NoOutput`] if none does.
    pub fn output(&self, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()> {
        let downstream = match self.output_pipe() {
            Some(pipe) => pipe,
            None => {
                let flow_def = self.flow_def();
                self.throw(&mut Event::NeedOutput(flow_def.as_ref()));
                self.output_pipe().ok_or(Error::NoOutput)?
            }
        };

        trace_buffer_forwarded(self.name(), downstream.name(), buffer.len(), buffer.sequence());
        downstream.input(buffer, pump)
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Apply a control command meant for pipes of kind `signature`.
    ///
    /// A mismatching signature is rejected before anything else happens.
    /// Standard commands the node leaves unhandled get generic handling.
    pub fn control(&self, signature: Signature, command: &mut Control<'_>) -> Result<()> {
        let expected = self.signature();
        if signature != expected {
            tracing::debug!(
                pipe = %self.name(),
                opcode = command.opcode(),
                "control rejected: signature {} != {}",
                signature,
                expected
            );
            return Err(Error::SignatureMismatch {
                expected,
                actual: signature,
            });
        }
        if self.0.released.get() {
            return Err(Error::Released);
        }

        let handled = {
            let mut node = self.0.node.try_borrow_mut().map_err(|_| Error::Busy)?;
            node.control(self, command)
        };
        match handled {
            Err(Error::Unhandled) => control::fallback(self, command),
            other => other,
        }
    }

    /// Run `f` on the node state, provided this pipe is of kind `K`.
    pub fn with_node<K: PipeKind, R>(&self, f: impl FnOnce(&mut K, &Pipe) -> R) -> Result<R> {
        let expected = self.signature();
        if expected != K::SIGNATURE {
            return Err(Error::SignatureMismatch {
                expected,
                actual: K::SIGNATURE,
            });
        }

        let mut node = self.0.node.try_borrow_mut().map_err(|_| Error::Busy)?;
        match node.as_any_mut().downcast_mut::<K>() {
            Some(node) => Ok(f(node, self)),
            None => Err(Error::invalid(format!(
                "pipe {} is not a {}",
                self.name(),
                K::NAME
            ))),
        }
    }

    fn init_node(&self) -> Result<()> {
        let mut node = self.0.node.try_borrow_mut().map_err(|_| Error::Busy)?;
        node.init(self)
    }

    fn announce_ready(&self) {
        self.0.ready.set(true);
        self.throw(&mut Event::Ready);
    }

    // ========================================================================
    // Link and attributes
    // ========================================================================

    /// The downstream pipe.
    pub fn output_pipe(&self) -> Option<Pipe> {
        self.0.link.borrow().pipe.clone()
    }

    /// Link (or unlink) the downstream pipe. The previous one is released.
    pub fn set_output(&self, output: Option<Pipe>) {
        let previous = std::mem::replace(&mut self.0.link.borrow_mut().pipe, output);
        drop(previous);
    }

    /// The probe attached to the output link.
    pub fn output_probe(&self) -> Option<Probe> {
        self.0.link.borrow().probe.clone()
    }

    /// Replace the probe attached to the output link.
    pub fn set_output_probe(&self, probe: Option<Probe>) {
        let previous = std::mem::replace(&mut self.0.link.borrow_mut().probe, probe);
        drop(previous);
    }

    /// A copy of the whole output link.
    pub fn link(&self) -> Link {
        self.0.link.borrow().clone()
    }

    /// This pipe's own probe chain.
    pub fn probe(&self) -> Option<Probe> {
        self.0.probe.borrow().clone()
    }

    /// The URI, for pipes that have one.
    pub fn uri(&self) -> Option<String> {
        self.0.uri.borrow().clone()
    }

    /// Replace the URI.
    pub fn set_uri(&self, uri: Option<String>) {
        *self.0.uri.borrow_mut() = uri;
    }

    /// The output flow definition.
    pub fn flow_def(&self) -> Option<FlowDef> {
        self.0.flow_def.borrow().clone()
    }

    /// Replace the output flow definition and announce it.
    pub fn set_flow_def(&self, flow_def: FlowDef) {
        *self.0.flow_def.borrow_mut() = Some(flow_def.clone());
        self.throw(&mut Event::NewFlowDef(&flow_def));
    }

    /// The pump manager this pipe allocates pumps from.
    ///
    /// Asked of the probe chain through [`Event::NeedPumpManager`] on first
    /// use, then cached.
    pub fn pump_manager(&self) -> Result<PumpManager> {
        let cached = self.0.pump_manager.borrow().clone();
        if let Some(mgr) = cached {
            return Ok(mgr);
        }

        let mut event = Event::NeedPumpManager(None);
        self.throw(&mut event);
        match event {
            Event::NeedPumpManager(Some(mgr)) => {
                *self.0.pump_manager.borrow_mut() = Some(mgr.clone());
                Ok(mgr)
            }
            _ => Err(Error::invalid(format!(
                "{}: no probe provided a pump manager",
                self.name()
            ))),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Throw an event up this pipe's probe chain.
    pub fn throw(&self, event: &mut Event<'_>) -> Thrown {
        let chain = self.probe();
        probe::throw(chain.as_ref(), Some(self), event)
    }

    /// Throw an event concerning the output link, through the link's probe
    /// if one is set, else through the pipe's own chain.
    pub fn throw_output(&self, event: &mut Event<'_>) -> Thrown {
        let chain = self.output_probe().or_else(|| self.probe());
        probe::throw(chain.as_ref(), Some(self), event)
    }

    /// Throw an error event.
    pub fn throw_error(&self, error: &Error) -> Thrown {
        self.throw(&mut Event::Error(error))
    }

    /// Throw a fatal event. If nobody claims it, the pipe cuts off its
    /// subtree: the output link is released and further input is refused.
    pub fn throw_fatal(&self, error: &Error) -> Thrown {
        let thrown = self.throw(&mut Event::Fatal(error));
        if thrown == Thrown::Unclaimed {
            self.terminate();
        }
        thrown
    }

    fn terminate(&self) {
        if self.0.released.replace(true) {
            return;
        }
        tracing::warn!(pipe = %self.name(), "unclaimed fatal event, releasing subtree");
        let link = self.0.link.take();
        drop(link);
    }

    fn teardown(&self) {
        if self.0.dead.replace(true) {
            return;
        }

        // A pipe whose init failed was never announced.
        if self.0.ready.get() {
            self.throw(&mut Event::Dead);
        }
        match self.0.node.try_borrow_mut() {
            Ok(mut node) => node.free(self),
            Err(_) => tracing::warn!(pipe = %self.name(), "pipe released while busy"),
        }
        self.0.released.set(true);

        let link = self.0.link.take();
        let probe = self.0.probe.take();
        let pump_manager = self.0.pump_manager.take();
        self.0.shared.pipe_released();
        tracing::debug!(pipe = %self.name(), "pipe released");

        drop((link, probe, pump_manager));
    }
}

impl Clone for Pipe {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if Rc::strong_count(&self.0) == 1 {
            self.teardown();
        }
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("name", &self.0.name)
            .field("signature", &self.signature())
            .field("blocked", &self.is_blocked())
            .field("released", &self.0.released.get())
            .finish()
    }
}

/// A non-owning pipe handle, for pump callbacks and other back-references.
#[derive(Clone)]
pub struct WeakPipe(Weak<PipeCell>);

impl WeakPipe {
    /// Take a reference, if the pipe is still alive.
    pub fn upgrade(&self) -> Option<Pipe> {
        self.0.upgrade().map(Pipe)
    }
}

impl fmt::Debug for WeakPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(pipe) => write!(f, "WeakPipe({})", pipe.name()),
            None => f.write_str("WeakPipe(<released>)"),
        }
    }
}
