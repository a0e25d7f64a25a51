//! Node kinds and the managers that allocate them.

use super::control::Control;
use super::{Pipe, PipeCell};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::observability::TracingConfig;
use crate::probe::Probe;
use crate::pump::PumpRef;
use crate::signature::Signature;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A node kind: the operation table shared by all pipes of one kind.
///
/// The pipe core owns linking, refcounting and probe plumbing; a kind only
/// implements what its nodes do with data and commands.
pub trait PipeKind: Sized + 'static {
    /// Type tag checked by [`Pipe::control`].
    const SIGNATURE: Signature;

    /// Kind name, used as the prefix of pipe names.
    const NAME: &'static str;

    /// Settings shared by every pipe of the manager.
    type Config: 'static;

    /// Per-pipe allocation arguments.
    type Args;

    /// Construct the node state.
    fn alloc(config: &Self::Config, args: Self::Args) -> Result<Self>;

    /// Finish setup once the pipe exists (allocate pumps, query probes).
    fn init(&mut self, _pipe: &Pipe) -> Result<()> {
        Ok(())
    }

    /// Handle one buffer.
    ///
    /// `pump` is the upstream pump that produced the buffer, if any; a node
    /// that cannot keep up stops it and restarts it once it has room.
    fn input(&mut self, pipe: &Pipe, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()>;

    /// Handle a control command. Returning [`Error::Unhandled`] lets the
    /// pipe apply generic handling.
    fn control(&mut self, _pipe: &Pipe, _command: &mut Control<'_>) -> Result<()> {
        Err(Error::Unhandled)
    }

    /// Release node resources. Runs once, on the last release of the pipe.
    fn free(&mut self, _pipe: &Pipe) {}
}

/// Object-safe view of a [`PipeKind`] stored inside a pipe.
pub(super) trait Node {
    fn init(&mut self, pipe: &Pipe) -> Result<()>;
    fn input(&mut self, pipe: &Pipe, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()>;
    fn control(&mut self, pipe: &Pipe, command: &mut Control<'_>) -> Result<()>;
    fn free(&mut self, pipe: &Pipe);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K: PipeKind> Node for K {
    fn init(&mut self, pipe: &Pipe) -> Result<()> {
        PipeKind::init(self, pipe)
    }

    fn input(&mut self, pipe: &Pipe, buffer: Buffer, pump: Option<&PumpRef>) -> Result<()> {
        PipeKind::input(self, pipe, buffer, pump)
    }

    fn control(&mut self, pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
        PipeKind::control(self, pipe, command)
    }

    fn free(&mut self, pipe: &Pipe) {
        PipeKind::free(self, pipe)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// State shared between a manager and every pipe it allocated.
///
/// Pipes hold a strong reference, so the kind's identity and counters stay
/// valid until the last of them is released.
pub(super) struct ManagerShared {
    pub(super) signature: Signature,
    pub(super) name: &'static str,
    pub(super) pipe_spans: bool,
    allocated: Cell<u64>,
    outstanding: Cell<usize>,
}

impl ManagerShared {
    pub(super) fn pipe_released(&self) {
        self.outstanding.set(self.outstanding.get().saturating_sub(1));
    }
}

/// Factory for pipes of kind `K`.
///
/// Cloning takes a reference. Dropping every manager handle while pipes
/// are outstanding is fine: the pipes keep what they need.
pub struct Manager<K: PipeKind> {
    shared: Rc<ManagerShared>,
    config: Rc<K::Config>,
}

impl<K: PipeKind> Manager<K> {
    /// Create a manager with `config` shared by all its pipes.
    pub fn new(config: K::Config) -> Self {
        Self::with_tracing(config, &TracingConfig::default())
    }

    /// Create a manager following a loop's tracing settings, typically
    /// `&loop_config.tracing`. With `pipe_spans` set, its pipes enter a
    /// span on each input.
    pub fn with_tracing(config: K::Config, tracing: &TracingConfig) -> Self {
        Self {
            shared: Rc::new(ManagerShared {
                signature: K::SIGNATURE,
                name: K::NAME,
                pipe_spans: tracing.pipe_spans,
                allocated: Cell::new(0),
                outstanding: Cell::new(0),
            }),
            config: Rc::new(config),
        }
    }

    /// The kind's signature.
    pub fn signature(&self) -> Signature {
        self.shared.signature
    }

    /// The kind's name.
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Shared configuration.
    pub fn config(&self) -> &K::Config {
        &self.config
    }

    /// Pipes allocated and not yet released.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.get()
    }

    /// Allocate a pipe reporting to `probe`, named after the kind.
    pub fn alloc(&self, probe: Option<Probe>, args: K::Args) -> Result<Pipe> {
        let index = self.shared.allocated.get() + 1;
        self.alloc_named(format!("{}#{}", K::NAME, index), probe, args)
    }

    /// Allocate a pipe with an explicit name.
    pub fn alloc_named(
        &self,
        name: impl Into<String>,
        probe: Option<Probe>,
        args: K::Args,
    ) -> Result<Pipe> {
        let node = K::alloc(&self.config, args)?;
        self.shared.allocated.set(self.shared.allocated.get() + 1);
        self.shared.outstanding.set(self.shared.outstanding.get() + 1);

        let pipe = Pipe::from_cell(PipeCell::new(
            self.shared.clone(),
            name.into(),
            probe,
            Box::new(node),
        ));
        tracing::debug!(pipe = %pipe.name(), signature = %K::SIGNATURE, "pipe allocated");

        // On failure the pipe is dropped here, which runs the normal teardown.
        pipe.init_node()?;
        pipe.announce_ready();
        Ok(pipe)
    }
}

impl<K: PipeKind> Clone for Manager<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            config: self.config.clone(),
        }
    }
}

impl<K: PipeKind> fmt::Debug for Manager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("name", &self.shared.name)
            .field("signature", &self.shared.signature)
            .field("outstanding", &self.shared.outstanding.get())
            .finish()
    }
}
