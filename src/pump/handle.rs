//! Owning and non-owning pump handles.

use super::manager::{LoopShared, PumpManager};
use super::{PumpId, PumpKind};
use crate::error::Result;
use std::fmt;
use std::rc::Weak;

/// Non-owning reference to a pump.
///
/// Holds the manager weakly; once the manager or the pump is gone every
/// operation is a no-op. This is what callbacks and pipes keep around to
/// start or stop a pump they do not own.
#[derive(Clone)]
pub struct PumpRef {
    shared: Weak<LoopShared>,
    id: PumpId,
    kind: PumpKind,
}

impl PumpRef {
    pub(crate) fn new(shared: Weak<LoopShared>, id: PumpId, kind: PumpKind) -> Self {
        Self { shared, id, kind }
    }

    /// Id of the referenced pump.
    pub fn id(&self) -> PumpId {
        self.id
    }

    /// Kind of the referenced pump.
    pub fn kind(&self) -> PumpKind {
        self.kind
    }

    /// The manager owning this pump, if it is still alive.
    pub fn manager(&self) -> Option<PumpManager> {
        self.shared.upgrade().map(PumpManager::from_shared)
    }

    /// Arm the pump. Idempotent.
    pub fn start(&self) -> Result<()> {
        match self.manager() {
            Some(mgr) => mgr.start(self.id),
            None => Ok(()),
        }
    }

    /// Disarm the pump. Idempotent.
    pub fn stop(&self) -> Result<()> {
        match self.manager() {
            Some(mgr) => mgr.stop(self.id),
            None => Ok(()),
        }
    }

    /// Whether the pump is currently armed.
    pub fn is_started(&self) -> bool {
        self.manager().is_some_and(|mgr| mgr.is_started(self.id))
    }

    /// Set whether this pump keeps [`PumpManager::run`] from returning.
    pub fn set_blocker(&self, blocker: bool) {
        if let Some(mgr) = self.manager() {
            mgr.set_blocker(self.id, blocker);
        }
    }

    /// Whether this pump keeps the loop alive while started.
    pub fn is_blocker(&self) -> bool {
        self.manager().is_some_and(|mgr| mgr.is_blocker(self.id))
    }
}

impl PartialEq for PumpRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for PumpRef {}

impl fmt::Debug for PumpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpRef")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Owning pump handle. Dropping it frees the pump.
///
/// Freeing a started pump stops it first. Freeing is safe from inside any
/// callback, including the pump's own.
pub struct Pump {
    handle: PumpRef,
}

impl Pump {
    pub(crate) fn new(handle: PumpRef) -> Self {
        Self { handle }
    }

    /// Id of this pump.
    pub fn id(&self) -> PumpId {
        self.handle.id
    }

    /// Kind of this pump.
    pub fn kind(&self) -> PumpKind {
        self.handle.kind
    }

    /// A non-owning reference to this pump.
    pub fn to_ref(&self) -> PumpRef {
        self.handle.clone()
    }

    /// Arm the pump. Idempotent.
    pub fn start(&self) -> Result<()> {
        self.handle.start()
    }

    /// Disarm the pump. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.handle.stop()
    }

    /// Whether the pump is currently armed.
    pub fn is_started(&self) -> bool {
        self.handle.is_started()
    }

    /// Set whether this pump keeps [`PumpManager::run`] from returning.
    pub fn set_blocker(&self, blocker: bool) {
        self.handle.set_blocker(blocker);
    }

    /// Whether this pump keeps the loop alive while started.
    pub fn is_blocker(&self) -> bool {
        self.handle.is_blocker()
    }

    /// Free the pump now.
    pub fn free(self) {
        drop(self);
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        if let Some(mgr) = self.handle.manager() {
            mgr.free(self.handle.id);
        }
    }
}

impl fmt::Debug for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("id", &self.handle.id)
            .field("kind", &self.handle.kind)
            .finish()
    }
}
