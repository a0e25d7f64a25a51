//! Events carried up probe chains.

use crate::error::Error;
use crate::pump::PumpManager;
use crate::signature::Signature;
use std::any::Any;
use std::fmt;
use tracing::Level;

/// Definition of the data flowing out of a pipe (e.g. `"block.mpegts."`).
///
/// Opaque to the runtime; nodes compare and forward it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowDef(String);

impl FlowDef {
    /// Create a flow definition.
    pub fn new(def: impl Into<String>) -> Self {
        Self(def.into())
    }

    /// Get the definition string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this definition starts with `prefix`.
    pub fn matches(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for FlowDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowDef {
    fn from(def: &str) -> Self {
        Self::new(def)
    }
}

/// An event thrown by a pipe, or by code driving pumps, up a probe chain.
///
/// Handlers receive `&mut Event` so that request-style events
/// ([`Event::NeedPumpManager`]) can be answered in place.
pub enum Event<'a> {
    /// The pipe finished allocation and is usable.
    Ready,
    /// The pipe is being torn down.
    Dead,
    /// A source pipe has no more data.
    SourceEnd,
    /// A sink pipe will accept no more data.
    SinkEnd,
    /// The pipe's output flow definition changed.
    NewFlowDef(&'a FlowDef),
    /// The pipe has data but no output link. A handler may link one.
    NeedOutput(Option<&'a FlowDef>),
    /// The pipe needs a pump manager for I/O. A handler fills the slot.
    NeedPumpManager(Option<PumpManager>),
    /// A log line for presentation.
    Log {
        /// Severity.
        level: Level,
        /// Rendered message.
        message: &'a str,
    },
    /// A non-fatal condition worth reporting.
    Warning(&'a str),
    /// A recoverable error, e.g. an I/O failure in a pump callback.
    Error(&'a Error),
    /// An unrecoverable node condition. Unclaimed, it tears down the
    /// throwing pipe's subtree.
    Fatal(&'a Error),
    /// A node-specific event, tagged with the signature of the node kind
    /// that defines `kind` and the payload type.
    Custom {
        /// Signature of the defining node kind.
        signature: Signature,
        /// Event number within that kind.
        kind: u32,
        /// Kind-specific payload.
        payload: &'a dyn Any,
    },
}

impl<'a> Event<'a> {
    /// Get a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::Dead => "dead",
            Event::SourceEnd => "source-end",
            Event::SinkEnd => "sink-end",
            Event::NewFlowDef(_) => "new-flow-def",
            Event::NeedOutput(_) => "need-output",
            Event::NeedPumpManager(_) => "need-pump-manager",
            Event::Log { .. } => "log",
            Event::Warning(_) => "warning",
            Event::Error(_) => "error",
            Event::Fatal(_) => "fatal",
            Event::Custom { .. } => "custom",
        }
    }

    /// Check if this event must not go unclaimed.
    pub fn is_critical(&self) -> bool {
        matches!(self, Event::Fatal(_))
    }

    /// Build a custom event.
    pub fn custom(signature: Signature, kind: u32, payload: &'a dyn Any) -> Self {
        Event::Custom {
            signature,
            kind,
            payload,
        }
    }

    /// Read a custom event's payload, provided it was defined by the node
    /// kind `signature` with event number `kind` and carries a `T`.
    ///
    /// Keeps a handler written for one node kind from misreading another
    /// kind's payload.
    pub fn custom_payload<T: 'static>(&self, signature: Signature, kind: u32) -> Option<&'a T> {
        match *self {
            Event::Custom {
                signature: s,
                kind: k,
                payload,
            } if s == signature && k == kind => payload.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NewFlowDef(def) => f.debug_tuple("NewFlowDef").field(def).finish(),
            Event::NeedOutput(def) => f.debug_tuple("NeedOutput").field(def).finish(),
            Event::NeedPumpManager(mgr) => f
                .debug_tuple("NeedPumpManager")
                .field(&mgr.is_some())
                .finish(),
            Event::Log { level, message } => f
                .debug_struct("Log")
                .field("level", level)
                .field("message", message)
                .finish(),
            Event::Warning(msg) => f.debug_tuple("Warning").field(msg).finish(),
            Event::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Event::Fatal(err) => f.debug_tuple("Fatal").field(err).finish(),
            Event::Custom {
                signature, kind, ..
            } => f
                .debug_struct("Custom")
                .field("signature", signature)
                .field("kind", kind)
                .finish_non_exhaustive(),
            other => f.write_str(other.name()),
        }
    }
}
