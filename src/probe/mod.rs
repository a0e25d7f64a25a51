//! Probes: chains of event handlers.
//!
//! Pipes report lifecycle transitions, flow changes, errors and custom
//! events by throwing an [`Event`] up their probe chain. Each link either
//! claims the event, stopping propagation, or forwards it to the next link.
//!
//! ```text
//!   pipe ──throw──> [log] ──forward──> [pump mgr] ──forward──> [app] ──> unclaimed
//!                                          │
//!                                       claimed
//! ```
//!
//! Chains are built by prepending: a new probe takes a reference on the
//! chain it forwards to and releases it when freed.
//!
//! # Example
//!
//! ```rust
//! use pipeflow::probe::{Event, LogProbe, Outcome, Probe, Thrown};
//!
//! let app = Probe::from_fn(
//!     |_, event| match event {
//!         Event::SourceEnd => Outcome::Claimed,
//!         _ => Outcome::Forward,
//!     },
//!     None,
//! );
//! let chain = Probe::new(LogProbe::default(), Some(app));
//!
//! assert_eq!(chain.throw(None, &mut Event::SourceEnd), Thrown::Claimed);
//! assert_eq!(chain.throw(None, &mut Event::Ready), Thrown::Unclaimed);
//! ```

mod event;
mod handlers;

pub use event::{Event, FlowDef};
pub use handlers::{CatchAllProbe, FnProbe, LogProbe, PumpManagerProbe};

use crate::observability::trace_unclaimed;
use crate::pipe::Pipe;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// What a single handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was handled; propagation stops.
    Claimed,
    /// Pass the event to the next link.
    Forward,
}

/// What a whole chain did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thrown {
    /// Some link claimed the event.
    Claimed,
    /// The event fell off the end of the chain.
    Unclaimed,
}

impl Thrown {
    /// Check if the event was claimed.
    pub fn is_claimed(&self) -> bool {
        matches!(self, Thrown::Claimed)
    }
}

/// An event handler in a probe chain.
pub trait ProbeHandler {
    /// Handle `event`, thrown by `pipe` (if any).
    fn handle(&self, pipe: Option<&Pipe>, event: &mut Event<'_>) -> Outcome;

    /// Name for logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

struct ProbeNode {
    handler: Box<dyn ProbeHandler>,
    next: Option<Probe>,
    data: Option<Rc<dyn Any>>,
}

impl Drop for ProbeNode {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse.
        let mut next = self.next.take();
        while let Some(probe) = next {
            next = match Rc::try_unwrap(probe.0) {
                Ok(mut node) => node.next.take(),
                Err(_) => None,
            };
        }
    }
}

/// A link in a probe chain.
///
/// Cloning takes a reference; the link and everything after it are
/// released when the last reference is dropped.
#[derive(Clone)]
pub struct Probe(Rc<ProbeNode>);

impl Probe {
    /// Prepend `handler` to the chain `next`.
    pub fn new(handler: impl ProbeHandler + 'static, next: Option<Probe>) -> Self {
        Self(Rc::new(ProbeNode {
            handler: Box::new(handler),
            next,
            data: None,
        }))
    }

    /// Prepend a closure handler to the chain `next`.
    pub fn from_fn<F>(handler: F, next: Option<Probe>) -> Self
    where
        F: Fn(Option<&Pipe>, &mut Event<'_>) -> Outcome + 'static,
    {
        Self::new(FnProbe::new(handler), next)
    }

    /// Prepend `handler`, attaching shared data released with this link.
    pub fn with_data(
        handler: impl ProbeHandler + 'static,
        next: Option<Probe>,
        data: Rc<dyn Any>,
    ) -> Self {
        Self(Rc::new(ProbeNode {
            handler: Box::new(handler),
            next,
            data: Some(data),
        }))
    }

    /// The next link, if any.
    pub fn next(&self) -> Option<&Probe> {
        self.0.next.as_ref()
    }

    /// Data attached to this link.
    pub fn data(&self) -> Option<&Rc<dyn Any>> {
        self.0.data.as_ref()
    }

    /// Data attached to this link, if it is a `T`.
    pub fn data_as<T: 'static>(&self) -> Option<&T> {
        self.0.data.as_ref().and_then(|data| data.downcast_ref::<T>())
    }

    /// Name of this link's handler.
    pub fn name(&self) -> &str {
        self.0.handler.name()
    }

    /// Number of links from here to the end of the chain.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always false: a probe is at least one link.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over the links from here to the end of the chain.
    pub fn iter(&self) -> impl Iterator<Item = &Probe> {
        std::iter::successors(Some(self), |probe| probe.next())
    }

    /// Check if both handles are the same link.
    pub fn ptr_eq(&self, other: &Probe) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Walk the chain until a link claims `event`.
    pub fn throw(&self, pipe: Option<&Pipe>, event: &mut Event<'_>) -> Thrown {
        for probe in self.iter() {
            if probe.0.handler.handle(pipe, event) == Outcome::Claimed {
                return Thrown::Claimed;
            }
        }
        Thrown::Unclaimed
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|probe| probe.name()))
            .finish()
    }
}

/// Throw `event` up an optional chain, logging it if nobody claims it.
pub fn throw(chain: Option<&Probe>, pipe: Option<&Pipe>, event: &mut Event<'_>) -> Thrown {
    let thrown = match chain {
        Some(probe) => probe.throw(pipe, event),
        None => Thrown::Unclaimed,
    };

    if thrown == Thrown::Unclaimed {
        let name = pipe.map_or("-", |pipe| pipe.name());
        if event.is_critical() {
            tracing::error!(pipe = %name, event = ?event, "critical event unclaimed");
        } else {
            trace_unclaimed(name, event.name());
        }
    }
    thrown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counting {
        hits: Rc<Cell<u32>>,
        claim: bool,
    }

    impl ProbeHandler for Counting {
        fn handle(&self, _pipe: Option<&Pipe>, _event: &mut Event<'_>) -> Outcome {
            self.hits.set(self.hits.get() + 1);
            if self.claim {
                Outcome::Claimed
            } else {
                Outcome::Forward
            }
        }
    }

    #[test]
    fn test_chain_stops_at_claim() {
        let hits: Vec<_> = (0..3).map(|_| Rc::new(Cell::new(0))).collect();
        let mut chain = None;
        for (i, hit) in hits.iter().enumerate().rev() {
            chain = Some(Probe::new(
                Counting {
                    hits: hit.clone(),
                    claim: i == 1,
                },
                chain,
            ));
        }
        let chain = chain.unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.throw(None, &mut Event::Ready), Thrown::Claimed);
        assert_eq!(
            hits.iter().map(|h| h.get()).collect::<Vec<_>>(),
            vec![1, 1, 0]
        );
    }

    #[test]
    fn test_throw_without_chain_is_unclaimed() {
        assert_eq!(throw(None, None, &mut Event::SinkEnd), Thrown::Unclaimed);
    }

    #[test]
    fn test_data_released_with_link() {
        let data: Rc<dyn Any> = Rc::new(String::from("shared"));
        let probe = Probe::with_data(CatchAllProbe, None, data.clone());
        assert_eq!(probe.data_as::<String>().map(String::as_str), Some("shared"));
        assert_eq!(Rc::strong_count(&data), 2);

        drop(probe);
        assert_eq!(Rc::strong_count(&data), 1);
    }

    #[test]
    fn test_long_chain_drops_iteratively() {
        let mut chain = None;
        for _ in 0..100_000 {
            chain = Some(Probe::new(CatchAllProbe, chain));
        }
        drop(chain);
    }
}
