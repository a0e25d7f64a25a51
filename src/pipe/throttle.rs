//! Upstream throttling for bounded nodes.

use crate::error::Result;
use crate::pump::{Pump, PumpRef};
use smallvec::SmallVec;

/// Upstream pumps stopped by a full node, waiting for room.
///
/// A bounded node calls [`hold`](Self::hold) with the pump that delivered
/// a rejected buffer and [`release`](Self::release) once it has room again.
/// An optional wake pump (typically a queue push pump) is started while
/// anything is held, so room freed by the loop itself triggers the release.
#[derive(Debug, Default)]
pub struct Throttle {
    held: SmallVec<[PumpRef; 2]>,
    wake: Option<Pump>,
}

impl Throttle {
    /// Create an empty throttle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pump started while upstream is held.
    pub fn set_wake(&mut self, wake: Pump) {
        self.wake = Some(wake);
    }

    /// Stop `pump` and remember it for [`release`](Self::release).
    pub fn hold(&mut self, pump: Option<&PumpRef>) -> Result<()> {
        if let Some(pump) = pump {
            pump.stop()?;
            if !self.held.contains(pump) {
                self.held.push(pump.clone());
            }
        }
        if let Some(wake) = &self.wake {
            wake.start()?;
        }
        Ok(())
    }

    /// Restart every held pump. Returns how many were held.
    pub fn release(&mut self) -> Result<usize> {
        if let Some(wake) = &self.wake {
            wake.stop()?;
        }
        let held = std::mem::take(&mut self.held);
        for pump in &held {
            pump.start()?;
        }
        Ok(held.len())
    }

    /// Check if any upstream pump is held.
    pub fn is_holding(&self) -> bool {
        !self.held.is_empty()
    }
}
