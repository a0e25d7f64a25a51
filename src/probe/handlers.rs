//! Standard probe handlers.

use super::{Event, Outcome, ProbeHandler};
use crate::pipe::Pipe;
use crate::pump::PumpManager;
use tracing::Level;

/// Adapts a closure into a [`ProbeHandler`].
pub struct FnProbe<F> {
    f: F,
}

impl<F> FnProbe<F>
where
    F: Fn(Option<&Pipe>, &mut Event<'_>) -> Outcome,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ProbeHandler for FnProbe<F>
where
    F: Fn(Option<&Pipe>, &mut Event<'_>) -> Outcome,
{
    fn handle(&self, pipe: Option<&Pipe>, event: &mut Event<'_>) -> Outcome {
        (self.f)(pipe, event)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Renders log-like events through `tracing`.
///
/// `Log` events at or above the configured level are emitted and claimed;
/// `Warning`, `Error` and `Fatal` are emitted and forwarded so that later
/// links can still act on them.
#[derive(Debug, Clone)]
pub struct LogProbe {
    level: Level,
}

impl LogProbe {
    /// Emit `Log` events up to `level` verbosity.
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// The most verbose level emitted.
    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for LogProbe {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

fn emit(level: Level, pipe: &str, message: &str) {
    if level == Level::ERROR {
        tracing::error!(pipe = %pipe, "{}", message);
    } else if level == Level::WARN {
        tracing::warn!(pipe = %pipe, "{}", message);
    } else if level == Level::INFO {
        tracing::info!(pipe = %pipe, "{}", message);
    } else if level == Level::DEBUG {
        tracing::debug!(pipe = %pipe, "{}", message);
    } else {
        tracing::trace!(pipe = %pipe, "{}", message);
    }
}

impl ProbeHandler for LogProbe {
    fn handle(&self, pipe: Option<&Pipe>, event: &mut Event<'_>) -> Outcome {
        let name = pipe.map_or("-", |pipe| pipe.name());
        match event {
            Event::Log { level, message } => {
                // Lower levels are more severe.
                if *level <= self.level {
                    emit(*level, name, message);
                }
                Outcome::Claimed
            }
            Event::Warning(message) => {
                emit(Level::WARN, name, message);
                Outcome::Forward
            }
            Event::Error(err) => {
                tracing::error!(pipe = %name, "{}", err);
                Outcome::Forward
            }
            Event::Fatal(err) => {
                tracing::error!(pipe = %name, "fatal: {}", err);
                Outcome::Forward
            }
            _ => Outcome::Forward,
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Answers [`Event::NeedPumpManager`] with a fixed manager.
#[derive(Debug, Clone)]
pub struct PumpManagerProbe {
    manager: PumpManager,
}

impl PumpManagerProbe {
    /// Hand out `manager` to pipes that ask.
    pub fn new(manager: PumpManager) -> Self {
        Self { manager }
    }
}

impl ProbeHandler for PumpManagerProbe {
    fn handle(&self, _pipe: Option<&Pipe>, event: &mut Event<'_>) -> Outcome {
        match event {
            Event::NeedPumpManager(slot @ None) => {
                *slot = Some(self.manager.clone());
                Outcome::Claimed
            }
            _ => Outcome::Forward,
        }
    }

    fn name(&self) -> &str {
        "pump-manager"
    }
}

/// Terminal link that claims every event.
///
/// Unclaimed critical events are logged at debug level first.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchAllProbe;

impl ProbeHandler for CatchAllProbe {
    fn handle(&self, pipe: Option<&Pipe>, event: &mut Event<'_>) -> Outcome {
        if event.is_critical() {
            tracing::debug!(
                pipe = %pipe.map_or("-", |pipe| pipe.name()),
                event = ?event,
                "critical event absorbed"
            );
        }
        Outcome::Claimed
    }

    fn name(&self) -> &str {
        "catch-all"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{Probe, Thrown};
    use crate::pump::LoopConfig;

    #[test]
    fn test_log_probe_claims_only_log() {
        let probe = Probe::new(LogProbe::new(Level::DEBUG), None);
        let mut log = Event::Log {
            level: Level::TRACE,
            message: "filtered but claimed",
        };
        assert_eq!(probe.throw(None, &mut log), Thrown::Claimed);
        assert_eq!(
            probe.throw(None, &mut Event::Warning("careful")),
            Thrown::Unclaimed
        );
    }

    #[test]
    fn test_pump_manager_probe_fills_slot() {
        let mgr = PumpManager::new(LoopConfig::default()).unwrap();
        let probe = Probe::new(PumpManagerProbe::new(mgr.clone()), None);

        let mut event = Event::NeedPumpManager(None);
        assert_eq!(probe.throw(None, &mut event), Thrown::Claimed);
        match event {
            Event::NeedPumpManager(Some(found)) => assert!(found.ptr_eq(&mgr)),
            other => panic!("unexpected event {:?}", other),
        }

        // Already answered: forwarded.
        let mut answered = Event::NeedPumpManager(Some(mgr.clone()));
        assert_eq!(probe.throw(None, &mut answered), Thrown::Unclaimed);
    }

    #[test]
    fn test_catch_all_claims_everything() {
        let probe = Probe::new(CatchAllProbe, None);
        let err = crate::Error::fatal("x");
        assert_eq!(probe.throw(None, &mut Event::Fatal(&err)), Thrown::Claimed);
        assert_eq!(probe.throw(None, &mut Event::Ready), Thrown::Claimed);
    }
}
