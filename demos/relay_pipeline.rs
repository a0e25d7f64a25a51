//! A single-loop pipeline: timer source -> relay -> app sink.
//!
//! Run with `RUST_LOG=pipeflow=debug cargo run --example relay_pipeline`.
//! Set `PIPEFLOW_BACKEND=poll` to force the portable backend.

use pipeflow::prelude::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mgr = PumpManager::new(LoopConfig::from_env().with_name("demo"))?;
    let app = Probe::from_fn(
        |pipe, event| match event {
            Event::SourceEnd => {
                let name = pipe.map_or("-", |pipe| pipe.name());
                tracing::info!(pipe = %name, "source finished");
                Outcome::Claimed
            }
            _ => Outcome::Forward,
        },
        None,
    );
    let probe = Probe::new(
        LogProbe::default(),
        Some(Probe::new(PumpManagerProbe::new(mgr.clone()), Some(app))),
    );

    let sink = Manager::<AppSink>::new(()).alloc(Some(probe.clone()), AppSinkArgs::with_bound(4))?;
    let relay = Manager::<Relay>::new(()).alloc(Some(probe.clone()), RelayArgs { bound: 2 })?;
    let src = Manager::<TimerSrc>::new(()).alloc(
        Some(probe),
        TimerSrcArgs::new(Duration::from_millis(5), 32).with_size(188),
    )?;
    relay.set_output(Some(sink.clone()));
    src.set_output(Some(relay));

    let mut total = 0;
    loop {
        let status = mgr.run(None)?;
        let taken = AppSink::take(&sink)?;
        if taken.is_empty() {
            tracing::info!(?status, total, "pipeline drained");
            break;
        }
        total += taken.len();
        tracing::info!(
            first = taken[0].sequence(),
            count = taken.len(),
            "took buffers"
        );
    }

    let stats = mgr.stats();
    println!(
        "received {} buffers in {} loop iterations ({} backend)",
        total,
        stats.iterations,
        mgr.backend_name()
    );
    Ok(())
}
