//! Two loops on two threads joined by a queue.
//!
//! The producer thread runs an app source into a queue sink; the consumer
//! thread pops from a queue source into a null sink and stops its loop
//! once every buffer has arrived.

use pipeflow::observability::instrument_loop;
use pipeflow::prelude::*;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const COUNT: u64 = 10_000;

fn producer(queue: SharedQueue<Buffer>) -> Result<()> {
    let _span = instrument_loop("producer");
    let mgr = PumpManager::new(LoopConfig::from_env().with_name("producer"))?;
    let probe = Probe::new(PumpManagerProbe::new(mgr.clone()), None);

    let sink = Manager::<QueueSink>::new(()).alloc(Some(probe.clone()), QueueSinkArgs { queue })?;
    let src = Manager::<AppSrc>::new(()).alloc(Some(probe), AppSrcArgs::default())?;
    src.set_output(Some(sink));

    let mut seq = 0;
    while seq < COUNT {
        match AppSrc::push(&src, Buffer::from_vec(seq.to_le_bytes().to_vec(), seq)) {
            Ok(()) => seq += 1,
            Err(Error::Blocked(_)) => {
                mgr.run_for(Duration::from_millis(5))?;
            }
            Err(e) => return Err(e),
        }
    }
    AppSrc::end_of_stream(&src)?;
    let status = mgr.run(None)?;
    tracing::info!(?status, "producer finished");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let queue = shared_queue::<Buffer>(QueueConfig::with_capacity(64).with_name("handoff"))?;

    let mgr = PumpManager::new(LoopConfig::from_env().with_name("consumer"))?;
    let quit = mgr.quit_handle();
    let app = Probe::from_fn(
        move |_, event| match event {
            Event::SinkEnd => {
                quit.quit();
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

    let sink = Manager::<NullSink>::new(())
        .alloc(Some(probe.clone()), NullSinkArgs::with_limit(COUNT))?;
    let src = Manager::<QueueSrc>::new(()).alloc(
        Some(probe),
        QueueSrcArgs {
            queue: queue.clone(),
        },
    )?;
    src.set_output(Some(sink.clone()));

    let handle = thread::spawn(move || producer(queue));
    let status = mgr.run(None)?;
    handle
        .join()
        .map_err(|_| Error::fatal("producer thread panicked"))??;

    println!(
        "consumer {:?}: {} buffers, {} bytes",
        status,
        NullSink::count(&sink)?,
        NullSink::bytes(&sink)?
    );
    Ok(())
}
