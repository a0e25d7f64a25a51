//! Throughput benchmarks for queues and pipe chains.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pipeflow::Buffer;
use pipeflow::elements::{AppSrc, AppSrcArgs, NullSink, NullSinkArgs, Relay, RelayArgs};
use pipeflow::pipe::Manager;
use pipeflow::probe::{Probe, PumpManagerProbe};
use pipeflow::pump::{LoopConfig, PumpManager};
use pipeflow::queue::{Queue, QueueConfig, Sharing, shared_queue};
use std::hint::black_box;
use std::thread;

fn bench_push_pop_same_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for sharing in [Sharing::Single, Sharing::Multi] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", sharing)),
            &sharing,
            |b, &sharing| {
                let queue =
                    Queue::new(QueueConfig::with_capacity(1024).with_sharing(sharing)).unwrap();
                b.iter(|| {
                    queue.push(black_box(42u64)).unwrap();
                    black_box(queue.pop())
                });
            },
        );
    }

    group.finish();
}

fn bench_spsc_two_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_spsc");

    for count in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let queue = shared_queue::<u64>(QueueConfig::with_capacity(256)).unwrap();
                let producer = {
                    let queue = queue.clone();
                    thread::spawn(move || {
                        for i in 0..count {
                            let mut value = i;
                            while let Err(back) = queue.push(value) {
                                value = back;
                                std::hint::spin_loop();
                            }
                        }
                    })
                };

                let mut received = 0;
                while received < count {
                    if queue.pop().is_some() {
                        received += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
                producer.join().unwrap();
                black_box(received)
            });
        });
    }

    group.finish();
}

fn bench_relay_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay_chain");

    for count in [64u64, 1024] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mgr = PumpManager::new(LoopConfig::default()).unwrap();
            let probe = Probe::new(PumpManagerProbe::new(mgr.clone()), None);
            let sink = Manager::<NullSink>::new(())
                .alloc(Some(probe.clone()), NullSinkArgs::default())
                .unwrap();
            let relay = Manager::<Relay>::new(())
                .alloc(Some(probe.clone()), RelayArgs { bound: 16 })
                .unwrap();
            relay.set_output(Some(sink.clone()));
            let src = Manager::<AppSrc>::new(())
                .alloc(
                    Some(probe),
                    AppSrcArgs {
                        bound: count as usize,
                        burst: 32,
                    },
                )
                .unwrap();
            src.set_output(Some(relay));

            b.iter(|| {
                for seq in 0..count {
                    AppSrc::push(&src, Buffer::empty(seq)).unwrap();
                }
                mgr.run(None).unwrap();
                black_box(NullSink::count(&sink).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop_same_thread,
    bench_spsc_two_threads,
    bench_relay_chain
);
criterion_main!(benches);
