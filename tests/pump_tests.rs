//! Integration tests for pumps and the event loop.
//!
//! These tests verify that:
//! - A loop with only non-blocker pumps started returns on its own
//! - A blocker pump keeps the loop running until stopped or freed
//! - Timers, idle, descriptor, signal and queue pumps fire as described
//! - Another thread can stop a loop through a quit handle

use pipeflow::pump::{LoopConfig, PumpKind, PumpManager, RunStatus};
use pipeflow::queue::{QueueConfig, shared_queue};
use std::cell::Cell;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

fn manager(name: &str) -> PumpManager {
    PumpManager::new(LoopConfig::from_env().with_name(name)).unwrap()
}

fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

#[test]
fn test_non_blocker_pumps_do_not_hold_loop() {
    let mgr = manager("non-blocker");
    let (fired, seen) = counter();
    let idle = mgr
        .alloc_idle(move |_, _| seen.set(seen.get() + 1))
        .unwrap();
    idle.set_blocker(false);
    idle.start().unwrap();

    let timer = mgr.alloc_timer(Duration::from_secs(60), None, |_, _| {}).unwrap();
    timer.set_blocker(false);
    timer.start().unwrap();

    let started = Instant::now();
    assert_eq!(mgr.run(None).unwrap(), RunStatus::Drained);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(fired.get(), 0);
}

#[test]
fn test_blocker_holds_loop_until_stopped() {
    let mgr = manager("blocker");
    let (fired, seen) = counter();
    let idle = mgr
        .alloc_idle(move |mgr, id| {
            seen.set(seen.get() + 1);
            if seen.get() == 10 {
                mgr.stop(id).unwrap();
            }
        })
        .unwrap();
    idle.start().unwrap();

    assert_eq!(mgr.run(None).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 10);
    assert!(!idle.is_started());
}

#[test]
fn test_blocker_holds_loop_until_freed() {
    let mgr = manager("blocker-free");
    let slot: Rc<Cell<Option<pipeflow::pump::Pump>>> = Rc::new(Cell::new(None));
    let owner = slot.clone();

    let timer = mgr
        .alloc_timer(Duration::from_millis(5), None, move |_, _| {
            // Freeing the idle pump is the only way the loop ends.
            drop(owner.take());
        })
        .unwrap();
    timer.set_blocker(false);
    timer.start().unwrap();

    let idle = mgr.alloc_idle(|_, _| {}).unwrap();
    idle.start().unwrap();
    slot.set(Some(idle));

    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(mgr.outstanding(), 1);
}

#[test]
fn test_blocker_without_events_hits_deadline() {
    let mgr = manager("deadline");
    let timer = mgr.alloc_timer(Duration::from_secs(60), None, |_, _| {}).unwrap();
    timer.start().unwrap();

    let started = Instant::now();
    let status = mgr.run_for(Duration::from_millis(50)).unwrap();
    assert_eq!(status, RunStatus::DeadlineElapsed);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_repeating_timer_fires_until_stopped() {
    let mgr = manager("repeat");
    let (fired, seen) = counter();
    let timer = mgr
        .alloc_timer(
            Duration::from_millis(1),
            Some(Duration::from_millis(2)),
            move |mgr, id| {
                seen.set(seen.get() + 1);
                if seen.get() == 3 {
                    mgr.stop(id).unwrap();
                }
            },
        )
        .unwrap();
    timer.start().unwrap();

    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 3);
    assert_eq!(timer.kind(), PumpKind::Timer);
}

#[test]
fn test_one_shot_timer_stops_itself() {
    let mgr = manager("one-shot");
    let (fired, seen) = counter();
    let timer = mgr
        .alloc_timer(Duration::from_millis(1), None, move |_, _| seen.set(seen.get() + 1))
        .unwrap();
    timer.start().unwrap();

    assert_eq!(mgr.run(None).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 1);
    assert!(!timer.is_started());
}

#[test]
fn test_idle_yields_to_ready_timers() {
    let mgr = manager("idle-order");
    let log = Rc::new(std::cell::RefCell::new(Vec::new()));

    let timer_log = log.clone();
    let timer = mgr
        .alloc_timer(Duration::ZERO, None, move |_, _| timer_log.borrow_mut().push("timer"))
        .unwrap();
    let idle_log = log.clone();
    let idle = mgr
        .alloc_idle(move |mgr, id| {
            idle_log.borrow_mut().push("idle");
            mgr.stop(id).unwrap();
        })
        .unwrap();
    timer.start().unwrap();
    idle.start().unwrap();

    mgr.run(None).unwrap();
    assert_eq!(*log.borrow(), vec!["timer", "idle"]);
}

#[test]
fn test_fd_read_pump() {
    let mgr = manager("fd");
    let (mut writer, reader) = UnixStream::pair().unwrap();
    reader.set_nonblocking(true).unwrap();
    writer.write_all(b"ping").unwrap();

    let (fired, seen) = counter();
    let read_end = reader.try_clone().unwrap();
    let pump = mgr
        .alloc_fd_read(&reader, move |mgr, id| {
            let mut buf = [0u8; 16];
            let n = std::io::Read::read(&mut &read_end, &mut buf).unwrap();
            assert_eq!(&buf[..n], b"ping");
            seen.set(seen.get() + 1);
            mgr.stop(id).unwrap();
        })
        .unwrap();
    pump.start().unwrap();

    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_signal_pump() {
    let mgr = manager("signal");
    let (fired, seen) = counter();
    let pump = mgr
        .alloc_signal(signal_hook::consts::SIGUSR1, move |mgr, id| {
            seen.set(seen.get() + 1);
            mgr.stop(id).unwrap();
        })
        .unwrap();
    pump.start().unwrap();

    signal_hook::low_level::raise(signal_hook::consts::SIGUSR1).unwrap();
    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_signal_pump_restart_then_release() {
    let mgr = manager("signal-restart");
    let (fired, seen) = counter();
    let pump = mgr
        .alloc_signal(signal_hook::consts::SIGUSR2, move |mgr, id| {
            seen.set(seen.get() + 1);
            mgr.stop(id).unwrap();
        })
        .unwrap();
    pump.start().unwrap();
    pump.stop().unwrap();
    pump.start().unwrap();

    signal_hook::low_level::raise(signal_hook::consts::SIGUSR2).unwrap();
    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 1);

    pump.start().unwrap();
    signal_hook::low_level::raise(signal_hook::consts::SIGUSR2).unwrap();
    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 2);

    drop(pump);
    drop(mgr);
}

#[test]
fn test_queue_pop_pump_cross_thread() {
    const N: u32 = 100;
    let mgr = manager("queue-pop");
    let queue = shared_queue::<u32>(QueueConfig::with_capacity(8)).unwrap();

    let (received, seen) = counter();
    let consumer = queue.clone();
    let pump = mgr
        .alloc_queue_pop(&queue, move |mgr, id| {
            while let Some(value) = consumer.pop() {
                assert_eq!(value, seen.get());
                seen.set(seen.get() + 1);
            }
            if seen.get() == N {
                mgr.stop(id).unwrap();
            }
        })
        .unwrap();
    pump.start().unwrap();

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..N {
                let mut value = i;
                while let Err(back) = queue.push(value) {
                    value = back;
                    thread::sleep(Duration::from_micros(50));
                }
            }
        })
    };

    assert_eq!(mgr.run_for(Duration::from_secs(10)).unwrap(), RunStatus::Drained);
    producer.join().unwrap();
    assert_eq!(received.get(), N);
}

#[test]
fn test_queue_push_pump_fires_when_room() {
    let mgr = manager("queue-push");
    let queue = shared_queue::<u8>(QueueConfig::with_capacity(1)).unwrap();
    queue.push(0).unwrap();

    let (fired, seen) = counter();
    let pump = mgr
        .alloc_queue_push(&queue, move |mgr, id| {
            seen.set(seen.get() + 1);
            mgr.stop(id).unwrap();
        })
        .unwrap();
    pump.start().unwrap();

    // Full queue: nothing fires.
    assert_eq!(
        mgr.run_for(Duration::from_millis(20)).unwrap(),
        RunStatus::DeadlineElapsed
    );
    assert_eq!(fired.get(), 0);

    let consumer = queue.clone();
    thread::spawn(move || consumer.pop()).join().unwrap();
    assert_eq!(mgr.run_for(Duration::from_secs(5)).unwrap(), RunStatus::Drained);
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_quit_handle_from_other_thread() {
    let mgr = manager("quit");
    let timer = mgr.alloc_timer(Duration::from_secs(60), None, |_, _| {}).unwrap();
    timer.start().unwrap();

    let handle = mgr.quit_handle();
    let quitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.quit();
    });

    assert_eq!(mgr.run_for(Duration::from_secs(10)).unwrap(), RunStatus::Quit);
    quitter.join().unwrap();
}

#[test]
fn test_quit_before_run_is_consumed_once() {
    let mgr = manager("quit-early");
    let idle = mgr.alloc_idle(|_, _| {}).unwrap();
    idle.start().unwrap();

    mgr.quit();
    assert_eq!(mgr.run(None).unwrap(), RunStatus::Quit);
    assert_eq!(
        mgr.run_for(Duration::from_millis(10)).unwrap(),
        RunStatus::DeadlineElapsed
    );
}

#[test]
fn test_start_stop_idempotent() {
    let mgr = manager("idempotent");
    let pump = mgr.alloc_timer(Duration::from_secs(1), None, |_, _| {}).unwrap();
    pump.start().unwrap();
    pump.start().unwrap();
    assert!(pump.is_started());
    pump.stop().unwrap();
    pump.stop().unwrap();
    assert!(!pump.is_started());

    let stale = pump.to_ref();
    pump.free();
    assert_eq!(mgr.outstanding(), 0);
    stale.start().unwrap();
    assert!(!stale.is_started());
}
