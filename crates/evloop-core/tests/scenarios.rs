// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios exercising the public API only, the way
//! `test/test-suite` drives a kernel build rather than unit-testing its
//! internals.

use evloop_core::{Context, EventMask, RunFlags};
use evloop_runtime::isr::simulate_isr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn one_shot_timer_fires_once_and_only_once() {
    let ctx = Context::default();
    let (tx, rx) = mpsc::channel();
    let id = ctx.timer_init(move |_, events| tx.send(events).unwrap()).unwrap();
    ctx.timer_set(id, 50, 0).unwrap();
    ctx.timer_start(id).unwrap();

    let started = Instant::now();
    ctx.run(RunFlags::ONCE).unwrap();
    let events = rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(events, EventMask::READ);
    assert!(started.elapsed() >= Duration::from_millis(45));

    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn periodic_timer_coalesces_a_stall_into_a_single_callback() {
    let ctx = Arc::new(Context::default());
    let (tx, rx) = mpsc::channel::<Instant>();

    let stall_ctx = Arc::clone(&ctx);
    let stall_tx = tx.clone();
    let stall_id = ctx
        .timer_init(move |_, _| {
            stall_tx.send(Instant::now()).unwrap();
            std::thread::sleep(Duration::from_millis(350));
            let _ = stall_ctx;
        })
        .unwrap();
    ctx.timer_set(stall_id, 10, 0).unwrap();
    ctx.timer_start(stall_id).unwrap();

    let periodic_id = ctx
        .timer_init(move |_, _| tx.send(Instant::now()).unwrap())
        .unwrap();
    ctx.timer_set(periodic_id, 100, 100).unwrap();
    ctx.timer_start(periodic_id).unwrap();

    // A single iteration's sweep visits both watchers in insertion order;
    // the stall inside the first (one-shot) callback pushes real time past
    // the periodic timer's deadline before the sweep reaches it, so both
    // fire in this one `run(ONCE)` despite only one of them being "due" when
    // the iteration began.
    ctx.run(RunFlags::ONCE).unwrap();

    let _stall_fired = rx.recv_timeout(Duration::from_millis(500)).unwrap();
    let _periodic_fired = rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert!(rx.try_recv().is_err(), "only one periodic callback per iteration");
}

#[test]
fn events_posted_from_a_simulated_isr_each_fire_once() {
    let ctx = Arc::new(Context::default());
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    let count_a = Arc::new(AtomicU32::new(0));
    let count_b = Arc::new(AtomicU32::new(0));

    let (ca, cb) = (Arc::clone(&count_a), Arc::clone(&count_b));
    let id_a = ctx
        .event_init(move |_, events| {
            ca.fetch_add(1, Ordering::AcqRel);
            tx_a.send(events).unwrap();
        })
        .unwrap();
    let id_b = ctx
        .event_init(move |_, events| {
            cb.fetch_add(1, Ordering::AcqRel);
            tx_b.send(events).unwrap();
        })
        .unwrap();

    let isr_ctx = Arc::clone(&ctx);
    let isr = simulate_isr(move || {
        for _ in 0..1000 {
            isr_ctx.event_post(id_a).unwrap();
            isr_ctx.event_post(id_b).unwrap();
        }
    });
    isr.join().unwrap();

    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();

    assert_eq!(rx_a.try_recv().unwrap(), EventMask::READ);
    assert!(rx_a.try_recv().is_err());
    assert_eq!(rx_b.try_recv().unwrap(), EventMask::READ);
    assert!(rx_b.try_recv().is_err());
    assert_eq!(count_a.load(Ordering::Acquire), 1);
    assert_eq!(count_b.load(Ordering::Acquire), 1);
}

#[test]
fn io_watcher_delivers_once_per_write_and_drains_its_pending_bits() {
    let mut fds = [0 as std::os::unix::io::RawFd; 2];
    unsafe {
        assert_eq!(libc::pipe(fds.as_mut_ptr()), 0);
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let ctx = Arc::new(Context::default());
    let (tx, rx) = mpsc::channel();
    // The callback drains the byte itself, the way a real I/O watcher must:
    // the selector only excludes a descriptor from its readiness set while
    // this crate's own pending-events word is nonzero, not while the
    // descriptor itself still has unread data, so a callback that leaves
    // data behind would see it again on the very next readiness rebuild
    // (the documented I/O rearm race).
    let id = ctx
        .io_init(read_fd, EventMask::READ, move |_, events| {
            let mut buf = [0u8; 1];
            unsafe {
                libc::read(read_fd, buf.as_mut_ptr() as *mut _, 1);
            }
            tx.send(events).unwrap()
        })
        .unwrap();
    ctx.io_start(id).unwrap();

    unsafe {
        libc::write(write_fd, b"x".as_ptr() as *const _, 1);
    }
    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_millis(500)).unwrap(), EventMask::READ);

    std::thread::sleep(Duration::from_millis(50));
    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert!(rx.try_recv().is_err());

    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn a_timer_started_from_a_running_callback_fires_on_a_later_iteration() {
    let ctx = Arc::new(Context::default());
    let (tx, rx) = mpsc::channel();

    let inner_ctx = Arc::clone(&ctx);
    let inner_tx = tx.clone();
    let first_id = ctx
        .timer_init(move |_, _| {
            let spawned_tx = inner_tx.clone();
            let second_id = inner_ctx
                .timer_init(move |_, events| spawned_tx.send(events).unwrap())
                .unwrap();
            inner_ctx.timer_set(second_id, 5, 0).unwrap();
            inner_ctx.timer_start(second_id).unwrap();
        })
        .unwrap();
    ctx.timer_set(first_id, 5, 0).unwrap();
    ctx.timer_start(first_id).unwrap();

    ctx.run(RunFlags::ONCE).unwrap();
    assert!(rx.try_recv().is_err(), "not swept in the same iteration it was started");

    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_millis(500)).unwrap(),
        EventMask::READ
    );
}

#[test]
fn threadsafe_timer_update_from_another_thread_wakes_the_loop() {
    let ctx = Arc::new(Context::default());
    let (tx, rx) = mpsc::channel();
    let callback_ctx = Arc::clone(&ctx);
    let id = ctx
        .timer_ts_init(move |_, events| {
            tx.send(events).unwrap();
            callback_ctx.exit().unwrap();
        })
        .unwrap();
    // Armed far in the future; the update below should make it fire long
    // before this deadline would have.
    ctx.timer_ts_set(id, 10_000, 200).unwrap();
    ctx.timer_start(id).unwrap();

    let updater_ctx = Arc::clone(&ctx);
    let updater = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        updater_ctx.timer_ts_set(id, 50, 200).unwrap();
    });

    let runner_ctx = Arc::clone(&ctx);
    let started = Instant::now();
    let runner = std::thread::spawn(move || runner_ctx.run(RunFlags::empty()).unwrap());

    updater.join().unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_millis(500)).unwrap(),
        EventMask::READ
    );
    runner.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}
