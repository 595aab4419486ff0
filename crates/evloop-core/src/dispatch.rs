// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dispatch loop: `run` and `exit`.
//!
//! One iteration waits on the context's bit-group, then sweeps the watcher
//! list once, in insertion order, delivering at most one callback per active
//! watcher. Ties the clock, registry, and per-variant firing rules (event,
//! timer, I/O) together; those rules themselves live in `event.rs`,
//! `timer.rs`, and `io.rs`/`selector.rs`, which this module calls into
//! rather than duplicates.

use crate::context::Context;
use crate::io;
use crate::trace::{self, TraceEvent};
use crate::watcher::WatcherKind;
use evloop_abi::{EventMask, LoopResult, RunFlags, WakeBits, WatcherId};
use evloop_ringbuf::ringbuf_entry;
use evloop_runtime::now_us;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn now_ms() -> u64 {
    now_us() / 1_000
}

impl Context {
    /// `context_run`: drives the dispatch loop until `exit` is called, or
    /// (with `ONCE` set) for exactly one iteration.
    pub fn run(&self, flags: RunFlags) -> LoopResult<()> {
        self.running.store(true, Ordering::Release);
        let mut next_deadline = if flags.contains(RunFlags::NONBLOCK) {
            0
        } else {
            evloop_abi::FOREVER_TICKS
        };
        rearm_all_timers(self, &mut next_deadline);

        while self.running.load(Ordering::Acquire) {
            let ticks_to_wait = ticks_to_wait(next_deadline, now_ms());
            let woken = self.bits.wait(
                WakeBits::IO.bits() | WakeBits::EVENT.bits() | WakeBits::TIMER.bits(),
                ticks_to_wait,
            );
            next_deadline = evloop_abi::FOREVER_TICKS;

            for id in self.registry.snapshot_order() {
                if !self.registry.is_active(id).unwrap_or(false) {
                    continue;
                }
                sweep_one(self, id, woken, &mut next_deadline);
            }

            if flags.contains(RunFlags::ONCE) {
                break;
            }
        }
        Ok(())
    }

    /// `context_exit`: stops every active watcher, clears the registry, and
    /// marks the context not-running. Must not race a concurrent `stop` on
    /// the same context (per the spec, callers quiesce first).
    pub fn exit(self: &Arc<Self>) -> LoopResult<()> {
        for id in self.registry.snapshot_order() {
            let variant = self.registry.with_kind(id, |kind| kind.variant_name());
            match variant {
                Ok("io") => {
                    let _ = self.io_stop(id);
                }
                Ok("event") => {
                    let _ = self.event_stop(id);
                }
                Ok("timer") | Ok("timer_ts") => {
                    let _ = self.timer_stop(id);
                }
                _ => {}
            }
        }
        self.registry.clear();
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}

fn ticks_to_wait(next_deadline: u64, now_ms: u64) -> u64 {
    if next_deadline == evloop_abi::FOREVER_TICKS {
        return evloop_abi::FOREVER_TICKS;
    }
    next_deadline.saturating_sub(now_ms)
}

fn rearm_all_timers(ctx: &Context, next_deadline: &mut u64) {
    for id in ctx.registry.snapshot_order() {
        if !ctx.registry.is_active(id).unwrap_or(false) {
            continue;
        }
        let deadline = ctx.registry.with_kind_mut(id, |kind| {
            let fields = match kind {
                WatcherKind::Timer(fields) => fields,
                WatcherKind::TimerTs(lock) => {
                    return {
                        let mut fields = lock.lock().unwrap_or_else(|e| e.into_inner());
                        rearm_fields(&mut fields)
                    };
                }
                _ => return None,
            };
            rearm_fields(fields)
        });
        if let Ok(Some(deadline)) = deadline {
            ringbuf_entry!(
                trace::EVLOOP_TRACE,
                TraceEvent::TimerRearmed { index: id.raw_parts().0, deadline_ms: deadline }
            );
            note_deadline(next_deadline, deadline);
        }
    }
}

/// Recomputes a configured timer's deadline from `now`, so a loop restart
/// does not fire on a deadline armed before the loop last stopped. A timer
/// that was never `set` (both fields still zero) stays dormant.
fn rearm_fields(fields: &mut crate::watcher::TimerFields) -> Option<u64> {
    if fields.timeout_ms == 0 && fields.period_ms == 0 {
        return None;
    }
    let deadline = now_ms().saturating_add(fields.timeout_ms).max(1);
    fields.deadline_ms = deadline;
    Some(deadline)
}

fn note_deadline(next_deadline: &mut u64, candidate: u64) {
    if candidate > 0 && candidate < *next_deadline {
        *next_deadline = candidate;
    }
}

fn sweep_one(ctx: &Context, id: WatcherId, woken: u32, next_deadline: &mut u64) {
    let variant = match ctx.registry.with_kind(id, |kind| kind.variant_name()) {
        Ok(name) => name,
        Err(_) => return,
    };
    match variant {
        "event" => sweep_event(ctx, id, woken),
        "timer" | "timer_ts" => sweep_timer(ctx, id, next_deadline),
        "io" => sweep_io(ctx, id, woken),
        _ => {}
    }
}

fn sweep_event(ctx: &Context, id: WatcherId, woken: u32) {
    if woken & WakeBits::EVENT.bits() == 0 {
        return;
    }
    let fired = ctx
        .registry
        .with_kind(id, |kind| match kind {
            WatcherKind::Event(fields) => fields.posted.swap(false, Ordering::AcqRel),
            _ => false,
        })
        .unwrap_or(false);
    if fired {
        fire_callback(ctx, id, EventMask::READ, "event");
    }
}

fn sweep_timer(ctx: &Context, id: WatcherId, next_deadline: &mut u64) {
    let now = now_ms();
    // The resolved Open Question: `next_deadline` is only ever updated from
    // a deadline that is strictly positive, so a timer that has not been
    // `set` (deadline == 0, dormant) never latches in as "fire immediately."
    let outcome = ctx.registry.with_kind_mut(id, |kind| -> SweepOutcome {
        match kind {
            WatcherKind::Timer(fields) => sweep_timer_fields(fields, now),
            WatcherKind::TimerTs(lock) => {
                let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
                sweep_timer_fields(&mut guard, now)
            }
            _ => SweepOutcome::Skip,
        }
    });

    let outcome = match outcome {
        Ok(o) => o,
        Err(_) => return,
    };

    let rearmed = matches!(outcome, SweepOutcome::Fire { stop: false });
    match outcome {
        SweepOutcome::Skip => {}
        SweepOutcome::Fire { stop } => {
            fire_callback(ctx, id, EventMask::READ, "timer");
            if stop {
                let _ = ctx.timer_stop(id);
            }
        }
    }

    if let Ok(Some(deadline)) = ctx.registry.with_kind(id, |kind| match kind {
        WatcherKind::Timer(f) if f.deadline_ms > 0 => Some(f.deadline_ms),
        WatcherKind::TimerTs(lock) => {
            let fields = lock.lock().unwrap_or_else(|e| e.into_inner());
            (fields.deadline_ms > 0).then_some(fields.deadline_ms)
        }
        _ => None,
    }) {
        if rearmed {
            ringbuf_entry!(
                trace::EVLOOP_TRACE,
                TraceEvent::TimerRearmed { index: id.raw_parts().0, deadline_ms: deadline }
            );
        }
        note_deadline(next_deadline, deadline);
    }
}

enum SweepOutcome {
    Skip,
    Fire { stop: bool },
}

fn sweep_timer_fields(
    fields: &mut crate::watcher::TimerFields,
    now_ms: u64,
) -> SweepOutcome {
    if now_ms == 0 || fields.deadline_ms == 0 || now_ms <= fields.deadline_ms {
        return SweepOutcome::Skip;
    }
    if fields.period_ms == 0 {
        fields.timeout_ms = 0;
    }
    if fields.timeout_ms == 0 && fields.period_ms == 0 {
        fields.deadline_ms = 0;
        return SweepOutcome::Fire { stop: true };
    }
    fields.deadline_ms = now_ms.saturating_add(fields.period_ms).max(1);
    SweepOutcome::Fire { stop: false }
}

fn sweep_io(ctx: &Context, id: WatcherId, woken: u32) {
    if woken & WakeBits::IO.bits() == 0 {
        return;
    }
    let pending = ctx
        .registry
        .with_kind(id, |kind| match kind {
            WatcherKind::Io(fields) => fields.pending.load(Ordering::Acquire),
            _ => 0,
        })
        .unwrap_or(0);
    if pending == 0 {
        return;
    }
    let requested = ctx
        .registry
        .with_kind(id, |kind| match kind {
            WatcherKind::Io(fields) => fields.requested,
            _ => EventMask::empty(),
        })
        .unwrap_or_else(|_| EventMask::empty());
    let delivered = EventMask::from_bits_truncate(pending) & requested;
    if delivered.is_empty() {
        return;
    }
    fire_callback(ctx, id, delivered, "io");
    let _ = ctx.registry.with_kind(id, |kind| {
        if let WatcherKind::Io(fields) = kind {
            io::clear_delivered_and_rewake(fields, delivered);
        }
    });
}

/// Invokes a watcher's callback outside the registry lock, catching a panic
/// so it cannot unwind through the dispatch loop (§6/§10.1: "no exceptions
/// propagate out of callbacks").
fn fire_callback(ctx: &Context, id: WatcherId, events: EventMask, kind: &'static str) {
    let Some(mut callback) = ctx.registry.take_callback(id) else {
        return;
    };
    ringbuf_entry!(
        trace::EVLOOP_TRACE,
        TraceEvent::WatcherFired { index: id.raw_parts().0, kind }
    );
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback(id, events);
    }));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::error!(
            watcher = id.raw_parts().0,
            kind,
            panic_message = message,
            "watcher callback panicked"
        );
    }
    ctx.registry.put_callback(id, callback);
}
