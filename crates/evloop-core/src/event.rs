// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software-posted event watchers.
//!
//! The original threads a parent-context pointer through every watcher so
//! `event_post(w)` can reach its context's bit-group without the caller
//! naming the context again. A Rust watcher handle is a plain arena index
//! with no back-pointer, so every operation here takes `&Context` alongside
//! the [`WatcherId`] instead — the same information, supplied by the caller
//! rather than stashed in the watcher, which avoids a pointer cycle between
//! watcher and context.

use crate::context::Context;
use crate::trace::{self, TraceEvent};
use crate::watcher::{Callback, EventFields, WatcherKind};
use evloop_abi::{EventMask, LoopError, LoopResult, WakeBits, WatcherId};
use evloop_ringbuf::ringbuf_entry;
use std::sync::atomic::Ordering;

impl Context {
    /// `event_init`: registers the watcher and starts it immediately — there
    /// is no separate dormant state for an event watcher, matching the
    /// external-interfaces table ("register and start").
    pub fn event_init(
        &self,
        callback: impl FnMut(WatcherId, EventMask) + Send + 'static,
    ) -> LoopResult<WatcherId> {
        let id = self
            .registry
            .insert(WatcherKind::Event(EventFields::default()), Box::new(callback) as Callback)?;
        self.registry.link(id);
        self.registry.set_active(id, true)?;
        ringbuf_entry!(
            trace::EVLOOP_TRACE,
            TraceEvent::WatcherStarted { index: id.raw_parts().0, kind: "event" }
        );
        Ok(id)
    }

    /// `event_post`: ISR-safe. Sets the posted flag and wakes the loop via
    /// the EVENT bit. A repeated post before the loop delivers the first one
    /// is coalesced, since the flag is a single bit, not a counter.
    pub fn event_post(&self, id: WatcherId) -> LoopResult<()> {
        let was_posted = self.registry.with_kind(id, |kind| match kind {
            WatcherKind::Event(fields) => Ok(fields.posted.swap(true, Ordering::AcqRel)),
            _ => Err(LoopError::InvalidArgument("watcher is not an event watcher")),
        })??;
        if !was_posted {
            self.bits.set_from_isr(WakeBits::EVENT.bits());
        }
        Ok(())
    }

    /// `event_stop`: deactivates and unlinks the watcher.
    pub fn event_stop(&self, id: WatcherId) -> LoopResult<()> {
        self.registry.with_kind(id, |kind| match kind {
            WatcherKind::Event(_) => Ok(()),
            _ => Err(LoopError::InvalidArgument("watcher is not an event watcher")),
        })??;
        self.registry.set_active(id, false)?;
        self.registry.unlink(id);
        ringbuf_entry!(
            trace::EVLOOP_TRACE,
            TraceEvent::WatcherStopped { index: id.raw_parts().0, kind: "event" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn post_before_delivery_coalesces_to_one_wake() {
        let ctx = Context::default();
        let (tx, _rx) = mpsc::channel::<()>();
        let id = ctx.event_init(move |_, _| tx.send(()).unwrap()).unwrap();
        for _ in 0..1000 {
            ctx.event_post(id).unwrap();
        }
        let posted = ctx
            .registry
            .with_kind(id, |kind| match kind {
                WatcherKind::Event(fields) => fields.posted.load(Ordering::Acquire),
                _ => unreachable!(),
            })
            .unwrap();
        assert!(posted);
    }

    #[test]
    fn stop_unlinks_the_watcher() {
        let ctx = Context::default();
        let id = ctx.event_init(|_, _| {}).unwrap();
        assert!(ctx.registry.snapshot_order().contains(&id));
        ctx.event_stop(id).unwrap();
        assert!(!ctx.registry.snapshot_order().contains(&id));
    }

    #[test]
    fn post_from_simulated_isr_wakes_a_waiting_thread() {
        let ctx = Arc::new(Context::default());
        let (tx, rx) = mpsc::channel();
        let id = ctx
            .event_init(move |_, events| tx.send(events).unwrap())
            .unwrap();

        let waiter = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || ctx.bits.wait(WakeBits::EVENT.bits(), evloop_abi::FOREVER_TICKS))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        let isr = evloop_runtime::isr::simulate_isr({
            let ctx = Arc::clone(&ctx);
            move || ctx.event_post(id).unwrap()
        });
        isr.join().unwrap();
        let bits = waiter.join().unwrap();
        assert_eq!(bits, WakeBits::EVENT.bits());
        let _ = rx.try_recv();
    }
}
