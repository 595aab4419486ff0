// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Millisecond-resolution timer watchers.
//!
//! Two variants, matching the spec's split: a plain [`TimerFields`] timer
//! meant to be touched only from the task that owns the loop, and a
//! threadsafe one (`timer_ts_*`) whose triple lives behind a lock so another
//! thread can rearm it while the loop is blocked in [`crate::dispatch`]'s
//! wait.
//!
//! The original's `timeout`/`period` parameters are signed, with ERANGE on a
//! negative value; here they are `u64`, so that case is prevented at the
//! type level rather than checked at the call site. A `timeout_ms` of zero
//! is valid and means "fire on the next iteration" (see the periodic-timer
//! scenario in the dispatch loop's tests), matching invariant 3's "deadline
//! is zero iff dormant" — a timer that has been `set` always gets a nonzero
//! deadline because `now_us` is always nonzero by the time a caller can
//! reach `timer_set`.

use crate::context::Context;
use crate::trace::{self, TraceEvent};
use crate::watcher::{Callback, TimerFields, WatcherKind};
use evloop_abi::{LoopError, LoopResult, WatcherId};
use evloop_ringbuf::ringbuf_entry;
use evloop_runtime::now_us;

fn deadline_from_timeout(timeout_ms: u64) -> u64 {
    let now_ms = now_us() / 1_000;
    now_ms.saturating_add(timeout_ms).max(1)
}

impl Context {
    /// `timer_init`: registers a non-threadsafe, dormant timer.
    pub fn timer_init(
        &self,
        callback: impl FnMut(WatcherId, evloop_abi::EventMask) + Send + 'static,
    ) -> LoopResult<WatcherId> {
        self.registry
            .insert(WatcherKind::Timer(TimerFields::default()), Box::new(callback) as Callback)
    }

    /// `timer_ts_init`: registers a threadsafe, dormant timer whose schedule
    /// triple can be rearmed from any thread via [`Self::timer_ts_set`]. Linked
    /// into the context's order list immediately, since a threadsafe timer
    /// retains its linkage for its whole lifetime (see [`Self::timer_stop`])
    /// rather than being linked only on `start`.
    pub fn timer_ts_init(
        &self,
        callback: impl FnMut(WatcherId, evloop_abi::EventMask) + Send + 'static,
    ) -> LoopResult<WatcherId> {
        let id = self.registry.insert(
            WatcherKind::TimerTs(std::sync::Mutex::new(TimerFields::default())),
            Box::new(callback) as Callback,
        )?;
        self.registry.link(id);
        Ok(id)
    }

    /// `timer_set`: sets `timeout_ms`/`period_ms` and computes the next
    /// deadline. Valid on a non-threadsafe timer only; callers on a
    /// `timer_ts` watcher get `InvalidArgument` and should use
    /// [`Self::timer_ts_set`] instead.
    ///
    /// Unlike [`Self::timer_ts_set`] this does not set the TIMER wake bit:
    /// a non-threadsafe timer is only ever touched by the task that owns the
    /// loop, either before `run` starts (nothing is waiting yet) or from
    /// inside a callback the dispatching thread is already executing, so
    /// there is never another thread blocked in the wait to wake — and
    /// setting the bit pre-emptively would make the *next* `bits_wait` return
    /// immediately instead of actually sleeping until the new deadline.
    pub fn timer_set(&self, id: WatcherId, timeout_ms: u64, period_ms: u64) -> LoopResult<()> {
        let deadline_ms = deadline_from_timeout(timeout_ms);
        self.registry.with_kind_mut(id, |kind| match kind {
            WatcherKind::Timer(fields) => {
                fields.timeout_ms = timeout_ms;
                fields.period_ms = period_ms;
                fields.deadline_ms = deadline_ms;
                Ok(())
            }
            _ => Err(LoopError::InvalidArgument(
                "watcher is not a non-threadsafe timer",
            )),
        })?
    }

    /// `timer_ts_set`: the threadsafe counterpart of [`Self::timer_set`],
    /// safe to call while the owning loop is running on another thread. Wakes
    /// the loop via the TIMER bit so a deadline moved earlier by another
    /// thread is picked up without waiting for the stale deadline to expire.
    pub fn timer_ts_set(&self, id: WatcherId, timeout_ms: u64, period_ms: u64) -> LoopResult<()> {
        let deadline_ms = deadline_from_timeout(timeout_ms);
        self.registry.with_kind(id, |kind| match kind {
            WatcherKind::TimerTs(lock) => {
                let mut fields = lock.lock().unwrap_or_else(|e| e.into_inner());
                fields.timeout_ms = timeout_ms;
                fields.period_ms = period_ms;
                fields.deadline_ms = deadline_ms;
                Ok(())
            }
            _ => Err(LoopError::InvalidArgument("watcher is not a threadsafe timer")),
        })??;
        self.bits.set_from_isr(evloop_abi::WakeBits::TIMER.bits());
        Ok(())
    }

    /// `timer_start`: links the watcher into the dispatch order and marks it
    /// active. The deadline set by `timer_set`/`timer_ts_set` is left as-is;
    /// calling `start` before `set` starts a dormant timer that never fires
    /// until `set` gives it a real deadline.
    pub fn timer_start(&self, id: WatcherId) -> LoopResult<()> {
        let kind_name = self.registry.with_kind(id, |kind| match kind {
            WatcherKind::Timer(_) => Ok("timer"),
            WatcherKind::TimerTs(_) => Ok("timer_ts"),
            _ => Err(LoopError::InvalidArgument("watcher is not a timer")),
        })??;
        self.registry.link(id);
        self.registry.set_active(id, true)?;
        ringbuf_entry!(
            trace::EVLOOP_TRACE,
            TraceEvent::WatcherStarted { index: id.raw_parts().0, kind: kind_name }
        );
        Ok(())
    }

    /// `timer_stop`: deactivates the watcher. A non-threadsafe timer is also
    /// unlinked from the context's order list, to be relinked by a later
    /// `start`; a threadsafe timer keeps its linkage across `stop`, per the
    /// variant's lifecycle rule (it is only ever unlinked by `exit`
    /// destroying the context). Either way the schedule is left intact, so a
    /// later `start` without an intervening `set` resumes at whatever
    /// deadline was last computed.
    pub fn timer_stop(&self, id: WatcherId) -> LoopResult<()> {
        let kind_name = self.registry.with_kind(id, |kind| match kind {
            WatcherKind::Timer(_) => Ok("timer"),
            WatcherKind::TimerTs(_) => Ok("timer_ts"),
            _ => Err(LoopError::InvalidArgument("watcher is not a timer")),
        })??;
        self.registry.set_active(id, false)?;
        if kind_name == "timer" {
            self.registry.unlink(id);
        }
        ringbuf_entry!(
            trace::EVLOOP_TRACE,
            TraceEvent::WatcherStopped { index: id.raw_parts().0, kind: kind_name }
        );
        Ok(())
    }
}
