// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostic tracing for the dispatch core's hot path.
//!
//! Entries go into a fixed-capacity [`evloop_ringbuf::RingBuffer`] rather
//! than through a formatting-heavy logging facade: the simulated-ISR path
//! (and, on a real target, an actual ISR) must be able to record "I posted
//! this event" without allocating or formatting a string. Anything that
//! wants a human-readable log calls [`snapshot`] and formats it on its own
//! time, off the hot path — see `selector.rs` for the one place this crate
//! additionally reaches for `tracing`, where a fatal, rare condition
//! benefits from being seen immediately rather than pulled from the buffer.

use evloop_ringbuf::ringbuf;

#[derive(Debug, Clone, Copy)]
pub enum TraceEvent {
    WatcherStarted { index: usize, kind: &'static str },
    WatcherStopped { index: usize, kind: &'static str },
    WatcherFired { index: usize, kind: &'static str },
    TimerRearmed { index: usize, deadline_ms: u64 },
    SelectorWoke,
    SelectorTerminated,
}

ringbuf!(EVLOOP_TRACE, 512, TraceEvent);

pub fn snapshot() -> Vec<TraceEvent> {
    EVLOOP_TRACE.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_recorded_in_order() {
        let before = EVLOOP_TRACE.sequence();
        EVLOOP_TRACE.push(TraceEvent::SelectorWoke);
        EVLOOP_TRACE.push(TraceEvent::SelectorTerminated);
        assert_eq!(EVLOOP_TRACE.sequence(), before + 2);
    }
}
