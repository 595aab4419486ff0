// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform primitives the dispatch core treats as given: a monotonic clock,
//! a bit-group wait/set/clear primitive, and a process-global critical
//! section.
//!
//! On Hubris these are kernel syscalls (`sys_recv`, `sys_post`, `sys_set_timer`)
//! reached through `userlib`'s thin stubs. This crate is the hosted
//! equivalent: no syscall stubs, but the same three contracts, so the
//! dispatch core in `evloop-core` is written once against this crate and
//! never against `std` directly.

pub mod clock;
pub mod critical_section;
pub mod isr;

pub use clock::now_us;
pub use critical_section::critical_section;

use evloop_abi::FOREVER_TICKS;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A multi-producer, single-consumer set of wake bits with clear-on-read
/// timed wait, the hosted analogue of an RTOS event-group / Hubris
/// notification word.
///
/// `bits_wait` is the only consumer-side operation; `set`/`set_from_isr` are
/// the producer-side operations. Both producer operations have identical
/// bodies on a hosted target (there is no real interrupt context to special
/// case), but are kept as distinct entry points so call sites read the same
/// as they would against a future `no_std` backend, and so it is obvious at
/// the call site whether a given post is expected to originate from the
/// simulated-ISR path.
pub struct BitGroup {
    bits: Mutex<u32>,
    woken: Condvar,
}

impl BitGroup {
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            woken: Condvar::new(),
        }
    }

    /// Blocks the caller until any bit in `mask` is set, or `timeout_ticks`
    /// milliseconds elapse. Returns the bits that were set and observed,
    /// clearing exactly those bits before returning. `timeout_ticks ==
    /// FOREVER_TICKS` waits with no timeout; `0` polls without blocking.
    pub fn wait(&self, mask: u32, timeout_ticks: u64) -> u32 {
        let mut bits = self.bits.lock().unwrap_or_else(|e| e.into_inner());
        let observed = *bits & mask;
        if observed != 0 {
            *bits &= !observed;
            return observed;
        }
        if timeout_ticks == 0 {
            return 0;
        }

        let deadline = (timeout_ticks != FOREVER_TICKS)
            .then(|| Instant::now() + Duration::from_millis(timeout_ticks));

        loop {
            bits = match deadline {
                None => self
                    .woken
                    .wait(bits)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return 0;
                    }
                    let (guard, timeout_result) = self
                        .woken
                        .wait_timeout(bits, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    if timeout_result.timed_out() && (*guard & mask) == 0 {
                        return 0;
                    }
                    guard
                }
            };

            let observed = *bits & mask;
            if observed != 0 {
                *bits &= !observed;
                return observed;
            }
        }
    }

    /// Sets `mask`, waking any waiter. Call from ordinary task context.
    pub fn set(&self, mask: u32) {
        let mut bits = self.bits.lock().unwrap_or_else(|e| e.into_inner());
        *bits |= mask;
        drop(bits);
        self.woken.notify_all();
    }

    /// Sets `mask` from the simulated-ISR path. Identical to [`Self::set`] on
    /// a hosted target; kept distinct for call-site fidelity (see module docs).
    pub fn set_from_isr(&self, mask: u32) {
        self.set(mask);
    }
}

impl Default for BitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_when_bit_already_set() {
        let group = BitGroup::new();
        group.set(0b01);
        let bits = group.wait(0b01, 0);
        assert_eq!(bits, 0b01);
        // Cleared on read.
        assert_eq!(group.wait(0b01, 0), 0);
    }

    #[test]
    fn nonblocking_poll_returns_zero_when_nothing_set() {
        let group = BitGroup::new();
        assert_eq!(group.wait(0b111, 0), 0);
    }

    #[test]
    fn wait_wakes_when_another_thread_sets_a_bit() {
        let group = Arc::new(BitGroup::new());
        let waiter = {
            let group = Arc::clone(&group);
            thread::spawn(move || group.wait(0b010, FOREVER_TICKS))
        };
        thread::sleep(Duration::from_millis(20));
        group.set_from_isr(0b010);
        let bits = waiter.join().unwrap();
        assert_eq!(bits, 0b010);
    }

    #[test]
    fn wait_times_out_when_nothing_is_set() {
        let group = BitGroup::new();
        let start = Instant::now();
        let bits = group.wait(0b001, 25);
        assert_eq!(bits, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
