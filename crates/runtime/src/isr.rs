// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A stand-in for interrupt context.
//!
//! There is no interrupt controller to attach to on a hosted target. Tests
//! and demos that want to exercise an ISR-safe posting path (`event_post`,
//! `bits_set_from_isr`, a threadsafe timer's `timer_set`) spawn a plain OS
//! thread with [`simulate_isr`] instead. The thread is given no access to
//! anything but the ISR-safe entry points, the same discipline real ISR
//! handlers are held to.

use std::thread::{self, JoinHandle};

/// Runs `f` on a freshly spawned thread standing in for an ISR, and returns
/// its `JoinHandle` so the caller can wait for the simulated interrupt to
/// finish firing.
pub fn simulate_isr<F>(f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name("simulated-isr".into())
        .spawn(f)
        .expect("spawning the simulated-ISR thread")
}
