// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A process-global critical section.
//!
//! On a single-core microcontroller the equivalent primitive disables
//! interrupts for the duration of the closure. There is no such thing as
//! disabling interrupts from user space on a hosted target, so this is a
//! plain global lock: every registry and iolist mutation that the spec calls
//! "under the global critical section" takes this lock for the duration of
//! the mutation and no longer, which is what the embedded original buys by
//! disabling interrupts around a few instructions.

use std::sync::{Mutex, MutexGuard};

static LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with the global critical section held. `f` must not block and
/// must not itself try to take the critical section (it is not reentrant),
/// mirroring the embedded original's non-reentrant interrupt-disable.
pub fn critical_section<R>(f: impl FnOnce() -> R) -> R {
    let _guard: MutexGuard<'_, ()> = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    f()
}
