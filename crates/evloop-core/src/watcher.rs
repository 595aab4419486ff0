// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Watcher payloads.
//!
//! The original hides its four payload variants behind a tagged union with a
//! common header. Here that becomes a plain `enum` with one case per variant,
//! each carrying only the fields that variant needs; shared header fields
//! (active flag, callback) live on [`WatcherSlot`] instead of being
//! duplicated into every case.

use evloop_abi::EventMask;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU8};
use std::sync::Mutex;

/// The user callback for a watcher.
///
/// The original passes `(watcher, arg, events)`, where `arg` is an opaque
/// `void*` the caller supplied at `*_init` time and gets back unchanged on
/// every call. A `Box<dyn FnMut>` closure captures that same state directly
/// instead of round-tripping it through a raw pointer, which is the
/// idiomatic Rust shape for "callback plus its own context" and needs no
/// `unsafe` on the call site.
pub type Callback = Box<dyn FnMut(crate::WatcherId, EventMask) + Send>;

/// Schedule fields shared by both timer variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerFields {
    pub timeout_ms: u64,
    pub period_ms: u64,
    /// Absolute deadline in milliseconds since the runtime epoch. Zero means
    /// dormant (invariant 3 in the spec).
    pub deadline_ms: u64,
}

impl TimerFields {
    pub fn is_dormant(&self) -> bool {
        self.deadline_ms == 0
    }
}

/// An I/O watcher's mutable state.
pub struct IoFields {
    pub fd: RawFd,
    pub requested: EventMask,
    /// Monotonically OR-accumulated by the selector, cleared by the
    /// dispatcher after it copies out the bits it is about to deliver
    /// (invariant 2).
    pub pending: AtomicU8,
}

/// An event watcher's mutable state.
#[derive(Default)]
pub struct EventFields {
    pub posted: AtomicBool,
}

/// The four watcher payload variants.
pub enum WatcherKind {
    Io(IoFields),
    /// Non-threadsafe timer: mutated only by the owning loop's task.
    Timer(TimerFields),
    /// Threadsafe timer: the lock covers every read and write of the triple
    /// (invariant 5), independent of whatever lock the registry itself uses
    /// for structural bookkeeping.
    TimerTs(Mutex<TimerFields>),
    Event(EventFields),
}

impl WatcherKind {
    pub fn variant_name(&self) -> &'static str {
        match self {
            WatcherKind::Io(_) => "io",
            WatcherKind::Timer(_) => "timer",
            WatcherKind::TimerTs(_) => "timer_ts",
            WatcherKind::Event(_) => "event",
        }
    }
}

/// A watcher's state as stored in the registry's arena: the header fields
/// common to every variant, plus its payload.
pub struct WatcherSlot {
    pub active: AtomicBool,
    pub callback: Option<Callback>,
    pub kind: WatcherKind,
}

impl WatcherSlot {
    pub fn new(kind: WatcherKind, callback: Callback) -> Self {
        Self {
            active: AtomicBool::new(false),
            callback: Some(callback),
            kind,
        }
    }
}
