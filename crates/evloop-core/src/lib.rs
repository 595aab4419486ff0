// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dispatch core of a micro event loop: one [`Context`] multiplexes
//! file-descriptor I/O, millisecond timers, and software-posted events into
//! a single cooperative [`Context::run`] loop.
//!
//! See the module docs on `registry`, `selector`, `dispatch`, `timer`,
//! `event`, and `io` for how each of the four watcher variants is wired
//! through the same arena and bit-group.

mod config;
mod context;
mod dispatch;
mod event;
mod io;
mod registry;
mod selector;
mod timer;
mod trace;
mod watcher;

pub use config::EvloopConfig;
pub use context::Context;
pub use evloop_abi::{EventMask, LoopError, LoopResult, RunFlags, WakeBits, WatcherId, FOREVER_TICKS};
pub use selector::iothread_init;
pub use trace::{snapshot as trace_snapshot, TraceEvent};
