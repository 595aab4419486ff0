// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor-readiness watchers.
//!
//! `io_start`/`io_stop` hand the watcher to the process-wide [`selector`]
//! task, which runs on its own thread and therefore needs to keep the
//! watcher's context alive independently of whatever scope registered it.
//! That is the one place this crate asks callers to hold their `Context` in
//! an `Arc` — every other operation only needs `&Context`.

use crate::context::Context;
use crate::selector;
use crate::trace::{self, TraceEvent};
use crate::watcher::{Callback, IoFields, WatcherKind};
use evloop_abi::{EventMask, LoopError, LoopResult, WatcherId};
use evloop_ringbuf::ringbuf_entry;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

impl Context {
    /// `io_init`: fills the watcher's fields; not started.
    pub fn io_init(
        &self,
        fd: RawFd,
        requested: EventMask,
        callback: impl FnMut(WatcherId, EventMask) + Send + 'static,
    ) -> LoopResult<WatcherId> {
        let fields = IoFields {
            fd,
            requested,
            pending: AtomicU8::new(0),
        };
        self.registry
            .insert(WatcherKind::Io(fields), Box::new(callback) as Callback)
    }

    /// `io_set`: updates the descriptor and requested mask. Valid whether or
    /// not the watcher is currently started; takes effect the next time the
    /// selector rebuilds its readiness set.
    pub fn io_set(&self, id: WatcherId, fd: RawFd, requested: EventMask) -> LoopResult<()> {
        self.registry.with_kind_mut(id, |kind| match kind {
            WatcherKind::Io(fields) => {
                fields.fd = fd;
                fields.requested = requested;
                Ok(())
            }
            _ => Err(LoopError::InvalidArgument("watcher is not an I/O watcher")),
        })?
    }

    /// `io_start`: arms the watcher and hands it to the selector task,
    /// starting that task first if needed.
    pub fn io_start(self: &Arc<Self>, id: WatcherId) -> LoopResult<()> {
        if self.registry.is_active(id)? {
            return Ok(());
        }
        let fd = self.registry.with_kind(id, |kind| match kind {
            WatcherKind::Io(fields) => Ok(fields.fd),
            _ => Err(LoopError::InvalidArgument("watcher is not an I/O watcher")),
        })??;
        if fd < 0 {
            return Err(LoopError::InvalidArgument("I/O watcher has a negative descriptor"));
        }

        self.registry.link(id);
        self.registry.set_active(id, true)?;
        selector::add(
            Arc::clone(self),
            id,
            std::time::Duration::from_millis(self.config.selector_backoff_ms),
        )?;
        ringbuf_entry!(
            trace::EVLOOP_TRACE,
            TraceEvent::WatcherStarted { index: id.raw_parts().0, kind: "io" }
        );
        Ok(())
    }

    /// `io_stop`: disarms the watcher and removes it from the selector.
    pub fn io_stop(self: &Arc<Self>, id: WatcherId) -> LoopResult<()> {
        if !self.registry.is_active(id)? {
            return Ok(());
        }
        self.registry.set_active(id, false)?;
        self.registry.unlink(id);
        selector::remove(self, id);
        ringbuf_entry!(
            trace::EVLOOP_TRACE,
            TraceEvent::WatcherStopped { index: id.raw_parts().0, kind: "io" }
        );
        Ok(())
    }
}

/// Clears the bits the dispatcher just delivered and wakes the selector to
/// rebuild its readiness set, re-admitting this watcher. Called by the
/// dispatch loop after invoking an I/O callback, never by user code.
pub(crate) fn clear_delivered_and_rewake(fields: &IoFields, delivered: EventMask) {
    fields
        .pending
        .fetch_and(!delivered.bits(), Ordering::AcqRel);
    selector::notify_drained();
}
