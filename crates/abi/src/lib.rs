// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared types for the evloop dispatch core and its platform layer.
//!
//! This crate mirrors the role `abi` plays for Hubris: a small, dependency-light
//! crate of plain data that both the dispatch engine and the code that drives it
//! need to agree on, kept separate so neither side pulls in the other's
//! internals.

#![forbid(unsafe_code)]

use bitflags::bitflags;

bitflags! {
    /// Events a watcher's callback may be asked to handle.
    ///
    /// Timer and event callbacks always fire with exactly [`EventMask::READ`].
    /// I/O callbacks fire with whatever subset of their requested mask the
    /// selector observed.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct EventMask: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const ERROR = 0b100;
    }
}

bitflags! {
    /// Flags accepted by `Context::run`.
    pub struct RunFlags: u8 {
        /// Return after a single dispatch iteration instead of looping forever.
        const ONCE = 0b01;
        /// Never block in the bit-group wait; a single iteration becomes a poll.
        const NONBLOCK = 0b10;
    }
}

bitflags! {
    /// The wake-bit group a context's dispatch loop waits on.
    pub struct WakeBits: u32 {
        const IO    = 0b001;
        const EVENT = 0b010;
        const TIMER = 0b100;
    }
}

/// Sentinel for `bits_wait`'s `timeout_ticks`: block with no timeout.
pub const FOREVER_TICKS: u64 = u64::MAX;

/// Stable handle to a watcher inside a context's registry.
///
/// Backed by a `slab` index plus a generation counter, so a handle from a
/// stopped-and-reused slot cannot silently address the wrong watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl WatcherId {
    #[doc(hidden)]
    pub fn from_raw_parts(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    #[doc(hidden)]
    pub fn raw_parts(self) -> (usize, u32) {
        (self.index, self.generation)
    }
}

/// The three error kinds named by the dispatch core's contract: every
/// fallible operation returns one of these, never a raw string or `anyhow`
/// type, so callbacks and hot-path callers can match on it without an
/// allocation.
#[derive(Debug, thiserror::Error, Clone, Copy)]
pub enum LoopError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("out of range: {0}")]
    OutOfRange(&'static str),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
}

pub type LoopResult<T> = Result<T, LoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_mask_bits_are_disjoint() {
        assert_eq!(EventMask::all().bits(), 0b111);
    }

    #[test]
    fn watcher_id_round_trips_raw_parts() {
        let id = WatcherId::from_raw_parts(7, 3);
        assert_eq!(id.raw_parts(), (7, 3));
    }

    #[test]
    fn error_messages_name_their_kind() {
        let e = LoopError::OutOfRange("period_ms");
        assert!(e.to_string().contains("out of range"));
    }
}
