// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A fixed-capacity circular buffer of trace entries, for environments with
//! no dynamic filesystem to write a log to.
//!
//! This is a hosted descendant of this workspace's embedded `ringbuf` crate,
//! which declares a static, debugger-scannable circular buffer per module and
//! writes into it under an interrupt-disabled critical section. Here there is
//! a real OS and real threads instead of a single core with maskable
//! interrupts, so the critical section becomes a short-held `Mutex`; the
//! shape — static buffer, no allocation on the write path, oldest entry
//! silently overwritten once full — is unchanged.
//!
//! Entries are plain `Copy` structs. There is no string formatting on the
//! write path: anything that needs to read human-readable output calls
//! [`RingBuffer::snapshot`] and formats it outside the hot path (or outside
//! the simulated-ISR thread entirely).

use std::sync::Mutex;

/// A fixed-capacity, overwrite-oldest circular buffer of `T`.
///
/// `N` is the capacity. Construction is `const`, so a ring buffer can be
/// declared as a `static` the same way the embedded original is declared with
/// the `stringbuf!` macro.
pub struct RingBuffer<T, const N: usize> {
    inner: Mutex<Inner<T, N>>,
}

struct Inner<T, const N: usize> {
    buffer: [Option<T>; N],
    next: usize,
    /// Total entries ever written; used to order a snapshot and to let a
    /// caller tell "nothing happened" from "wrapped exactly N times".
    sequence: u64,
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: [None; N],
                next: 0,
                sequence: 0,
            }),
        }
    }

    /// Records `entry`, overwriting the oldest live entry once the buffer is
    /// full. Never allocates and never blocks on anything but the short
    /// internal lock.
    pub fn push(&self, entry: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let at = inner.next;
        inner.buffer[at] = Some(entry);
        inner.next = (at + 1) % N;
        inner.sequence += 1;
    }

    /// Returns the live entries in chronological order (oldest first).
    pub fn snapshot(&self) -> Vec<T> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let wrapped = inner.sequence as usize >= N;
        let start = if wrapped { inner.next } else { 0 };
        let len = if wrapped { N } else { inner.next };
        (0..len)
            .map(|i| inner.buffer[(start + i) % N].expect("within live range"))
            .collect()
    }

    /// Total entries ever written, including ones since overwritten.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).sequence
    }
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a named, statically-sized ring buffer in the current module.
///
/// `ringbuf!(NAME, CAPACITY, EntryType)` expands to a `pub static NAME:
/// RingBuffer<EntryType, CAPACITY>`. If `NAME` is omitted it defaults to
/// `EVLOOP_RINGBUF`, matching the embedded crate's `LOG__STRINGBUF` default.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $cap:expr, $ty:ty) => {
        pub static $name: $crate::RingBuffer<$ty, $cap> =
            $crate::RingBuffer::new();
    };
    ($cap:expr, $ty:ty) => {
        $crate::ringbuf!(EVLOOP_RINGBUF, $cap, $ty);
    };
}

/// Pushes an entry into a ring buffer declared with [`ringbuf!`].
///
/// `ringbuf_entry!(NAME, expr)` is `NAME.push(expr)`; omitting `NAME` targets
/// the default `EVLOOP_RINGBUF`.
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:path, $entry:expr) => {
        $name.push($entry)
    };
    ($entry:expr) => {
        $crate::ringbuf_entry!(EVLOOP_RINGBUF, $entry)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_snapshot_preserve_order_before_wrap() {
        let rb: RingBuffer<u32, 4> = RingBuffer::new();
        rb.push(1);
        rb.push(2);
        rb.push(3);
        assert_eq!(rb.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn wrapping_drops_the_oldest_entry() {
        let rb: RingBuffer<u32, 3> = RingBuffer::new();
        for v in 1..=5u32 {
            rb.push(v);
        }
        assert_eq!(rb.snapshot(), vec![3, 4, 5]);
        assert_eq!(rb.sequence(), 5);
    }

    #[test]
    fn macro_declares_default_named_buffer() {
        ringbuf!(TEST_RB, 2, u8);
        TEST_RB.push(9);
        ringbuf_entry!(TEST_RB, 10);
        assert_eq!(TEST_RB.snapshot(), vec![9, 10]);
    }
}
