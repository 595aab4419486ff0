// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The watcher registry: an arena of watcher slots plus an explicit
//! insertion-order list.
//!
//! The design notes call for "arena + stable indices" as the hosted
//! translation of the original's intrusive, caller-owned doubly-linked list,
//! the same shape this corpus's task tables use (a generation-checked index
//! into a flat table rather than a raw pointer). [`slab::Slab`] gives us the
//! arena; the order list gives us the traversal order the spec requires
//! ("insertion-relative order") without needing real prev/next pointers on
//! every slot.

use crate::watcher::{Callback, WatcherKind, WatcherSlot};
use evloop_abi::{LoopError, LoopResult, WatcherId};
use slab::Slab;
use std::sync::Mutex;

pub struct Registry {
    slab: Mutex<Slab<WatcherSlot>>,
    order: Mutex<Vec<WatcherId>>,
    /// Current generation of each slab index, keyed by index. Bumped every
    /// time an index is reused by a new `insert`, so a [`WatcherId`] minted
    /// for a since-removed watcher cannot silently address whatever new
    /// watcher was later allocated into the same slot.
    generations: Mutex<Vec<u32>>,
    capacity: usize,
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slab: Mutex::new(Slab::with_capacity(capacity)),
            order: Mutex::new(Vec::with_capacity(capacity)),
            generations: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Allocates a slot for a newly-initialized watcher. Does not link it
    /// into the traversal order; callers do that via [`Self::link`]
    /// according to their variant's linking rule (see `context.rs`).
    pub fn insert(&self, kind: WatcherKind, callback: Callback) -> LoopResult<WatcherId> {
        let mut slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        if slab.len() >= self.capacity {
            return Err(LoopError::ResourceExhausted("watcher arena is full"));
        }
        let index = slab.insert(WatcherSlot::new(kind, callback));
        let mut generations = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        if index == generations.len() {
            generations.push(0);
        } else {
            generations[index] = generations[index].wrapping_add(1);
        }
        Ok(WatcherId::from_raw_parts(index, generations[index]))
    }

    /// Frees a watcher's slot entirely. Only used by `exit`, which tears the
    /// whole context down.
    pub fn remove(&self, id: WatcherId) {
        self.unlink(id);
        let mut slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        let (index, generation) = id.raw_parts();
        let current = self
            .generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .copied();
        if current == Some(generation) && slab.contains(index) {
            slab.remove(index);
        }
    }

    pub fn link(&self, id: WatcherId) {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        if !order.contains(&id) {
            order.push(id);
        }
    }

    pub fn unlink(&self, id: WatcherId) {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.retain(|existing| *existing != id);
    }

    /// A snapshot of the current traversal order, safe to iterate while other
    /// threads (or a callback fired partway through the same sweep) mutate
    /// the live order list; a watcher added or removed mid-sweep takes effect
    /// on the next sweep, per the spec's ordering contract.
    pub fn snapshot_order(&self) -> Vec<WatcherId> {
        self.order.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_active(&self, id: WatcherId) -> LoopResult<bool> {
        self.with_slot(id, |slot| {
            slot.active.load(std::sync::atomic::Ordering::Acquire)
        })
    }

    pub fn set_active(&self, id: WatcherId, value: bool) -> LoopResult<()> {
        self.with_slot(id, |slot| {
            slot.active.store(value, std::sync::atomic::Ordering::Release)
        })
    }

    pub fn with_kind<R>(&self, id: WatcherId, f: impl FnOnce(&WatcherKind) -> R) -> LoopResult<R> {
        self.with_slot(id, |slot| f(&slot.kind))
    }

    pub fn with_kind_mut<R>(
        &self,
        id: WatcherId,
        f: impl FnOnce(&mut WatcherKind) -> R,
    ) -> LoopResult<R> {
        self.with_slot_mut(id, |slot| f(&mut slot.kind))
    }

    /// Takes the callback out of its slot so it can be invoked without the
    /// registry lock held (a callback that calls back into the registry,
    /// e.g. to start a new timer, must not deadlock against the lock this
    /// method briefly holds). Returns `None` if the watcher was removed or
    /// its callback is already out (a watcher cannot be re-entered while its
    /// own callback is firing).
    pub fn take_callback(&self, id: WatcherId) -> Option<Callback> {
        let (index, generation) = id.raw_parts();
        if self.current_generation(index) != Some(generation) {
            return None;
        }
        let mut slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        slab.get_mut(index).and_then(|slot| slot.callback.take())
    }

    pub fn put_callback(&self, id: WatcherId, callback: Callback) {
        let (index, generation) = id.raw_parts();
        if self.current_generation(index) != Some(generation) {
            return;
        }
        let mut slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slab.get_mut(index) {
            slot.callback = Some(callback);
        }
    }

    pub fn contains(&self, id: WatcherId) -> bool {
        let (index, generation) = id.raw_parts();
        if self.current_generation(index) != Some(generation) {
            return false;
        }
        let slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        slab.contains(index)
    }

    pub fn clear(&self) {
        let mut slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        slab.clear();
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.clear();
    }

    fn current_generation(&self, index: usize) -> Option<u32> {
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .copied()
    }

    fn with_slot<R>(&self, id: WatcherId, f: impl FnOnce(&WatcherSlot) -> R) -> LoopResult<R> {
        let (index, generation) = id.raw_parts();
        if self.current_generation(index) != Some(generation) {
            return Err(LoopError::InvalidArgument("watcher is not registered"));
        }
        let slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        slab.get(index)
            .map(f)
            .ok_or(LoopError::InvalidArgument("watcher is not registered"))
    }

    fn with_slot_mut<R>(
        &self,
        id: WatcherId,
        f: impl FnOnce(&mut WatcherSlot) -> R,
    ) -> LoopResult<R> {
        let (index, generation) = id.raw_parts();
        if self.current_generation(index) != Some(generation) {
            return Err(LoopError::InvalidArgument("watcher is not registered"));
        }
        let mut slab = self.slab.lock().unwrap_or_else(|e| e.into_inner());
        slab.get_mut(index)
            .map(f)
            .ok_or(LoopError::InvalidArgument("watcher is not registered"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::EventFields;

    fn noop_callback() -> Callback {
        Box::new(|_, _| {})
    }

    #[test]
    fn insert_then_link_appears_once_in_order() {
        let registry = Registry::with_capacity(4);
        let id = registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap();
        registry.link(id);
        registry.link(id);
        assert_eq!(registry.snapshot_order(), vec![id]);
    }

    #[test]
    fn unlink_removes_from_order_but_keeps_the_slot() {
        let registry = Registry::with_capacity(4);
        let id = registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap();
        registry.link(id);
        registry.unlink(id);
        assert!(registry.snapshot_order().is_empty());
        assert!(registry.contains(id));
    }

    #[test]
    fn full_arena_reports_resource_exhausted() {
        let registry = Registry::with_capacity(1);
        registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap();
        let err = registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap_err();
        assert!(matches!(err, LoopError::ResourceExhausted(_)));
    }

    #[test]
    fn operating_on_an_unregistered_id_is_invalid_argument() {
        let registry = Registry::with_capacity(4);
        let id = WatcherId::from_raw_parts(99, 0);
        assert!(matches!(
            registry.is_active(id).unwrap_err(),
            LoopError::InvalidArgument(_)
        ));
    }

    #[test]
    fn take_callback_then_put_back_round_trips() {
        let registry = Registry::with_capacity(4);
        let id = registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap();
        let cb = registry.take_callback(id).expect("callback present");
        assert!(registry.take_callback(id).is_none());
        registry.put_callback(id, cb);
        assert!(registry.take_callback(id).is_some());
    }

    #[test]
    fn a_stale_id_does_not_address_a_slot_reused_after_removal() {
        let registry = Registry::with_capacity(1);
        let first = registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap();
        registry.remove(first);
        let second = registry
            .insert(WatcherKind::Event(EventFields::default()), noop_callback())
            .unwrap();
        assert_eq!(first.raw_parts().0, second.raw_parts().0);
        assert_ne!(first, second);
        assert!(matches!(
            registry.is_active(first).unwrap_err(),
            LoopError::InvalidArgument(_)
        ));
        assert!(registry.is_active(second).is_ok());
    }
}
