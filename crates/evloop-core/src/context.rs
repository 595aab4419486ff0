// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One loop context: a watcher registry plus the bit-group its dispatch loop
//! waits on.

use crate::config::EvloopConfig;
use crate::registry::Registry;
use evloop_runtime::BitGroup;
use std::sync::atomic::AtomicBool;

pub struct Context {
    pub(crate) registry: Registry,
    pub(crate) bits: BitGroup,
    pub(crate) running: AtomicBool,
    pub(crate) config: EvloopConfig,
}

impl Context {
    /// `context_init`: a fresh, not-running context sized per `config`.
    pub fn new(config: EvloopConfig) -> Self {
        Self {
            registry: Registry::with_capacity(config.watcher_capacity),
            bits: BitGroup::new(),
            running: AtomicBool::new(false),
            config,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(EvloopConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_running() {
        let ctx = Context::default();
        assert!(!ctx.is_running());
    }
}
