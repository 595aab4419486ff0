// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Context sizing configuration.
//!
//! `build/util` pulls typed sections out of `app.toml` with
//! `serde`+`toml`, wrapped in `anyhow::Context` for readable errors, at
//! build time. A hosted library has no build-time `app.toml` stage, so this
//! loads the same shape of typed configuration at construction time instead,
//! from an explicit string or file rather than an environment variable.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::path::Path;

/// Sizing knobs for one [`crate::Context`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EvloopConfig {
    /// Number of watcher slots preallocated in the context's arena. Never
    /// grows past this at runtime; exceeding it fails `*_init` calls with
    /// `LoopError::ResourceExhausted`.
    pub watcher_capacity: usize,
    /// Entries kept in the context's diagnostic ring buffer.
    pub ringbuf_capacity: usize,
    /// Backoff, in milliseconds, the I/O selector sleeps after a `select`
    /// error other than `EINTR` before retrying.
    pub selector_backoff_ms: u64,
}

impl Default for EvloopConfig {
    fn default() -> Self {
        Self {
            watcher_capacity: 64,
            ringbuf_capacity: 256,
            selector_backoff_ms: 1000,
        }
    }
}

impl EvloopConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("deserializing evloop configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading evloop config from {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}
