// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module cache
//!
//! Path -> evaluated export value; the single source of truth for "already
//! loaded". Owned by the coordinator's state table so that the cache, error
//! table, and in-flight index can be read and swapped under one lock.

use crate::value::Value;
use std::collections::HashMap;

/// Cache of evaluated module exports keyed by canonical path.
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: HashMap<String, Value>,
}

impl ModuleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached value for `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.entries.get(path).cloned()
    }

    /// Check whether `path` is cached.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Cache `value` under `path`.
    pub fn insert(&mut self, path: String, value: Value) {
        self.entries.insert(path, value);
    }

    /// All cached paths.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only copy of the full cache contents.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.clone()
    }
}
