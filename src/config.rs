// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Load-order configuration

use crate::host::SettingsSource;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One load-order entry: a group of file-or-folder paths loaded together.
///
/// Entries are processed in configuration order; within one entry the
/// discovered files sort lexicographically, and a path already claimed by an
/// earlier entry is skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOrderEntry {
    /// File or folder paths. Folders are expanded recursively at reload time
    /// and also become module search roots.
    pub paths: Vec<String>,
}

impl LoadOrderEntry {
    /// Convenience constructor from anything string-like.
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Loader settings as persisted by the host application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Ordered load-order entries
    pub load_order: Vec<LoadOrderEntry>,
}

impl SettingsSource for LoaderSettings {
    fn load_order(&self) -> Vec<LoadOrderEntry> {
        self.load_order.clone()
    }
}

// Hosts that mutate settings at runtime can share them behind a lock.
impl SettingsSource for RwLock<LoaderSettings> {
    fn load_order(&self) -> Vec<LoadOrderEntry> {
        self.read().load_order.clone()
    }
}

impl<T: SettingsSource + ?Sized> SettingsSource for Arc<T> {
    fn load_order(&self) -> Vec<LoadOrderEntry> {
        (**self).load_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: LoaderSettings =
            serde_json::from_str(r#"{"load_order": [{"paths": ["scripts"]}, {}]}"#).unwrap();
        assert_eq!(settings.load_order.len(), 2);
        assert_eq!(settings.load_order[0].paths, vec!["scripts"]);
        assert!(settings.load_order[1].paths.is_empty());
    }
}
