// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Content store implementations
//!
//! [`MemoryStore`] keeps everything in a map (folders are inferred from the
//! key structure) and is what hosts and tests reach for first.
//! [`DirStore`] roots the store on a real directory.

use crate::host::{ContentStore, DirEntry, EntryKind};
use crate::resolver::normalize;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

/// In-memory content store.
///
/// Files are entries in a map; a path is a folder when at least one file
/// lives beneath it. Mutable at any time, so tests and hosts can change
/// content between requires.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the file at `path`.
    pub fn insert(&self, path: &str, text: impl Into<String>) {
        self.files.write().insert(normalize(path), text.into());
    }

    /// Remove the file at `path`.
    pub fn remove(&self, path: &str) {
        self.files.write().remove(&normalize(path));
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn kind(&self, path: &str) -> Option<EntryKind> {
        let path = normalize(path);
        let files = self.files.read();
        if files.contains_key(&path) {
            Some(EntryKind::File)
        } else if path.is_empty() {
            Some(EntryKind::Folder)
        } else {
            let prefix = format!("{path}/");
            files
                .keys()
                .any(|key| key.starts_with(&prefix))
                .then_some(EntryKind::Folder)
        }
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        self.files
            .read()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no file at '{path}'")))
    }

    async fn list(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        if self.kind(&path).await != Some(EntryKind::Folder) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no folder at '{path}'"),
            ));
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let files = self.files.read();
        let mut entries: Vec<DirEntry> = Vec::new();
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    let child = format!("{prefix}{folder}");
                    if !entries.iter().any(|e| e.path == child) {
                        entries.push(DirEntry {
                            path: child,
                            kind: EntryKind::Folder,
                        });
                    }
                }
                None => entries.push(DirEntry {
                    path: key.clone(),
                    kind: EntryKind::File,
                }),
            }
        }
        Ok(entries)
    }
}

/// Content store rooted on a real directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Create a store serving content from under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(normalize(path))
    }
}

#[async_trait]
impl ContentStore for DirStore {
    async fn kind(&self, path: &str) -> Option<EntryKind> {
        let metadata = tokio::fs::metadata(self.full_path(path)).await.ok()?;
        if metadata.is_file() {
            Some(EntryKind::File)
        } else if metadata.is_dir() {
            Some(EntryKind::Folder)
        } else {
            None
        }
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.full_path(path)).await
    }

    async fn list(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        let mut reader = tokio::fs::read_dir(self.full_path(&path)).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let child = if path.is_empty() {
                name
            } else {
                format!("{path}/{name}")
            };
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                EntryKind::Folder
            } else {
                EntryKind::File
            };
            entries.push(DirEntry { path: child, kind });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
