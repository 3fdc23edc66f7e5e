// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host collaborator traits
//!
//! The loader is embedded in a larger application and never owns its
//! environment: content comes from a [`ContentStore`], load-order
//! configuration from a [`SettingsSource`], and user-facing failure counts go
//! to a [`NoticeSink`]. All three are injected as trait objects.

use crate::config::LoadOrderEntry;
use async_trait::async_trait;

/// What a canonical path denotes inside the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A plain file
    File,
    /// A folder with children
    Folder,
}

/// One immediate child of a folder
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Canonical path of the child
    pub path: String,
    /// Whether the child is a file or a folder
    pub kind: EntryKind,
}

/// Read access to the content store backing the loader.
///
/// Paths are canonical slash-joined strings with no leading slash, as
/// produced by the resolver.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Determine whether `path` denotes a file, a folder, or neither.
    async fn kind(&self, path: &str) -> Option<EntryKind>;

    /// Read the full text of the file at `path`.
    async fn read(&self, path: &str) -> std::io::Result<String>;

    /// List the immediate children of the folder at `path`.
    async fn list(&self, path: &str) -> std::io::Result<Vec<DirEntry>>;
}

/// Fire-and-forget notification channel to the user.
pub trait NoticeSink: Send + Sync {
    /// Surface a user-facing message. Used once per reload pass to report an
    /// aggregate failure count, never for individual load errors.
    fn notify(&self, message: String);

    /// Called after a reload pass so a dependent index can pick up the new
    /// content. No-op by default.
    fn content_changed(&self) {}
}

/// A [`NoticeSink`] that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotices;

impl NoticeSink for NullNotices {
    fn notify(&self, _message: String) {}
}

/// Provider of the ordered load-order configuration.
///
/// Consulted at the start of every reload pass, so each pass observes the
/// configuration current at that moment.
pub trait SettingsSource: Send + Sync {
    /// The configured load-order entries, in priority order.
    fn load_order(&self) -> Vec<LoadOrderEntry>;
}
