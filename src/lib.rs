// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # vault-loader
//!
//! A hot-reloadable script module loader for user content vaults. Users drop
//! script files into a content store and require them from each other as if
//! they were modules in a conventional module system:
//!
//! - bare, relative, and root-absolute identifier resolution against
//!   configured search roots
//! - pluggable per-extension content handlers (script modules and JSON built
//!   in, anything else caller-registered)
//! - in-memory memoization of loaded results
//! - joining of concurrent requires of a path that is still in flight, with
//!   circular-require detection over the dynamically discovered graph
//! - whole-program reload that invalidates all cached state and serializes
//!   overlapping reload requests
//!
//! The loader owns none of its environment. Content comes from an injected
//! [`ContentStore`], scripts execute on an injected [`ScriptEngine`] (with
//! full host privileges; there is no sandboxing), load-order configuration
//! comes from a [`SettingsSource`], and aggregate failure counts go to a
//! [`NoticeSink`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vault_loader::{LoaderOptions, LoaderSettings, MemoryStore, ModuleLoader};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert("scripts/hello.js", "...");
//!
//!     let settings = LoaderSettings {
//!         load_order: vec![vault_loader::LoadOrderEntry::new(["scripts"])],
//!     };
//!
//!     let loader = ModuleLoader::new(LoaderOptions::new(
//!         store,
//!         engine, // your ScriptEngine implementation
//!         Arc::new(settings),
//!     ))?;
//!
//!     loader.reload().await;
//!     let exports = loader.require("hello", None).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod value;

// Re-exports
pub use cache::ModuleCache;
pub use config::{LoadOrderEntry, LoaderSettings};
pub use error::{LoadCause, LoaderError, Result};
pub use evaluator::{ModuleHandle, ModuleScope, RequireHandle, ScriptEngine};
pub use host::{ContentStore, DirEntry, EntryKind, NoticeSink, NullNotices, SettingsSource};
pub use loader::{BuiltinFactory, ContextFactory, GlobalLookup, LoaderOptions, ModuleLoader};
pub use registry::{ExtensionHandler, HandlerKind, HandlerOutcome, HandlerRequest};
pub use store::{DirStore, MemoryStore};
pub use value::Value;

/// Version of the vault-loader crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
