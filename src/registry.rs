// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extension handler registry
//!
//! Maps a lower-cased file extension to the handler that owns it. The two
//! built-in handlers (script modules, JSON) are tagged variants dispatched by
//! the coordinator itself; callers register [`ExtensionHandler`]
//! implementations for everything else.

use crate::host::ContentStore;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// What a handler decided about a candidate path.
///
/// `Skip` means "this handler does not own this path; try the next resolution
/// step" and is distinct from an `Err`, which means the handler owns the path
/// but loading it failed.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The handler produced the module's value
    Found(Value),
    /// The handler declines this path
    Skip,
}

/// Everything a custom handler gets to work with for one candidate path.
pub struct HandlerRequest {
    /// The candidate path being tried
    pub path: String,
    /// Canonical path of the requesting module, if the require came from one
    pub source: Option<String>,
    /// The content store backing the loader
    pub store: Arc<dyn ContentStore>,
}

/// A caller-registered content handler for one file extension.
#[async_trait]
pub trait ExtensionHandler: Send + Sync {
    /// Try to produce the module value for `request.path`.
    async fn load(&self, request: &HandlerRequest) -> anyhow::Result<HandlerOutcome>;
}

/// A registered handler: one of the two built-ins or a caller-supplied one.
#[derive(Clone)]
pub enum Handler {
    /// The built-in script-module handler
    Script,
    /// The built-in JSON handler
    Json,
    /// A caller-registered handler
    Custom(Arc<dyn ExtensionHandler>),
}

impl Handler {
    /// Kind tag for inspection and dispatch bookkeeping.
    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Script => HandlerKind::Script,
            Handler::Json => HandlerKind::Json,
            Handler::Custom(_) => HandlerKind::Custom,
        }
    }
}

/// Read-only tag describing a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Built-in script-module handler
    Script,
    /// Built-in JSON handler
    Json,
    /// Caller-registered handler
    Custom,
}

/// Extension -> handler table.
pub struct ExtensionRegistry {
    table: DashMap<String, Handler>,
}

impl ExtensionRegistry {
    /// Create a registry seeded with the two built-in handlers.
    pub fn new() -> Self {
        let table = DashMap::new();
        table.insert("js".to_string(), Handler::Script);
        table.insert("json".to_string(), Handler::Json);
        Self { table }
    }

    /// Install or remove the handler for `extension`. Re-registering
    /// overwrites; `None` removes.
    pub fn register(&self, extension: &str, handler: Option<Handler>) {
        let key = extension.to_lowercase();
        match handler {
            Some(handler) => {
                self.table.insert(key, handler);
            }
            None => {
                self.table.remove(&key);
            }
        }
    }

    /// Look up the handler for `extension`, if one is registered.
    pub fn get(&self, extension: &str) -> Option<Handler> {
        self.table.get(extension).map(|entry| entry.value().clone())
    }

    /// Read-only view of the registered extensions and their handler kinds.
    pub fn snapshot(&self) -> Vec<(String, HandlerKind)> {
        let mut entries: Vec<_> = self
            .table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().kind()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
