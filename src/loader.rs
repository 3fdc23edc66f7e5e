// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Load coordination
//!
//! [`ModuleLoader`] owns the require state machine. Per path the states are
//! absent -> loading -> resolved or failed; terminal states are sticky until
//! the next whole-program reload. Concurrent requires of an in-flight path
//! join its load record, with a cycle check over the record graph before the
//! join commits. Reload resets every table atomically and serializes
//! overlapping reload calls through a queue.
//!
//! All suspension is cooperative: the state tables sit behind one mutex that
//! is never held across an await.

use crate::cache::ModuleCache;
use crate::error::{LoaderError, Result};
use crate::evaluator::{Evaluator, RequireHandle, ScriptEngine};
use crate::host::{ContentStore, EntryKind, NoticeSink, NullNotices, SettingsSource};
use crate::registry::{
    ExtensionHandler, ExtensionRegistry, Handler, HandlerKind, HandlerOutcome, HandlerRequest,
};
use crate::resolver::{self, SCRIPT_EXTENSION};
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Factory producing a builtin module's value. Returning `None` declines the
/// identifier and lets resolution continue.
pub type BuiltinFactory = Arc<dyn Fn() -> Option<Value> + Send + Sync>;

/// Process-global module lookup, consulted only after every handler skipped.
pub type GlobalLookup = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Produces the host-context value handed to a module while it executes,
/// keyed by the module's canonical path.
pub type ContextFactory = Arc<dyn Fn(&str) -> Value + Send + Sync>;

type LoadOutcome = std::result::Result<Value, LoaderError>;

/// One path currently being loaded.
struct LoadRecord {
    /// Pending requesters, signaled in registration order on completion
    waiters: Vec<oneshot::Sender<LoadOutcome>>,
    /// Paths of records this one is transitively waiting on
    awaiting: Vec<String>,
}

impl LoadRecord {
    fn new() -> Self {
        Self {
            waiters: Vec::new(),
            awaiting: Vec::new(),
        }
    }
}

/// The tables a reload swaps out wholesale.
///
/// Invariant: a canonical path is present in at most one of the cache, the
/// error table, and the in-flight index.
#[derive(Default)]
struct LoaderState {
    cache: ModuleCache,
    errors: HashMap<String, LoaderError>,
    loading: HashMap<String, LoadRecord>,
    search_paths: Vec<String>,
}

impl LoaderState {
    fn add_search_path(&mut self, path: String) {
        if !self.search_paths.contains(&path) {
            self.search_paths.push(path);
        }
    }

    /// Would adding the edge `source -> target` close a cycle? DFS from the
    /// target over the awaiting edges, looking for the source.
    fn cycle_would_form(&self, source: &str, target: &str) -> bool {
        let mut stack: Vec<&str> = vec![target];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == source {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(record) = self.loading.get(current) {
                stack.extend(record.awaiting.iter().map(String::as_str));
            }
        }
        false
    }
}

struct ReloadGate {
    running: bool,
    queue: VecDeque<oneshot::Sender<()>>,
}

enum Claim {
    Done(LoadOutcome),
    Join,
    Owned,
}

/// Everything needed to construct a [`ModuleLoader`].
pub struct LoaderOptions {
    /// The content store to load from
    pub store: Arc<dyn ContentStore>,
    /// The host's script execution engine
    pub engine: Arc<dyn ScriptEngine>,
    /// Load-order configuration provider
    pub settings: Arc<dyn SettingsSource>,
    /// User-facing notification sink
    pub notices: Arc<dyn NoticeSink>,
    /// Builtin modules registered at construction
    pub modules: Vec<(String, BuiltinFactory)>,
    /// Optional process-global module lookup
    pub global_lookup: Option<GlobalLookup>,
    /// Optional per-path host-context factory
    pub context_factory: Option<ContextFactory>,
}

impl LoaderOptions {
    /// Options with a null notice sink and no builtins or hooks.
    pub fn new(
        store: Arc<dyn ContentStore>,
        engine: Arc<dyn ScriptEngine>,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        Self {
            store,
            engine,
            settings,
            notices: Arc::new(NullNotices),
            modules: Vec::new(),
            global_lookup: None,
            context_factory: None,
        }
    }
}

struct Inner {
    store: Arc<dyn ContentStore>,
    evaluator: Evaluator,
    settings: Arc<dyn SettingsSource>,
    notices: Arc<dyn NoticeSink>,
    registry: ExtensionRegistry,
    builtins: DashMap<String, BuiltinFactory>,
    global_lookup: Option<GlobalLookup>,
    context_factory: Option<ContextFactory>,
    state: Mutex<LoaderState>,
    reload: Mutex<ReloadGate>,
}

/// The module loader: resolves identifiers, dispatches content handlers,
/// memoizes results, coordinates concurrent loads, and owns the reload
/// protocol. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<Inner>,
}

impl ModuleLoader {
    /// Construct a loader. Fails if a configured builtin module id is
    /// path-like.
    pub fn new(options: LoaderOptions) -> Result<Self> {
        let loader = Self {
            inner: Arc::new(Inner {
                store: options.store,
                evaluator: Evaluator::new(options.engine),
                settings: options.settings,
                notices: options.notices,
                registry: ExtensionRegistry::new(),
                builtins: DashMap::new(),
                global_lookup: options.global_lookup,
                context_factory: options.context_factory,
                state: Mutex::new(LoaderState::default()),
                reload: Mutex::new(ReloadGate {
                    running: false,
                    queue: VecDeque::new(),
                }),
            }),
        };

        for (id, factory) in options.modules {
            loader.register_module(&id, factory)?;
        }

        Ok(loader)
    }

    /// Resolve `id` to its ordered candidate paths. Pure path algebra over
    /// the current search-path set; never touches the store.
    pub fn resolve(&self, id: &str, source: Option<&str>) -> Result<Vec<String>> {
        let state = self.inner.state.lock();
        resolver::resolve(id, source, &state.search_paths)
    }

    /// Install or remove a content handler for `extension`. Re-registering
    /// overwrites.
    pub fn register_extension(&self, extension: &str, handler: Option<Arc<dyn ExtensionHandler>>) {
        self.inner
            .registry
            .register(extension, handler.map(Handler::Custom));
    }

    /// Register a builtin module. Builtin ids must not look like paths.
    pub fn register_module(&self, id: &str, factory: BuiltinFactory) -> Result<()> {
        if id.starts_with('/') {
            return Err(LoaderError::InvalidIdentifier(
                "builtin module id cannot start with '/'".to_string(),
            ));
        }
        self.inner.builtins.insert(id.to_string(), factory);
        Ok(())
    }

    /// Read-only copy of the current cache contents.
    pub fn cache_snapshot(&self) -> HashMap<String, Value> {
        self.inner.state.lock().cache.snapshot()
    }

    /// Read-only view of the registered extensions.
    pub fn extensions(&self) -> Vec<(String, HandlerKind)> {
        self.inner.registry.snapshot()
    }

    /// Require `id` on behalf of the module at `source`, loading it if it is
    /// not already cached. May suspend while joining an in-flight load or
    /// while a handler performs I/O.
    pub async fn require(&self, id: &str, source: Option<&str>) -> Result<Value> {
        if let Some(factory) = self.builtin(id) {
            if let Some(value) = factory() {
                return Ok(value);
            }
        }

        let candidates = self.resolve(id, source)?;
        for path in &candidates {
            // terminal states are sticky: a cached path returns immediately
            // and a previously failed one short-circuits later candidates
            let quick = {
                let state = self.inner.state.lock();
                if let Some(value) = state.cache.get(path) {
                    Some(Ok(value))
                } else {
                    state.errors.get(path).map(|err| Err(err.clone()))
                }
            };
            match quick {
                Some(Ok(value)) => return Ok(value),
                Some(Err(err)) => return Err(err),
                None => {}
            }

            if let Some(outcome) = self.join_in_flight(path, source).await {
                return outcome;
            }

            let ext = resolver::extension_of(path);
            let handler = ext.as_deref().and_then(|e| self.inner.registry.get(e));
            let tried = handler.as_ref().map(Handler::kind);
            if let Some(handler) = handler {
                if let Some(value) = self.run_handler(&handler, path, source).await? {
                    return Ok(value);
                }
            }

            // don't infer extensions for identifiers that carry one
            if ext.is_some() {
                continue;
            }

            if tried != Some(HandlerKind::Script) {
                if let Some(value) = self.load_script(path, source).await? {
                    return Ok(value);
                }
            }
            if tried != Some(HandlerKind::Json) {
                if let Some(value) = self.load_json(path).await? {
                    return Ok(value);
                }
            }
        }

        if let Some(lookup) = &self.inner.global_lookup {
            if let Some(value) = lookup(id) {
                return Ok(value);
            }
        }

        Err(LoaderError::not_found(id))
    }

    /// Look up `id` without ever loading or suspending: builtins, then the
    /// already-resolved cache (including script-file-name variants), then the
    /// process-global fallback.
    pub fn require_immediate(&self, id: &str) -> Option<Value> {
        if let Some(factory) = self.builtin(id) {
            if let Some(value) = factory() {
                return Some(value);
            }
        }

        {
            let state = self.inner.state.lock();
            let candidates = resolver::resolve(id, None, &state.search_paths).ok()?;
            for path in &candidates {
                if let Some(value) = state.cache.get(path) {
                    return Some(value);
                }
                for variant in resolver::script_variants(path) {
                    if let Some(value) = state.cache.get(&variant) {
                        return Some(value);
                    }
                }
            }
        }

        self.inner.global_lookup.as_ref().and_then(|lookup| lookup(id))
    }

    /// Invalidate all cached state and reload the configured load order.
    ///
    /// Exactly one reload runs at a time. A call issued while another reload
    /// is running is queued and completes only when its own pass has run.
    pub async fn reload(&self) {
        let waiter = {
            let mut gate = self.inner.reload.lock();
            if gate.running {
                let (tx, rx) = oneshot::channel();
                gate.queue.push_back(tx);
                Some(rx)
            } else {
                gate.running = true;
                None
            }
        };

        if let Some(rx) = waiter {
            // our predecessor hands the gate over when it finishes
            if rx.await.is_err() {
                return;
            }
        }

        self.run_reload_pass().await;
        self.finish_reload();
    }

    fn builtin(&self, id: &str) -> Option<BuiltinFactory> {
        self.inner.builtins.get(id).map(|entry| entry.value().clone())
    }

    /// If `path` is in flight, wait for its outcome. Links the requester's
    /// own record into the awaiting graph first, failing the join if that
    /// edge would close a cycle. Returns `None` when `path` is not loading.
    async fn join_in_flight(&self, path: &str, source: Option<&str>) -> Option<LoadOutcome> {
        let (rx, linked) = {
            let mut state = self.inner.state.lock();
            if !state.loading.contains_key(path) {
                return None;
            }

            let mut linked = None;
            if let Some(src) = source {
                if state.loading.contains_key(src) {
                    if state.cycle_would_form(src, path) {
                        return Some(Err(LoaderError::CircularRequire {
                            path: path.to_string(),
                        }));
                    }
                    if let Some(record) = state.loading.get_mut(src) {
                        record.awaiting.push(path.to_string());
                        linked = Some(src.to_string());
                    }
                }
            }

            let (tx, rx) = oneshot::channel();
            if let Some(record) = state.loading.get_mut(path) {
                record.waiters.push(tx);
            }
            (rx, linked)
        };

        let outcome = rx.await.unwrap_or_else(|_| {
            Err(LoaderError::load(
                path,
                "load record dropped without signaling completion",
            ))
        });

        if let Some(src) = linked {
            let mut state = self.inner.state.lock();
            if let Some(record) = state.loading.get_mut(&src) {
                record.awaiting.retain(|p| p != path);
            }
        }

        Some(outcome)
    }

    /// Move `path` out of the in-flight index into its terminal state and
    /// signal every waiter, in registration order.
    fn finish_load(&self, path: &str, outcome: LoadOutcome) {
        let waiters = {
            let mut state = self.inner.state.lock();
            let record = state.loading.remove(path);
            match &outcome {
                Ok(value) => state.cache.insert(path.to_string(), value.clone()),
                Err(err) => {
                    state.errors.insert(path.to_string(), err.clone());
                }
            }
            // clear residual awaiting edges pointing at the finished record
            for other in state.loading.values_mut() {
                other.awaiting.retain(|p| p != path);
            }
            record.map(|r| r.waiters).unwrap_or_default()
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_handler(
        &self,
        handler: &Handler,
        path: &str,
        source: Option<&str>,
    ) -> Result<Option<Value>> {
        match handler {
            Handler::Script => self.load_script(path, source).await,
            Handler::Json => self.load_json(path).await,
            Handler::Custom(custom) => {
                let request = HandlerRequest {
                    path: path.to_string(),
                    source: source.map(str::to_string),
                    store: self.inner.store.clone(),
                };
                match custom.load(&request).await {
                    Ok(HandlerOutcome::Found(value)) => Ok(Some(value)),
                    Ok(HandlerOutcome::Skip) => Ok(None),
                    Err(cause) => Err(LoaderError::load(path, cause)),
                }
            }
        }
    }

    /// The script-module handler. Tries the script-file-name variants of
    /// `path` in order; returns `Ok(None)` if no variant exists in the store.
    async fn load_script(&self, path: &str, source: Option<&str>) -> Result<Option<Value>> {
        if let Some(value) = {
            let state = self.inner.state.lock();
            state.cache.get(path)
        } {
            return Ok(Some(value));
        }

        for variant in resolver::script_variants(path) {
            match self.inner.store.kind(&variant).await {
                Some(EntryKind::File) => {}
                _ => {
                    // not a file; a terminal state may still exist from a
                    // store that changed since the load
                    let quick = {
                        let state = self.inner.state.lock();
                        if let Some(value) = state.cache.get(&variant) {
                            Some(Ok(value))
                        } else {
                            state.errors.get(&variant).map(|err| Err(err.clone()))
                        }
                    };
                    match quick {
                        Some(Ok(value)) => return Ok(Some(value)),
                        Some(Err(err)) => return Err(err),
                        None => continue,
                    }
                }
            }

            loop {
                let claim = {
                    let mut state = self.inner.state.lock();
                    if let Some(value) = state.cache.get(&variant) {
                        Claim::Done(Ok(value))
                    } else if let Some(err) = state.errors.get(&variant) {
                        Claim::Done(Err(err.clone()))
                    } else if state.loading.contains_key(&variant) {
                        Claim::Join
                    } else {
                        state.loading.insert(variant.clone(), LoadRecord::new());
                        Claim::Owned
                    }
                };

                match claim {
                    Claim::Done(outcome) => return outcome.map(Some),
                    Claim::Join => {
                        if let Some(outcome) = self.join_in_flight(&variant, source).await {
                            return outcome.map(Some);
                        }
                        // the record finished between the check and the join
                    }
                    Claim::Owned => {
                        return self.load_script_file(&variant).await.map(Some);
                    }
                }
            }
        }

        Ok(None)
    }

    /// Load the script file at `path`. The caller must already own the
    /// in-flight record for `path`.
    async fn load_script_file(&self, path: &str) -> Result<Value> {
        let outcome = match self.inner.store.read(path).await {
            Ok(text) => {
                let require = RequireHandle::new(self.clone(), path.to_string());
                let context = self
                    .inner
                    .context_factory
                    .as_ref()
                    .map(|factory| factory(path))
                    .unwrap_or(Value::Null);
                self.inner
                    .evaluator
                    .evaluate(path, &text, require, context)
                    .await
            }
            Err(err) => Err(LoaderError::load(path, err)),
        };

        if let Err(err) = &outcome {
            tracing::error!(path, error = %err, "failed to load module file");
        }
        self.finish_load(path, outcome.clone());
        outcome
    }

    /// The JSON handler. Appends `.json` if absent; skips unless the file
    /// exists as a plain file.
    async fn load_json(&self, path: &str) -> Result<Option<Value>> {
        let path = if path.to_lowercase().ends_with(".json") {
            path.to_string()
        } else {
            format!("{path}.json")
        };

        if let Some(value) = {
            let state = self.inner.state.lock();
            state.cache.get(&path)
        } {
            return Ok(Some(value));
        }

        if self.inner.store.kind(&path).await != Some(EntryKind::File) {
            return Ok(None);
        }

        let text = self
            .inner
            .store
            .read(&path)
            .await
            .map_err(|err| LoaderError::load(&path, err))?;
        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|err| LoaderError::load(&path, err))?;

        let value = Value::from_json(&parsed);
        self.inner
            .state
            .lock()
            .cache
            .insert(path, value.clone());
        Ok(Some(value))
    }

    /// One full reset-and-load pass over the configured load order.
    async fn run_reload_pass(&self) {
        tracing::debug!("starting reload pass");

        {
            let mut state = self.inner.state.lock();
            *state = LoaderState::default();
        }

        let entries = self.inner.settings.load_order();
        let mut seen: HashSet<String> = HashSet::new();
        let mut records: Vec<String> = Vec::new();
        for entry in &entries {
            records.extend(self.expand_entry(&entry.paths, &mut seen).await);
        }

        let mut failures = 0usize;
        for path in records {
            let claim = {
                let mut state = self.inner.state.lock();
                if state.cache.contains(&path) {
                    // already loaded as a dependency of an earlier record
                    continue;
                } else if state.errors.contains_key(&path) {
                    // first failure wins until the next reload
                    failures += 1;
                    continue;
                } else if state.loading.contains_key(&path) {
                    Claim::Join
                } else {
                    state.loading.insert(path.clone(), LoadRecord::new());
                    Claim::Owned
                }
            };

            let outcome = match claim {
                Claim::Join => match self.join_in_flight(&path, None).await {
                    Some(outcome) => Some(outcome),
                    // the record finished between the check and the join
                    None => {
                        let state = self.inner.state.lock();
                        state.errors.get(&path).map(|err| Err(err.clone()))
                    }
                },
                _ => Some(self.load_script_file(&path).await),
            };
            if matches!(outcome, Some(Err(_))) {
                failures += 1;
            }
        }

        if failures > 0 {
            let plural = if failures == 1 { "" } else { "s" };
            self.inner.notices.notify(format!(
                "{failures} user module{plural} failed to load. See the log for more information."
            ));
        }

        tracing::debug!(failures, "reload pass finished");
        self.inner.notices.content_changed();
    }

    /// Expand one load-order entry into a sorted list of script-file paths,
    /// adding folders to the search-path set and walking them depth-first.
    async fn expand_entry(&self, paths: &[String], seen: &mut HashSet<String>) -> Vec<String> {
        fn add_file(path: String, records: &mut Vec<String>, seen: &mut HashSet<String>) {
            if resolver::extension_of(&path).as_deref() != Some(SCRIPT_EXTENSION) {
                return;
            }
            if seen.insert(path.clone()) {
                records.push(path);
            }
        }

        let mut records: Vec<String> = Vec::new();
        let mut folders: Vec<String> = Vec::new();

        for path in paths {
            match self.inner.store.kind(path).await {
                Some(EntryKind::File) => add_file(resolver::normalize(path), &mut records, seen),
                Some(EntryKind::Folder) => {
                    let normalized = resolver::normalize(path);
                    self.inner.state.lock().add_search_path(normalized.clone());
                    folders.push(normalized);
                }
                None => {
                    tracing::warn!(path = %path, "load-order path not found in store");
                }
            }
        }

        while let Some(folder) = folders.pop() {
            match self.inner.store.list(&folder).await {
                Ok(children) => {
                    for child in children {
                        match child.kind {
                            EntryKind::File => add_file(child.path, &mut records, seen),
                            EntryKind::Folder => folders.push(child.path),
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(folder = %folder, error = %err, "failed to expand load-order entry");
                    return Vec::new();
                }
            }
        }

        records.sort();
        records
    }

    /// Hand the reload gate to the next queued caller, or release it.
    fn finish_reload(&self) {
        let mut gate = self.inner.reload.lock();
        while let Some(next) = gate.queue.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
            // that caller gave up waiting; try the next one
        }
        gate.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_awaiting(paths: &[&str]) -> LoadRecord {
        LoadRecord {
            waiters: Vec::new(),
            awaiting: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn cycle_detection_follows_transitive_edges() {
        let mut state = LoaderState::default();
        state.loading.insert("a.js".to_string(), record_awaiting(&["b.js"]));
        state.loading.insert("b.js".to_string(), record_awaiting(&["c.js"]));
        state.loading.insert("c.js".to_string(), record_awaiting(&[]));

        // c -> a would close a: a -> b -> c -> a
        assert!(state.cycle_would_form("c.js", "a.js"));
        // a -> c is just a shortcut edge, not a cycle
        assert!(!state.cycle_would_form("a.js", "c.js"));
    }

    #[test]
    fn cycle_detection_handles_diamonds() {
        // two routes to the same record must not read as a cycle
        let mut state = LoaderState::default();
        state.loading.insert("a.js".to_string(), record_awaiting(&["b.js", "c.js"]));
        state.loading.insert("b.js".to_string(), record_awaiting(&["d.js"]));
        state.loading.insert("c.js".to_string(), record_awaiting(&["d.js"]));
        state.loading.insert("d.js".to_string(), record_awaiting(&[]));

        assert!(!state.cycle_would_form("e.js", "a.js"));
        assert!(state.cycle_would_form("d.js", "a.js"));
    }

    #[test]
    fn search_paths_deduplicate() {
        let mut state = LoaderState::default();
        state.add_search_path("lib".to_string());
        state.add_search_path("lib".to_string());
        state.add_search_path("vendor".to_string());
        assert_eq!(state.search_paths, vec!["lib", "vendor"]);
    }
}
