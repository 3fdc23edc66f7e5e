// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the module loader
//!
//! Scripts are written in a small line-directive format executed by
//! [`LineEngine`]:
//!
//! ```text
//! export {"a": 1}     set module.exports from a JSON literal
//! require ./b         require another module, propagating failure
//! require? ./b        require another module, logging failure instead
//! fail message        abort evaluation with an error
//! yield               suspend once (forces interleaving)
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vault_loader::{
    ContentStore, EntryKind, ExtensionHandler, HandlerKind, HandlerOutcome, HandlerRequest,
    LoadOrderEntry, LoaderError, LoaderOptions, LoaderSettings, MemoryStore, ModuleLoader,
    ModuleScope, NoticeSink, ScriptEngine, Value,
};

/// Executes the line-directive script format and records what ran.
#[derive(Default)]
struct LineEngine {
    log: Mutex<Vec<String>>,
}

impl LineEngine {
    fn exec_count(&self, path: &str) -> usize {
        let needle = format!("exec:{path}");
        self.log.lock().iter().filter(|line| **line == needle).count()
    }

    fn exec_order(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|line| line.strip_prefix("exec:").map(str::to_string))
            .collect()
    }

    fn logged_errors(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|line| line.starts_with("error:"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ScriptEngine for LineEngine {
    async fn execute(&self, source: &str, scope: &ModuleScope) -> anyhow::Result<()> {
        self.log
            .lock()
            .push(format!("exec:{}", scope.require.source()));

        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (directive, rest) = line.split_once(' ').unwrap_or((line, ""));
            match directive {
                "export" => {
                    let json: serde_json::Value = serde_json::from_str(rest)?;
                    scope.module.set_exports(Value::from_json(&json));
                }
                "require" => {
                    scope.require.require(rest).await?;
                }
                "require?" => {
                    if let Err(err) = scope.require.require(rest).await {
                        self.log
                            .lock()
                            .push(format!("error:{}:{err}", scope.require.source()));
                    }
                }
                "fail" => anyhow::bail!("{rest}"),
                "yield" => tokio::task::yield_now().await,
                other => anyhow::bail!("unknown directive '{other}'"),
            }
        }

        Ok(())
    }
}

/// Collects notices and index touches.
#[derive(Default)]
struct Recorder {
    notices: Mutex<Vec<String>>,
    touched: AtomicUsize,
}

impl NoticeSink for Recorder {
    fn notify(&self, message: String) {
        self.notices.lock().push(message);
    }

    fn content_changed(&self) {
        self.touched.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    engine: Arc<LineEngine>,
    settings: Arc<RwLock<LoaderSettings>>,
    notices: Arc<Recorder>,
    loader: ModuleLoader,
}

fn fixture(load_order: Vec<LoadOrderEntry>) -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(LineEngine::default());
    let settings = Arc::new(RwLock::new(LoaderSettings { load_order }));
    let notices = Arc::new(Recorder::default());

    let mut options = LoaderOptions::new(store.clone(), engine.clone(), settings.clone());
    options.notices = notices.clone();
    let loader = ModuleLoader::new(options).unwrap();

    Fixture {
        store,
        engine,
        settings,
        notices,
        loader,
    }
}

fn json_value(text: &str) -> Value {
    Value::from_json(&serde_json::from_str(text).unwrap())
}

#[tokio::test]
async fn cached_require_returns_same_value_without_reexecuting() {
    let fx = fixture(vec![]);
    fx.store.insert("mod.js", r#"export {"n": 7}"#);

    let first = fx.loader.require("/mod.js", None).await.unwrap();
    let second = fx.loader.require("/mod.js", None).await.unwrap();

    assert_eq!(first, json_value(r#"{"n": 7}"#));
    assert_eq!(first, second);
    assert_eq!(fx.engine.exec_count("mod.js"), 1);
}

#[tokio::test]
async fn bare_identifier_loads_through_search_path() {
    let fx = fixture(vec![LoadOrderEntry::new(["lib"])]);
    fx.store.insert("lib/util.js", r#"export "util exports""#);
    fx.loader.reload().await;

    let value = fx.loader.require("util", None).await.unwrap();
    assert_eq!(value, Value::String("util exports".to_string()));
    // loaded during the reload pass, not re-executed by the require
    assert_eq!(fx.engine.exec_count("lib/util.js"), 1);
}

#[tokio::test]
async fn relative_require_resolves_against_requesting_module() {
    let fx = fixture(vec![]);
    fx.store.insert("pages/view.js", "require ./helper\nexport true");
    fx.store.insert("pages/helper.js", r#"export {"helper": true}"#);

    let value = fx.loader.require("/pages/view.js", None).await.unwrap();
    assert_eq!(value, Value::Bool(true));
    assert_eq!(fx.engine.exec_count("pages/helper.js"), 1);
}

#[tokio::test]
async fn directory_index_variant_is_tried() {
    let fx = fixture(vec![]);
    fx.store.insert("widgets/index.js", r#"export "widgets index""#);

    let value = fx.loader.require("/widgets", None).await.unwrap();
    assert_eq!(value, Value::String("widgets index".to_string()));
}

#[tokio::test]
async fn concurrent_requires_share_one_load() {
    let fx = fixture(vec![]);
    fx.store.insert("slow.js", "yield\nexport {\"v\": 1}");

    let (a, b) = tokio::join!(
        fx.loader.require("/slow.js", None),
        fx.loader.require("/slow.js", None),
    );

    assert_eq!(a.unwrap(), json_value(r#"{"v": 1}"#));
    assert_eq!(b.unwrap(), json_value(r#"{"v": 1}"#));
    assert_eq!(fx.engine.exec_count("slow.js"), 1);
}

#[tokio::test]
async fn cross_requires_detect_cycle_and_first_completes() {
    let fx = fixture(vec![]);
    fx.store
        .insert("a.js", "yield\nrequire ./b\nexport {\"name\": \"a\"}");
    fx.store
        .insert("b.js", "yield\nrequire? ./a\nexport {\"name\": \"b\"}");

    let (a, b) = tokio::join!(
        fx.loader.require("/a.js", None),
        fx.loader.require("/b.js", None),
    );

    // the second cross-require fails with a circular error; both top-level
    // requires still complete once b's content finishes evaluating
    assert_eq!(a.unwrap(), json_value(r#"{"name": "a"}"#));
    assert_eq!(b.unwrap(), json_value(r#"{"name": "b"}"#));

    let errors = fx.engine.logged_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("error:b.js:"));
    assert!(errors[0].contains("circular require"));

    assert_eq!(fx.engine.exec_count("a.js"), 1);
    assert_eq!(fx.engine.exec_count("b.js"), 1);
}

#[tokio::test]
async fn evaluation_failure_is_captured_and_replayed() {
    let fx = fixture(vec![]);
    fx.store.insert("bad.js", "fail kaboom");

    let err = fx.loader.require("/bad.js", None).await.unwrap_err();
    let LoaderError::Load { path, cause } = &err else {
        panic!("expected Load error, got {err:?}");
    };
    assert_eq!(path, "bad.js");
    assert_eq!(cause.to_string(), "kaboom");

    // replayed from the error table without re-executing the file
    let replay = fx.loader.require("/bad.js", None).await.unwrap_err();
    assert_eq!(replay.to_string(), err.to_string());
    assert_eq!(fx.engine.exec_count("bad.js"), 1);
}

#[tokio::test]
async fn failed_dependency_fails_the_requiring_module() {
    let fx = fixture(vec![]);
    fx.store.insert("top.js", "require ./broken\nexport true");
    fx.store.insert("broken.js", "fail nope");

    let err = fx.loader.require("/top.js", None).await.unwrap_err();
    let LoaderError::Load { path, .. } = &err else {
        panic!("expected Load error, got {err:?}");
    };
    assert_eq!(path, "top.js");

    // the dependency's own failure is recorded under its path too
    let dep_err = fx.loader.require("/broken.js", None).await.unwrap_err();
    assert!(matches!(dep_err, LoaderError::Load { .. }));
    assert_eq!(fx.engine.exec_count("broken.js"), 1);
}

#[tokio::test]
async fn missing_module_is_not_cached_as_failure() {
    let fx = fixture(vec![]);

    let err = fx.loader.require("/late.js", None).await.unwrap_err();
    assert!(matches!(err, LoaderError::NotFound { .. }));

    // the store changed before the next reload; a later attempt may succeed
    fx.store.insert("late.js", "export 3");
    let value = fx.loader.require("/late.js", None).await.unwrap();
    assert_eq!(value, Value::Number(3.0));
}

#[tokio::test]
async fn invalid_identifier_is_rejected_synchronously() {
    let fx = fixture(vec![]);
    let err = fx.loader.require("", None).await.unwrap_err();
    assert!(matches!(err, LoaderError::InvalidIdentifier(_)));
}

#[tokio::test]
async fn json_handler_parses_and_caches() {
    let fx = fixture(vec![]);
    fx.store.insert("data.json", r#"{"a": 1}"#);

    let value = fx.loader.require("/data.json", None).await.unwrap();
    assert_eq!(value, json_value(r#"{"a": 1}"#));

    let again = fx.loader.require("/data.json", None).await.unwrap();
    assert_eq!(value, again);

    // extensionless identifier falls through script inference to JSON
    let inferred = fx.loader.require("/data", None).await.unwrap();
    assert_eq!(inferred, value);
}

#[tokio::test]
async fn builtin_modules_bypass_resolution() {
    struct Api;

    let fx = fixture(vec![]);
    let api = Value::foreign(Api);
    let registered = api.clone();
    fx.loader
        .register_module("host-api", Arc::new(move || Some(registered.clone())))
        .unwrap();

    let value = fx.loader.require("host-api", None).await.unwrap();
    assert_eq!(value, api);
    assert_eq!(fx.loader.require_immediate("host-api"), Some(api.clone()));

    // path-like ids are reserved for the store
    let err = fx
        .loader
        .register_module("/host-api", Arc::new(|| None))
        .unwrap_err();
    assert!(matches!(err, LoaderError::InvalidIdentifier(_)));
}

#[tokio::test]
async fn declining_builtin_falls_through_to_store() {
    let fx = fixture(vec![]);
    fx.store.insert("feature.js", r#"export "from store""#);
    fx.loader
        .register_module("feature", Arc::new(|| None))
        .unwrap();

    let value = fx.loader.require("feature", None).await.unwrap();
    assert_eq!(value, Value::String("from store".to_string()));
}

#[tokio::test]
async fn global_lookup_is_last_resort() {
    let fx = fixture(vec![]);
    let mut options = LoaderOptions::new(
        fx.store.clone(),
        fx.engine.clone(),
        fx.settings.clone(),
    );
    options.global_lookup = Some(Arc::new(|id| {
        (id == "electron").then(|| Value::String("process global".to_string()))
    }));
    let loader = ModuleLoader::new(options).unwrap();

    let value = loader.require("electron", None).await.unwrap();
    assert_eq!(value, Value::String("process global".to_string()));
    assert_eq!(
        loader.require_immediate("electron"),
        Some(Value::String("process global".to_string()))
    );

    let err = loader.require("not-anywhere", None).await.unwrap_err();
    assert!(matches!(err, LoaderError::NotFound { .. }));
}

#[tokio::test]
async fn require_immediate_never_loads() {
    let fx = fixture(vec![LoadOrderEntry::new(["lib"])]);
    fx.store.insert("lib/util.js", r#"export "cached""#);
    fx.store.insert("lib/unloaded.js", r#"export "never""#);

    assert_eq!(fx.loader.require_immediate("util"), None);

    fx.loader.reload().await;
    assert_eq!(
        fx.loader.require_immediate("util"),
        Some(Value::String("cached".to_string()))
    );
    // unloaded.js was loaded by the reload pass; a path outside the load
    // order stays unavailable
    assert_eq!(fx.loader.require_immediate("elsewhere"), None);
    assert_eq!(fx.engine.exec_count("elsewhere.js"), 0);
}

#[tokio::test]
async fn custom_extension_handler_participates_in_dispatch() {
    struct Shout;

    #[async_trait]
    impl ExtensionHandler for Shout {
        async fn load(&self, request: &HandlerRequest) -> anyhow::Result<HandlerOutcome> {
            if request.store.kind(&request.path).await != Some(EntryKind::File) {
                return Ok(HandlerOutcome::Skip);
            }
            let text = request.store.read(&request.path).await?;
            Ok(HandlerOutcome::Found(Value::String(text.to_uppercase())))
        }
    }

    let fx = fixture(vec![]);
    fx.store.insert("notes/readme.md", "hello");
    fx.loader.register_extension("md", Some(Arc::new(Shout)));

    let value = fx.loader.require("/notes/readme.md", None).await.unwrap();
    assert_eq!(value, Value::String("HELLO".to_string()));

    let extensions = fx.loader.extensions();
    assert!(extensions.contains(&("md".to_string(), HandlerKind::Custom)));

    // removal: the extension is explicit, so nothing else is inferred
    fx.loader.register_extension("md", None);
    let err = fx
        .loader
        .require("/notes/other.md", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoaderError::NotFound { .. }));
}

#[tokio::test]
async fn custom_handler_failure_is_wrapped_with_path() {
    struct Explode;

    #[async_trait]
    impl ExtensionHandler for Explode {
        async fn load(&self, _request: &HandlerRequest) -> anyhow::Result<HandlerOutcome> {
            anyhow::bail!("handler exploded")
        }
    }

    let fx = fixture(vec![]);
    fx.loader.register_extension("bin", Some(Arc::new(Explode)));

    let err = fx.loader.require("/blob.bin", None).await.unwrap_err();
    let LoaderError::Load { path, cause } = &err else {
        panic!("expected Load error, got {err:?}");
    };
    assert_eq!(path, "blob.bin");
    assert_eq!(cause.to_string(), "handler exploded");
}

#[tokio::test]
async fn reload_expands_sorts_and_deduplicates() {
    let fx = fixture(vec![
        LoadOrderEntry::new(["main.js", "scripts"]),
        LoadOrderEntry::new(["scripts", "extra"]),
    ]);
    fx.store.insert("main.js", "export 1");
    fx.store.insert("scripts/b.js", "export 2");
    fx.store.insert("scripts/a.js", "export 3");
    fx.store.insert("scripts/sub/c.js", "export 4");
    fx.store.insert("scripts/notes.txt", "not a script");
    fx.store.insert("extra/d.js", "export 5");

    fx.loader.reload().await;

    // entry order preserved, lexicographic within an entry, duplicates from
    // the second entry's "scripts" excluded
    assert_eq!(
        fx.engine.exec_order(),
        vec![
            "main.js",
            "scripts/a.js",
            "scripts/b.js",
            "scripts/sub/c.js",
            "extra/d.js",
        ]
    );

    let cache = fx.loader.cache_snapshot();
    assert_eq!(cache.len(), 5);
    assert!(!cache.contains_key("scripts/notes.txt"));

    // both folders became search roots
    let candidates = fx.loader.resolve("a", None).unwrap();
    assert_eq!(candidates, vec!["a", "scripts/a", "extra/a"]);

    assert!(fx.notices.notices.lock().is_empty());
    assert_eq!(fx.notices.touched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reload_counts_failures_in_one_notice() {
    let fx = fixture(vec![LoadOrderEntry::new(["scripts"])]);
    fx.store.insert("scripts/one.js", "fail first");
    fx.store.insert("scripts/two.js", "fail second");
    fx.store.insert("scripts/ok.js", "export true");

    fx.loader.reload().await;

    let notices = fx.notices.notices.lock().clone();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].starts_with("2 user modules failed to load"));

    let cache = fx.loader.cache_snapshot();
    assert!(cache.contains_key("scripts/ok.js"));
    assert!(!cache.contains_key("scripts/one.js"));
}

#[tokio::test]
async fn reload_resets_cache_and_error_table() {
    let fx = fixture(vec![]);
    fx.store.insert("stale.js", "export 1");
    fx.store.insert("bad.js", "fail transient");

    fx.loader.require("/stale.js", None).await.unwrap();
    fx.loader.require("/bad.js", None).await.unwrap_err();

    // the store changes, then a reload clears both terminal states
    fx.store.insert("bad.js", "export 2");
    fx.loader.reload().await;

    assert!(fx.loader.cache_snapshot().is_empty());
    let value = fx.loader.require("/bad.js", None).await.unwrap();
    assert_eq!(value, Value::Number(2.0));
}

#[tokio::test]
async fn overlapping_reloads_are_serialized() {
    let fx = fixture(vec![LoadOrderEntry::new(["slow.js"])]);
    fx.store.insert("slow.js", "yield\nexport 1");
    fx.store.insert("other.js", "export 2");

    let loader = fx.loader.clone();
    let settings = fx.settings.clone();
    tokio::join!(fx.loader.reload(), async {
        // issued while the first pass is suspended inside slow.js; this
        // pass must observe the configuration current when it starts
        settings.write().load_order = vec![LoadOrderEntry::new(["other.js"])];
        loader.reload().await;
    });

    let cache = fx.loader.cache_snapshot();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains_key("other.js"));

    // both passes ran to completion
    assert_eq!(fx.engine.exec_count("slow.js"), 1);
    assert_eq!(fx.engine.exec_count("other.js"), 1);
    assert_eq!(fx.notices.touched.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn require_during_reload_joins_the_in_flight_load() {
    let fx = fixture(vec![LoadOrderEntry::new(["slow.js"])]);
    fx.store.insert("slow.js", "yield\nexport {\"v\": 9}");

    let (_, required) = tokio::join!(fx.loader.reload(), fx.loader.require("/slow.js", None));

    assert_eq!(required.unwrap(), json_value(r#"{"v": 9}"#));
    assert_eq!(fx.engine.exec_count("slow.js"), 1);
}

#[tokio::test]
async fn reload_from_directory_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("scripts")).unwrap();
    std::fs::write(dir.path().join("scripts/hello.js"), "export \"disk\"").unwrap();

    let engine = Arc::new(LineEngine::default());
    let settings = LoaderSettings {
        load_order: vec![LoadOrderEntry::new(["scripts"])],
    };
    let loader = ModuleLoader::new(LoaderOptions::new(
        Arc::new(vault_loader::DirStore::new(dir.path())),
        engine,
        Arc::new(settings),
    ))
    .unwrap();

    loader.reload().await;
    let value = loader.require("hello", None).await.unwrap();
    assert_eq!(value, Value::String("disk".to_string()));
}
