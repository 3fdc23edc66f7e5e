// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Script evaluation
//!
//! The crate ships no interpreter. The host injects a [`ScriptEngine`]; the
//! [`Evaluator`] builds the per-module scope around it (a mutable `module`
//! object, a `require` bound to the loading module's own path, and the host
//! context value) and turns engine failures into typed load errors. Loaded
//! code runs with whatever capabilities the engine and context expose; there
//! is no isolation.

use crate::error::{LoaderError, Result};
use crate::loader::ModuleLoader;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// The mutable `module` object handed to executing code.
///
/// Whatever is left in the exports slot when execution finishes becomes the
/// cached value for the module's path.
#[derive(Clone)]
pub struct ModuleHandle {
    exports: Arc<RwLock<Value>>,
}

impl ModuleHandle {
    fn new() -> Self {
        Self {
            exports: Arc::new(RwLock::new(Value::empty_object())),
        }
    }

    /// Current exports value.
    pub fn exports(&self) -> Value {
        self.exports.read().clone()
    }

    /// Replace the exports value.
    pub fn set_exports(&self, value: Value) {
        *self.exports.write() = value;
    }
}

/// A `require` function bound to the loading module's own path, so relative
/// identifiers resolve against it.
#[derive(Clone)]
pub struct RequireHandle {
    loader: ModuleLoader,
    source: String,
}

impl RequireHandle {
    pub(crate) fn new(loader: ModuleLoader, source: String) -> Self {
        Self { loader, source }
    }

    /// Canonical path of the module this handle is bound to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Require `id` on behalf of the bound module.
    pub async fn require(&self, id: &str) -> Result<Value> {
        self.loader.require(id, Some(&self.source)).await
    }
}

/// Everything in scope while one module executes.
pub struct ModuleScope {
    /// The mutable module object
    pub module: ModuleHandle,
    /// Require bound to this module's path
    pub require: RequireHandle,
    /// Host-context value exposing injected capabilities
    pub context: Value,
}

/// The host-injected execution engine.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Execute `source` with `scope` in scope. A returned error fails the
    /// load and is preserved as the failure's cause.
    async fn execute(&self, source: &str, scope: &ModuleScope) -> anyhow::Result<()>;
}

/// Wraps the injected engine with scope construction and error tagging.
pub(crate) struct Evaluator {
    engine: Arc<dyn ScriptEngine>,
}

impl Evaluator {
    pub(crate) fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self { engine }
    }

    /// Execute `text` as the module at `path` and return its exports.
    pub(crate) async fn evaluate(
        &self,
        path: &str,
        text: &str,
        require: RequireHandle,
        context: Value,
    ) -> Result<Value> {
        let scope = ModuleScope {
            module: ModuleHandle::new(),
            require,
            context,
        };

        self.engine
            .execute(text, &scope)
            .await
            .map_err(|cause| LoaderError::load(path, cause))?;

        Ok(scope.module.exports())
    }
}
