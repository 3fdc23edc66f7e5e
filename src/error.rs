// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the module loader

use std::sync::Arc;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Boxed cause preserved inside a [`LoaderError::Load`] failure.
///
/// Shared behind an `Arc` because the error table replays one captured
/// failure to every later requester of the same path.
pub type LoadCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while resolving or loading modules
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// The module identifier is not usable
    #[error("invalid module identifier: {0}")]
    InvalidIdentifier(String),

    /// Every handler and fallback declined the identifier
    #[error("cannot find module '{id}'")]
    NotFound {
        /// The identifier as the caller supplied it
        id: String,
    },

    /// Waiting on this load would create a cycle in the require graph
    #[error("circular require detected while loading '{path}'")]
    CircularRequire {
        /// Canonical path of the module the join targeted
        path: String,
    },

    /// The owning handler failed while producing the module's content
    #[error("error occurred while loading required module '{path}'")]
    Load {
        /// Canonical path of the failing module
        path: String,
        /// The underlying failure, preserved as reported by the handler
        #[source]
        cause: LoadCause,
    },
}

impl LoaderError {
    /// Wrap a handler-level failure for `path`, exactly once.
    pub fn load(path: impl Into<String>, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Load {
            path: path.into(),
            cause: Arc::from(cause.into()),
        }
    }

    /// Create a module-not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}
