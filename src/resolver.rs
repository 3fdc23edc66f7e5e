// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module path resolution
//!
//! Pure path algebra: an identifier plus an optional requesting-module path
//! becomes an ordered, deduplicated list of candidate storage paths. The
//! store is never consulted here.

use crate::error::{LoaderError, Result};

/// File extension owned by the script-module handler.
pub const SCRIPT_EXTENSION: &str = "js";

/// Resolve `id` against an optional requesting module and the configured
/// search roots.
///
/// Candidate order: root-absolute and relative identifiers produce exactly
/// one candidate; bare identifiers produce the path next to the requester
/// followed by one candidate per search root, in search-root order.
pub fn resolve(id: &str, source: Option<&str>, search_paths: &[String]) -> Result<Vec<String>> {
    if id.is_empty() {
        return Err(LoaderError::InvalidIdentifier(
            "expected a non-empty string for the module id".to_string(),
        ));
    }

    let target: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    if target.is_empty() {
        return Ok(Vec::new());
    }

    // Two parallel accumulators: one rooted at the store root, one rooted at
    // the requesting module's directory.
    let mut absolute: Vec<&str> = Vec::new();
    let mut relative: Vec<&str> = source
        .map(|s| s.split('/').filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    relative.pop();

    for part in &target {
        match *part {
            "." => {}
            ".." => {
                absolute.pop();
                relative.pop();
            }
            part => {
                absolute.push(part);
                relative.push(part);
            }
        }
    }

    let is_root = id.trim_start().starts_with('/');
    let is_relative = source.is_some() && matches!(target[0], "." | "..");

    let mut paths: Vec<String> = Vec::new();
    let mut add = |candidate: String, paths: &mut Vec<String>| {
        if !paths.contains(&candidate) {
            paths.push(candidate);
        }
    };

    let absolute_path = absolute.join("/");
    if is_root {
        add(absolute_path.clone(), &mut paths);
    } else {
        add(relative.join("/"), &mut paths);
    }

    if !is_root && !is_relative {
        for search_path in search_paths {
            add(format!("{search_path}/{absolute_path}"), &mut paths);
        }
    }

    Ok(paths)
}

/// The script-file name variants of a candidate path.
///
/// A path that already carries the script extension stands alone; anything
/// else is tried with the extension appended and as a folder index file.
pub fn script_variants(path: &str) -> Vec<String> {
    if path.to_lowercase().ends_with(&format!(".{SCRIPT_EXTENSION}")) {
        vec![path.to_string()]
    } else {
        vec![
            format!("{path}.{SCRIPT_EXTENSION}"),
            format!("{path}/index.{SCRIPT_EXTENSION}"),
        ]
    }
}

/// Lower-cased extension of the final path segment, if it has one.
pub fn extension_of(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let dot = segment.rfind('.')?;
    let ext = &segment[dot + 1..];
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

/// Normalize a path to its canonical slash-joined form.
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
