// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export value model
//!
//! Modules can export anything the host engine produces, and builtin modules
//! inject host capabilities that have no data representation at all. `Value`
//! covers both: plain data variants plus [`Value::Foreign`] for opaque host
//! objects.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An evaluated module export
#[derive(Clone)]
pub enum Value {
    /// Absent / null value
    Null,
    /// Boolean
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// String value
    String(String),
    /// Ordered list of values
    Array(Arc<Vec<Value>>),
    /// Keyed map of values
    Object(Arc<BTreeMap<String, Value>>),
    /// Opaque host-injected object, compared by identity
    Foreign(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// An empty object, the initial `exports` of every script module.
    pub fn empty_object() -> Self {
        Value::Object(Arc::new(BTreeMap::new()))
    }

    /// Wrap a host object as an opaque foreign value.
    pub fn foreign<T: Any + Send + Sync>(value: T) -> Self {
        Value::Foreign(Arc::new(value))
    }

    /// Build an object value from key/value pairs.
    pub fn object(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Object(Arc::new(entries.into_iter().collect()))
    }

    /// Downcast a foreign value back to its host type.
    pub fn as_foreign<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Value::Foreign(inner) => inner.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Convert a parsed JSON document into a value.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(Arc::new(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Arc::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Foreign(a), Value::Foreign(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Value::Foreign(_) => write!(f, "Foreign(..)"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
