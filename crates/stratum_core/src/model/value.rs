//! Tagged-variant value type for dynamic entity state bags.
//!
//! # Responsibility
//! - Represent heterogeneous string-keyed state (settings blobs, unlock
//!   flags) with explicit variants instead of untyped maps.
//!
//! # Invariants
//! - Accessors return the caller-supplied default on type mismatch; they
//!   never panic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One dynamic value: string, integer, boolean or nested map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self {
            Self::Str(value) => value.as_str(),
            _ => default,
        }
    }

    pub fn as_int_or(&self, default: i64) -> i64 {
        match self {
            Self::Int(value) => *value,
            _ => default,
        }
    }

    pub fn as_bool_or(&self, default: bool) -> bool {
        match self {
            Self::Bool(value) => *value,
            _ => default,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a map; `None` otherwise.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|entries| entries.get(key))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Map(value)
    }
}
