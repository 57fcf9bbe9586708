//! Prefix-scoped sub-views of the configuration store.
//!
//! A plotter class declares an ordered list of key prefixes (most
//! specific first, base classes after derived ones). A [`SubStore`] built
//! from that list resolves a bare formatoption key like `"title"` by
//! trying `"<prefix>title"` against the base store for each prefix in
//! order; the first existing combination wins. Writes stay local to the
//! sub-view unless `trace` is on, in which case they are written back to
//! the base store at the first existing prefixed key (inserting under the
//! most specific prefix if the key exists nowhere yet).

use crate::rc::{RcError, Registry};
use crate::validate::Validator;
use rustc_hash::FxHashMap;
use serde_json::Value;

/// A dictionary-like view of the registry scoped by key prefixes.
#[derive(Debug, Clone)]
pub struct SubStore {
    base: Registry,
    /// Most specific first.
    prefixes: Vec<String>,
    local: FxHashMap<String, Value>,
    /// If true, writes go to the base registry instead of the local map.
    trace: bool,
}

impl SubStore {
    /// Build a sub-view and merge the `plotter.user` overrides layer on
    /// top: for every key in `keys`, the first prefix combination found
    /// in the user table becomes a local override.
    pub fn scoped(base: &Registry, prefixes: Vec<String>, keys: &[String]) -> Self {
        let mut sub = Self {
            base: base.clone(),
            prefixes,
            local: FxHashMap::default(),
            trace: false,
        };
        if let Some(Value::Object(user)) = base.get("plotter.user") {
            for key in keys {
                for prefix in &sub.prefixes {
                    let full = format!("{prefix}{key}");
                    if let Some(value) = user.get(&full) {
                        sub.local.insert(key.clone(), value.clone());
                        break;
                    }
                }
            }
        }
        sub
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    /// The full base-store key a bare key resolves to, if any.
    pub fn resolve_key(&self, key: &str) -> Option<String> {
        self.base.read(|rc| {
            self.prefixes
                .iter()
                .map(|prefix| format!("{prefix}{key}"))
                .find(|full| rc.contains(full))
        })
    }

    /// First-match lookup: local overrides, then each prefix in order.
    pub fn get(&self, key: &str) -> Result<Value, RcError> {
        if let Some(value) = self.local.get(key) {
            return Ok(value.clone());
        }
        self.base.read(|rc| {
            for prefix in &self.prefixes {
                let full = format!("{prefix}{key}");
                if let Some(value) = rc.get(&full) {
                    return Ok(value);
                }
            }
            Err(RcError::UnknownKey {
                key: key.to_string(),
            })
        })
    }

    /// Store a value. With `trace` off the value stays local to this
    /// view; with `trace` on it is validated and written into the base
    /// store, inserting under the most specific prefix when the key does
    /// not exist under any prefix yet.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), RcError> {
        if !self.trace {
            self.local.insert(key.to_string(), value);
            return Ok(());
        }
        let full = match self.resolve_key(key) {
            Some(full) => full,
            None => match self.prefixes.first() {
                Some(prefix) => format!("{prefix}{key}"),
                None => {
                    return Err(RcError::UnknownKey {
                        key: key.to_string(),
                    })
                }
            },
        };
        self.base.write(|rc| rc.set(&full, value))
    }

    /// The validator registered for a key's resolved base entry.
    pub fn validator_for(&self, key: &str) -> Option<Validator> {
        self.base.read(|rc| {
            for prefix in &self.prefixes {
                let full = format!("{prefix}{key}");
                if let Some(entry) = rc.defaults().get(&full) {
                    return Some(entry.validator.clone());
                }
            }
            None
        })
    }
}
