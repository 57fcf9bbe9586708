//! The defaults table.
//!
//! Maps every known configuration key to its default value, its
//! validator and a description. A key is only accepted by the store if
//! it is registered here; plugins extend the table at startup.

use crate::validate::Validator;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

/// One registered key.
#[derive(Debug, Clone)]
pub struct DefaultEntry {
    pub default: Value,
    pub validator: Validator,
    pub description: String,
}

/// key -> (default, validator, description).
#[derive(Debug, Clone, Default)]
pub struct DefaultsTable {
    entries: FxHashMap<String, DefaultEntry>,
}

impl DefaultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        default: Value,
        validator: Validator,
        description: impl Into<String>,
    ) {
        self.entries.insert(
            key.into(),
            DefaultEntry {
                default,
                validator,
                description: description.into(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&DefaultEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted iteration for deterministic dumps and diagnostics.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Keys present in both this table and `other`.
    pub fn conflicts_with(&self, other: &DefaultsTable) -> Vec<String> {
        let mut dup: Vec<String> = other
            .entries
            .keys()
            .filter(|k| self.entries.contains_key(*k))
            .cloned()
            .collect();
        dup.sort();
        dup
    }

    /// Merge `other` into this table. Existing keys are overwritten
    /// (last plugin wins; the caller decides whether that is an error).
    pub fn merge(&mut self, other: DefaultsTable) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DefaultEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The framework's own keys. Plotter keys come from plugins and from the
/// built-in plot methods.
pub fn base_defaults() -> DefaultsTable {
    let mut table = DefaultsTable::new();
    table.insert(
        "auto_draw",
        json!(true),
        Validator::bool(),
        "redraw figures automatically when the draw parameter of an update is unset",
    );
    table.insert(
        "auto_show",
        json!(false),
        Validator::bool(),
        "show figures automatically after updates",
    );
    table.insert(
        "lists.auto_update",
        json!(true),
        Validator::bool(),
        "default for the auto_update parameter of plotters and projects",
    );
    table.insert(
        "plotter.user",
        json!({}),
        Validator::dict(),
        "formatoption defaults set by the user, keyed by their full prefixed \
         name, merged over plugin defaults for every matching plotter",
    );
    table.insert(
        "decoder.x",
        json!([]),
        Validator::string_set(),
        "dimension names interpreted as the x axis",
    );
    table.insert(
        "decoder.y",
        json!([]),
        Validator::string_set(),
        "dimension names interpreted as the y axis",
    );
    table.insert(
        "decoder.z",
        json!([]),
        Validator::string_set(),
        "dimension names interpreted as the vertical axis",
    );
    table.insert(
        "decoder.t",
        json!(["time"]),
        Validator::string_set(),
        "dimension names interpreted as the time axis",
    );
    table
}
