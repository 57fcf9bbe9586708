//! The validated configuration store.
//!
//! [`RcStore`] is a flat key -> value map backed by a [`DefaultsTable`]:
//! only registered keys are accepted and every write runs through the
//! key's validator. [`Registry`] is the cheap-clone handle that is
//! constructed once at process start and passed to every plotter.
//!
//! The registry is not synchronized against concurrent semantic mutation;
//! plugin loading and default changes are startup-time, single-threaded
//! operations. The interior `RwLock` only guarantees memory safety.

use crate::defaults::DefaultsTable;
use crate::plugin::PlotterDef;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Configuration and plugin errors.
#[derive(Debug, Error)]
pub enum RcError {
    #[error("{key} is not a valid configuration key")]
    UnknownKey { key: String },

    #[error("key {key}: {message}")]
    Validation { key: String, message: String },

    #[error("plugin {plugin} redefines: {}", keys.join(", "))]
    PluginConflict { plugin: String, keys: Vec<String> },

    #[error("configuration io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Validated key -> value store.
#[derive(Debug, Clone, Default)]
pub struct RcStore {
    values: FxHashMap<String, Value>,
    defaults: DefaultsTable,
    /// old key -> new key; reads and writes are forwarded with a warning.
    deprecated: FxHashMap<String, String>,
    /// old key -> hint; reads and writes are dropped with a warning.
    deprecated_ignored: FxHashMap<String, String>,
    /// Registered plot methods, keyed by identifier.
    plotter_defs: FxHashMap<String, PlotterDef>,
}

impl RcStore {
    /// Create a store with every key at its default value.
    pub fn new(defaults: DefaultsTable) -> Self {
        let values = defaults
            .iter()
            .map(|(k, e)| (k.to_string(), e.default.clone()))
            .collect();
        Self {
            values,
            defaults,
            deprecated: FxHashMap::default(),
            deprecated_ignored: FxHashMap::default(),
            plotter_defs: FxHashMap::default(),
        }
    }

    /// Resolve deprecation aliases. Returns None for ignored keys.
    fn resolve_key<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if let Some(new_key) = self.deprecated.get(key) {
            log::warn!("{key} is deprecated and replaced with {new_key}; please use the latter");
            return Some(new_key);
        }
        if let Some(hint) = self.deprecated_ignored.get(key) {
            log::warn!("{key} is deprecated and ignored. Use {hint}");
            return None;
        }
        Some(key)
    }

    /// Validate and store a value. Unknown keys are an error.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), RcError> {
        let Some(key) = self.resolve_key(key).map(|k| k.to_string()) else {
            return Ok(());
        };
        let Some(entry) = self.defaults.get(&key) else {
            return Err(RcError::UnknownKey { key });
        };
        let validated = entry
            .validator
            .run(&value)
            .map_err(|message| RcError::Validation {
                key: key.clone(),
                message,
            })?;
        self.values.insert(key, validated);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let key = self.resolve_key(key)?;
        self.values.get(key).cloned()
    }

    pub fn try_get(&self, key: &str) -> Result<Value, RcError> {
        self.get(key).ok_or_else(|| RcError::UnknownKey {
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn defaults(&self) -> &DefaultsTable {
        &self.defaults
    }

    pub fn defaults_mut(&mut self) -> &mut DefaultsTable {
        &mut self.defaults
    }

    /// Reset every registered key to its default. Keys added to the
    /// defaults table after construction get their values here.
    pub fn update_from_defaults(&mut self) {
        for (key, entry) in self.defaults.iter() {
            self.values
                .entry(key.to_string())
                .or_insert_with(|| entry.default.clone());
        }
    }

    /// All current values whose key starts with `prefix`, sorted by key.
    pub fn find_all(&self, prefix: &str) -> Vec<(String, Value)> {
        let mut found: Vec<(String, Value)> = self
            .values
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn add_deprecated(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.deprecated.insert(old.into(), new.into());
    }

    pub fn add_deprecated_ignored(&mut self, old: impl Into<String>, hint: impl Into<String>) {
        self.deprecated_ignored.insert(old.into(), hint.into());
    }

    pub fn register_plotter(&mut self, def: PlotterDef) -> Option<PlotterDef> {
        self.plotter_defs.insert(def.identifier.clone(), def)
    }

    pub fn plotter_def(&self, identifier: &str) -> Option<&PlotterDef> {
        self.plotter_defs.get(identifier)
    }

    pub fn plotter_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plotter_defs.keys().cloned().collect();
        ids.sort();
        ids
    }

    // =========================================================================
    // File io
    // =========================================================================

    /// The default configuration file path:
    /// `$ARRAYPLOT_RC`, or `<config dir>/arrayplot/arrayplotrc.json`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ARRAYPLOT_RC") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("arrayplot")
            .join("arrayplotrc.json")
    }

    /// Update the store from a JSON file. Lines starting with `//` are
    /// stripped first. Invalid keys or values are skipped with a warning
    /// instead of aborting the load.
    pub fn load_from_file(&mut self, path: &Path) -> Result<(), RcError> {
        let contents = std::fs::read_to_string(path)?;
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim_start().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        let parsed: serde_json::Map<String, Value> = serde_json::from_str(&cleaned)?;
        for (key, value) in parsed {
            if let Err(err) = self.set(&key, value) {
                log::warn!("skipping configuration entry from {}: {err}", path.display());
            }
        }
        Ok(())
    }

    /// Serialize the store, one key per line, each preceded by its
    /// description as a `//` comment. The output round-trips through
    /// [`RcStore::load_from_file`].
    pub fn dump_string(&self) -> String {
        let mut lines = vec![
            "// Configuration parameters of the arrayplot module".to_string(),
            "// Copy this file to the path of the ARRAYPLOT_RC environment variable".to_string(),
            "// to customize the defaults.".to_string(),
            "{".to_string(),
        ];
        let keys = self.sorted_keys();
        let last = keys.len().saturating_sub(1);
        for (i, key) in keys.iter().enumerate() {
            if let Some(entry) = self.defaults.get(key) {
                for line in entry.description.lines() {
                    lines.push(format!("  // {}", line.trim()));
                }
            }
            let value = serde_json::to_string(&self.values[key]).unwrap_or_default();
            let comma = if i == last { "" } else { "," };
            lines.push(format!("  {}: {value}{comma}", serde_json::to_string(key).unwrap_or_default()));
        }
        lines.push("}".to_string());
        lines.join("\n")
    }

    pub fn dump_to_file(&self, path: &Path) -> Result<(), RcError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.dump_string())?;
        Ok(())
    }
}

/// Shared handle on an [`RcStore`].
#[derive(Debug, Clone)]
pub struct Registry(Arc<RwLock<RcStore>>);

impl Registry {
    pub fn new(store: RcStore) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    /// A registry over the base defaults, the usual entry point.
    pub fn with_base_defaults() -> Self {
        Self::new(RcStore::new(crate::defaults::base_defaults()))
    }

    pub fn read<R>(&self, f: impl FnOnce(&RcStore) -> R) -> R {
        f(&self.0.read().expect("rc store poisoned"))
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut RcStore) -> R) -> R {
        f(&mut self.0.write().expect("rc store poisoned"))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read(|rc| rc.get(key))
    }

    pub fn try_get(&self, key: &str) -> Result<Value, RcError> {
        self.read(|rc| rc.try_get(key))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), RcError> {
        self.write(|rc| rc.set(key, value))
    }

    /// Boolean convenience getter with a fallback for unset keys.
    pub fn get_bool(&self, key: &str, fallback: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(fallback)
    }

    /// Snapshot the current values and restore them when the guard
    /// drops. Used for temporary overrides in tests and scripts.
    pub fn scoped(&self) -> ScopedRc {
        let snapshot = self.read(|rc| rc.values.clone());
        ScopedRc {
            registry: self.clone(),
            snapshot,
        }
    }
}

/// RAII guard restoring the store on drop.
pub struct ScopedRc {
    registry: Registry,
    snapshot: FxHashMap<String, Value>,
}

impl Drop for ScopedRc {
    fn drop(&mut self) {
        let snapshot = std::mem::take(&mut self.snapshot);
        self.registry.write(|rc| {
            rc.values = snapshot;
        });
    }
}
