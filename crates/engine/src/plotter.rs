//! The plotter and its update engine.
//!
//! A [`Plotter`] binds one data object to one render target and owns one
//! behavior box per declared formatoption. The update engine turns a set
//! of registered value changes into the exact set of formatoptions that
//! must re-run, in a deterministic order, executed in three priority
//! bands; see `start_update_inner` for the cycle itself.
//!
//! # Cycle states
//!
//! Idle -> Registering -> Resolving -> Executing(Start|BeforePlot|End)
//! -> Drawing -> Idle, with a rollback path out of Resolving: any error
//! while resolving restores the last snapshot of the value map before it
//! is re-raised, so a plotter is never left with a partially applied
//! batch.
//!
//! # Ordering
//!
//! Within one plotter the execution order is fully deterministic:
//! formatoptions are sorted by key, then stably by priority (highest
//! first), then children and dependencies are hoisted before their
//! dependents with parents suppressing their scheduled children. Equal
//! priority without a dependency relation resolves to ascending key
//! order.

use crate::error::FmtError;
use crate::fmto::{
    group_title, FmtContext, FmtoDecl, Formatoption, PostHook, PostProcessing, PostTiming,
    Priority, Slot,
};
use crate::fuzzy;
use crate::report::UpdateReport;
use crate::sync::ReentrantLock;
use arrayplot_config::{Registry, SubStore};
use arrayplot_core::{CoordDecoder, DataObject, Decoder, DimSel, RenderTarget};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

// =============================================================================
// Plotter classes
// =============================================================================

/// Factory for one formatoption of a plotter class.
#[derive(Clone)]
pub struct FmtoFactory {
    pub decl: FmtoDecl,
    make: Arc<dyn Fn() -> Box<dyn Formatoption> + Send + Sync>,
}

/// The static description of a plotter type: its name, the rc prefixes
/// its defaults live under (most derived first) and the formatoptions it
/// declares. `derive` models subclassing: the derived class's prefix is
/// consulted first and its formatoptions override the base's by key.
#[derive(Clone)]
pub struct PlotterClass {
    name: String,
    prefixes: Vec<String>,
    fmtos: Vec<FmtoFactory>,
}

impl PlotterClass {
    /// A new class with the built-in post-processing formatoptions.
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut class = Self {
            name: name.into(),
            prefixes: vec![prefix.into()],
            fmtos: Vec::new(),
        };
        class.add(PostTiming::decl(), || Box::new(PostTiming));
        class.add(PostProcessing::decl(), || Box::new(PostProcessing));
        class
    }

    /// Derive a class from `base`: the new prefix is consulted before the
    /// base's prefixes and added formatoptions override by key.
    pub fn derive(name: impl Into<String>, prefix: impl Into<String>, base: &PlotterClass) -> Self {
        let prefix = prefix.into();
        let mut prefixes = vec![prefix];
        for p in &base.prefixes {
            if !prefixes.contains(p) {
                prefixes.push(p.clone());
            }
        }
        Self {
            name: name.into(),
            prefixes,
            fmtos: base.fmtos.clone(),
        }
    }

    /// Declare a formatoption, replacing any base declaration of the
    /// same key. Plot formatoptions are forced data dependent.
    pub fn add<F>(&mut self, decl: FmtoDecl, make: F)
    where
        F: Fn() -> Box<dyn Formatoption> + Send + Sync + 'static,
    {
        let mut decl = decl;
        if decl.plot_fmt {
            decl.data_dependent = crate::fmto::DataDependent::Yes;
        }
        let factory = FmtoFactory {
            decl,
            make: Arc::new(make),
        };
        if let Some(existing) = self
            .fmtos
            .iter_mut()
            .find(|f| f.decl.key == factory.decl.key)
        {
            *existing = factory;
        } else {
            self.fmtos.push(factory);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Declared keys in declaration order.
    pub fn keys(&self) -> Vec<String> {
        self.fmtos.iter().map(|f| f.decl.key.clone()).collect()
    }

    pub fn decl(&self, key: &str) -> Option<&FmtoDecl> {
        self.fmtos.iter().map(|f| &f.decl).find(|d| d.key == key)
    }

    /// Render the declared keys as an ASCII table with up to four
    /// columns, optionally grouped by group title.
    pub fn show_keys(&self, grouped: bool) -> String {
        if grouped {
            let mut by_group: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for f in &self.fmtos {
                by_group
                    .entry(group_title(f.decl.group))
                    .or_default()
                    .push(f.decl.key.clone());
            }
            let mut sections = Vec::new();
            for (title, keys) in by_group {
                let bars = "*".repeat(title.len());
                sections.push(format!("{bars}\n{title}\n{bars}\n{}", key_table(&keys)));
            }
            return sections.join("\n\n");
        }
        let mut keys = self.keys();
        keys.sort();
        key_table(&keys)
    }
}

fn key_table(keys: &[String]) -> String {
    if keys.is_empty() {
        return String::new();
    }
    let n = keys.len();
    let ncols = n.min(4);
    let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);
    let bar: String = {
        let cell = "-".repeat(width + 2);
        let mut s = String::from("+");
        for _ in 0..ncols {
            s.push_str(&cell);
            s.push('+');
        }
        s
    };
    let mut lines = vec![bar.clone()];
    for row in keys.chunks(ncols) {
        let mut cells: Vec<String> = row.iter().map(|k| format!(" {k:width$} ")).collect();
        while cells.len() < ncols {
            cells.push(" ".repeat(width + 2));
        }
        lines.push(format!("|{}|", cells.join("|")));
        lines.push(bar.clone());
    }
    lines.join("\n")
}

// =============================================================================
// Update parameters
// =============================================================================

/// Which keys to re-run even if their value did not change.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Force {
    #[default]
    None,
    /// Force every key of this call's `fmt`.
    All,
    Keys(Vec<String>),
}

/// Parameters of one `update` call.
#[derive(Clone, Default)]
pub struct UpdateParams {
    pub fmt: Vec<(String, Value)>,
    /// Recompute the data selection even without a Start formatoption.
    pub replot: bool,
    pub force: Force,
    /// Queue the defaults of every declared key as well.
    pub todefault: bool,
    /// None defers to the `auto_draw` configuration key.
    pub draw: Option<bool>,
    /// Run the cycle now even if the plotter defers updates.
    pub auto_update: bool,
}

impl UpdateParams {
    pub fn new() -> Self {
        Self {
            draw: Some(false),
            ..Default::default()
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fmt.push((key.into(), value));
        self
    }

    pub fn replot(mut self) -> Self {
        self.replot = true;
        self
    }

    pub fn force(mut self, force: Force) -> Self {
        self.force = force;
        self
    }

    pub fn todefault(mut self) -> Self {
        self.todefault = true;
        self
    }

    pub fn draw(mut self, draw: Option<bool>) -> Self {
        self.draw = draw;
        self
    }

    pub fn auto_update(mut self) -> Self {
        self.auto_update = true;
        self
    }
}

/// Construction options of a plotter.
pub struct PlotterOptions {
    /// Name used in logs, journals and project files.
    pub name: String,
    /// None defers to the `lists.auto_update` configuration key.
    pub auto_update: Option<bool>,
    /// Draw after initialization; None defers to `auto_draw`.
    pub draw: Option<bool>,
    /// If false, only the framework between plotter and data is set up.
    pub make_plot: bool,
    /// Clear the axes before the first initialization.
    pub clear: bool,
    /// Allow post-processing hooks to run.
    pub enable_post: bool,
    /// Initial formatoption values, applied over the defaults.
    pub fmt: Vec<(String, Value)>,
}

impl Default for PlotterOptions {
    fn default() -> Self {
        Self {
            name: "data".to_string(),
            auto_update: None,
            draw: Some(false),
            make_plot: true,
            clear: false,
            enable_post: false,
            fmt: Vec::new(),
        }
    }
}

// =============================================================================
// Sharing bookkeeping
// =============================================================================

/// A formatoption of another plotter controlled by this one.
pub struct ShareTarget {
    pub plotter: Weak<Mutex<Plotter>>,
}

/// Marks a key as delegated to another plotter's formatoption.
pub struct SharedFrom {
    source: Weak<Mutex<Plotter>>,
    source_name: String,
}

/// One propagation order produced by an update cycle: the other plotter
/// and the (key, shared value) pairs to force onto it, plus this
/// plotter's slot locks to hold while the other applies them.
struct PropTarget {
    plotter: Weak<Mutex<Plotter>>,
    values: Vec<(String, Value)>,
    locks: Vec<ReentrantLock>,
}

/// Result of one inner update cycle.
struct CycleOutcome {
    drew: bool,
    propagate: Vec<PropTarget>,
}

impl CycleOutcome {
    fn noop() -> Self {
        Self {
            drew: false,
            propagate: Vec::new(),
        }
    }
}

// =============================================================================
// Plotter state
// =============================================================================

/// The state a formatoption context borrows.
pub struct PlotterState {
    pub(crate) values: FxHashMap<String, Value>,
    data: Option<DataObject>,
    plot_data: Option<DataObject>,
    decoder: Box<dyn Decoder>,
    target: Box<dyn RenderTarget>,
    post_hooks: FxHashMap<String, PostHook>,
}

/// Interactive plotting object for one data object.
pub struct Plotter {
    class: Arc<PlotterClass>,
    name: String,
    registry: Registry,
    rc: SubStore,
    state: PlotterState,
    slots: Vec<Slot>,
    index: FxHashMap<String, usize>,

    registered_updates: FxHashMap<String, Value>,
    force: FxHashSet<String>,
    todefault: bool,
    /// Snapshots of the value map, newest last. Pushed at the start of
    /// every cycle; popped only by the rollback path.
    old_fmt: Vec<FxHashMap<String, Value>>,
    /// Keys of the most recent resolved selection, priority order.
    last_update: Vec<String>,
    last_report: UpdateReport,
    /// key -> the plotter controlling it.
    shared_from: FxHashMap<String, SharedFrom>,

    replot: bool,
    cleared: bool,
    initialized: bool,
    initializing: bool,
    updating: bool,
    disabled: bool,
    no_auto_update: bool,
    no_validation: bool,
    enable_post: bool,
}

impl Plotter {
    fn build(
        class: &Arc<PlotterClass>,
        registry: &Registry,
        data: Option<DataObject>,
        target: Box<dyn RenderTarget>,
        opts: &PlotterOptions,
    ) -> Result<Self, FmtError> {
        let keys = class.keys();
        let rc = SubStore::scoped(registry, class.prefixes().to_vec(), &keys);
        let decoder = decoder_from_registry(registry);

        let mut slots = Vec::with_capacity(class.fmtos.len());
        let mut index = FxHashMap::default();
        for factory in &class.fmtos {
            index.insert(factory.decl.key.clone(), slots.len());
            slots.push(Slot {
                decl: factory.decl.clone(),
                behavior: (factory.make)(),
                lock: ReentrantLock::new(),
                shared: Vec::new(),
            });
        }
        // relations must point at declared keys
        for slot in &slots {
            for rel in slot
                .decl
                .children
                .iter()
                .chain(&slot.decl.dependencies)
                .chain(&slot.decl.parents)
                .chain(&slot.decl.connections)
            {
                if !index.contains_key(rel) {
                    log::warn!(
                        "formatoption {} of {} references undeclared key {rel}",
                        slot.decl.key,
                        class.name()
                    );
                }
            }
        }

        let auto_update = opts
            .auto_update
            .unwrap_or_else(|| registry.get_bool("lists.auto_update", true));

        let mut plotter = Self {
            class: Arc::clone(class),
            name: opts.name.clone(),
            registry: registry.clone(),
            rc,
            state: PlotterState {
                values: FxHashMap::default(),
                data,
                plot_data: None,
                decoder: Box::new(decoder),
                target,
                post_hooks: FxHashMap::default(),
            },
            slots,
            index,
            registered_updates: FxHashMap::default(),
            force: FxHashSet::default(),
            todefault: false,
            old_fmt: Vec::new(),
            last_update: Vec::new(),
            last_report: UpdateReport::new(),
            shared_from: FxHashMap::default(),
            replot: true,
            cleared: opts.clear,
            initialized: false,
            initializing: false,
            updating: false,
            disabled: false,
            no_auto_update: !auto_update,
            no_validation: false,
            enable_post: opts.enable_post,
        };

        // defaults first (unvalidated, they come from the defaults table),
        // then the constructor overrides (validated)
        for idx in 0..plotter.slots.len() {
            let key = plotter.slots[idx].decl.key.clone();
            let default = plotter.default_value(&key);
            plotter.state.values.insert(key, default);
        }
        for (key, value) in &opts.fmt {
            plotter.check_key(key)?;
            plotter.set_value_user(key, value.clone())?;
        }
        Ok(plotter)
    }

    // =========================================================================
    // Key and value access
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn class(&self) -> &Arc<PlotterClass> {
        &self.class
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn set_enable_post(&mut self, enable: bool) {
        self.enable_post = enable;
    }

    pub fn register_post_hook(&mut self, name: impl Into<String>, hook: PostHook) {
        self.state.post_hooks.insert(name.into(), hook);
    }

    pub fn data(&self) -> Option<&DataObject> {
        self.state.data.as_ref()
    }

    pub fn plot_data(&self) -> Option<&DataObject> {
        self.state.plot_data.as_ref()
    }

    pub fn target(&self) -> &dyn RenderTarget {
        self.state.target.as_ref()
    }

    /// Sorted declared keys.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.index.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys touched by the most recent update cycle, priority order.
    pub fn last_update(&self) -> &[String] {
        &self.last_update
    }

    pub fn last_report(&self) -> &UpdateReport {
        &self.last_report
    }

    /// Check that a key is declared; the error carries close matches.
    pub fn check_key(&self, key: &str) -> Result<(), FmtError> {
        if self.index.contains_key(key) {
            Ok(())
        } else {
            Err(FmtError::UnknownKey {
                key: key.to_string(),
                similar: fuzzy::similar_keys(key, &self.sorted_keys(), 3, 0.6),
            })
        }
    }

    /// Current value of a key. For shared keys this is the controlling
    /// plotter's value, pushed here on every propagation.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.state.values.get(key).cloned()
    }

    /// All current values, sorted by key.
    pub fn values_map(&self) -> Vec<(String, Value)> {
        let mut values: Vec<(String, Value)> = self
            .state
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }

    /// Per-key values as written into project files.
    pub fn save_snapshot(&self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        for key in self.sorted_keys() {
            let idx = self.index[&key];
            let value = self.state.values.get(&key).cloned().unwrap_or(Value::Null);
            values.push((key, self.slots[idx].behavior.value_for_save(&value)));
        }
        values
    }

    /// Keys whose value differs from their default.
    pub fn changed_values(&self) -> Vec<(String, Value)> {
        let mut changed = Vec::new();
        for key in self.sorted_keys() {
            let idx = self.index[&key];
            let current = self.state.values.get(&key).cloned().unwrap_or(Value::Null);
            let default = self.default_value(&key);
            if self.slots[idx].behavior.diff_value(&default, &current) {
                changed.push((key, current));
            }
        }
        changed
    }

    /// The keys currently delegated to other plotters, with the
    /// controlling plotter's name.
    pub fn shared_from_names(&self) -> Vec<(String, String)> {
        let mut shared: Vec<(String, String)> = self
            .shared_from
            .iter()
            .map(|(k, s)| (k.clone(), s.source_name.clone()))
            .collect();
        shared.sort();
        shared
    }

    /// Whether a key changed in the last cycle. Returns the old and new
    /// values; with `include_last`, being part of the last selection
    /// counts even if the value is unchanged.
    pub fn has_changed(&self, key: &str, include_last: bool) -> Option<(Value, Value)> {
        if self.initializing {
            return None;
        }
        let idx = *self.index.get(key)?;
        let old = self
            .old_fmt
            .last()
            .and_then(|m| m.get(key).cloned())
            .unwrap_or_else(|| self.default_value(key));
        let current = self.state.values.get(key).cloned().unwrap_or(Value::Null);
        if self.slots[idx].behavior.diff_value(&old, &current)
            || (include_last && self.last_update.iter().any(|k| k == key))
        {
            Some((old, current))
        } else {
            None
        }
    }

    /// The default of a key: the scoped registry entry, else the
    /// class-level constant.
    pub fn default_value(&self, key: &str) -> Value {
        if let Ok(value) = self.rc.get(key) {
            return value;
        }
        if let Some(idx) = self.index.get(key) {
            if let Some(default) = &self.slots[*idx].decl.default {
                return default.clone();
            }
        }
        log::warn!("no default value for formatoption keyword {key}");
        Value::Null
    }

    fn validate_value(&self, idx: usize, value: &Value) -> Result<Value, FmtError> {
        let slot = &self.slots[idx];
        let key = &slot.decl.key;
        if let Some(result) = slot.behavior.validate(value) {
            return result.map_err(|message| FmtError::Validation {
                key: key.clone(),
                message,
            });
        }
        match self.rc.validator_for(key) {
            Some(validator) => validator.run(value).map_err(|message| FmtError::Validation {
                key: key.clone(),
                message,
            }),
            None => {
                log::warn!(
                    "Could not find a validation function for {key} formatoption keyword! \
                     No validation will be made!"
                );
                Ok(value.clone())
            }
        }
    }

    /// Validate and store a value; a no-op for shared keys.
    fn set_value_user(&mut self, key: &str, value: Value) -> Result<(), FmtError> {
        if self.shared_from.contains_key(key) {
            return Ok(());
        }
        let idx = self.index[key];
        let validated = if self.no_validation {
            value
        } else {
            self.validate_value(idx, &value)?
        };
        let current = self.state.values.get(key);
        let stored = self.slots[idx].behavior.store_value(current, &validated, false);
        self.state.values.insert(key.to_string(), stored);
        Ok(())
    }

    /// Validate, diff and store. True if the value actually changed.
    fn check_and_set(&mut self, idx: usize, value: Value, todefault: bool) -> Result<bool, FmtError> {
        let validated = if self.no_validation {
            value
        } else {
            self.validate_value(idx, &value)?
        };
        let key = self.slots[idx].decl.key.clone();
        let current = self.state.values.get(&key).cloned().unwrap_or(Value::Null);
        if self.slots[idx].behavior.diff_value(&current, &validated) {
            let stored = self.slots[idx]
                .behavior
                .store_value(Some(&current), &validated, todefault);
            self.state.values.insert(key, stored);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // =========================================================================
    // Registering
    // =========================================================================

    /// Merge requested changes into the pending batch. Unknown keys fail
    /// here, before any state is touched.
    pub fn register_update(
        &mut self,
        fmt: Vec<(String, Value)>,
        replot: bool,
        force: Force,
        todefault: bool,
    ) -> Result<(), FmtError> {
        if self.disabled {
            return Ok(());
        }
        for (key, _) in &fmt {
            self.check_key(key)?;
        }
        match &force {
            Force::None => {}
            Force::All => {
                self.force.extend(fmt.iter().map(|(k, _)| k.clone()));
            }
            Force::Keys(keys) => {
                for key in keys {
                    self.check_key(key)?;
                }
                self.force.extend(keys.iter().cloned());
            }
        }
        self.replot = self.replot || replot;
        self.todefault = self.todefault || todefault;
        self.registered_updates.extend(fmt);
        Ok(())
    }

    pub fn has_pending_updates(&self) -> bool {
        !self.registered_updates.is_empty() || !self.force.is_empty()
    }

    pub(crate) fn take_registered(&mut self) -> (FxHashMap<String, Value>, FxHashSet<String>) {
        (
            std::mem::take(&mut self.registered_updates),
            std::mem::take(&mut self.force),
        )
    }

    pub(crate) fn put_registered(
        &mut self,
        registered: FxHashMap<String, Value>,
        force: FxHashSet<String>,
    ) {
        self.registered_updates = registered;
        self.force = force;
    }

    /// Re-slice the data from its base with new dimension values. The
    /// compute-heavy part of a replot, run in parallel by collections.
    pub fn apply_dims(&mut self, dims: &BTreeMap<String, DimSel>) -> Result<(), FmtError> {
        let Some(data) = &self.state.data else {
            return Ok(());
        };
        let new = data
            .reselect(dims)
            .map_err(|e| FmtError::Data(e.to_string()))?;
        self.state.data = Some(new);
        self.replot = true;
        Ok(())
    }

    // =========================================================================
    // Resolving
    // =========================================================================

    fn save_state(&mut self) {
        self.old_fmt.push(self.state.values.clone());
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.old_fmt.pop() {
            self.state.values = snapshot;
        }
    }

    /// Step 1-3 plus 4 of the resolver: seed forced keys, queue defaults
    /// when updating to default, filter unchanged values, insert the
    /// additional formatoptions and acquire the selected locks.
    fn set_and_filter(&mut self) -> Result<(Vec<usize>, Vec<String>), FmtError> {
        // forced keys re-run even without a diff: seed them with their
        // current value
        let mut forced: Vec<String> = self.force.iter().cloned().collect();
        forced.sort();
        for key in forced {
            if !self.registered_updates.contains_key(&key) {
                let current = self.state.values.get(&key).cloned().unwrap_or(Value::Null);
                self.registered_updates.insert(key, current);
            }
        }

        let mut queue: Vec<(String, Value)> = self
            .registered_updates
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        queue.sort_by(|a, b| a.0.cmp(&b.0));
        if self.todefault {
            let seen: FxHashSet<String> = queue.iter().map(|(k, _)| k.clone()).collect();
            for key in self.sorted_keys() {
                if !seen.contains(&key) {
                    let default = self.default_value(&key);
                    queue.push((key, default));
                }
            }
        }

        let mut selected: Vec<usize> = Vec::new();
        let mut selected_set: FxHashSet<usize> = FxHashSet::default();
        let mut skipped_shared: Vec<String> = Vec::new();
        for (key, value) in queue {
            let idx = self.index[&key];
            let mut changed = if self.shared_from.contains_key(&key) && !self.force.contains(&key) {
                log::warn!(
                    "{key} formatoption is shared with another plotter. \
                     Use the unshare method to enable the updating"
                );
                skipped_shared.push(key.clone());
                false
            } else {
                match self.check_and_set(idx, value, self.todefault) {
                    Ok(changed) => changed,
                    Err(err) => {
                        self.registered_updates.remove(&key);
                        log::debug!("Failed to set {key}");
                        return Err(err);
                    }
                }
            };
            changed = changed || self.force.contains(&key);
            if changed && selected_set.insert(idx) {
                selected.push(idx);
            }
        }

        let selected = self.insert_additionals(selected, selected_set);
        // deterministic lock order: by key
        let mut to_lock = selected.clone();
        to_lock.sort_by(|a, b| self.slots[*a].decl.key.cmp(&self.slots[*b].decl.key));
        for idx in to_lock {
            self.slots[idx].lock.acquire();
        }

        self.todefault = false;
        self.registered_updates.clear();
        self.force.clear();
        Ok((selected, skipped_shared))
    }

    /// Transitive dependency closure of one formatoption (dependencies
    /// only, children do not force updates).
    fn transitive_dependencies(&self, idx: usize) -> FxHashSet<String> {
        let all_keys = self.sorted_keys();
        let mut closure = FxHashSet::default();
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            let deps = self.slots[current]
                .decl
                .resolved_dependencies(&self.state.values, &all_keys);
            for dep in deps {
                if let Some(&dep_idx) = self.index.get(&dep) {
                    if closure.insert(dep) {
                        stack.push(dep_idx);
                    }
                }
            }
        }
        closure
    }

    /// Insert the formatoptions that must run although they were not
    /// requested: data-dependent ones on a replot, update-after-plot
    /// ones when the plot is re-made, dependents of anything selected,
    /// and finally the clearing cascade that replaces the whole
    /// selection with every declared key.
    fn insert_additionals(
        &mut self,
        mut selected: Vec<usize>,
        mut selected_set: FxHashSet<usize>,
    ) -> Vec<usize> {
        let mut keys: FxHashSet<String> = selected
            .iter()
            .map(|&i| self.slots[i].decl.key.clone())
            .collect();

        self.replot = self.replot
            || selected
                .iter()
                .any(|&i| self.slots[i].decl.requires_replot);
        if self.replot
            || selected
                .iter()
                .any(|&i| self.slots[i].decl.priority == Priority::Start)
        {
            self.replot = true;
            self.state.plot_data = self.state.data.clone();
            if let Some(data) = self.state.data.clone() {
                for idx in self.sorted_slot_indices() {
                    if !selected_set.contains(&idx)
                        && self.slots[idx]
                            .decl
                            .data_dependent
                            .check(&self.state.values, &data)
                    {
                        selected.push(idx);
                        selected_set.insert(idx);
                        keys.insert(self.slots[idx].decl.key.clone());
                    }
                }
            }
        }

        if selected
            .iter()
            .any(|&i| self.slots[i].decl.priority != Priority::End)
        {
            for idx in self.sorted_slot_indices() {
                if !selected_set.contains(&idx) && self.slots[idx].decl.update_after_plot {
                    selected.push(idx);
                    selected_set.insert(idx);
                }
            }
        }

        let unselected: Vec<usize> = self
            .sorted_slot_indices()
            .into_iter()
            .filter(|idx| !selected_set.contains(idx))
            .collect();
        for idx in unselected {
            let closure = self.transitive_dependencies(idx);
            if closure.iter().any(|dep| keys.contains(dep)) {
                selected.push(idx);
                selected_set.insert(idx);
            }
        }

        if selected
            .iter()
            .any(|&i| self.slots[i].decl.requires_clearing)
        {
            self.cleared = true;
            return self.sorted_slot_indices();
        }
        selected
    }

    /// Slot indices sorted by key, the deterministic walk order.
    fn sorted_slot_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.slots.len()).collect();
        indices.sort_by(|a, b| self.slots[*a].decl.key.cmp(&self.slots[*b].decl.key));
        indices
    }

    /// Order a selection: stable sort by key, stable sort by priority
    /// descending, then hoist children and dependencies before their
    /// dependents, suppressing formatoptions whose parent is scheduled.
    /// Records the selection as the last update.
    fn sorted_by_priority(&mut self, mut selected: Vec<usize>) -> Vec<usize> {
        selected.sort_by(|a, b| self.slots[*a].decl.key.cmp(&self.slots[*b].decl.key));
        selected.sort_by(|a, b| {
            self.slots[*b]
                .decl
                .priority
                .value()
                .cmp(&self.slots[*a].decl.priority.value())
        });
        self.last_update = selected
            .iter()
            .map(|&i| self.slots[i].decl.key.clone())
            .collect();
        log::debug!("Update the formatoptions {:?}", self.last_update);

        let mut pending: Vec<usize> = selected;
        let mut pending_keys: Vec<String> = pending
            .iter()
            .map(|&i| self.slots[i].decl.key.clone())
            .collect();
        let mut result = Vec::new();
        while !pending.is_empty() {
            let idx = pending.remove(0);
            let key = pending_keys.remove(0);
            self.emit_children(idx, vec![key], &mut pending, &mut pending_keys, &mut result);
            let parents = &self.slots[idx].decl.parents;
            if parents.iter().any(|p| pending_keys.contains(p)) {
                continue;
            }
            result.push(idx);
        }
        result
    }

    fn emit_children(
        &self,
        idx: usize,
        parent_keys: Vec<String>,
        pending: &mut Vec<usize>,
        pending_keys: &mut Vec<String>,
        result: &mut Vec<usize>,
    ) {
        let all_keys = self.sorted_keys();
        let all_scheduled: Vec<String> = pending_keys
            .iter()
            .cloned()
            .chain(parent_keys.iter().cloned())
            .collect();
        let own_key = self.slots[idx].decl.key.clone();
        let relations: Vec<String> = self.slots[idx]
            .decl
            .children
            .iter()
            .cloned()
            .chain(
                self.slots[idx]
                    .decl
                    .resolved_dependencies(&self.state.values, &all_keys),
            )
            .collect();
        for rel in relations {
            let Some(pos) = pending_keys.iter().position(|k| k == &rel) else {
                continue;
            };
            let child = pending.remove(pos);
            let child_key = pending_keys.remove(pos);
            let mut child_parents = parent_keys.clone();
            child_parents.push(child_key);
            self.emit_children(child, child_parents, pending, pending_keys, result);
            let parents = &self.slots[child].decl.parents;
            if parents.iter().any(|p| all_scheduled.contains(p)) || parents.contains(&own_key) {
                continue;
            }
            result.push(child);
        }
    }

    // =========================================================================
    // Executing
    // =========================================================================

    /// Run one formatoption and release its lock.
    fn run_one(&mut self, idx: usize, initializing: bool) -> Result<(), FmtError> {
        let key = self.slots[idx].decl.key.clone();
        if let Some(shared) = self.shared_from.get(&key) {
            log::debug!("{key} is shared with {}", shared.source_name);
        } else if initializing {
            log::debug!("Initializing {key}");
        } else {
            log::debug!("Updating {key}");
        }
        let value = self.state.values.get(&key).cloned().unwrap_or(Value::Null);
        let result = {
            let slot = &mut self.slots[idx];
            let mut ctx = FmtContext {
                key: &slot.decl.key,
                plotter_name: &self.name,
                values: &self.state.values,
                raw_data: self.state.data.as_ref(),
                plot_data: &mut self.state.plot_data,
                decoder: self.state.decoder.as_ref(),
                target: self.state.target.as_mut(),
                initializing,
                enable_post: self.enable_post,
                post_hooks: &self.state.post_hooks,
            };
            if initializing {
                slot.behavior.initialize(&mut ctx, &value)
            } else {
                slot.behavior.update(&mut ctx, &value)
            }
        };
        self.slots[idx].lock.release();
        result.map_err(|message| FmtError::Update { key, message })
    }

    /// Run one priority band; the before-plot band ends with the plot
    /// itself.
    fn plot_by_priority(
        &mut self,
        band: Priority,
        idxs: &[usize],
        initializing: bool,
    ) -> Result<(), FmtError> {
        log::debug!(
            "{} formatoptions with priority {}",
            if initializing { "Initializing" } else { "Updating" },
            band.value()
        );
        self.initializing = initializing;
        for &idx in idxs {
            self.run_one(idx, initializing)?;
        }
        if band == Priority::BeforePlot {
            self.make_plot()?;
        }
        self.initializing = false;
        Ok(())
    }

    /// Invoke `make_plot` on every plot formatoption, highest priority
    /// first.
    fn make_plot(&mut self) -> Result<(), FmtError> {
        let mut plot_idxs: Vec<usize> = self
            .sorted_slot_indices()
            .into_iter()
            .filter(|&i| self.slots[i].decl.plot_fmt)
            .collect();
        plot_idxs.sort_by(|a, b| {
            self.slots[*b]
                .decl
                .priority
                .value()
                .cmp(&self.slots[*a].decl.priority.value())
        });
        for idx in plot_idxs {
            let key = self.slots[idx].decl.key.clone();
            log::debug!("Making plot with {key} formatoption");
            let result = {
                let slot = &mut self.slots[idx];
                let mut ctx = FmtContext {
                    key: &slot.decl.key,
                    plotter_name: &self.name,
                    values: &self.state.values,
                    raw_data: self.state.data.as_ref(),
                    plot_data: &mut self.state.plot_data,
                    decoder: self.state.decoder.as_ref(),
                    target: self.state.target.as_mut(),
                    initializing: self.initializing,
                    enable_post: self.enable_post,
                    post_hooks: &self.state.post_hooks,
                };
                slot.behavior.make_plot(&mut ctx)
            };
            result.map_err(|message| FmtError::Update { key, message })?;
        }
        Ok(())
    }

    /// Undo every formatoption's effects; failures are logged, not
    /// raised, because a reinit follows anyway.
    fn remove_all(&mut self) {
        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            let mut ctx = FmtContext {
                key: &slot.decl.key,
                plotter_name: &self.name,
                values: &self.state.values,
                raw_data: self.state.data.as_ref(),
                plot_data: &mut self.state.plot_data,
                decoder: self.state.decoder.as_ref(),
                target: self.state.target.as_mut(),
                initializing: false,
                enable_post: self.enable_post,
                post_hooks: &self.state.post_hooks,
            };
            slot.behavior.remove(&mut ctx);
        }
    }

    /// Release every lock held by this thread and finish the cycle.
    fn release_all(&mut self, finish: bool) {
        for slot in &mut self.slots {
            if finish {
                slot.behavior.finish_update();
            }
            slot.lock.release_all();
        }
        self.initializing = false;
        self.updating = false;
    }

    /// Full three-phase run over every declared formatoption with
    /// initialize semantics.
    fn initialize_all(&mut self) -> Result<(), FmtError> {
        let all = self.sorted_slot_indices();
        let order = self.sorted_by_priority(all);
        self.state.plot_data = self.state.data.clone();
        for (band, group) in group_by_band(&order, &self.slots) {
            self.plot_by_priority(band, &group, true)?;
        }
        Ok(())
    }

    /// First-ever render: run every declared formatoption through
    /// `initialize` in the usual three bands.
    fn initialize_plot_inner(&mut self) -> Result<CycleOutcome, FmtError> {
        if self.state.data.is_none() {
            return Ok(CycleOutcome::noop());
        }
        log::debug!("Initializing plot...");
        let start = Instant::now();
        self.updating = true;
        if self.cleared {
            self.state.target.clear();
        }
        let result = self.initialize_all();
        self.release_all(true);
        result?;
        self.cleared = false;
        self.replot = false;
        self.initialized = true;
        self.last_report = UpdateReport {
            keys: self.last_update.clone(),
            initializing: true,
            replot: true,
            cleared: false,
            skipped_shared: Vec::new(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::debug!("{}", self.last_report.log_line());
        Ok(CycleOutcome {
            drew: true,
            propagate: self.propagation_set(&self.last_update.clone()),
        })
    }

    /// Wipe the axes and re-run everything as a first initialization.
    fn reinit_inner(&mut self) -> Result<(), FmtError> {
        log::debug!("Reinitializing plot...");
        self.remove_all();
        self.state.target.clear();
        let result = self.initialize_all();
        result?;
        self.cleared = false;
        self.replot = false;
        self.initialized = true;
        Ok(())
    }

    /// The resolved update cycle: Resolving -> Executing -> propagation
    /// orders for sharing. Rollback on resolving errors.
    fn start_update_inner(&mut self) -> Result<CycleOutcome, FmtError> {
        if self.disabled {
            return Ok(CycleOutcome::noop());
        }
        let start = Instant::now();
        log::debug!(
            "Starting update of {:?}",
            self.registered_updates.keys().collect::<Vec<_>>()
        );
        self.save_state();
        self.updating = true;
        let (selected, skipped_shared) = match self.set_and_filter() {
            Ok(resolved) => resolved,
            Err(err) => {
                // the only rollback path: restore the snapshot, release
                // everything, re-raise
                self.rollback();
                self.release_all(false);
                return Err(err);
            }
        };
        let order = self.sorted_by_priority(selected);
        let was_cleared = self.cleared;
        let was_replot = self.replot;

        let exec_result: Result<bool, FmtError> = (|| {
            if self.cleared {
                self.reinit_inner()?;
                Ok(true)
            } else {
                let mut drew = false;
                for (band, group) in group_by_band(&order, &self.slots) {
                    drew = true;
                    self.plot_by_priority(band, &group, false)?;
                }
                Ok(drew)
            }
        })();
        self.release_all(true);
        let drew = exec_result?;
        self.replot = false;

        self.last_report = UpdateReport {
            keys: self.last_update.clone(),
            initializing: false,
            replot: was_replot,
            cleared: was_cleared,
            skipped_shared,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::debug!("{}", self.last_report.log_line());

        Ok(CycleOutcome {
            drew,
            propagate: self.propagation_set(&self.last_update.clone()),
        })
    }

    /// Propagation orders for every other plotter that shares one of the
    /// given keys, with this plotter's slot locks to hold while the
    /// other applies the values.
    fn propagation_set(&self, keys: &[String]) -> Vec<PropTarget> {
        let mut targets: Vec<PropTarget> = Vec::new();
        for key in keys {
            let Some(&idx) = self.index.get(key) else {
                continue;
            };
            let slot = &self.slots[idx];
            if slot.shared.is_empty() {
                continue;
            }
            let value = self.state.values.get(key).cloned().unwrap_or(Value::Null);
            let shared_value = slot.behavior.value_to_share(&value);
            for target in &slot.shared {
                let existing = targets
                    .iter_mut()
                    .find(|t| t.plotter.ptr_eq(&target.plotter));
                match existing {
                    Some(entry) => {
                        entry.values.push((key.clone(), shared_value.clone()));
                        entry.locks.push(slot.lock.clone());
                    }
                    None => targets.push(PropTarget {
                        plotter: target.plotter.clone(),
                        values: vec![(key.clone(), shared_value.clone())],
                        locks: vec![slot.lock.clone()],
                    }),
                }
            }
        }
        targets
    }

    /// Expand sharing keys: None means every key, group names expand to
    /// the group's keys, anything else must be a declared key.
    fn expand_sharing_keys(&self, keys: Option<&[String]>) -> Result<Vec<String>, FmtError> {
        let Some(keys) = keys else {
            return Ok(self.sorted_keys());
        };
        let groups: FxHashSet<&'static str> =
            self.slots.iter().map(|s| s.decl.group).collect();
        let mut expanded: FxHashSet<String> = FxHashSet::default();
        for key in keys {
            if groups.contains(key.as_str()) {
                for slot in &self.slots {
                    if slot.decl.group == key.as_str() {
                        expanded.insert(slot.decl.key.clone());
                    }
                }
            } else {
                self.check_key(key)?;
                expanded.insert(key.clone());
            }
        }
        let mut sorted: Vec<String> = expanded.into_iter().collect();
        sorted.sort();
        Ok(sorted)
    }
}

fn decoder_from_registry(registry: &Registry) -> CoordDecoder {
    let mut decoder = CoordDecoder::new();
    let name_set = |key: &str| -> std::collections::BTreeSet<String> {
        registry
            .get(key)
            .and_then(|v| {
                v.as_array().map(|items| {
                    items
                        .iter()
                        .filter_map(|s| s.as_str().map(|s| s.to_string()))
                        .collect()
                })
            })
            .unwrap_or_default()
    };
    decoder.x_names = name_set("decoder.x");
    decoder.y_names = name_set("decoder.y");
    decoder.z_names = name_set("decoder.z");
    let t_names = name_set("decoder.t");
    if !t_names.is_empty() {
        decoder.t_names = t_names;
    }
    decoder
}

/// Group an execution order into contiguous priority bands.
fn group_by_band(order: &[usize], slots: &[Slot]) -> Vec<(Priority, Vec<usize>)> {
    let mut groups: Vec<(Priority, Vec<usize>)> = Vec::new();
    for &idx in order {
        let band = slots[idx].decl.priority;
        match groups.last_mut() {
            Some((current, group)) if *current == band => group.push(idx),
            _ => groups.push((band, vec![idx])),
        }
    }
    groups
}

// =============================================================================
// Public handle
// =============================================================================

/// The public face of a plotter. Cloning the handle shares the plotter;
/// sharing between plotters references each other through these handles.
#[derive(Clone)]
pub struct PlotterHandle {
    inner: Arc<Mutex<Plotter>>,
}

impl std::fmt::Debug for PlotterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotterHandle").finish_non_exhaustive()
    }
}

impl PlotterHandle {
    /// Construct a plotter: defaults, then constructor overrides, then
    /// (when data is given and `make_plot` is set) the initialization
    /// run.
    pub fn new(
        class: &Arc<PlotterClass>,
        registry: &Registry,
        data: Option<DataObject>,
        target: Box<dyn RenderTarget>,
        opts: PlotterOptions,
    ) -> Result<Self, FmtError> {
        let has_data = data.is_some();
        let plotter = Plotter::build(class, registry, data, target, &opts)?;
        let handle = Self {
            inner: Arc::new(Mutex::new(plotter)),
        };
        if has_data && opts.make_plot {
            let auto_draw = {
                let mut inner = handle.lock();
                inner.initialize_plot_inner()?;
                inner.registry.get_bool("auto_draw", true)
            };
            if opts.draw.unwrap_or(auto_draw) {
                handle.lock().state.target.draw();
            }
        }
        Ok(handle)
    }

    fn lock(&self) -> MutexGuard<'_, Plotter> {
        self.inner.lock().expect("plotter poisoned")
    }

    /// Inspect the plotter.
    pub fn with<R>(&self, f: impl FnOnce(&Plotter) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the plotter directly; used by collections, persistence and
    /// tests, not by the update protocol.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Plotter) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn same_plotter(&self, other: &PlotterHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Update formatoptions and (unless updates are deferred) run the
    /// cycle. Returns true if anything was re-rendered.
    ///
    /// Before the first initialization this only stores validated
    /// values, like a plain dictionary update.
    pub fn update(&self, params: UpdateParams) -> Result<bool, FmtError> {
        let draw = params.draw;
        let run_now = {
            let mut inner = self.lock();
            if inner.disabled {
                return Ok(false);
            }
            if !inner.initialized {
                for (key, value) in params.fmt {
                    inner.check_key(&key)?;
                    inner.set_value_user(&key, value)?;
                }
                return Ok(false);
            }
            inner.register_update(params.fmt, params.replot, params.force, params.todefault)?;
            !inner.no_auto_update || params.auto_update
        };
        if run_now {
            self.start_update(draw)
        } else {
            Ok(false)
        }
    }

    /// Conduct the registered updates. Returns true if anything was
    /// re-rendered. After the own cycle, every plotter sharing one of
    /// the touched keys is updated with drawing suppressed; the
    /// originating plotter draws all touched figures at the end.
    pub fn start_update(&self, draw: Option<bool>) -> Result<bool, FmtError> {
        let (outcome, auto_draw) = {
            let mut inner = self.lock();
            let outcome = inner.start_update_inner()?;
            let auto_draw = inner.registry.get_bool("auto_draw", true);
            (outcome, auto_draw)
        };

        let mut others_drew: Vec<Arc<Mutex<Plotter>>> = Vec::new();
        for target in &outcome.propagate {
            let Some(other_arc) = target.plotter.upgrade() else {
                continue;
            };
            if Arc::ptr_eq(&other_arc, &self.inner) {
                continue;
            }
            // the sharing lock protocol: hold the controlling slots'
            // locks while the other plotter applies the values
            for lock in &target.locks {
                lock.acquire();
            }
            let result = (|| -> Result<bool, FmtError> {
                let mut other = other_arc.lock().expect("plotter poisoned");
                if other.updating || other.disabled || !other.initialized {
                    return Ok(false);
                }
                let keys: Vec<String> = target.values.iter().map(|(k, _)| k.clone()).collect();
                for (key, value) in &target.values {
                    // write-through: the delegating plotter's stored value
                    // follows the controlling one
                    if other.shared_from.contains_key(key) {
                        other.state.values.insert(key.clone(), value.clone());
                    }
                }
                other.register_update(Vec::new(), false, Force::Keys(keys), false)?;
                Ok(other.start_update_inner()?.drew)
            })();
            for lock in target.locks.iter().rev() {
                lock.release();
            }
            if result? {
                others_drew.push(other_arc);
            }
        }

        if draw.unwrap_or(auto_draw) && outcome.drew {
            self.lock().state.target.draw();
            for other in others_drew {
                other.lock().expect("plotter poisoned").state.target.draw();
            }
        }
        Ok(outcome.drew)
    }

    /// Initialize (or re-initialize) the plot for a data object.
    pub fn initialize_plot(
        &self,
        data: Option<DataObject>,
        draw: Option<bool>,
    ) -> Result<(), FmtError> {
        let auto_draw = {
            let mut inner = self.lock();
            if let Some(data) = data {
                inner.state.data = Some(data);
            }
            inner.initialize_plot_inner()?;
            inner.registry.get_bool("auto_draw", true)
        };
        if draw.unwrap_or(auto_draw) {
            self.lock().state.target.draw();
        }
        Ok(())
    }

    /// Share formatoptions with other plotters: their settings for the
    /// given keys (or group names; None shares everything) delegate to
    /// this plotter's, and every later update here re-runs them there.
    pub fn share(
        &self,
        others: &[PlotterHandle],
        keys: Option<&[String]>,
        draw: Option<bool>,
        auto_update: bool,
    ) -> Result<(), FmtError> {
        let keys = self.lock().expand_sharing_keys(keys)?;
        for other in others {
            if self.same_plotter(other) {
                continue;
            }
            for key in &keys {
                // chains collapse: if this key is itself delegated, the
                // original controller takes the new target
                let (controller, controller_name, value) = {
                    let inner = self.lock();
                    let idx = inner.index[key];
                    let value = inner.state.values.get(key).cloned().unwrap_or(Value::Null);
                    let shared_value = inner.slots[idx].behavior.value_to_share(&value);
                    match inner.shared_from.get(key) {
                        Some(sf) => (sf.source.clone(), sf.source_name.clone(), shared_value),
                        None => (
                            Arc::downgrade(&self.inner),
                            inner.name.clone(),
                            shared_value,
                        ),
                    }
                };
                // register the back-link on the controller's slot
                let register = |ctrl: &mut Plotter| {
                    let idx = ctrl.index[key];
                    let target = Arc::downgrade(&other.inner);
                    let already = ctrl.slots[idx]
                        .shared
                        .iter()
                        .any(|t| t.plotter.ptr_eq(&target));
                    if !already {
                        ctrl.slots[idx].shared.push(ShareTarget { plotter: target });
                    }
                };
                // a key whose controller is the target itself must not
                // end up delegating to itself
                if std::ptr::eq(controller.as_ptr(), Arc::as_ptr(&other.inner)) {
                    continue;
                }
                if std::ptr::eq(controller.as_ptr(), Arc::as_ptr(&self.inner)) {
                    let mut guard = self.lock();
                    register(&mut guard);
                } else if let Some(ctrl_arc) = controller.upgrade() {
                    let mut guard = ctrl_arc.lock().expect("plotter poisoned");
                    register(&mut guard);
                }
                // mark the target as delegated and align its value
                let mut o = other.lock();
                o.shared_from.insert(
                    key.clone(),
                    SharedFrom {
                        source: controller.clone(),
                        source_name: controller_name,
                    },
                );
                o.state.values.insert(key.clone(), value);
            }
        }

        // re-run the shared keys here (which propagates) and on the
        // targets, preserving their pending registrations
        if self.lock().initialized {
            self.update(
                UpdateParams::new()
                    .force(Force::Keys(keys.clone()))
                    .draw(draw)
                    .auto_update_if(auto_update),
            )?;
        }
        for other in others {
            if !other.lock().initialized {
                continue;
            }
            let stashed = other.with_mut(|p| p.take_registered());
            let result = other.update(
                UpdateParams::new()
                    .force(Force::Keys(keys.clone()))
                    .draw(draw)
                    .auto_update_if(auto_update),
            );
            other.with_mut(|p| p.put_registered(stashed.0, stashed.1));
            result?;
        }
        Ok(())
    }

    /// Undo sharing connections towards the given plotters.
    pub fn unshare(
        &self,
        others: &[PlotterHandle],
        keys: Option<&[String]>,
        draw: Option<bool>,
        auto_update: bool,
    ) -> Result<(), FmtError> {
        let keys = self.lock().expand_sharing_keys(keys)?;
        for other in others {
            other.unshare_me(Some(&keys), draw, auto_update, false)?;
        }
        self.update(
            UpdateParams::new()
                .force(Force::Keys(keys))
                .draw(draw)
                .auto_update_if(auto_update),
        )?;
        Ok(())
    }

    /// Release this plotter from the sharing connections it receives.
    /// The now-independent settings re-run once so they reflect their
    /// own stored values; with `update_other` the former controllers
    /// re-run the released keys too.
    pub fn unshare_me(
        &self,
        keys: Option<&[String]>,
        draw: Option<bool>,
        auto_update: bool,
        update_other: bool,
    ) -> Result<(), FmtError> {
        let keys = self.lock().expand_sharing_keys(keys)?;
        let mut sources: Vec<(Arc<Mutex<Plotter>>, Vec<String>)> = Vec::new();
        {
            let mut inner = self.lock();
            for key in &keys {
                let Some(sf) = inner.shared_from.remove(key) else {
                    continue;
                };
                let Some(src) = sf.source.upgrade() else {
                    continue;
                };
                match sources.iter_mut().find(|(arc, _)| Arc::ptr_eq(arc, &src)) {
                    Some((_, src_keys)) => src_keys.push(key.clone()),
                    None => sources.push((src, vec![key.clone()])),
                }
            }
        }
        for (src, src_keys) in &sources {
            if Arc::ptr_eq(src, &self.inner) {
                continue;
            }
            let mut s = src.lock().expect("plotter poisoned");
            for key in src_keys {
                if let Some(&idx) = s.index.get(key) {
                    let me = Arc::downgrade(&self.inner);
                    s.slots[idx].shared.retain(|t| !t.plotter.ptr_eq(&me));
                }
            }
            if update_other {
                s.register_update(
                    Vec::new(),
                    false,
                    Force::Keys(src_keys.clone()),
                    false,
                )?;
            }
        }
        self.update(
            UpdateParams::new()
                .force(Force::Keys(keys))
                .draw(draw)
                .auto_update_if(auto_update),
        )?;
        if update_other && auto_update {
            for (src, _) in sources {
                let handle = PlotterHandle { inner: src };
                handle.start_update(draw)?;
            }
        }
        Ok(())
    }

    /// Redraw this plotter's figure.
    pub fn draw(&self) {
        self.lock().state.target.draw();
    }
}

impl UpdateParams {
    fn auto_update_if(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }
}
