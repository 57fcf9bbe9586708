//! Formatoption declarations and behaviors.
//!
//! A formatoption is one named, validated, visually effective
//! configuration value owned by a plotter. It is split into two parts:
//!
//! - [`FmtoDecl`] — the static declaration: key, group, priority band and
//!   the relations to other formatoptions (children, dependencies,
//!   connections, parents) that drive the update resolver.
//! - [`Formatoption`] — the behavior: validation, diffing and the hooks
//!   that apply a value to the render target.
//!
//! The plotter instantiates one behavior box per declared key and owns
//! it exclusively; behaviors reach the plotter's state only through the
//! [`FmtContext`] borrowed for the duration of a call.

use crate::sync::ReentrantLock;
use arrayplot_core::{DataObject, Decoder, RenderTarget};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Priorities
// =============================================================================

/// Priority value of formatoptions that are updated before the data is
/// loaded.
pub const START: i32 = 30;
/// Priority value of formatoptions that are updated before the plot is
/// made.
pub const BEFORE_PLOT: i32 = 20;
/// Priority value of formatoptions that are updated at the end.
pub const END: i32 = 10;

/// The three execution bands of an update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Pre-data: runs before the data is loaded (e.g. region masks).
    Start,
    /// Drawing: runs before the plot is made (e.g. color bounds); the
    /// plot itself is made at the end of this band.
    BeforePlot,
    /// Cosmetic: runs at the end (labels, titles).
    End,
}

impl Priority {
    /// The numeric priority of this band.
    pub fn value(self) -> i32 {
        match self {
            Priority::Start => START,
            Priority::BeforePlot => BEFORE_PLOT,
            Priority::End => END,
        }
    }

    /// The band a raw priority value falls into.
    pub fn band(value: i32) -> Priority {
        if value >= START {
            Priority::Start
        } else if value >= BEFORE_PLOT {
            Priority::BeforePlot
        } else {
            Priority::End
        }
    }
}

// =============================================================================
// Groups
// =============================================================================

/// Long titles of the formatoption groups.
pub fn group_title(group: &str) -> String {
    match group {
        "data" => "Data manipulation formatoptions".to_string(),
        "axes" => "Axes formatoptions".to_string(),
        "labels" => "Label formatoptions".to_string(),
        "plotting" => "Plot formatoptions".to_string(),
        "post_processing" => "Post processing formatoptions".to_string(),
        "colors" => "Color coding formatoptions".to_string(),
        "misc" => "Miscellaneous formatoptions".to_string(),
        "ticks" => "Axis tick formatoptions".to_string(),
        "masking" => "Masking formatoptions".to_string(),
        other => {
            log::warn!("unknown formatoption group {other}");
            other.to_string()
        }
    }
}

// =============================================================================
// Declarations
// =============================================================================

/// Whether a formatoption must be recomputed when the data changes.
#[derive(Clone, Copy)]
pub enum DataDependent {
    No,
    Yes,
    /// Decided per update from the current values and the new data.
    When(fn(&FxHashMap<String, Value>, &DataObject) -> bool),
}

impl DataDependent {
    pub fn check(&self, values: &FxHashMap<String, Value>, data: &DataObject) -> bool {
        match self {
            DataDependent::No => false,
            DataDependent::Yes => true,
            DataDependent::When(f) => f(values, data),
        }
    }
}

impl std::fmt::Debug for DataDependent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataDependent::No => write!(f, "No"),
            DataDependent::Yes => write!(f, "Yes"),
            DataDependent::When(_) => write!(f, "When(..)"),
        }
    }
}

/// Computes additional dependencies from the current values. Used by the
/// post-processing formatoption, whose dependencies are every other key
/// while `post_timing` is `"always"`.
pub type DynDeps = fn(&FxHashMap<String, Value>, &[String]) -> Vec<String>;

/// Static declaration of one formatoption.
#[derive(Debug, Clone)]
pub struct FmtoDecl {
    /// Formatoption key, unique within a plotter.
    pub key: String,
    /// Group short name (see [`group_title`]).
    pub group: &'static str,
    /// Verbose name for tables and UIs; the key if None.
    pub name: Option<&'static str>,
    pub priority: Priority,
    /// Updated before this one, but only if scheduled in the same batch.
    pub children: Vec<String>,
    /// Force an update of this formatoption when they change.
    pub dependencies: Vec<String>,
    /// Informational links, irrelevant for the update order.
    pub connections: Vec<String>,
    /// If any of these is in the batch, this formatoption is suppressed.
    pub parents: Vec<String>,
    /// True if this formatoption draws via `make_plot`.
    pub plot_fmt: bool,
    pub data_dependent: DataDependent,
    /// A change forces a wipe of the axes and a full re-initialization.
    pub requires_clearing: bool,
    /// A change forces the data selection to be recomputed.
    pub requires_replot: bool,
    /// Must run again whenever the plot was re-made.
    pub update_after_plot: bool,
    /// Class-level fallback default when the registry has no entry.
    pub default: Option<Value>,
    /// Extra dependencies computed from the current values.
    pub dynamic_dependencies: Option<DynDeps>,
}

impl FmtoDecl {
    pub fn new(key: impl Into<String>, priority: Priority) -> Self {
        Self {
            key: key.into(),
            group: "misc",
            name: None,
            priority,
            children: Vec::new(),
            dependencies: Vec::new(),
            connections: Vec::new(),
            parents: Vec::new(),
            plot_fmt: false,
            data_dependent: DataDependent::No,
            requires_clearing: false,
            requires_replot: false,
            update_after_plot: false,
            default: None,
            dynamic_dependencies: None,
        }
    }

    pub fn group(mut self, group: &'static str) -> Self {
        self.group = group;
        self
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn children(mut self, keys: &[&str]) -> Self {
        self.children = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn dependencies(mut self, keys: &[&str]) -> Self {
        self.dependencies = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn connections(mut self, keys: &[&str]) -> Self {
        self.connections = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn parents(mut self, keys: &[&str]) -> Self {
        self.parents = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Mark as a plot formatoption. Plot formatoptions are always data
    /// dependent.
    pub fn plot_fmt(mut self) -> Self {
        self.plot_fmt = true;
        self.data_dependent = DataDependent::Yes;
        self
    }

    pub fn data_dependent(mut self, dep: DataDependent) -> Self {
        self.data_dependent = dep;
        self
    }

    pub fn requires_clearing(mut self) -> Self {
        self.requires_clearing = true;
        self
    }

    pub fn requires_replot(mut self) -> Self {
        self.requires_replot = true;
        self
    }

    pub fn update_after_plot(mut self) -> Self {
        self.update_after_plot = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn dynamic_dependencies(mut self, f: DynDeps) -> Self {
        self.dynamic_dependencies = Some(f);
        self
    }

    /// Static plus dynamic dependencies for the current values.
    pub fn resolved_dependencies(
        &self,
        values: &FxHashMap<String, Value>,
        all_keys: &[String],
    ) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        if let Some(f) = self.dynamic_dependencies {
            for key in f(values, all_keys) {
                if key != self.key && !deps.contains(&key) {
                    deps.push(key);
                }
            }
        }
        deps
    }
}

// =============================================================================
// Behavior
// =============================================================================

/// A native callback registered for the post-processing formatoption.
pub type PostHook = Arc<dyn Fn(&mut FmtContext<'_>) -> Result<(), String> + Send + Sync>;

/// The state a behavior may touch while running. Borrowed from the
/// owning plotter for the duration of a single hook call.
pub struct FmtContext<'a> {
    /// Key of the formatoption being run.
    pub key: &'a str,
    /// Name of the owning plotter (the array name in a project).
    pub plotter_name: &'a str,
    /// Current raw values of every formatoption of the plotter.
    pub values: &'a FxHashMap<String, Value>,
    /// The original data.
    pub raw_data: Option<&'a DataObject>,
    /// The data that is plotted; Start-priority formatoptions may
    /// replace it (masks, region selections).
    pub plot_data: &'a mut Option<DataObject>,
    pub decoder: &'a dyn Decoder,
    pub target: &'a mut dyn RenderTarget,
    /// True during first initialization and reinit.
    pub initializing: bool,
    /// True if post-processing hooks may run.
    pub enable_post: bool,
    pub post_hooks: &'a FxHashMap<String, PostHook>,
}

impl<'a> FmtContext<'a> {
    /// Current value of another formatoption of the same plotter.
    pub fn value_of(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The data to draw: the plot data if set, the raw data otherwise.
    pub fn data(&self) -> Option<&DataObject> {
        match self.plot_data.as_ref() {
            Some(data) => Some(data),
            None => self.raw_data,
        }
    }
}

/// Behavior of one formatoption.
///
/// `update` must be idempotent under repeated calls with the same value.
/// Hooks report failures as plain messages; the engine wraps them with
/// the key into [`crate::FmtError`].
pub trait Formatoption: Send {
    /// Validate a proposed value. `None` means "use the validator
    /// registered for this key in the configuration store".
    fn validate(&self, _value: &Value) -> Option<Result<Value, String>> {
        None
    }

    /// True if `new` differs from `current`.
    fn diff_value(&self, current: &Value, new: &Value) -> bool {
        current != new
    }

    /// The value to store given the current one. Dict-valued
    /// formatoptions merge here instead of replacing.
    fn store_value(&self, _current: Option<&Value>, new: &Value, _todefault: bool) -> Value {
        new.clone()
    }

    /// Apply the value for the first time. Defaults to `update`.
    fn initialize(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        self.update(ctx, value)
    }

    /// Apply the value to the render target.
    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String>;

    /// Create the actual plot. Only called for `plot_fmt` declarations,
    /// at the end of the before-plot band.
    fn make_plot(&mut self, _ctx: &mut FmtContext<'_>) -> Result<(), String> {
        Ok(())
    }

    /// Undo the visual effects, called before the axes are cleared.
    fn remove(&mut self, _ctx: &mut FmtContext<'_>) {}

    /// Called once per update cycle after every selected formatoption
    /// ran.
    fn finish_update(&mut self) {}

    /// The value passed to formatoptions shared with this one.
    fn value_to_share(&self, value: &Value) -> Value {
        value.clone()
    }

    /// The value written into project files.
    fn value_for_save(&self, value: &Value) -> Value {
        value.clone()
    }
}

/// One instantiated formatoption inside a plotter.
pub struct Slot {
    pub decl: FmtoDecl,
    pub behavior: Box<dyn Formatoption>,
    pub lock: ReentrantLock,
    /// Formatoptions of other plotters controlled by this one.
    pub shared: Vec<crate::plotter::ShareTarget>,
}

// =============================================================================
// Dict-valued helpers
// =============================================================================

/// Merge semantics for dict-valued formatoptions: a null current value
/// is replaced, an empty new value clears, otherwise the new entries are
/// merged over the current ones (after clearing when updating to the
/// default).
pub fn merge_dict_value(current: Option<&Value>, new: &Value, todefault: bool) -> Value {
    let Value::Object(new_map) = new else {
        return new.clone();
    };
    match current {
        None | Some(Value::Null) => new.clone(),
        Some(Value::Object(cur)) => {
            if new_map.is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                let mut merged = if todefault {
                    serde_json::Map::new()
                } else {
                    cur.clone()
                };
                for (k, v) in new_map {
                    merged.insert(k.clone(), v.clone());
                }
                Value::Object(merged)
            }
        }
        Some(_) => new.clone(),
    }
}

/// True if applying `new` with merge semantics would change `current`:
/// some key of `new` is absent from `current` or maps to another value.
pub fn dict_diff(current: &Value, new: &Value) -> bool {
    match (current, new) {
        (Value::Object(cur), Value::Object(new_map)) => {
            if new_map.is_empty() {
                return !cur.is_empty();
            }
            new_map.iter().any(|(k, v)| cur.get(k) != Some(v))
        }
        _ => current != new,
    }
}

// =============================================================================
// Built-in post-processing formatoptions
// =============================================================================

/// `post_timing`: when to run the `post` hook.
pub struct PostTiming;

impl Formatoption for PostTiming {
    fn validate(&self, value: &Value) -> Option<Result<Value, String>> {
        let options = ["never", "always", "replot"];
        Some(match value.as_str() {
            Some(s) if options.contains(&s) => Ok(value.clone()),
            _ => Err(format!("String must be one of {options:?}, not {value}")),
        })
    }

    fn update(&mut self, _ctx: &mut FmtContext<'_>, _value: &Value) -> Result<(), String> {
        Ok(())
    }
}

impl PostTiming {
    pub fn decl() -> FmtoDecl {
        FmtoDecl::new("post_timing", Priority::End)
            .group("post_processing")
            .name("Timing of the post processing")
            .default(Value::String("never".to_string()))
    }
}

/// `post`: run a registered post-processing hook by name.
pub struct PostProcessing;

impl Formatoption for PostProcessing {
    fn validate(&self, value: &Value) -> Option<Result<Value, String>> {
        Some(match value {
            Value::Null | Value::String(_) => Ok(value.clone()),
            other => Err(format!("Expected a hook name or null, not {other}")),
        })
    }

    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let Some(name) = value.as_str() else {
            return Ok(());
        };
        if !ctx.enable_post {
            log::warn!(
                "Post processing is disabled. Enable the post hooks of the plotter to run {name}"
            );
            return Ok(());
        }
        let Some(hook) = ctx.post_hooks.get(name).cloned() else {
            return Err(format!("no post-processing hook registered as {name:?}"));
        };
        hook(ctx)
    }
}

impl PostProcessing {
    pub fn decl() -> FmtoDecl {
        FmtoDecl::new("post", Priority::End)
            .group("post_processing")
            .name("Custom post processing hook")
            .children(&["post_timing"])
            .default(Value::Null)
            .data_dependent(DataDependent::When(|values, _| {
                values.get("post_timing").and_then(|v| v.as_str()) == Some("replot")
            }))
            .dynamic_dependencies(|values, all_keys| {
                if values.get("post_timing").and_then(|v| v.as_str()) == Some("always") {
                    all_keys.iter().filter(|k| *k != "post").cloned().collect()
                } else {
                    Vec::new()
                }
            })
    }
}
