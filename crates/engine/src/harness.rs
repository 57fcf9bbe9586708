//! Test harness for the plotter-formatoption framework.
//!
//! Provides a small recording formatoption, a three-formatoption test
//! plotter class (`fmt1` with children `[fmt2]` and dependencies
//! `[fmt3]`, `fmt2` with children `[fmt3]`, `fmt3` without relations)
//! and builders wiring them to a [`TraceTarget`]. The engine's behavior
//! tests live at the bottom of this module.

use crate::fmto::{FmtContext, FmtoDecl, Formatoption, Priority};
use crate::plotter::{PlotterClass, PlotterHandle, PlotterOptions};
use arrayplot_config::{Registry, Validator};
use arrayplot_core::{DataArray, DataObject, TraceLog, TraceTarget};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Ordered record of formatoption invocations, shared by every behavior
/// of a test class.
///
/// `results` mirrors an ordered map: an update with a non-empty value
/// upserts `<plotter>.<key>`, an empty value removes the entry.
/// `events` is the raw append-only call log used for ordering and
/// idempotence assertions.
#[derive(Clone, Default)]
pub struct Journal {
    results: Arc<Mutex<Vec<(String, String)>>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, key: String, value: &str) {
        self.events.lock().unwrap().push(key.clone());
        let mut results = self.results.lock().unwrap();
        if value.is_empty() {
            results.retain(|(k, _)| k != &key);
        } else if let Some(entry) = results.iter_mut().find(|(k, _)| k == &key) {
            entry.1 = value.to_string();
        } else {
            results.push((key, value.to_string()));
        }
    }

    /// Keys of the ordered results map, insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.results.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Every `update` invocation so far, in call order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.results.lock().unwrap().clear();
        self.events.lock().unwrap().clear();
    }
}

/// A recording formatoption. Values are stringified; lists and mappings
/// are rejected, which gives the rollback tests a failing validator.
pub struct SimpleFmt {
    journal: Journal,
}

impl SimpleFmt {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
        }
    }
}

impl Formatoption for SimpleFmt {
    fn validate(&self, value: &Value) -> Option<Result<Value, String>> {
        Some(match value {
            Value::Array(_) | Value::Object(_) => {
                Err(format!("Expected a string-like value, not {value}"))
            }
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Null => Ok(Value::String(String::new())),
            other => Ok(Value::String(other.to_string())),
        })
    }

    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let key = format!("{}.{}", ctx.plotter_name, ctx.key);
        self.journal.record(key, value.as_str().unwrap_or(""));
        Ok(())
    }
}

/// A plot formatoption recording `make_plot` calls.
pub struct PlotFmt {
    journal: Journal,
}

impl Formatoption for PlotFmt {
    fn validate(&self, value: &Value) -> Option<Result<Value, String>> {
        SimpleFmt {
            journal: self.journal.clone(),
        }
        .validate(value)
    }

    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let key = format!("{}.{}", ctx.plotter_name, ctx.key);
        self.journal.record(key, value.as_str().unwrap_or(""));
        Ok(())
    }

    fn make_plot(&mut self, ctx: &mut FmtContext<'_>) -> Result<(), String> {
        self.journal
            .record(format!("{}.make_plot", ctx.plotter_name), "plot");
        Ok(())
    }
}

/// A registry with defaults for the test plotter keys.
pub fn test_registry() -> Registry {
    let registry = Registry::with_base_defaults();
    registry.write(|rc| {
        for key in ["fmt1", "fmt2", "fmt3", "mask", "plot", "transpose", "legend"] {
            rc.defaults_mut().insert(
                format!("plotter.test.{key}"),
                json!(""),
                Validator::any(),
                "test formatoption",
            );
        }
        rc.update_from_defaults();
    });
    registry
}

/// The standard test class: fmt1 (children=[fmt2], deps=[fmt3]),
/// fmt2 (children=[fmt3]), fmt3 (no relations).
pub fn test_class() -> (Registry, Arc<PlotterClass>, Journal) {
    let registry = test_registry();
    let journal = Journal::new();
    let mut class = PlotterClass::new("TestPlotter", "plotter.test.");
    let j = journal.clone();
    class.add(
        FmtoDecl::new("fmt1", Priority::End)
            .group("labels")
            .children(&["fmt2"])
            .dependencies(&["fmt3"]),
        move || Box::new(SimpleFmt::new(&j)),
    );
    let j = journal.clone();
    class.add(
        FmtoDecl::new("fmt2", Priority::End)
            .group("labels")
            .children(&["fmt3"]),
        move || Box::new(SimpleFmt::new(&j)),
    );
    let j = journal.clone();
    class.add(FmtoDecl::new("fmt3", Priority::End).group("colors"), move || {
        Box::new(SimpleFmt::new(&j))
    });
    (registry, Arc::new(class), journal)
}

/// Extend the test class with a Start-priority mask, a plot
/// formatoption and a clearing transpose, for the resolver tests.
pub fn extended_class(journal: &Journal) -> Arc<PlotterClass> {
    let mut class = PlotterClass::new("ExtendedPlotter", "plotter.test.");
    let j = journal.clone();
    class.add(
        FmtoDecl::new("fmt1", Priority::End)
            .group("labels")
            .children(&["fmt2"])
            .dependencies(&["fmt3"]),
        move || Box::new(SimpleFmt::new(&j)),
    );
    let j = journal.clone();
    class.add(
        FmtoDecl::new("fmt2", Priority::End)
            .group("labels")
            .children(&["fmt3"]),
        move || Box::new(SimpleFmt::new(&j)),
    );
    let j = journal.clone();
    class.add(FmtoDecl::new("fmt3", Priority::End).group("colors"), move || {
        Box::new(SimpleFmt::new(&j))
    });
    let j = journal.clone();
    class.add(
        FmtoDecl::new("mask", Priority::Start)
            .group("masking")
            .requires_replot(),
        move || Box::new(SimpleFmt::new(&j)),
    );
    let j = journal.clone();
    class.add(
        FmtoDecl::new("plot", Priority::BeforePlot).group("plotting").plot_fmt(),
        move || Box::new(PlotFmt { journal: j.clone() }),
    );
    let j = journal.clone();
    class.add(
        FmtoDecl::new("transpose", Priority::Start)
            .group("data")
            .requires_clearing(),
        move || Box::new(SimpleFmt::new(&j)),
    );
    let j = journal.clone();
    class.add(
        FmtoDecl::new("legend", Priority::End)
            .group("labels")
            .update_after_plot(),
        move || Box::new(SimpleFmt::new(&j)),
    );
    Arc::new(class)
}

/// A small data object for plotters that only need "some data".
pub fn sample_data() -> DataObject {
    DataObject::Array(DataArray::vector("v", "x", vec![1.0, 2.0, 3.0]))
}

/// Build an initialized plotter over a [`TraceTarget`].
pub fn build_plotter(
    class: &Arc<PlotterClass>,
    registry: &Registry,
    data: Option<DataObject>,
    fmt: &[(&str, Value)],
) -> (PlotterHandle, TraceLog) {
    let target = TraceTarget::new(1);
    let log = target.log();
    let opts = PlotterOptions {
        fmt: fmt.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        ..Default::default()
    };
    let handle = PlotterHandle::new(class, registry, data, Box::new(target), opts)
        .expect("plotter construction failed");
    (handle, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FmtError;
    use crate::plotter::{Force, UpdateParams};
    use arrayplot_core::TraceOp;

    // =========================================================================
    // E2E scenarios
    // =========================================================================

    #[test]
    fn test_initialization_order() {
        // scenario A: deepest dependency first
        let (registry, class, journal) = test_class();
        build_plotter(
            &class,
            &registry,
            Some(sample_data()),
            &[("fmt1", json!("x")), ("fmt2", json!("y")), ("fmt3", json!("z"))],
        );
        assert_eq!(
            journal.keys(),
            vec!["data.fmt3", "data.fmt2", "data.fmt1"]
        );
    }

    #[test]
    fn test_update_order_pulls_in_dependents() {
        // scenario B: fmt1 re-runs because its dependency fmt3 changed
        let (registry, class, journal) = test_class();
        let (plotter, _) = build_plotter(
            &class,
            &registry,
            Some(sample_data()),
            &[("fmt1", json!("test")), ("fmt2", json!("test2")), ("fmt3", json!("test3"))],
        );
        journal.clear();
        plotter
            .update(
                UpdateParams::new()
                    .set("fmt2", json!("something"))
                    .set("fmt3", json!("else")),
            )
            .unwrap();
        assert_eq!(
            journal.events(),
            vec!["data.fmt3", "data.fmt2", "data.fmt1"]
        );
        plotter.with(|p| {
            assert_eq!(p.value("fmt1"), Some(json!("test")));
            assert_eq!(p.value("fmt2"), Some(json!("something")));
            assert_eq!(p.value("fmt3"), Some(json!("else")));
        });
    }

    #[test]
    fn test_sharing_and_unsharing() {
        // scenario C plus the spec's P6 invariant
        let (registry, class, journal) = test_class();
        let (p1, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        let (p2, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        p1.with_mut(|p| p.set_name("test1"));
        p2.with_mut(|p| p.set_name("test2"));
        journal.clear();

        let keys = vec!["fmt1".to_string()];
        p1.share(std::slice::from_ref(&p2), Some(&keys), Some(false), false)
            .unwrap();
        p1.update(UpdateParams::new().set("fmt1", json!("hello")))
            .unwrap();
        assert_eq!(journal.get("test1.fmt1").as_deref(), Some("hello"));
        assert_eq!(journal.get("test2.fmt1").as_deref(), Some("hello"));
        // P6: the values cannot diverge while the share is active
        assert_eq!(p1.with(|p| p.value("fmt1")), p2.with(|p| p.value("fmt1")));

        // a direct update on the delegating side is skipped with a warning
        p2.update(UpdateParams::new().set("fmt1", json!("mine")))
            .unwrap();
        assert_eq!(p2.with(|p| p.value("fmt1")), Some(json!("hello")));

        p1.unshare(std::slice::from_ref(&p2), Some(&keys), Some(false), false)
            .unwrap();
        p1.update(UpdateParams::new().set("fmt1", json!("world")))
            .unwrap();
        assert_eq!(p1.with(|p| p.value("fmt1")), Some(json!("world")));
        // the released plotter keeps the last shared value
        assert_eq!(p2.with(|p| p.value("fmt1")), Some(json!("hello")));
        assert_eq!(journal.get("test2.fmt1").as_deref(), Some("hello"));
    }

    #[test]
    fn test_share_by_group() {
        let (registry, class, journal) = test_class();
        let (p1, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        let (p2, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        p1.with_mut(|p| p.set_name("test1"));
        p2.with_mut(|p| p.set_name("test2"));
        journal.clear();

        // "labels" expands to fmt1 and fmt2 but not fmt3
        let keys = vec!["labels".to_string()];
        p1.share(std::slice::from_ref(&p2), Some(&keys), Some(false), false)
            .unwrap();
        p1.update(
            UpdateParams::new()
                .set("fmt1", json!("okay"))
                .set("fmt2", json!("okay2")),
        )
        .unwrap();
        assert_eq!(journal.get("test2.fmt1").as_deref(), Some("okay"));
        assert_eq!(journal.get("test2.fmt2").as_deref(), Some("okay2"));
        assert!(!journal.contains("test2.fmt3"));
        assert_eq!(
            p2.with(|p| p.shared_from_names()),
            vec![
                ("fmt1".to_string(), "test1".to_string()),
                ("fmt2".to_string(), "test1".to_string())
            ]
        );
    }

    #[test]
    fn test_rollback_on_validation_error() {
        // scenario D / P4: the first key of the batch was already set
        // when the second fails; afterwards nothing may differ
        let (registry, class, _) = test_class();
        let (plotter, _) = build_plotter(
            &class,
            &registry,
            Some(sample_data()),
            &[("fmt1", json!("a")), ("fmt2", json!("b")), ("fmt3", json!("c"))],
        );
        let err = plotter
            .update(
                UpdateParams::new()
                    .set("fmt1", json!("new1"))
                    .set("fmt2", json!([1, 2]))
                    .set("fmt3", json!("new3")),
            )
            .unwrap_err();
        assert!(matches!(err, FmtError::Validation { ref key, .. } if key == "fmt2"));
        plotter.with(|p| {
            assert_eq!(p.value("fmt1"), Some(json!("a")));
            assert_eq!(p.value("fmt2"), Some(json!("b")));
            assert_eq!(p.value("fmt3"), Some(json!("c")));
        });
    }

    #[test]
    fn test_clearing_selects_everything() {
        // scenario E / P5
        let registry = test_registry();
        let journal = Journal::new();
        let class = extended_class(&journal);
        let (plotter, log) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        journal.clear();
        log.clear();
        plotter
            .update(UpdateParams::new().set("transpose", json!("t")))
            .unwrap();
        plotter.with(|p| {
            let mut touched = p.last_update().to_vec();
            touched.sort();
            let mut all = p.sorted_keys();
            all.sort();
            assert_eq!(touched, all);
        });
        // the axes were wiped for the reinit
        assert!(log.ops().contains(&TraceOp::Cleared));
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[test]
    fn test_idempotent_updates_skip() {
        // P1: same value twice, no second invocation
        let (registry, class, journal) = test_class();
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        plotter
            .update(UpdateParams::new().set("fmt1", json!("a")))
            .unwrap();
        let events_after_first = journal.events().len();
        plotter
            .update(UpdateParams::new().set("fmt1", json!("a")))
            .unwrap();
        assert_eq!(journal.events().len(), events_after_first);
        // unless the key is forced
        plotter
            .update(
                UpdateParams::new()
                    .set("fmt1", json!("a"))
                    .force(Force::All),
            )
            .unwrap();
        assert!(journal.events().len() > events_after_first);
    }

    #[test]
    fn test_children_run_before_parents() {
        // P2: fmt2 declares fmt3 as child; both in one batch
        let (registry, class, journal) = test_class();
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        journal.clear();
        plotter
            .update(
                UpdateParams::new()
                    .set("fmt2", json!("p"))
                    .set("fmt3", json!("c")),
            )
            .unwrap();
        let events = journal.events();
        let pos2 = events.iter().position(|e| e == "data.fmt2").unwrap();
        let pos3 = events.iter().position(|e| e == "data.fmt3").unwrap();
        assert!(pos3 < pos2);
    }

    #[test]
    fn test_parent_suppresses_child() {
        // P3: a batch with parent and child only runs the parent
        let (registry, _, _) = test_class();
        let journal = Journal::new();
        let mut class = PlotterClass::new("ParentPlotter", "plotter.test.");
        let j = journal.clone();
        class.add(FmtoDecl::new("fmt1", Priority::End).parents(&["fmt2"]), move || {
            Box::new(SimpleFmt::new(&j))
        });
        let j = journal.clone();
        class.add(FmtoDecl::new("fmt2", Priority::End), move || {
            Box::new(SimpleFmt::new(&j))
        });
        let class = Arc::new(class);
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        journal.clear();
        plotter
            .update(
                UpdateParams::new()
                    .set("fmt1", json!("child"))
                    .set("fmt2", json!("parent")),
            )
            .unwrap();
        let events = journal.events();
        assert!(events.contains(&"data.fmt2".to_string()));
        assert!(!events.contains(&"data.fmt1".to_string()));
    }

    #[test]
    fn test_value_round_trip() {
        // P7 at the engine boundary: replaying a snapshot through the
        // constructor yields pointwise equal values
        let (registry, class, _) = test_class();
        let (plotter, _) = build_plotter(
            &class,
            &registry,
            Some(sample_data()),
            &[("fmt1", json!("one")), ("fmt3", json!("three"))],
        );
        let snapshot = plotter.with(|p| p.save_snapshot());
        let fmt: Vec<(&str, Value)> = snapshot
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        let (replayed, _) = build_plotter(&class, &registry, Some(sample_data()), &fmt);
        assert_eq!(replayed.with(|p| p.save_snapshot()), snapshot);
    }

    // =========================================================================
    // Resolver details
    // =========================================================================

    #[test]
    fn test_replot_pulls_in_data_dependent() {
        let registry = test_registry();
        let journal = Journal::new();
        let class = extended_class(&journal);
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        journal.clear();
        // a Start-priority update forces the plot formatoption (data
        // dependent) to re-run as well
        plotter
            .update(UpdateParams::new().set("mask", json!("m")))
            .unwrap();
        let events = journal.events();
        assert!(events.contains(&"data.mask".to_string()));
        assert!(events.contains(&"data.plot".to_string()));
        assert!(events.contains(&"data.make_plot".to_string()));
    }

    #[test]
    fn test_update_after_plot_reruns_when_plot_is_remade() {
        let registry = test_registry();
        let journal = Journal::new();
        let class = extended_class(&journal);
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        journal.clear();
        // a before-plot change re-makes the plot, which pulls in the
        // update-after-plot formatoption although it was not requested
        plotter
            .update(UpdateParams::new().set("plot", json!("p")))
            .unwrap();
        let events = journal.events();
        assert!(events.contains(&"data.make_plot".to_string()));
        assert!(events.contains(&"data.legend".to_string()));
        // an end-band change leaves it alone
        journal.clear();
        plotter
            .update(UpdateParams::new().set("fmt1", json!("x")))
            .unwrap();
        assert!(!journal.events().contains(&"data.legend".to_string()));
    }

    #[test]
    fn test_make_plot_runs_after_before_plot_band() {
        let registry = test_registry();
        let journal = Journal::new();
        let class = extended_class(&journal);
        build_plotter(&class, &registry, Some(sample_data()), &[]);
        let events = journal.events();
        let plot_pos = events.iter().position(|e| e == "data.plot").unwrap();
        let make_pos = events.iter().position(|e| e == "data.make_plot").unwrap();
        let fmt1_pos = events.iter().position(|e| e == "data.fmt1").unwrap();
        assert!(plot_pos < make_pos);
        // the End band runs after the plot was made
        assert!(make_pos < fmt1_pos);
    }

    #[test]
    fn test_deferred_updates_wait_for_start_update() {
        let (registry, class, _) = test_class();
        let target = TraceTarget::new(1);
        let opts = PlotterOptions {
            auto_update: Some(false),
            ..Default::default()
        };
        let plotter = PlotterHandle::new(
            &class,
            &registry,
            Some(sample_data()),
            Box::new(target),
            opts,
        )
        .unwrap();
        plotter
            .update(UpdateParams::new().set("fmt1", json!("queued")))
            .unwrap();
        plotter.with(|p| {
            assert_ne!(p.value("fmt1"), Some(json!("queued")));
            assert!(p.has_pending_updates());
        });
        plotter.start_update(Some(false)).unwrap();
        plotter.with(|p| {
            assert_eq!(p.value("fmt1"), Some(json!("queued")));
            assert!(!p.has_pending_updates());
        });
    }

    #[test]
    fn test_unknown_key_suggests_similar() {
        let (registry, class, _) = test_class();
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        let err = plotter
            .update(UpdateParams::new().set("fmt11", json!("x")))
            .unwrap_err();
        match err {
            FmtError::UnknownKey { key, similar } => {
                assert_eq!(key, "fmt11");
                assert!(similar.contains(&"fmt1".to_string()));
            }
            other => panic!("expected UnknownKey, got {other}"),
        }
    }

    #[test]
    fn test_todefault_restores_defaults() {
        let (registry, class, _) = test_class();
        let (plotter, _) = build_plotter(
            &class,
            &registry,
            Some(sample_data()),
            &[("fmt1", json!("custom"))],
        );
        plotter
            .update(UpdateParams::new().todefault())
            .unwrap();
        assert_eq!(plotter.with(|p| p.value("fmt1")), Some(json!("")));
    }

    #[test]
    fn test_has_changed() {
        let (registry, class, _) = test_class();
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        plotter
            .update(UpdateParams::new().set("fmt1", json!("changed")))
            .unwrap();
        plotter.with(|p| {
            let (old, new) = p.has_changed("fmt1", true).unwrap();
            assert_eq!(old, json!(""));
            assert_eq!(new, json!("changed"));
            assert!(p.has_changed("fmt2", false).is_none());
        });
    }

    #[test]
    fn test_post_hook_runs_when_enabled() {
        let (registry, class, journal) = test_class();
        let target = TraceTarget::new(1);
        let opts = PlotterOptions {
            enable_post: true,
            ..Default::default()
        };
        let plotter = PlotterHandle::new(
            &class,
            &registry,
            Some(sample_data()),
            Box::new(target),
            opts,
        )
        .unwrap();
        let j = journal.clone();
        plotter.with_mut(|p| {
            p.register_post_hook(
                "annotate",
                Arc::new(move |ctx: &mut FmtContext<'_>| {
                    ctx.target.set_title("annotated");
                    j.record("post_hook".to_string(), "ran");
                    Ok(())
                }),
            );
        });
        plotter
            .update(UpdateParams::new().set("post", json!("annotate")))
            .unwrap();
        assert_eq!(journal.get("post_hook").as_deref(), Some("ran"));
        // an unknown hook name is an update error
        let err = plotter
            .update(UpdateParams::new().set("post", json!("missing")))
            .unwrap_err();
        assert!(matches!(err, FmtError::Update { ref key, .. } if key == "post"));
    }

    #[test]
    fn test_post_timing_always_reruns_post() {
        let (registry, class, journal) = test_class();
        let target = TraceTarget::new(1);
        let opts = PlotterOptions {
            enable_post: true,
            ..Default::default()
        };
        let plotter = PlotterHandle::new(
            &class,
            &registry,
            Some(sample_data()),
            Box::new(target),
            opts,
        )
        .unwrap();
        let counter = Arc::new(Mutex::new(0usize));
        let c = Arc::clone(&counter);
        plotter.with_mut(|p| {
            p.register_post_hook(
                "count",
                Arc::new(move |_: &mut FmtContext<'_>| {
                    *c.lock().unwrap() += 1;
                    Ok(())
                }),
            );
        });
        plotter
            .update(UpdateParams::new().set("post", json!("count")))
            .unwrap();
        assert_eq!(*counter.lock().unwrap(), 1);
        // with timing "never", an unrelated update leaves post alone
        plotter
            .update(UpdateParams::new().set("fmt1", json!("x")))
            .unwrap();
        assert_eq!(*counter.lock().unwrap(), 1);
        // with timing "always", every update re-runs the hook
        plotter
            .update(UpdateParams::new().set("post_timing", json!("always")))
            .unwrap();
        plotter
            .update(UpdateParams::new().set("fmt1", json!("y")))
            .unwrap();
        assert!(*counter.lock().unwrap() >= 2);
        let _ = journal;
    }

    #[test]
    fn test_rc_prefix_scoping() {
        // a derived class resolves defaults under its own prefix first
        let registry = test_registry();
        registry.write(|rc| {
            rc.defaults_mut().insert(
                "plotter.derived.fmt3",
                json!("derived default"),
                Validator::any(),
                "override",
            );
            rc.update_from_defaults();
        });
        let (_, base, journal) = test_class();
        let class = Arc::new(PlotterClass::derive("Derived", "plotter.derived.", &base));
        let (plotter, _) = build_plotter(&class, &registry, Some(sample_data()), &[]);
        assert_eq!(
            plotter.with(|p| p.value("fmt3")),
            Some(json!("derived default"))
        );
        assert_eq!(plotter.with(|p| p.value("fmt1")), Some(json!("")));
        let _ = journal;
    }

    #[test]
    fn test_show_keys_table() {
        let (_, class, _) = test_class();
        let table = class.show_keys(false);
        assert!(table.contains("fmt1"));
        assert!(table.contains("post_timing"));
        assert!(table.starts_with('+'));
    }
}
