//! Project persistence.
//!
//! A saved project captures, per plotter: its name, plotter class, data
//! payload, the full formatoption key -> value map and which keys are
//! shared with which named siblings. Loading reconstructs each plotter
//! by replaying the value map through the normal constructor +
//! forced-update path and then re-establishes the shares by name.
//!
//! The format is versioned JSON; unknown versions are rejected instead
//! of being half-read.

use arrayplot_config::Registry;
use arrayplot_core::{DataObject, RenderTarget};
use arrayplot_engine::{FmtError, PlotterClass, PlotterHandle, PlotterOptions, Project};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("project io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("project parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported project format version {0}")]
    Version(u32),

    #[error("unknown plotter class {0}")]
    UnknownClass(String),

    #[error("shared source {src} of entry {entry} is not in the project")]
    MissingShareSource { entry: String, src: String },

    #[error(transparent)]
    Engine(#[from] FmtError),
}

/// One saved plotter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    pub plotter_class: String,
    pub data: Option<DataObject>,
    /// Full key -> value map, via each formatoption's save conversion.
    pub fmt: Vec<(String, Value)>,
    /// key -> name of the sibling controlling it.
    pub shared: Vec<(String, String)>,
}

/// The on-disk shape of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    pub entries: Vec<EntryRecord>,
}

impl ProjectFile {
    /// Capture a project.
    pub fn capture(project: &Project) -> Self {
        let entries = project
            .entries()
            .iter()
            .map(|entry| {
                entry.plotter.with(|p| EntryRecord {
                    name: entry.name.clone(),
                    plotter_class: p.class().name().to_string(),
                    data: p.data().cloned(),
                    fmt: p.save_snapshot(),
                    shared: p.shared_from_names(),
                })
            })
            .collect();
        Self {
            version: FORMAT_VERSION,
            entries,
        }
    }

    /// Rebuild the project: construct every plotter with its saved
    /// values, then re-establish the sharing links by name.
    pub fn restore(
        &self,
        registry: &Registry,
        resolve_class: &dyn Fn(&str) -> Option<Arc<PlotterClass>>,
        make_target: &mut dyn FnMut() -> Box<dyn RenderTarget>,
    ) -> Result<Project, IoError> {
        if self.version != FORMAT_VERSION {
            return Err(IoError::Version(self.version));
        }
        let mut project = Project::new(registry);
        for record in &self.entries {
            let Some(class) = resolve_class(&record.plotter_class) else {
                return Err(IoError::UnknownClass(record.plotter_class.clone()));
            };
            let opts = PlotterOptions {
                name: record.name.clone(),
                fmt: record.fmt.clone(),
                draw: Some(false),
                ..Default::default()
            };
            let plotter = PlotterHandle::new(
                &class,
                registry,
                record.data.clone(),
                make_target(),
                opts,
            )?;
            project.add(plotter, Some(record.name.clone()))?;
        }

        // sharing links, grouped per (source, target) pair
        for record in &self.entries {
            if record.shared.is_empty() {
                continue;
            }
            let mut by_source: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for (key, source) in &record.shared {
                by_source.entry(source.as_str()).or_default().push(key.clone());
            }
            let target = project
                .get(&record.name)
                .expect("entry was just added")
                .plotter
                .clone();
            for (source, keys) in by_source {
                let Some(source_entry) = project.get(source) else {
                    return Err(IoError::MissingShareSource {
                        entry: record.name.clone(),
                        src: source.to_string(),
                    });
                };
                source_entry.plotter.share(
                    std::slice::from_ref(&target),
                    Some(&keys),
                    Some(false),
                    false,
                )?;
            }
        }
        Ok(project)
    }
}

/// Save a project to a JSON file.
pub fn save_project(project: &Project, path: &Path) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = ProjectFile::capture(project);
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)?;
    log::debug!("saved {} plotters to {}", file.entries.len(), path.display());
    Ok(())
}

/// Load a project from a JSON file.
pub fn load_project(
    path: &Path,
    registry: &Registry,
    resolve_class: &dyn Fn(&str) -> Option<Arc<PlotterClass>>,
    make_target: &mut dyn FnMut() -> Box<dyn RenderTarget>,
) -> Result<Project, IoError> {
    let contents = std::fs::read_to_string(path)?;
    let file: ProjectFile = serde_json::from_str(&contents)?;
    file.restore(registry, resolve_class, make_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrayplot_config::{Registry, Validator};
    use arrayplot_core::{DataArray, TraceTarget};
    use arrayplot_engine::{FmtoDecl, Formatoption, Priority, UpdateParams};
    use serde_json::json;

    struct NoopFmt;

    impl Formatoption for NoopFmt {
        fn update(
            &mut self,
            _ctx: &mut arrayplot_engine::FmtContext<'_>,
            _value: &Value,
        ) -> Result<(), String> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let registry = Registry::with_base_defaults();
        registry.write(|rc| {
            for key in ["title", "grid"] {
                rc.defaults_mut().insert(
                    format!("plotter.saved.{key}"),
                    json!(null),
                    Validator::any(),
                    "saved key",
                );
            }
            rc.update_from_defaults();
        });
        registry
    }

    fn saved_class() -> Arc<PlotterClass> {
        let mut class = PlotterClass::new("SavedPlotter", "plotter.saved.");
        class.add(FmtoDecl::new("title", Priority::End).group("labels"), || {
            Box::new(NoopFmt)
        });
        class.add(FmtoDecl::new("grid", Priority::End).group("axes"), || {
            Box::new(NoopFmt)
        });
        Arc::new(class)
    }

    fn data() -> DataObject {
        DataObject::Array(DataArray::vector("v", "x", vec![1.0, 2.0]))
    }

    fn build(registry: &Registry, class: &Arc<PlotterClass>) -> PlotterHandle {
        PlotterHandle::new(
            class,
            registry,
            Some(data()),
            Box::new(TraceTarget::new(1)),
            PlotterOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_values() {
        let registry = registry();
        let class = saved_class();
        let mut project = Project::new(&registry);
        let plotter = build(&registry, &class);
        plotter
            .update(UpdateParams::new().set("title", json!("saved title")))
            .unwrap();
        project.add(plotter, Some("first".to_string())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.project.json");
        save_project(&project, &path).unwrap();

        let resolver = |name: &str| {
            if name == "SavedPlotter" {
                Some(saved_class())
            } else {
                None
            }
        };
        let mut make_target: Box<dyn FnMut() -> Box<dyn arrayplot_core::RenderTarget>> =
            Box::new(|| Box::new(TraceTarget::new(1)));
        let restored = load_project(&path, &registry, &resolver, &mut make_target).unwrap();

        assert_eq!(restored.names(), vec!["first"]);
        let original = project.get("first").unwrap().plotter.with(|p| p.save_snapshot());
        let replayed = restored.get("first").unwrap().plotter.with(|p| p.save_snapshot());
        assert_eq!(original, replayed);
    }

    #[test]
    fn test_round_trip_restores_shares() {
        let registry = registry();
        let class = saved_class();
        let mut project = Project::new(&registry);
        let p1 = build(&registry, &class);
        let p2 = build(&registry, &class);
        project.add(p1.clone(), Some("one".to_string())).unwrap();
        project.add(p2, Some("two".to_string())).unwrap();
        let keys = vec!["title".to_string()];
        let target = project.get("two").unwrap().plotter.clone();
        p1.share(std::slice::from_ref(&target), Some(&keys), Some(false), false)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.project.json");
        save_project(&project, &path).unwrap();

        let resolver = |name: &str| {
            if name == "SavedPlotter" {
                Some(saved_class())
            } else {
                None
            }
        };
        let mut make_target: Box<dyn FnMut() -> Box<dyn arrayplot_core::RenderTarget>> =
            Box::new(|| Box::new(TraceTarget::new(1)));
        let restored = load_project(&path, &registry, &resolver, &mut make_target).unwrap();

        // the share is live again: updating "one" reaches "two"
        let one = restored.get("one").unwrap().plotter.clone();
        let two = restored.get("two").unwrap().plotter.clone();
        one.update(UpdateParams::new().set("title", json!("linked")))
            .unwrap();
        assert_eq!(two.with(|p| p.value("title")), Some(json!("linked")));
        assert_eq!(
            two.with(|p| p.shared_from_names()),
            vec![("title".to_string(), "one".to_string())]
        );
    }

    #[test]
    fn test_unknown_class_is_an_error() {
        let registry = registry();
        let file = ProjectFile {
            version: FORMAT_VERSION,
            entries: vec![EntryRecord {
                name: "x".to_string(),
                plotter_class: "NoSuchPlotter".to_string(),
                data: None,
                fmt: vec![],
                shared: vec![],
            }],
        };
        let resolver = |_: &str| None;
        let mut make_target: Box<dyn FnMut() -> Box<dyn arrayplot_core::RenderTarget>> =
            Box::new(|| Box::new(TraceTarget::new(1)));
        let err = file
            .restore(&registry, &resolver, &mut make_target)
            .unwrap_err();
        assert!(matches!(err, IoError::UnknownClass(_)));
    }

    #[test]
    fn test_version_gate() {
        let registry = registry();
        let file = ProjectFile {
            version: 99,
            entries: vec![],
        };
        let resolver = |_: &str| None;
        let mut make_target: Box<dyn FnMut() -> Box<dyn arrayplot_core::RenderTarget>> =
            Box::new(|| Box::new(TraceTarget::new(1)));
        let err = file
            .restore(&registry, &resolver, &mut make_target)
            .unwrap_err();
        assert!(matches!(err, IoError::Version(99)));
    }
}
