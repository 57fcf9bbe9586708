//! Plotter collections.
//!
//! A [`Project`] is an ordered sequence of named plotters. Bulk updates
//! run in two phases: the data-gathering step of every member (the
//! compute-heavy re-selection of the underlying arrays) runs on a worker
//! pool in parallel, then the plotting step runs sequentially on the
//! calling thread, because the rendering backend is not assumed to be
//! thread-safe. A failed gather never leaves sibling workers blocked:
//! every task's result is drained before errors are reported.
//!
//! There are no timeouts: a stuck render call blocks its caller
//! indefinitely, like the rendering backends this models.

use crate::error::FmtError;
use crate::plotter::{Force, PlotterHandle};
use arrayplot_config::Registry;
use arrayplot_core::DimSel;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;

/// One named member of a project.
#[derive(Clone, Debug)]
pub struct ProjectEntry {
    pub name: String,
    pub plotter: PlotterHandle,
}

/// Parameters of a bulk update.
#[derive(Clone, Default)]
pub struct ProjectUpdate {
    /// New dimension selections, re-sliced from each member's base.
    pub dims: BTreeMap<String, DimSel>,
    /// Formatoption values applied to every member.
    pub fmt: Vec<(String, Value)>,
    pub replot: bool,
    pub force: Force,
    pub todefault: bool,
    /// None defers to the `auto_draw` configuration key.
    pub draw: Option<bool>,
}

impl ProjectUpdate {
    pub fn new() -> Self {
        Self {
            draw: Some(false),
            ..Default::default()
        }
    }

    pub fn dim(mut self, name: impl Into<String>, sel: DimSel) -> Self {
        self.dims.insert(name.into(), sel);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fmt.push((key.into(), value));
        self
    }

    pub fn draw(mut self, draw: Option<bool>) -> Self {
        self.draw = draw;
        self
    }
}

/// An ordered collection of (name, plotter) pairs with unique names.
#[derive(Debug)]
pub struct Project {
    registry: Registry,
    entries: Vec<ProjectEntry>,
    next_num: usize,
    is_sub: bool,
}

impl Project {
    pub fn new(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
            entries: Vec::new(),
            next_num: 0,
            is_sub: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True for filtered views produced by [`Project::filtered`].
    pub fn is_sub(&self) -> bool {
        self.is_sub
    }

    pub fn entries(&self) -> &[ProjectEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ProjectEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Add a plotter under the given name, or under a generated
    /// `arr<n>` name. The name must be unique within the project.
    pub fn add(
        &mut self,
        plotter: PlotterHandle,
        name: Option<String>,
    ) -> Result<String, FmtError> {
        let name = match name {
            Some(name) => {
                if self.get(&name).is_some() {
                    return Err(FmtError::Project(format!(
                        "a plotter named {name:?} is already in the project"
                    )));
                }
                name
            }
            None => loop {
                let candidate = format!("arr{}", self.next_num);
                self.next_num += 1;
                if self.get(&candidate).is_none() {
                    break candidate;
                }
            },
        };
        plotter.with_mut(|p| p.set_name(&name));
        self.entries.push(ProjectEntry { name: name.clone(), plotter });
        Ok(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ProjectEntry> {
        let pos = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(pos))
    }

    /// Rename a member, preserving name uniqueness.
    pub fn rename(&mut self, old: &str, new: impl Into<String>) -> Result<(), FmtError> {
        let new = new.into();
        if self.get(&new).is_some() {
            return Err(FmtError::Project(format!(
                "a plotter named {new:?} is already in the project"
            )));
        }
        let Some(entry) = self.entries.iter_mut().find(|e| e.name == old) else {
            return Err(FmtError::Project(format!("no plotter named {old:?}")));
        };
        entry.name = new.clone();
        entry.plotter.with_mut(|p| p.set_name(&new));
        Ok(())
    }

    /// A filtered view on this project. The returned project shares the
    /// plotters' identity with this one; it owns nothing of its own.
    pub fn filtered(&self, pred: impl Fn(&ProjectEntry) -> bool) -> Project {
        Project {
            registry: self.registry.clone(),
            entries: self.entries.iter().filter(|e| pred(e)).cloned().collect(),
            next_num: self.next_num,
            is_sub: true,
        }
    }

    /// Disable every member; subsequent updates become no-ops.
    pub fn close(&mut self) {
        for entry in &self.entries {
            entry.plotter.with_mut(|p| p.set_disabled(true));
        }
    }

    /// Update every member: parallel data gathering, then sequential
    /// plotting, then one draw over the touched figures. Per-member
    /// failures are collected and returned; the remaining members are
    /// still processed.
    pub fn update_all(&self, params: ProjectUpdate) -> Vec<(String, FmtError)> {
        let mut errors: Vec<(String, FmtError)> = Vec::new();

        // Phase 1: gather. One task per member needing a re-selection,
        // distributed over a fixed-size pool.
        if !params.dims.is_empty() {
            errors.extend(self.gather_parallel(&params.dims));
        }

        // Phase 2: plot, sequentially on this thread.
        let failed: Vec<String> = errors.iter().map(|(n, _)| n.clone()).collect();
        let mut drew: Vec<&ProjectEntry> = Vec::new();
        for entry in &self.entries {
            if failed.contains(&entry.name) {
                continue;
            }
            let registered = entry.plotter.with_mut(|p| {
                p.register_update(
                    params.fmt.clone(),
                    params.replot || !params.dims.is_empty(),
                    params.force.clone(),
                    params.todefault,
                )
            });
            if let Err(err) = registered {
                errors.push((entry.name.clone(), err));
                continue;
            }
            match entry.plotter.start_update(Some(false)) {
                Ok(true) => drew.push(entry),
                Ok(false) => {}
                Err(err) => errors.push((entry.name.clone(), err)),
            }
        }

        let auto_draw = self.registry.get_bool("auto_draw", true);
        if params.draw.unwrap_or(auto_draw) {
            for entry in drew {
                entry.plotter.draw();
            }
        }
        errors
    }

    /// Run every member's data re-selection on a worker pool. Each
    /// worker owns a static share of the members; every task reports
    /// through the same channel, so one failure cannot block the rest.
    fn gather_parallel(&self, dims: &BTreeMap<String, DimSel>) -> Vec<(String, FmtError)> {
        let n = self.entries.len();
        if n == 0 {
            return Vec::new();
        }
        let workers = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1)
            .min(n);
        let (tx, rx) = mpsc::channel::<(usize, Result<(), FmtError>)>();
        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let entries = &self.entries;
                scope.spawn(move || {
                    let mut member = worker;
                    while member < n {
                        let result = entries[member].plotter.with_mut(|p| p.apply_dims(dims));
                        // a dead receiver means the coordinator is gone,
                        // nothing left to report to
                        let _ = tx.send((member, result));
                        member += workers;
                    }
                });
            }
            drop(tx);
            let mut errors = Vec::new();
            // drain every task's slot, errors included, before reporting
            for (member, result) in rx {
                if let Err(err) = result {
                    errors.push((self.entries[member].name.clone(), err));
                }
            }
            errors.sort_by(|a, b| a.0.cmp(&b.0));
            errors
        })
    }
}
