pub mod error;
pub mod fmto;
pub mod fuzzy;
pub mod plotter;
pub mod project;
pub mod report;
pub mod sync;

#[cfg(test)]
pub mod harness;

pub use error::FmtError;
pub use fmto::{
    DataDependent, FmtContext, FmtoDecl, Formatoption, PostHook, Priority, END, BEFORE_PLOT, START,
};
pub use plotter::{Force, PlotterClass, PlotterHandle, PlotterOptions, UpdateParams};
pub use project::{Project, ProjectEntry, ProjectUpdate};
pub use report::UpdateReport;
