// Configuration: validated defaults store and prefix-scoped sub-views

pub mod defaults;
pub mod plugin;
pub mod rc;
pub mod sub;
pub mod validate;

pub use defaults::{DefaultEntry, DefaultsTable};
pub use plugin::{Plugin, PlotterDef};
pub use rc::{RcError, RcStore, Registry, ScopedRc};
pub use sub::SubStore;
pub use validate::Validator;
