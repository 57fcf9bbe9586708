//! Plugin loading.
//!
//! A plugin contributes additional default keys and named plot methods.
//! Loading happens once at startup; conflicts between plugins are fatal
//! in strict mode, otherwise the later-loaded plugin wins with a warning.

use crate::defaults::DefaultsTable;
use crate::rc::{RcError, Registry};

/// A named plot method contributed by a plugin.
#[derive(Debug, Clone)]
pub struct PlotterDef {
    /// Identifier used to look the plot method up (`"line"`, ...).
    pub identifier: String,
    /// Key prefix of the plotter's formatoption defaults.
    pub prefix: String,
    pub description: String,
    /// Name of the contributing plugin.
    pub plugin: String,
}

/// A plugin's contribution to the registry.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub defaults: DefaultsTable,
    pub plotters: Vec<PlotterDef>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: DefaultsTable::new(),
            plotters: Vec::new(),
        }
    }
}

impl Registry {
    /// Load a plugin's defaults and plot methods.
    ///
    /// With `strict`, a key or identifier that is already registered
    /// aborts the load before anything is merged. Otherwise the plugin
    /// overwrites the earlier definitions and a warning names them.
    pub fn load_plugin(&self, plugin: Plugin, strict: bool) -> Result<(), RcError> {
        self.write(|rc| {
            let mut clashes = rc.defaults().conflicts_with(&plugin.defaults);
            for def in &plugin.plotters {
                if rc.plotter_def(&def.identifier).is_some() {
                    clashes.push(def.identifier.clone());
                }
            }
            if !clashes.is_empty() {
                if strict {
                    return Err(RcError::PluginConflict {
                        plugin: plugin.name,
                        keys: clashes,
                    });
                }
                log::warn!(
                    "plugin {} redefines {} and overwrites the earlier definitions",
                    plugin.name,
                    clashes.join(", ")
                );
            }
            rc.defaults_mut().merge(plugin.defaults);
            rc.update_from_defaults();
            for def in plugin.plotters {
                rc.register_plotter(def);
            }
            Ok(())
        })
    }

    /// Load several plugins in order.
    pub fn load_plugins(&self, plugins: Vec<Plugin>, strict: bool) -> Result<(), RcError> {
        for plugin in plugins {
            self.load_plugin(plugin, strict)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Validator;
    use serde_json::json;

    fn plugin(name: &str, key: &str, identifier: &str) -> Plugin {
        let mut plugin = Plugin::new(name);
        plugin
            .defaults
            .insert(key, json!(null), Validator::str_or_none(), "a key");
        plugin.plotters.push(PlotterDef {
            identifier: identifier.to_string(),
            prefix: format!("plotter.{identifier}."),
            description: "test plot method".to_string(),
            plugin: name.to_string(),
        });
        plugin
    }

    #[test]
    fn test_plugin_extends_registry() {
        let registry = Registry::with_base_defaults();
        registry
            .load_plugin(plugin("demo", "plotter.line.title", "line"), true)
            .unwrap();
        assert_eq!(registry.get("plotter.line.title"), Some(json!(null)));
        assert!(registry.read(|rc| rc.plotter_def("line").is_some()));
    }

    #[test]
    fn test_conflict_strict_is_fatal() {
        let registry = Registry::with_base_defaults();
        registry
            .load_plugin(plugin("first", "plotter.line.title", "line"), true)
            .unwrap();
        let err = registry
            .load_plugin(plugin("second", "plotter.line.title", "line"), true)
            .unwrap_err();
        assert!(matches!(err, RcError::PluginConflict { .. }));
        // nothing was overwritten
        assert_eq!(
            registry.read(|rc| rc.plotter_def("line").unwrap().plugin.clone()),
            "first"
        );
    }

    #[test]
    fn test_conflict_lenient_last_wins() {
        let registry = Registry::with_base_defaults();
        registry
            .load_plugin(plugin("first", "plotter.line.title", "line"), false)
            .unwrap();
        registry
            .load_plugin(plugin("second", "plotter.line.title", "line"), false)
            .unwrap();
        assert_eq!(
            registry.read(|rc| rc.plotter_def("line").unwrap().plugin.clone()),
            "second"
        );
    }
}
