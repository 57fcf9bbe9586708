//! The built-in line plot method.
//!
//! The engine itself ships no concrete plotters; plot methods are
//! contributed as plugins. This module is the one built into the CLI: a
//! line plotter whose formatoptions cover the three priority bands
//! (axis limits and labels at the end, the line plot and its color in
//! the drawing band) plus a clearing transpose option.

use arrayplot_config::{Plugin, PlotterDef, Validator};
use arrayplot_core::{ArtistId, Coord, LineStyle};
use arrayplot_engine::{FmtContext, FmtoDecl, Formatoption, PlotterClass, Priority};
use serde_json::{json, Value};
use std::sync::Arc;

/// The plugin contributing the line plot method: its formatoption
/// defaults and the plot-method registration.
pub fn plugin() -> Plugin {
    let mut plugin = Plugin::new("builtin");
    let d = &mut plugin.defaults;
    d.insert(
        "plotter.line.title",
        json!(null),
        Validator::str_or_none(),
        "axes title; null uses the data's long_name attribute",
    );
    d.insert(
        "plotter.line.xlabel",
        json!(null),
        Validator::str_or_none(),
        "x axis label; null uses the x coordinate name",
    );
    d.insert(
        "plotter.line.ylabel",
        json!(null),
        Validator::str_or_none(),
        "y axis label; null uses the variable name and units",
    );
    d.insert(
        "plotter.line.grid",
        json!(false),
        Validator::bool(),
        "enable grid lines",
    );
    d.insert(
        "plotter.line.color",
        json!(null),
        Validator::str_or_none(),
        "line color; null lets the backend cycle",
    );
    d.insert(
        "plotter.line.plot",
        json!("line"),
        Validator::one_of(&["line", "markers", "none"]),
        "drawing mode of the line plot",
    );
    d.insert(
        "plotter.line.xlim",
        json!(null),
        Validator::any(),
        "x axis limits as [low, high]; null fits the data",
    );
    d.insert(
        "plotter.line.ylim",
        json!(null),
        Validator::any(),
        "y axis limits as [low, high]; null fits the data",
    );
    plugin.plotters.push(PlotterDef {
        identifier: "line".to_string(),
        prefix: "plotter.line.".to_string(),
        description: "plot one or more arrays as lines".to_string(),
        plugin: "builtin".to_string(),
    });
    plugin
}

/// The line plotter class.
pub fn line_plotter_class() -> Arc<PlotterClass> {
    let mut class = PlotterClass::new("LinePlotter", "plotter.line.");
    class.add(
        FmtoDecl::new("plot", Priority::BeforePlot)
            .group("plotting")
            .name("Drawing mode")
            .plot_fmt()
            .dependencies(&["color"]),
        || Box::new(LinePlot::default()),
    );
    class.add(
        FmtoDecl::new("color", Priority::BeforePlot)
            .group("colors")
            .name("Line color"),
        || Box::new(Color),
    );
    class.add(
        FmtoDecl::new("title", Priority::End).group("labels"),
        || Box::new(Title),
    );
    class.add(
        FmtoDecl::new("xlabel", Priority::End).group("labels"),
        || Box::new(XLabel),
    );
    class.add(
        FmtoDecl::new("ylabel", Priority::End).group("labels"),
        || Box::new(YLabel),
    );
    class.add(
        FmtoDecl::new("grid", Priority::End).group("axes"),
        || Box::new(Grid),
    );
    class.add(
        FmtoDecl::new("xlim", Priority::End)
            .group("axes")
            .data_dependent(arrayplot_engine::DataDependent::Yes),
        || Box::new(XLim),
    );
    class.add(
        FmtoDecl::new("ylim", Priority::End)
            .group("axes")
            .data_dependent(arrayplot_engine::DataDependent::Yes),
        || Box::new(YLim),
    );
    Arc::new(class)
}

fn x_coord(ctx: &FmtContext<'_>) -> Option<Coord> {
    let data = ctx.data()?;
    let arr = data.first()?;
    ctx.decoder.get_x(arr)
}

fn validate_limits(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) if items.len() == 2 => {
            let lo = items[0].as_f64();
            let hi = items[1].as_f64();
            match (lo, hi) {
                (Some(lo), Some(hi)) if lo < hi => Ok(json!([lo, hi])),
                _ => Err(format!("expected [low, high] with low < high, got {value}")),
            }
        }
        other => Err(format!("expected null or [low, high], got {other}")),
    }
}

/// The line plot itself. Owns the artists it created so a re-plot can
/// remove them first.
#[derive(Default)]
struct LinePlot {
    artists: Vec<ArtistId>,
}

impl Formatoption for LinePlot {
    fn update(&mut self, _ctx: &mut FmtContext<'_>, _value: &Value) -> Result<(), String> {
        // drawing happens in make_plot at the end of the band
        Ok(())
    }

    fn make_plot(&mut self, ctx: &mut FmtContext<'_>) -> Result<(), String> {
        for artist in self.artists.drain(..) {
            ctx.target.remove_artist(artist);
        }
        let mode = ctx
            .value_of("plot")
            .and_then(|v| v.as_str())
            .unwrap_or("line");
        if mode == "none" {
            return Ok(());
        }
        let style = LineStyle {
            color: ctx
                .value_of("color")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            width: None,
            marker: (mode == "markers").then(|| "o".to_string()),
        };
        let Some(data) = ctx.data().cloned() else {
            return Ok(());
        };
        for arr in data.iter() {
            if arr.ndim() != 1 {
                return Err(format!(
                    "can only plot one-dimensional arrays, got shape {:?}",
                    arr.shape()
                ));
            }
            let xs: Vec<f64> = match ctx.decoder.get_x(arr) {
                Some(coord) => coord.values,
                None => (0..arr.len()).map(|i| i as f64).collect(),
            };
            let artist = ctx.target.plot_line(&xs, arr.values(), &style);
            self.artists.push(artist);
        }
        Ok(())
    }

    fn remove(&mut self, ctx: &mut FmtContext<'_>) {
        for artist in self.artists.drain(..) {
            ctx.target.remove_artist(artist);
        }
    }
}

/// Consumed by the plot formatoption; carries no effect of its own.
struct Color;

impl Formatoption for Color {
    fn update(&mut self, _ctx: &mut FmtContext<'_>, _value: &Value) -> Result<(), String> {
        Ok(())
    }
}

struct Title;

impl Formatoption for Title {
    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let title = match value.as_str() {
            Some(s) => s.to_string(),
            None => ctx
                .data()
                .and_then(|d| d.first())
                .map(|arr| {
                    arr.attrs
                        .get("long_name")
                        .cloned()
                        .unwrap_or_else(|| arr.name().to_string())
                })
                .unwrap_or_default(),
        };
        ctx.target.set_title(&title);
        Ok(())
    }
}

struct XLabel;

impl Formatoption for XLabel {
    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let label = match value.as_str() {
            Some(s) => s.to_string(),
            None => x_coord(ctx).map(|c| c.name).unwrap_or_default(),
        };
        ctx.target.set_xlabel(&label);
        Ok(())
    }
}

struct YLabel;

impl Formatoption for YLabel {
    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let label = match value.as_str() {
            Some(s) => s.to_string(),
            None => ctx
                .data()
                .and_then(|d| d.first())
                .map(|arr| match arr.attrs.get("units") {
                    Some(units) => format!("{} [{units}]", arr.name()),
                    None => arr.name().to_string(),
                })
                .unwrap_or_default(),
        };
        ctx.target.set_ylabel(&label);
        Ok(())
    }
}

struct Grid;

impl Formatoption for Grid {
    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        ctx.target.set_grid(value.as_bool().unwrap_or(false));
        Ok(())
    }
}

struct XLim;

impl Formatoption for XLim {
    fn validate(&self, value: &Value) -> Option<Result<Value, String>> {
        Some(validate_limits(value))
    }

    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let (lo, hi) = match value {
            Value::Array(items) => (
                items[0].as_f64().unwrap_or(0.0),
                items[1].as_f64().unwrap_or(1.0),
            ),
            _ => {
                let xs: Vec<f64> = x_coord(ctx).map(|c| c.values).unwrap_or_default();
                match min_max(&xs) {
                    Some(range) => range,
                    None => return Ok(()),
                }
            }
        };
        ctx.target.set_xlim(lo, hi);
        Ok(())
    }
}

struct YLim;

impl Formatoption for YLim {
    fn validate(&self, value: &Value) -> Option<Result<Value, String>> {
        Some(validate_limits(value))
    }

    fn update(&mut self, ctx: &mut FmtContext<'_>, value: &Value) -> Result<(), String> {
        let (lo, hi) = match value {
            Value::Array(items) => (
                items[0].as_f64().unwrap_or(0.0),
                items[1].as_f64().unwrap_or(1.0),
            ),
            _ => {
                let all: Vec<f64> = match ctx.data() {
                    Some(data) => data.iter().flat_map(|a| a.values().iter().copied()).collect(),
                    None => return Ok(()),
                };
                match min_max(&all) {
                    Some(range) => range,
                    None => return Ok(()),
                }
            }
        };
        ctx.target.set_ylim(lo, hi);
        Ok(())
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let mut iter = values.iter().copied().filter(|v| v.is_finite());
    let first = iter.next()?;
    let (mut lo, mut hi) = (first, first);
    for v in iter {
        if v < lo {
            lo = v;
        }
        if v > hi {
            hi = v;
        }
    }
    if lo == hi {
        // widen degenerate ranges so the limits stay ordered
        Some((lo - 0.5, hi + 0.5))
    } else {
        Some((lo, hi))
    }
}
