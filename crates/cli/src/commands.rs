//! The `aplot` subcommands.

use crate::line;
use arrayplot_config::{RcStore, Registry};
use arrayplot_core::{DataObject, Dataset, DatasetSlice, DimSel, TraceOp, TraceTarget};
use arrayplot_engine::{PlotterHandle, PlotterOptions, Project};
use clap::Args;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

type CliResult = Result<(), Box<dyn Error>>;

/// Build the registry the way every command sees it: base defaults, the
/// built-in plugins, then the user's configuration file.
fn make_registry() -> Result<Registry, Box<dyn Error>> {
    let registry = Registry::with_base_defaults();
    registry.load_plugin(line::plugin(), false)?;
    let rc_path = RcStore::config_path();
    if rc_path.exists() {
        registry.write(|rc| rc.load_from_file(&rc_path))?;
    }
    Ok(registry)
}

#[derive(Args)]
pub struct PlotArgs {
    /// Dataset file (JSON)
    #[arg(short, long)]
    input: PathBuf,

    /// Variable name to plot
    #[arg(short, long)]
    name: String,

    /// Plot method identifier
    #[arg(short, long, default_value = "line")]
    plot_method: String,

    /// Dimension selections as NAME=INDEX or NAME=VALUE (nearest),
    /// repeatable
    #[arg(short, long = "dim")]
    dims: Vec<String>,

    /// Formatoption values as KEY=JSON, repeatable
    #[arg(short, long = "set")]
    fmt: Vec<String>,

    /// Write the resulting project to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn plot(args: PlotArgs) -> CliResult {
    let registry = make_registry()?;
    if args.plot_method != "line" {
        let known = registry.read(|rc| rc.plotter_identifiers());
        return Err(format!(
            "unknown plot method {:?}; available: {}",
            args.plot_method,
            known.join(", ")
        )
        .into());
    }

    let contents = std::fs::read_to_string(&args.input)?;
    let dataset: Dataset = serde_json::from_str(&contents)?;
    let dataset = Arc::new(dataset);

    let dims = parse_dims(&args.dims)?;
    let array = dataset.slice(&args.name, &dims)?;
    let data = DataObject::Array(array);

    let fmt = parse_fmt(&args.fmt)?;
    let target = TraceTarget::new(1);
    let log = target.log();
    let class = line::line_plotter_class();
    let plotter = PlotterHandle::new(
        &class,
        &registry,
        Some(data),
        Box::new(target),
        PlotterOptions {
            fmt,
            ..Default::default()
        },
    )?;

    // report what was drawn
    println!("plotted {} [{}]", args.name, args.plot_method);
    for op in log.ops() {
        match op {
            TraceOp::Title(t) if !t.is_empty() => println!("  title:  {t}"),
            TraceOp::XLabel(l) if !l.is_empty() => println!("  xlabel: {l}"),
            TraceOp::YLabel(l) if !l.is_empty() => println!("  ylabel: {l}"),
            TraceOp::Line { points, .. } => println!("  line with {points} points"),
            _ => {}
        }
    }

    if let Some(output) = args.output {
        let mut project = Project::new(&registry);
        project.add(plotter, Some(args.name.clone()))?;
        arrayplot_io::save_project(&project, &output)?;
        println!("saved project to {}", output.display());
    }
    Ok(())
}

#[derive(Args)]
pub struct KeysArgs {
    /// Plot method identifier
    #[arg(default_value = "line")]
    plot_method: String,

    /// Group the keys by formatoption group
    #[arg(short, long)]
    grouped: bool,
}

pub fn keys(args: KeysArgs) -> CliResult {
    let registry = make_registry()?;
    if args.plot_method != "line" {
        let known = registry.read(|rc| rc.plotter_identifiers());
        return Err(format!(
            "unknown plot method {:?}; available: {}",
            args.plot_method,
            known.join(", ")
        )
        .into());
    }
    let class = line::line_plotter_class();
    println!("{}", class.show_keys(args.grouped));
    Ok(())
}

#[derive(Args)]
pub struct RcArgs {
    /// Write the configuration to this file instead of stdout
    #[arg(short, long)]
    dump: Option<PathBuf>,
}

pub fn rc(args: RcArgs) -> CliResult {
    let registry = make_registry()?;
    match args.dump {
        Some(path) => {
            registry.read(|rc| rc.dump_to_file(&path))?;
            println!("wrote configuration to {}", path.display());
        }
        None => {
            registry.read(|rc| println!("{}", rc.dump_string()));
        }
    }
    Ok(())
}

/// Parse NAME=SEL pairs: an unsigned integer selects by position,
/// anything else that parses as a number selects the nearest coordinate.
fn parse_dims(specs: &[String]) -> Result<BTreeMap<String, DimSel>, Box<dyn Error>> {
    let mut dims = BTreeMap::new();
    for spec in specs {
        let Some((name, sel)) = spec.split_once('=') else {
            return Err(format!("expected NAME=SELECTION, got {spec:?}").into());
        };
        let sel = if let Ok(index) = sel.parse::<usize>() {
            DimSel::Index(index)
        } else if let Ok(value) = sel.parse::<f64>() {
            DimSel::Nearest(value)
        } else {
            return Err(format!("selection for {name:?} must be numeric, got {sel:?}").into());
        };
        dims.insert(name.to_string(), sel);
    }
    Ok(dims)
}

/// Parse KEY=VALUE pairs; the value is JSON, with a bare-word fallback
/// to a string.
fn parse_fmt(specs: &[String]) -> Result<Vec<(String, Value)>, Box<dyn Error>> {
    let mut fmt = Vec::new();
    for spec in specs {
        let Some((key, raw)) = spec.split_once('=') else {
            return Err(format!("expected KEY=VALUE, got {spec:?}").into());
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fmt.push((key.to_string(), value));
    }
    Ok(fmt)
}
