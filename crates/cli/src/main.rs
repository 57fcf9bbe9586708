mod commands;
mod line;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aplot", version, about = "Interactive plotting of labeled arrays")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plot a variable from a dataset file
    Plot(commands::PlotArgs),
    /// Show the formatoption keys of a plot method
    Keys(commands::KeysArgs),
    /// Show or dump the configuration store
    Rc(commands::RcArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Plot(args) => commands::plot(args),
        Command::Keys(args) => commands::keys(args),
        Command::Rc(args) => commands::rc(args),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
