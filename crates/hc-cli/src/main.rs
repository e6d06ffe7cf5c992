//! HyperCut CLI
//!
//! Command-line interface for optimizing selection cuts on labeled event
//! samples.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod run;

use run::RunArgs;

#[derive(Parser)]
#[command(name = "hypercut")]
#[command(version, about = "HyperCut - TPE-based cut optimization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a grid file and print its description
    Describe {
        /// Grid configuration (JSON)
        #[arg(short = 'g', long = "gridfile")]
        grid: std::path::PathBuf,
    },

    /// Run a cut search
    Run(RunArgs),
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Describe { grid } => {
            println!("{}", run::describe(&grid)?);
        }
        Commands::Run(args) => {
            run::run(&args)?;
        }
    }

    Ok(())
}

/// Directives from `RUST_LOG` when set and valid, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
