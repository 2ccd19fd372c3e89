use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use schstats::{density, pupils};

#[derive(Parser)]
#[command(name = "schstats", version, about = "School admissions and population batch transforms")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sum pupil counts by area code
    TotalPups(pupils::RosterArgs),
    /// Sum pupil counts for the target school subset by area code
    TargetPups(pupils::TargetArgs),
    /// Join totals with targets and derive the target proportion
    Combine(pupils::CombineArgs),
    /// Derive per-school target density from small-area age structure
    TargetDensity(density::DensityArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::TotalPups(args) => pupils::run_total_pups(&args),
        Command::TargetPups(args) => pupils::run_target_pups(&args),
        Command::Combine(args) => pupils::run_combine(&args),
        Command::TargetDensity(args) => density::run_target_density(&args),
    }
}
