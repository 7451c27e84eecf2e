mod commands;
mod progress;
mod scene_file;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scarlet", about = "Multi-band source deblender")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesise a scene from a TOML description and deblend it
    Deblend(commands::deblend::DeblendArgs),
    /// Build difference kernels that match Gaussian PSFs to a common target
    PsfMatch(commands::psf_match::PsfMatchArgs),
    /// Print a default deblend config as TOML
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Deblend(args) => commands::deblend::run(args),
        Commands::PsfMatch(args) => commands::psf_match::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
