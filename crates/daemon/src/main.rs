//! Photospec - Main Entry Point
//! Daemon (`serve`) plus operator subcommands

mod commands;
mod config;
mod logging;
mod wiring;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use photospec_core::domain::SelectionRect;

use crate::config::Settings;
use crate::wiring::Components;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "photospec")]
#[command(about = "Passport photo compliance engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (default ~/.photospec/photospec.toml)
    #[arg(long, short = 'C', env = "PHOTOSPEC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers, crash recovery and retention sweeping
    Serve,

    /// List supported countries
    Countries,

    /// Queue a photo for automatic processing
    Submit {
        /// Input photo (JPEG, PNG or WEBP)
        image: PathBuf,

        /// Country code, e.g. FI
        #[arg(short, long)]
        country: String,
    },

    /// Process a photo immediately and write the compliant JPEG
    Process {
        image: PathBuf,

        #[arg(short, long)]
        country: String,

        /// Output JPEG path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show job status
    Status {
        job_id: String,

        /// Write the output JPEG here if the job completed
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove the background and propose a crop for manual adjustment
    Prepare {
        image: PathBuf,

        #[arg(short, long)]
        country: String,

        /// Where to write the intermediate PNG
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Render a manual selection over a prepared image
    Generate {
        /// Intermediate PNG from `prepare`
        image: PathBuf,

        #[arg(short, long)]
        country: String,

        /// Crop in source pixels: x,y,width,height
        #[arg(short, long)]
        selection: SelectionRect,

        /// Process immediately and write the JPEG here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging();

    let settings = Settings::load(cli.config.as_deref())?;
    info!("Photospec v{} starting...", VERSION);
    let components = Components::build(settings).await?;

    match cli.command {
        Commands::Serve => commands::serve(components).await,
        Commands::Countries => commands::countries(&components).await,
        Commands::Submit { image, country } => {
            commands::submit(&components, &image, &country).await
        }
        Commands::Process {
            image,
            country,
            output,
        } => commands::process(&components, &image, &country, &output).await,
        Commands::Status { job_id, output } => {
            commands::status(&components, &job_id, output.as_deref()).await
        }
        Commands::Prepare {
            image,
            country,
            output,
        } => commands::prepare(&components, &image, &country, &output).await,
        Commands::Generate {
            image,
            country,
            selection,
            output,
        } => {
            commands::generate(&components, &image, selection, &country, output.as_deref()).await
        }
    }
}
