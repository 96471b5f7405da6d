//! droidpilot CLI entry point.
//!
//! Commands:
//! - `run`: Drive a task against a saved screenshot (dry run)
//! - `parse`: Split a saved model reply into thinking and action
//! - `doctor`: Check configuration and model reachability

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "droidpilot",
    about = "droidpilot — vision-language agent loop for phone automation",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task against a static screenshot; actions are logged, not performed
    Run {
        /// What the agent should accomplish
        #[arg(short, long)]
        task: String,

        /// PNG screenshot shown to the model on every step
        #[arg(short, long)]
        screenshot: PathBuf,

        /// Foreground app reported to the model
        #[arg(long, default_value = "System Home")]
        app: String,

        /// Override the configured step ceiling
        #[arg(long)]
        max_steps: Option<u32>,

        /// Override the configured language (cn or en)
        #[arg(long)]
        lang: Option<String>,
    },

    /// Parse a saved model reply (reads stdin when no file is given)
    Parse {
        file: Option<PathBuf>,
    },

    /// Diagnose configuration and model endpoint health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            task,
            screenshot,
            app,
            max_steps,
            lang,
        } => {
            commands::run::run(commands::run::RunArgs {
                task,
                screenshot,
                app,
                max_steps,
                lang,
            })
            .await?
        }
        Commands::Parse { file } => commands::parse::run(file)?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
