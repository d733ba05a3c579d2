//! agentloop CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a default config with the briefing and slack profiles
//! - `run`: Run one loop execution for a profile and print the answer
//! - `tools`: List the tools a profile exposes to the model

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentloop",
    about = "agentloop: multi-turn tool-use agent runner",
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
    /// Write ~/.agentloop/config.toml with example profiles
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run one agent loop execution
    Run {
        /// Profile to run
        #[arg(short, long)]
        profile: String,

        /// Text substituted for {input} in the task template
        #[arg(short, long)]
        input: Option<String>,

        /// Print the delivery with its metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tool schemas a profile declares
    Tools {
        #[arg(short, long)]
        profile: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the delivery
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
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Run {
            profile,
            input,
            json,
        } => commands::run::run(&profile, input, json).await?,
        Commands::Tools { profile } => commands::tools::run(&profile).await?,
    }

    Ok(())
}
