//! livemd CLI - live Markdown preview.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

use config::{load_config, Overrides};

#[derive(Parser)]
#[command(name = "livemd")]
#[command(about = "Render a Markdown file to HTML and preview it with live reload")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to livemd.toml config file
    #[arg(short, long, default_value = "livemd.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render on every change and serve the result with live reload
    Watch {
        /// Markdown file to render
        source: Option<PathBuf>,

        /// HTML file to write
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },

    /// Render once and exit
    Render {
        /// Markdown file to render
        source: Option<PathBuf>,

        /// HTML file to write
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt().with_env_filter(filter).with_target(false).init();

    let file_config = load_config(&cli.config)?;

    // Execute command
    match cli.command {
        Commands::Watch {
            source,
            output,
            port,
            host,
            no_open,
        } => {
            let config = file_config.into_live_config(
                &cli.config,
                Overrides {
                    source,
                    output,
                    host,
                    port,
                    no_open,
                },
            )?;
            commands::watch::run(config).await?;
        }
        Commands::Render { source, output } => {
            let config = file_config.into_live_config(
                &cli.config,
                Overrides {
                    source,
                    output,
                    ..Default::default()
                },
            )?;
            commands::render::run(config)?;
        }
    }

    Ok(())
}
