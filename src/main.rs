use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "forge")]
#[command(version, about = "Generation job orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.forge/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API and WebSocket event feed
    Serve {
        /// Port to serve on (overrides forge.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Run a single job to completion in the terminal
    Run {
        /// Provider to run
        #[arg(short, long)]
        provider: String,

        /// Project name (defaults to the provider id)
        #[arg(short, long)]
        name: Option<String>,

        /// Write the artifact content here when the job completes
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List configured providers
    Providers,
    /// Evaluate an artifact JSON file against the configured quality gate
    Gate {
        /// Path to an artifact JSON file
        artifact: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default forge.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&project_dir, command.clone());
    }

    let config = forge::forge_config::ForgeConfig::new(project_dir)?;
    let _log_guard =
        forge::logging::init_logging(&config.toml.logging, &config.log_dir(), cli.verbose)?;

    match &cli.command {
        Commands::Serve { port, dev } => cmd::cmd_serve(config, *port, *dev).await?,
        Commands::Run {
            provider,
            name,
            output,
        } => {
            cmd::cmd_run(
                &config,
                provider,
                name.as_deref(),
                output.as_deref(),
                cli.verbose,
            )
            .await?
        }
        Commands::Providers => cmd::cmd_providers(&config)?,
        Commands::Gate { artifact } => cmd::cmd_gate(&config, artifact)?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
