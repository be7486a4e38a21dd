//! fswatch CLI - fsw command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fswatch::{Config, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cmd;

/// fsw - watch files and directories for changes
#[derive(Parser)]
#[command(name = "fsw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Watcher configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Polling/stream latency in milliseconds, overrides the config file
    #[arg(long, global = true)]
    latency: Option<u64>,

    /// Use the polling engine instead of the native one
    #[arg(long, global = true)]
    poll: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print events for the given files and directories
    Watch {
        /// Files are watched together; each directory is watched as a tree
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// One JSON object per line instead of text
        #[arg(long)]
        json: bool,

        /// Stop after this many seconds (default: run until interrupted)
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Drive real files through the watcher and check the reported events
    Selftest {
        /// Time allowed for each scenario
        #[arg(long, default_value = "5")]
        duration_secs: u64,
    },
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(ms) = self.latency {
            config = config.with_latency(Duration::from_millis(ms));
        }
        Ok(config)
    }

    /// Build a fresh watcher instance from the CLI options
    fn watcher(&self) -> Result<Watcher> {
        let config = self.load_config()?;
        Ok(if self.poll {
            Watcher::polling(config)
        } else {
            Watcher::new(config)
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Watch {
            paths,
            json,
            duration_secs,
        } => cmd::watch::run(
            || cli.watcher(),
            paths,
            *json,
            duration_secs.map(Duration::from_secs),
        ),
        Commands::Selftest { duration_secs } => {
            cmd::selftest::run(|| cli.watcher(), Duration::from_secs(*duration_secs))
        }
    }
}
