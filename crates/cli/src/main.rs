//! Notigate CLI - ngate command

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use notigate_core::ExecutorKind;
use std::path::PathBuf;
use tracing::Level;

mod cmd;

use cmd::simulate::Scenario;

/// Notigate - catch-up gated notification dispatch
#[derive(Parser)]
#[command(name = "ngate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log dispatcher decisions at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a refresh scenario through the optimized notifier
    Simulate {
        /// Scenario to replay
        #[arg(long, value_enum, default_value = "burst")]
        scenario: Scenario,
        /// Number of refresh requests (default: 10)
        #[arg(long, default_value = "10")]
        requests: u32,
        /// Delay between requests in milliseconds (default: 20)
        #[arg(long, default_value = "20")]
        spacing_ms: u64,
        /// Override the configured debounce window
        #[arg(long)]
        window_ms: Option<u64>,
        /// Override the configured executor (thread, pool or runtime)
        #[arg(long)]
        executor: Option<ExecutorKind>,
    },
    /// View or edit configuration
    Config(ConfigArgs),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ConfigArgs {
    /// List every configuration value
    #[arg(long)]
    list: bool,
    /// Print a single value (e.g. dispatch.debounce_window_ms)
    #[arg(long, value_name = "KEY")]
    get: Option<String>,
    /// Set a single value
    #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
    set: Option<Vec<String>>,
    /// Print the config file path
    #[arg(long)]
    path: bool,
    /// Print a commented example configuration
    #[arg(long)]
    example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => notigate_core::config::config_file_path()
            .context("Could not determine config file path")?,
    };

    match cli.command {
        Commands::Simulate {
            scenario,
            requests,
            spacing_ms,
            window_ms,
            executor,
        } => {
            let options = cmd::simulate::Options {
                scenario,
                requests,
                spacing_ms,
                window_ms,
                executor,
            };
            cmd::simulate::run(&config_path, options).await
        }
        Commands::Config(args) => {
            if args.list {
                cmd::config::run_list(&config_path).await
            } else if let Some(key) = args.get {
                cmd::config::run_get(&config_path, &key).await
            } else if let Some(pair) = args.set {
                cmd::config::run_set(&config_path, &pair[0], &pair[1]).await
            } else if args.path {
                cmd::config::run_path(&config_path).await
            } else {
                cmd::config::run_example().await
            }
        }
    }
}
