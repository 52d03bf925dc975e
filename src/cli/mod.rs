//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod config;
pub mod plan;
pub mod up;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version)]
#[command(about = "Bring up a multi-resource development topology in dependency order", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.stagehand/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every resource, wait for Ctrl-C, then tear everything down
    Up {
        /// Use the scripted runtime instead of docker
        #[arg(long)]
        dry_run: bool,
        /// Checkout root containing data-api/, web-app/ and database/
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
    /// Show start waves and dependency edges without launching anything
    Plan {
        /// Checkout root containing data-api/, web-app/ and database/
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
    /// Show the URLs each resource will be reachable at
    Urls {
        /// Checkout root containing data-api/, web-app/ and database/
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
    /// Validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate config file for errors and unknown fields
    Check,
}

/// Entry point for the CLI: called from main().
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logging follows the config; a broken config still gets default logging
    // so the command itself can report the problem.
    let config = common::load_config(cli.config.as_deref());
    let logging_cfg = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    stagehand::utils::logging::init_logging(&logging_cfg)?;

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action, cli.config).await?;
        }
        Some(Commands::Up { dry_run, root }) => {
            up::cmd_up(config?, root, dry_run).await?;
        }
        Some(Commands::Plan { root }) => {
            plan::cmd_plan(config?, root)?;
        }
        Some(Commands::Urls { root }) => {
            plan::cmd_urls(config?, root)?;
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("stagehand {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Dependency-ordered startup for local development topologies");
}
