// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AGV Dispatch CLI
//!
//! The `agvd` binary runs the dispatcher and talks to a running one.
//!
//! ## Commands
//!
//! - `agvd serve` - Run scheduler, health monitor and HTTP API in the foreground
//! - `agvd job create|cancel|status|list` - Job operations against the daemon
//! - `agvd lock list|channels|release` - Path lock inspection against the daemon
//! - `agvd config show|validate|generate` - Configuration management
//! - `agvd plan` - Plan a route offline against a site file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use agv_dispatch::commands::{self, ConfigCommand, JobCommand, LockCommand, PlanArgs};
use agv_dispatch::daemon;

/// AGV fleet dispatcher
#[derive(Parser)]
#[command(name = "agvd")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AGV_DISPATCH_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Daemon HTTP port used by client commands
    #[arg(long, global = true, env = "AGV_DISPATCH_PORT", default_value = "8090")]
    port: u16,

    /// Daemon host used by client commands
    #[arg(long, global = true, env = "AGV_DISPATCH_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AGV_DISPATCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher in the foreground
    #[command(name = "serve")]
    Serve {
        /// Site manifest to seed map, channels and fleet (overrides spec.site_file)
        #[arg(long, value_name = "FILE")]
        site: Option<PathBuf>,
    },

    /// Job operations
    #[command(name = "job")]
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },

    /// Path lock inspection
    #[command(name = "lock")]
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Plan a route offline against a site file
    #[command(name = "plan")]
    Plan(PlanArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        Some(Commands::Serve { site }) => daemon::run_server(cli.config, site).await,
        Some(Commands::Job { command }) => {
            commands::job::handle_command(command, &cli.host, cli.port).await
        }
        Some(Commands::Lock { command }) => {
            commands::lock::handle_command(command, &cli.host, cli.port).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Plan(args)) => commands::plan::execute(args, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
