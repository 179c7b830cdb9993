// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use agv_dispatch_core::domain::dispatch_config::{DispatchConfigManifest, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default filled in
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./agv-dispatch.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = DispatchConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./agv-dispatch.yaml");
        println!("  4. ~/.agv-dispatch/config.yaml");
        println!("  5. /etc/agv-dispatch/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{} {}", "Configuration:".bold(), config.metadata.name);
    println!();

    println!("{}", "Scheduler:".bold());
    println!("  Tick interval: {:?}", spec.scheduler.tick_interval);
    println!("  Expiry sweep: {:?}", spec.scheduler.expiry_sweep_interval);
    println!();

    println!("{}", "Recommendation:".bold());
    let weights = &spec.recommendation.weights;
    println!(
        "  Weights: battery {} / status {} / station {}",
        weights.battery_weight, weights.status_weight, weights.station_weight
    );
    println!("  Minimum battery: {}%", spec.recommendation.min_battery_percent);
    println!();

    println!("{}", "Locks:".bold());
    println!("  Default lease: {} min", spec.locks.default_timeout_minutes);
    println!();

    println!("{}", "Health:".bold());
    if spec.health.enabled {
        println!("  Offline after: {:?}", spec.health.offline_threshold);
        println!("  Check interval: {:?}", spec.health.check_interval);
    } else {
        println!("  {}", "disabled".dimmed());
    }
    println!();

    println!("{}", "API:".bold());
    println!("  Listen: {}:{}", spec.api.host, spec.api.port);
    match spec.observability.metrics_port {
        Some(port) => println!("  Metrics: 0.0.0.0:{}", port),
        None => println!("  Metrics: {}", "(disabled)".dimmed()),
    }
    match &spec.site_file {
        Some(path) => println!("  Site: {}", path.display()),
        None => println!("  Site: {}", "(none)".dimmed()),
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DispatchConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    DispatchConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}
