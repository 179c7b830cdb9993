// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Offline route planning against a site manifest
//!
//! Runs the same planner the dispatcher uses, without a running daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use agv_dispatch_core::application::plan_route;
use agv_dispatch_core::domain::channel::ChannelCatalog;
use agv_dispatch_core::domain::dispatch_config::DispatchConfigManifest;
use agv_dispatch_core::domain::route::{CheckpointType, PlannedRoute};
use agv_dispatch_core::infrastructure::site_loader::SiteManifestParser;

#[derive(Args)]
pub struct PlanArgs {
    /// Start station code
    #[arg(value_name = "FROM")]
    pub from: String,

    /// End station code
    #[arg(value_name = "TO")]
    pub to: String,

    /// Site manifest (default: spec.site_file from the configuration)
    #[arg(long)]
    pub site: Option<PathBuf>,
}

pub async fn execute(args: PlanArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = DispatchConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    let site_path = args
        .site
        .or(config.spec.site_file)
        .context("No site manifest given; pass --site or set spec.site_file")?;
    let site = SiteManifestParser::parse_file(&site_path)?;
    let graph = site.graph()?;
    let catalog = ChannelCatalog::from_configs_with_default(
        &site.spec.channels,
        config.spec.locks.default_timeout_minutes,
    )
    .context("Invalid channel configuration")?;

    let route = plan_route(&graph, &catalog, &args.from, &args.to)?;
    print_route(&route);
    Ok(())
}

fn print_route(route: &PlannedRoute) {
    println!(
        "{} {} → {}",
        "Route:".bold(),
        route.start_station,
        route.end_station
    );
    println!("  Distance: {:.1}", route.distance);
    println!();

    println!("{:>5}  {:<10}  {:<7}  {}", "SEQ".bold(), "STATION".bold(), "TYPE".bold(), "CHANNEL".bold());
    for checkpoint in &route.checkpoints {
        let kind = match checkpoint.checkpoint_type {
            CheckpointType::Start => "start",
            CheckpointType::Middle => "middle",
            CheckpointType::End => "end",
        };
        let channel = checkpoint
            .channel
            .as_ref()
            .map(|c| c.to_string().yellow().to_string())
            .unwrap_or_else(|| "-".dimmed().to_string());
        println!(
            "{:>5}  {:<10}  {:<7}  {}",
            checkpoint.sequence, checkpoint.station_code, kind, channel
        );
    }

    if !route.channels.is_empty() {
        println!();
        println!("{}", "Locked channels:".bold());
        for channel in &route.channels {
            println!(
                "  {} (enter at {}, clear at {})",
                channel.key, channel.entry_station, channel.exit_station
            );
        }
    }
}
