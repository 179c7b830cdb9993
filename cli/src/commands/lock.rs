// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Path lock inspection commands
//!
//! Commands: list, channels, release

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use agv_dispatch_core::domain::path_lock::PathLockStatus;

use super::connect;

#[derive(Subcommand)]
pub enum LockCommand {
    /// List approved and pending locks
    List,

    /// List channels with at least one holder
    Channels,

    /// Release orphaned locks on a channel (holders whose job already ended)
    Release {
        /// Channel key, e.g. S005<->S006
        #[arg(value_name = "CHANNEL")]
        key: String,
    },
}

pub async fn handle_command(command: LockCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        LockCommand::List => {
            let locks = client.list_locks().await?;
            if locks.is_empty() {
                println!("{}", "No active locks".dimmed());
                return Ok(());
            }
            println!(
                "{:<24}  {:<9}  {:<8}  {:<36}  {:<20}",
                "CHANNEL".bold(),
                "STATUS".bold(),
                "AGV".bold(),
                "JOB".bold(),
                "EXPIRES".bold()
            );
            for lock in &locks {
                let status = match lock.status {
                    PathLockStatus::Approved => "approved".green(),
                    _ => "pending".yellow(),
                };
                println!(
                    "{:<24}  {:<9}  {:<8}  {:<36}  {:<20}",
                    lock.channel.to_string(),
                    status,
                    lock.agv_code,
                    lock.task_id.to_string(),
                    lock.expire_at
                        .map(|t| t.format("%H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        LockCommand::Channels => {
            let channels = client.list_channels().await?;
            if channels.is_empty() {
                println!("{}", "No occupied channels".dimmed());
                return Ok(());
            }
            for channel in &channels {
                println!(
                    "{}  holders: {} ({})  waiting: {}",
                    channel.key.to_string().bold(),
                    channel.agv_count,
                    channel.holders.join(", "),
                    channel.waiting
                );
            }
        }
        LockCommand::Release { key } => {
            let result = client.release_channel(&key).await?;
            if result.released == 0 {
                println!("{}", format!("No orphaned locks on {}", key).yellow());
            } else {
                println!(
                    "{}",
                    format!("✓ Released {} orphaned lock(s) on {}", result.released, key).green()
                );
            }
        }
    }
    Ok(())
}
