// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon server and client
//!
//! `agvd serve` runs the dispatcher in the foreground; every other command
//! reaches it over HTTP.

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::run_server;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { uptime: Option<u64> },
    Unhealthy { error: String },
    Stopped,
}

pub fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check the daemon's health endpoint
pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", base_url(host, port));
    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let uptime = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["uptime_seconds"].as_u64());
            Ok(DaemonStatus::Running { uptime })
        }
        Ok(resp) => Ok(DaemonStatus::Unhealthy {
            error: format!("HTTP {}", resp.status()),
        }),
        Err(_) => Ok(DaemonStatus::Stopped),
    }
}
