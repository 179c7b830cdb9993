// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the agvd CLI

pub mod config;
pub mod job;
pub mod lock;
pub mod plan;

pub use self::config::ConfigCommand;
pub use self::job::JobCommand;
pub use self::lock::LockCommand;
pub use self::plan::PlanArgs;

use anyhow::Result;
use colored::Colorize;
use serde::de::DeserializeOwned;

use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

/// Parse a clap argument through the type's serde representation, so CLI
/// values match the API's wire names (`created_at`, `send_to_charge`, ...).
pub fn parse_wire<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unrecognised value '{value}'"))
}

/// Client for a daemon that answers its health check
pub(crate) async fn connect(host: &str, port: u16) -> Result<DaemonClient> {
    match check_daemon_running(host, port).await? {
        DaemonStatus::Running { .. } => DaemonClient::new(host, port),
        DaemonStatus::Unhealthy { error } => {
            anyhow::bail!("Dispatcher at {}:{} is unhealthy: {}", host, port, error)
        }
        DaemonStatus::Stopped => {
            eprintln!("{}", "Dispatcher is not running. Start it with `agvd serve`.".yellow());
            anyhow::bail!("No dispatcher reachable at {}:{}", host, port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agv_dispatch_core::domain::task_job::{JobSortKey, TaskJobType};

    #[test]
    fn test_parse_wire_uses_snake_case_names() {
        assert_eq!(parse_wire::<JobSortKey>("created_at"), Ok(JobSortKey::CreatedAt));
        assert_eq!(parse_wire::<TaskJobType>("send_to_charge"), Ok(TaskJobType::SendToCharge));
        assert!(parse_wire::<JobSortKey>("CreatedAt").is_err());
    }
}
