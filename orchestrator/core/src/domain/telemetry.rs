// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Inbound telemetry shapes delivered by the messaging bridge.

use crate::domain::agv::{battery_percent_from_voltage, AgvStatus, Position};
use crate::domain::task_job::{TaskJobId, TaskJobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgvStatusReport {
    pub agv_code: String,
    pub status: AgvStatus,
    #[serde(default)]
    pub battery_percent: Option<u8>,
    #[serde(default)]
    pub battery_voltage: Option<f64>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub current_station: Option<String>,
    #[serde(default)]
    pub has_cargo: Option<bool>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
}

impl AgvStatusReport {
    /// Percentage wins over voltage when both are present.
    pub fn battery(&self) -> Option<u8> {
        self.battery_percent
            .map(|p| p.min(100))
            .or_else(|| self.battery_voltage.map(battery_percent_from_voltage))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressReport {
    pub task_id: TaskJobId,
    pub agv_code: String,
    #[serde(default)]
    pub status: Option<TaskJobStatus>,
    #[serde(default)]
    pub progress_percentage: Option<f64>,
    /// Station code of the checkpoint just reached.
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl FaultSeverity {
    pub fn requires_intervention(self) -> bool {
        matches!(self, FaultSeverity::Error | FaultSeverity::Critical)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgvFaultReport {
    pub agv_code: String,
    #[serde(default)]
    pub task_id: Option<TaskJobId>,
    pub severity: FaultSeverity,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}
