// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AGV Aggregate
//!
//! Runtime state of one fleet vehicle. Telemetry ingestion updates the
//! physical fields (battery, position, station, liveness); the dispatch
//! orchestrator is the only writer of `current_task_id`.
//!
//! Invariant: `current_task_id` is set iff the vehicle is `Moving` on behalf of
//! an Assigned or Executing job.

use crate::domain::task_job::TaskJobId;
use crate::domain::telemetry::AgvStatusReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Battery voltage that maps to 0 %.
pub const MIN_BATTERY_VOLTAGE: f64 = 46.0;
/// Battery voltage that maps to 100 %.
pub const MAX_BATTERY_VOLTAGE: f64 = 53.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgvId(pub Uuid);

impl AgvId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgvId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgvId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgvStatus {
    Offline,
    Idle,
    Moving,
    Charging,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub angle: f64,
}

impl Position {
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AgvError {
    #[error("AGV {agv} is already running task {task}")]
    Busy { agv: String, task: TaskJobId },

    #[error("AGV {agv} is {status:?} and cannot take a task")]
    NotDispatchable { agv: String, status: AgvStatus },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agv {
    pub id: AgvId,
    pub code: String,
    pub name: Option<String>,
    pub status: AgvStatus,
    pub battery_percent: u8,
    pub position: Option<Position>,
    pub speed: Option<f64>,
    pub current_station: Option<String>,
    pub current_task_id: Option<TaskJobId>,
    pub has_cargo: bool,
    pub error_code: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, advanced by every successful save.
    #[serde(default)]
    pub version: u64,
}

impl Agv {
    /// A freshly registered vehicle is Offline until its first status report.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: AgvId::new(),
            code: code.into(),
            name: None,
            status: AgvStatus::Offline,
            battery_percent: 0,
            position: None,
            speed: None,
            current_station: None,
            current_task_id: None,
            has_cargo: false,
            error_code: None,
            last_seen_at: None,
            version: 0,
        }
    }

    /// Idle and not running a task. Job-type rules and the battery floor
    /// are applied by `domain::recommendation::eligibility_gaps`.
    pub fn is_free(&self) -> bool {
        self.status == AgvStatus::Idle && self.current_task_id.is_none()
    }

    pub fn assign_task(&mut self, task_id: TaskJobId) -> Result<(), AgvError> {
        if let Some(current) = self.current_task_id {
            return Err(AgvError::Busy {
                agv: self.code.clone(),
                task: current,
            });
        }
        if self.status != AgvStatus::Idle {
            return Err(AgvError::NotDispatchable {
                agv: self.code.clone(),
                status: self.status,
            });
        }
        self.current_task_id = Some(task_id);
        self.status = AgvStatus::Moving;
        Ok(())
    }

    /// Detach `task_id` from the vehicle. Returns false when the vehicle was
    /// running a different task (or none) and nothing changed.
    pub fn release_task(&mut self, task_id: TaskJobId) -> bool {
        if self.current_task_id != Some(task_id) {
            return false;
        }
        self.current_task_id = None;
        if self.status == AgvStatus::Moving {
            self.status = AgvStatus::Idle;
        }
        true
    }

    /// Apply a telemetry status report. Returns the previous status when it changed.
    pub fn apply_status_report(
        &mut self,
        report: &AgvStatusReport,
        now: DateTime<Utc>,
    ) -> Option<AgvStatus> {
        if let Some(battery) = report.battery() {
            self.battery_percent = battery;
        }
        if let Some(position) = report.position {
            self.position = Some(position);
        }
        if report.speed.is_some() {
            self.speed = report.speed;
        }
        if let Some(station) = &report.current_station {
            self.current_station = Some(station.clone());
        }
        if let Some(has_cargo) = report.has_cargo {
            self.has_cargo = has_cargo;
        }
        self.last_seen_at = Some(report.reported_at.unwrap_or(now));

        let previous = self.status;
        self.status = match report.status {
            AgvStatus::Error => AgvStatus::Error,
            // The orchestrator owns the busy state while a task is attached.
            _ if self.current_task_id.is_some() => AgvStatus::Moving,
            reported => reported,
        };
        self.error_code = if self.status == AgvStatus::Error {
            report.error_code.clone().or_else(|| self.error_code.take())
        } else {
            None
        };

        (previous != self.status).then_some(previous)
    }

    pub fn mark_fault(&mut self, error_code: Option<String>) {
        self.status = AgvStatus::Error;
        self.error_code = error_code;
    }

    pub fn mark_offline(&mut self) {
        self.status = AgvStatus::Offline;
        self.speed = None;
    }

    /// True when the vehicle has not reported for longer than `threshold`.
    /// A vehicle that never reported is silent.
    pub fn is_silent(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.last_seen_at {
            Some(seen) => now
                .signed_duration_since(seen)
                .to_std()
                .map(|elapsed| elapsed > threshold)
                .unwrap_or(false),
            None => true,
        }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> Option<f64> {
        self.position.map(|p| p.distance_to(x, y))
    }
}

/// Linear voltage to percentage conversion, clamped to 0-100.
pub fn battery_percent_from_voltage(voltage: f64) -> u8 {
    if !voltage.is_finite() || voltage <= MIN_BATTERY_VOLTAGE {
        return 0;
    }
    if voltage >= MAX_BATTERY_VOLTAGE {
        return 100;
    }
    let percent = (voltage - MIN_BATTERY_VOLTAGE) / (MAX_BATTERY_VOLTAGE - MIN_BATTERY_VOLTAGE) * 100.0;
    percent.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_agv(battery: u8) -> Agv {
        let mut agv = Agv::new("AGV01");
        agv.status = AgvStatus::Idle;
        agv.battery_percent = battery;
        agv
    }

    fn report(status: AgvStatus) -> AgvStatusReport {
        AgvStatusReport {
            agv_code: "AGV01".to_string(),
            status,
            battery_percent: None,
            battery_voltage: None,
            position: None,
            speed: None,
            current_station: None,
            has_cargo: None,
            error_code: None,
            reported_at: None,
        }
    }

    #[test]
    fn test_voltage_conversion_bounds() {
        assert_eq!(battery_percent_from_voltage(45.0), 0);
        assert_eq!(battery_percent_from_voltage(46.0), 0);
        assert_eq!(battery_percent_from_voltage(49.5), 50);
        assert_eq!(battery_percent_from_voltage(53.0), 100);
        assert_eq!(battery_percent_from_voltage(60.0), 100);
    }

    #[test]
    fn test_free_requires_idle_without_task() {
        assert!(idle_agv(5).is_free());

        let mut charging = idle_agv(90);
        charging.status = AgvStatus::Charging;
        assert!(!charging.is_free());

        let mut busy = idle_agv(90);
        busy.assign_task(TaskJobId::new()).unwrap();
        assert!(!busy.is_free());
    }

    #[test]
    fn test_assign_and_release_task() {
        let mut agv = idle_agv(80);
        let task = TaskJobId::new();

        agv.assign_task(task).unwrap();
        assert_eq!(agv.status, AgvStatus::Moving);
        assert!(matches!(agv.assign_task(TaskJobId::new()), Err(AgvError::Busy { .. })));

        assert!(!agv.release_task(TaskJobId::new()));
        assert!(agv.release_task(task));
        assert_eq!(agv.status, AgvStatus::Idle);
        assert!(agv.current_task_id.is_none());
    }

    #[test]
    fn test_status_report_keeps_busy_state_while_task_attached() {
        let mut agv = idle_agv(80);
        agv.assign_task(TaskJobId::new()).unwrap();

        let changed = agv.apply_status_report(&report(AgvStatus::Idle), Utc::now());
        assert!(changed.is_none());
        assert_eq!(agv.status, AgvStatus::Moving);
    }

    #[test]
    fn test_status_report_brings_offline_vehicle_online() {
        let mut agv = Agv::new("AGV01");
        let mut status = report(AgvStatus::Idle);
        status.battery_voltage = Some(53.0);

        let previous = agv.apply_status_report(&status, Utc::now());
        assert_eq!(previous, Some(AgvStatus::Offline));
        assert_eq!(agv.status, AgvStatus::Idle);
        assert_eq!(agv.battery_percent, 100);
        assert!(agv.last_seen_at.is_some());
    }

    #[test]
    fn test_never_seen_vehicle_is_silent() {
        let agv = Agv::new("AGV01");
        assert!(agv.is_silent(Duration::from_secs(60), Utc::now()));
    }
}
