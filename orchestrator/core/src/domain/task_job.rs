// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # TaskJob Aggregate
//!
//! A transport job and its lifecycle:
//!
//! ```text
//! Pending ──assign──▶ Assigned ──start──▶ Executing ──complete──▶ Completed
//!    │                   │                    │
//!    └──cancel───────────┴──cancel / fail─────┴──▶ Cancelled / Failed
//! ```
//!
//! Terminal states are immutable. Every transition bumps `version`, which the
//! repository uses for optimistic concurrency.

use crate::domain::agv::AgvId;
use crate::domain::channel::ChannelKey;
use crate::domain::route::PlannedRoute;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;

/// Priority bounds. Lower numbers are more urgent.
pub const MIN_PRIORITY: i32 = 10;
pub const MAX_PRIORITY: i32 = 50;
pub const DEFAULT_PRIORITY: i32 = 30;

/// Progress changes smaller than this, without a status change, are ignored.
pub const PROGRESS_EPSILON: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskJobId(pub Uuid);

impl TaskJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskJobType {
    CallForLoading,
    SendToUnloading,
    ReturnToWaiting,
    SendToCharge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskJobStatus {
    Pending,
    Assigned,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl TaskJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskJobStatus::Completed | TaskJobStatus::Cancelled | TaskJobStatus::Failed
        )
    }

    /// Assigned or Executing: a vehicle is attached.
    pub fn is_active(self) -> bool {
        matches!(self, TaskJobStatus::Assigned | TaskJobStatus::Executing)
    }

    fn rank(self) -> u8 {
        match self {
            TaskJobStatus::Pending => 0,
            TaskJobStatus::Assigned => 1,
            TaskJobStatus::Executing => 2,
            TaskJobStatus::Completed => 3,
            TaskJobStatus::Cancelled => 4,
            TaskJobStatus::Failed => 5,
        }
    }
}

impl std::str::FromStr for TaskJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskJobStatus::Pending),
            "assigned" => Ok(TaskJobStatus::Assigned),
            "executing" => Ok(TaskJobStatus::Executing),
            "completed" => Ok(TaskJobStatus::Completed),
            "cancelled" => Ok(TaskJobStatus::Cancelled),
            "failed" => Ok(TaskJobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TaskTransitionError {
    #[error("cannot {action} a job in {from:?} state")]
    InvalidState {
        from: TaskJobStatus,
        action: &'static str,
    },

    #[error("job is already assigned to AGV {0}")]
    AlreadyAssigned(AgvId),

    #[error("job has no planned route")]
    MissingRoute,

    #[error("checkpoint {reached} is not ahead of checkpoint {current}")]
    CheckpointOutOfOrder { current: usize, reached: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskJob {
    pub id: TaskJobId,
    pub job_type: TaskJobType,
    pub status: TaskJobStatus,
    pub priority: i32,
    pub start_station: String,
    pub end_station: String,
    pub description: Option<String>,
    pub assigned_agv_id: Option<AgvId>,
    pub assigned_agv_code: Option<String>,
    pub progress_percentage: f64,
    pub route: Option<PlannedRoute>,
    /// Index into `route.checkpoints` of the last checkpoint reached.
    pub current_checkpoint: usize,
    pub held_channels: Vec<ChannelKey>,
    /// Channel the vehicle is held for, if its last request came back Pending.
    pub waiting_on: Option<ChannelKey>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub version: u64,
}

impl TaskJob {
    pub fn new(
        job_type: TaskJobType,
        start_station: impl Into<String>,
        end_station: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: TaskJobId::new(),
            job_type,
            status: TaskJobStatus::Pending,
            priority,
            start_station: start_station.into(),
            end_station: end_station.into(),
            description: None,
            assigned_agv_id: None,
            assigned_agv_code: None,
            progress_percentage: 0.0,
            route: None,
            current_checkpoint: 0,
            held_channels: Vec::new(),
            waiting_on: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            failure_reason: None,
            cancel_reason: None,
            version: 0,
        }
    }

    fn guard(&self, allowed: &[TaskJobStatus], action: &'static str) -> Result<(), TaskTransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TaskTransitionError::InvalidState {
                from: self.status,
                action,
            })
        }
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    pub fn assign(&mut self, agv_id: AgvId, agv_code: impl Into<String>, now: DateTime<Utc>) -> Result<(), TaskTransitionError> {
        if let Some(existing) = self.assigned_agv_id {
            return Err(TaskTransitionError::AlreadyAssigned(existing));
        }
        self.guard(&[TaskJobStatus::Pending], "assign")?;
        self.status = TaskJobStatus::Assigned;
        self.assigned_agv_id = Some(agv_id);
        self.assigned_agv_code = Some(agv_code.into());
        self.assigned_at = Some(now);
        self.touch();
        Ok(())
    }

    pub fn attach_route(&mut self, route: PlannedRoute) -> Result<(), TaskTransitionError> {
        self.guard(&[TaskJobStatus::Assigned], "attach a route to")?;
        self.route = Some(route);
        self.current_checkpoint = 0;
        self.touch();
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TaskTransitionError> {
        self.guard(&[TaskJobStatus::Assigned], "start")?;
        if self.route.is_none() {
            return Err(TaskTransitionError::MissingRoute);
        }
        self.status = TaskJobStatus::Executing;
        self.started_at = Some(now);
        self.touch();
        Ok(())
    }

    pub fn reach_checkpoint(&mut self, index: usize) -> Result<(), TaskTransitionError> {
        self.guard(&[TaskJobStatus::Executing], "advance")?;
        let route = self.route.as_ref().ok_or(TaskTransitionError::MissingRoute)?;
        if index <= self.current_checkpoint || index > route.final_index() {
            return Err(TaskTransitionError::CheckpointOutOfOrder {
                current: self.current_checkpoint,
                reached: index,
            });
        }
        self.progress_percentage = route.progress_at(index);
        self.current_checkpoint = index;
        self.touch();
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TaskTransitionError> {
        self.guard(&[TaskJobStatus::Executing], "complete")?;
        self.status = TaskJobStatus::Completed;
        self.progress_percentage = 100.0;
        self.completed_at = Some(now);
        self.clear_channel_state();
        self.touch();
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TaskTransitionError> {
        self.guard(
            &[TaskJobStatus::Pending, TaskJobStatus::Assigned, TaskJobStatus::Executing],
            "cancel",
        )?;
        self.status = TaskJobStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.cancelled_at = Some(now);
        self.clear_channel_state();
        self.touch();
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TaskTransitionError> {
        self.guard(&[TaskJobStatus::Assigned, TaskJobStatus::Executing], "fail")?;
        self.status = TaskJobStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.failed_at = Some(now);
        self.clear_channel_state();
        self.touch();
        Ok(())
    }

    /// Apply an externally reported progress value. Returns false when the
    /// change is below [`PROGRESS_EPSILON`] and was ignored.
    pub fn report_progress(&mut self, percentage: f64) -> bool {
        let percentage = percentage.clamp(0.0, 100.0);
        if self.status.is_terminal() || (percentage - self.progress_percentage).abs() < PROGRESS_EPSILON {
            return false;
        }
        self.progress_percentage = percentage;
        self.touch();
        true
    }

    pub fn hold_channel(&mut self, key: ChannelKey) {
        if self.waiting_on.as_ref() == Some(&key) {
            self.waiting_on = None;
        }
        if !self.held_channels.contains(&key) {
            self.held_channels.push(key);
        }
        self.touch();
    }

    pub fn vacate_channel(&mut self, key: &ChannelKey) -> bool {
        let before = self.held_channels.len();
        self.held_channels.retain(|k| k != key);
        let removed = self.held_channels.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn wait_for(&mut self, key: ChannelKey) {
        self.waiting_on = Some(key);
        self.touch();
    }

    pub fn holds(&self, key: &ChannelKey) -> bool {
        self.held_channels.contains(key)
    }

    /// Furthest checkpoint index the vehicle may reach with the channels it
    /// holds now. Stops at the first departure needing a channel not held.
    pub fn clearance_index(&self) -> usize {
        let Some(route) = &self.route else {
            return self.current_checkpoint;
        };
        let mut index = self.current_checkpoint;
        while index < route.final_index() {
            match route.channel_for_departure(index) {
                Some(channel) if !self.holds(&channel.key) => break,
                _ => index += 1,
            }
        }
        index
    }

    fn clear_channel_state(&mut self) {
        self.held_channels.clear();
        self.waiting_on = None;
    }
}

/// Closed set of sort keys accepted by job listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSortKey {
    #[default]
    CreatedAt,
    Priority,
    Status,
    Progress,
    Agv,
}

impl JobSortKey {
    pub fn comparator(self) -> fn(&TaskJob, &TaskJob) -> Ordering {
        match self {
            JobSortKey::CreatedAt => |a, b| a.created_at.cmp(&b.created_at),
            JobSortKey::Priority => |a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            },
            JobSortKey::Status => |a, b| a.status.rank().cmp(&b.status.rank()),
            JobSortKey::Progress => |a, b| a.progress_percentage.total_cmp(&b.progress_percentage),
            JobSortKey::Agv => |a, b| a.assigned_agv_code.cmp(&b.assigned_agv_code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
    #[serde(default)]
    pub statuses: Vec<TaskJobStatus>,
    #[serde(default)]
    pub agv_code: Option<String>,
    #[serde(default)]
    pub sort: JobSortKey,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn matches(&self, job: &TaskJob) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self
                .agv_code
                .as_ref()
                .is_none_or(|code| job.assigned_agv_code.as_ref() == Some(code))
    }

    pub fn apply(&self, jobs: Vec<TaskJob>) -> Vec<TaskJob> {
        let compare = self.sort.comparator();
        let mut selected: Vec<TaskJob> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        selected.sort_by(|a, b| match self.direction {
            SortDirection::Asc => compare(a, b),
            SortDirection::Desc => compare(b, a),
        });
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
