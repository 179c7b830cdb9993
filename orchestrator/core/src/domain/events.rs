// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::agv::{AgvId, AgvStatus};
use crate::domain::channel::ChannelKey;
use crate::domain::path_lock::PathLockId;
use crate::domain::task_job::{TaskJobId, TaskJobType};
use crate::domain::telemetry::FaultSeverity;

/// Task job lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    JobCreated {
        task_id: TaskJobId,
        job_type: TaskJobType,
        start_station: String,
        end_station: String,
        priority: i32,
        created_at: DateTime<Utc>,
    },
    JobAssigned {
        task_id: TaskJobId,
        agv_id: AgvId,
        agv_code: String,
        total_score: f64,
        assigned_at: DateTime<Utc>,
    },
    JobStarted {
        task_id: TaskJobId,
        agv_code: String,
        checkpoint_count: usize,
        started_at: DateTime<Utc>,
    },
    CheckpointReached {
        task_id: TaskJobId,
        station_code: String,
        sequence: u32,
        progress_percentage: f64,
        reached_at: DateTime<Utc>,
    },
    JobCompleted {
        task_id: TaskJobId,
        agv_code: Option<String>,
        completed_at: DateTime<Utc>,
    },
    JobCancelled {
        task_id: TaskJobId,
        reason: String,
        locks_released: usize,
        cancelled_at: DateTime<Utc>,
    },
    JobFailed {
        task_id: TaskJobId,
        reason: String,
        locks_released: usize,
        failed_at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskJobId {
        match self {
            TaskEvent::JobCreated { task_id, .. }
            | TaskEvent::JobAssigned { task_id, .. }
            | TaskEvent::JobStarted { task_id, .. }
            | TaskEvent::CheckpointReached { task_id, .. }
            | TaskEvent::JobCompleted { task_id, .. }
            | TaskEvent::JobCancelled { task_id, .. }
            | TaskEvent::JobFailed { task_id, .. } => *task_id,
        }
    }
}

/// Path lock events, one per lock state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LockEvent {
    LockApproved {
        lock_id: PathLockId,
        channel: ChannelKey,
        agv_code: String,
        task_id: TaskJobId,
        expire_at: Option<DateTime<Utc>>,
    },
    LockQueued {
        lock_id: PathLockId,
        channel: ChannelKey,
        agv_code: String,
        task_id: TaskJobId,
        queue_position: usize,
    },
    /// A queued request was granted after the channel freed up.
    LockPromoted {
        lock_id: PathLockId,
        channel: ChannelKey,
        agv_code: String,
        task_id: TaskJobId,
        waited_ms: i64,
    },
    LockReleased {
        lock_id: PathLockId,
        channel: ChannelKey,
        agv_code: String,
        task_id: TaskJobId,
        released_at: DateTime<Utc>,
    },
    LockRejected {
        lock_id: PathLockId,
        channel: ChannelKey,
        agv_code: String,
        task_id: TaskJobId,
        reason: String,
    },
    LockExpired {
        lock_id: PathLockId,
        channel: ChannelKey,
        agv_code: String,
        task_id: TaskJobId,
        expired_at: DateTime<Utc>,
    },
}

impl LockEvent {
    pub fn task_id(&self) -> TaskJobId {
        match self {
            LockEvent::LockApproved { task_id, .. }
            | LockEvent::LockQueued { task_id, .. }
            | LockEvent::LockPromoted { task_id, .. }
            | LockEvent::LockReleased { task_id, .. }
            | LockEvent::LockRejected { task_id, .. }
            | LockEvent::LockExpired { task_id, .. } => *task_id,
        }
    }
}

/// Fleet events raised by telemetry and health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgvEvent {
    AgvStatusChanged {
        agv_id: AgvId,
        agv_code: String,
        from: AgvStatus,
        to: AgvStatus,
        changed_at: DateTime<Utc>,
    },
    AgvWentOffline {
        agv_id: AgvId,
        agv_code: String,
        last_seen_at: Option<DateTime<Utc>>,
        detected_at: DateTime<Utc>,
    },
    AgvFaultReported {
        agv_code: String,
        task_id: Option<TaskJobId>,
        severity: FaultSeverity,
        message: String,
        reported_at: DateTime<Utc>,
    },
}
