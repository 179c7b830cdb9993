// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PathLock Entity
//!
//! One vehicle's claim on one channel.
//!
//! ```text
//! Pending ──▶ Approved ──▶ Released
//!    │            └──────▶ Expired
//!    └──▶ Rejected
//! ```
//!
//! Released, Rejected and Expired are terminal. Transitions are driven only by
//! `PathLockManager`; this type enforces their legality.

use crate::domain::agv::AgvId;
use crate::domain::channel::ChannelKey;
use crate::domain::task_job::TaskJobId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathLockId(pub Uuid);

impl PathLockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PathLockId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathLockStatus {
    Pending,
    Approved,
    Rejected,
    Released,
    Expired,
}

impl PathLockStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PathLockStatus::Rejected | PathLockStatus::Released | PathLockStatus::Expired
        )
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("path lock cannot move from {from:?} to {to:?}")]
pub struct LockTransitionError {
    pub from: PathLockStatus,
    pub to: PathLockStatus,
}

/// Everything needed to file a claim on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub channel: ChannelKey,
    /// Station where the vehicle enters the channel.
    pub from_station: String,
    /// Station where the vehicle leaves the channel.
    pub to_station: String,
    pub agv_id: AgvId,
    pub agv_code: String,
    pub task_id: TaskJobId,
    pub task_priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathLock {
    pub id: PathLockId,
    pub channel: ChannelKey,
    pub from_station: String,
    pub to_station: String,
    pub agv_id: AgvId,
    pub agv_code: String,
    pub task_id: TaskJobId,
    pub task_priority: i32,
    pub status: PathLockStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
}

impl PathLock {
    pub fn pending(request: LockRequest, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: PathLockId::new(),
            channel: request.channel,
            from_station: request.from_station,
            to_station: request.to_station,
            agv_id: request.agv_id,
            agv_code: request.agv_code,
            task_id: request.task_id,
            task_priority: request.task_priority,
            status: PathLockStatus::Pending,
            requested_at,
            approved_at: None,
            released_at: None,
            rejected_reason: None,
            expire_at: None,
        }
    }

    fn transition(&mut self, expected: PathLockStatus, to: PathLockStatus) -> Result<(), LockTransitionError> {
        if self.status != expected {
            return Err(LockTransitionError { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    pub fn approve(&mut self, now: DateTime<Utc>, timeout_minutes: u32) -> Result<(), LockTransitionError> {
        self.transition(PathLockStatus::Pending, PathLockStatus::Approved)?;
        self.approved_at = Some(now);
        self.expire_at = Some(now + Duration::minutes(i64::from(timeout_minutes)));
        Ok(())
    }

    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), LockTransitionError> {
        self.transition(PathLockStatus::Approved, PathLockStatus::Released)?;
        self.released_at = Some(now);
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), LockTransitionError> {
        self.transition(PathLockStatus::Pending, PathLockStatus::Rejected)?;
        self.rejected_reason = Some(reason.into());
        self.released_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), LockTransitionError> {
        self.transition(PathLockStatus::Approved, PathLockStatus::Expired)?;
        self.released_at = Some(now);
        Ok(())
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == PathLockStatus::Approved && self.expire_at.is_some_and(|at| at <= now)
    }

    /// Entry and exit stations of the traversal this lock covers.
    pub fn heading(&self) -> (&str, &str) {
        (&self.from_station, &self.to_station)
    }

    /// Promotion order among waiters: task priority, then request time.
    pub fn queue_order(a: &PathLock, b: &PathLock) -> Ordering {
        a.task_priority
            .cmp(&b.task_priority)
            .then_with(|| a.requested_at.cmp(&b.requested_at))
            .then_with(|| a.id.0.cmp(&b.id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(priority: i32) -> LockRequest {
        LockRequest {
            channel: ChannelKey::new("S005<->S006"),
            from_station: "S005".to_string(),
            to_station: "S006".to_string(),
            agv_id: AgvId::new(),
            agv_code: "AGV01".to_string(),
            task_id: TaskJobId::new(),
            task_priority: priority,
        }
    }

    #[test]
    fn test_approve_sets_lease() {
        let now = Utc::now();
        let mut lock = PathLock::pending(request(30), now);
        lock.approve(now, 10).unwrap();

        assert_eq!(lock.expire_at, Some(now + Duration::minutes(10)));
        assert!(!lock.is_stale(now));
        assert!(lock.is_stale(now + Duration::minutes(10)));
    }

    #[test]
    fn test_terminal_lock_cannot_be_revived() {
        let now = Utc::now();
        let mut lock = PathLock::pending(request(30), now);
        lock.approve(now, 10).unwrap();
        lock.release(now).unwrap();

        assert_eq!(
            lock.approve(now, 10),
            Err(LockTransitionError {
                from: PathLockStatus::Released,
                to: PathLockStatus::Approved
            })
        );
        assert!(lock.expire(now).is_err());
    }

    #[test]
    fn test_queue_order_prefers_priority_over_age() {
        let t0 = Utc::now();
        let older = PathLock::pending(request(30), t0);
        let urgent = PathLock::pending(request(10), t0 + Duration::seconds(1));

        assert_eq!(PathLock::queue_order(&urgent, &older), Ordering::Less);
    }

    #[test]
    fn test_queue_order_is_fifo_within_priority() {
        let t0 = Utc::now();
        let first = PathLock::pending(request(30), t0);
        let second = PathLock::pending(request(30), t0 + Duration::seconds(1));

        assert_eq!(PathLock::queue_order(&first, &second), Ordering::Less);
    }
}
