// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Path Lock Manager
//!
//! Owns the lock state of every channel and arbitrates transit permission.
//!
//! Every read-modify-write on a channel runs under that channel's own async
//! mutex, so two vehicles racing `request_lock` on the same channel can never
//! both observe it free. Work on different channels proceeds in parallel.
//!
//! `request_lock` never waits for a holder: a contested request is stored as
//! Pending and the caller is told its queue position. Waiters are promoted on
//! release and on the expiry sweep in priority-then-FIFO order
//! ([`PathLock::queue_order`]).
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Collaborators:** `PathLockRepository`, `TaskJobRepository` (orphan
//!   detection), `ChannelCatalogStore`, `EventBus`

use crate::application::channel_catalog::ChannelCatalogStore;
use crate::domain::agv::AgvId;
use crate::domain::channel::{Channel, ChannelKey, ChannelSharing};
use crate::domain::errors::DispatchError;
use crate::domain::events::LockEvent;
use crate::domain::path_lock::{LockRequest, LockTransitionError, PathLock, PathLockStatus};
use crate::domain::repository::{PathLockRepository, RepositoryError, TaskJobRepository};
use crate::domain::task_job::{TaskJobId, TaskJobStatus};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("channel {0} is not in the channel catalog")]
    UnknownChannel(ChannelKey),

    #[error("AGV {agv} holds no approved lock on channel {channel}")]
    NotHolder { channel: ChannelKey, agv: AgvId },

    #[error(transparent)]
    Transition(#[from] LockTransitionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<LockError> for DispatchError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::UnknownChannel(key) => {
                DispatchError::Misconfiguration(format!("channel {key} is not configured"))
            }
            LockError::NotHolder { .. } => DispatchError::InvalidRequest(err.to_string()),
            LockError::Transition(e) => DispatchError::Misconfiguration(e.to_string()),
            LockError::Repository(e) => DispatchError::Repository(e),
        }
    }
}

/// Result of a lock request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LockOutcome {
    Approved(PathLock),
    /// Queued behind the current holder; `position` is 1-based.
    Pending { lock: PathLock, position: usize },
}

impl LockOutcome {
    pub fn lock(&self) -> &PathLock {
        match self {
            LockOutcome::Approved(lock) | LockOutcome::Pending { lock, .. } => lock,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, LockOutcome::Approved(_))
    }
}

/// A channel with at least one approved holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveChannel {
    pub key: ChannelKey,
    pub agv_count: usize,
    pub holders: Vec<String>,
    pub waiting: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelLockView {
    #[serde(flatten)]
    pub lock: PathLock,
    pub task_status: Option<TaskJobStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDetail {
    pub channel: Channel,
    pub locks: Vec<ChannelLockView>,
}

pub struct PathLockManager {
    locks: Arc<dyn PathLockRepository>,
    jobs: Arc<dyn TaskJobRepository>,
    catalog: Arc<ChannelCatalogStore>,
    event_bus: Arc<EventBus>,
    guards: DashMap<ChannelKey, Arc<Mutex<()>>>,
}

fn compatible(channel: &Channel, holders: &[PathLock], candidate: &PathLock) -> bool {
    match channel.sharing {
        ChannelSharing::Exclusive => holders.is_empty(),
        ChannelSharing::SameDirection => holders.iter().all(|h| h.heading() == candidate.heading()),
    }
}

fn split_active(active: Vec<PathLock>) -> (Vec<PathLock>, Vec<PathLock>) {
    let (holders, mut waiting): (Vec<_>, Vec<_>) = active
        .into_iter()
        .partition(|l| l.status == PathLockStatus::Approved);
    waiting.sort_by(PathLock::queue_order);
    (holders, waiting)
}

impl PathLockManager {
    pub fn new(
        locks: Arc<dyn PathLockRepository>,
        jobs: Arc<dyn TaskJobRepository>,
        catalog: Arc<ChannelCatalogStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            locks,
            jobs,
            catalog,
            event_bus,
            guards: DashMap::new(),
        }
    }

    fn guard(&self, key: &ChannelKey) -> Arc<Mutex<()>> {
        self.guards
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn resolve(&self, key: &ChannelKey) -> Result<Channel, LockError> {
        self.catalog
            .snapshot()
            .channel(key)
            .cloned()
            .ok_or_else(|| LockError::UnknownChannel(key.clone()))
    }

    pub async fn request_lock(&self, request: LockRequest) -> Result<LockOutcome, LockError> {
        self.request_lock_at(request, Utc::now()).await
    }

    /// Request transit permission on a channel as of `now`.
    ///
    /// Returns the existing lock when the same AGV already holds the channel,
    /// and never files a second Pending entry for an AGV already queued.
    pub async fn request_lock_at(
        &self,
        request: LockRequest,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, LockError> {
        let channel = self.resolve(&request.channel)?;
        let guard = self.guard(&channel.key);
        let _serialized = guard.lock().await;

        let (holders, mut waiting) =
            split_active(self.locks.find_active_by_channel(&channel.key).await?);

        if let Some(existing) = holders.iter().find(|l| l.agv_id == request.agv_id) {
            metrics::counter!("agv_dispatch_lock_requests_total", "outcome" => "reentrant").increment(1);
            debug!(channel = %channel.key, agv = %request.agv_code, "AGV already holds channel");
            return Ok(LockOutcome::Approved(existing.clone()));
        }

        let (mut lock, is_new) = match waiting.iter().position(|l| l.agv_id == request.agv_id) {
            Some(index) => (waiting.remove(index), false),
            None => (PathLock::pending(request, now), true),
        };
        let position = waiting
            .iter()
            .filter(|w| PathLock::queue_order(w, &lock).is_lt())
            .count()
            + 1;

        if position == 1 && compatible(&channel, &holders, &lock) {
            lock.approve(now, channel.timeout_minutes)?;
            self.locks.save(&lock).await?;
            metrics::counter!("agv_dispatch_lock_requests_total", "outcome" => "approved").increment(1);
            info!(
                channel = %channel.key,
                agv = %lock.agv_code,
                task_id = %lock.task_id,
                "Lock approved"
            );
            if is_new {
                self.event_bus.publish_lock_event(LockEvent::LockApproved {
                    lock_id: lock.id,
                    channel: lock.channel.clone(),
                    agv_code: lock.agv_code.clone(),
                    task_id: lock.task_id,
                    expire_at: lock.expire_at,
                });
            } else {
                self.publish_promoted(&lock, now);
            }
            return Ok(LockOutcome::Approved(lock));
        }

        if is_new {
            self.locks.save(&lock).await?;
            metrics::counter!("agv_dispatch_lock_requests_total", "outcome" => "queued").increment(1);
            info!(
                channel = %channel.key,
                agv = %lock.agv_code,
                task_id = %lock.task_id,
                position,
                holders = holders.len(),
                "Lock contested, request queued"
            );
            self.event_bus.publish_lock_event(LockEvent::LockQueued {
                lock_id: lock.id,
                channel: lock.channel.clone(),
                agv_code: lock.agv_code.clone(),
                task_id: lock.task_id,
                queue_position: position,
            });
        } else {
            metrics::counter!("agv_dispatch_lock_requests_total", "outcome" => "still_queued").increment(1);
            debug!(channel = %channel.key, agv = %lock.agv_code, position, "Lock still contested");
        }
        Ok(LockOutcome::Pending { lock, position })
    }

    /// Release the AGV's approved lock on `channel` and promote waiters.
    pub async fn release_lock(&self, channel: &ChannelKey, agv_id: AgvId) -> Result<PathLock, LockError> {
        let guard = self.guard(channel);
        let _serialized = guard.lock().await;
        let now = Utc::now();

        let mut lock = self
            .locks
            .find_active_by_channel(channel)
            .await?
            .into_iter()
            .find(|l| l.agv_id == agv_id && l.status == PathLockStatus::Approved)
            .ok_or_else(|| LockError::NotHolder {
                channel: channel.clone(),
                agv: agv_id,
            })?;

        self.release_one(&mut lock, now).await?;
        self.promote_waiters(channel, now).await?;
        Ok(lock)
    }

    /// Release every approved lock and reject every pending request of a task.
    /// Returns the number of approved locks released.
    pub async fn release_all_for_task(&self, task_id: TaskJobId, reason: &str) -> Result<usize, LockError> {
        let locks = self.locks.find_active_by_task(task_id).await?;
        self.release_set(locks, reason).await
    }

    /// Release every approved lock and reject every pending request of an AGV.
    pub async fn clear_agv_locks(&self, agv_id: AgvId, reason: &str) -> Result<usize, LockError> {
        let locks = self.locks.find_active_by_agv(agv_id).await?;
        let released = self.release_set(locks, reason).await?;
        if released > 0 {
            info!(agv_id = %agv_id, released, "Cleared AGV locks");
        }
        Ok(released)
    }

    async fn release_set(&self, locks: Vec<PathLock>, reason: &str) -> Result<usize, LockError> {
        let ids: HashSet<_> = locks.iter().map(|l| l.id).collect();
        let channels: BTreeSet<ChannelKey> = locks.into_iter().map(|l| l.channel).collect();
        let mut released = 0;

        for channel in channels {
            let guard = self.guard(&channel);
            let _serialized = guard.lock().await;
            let now = Utc::now();

            // Re-read under the guard; a promotion may have happened meanwhile.
            for mut lock in self.locks.find_active_by_channel(&channel).await? {
                if !ids.contains(&lock.id) {
                    continue;
                }
                match lock.status {
                    PathLockStatus::Approved => {
                        self.release_one(&mut lock, now).await?;
                        released += 1;
                    }
                    PathLockStatus::Pending => self.reject_one(&mut lock, reason, now).await?,
                    _ => {}
                }
            }
            self.promote_waiters(&channel, now).await?;
        }
        Ok(released)
    }

    pub async fn expire_stale_locks(&self) -> Result<Vec<PathLock>, LockError> {
        self.expire_stale_locks_at(Utc::now()).await
    }

    /// Force-expire every approved lock whose lease ended before `now`, then
    /// promote waiters on the freed channels.
    pub async fn expire_stale_locks_at(&self, now: DateTime<Utc>) -> Result<Vec<PathLock>, LockError> {
        let channels: BTreeSet<ChannelKey> = self
            .locks
            .find_by_status(PathLockStatus::Approved)
            .await?
            .into_iter()
            .filter(|l| l.is_stale(now))
            .map(|l| l.channel)
            .collect();

        let mut expired = Vec::new();
        for channel in channels {
            let guard = self.guard(&channel);
            let _serialized = guard.lock().await;

            for mut lock in self.locks.find_active_by_channel(&channel).await? {
                if !lock.is_stale(now) {
                    continue;
                }
                lock.expire(now)?;
                self.locks.save(&lock).await?;
                metrics::counter!("agv_dispatch_locks_expired_total").increment(1);
                warn!(
                    channel = %lock.channel,
                    agv = %lock.agv_code,
                    task_id = %lock.task_id,
                    approved_at = ?lock.approved_at,
                    "Lock lease expired, channel force-freed"
                );
                self.event_bus.publish_lock_event(LockEvent::LockExpired {
                    lock_id: lock.id,
                    channel: lock.channel.clone(),
                    agv_code: lock.agv_code.clone(),
                    task_id: lock.task_id,
                    expired_at: now,
                });
                expired.push(lock);
            }
            self.promote_waiters(&channel, now).await?;
        }

        let approved = self.locks.find_by_status(PathLockStatus::Approved).await?.len();
        metrics::gauge!("agv_dispatch_active_locks").set(approved as f64);
        Ok(expired)
    }

    /// Approved and pending locks, ordered by channel then request time.
    pub async fn list_active_locks(&self) -> Result<Vec<PathLock>, LockError> {
        let mut locks = self.locks.find_by_status(PathLockStatus::Approved).await?;
        locks.extend(self.locks.find_by_status(PathLockStatus::Pending).await?);
        locks.sort_by(|a, b| {
            a.channel
                .cmp(&b.channel)
                .then_with(|| a.requested_at.cmp(&b.requested_at))
        });
        Ok(locks)
    }

    pub async fn active_channels(&self) -> Result<Vec<ActiveChannel>, LockError> {
        let mut by_channel: BTreeMap<ChannelKey, (BTreeSet<String>, usize)> = BTreeMap::new();
        for lock in self.list_active_locks().await? {
            match lock.status {
                PathLockStatus::Approved => {
                    by_channel.entry(lock.channel).or_default().0.insert(lock.agv_code);
                }
                PathLockStatus::Pending => {
                    if let Some(entry) = by_channel.get_mut(&lock.channel) {
                        entry.1 += 1;
                    }
                }
                _ => {}
            }
        }

        Ok(by_channel
            .into_iter()
            .map(|(key, (holders, waiting))| ActiveChannel {
                key,
                agv_count: holders.len(),
                holders: holders.into_iter().collect(),
                waiting,
            })
            .collect())
    }

    pub async fn channel_detail(&self, key: &ChannelKey) -> Result<ChannelDetail, LockError> {
        let channel = self.resolve(key)?;
        let mut locks = Vec::new();
        for lock in self.locks.find_active_by_channel(key).await? {
            let task_status = self.jobs.find_by_id(lock.task_id).await?.map(|j| j.status);
            locks.push(ChannelLockView { lock, task_status });
        }
        Ok(ChannelDetail { channel, locks })
    }

    /// Operator release of a channel. Only locks whose task already ended in
    /// Cancelled or Failed (or no longer exists) are released.
    pub async fn release_channel(&self, key: &ChannelKey) -> Result<usize, LockError> {
        let guard = self.guard(key);
        let _serialized = guard.lock().await;
        let now = Utc::now();
        let mut released = 0;

        for mut lock in self.locks.find_active_by_channel(key).await? {
            if lock.status != PathLockStatus::Approved {
                continue;
            }
            let orphaned = match self.jobs.find_by_id(lock.task_id).await? {
                Some(job) => matches!(job.status, TaskJobStatus::Cancelled | TaskJobStatus::Failed),
                None => true,
            };
            if orphaned {
                self.release_one(&mut lock, now).await?;
                released += 1;
            }
        }
        if released > 0 {
            warn!(channel = %key, released, "Released orphaned locks");
            self.promote_waiters(key, now).await?;
        }
        Ok(released)
    }

    async fn release_one(&self, lock: &mut PathLock, now: DateTime<Utc>) -> Result<(), LockError> {
        lock.release(now)?;
        self.locks.save(lock).await?;
        info!(channel = %lock.channel, agv = %lock.agv_code, task_id = %lock.task_id, "Lock released");
        self.event_bus.publish_lock_event(LockEvent::LockReleased {
            lock_id: lock.id,
            channel: lock.channel.clone(),
            agv_code: lock.agv_code.clone(),
            task_id: lock.task_id,
            released_at: now,
        });
        Ok(())
    }

    async fn reject_one(&self, lock: &mut PathLock, reason: &str, now: DateTime<Utc>) -> Result<(), LockError> {
        lock.reject(reason, now)?;
        self.locks.save(lock).await?;
        debug!(channel = %lock.channel, agv = %lock.agv_code, reason, "Pending lock rejected");
        self.event_bus.publish_lock_event(LockEvent::LockRejected {
            lock_id: lock.id,
            channel: lock.channel.clone(),
            agv_code: lock.agv_code.clone(),
            task_id: lock.task_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn publish_promoted(&self, lock: &PathLock, now: DateTime<Utc>) {
        self.event_bus.publish_lock_event(LockEvent::LockPromoted {
            lock_id: lock.id,
            channel: lock.channel.clone(),
            agv_code: lock.agv_code.clone(),
            task_id: lock.task_id,
            waited_ms: (now - lock.requested_at).num_milliseconds(),
        });
    }

    /// Grant waiters in queue order while they are compatible with the
    /// current holders. Caller must hold the channel guard.
    async fn promote_waiters(&self, key: &ChannelKey, now: DateTime<Utc>) -> Result<Vec<PathLock>, LockError> {
        let (mut holders, waiting) = split_active(self.locks.find_active_by_channel(key).await?);

        let Ok(channel) = self.resolve(key) else {
            for mut lock in waiting {
                self.reject_one(&mut lock, "channel no longer configured", now).await?;
            }
            return Ok(Vec::new());
        };

        let mut promoted = Vec::new();
        for mut lock in waiting {
            if !compatible(&channel, &holders, &lock) {
                break;
            }
            lock.approve(now, channel.timeout_minutes)?;
            self.locks.save(&lock).await?;
            metrics::counter!("agv_dispatch_lock_requests_total", "outcome" => "promoted").increment(1);
            info!(
                channel = %key,
                agv = %lock.agv_code,
                task_id = %lock.task_id,
                priority = lock.task_priority,
                "Pending lock promoted"
            );
            self.publish_promoted(&lock, now);
            holders.push(lock.clone());
            promoted.push(lock);
        }
        Ok(promoted)
    }
}
