// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AGV Health Monitor - Background task for silent vehicles
//!
//! Periodically marks vehicles Offline when they stop reporting telemetry,
//! cancels their active jobs and clears any locks they still hold so that
//! the channels they occupied become available again.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Detect silent vehicles and recover their resources

use crate::application::dispatch::DispatchService;
use crate::application::path_lock_manager::PathLockManager;
use crate::domain::agv::{Agv, AgvStatus};
use crate::domain::dispatch_config::HealthConfig;
use crate::domain::errors::DispatchError;
use crate::domain::events::AgvEvent;
use crate::domain::repository::{update_agv, AgvRepository, TaskJobRepository};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one health sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSweep {
    pub went_offline: usize,
    pub jobs_cancelled: usize,
    pub locks_cleared: usize,
}

pub struct AgvHealthMonitor {
    agvs: Arc<dyn AgvRepository>,
    jobs: Arc<dyn TaskJobRepository>,
    dispatch: Arc<dyn DispatchService>,
    locks: Arc<PathLockManager>,
    event_bus: Arc<EventBus>,
    config: HealthConfig,
    shutdown_token: CancellationToken,
}

impl AgvHealthMonitor {
    pub fn new(
        agvs: Arc<dyn AgvRepository>,
        jobs: Arc<dyn TaskJobRepository>,
        dispatch: Arc<dyn DispatchService>,
        locks: Arc<PathLockManager>,
        event_bus: Arc<EventBus>,
        config: HealthConfig,
    ) -> Self {
        Self {
            agvs,
            jobs,
            dispatch,
            locks,
            event_bus,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("AGV health monitor is disabled");
            return;
        }

        info!(
            offline_threshold_secs = self.config.offline_threshold.as_secs(),
            check_interval_secs = self.config.check_interval.as_secs(),
            "Starting AGV health monitor"
        );

        let mut tick = interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(sweep) if sweep.went_offline > 0 => {
                            info!(
                                went_offline = sweep.went_offline,
                                jobs_cancelled = sweep.jobs_cancelled,
                                locks_cleared = sweep.locks_cleared,
                                "Health sweep marked vehicles offline"
                            );
                        }
                        Ok(_) => debug!("Health sweep found no silent vehicles"),
                        Err(e) => warn!("Health sweep failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping AGV health monitor");
                    break;
                }
            }
        }

        info!("AGV health monitor stopped");
    }

    /// Run one check as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<HealthSweep, DispatchError> {
        let mut sweep = HealthSweep::default();
        let threshold_secs = self.config.offline_threshold.as_secs();

        let threshold = self.config.offline_threshold;
        let silent = |agv: &Agv| agv.status != AgvStatus::Offline && agv.is_silent(threshold, now);

        for listed in self.agvs.list_all().await? {
            if !silent(&listed) {
                continue;
            }

            // A report may land between the listing and the write; re-check
            // against the copy being saved.
            let mut previous = None;
            let agv = update_agv(self.agvs.as_ref(), listed.id, |agv| {
                previous = None;
                if !silent(agv) {
                    return false;
                }
                previous = Some(agv.status);
                agv.mark_offline();
                true
            })
            .await?;
            let Some(previous) = previous else {
                debug!(agv = %agv.code, "AGV reported before going offline");
                continue;
            };
            sweep.went_offline += 1;
            warn!(agv = %agv.code, last_seen_at = ?agv.last_seen_at, from = ?previous, "AGV went offline");
            self.event_bus.publish_agv_event(AgvEvent::AgvWentOffline {
                agv_id: agv.id,
                agv_code: agv.code.clone(),
                last_seen_at: agv.last_seen_at,
                detected_at: now,
            });

            let reason = format!("AGV offline (no telemetry for {threshold_secs}s)");
            for job in self.jobs.find_active_by_agv(agv.id).await? {
                match self.dispatch.cancel_job(job.id, &reason).await {
                    Ok(_) => sweep.jobs_cancelled += 1,
                    Err(e) => warn!(task_id = %job.id, agv = %agv.code, "Failed to cancel job of offline AGV: {}", e),
                }
            }

            sweep.locks_cleared += self.locks.clear_agv_locks(agv.id, &reason).await?;
        }
        Ok(sweep)
    }
}
