// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatch Scheduler - Background task driving the orchestrator
//!
//! Runs the dispatch tick (assignment, start, lock retries) on a short
//! interval and the lock expiry sweep on a longer one. Ticks never block on
//! lock contention; a contested request is simply retried on the next tick.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic driver for `DispatchService`

use crate::application::dispatch::DispatchService;
use crate::domain::dispatch_config::SchedulerConfig;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct DispatchScheduler {
    dispatch: Arc<dyn DispatchService>,
    config: SchedulerConfig,
    shutdown_token: CancellationToken,
}

impl DispatchScheduler {
    pub fn new(dispatch: Arc<dyn DispatchService>, config: SchedulerConfig) -> Self {
        Self {
            dispatch,
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
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            expiry_sweep_secs = self.config.expiry_sweep_interval.as_secs(),
            "Starting dispatch scheduler"
        );

        let mut tick = interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = interval(self.config.expiry_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.dispatch.tick().await {
                        Ok(report) => debug!(?report, "Dispatch tick"),
                        Err(e) => warn!("Dispatch tick failed: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    match self.dispatch.sweep_expired_locks().await {
                        Ok(result) if result.expired_locks > 0 => {
                            warn!(
                                expired_locks = result.expired_locks,
                                failed_jobs = result.failed_jobs,
                                "Lock expiry sweep freed channels"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Lock expiry sweep failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping dispatch scheduler");
                    break;
                }
            }
        }

        info!("Dispatch scheduler stopped");
    }
}
