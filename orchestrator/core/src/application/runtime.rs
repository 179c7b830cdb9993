// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatch Runtime - Application Layer
//!
//! Builds the full service graph over the in-memory repositories: seeds the
//! site manifest, loads the channel catalog and wires the lock manager,
//! orchestrator and telemetry ingest together. The daemon, the HTTP tests and
//! the scenario tests all start from here.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for the dispatch core

use crate::application::channel_catalog::ChannelCatalogStore;
use crate::application::dispatch::{DispatchService, StandardDispatchService};
use crate::application::health_monitor::AgvHealthMonitor;
use crate::application::path_lock_manager::PathLockManager;
use crate::application::recommendation::StandardRecommendationService;
use crate::application::route_planner::StandardRoutePlanner;
use crate::application::scheduler::DispatchScheduler;
use crate::application::telemetry_ingest::TelemetryIngestService;
use crate::domain::command::CommandDispatcher;
use crate::domain::dispatch_config::DispatchConfigSpec;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::repositories::{
    InMemoryAgvRepository, InMemoryChannelConfigRepository, InMemoryMapRepository,
    InMemoryPathLockRepository, InMemoryTaskJobRepository,
};
use crate::infrastructure::site_loader::SiteManifest;
use anyhow::{Context, Result};
use std::sync::Arc;

pub struct DispatchRuntime {
    pub agvs: Arc<InMemoryAgvRepository>,
    pub jobs: Arc<InMemoryTaskJobRepository>,
    pub locks: Arc<InMemoryPathLockRepository>,
    pub channels: Arc<InMemoryChannelConfigRepository>,
    pub map: Arc<InMemoryMapRepository>,
    pub event_bus: Arc<EventBus>,
    pub catalog: Arc<ChannelCatalogStore>,
    pub lock_manager: Arc<PathLockManager>,
    pub dispatch: Arc<dyn DispatchService>,
    pub telemetry: Arc<TelemetryIngestService>,
    spec: DispatchConfigSpec,
}

impl DispatchRuntime {
    pub async fn in_memory(
        spec: &DispatchConfigSpec,
        site: Option<&SiteManifest>,
        commands: Arc<dyn CommandDispatcher>,
    ) -> Result<Self> {
        let agvs = Arc::new(InMemoryAgvRepository::new());
        let jobs = Arc::new(InMemoryTaskJobRepository::new());
        let locks = Arc::new(InMemoryPathLockRepository::new());
        let channels = Arc::new(InMemoryChannelConfigRepository::new());
        let map = Arc::new(InMemoryMapRepository::default());
        let event_bus = Arc::new(EventBus::with_default_capacity());

        if let Some(site) = site {
            site.seed(&map, channels.as_ref(), agvs.as_ref()).await?;
        }

        let catalog = Arc::new(
            ChannelCatalogStore::load(channels.clone(), spec.locks.default_timeout_minutes)
                .await
                .context("Failed to build channel catalog")?,
        );
        let lock_manager = Arc::new(PathLockManager::new(
            locks.clone(),
            jobs.clone(),
            catalog.clone(),
            event_bus.clone(),
        ));
        let recommender = Arc::new(StandardRecommendationService::new(
            agvs.clone(),
            map.clone(),
            spec.recommendation.weights,
            spec.recommendation.min_battery_percent,
        ));
        let planner = Arc::new(StandardRoutePlanner::new(map.clone(), catalog.clone()));
        let dispatch: Arc<dyn DispatchService> = Arc::new(StandardDispatchService::new(
            jobs.clone(),
            agvs.clone(),
            map.clone(),
            recommender,
            planner,
            lock_manager.clone(),
            commands,
            event_bus.clone(),
        ));
        let telemetry = Arc::new(TelemetryIngestService::new(
            agvs.clone(),
            dispatch.clone(),
            event_bus.clone(),
        ));

        Ok(Self {
            agvs,
            jobs,
            locks,
            channels,
            map,
            event_bus,
            catalog,
            lock_manager,
            dispatch,
            telemetry,
            spec: spec.clone(),
        })
    }

    pub fn scheduler(&self) -> DispatchScheduler {
        DispatchScheduler::new(self.dispatch.clone(), self.spec.scheduler.clone())
    }

    pub fn health_monitor(&self) -> AgvHealthMonitor {
        AgvHealthMonitor::new(
            self.agvs.clone(),
            self.jobs.clone(),
            self.dispatch.clone(),
            self.lock_manager.clone(),
            self.event_bus.clone(),
            self.spec.health.clone(),
        )
    }
}
