// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod channel_catalog;
pub mod recommendation;
pub mod route_planner;
pub mod path_lock_manager;
pub mod dispatch;
pub mod telemetry_ingest;
pub mod health_monitor;
pub mod scheduler;
pub mod runtime;

// Re-export services for convenience
pub use channel_catalog::ChannelCatalogStore;
pub use recommendation::{RecommendationService, StandardRecommendationService};
pub use route_planner::{plan_route, PlanError, RoutePlanner, StandardRoutePlanner};
pub use path_lock_manager::{ActiveChannel, ChannelDetail, LockError, LockOutcome, PathLockManager};
pub use dispatch::{CreateJobRequest, DispatchService, ExpirySweep, StandardDispatchService, TickReport};
pub use telemetry_ingest::TelemetryIngestService;
pub use health_monitor::{AgvHealthMonitor, HealthSweep};
pub use scheduler::DispatchScheduler;
pub use runtime::DispatchRuntime;
