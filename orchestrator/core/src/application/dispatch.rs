// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Dispatch Orchestrator
//!
//! Drives every job through its lifecycle and is the only writer of
//! `TaskJob::status` and `Agv::current_task_id`.
//!
//! ```text
//! Pending ──▶ Assigned ──▶ Executing ──▶ Completed
//!    │            │             │
//!    └────────────┴─────────────┴──▶ Cancelled / Failed
//! ```
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Job state machine, vehicle assignment, route lock
//!   lookahead, outbound commands
//! - **Collaborators:**
//!   - Domain: TaskJob, Agv, PlannedRoute aggregates
//!   - Application: RecommendationService, RoutePlanner, PathLockManager
//!   - Infrastructure: TaskJobRepository, AgvRepository, MapRepository,
//!     CommandDispatcher, EventBus
//!
//! # Concurrency
//!
//! Operations on one job run under that job's async mutex. Work on different
//! jobs interleaves freely; the only cross-job resource is channel lock state,
//! which the lock manager serializes per channel. Persistence uses optimistic
//! versioning: a conflicting job write is reloaded and retried once, and
//! vehicle writes go through `update_agv`, which re-applies the change to the
//! fresh copy. Assignment claims the vehicle before recording the job and
//! releases it again if the job write fails.
//!
//! # Lock lookahead
//!
//! A vehicle standing at checkpoint `i` needs the channel covering hop
//! `i -> i+1` before it departs. Channels are requested one departure at a
//! time; a vehicle never holds a channel further ahead than its next hop.

use crate::application::path_lock_manager::{LockError, LockOutcome, PathLockManager};
use crate::application::recommendation::RecommendationService;
use crate::application::route_planner::{PlanError, RoutePlanner};
use crate::domain::agv::AgvId;
use crate::domain::channel::ChannelKey;
use crate::domain::command::{CommandAction, CommandDispatcher, DispatchCommand};
use crate::domain::errors::DispatchError;
use crate::domain::events::TaskEvent;
use crate::domain::path_lock::{LockRequest, PathLock};
use crate::domain::recommendation::AgvRecommendation;
use crate::domain::repository::{
    update_agv, AgvRepository, MapRepository, RepositoryError, TaskJobRepository,
};
use crate::domain::route::PlannedRoute;
use crate::domain::task_job::{
    JobQuery, TaskJob, TaskJobId, TaskJobStatus, TaskJobType, TaskTransitionError, DEFAULT_PRIORITY,
    MAX_PRIORITY, MIN_PRIORITY,
};
use crate::domain::telemetry::TaskProgressReport;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Job intake request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: TaskJobType,
    pub start_station: String,
    pub end_station: String,
    /// 10 (most urgent) to 50; defaults to 30
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

/// What one scheduling tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub assigned: usize,
    pub started: usize,
    pub resumed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait DispatchService: Send + Sync {
    async fn create_job(&self, request: CreateJobRequest) -> Result<TaskJob, DispatchError>;

    /// Cancel a non-terminal job. Every lock the job holds is released
    /// before this returns.
    async fn cancel_job(&self, id: TaskJobId, reason: &str) -> Result<TaskJob, DispatchError>;

    async fn fail_job(&self, id: TaskJobId, reason: &str) -> Result<TaskJob, DispatchError>;

    async fn get_job_status(&self, id: TaskJobId) -> Result<TaskJob, DispatchError>;

    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<TaskJob>, DispatchError>;

    async fn list_active_locks(&self) -> Result<Vec<PathLock>, DispatchError>;

    async fn recommendations(&self, id: TaskJobId) -> Result<Vec<AgvRecommendation>, DispatchError>;

    /// Apply a task-progress report from the vehicle
    async fn handle_progress_report(&self, report: TaskProgressReport) -> Result<TaskJob, DispatchError>;

    /// One scheduling pass: assignment, start, lock retries
    async fn tick(&self) -> Result<TickReport, DispatchError>;

    /// Force-expire overdue locks and fail the jobs that still owned them
    async fn sweep_expired_locks(&self) -> Result<ExpirySweep, DispatchError>;
}

/// What one lock expiry sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySweep {
    pub expired_locks: usize,
    pub failed_jobs: usize,
}

/// Result of asking for the channel ahead of the vehicle
enum Departure {
    /// No channel needed, or already held
    Clear,
    Granted(ChannelKey),
    Waiting(ChannelKey),
}

enum Termination {
    Cancel,
    Fail,
}

fn sequence_at(route: &PlannedRoute, index: usize) -> u32 {
    route.checkpoints.get(index).map(|c| c.sequence).unwrap_or_default()
}

pub struct StandardDispatchService {
    jobs: Arc<dyn TaskJobRepository>,
    agvs: Arc<dyn AgvRepository>,
    map: Arc<dyn MapRepository>,
    recommender: Arc<dyn RecommendationService>,
    planner: Arc<dyn RoutePlanner>,
    locks: Arc<PathLockManager>,
    commands: Arc<dyn CommandDispatcher>,
    event_bus: Arc<EventBus>,
    job_guards: DashMap<TaskJobId, Arc<Mutex<()>>>,
    fleet_guard: Mutex<()>,
}

impl StandardDispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn TaskJobRepository>,
        agvs: Arc<dyn AgvRepository>,
        map: Arc<dyn MapRepository>,
        recommender: Arc<dyn RecommendationService>,
        planner: Arc<dyn RoutePlanner>,
        locks: Arc<PathLockManager>,
        commands: Arc<dyn CommandDispatcher>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            jobs,
            agvs,
            map,
            recommender,
            planner,
            locks,
            commands,
            event_bus,
            job_guards: DashMap::new(),
            fleet_guard: Mutex::new(()),
        }
    }

    fn guard(&self, id: TaskJobId) -> Arc<Mutex<()>> {
        self.job_guards
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop guards nobody holds or waits on. A later operation on the same
    /// job recreates its guard.
    fn prune_guards(&self) {
        self.job_guards.retain(|_, guard| Arc::strong_count(guard) > 1);
    }

    #[cfg(test)]
    fn tracked_guards(&self) -> usize {
        self.job_guards.len()
    }

    async fn load(&self, id: TaskJobId) -> Result<TaskJob, DispatchError> {
        self.jobs
            .find_by_id(id)
            .await?
            .ok_or(DispatchError::JobNotFound(id))
    }

    /// Load, mutate and write back a job with a version check. A conflicting
    /// write is reloaded and the mutation re-applied once.
    async fn update_job<F>(&self, id: TaskJobId, mutate: F) -> Result<TaskJob, DispatchError>
    where
        F: Fn(&mut TaskJob) -> Result<(), TaskTransitionError> + Send + Sync,
    {
        for attempt in 0..2 {
            let mut job = self.load(id).await?;
            let expected = job.version;
            mutate(&mut job)?;
            match self.jobs.update(&job, expected).await {
                Ok(()) => return Ok(job),
                Err(RepositoryError::Conflict(detail)) if attempt == 0 => {
                    warn!(task_id = %id, %detail, "Job modified concurrently, retrying once");
                }
                Err(RepositoryError::Conflict(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(DispatchError::ConcurrentModification(id))
    }

    async fn send(&self, agv_code: &str, task_id: TaskJobId, action: CommandAction) {
        if let Err(e) = self
            .commands
            .dispatch(DispatchCommand::new(agv_code, task_id, action))
            .await
        {
            warn!(agv = %agv_code, task_id = %task_id, "Failed to dispatch command: {}", e);
        }
    }

    async fn detach_agv(&self, job: &TaskJob) -> Result<(), DispatchError> {
        let Some(agv_id) = job.assigned_agv_id else {
            return Ok(());
        };
        match update_agv(self.agvs.as_ref(), agv_id, |agv| agv.release_task(job.id)).await {
            Ok(_) | Err(RepositoryError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn assigned_agv(job: &TaskJob) -> Result<(AgvId, String), DispatchError> {
        match (job.assigned_agv_id, &job.assigned_agv_code) {
            (Some(id), Some(code)) => Ok((id, code.clone())),
            _ => Err(DispatchError::InvalidRequest(format!("job {} has no assigned AGV", job.id))),
        }
    }

    /// Request the channel covering the hop that leaves the job's current
    /// checkpoint. Caller holds the job guard.
    async fn acquire_departure(&self, job: TaskJob) -> Result<(TaskJob, Departure), DispatchError> {
        let Some(channel) = job
            .route
            .as_ref()
            .and_then(|r| r.channel_for_departure(job.current_checkpoint))
            .cloned()
        else {
            return Ok((job, Departure::Clear));
        };
        if job.holds(&channel.key) {
            return Ok((job, Departure::Clear));
        }

        let (agv_id, agv_code) = Self::assigned_agv(&job)?;
        let outcome = self
            .locks
            .request_lock(LockRequest {
                channel: channel.key.clone(),
                from_station: channel.entry_station.clone(),
                to_station: channel.exit_station.clone(),
                agv_id,
                agv_code,
                task_id: job.id,
                task_priority: job.priority,
            })
            .await?;

        match outcome {
            LockOutcome::Approved(_) => {
                let key = channel.key.clone();
                let job = self
                    .update_job(job.id, move |j| {
                        j.hold_channel(key.clone());
                        Ok(())
                    })
                    .await?;
                Ok((job, Departure::Granted(channel.key)))
            }
            LockOutcome::Pending { position, .. } => {
                debug!(task_id = %job.id, channel = %channel.key, position, "Waiting for channel");
                if job.waiting_on.as_ref() == Some(&channel.key) {
                    return Ok((job, Departure::Waiting(channel.key)));
                }
                let key = channel.key.clone();
                let job = self
                    .update_job(job.id, move |j| {
                        j.wait_for(key.clone());
                        Ok(())
                    })
                    .await?;
                Ok((job, Departure::Waiting(channel.key)))
            }
        }
    }

    async fn terminate(
        &self,
        id: TaskJobId,
        termination: Termination,
        reason: &str,
    ) -> Result<TaskJob, DispatchError> {
        let now = Utc::now();
        let job = match termination {
            Termination::Cancel => self.update_job(id, |j| j.cancel(reason, now)).await?,
            Termination::Fail => self.update_job(id, |j| j.fail(reason, now)).await?,
        };

        let locks_released = self.locks.release_all_for_task(id, reason).await?;
        self.detach_agv(&job).await?;
        if let Some(agv_code) = &job.assigned_agv_code {
            self.send(agv_code, id, CommandAction::Cancel { reason: reason.to_string() })
                .await;
        }

        match termination {
            Termination::Cancel => {
                info!(task_id = %id, reason, locks_released, "Job cancelled");
                metrics::counter!("agv_dispatch_jobs_total", "status" => "cancelled").increment(1);
                self.event_bus.publish_task_event(TaskEvent::JobCancelled {
                    task_id: id,
                    reason: reason.to_string(),
                    locks_released,
                    cancelled_at: now,
                });
            }
            Termination::Fail => {
                warn!(task_id = %id, reason, locks_released, "Job failed");
                metrics::counter!("agv_dispatch_jobs_total", "status" => "failed").increment(1);
                self.event_bus.publish_task_event(TaskEvent::JobFailed {
                    task_id: id,
                    reason: reason.to_string(),
                    locks_released,
                    failed_at: now,
                });
            }
        }
        Ok(job)
    }

    async fn complete(&self, id: TaskJobId) -> Result<TaskJob, DispatchError> {
        let now = Utc::now();
        let job = self.update_job(id, |j| j.complete(now)).await?;
        self.locks.release_all_for_task(id, "task completed").await?;
        self.detach_agv(&job).await?;

        info!(task_id = %id, agv = ?job.assigned_agv_code, "Job completed");
        metrics::counter!("agv_dispatch_jobs_total", "status" => "completed").increment(1);
        self.event_bus.publish_task_event(TaskEvent::JobCompleted {
            task_id: id,
            agv_code: job.assigned_agv_code.clone(),
            completed_at: now,
        });
        Ok(job)
    }

    /// Pending -> Assigned. Returns false when the job is no longer Pending
    /// or the chosen vehicle was taken in the meantime.
    async fn assign_job(&self, id: TaskJobId) -> Result<bool, DispatchError> {
        let guard = self.guard(id);
        let _job_lock = guard.lock().await;
        let _fleet_lock = self.fleet_guard.lock().await;

        let job = self.load(id).await?;
        if job.status != TaskJobStatus::Pending {
            return Ok(false);
        }

        let choice = self.recommender.select(&job).await?;

        // Claim the vehicle first: a job never points at a vehicle that does
        // not carry it.
        let mut refused = None;
        let agv = match update_agv(self.agvs.as_ref(), choice.agv_id, |agv| {
            refused = agv.assign_task(id).err();
            refused.is_none()
        })
        .await
        {
            Ok(agv) => agv,
            Err(RepositoryError::NotFound(_)) => {
                return Err(DispatchError::AgvNotFound(choice.agv_code.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(e) = refused {
            debug!(task_id = %id, "Recommended AGV no longer dispatchable: {}", e);
            return Ok(false);
        }

        let now = Utc::now();
        let (agv_id, agv_code) = (agv.id, agv.code.clone());
        if let Err(e) = self
            .update_job(id, |j| j.assign(agv_id, agv_code.clone(), now))
            .await
        {
            warn!(task_id = %id, agv = %agv.code, "Assignment not recorded, releasing AGV: {}", e);
            if let Err(rollback) =
                update_agv(self.agvs.as_ref(), agv_id, |agv| agv.release_task(id)).await
            {
                error!(task_id = %id, agv = %agv.code, "Failed to release AGV after aborted assignment: {}", rollback);
            }
            return Err(e);
        }

        info!(
            task_id = %id,
            agv = %agv.code,
            score = choice.total_score,
            reason = %choice.recommend_reason,
            "Job assigned"
        );
        metrics::counter!("agv_dispatch_jobs_total", "status" => "assigned").increment(1);
        self.event_bus.publish_task_event(TaskEvent::JobAssigned {
            task_id: id,
            agv_id: agv.id,
            agv_code: agv.code,
            total_score: choice.total_score,
            assigned_at: now,
        });
        Ok(true)
    }

    /// Assigned -> Executing. Plans the route on first call, then needs the
    /// first departure channel. Returns false while that channel is contested.
    async fn start_job(&self, id: TaskJobId) -> Result<bool, DispatchError> {
        let guard = self.guard(id);
        let _job_lock = guard.lock().await;

        let mut job = self.load(id).await?;
        if job.status != TaskJobStatus::Assigned {
            return Ok(false);
        }

        if job.route.is_none() {
            match self.planner.plan(&job.start_station, &job.end_station).await {
                Ok(route) => {
                    job = self.update_job(id, |j| j.attach_route(route.clone())).await?;
                }
                Err(e @ (PlanError::NoPathFound { .. } | PlanError::UnknownStation(_))) => {
                    let reason = DispatchError::from(e).to_string();
                    self.terminate(id, Termination::Fail, &reason).await?;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let (job, departure) = self.acquire_departure(job).await?;
        if let Departure::Waiting(channel) = departure {
            debug!(task_id = %id, channel = %channel, "Start held for first channel");
            return Ok(false);
        }

        let now = Utc::now();
        let job = self.update_job(id, |j| j.start(now)).await?;
        let (_, agv_code) = Self::assigned_agv(&job)?;
        let route = job.route.clone().ok_or(TaskTransitionError::MissingRoute)?;

        self.send(
            &agv_code,
            id,
            CommandAction::AssignRoute {
                job_type: job.job_type,
                priority: job.priority,
                checkpoints: route.checkpoints.clone(),
                permitted_until: sequence_at(&route, job.clearance_index()),
            },
        )
        .await;

        info!(
            task_id = %id,
            agv = %agv_code,
            checkpoints = route.checkpoints.len(),
            channels = route.channels.len(),
            "Job executing"
        );
        metrics::counter!("agv_dispatch_jobs_total", "status" => "executing").increment(1);
        self.event_bus.publish_task_event(TaskEvent::JobStarted {
            task_id: id,
            agv_code,
            checkpoint_count: route.checkpoints.len(),
            started_at: now,
        });
        Ok(true)
    }

    /// Retry the channel an executing vehicle is held for.
    async fn resume_job(&self, id: TaskJobId) -> Result<bool, DispatchError> {
        let guard = self.guard(id);
        let _job_lock = guard.lock().await;

        let job = self.load(id).await?;
        if job.status != TaskJobStatus::Executing || job.waiting_on.is_none() {
            return Ok(false);
        }
        let (job, departure) = self.acquire_departure(job).await?;
        let Departure::Granted(channel) = departure else {
            return Ok(false);
        };

        let (_, agv_code) = Self::assigned_agv(&job)?;
        if let Some(route) = &job.route {
            self.send(
                &agv_code,
                id,
                CommandAction::Proceed {
                    from_sequence: sequence_at(route, job.current_checkpoint),
                    to_sequence: sequence_at(route, job.clearance_index()),
                },
            )
            .await;
        }
        info!(task_id = %id, agv = %agv_code, channel = %channel, "Held vehicle cleared to proceed");
        Ok(true)
    }

    /// Advance an executing job to the checkpoint at `station_code`, release
    /// the channels now behind it and ask for the next one. Caller holds the
    /// job guard.
    async fn reach_checkpoint(&self, job: TaskJob, station_code: &str) -> Result<TaskJob, DispatchError> {
        let id = job.id;
        let route = job.route.clone().ok_or(TaskTransitionError::MissingRoute)?;
        let (agv_id, agv_code) = Self::assigned_agv(&job)?;

        let index = route
            .index_of_station(station_code, job.current_checkpoint)
            .ok_or_else(|| {
                DispatchError::InvalidRequest(format!(
                    "checkpoint {station_code} is not ahead of job {id} on its route"
                ))
            })?;
        if job.status == TaskJobStatus::Executing && index > job.clearance_index() {
            return Err(DispatchError::InvalidRequest(format!(
                "AGV {agv_code} reported {station_code} beyond its clearance at sequence {}",
                sequence_at(&route, job.clearance_index())
            )));
        }

        let vacated: Vec<ChannelKey> = route
            .channels_vacated_at(index)
            .filter(|c| job.holds(&c.key))
            .map(|c| c.key.clone())
            .collect();

        let mut job = self.update_job(id, |j| j.reach_checkpoint(index)).await?;
        for key in vacated {
            match self.locks.release_lock(&key, agv_id).await {
                Ok(_) => {}
                Err(LockError::NotHolder { .. }) => {
                    warn!(task_id = %id, channel = %key, "Vacated channel was no longer held");
                }
                Err(e) => return Err(e.into()),
            }
            job = self
                .update_job(id, |j| {
                    j.vacate_channel(&key);
                    Ok(())
                })
                .await?;
        }

        debug!(task_id = %id, station = station_code, index, progress = job.progress_percentage, "Checkpoint reached");
        self.event_bus.publish_task_event(TaskEvent::CheckpointReached {
            task_id: id,
            station_code: station_code.to_string(),
            sequence: sequence_at(&route, index),
            progress_percentage: job.progress_percentage,
            reached_at: Utc::now(),
        });

        if index == route.final_index() {
            return self.complete(id).await;
        }

        let (job, departure) = self.acquire_departure(job).await?;
        match departure {
            Departure::Granted(_) => {
                self.send(
                    &agv_code,
                    id,
                    CommandAction::Proceed {
                        from_sequence: sequence_at(&route, index),
                        to_sequence: sequence_at(&route, job.clearance_index()),
                    },
                )
                .await;
            }
            Departure::Waiting(channel) => {
                self.send(
                    &agv_code,
                    id,
                    CommandAction::Hold {
                        at_sequence: sequence_at(&route, index),
                        channel,
                    },
                )
                .await;
            }
            Departure::Clear => {}
        }
        Ok(job)
    }

    /// Route per-job failures inside a tick: structural problems fail the
    /// job, everything else is logged and retried on the next tick.
    async fn absorb(&self, id: TaskJobId, stage: &str, err: DispatchError) -> bool {
        match err {
            DispatchError::Misconfiguration(detail) => {
                error!(task_id = %id, stage, %detail, "Misconfiguration, failing job");
                match self.fail_job(id, &format!("misconfiguration: {detail}")).await {
                    Ok(_) => true,
                    Err(e) => {
                        error!(task_id = %id, "Failed to fail job: {}", e);
                        false
                    }
                }
            }
            e if e.is_retryable() => {
                debug!(task_id = %id, stage, "Retry next tick: {}", e);
                false
            }
            e => {
                warn!(task_id = %id, stage, "Tick step failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl DispatchService for StandardDispatchService {
    async fn create_job(&self, request: CreateJobRequest) -> Result<TaskJob, DispatchError> {
        let priority = request.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(DispatchError::InvalidRequest(format!(
                "priority {priority} outside {MIN_PRIORITY}..={MAX_PRIORITY}"
            )));
        }
        if request.start_station == request.end_station {
            return Err(DispatchError::InvalidRequest(format!(
                "start and end station are both {}",
                request.start_station
            )));
        }
        for station in [&request.start_station, &request.end_station] {
            if self.map.find_station(station).await?.is_none() {
                return Err(DispatchError::InvalidRequest(format!("unknown station {station}")));
            }
        }

        let mut job = TaskJob::new(
            request.job_type,
            request.start_station,
            request.end_station,
            priority,
        );
        job.description = request.description;
        self.jobs.insert(&job).await?;

        info!(
            task_id = %job.id,
            job_type = ?job.job_type,
            start = %job.start_station,
            end = %job.end_station,
            priority,
            "Job created"
        );
        metrics::counter!("agv_dispatch_jobs_total", "status" => "pending").increment(1);
        self.event_bus.publish_task_event(TaskEvent::JobCreated {
            task_id: job.id,
            job_type: job.job_type,
            start_station: job.start_station.clone(),
            end_station: job.end_station.clone(),
            priority,
            created_at: job.created_at,
        });
        Ok(job)
    }

    async fn cancel_job(&self, id: TaskJobId, reason: &str) -> Result<TaskJob, DispatchError> {
        let guard = self.guard(id);
        let _job_lock = guard.lock().await;
        self.terminate(id, Termination::Cancel, reason).await
    }

    async fn fail_job(&self, id: TaskJobId, reason: &str) -> Result<TaskJob, DispatchError> {
        let guard = self.guard(id);
        let _job_lock = guard.lock().await;
        self.terminate(id, Termination::Fail, reason).await
    }

    async fn get_job_status(&self, id: TaskJobId) -> Result<TaskJob, DispatchError> {
        self.load(id).await
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<TaskJob>, DispatchError> {
        Ok(query.apply(self.jobs.list_all().await?))
    }

    async fn list_active_locks(&self) -> Result<Vec<PathLock>, DispatchError> {
        Ok(self.locks.list_active_locks().await?)
    }

    async fn recommendations(&self, id: TaskJobId) -> Result<Vec<AgvRecommendation>, DispatchError> {
        let job = self.load(id).await?;
        self.recommender.recommend(job.job_type, &job.start_station).await
    }

    async fn handle_progress_report(&self, report: TaskProgressReport) -> Result<TaskJob, DispatchError> {
        let id = report.task_id;
        let guard = self.guard(id);
        let _job_lock = guard.lock().await;

        let mut job = self.load(id).await?;
        if job.assigned_agv_code.as_deref() != Some(report.agv_code.as_str()) {
            return Err(DispatchError::InvalidRequest(format!(
                "AGV {} is not assigned to job {}",
                report.agv_code, id
            )));
        }

        if let Some(station) = &report.checkpoint {
            job = self.reach_checkpoint(job, station).await?;
        }

        let message = report.message.as_deref();
        match report.status {
            Some(TaskJobStatus::Completed) if job.status == TaskJobStatus::Executing => {
                job = self.complete(id).await?;
            }
            Some(TaskJobStatus::Failed) if !job.status.is_terminal() => {
                let reason = message.unwrap_or("failure reported by AGV");
                job = self.terminate(id, Termination::Fail, reason).await?;
            }
            Some(TaskJobStatus::Cancelled) if !job.status.is_terminal() => {
                let reason = message.unwrap_or("cancelled by AGV");
                job = self.terminate(id, Termination::Cancel, reason).await?;
            }
            _ => {}
        }

        if let Some(percentage) = report.progress_percentage {
            if job.clone().report_progress(percentage) {
                job = self
                    .update_job(id, |j| {
                        j.report_progress(percentage);
                        Ok(())
                    })
                    .await?;
            }
        }
        Ok(job)
    }

    async fn tick(&self) -> Result<TickReport, DispatchError> {
        let mut report = TickReport::default();
        metrics::counter!("agv_dispatch_scheduler_ticks_total").increment(1);

        let by_priority = |mut jobs: Vec<TaskJob>| {
            jobs.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
            jobs
        };

        for job in by_priority(self.jobs.find_by_status(&[TaskJobStatus::Pending]).await?) {
            match self.assign_job(job.id).await {
                Ok(true) => report.assigned += 1,
                Ok(false) => {}
                Err(DispatchError::NoAvailableAgv(_)) => {
                    debug!(task_id = %job.id, "No AGV available, job stays pending");
                    break;
                }
                Err(e) => {
                    if self.absorb(job.id, "assign", e).await {
                        report.failed += 1;
                    }
                }
            }
        }

        for job in by_priority(self.jobs.find_by_status(&[TaskJobStatus::Assigned]).await?) {
            match self.start_job(job.id).await {
                Ok(true) => report.started += 1,
                Ok(false) => {}
                Err(e) => {
                    if self.absorb(job.id, "start", e).await {
                        report.failed += 1;
                    }
                }
            }
        }

        let waiting: Vec<TaskJob> = self
            .jobs
            .find_by_status(&[TaskJobStatus::Executing])
            .await?
            .into_iter()
            .filter(|j| j.waiting_on.is_some())
            .collect();
        for job in by_priority(waiting) {
            match self.resume_job(job.id).await {
                Ok(true) => report.resumed += 1,
                Ok(false) => {}
                Err(e) => {
                    if self.absorb(job.id, "resume", e).await {
                        report.failed += 1;
                    }
                }
            }
        }

        self.prune_guards();
        debug!(?report, "Scheduler tick complete");
        Ok(report)
    }

    async fn sweep_expired_locks(&self) -> Result<ExpirySweep, DispatchError> {
        let mut sweep = ExpirySweep::default();

        // A lease past expiry means the vehicle stopped reporting progress.
        for lock in self.locks.expire_stale_locks().await? {
            sweep.expired_locks += 1;
            let still_active = self
                .jobs
                .find_by_id(lock.task_id)
                .await?
                .is_some_and(|j| j.status.is_active());
            if !still_active {
                continue;
            }
            let reason = DispatchError::LockExpired {
                channel: lock.channel.clone(),
                task_id: lock.task_id,
            }
            .to_string();
            error!(
                task_id = %lock.task_id,
                agv = %lock.agv_code,
                channel = %lock.channel,
                "Lock expired on active job, vehicle presumed stuck"
            );
            match self.fail_job(lock.task_id, &reason).await {
                Ok(_) => sweep.failed_jobs += 1,
                Err(e) => error!(task_id = %lock.task_id, "Failed to fail job: {}", e),
            }
        }
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel_catalog::ChannelCatalogStore;
    use crate::application::recommendation::StandardRecommendationService;
    use crate::application::route_planner::StandardRoutePlanner;
    use crate::domain::agv::{Agv, AgvStatus};
    use crate::domain::map::{EdgeType, MapEdge, MapNode, Station, StationType};
    use crate::domain::recommendation::ScoringWeights;
    use crate::application::telemetry_ingest::TelemetryIngestService;
    use crate::domain::telemetry::AgvStatusReport;
    use crate::infrastructure::command_channel::MpscCommandDispatcher;
    use crate::infrastructure::repositories::{
        InMemoryAgvRepository, InMemoryChannelConfigRepository, InMemoryMapRepository,
        InMemoryPathLockRepository, InMemoryTaskJobRepository,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        service: Arc<StandardDispatchService>,
        agvs: Arc<dyn AgvRepository>,
        event_bus: Arc<EventBus>,
        commands: mpsc::Receiver<DispatchCommand>,
    }

    /// Vehicle store whose writes can be refused, or held back while the
    /// vehicle carries no task.
    #[derive(Default)]
    struct UnreliableAgvRepository {
        inner: InMemoryAgvRepository,
        refuse_saves: AtomicBool,
        delay_untasked_saves: AtomicBool,
    }

    #[async_trait]
    impl AgvRepository for UnreliableAgvRepository {
        async fn save(&self, agv: &Agv) -> Result<(), RepositoryError> {
            if self.refuse_saves.load(Ordering::SeqCst) {
                return Err(RepositoryError::Database("vehicle store unavailable".to_string()));
            }
            if self.delay_untasked_saves.load(Ordering::SeqCst) && agv.current_task_id.is_none() {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.save(agv).await
        }

        async fn find_by_id(&self, id: AgvId) -> Result<Option<Agv>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_code(&self, code: &str) -> Result<Option<Agv>, RepositoryError> {
            self.inner.find_by_code(code).await
        }

        async fn list_all(&self) -> Result<Vec<Agv>, RepositoryError> {
            self.inner.list_all().await
        }

        async fn delete(&self, id: AgvId) -> Result<(), RepositoryError> {
            self.inner.delete(id).await
        }
    }

    /// Job store that can refuse updates.
    #[derive(Default)]
    struct UnreliableJobRepository {
        inner: InMemoryTaskJobRepository,
        refuse_updates: AtomicBool,
    }

    #[async_trait]
    impl TaskJobRepository for UnreliableJobRepository {
        async fn insert(&self, job: &TaskJob) -> Result<(), RepositoryError> {
            self.inner.insert(job).await
        }

        async fn update(&self, job: &TaskJob, expected_version: u64) -> Result<(), RepositoryError> {
            if self.refuse_updates.load(Ordering::SeqCst) {
                return Err(RepositoryError::Database("job store unavailable".to_string()));
            }
            self.inner.update(job, expected_version).await
        }

        async fn find_by_id(&self, id: TaskJobId) -> Result<Option<TaskJob>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_status(&self, statuses: &[TaskJobStatus]) -> Result<Vec<TaskJob>, RepositoryError> {
            self.inner.find_by_status(statuses).await
        }

        async fn find_active_by_agv(&self, agv_id: AgvId) -> Result<Vec<TaskJob>, RepositoryError> {
            self.inner.find_active_by_agv(agv_id).await
        }

        async fn list_all(&self) -> Result<Vec<TaskJob>, RepositoryError> {
            self.inner.list_all().await
        }

        async fn delete(&self, id: TaskJobId) -> Result<(), RepositoryError> {
            self.inner.delete(id).await
        }
    }

    async fn harness() -> Harness {
        harness_with(
            Arc::new(InMemoryAgvRepository::new()),
            Arc::new(InMemoryTaskJobRepository::new()),
        )
        .await
    }

    async fn harness_with(
        agvs: Arc<dyn AgvRepository>,
        jobs: Arc<dyn TaskJobRepository>,
    ) -> Harness {
        let map = Arc::new(InMemoryMapRepository::new(
            vec![
                MapNode { code: "N1".into(), x: 0.0, y: 0.0 },
                MapNode { code: "N2".into(), x: 10.0, y: 0.0 },
                MapNode { code: "N3".into(), x: 20.0, y: 0.0 },
            ],
            vec![
                MapEdge {
                    code: "E1".into(),
                    start_node: "N1".into(),
                    end_node: "N2".into(),
                    distance: 10.0,
                    bidirectional: true,
                    edge_type: EdgeType::Line,
                },
                MapEdge {
                    code: "E2".into(),
                    start_node: "N2".into(),
                    end_node: "N3".into(),
                    distance: 10.0,
                    bidirectional: true,
                    edge_type: EdgeType::Line,
                },
            ],
            ["S001", "S002", "S003"]
                .iter()
                .enumerate()
                .map(|(i, code)| Station {
                    code: code.to_string(),
                    name: None,
                    node_code: format!("N{}", i + 1),
                    // Vehicles park at S001 waiting for loading calls.
                    station_type: if i == 0 { StationType::Standby } else { StationType::Pickup },
                    priority: 50,
                })
                .collect(),
        ));
        let catalog = Arc::new(
            ChannelCatalogStore::load(Arc::new(InMemoryChannelConfigRepository::new()), 10)
                .await
                .unwrap(),
        );
        let event_bus = Arc::new(EventBus::with_default_capacity());
        let locks = Arc::new(PathLockManager::new(
            Arc::new(InMemoryPathLockRepository::new()),
            jobs.clone(),
            catalog.clone(),
            event_bus.clone(),
        ));
        let (dispatcher, commands) = MpscCommandDispatcher::channel(64);

        let service = Arc::new(StandardDispatchService::new(
            jobs,
            agvs.clone(),
            map.clone(),
            Arc::new(StandardRecommendationService::new(
                agvs.clone(),
                map.clone(),
                ScoringWeights::default(),
                20,
            )),
            Arc::new(StandardRoutePlanner::new(map, catalog)),
            locks,
            Arc::new(dispatcher),
            event_bus.clone(),
        ));
        Harness {
            service,
            agvs,
            event_bus,
            commands,
        }
    }

    fn request(start: &str, end: &str) -> CreateJobRequest {
        CreateJobRequest {
            job_type: TaskJobType::CallForLoading,
            start_station: start.to_string(),
            end_station: end.to_string(),
            priority: None,
            description: None,
        }
    }

    async fn idle_agv(h: &Harness, code: &str) -> Agv {
        let mut agv = Agv::new(code);
        agv.status = AgvStatus::Idle;
        agv.battery_percent = 90;
        agv.current_station = Some("S001".to_string());
        h.agvs.save(&agv).await.unwrap();
        agv
    }

    #[tokio::test]
    async fn test_create_job_validates_input() {
        let h = harness().await;

        let mut bad_priority = request("S001", "S003");
        bad_priority.priority = Some(5);
        assert!(matches!(
            h.service.create_job(bad_priority).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.service.create_job(request("S001", "S001")).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.service.create_job(request("S001", "S404")).await,
            Err(DispatchError::InvalidRequest(_))
        ));

        let job = h.service.create_job(request("S001", "S003")).await.unwrap();
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.status, TaskJobStatus::Pending);
    }

    #[tokio::test]
    async fn test_job_stays_pending_without_agv() {
        let h = harness().await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();

        let report = h.service.tick().await.unwrap();
        assert_eq!(report.assigned, 0);
        assert_eq!(
            h.service.get_job_status(job.id).await.unwrap().status,
            TaskJobStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_progress_reports_walk_route_to_completion() {
        let mut h = harness().await;
        let agv = idle_agv(&h, "AGV01").await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();

        h.service.tick().await.unwrap();
        let assign = h.commands.recv().await.unwrap();
        assert!(matches!(assign.action, CommandAction::AssignRoute { permitted_until: 30, .. }));

        let report = |checkpoint: &str| TaskProgressReport {
            task_id: job.id,
            agv_code: "AGV01".to_string(),
            status: None,
            progress_percentage: None,
            checkpoint: Some(checkpoint.to_string()),
            message: None,
        };
        let midway = h.service.handle_progress_report(report("S002")).await.unwrap();
        assert_eq!(midway.progress_percentage, 50.0);

        let done = h.service.handle_progress_report(report("S003")).await.unwrap();
        assert_eq!(done.status, TaskJobStatus::Completed);
        let agv = h.agvs.find_by_id(agv.id).await.unwrap().unwrap();
        assert_eq!(agv.current_task_id, None);
        assert_eq!(agv.status, AgvStatus::Idle);

        h.service.tick().await.unwrap();
        assert_eq!(h.service.tracked_guards(), 0);
    }

    #[tokio::test]
    async fn test_report_from_wrong_agv_is_rejected() {
        let h = harness().await;
        idle_agv(&h, "AGV01").await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();
        h.service.tick().await.unwrap();

        let err = h
            .service
            .handle_progress_report(TaskProgressReport {
                task_id: job.id,
                agv_code: "AGV99".to_string(),
                status: Some(TaskJobStatus::Completed),
                progress_percentage: None,
                checkpoint: None,
                message: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_invalid_transition() {
        let h = harness().await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();
        h.service.cancel_job(job.id, "operator").await.unwrap();

        let err = h.service.cancel_job(job.id, "again").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition(_)));
        let job = h.service.get_job_status(job.id).await.unwrap();
        assert_eq!(job.cancel_reason.as_deref(), Some("operator"));
    }

    #[tokio::test]
    async fn test_failed_report_fails_job_and_frees_agv() {
        let mut h = harness().await;
        let agv = idle_agv(&h, "AGV01").await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();
        h.service.tick().await.unwrap();
        let _ = h.commands.recv().await;

        let failed = h
            .service
            .handle_progress_report(TaskProgressReport {
                task_id: job.id,
                agv_code: "AGV01".to_string(),
                status: Some(TaskJobStatus::Failed),
                progress_percentage: None,
                checkpoint: None,
                message: Some("blocked by pallet".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(failed.status, TaskJobStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("blocked by pallet"));
        assert!(matches!(h.commands.recv().await.unwrap().action, CommandAction::Cancel { .. }));
        let agv = h.agvs.find_by_id(agv.id).await.unwrap().unwrap();
        assert_eq!(agv.current_task_id, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_report_during_assignment_keeps_task_attached() {
        let store = Arc::new(UnreliableAgvRepository::default());
        let h = harness_with(store.clone(), Arc::new(InMemoryTaskJobRepository::new())).await;
        let agv = idle_agv(&h, "AGV01").await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();
        let ingest = TelemetryIngestService::new(h.agvs.clone(), h.service.clone(), h.event_bus.clone());

        // The idle report is read before the tick claims the vehicle and
        // written after it.
        store.delay_untasked_saves.store(true, Ordering::SeqCst);
        let report = AgvStatusReport {
            agv_code: "AGV01".to_string(),
            status: AgvStatus::Idle,
            battery_percent: Some(85),
            battery_voltage: None,
            position: None,
            speed: None,
            current_station: Some("S001".to_string()),
            has_cargo: None,
            error_code: None,
            reported_at: None,
        };
        let (ingested, ticked) = tokio::join!(ingest.ingest_status(report), h.service.tick());
        ticked.unwrap();
        let ingested = ingested.unwrap();
        assert_eq!(ingested.current_task_id, Some(job.id));

        let agv = h.agvs.find_by_id(agv.id).await.unwrap().unwrap();
        assert_eq!(agv.current_task_id, Some(job.id));
        assert_eq!(agv.status, AgvStatus::Moving);
        assert_eq!(agv.battery_percent, 85);
        let job = h.service.get_job_status(job.id).await.unwrap();
        assert_eq!(job.status, TaskJobStatus::Executing);
        assert_eq!(job.assigned_agv_id, Some(agv.id));
    }

    #[tokio::test]
    async fn test_refused_vehicle_write_leaves_job_pending() {
        let store = Arc::new(UnreliableAgvRepository::default());
        let h = harness_with(store.clone(), Arc::new(InMemoryTaskJobRepository::new())).await;
        let agv = idle_agv(&h, "AGV01").await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();

        store.refuse_saves.store(true, Ordering::SeqCst);
        let report = h.service.tick().await.unwrap();
        assert_eq!(report.assigned, 0);

        let job = h.service.get_job_status(job.id).await.unwrap();
        assert_eq!(job.status, TaskJobStatus::Pending);
        assert!(job.assigned_agv_id.is_none());
        let agv = h.agvs.find_by_id(agv.id).await.unwrap().unwrap();
        assert!(agv.current_task_id.is_none());
        assert_eq!(agv.status, AgvStatus::Idle);
    }

    #[tokio::test]
    async fn test_refused_job_write_releases_claimed_vehicle() {
        let jobs = Arc::new(UnreliableJobRepository::default());
        let h = harness_with(Arc::new(InMemoryAgvRepository::new()), jobs.clone()).await;
        let agv = idle_agv(&h, "AGV01").await;
        let job = h.service.create_job(request("S001", "S003")).await.unwrap();

        jobs.refuse_updates.store(true, Ordering::SeqCst);
        let report = h.service.tick().await.unwrap();
        assert_eq!(report.assigned, 0);

        let agv = h.agvs.find_by_id(agv.id).await.unwrap().unwrap();
        assert!(agv.current_task_id.is_none());
        assert_eq!(agv.status, AgvStatus::Idle);

        jobs.refuse_updates.store(false, Ordering::SeqCst);
        h.service.tick().await.unwrap();
        let job = h.service.get_job_status(job.id).await.unwrap();
        assert_eq!(job.assigned_agv_id, Some(agv.id));
    }
}
