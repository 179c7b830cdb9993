// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Telemetry ingestion.
//!
//! Applies vehicle status, task progress and fault reports arriving from the
//! messaging bridge. Status reports are the only writer of an AGV's runtime
//! state besides the orchestrator's task attach/detach. Progress is handed to
//! the orchestrator unchanged.

use crate::application::dispatch::DispatchService;
use crate::domain::agv::{Agv, AgvStatus};
use crate::domain::errors::DispatchError;
use crate::domain::events::AgvEvent;
use crate::domain::repository::{update_agv, AgvRepository};
use crate::domain::task_job::{TaskJob, TaskJobId};
use crate::domain::telemetry::{AgvFaultReport, AgvStatusReport, TaskProgressReport};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct TelemetryIngestService {
    agvs: Arc<dyn AgvRepository>,
    dispatch: Arc<dyn DispatchService>,
    event_bus: Arc<EventBus>,
}

impl TelemetryIngestService {
    pub fn new(
        agvs: Arc<dyn AgvRepository>,
        dispatch: Arc<dyn DispatchService>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            agvs,
            dispatch,
            event_bus,
        }
    }

    async fn find(&self, code: &str) -> Result<Agv, DispatchError> {
        self.agvs
            .find_by_code(code)
            .await?
            .ok_or_else(|| DispatchError::AgvNotFound(code.to_string()))
    }

    fn publish_status_change(&self, agv: &Agv, from: AgvStatus) {
        info!(agv = %agv.code, ?from, to = ?agv.status, "AGV status changed");
        self.event_bus.publish_agv_event(AgvEvent::AgvStatusChanged {
            agv_id: agv.id,
            agv_code: agv.code.clone(),
            from,
            to: agv.status,
            changed_at: Utc::now(),
        });
    }

    pub async fn ingest_status(&self, report: AgvStatusReport) -> Result<Agv, DispatchError> {
        let agv_id = self.find(&report.agv_code).await?.id;
        let now = Utc::now();
        let mut changed = None;
        // The orchestrator may attach a task between the load and the write;
        // a conflict re-applies the report on top of the attached task.
        let mut agv = update_agv(self.agvs.as_ref(), agv_id, |agv| {
            changed = agv.apply_status_report(&report, now);
            true
        })
        .await?;
        debug!(agv = %agv.code, battery = agv.battery_percent, status = ?agv.status, "Status report applied");

        if let Some(from) = changed {
            self.publish_status_change(&agv, from);
        }

        // A vehicle that drops into Error mid-task cannot finish it.
        if agv.status == AgvStatus::Error {
            if let Some(task_id) = agv.current_task_id {
                let code = agv.error_code.as_deref().unwrap_or("unknown");
                self.fail_task(task_id, &format!("AGV {} reported error status ({code})", agv.code))
                    .await?;
                agv = self.find(&report.agv_code).await?;
            }
        }
        Ok(agv)
    }

    pub async fn ingest_progress(&self, report: TaskProgressReport) -> Result<TaskJob, DispatchError> {
        self.dispatch.handle_progress_report(report).await
    }

    /// Apply a fault report. Error and Critical faults fail the vehicle's
    /// active job and mark it Error; lower severities are only recorded.
    /// Returns the job failed as a result, if any.
    pub async fn ingest_fault(&self, report: AgvFaultReport) -> Result<Option<TaskJob>, DispatchError> {
        let agv = self.find(&report.agv_code).await?;
        let task_id = report.task_id.or(agv.current_task_id);

        self.event_bus.publish_agv_event(AgvEvent::AgvFaultReported {
            agv_code: agv.code.clone(),
            task_id,
            severity: report.severity,
            message: report.message.clone(),
            reported_at: Utc::now(),
        });

        if !report.severity.requires_intervention() {
            info!(agv = %agv.code, severity = ?report.severity, message = %report.message, "AGV fault recorded");
            return Ok(None);
        }
        warn!(
            agv = %agv.code,
            severity = ?report.severity,
            code = ?report.code,
            message = %report.message,
            "AGV fault requires intervention"
        );

        let mut failed = None;
        if let Some(task_id) = task_id {
            let job = self.dispatch.get_job_status(task_id).await?;
            if job.assigned_agv_id != Some(agv.id) {
                return Err(DispatchError::InvalidRequest(format!(
                    "job {task_id} is not assigned to AGV {}",
                    agv.code
                )));
            }
            failed = self.fail_task(task_id, &format!("AGV fault: {}", report.message)).await?;
        }

        // Reload: failing the job detached the task from the vehicle.
        let mut previous = agv.status;
        let agv = update_agv(self.agvs.as_ref(), agv.id, |agv| {
            previous = agv.status;
            agv.mark_fault(report.code.clone());
            true
        })
        .await?;
        if previous != agv.status {
            self.publish_status_change(&agv, previous);
        }
        Ok(failed)
    }

    async fn fail_task(&self, task_id: TaskJobId, reason: &str) -> Result<Option<TaskJob>, DispatchError> {
        match self.dispatch.fail_job(task_id, reason).await {
            Ok(job) => Ok(Some(job)),
            // Already terminal or not yet assigned: nothing to fail.
            Err(DispatchError::InvalidTransition(e)) => {
                debug!(task_id = %task_id, "Job not failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
