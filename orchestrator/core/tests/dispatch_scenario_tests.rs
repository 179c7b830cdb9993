// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use agv_dispatch_core::application::dispatch::CreateJobRequest;
use agv_dispatch_core::application::runtime::DispatchRuntime;
use agv_dispatch_core::domain::agv::AgvStatus;
use agv_dispatch_core::domain::channel::ChannelKey;
use agv_dispatch_core::domain::command::{CommandAction, DispatchCommand};
use agv_dispatch_core::domain::dispatch_config::DispatchConfigSpec;
use agv_dispatch_core::domain::path_lock::PathLockStatus;
use agv_dispatch_core::domain::repository::{AgvRepository, PathLockRepository};
use agv_dispatch_core::domain::task_job::{TaskJob, TaskJobStatus, TaskJobType};
use agv_dispatch_core::domain::telemetry::{AgvFaultReport, AgvStatusReport, FaultSeverity, TaskProgressReport};
use agv_dispatch_core::infrastructure::command_channel::MpscCommandDispatcher;
use agv_dispatch_core::infrastructure::site_loader::SiteManifestParser;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Ten stations on a straight line, 10m apart, plus an island station that
/// no edge reaches. The hop S005-S006 is a locked single-lane channel.
fn line_site() -> String {
    let mut nodes = String::new();
    let mut edges = String::new();
    let mut stations = String::new();
    for i in 1..=10 {
        nodes.push_str(&format!("    - {{ code: N{i}, x: {}.0, y: 0.0 }}\n", (i - 1) * 10));
        stations.push_str(&format!(
            "    - {{ code: S{i:03}, node_code: N{i}, station_type: pickup, priority: 50 }}\n"
        ));
        if i < 10 {
            edges.push_str(&format!(
                "    - {{ code: E{i}, start_node: N{i}, end_node: N{}, distance: 10.0 }}\n",
                i + 1
            ));
        }
    }
    format!(
        r#"apiVersion: agv-dispatch/v1
kind: SiteManifest
metadata:
  name: line
spec:
  nodes:
{nodes}    - {{ code: N99, x: 500.0, y: 500.0 }}
  edges:
{edges}  stations:
{stations}    - {{ code: S099, node_code: N99, station_type: standby, priority: 50 }}
  channels:
    - {{ from_station: S005, to_station: S006, reason: single lane }}
  agvs:
    - {{ code: AGV01, current_station: S001 }}
    - {{ code: AGV02, current_station: S010 }}
"#
    )
}

struct Scenario {
    runtime: DispatchRuntime,
    commands: mpsc::Receiver<DispatchCommand>,
}

impl Scenario {
    async fn new() -> Self {
        let site = SiteManifestParser::parse_yaml(&line_site()).unwrap();
        let (dispatcher, commands) = MpscCommandDispatcher::channel(256);
        let runtime = DispatchRuntime::in_memory(&DispatchConfigSpec::default(), Some(&site), Arc::new(dispatcher))
            .await
            .unwrap();
        Self { runtime, commands }
    }

    async fn report_idle(&self, code: &str, station: &str) {
        self.runtime
            .telemetry
            .ingest_status(AgvStatusReport {
                agv_code: code.to_string(),
                status: AgvStatus::Idle,
                battery_percent: Some(85),
                battery_voltage: None,
                position: None,
                speed: None,
                current_station: Some(station.to_string()),
                has_cargo: None,
                error_code: None,
                reported_at: None,
            })
            .await
            .unwrap();
    }

    async fn create(&self, start: &str, end: &str) -> TaskJob {
        self.runtime
            .dispatch
            .create_job(CreateJobRequest {
                job_type: TaskJobType::SendToUnloading,
                start_station: start.to_string(),
                end_station: end.to_string(),
                priority: None,
                description: None,
            })
            .await
            .unwrap()
    }

    async fn reach(&self, job: &TaskJob, agv: &str, station: &str) -> TaskJob {
        self.runtime
            .dispatch
            .handle_progress_report(TaskProgressReport {
                task_id: job.id,
                agv_code: agv.to_string(),
                status: None,
                progress_percentage: None,
                checkpoint: Some(station.to_string()),
                message: None,
            })
            .await
            .unwrap()
    }

    async fn job(&self, job: &TaskJob) -> TaskJob {
        self.runtime.dispatch.get_job_status(job.id).await.unwrap()
    }

    fn drain(&mut self) -> Vec<DispatchCommand> {
        let mut sent = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            sent.push(command);
        }
        sent
    }
}

fn lane() -> ChannelKey {
    ChannelKey::new("S005<->S006")
}

#[tokio::test]
async fn test_unlocked_route_dispatches_without_lock_rows() {
    let mut s = Scenario::new().await;
    s.report_idle("AGV01", "S001").await;
    let job = s.create("S001", "S004").await;

    let report = s.runtime.dispatch.tick().await.unwrap();
    assert_eq!((report.assigned, report.started), (1, 1));

    let sent = s.drain();
    assert_eq!(sent.len(), 1);
    match &sent[0].action {
        CommandAction::AssignRoute { checkpoints, permitted_until, .. } => {
            let sequences: Vec<u32> = checkpoints.iter().map(|c| c.sequence).collect();
            assert_eq!(sequences, vec![10, 20, 30, 40]);
            assert_eq!(*permitted_until, 40);
        }
        other => panic!("expected route assignment, got {other:?}"),
    }

    for station in ["S002", "S003", "S004"] {
        s.reach(&job, "AGV01", station).await;
    }
    let done = s.job(&job).await;
    assert_eq!(done.status, TaskJobStatus::Completed);
    assert_eq!(done.progress_percentage, 100.0);
    assert!(s.runtime.lock_manager.list_active_locks().await.unwrap().is_empty());
    assert!(s.runtime.locks.find_by_status(PathLockStatus::Released).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_opposing_vehicles_take_turns_on_single_lane() {
    let mut s = Scenario::new().await;
    s.report_idle("AGV01", "S004").await;
    s.report_idle("AGV02", "S007").await;
    let east = s.create("S004", "S007").await;
    let west = s.create("S007", "S004").await;

    s.runtime.dispatch.tick().await.unwrap();
    assert_eq!(s.job(&east).await.assigned_agv_code.as_deref(), Some("AGV01"));
    assert_eq!(s.job(&west).await.assigned_agv_code.as_deref(), Some("AGV02"));
    for command in s.drain() {
        // Both are cleared only up to the lane entrance.
        assert!(matches!(command.action, CommandAction::AssignRoute { permitted_until: 20, .. }));
    }

    s.reach(&east, "AGV01", "S005").await;
    assert!(matches!(
        s.drain()[0].action,
        CommandAction::Proceed { from_sequence: 20, to_sequence: 40 }
    ));

    let held = s.reach(&west, "AGV02", "S006").await;
    assert_eq!(held.waiting_on, Some(lane()));
    let hold = s.drain();
    assert!(matches!(&hold[0].action, CommandAction::Hold { at_sequence: 20, channel } if *channel == lane()));

    let active = s.runtime.lock_manager.list_active_locks().await.unwrap();
    assert_eq!(active.len(), 2);
    let approved: Vec<_> = active.iter().filter(|l| l.status == PathLockStatus::Approved).collect();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].agv_code, "AGV01");

    // A tick while the lane is occupied changes nothing.
    assert_eq!(s.runtime.dispatch.tick().await.unwrap().resumed, 0);

    s.reach(&east, "AGV01", "S006").await;
    let report = s.runtime.dispatch.tick().await.unwrap();
    assert_eq!(report.resumed, 1);
    let proceed: Vec<_> = s
        .drain()
        .into_iter()
        .filter(|c| c.agv_code == "AGV02")
        .collect();
    assert!(matches!(proceed[0].action, CommandAction::Proceed { from_sequence: 20, to_sequence: 40 }));

    s.reach(&east, "AGV01", "S007").await;
    for station in ["S005", "S004"] {
        s.reach(&west, "AGV02", station).await;
    }
    assert_eq!(s.job(&east).await.status, TaskJobStatus::Completed);
    assert_eq!(s.job(&west).await.status, TaskJobStatus::Completed);
    assert!(s.runtime.lock_manager.list_active_locks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_destination_fails_job() {
    let s = Scenario::new().await;
    s.report_idle("AGV01", "S001").await;
    let job = s.create("S001", "S099").await;

    s.runtime.dispatch.tick().await.unwrap();

    let failed = s.job(&job).await;
    assert_eq!(failed.status, TaskJobStatus::Failed);
    assert!(failed.failure_reason.as_deref().unwrap().contains("no path"));
    let agv = s.runtime.agvs.find_by_code("AGV01").await.unwrap().unwrap();
    assert_eq!(agv.current_task_id, None);
}

#[tokio::test]
async fn test_cancel_mid_route_releases_lane() {
    let mut s = Scenario::new().await;
    s.report_idle("AGV01", "S004").await;
    let job = s.create("S004", "S008").await;
    s.runtime.dispatch.tick().await.unwrap();
    s.reach(&job, "AGV01", "S005").await;
    s.drain();

    let cancelled = s.runtime.dispatch.cancel_job(job.id, "operator recall").await.unwrap();
    assert_eq!(cancelled.status, TaskJobStatus::Cancelled);

    let released = s.runtime.locks.find_by_status(PathLockStatus::Released).await.unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].channel, lane());
    assert!(s.runtime.lock_manager.list_active_locks().await.unwrap().is_empty());
    let agv = s.runtime.agvs.find_by_code("AGV01").await.unwrap().unwrap();
    assert_eq!(agv.current_task_id, None);
    assert!(matches!(s.drain()[0].action, CommandAction::Cancel { .. }));
}

#[tokio::test]
async fn test_silent_vehicle_goes_offline_and_frees_lane() {
    let s = Scenario::new().await;
    s.report_idle("AGV01", "S004").await;
    let job = s.create("S004", "S008").await;
    s.runtime.dispatch.tick().await.unwrap();
    s.reach(&job, "AGV01", "S005").await;

    let monitor = s.runtime.health_monitor();
    let sweep = monitor.sweep(Utc::now() + Duration::seconds(120)).await.unwrap();
    // AGV02 never reported in and is already Offline.
    assert_eq!(sweep.went_offline, 1);
    assert_eq!(sweep.jobs_cancelled, 1);

    let cancelled = s.job(&job).await;
    assert_eq!(cancelled.status, TaskJobStatus::Cancelled);
    assert!(cancelled.cancel_reason.as_deref().unwrap().starts_with("AGV offline"));
    let agv = s.runtime.agvs.find_by_code("AGV01").await.unwrap().unwrap();
    assert_eq!(agv.status, AgvStatus::Offline);
    assert!(s.runtime.lock_manager.list_active_locks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_critical_fault_fails_job_and_marks_vehicle() {
    let s = Scenario::new().await;
    s.report_idle("AGV01", "S001").await;
    let job = s.create("S001", "S003").await;
    s.runtime.dispatch.tick().await.unwrap();

    let failed = s
        .runtime
        .telemetry
        .ingest_fault(AgvFaultReport {
            agv_code: "AGV01".to_string(),
            task_id: None,
            severity: FaultSeverity::Critical,
            code: Some("E-STOP".to_string()),
            message: "emergency stop pressed".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.id, job.id);
    assert_eq!(failed.status, TaskJobStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("AGV fault: emergency stop pressed"));
    let agv = s.runtime.agvs.find_by_code("AGV01").await.unwrap().unwrap();
    assert_eq!(agv.status, AgvStatus::Error);
    assert_eq!(agv.error_code.as_deref(), Some("E-STOP"));
}
