// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use agv_dispatch_core::application::path_lock_manager::{LockOutcome, PathLockManager};
use agv_dispatch_core::application::runtime::DispatchRuntime;
use agv_dispatch_core::domain::agv::AgvId;
use agv_dispatch_core::domain::channel::ChannelKey;
use agv_dispatch_core::domain::command::DispatchCommand;
use agv_dispatch_core::domain::dispatch_config::DispatchConfigSpec;
use agv_dispatch_core::domain::path_lock::{LockRequest, PathLockStatus};
use agv_dispatch_core::domain::task_job::TaskJobId;
use agv_dispatch_core::infrastructure::command_channel::MpscCommandDispatcher;
use agv_dispatch_core::infrastructure::event_bus::DomainEvent;
use agv_dispatch_core::domain::events::LockEvent;
use agv_dispatch_core::infrastructure::site_loader::SiteManifestParser;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

const SITE: &str = r#"
apiVersion: agv-dispatch/v1
kind: SiteManifest
metadata:
  name: locks
spec:
  nodes:
    - { code: N1, x: 0.0, y: 0.0 }
    - { code: N2, x: 10.0, y: 0.0 }
    - { code: N3, x: 20.0, y: 0.0 }
  edges:
    - { code: E1, start_node: N1, end_node: N2, distance: 10.0 }
    - { code: E2, start_node: N2, end_node: N3, distance: 10.0 }
  stations:
    - { code: S001, node_code: N1, station_type: pickup }
    - { code: S002, node_code: N2, station_type: intersection }
    - { code: S003, node_code: N3, station_type: dropoff }
  channels:
    - { from_station: S001, to_station: S002, timeout_minutes: 10 }
    - { from_station: S002, to_station: S003, sharing: same_direction }
"#;

struct Fixture {
    runtime: DispatchRuntime,
    _commands: mpsc::Receiver<DispatchCommand>,
}

impl Fixture {
    async fn new() -> Self {
        let site = SiteManifestParser::parse_yaml(SITE).unwrap();
        let (dispatcher, commands) = MpscCommandDispatcher::channel(16);
        let runtime = DispatchRuntime::in_memory(&DispatchConfigSpec::default(), Some(&site), Arc::new(dispatcher))
            .await
            .unwrap();
        Self { runtime, _commands: commands }
    }

    fn locks(&self) -> &PathLockManager {
        &self.runtime.lock_manager
    }
}

struct Claim {
    agv_id: AgvId,
    agv_code: String,
    task_id: TaskJobId,
}

impl Claim {
    fn new(code: &str) -> Self {
        Self {
            agv_id: AgvId::new(),
            agv_code: code.to_string(),
            task_id: TaskJobId::new(),
        }
    }

    fn on(&self, channel: &str, from: &str, to: &str, priority: i32) -> LockRequest {
        LockRequest {
            channel: ChannelKey::new(channel),
            from_station: from.to_string(),
            to_station: to.to_string(),
            agv_id: self.agv_id,
            agv_code: self.agv_code.clone(),
            task_id: self.task_id,
            task_priority: priority,
        }
    }
}

const NARROW: &str = "S001<->S002";
const WIDE: &str = "S002<->S003";

#[tokio::test]
async fn test_concurrent_requests_admit_exactly_one_holder() {
    let fixture = Fixture::new().await;
    let manager = fixture.runtime.lock_manager.clone();

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let claim = Claim::new(&format!("AGV{i:02}"));
            manager.request_lock(claim.on(NARROW, "S001", "S002", 30)).await.unwrap()
        }));
    }

    let mut approved = 0;
    let mut positions = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            LockOutcome::Approved(_) => approved += 1,
            LockOutcome::Pending { position, .. } => positions.push(position),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(positions.len(), 7);

    let active = manager.list_active_locks().await.unwrap();
    assert_eq!(active.iter().filter(|l| l.status == PathLockStatus::Approved).count(), 1);
    assert_eq!(active.iter().filter(|l| l.status == PathLockStatus::Pending).count(), 7);
}

#[tokio::test]
async fn test_urgent_waiter_is_promoted_before_older_one() {
    let fixture = Fixture::new().await;
    let holder = Claim::new("AGV01");
    let relaxed = Claim::new("AGV02");
    let urgent = Claim::new("AGV03");
    let t0 = Utc::now();

    fixture.locks().request_lock_at(holder.on(NARROW, "S001", "S002", 30), t0).await.unwrap();
    let first = fixture
        .locks()
        .request_lock_at(relaxed.on(NARROW, "S001", "S002", 30), t0 + Duration::seconds(1))
        .await
        .unwrap();
    let second = fixture
        .locks()
        .request_lock_at(urgent.on(NARROW, "S002", "S001", 10), t0 + Duration::seconds(2))
        .await
        .unwrap();
    assert!(matches!(first, LockOutcome::Pending { position: 1, .. }));
    assert!(matches!(second, LockOutcome::Pending { position: 1, .. }));

    fixture.locks().release_lock(&ChannelKey::new(NARROW), holder.agv_id).await.unwrap();

    let detail = fixture.locks().channel_detail(&ChannelKey::new(NARROW)).await.unwrap();
    let status_of = |agv: AgvId| {
        detail
            .locks
            .iter()
            .find(|v| v.lock.agv_id == agv)
            .map(|v| v.lock.status)
    };
    assert_eq!(status_of(urgent.agv_id), Some(PathLockStatus::Approved));
    assert_eq!(status_of(relaxed.agv_id), Some(PathLockStatus::Pending));
    assert_eq!(status_of(holder.agv_id), None);
}

#[tokio::test]
async fn test_repeated_request_is_idempotent() {
    let fixture = Fixture::new().await;
    let holder = Claim::new("AGV01");
    let waiter = Claim::new("AGV02");

    let granted = fixture.locks().request_lock(holder.on(NARROW, "S001", "S002", 30)).await.unwrap();
    let again = fixture.locks().request_lock(holder.on(NARROW, "S001", "S002", 30)).await.unwrap();
    assert!(again.is_approved());
    assert_eq!(granted.lock().id, again.lock().id);

    let queued = fixture.locks().request_lock(waiter.on(NARROW, "S002", "S001", 30)).await.unwrap();
    let requeued = fixture.locks().request_lock(waiter.on(NARROW, "S002", "S001", 30)).await.unwrap();
    assert_eq!(queued.lock().id, requeued.lock().id);

    assert_eq!(fixture.locks().list_active_locks().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_release_frees_channel_for_next_request() {
    let fixture = Fixture::new().await;
    let first = Claim::new("AGV01");
    let second = Claim::new("AGV02");
    let key = ChannelKey::new(NARROW);

    fixture.locks().request_lock(first.on(NARROW, "S001", "S002", 30)).await.unwrap();
    let released = fixture.locks().release_lock(&key, first.agv_id).await.unwrap();
    assert_eq!(released.status, PathLockStatus::Released);
    assert!(released.released_at.is_some());

    let next = fixture.locks().request_lock(second.on(NARROW, "S002", "S001", 30)).await.unwrap();
    assert!(next.is_approved());

    // Releasing twice is a caller error.
    assert!(fixture.locks().release_lock(&key, first.agv_id).await.is_err());
}

#[tokio::test]
async fn test_expired_holder_hands_channel_to_waiter() {
    let fixture = Fixture::new().await;
    let mut events = fixture.runtime.event_bus.subscribe_raw();
    let stuck = Claim::new("AGV01");
    let waiter = Claim::new("AGV02");
    let t0 = Utc::now();

    fixture.locks().request_lock_at(stuck.on(NARROW, "S001", "S002", 30), t0).await.unwrap();
    fixture.locks().request_lock_at(waiter.on(NARROW, "S002", "S001", 30), t0).await.unwrap();

    // Not yet past the ten minute lease.
    assert!(fixture.locks().expire_stale_locks_at(t0 + Duration::minutes(9)).await.unwrap().is_empty());

    let expired = fixture.locks().expire_stale_locks_at(t0 + Duration::minutes(11)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].agv_id, stuck.agv_id);
    assert_eq!(expired[0].status, PathLockStatus::Expired);

    let active = fixture.locks().list_active_locks().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].agv_id, waiter.agv_id);
    assert_eq!(active[0].status, PathLockStatus::Approved);

    let mut promoted = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Lock(LockEvent::LockPromoted { agv_code, .. }) = event {
            promoted = agv_code == "AGV02";
        }
    }
    assert!(promoted);
}

#[tokio::test]
async fn test_same_direction_channel_admits_convoy() {
    let fixture = Fixture::new().await;
    let lead = Claim::new("AGV01");
    let follower = Claim::new("AGV02");
    let oncoming = Claim::new("AGV03");

    assert!(fixture.locks().request_lock(lead.on(WIDE, "S002", "S003", 30)).await.unwrap().is_approved());
    assert!(fixture.locks().request_lock(follower.on(WIDE, "S002", "S003", 30)).await.unwrap().is_approved());
    let blocked = fixture.locks().request_lock(oncoming.on(WIDE, "S003", "S002", 10)).await.unwrap();
    assert!(!blocked.is_approved());

    let channels = fixture.locks().active_channels().await.unwrap();
    let wide = channels.iter().find(|c| c.key.as_str() == WIDE).unwrap();
    assert_eq!(wide.agv_count, 2);
    assert_eq!(wide.waiting, 1);

    fixture.locks().release_lock(&ChannelKey::new(WIDE), lead.agv_id).await.unwrap();
    let still_blocked = fixture.locks().request_lock(oncoming.on(WIDE, "S003", "S002", 10)).await.unwrap();
    assert!(!still_blocked.is_approved());

    fixture.locks().release_lock(&ChannelKey::new(WIDE), follower.agv_id).await.unwrap();
    let active = fixture.locks().list_active_locks().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].agv_id, oncoming.agv_id);
    assert_eq!(active[0].status, PathLockStatus::Approved);
}

#[tokio::test]
async fn test_unknown_channel_is_rejected() {
    let fixture = Fixture::new().await;
    let claim = Claim::new("AGV01");
    let err = fixture
        .locks()
        .request_lock(claim.on("S001<->S003", "S001", "S003", 30))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("S001<->S003"));
}
