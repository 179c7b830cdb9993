// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository ports defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! In-memory, `HashMap`-backed repositories for single-process deployments
//! and tests:
//! - **InMemoryAgvRepository** - fleet registry
//! - **InMemoryTaskJobRepository** - job store with optimistic versioning
//! - **InMemoryPathLockRepository** - lock rows, terminal rows retained for inspection
//! - **InMemoryChannelConfigRepository** - channel configuration rows
//! - **InMemoryMapRepository** - nodes, edges and stations
//!
//! A shared SQL or key-value store plugs in by implementing the same traits.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::agv::{Agv, AgvId};
use crate::domain::channel::{ChannelConfig, ChannelKey};
use crate::domain::map::{MapEdge, MapNode, Station};
use crate::domain::path_lock::{PathLock, PathLockId, PathLockStatus};
use crate::domain::repository::{
    AgvRepository, ChannelConfigRepository, MapRepository, PathLockRepository, RepositoryError,
    TaskJobRepository,
};
use crate::domain::task_job::{TaskJob, TaskJobId, TaskJobStatus};

#[derive(Clone, Default)]
pub struct InMemoryAgvRepository {
    agvs: Arc<RwLock<HashMap<AgvId, Agv>>>,
}

impl InMemoryAgvRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgvRepository for InMemoryAgvRepository {
    async fn save(&self, agv: &Agv) -> Result<(), RepositoryError> {
        let mut agvs = self.agvs.write();
        if agvs.values().any(|existing| existing.code == agv.code && existing.id != agv.id) {
            return Err(RepositoryError::Conflict(format!(
                "AGV code {} already registered",
                agv.code
            )));
        }
        if let Some(stored) = agvs.get(&agv.id) {
            if stored.version != agv.version {
                return Err(RepositoryError::Conflict(format!(
                    "AGV {} is at version {}, expected {}",
                    agv.code, stored.version, agv.version
                )));
            }
        }
        let mut stored = agv.clone();
        stored.version = agv.version + 1;
        agvs.insert(agv.id, stored);
        Ok(())
    }

    async fn find_by_id(&self, id: AgvId) -> Result<Option<Agv>, RepositoryError> {
        Ok(self.agvs.read().get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Agv>, RepositoryError> {
        Ok(self.agvs.read().values().find(|a| a.code == code).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Agv>, RepositoryError> {
        let mut agvs: Vec<Agv> = self.agvs.read().values().cloned().collect();
        agvs.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(agvs)
    }

    async fn delete(&self, id: AgvId) -> Result<(), RepositoryError> {
        self.agvs.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskJobRepository {
    jobs: Arc<RwLock<HashMap<TaskJobId, TaskJob>>>,
}

impl InMemoryTaskJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskJobRepository for InMemoryTaskJobRepository {
    async fn insert(&self, job: &TaskJob) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &TaskJob, expected_version: u64) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write();
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("job {}", job.id)))?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "job {} is at version {}, expected {}",
                job.id, stored.version, expected_version
            )));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: TaskJobId) -> Result<Option<TaskJob>, RepositoryError> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn find_by_status(&self, statuses: &[TaskJobStatus]) -> Result<Vec<TaskJob>, RepositoryError> {
        let mut jobs: Vec<TaskJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn find_active_by_agv(&self, agv_id: AgvId) -> Result<Vec<TaskJob>, RepositoryError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| j.status.is_active() && j.assigned_agv_id == Some(agv_id))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<TaskJob>, RepositoryError> {
        Ok(self.jobs.read().values().cloned().collect())
    }

    async fn delete(&self, id: TaskJobId) -> Result<(), RepositoryError> {
        self.jobs.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPathLockRepository {
    locks: Arc<RwLock<HashMap<PathLockId, PathLock>>>,
}

impl InMemoryPathLockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&self, predicate: impl Fn(&PathLock) -> bool) -> Vec<PathLock> {
        let mut locks: Vec<PathLock> = self
            .locks
            .read()
            .values()
            .filter(|l| predicate(l))
            .cloned()
            .collect();
        locks.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        locks
    }
}

#[async_trait]
impl PathLockRepository for InMemoryPathLockRepository {
    async fn save(&self, lock: &PathLock) -> Result<(), RepositoryError> {
        self.locks.write().insert(lock.id, lock.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PathLockId) -> Result<Option<PathLock>, RepositoryError> {
        Ok(self.locks.read().get(&id).cloned())
    }

    async fn find_active_by_channel(&self, channel: &ChannelKey) -> Result<Vec<PathLock>, RepositoryError> {
        Ok(self.select(|l| !l.status.is_terminal() && &l.channel == channel))
    }

    async fn find_active_by_task(&self, task_id: TaskJobId) -> Result<Vec<PathLock>, RepositoryError> {
        Ok(self.select(|l| !l.status.is_terminal() && l.task_id == task_id))
    }

    async fn find_active_by_agv(&self, agv_id: AgvId) -> Result<Vec<PathLock>, RepositoryError> {
        Ok(self.select(|l| !l.status.is_terminal() && l.agv_id == agv_id))
    }

    async fn find_by_status(&self, status: PathLockStatus) -> Result<Vec<PathLock>, RepositoryError> {
        Ok(self.select(|l| l.status == status))
    }

    async fn delete(&self, id: PathLockId) -> Result<(), RepositoryError> {
        self.locks.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryChannelConfigRepository {
    configs: Arc<RwLock<HashMap<(String, String), ChannelConfig>>>,
}

impl InMemoryChannelConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelConfigRepository for InMemoryChannelConfigRepository {
    async fn save(&self, config: &ChannelConfig) -> Result<(), RepositoryError> {
        self.configs.write().insert(
            (config.from_station.clone(), config.to_station.clone()),
            config.clone(),
        );
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ChannelConfig>, RepositoryError> {
        let mut configs: Vec<ChannelConfig> = self.configs.read().values().cloned().collect();
        configs.sort_by(|a, b| {
            (&a.from_station, &a.to_station).cmp(&(&b.from_station, &b.to_station))
        });
        Ok(configs)
    }

    async fn delete(&self, from_station: &str, to_station: &str) -> Result<(), RepositoryError> {
        self.configs
            .write()
            .remove(&(from_station.to_string(), to_station.to_string()));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMapRepository {
    nodes: Arc<RwLock<Vec<MapNode>>>,
    edges: Arc<RwLock<Vec<MapEdge>>>,
    stations: Arc<RwLock<Vec<Station>>>,
}

impl InMemoryMapRepository {
    pub fn new(nodes: Vec<MapNode>, edges: Vec<MapEdge>, stations: Vec<Station>) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            edges: Arc::new(RwLock::new(edges)),
            stations: Arc::new(RwLock::new(stations)),
        }
    }

    /// Replace the whole map, e.g. after the site editor publishes a revision.
    pub fn replace(&self, nodes: Vec<MapNode>, edges: Vec<MapEdge>, stations: Vec<Station>) {
        *self.nodes.write() = nodes;
        *self.edges.write() = edges;
        *self.stations.write() = stations;
    }
}

#[async_trait]
impl MapRepository for InMemoryMapRepository {
    async fn list_nodes(&self) -> Result<Vec<MapNode>, RepositoryError> {
        Ok(self.nodes.read().clone())
    }

    async fn list_edges(&self) -> Result<Vec<MapEdge>, RepositoryError> {
        Ok(self.edges.read().clone())
    }

    async fn list_stations(&self) -> Result<Vec<Station>, RepositoryError> {
        Ok(self.stations.read().clone())
    }

    async fn find_station(&self, code: &str) -> Result<Option<Station>, RepositoryError> {
        Ok(self.stations.read().iter().find(|s| s.code == code).cloned())
    }
}
