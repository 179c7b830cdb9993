// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate, following the DDD Repository
//! pattern: one repository per aggregate, interface defined in the domain
//! layer, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgvRepository` | `Agv` | `InMemoryAgvRepository` |
//! | `TaskJobRepository` | `TaskJob` | `InMemoryTaskJobRepository` |
//! | `PathLockRepository` | `PathLock` | `InMemoryPathLockRepository` |
//! | `ChannelConfigRepository` | `ChannelConfig` | `InMemoryChannelConfigRepository` |
//! | `MapRepository` | map rows | `InMemoryMapRepository` |
//!
//! The dispatch core depends only on fetch-by-filter, upsert and delete; the
//! storage engine is chosen by the embedding process.

use async_trait::async_trait;
use crate::domain::agv::{Agv, AgvId};
use crate::domain::channel::{ChannelConfig, ChannelKey};
use crate::domain::map::{MapEdge, MapNode, Station};
use crate::domain::path_lock::{PathLock, PathLockId, PathLockStatus};
use crate::domain::task_job::{TaskJob, TaskJobId, TaskJobStatus};
use tracing::debug;

/// Writes `update_agv` attempts before surfacing a version conflict.
pub const AGV_UPDATE_ATTEMPTS: usize = 3;

/// Repository interface for AGV aggregates
///
/// `save` is versioned: replacing a stored vehicle fails with
/// `RepositoryError::Conflict` unless `agv.version` equals the stored
/// version. A successful save stores the vehicle at `agv.version + 1`.
/// Read-modify-write callers go through [`update_agv`].
#[async_trait]
pub trait AgvRepository: Send + Sync {
    /// Save AGV (create, or update at the stored version)
    async fn save(&self, agv: &Agv) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AgvId) -> Result<Option<Agv>, RepositoryError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Agv>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Agv>, RepositoryError>;

    async fn delete(&self, id: AgvId) -> Result<(), RepositoryError>;
}

/// Repository interface for TaskJob aggregates
///
/// `update` is an optimistic write: it fails with `RepositoryError::Conflict`
/// when the stored version differs from `expected_version`.
#[async_trait]
pub trait TaskJobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &TaskJob) -> Result<(), RepositoryError>;

    /// Replace a job if the stored version still equals `expected_version`
    async fn update(&self, job: &TaskJob, expected_version: u64) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TaskJobId) -> Result<Option<TaskJob>, RepositoryError>;

    async fn find_by_status(&self, statuses: &[TaskJobStatus]) -> Result<Vec<TaskJob>, RepositoryError>;

    async fn find_active_by_agv(&self, agv_id: AgvId) -> Result<Vec<TaskJob>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<TaskJob>, RepositoryError>;

    async fn delete(&self, id: TaskJobId) -> Result<(), RepositoryError>;
}

/// Repository interface for PathLock entities
#[async_trait]
pub trait PathLockRepository: Send + Sync {
    async fn save(&self, lock: &PathLock) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PathLockId) -> Result<Option<PathLock>, RepositoryError>;

    /// Pending and Approved locks on one channel
    async fn find_active_by_channel(&self, channel: &ChannelKey) -> Result<Vec<PathLock>, RepositoryError>;

    async fn find_active_by_task(&self, task_id: TaskJobId) -> Result<Vec<PathLock>, RepositoryError>;

    async fn find_active_by_agv(&self, agv_id: AgvId) -> Result<Vec<PathLock>, RepositoryError>;

    async fn find_by_status(&self, status: PathLockStatus) -> Result<Vec<PathLock>, RepositoryError>;

    async fn delete(&self, id: PathLockId) -> Result<(), RepositoryError>;
}

/// Repository interface for channel configuration rows
#[async_trait]
pub trait ChannelConfigRepository: Send + Sync {
    /// Upsert keyed by (from_station, to_station)
    async fn save(&self, config: &ChannelConfig) -> Result<(), RepositoryError>;

    async fn list_all(&self) -> Result<Vec<ChannelConfig>, RepositoryError>;

    async fn delete(&self, from_station: &str, to_station: &str) -> Result<(), RepositoryError>;
}

/// Read access to the site map. Editing lives outside this crate.
#[async_trait]
pub trait MapRepository: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<MapNode>, RepositoryError>;

    async fn list_edges(&self) -> Result<Vec<MapEdge>, RepositoryError>;

    async fn list_stations(&self) -> Result<Vec<Station>, RepositoryError>;

    async fn find_station(&self, code: &str) -> Result<Option<Station>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Load a vehicle, apply `mutate` and write it back under the version check.
///
/// `mutate` returns whether it changed anything; an untouched vehicle is not
/// written. When another writer got in between the load and the save, the
/// vehicle is reloaded and `mutate` re-applied to the fresh copy.
pub async fn update_agv<F>(
    repo: &dyn AgvRepository,
    id: AgvId,
    mut mutate: F,
) -> Result<Agv, RepositoryError>
where
    F: FnMut(&mut Agv) -> bool + Send,
{
    let mut attempt = 1;
    loop {
        let mut agv = repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("AGV {id}")))?;
        if !mutate(&mut agv) {
            return Ok(agv);
        }
        match repo.save(&agv).await {
            Ok(()) => {
                agv.version += 1;
                return Ok(agv);
            }
            Err(RepositoryError::Conflict(detail)) if attempt < AGV_UPDATE_ATTEMPTS => {
                debug!(agv = %agv.code, attempt, %detail, "AGV modified concurrently, reloading");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
