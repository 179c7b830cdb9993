// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatch error taxonomy shared by the application services.
//!
//! | Variant | Handling |
//! |---------|----------|
//! | `NoAvailableAgv` | retryable, job stays Pending |
//! | `NoPathFound` | terminal, job goes to Failed |
//! | `LockContested` | retryable scheduling signal |
//! | `LockExpired` | job goes to Failed and an alert is logged |
//! | `InvalidTransition` | caller error, state unchanged |
//! | `ConcurrentModification` | retried once, then surfaced as transient |

use crate::domain::channel::{CatalogError, ChannelKey};
use crate::domain::map::MapError;
use crate::domain::repository::RepositoryError;
use crate::domain::task_job::{TaskJobId, TaskTransitionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no AGV is available for job {0}")]
    NoAvailableAgv(TaskJobId),

    #[error("no path from {from} to {to}")]
    NoPathFound { from: String, to: String },

    #[error("channel {0} is held by another AGV")]
    LockContested(ChannelKey),

    #[error("lock on channel {channel} expired for job {task_id}")]
    LockExpired { channel: ChannelKey, task_id: TaskJobId },

    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] TaskTransitionError),

    #[error("job {0} was modified concurrently")]
    ConcurrentModification(TaskJobId),

    #[error("job {0} not found")]
    JobNotFound(TaskJobId),

    #[error("AGV {0} not found")]
    AgvNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("command dispatch failed: {0}")]
    Command(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<MapError> for DispatchError {
    fn from(err: MapError) -> Self {
        DispatchError::Misconfiguration(err.to_string())
    }
}

impl From<CatalogError> for DispatchError {
    fn from(err: CatalogError) -> Self {
        DispatchError::Misconfiguration(err.to_string())
    }
}

impl DispatchError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoAvailableAgv(_)
                | DispatchError::LockContested(_)
                | DispatchError::ConcurrentModification(_)
        )
    }
}
