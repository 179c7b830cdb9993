// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound vehicle commands and the port they leave through.
//!
//! The transport (MQTT bridge, fieldbus gateway, test channel) lives behind
//! [`CommandDispatcher`]; this crate only defines the message shape.

use crate::domain::channel::ChannelKey;
use crate::domain::route::Checkpoint;
use crate::domain::task_job::{TaskJobId, TaskJobType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommandAction {
    /// Full route handed to the vehicle when execution begins. The vehicle may
    /// run up to `permitted_until` without further clearance.
    AssignRoute {
        job_type: TaskJobType,
        priority: i32,
        checkpoints: Vec<Checkpoint>,
        permitted_until: u32,
    },
    /// Clearance to continue from one checkpoint to a later one.
    Proceed { from_sequence: u32, to_sequence: u32 },
    /// Stay at `at_sequence` until a `Proceed` arrives.
    Hold { at_sequence: u32, channel: ChannelKey },
    Cancel { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub agv_code: String,
    pub task_id: TaskJobId,
    #[serde(flatten)]
    pub action: CommandAction,
    pub issued_at: DateTime<Utc>,
}

impl DispatchCommand {
    pub fn new(agv_code: impl Into<String>, task_id: TaskJobId, action: CommandAction) -> Self {
        Self {
            agv_code: agv_code.into(),
            task_id,
            action,
            issued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command channel closed")]
    Closed,

    #[error("command transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: DispatchCommand) -> Result<(), CommandError>;
}
