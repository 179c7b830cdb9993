// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Planned Route
//!
//! Ordered checkpoint sequence produced per task by the route planner. A
//! route is derived data: it is stored on the task for progress tracking but
//! never edited independently.
//!
//! `Checkpoint::requires_lock` refers to the hop that *leaves* the checkpoint:
//! the vehicle must hold the named channel before departing it.

use crate::domain::channel::ChannelKey;
use serde::{Deserialize, Serialize};

/// Spacing between consecutive checkpoint sequence numbers.
pub const SEQUENCE_STEP: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    Start,
    Middle,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u32,
    pub station_code: String,
    pub checkpoint_type: CheckpointType,
    pub requires_lock: bool,
    pub channel: Option<ChannelKey>,
}

/// A contiguous run of lock-required hops covered by one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteChannel {
    pub key: ChannelKey,
    /// Index of the checkpoint where the vehicle enters the channel.
    pub entry_index: usize,
    /// Index of the checkpoint where the vehicle has left the channel.
    pub exit_index: usize,
    pub entry_station: String,
    pub exit_station: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub start_station: String,
    pub end_station: String,
    pub checkpoints: Vec<Checkpoint>,
    pub edges: Vec<String>,
    pub distance: f64,
    pub channels: Vec<RouteChannel>,
}

impl PlannedRoute {
    pub fn final_index(&self) -> usize {
        self.checkpoints.len().saturating_sub(1)
    }

    pub fn requires_locks(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Channel covering the hop that departs checkpoint `index`, whether it
    /// starts there or further back.
    pub fn channel_for_departure(&self, index: usize) -> Option<&RouteChannel> {
        self.channels
            .iter()
            .find(|c| c.entry_index <= index && index < c.exit_index)
    }

    /// Channels fully behind a vehicle standing at checkpoint `index`.
    pub fn channels_vacated_at(&self, index: usize) -> impl Iterator<Item = &RouteChannel> {
        self.channels.iter().filter(move |c| c.exit_index <= index)
    }

    /// First checkpoint after `after` whose station matches `station_code`.
    pub fn index_of_station(&self, station_code: &str, after: usize) -> Option<usize> {
        self.checkpoints
            .iter()
            .enumerate()
            .skip(after + 1)
            .find(|(_, cp)| cp.station_code == station_code)
            .map(|(i, _)| i)
    }

    pub fn progress_at(&self, index: usize) -> f64 {
        let last = self.final_index();
        if last == 0 {
            return 100.0;
        }
        (index.min(last) as f64 / last as f64 * 100.0).round()
    }
}
