// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Route Planner / Segmenter
//!
//! Shortest-path search over the map graph followed by channel segmentation.
//!
//! Paths are ordered by total distance, then hop count, then the edge-code
//! sequence compared lexically, so two equally long routes always resolve the
//! same way. The composite cost is monotone under extension, which keeps plain
//! Dijkstra correct for it.
//!
//! Stations along the chosen node path become checkpoints (sequence 10, 20,
//! ...). Each consecutive station pair is looked up in the channel catalog;
//! contiguous hops resolving to the same channel key form one
//! [`RouteChannel`].

use crate::application::channel_catalog::ChannelCatalogStore;
use crate::domain::channel::{CatalogError, ChannelCatalog};
use crate::domain::errors::DispatchError;
use crate::domain::map::{MapError, MapGraph, Traversal};
use crate::domain::repository::{MapRepository, RepositoryError};
use crate::domain::route::{Checkpoint, CheckpointType, PlannedRoute, RouteChannel, SEQUENCE_STEP};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unknown station '{0}'")]
    UnknownStation(String),

    #[error("start and end are both '{0}'")]
    SameStation(String),

    #[error("no path from {from} to {to}")]
    NoPathFound { from: String, to: String },

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<PlanError> for DispatchError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NoPathFound { from, to } => DispatchError::NoPathFound { from, to },
            PlanError::UnknownStation(station) => DispatchError::NoPathFound {
                from: station.clone(),
                to: station,
            },
            PlanError::SameStation(station) => {
                DispatchError::InvalidRequest(format!("start and end are both '{station}'"))
            }
            PlanError::Map(e) => DispatchError::Misconfiguration(e.to_string()),
            PlanError::Catalog(e) => DispatchError::Misconfiguration(e.to_string()),
            PlanError::Repository(e) => DispatchError::Repository(e),
        }
    }
}

#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan(&self, start_station: &str, end_station: &str) -> Result<PlannedRoute, PlanError>;
}

pub struct StandardRoutePlanner {
    map_repo: Arc<dyn MapRepository>,
    catalog: Arc<ChannelCatalogStore>,
}

impl StandardRoutePlanner {
    pub fn new(map_repo: Arc<dyn MapRepository>, catalog: Arc<ChannelCatalogStore>) -> Self {
        Self { map_repo, catalog }
    }
}

#[async_trait]
impl RoutePlanner for StandardRoutePlanner {
    async fn plan(&self, start_station: &str, end_station: &str) -> Result<PlannedRoute, PlanError> {
        let graph = MapGraph::new(
            self.map_repo.list_nodes().await?,
            self.map_repo.list_edges().await?,
            self.map_repo.list_stations().await?,
        )?;
        let route = plan_route(&graph, &self.catalog.snapshot(), start_station, end_station)?;
        debug!(
            start_station,
            end_station,
            checkpoints = route.checkpoints.len(),
            channels = route.channels.len(),
            distance = route.distance,
            "Planned route"
        );
        Ok(route)
    }
}

/// A partial path during search.
#[derive(Debug, Clone)]
struct Label {
    distance: f64,
    nodes: Vec<String>,
    edges: Vec<String>,
}

impl Label {
    fn cost_cmp(&self, other: &Label) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.edges.len().cmp(&other.edges.len()))
            .then_with(|| self.edges.cmp(&other.edges))
    }

    fn head(&self) -> &str {
        self.nodes.last().map(String::as_str).unwrap_or_default()
    }

    fn extend(&self, step: &Traversal) -> Label {
        let mut next = self.clone();
        next.distance += step.distance;
        next.nodes.push(step.to_node.clone());
        next.edges.push(step.edge_code.clone());
        next
    }
}

/// Min-heap entry: reverses the label order for `BinaryHeap`.
struct Frontier(Label);

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.0.cost_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cost_cmp(&self.0)
    }
}

fn shortest_path(graph: &MapGraph, from_node: &str, to_node: &str) -> Option<Label> {
    let mut best: HashMap<String, Label> = HashMap::new();
    let mut settled: HashSet<String> = HashSet::new();
    let mut heap = BinaryHeap::new();

    let origin = Label {
        distance: 0.0,
        nodes: vec![from_node.to_string()],
        edges: Vec::new(),
    };
    best.insert(from_node.to_string(), origin.clone());
    heap.push(Frontier(origin));

    while let Some(Frontier(label)) = heap.pop() {
        let node = label.head().to_string();
        if !settled.insert(node.clone()) {
            continue;
        }
        if node == to_node {
            return Some(label);
        }
        for step in graph.neighbours(&node) {
            if settled.contains(&step.to_node) {
                continue;
            }
            let candidate = label.extend(step);
            let improves = best
                .get(&step.to_node)
                .is_none_or(|known| candidate.cost_cmp(known) == Ordering::Less);
            if improves {
                best.insert(step.to_node.clone(), candidate.clone());
                heap.push(Frontier(candidate));
            }
        }
    }
    None
}

/// Plan and segment a route on an already-built graph.
pub fn plan_route(
    graph: &MapGraph,
    catalog: &ChannelCatalog,
    start_station: &str,
    end_station: &str,
) -> Result<PlannedRoute, PlanError> {
    let start = graph
        .station(start_station)
        .ok_or_else(|| PlanError::UnknownStation(start_station.to_string()))?;
    let end = graph
        .station(end_station)
        .ok_or_else(|| PlanError::UnknownStation(end_station.to_string()))?;
    if start.code == end.code {
        return Err(PlanError::SameStation(start.code.clone()));
    }

    let path = shortest_path(graph, &start.node_code, &end.node_code).ok_or_else(|| {
        PlanError::NoPathFound {
            from: start_station.to_string(),
            to: end_station.to_string(),
        }
    })?;

    let stations: Vec<String> = path
        .nodes
        .iter()
        .filter_map(|node| graph.station_at_node(node).map(|s| s.code.clone()))
        .collect();
    let last = stations.len().saturating_sub(1);

    let mut checkpoints: Vec<Checkpoint> = stations
        .iter()
        .enumerate()
        .map(|(i, code)| Checkpoint {
            sequence: (i as u32 + 1) * SEQUENCE_STEP,
            station_code: code.clone(),
            checkpoint_type: match i {
                0 => CheckpointType::Start,
                i if i == last => CheckpointType::End,
                _ => CheckpointType::Middle,
            },
            requires_lock: false,
            channel: None,
        })
        .collect();

    let mut channels: Vec<RouteChannel> = Vec::new();
    for i in 0..last {
        let (from, to) = (&stations[i], &stations[i + 1]);
        let Some(channel) = catalog.channel_for_hop(from, to)? else {
            continue;
        };
        checkpoints[i].requires_lock = true;
        checkpoints[i].channel = Some(channel.key.clone());

        match channels.last_mut() {
            Some(run) if run.key == channel.key && run.exit_index == i => {
                run.exit_index = i + 1;
                run.exit_station = to.clone();
            }
            _ => channels.push(RouteChannel {
                key: channel.key.clone(),
                entry_index: i,
                exit_index: i + 1,
                entry_station: from.clone(),
                exit_station: to.clone(),
            }),
        }
    }

    Ok(PlannedRoute {
        start_station: start_station.to_string(),
        end_station: end_station.to_string(),
        checkpoints,
        edges: path.edges,
        distance: path.distance,
        channels,
    })
}
