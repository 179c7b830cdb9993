// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Map Graph
//!
//! Read-only lookup structure over the site layout: nodes, edges and the
//! stations attached to nodes. Built once from repository rows and consumed by
//! the route planner and the recommendation scorer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Validated adjacency view of the site map

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub code: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    #[default]
    Line,
    Arc,
}

/// A traversable connection between two nodes.
///
/// `distance` is in the same unit as node coordinates. One-way edges only
/// produce an adjacency entry from `start_node` to `end_node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    pub code: String,
    pub start_node: String,
    pub end_node: String,
    pub distance: f64,
    #[serde(default = "default_bidirectional")]
    pub bidirectional: bool,
    #[serde(default)]
    pub edge_type: EdgeType,
}

fn default_bidirectional() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationType {
    Pickup,
    Dropoff,
    Charge,
    Standby,
    Intersection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub node_code: String,
    pub station_type: StationType,
    /// Dispatch priority of the station, 0-100. Higher means the station is
    /// more valuable to keep occupied.
    #[serde(default)]
    pub priority: i32,
}

/// One outgoing adjacency entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    pub edge_code: String,
    pub to_node: String,
    pub distance: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("duplicate node code '{0}'")]
    DuplicateNode(String),

    #[error("duplicate station code '{0}'")]
    DuplicateStation(String),

    #[error("edge '{edge}' references unknown node '{node}'")]
    UnknownNode { edge: String, node: String },

    #[error("edge '{0}' has a non-positive or non-finite distance")]
    InvalidDistance(String),

    #[error("station '{station}' sits on unknown node '{node}'")]
    StationOnUnknownNode { station: String, node: String },
}

#[derive(Debug, Clone, Default)]
pub struct MapGraph {
    nodes: HashMap<String, MapNode>,
    stations: HashMap<String, Station>,
    station_by_node: HashMap<String, String>,
    adjacency: HashMap<String, Vec<Traversal>>,
}

impl MapGraph {
    pub fn new(
        nodes: Vec<MapNode>,
        edges: Vec<MapEdge>,
        stations: Vec<Station>,
    ) -> Result<Self, MapError> {
        let mut graph = MapGraph::default();

        for node in nodes {
            if graph.nodes.contains_key(&node.code) {
                return Err(MapError::DuplicateNode(node.code));
            }
            graph.nodes.insert(node.code.clone(), node);
        }

        for edge in edges {
            for endpoint in [&edge.start_node, &edge.end_node] {
                if !graph.nodes.contains_key(endpoint) {
                    return Err(MapError::UnknownNode {
                        edge: edge.code.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
            if !(edge.distance.is_finite() && edge.distance > 0.0) {
                return Err(MapError::InvalidDistance(edge.code));
            }

            graph
                .adjacency
                .entry(edge.start_node.clone())
                .or_default()
                .push(Traversal {
                    edge_code: edge.code.clone(),
                    to_node: edge.end_node.clone(),
                    distance: edge.distance,
                });
            if edge.bidirectional {
                graph
                    .adjacency
                    .entry(edge.end_node.clone())
                    .or_default()
                    .push(Traversal {
                        edge_code: edge.code.clone(),
                        to_node: edge.start_node.clone(),
                        distance: edge.distance,
                    });
            }
        }

        // Stable neighbour order keeps search results independent of input order.
        for neighbours in graph.adjacency.values_mut() {
            neighbours.sort_by(|a, b| {
                a.edge_code
                    .cmp(&b.edge_code)
                    .then_with(|| a.to_node.cmp(&b.to_node))
            });
        }

        for station in stations {
            if graph.stations.contains_key(&station.code) {
                return Err(MapError::DuplicateStation(station.code));
            }
            if !graph.nodes.contains_key(&station.node_code) {
                return Err(MapError::StationOnUnknownNode {
                    station: station.code,
                    node: station.node_code,
                });
            }
            graph
                .station_by_node
                .insert(station.node_code.clone(), station.code.clone());
            graph.stations.insert(station.code.clone(), station);
        }

        Ok(graph)
    }

    pub fn node(&self, code: &str) -> Option<&MapNode> {
        self.nodes.get(code)
    }

    pub fn station(&self, code: &str) -> Option<&Station> {
        self.stations.get(code)
    }

    pub fn station_at_node(&self, node_code: &str) -> Option<&Station> {
        self.station_by_node
            .get(node_code)
            .and_then(|code| self.stations.get(code))
    }

    pub fn neighbours(&self, node_code: &str) -> &[Traversal] {
        self.adjacency
            .get(node_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Coordinates of the node a station sits on.
    pub fn station_position(&self, station_code: &str) -> Option<(f64, f64)> {
        let station = self.stations.get(station_code)?;
        let node = self.nodes.get(&station.node_code)?;
        Some((node.x, node.y))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}
