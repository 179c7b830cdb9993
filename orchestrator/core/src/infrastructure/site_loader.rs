// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Site Manifest YAML Parser
//!
//! Parses a site manifest (map, channel configuration and fleet roster) and
//! seeds it into repositories at startup. The map editor that produces these
//! files lives outside this crate.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates the site file schema to domain rows
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: agv-dispatch/v1
//! kind: SiteManifest
//! metadata:
//!   name: haining-plant
//! spec:
//!   nodes:
//!     - { code: N1, x: 0.0, y: 0.0 }
//!     - { code: N2, x: 10.0, y: 0.0 }
//!   edges:
//!     - { code: E1, start_node: N1, end_node: N2, distance: 10.0 }
//!   stations:
//!     - { code: S001, node_code: N1, station_type: pickup, priority: 40 }
//!     - { code: S002, node_code: N2, station_type: dropoff }
//!   channels:
//!     - { from_station: S001, to_station: S002, timeout_minutes: 5 }
//!   agvs:
//!     - { code: AGV01, current_station: S001 }
//! ```

use crate::domain::agv::Agv;
use crate::domain::channel::{ChannelCatalog, ChannelConfig};
use crate::domain::map::{MapEdge, MapGraph, MapNode, Station};
use crate::domain::repository::{AgvRepository, ChannelConfigRepository};
use crate::infrastructure::repositories::InMemoryMapRepository;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub const SITE_KIND: &str = "SiteManifest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: SiteMetadata,
    pub spec: SiteSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteSpec {
    #[serde(default)]
    pub nodes: Vec<MapNode>,
    #[serde(default)]
    pub edges: Vec<MapEdge>,
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub agvs: Vec<AgvSeed>,
}

/// Fleet roster entry. Vehicles start Offline until they report in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgvSeed {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_station: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub stations: usize,
    pub channels: usize,
    pub agvs: usize,
}

impl SiteManifest {
    /// Build the map graph, failing on dangling references
    pub fn graph(&self) -> Result<MapGraph> {
        MapGraph::new(
            self.spec.nodes.clone(),
            self.spec.edges.clone(),
            self.spec.stations.clone(),
        )
        .map_err(|e| anyhow!("Invalid site map: {}", e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_version != crate::domain::dispatch_config::API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'", self.api_version);
        }
        if self.kind != SITE_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, SITE_KIND);
        }

        let graph = self.graph()?;
        ChannelCatalog::from_configs(&self.spec.channels)
            .map_err(|e| anyhow!("Invalid channel configuration: {}", e))?;

        for config in &self.spec.channels {
            for station in [&config.from_station, &config.to_station] {
                if graph.station(station).is_none() {
                    anyhow::bail!("Channel references unknown station '{}'", station);
                }
            }
        }
        for agv in &self.spec.agvs {
            if let Some(station) = &agv.current_station {
                if graph.station(station).is_none() {
                    anyhow::bail!("AGV {} parked at unknown station '{}'", agv.code, station);
                }
            }
        }
        Ok(())
    }

    /// Write the manifest contents into the given repositories
    pub async fn seed(
        &self,
        map: &InMemoryMapRepository,
        channels: &dyn ChannelConfigRepository,
        agvs: &dyn AgvRepository,
    ) -> Result<SeedSummary> {
        map.replace(
            self.spec.nodes.clone(),
            self.spec.edges.clone(),
            self.spec.stations.clone(),
        );

        for config in &self.spec.channels {
            channels
                .save(config)
                .await
                .with_context(|| format!("Failed to save channel {}->{}", config.from_station, config.to_station))?;
        }

        for seed in &self.spec.agvs {
            if agvs.find_by_code(&seed.code).await?.is_some() {
                continue;
            }
            let mut agv = Agv::new(seed.code.clone());
            agv.name = seed.name.clone();
            agv.current_station = seed.current_station.clone();
            agvs.save(&agv)
                .await
                .with_context(|| format!("Failed to register AGV {}", seed.code))?;
        }

        let summary = SeedSummary {
            stations: self.spec.stations.len(),
            channels: self.spec.channels.len(),
            agvs: self.spec.agvs.len(),
        };
        info!(
            site = %self.metadata.name,
            stations = summary.stations,
            channels = summary.channels,
            agvs = summary.agvs,
            "Seeded site manifest"
        );
        Ok(summary)
    }
}

pub struct SiteManifestParser;

impl SiteManifestParser {
    pub fn parse_yaml(yaml: &str) -> Result<SiteManifest> {
        let manifest: SiteManifest =
            serde_yaml::from_str(yaml).context("Failed to parse site manifest YAML")?;
        manifest
            .validate()
            .map_err(|e| anyhow!("Site manifest validation failed: {}", e))?;
        Ok(manifest)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<SiteManifest> {
        let yaml = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read site manifest: {:?}", path.as_ref()))?;
        Self::parse_yaml(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::MapRepository;
    use crate::infrastructure::repositories::{InMemoryAgvRepository, InMemoryChannelConfigRepository};

    const SITE: &str = r#"
apiVersion: agv-dispatch/v1
kind: SiteManifest
metadata:
  name: test-site
spec:
  nodes:
    - { code: N1, x: 0.0, y: 0.0 }
    - { code: N2, x: 10.0, y: 0.0 }
  edges:
    - { code: E1, start_node: N1, end_node: N2, distance: 10.0 }
  stations:
    - { code: S001, node_code: N1, station_type: pickup, priority: 40 }
    - { code: S002, node_code: N2, station_type: dropoff }
  channels:
    - { from_station: S001, to_station: S002, timeout_minutes: 5 }
  agvs:
    - { code: AGV01, current_station: S001 }
"#;

    #[tokio::test]
    async fn test_parse_and_seed() {
        let manifest = SiteManifestParser::parse_yaml(SITE).unwrap();
        let map = InMemoryMapRepository::default();
        let channels = InMemoryChannelConfigRepository::new();
        let agvs = InMemoryAgvRepository::new();

        let summary = manifest.seed(&map, &channels, &agvs).await.unwrap();

        assert_eq!(summary, SeedSummary { stations: 2, channels: 1, agvs: 1 });
        assert!(map.list_edges().await.unwrap()[0].bidirectional);
        assert_eq!(channels.list_all().await.unwrap()[0].timeout_minutes, Some(5));
        let agv = agvs.find_by_code("AGV01").await.unwrap().unwrap();
        assert_eq!(agv.current_station.as_deref(), Some("S001"));
    }

    #[test]
    fn test_channel_on_unknown_station_is_rejected() {
        let yaml = SITE.replace("to_station: S002", "to_station: S999");
        let err = SiteManifestParser::parse_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("S999"));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let yaml = SITE.replace("kind: SiteManifest", "kind: DispatchConfig");
        assert!(SiteManifestParser::parse_yaml(&yaml).is_err());
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.yaml");
        std::fs::write(&path, SITE).unwrap();

        let manifest = SiteManifestParser::parse_file(&path).unwrap();
        assert_eq!(manifest.metadata.name, "test-site");
        assert_eq!(manifest.graph().unwrap().station_count(), 2);
    }
}
