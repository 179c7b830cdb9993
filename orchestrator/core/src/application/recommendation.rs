// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Recommendation Scorer
//!
//! Ranks the fleet against a pending job and picks the vehicle to assign.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Gather fleet and map state, delegate scoring to
//!   `domain::recommendation`, apply the selection policy
//! - **Collaborators:** `AgvRepository`, `MapRepository`

use crate::domain::agv::Agv;
use crate::domain::errors::DispatchError;
use crate::domain::map::MapGraph;
use crate::domain::recommendation::{rank_for, score_candidate, AgvRecommendation, ScoringWeights};
use crate::domain::repository::{AgvRepository, MapRepository};
use crate::domain::task_job::{TaskJob, TaskJobType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait RecommendationService: Send + Sync {
    /// Every known vehicle, ranked for a `job_type` job starting at `start_station`
    async fn recommend(
        &self,
        job_type: TaskJobType,
        start_station: &str,
    ) -> Result<Vec<AgvRecommendation>, DispatchError>;

    /// Best available vehicle for `job`, or `NoAvailableAgv`
    async fn select(&self, job: &TaskJob) -> Result<AgvRecommendation, DispatchError>;
}

pub struct StandardRecommendationService {
    agv_repo: Arc<dyn AgvRepository>,
    map_repo: Arc<dyn MapRepository>,
    weights: ScoringWeights,
    min_battery: u8,
}

impl StandardRecommendationService {
    pub fn new(
        agv_repo: Arc<dyn AgvRepository>,
        map_repo: Arc<dyn MapRepository>,
        weights: ScoringWeights,
        min_battery: u8,
    ) -> Self {
        Self {
            agv_repo,
            map_repo,
            weights,
            min_battery,
        }
    }

    async fn load_graph(&self) -> Result<MapGraph, DispatchError> {
        let graph = MapGraph::new(
            self.map_repo.list_nodes().await?,
            self.map_repo.list_edges().await?,
            self.map_repo.list_stations().await?,
        )?;
        Ok(graph)
    }

    fn score(
        &self,
        agv: &Agv,
        job_type: TaskJobType,
        graph: &MapGraph,
        start: Option<(f64, f64)>,
    ) -> AgvRecommendation {
        let parked_at = agv.current_station.as_deref().and_then(|code| graph.station(code));

        // Fall back to the parked station's coordinates when no pose was reported.
        let position = agv.position.map(|p| (p.x, p.y)).or_else(|| {
            agv.current_station
                .as_deref()
                .and_then(|code| graph.station_position(code))
        });
        let distance = match (position, start) {
            (Some((x, y)), Some((sx, sy))) => Some(((x - sx).powi(2) + (y - sy).powi(2)).sqrt()),
            _ => None,
        };

        score_candidate(agv, job_type, parked_at, distance, &self.weights, self.min_battery)
    }
}

#[async_trait]
impl RecommendationService for StandardRecommendationService {
    async fn recommend(
        &self,
        job_type: TaskJobType,
        start_station: &str,
    ) -> Result<Vec<AgvRecommendation>, DispatchError> {
        let graph = self.load_graph().await?;
        let start = graph.station_position(start_station);
        let agvs = self.agv_repo.list_all().await?;

        let mut ranked: Vec<AgvRecommendation> = agvs
            .iter()
            .map(|agv| self.score(agv, job_type, &graph, start))
            .collect();
        ranked.sort_by(|a, b| rank_for(job_type, a, b));

        debug!(
            ?job_type,
            start_station,
            total = ranked.len(),
            available = ranked.iter().filter(|r| r.is_available).count(),
            "Ranked fleet"
        );
        Ok(ranked)
    }

    async fn select(&self, job: &TaskJob) -> Result<AgvRecommendation, DispatchError> {
        self.recommend(job.job_type, &job.start_station)
            .await?
            .into_iter()
            .find(|r| r.is_available)
            .ok_or(DispatchError::NoAvailableAgv(job.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agv::{AgvStatus, Position};
    use crate::domain::map::{MapNode, Station, StationType};
    use crate::domain::task_job::TaskJobType;
    use crate::infrastructure::repositories::{InMemoryAgvRepository, InMemoryMapRepository};

    fn station(code: &str, node: &str, station_type: StationType) -> Station {
        Station {
            code: code.to_string(),
            name: None,
            node_code: node.to_string(),
            station_type,
            priority: 50,
        }
    }

    fn map() -> Arc<InMemoryMapRepository> {
        Arc::new(InMemoryMapRepository::new(
            vec![
                MapNode { code: "N1".into(), x: 0.0, y: 0.0 },
                MapNode { code: "N2".into(), x: 100.0, y: 0.0 },
                MapNode { code: "N3".into(), x: 5.0, y: 0.0 },
                MapNode { code: "N4".into(), x: 50.0, y: 0.0 },
            ],
            vec![],
            vec![
                station("S001", "N1", StationType::Standby),
                station("S002", "N2", StationType::Standby),
                station("S003", "N3", StationType::Standby),
                station("S004", "N4", StationType::Pickup),
            ],
        ))
    }

    async fn idle(repo: &InMemoryAgvRepository, code: &str, battery: u8, station: &str) {
        let mut agv = Agv::new(code);
        agv.status = AgvStatus::Idle;
        agv.battery_percent = battery;
        agv.current_station = Some(station.to_string());
        repo.save(&agv).await.unwrap();
    }

    #[tokio::test]
    async fn test_select_prefers_nearest_on_equal_score() {
        let agvs = Arc::new(InMemoryAgvRepository::new());
        idle(&agvs, "AGV01", 80, "S002").await;
        idle(&agvs, "AGV02", 80, "S003").await;

        let service =
            StandardRecommendationService::new(agvs, map(), ScoringWeights::default(), 20);
        let job = TaskJob::new(TaskJobType::CallForLoading, "S001", "S002", 30);

        let chosen = service.select(&job).await.unwrap();
        assert_eq!(chosen.agv_code, "AGV02");
        assert_eq!(chosen.distance_to_start, Some(5.0));
    }

    #[tokio::test]
    async fn test_reported_position_wins_over_station() {
        let agvs = Arc::new(InMemoryAgvRepository::new());
        idle(&agvs, "AGV01", 80, "S002").await;
        let mut agv = agvs.find_by_code("AGV01").await.unwrap().unwrap();
        agv.position = Some(Position { x: 3.0, y: 4.0, angle: 0.0 });
        agvs.save(&agv).await.unwrap();

        let service =
            StandardRecommendationService::new(agvs, map(), ScoringWeights::default(), 20);
        let ranked = service.recommend(TaskJobType::ReturnToWaiting, "S001").await.unwrap();
        assert_eq!(ranked[0].distance_to_start, Some(5.0));
    }

    #[tokio::test]
    async fn test_no_available_agv() {
        let agvs = Arc::new(InMemoryAgvRepository::new());
        idle(&agvs, "AGV01", 10, "S002").await;
        agvs.save(&Agv::new("AGV02")).await.unwrap();

        let service =
            StandardRecommendationService::new(agvs, map(), ScoringWeights::default(), 20);
        let job = TaskJob::new(TaskJobType::CallForLoading, "S001", "S002", 30);

        let err = service.select(&job).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoAvailableAgv(id) if id == job.id));

        let ranked = service.recommend(TaskJobType::CallForLoading, "S001").await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|r| !r.is_available));
    }

    #[tokio::test]
    async fn test_job_type_decides_which_station_qualifies() {
        let agvs = Arc::new(InMemoryAgvRepository::new());
        idle(&agvs, "AGV01", 80, "S003").await;
        idle(&agvs, "AGV02", 80, "S004").await;

        let service =
            StandardRecommendationService::new(agvs, map(), ScoringWeights::default(), 20);

        let loading = TaskJob::new(TaskJobType::CallForLoading, "S001", "S002", 30);
        assert_eq!(service.select(&loading).await.unwrap().agv_code, "AGV01");

        let unloading = TaskJob::new(TaskJobType::SendToUnloading, "S001", "S002", 30);
        assert_eq!(service.select(&unloading).await.unwrap().agv_code, "AGV02");
    }

    #[tokio::test]
    async fn test_charge_job_picks_most_drained_vehicle() {
        let agvs = Arc::new(InMemoryAgvRepository::new());
        idle(&agvs, "AGV01", 90, "S003").await;
        idle(&agvs, "AGV02", 8, "S002").await;

        let service =
            StandardRecommendationService::new(agvs, map(), ScoringWeights::default(), 20);
        let job = TaskJob::new(TaskJobType::SendToCharge, "S001", "S002", 30);

        let chosen = service.select(&job).await.unwrap();
        assert_eq!(chosen.agv_code, "AGV02");
        assert_eq!(chosen.battery_percent, 8);
    }
}
