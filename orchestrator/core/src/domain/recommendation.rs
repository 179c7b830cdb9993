// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Recommendation Scoring
//!
//! Pure scoring of one vehicle against one pending job. Each factor produces a
//! base score in 0-100; the total is their weighted sum. Unavailable vehicles
//! are still listed (with the reasons) but score zero.
//!
//! Which vehicles are available depends on the job type:
//!
//! | Job type | Extra requirement |
//! |----------|-------------------|
//! | `CallForLoading` | no cargo, parked at a standby station |
//! | `SendToUnloading` | parked at a pickup station |
//! | `ReturnToWaiting` | none |
//! | `SendToCharge` | no battery floor; lowest battery ranks first |

use crate::domain::agv::{Agv, AgvId, AgvStatus};
use crate::domain::map::{Station, StationType};
use crate::domain::task_job::TaskJobType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Relative weight of each scoring factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_battery_weight")]
    pub battery_weight: f64,
    #[serde(default = "default_status_weight")]
    pub status_weight: f64,
    #[serde(default = "default_station_weight")]
    pub station_weight: f64,
}

fn default_battery_weight() -> f64 {
    0.20
}

fn default_status_weight() -> f64 {
    0.50
}

fn default_station_weight() -> f64 {
    0.30
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            battery_weight: default_battery_weight(),
            status_weight: default_status_weight(),
            station_weight: default_station_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn is_valid(&self) -> bool {
        let all = [self.battery_weight, self.status_weight, self.station_weight];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && all.iter().sum::<f64>() > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgvRecommendation {
    pub agv_id: AgvId,
    pub agv_code: String,
    pub is_available: bool,
    pub battery_percent: u8,
    pub total_score: f64,
    pub battery_score: f64,
    pub status_score: f64,
    pub station_priority_score: f64,
    pub distance_to_start: Option<f64>,
    pub recommend_reason: String,
}

pub fn battery_base_score(battery_percent: u8) -> f64 {
    f64::from(battery_percent.min(100))
}

pub fn status_base_score(status: AgvStatus) -> f64 {
    match status {
        AgvStatus::Idle => 100.0,
        AgvStatus::Charging => 30.0,
        AgvStatus::Moving => 15.0,
        AgvStatus::Error | AgvStatus::Offline => 0.0,
    }
}

/// Vehicles parked on low-priority stations score higher so that dispatching
/// them frees the favoured ones. Vehicles not on a station score zero.
pub fn station_base_score(station_priority: Option<i32>) -> f64 {
    match station_priority {
        Some(priority) => f64::from(100 - priority.clamp(0, 100)),
        None => 0.0,
    }
}

/// Rules `agv` fails for a `job_type` job, one reason per rule. Empty when
/// the vehicle may take the job.
pub fn eligibility_gaps(
    agv: &Agv,
    job_type: TaskJobType,
    parked_at: Option<&Station>,
    min_battery: u8,
) -> Vec<String> {
    let mut gaps = Vec::new();

    if !agv.is_free() {
        if agv.status != AgvStatus::Idle {
            gaps.push(format!("status {:?}", agv.status));
        }
        if agv.current_task_id.is_some() {
            gaps.push("running another task".to_string());
        }
    }
    if job_type != TaskJobType::SendToCharge && agv.battery_percent < min_battery {
        gaps.push(format!("battery {}% below {}%", agv.battery_percent, min_battery));
    }

    let parked_type = parked_at.map(|s| s.station_type);
    match job_type {
        TaskJobType::CallForLoading => {
            if agv.has_cargo {
                gaps.push("carrying cargo".to_string());
            }
            if parked_type != Some(StationType::Standby) {
                gaps.push("not parked at a standby station".to_string());
            }
        }
        TaskJobType::SendToUnloading => {
            if parked_type != Some(StationType::Pickup) {
                gaps.push("not parked at a pickup station".to_string());
            }
        }
        TaskJobType::ReturnToWaiting | TaskJobType::SendToCharge => {}
    }
    gaps
}

/// Score one vehicle for a `job_type` job.
///
/// `parked_at` is the station the vehicle occupies and `distance_to_start`
/// the straight-line distance to the job's start station.
pub fn score_candidate(
    agv: &Agv,
    job_type: TaskJobType,
    parked_at: Option<&Station>,
    distance_to_start: Option<f64>,
    weights: &ScoringWeights,
    min_battery: u8,
) -> AgvRecommendation {
    let mut reasons = eligibility_gaps(agv, job_type, parked_at, min_battery);
    let is_available = reasons.is_empty();

    let (battery_score, status_score, station_priority_score) = if is_available {
        (
            battery_base_score(agv.battery_percent) * weights.battery_weight,
            status_base_score(agv.status) * weights.status_weight,
            station_base_score(parked_at.map(|s| s.priority)) * weights.station_weight,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    if is_available {
        reasons.push(format!("battery {}%", agv.battery_percent));
        match parked_at {
            Some(station) => {
                reasons.push(format!("parked at {} (priority {})", station.code, station.priority))
            }
            None => reasons.push("not parked at a station".to_string()),
        }
        if let Some(distance) = distance_to_start {
            reasons.push(format!("{distance:.1} from start"));
        }
    }

    AgvRecommendation {
        agv_id: agv.id,
        agv_code: agv.code.clone(),
        is_available,
        battery_percent: agv.battery_percent,
        total_score: battery_score + status_score + station_priority_score,
        battery_score,
        status_score,
        station_priority_score,
        distance_to_start,
        recommend_reason: reasons.join(", "),
    }
}

/// Ranking order: available first, higher total, shorter distance (unknown
/// distances last), then vehicle code.
pub fn rank(a: &AgvRecommendation, b: &AgvRecommendation) -> Ordering {
    b.is_available
        .cmp(&a.is_available)
        .then_with(|| b.total_score.total_cmp(&a.total_score))
        .then_with(|| match (a.distance_to_start, b.distance_to_start) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.agv_code.cmp(&b.agv_code))
}

/// Ranking for a `job_type` job. Charging jobs go to the most drained
/// available vehicle; everything else uses [`rank`].
pub fn rank_for(job_type: TaskJobType, a: &AgvRecommendation, b: &AgvRecommendation) -> Ordering {
    match job_type {
        TaskJobType::SendToCharge => b
            .is_available
            .cmp(&a.is_available)
            .then_with(|| a.battery_percent.cmp(&b.battery_percent))
            .then_with(|| rank(a, b)),
        _ => rank(a, b),
    }
}
