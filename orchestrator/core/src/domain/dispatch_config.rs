// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Dispatcher Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) controlling:
// - scheduling tick and lock expiry sweep cadence
// - recommendation weights and battery floor
// - AGV health monitoring thresholds
// - admin API binding and metrics exporter

use crate::domain::recommendation::ScoringWeights;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "agv-dispatch/v1";
pub const KIND: &str = "DispatchConfig";
pub const CONFIG_PATH_ENV: &str = "AGV_DISPATCH_CONFIG_PATH";

/// Top-level dispatcher configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfigManifest {
    /// API version (must be "agv-dispatch/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DispatchConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: DispatchConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Site or deployment name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfigSpec {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub recommendation: RecommendationConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Site manifest (map, channels, fleet) seeded at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often pending jobs are matched and held vehicles re-polled
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// How often stale Approved locks are force-expired
    #[serde(with = "humantime_serde", default = "default_expiry_sweep_interval")]
    pub expiry_sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            expiry_sweep_interval: default_expiry_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default)]
    pub weights: ScoringWeights,

    /// Vehicles below this charge are never dispatched
    #[serde(default = "default_min_battery")]
    pub min_battery_percent: u8,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            min_battery_percent: default_min_battery(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease applied when a channel row carries no timeout of its own
    #[serde(default = "default_lock_timeout")]
    pub default_timeout_minutes: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout_minutes: default_lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Silence after which a vehicle is declared Offline
    #[serde(with = "humantime_serde", default = "default_offline_threshold")]
    pub offline_threshold: Duration,

    #[serde(with = "humantime_serde", default = "default_health_interval")]
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            offline_threshold: default_offline_threshold(),
            check_interval: default_health_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus exporter port; disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_expiry_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_min_battery() -> u8 {
    20
}

fn default_lock_timeout() -> u32 {
    crate::domain::channel::DEFAULT_TIMEOUT_MINUTES
}

fn default_offline_threshold() -> Duration {
    Duration::from_secs(60)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8090
}

impl Default for DispatchConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "agv-dispatch".to_string(),
                labels: None,
            },
            spec: DispatchConfigSpec::default(),
        }
    }
}

impl DispatchConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AGV_DISPATCH_CONFIG_PATH environment variable
    /// 2. ./agv-dispatch.yaml (working directory)
    /// 3. ~/.agv-dispatch/config.yaml (user home)
    /// 4. /etc/agv-dispatch/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./agv-dispatch.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".agv-dispatch").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/agv-dispatch/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse.
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AGV_DISPATCH_TICK_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    tracing::info!("Environment override: AGV_DISPATCH_TICK_MS={}", ms);
                    self.spec.scheduler.tick_interval = Duration::from_millis(ms);
                }
                _ => tracing::warn!(
                    "Invalid value for AGV_DISPATCH_TICK_MS: '{}'. Expected positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("AGV_DISPATCH_MIN_BATTERY") {
            match val.parse::<u8>() {
                Ok(pct) if pct <= 100 => {
                    tracing::info!("Environment override: AGV_DISPATCH_MIN_BATTERY={}", pct);
                    self.spec.recommendation.min_battery_percent = pct;
                }
                _ => tracing::warn!(
                    "Invalid value for AGV_DISPATCH_MIN_BATTERY: '{}'. Expected 0-100. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.scheduler.tick_interval.is_zero() {
            anyhow::bail!("spec.scheduler.tick_interval must be greater than zero");
        }

        if self.spec.scheduler.expiry_sweep_interval.is_zero() {
            anyhow::bail!("spec.scheduler.expiry_sweep_interval must be greater than zero");
        }

        if !self.spec.recommendation.weights.is_valid() {
            anyhow::bail!("spec.recommendation.weights must be non-negative and not all zero");
        }

        if self.spec.recommendation.min_battery_percent > 100 {
            anyhow::bail!(
                "spec.recommendation.min_battery_percent must be 0-100, got {}",
                self.spec.recommendation.min_battery_percent
            );
        }

        if self.spec.locks.default_timeout_minutes == 0 {
            anyhow::bail!("spec.locks.default_timeout_minutes must be greater than zero");
        }

        if self.spec.health.enabled && self.spec.health.check_interval.is_zero() {
            anyhow::bail!("spec.health.check_interval must be greater than zero");
        }

        Ok(())
    }
}
