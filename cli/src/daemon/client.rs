// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with the dispatcher API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use agv_dispatch_core::application::{ActiveChannel, CreateJobRequest};
use agv_dispatch_core::domain::path_lock::PathLock;
use agv_dispatch_core::domain::task_job::{JobSortKey, SortDirection, TaskJob, TaskJobStatus};

use super::base_url;

/// Filters accepted by `GET /api/jobs`
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub statuses: Vec<TaskJobStatus>,
    pub agv: Option<String>,
    pub sort: Option<JobSortKey>,
    pub direction: Option<SortDirection>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn query_string(&self) -> Result<String> {
        let mut params = Vec::new();
        if !self.statuses.is_empty() {
            let names = self
                .statuses
                .iter()
                .map(wire_name)
                .collect::<Result<Vec<_>>>()?;
            params.push(format!("status={}", names.join(",")));
        }
        if let Some(agv) = &self.agv {
            params.push(format!("agv={agv}"));
        }
        if let Some(sort) = &self.sort {
            params.push(format!("sort={}", wire_name(sort)?));
        }
        if let Some(direction) = &self.direction {
            params.push(format!("direction={}", wire_name(direction)?));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        Ok(if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        })
    }
}

/// Serialized name of a unit enum variant, e.g. `JobSortKey::CreatedAt` -> `created_at`
fn wire_name<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => anyhow::bail!("Expected a string value, got {}", other),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseResult {
    pub released: usize,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url(host, port),
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            anyhow::bail!("Failed to {} (HTTP {}): {}", action, status.as_u16(), message);
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response to {}", action))
    }

    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<TaskJob> {
        let response = self
            .client
            .post(format!("{}/api/jobs", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to create job")?;
        Self::parse(response, "create job").await
    }

    pub async fn cancel_job(&self, id: Uuid, reason: Option<String>) -> Result<TaskJob> {
        #[derive(Serialize)]
        struct CancelRequest {
            reason: Option<String>,
        }

        let response = self
            .client
            .post(format!("{}/api/jobs/{}/cancel", self.base_url, id))
            .json(&CancelRequest { reason })
            .send()
            .await
            .context("Failed to cancel job")?;
        Self::parse(response, "cancel job").await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<TaskJob> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{}", self.base_url, id))
            .send()
            .await
            .context("Failed to get job")?;
        Self::parse(response, "get job").await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<TaskJob>> {
        let response = self
            .client
            .get(format!("{}/api/jobs{}", self.base_url, filter.query_string()?))
            .send()
            .await
            .context("Failed to list jobs")?;
        Self::parse(response, "list jobs").await
    }

    pub async fn list_locks(&self) -> Result<Vec<PathLock>> {
        let response = self
            .client
            .get(format!("{}/api/locks", self.base_url))
            .send()
            .await
            .context("Failed to list locks")?;
        Self::parse(response, "list locks").await
    }

    pub async fn list_channels(&self) -> Result<Vec<ActiveChannel>> {
        let response = self
            .client
            .get(format!("{}/api/channels", self.base_url))
            .send()
            .await
            .context("Failed to list channels")?;
        Self::parse(response, "list channels").await
    }

    pub async fn release_channel(&self, key: &str) -> Result<ReleaseResult> {
        let response = self
            .client
            .post(format!("{}/api/channels/{}/release", self.base_url, key))
            .send()
            .await
            .context("Failed to release channel")?;
        Self::parse(response, "release channel").await
    }
}
