use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{ApiConfig, HealthCheckResult};

/// Issues one health check against the monitored API.
///
/// Implementations never fail: every fault is reported as an unhealthy result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self) -> HealthCheckResult;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("API returned status {0}")]
    Status(u16),

    #[error("malformed health response: {0}")]
    Body(String),

    #[error("API reported status {0:?}")]
    NotOk(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
}

/// Probes `GET <base>/api/health`, healthy iff it answers `{"status": "ok"}`.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    url: String,
}

impl HttpProber {
    pub fn new(config: &ApiConfig) -> reqwest::Result<Self> {
        Ok(Self::with_client(config.http_client()?, config))
    }

    pub fn with_client(client: reqwest::Client, config: &ApiConfig) -> Self {
        Self {
            client,
            url: config.endpoint("/api/health"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let body: HealthBody = response
            .json()
            .await
            .map_err(|e| ProbeError::Body(e.to_string()))?;
        match body.status {
            Some(status) if status == "ok" => Ok(()),
            Some(status) => Err(ProbeError::NotOk(status)),
            None => Err(ProbeError::Body("missing status field".to_string())),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = self.check().await;
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(()) => {
                debug!("{} healthy in {}ms", self.url, response_time_ms);
                HealthCheckResult::healthy(response_time_ms, Utc::now())
            }
            Err(e) => {
                debug!("{} unhealthy after {}ms: {}", self.url, response_time_ms, e);
                HealthCheckResult::unhealthy(response_time_ms, Utc::now(), e.to_string())
            }
        }
    }
}
