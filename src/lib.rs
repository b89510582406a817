use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod config;
pub mod monitor;
pub mod prober;
pub mod search;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ApiConfig;
pub use monitor::MonitorHandle;
pub use prober::{HttpProber, Prober};
pub use store::{FileStore, HistoryStore, MemoryStore};

/// Maximum number of records kept in the status history.
pub const MAX_HISTORY: usize = 100;

/// Length in hours of the trailing window over which uptime is computed.
pub const UPTIME_WINDOW_HOURS: i64 = 24;

/// Key of the durable slot holding the serialized history.
pub const HISTORY_KEY: &str = "api_status_history";

/// Outcome of a single health probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub is_healthy: bool,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    #[serde(rename = "lastChecked", with = "iso_millis")]
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(response_time_ms: u64, checked_at: DateTime<Utc>) -> Self {
        Self {
            is_healthy: true,
            response_time_ms,
            checked_at,
            error: None,
        }
    }

    pub fn unhealthy(
        response_time_ms: u64,
        checked_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            is_healthy: false,
            response_time_ms,
            checked_at,
            error: Some(error.into()),
        }
    }
}

/// Persisted form of a `HealthCheckResult`. History is kept newest-first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(rename = "timestamp", with = "iso_millis")]
    pub checked_at: DateTime<Utc>,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    pub is_healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<HealthCheckResult> for HistoryRecord {
    fn from(result: HealthCheckResult) -> Self {
        Self {
            checked_at: result.checked_at,
            response_time_ms: result.response_time_ms,
            is_healthy: result.is_healthy,
            error: result.error,
        }
    }
}

impl From<&HistoryRecord> for HealthCheckResult {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            is_healthy: record.is_healthy,
            response_time_ms: record.response_time_ms,
            checked_at: record.checked_at,
            error: record.error.clone(),
        }
    }
}

/// What the status consumer reads: current status, full history and uptime.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub current_status: HealthCheckResult,
    pub history: Vec<HistoryRecord>,
    /// Percentage of healthy records within the last day, `0.0` when there are none.
    pub uptime: f64,
}

impl StatusSnapshot {
    /// Builds a snapshot from newest-first history as seen at `now`.
    #[must_use]
    pub fn from_history<'a, I>(history: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a HistoryRecord>,
    {
        let history: Vec<HistoryRecord> = history.into_iter().cloned().collect();
        let current_status = history.first().map_or_else(
            || HealthCheckResult::unhealthy(0, now, "No status data available"),
            HealthCheckResult::from,
        );
        let uptime = uptime_percent(&history, now);
        Self {
            current_status,
            history,
            uptime,
        }
    }

    /// Uptime rounded to two decimals for display.
    #[must_use]
    pub fn uptime_rounded(&self) -> f64 {
        (self.uptime * 100.0).round() / 100.0
    }
}

/// Share of healthy records checked within the trailing window, as a percentage.
#[must_use]
pub fn uptime_percent(history: &[HistoryRecord], now: DateTime<Utc>) -> f64 {
    let since = now - Duration::hours(UPTIME_WINDOW_HOURS);
    let (total, healthy) = history
        .iter()
        .filter(|record| record.checked_at > since)
        .fold((0usize, 0usize), |(total, healthy), record| {
            (total + 1, healthy + usize::from(record.is_healthy))
        });
    if total == 0 {
        return 0.0;
    }
    healthy as f64 / total as f64 * 100.0
}

/// ISO-8601 timestamps with millisecond precision, as browsers write them.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|time| time.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
