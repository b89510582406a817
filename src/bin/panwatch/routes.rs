use crate::api_util::ApiError;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use panwatch::{
    search::{ResultType, SearchClient, SearchRequest, SearchResponse, SourceType},
    HealthCheckResult, MonitorHandle, StatusSnapshot,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub monitor: MonitorHandle,
    pub search: SearchClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/status/check", post(post_check))
        .route("/status/history", axum::routing::delete(delete_history))
        .route(
            "/monitoring",
            get(get_monitoring)
                .put(put_monitoring)
                .delete(delete_monitoring),
        )
        .route("/search", get(get_search))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.monitor.status().await)
}

async fn post_check(State(state): State<AppState>) -> Json<HealthCheckResult> {
    Json(state.monitor.check_now().await)
}

async fn delete_history(State(state): State<AppState>) -> StatusCode {
    state.monitor.clear_history().await;
    StatusCode::NO_CONTENT
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct MonitoringState {
    pub monitoring: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMonitoring {
    pub interval_ms: u64,
}

async fn get_monitoring(State(state): State<AppState>) -> Json<MonitoringState> {
    Json(MonitoringState {
        monitoring: state.monitor.is_monitoring().await,
    })
}

async fn put_monitoring(
    State(state): State<AppState>,
    Json(start): Json<StartMonitoring>,
) -> Result<Json<MonitoringState>, ApiError> {
    if start.interval_ms == 0 {
        return Err(ApiError::ZeroInterval);
    }
    state
        .monitor
        .start_monitoring(Duration::from_millis(start.interval_ms))
        .await;
    Ok(Json(MonitoringState { monitoring: true }))
}

async fn delete_monitoring(State(state): State<AppState>) -> Json<MonitoringState> {
    state.monitor.stop_monitoring().await;
    Json(MonitoringState { monitoring: false })
}

#[derive(Deserialize)]
struct SearchParams {
    kw: String,
    refresh: Option<bool>,
    res: Option<ResultType>,
    src: Option<SourceType>,
    /// Comma-separated plugin names.
    plugins: Option<String>,
}

impl From<SearchParams> for SearchRequest {
    fn from(params: SearchParams) -> Self {
        Self {
            refresh: params.refresh,
            res: params.res,
            src: params.src,
            plugins: params
                .plugins
                .map(|plugins| plugins.split(',').map(str::to_string).collect()),
            ..SearchRequest::new(params.kw)
        }
    }
}

async fn get_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let response = state.search.search_get(&params.into()).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use panwatch::{ApiConfig, MemoryStore, Prober, SystemClock};
    use std::sync::Arc;

    struct AlwaysDown;

    #[async_trait]
    impl Prober for AlwaysDown {
        async fn probe(&self) -> HealthCheckResult {
            HealthCheckResult::unhealthy(7, Utc::now(), "connection refused")
        }
    }

    async fn spawn_app() -> String {
        let monitor = MonitorHandle::new(
            Arc::new(AlwaysDown),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
        );
        // Nothing listens on port 9 locally, so searches fail fast.
        let search = SearchClient::new(&ApiConfig::new("http://127.0.0.1:9")).unwrap();
        let app = router(AppState { monitor, search });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn status_check_and_clear() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let status: StatusSnapshot = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(status.history.is_empty());
        assert_eq!(
            status.current_status.error.as_deref(),
            Some("No status data available")
        );

        let checked: HealthCheckResult = client
            .post(format!("{base}/status/check"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!checked.is_healthy);
        assert_eq!(checked.response_time_ms, 7);

        let status: StatusSnapshot = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.history.len(), 1);
        assert_eq!(status.uptime, 0.0);

        let cleared = client
            .delete(format!("{base}/status/history"))
            .send()
            .await
            .unwrap();
        assert_eq!(cleared.status(), reqwest::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn monitoring_can_be_toggled() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let zero = client
            .put(format!("{base}/monitoring"))
            .json(&serde_json::json!({ "intervalMs": 0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(zero.status(), reqwest::StatusCode::BAD_REQUEST);

        let started: MonitoringState = client
            .put(format!("{base}/monitoring"))
            .json(&serde_json::json!({ "intervalMs": 60_000 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(started, MonitoringState { monitoring: true });

        let current: MonitoringState = client
            .get(format!("{base}/monitoring"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(current.monitoring);

        let stopped: MonitoringState = client
            .delete(format!("{base}/monitoring"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!stopped.monitoring);
    }

    #[tokio::test]
    async fn unreachable_search_api_is_bad_gateway() {
        let base = spawn_app().await;
        let response = reqwest::get(format!("{base}/search?kw=rust&res=all"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn search_params_split_plugins() {
        let request = SearchRequest::from(SearchParams {
            kw: "rust".to_string(),
            refresh: None,
            res: Some(ResultType::All),
            src: None,
            plugins: Some("pan666,jikepan".to_string()),
        });
        assert_eq!(request.kw, "rust");
        assert_eq!(request.res, Some(ResultType::All));
        assert_eq!(
            request.plugins,
            Some(vec!["pan666".to_string(), "jikepan".to_string()])
        );
    }
}
