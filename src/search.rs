//! Client for the search API that the status monitor watches.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ApiConfig;

/// Plugins queried when a request names none.
pub const DEFAULT_PLUGINS: [&str; 5] = ["pansearch", "pan666", "qupansou", "hunhepan", "jikepan"];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    All,
    Results,
    #[default]
    Merge,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    All,
    Tg,
    Plugin,
}

impl Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Results => write!(f, "results"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Tg => write!(f, "tg"),
            Self::Plugin => write!(f, "plugin"),
        }
    }
}

impl FromStr for ResultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "results" => Ok(Self::Results),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown result type {other:?}, expected all, results or merge")),
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "tg" => Ok(Self::Tg),
            "plugin" => Ok(Self::Plugin),
            other => Err(format!("unknown source {other:?}, expected all, tg or plugin")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub kw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<ResultType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(kw: impl Into<String>) -> Self {
        Self {
            kw: kw.into(),
            ..Self::default()
        }
    }

    fn plugins_or_default(&self) -> Vec<String> {
        self.plugins.clone().unwrap_or_else(|| {
            DEFAULT_PLUGINS
                .iter()
                .map(|plugin| (*plugin).to_string())
                .collect()
        })
    }

    /// Query pairs for `GET /api/search`.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("kw", self.kw.clone()),
            ("refresh", self.refresh.unwrap_or(false).to_string()),
            ("res", self.res.unwrap_or_default().to_string()),
            ("src", self.src.unwrap_or_default().to_string()),
            ("plugins", self.plugins_or_default().join(",")),
        ]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Link {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub message_id: String,
    pub unique_id: String,
    pub channel: String,
    pub datetime: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MergedLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub note: String,
    pub datetime: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchData {
    pub total: u64,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub merged_by_type: BTreeMap<String, Vec<MergedLink>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: SearchData,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: i64,
    message: Option<String>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{message}")]
    Api { code: i64, message: String },

    #[error("search failed with status {0}, please try again later")]
    Failed(u16),

    #[error("network error, please check your connection: {0}")]
    Network(String),

    #[error("request timed out, please try again later")]
    Timeout,

    #[error("malformed search response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Broad classes of failure, each with a message fit for end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    Server,
    SearchFailed,
}

impl ErrorKind {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Network => "Network connection failed, please check your network settings",
            Self::Timeout => "The request timed out, please try again later",
            Self::Server => "The server is temporarily unavailable, please try again later",
            Self::SearchFailed => "Search failed, please check the keyword or try again later",
        }
    }
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout => ErrorKind::Timeout,
            Self::Failed(status) if *status >= 500 => ErrorKind::Server,
            Self::Api { code, .. } if *code >= 500 => ErrorKind::Server,
            Self::Failed(_) | Self::Api { .. } | Self::Decode(_) => ErrorKind::SearchFailed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    url: String,
}

impl SearchClient {
    pub fn new(config: &ApiConfig) -> reqwest::Result<Self> {
        Ok(Self::with_client(config.http_client()?, config))
    }

    pub fn with_client(client: reqwest::Client, config: &ApiConfig) -> Self {
        Self {
            client,
            url: config.endpoint("/api/search"),
        }
    }

    /// `POST /api/search` with a JSON body. Missing plugins fall back to the defaults.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let mut body = request.clone();
        body.plugins = Some(request.plugins_or_default());
        debug!("Searching for {:?}", body.kw);
        let response = self.client.post(&self.url).json(&body).send().await?;
        Self::read(response).await
    }

    /// `GET /api/search` with the request encoded as query parameters.
    pub async fn search_get(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        debug!("Searching for {:?}", request.kw);
        let response = self
            .client
            .get(&self.url)
            .query(&request.query())
            .send()
            .await?;
        Self::read(response).await
    }

    async fn read(response: reqwest::Response) -> Result<SearchResponse, SearchError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SearchError::Decode(e.to_string()));
        }
        match response.json::<ErrorResponse>().await {
            Ok(ErrorResponse {
                code,
                message: Some(message),
            }) if !message.is_empty() => Err(SearchError::Api { code, message }),
            _ => Err(SearchError::Failed(status.as_u16())),
        }
    }
}
