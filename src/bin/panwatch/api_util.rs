use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use panwatch::search::SearchError;
use std::{error::Error, fmt::Display};

#[derive(Debug)]
pub enum ApiError {
    ZeroInterval,
    Search(SearchError),
}

impl From<SearchError> for ApiError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroInterval => write!(f, "Monitoring interval must be greater than zero"),
            Self::Search(e) => e.fmt(f),
        }
    }
}

impl Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::ZeroInterval => (StatusCode::BAD_REQUEST, Self::ZeroInterval.to_string()),
            Self::Search(SearchError::Timeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                SearchError::Timeout.kind().user_message().to_string(),
            ),
            // Upstream messages pass through unchanged.
            Self::Search(e @ SearchError::Api { .. }) => (StatusCode::BAD_GATEWAY, e.to_string()),
            Self::Search(e) => (StatusCode::BAD_GATEWAY, e.kind().user_message().to_string()),
        }
        .into_response()
    }
}
