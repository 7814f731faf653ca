//! Request-boundary errors and their JSON rendering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::extractor::ExtractorError;
use crate::registry::NotFound;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unknown or expired stream id. Never says which.
    #[error("stream not found or expired")]
    StreamNotFound,

    /// Upstream could not be reached before any byte was sent to the client.
    #[error("upstream request failed: {0}")]
    UpstreamTransport(#[source] reqwest::Error),

    #[error("thumbnail not found")]
    ThumbnailNotFound,

    #[error("thumbnail request failed: {0}")]
    ThumbnailTransport(#[source] reqwest::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("no such route")]
    RouteNotFound,

    #[error("search failed: {0}")]
    Search(#[source] ExtractorError),

    #[error("could not resolve audio: {0}")]
    Resolve(#[source] ExtractorError),
}

impl From<NotFound> for GatewayError {
    fn from(_: NotFound) -> Self {
        Self::StreamNotFound
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::StreamNotFound | Self::ThumbnailNotFound | Self::RouteNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::UpstreamTransport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ThumbnailTransport(_) | Self::Search(_) | Self::Resolve(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Message exposed to clients. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::StreamNotFound => "Stream not found or expired".to_string(),
            Self::UpstreamTransport(_) => "Stream failed".to_string(),
            Self::ThumbnailNotFound => "Thumbnail not found".to_string(),
            Self::ThumbnailTransport(_) => "Thumbnail failed".to_string(),
            Self::BadRequest(message) => message.clone(),
            Self::RouteNotFound => "Not found".to_string(),
            Self::Search(_) => "Search failed".to_string(),
            Self::Resolve(_) => "Could not resolve audio".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = serde_json::json!({
            "error": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, GatewayError>;
