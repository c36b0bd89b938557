//! Error types for the proxy.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the request pipeline.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Path outside `/` and `/dns-query`.
    #[error("not found")]
    RouteNotFound,

    /// Method other than GET or POST on an accepted path.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The request carries nothing to forward.
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// POST body larger than a DNS message can be.
    #[error("payload too large")]
    PayloadTooLarge,

    /// Every attempt failed or the race timed out.
    ///
    /// Carries no detail about which upstreams were tried.
    #[error("all upstreams failed")]
    AllUpstreamsFailed,

    /// Background cache population failed.
    #[error("cache write failed: {0}")]
    CacheWriteFailed(String),

    /// Invalid startup configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    /// HTTP status returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::AllUpstreamsFailed => StatusCode::BAD_GATEWAY,
            ProxyError::CacheWriteFailed(_) | ProxyError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Why a single race attempt lost.
///
/// Never shown to clients, only logged.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {0}")]
    Status(StatusCode),
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        AttemptError::Transport(err.to_string())
    }
}

/// Result type alias for `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
