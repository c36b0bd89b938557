//! Request classification.
//!
//! Decides whether an inbound request is a DoH query at all, before any
//! I/O happens.

use axum::http::Method;

use crate::error::{ProxyError, Result};

/// Paths that accept DoH queries.
pub const ACCEPTED_PATHS: [&str; 2] = ["/", "/dns-query"];

/// How the DNS message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Message is base64url-encoded in the query string.
    Get,
    /// Message is the raw request body.
    Post,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Get => "GET",
            DeliveryMode::Post => "POST",
        }
    }
}

/// Classify a request by method and path.
///
/// Unknown paths are rejected before the method is looked at, so
/// `PUT /other` is a 404, not a 405.
pub fn classify(method: &Method, path: &str) -> Result<DeliveryMode> {
    if !ACCEPTED_PATHS.contains(&path) {
        return Err(ProxyError::RouteNotFound);
    }

    match method {
        &Method::GET => Ok(DeliveryMode::Get),
        &Method::POST => Ok(DeliveryMode::Post),
        _ => Err(ProxyError::MethodNotAllowed),
    }
}
