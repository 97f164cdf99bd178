//! HTTP-facing error type.
//!
//! Every failure on the agent endpoints is answered with a status code and a
//! plain-text message.

use std::fmt::Display;

use a3s_agent_core::error::AgentError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// API error with HTTP status mapping.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid request (400).
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong credentials (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Authorization denied (403).
    #[error("{0}")]
    Forbidden(String),

    /// Entity not found (404).
    #[error("{0}")]
    NotFound(String),

    /// Wrong HTTP method (405).
    #[error("{0}")]
    MethodNotAllowed(String),

    /// No acceptable response media type (406).
    #[error("{0}")]
    NotAcceptable(String),

    /// Request media type not handled for this call (415).
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Call kind not implemented (501).
    #[error("{0}")]
    NotImplemented(String),

    /// Agent not ready to serve the call (503).
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Collaborator or runtime failure (500).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let challenge = matches!(self, ApiError::Unauthorized(_));
        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response();
        if challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"a3s-agent\""),
            );
        }
        response
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::SerializationError(msg)
            | AgentError::RecordIoError(msg)
            | AgentError::ValidationError(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
