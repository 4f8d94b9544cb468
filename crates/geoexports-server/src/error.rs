//! API error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use geoexports_filter::{ClauseError, FilterError};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Errors returned synchronously by the HTTP API.
///
/// Rendered as `{"api_error": <code>, "message": <text>}`.
#[derive(Debug)]
pub enum ApiError {
    /// Unknown export id or unsupported format (404).
    InvalidExport(String),

    /// A filter value does not parse for its column (400).
    InvalidFilter(Vec<ClauseError>),

    /// The request body is not what the endpoint expects (400).
    InvalidRequest(String),

    /// Identity may not read the export (403).
    Forbidden,

    /// Identity has no user record (404).
    NoUser,

    /// No destination email could be determined (500).
    NoEmail,

    /// Read path or swagger: the export does not exist (404).
    NotFound(String),

    /// Read path: the relation behind the export is missing (404).
    EmptyDataset(String),

    /// Identity header missing or invalid (401).
    Unauthorized(String),

    /// Unexpected fault, already logged. `detail` is only set in debug mode.
    Logged { detail: Option<String> },
}

impl ApiError {
    /// Log an unexpected fault and turn it into an opaque response.
    pub fn logged(err: impl fmt::Display, debug: bool) -> Self {
        error!(error = %err, api_error = "logged_error", "request failed");
        Self::Logged {
            detail: debug.then(|| err.to_string()),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidExport(_) => "invalid_export",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Forbidden => "forbidden",
            Self::NoUser => "no_user",
            Self::NoEmail => "no_email",
            Self::NotFound(_) => "not_found",
            Self::EmptyDataset(_) => "empty_dataset",
            Self::Unauthorized(_) => "unauthorized",
            Self::Logged { .. } => "logged_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidExport(_) | Self::NoUser | Self::NotFound(_) | Self::EmptyDataset(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidFilter(_) | Self::InvalidRequest(_) | Self::Logged { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoEmail => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExport(msg)
            | Self::InvalidRequest(msg)
            | Self::NotFound(msg)
            | Self::EmptyDataset(msg)
            | Self::Unauthorized(msg) => f.write_str(msg),
            Self::InvalidFilter(errors) => {
                write!(f, "{}", FilterError::InvalidFilter(errors.clone()))
            }
            Self::Forbidden => f.write_str("Not Allowed"),
            Self::NoUser => f.write_str("No user found for this identity"),
            Self::NoEmail => f.write_str("No email address to send the export to"),
            Self::Logged { detail: Some(detail) } => f.write_str(detail),
            Self::Logged { detail: None } => f.write_str("An error occurred, it has been logged"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        Self::InvalidFilter(err.clause_errors().to_vec())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "api_error": self.code(),
            "message": self.to_string(),
        });
        if let Self::InvalidFilter(errors) = &self {
            body["errors"] = json!(errors);
        }
        (self.status(), Json(body)).into_response()
    }
}
