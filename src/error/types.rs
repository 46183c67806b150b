use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Startup checks failed: {}", failed.join(", "))]
    StartupChecksFailed { failed: Vec<String> },

    #[error("HTTP client error: {0}")]
    Client(#[from] ClientError),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::StartupChecksFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_)
            | AppError::InvalidConfig(_)
            | AppError::Server(_)
            | AppError::Client(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Don't expose internal error details
        let body = match &self {
            AppError::Internal(_) => "Internal error".to_string(),
            _ => self.to_string(),
        };

        (status, body).into_response()
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::InvalidConfig(report.to_string())
    }
}

/// Failures of [`crate::http::TracedHttpClient`].
///
/// Downstream HTTP statuses are not errors; only transport and request
/// construction problems are.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}
