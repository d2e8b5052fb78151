//! Request-level error type.
//!
//! Handlers return `Result<T, ApiError>`; the [`IntoResponse`] impl picks the
//! status code and log severity per category and only ever sends a short
//! `{ "error": ... }` body to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Failure of a third-party AI service (completion, embedding, vector search).
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} is not configured: {detail}")]
    NotConfigured {
        service: &'static str,
        detail: &'static str,
    },

    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response malformed: {detail}")]
    Malformed {
        service: &'static str,
        detail: String,
    },
}

impl UpstreamError {
    pub fn request(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| UpstreamError::Request { service, source }
    }

    pub fn malformed(service: &'static str, detail: impl Into<String>) -> Self {
        UpstreamError::Malformed {
            service,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => {
                warn!(reason = %m, "rejected request");
                (StatusCode::BAD_REQUEST, m.clone())
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Upstream(e) => {
                warn!(error = %e, "upstream service failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "El asistente no está disponible en este momento. Probá de nuevo en unos minutos."
                        .to_string(),
                )
            }
            ApiError::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error procesando la solicitud.".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
