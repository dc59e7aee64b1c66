//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("conflict: {0}")]
  Conflict(String),

  /// A secret or collaborator the request needs is not configured.
  #[error("not configured: {0}")]
  NotConfigured(String),

  #[error("upstream error: {0}")]
  Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<paywire_billing::Error> for ApiError {
  fn from(e: paywire_billing::Error) -> Self {
    use paywire_billing::Error as E;
    match e {
      E::BadRequest(m) => Self::BadRequest(m),
      E::NotFound(m) => Self::NotFound(m),
      E::Conflict(m) => Self::Conflict(m),
      E::Unauthorized(_) => Self::Unauthorized,
      E::NotConfigured(m) => Self::NotConfigured(m),
      E::Upstream(e) => Self::Upstream(e),
      E::Store(e) => Self::Store(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::NotConfigured(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Upstream(e) => {
        error!(error = %e, "upstream failure");
        (StatusCode::BAD_GATEWAY, e.to_string())
      }
      ApiError::Store(e) => {
        error!(error = %e, "store failure");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
