//! Service error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  /// A required secret or collaborator is missing from configuration.
  #[error("not configured: {0}")]
  NotConfigured(String),

  #[error("upstream error: {0}")]
  Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Store(Box::new(e))
  }

  pub(crate) fn upstream<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Upstream(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
