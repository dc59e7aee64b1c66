//! Error type for `paywire-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A text column held a value outside its enum.
  #[error("unknown {kind} value in database: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("article already exists: {0}")]
  ArticleExists(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
