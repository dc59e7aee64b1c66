//! Error type for `paywire-dimoco`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("gateway answered HTTP {0}")]
  Status(u16),

  #[error("malformed gateway response: {0}")]
  Xml(String),

  #[error("gateway response has no {0}")]
  Missing(&'static str),

  /// The gateway answered but refused the action.
  #[error("gateway rejected {action}: status {status}, code {code:?}, detail {detail:?}")]
  Rejected {
    action: &'static str,
    status: i32,
    code:   Option<String>,
    detail: Option<String>,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
