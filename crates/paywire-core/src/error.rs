//! Error types for `paywire-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid CIDR range: {0:?}")]
  InvalidCidr(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
