//! Admin-token extractor and standalone verifier.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};

use crate::{ApiConfig, AppState, cookies, error::ApiError};

/// Zero-size marker: present in the handler means the caller is an admin.
pub struct Admin;

/// Check `token` against the configured argon2 hash.
pub fn verify_token(token: &str, config: &ApiConfig) -> Result<(), ApiError> {
  let hash = config
    .admin_token_hash
    .as_deref()
    .ok_or_else(|| ApiError::NotConfigured("admin token is not configured".into()))?;

  let parsed_hash = PasswordHash::new(hash)
    .map_err(|_| ApiError::NotConfigured("admin token hash is malformed".into()))?;

  Argon2::default()
    .verify_password(token.as_bytes(), &parsed_hash)
    .map_err(|_| ApiError::Unauthorized)
}

/// Verify the `admin_token` cookie or a bearer token from headers.
pub fn verify_admin(headers: &HeaderMap, config: &ApiConfig) -> Result<(), ApiError> {
  if config.admin_token_hash.is_none() {
    return Err(ApiError::NotConfigured("admin token is not configured".into()));
  }

  let bearer = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .map(|t| t.trim().to_string());
  let token = bearer
    .or_else(|| cookies::get(headers, cookies::ADMIN_COOKIE))
    .ok_or(ApiError::Unauthorized)?;

  verify_token(&token, config)
}

impl<S, G, P> FromRequestParts<AppState<S, G, P>> for Admin
where
  S: Send + Sync,
  G: Send + Sync,
  P: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, G, P>,
  ) -> Result<Self, Self::Rejection> {
    verify_admin(&parts.headers, &state.config)?;
    Ok(Admin)
  }
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn config(token: Option<&str>) -> ApiConfig {
    use argon2::{PasswordHasher, password_hash::SaltString};
    use rand_core::OsRng;
    let hash = token.map(|t| {
      let salt = SaltString::generate(&mut OsRng);
      Argon2::default()
        .hash_password(t.as_bytes(), &salt)
        .unwrap()
        .to_string()
    });
    ApiConfig {
      default_brand:    "daily".into(),
      brands:           Vec::new(),
      admin_token_hash: hash,
      cookie_secure:    false,
      public_base_url:  None,
    }
  }

  fn headers(name: header::HeaderName, value: &'static str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(name, HeaderValue::from_static(value));
    h
  }

  #[test]
  fn bearer_token() {
    let config = config(Some("secret"));
    assert!(verify_admin(&headers(header::AUTHORIZATION, "Bearer secret"), &config).is_ok());
    assert!(matches!(
      verify_admin(&headers(header::AUTHORIZATION, "Bearer wrong"), &config),
      Err(ApiError::Unauthorized)
    ));
  }

  #[test]
  fn cookie_token() {
    let config = config(Some("secret"));
    assert!(verify_admin(&headers(header::COOKIE, "admin_token=secret"), &config).is_ok());
  }

  #[test]
  fn missing_token() {
    let config = config(Some("secret"));
    assert!(matches!(verify_admin(&HeaderMap::new(), &config), Err(ApiError::Unauthorized)));
  }

  #[test]
  fn unconfigured() {
    let config = config(None);
    assert!(matches!(
      verify_admin(&headers(header::AUTHORIZATION, "Bearer secret"), &config),
      Err(ApiError::NotConfigured(_))
    ));
  }
}
