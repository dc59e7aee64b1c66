//! Cookie parsing and `Set-Cookie` emission.

use std::convert::Infallible;

use axum::{
  http::{HeaderMap, HeaderValue, header},
  response::{IntoResponseParts, ResponseParts},
};

pub const MSISDN_COOKIE: &str = "user_msisdn";
pub const SESSION_COOKIE: &str = "news_session";
pub const ADMIN_COOKIE: &str = "admin_token";

const YEAR_SECS: u64 = 365 * 24 * 60 * 60;
const ADMIN_SECS: u64 = 12 * 60 * 60;

/// Look up one cookie in the request's `Cookie` headers.
pub fn get(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get_all(header::COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(k, _)| *k == name)
    .map(|(_, v)| v.trim_matches('"').to_string())
    .filter(|v| !v.is_empty())
}

/// Cookies to set on a response.
#[derive(Debug, Default)]
pub struct SetCookies {
  secure:  bool,
  cookies: Vec<String>,
}

impl SetCookies {
  pub fn new(secure: bool) -> Self { Self { secure, cookies: Vec::new() } }

  pub fn msisdn(mut self, msisdn: &str) -> Self {
    self.push(MSISDN_COOKIE, msisdn, YEAR_SECS);
    self
  }

  pub fn session(mut self, session_id: &str) -> Self {
    self.push(SESSION_COOKIE, session_id, YEAR_SECS);
    self
  }

  pub fn admin(mut self, token: &str) -> Self {
    self.push(ADMIN_COOKIE, token, ADMIN_SECS);
    self
  }

  fn push(&mut self, name: &str, value: &str, max_age: u64) {
    let secure = if self.secure { "; Secure" } else { "" };
    self.cookies.push(format!(
      "{name}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax{secure}"
    ));
  }
}

impl IntoResponseParts for SetCookies {
  type Error = Infallible;

  fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
    for cookie in self.cookies {
      // Values are ids, digits and tokens; anything else is dropped.
      if let Ok(value) = HeaderValue::from_str(&cookie) {
        res.headers_mut().append(header::SET_COOKIE, value);
      }
    }
    Ok(res)
  }
}
