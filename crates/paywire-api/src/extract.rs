//! Request extractors: the visitor's [`RequestContext`] and the tenant brand.

use std::{convert::Infallible, net::SocketAddr};

use axum::{
  extract::{ConnectInfo, FromRequestParts, Query},
  http::{HeaderMap, header, request::Parts},
};
use paywire_billing::RequestContext;
use paywire_core::session::Utm;
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, cookies};

/// Longest `news_session` value accepted from a client.
const MAX_SESSION_ID_LEN: usize = 128;

/// The caller's [`RequestContext`], built from headers, cookies and the query
/// string.
pub struct Visitor(pub RequestContext);

impl<T: Send + Sync> FromRequestParts<T> for Visitor {
  type Rejection = Infallible;

  async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
    Ok(Visitor(request_context(parts)))
  }
}

/// The brand this request is served for.
pub struct Brand(pub String);

impl<S, G, P> FromRequestParts<AppState<S, G, P>> for Brand
where
  S: Send + Sync,
  G: Send + Sync,
  P: Send + Sync,
{
  type Rejection = Infallible;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, G, P>,
  ) -> Result<Self, Self::Rejection> {
    let host = parts.headers.get(header::HOST).and_then(|v| v.to_str().ok());
    Ok(Brand(state.config.brand_for_host(host).to_string()))
  }
}

/// Attribution parameters any visitor-facing URL may carry.
#[derive(Debug, Default, Deserialize)]
struct VisitorQuery {
  utm_source:   Option<String>,
  utm_medium:   Option<String>,
  utm_campaign: Option<String>,
  page:         Option<String>,
}

impl VisitorQuery {
  /// A malformed query string carries no attribution.
  fn from_parts(parts: &Parts) -> Self {
    let Ok(Query(query)) = Query::<VisitorQuery>::try_from_uri(&parts.uri) else {
      return Self::default();
    };
    let keep = |v: Option<String>| v.filter(|v| !v.is_empty());
    Self {
      utm_source:   keep(query.utm_source),
      utm_medium:   keep(query.utm_medium),
      utm_campaign: keep(query.utm_campaign),
      page:         keep(query.page),
    }
  }
}

pub fn request_context(parts: &Parts) -> RequestContext {
  let headers = &parts.headers;
  let query = VisitorQuery::from_parts(parts);

  let (session_id, new_session) = match cookies::get(headers, cookies::SESSION_COOKIE)
    .filter(|id| id.len() <= MAX_SESSION_ID_LEN)
  {
    Some(id) => (id, false),
    None => (Uuid::new_v4().to_string(), true),
  };

  let referrer = header_str(headers, header::REFERER.as_str());
  RequestContext {
    ip: client_ip(parts),
    user_agent: header_str(headers, header::USER_AGENT.as_str()),
    headers: headers
      .iter()
      .filter_map(|(name, value)| {
        value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect(),
    msisdn_cookie: cookies::get(headers, cookies::MSISDN_COOKIE),
    session_id,
    new_session,
    landing_page: query.page.or_else(|| referrer.clone()),
    referrer,
    utm: Utm {
      source:   query.utm_source,
      medium:   query.utm_medium,
      campaign: query.utm_campaign,
    },
  }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
fn client_ip(parts: &Parts) -> Option<String> {
  let headers = &parts.headers;
  header_str(headers, "x-forwarded-for")
    .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
    .filter(|ip| !ip.is_empty())
    .or_else(|| header_str(headers, "x-real-ip"))
    .or_else(|| {
      parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}
