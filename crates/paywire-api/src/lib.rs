//! JSON HTTP API for paywire.
//!
//! Exposes an axum [`Router`] backed by any [`PortalStore`],
//! [`CarrierGateway`] and [`ContentPipeline`]. TLS and process concerns are the
//! caller's responsibility.

pub mod auth;
pub mod cookies;
pub mod error;
pub mod extract;
pub mod handlers;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use paywire_billing::{BillingSettings, pipeline::ContentPipeline};
use paywire_core::{gateway::CarrierGateway, store::PortalStore};
use serde::Deserialize;

pub use error::ApiError;

use handlers::{admin, public};

// ─── Configuration ────────────────────────────────────────────────────────────

/// One tenant and the hosts it is served on.
#[derive(Debug, Clone, Deserialize)]
pub struct BrandConfig {
  pub id:                  String,
  #[serde(default)]
  pub hosts:               Vec<String>,
  #[serde(default = "BrandConfig::default_currency")]
  pub currency:            String,
  #[serde(default = "BrandConfig::default_price")]
  pub default_price_cents: i64,
}

impl BrandConfig {
  fn default_currency() -> String { "EUR".into() }

  fn default_price() -> i64 { 99 }

  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id:                  id.into(),
      hosts:               Vec::new(),
      currency:            Self::default_currency(),
      default_price_cents: Self::default_price(),
    }
  }
}

/// HTTP-layer settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub default_brand:    String,
  pub brands:           Vec<BrandConfig>,
  /// argon2 PHC hash of the admin token. Admin routes answer 503 without it.
  pub admin_token_hash: Option<String>,
  /// Mark cookies `Secure`.
  pub cookie_secure:    bool,
  /// Externally visible origin, e.g. `https://news.example`. Derived from the
  /// `Host` header when unset.
  pub public_base_url:  Option<String>,
}

impl ApiConfig {
  /// The brand served on `host` (port ignored), or the default brand.
  pub fn brand_for_host(&self, host: Option<&str>) -> &str {
    let host = host
      .map(|h| h.rsplit_once(':').map_or(h, |(name, _)| name))
      .map(str::to_ascii_lowercase);
    host
      .and_then(|host| {
        self
          .brands
          .iter()
          .find(|b| b.hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)))
      })
      .map_or(self.default_brand.as_str(), |b| b.id.as_str())
  }

  pub fn brand(&self, id: &str) -> Option<&BrandConfig> {
    self.brands.iter().find(|b| b.id == id)
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, G, P> {
  pub store:    Arc<S>,
  pub gateway:  Arc<G>,
  pub pipeline: Arc<P>,
  pub settings: Arc<BillingSettings>,
  pub config:   Arc<ApiConfig>,
}

impl<S, G, P> Clone for AppState<S, G, P> {
  fn clone(&self) -> Self {
    Self {
      store:    self.store.clone(),
      gateway:  self.gateway.clone(),
      pipeline: self.pipeline.clone(),
      settings: self.settings.clone(),
      config:   self.config.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full API router for `state`.
pub fn router<S, G, P>(state: AppState<S, G, P>) -> Router
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  Router::new()
    .route("/healthz", get(|| async { "ok" }))
    // Visitors
    .route("/api/msisdn/detect", get(public::detect::<S, G, P>))
    .route("/api/track", post(public::track::<S, G, P>))
    .route("/api/articles", get(public::list_articles::<S, G, P>))
    .route("/api/articles/{id}", get(public::get_article::<S, G, P>))
    .route("/api/payment/start", post(public::start_payment::<S, G, P>))
    .route(
      "/api/payment/callback",
      get(public::callback_redirect::<S, G, P>).post(public::callback::<S, G, P>),
    )
    // Admin
    .route("/api/admin/login", post(admin::login::<S, G, P>))
    .route("/api/admin/stats", get(admin::stats::<S, G, P>))
    .route("/api/admin/customers", get(admin::customers::<S, G, P>))
    .route("/api/admin/customers/{msisdn}", get(admin::customer::<S, G, P>))
    .route("/api/admin/unlocks", get(admin::unlocks::<S, G, P>))
    .route("/api/admin/unlocks/{id}/refund", post(admin::refund::<S, G, P>))
    .route("/api/admin/billing-events", get(admin::billing_events::<S, G, P>))
    .route("/api/admin/articles", post(admin::create_article::<S, G, P>))
    .route("/api/admin/sessions/reset", post(admin::reset_sessions::<S, G, P>))
    .route("/api/admin/outbox/dead", get(admin::dead_outbox::<S, G, P>))
    .route("/api/admin/agents/run", post(admin::run_agents::<S, G, P>))
    .route("/api/admin/agents/runs/latest", get(admin::latest_run::<S, G, P>))
    .route("/api/admin/agents/runs/{id}", get(admin::run_status::<S, G, P>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
