//! Admin handlers. Everything except `login` requires [`Admin`].
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/admin/login` | Body: `{"token":…}`; sets `admin_token` |
//! | `GET`  | `/api/admin/stats` | |
//! | `GET`  | `/api/admin/customers` | `?limit=&offset=` |
//! | `GET`  | `/api/admin/customers/{msisdn}` | 404 if unknown |
//! | `GET`  | `/api/admin/unlocks` | `?limit=&offset=` |
//! | `POST` | `/api/admin/unlocks/{id}/refund` | Optional body: `{"reason":…}` |
//! | `GET`  | `/api/admin/billing-events` | `?limit=&offset=` |
//! | `POST` | `/api/admin/articles` | 409 if the slug exists |
//! | `POST` | `/api/admin/sessions/reset` | |
//! | `GET`  | `/api/admin/outbox/dead` | |
//! | `POST` | `/api/admin/agents/run` | 202; runs in the background |
//! | `GET`  | `/api/admin/agents/runs/latest` | |
//! | `GET`  | `/api/admin/agents/runs/{id}` | |

use axum::{
  Json,
  body::Bytes,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use paywire_billing::{
  pipeline::{self, ContentPipeline},
  refund::{self as refunds, RefundOutcome},
};
use paywire_core::{
  article::{Article, NewArticle},
  customer::Customer,
  gateway::CarrierGateway,
  msisdn::normalize_msisdn,
  outbox::OutboxEntry,
  pipeline::PipelineRun,
  store::{Page, PortalStats, PortalStore},
  unlock::{BillingEvent, Unlock},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  AppState,
  auth::{Admin, verify_token},
  cookies::SetCookies,
  error::ApiError,
  extract::Brand,
};

// ─── Login ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginBody {
  pub token: String,
}

/// `POST /api/admin/login`
pub async fn login<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  if let Err(e) = verify_token(&body.token, &state.config) {
    warn!("admin login refused");
    return Err(e);
  }
  let cookies = SetCookies::new(state.config.cookie_secure).admin(&body.token);
  Ok((cookies, Json(json!({ "ok": true }))))
}

// ─── Analytics and ledgers ────────────────────────────────────────────────────

/// `GET /api/admin/stats`
pub async fn stats<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
) -> Result<Json<PortalStats>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let stats = state
    .store
    .stats(&brand)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(stats))
}

/// `GET /api/admin/customers`
pub async fn customers<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Query(page): Query<Page>,
) -> Result<Json<Vec<Customer>>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let customers = state
    .store
    .list_customers(&brand, page)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(customers))
}

/// `GET /api/admin/customers/{msisdn}`
pub async fn customer<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Path(raw): Path<String>,
) -> Result<Json<Customer>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let msisdn = normalize_msisdn(&raw)
    .ok_or_else(|| ApiError::BadRequest(format!("not a valid msisdn: {raw}")))?;
  state
    .store
    .get_customer(&brand, &msisdn)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("customer {msisdn}")))
}

/// `GET /api/admin/unlocks`
pub async fn unlocks<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Query(page): Query<Page>,
) -> Result<Json<Vec<Unlock>>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let unlocks = state
    .store
    .list_unlocks(&brand, page)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(unlocks))
}

/// `GET /api/admin/billing-events`
pub async fn billing_events<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Query(page): Query<Page>,
) -> Result<Json<Vec<BillingEvent>>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let events = state
    .store
    .list_billing_events(&brand, page)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(events))
}

/// `GET /api/admin/outbox/dead`
pub async fn dead_outbox<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Query(page): Query<Page>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let entries = state
    .store
    .list_dead_outbox(&brand, page)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(entries))
}

// ─── Refunds ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
  #[serde(default)]
  pub reason: Option<String>,
}

/// `POST /api/admin/unlocks/{id}/refund`
pub async fn refund<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Path(id): Path<Uuid>,
  body: Bytes,
) -> Result<Json<RefundOutcome>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let body: RefundBody = if body.is_empty() {
    RefundBody::default()
  } else {
    serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
  };

  let outcome = refunds::refund(
    &*state.store,
    &*state.gateway,
    &state.settings,
    &brand,
    id,
    body.reason,
  )
  .await?;
  Ok(Json(outcome))
}

// ─── Content ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateArticleBody {
  pub article_id:   String,
  pub title:        String,
  #[serde(default)]
  pub teaser:       String,
  #[serde(default)]
  pub body:         String,
  /// Defaults to the brand's price.
  pub price_cents:  Option<i64>,
  /// Defaults to the brand's currency.
  pub currency:     Option<String>,
  pub published_at: Option<DateTime<Utc>>,
}

fn is_slug(s: &str) -> bool {
  !s.is_empty()
    && s.len() <= 200
    && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// `POST /api/admin/articles`
pub async fn create_article<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Json(body): Json<CreateArticleBody>,
) -> Result<(StatusCode, Json<Article>), ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  if !is_slug(&body.article_id) {
    return Err(ApiError::BadRequest(format!("invalid article id: {:?}", body.article_id)));
  }
  if body.title.trim().is_empty() {
    return Err(ApiError::BadRequest("title is required".into()));
  }
  if body.price_cents.is_some_and(|p| p < 0) {
    return Err(ApiError::BadRequest("price_cents must not be negative".into()));
  }

  if state
    .store
    .get_article(&brand, &body.article_id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .is_some()
  {
    return Err(ApiError::Conflict(format!("article {} already exists", body.article_id)));
  }

  let defaults = state.config.brand(&brand);
  let article = NewArticle {
    article_id:   body.article_id,
    title:        body.title,
    teaser:       body.teaser,
    body:         body.body,
    price_cents:  body
      .price_cents
      .or(defaults.map(|b| b.default_price_cents))
      .unwrap_or(99),
    currency:     body
      .currency
      .or(defaults.map(|b| b.currency.clone()))
      .unwrap_or_else(|| state.settings.default_currency.clone()),
    published_at: body.published_at,
  };
  let article = state
    .store
    .create_article(&brand, article)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok((StatusCode::CREATED, Json(article)))
}

/// `POST /api/admin/sessions/reset`
pub async fn reset_sessions<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
) -> Result<impl IntoResponse, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let deleted = state
    .store
    .reset_sessions(&brand)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  info!(brand, deleted, "sessions reset");
  Ok(Json(json!({ "deleted": deleted })))
}

// ─── Content pipeline ─────────────────────────────────────────────────────────

/// `POST /api/admin/agents/run`
pub async fn run_agents<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
) -> Result<(StatusCode, Json<PipelineRun>), ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let run = pipeline::enqueue_run(&*state.store, &brand).await?;

  let store = state.store.clone();
  let content = state.pipeline.clone();
  let run_id = run.run_id;
  tokio::spawn(async move {
    if let Err(e) = pipeline::execute_run(&*store, &*content, &brand, run_id).await {
      warn!(%run_id, error = %e, "pipeline run could not be recorded");
    }
  });

  Ok((StatusCode::ACCEPTED, Json(run)))
}

/// `GET /api/admin/agents/runs/{id}`
pub async fn run_status<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Path(id): Path<Uuid>,
) -> Result<Json<PipelineRun>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  Ok(Json(pipeline::run_status(&*state.store, &brand, id).await?))
}

/// `GET /api/admin/agents/runs/latest`
pub async fn latest_run<S, G, P>(
  _: Admin,
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
) -> Result<Json<PipelineRun>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  pipeline::latest_run(&*state.store, &brand)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("no pipeline runs yet".into()))
}
