//! Visitor-facing handlers.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/api/msisdn/detect` | May set `user_msisdn` |
//! | `POST` | `/api/track` | Body: `{"kind":"page_view","article_id":…}` |
//! | `GET`  | `/api/articles` | Teasers, `?limit=&offset=` |
//! | `GET`  | `/api/articles/{id}` | Body only when access is granted |
//! | `POST` | `/api/payment/start` | Body: `{"article_id":…,"return_url":…}` |
//! | `POST` | `/api/payment/callback` | JSON or form |
//! | `GET`  | `/api/payment/callback` | Redirects the browser back |
//!
//! Every handler that sees a visitor without a `news_session` cookie issues
//! one.

use axum::{
  Form, Json,
  extract::{FromRequest, Path, Query, Request, State},
  http::{HeaderMap, header},
  response::{IntoResponse, Redirect},
};
use chrono::{DateTime, Utc};
use paywire_billing::{
  RequestContext,
  access::{AccessDecision, check_access},
  callback::{self, CallbackPayload, parse_metadata, redirect_target},
  detect as detection,
  payment::{self, GatewayUrls, PaymentStart, PaymentStartRequest},
  pipeline::ContentPipeline,
  tracking::{self, TrackInput},
};
use paywire_core::{
  article::Article,
  gateway::CarrierGateway,
  store::{Page, PortalStore},
};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::{
  ApiConfig, AppState,
  cookies::SetCookies,
  error::ApiError,
  extract::{Brand, Visitor},
};

fn visitor_cookies(config: &ApiConfig, ctx: &RequestContext) -> SetCookies {
  let cookies = SetCookies::new(config.cookie_secure);
  if ctx.new_session { cookies.session(&ctx.session_id) } else { cookies }
}

// ─── Detection ────────────────────────────────────────────────────────────────

/// `GET /api/msisdn/detect`
pub async fn detect<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Visitor(ctx): Visitor,
) -> impl IntoResponse
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let found =
    detection::detect(&*state.store, &*state.gateway, &state.settings, &brand, &ctx).await;

  let mut cookies = visitor_cookies(&state.config, &ctx);
  if found.set_cookie
    && let Some(msisdn) = &found.msisdn
  {
    cookies = cookies.msisdn(msisdn);
  }
  (cookies, Json(found))
}

// ─── Tracking ─────────────────────────────────────────────────────────────────

/// `POST /api/track`
pub async fn track<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Visitor(ctx): Visitor,
  Json(input): Json<TrackInput>,
) -> Result<impl IntoResponse, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let tracked = tracking::track(&*state.store, &brand, &ctx, input).await?;
  let body = json!({
    "session_id": tracked.session.session_id,
    "event_id": tracked.event.event_id,
    "msisdn_confidence": tracked.session.msisdn_confidence,
  });
  Ok((visitor_cookies(&state.config, &ctx), Json(body)))
}

// ─── Articles ─────────────────────────────────────────────────────────────────

/// An article without its body.
#[derive(Debug, Serialize)]
pub struct ArticleTeaser {
  pub article_id:   String,
  pub title:        String,
  pub teaser:       String,
  pub price_cents:  i64,
  pub currency:     String,
  pub published_at: DateTime<Utc>,
}

impl From<&Article> for ArticleTeaser {
  fn from(a: &Article) -> Self {
    Self {
      article_id:   a.article_id.clone(),
      title:        a.title.clone(),
      teaser:       a.teaser.clone(),
      price_cents:  a.price_cents,
      currency:     a.currency.clone(),
      published_at: a.published_at,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ArticleView {
  #[serde(flatten)]
  pub article: ArticleTeaser,
  /// Present only when `access.granted`.
  pub body:    Option<String>,
  pub access:  AccessDecision,
}

/// `GET /api/articles`
pub async fn list_articles<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Query(page): Query<Page>,
) -> Result<Json<Vec<ArticleTeaser>>, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let articles = state
    .store
    .list_articles(&brand, page)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(articles.iter().map(ArticleTeaser::from).collect()))
}

/// `GET /api/articles/{id}`
pub async fn get_article<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Visitor(ctx): Visitor,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let article = state
    .store
    .get_article(&brand, &id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("article {id}")))?;

  let access = check_access(&*state.store, &state.settings, &brand, &ctx, &id).await?;
  let view = ArticleView {
    article: ArticleTeaser::from(&article),
    body: access.granted.then(|| article.body.clone()),
    access,
  };
  Ok((visitor_cookies(&state.config, &ctx), Json(view)))
}

// ─── Payments ─────────────────────────────────────────────────────────────────

/// `POST /api/payment/start`
pub async fn start_payment<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Visitor(ctx): Visitor,
  headers: HeaderMap,
  Json(request): Json<PaymentStartRequest>,
) -> Result<impl IntoResponse, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let base = public_base_url(&state.config, &headers)?;
  let callback = format!("{base}/api/payment/callback");
  let urls = GatewayUrls { redirect: callback.clone(), callback };

  let started: PaymentStart =
    payment::start_payment(&*state.store, &*state.gateway, &brand, &ctx, request, urls).await?;
  Ok((visitor_cookies(&state.config, &ctx), Json(started)))
}

fn public_base_url(config: &ApiConfig, headers: &HeaderMap) -> Result<String, ApiError> {
  if let Some(base) = &config.public_base_url {
    return Ok(base.trim_end_matches('/').to_string());
  }
  let host = headers
    .get(header::HOST)
    .and_then(|v| v.to_str().ok())
    .ok_or_else(|| ApiError::BadRequest("missing Host header".into()))?;
  let scheme = if config.cookie_secure { "https" } else { "http" };
  Ok(format!("{scheme}://{host}"))
}

/// `POST /api/payment/callback`: JSON or form body.
pub async fn callback<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  req: Request,
) -> Result<impl IntoResponse, ApiError>
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let is_json = req
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|ct| ct.starts_with("application/json"));

  let payload: CallbackPayload = if is_json {
    Json::<CallbackPayload>::from_request(req, &state)
      .await
      .map_err(|e| ApiError::BadRequest(e.body_text()))?
      .0
  } else {
    Form::<CallbackPayload>::from_request(req, &state)
      .await
      .map_err(|e| ApiError::BadRequest(e.body_text()))?
      .0
  };

  let result = callback::handle_callback(&*state.store, &state.settings, &brand, payload).await?;
  Ok(Json(json!({
    "ok": true,
    "status": result.unlock.status,
    "unlock_id": result.unlock.unlock_id,
    "already_processed": result.already_processed,
  })))
}

/// `GET /api/payment/callback`: the provider sends the browser here.
///
/// Always redirects; failures land on the error flag of the target page.
pub async fn callback_redirect<S, G, P>(
  State(state): State<AppState<S, G, P>>,
  Brand(brand): Brand,
  Query(payload): Query<CallbackPayload>,
) -> impl IntoResponse
where
  S: PortalStore + 'static,
  G: CarrierGateway + 'static,
  P: ContentPipeline + 'static,
{
  let cookies = SetCookies::new(state.config.cookie_secure);
  let raw_metadata = payload.metadata.clone();

  match callback::handle_callback(&*state.store, &state.settings, &brand, payload).await {
    Ok(result) => {
      let success = result.succeeded();
      let cookies = match result.unlock.msisdn.as_deref().filter(|_| success) {
        Some(msisdn) => cookies.msisdn(msisdn),
        None => cookies,
      };
      (cookies, Redirect::to(&redirect_target(&result.metadata, success)))
    }
    Err(e) => {
      warn!(error = %e, "browser callback rejected");
      let metadata = parse_metadata(raw_metadata.as_deref());
      (cookies, Redirect::to(&redirect_target(&metadata, false)))
    }
  }
}
