//! HTTP tests: the full router over an in-memory store and a fake gateway.

use std::{io, sync::Arc, time::Duration};

use axum::{
  Router,
  body::Body,
  http::{HeaderMap, Request, StatusCode, header},
};
use paywire_billing::{BillingSettings, pipeline::ContentPipeline};
use paywire_core::{
  article::NewArticle,
  gateway::{
    CarrierGateway, IdentifyRequest, Identified, PaymentRequest, PaymentSession,
    RefundRequest,
  },
  store::PortalStore,
};
use paywire_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{ApiConfig, AppState, BrandConfig, router};

const MSISDN: &str = "436601234567";
const TOKEN: &str = "letmein";

struct FakeGateway;

impl CarrierGateway for FakeGateway {
  type Error = io::Error;

  async fn identify(&self, _: IdentifyRequest) -> Result<Option<Identified>, io::Error> {
    Ok(None)
  }

  async fn start_payment(&self, request: PaymentRequest) -> Result<PaymentSession, io::Error> {
    Ok(PaymentSession {
      transaction_id: request.order_id,
      redirect_url:   "https://pay.example/checkout".into(),
    })
  }

  async fn refund(&self, _: RefundRequest) -> Result<(), io::Error> { Ok(()) }
}

struct FakePipeline;

impl ContentPipeline for FakePipeline {
  type Error = io::Error;

  async fn run(&self, _brand: &str) -> Result<Value, io::Error> {
    Ok(json!({ "articles": 2 }))
  }
}

type TestState = AppState<SqliteStore, FakeGateway, FakePipeline>;

async fn make_state(admin_token: Option<&str>) -> TestState {
  use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
  use rand_core::OsRng;

  let hash = admin_token.map(|token| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
      .hash_password(token.as_bytes(), &salt)
      .unwrap()
      .to_string()
  });

  let store = SqliteStore::open_in_memory().await.unwrap();
  store
    .create_article("daily", NewArticle {
      article_id:   "story".into(),
      title:        "The Story".into(),
      teaser:       "Teaser".into(),
      body:         "Body".into(),
      price_cents:  99,
      currency:     "EUR".into(),
      published_at: None,
    })
    .await
    .unwrap();

  let daily = BrandConfig {
    hosts: vec!["daily.example".into()],
    default_price_cents: 49,
    ..BrandConfig::new("daily")
  };
  let weekly = BrandConfig { hosts: vec!["weekly.example".into()], ..BrandConfig::new("weekly") };

  AppState {
    store:    Arc::new(store),
    gateway:  Arc::new(FakeGateway),
    pipeline: Arc::new(FakePipeline),
    settings: Arc::new(BillingSettings::default()),
    config:   Arc::new(ApiConfig {
      default_brand:    "daily".into(),
      brands:           vec![daily, weekly],
      admin_token_hash: hash,
      cookie_secure:    false,
      public_base_url:  None,
    }),
  }
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
  let res = app.oneshot(req).await.unwrap();
  let status = res.status();
  let headers = res.headers().clone();
  let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
  let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, headers, body)
}

fn get(uri: &str) -> axum::http::request::Builder {
  Request::builder().method("GET").uri(uri).header(header::HOST, "daily.example")
}

fn post_json(uri: &str) -> axum::http::request::Builder {
  Request::builder()
    .method("POST")
    .uri(uri)
    .header(header::HOST, "daily.example")
    .header(header::CONTENT_TYPE, "application/json")
}

fn json_body(body: Value) -> Body { Body::from(body.to_string()) }

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
  headers
    .get_all(header::SET_COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok().map(str::to_string))
    .collect()
}

fn callback_json(tx: &str, session_id: &str) -> Value {
  json!({
    "transactionId": tx,
    "status": "success",
    "msisdn": MSISDN,
    "amount": "0.99",
    "currency": "EUR",
    "metadata": { "articleId": "story", "sessionId": session_id },
  })
}

// ─── Visitors ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz() {
  let state = make_state(None).await;
  let (status, _, _) = send(router(state), get("/healthz").body(Body::empty()).unwrap()).await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn detect_from_carrier_header_sets_cookies() {
  let state = make_state(None).await;
  let req = get("/api/msisdn/detect")
    .header("x-forwarded-for", "62.46.1.1")
    .header("x-msisdn", MSISDN)
    .body(Body::empty())
    .unwrap();
  let (status, headers, body) = send(router(state), req).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["source"], "header");
  assert_eq!(body["confidence"], "CONFIRMED");
  assert_eq!(body["msisdn"], MSISDN);

  let cookies = set_cookies(&headers);
  assert!(cookies.iter().any(|c| c.starts_with("news_session=")));
  assert!(cookies.iter().any(|c| c.starts_with(&format!("user_msisdn={MSISDN};"))));
  assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("SameSite=Lax")));
}

#[tokio::test]
async fn unknown_article_is_json_404() {
  let state = make_state(None).await;
  let req = get("/api/articles/missing").body(Body::empty()).unwrap();
  let (status, _, body) = send(router(state), req).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn paywall_opens_after_callback() {
  let state = make_state(None).await;
  let article = || {
    get("/api/articles/story")
      .header(header::COOKIE, "news_session=s1")
      .body(Body::empty())
      .unwrap()
  };

  let (status, headers, body) = send(router(state.clone()), article()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["access"]["granted"], false);
  assert_eq!(body["body"], Value::Null);
  assert_eq!(body["title"], "The Story");
  assert!(set_cookies(&headers).is_empty());

  let req = post_json("/api/payment/callback")
    .body(json_body(callback_json("tx-1", "s1")))
    .unwrap();
  let (status, _, body) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "completed");
  assert_eq!(body["already_processed"], false);

  let (_, _, body) = send(router(state), article()).await;
  assert_eq!(body["access"]["granted"], true);
  assert_eq!(body["access"]["basis"], "session");
  assert_eq!(body["body"], "Body");
}

#[tokio::test]
async fn browser_callback_redirects_with_cookie() {
  let state = make_state(None).await;
  let metadata = urlencoding::encode(r#"{"articleId":"story"}"#).into_owned();
  let uri = format!(
    "/api/payment/callback?transactionId=tx-9&status=success&msisdn={MSISDN}&metadata={metadata}"
  );
  let (status, headers, _) = send(router(state), get(&uri).body(Body::empty()).unwrap()).await;

  assert_eq!(status, StatusCode::SEE_OTHER);
  assert_eq!(headers[header::LOCATION], "/articles/story?unlocked=true");
  assert!(set_cookies(&headers).iter().any(|c| c.starts_with("user_msisdn=")));
}

#[tokio::test]
async fn browser_callback_failure_redirects_with_error() {
  let state = make_state(None).await;
  let uri = "/api/payment/callback?status=success";
  let (status, headers, _) = send(router(state), get(uri).body(Body::empty()).unwrap()).await;

  assert_eq!(status, StatusCode::SEE_OTHER);
  assert_eq!(headers[header::LOCATION], "/?error=payment_failed");
  assert!(set_cookies(&headers).is_empty());
}

#[tokio::test]
async fn form_callback() {
  let state = make_state(None).await;
  let req = Request::builder()
    .method("POST")
    .uri("/api/payment/callback")
    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
    .body(Body::from("transactionId=tx-5&status=cancelled"))
    .unwrap();
  let (status, _, body) = send(router(state), req).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "failed");
}

#[tokio::test]
async fn callback_without_transaction_is_rejected() {
  let state = make_state(None).await;
  let req = post_json("/api/payment/callback")
    .body(json_body(json!({ "status": "success" })))
    .unwrap();
  let (status, _, body) = send(router(state), req).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].is_string());
}

#[tokio::test]
async fn payment_start_returns_redirect() {
  let state = make_state(None).await;
  let req = post_json("/api/payment/start")
    .header(header::COOKIE, "news_session=s1")
    .body(json_body(json!({ "article_id": "story", "return_url": "/articles/story" })))
    .unwrap();
  let (status, _, body) = send(router(state), req).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["redirect_url"], "https://pay.example/checkout");
}

#[tokio::test]
async fn tracking_keeps_existing_session() {
  let state = make_state(None).await;
  let req = post_json("/api/track")
    .header(header::COOKIE, "news_session=s1")
    .body(json_body(json!({ "kind": "page_view", "article_id": "story" })))
    .unwrap();
  let (status, headers, body) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["session_id"], "s1");
  assert!(set_cookies(&headers).is_empty());

  let article = state.store.get_article("daily", "story").await.unwrap().unwrap();
  assert_eq!(article.view_count, 1);
}

#[tokio::test]
async fn brand_follows_host() {
  let state = make_state(None).await;

  let (_, _, daily) =
    send(router(state.clone()), get("/api/articles").body(Body::empty()).unwrap()).await;
  assert_eq!(daily.as_array().unwrap().len(), 1);
  assert_eq!(daily[0].get("body"), None);

  let req = Request::builder()
    .uri("/api/articles")
    .header(header::HOST, "weekly.example:8080")
    .body(Body::empty())
    .unwrap();
  let (_, _, weekly) = send(router(state), req).await;
  assert_eq!(weekly, json!([]));
}

// ─── Admin ────────────────────────────────────────────────────────────────────

fn admin(req: axum::http::request::Builder) -> axum::http::request::Builder {
  req.header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
}

#[tokio::test]
async fn admin_requires_token() {
  let state = make_state(Some(TOKEN)).await;

  let (status, _, _) =
    send(router(state.clone()), get("/api/admin/stats").body(Body::empty()).unwrap()).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let (status, _, body) =
    send(router(state), admin(get("/api/admin/stats")).body(Body::empty()).unwrap()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["unlocks_completed"], 0);
}

#[tokio::test]
async fn admin_without_configured_token_is_unavailable() {
  let state = make_state(None).await;
  let (status, _, _) =
    send(router(state), admin(get("/api/admin/stats")).body(Body::empty()).unwrap()).await;
  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn login_sets_admin_cookie() {
  let state = make_state(Some(TOKEN)).await;

  let req = post_json("/api/admin/login")
    .body(json_body(json!({ "token": TOKEN })))
    .unwrap();
  let (status, headers, _) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::OK);
  let cookie = set_cookies(&headers).into_iter().next().unwrap();
  assert!(cookie.starts_with("admin_token="));
  assert!(cookie.contains("Max-Age=43200"));

  let req = get("/api/admin/customers")
    .header(header::COOKIE, format!("admin_token={TOKEN}"))
    .body(Body::empty())
    .unwrap();
  let (status, _, _) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::OK);

  let req = post_json("/api/admin/login")
    .body(json_body(json!({ "token": "guess" })))
    .unwrap();
  let (status, _, _) = send(router(state), req).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_creates_articles_with_brand_defaults() {
  let state = make_state(Some(TOKEN)).await;
  let create = || {
    admin(post_json("/api/admin/articles"))
      .body(json_body(json!({ "article_id": "fresh", "title": "Fresh" })))
      .unwrap()
  };

  let (status, _, body) = send(router(state.clone()), create()).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(body["price_cents"], 49);
  assert_eq!(body["currency"], "EUR");

  let (status, _, _) = send(router(state), create()).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_refund_flow() {
  let state = make_state(Some(TOKEN)).await;

  let req = post_json("/api/payment/callback")
    .body(json_body(callback_json("tx-1", "s1")))
    .unwrap();
  let (_, _, paid) = send(router(state.clone()), req).await;
  let unlock_id = paid["unlock_id"].as_str().unwrap().to_string();

  let uri = format!("/api/admin/unlocks/{unlock_id}/refund");
  let req = admin(post_json(&uri))
    .body(json_body(json!({ "reason": "complaint" })))
    .unwrap();
  let (status, _, body) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["mode"], "gateway");
  assert_eq!(body["unlock"]["status"], "refunded");

  let req = admin(post_json(&uri)).body(Body::empty()).unwrap();
  let (status, _, _) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::CONFLICT);

  let (_, _, customer) = send(
    router(state),
    admin(get(&format!("/api/admin/customers/+{MSISDN}"))).body(Body::empty()).unwrap(),
  )
  .await;
  assert_eq!(customer["purchase_count"], 0);
}

#[tokio::test]
async fn agent_runs_are_pollable() {
  let state = make_state(Some(TOKEN)).await;

  let req = admin(post_json("/api/admin/agents/run")).body(Body::empty()).unwrap();
  let (status, _, run) = send(router(state.clone()), req).await;
  assert_eq!(status, StatusCode::ACCEPTED);
  let run_id = run["run_id"].as_str().unwrap().to_string();

  let uri = format!("/api/admin/agents/runs/{run_id}");
  let mut last = Value::Null;
  for _ in 0..50 {
    let (_, _, body) =
      send(router(state.clone()), admin(get(&uri)).body(Body::empty()).unwrap()).await;
    last = body;
    if last["status"] == "succeeded" {
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert_eq!(last["status"], "succeeded");
  assert_eq!(last["summary"]["articles"], 2);

  let (status, _, latest) = send(
    router(state),
    admin(get("/api/admin/agents/runs/latest")).body(Body::empty()).unwrap(),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(latest["run_id"], run_id.as_str());
}
