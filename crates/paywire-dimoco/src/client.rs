//! Async HTTP client for the DIMOCO payment API.

use std::{collections::BTreeMap, time::Duration};

use paywire_core::{
  gateway::{
    CarrierGateway, IdentifyRequest, Identified, PaymentRequest, PaymentSession,
    RefundRequest,
  },
  money::format_cents,
  msisdn::{normalize_msisdn, redact},
};
use reqwest::Client;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::DimocoConfig,
  digest::signed_form,
  response::{self, ActionResult},
};

/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct DimocoClient {
  client: Client,
  config: DimocoConfig,
}

type Params = BTreeMap<&'static str, String>;

impl DimocoClient {
  pub fn new(config: DimocoConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self { client, config })
  }

  pub fn config(&self) -> &DimocoConfig { &self.config }

  fn params(&self, action: &'static str, request_id: String) -> Params {
    BTreeMap::from([
      ("action", action.to_string()),
      ("merchant", self.config.merchant.clone()),
      ("request_id", request_id),
    ])
  }

  /// Sign and post one action, returning the parsed answer whatever its status.
  async fn post(&self, action: &'static str, params: Params) -> Result<ActionResult> {
    let form = signed_form(&self.config.secret, params);
    let resp = self
      .client
      .post(self.config.endpoint())
      .form(&form)
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Status(resp.status().as_u16()));
    }
    let body = resp.bytes().await?;
    let result = response::parse(&body)?;
    debug!(action, status = result.status, sandbox = self.config.sandbox, "dimoco answered");
    Ok(result)
  }
}

impl CarrierGateway for DimocoClient {
  type Error = Error;

  async fn identify(&self, request: IdentifyRequest) -> Result<Option<Identified>> {
    let mut params = self.params("identify", request.request_id);
    params.insert("ip", request.ip);
    if let Some(ua) = request.user_agent {
      params.insert("user_agent", ua);
    }

    let result = self.post("identify", params).await?;
    if !result.is_ok() {
      return Err(result.rejected("identify"));
    }

    let Some(msisdn) = result.msisdn.as_deref().and_then(normalize_msisdn) else {
      if result.msisdn.is_some() {
        warn!("identify answered with an unusable msisdn");
      }
      return Ok(None);
    };
    debug!(msisdn = %redact(&msisdn), "subscriber identified");
    Ok(Some(Identified {
      msisdn,
      operator: result.operator,
      country: result.country,
    }))
  }

  async fn start_payment(&self, request: PaymentRequest) -> Result<PaymentSession> {
    let mut params = self.params("start", Uuid::new_v4().to_string());
    params.insert("amount", format_cents(request.amount_cents));
    params.insert("currency", request.currency);
    params.insert("order", request.order_id.clone());
    params.insert("description", request.description);
    params.insert("custom_parameters", request.metadata);
    params.insert("url_return", request.return_url);
    params.insert("url_callback", request.callback_url);
    if let Some(msisdn) = request.msisdn {
      params.insert("msisdn", msisdn);
    }

    let result = self.post("start", params).await?;
    if !result.is_ok_or_redirect() {
      return Err(result.rejected("start"));
    }

    let redirect_url = result.redirect_url.ok_or(Error::Missing("redirect url"))?;
    let transaction_id = result
      .transaction_id
      .or(result.reference)
      .unwrap_or(request.order_id);
    Ok(PaymentSession { transaction_id, redirect_url })
  }

  async fn refund(&self, request: RefundRequest) -> Result<()> {
    let mut params = self.params("refund", Uuid::new_v4().to_string());
    params.insert("transaction", request.transaction_id);
    params.insert("amount", format_cents(request.amount_cents));
    params.insert("currency", request.currency);
    if let Some(reason) = request.reason {
      params.insert("reason", reason);
    }

    let result = self.post("refund", params).await?;
    if !result.is_ok() {
      return Err(result.rejected("refund"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
  };

  use axum::{Form, Router, routing::post};

  use super::*;

  type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

  /// A one-route stand-in for the provider answering every post with `answer`.
  async fn fake_provider(answer: &'static str) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
      "/",
      post(move |Form(form): Form<HashMap<String, String>>| {
        let recorder = recorder.clone();
        async move {
          recorder.lock().unwrap().push(form);
          answer
        }
      }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/"), seen)
  }

  fn client(base_url: String) -> DimocoClient {
    DimocoClient::new(DimocoConfig {
      base_url,
      merchant: "m-1".into(),
      secret: "k".into(),
      ..Default::default()
    })
    .unwrap()
  }

  fn payment() -> PaymentRequest {
    PaymentRequest {
      order_id:     "order-1".into(),
      amount_cents: 99,
      currency:     "EUR".into(),
      description:  "Story".into(),
      metadata:     r#"{"articleId":"story"}"#.into(),
      return_url:   "https://news.example/return".into(),
      callback_url: "https://news.example/api/payment/callback".into(),
      msisdn:       None,
    }
  }

  #[tokio::test]
  async fn start_payment_posts_signed_form() {
    let (url, seen) = fake_provider(
      "<result><action_result><status>3</status>\
       <redirect><url>https://pay.example/x</url></redirect>\
       <transaction>tx-9</transaction></action_result></result>",
    )
    .await;

    let session = client(url).start_payment(payment()).await.unwrap();
    assert_eq!(session.transaction_id, "tx-9");
    assert_eq!(session.redirect_url, "https://pay.example/x");

    let forms = seen.lock().unwrap();
    let form = &forms[0];
    assert_eq!(form["action"], "start");
    assert_eq!(form["merchant"], "m-1");
    assert_eq!(form["amount"], "0.99");
    assert_eq!(form["order"], "order-1");
    assert_eq!(form["digest"].len(), 64);
  }

  #[tokio::test]
  async fn start_payment_falls_back_to_order_id() {
    let (url, _) = fake_provider(
      "<result><action_result><status>0</status>\
       <redirect><url>https://pay.example/y</url></redirect></action_result></result>",
    )
    .await;
    let session = client(url).start_payment(payment()).await.unwrap();
    assert_eq!(session.transaction_id, "order-1");
  }

  #[tokio::test]
  async fn refused_refund_is_an_error() {
    let (url, _) = fake_provider(
      "<result><action_result><status>2</status><code>17</code></action_result></result>",
    )
    .await;
    let err = client(url)
      .refund(RefundRequest {
        transaction_id: "tx-1".into(),
        amount_cents:   99,
        currency:       "EUR".into(),
        reason:         None,
      })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Rejected { action: "refund", status: 2, .. }));
  }

  #[tokio::test]
  async fn identify_normalises_msisdn() {
    let (url, seen) = fake_provider(
      "<result><action_result><status>0</status></action_result>\
       <customer><msisdn>+43 660 1234567</msisdn><operator>A1</operator></customer></result>",
    )
    .await;
    let who = client(url)
      .identify(IdentifyRequest {
        ip:         "62.46.1.1".into(),
        user_agent: None,
        request_id: "req-1".into(),
      })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(who.msisdn, "436601234567");
    assert_eq!(who.operator.as_deref(), Some("A1"));
    assert_eq!(seen.lock().unwrap()[0]["request_id"], "req-1");
  }

  #[tokio::test]
  async fn sandbox_flag_selects_sandbox_endpoint() {
    let (url, seen) = fake_provider(
      "<result><action_result><status>0</status></action_result></result>",
    )
    .await;
    let c = DimocoClient::new(DimocoConfig {
      base_url: "http://127.0.0.1:1/".into(),
      sandbox_base_url: url,
      sandbox: true,
      ..Default::default()
    })
    .unwrap();
    let who = c
      .identify(IdentifyRequest {
        ip:         "62.46.1.1".into(),
        user_agent: None,
        request_id: "req-2".into(),
      })
      .await
      .unwrap();
    assert!(who.is_none());
    assert_eq!(seen.lock().unwrap().len(), 1);
  }
}
