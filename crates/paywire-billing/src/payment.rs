//! Starting a one-off article purchase.

use paywire_core::{
  gateway::{CarrierGateway, PaymentRequest},
  session::{EventKind, MsisdnConfidence, NewTrackingEvent},
  store::PortalStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Error, RequestContext, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentStartRequest {
  #[serde(alias = "articleId")]
  pub article_id: String,
  /// Relative path to come back to after the payment page.
  #[serde(default, alias = "returnUrl")]
  pub return_url: Option<String>,
}

/// Absolute URLs the provider needs, built by the HTTP layer from the public
/// base URL.
#[derive(Debug, Clone)]
pub struct GatewayUrls {
  /// Browser redirect after the payment page.
  pub redirect: String,
  /// Server-to-server callback.
  pub callback: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStart {
  pub transaction_id: String,
  pub redirect_url:   String,
}

pub async fn start_payment<S, G>(
  store: &S,
  gateway: &G,
  brand: &str,
  ctx: &RequestContext,
  request: PaymentStartRequest,
  urls: GatewayUrls,
) -> Result<PaymentStart>
where
  S: PortalStore,
  G: CarrierGateway,
{
  let article = store
    .get_article(brand, &request.article_id)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| Error::NotFound(format!("article {}", request.article_id)))?;

  let session = store
    .get_session(brand, &ctx.session_id)
    .await
    .map_err(Error::store)?;
  let msisdn = ctx.cookie_msisdn().or_else(|| {
    session
      .filter(|s| s.msisdn_confidence == MsisdnConfidence::Confirmed)
      .and_then(|s| s.msisdn)
  });

  let metadata = serde_json::json!({
    "articleId": article.article_id,
    "sessionId": ctx.session_id,
    "ip": ctx.ip,
    "returnUrl": request.return_url,
    "landingPage": ctx.landing_page,
  });

  let order_id = Uuid::new_v4().to_string();
  let started = gateway
    .start_payment(PaymentRequest {
      order_id:     order_id.clone(),
      amount_cents: article.price_cents,
      currency:     article.currency.clone(),
      description:  article.title.clone(),
      metadata:     metadata.to_string(),
      return_url:   urls.redirect,
      callback_url: urls.callback,
      msisdn:       msisdn.clone(),
    })
    .await
    .map_err(Error::upstream)?;

  let event = NewTrackingEvent {
    session_id: ctx.session_id.clone(),
    kind:       EventKind::PurchaseStart,
    article_id: Some(article.article_id.clone()),
    path:       ctx.landing_page.clone(),
    msisdn,
  };
  if let Err(e) = store.record_event(brand, event).await {
    warn!(error = %e, "failed to record purchase start");
  }

  info!(
    order_id,
    transaction_id = %started.transaction_id,
    article_id = %article.article_id,
    "payment started"
  );
  Ok(PaymentStart {
    transaction_id: started.transaction_id,
    redirect_url:   started.redirect_url,
  })
}
