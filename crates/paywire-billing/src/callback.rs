//! Payment callbacks from the billing provider.
//!
//! `validate → verify signature → parse metadata → persist unlock and effects
//! → drain effects → acknowledge`. The unlock and its effects are written in
//! one store transaction keyed by transaction id, so a provider that retries a
//! callback cannot charge a customer's aggregates twice.

use paywire_core::{
  money::parse_amount_cents,
  msisdn::{normalize_msisdn, redact},
  outbox::Effect,
  signature::{callback_signing_string, verify},
  store::PortalStore,
  unlock::{BillingEventKind, NewBillingEvent, NewUnlock, Unlock, UnlockStatus},
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::{BillingSettings, Error, Result, outbox::drain_quietly};

// ─── Payload ─────────────────────────────────────────────────────────────────

/// Callback fields as the provider sends them, from a JSON body, a form body
/// or a query string. Numbers and nested objects are accepted as text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackPayload {
  #[serde(default, alias = "transactionId", deserialize_with = "lenient")]
  pub transaction_id: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub status:         Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub msisdn:         Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub amount:         Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub currency:       Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub metadata:       Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub signature:      Option<String>,
}

fn lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
  use serde_json::Value;
  Ok(match Option::<Value>::deserialize(d)? {
    None | Some(Value::Null) => None,
    Some(Value::String(s)) => Some(s),
    Some(other) => Some(other.to_string()),
  })
}

/// The merchant data we attached when starting the payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackMetadata {
  #[serde(default)]
  pub article_id:   Option<String>,
  #[serde(default)]
  pub session_id:   Option<String>,
  #[serde(default)]
  pub return_url:   Option<String>,
  #[serde(default)]
  pub ip:           Option<String>,
  #[serde(default)]
  pub landing_page: Option<String>,
}

/// Parse metadata JSON, percent-decoding it first if needed. Anything
/// unparsable yields empty metadata.
pub fn parse_metadata(raw: Option<&str>) -> CallbackMetadata {
  let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
    return CallbackMetadata::default();
  };
  if let Ok(meta) = serde_json::from_str(raw) {
    return meta;
  }
  let decoded = urlencoding::decode(raw).ok();
  match decoded.as_deref().map(serde_json::from_str::<CallbackMetadata>) {
    Some(Ok(meta)) => meta,
    _ => {
      warn!("callback metadata is not valid JSON; ignoring it");
      CallbackMetadata::default()
    }
  }
}

// ─── Processing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CallbackResult {
  pub unlock:            Unlock,
  pub metadata:          CallbackMetadata,
  /// The transaction had already been recorded; nothing was written.
  pub already_processed: bool,
  /// The payload carried a valid signature.
  pub verified:          bool,
}

impl CallbackResult {
  pub fn succeeded(&self) -> bool { self.unlock.status == UnlockStatus::Completed }
}

pub async fn handle_callback<S: PortalStore>(
  store: &S,
  settings: &BillingSettings,
  brand: &str,
  payload: CallbackPayload,
) -> Result<CallbackResult> {
  let transaction_id = payload
    .transaction_id
    .as_deref()
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .ok_or_else(|| Error::BadRequest("transaction_id is required".into()))?
    .to_string();
  let raw_status = payload.status.clone().unwrap_or_default();

  let verified = match payload.signature.as_deref() {
    Some(signature) => {
      let secret = settings.callback_secret.as_deref().ok_or_else(|| {
        Error::NotConfigured("callback secret is not configured".into())
      })?;
      let message = callback_signing_string(
        &transaction_id,
        &raw_status,
        payload.msisdn.as_deref(),
        payload.amount.as_deref(),
        payload.currency.as_deref(),
      );
      if !verify(secret, &message, signature) {
        warn!(transaction_id, "callback signature mismatch");
        return Err(Error::Unauthorized("invalid callback signature".into()));
      }
      true
    }
    None => {
      warn!(transaction_id, "unsigned callback accepted without verification");
      false
    }
  };

  let metadata = parse_metadata(payload.metadata.as_deref());
  let status = UnlockStatus::from_callback(&raw_status);
  let msisdn = payload.msisdn.as_deref().and_then(normalize_msisdn);

  let article = match metadata.article_id.as_deref() {
    Some(id) => store.get_article(brand, id).await.map_err(Error::store)?,
    None => None,
  };
  let amount_cents = payload
    .amount
    .as_deref()
    .and_then(parse_amount_cents)
    .or(article.as_ref().map(|a| a.price_cents))
    .unwrap_or(0);
  let currency = payload
    .currency
    .clone()
    .filter(|c| !c.trim().is_empty())
    .or(article.as_ref().map(|a| a.currency.clone()))
    .unwrap_or_else(|| settings.default_currency.clone());
  let sandbox = msisdn.as_deref().is_some_and(|m| settings.is_sandbox_msisdn(m));

  let effects = if status == UnlockStatus::Completed {
    purchase_effects(&transaction_id, &metadata, msisdn.as_deref(), amount_cents, &currency, sandbox)
  } else {
    Vec::new()
  };

  let unlock = NewUnlock {
    transaction_id: transaction_id.clone(),
    msisdn: msisdn.clone(),
    article_id: metadata.article_id.clone(),
    session_id: metadata.session_id.clone(),
    amount_cents,
    currency,
    status,
    sandbox,
  };
  let outcome = store
    .record_unlock(brand, unlock, effects)
    .await
    .map_err(Error::store)?;
  let already_processed = outcome.is_duplicate();

  if already_processed {
    info!(transaction_id, "callback already processed");
  } else {
    drain_quietly(store, settings, brand).await;
    info!(
      transaction_id,
      status = %outcome.unlock().status,
      msisdn = %msisdn.as_deref().map(redact).unwrap_or_default(),
      sandbox,
      verified,
      "callback processed"
    );
  }

  Ok(CallbackResult {
    unlock: outcome.into_unlock(),
    metadata,
    already_processed,
    verified,
  })
}

/// The bookkeeping a completed payment implies.
fn purchase_effects(
  transaction_id: &str,
  metadata: &CallbackMetadata,
  msisdn: Option<&str>,
  amount_cents: i64,
  currency: &str,
  sandbox: bool,
) -> Vec<Effect> {
  let mut effects = Vec::with_capacity(5);
  if let Some(article_id) = &metadata.article_id {
    effects.push(Effect::ArticleUnlocks { article_id: article_id.clone(), delta: 1 });
  }
  if let Some(msisdn) = msisdn {
    effects.push(Effect::CustomerPurchase {
      msisdn: msisdn.to_string(),
      amount_cents,
      currency: currency.to_string(),
    });
  }
  effects.push(Effect::BillingEvent(NewBillingEvent {
    kind: BillingEventKind::Charge,
    transaction_id: transaction_id.to_string(),
    msisdn: msisdn.map(str::to_string),
    article_id: metadata.article_id.clone(),
    amount_cents,
    currency: currency.to_string(),
  }));
  if let Some(msisdn) = msisdn {
    if let Some(session_id) = &metadata.session_id {
      effects.push(Effect::LinkSession {
        session_id: session_id.clone(),
        msisdn: msisdn.to_string(),
      });
    }
    // The sandbox number is shared; spreading it to strangers on the same
    // address would merge unrelated testers.
    if let Some(ip) = metadata.ip.as_ref().filter(|_| !sandbox) {
      effects.push(Effect::LinkSessionsByIp { ip: ip.clone(), msisdn: msisdn.to_string() });
    }
  }
  effects
}

// ─── Browser redirect ────────────────────────────────────────────────────────

/// Where to send the browser after a redirect-style callback.
///
/// Only same-site relative return URLs are honoured; anything else falls back
/// to the article page.
pub fn redirect_target(metadata: &CallbackMetadata, success: bool) -> String {
  let base = metadata
    .return_url
    .as_deref()
    .filter(|u| is_relative_path(u))
    .map(str::to_string)
    .or_else(|| {
      metadata
        .article_id
        .as_deref()
        .map(|id| format!("/articles/{}", urlencoding::encode(id)))
    })
    .unwrap_or_else(|| "/".to_string());

  let separator = if base.contains('?') { '&' } else { '?' };
  let flag = if success { "unlocked=true" } else { "error=payment_failed" };
  format!("{base}{separator}{flag}")
}

fn is_relative_path(url: &str) -> bool {
  url.starts_with('/') && !url.starts_with("//") && !url.contains('\\')
}
