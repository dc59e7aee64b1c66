//! Admin refunds.
//!
//! The unlock is first claimed (`completed` to `refunding`), so a concurrent
//! refund of the same unlock fails with a conflict before it reaches the
//! provider. Then the gateway is asked. If it refuses or is unreachable the
//! unlock is still marked refunded with mode `manual`, so access is revoked at
//! once and the money can be returned by hand.

use paywire_core::{
  gateway::{CarrierGateway, RefundRequest},
  outbox::Effect,
  store::PortalStore,
  unlock::{
    BillingEventKind, NewBillingEvent, RefundClaim, RefundMark, RefundMode, Unlock,
    UnlockStatus,
  },
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{BillingSettings, Error, Result, outbox::drain_quietly};

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
  pub unlock:        Unlock,
  pub mode:          RefundMode,
  /// Why the gateway call failed, for `manual` refunds.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub gateway_error: Option<String>,
}

pub async fn refund<S, G>(
  store: &S,
  gateway: &G,
  settings: &BillingSettings,
  brand: &str,
  unlock_id: Uuid,
  reason: Option<String>,
) -> Result<RefundOutcome>
where
  S: PortalStore,
  G: CarrierGateway,
{
  let unlock = match store.claim_refund(brand, unlock_id).await.map_err(Error::store)? {
    RefundClaim::Claimed(unlock) => unlock,
    RefundClaim::NotFound => return Err(Error::NotFound(format!("unlock {unlock_id}"))),
    RefundClaim::NotRefundable(status) => return Err(not_refundable(unlock_id, status)),
  };

  let request = RefundRequest {
    transaction_id: unlock.transaction_id.clone(),
    amount_cents:   unlock.amount_cents,
    currency:       unlock.currency.clone(),
    reason,
  };
  let (mode, gateway_error) = match gateway.refund(request).await {
    Ok(()) => (RefundMode::Gateway, None),
    Err(e) => {
      warn!(
        transaction_id = %unlock.transaction_id,
        error = %e,
        "gateway refund failed; recording a manual refund"
      );
      (RefundMode::Manual, Some(e.to_string()))
    }
  };

  let effects = refund_effects(&unlock);
  let mark = store
    .mark_refunded(brand, unlock_id, mode, effects)
    .await
    .map_err(|e| {
      // The unlock stays `refunding` and needs a manual look.
      error!(
        transaction_id = %unlock.transaction_id,
        %mode,
        error = %e,
        "failed to record refund"
      );
      Error::store(e)
    })?;
  let unlock = match mark {
    RefundMark::Refunded(unlock) => unlock,
    RefundMark::NotFound => return Err(Error::NotFound(format!("unlock {unlock_id}"))),
    RefundMark::NotRefundable(status) => return Err(not_refundable(unlock_id, status)),
  };

  drain_quietly(store, settings, brand).await;
  info!(transaction_id = %unlock.transaction_id, %mode, "unlock refunded");
  Ok(RefundOutcome { unlock, mode, gateway_error })
}

fn not_refundable(unlock_id: Uuid, status: UnlockStatus) -> Error {
  Error::Conflict(format!("unlock {unlock_id} is {status}, not completed"))
}

fn refund_effects(unlock: &Unlock) -> Vec<Effect> {
  let mut effects = Vec::with_capacity(3);
  if let Some(msisdn) = &unlock.msisdn {
    effects.push(Effect::CustomerRefund {
      msisdn:       msisdn.clone(),
      amount_cents: unlock.amount_cents,
    });
  }
  effects.push(Effect::BillingEvent(NewBillingEvent {
    kind:           BillingEventKind::Refund,
    transaction_id: unlock.transaction_id.clone(),
    msisdn:         unlock.msisdn.clone(),
    article_id:     unlock.article_id.clone(),
    amount_cents:   unlock.amount_cents,
    currency:       unlock.currency.clone(),
  }));
  if let Some(article_id) = &unlock.article_id {
    effects.push(Effect::ArticleUnlocks { article_id: article_id.clone(), delta: -1 });
  }
  effects
}
