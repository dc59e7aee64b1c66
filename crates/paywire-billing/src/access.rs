//! Paywall decisions.
//!
//! Access is granted only on evidence that belongs to the requesting visitor:
//! their own `user_msisdn` cookie, their session's confirmed MSISDN, or an
//! unlock bound to their own session. The sandbox subscriber is shared by
//! every tester, so it never unlocks anything by number.

use paywire_core::{
  session::MsisdnConfidence,
  store::PortalStore,
  unlock::{Unlock, UnlockLookup},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{BillingSettings, Error, RequestContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessBasis {
  Msisdn,
  Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
  pub granted:   bool,
  pub basis:     Option<AccessBasis>,
  pub unlock_id: Option<Uuid>,
}

impl AccessDecision {
  fn denied() -> Self { Self { granted: false, basis: None, unlock_id: None } }

  fn granted(basis: AccessBasis, unlock: Unlock) -> Self {
    Self { granted: true, basis: Some(basis), unlock_id: Some(unlock.unlock_id) }
  }
}

pub async fn check_access<S: PortalStore>(
  store: &S,
  settings: &BillingSettings,
  brand: &str,
  ctx: &RequestContext,
  article_id: &str,
) -> Result<AccessDecision> {
  let session = store
    .get_session(brand, &ctx.session_id)
    .await
    .map_err(Error::store)?;

  let session_msisdn = session
    .filter(|s| s.msisdn_confidence == MsisdnConfidence::Confirmed)
    .and_then(|s| s.msisdn);

  let mut candidates: Vec<String> = Vec::with_capacity(2);
  for msisdn in [ctx.cookie_msisdn(), session_msisdn].into_iter().flatten() {
    if !settings.is_sandbox_msisdn(&msisdn) && !candidates.contains(&msisdn) {
      candidates.push(msisdn);
    }
  }

  for msisdn in &candidates {
    if let Some(unlock) = store
      .find_completed_unlock(brand, article_id, UnlockLookup::Msisdn(msisdn))
      .await
      .map_err(Error::store)?
    {
      return Ok(AccessDecision::granted(AccessBasis::Msisdn, unlock));
    }
  }

  if let Some(unlock) = store
    .find_completed_unlock(brand, article_id, UnlockLookup::Session(&ctx.session_id))
    .await
    .map_err(Error::store)?
  {
    return Ok(AccessDecision::granted(AccessBasis::Session, unlock));
  }

  Ok(AccessDecision::denied())
}
