//! Outbox consumer.
//!
//! Applies the secondary effects that unlock and refund writes leave behind.
//! Each claimed entry is applied, then marked done or rescheduled with
//! backoff; after [`MAX_ATTEMPTS`] failures it is parked as dead for an admin
//! to look at. Delivery is at-least-once: an effect whose completion mark is
//! lost will be applied again after its lease expires.

use chrono::{Duration, Utc};
use paywire_core::{
  outbox::{Effect, MAX_ATTEMPTS, next_attempt},
  session::{MsisdnConfidence, SessionIdentity},
  store::PortalStore,
};
use tracing::{debug, error, warn};

use crate::{BillingSettings, Error, Result};

/// Entries claimed per drain.
pub const DRAIN_BATCH: u32 = 50;

/// How long a claimed entry stays hidden from other consumers.
const LEASE_SECS: i64 = 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  pub applied: usize,
  pub retried: usize,
  pub dead:    usize,
}

impl DrainReport {
  pub fn is_empty(&self) -> bool { self.applied + self.retried + self.dead == 0 }
}

/// Apply one batch of due entries, optionally restricted to `brand`.
pub async fn drain<S: PortalStore>(
  store: &S,
  settings: &BillingSettings,
  brand: Option<&str>,
) -> Result<DrainReport> {
  let now = Utc::now();
  let entries = store
    .claim_outbox(brand, now, now + Duration::seconds(LEASE_SECS), DRAIN_BATCH)
    .await
    .map_err(Error::store)?;

  let mut report = DrainReport::default();
  for entry in entries {
    match apply_effect(store, settings, &entry.brand, &entry.effect).await {
      Ok(()) => {
        store.complete_outbox(entry.entry_id).await.map_err(Error::store)?;
        report.applied += 1;
      }
      Err(e) => {
        let attempts = entry.attempts + 1;
        let retry_at = next_attempt(attempts, Utc::now());
        if retry_at.is_none() {
          error!(
            entry = %entry.entry_id,
            effect = entry.effect.label(),
            attempts,
            error = %e,
            "outbox entry is dead after {MAX_ATTEMPTS} attempts"
          );
          report.dead += 1;
        } else {
          warn!(
            entry = %entry.entry_id,
            effect = entry.effect.label(),
            attempts,
            error = %e,
            "outbox effect failed; will retry"
          );
          report.retried += 1;
        }
        store
          .fail_outbox(entry.entry_id, e.to_string(), retry_at)
          .await
          .map_err(Error::store)?;
      }
    }
  }

  if !report.is_empty() {
    debug!(?report, "outbox drained");
  }
  Ok(report)
}

/// Drain inline after a primary write. Failures only delay the effects, so
/// they are logged rather than returned.
pub async fn drain_quietly<S: PortalStore>(
  store: &S,
  settings: &BillingSettings,
  brand: &str,
) {
  if let Err(e) = drain(store, settings, Some(brand)).await {
    warn!(error = %e, "inline outbox drain failed");
  }
}

pub async fn apply_effect<S: PortalStore>(
  store: &S,
  settings: &BillingSettings,
  brand: &str,
  effect: &Effect,
) -> Result<(), S::Error> {
  match effect {
    Effect::ArticleUnlocks { article_id, delta } => {
      if !store.adjust_article_counters(brand, article_id, 0, *delta).await? {
        debug!(article_id, "unlock counter skipped for unknown article");
      }
    }
    Effect::CustomerPurchase { msisdn, amount_cents, currency } => {
      store
        .apply_customer_purchase(brand, msisdn, *amount_cents, currency)
        .await?;
    }
    Effect::CustomerRefund { msisdn, amount_cents } => {
      store.apply_customer_refund(brand, msisdn, *amount_cents).await?;
    }
    Effect::BillingEvent(event) => {
      store.record_billing_event(brand, event.clone()).await?;
    }
    Effect::LinkSession { session_id, msisdn } => {
      // Keep the session's own network annotation; only the identity changes.
      if let Some(session) = store.get_session(brand, session_id).await? {
        let identity = SessionIdentity {
          msisdn:       msisdn.clone(),
          confidence:   MsisdnConfidence::Confirmed,
          network_type: session.network_type,
          carrier:      None,
          country:      None,
        };
        store.identify_session(brand, session_id, identity).await?;
        store.backfill_event_msisdn(brand, session_id, msisdn).await?;
      }
    }
    Effect::LinkSessionsByIp { ip, msisdn } => {
      let since = Utc::now() - settings.link_window;
      let linked = store.link_sessions_by_ip(brand, ip, msisdn, since).await?;
      if linked > 0 {
        debug!(linked, "linked recent sessions by ip");
      }
    }
  }
  Ok(())
}
