//! Unlocks (one per payment transaction) and the billing ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnlockStatus {
  Pending,
  Completed,
  Failed,
  /// Claimed by an admin refund that has not finished yet.
  Refunding,
  Refunded,
}

impl UnlockStatus {
  /// Map a provider callback status string.
  pub fn from_callback(status: &str) -> Self {
    match status.trim().to_ascii_lowercase().as_str() {
      "success" | "completed" | "paid" | "ok" => Self::Completed,
      "pending" => Self::Pending,
      _ => Self::Failed,
    }
  }

  /// Terminal statuses are never overwritten by a later callback.
  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }
}

/// How a refund was carried out.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RefundMode {
  /// The gateway accepted the refund request.
  Gateway,
  /// The gateway call failed; money must be returned by hand.
  Manual,
}

// ─── Unlock ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unlock {
  pub unlock_id:      Uuid,
  pub brand:          String,
  pub transaction_id: String,
  pub msisdn:         Option<String>,
  pub article_id:     Option<String>,
  pub session_id:     Option<String>,
  pub amount_cents:   i64,
  pub currency:       String,
  pub status:         UnlockStatus,
  pub sandbox:        bool,
  pub created_at:     DateTime<Utc>,
  pub updated_at:     DateTime<Utc>,
  pub refunded_at:    Option<DateTime<Utc>>,
  pub refund_mode:    Option<RefundMode>,
}

/// Input to [`crate::store::PortalStore::record_unlock`].
#[derive(Debug, Clone)]
pub struct NewUnlock {
  pub transaction_id: String,
  pub msisdn:         Option<String>,
  pub article_id:     Option<String>,
  pub session_id:     Option<String>,
  pub amount_cents:   i64,
  pub currency:       String,
  pub status:         UnlockStatus,
  pub sandbox:        bool,
}

/// What [`crate::store::PortalStore::record_unlock`] did with a callback.
#[derive(Debug, Clone)]
pub enum UnlockOutcome {
  /// First sight of this transaction.
  Inserted(Unlock),
  /// A pending record moved to a terminal status.
  Upgraded(Unlock),
  /// Already recorded; nothing was written and no effects were enqueued.
  Duplicate(Unlock),
}

impl UnlockOutcome {
  pub fn unlock(&self) -> &Unlock {
    match self {
      Self::Inserted(u) | Self::Upgraded(u) | Self::Duplicate(u) => u,
    }
  }

  pub fn into_unlock(self) -> Unlock {
    match self {
      Self::Inserted(u) | Self::Upgraded(u) | Self::Duplicate(u) => u,
    }
  }

  pub fn is_duplicate(&self) -> bool { matches!(self, Self::Duplicate(_)) }
}

/// What [`crate::store::PortalStore::claim_refund`] did.
#[derive(Debug, Clone)]
pub enum RefundClaim {
  Claimed(Unlock),
  NotFound,
  NotRefundable(UnlockStatus),
}

/// What [`crate::store::PortalStore::mark_refunded`] did.
#[derive(Debug, Clone)]
pub enum RefundMark {
  Refunded(Unlock),
  NotFound,
  NotRefundable(UnlockStatus),
}

/// Which visitor evidence an access lookup is keyed by.
#[derive(Debug, Clone, Copy)]
pub enum UnlockLookup<'a> {
  Msisdn(&'a str),
  Session(&'a str),
}

// ─── Billing ledger ──────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BillingEventKind {
  Charge,
  Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
  pub event_id:       Uuid,
  pub brand:          String,
  pub kind:           BillingEventKind,
  pub transaction_id: String,
  pub msisdn:         Option<String>,
  pub article_id:     Option<String>,
  pub amount_cents:   i64,
  pub currency:       String,
  pub created_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBillingEvent {
  pub kind:           BillingEventKind,
  pub transaction_id: String,
  pub msisdn:         Option<String>,
  pub article_id:     Option<String>,
  pub amount_cents:   i64,
  pub currency:       String,
}
