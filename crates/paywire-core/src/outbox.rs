//! Outbox of secondary effects.
//!
//! A primary write (an unlock, a refund flag) stores the bookkeeping it
//! implies as outbox rows in the same transaction. A consumer applies those
//! effects afterwards and retries them with backoff, so a failed counter update
//! is delayed rather than lost.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::unlock::NewBillingEvent;

/// Attempts after which an entry is parked as dead.
pub const MAX_ATTEMPTS: u32 = 8;

/// Upper bound on the retry delay.
pub const MAX_BACKOFF_SECS: i64 = 300;

/// One deferred secondary write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
  /// Adjust `Article.unlock_count`.
  ArticleUnlocks { article_id: String, delta: i64 },
  /// Count a purchase against the customer aggregate.
  CustomerPurchase {
    msisdn:       String,
    amount_cents: i64,
    currency:     String,
  },
  /// Reverse one purchase on the customer aggregate.
  CustomerRefund { msisdn: String, amount_cents: i64 },
  /// Append to the billing ledger.
  BillingEvent(NewBillingEvent),
  /// Attach the MSISDN to the paying session.
  LinkSession { session_id: String, msisdn: String },
  /// Attach the MSISDN to recent anonymous sessions from the same address.
  LinkSessionsByIp { ip: String, msisdn: String },
}

impl Effect {
  /// Short label for logs.
  pub fn label(&self) -> &'static str {
    match self {
      Self::ArticleUnlocks { .. } => "article_unlocks",
      Self::CustomerPurchase { .. } => "customer_purchase",
      Self::CustomerRefund { .. } => "customer_refund",
      Self::BillingEvent(_) => "billing_event",
      Self::LinkSession { .. } => "link_session",
      Self::LinkSessionsByIp { .. } => "link_sessions_by_ip",
    }
  }
}

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
pub enum OutboxStatus {
  Pending,
  Done,
  Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
  pub entry_id:        Uuid,
  pub brand:           String,
  pub effect:          Effect,
  pub status:          OutboxStatus,
  pub attempts:        u32,
  pub last_error:      Option<String>,
  pub created_at:      DateTime<Utc>,
  pub next_attempt_at: DateTime<Utc>,
}

/// When to retry an entry that has now failed `attempts` times, or `None` if
/// it should be parked as dead.
pub fn next_attempt(attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
  if attempts >= MAX_ATTEMPTS {
    return None;
  }
  let secs = 2_i64
    .checked_pow(attempts)
    .unwrap_or(MAX_BACKOFF_SECS)
    .min(MAX_BACKOFF_SECS);
  Some(now + Duration::seconds(secs))
}
