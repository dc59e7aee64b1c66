//! Customers: the per-brand aggregate keyed by normalised MSISDN.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Utm;

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
pub enum ConversionStatus {
  /// Known MSISDN, nothing bought yet.
  Identified,
  /// At least one completed purchase.
  Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
  pub msisdn:            String,
  pub brand:             String,
  pub first_seen_at:     DateTime<Utc>,
  pub last_seen_at:      DateTime<Utc>,
  pub visit_count:       i64,
  pub purchase_count:    i64,
  pub total_spent_cents: i64,
  pub currency:          Option<String>,
  pub conversion_status: ConversionStatus,
  pub landing_page:      Option<String>,
  pub utm_source:        Option<String>,
  pub utm_campaign:      Option<String>,
  pub carrier:           Option<String>,
  pub country:           Option<String>,
  pub last_ip:           Option<String>,
}

/// Input to [`crate::store::PortalStore::upsert_customer`]: one confirmed
/// sighting of a subscriber. Attribution is only written on first sight.
#[derive(Debug, Clone, Default)]
pub struct CustomerTouch {
  pub msisdn:       String,
  pub ip:           Option<String>,
  pub landing_page: Option<String>,
  pub utm:          Utm,
  pub carrier:      Option<String>,
  pub country:      Option<String>,
}
