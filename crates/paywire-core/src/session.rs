//! Visitor sessions and tracking events.
//!
//! A session is the anonymous unit of correlation: created on the first touch
//! of a `news_session` cookie and progressively enriched as the visitor is
//! identified. Tracking events hang off a session and are backfilled with the
//! MSISDN once one is confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{carrier::NetworkType, device::DeviceInfo};

// ─── Confidence ──────────────────────────────────────────────────────────────

/// How much the backend trusts the MSISDN attached to a visitor.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MsisdnConfidence {
  /// From our own cookie, carrier enrichment on a carrier network, or the
  /// gateway's identify call.
  Confirmed,
  /// Seen in an enrichment header off a carrier network.
  Unconfirmed,
  #[default]
  None,
}

// ─── Attribution ─────────────────────────────────────────────────────────────

/// Campaign attribution parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Utm {
  pub source:   Option<String>,
  pub medium:   Option<String>,
  pub campaign: Option<String>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorSession {
  pub session_id:        String,
  pub brand:             String,
  pub ip:                Option<String>,
  pub user_agent:        Option<String>,
  pub device:            DeviceInfo,
  pub utm:               Utm,
  pub landing_page:      Option<String>,
  pub referrer:          Option<String>,
  pub msisdn:            Option<String>,
  pub msisdn_confidence: MsisdnConfidence,
  pub network_type:      NetworkType,
  pub carrier:           Option<String>,
  pub country:           Option<String>,
  pub created_at:        DateTime<Utc>,
  pub last_seen_at:      DateTime<Utc>,
  pub page_views:        i64,
  pub events:            i64,
}

/// Input to [`crate::store::PortalStore::touch_session`].
///
/// Creates the session on first touch. On later touches `last_seen_at` and the
/// request-level fields are refreshed; attribution (`utm`, `landing_page`,
/// `referrer`) is kept from the first touch.
#[derive(Debug, Clone, Default)]
pub struct SessionTouch {
  pub session_id:   String,
  pub ip:           Option<String>,
  pub user_agent:   Option<String>,
  pub device:       DeviceInfo,
  pub utm:          Utm,
  pub landing_page: Option<String>,
  pub referrer:     Option<String>,
  pub page_view:    bool,
  pub event:        bool,
}

/// An identity annotation written onto a session after detection.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
  pub msisdn:       String,
  pub confidence:   MsisdnConfidence,
  pub network_type: NetworkType,
  pub carrier:      Option<String>,
  pub country:      Option<String>,
}

// ─── Events ──────────────────────────────────────────────────────────────────

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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
  PageView,
  PaywallView,
  PurchaseStart,
  Click,
  Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
  pub event_id:   Uuid,
  pub brand:      String,
  pub session_id: String,
  pub kind:       EventKind,
  pub article_id: Option<String>,
  pub path:       Option<String>,
  pub msisdn:     Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Input to [`crate::store::PortalStore::record_event`].
#[derive(Debug, Clone)]
pub struct NewTrackingEvent {
  pub session_id: String,
  pub kind:       EventKind,
  pub article_id: Option<String>,
  pub path:       Option<String>,
  pub msisdn:     Option<String>,
}
