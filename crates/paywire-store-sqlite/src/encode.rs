//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that text comparison orders them correctly.
//! Enums are stored as their lower-case (or, for confidence, upper-case)
//! names. UUIDs are stored as hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use paywire_core::{
  article::Article,
  customer::Customer,
  outbox::{Effect, OutboxEntry},
  pipeline::PipelineRun,
  session::{TrackingEvent, Utm, VisitorSession},
  unlock::{BillingEvent, Unlock},
};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownVariant { kind, value: s.to_string() })
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const SESSION_COLUMNS: &str = "brand, session_id, ip, user_agent, device_json,
  utm_source, utm_medium, utm_campaign, landing_page, referrer, msisdn,
  msisdn_confidence, network_type, carrier, country, created_at, last_seen_at,
  page_views, events";

/// Raw values read directly from a `sessions` row.
pub struct RawSession {
  pub brand:             String,
  pub session_id:        String,
  pub ip:                Option<String>,
  pub user_agent:        Option<String>,
  pub device_json:       String,
  pub utm_source:        Option<String>,
  pub utm_medium:        Option<String>,
  pub utm_campaign:      Option<String>,
  pub landing_page:      Option<String>,
  pub referrer:          Option<String>,
  pub msisdn:            Option<String>,
  pub msisdn_confidence: String,
  pub network_type:      String,
  pub carrier:           Option<String>,
  pub country:           Option<String>,
  pub created_at:        String,
  pub last_seen_at:      String,
  pub page_views:        i64,
  pub events:            i64,
}

impl RawSession {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      brand:             row.get(0)?,
      session_id:        row.get(1)?,
      ip:                row.get(2)?,
      user_agent:        row.get(3)?,
      device_json:       row.get(4)?,
      utm_source:        row.get(5)?,
      utm_medium:        row.get(6)?,
      utm_campaign:      row.get(7)?,
      landing_page:      row.get(8)?,
      referrer:          row.get(9)?,
      msisdn:            row.get(10)?,
      msisdn_confidence: row.get(11)?,
      network_type:      row.get(12)?,
      carrier:           row.get(13)?,
      country:           row.get(14)?,
      created_at:        row.get(15)?,
      last_seen_at:      row.get(16)?,
      page_views:        row.get(17)?,
      events:            row.get(18)?,
    })
  }

  pub fn into_session(self) -> Result<VisitorSession> {
    Ok(VisitorSession {
      session_id:        self.session_id,
      brand:             self.brand,
      ip:                self.ip,
      user_agent:        self.user_agent,
      device:            serde_json::from_str(&self.device_json)?,
      utm:               Utm {
        source:   self.utm_source,
        medium:   self.utm_medium,
        campaign: self.utm_campaign,
      },
      landing_page:      self.landing_page,
      referrer:          self.referrer,
      msisdn:            self.msisdn,
      msisdn_confidence: decode_enum("msisdn confidence", &self.msisdn_confidence)?,
      network_type:      decode_enum("network type", &self.network_type)?,
      carrier:           self.carrier,
      country:           self.country,
      created_at:        decode_dt(&self.created_at)?,
      last_seen_at:      decode_dt(&self.last_seen_at)?,
      page_views:        self.page_views,
      events:            self.events,
    })
  }
}

pub const EVENT_COLUMNS: &str =
  "event_id, brand, session_id, kind, article_id, path, msisdn, created_at";

pub struct RawEvent {
  pub event_id:   String,
  pub brand:      String,
  pub session_id: String,
  pub kind:       String,
  pub article_id: Option<String>,
  pub path:       Option<String>,
  pub msisdn:     Option<String>,
  pub created_at: String,
}

impl RawEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:   row.get(0)?,
      brand:      row.get(1)?,
      session_id: row.get(2)?,
      kind:       row.get(3)?,
      article_id: row.get(4)?,
      path:       row.get(5)?,
      msisdn:     row.get(6)?,
      created_at: row.get(7)?,
    })
  }

  pub fn into_event(self) -> Result<TrackingEvent> {
    Ok(TrackingEvent {
      event_id:   decode_uuid(&self.event_id)?,
      brand:      self.brand,
      session_id: self.session_id,
      kind:       decode_enum("event kind", &self.kind)?,
      article_id: self.article_id,
      path:       self.path,
      msisdn:     self.msisdn,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const CUSTOMER_COLUMNS: &str = "brand, msisdn, first_seen_at, last_seen_at,
  visit_count, purchase_count, total_spent_cents, currency, conversion_status,
  landing_page, utm_source, utm_campaign, carrier, country, last_ip";

pub struct RawCustomer {
  pub brand:             String,
  pub msisdn:            String,
  pub first_seen_at:     String,
  pub last_seen_at:      String,
  pub visit_count:       i64,
  pub purchase_count:    i64,
  pub total_spent_cents: i64,
  pub currency:          Option<String>,
  pub conversion_status: String,
  pub landing_page:      Option<String>,
  pub utm_source:        Option<String>,
  pub utm_campaign:      Option<String>,
  pub carrier:           Option<String>,
  pub country:           Option<String>,
  pub last_ip:           Option<String>,
}

impl RawCustomer {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      brand:             row.get(0)?,
      msisdn:            row.get(1)?,
      first_seen_at:     row.get(2)?,
      last_seen_at:      row.get(3)?,
      visit_count:       row.get(4)?,
      purchase_count:    row.get(5)?,
      total_spent_cents: row.get(6)?,
      currency:          row.get(7)?,
      conversion_status: row.get(8)?,
      landing_page:      row.get(9)?,
      utm_source:        row.get(10)?,
      utm_campaign:      row.get(11)?,
      carrier:           row.get(12)?,
      country:           row.get(13)?,
      last_ip:           row.get(14)?,
    })
  }

  pub fn into_customer(self) -> Result<Customer> {
    Ok(Customer {
      msisdn:            self.msisdn,
      brand:             self.brand,
      first_seen_at:     decode_dt(&self.first_seen_at)?,
      last_seen_at:      decode_dt(&self.last_seen_at)?,
      visit_count:       self.visit_count,
      purchase_count:    self.purchase_count,
      total_spent_cents: self.total_spent_cents,
      currency:          self.currency,
      conversion_status: decode_enum("conversion status", &self.conversion_status)?,
      landing_page:      self.landing_page,
      utm_source:        self.utm_source,
      utm_campaign:      self.utm_campaign,
      carrier:           self.carrier,
      country:           self.country,
      last_ip:           self.last_ip,
    })
  }
}

pub const ARTICLE_COLUMNS: &str = "brand, article_id, title, teaser, body,
  price_cents, currency, unlock_count, view_count, published_at";

pub struct RawArticle {
  pub brand:        String,
  pub article_id:   String,
  pub title:        String,
  pub teaser:       String,
  pub body:         String,
  pub price_cents:  i64,
  pub currency:     String,
  pub unlock_count: i64,
  pub view_count:   i64,
  pub published_at: String,
}

impl RawArticle {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      brand:        row.get(0)?,
      article_id:   row.get(1)?,
      title:        row.get(2)?,
      teaser:       row.get(3)?,
      body:         row.get(4)?,
      price_cents:  row.get(5)?,
      currency:     row.get(6)?,
      unlock_count: row.get(7)?,
      view_count:   row.get(8)?,
      published_at: row.get(9)?,
    })
  }

  pub fn into_article(self) -> Result<Article> {
    Ok(Article {
      article_id:   self.article_id,
      brand:        self.brand,
      title:        self.title,
      teaser:       self.teaser,
      body:         self.body,
      price_cents:  self.price_cents,
      currency:     self.currency,
      unlock_count: self.unlock_count,
      view_count:   self.view_count,
      published_at: decode_dt(&self.published_at)?,
    })
  }
}

pub const UNLOCK_COLUMNS: &str = "unlock_id, brand, transaction_id, msisdn,
  article_id, session_id, amount_cents, currency, status, sandbox, created_at,
  updated_at, refunded_at, refund_mode";

pub struct RawUnlock {
  pub unlock_id:      String,
  pub brand:          String,
  pub transaction_id: String,
  pub msisdn:         Option<String>,
  pub article_id:     Option<String>,
  pub session_id:     Option<String>,
  pub amount_cents:   i64,
  pub currency:       String,
  pub status:         String,
  pub sandbox:        bool,
  pub created_at:     String,
  pub updated_at:     String,
  pub refunded_at:    Option<String>,
  pub refund_mode:    Option<String>,
}

impl RawUnlock {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      unlock_id:      row.get(0)?,
      brand:          row.get(1)?,
      transaction_id: row.get(2)?,
      msisdn:         row.get(3)?,
      article_id:     row.get(4)?,
      session_id:     row.get(5)?,
      amount_cents:   row.get(6)?,
      currency:       row.get(7)?,
      status:         row.get(8)?,
      sandbox:        row.get(9)?,
      created_at:     row.get(10)?,
      updated_at:     row.get(11)?,
      refunded_at:    row.get(12)?,
      refund_mode:    row.get(13)?,
    })
  }

  pub fn into_unlock(self) -> Result<Unlock> {
    Ok(Unlock {
      unlock_id:      decode_uuid(&self.unlock_id)?,
      brand:          self.brand,
      transaction_id: self.transaction_id,
      msisdn:         self.msisdn,
      article_id:     self.article_id,
      session_id:     self.session_id,
      amount_cents:   self.amount_cents,
      currency:       self.currency,
      status:         decode_enum("unlock status", &self.status)?,
      sandbox:        self.sandbox,
      created_at:     decode_dt(&self.created_at)?,
      updated_at:     decode_dt(&self.updated_at)?,
      refunded_at:    decode_opt_dt(self.refunded_at)?,
      refund_mode:    self
        .refund_mode
        .as_deref()
        .map(|m| decode_enum("refund mode", m))
        .transpose()?,
    })
  }
}

pub const BILLING_COLUMNS: &str = "event_id, brand, kind, transaction_id, msisdn,
  article_id, amount_cents, currency, created_at";

pub struct RawBillingEvent {
  pub event_id:       String,
  pub brand:          String,
  pub kind:           String,
  pub transaction_id: String,
  pub msisdn:         Option<String>,
  pub article_id:     Option<String>,
  pub amount_cents:   i64,
  pub currency:       String,
  pub created_at:     String,
}

impl RawBillingEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:       row.get(0)?,
      brand:          row.get(1)?,
      kind:           row.get(2)?,
      transaction_id: row.get(3)?,
      msisdn:         row.get(4)?,
      article_id:     row.get(5)?,
      amount_cents:   row.get(6)?,
      currency:       row.get(7)?,
      created_at:     row.get(8)?,
    })
  }

  pub fn into_event(self) -> Result<BillingEvent> {
    Ok(BillingEvent {
      event_id:       decode_uuid(&self.event_id)?,
      brand:          self.brand,
      kind:           decode_enum("billing event kind", &self.kind)?,
      transaction_id: self.transaction_id,
      msisdn:         self.msisdn,
      article_id:     self.article_id,
      amount_cents:   self.amount_cents,
      currency:       self.currency,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

pub const OUTBOX_COLUMNS: &str = "entry_id, brand, effect_json, status, attempts,
  last_error, created_at, next_attempt_at";

pub struct RawOutbox {
  pub entry_id:        String,
  pub brand:           String,
  pub effect_json:     String,
  pub status:          String,
  pub attempts:        u32,
  pub last_error:      Option<String>,
  pub created_at:      String,
  pub next_attempt_at: String,
}

impl RawOutbox {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:        row.get(0)?,
      brand:           row.get(1)?,
      effect_json:     row.get(2)?,
      status:          row.get(3)?,
      attempts:        row.get(4)?,
      last_error:      row.get(5)?,
      created_at:      row.get(6)?,
      next_attempt_at: row.get(7)?,
    })
  }

  pub fn into_entry(self) -> Result<OutboxEntry> {
    let effect: Effect = serde_json::from_str(&self.effect_json)?;
    Ok(OutboxEntry {
      entry_id: decode_uuid(&self.entry_id)?,
      brand: self.brand,
      effect,
      status: decode_enum("outbox status", &self.status)?,
      attempts: self.attempts,
      last_error: self.last_error,
      created_at: decode_dt(&self.created_at)?,
      next_attempt_at: decode_dt(&self.next_attempt_at)?,
    })
  }
}

pub const PIPELINE_COLUMNS: &str = "run_id, brand, status, requested_at, started_at,
  finished_at, summary_json, error";

pub struct RawPipelineRun {
  pub run_id:       String,
  pub brand:        String,
  pub status:       String,
  pub requested_at: String,
  pub started_at:   Option<String>,
  pub finished_at:  Option<String>,
  pub summary_json: Option<String>,
  pub error:        Option<String>,
}

impl RawPipelineRun {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:       row.get(0)?,
      brand:        row.get(1)?,
      status:       row.get(2)?,
      requested_at: row.get(3)?,
      started_at:   row.get(4)?,
      finished_at:  row.get(5)?,
      summary_json: row.get(6)?,
      error:        row.get(7)?,
    })
  }

  pub fn into_run(self) -> Result<PipelineRun> {
    Ok(PipelineRun {
      run_id:       decode_uuid(&self.run_id)?,
      brand:        self.brand,
      status:       decode_enum("run status", &self.status)?,
      requested_at: decode_dt(&self.requested_at)?,
      started_at:   decode_opt_dt(self.started_at)?,
      finished_at:  decode_opt_dt(self.finished_at)?,
      summary:      self
        .summary_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      error:        self.error,
    })
  }
}
