//! The `PortalStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `paywire-store-sqlite`).
//! Higher layers (`paywire-billing`, `paywire-api`) depend on this
//! abstraction, not on any concrete backend.
//!
//! Every operation is addressed by `brand`: each tenant has its own namespace
//! and never sees another tenant's rows. Outbox and pipeline-run ids are
//! globally unique, so the operations keyed only by those ids take no brand.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  article::{Article, NewArticle},
  customer::{Customer, CustomerTouch},
  outbox::{Effect, OutboxEntry},
  pipeline::{PipelineRun, RunUpdate},
  session::{
    NewTrackingEvent, SessionIdentity, SessionTouch, TrackingEvent, VisitorSession,
  },
  unlock::{
    BillingEvent, NewBillingEvent, NewUnlock, RefundClaim, RefundMark, RefundMode,
    Unlock, UnlockLookup, UnlockOutcome,
  },
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Limit/offset pagination for list operations.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
  #[serde(default = "Page::default_limit")]
  pub limit:  u32,
  #[serde(default)]
  pub offset: u32,
}

impl Page {
  const MAX_LIMIT: u32 = 500;

  fn default_limit() -> u32 { 50 }

  /// The limit clamped to a sane maximum.
  pub fn clamped_limit(&self) -> u32 { self.limit.clamp(1, Self::MAX_LIMIT) }
}

impl Default for Page {
  fn default() -> Self { Self { limit: Self::default_limit(), offset: 0 } }
}

/// Aggregate counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalStats {
  pub sessions:            i64,
  pub identified_sessions: i64,
  pub page_views:          i64,
  pub customers:           i64,
  pub paying_customers:    i64,
  pub unlocks_completed:   i64,
  pub unlocks_refunded:    i64,
  pub revenue_cents:       i64,
  pub refunded_cents:      i64,
  pub outbox_pending:      i64,
  pub outbox_dead:         i64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a paywire document store backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait PortalStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Sessions ──────────────────────────────────────────────────────────

  /// Create the session on first touch, otherwise refresh it.
  fn touch_session<'a>(
    &'a self,
    brand: &'a str,
    touch: SessionTouch,
  ) -> impl Future<Output = Result<VisitorSession, Self::Error>> + Send + 'a;

  fn get_session<'a>(
    &'a self,
    brand: &'a str,
    session_id: &'a str,
  ) -> impl Future<Output = Result<Option<VisitorSession>, Self::Error>> + Send + 'a;

  /// Attach an identity to a session. Never downgrades a `CONFIRMED`
  /// session to a weaker confidence. Returns `false` if nothing changed.
  fn identify_session<'a>(
    &'a self,
    brand: &'a str,
    session_id: &'a str,
    identity: SessionIdentity,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Confirm `msisdn` on every session from `ip` that has no MSISDN yet and
  /// was seen at or after `since`. Returns the number of sessions linked.
  fn link_sessions_by_ip<'a>(
    &'a self,
    brand: &'a str,
    ip: &'a str,
    msisdn: &'a str,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Delete every session and tracking event of the brand.
  fn reset_sessions<'a>(
    &'a self,
    brand: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  // ── Tracking events ───────────────────────────────────────────────────

  fn record_event<'a>(
    &'a self,
    brand: &'a str,
    event: NewTrackingEvent,
  ) -> impl Future<Output = Result<TrackingEvent, Self::Error>> + Send + 'a;

  /// Set `msisdn` on the session's events that have none.
  fn backfill_event_msisdn<'a>(
    &'a self,
    brand: &'a str,
    session_id: &'a str,
    msisdn: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  fn list_session_events<'a>(
    &'a self,
    brand: &'a str,
    session_id: &'a str,
  ) -> impl Future<Output = Result<Vec<TrackingEvent>, Self::Error>> + Send + 'a;

  // ── Customers ─────────────────────────────────────────────────────────

  /// Record a confirmed sighting: creates the customer as `identified` or
  /// bumps `visit_count` and `last_seen_at`.
  fn upsert_customer<'a>(
    &'a self,
    brand: &'a str,
    touch: CustomerTouch,
  ) -> impl Future<Output = Result<Customer, Self::Error>> + Send + 'a;

  /// Count a purchase: `purchase_count += 1`, `total_spent_cents += amount`,
  /// status `customer`. Creates the customer if needed.
  fn apply_customer_purchase<'a>(
    &'a self,
    brand: &'a str,
    msisdn: &'a str,
    amount_cents: i64,
    currency: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Reverse a purchase; counters are floored at zero.
  fn apply_customer_refund<'a>(
    &'a self,
    brand: &'a str,
    msisdn: &'a str,
    amount_cents: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_customer<'a>(
    &'a self,
    brand: &'a str,
    msisdn: &'a str,
  ) -> impl Future<Output = Result<Option<Customer>, Self::Error>> + Send + 'a;

  /// Most recently seen first.
  fn list_customers<'a>(
    &'a self,
    brand: &'a str,
    page: Page,
  ) -> impl Future<Output = Result<Vec<Customer>, Self::Error>> + Send + 'a;

  // ── Articles ──────────────────────────────────────────────────────────

  fn create_article<'a>(
    &'a self,
    brand: &'a str,
    article: NewArticle,
  ) -> impl Future<Output = Result<Article, Self::Error>> + Send + 'a;

  fn get_article<'a>(
    &'a self,
    brand: &'a str,
    article_id: &'a str,
  ) -> impl Future<Output = Result<Option<Article>, Self::Error>> + Send + 'a;

  /// Newest first.
  fn list_articles<'a>(
    &'a self,
    brand: &'a str,
    page: Page,
  ) -> impl Future<Output = Result<Vec<Article>, Self::Error>> + Send + 'a;

  /// Atomically add to `view_count` and `unlock_count`. Returns `false` if
  /// the article does not exist.
  fn adjust_article_counters<'a>(
    &'a self,
    brand: &'a str,
    article_id: &'a str,
    views_delta: i64,
    unlocks_delta: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Unlocks ───────────────────────────────────────────────────────────

  /// Record a payment outcome keyed by `transaction_id`, together with the
  /// effects it implies, in one transaction.
  ///
  /// A transaction already recorded with a terminal status yields
  /// [`UnlockOutcome::Duplicate`] and writes nothing. A pending record is
  /// upgraded by a terminal status; a repeated pending status is a
  /// duplicate. Effects are only enqueued when a row is inserted or upgraded.
  fn record_unlock<'a>(
    &'a self,
    brand: &'a str,
    unlock: NewUnlock,
    effects: Vec<Effect>,
  ) -> impl Future<Output = Result<UnlockOutcome, Self::Error>> + Send + 'a;

  fn get_unlock<'a>(
    &'a self,
    brand: &'a str,
    unlock_id: Uuid,
  ) -> impl Future<Output = Result<Option<Unlock>, Self::Error>> + Send + 'a;

  /// The most recent `completed` unlock of `article_id` matching `lookup`.
  fn find_completed_unlock<'a>(
    &'a self,
    brand: &'a str,
    article_id: &'a str,
    lookup: UnlockLookup<'a>,
  ) -> impl Future<Output = Result<Option<Unlock>, Self::Error>> + Send + 'a;

  /// Newest first.
  fn list_unlocks<'a>(
    &'a self,
    brand: &'a str,
    page: Page,
  ) -> impl Future<Output = Result<Vec<Unlock>, Self::Error>> + Send + 'a;

  /// Flip a `completed` unlock to `refunding`. Only one caller can win the
  /// claim, so the gateway is asked to refund at most once.
  fn claim_refund<'a>(
    &'a self,
    brand: &'a str,
    unlock_id: Uuid,
  ) -> impl Future<Output = Result<RefundClaim, Self::Error>> + Send + 'a;

  /// Flip a `refunding` unlock to `refunded` and enqueue `effects`, in one
  /// transaction.
  fn mark_refunded<'a>(
    &'a self,
    brand: &'a str,
    unlock_id: Uuid,
    mode: RefundMode,
    effects: Vec<Effect>,
  ) -> impl Future<Output = Result<RefundMark, Self::Error>> + Send + 'a;

  // ── Billing ledger ────────────────────────────────────────────────────

  fn record_billing_event<'a>(
    &'a self,
    brand: &'a str,
    event: NewBillingEvent,
  ) -> impl Future<Output = Result<BillingEvent, Self::Error>> + Send + 'a;

  /// Newest first.
  fn list_billing_events<'a>(
    &'a self,
    brand: &'a str,
    page: Page,
  ) -> impl Future<Output = Result<Vec<BillingEvent>, Self::Error>> + Send + 'a;

  // ── Outbox ────────────────────────────────────────────────────────────

  /// Lease up to `limit` pending entries due at `now` (optionally of one
  /// brand). Leased entries are hidden from other consumers until
  /// `lease_until`.
  fn claim_outbox<'a>(
    &'a self,
    brand: Option<&'a str>,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    limit: u32,
  ) -> impl Future<Output = Result<Vec<OutboxEntry>, Self::Error>> + Send + 'a;

  fn complete_outbox(
    &self,
    entry_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record a failed attempt. `retry_at = None` parks the entry as dead.
  fn fail_outbox(
    &self,
    entry_id: Uuid,
    error: String,
    retry_at: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_dead_outbox<'a>(
    &'a self,
    brand: &'a str,
    page: Page,
  ) -> impl Future<Output = Result<Vec<OutboxEntry>, Self::Error>> + Send + 'a;

  // ── Pipeline runs ─────────────────────────────────────────────────────

  /// Create a run in `queued` state.
  fn create_pipeline_run<'a>(
    &'a self,
    brand: &'a str,
  ) -> impl Future<Output = Result<PipelineRun, Self::Error>> + Send + 'a;

  /// Apply a status transition. Returns `false` if the run does not exist.
  fn update_pipeline_run(
    &self,
    run_id: Uuid,
    update: RunUpdate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_pipeline_run<'a>(
    &'a self,
    brand: &'a str,
    run_id: Uuid,
  ) -> impl Future<Output = Result<Option<PipelineRun>, Self::Error>> + Send + 'a;

  fn latest_pipeline_run<'a>(
    &'a self,
    brand: &'a str,
  ) -> impl Future<Output = Result<Option<PipelineRun>, Self::Error>> + Send + 'a;

  // ── Analytics ─────────────────────────────────────────────────────────

  fn stats<'a>(
    &'a self,
    brand: &'a str,
  ) -> impl Future<Output = Result<PortalStats, Self::Error>> + Send + 'a;
}
