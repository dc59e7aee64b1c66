//! [`SqliteStore`]: the SQLite implementation of [`PortalStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, Transaction};
use uuid::Uuid;

use paywire_core::{
  article::{Article, NewArticle},
  customer::{ConversionStatus, Customer, CustomerTouch},
  outbox::{Effect, OutboxEntry, OutboxStatus},
  pipeline::{PipelineRun, RunStatus, RunUpdate},
  session::{
    MsisdnConfidence, NewTrackingEvent, SessionIdentity, SessionTouch,
    TrackingEvent, VisitorSession,
  },
  store::{Page, PortalStats, PortalStore},
  unlock::{
    BillingEvent, NewBillingEvent, NewUnlock, RefundClaim, RefundMark, RefundMode,
    Unlock, UnlockLookup, UnlockOutcome, UnlockStatus,
  },
};

use crate::{
  encode::{
    ARTICLE_COLUMNS, BILLING_COLUMNS, CUSTOMER_COLUMNS, EVENT_COLUMNS,
    OUTBOX_COLUMNS, PIPELINE_COLUMNS, RawArticle, RawBillingEvent, RawCustomer,
    RawEvent, RawOutbox, RawPipelineRun, RawSession, RawUnlock, SESSION_COLUMNS,
    UNLOCK_COLUMNS, decode_enum, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A paywire store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All access
/// is serialised through one connection thread, so multi-statement operations
/// run inside a transaction are atomic with respect to every other caller.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Outbox rows pre-encoded outside the connection thread.
type EncodedEffects = Vec<(String, String)>;

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every non-terminal outbox row, for diagnostics and tests.
  pub async fn pending_outbox_count(&self) -> Result<i64> {
    let pending = OutboxStatus::Pending.as_ref().to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE status = ?1",
            rusqlite::params![pending],
            |r| r.get(0),
          )?)
        })
        .await?,
    )
  }
}

fn encode_effects(effects: &[Effect]) -> Result<EncodedEffects> {
  effects
    .iter()
    .map(|e| Ok((encode_uuid(Uuid::new_v4()), serde_json::to_string(e)?)))
    .collect()
}

/// Insert pre-encoded outbox rows inside an open transaction.
fn enqueue(
  tx: &Transaction<'_>,
  brand: &str,
  effects: &EncodedEffects,
  now: &str,
) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare(
    "INSERT INTO outbox (entry_id, brand, effect_json, status, attempts, created_at, next_attempt_at)
     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
  )?;
  for (entry_id, json) in effects {
    stmt.execute(rusqlite::params![
      entry_id,
      brand,
      json,
      OutboxStatus::Pending.as_ref(),
      now
    ])?;
  }
  Ok(())
}

fn select_unlock(
  conn: &rusqlite::Connection,
  where_clause: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Option<RawUnlock>> {
  conn
    .query_row(
      &format!("SELECT {UNLOCK_COLUMNS} FROM unlocks WHERE {where_clause}"),
      params,
      RawUnlock::from_row,
    )
    .optional()
}

enum RawUnlockOutcome {
  Inserted(RawUnlock),
  Upgraded(RawUnlock),
  Duplicate(RawUnlock),
}

/// Result of a guarded unlock status change.
enum RawTransition {
  Applied(RawUnlock),
  NotFound,
  WrongStatus(String),
}

// ─── PortalStore impl ────────────────────────────────────────────────────────

impl PortalStore for SqliteStore {
  type Error = Error;

  // ── Sessions ──────────────────────────────────────────────────────────────

  async fn touch_session(&self, brand: &str, touch: SessionTouch) -> Result<VisitorSession> {
    let brand       = brand.to_owned();
    let now         = encode_dt(Utc::now());
    let device_json = serde_json::to_string(&touch.device)?;
    let page_views  = i64::from(touch.page_view);
    let events      = i64::from(touch.event);

    let raw: RawSession = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sessions (
             brand, session_id, ip, user_agent, device_json,
             utm_source, utm_medium, utm_campaign, landing_page, referrer,
             created_at, last_seen_at, page_views, events
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12, ?13)
           ON CONFLICT (brand, session_id) DO UPDATE SET
             ip           = COALESCE(excluded.ip, sessions.ip),
             user_agent   = COALESCE(excluded.user_agent, sessions.user_agent),
             device_json  = CASE WHEN excluded.user_agent IS NULL
                                 THEN sessions.device_json
                                 ELSE excluded.device_json END,
             last_seen_at = excluded.last_seen_at,
             page_views   = sessions.page_views + excluded.page_views,
             events       = sessions.events + excluded.events",
          rusqlite::params![
            brand,
            touch.session_id,
            touch.ip,
            touch.user_agent,
            device_json,
            touch.utm.source,
            touch.utm.medium,
            touch.utm.campaign,
            touch.landing_page,
            touch.referrer,
            now,
            page_views,
            events,
          ],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE brand = ?1 AND session_id = ?2"),
          rusqlite::params![brand, touch.session_id],
          RawSession::from_row,
        )?)
      })
      .await?;

    raw.into_session()
  }

  async fn get_session(&self, brand: &str, session_id: &str) -> Result<Option<VisitorSession>> {
    let brand      = brand.to_owned();
    let session_id = session_id.to_owned();

    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE brand = ?1 AND session_id = ?2"
              ),
              rusqlite::params![brand, session_id],
              RawSession::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSession::into_session).transpose()
  }

  async fn identify_session(
    &self,
    brand: &str,
    session_id: &str,
    identity: SessionIdentity,
  ) -> Result<bool> {
    let brand      = brand.to_owned();
    let session_id = session_id.to_owned();
    let now        = encode_dt(Utc::now());
    let confidence = identity.confidence.as_ref().to_owned();
    let confirmed  = MsisdnConfidence::Confirmed.as_ref().to_owned();
    let network    = identity.network_type.as_ref().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sessions SET
             msisdn            = ?3,
             msisdn_confidence = ?4,
             network_type      = ?5,
             carrier           = COALESCE(?6, carrier),
             country           = COALESCE(?7, country),
             last_seen_at      = ?8
           WHERE brand = ?1 AND session_id = ?2
             AND NOT (msisdn_confidence = ?9 AND ?4 != ?9)",
          rusqlite::params![
            brand,
            session_id,
            identity.msisdn,
            confidence,
            network,
            identity.carrier,
            identity.country,
            now,
            confirmed,
          ],
        )?)
      })
      .await?;

    Ok(changed > 0)
  }

  async fn link_sessions_by_ip(
    &self,
    brand: &str,
    ip: &str,
    msisdn: &str,
    since: DateTime<Utc>,
  ) -> Result<u64> {
    let brand     = brand.to_owned();
    let ip        = ip.to_owned();
    let msisdn    = msisdn.to_owned();
    let since     = encode_dt(since);
    // A shared carrier address is a CRM hint, never evidence of identity.
    let linked_as = MsisdnConfidence::Unconfirmed.as_ref().to_owned();

    let linked = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sessions SET msisdn = ?3, msisdn_confidence = ?4
           WHERE brand = ?1 AND ip = ?2 AND msisdn IS NULL AND last_seen_at >= ?5",
          rusqlite::params![brand, ip, msisdn, linked_as, since],
        )?)
      })
      .await?;

    Ok(linked as u64)
  }

  async fn reset_sessions(&self, brand: &str) -> Result<u64> {
    let brand = brand.to_owned();

    let deleted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM tracking_events WHERE brand = ?1",
          rusqlite::params![brand],
        )?;
        let n = tx.execute("DELETE FROM sessions WHERE brand = ?1", rusqlite::params![brand])?;
        tx.commit()?;
        Ok(n)
      })
      .await?;

    Ok(deleted as u64)
  }

  // ── Tracking events ───────────────────────────────────────────────────────

  async fn record_event(&self, brand: &str, event: NewTrackingEvent) -> Result<TrackingEvent> {
    let recorded = TrackingEvent {
      event_id:   Uuid::new_v4(),
      brand:      brand.to_owned(),
      session_id: event.session_id,
      kind:       event.kind,
      article_id: event.article_id,
      path:       event.path,
      msisdn:     event.msisdn,
      created_at: Utc::now(),
    };

    let id_str     = encode_uuid(recorded.event_id);
    let brand      = recorded.brand.clone();
    let session_id = recorded.session_id.clone();
    let kind       = recorded.kind.as_ref().to_owned();
    let article_id = recorded.article_id.clone();
    let path       = recorded.path.clone();
    let msisdn     = recorded.msisdn.clone();
    let at_str     = encode_dt(recorded.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO tracking_events (event_id, brand, session_id, kind, article_id, path, msisdn, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![id_str, brand, session_id, kind, article_id, path, msisdn, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(recorded)
  }

  async fn backfill_event_msisdn(
    &self,
    brand: &str,
    session_id: &str,
    msisdn: &str,
  ) -> Result<u64> {
    let brand      = brand.to_owned();
    let session_id = session_id.to_owned();
    let msisdn     = msisdn.to_owned();

    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE tracking_events SET msisdn = ?3
           WHERE brand = ?1 AND session_id = ?2 AND msisdn IS NULL",
          rusqlite::params![brand, session_id, msisdn],
        )?)
      })
      .await?;

    Ok(n as u64)
  }

  async fn list_session_events(&self, brand: &str, session_id: &str) -> Result<Vec<TrackingEvent>> {
    let brand      = brand.to_owned();
    let session_id = session_id.to_owned();

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM tracking_events
           WHERE brand = ?1 AND session_id = ?2
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![brand, session_id], RawEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  // ── Customers ─────────────────────────────────────────────────────────────

  async fn upsert_customer(&self, brand: &str, touch: CustomerTouch) -> Result<Customer> {
    let brand      = brand.to_owned();
    let now        = encode_dt(Utc::now());
    let identified = ConversionStatus::Identified.as_ref().to_owned();

    let raw: RawCustomer = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customers (
             brand, msisdn, first_seen_at, last_seen_at, visit_count,
             purchase_count, total_spent_cents, conversion_status,
             landing_page, utm_source, utm_campaign, carrier, country, last_ip
           ) VALUES (?1, ?2, ?3, ?3, 1, 0, 0, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT (brand, msisdn) DO UPDATE SET
             last_seen_at = excluded.last_seen_at,
             visit_count  = customers.visit_count + 1,
             carrier      = COALESCE(excluded.carrier, customers.carrier),
             country      = COALESCE(excluded.country, customers.country),
             last_ip      = COALESCE(excluded.last_ip, customers.last_ip)",
          rusqlite::params![
            brand,
            touch.msisdn,
            now,
            identified,
            touch.landing_page,
            touch.utm.source,
            touch.utm.campaign,
            touch.carrier,
            touch.country,
            touch.ip,
          ],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE brand = ?1 AND msisdn = ?2"),
          rusqlite::params![brand, touch.msisdn],
          RawCustomer::from_row,
        )?)
      })
      .await?;

    raw.into_customer()
  }

  async fn apply_customer_purchase(
    &self,
    brand: &str,
    msisdn: &str,
    amount_cents: i64,
    currency: &str,
  ) -> Result<()> {
    let brand    = brand.to_owned();
    let msisdn   = msisdn.to_owned();
    let currency = currency.to_owned();
    let now      = encode_dt(Utc::now());
    let customer = ConversionStatus::Customer.as_ref().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customers (
             brand, msisdn, first_seen_at, last_seen_at, visit_count,
             purchase_count, total_spent_cents, currency, conversion_status
           ) VALUES (?1, ?2, ?3, ?3, 0, 1, ?4, ?5, ?6)
           ON CONFLICT (brand, msisdn) DO UPDATE SET
             last_seen_at      = excluded.last_seen_at,
             purchase_count    = customers.purchase_count + 1,
             total_spent_cents = customers.total_spent_cents + excluded.total_spent_cents,
             currency          = excluded.currency,
             conversion_status = excluded.conversion_status",
          rusqlite::params![brand, msisdn, now, amount_cents, currency, customer],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn apply_customer_refund(&self, brand: &str, msisdn: &str, amount_cents: i64) -> Result<()> {
    let brand  = brand.to_owned();
    let msisdn = msisdn.to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE customers SET
             purchase_count    = MAX(purchase_count - 1, 0),
             total_spent_cents = MAX(total_spent_cents - ?3, 0)
           WHERE brand = ?1 AND msisdn = ?2",
          rusqlite::params![brand, msisdn, amount_cents],
        )?)
      })
      .await?;

    if changed == 0 {
      tracing::warn!("refund for unknown customer; aggregate not adjusted");
    }
    Ok(())
  }

  async fn get_customer(&self, brand: &str, msisdn: &str) -> Result<Option<Customer>> {
    let brand  = brand.to_owned();
    let msisdn = msisdn.to_owned();

    let raw: Option<RawCustomer> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE brand = ?1 AND msisdn = ?2"
              ),
              rusqlite::params![brand, msisdn],
              RawCustomer::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCustomer::into_customer).transpose()
  }

  async fn list_customers(&self, brand: &str, page: Page) -> Result<Vec<Customer>> {
    let brand = brand.to_owned();

    let raws: Vec<RawCustomer> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE brand = ?1
           ORDER BY last_seen_at DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![brand, page.clamped_limit(), page.offset],
            RawCustomer::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCustomer::into_customer).collect()
  }

  // ── Articles ──────────────────────────────────────────────────────────────

  async fn create_article(&self, brand: &str, article: NewArticle) -> Result<Article> {
    let created = Article {
      article_id:   article.article_id,
      brand:        brand.to_owned(),
      title:        article.title,
      teaser:       article.teaser,
      body:         article.body,
      price_cents:  article.price_cents,
      currency:     article.currency,
      unlock_count: 0,
      view_count:   0,
      published_at: article.published_at.unwrap_or_else(Utc::now),
    };

    let row = created.clone();
    let published = encode_dt(row.published_at);

    let inserted = self
      .conn
      .call(move |conn| {
        let exists: bool = conn
          .query_row(
            "SELECT 1 FROM articles WHERE brand = ?1 AND article_id = ?2",
            rusqlite::params![row.brand, row.article_id],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if exists {
          return Ok(false);
        }
        conn.execute(
          "INSERT INTO articles (brand, article_id, title, teaser, body, price_cents, currency, published_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            row.brand,
            row.article_id,
            row.title,
            row.teaser,
            row.body,
            row.price_cents,
            row.currency,
            published,
          ],
        )?;
        Ok(true)
      })
      .await?;

    if !inserted {
      return Err(Error::ArticleExists(created.article_id));
    }
    Ok(created)
  }

  async fn get_article(&self, brand: &str, article_id: &str) -> Result<Option<Article>> {
    let brand      = brand.to_owned();
    let article_id = article_id.to_owned();

    let raw: Option<RawArticle> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles WHERE brand = ?1 AND article_id = ?2"
              ),
              rusqlite::params![brand, article_id],
              RawArticle::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawArticle::into_article).transpose()
  }

  async fn list_articles(&self, brand: &str, page: Page) -> Result<Vec<Article>> {
    let brand = brand.to_owned();

    let raws: Vec<RawArticle> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ARTICLE_COLUMNS} FROM articles WHERE brand = ?1
           ORDER BY published_at DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![brand, page.clamped_limit(), page.offset],
            RawArticle::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawArticle::into_article).collect()
  }

  async fn adjust_article_counters(
    &self,
    brand: &str,
    article_id: &str,
    views_delta: i64,
    unlocks_delta: i64,
  ) -> Result<bool> {
    let brand      = brand.to_owned();
    let article_id = article_id.to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE articles SET
             view_count   = MAX(view_count + ?3, 0),
             unlock_count = MAX(unlock_count + ?4, 0)
           WHERE brand = ?1 AND article_id = ?2",
          rusqlite::params![brand, article_id, views_delta, unlocks_delta],
        )?)
      })
      .await?;

    Ok(changed > 0)
  }

  // ── Unlocks ───────────────────────────────────────────────────────────────

  async fn record_unlock(
    &self,
    brand: &str,
    unlock: NewUnlock,
    effects: Vec<Effect>,
  ) -> Result<UnlockOutcome> {
    let brand    = brand.to_owned();
    let encoded  = encode_effects(&effects)?;
    let now      = encode_dt(Utc::now());
    let new_id   = encode_uuid(Uuid::new_v4());
    let status   = unlock.status.as_ref().to_owned();
    let pending  = UnlockStatus::Pending.as_ref().to_owned();
    let terminal = unlock.status.is_terminal();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing = select_unlock(
          &tx,
          "brand = ?1 AND transaction_id = ?2",
          rusqlite::params![brand, unlock.transaction_id],
        )?;

        let outcome = match existing {
          Some(raw) if raw.status == pending && terminal => {
            tx.execute(
              "UPDATE unlocks SET
                 status       = ?2,
                 msisdn       = COALESCE(?3, msisdn),
                 article_id   = COALESCE(?4, article_id),
                 session_id   = COALESCE(?5, session_id),
                 amount_cents = ?6,
                 currency     = ?7,
                 updated_at   = ?8
               WHERE unlock_id = ?1",
              rusqlite::params![
                raw.unlock_id,
                status,
                unlock.msisdn,
                unlock.article_id,
                unlock.session_id,
                unlock.amount_cents,
                unlock.currency,
                now,
              ],
            )?;
            enqueue(&tx, &brand, &encoded, &now)?;
            let updated =
              select_unlock(&tx, "unlock_id = ?1", rusqlite::params![raw.unlock_id])?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            RawUnlockOutcome::Upgraded(updated)
          }
          Some(raw) => RawUnlockOutcome::Duplicate(raw),
          None => {
            tx.execute(
              "INSERT INTO unlocks (
                 unlock_id, brand, transaction_id, msisdn, article_id, session_id,
                 amount_cents, currency, status, sandbox, created_at, updated_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
              rusqlite::params![
                new_id,
                brand,
                unlock.transaction_id,
                unlock.msisdn,
                unlock.article_id,
                unlock.session_id,
                unlock.amount_cents,
                unlock.currency,
                status,
                unlock.sandbox,
                now,
              ],
            )?;
            enqueue(&tx, &brand, &encoded, &now)?;
            let inserted = select_unlock(&tx, "unlock_id = ?1", rusqlite::params![new_id])?
              .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            RawUnlockOutcome::Inserted(inserted)
          }
        };

        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    Ok(match outcome {
      RawUnlockOutcome::Inserted(raw) => UnlockOutcome::Inserted(raw.into_unlock()?),
      RawUnlockOutcome::Upgraded(raw) => UnlockOutcome::Upgraded(raw.into_unlock()?),
      RawUnlockOutcome::Duplicate(raw) => UnlockOutcome::Duplicate(raw.into_unlock()?),
    })
  }

  async fn get_unlock(&self, brand: &str, unlock_id: Uuid) -> Result<Option<Unlock>> {
    let brand  = brand.to_owned();
    let id_str = encode_uuid(unlock_id);

    let raw = self
      .conn
      .call(move |conn| {
        Ok(select_unlock(
          conn,
          "brand = ?1 AND unlock_id = ?2",
          rusqlite::params![brand, id_str],
        )?)
      })
      .await?;

    raw.map(RawUnlock::into_unlock).transpose()
  }

  async fn find_completed_unlock(
    &self,
    brand: &str,
    article_id: &str,
    lookup: UnlockLookup<'_>,
  ) -> Result<Option<Unlock>> {
    let brand      = brand.to_owned();
    let article_id = article_id.to_owned();
    let completed  = UnlockStatus::Completed.as_ref().to_owned();
    let (column, key) = match lookup {
      UnlockLookup::Msisdn(m) => ("msisdn", m.to_owned()),
      UnlockLookup::Session(s) => ("session_id", s.to_owned()),
    };

    let raw = self
      .conn
      .call(move |conn| {
        Ok(select_unlock(
          conn,
          &format!(
            "brand = ?1 AND article_id = ?2 AND status = ?3 AND {column} = ?4
             ORDER BY created_at DESC LIMIT 1"
          ),
          rusqlite::params![brand, article_id, completed, key],
        )?)
      })
      .await?;

    raw.map(RawUnlock::into_unlock).transpose()
  }

  async fn list_unlocks(&self, brand: &str, page: Page) -> Result<Vec<Unlock>> {
    let brand = brand.to_owned();

    let raws: Vec<RawUnlock> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {UNLOCK_COLUMNS} FROM unlocks WHERE brand = ?1
           ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![brand, page.clamped_limit(), page.offset],
            RawUnlock::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUnlock::into_unlock).collect()
  }

  async fn claim_refund(&self, brand: &str, unlock_id: Uuid) -> Result<RefundClaim> {
    let brand     = brand.to_owned();
    let id_str    = encode_uuid(unlock_id);
    let now       = encode_dt(Utc::now());
    let completed = UnlockStatus::Completed.as_ref().to_owned();
    let refunding = UnlockStatus::Refunding.as_ref().to_owned();

    let claim = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let Some(raw) = select_unlock(
          &tx,
          "brand = ?1 AND unlock_id = ?2",
          rusqlite::params![brand, id_str],
        )?
        else {
          return Ok(RawTransition::NotFound);
        };
        if raw.status != completed {
          return Ok(RawTransition::WrongStatus(raw.status));
        }

        tx.execute(
          "UPDATE unlocks SET status = ?2, updated_at = ?3 WHERE unlock_id = ?1",
          rusqlite::params![id_str, refunding, now],
        )?;
        let updated = select_unlock(&tx, "unlock_id = ?1", rusqlite::params![id_str])?
          .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

        tx.commit()?;
        Ok(RawTransition::Applied(updated))
      })
      .await?;

    Ok(match claim {
      RawTransition::Applied(raw) => RefundClaim::Claimed(raw.into_unlock()?),
      RawTransition::NotFound => RefundClaim::NotFound,
      RawTransition::WrongStatus(status) => {
        RefundClaim::NotRefundable(decode_enum("unlock status", &status)?)
      }
    })
  }

  async fn mark_refunded(
    &self,
    brand: &str,
    unlock_id: Uuid,
    mode: RefundMode,
    effects: Vec<Effect>,
  ) -> Result<RefundMark> {
    let brand     = brand.to_owned();
    let id_str    = encode_uuid(unlock_id);
    let encoded   = encode_effects(&effects)?;
    let now       = encode_dt(Utc::now());
    let mode      = mode.as_ref().to_owned();
    let refunding = UnlockStatus::Refunding.as_ref().to_owned();
    let refunded  = UnlockStatus::Refunded.as_ref().to_owned();

    let mark = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let Some(raw) = select_unlock(
          &tx,
          "brand = ?1 AND unlock_id = ?2",
          rusqlite::params![brand, id_str],
        )?
        else {
          return Ok(RawTransition::NotFound);
        };
        if raw.status != refunding {
          return Ok(RawTransition::WrongStatus(raw.status));
        }

        tx.execute(
          "UPDATE unlocks SET status = ?2, refunded_at = ?3, refund_mode = ?4, updated_at = ?3
           WHERE unlock_id = ?1",
          rusqlite::params![id_str, refunded, now, mode],
        )?;
        enqueue(&tx, &brand, &encoded, &now)?;
        let updated = select_unlock(&tx, "unlock_id = ?1", rusqlite::params![id_str])?
          .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

        tx.commit()?;
        Ok(RawTransition::Applied(updated))
      })
      .await?;

    Ok(match mark {
      RawTransition::Applied(raw) => RefundMark::Refunded(raw.into_unlock()?),
      RawTransition::NotFound => RefundMark::NotFound,
      RawTransition::WrongStatus(status) => {
        RefundMark::NotRefundable(decode_enum("unlock status", &status)?)
      }
    })
  }

  // ── Billing ledger ────────────────────────────────────────────────────────

  async fn record_billing_event(&self, brand: &str, event: NewBillingEvent) -> Result<BillingEvent> {
    let recorded = BillingEvent {
      event_id:       Uuid::new_v4(),
      brand:          brand.to_owned(),
      kind:           event.kind,
      transaction_id: event.transaction_id,
      msisdn:         event.msisdn,
      article_id:     event.article_id,
      amount_cents:   event.amount_cents,
      currency:       event.currency,
      created_at:     Utc::now(),
    };

    let row    = recorded.clone();
    let id_str = encode_uuid(row.event_id);
    let kind   = row.kind.as_ref().to_owned();
    let at_str = encode_dt(row.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO billing_events (
             event_id, brand, kind, transaction_id, msisdn, article_id,
             amount_cents, currency, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            row.brand,
            kind,
            row.transaction_id,
            row.msisdn,
            row.article_id,
            row.amount_cents,
            row.currency,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(recorded)
  }

  async fn list_billing_events(&self, brand: &str, page: Page) -> Result<Vec<BillingEvent>> {
    let brand = brand.to_owned();

    let raws: Vec<RawBillingEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {BILLING_COLUMNS} FROM billing_events WHERE brand = ?1
           ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![brand, page.clamped_limit(), page.offset],
            RawBillingEvent::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBillingEvent::into_event).collect()
  }

  // ── Outbox ────────────────────────────────────────────────────────────────

  async fn claim_outbox(
    &self,
    brand: Option<&str>,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    limit: u32,
  ) -> Result<Vec<OutboxEntry>> {
    let brand   = brand.map(str::to_owned);
    let now     = encode_dt(now);
    let lease   = encode_dt(lease_until);
    let pending = OutboxStatus::Pending.as_ref().to_owned();

    let raws: Vec<RawOutbox> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rows = {
          let mut stmt = tx.prepare(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox
             WHERE status = ?1 AND next_attempt_at <= ?2 AND (?3 IS NULL OR brand = ?3)
             ORDER BY created_at, rowid LIMIT ?4"
          ))?;
          stmt
            .query_map(rusqlite::params![pending, now, brand, limit], RawOutbox::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        {
          let mut lease_stmt =
            tx.prepare("UPDATE outbox SET next_attempt_at = ?2 WHERE entry_id = ?1")?;
          for raw in &rows {
            lease_stmt.execute(rusqlite::params![raw.entry_id, lease])?;
          }
        }
        tx.commit()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutbox::into_entry).collect()
  }

  async fn complete_outbox(&self, entry_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(entry_id);
    let done   = OutboxStatus::Done.as_ref().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE outbox SET status = ?2, attempts = attempts + 1, last_error = NULL
           WHERE entry_id = ?1",
          rusqlite::params![id_str, done],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fail_outbox(
    &self,
    entry_id: Uuid,
    error: String,
    retry_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let id_str   = encode_uuid(entry_id);
    let retry_at = retry_at.map(encode_dt);
    let dead     = OutboxStatus::Dead.as_ref().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE outbox SET
             attempts        = attempts + 1,
             last_error      = ?2,
             status          = CASE WHEN ?3 IS NULL THEN ?4 ELSE status END,
             next_attempt_at = COALESCE(?3, next_attempt_at)
           WHERE entry_id = ?1",
          rusqlite::params![id_str, error, retry_at, dead],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_dead_outbox(&self, brand: &str, page: Page) -> Result<Vec<OutboxEntry>> {
    let brand = brand.to_owned();
    let dead  = OutboxStatus::Dead.as_ref().to_owned();

    let raws: Vec<RawOutbox> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE brand = ?1 AND status = ?2
           ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![brand, dead, page.clamped_limit(), page.offset],
            RawOutbox::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutbox::into_entry).collect()
  }

  // ── Pipeline runs ─────────────────────────────────────────────────────────

  async fn create_pipeline_run(&self, brand: &str) -> Result<PipelineRun> {
    let run = PipelineRun {
      run_id:       Uuid::new_v4(),
      brand:        brand.to_owned(),
      status:       RunStatus::Queued,
      requested_at: Utc::now(),
      started_at:   None,
      finished_at:  None,
      summary:      None,
      error:        None,
    };

    let id_str = encode_uuid(run.run_id);
    let brand  = run.brand.clone();
    let status = run.status.as_ref().to_owned();
    let at_str = encode_dt(run.requested_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pipeline_runs (run_id, brand, status, requested_at) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, brand, status, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(run)
  }

  async fn update_pipeline_run(&self, run_id: Uuid, update: RunUpdate) -> Result<bool> {
    let id_str = encode_uuid(run_id);
    let now    = encode_dt(Utc::now());

    let (status, summary, error) = match update {
      RunUpdate::Started => (RunStatus::Running, None, None),
      RunUpdate::Succeeded(summary) => {
        (RunStatus::Succeeded, Some(serde_json::to_string(&summary)?), None)
      }
      RunUpdate::Failed(error) => (RunStatus::Failed, None, Some(error)),
    };
    let finished = status.is_finished();
    let status   = status.as_ref().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        let sql = if finished {
          "UPDATE pipeline_runs SET status = ?2, finished_at = ?3, summary_json = ?4, error = ?5
           WHERE run_id = ?1"
        } else {
          "UPDATE pipeline_runs SET status = ?2, started_at = ?3, summary_json = ?4, error = ?5
           WHERE run_id = ?1"
        };
        Ok(conn.execute(sql, rusqlite::params![id_str, status, now, summary, error])?)
      })
      .await?;

    Ok(changed > 0)
  }

  async fn get_pipeline_run(&self, brand: &str, run_id: Uuid) -> Result<Option<PipelineRun>> {
    let brand  = brand.to_owned();
    let id_str = encode_uuid(run_id);

    let raw: Option<RawPipelineRun> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PIPELINE_COLUMNS} FROM pipeline_runs WHERE brand = ?1 AND run_id = ?2"
              ),
              rusqlite::params![brand, id_str],
              RawPipelineRun::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPipelineRun::into_run).transpose()
  }

  async fn latest_pipeline_run(&self, brand: &str) -> Result<Option<PipelineRun>> {
    let brand = brand.to_owned();

    let raw: Option<RawPipelineRun> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PIPELINE_COLUMNS} FROM pipeline_runs WHERE brand = ?1
                 ORDER BY requested_at DESC, rowid DESC LIMIT 1"
              ),
              rusqlite::params![brand],
              RawPipelineRun::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPipelineRun::into_run).transpose()
  }

  // ── Analytics ─────────────────────────────────────────────────────────────

  async fn stats(&self, brand: &str) -> Result<PortalStats> {
    let brand = brand.to_owned();

    let stats = self
      .conn
      .call(move |conn| {
        let count = |sql: &str| -> rusqlite::Result<i64> {
          conn.query_row(sql, rusqlite::params![brand], |r| r.get(0))
        };
        Ok(PortalStats {
          sessions:            count("SELECT COUNT(*) FROM sessions WHERE brand = ?1")?,
          identified_sessions: count(
            "SELECT COUNT(*) FROM sessions WHERE brand = ?1 AND msisdn IS NOT NULL",
          )?,
          page_views:          count(
            "SELECT COALESCE(SUM(page_views), 0) FROM sessions WHERE brand = ?1",
          )?,
          customers:           count("SELECT COUNT(*) FROM customers WHERE brand = ?1")?,
          paying_customers:    count(
            "SELECT COUNT(*) FROM customers WHERE brand = ?1 AND purchase_count > 0",
          )?,
          unlocks_completed:   count(
            "SELECT COUNT(*) FROM unlocks WHERE brand = ?1 AND status = 'completed'",
          )?,
          unlocks_refunded:    count(
            "SELECT COUNT(*) FROM unlocks WHERE brand = ?1 AND status = 'refunded'",
          )?,
          revenue_cents:       count(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM billing_events
             WHERE brand = ?1 AND kind = 'charge'",
          )?,
          refunded_cents:      count(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM billing_events
             WHERE brand = ?1 AND kind = 'refund'",
          )?,
          outbox_pending:      count(
            "SELECT COUNT(*) FROM outbox WHERE brand = ?1 AND status = 'pending'",
          )?,
          outbox_dead:         count(
            "SELECT COUNT(*) FROM outbox WHERE brand = ?1 AND status = 'dead'",
          )?,
        })
      })
      .await?;

    Ok(stats)
  }
}
