//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use paywire_core::{
  article::NewArticle,
  carrier::NetworkType,
  customer::{ConversionStatus, CustomerTouch},
  outbox::{Effect, OutboxStatus},
  pipeline::{RunStatus, RunUpdate},
  session::{
    EventKind, MsisdnConfidence, NewTrackingEvent, SessionIdentity, SessionTouch, Utm,
  },
  store::{Page, PortalStore},
  unlock::{
    BillingEventKind, NewBillingEvent, NewUnlock, RefundClaim, RefundMark, RefundMode,
    UnlockLookup, UnlockOutcome, UnlockStatus,
  },
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

const BRAND: &str = "daily";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn touch(session_id: &str, ip: &str) -> SessionTouch {
  SessionTouch {
    session_id: session_id.into(),
    ip: Some(ip.into()),
    page_view: true,
    ..Default::default()
  }
}

fn identity(msisdn: &str, confidence: MsisdnConfidence) -> SessionIdentity {
  SessionIdentity {
    msisdn: msisdn.into(),
    confidence,
    network_type: NetworkType::Mobile,
    carrier: Some("A1".into()),
    country: Some("AT".into()),
  }
}

fn article(id: &str) -> NewArticle {
  NewArticle {
    article_id:   id.into(),
    title:        "Title".into(),
    teaser:       "Teaser".into(),
    body:         "Body".into(),
    price_cents:  99,
    currency:     "EUR".into(),
    published_at: None,
  }
}

fn completed(tx: &str) -> NewUnlock {
  NewUnlock {
    transaction_id: tx.into(),
    msisdn:         Some("436601234567".into()),
    article_id:     Some("story".into()),
    session_id:     Some("s1".into()),
    amount_cents:   99,
    currency:       "EUR".into(),
    status:         UnlockStatus::Completed,
    sandbox:        false,
  }
}

fn purchase_effects() -> Vec<Effect> {
  vec![
    Effect::ArticleUnlocks { article_id: "story".into(), delta: 1 },
    Effect::CustomerPurchase {
      msisdn:       "436601234567".into(),
      amount_cents: 99,
      currency:     "EUR".into(),
    },
  ]
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn touch_creates_then_counts() {
  let s = store().await;

  let first = SessionTouch {
    utm: Utm { source: Some("fb".into()), ..Default::default() },
    landing_page: Some("/a/story".into()),
    ..touch("s1", "62.46.1.1")
  };
  let created = s.touch_session(BRAND, first).await.unwrap();
  assert_eq!(created.page_views, 1);
  assert_eq!(created.msisdn_confidence, MsisdnConfidence::None);

  let later = SessionTouch {
    utm: Utm { source: Some("google".into()), ..Default::default() },
    ..touch("s1", "62.46.1.2")
  };
  let updated = s.touch_session(BRAND, later).await.unwrap();
  assert_eq!(updated.page_views, 2);
  assert_eq!(updated.ip.as_deref(), Some("62.46.1.2"));
  assert_eq!(updated.utm.source.as_deref(), Some("fb"));
  assert_eq!(updated.landing_page.as_deref(), Some("/a/story"));
}

#[tokio::test]
async fn confirmed_session_is_never_downgraded() {
  let s = store().await;
  s.touch_session(BRAND, touch("s1", "62.46.1.1")).await.unwrap();

  let ok = s
    .identify_session(BRAND, "s1", identity("436601234567", MsisdnConfidence::Confirmed))
    .await
    .unwrap();
  assert!(ok);

  let downgraded = s
    .identify_session(BRAND, "s1", identity("436609999999", MsisdnConfidence::Unconfirmed))
    .await
    .unwrap();
  assert!(!downgraded);

  let session = s.get_session(BRAND, "s1").await.unwrap().unwrap();
  assert_eq!(session.msisdn.as_deref(), Some("436601234567"));
  assert_eq!(session.msisdn_confidence, MsisdnConfidence::Confirmed);
  assert_eq!(session.network_type, NetworkType::Mobile);
}

#[tokio::test]
async fn ip_linking_only_touches_anonymous_sessions() {
  let s = store().await;
  s.touch_session(BRAND, touch("anon", "62.46.1.1")).await.unwrap();
  s.touch_session(BRAND, touch("known", "62.46.1.1")).await.unwrap();
  s.touch_session(BRAND, touch("elsewhere", "80.187.0.1")).await.unwrap();
  s.identify_session(BRAND, "known", identity("436609999999", MsisdnConfidence::Confirmed))
    .await
    .unwrap();

  let since = Utc::now() - Duration::minutes(30);
  let linked = s
    .link_sessions_by_ip(BRAND, "62.46.1.1", "436601234567", since)
    .await
    .unwrap();
  assert_eq!(linked, 1);

  let anon = s.get_session(BRAND, "anon").await.unwrap().unwrap();
  assert_eq!(anon.msisdn.as_deref(), Some("436601234567"));
  assert_eq!(anon.msisdn_confidence, MsisdnConfidence::Unconfirmed);
  let known = s.get_session(BRAND, "known").await.unwrap().unwrap();
  assert_eq!(known.msisdn.as_deref(), Some("436609999999"));
  let other = s.get_session(BRAND, "elsewhere").await.unwrap().unwrap();
  assert!(other.msisdn.is_none());
}

#[tokio::test]
async fn ip_linking_respects_the_window() {
  let s = store().await;
  s.touch_session(BRAND, touch("old", "62.46.1.1")).await.unwrap();

  let since = Utc::now() + Duration::minutes(1);
  let linked = s
    .link_sessions_by_ip(BRAND, "62.46.1.1", "436601234567", since)
    .await
    .unwrap();
  assert_eq!(linked, 0);
}

#[tokio::test]
async fn events_are_backfilled_and_reset() {
  let s = store().await;
  s.touch_session(BRAND, touch("s1", "62.46.1.1")).await.unwrap();
  for kind in [EventKind::PageView, EventKind::PaywallView] {
    s.record_event(BRAND, NewTrackingEvent {
      session_id: "s1".into(),
      kind,
      article_id: Some("story".into()),
      path:       Some("/a/story".into()),
      msisdn:     None,
    })
    .await
    .unwrap();
  }

  let n = s.backfill_event_msisdn(BRAND, "s1", "436601234567").await.unwrap();
  assert_eq!(n, 2);
  let events = s.list_session_events(BRAND, "s1").await.unwrap();
  assert_eq!(events[0].kind, EventKind::PageView);
  assert!(events.iter().all(|e| e.msisdn.as_deref() == Some("436601234567")));

  let removed = s.reset_sessions(BRAND).await.unwrap();
  assert_eq!(removed, 1);
  assert!(s.get_session(BRAND, "s1").await.unwrap().is_none());
  assert!(s.list_session_events(BRAND, "s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn brands_do_not_see_each_other() {
  let s = store().await;
  s.touch_session("one", touch("s1", "62.46.1.1")).await.unwrap();
  assert!(s.get_session("two", "s1").await.unwrap().is_none());
  assert_eq!(s.reset_sessions("two").await.unwrap(), 0);
}

// ─── Customers ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn customer_visits_purchases_and_refunds() {
  let s = store().await;
  let msisdn = "436601234567";

  let c = s
    .upsert_customer(BRAND, CustomerTouch {
      msisdn: msisdn.into(),
      landing_page: Some("/first".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(c.visit_count, 1);
  assert_eq!(c.conversion_status, ConversionStatus::Identified);

  let c = s
    .upsert_customer(BRAND, CustomerTouch {
      msisdn: msisdn.into(),
      landing_page: Some("/second".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(c.visit_count, 2);
  assert_eq!(c.landing_page.as_deref(), Some("/first"));

  s.apply_customer_purchase(BRAND, msisdn, 99, "EUR").await.unwrap();
  let c = s.get_customer(BRAND, msisdn).await.unwrap().unwrap();
  assert_eq!(c.purchase_count, 1);
  assert_eq!(c.total_spent_cents, 99);
  assert_eq!(c.conversion_status, ConversionStatus::Customer);

  s.apply_customer_refund(BRAND, msisdn, 500).await.unwrap();
  s.apply_customer_refund(BRAND, msisdn, 500).await.unwrap();
  let c = s.get_customer(BRAND, msisdn).await.unwrap().unwrap();
  assert_eq!(c.purchase_count, 0);
  assert_eq!(c.total_spent_cents, 0);
}

#[tokio::test]
async fn purchase_creates_missing_customer() {
  let s = store().await;
  s.apply_customer_purchase(BRAND, "436601234567", 150, "EUR").await.unwrap();
  let all = s.list_customers(BRAND, Page::default()).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].visit_count, 0);
  assert_eq!(all[0].currency.as_deref(), Some("EUR"));
}

// ─── Articles ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn article_create_conflict_and_counters() {
  let s = store().await;
  s.create_article(BRAND, article("story")).await.unwrap();

  let dup = s.create_article(BRAND, article("story")).await;
  assert!(matches!(dup, Err(Error::ArticleExists(id)) if id == "story"));

  // Same slug under another brand is fine.
  s.create_article("other", article("story")).await.unwrap();

  assert!(s.adjust_article_counters(BRAND, "story", 3, 1).await.unwrap());
  assert!(s.adjust_article_counters(BRAND, "story", 0, -5).await.unwrap());
  assert!(!s.adjust_article_counters(BRAND, "missing", 1, 0).await.unwrap());

  let a = s.get_article(BRAND, "story").await.unwrap().unwrap();
  assert_eq!(a.view_count, 3);
  assert_eq!(a.unlock_count, 0);
  assert_eq!(s.list_articles(BRAND, Page::default()).await.unwrap().len(), 1);
}

// ─── Unlocks ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_callback_writes_nothing() {
  let s = store().await;

  let first = s.record_unlock(BRAND, completed("tx-1"), purchase_effects()).await.unwrap();
  assert!(matches!(first, UnlockOutcome::Inserted(_)));
  assert_eq!(s.pending_outbox_count().await.unwrap(), 2);

  let again = s.record_unlock(BRAND, completed("tx-1"), purchase_effects()).await.unwrap();
  assert!(again.is_duplicate());
  assert_eq!(again.unlock().unlock_id, first.unlock().unlock_id);
  assert_eq!(s.pending_outbox_count().await.unwrap(), 2);
  assert_eq!(s.list_unlocks(BRAND, Page::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pending_is_upgraded_once() {
  let s = store().await;

  let pending = NewUnlock { status: UnlockStatus::Pending, ..completed("tx-2") };
  let first = s.record_unlock(BRAND, pending.clone(), vec![]).await.unwrap();
  assert_eq!(first.unlock().status, UnlockStatus::Pending);

  let repeat = s.record_unlock(BRAND, pending, vec![]).await.unwrap();
  assert!(repeat.is_duplicate());

  let up = s.record_unlock(BRAND, completed("tx-2"), purchase_effects()).await.unwrap();
  assert!(matches!(up, UnlockOutcome::Upgraded(ref u) if u.status == UnlockStatus::Completed));
  assert_eq!(s.pending_outbox_count().await.unwrap(), 2);

  let late = s.record_unlock(BRAND, completed("tx-2"), purchase_effects()).await.unwrap();
  assert!(late.is_duplicate());
}

#[tokio::test]
async fn completed_unlock_lookup() {
  let s = store().await;
  s.record_unlock(BRAND, completed("tx-3"), vec![]).await.unwrap();
  s.record_unlock(
    BRAND,
    NewUnlock { status: UnlockStatus::Failed, session_id: Some("s2".into()), ..completed("tx-4") },
    vec![],
  )
  .await
  .unwrap();

  let by_msisdn = s
    .find_completed_unlock(BRAND, "story", UnlockLookup::Msisdn("436601234567"))
    .await
    .unwrap();
  assert!(by_msisdn.is_some());

  let by_session = s
    .find_completed_unlock(BRAND, "story", UnlockLookup::Session("s1"))
    .await
    .unwrap();
  assert!(by_session.is_some());

  let failed_session = s
    .find_completed_unlock(BRAND, "story", UnlockLookup::Session("s2"))
    .await
    .unwrap();
  assert!(failed_session.is_none());

  let other_article = s
    .find_completed_unlock(BRAND, "other", UnlockLookup::Session("s1"))
    .await
    .unwrap();
  assert!(other_article.is_none());
}

#[tokio::test]
async fn refund_marking() {
  let s = store().await;
  let u = s.record_unlock(BRAND, completed("tx-5"), vec![]).await.unwrap();
  let id = u.unlock().unlock_id;

  let missing = s.claim_refund(BRAND, Uuid::new_v4()).await;
  assert!(matches!(missing, Ok(RefundClaim::NotFound)));
  let wrong_brand = s.claim_refund("other", id).await;
  assert!(matches!(wrong_brand, Ok(RefundClaim::NotFound)));

  // Marking needs a claim first.
  let unclaimed = s.mark_refunded(BRAND, id, RefundMode::Gateway, vec![]).await.unwrap();
  assert!(matches!(unclaimed, RefundMark::NotRefundable(UnlockStatus::Completed)));

  let RefundClaim::Claimed(claimed) = s.claim_refund(BRAND, id).await.unwrap() else {
    panic!("expected claim")
  };
  assert_eq!(claimed.status, UnlockStatus::Refunding);
  let again = s.claim_refund(BRAND, id).await.unwrap();
  assert!(matches!(again, RefundClaim::NotRefundable(UnlockStatus::Refunding)));

  let access = s
    .find_completed_unlock(BRAND, "story", UnlockLookup::Session("s1"))
    .await
    .unwrap();
  assert!(access.is_none());

  let missing = s.mark_refunded(BRAND, Uuid::new_v4(), RefundMode::Gateway, vec![]).await;
  assert!(matches!(missing, Ok(RefundMark::NotFound)));

  let effects = vec![Effect::ArticleUnlocks { article_id: "story".into(), delta: -1 }];
  let done = s.mark_refunded(BRAND, id, RefundMode::Manual, effects).await.unwrap();
  let RefundMark::Refunded(refunded) = done else { panic!("expected refund") };
  assert_eq!(refunded.status, UnlockStatus::Refunded);
  assert_eq!(refunded.refund_mode, Some(RefundMode::Manual));
  assert!(refunded.refunded_at.is_some());
  assert_eq!(s.pending_outbox_count().await.unwrap(), 1);

  let twice = s.mark_refunded(BRAND, id, RefundMode::Gateway, vec![]).await.unwrap();
  assert!(matches!(twice, RefundMark::NotRefundable(UnlockStatus::Refunded)));
  let reclaim = s.claim_refund(BRAND, id).await.unwrap();
  assert!(matches!(reclaim, RefundClaim::NotRefundable(UnlockStatus::Refunded)));
}

#[tokio::test]
async fn billing_ledger() {
  let s = store().await;
  for kind in [BillingEventKind::Charge, BillingEventKind::Refund] {
    s.record_billing_event(BRAND, NewBillingEvent {
      kind,
      transaction_id: "tx-6".into(),
      msisdn: Some("436601234567".into()),
      article_id: Some("story".into()),
      amount_cents: 99,
      currency: "EUR".into(),
    })
    .await
    .unwrap();
  }
  let events = s.list_billing_events(BRAND, Page::default()).await.unwrap();
  assert_eq!(events.len(), 2);

  let stats = s.stats(BRAND).await.unwrap();
  assert_eq!(stats.revenue_cents, 99);
  assert_eq!(stats.refunded_cents, 99);
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn claimed_entries_are_leased() {
  let s = store().await;
  s.record_unlock(BRAND, completed("tx-7"), purchase_effects()).await.unwrap();

  let now = Utc::now();
  let lease = now + Duration::seconds(60);
  let claimed = s.claim_outbox(None, now, lease, 10).await.unwrap();
  assert_eq!(claimed.len(), 2);
  assert_eq!(claimed[0].status, OutboxStatus::Pending);

  let again = s.claim_outbox(None, now, lease, 10).await.unwrap();
  assert!(again.is_empty());

  let after_lease = s.claim_outbox(Some(BRAND), lease, lease, 10).await.unwrap();
  assert_eq!(after_lease.len(), 2);

  let other_brand = s.claim_outbox(Some("other"), lease, lease, 10).await.unwrap();
  assert!(other_brand.is_empty());
}

#[tokio::test]
async fn outbox_completion_and_dead_letters() {
  let s = store().await;
  s.record_unlock(BRAND, completed("tx-8"), purchase_effects()).await.unwrap();

  let now = Utc::now();
  let claimed = s.claim_outbox(None, now, now, 10).await.unwrap();
  s.complete_outbox(claimed[0].entry_id).await.unwrap();
  s.fail_outbox(claimed[1].entry_id, "boom".into(), None).await.unwrap();

  assert_eq!(s.pending_outbox_count().await.unwrap(), 0);
  let dead = s.list_dead_outbox(BRAND, Page::default()).await.unwrap();
  assert_eq!(dead.len(), 1);
  assert_eq!(dead[0].attempts, 1);
  assert_eq!(dead[0].last_error.as_deref(), Some("boom"));
  assert_eq!(dead[0].status, OutboxStatus::Dead);
}

#[tokio::test]
async fn failed_entry_is_retried_later() {
  let s = store().await;
  s.record_unlock(BRAND, completed("tx-9"), purchase_effects()).await.unwrap();

  let now = Utc::now();
  let claimed = s.claim_outbox(None, now, now, 1).await.unwrap();
  let retry = now + Duration::seconds(30);
  s.fail_outbox(claimed[0].entry_id, "busy".into(), Some(retry)).await.unwrap();

  let early = s.claim_outbox(None, now, now, 10).await.unwrap();
  assert!(early.iter().all(|e| e.entry_id != claimed[0].entry_id));

  let due = s.claim_outbox(None, retry, retry, 10).await.unwrap();
  let entry = due.iter().find(|e| e.entry_id == claimed[0].entry_id).unwrap();
  assert_eq!(entry.attempts, 1);
}

// ─── Pipeline runs ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_run_lifecycle() {
  let s = store().await;
  assert!(s.latest_pipeline_run(BRAND).await.unwrap().is_none());

  let run = s.create_pipeline_run(BRAND).await.unwrap();
  assert_eq!(run.status, RunStatus::Queued);

  assert!(s.update_pipeline_run(run.run_id, RunUpdate::Started).await.unwrap());
  let running = s.get_pipeline_run(BRAND, run.run_id).await.unwrap().unwrap();
  assert_eq!(running.status, RunStatus::Running);
  assert!(running.started_at.is_some());

  let summary = serde_json::json!({ "articles": 3 });
  s.update_pipeline_run(run.run_id, RunUpdate::Succeeded(summary.clone()))
    .await
    .unwrap();
  let latest = s.latest_pipeline_run(BRAND).await.unwrap().unwrap();
  assert_eq!(latest.run_id, run.run_id);
  assert_eq!(latest.status, RunStatus::Succeeded);
  assert_eq!(latest.summary, Some(summary));
  assert!(latest.finished_at.is_some());

  assert!(s.get_pipeline_run("other", run.run_id).await.unwrap().is_none());
  assert!(!s.update_pipeline_run(Uuid::new_v4(), RunUpdate::Started).await.unwrap());
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_count_brand_rows() {
  let s = store().await;
  s.touch_session(BRAND, touch("s1", "62.46.1.1")).await.unwrap();
  s.touch_session(BRAND, touch("s1", "62.46.1.1")).await.unwrap();
  s.identify_session(BRAND, "s1", identity("436601234567", MsisdnConfidence::Confirmed))
    .await
    .unwrap();
  s.record_unlock(BRAND, completed("tx-10"), purchase_effects()).await.unwrap();
  s.touch_session("other", touch("s9", "62.46.1.1")).await.unwrap();

  let stats = s.stats(BRAND).await.unwrap();
  assert_eq!(stats.sessions, 1);
  assert_eq!(stats.identified_sessions, 1);
  assert_eq!(stats.page_views, 2);
  assert_eq!(stats.unlocks_completed, 1);
  assert_eq!(stats.outbox_pending, 2);
}
