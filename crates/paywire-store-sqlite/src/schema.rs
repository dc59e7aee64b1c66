//! SQL schema for the paywire SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Every tenant-owned table is keyed by `brand` first. Timestamps are
/// fixed-width RFC 3339 UTC strings so they compare correctly as text.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    brand             TEXT NOT NULL,
    session_id        TEXT NOT NULL,
    ip                TEXT,
    user_agent        TEXT,
    device_json       TEXT NOT NULL DEFAULT '{}',
    utm_source        TEXT,
    utm_medium        TEXT,
    utm_campaign      TEXT,
    landing_page      TEXT,
    referrer          TEXT,
    msisdn            TEXT,
    msisdn_confidence TEXT NOT NULL DEFAULT 'NONE',  -- 'CONFIRMED' | 'UNCONFIRMED' | 'NONE'
    network_type      TEXT NOT NULL DEFAULT 'unknown',
    carrier           TEXT,
    country           TEXT,
    created_at        TEXT NOT NULL,
    last_seen_at      TEXT NOT NULL,
    page_views        INTEGER NOT NULL DEFAULT 0,
    events            INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (brand, session_id)
);

CREATE TABLE IF NOT EXISTS tracking_events (
    event_id    TEXT PRIMARY KEY,
    brand       TEXT NOT NULL,
    session_id  TEXT NOT NULL,
    kind        TEXT NOT NULL,
    article_id  TEXT,
    path        TEXT,
    msisdn      TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    brand             TEXT NOT NULL,
    msisdn            TEXT NOT NULL,
    first_seen_at     TEXT NOT NULL,
    last_seen_at      TEXT NOT NULL,
    visit_count       INTEGER NOT NULL DEFAULT 0,
    purchase_count    INTEGER NOT NULL DEFAULT 0,
    total_spent_cents INTEGER NOT NULL DEFAULT 0,
    currency          TEXT,
    conversion_status TEXT NOT NULL DEFAULT 'identified',  -- 'identified' | 'customer'
    landing_page      TEXT,
    utm_source        TEXT,
    utm_campaign      TEXT,
    carrier           TEXT,
    country           TEXT,
    last_ip           TEXT,
    PRIMARY KEY (brand, msisdn)
);

CREATE TABLE IF NOT EXISTS articles (
    brand        TEXT NOT NULL,
    article_id   TEXT NOT NULL,
    title        TEXT NOT NULL,
    teaser       TEXT NOT NULL,
    body         TEXT NOT NULL,
    price_cents  INTEGER NOT NULL,
    currency     TEXT NOT NULL,
    unlock_count INTEGER NOT NULL DEFAULT 0,
    view_count   INTEGER NOT NULL DEFAULT 0,
    published_at TEXT NOT NULL,
    PRIMARY KEY (brand, article_id)
);

-- One row per provider transaction. The unique index makes the
-- duplicate-callback check race-free.
CREATE TABLE IF NOT EXISTS unlocks (
    unlock_id      TEXT PRIMARY KEY,
    brand          TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    msisdn         TEXT,
    article_id     TEXT,
    session_id     TEXT,
    amount_cents   INTEGER NOT NULL,
    currency       TEXT NOT NULL,
    status         TEXT NOT NULL,   -- 'pending' | 'completed' | 'failed' | 'refunding' | 'refunded'
    sandbox        INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    refunded_at    TEXT,
    refund_mode    TEXT,            -- 'gateway' | 'manual'
    UNIQUE (brand, transaction_id)
);

CREATE TABLE IF NOT EXISTS billing_events (
    event_id       TEXT PRIMARY KEY,
    brand          TEXT NOT NULL,
    kind           TEXT NOT NULL,   -- 'charge' | 'refund'
    transaction_id TEXT NOT NULL,
    msisdn         TEXT,
    article_id     TEXT,
    amount_cents   INTEGER NOT NULL,
    currency       TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    entry_id        TEXT PRIMARY KEY,
    brand           TEXT NOT NULL,
    effect_json     TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',  -- 'pending' | 'done' | 'dead'
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    created_at      TEXT NOT NULL,
    next_attempt_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id       TEXT PRIMARY KEY,
    brand        TEXT NOT NULL,
    status       TEXT NOT NULL,     -- 'queued' | 'running' | 'succeeded' | 'failed'
    requested_at TEXT NOT NULL,
    started_at   TEXT,
    finished_at  TEXT,
    summary_json TEXT,
    error        TEXT
);

CREATE INDEX IF NOT EXISTS sessions_ip_idx       ON sessions(brand, ip);
CREATE INDEX IF NOT EXISTS events_session_idx    ON tracking_events(brand, session_id);
CREATE INDEX IF NOT EXISTS unlocks_article_idx   ON unlocks(brand, article_id, status);
CREATE INDEX IF NOT EXISTS billing_created_idx   ON billing_events(brand, created_at);
CREATE INDEX IF NOT EXISTS outbox_due_idx        ON outbox(status, next_attempt_at);
CREATE INDEX IF NOT EXISTS pipeline_brand_idx    ON pipeline_runs(brand, requested_at);

PRAGMA user_version = 1;
";
