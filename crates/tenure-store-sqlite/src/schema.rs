//! SQL schema for the Tenure SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Every resource table carries its record as JSON next to the columns the
/// store filters on.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subscriptions (
    id          TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    record_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS phases (
    id              TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
    record_json     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    id              TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
    record_json     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entitlements (
    id              TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
    record_json     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prices (
    id              TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
    record_json     TEXT NOT NULL
);

-- Append-only. Outlives the subscription it describes.
CREATE TABLE IF NOT EXISTS patch_log (
    entry_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    subscription_id TEXT NOT NULL,
    batch_id        TEXT NOT NULL,
    batch_index     INTEGER NOT NULL,
    op              TEXT NOT NULL,
    path            TEXT NOT NULL,
    value_json      TEXT NOT NULL,
    applied_at      TEXT NOT NULL,   -- RFC 3339 UTC
    UNIQUE (batch_id, batch_index)
);

CREATE INDEX IF NOT EXISTS subscriptions_customer_idx ON subscriptions(customer_id);
CREATE INDEX IF NOT EXISTS phases_subscription_idx    ON phases(subscription_id);
CREATE INDEX IF NOT EXISTS items_subscription_idx     ON items(subscription_id);
CREATE INDEX IF NOT EXISTS entitlements_sub_idx       ON entitlements(subscription_id);
CREATE INDEX IF NOT EXISTS prices_subscription_idx    ON prices(subscription_id);
CREATE INDEX IF NOT EXISTS patch_log_sub_idx          ON patch_log(subscription_id);

PRAGMA user_version = 1;
";
