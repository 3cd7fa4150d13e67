//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings.
//! Records are stored whole as compact JSON.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tenure_core::{
  store::PatchLogEntry,
  view::{
    EntitlementRecord, ItemRecord, Materialized, PhaseRecord, PriceRecord, Resource,
    SubscriptionRecord, SubscriptionView,
  },
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Where a record type lives.
///
/// Each table has `id`, one owner column and `record_json`.
pub trait Row: Resource + Serialize + DeserializeOwned {
  const TABLE: &'static str;
  const OWNER_COLUMN: &'static str;

  fn owner(&self) -> Uuid;
}

impl Row for SubscriptionRecord {
  const TABLE: &'static str = "subscriptions";
  const OWNER_COLUMN: &'static str = "customer_id";

  fn owner(&self) -> Uuid { self.customer_id }
}

macro_rules! subscription_child {
  ($record:ty, $table:literal) => {
    impl Row for $record {
      const TABLE: &'static str = $table;
      const OWNER_COLUMN: &'static str = "subscription_id";

      fn owner(&self) -> Uuid { self.subscription_id }
    }
  };
}

subscription_child!(PhaseRecord, "phases");
subscription_child!(ItemRecord, "items");
subscription_child!(EntitlementRecord, "entitlements");
subscription_child!(PriceRecord, "prices");

/// Raw strings read from any resource table.
pub struct RawRow {
  pub id:          String,
  pub record_json: String,
}

impl RawRow {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { id: row.get(0)?, record_json: row.get(1)? })
  }

  pub fn into_materialized<T: DeserializeOwned>(self) -> Result<Materialized<T>> {
    Ok(Materialized {
      id:    decode_uuid(&self.id)?,
      value: serde_json::from_str(&self.record_json)?,
    })
  }
}

fn materialize_all<T: DeserializeOwned>(rows: Vec<RawRow>) -> Result<Vec<Materialized<T>>> {
  rows.into_iter().map(RawRow::into_materialized).collect()
}

/// Every row of one subscription, as read in a single `call`.
pub struct RawView {
  pub subscription: RawRow,
  pub phases:       Vec<RawRow>,
  pub items:        Vec<RawRow>,
  pub entitlements: Vec<RawRow>,
  pub prices:       Vec<RawRow>,
}

impl RawView {
  pub fn into_view(self) -> Result<SubscriptionView> {
    Ok(SubscriptionView::assemble(
      self.subscription.into_materialized()?,
      materialize_all(self.phases)?,
      materialize_all(self.items)?,
      materialize_all(self.entitlements)?,
      materialize_all(self.prices)?,
    )?)
  }
}

// ─── Patch log ───────────────────────────────────────────────────────────────

/// Column values of one `patch_log` row.
pub struct RawLogEntry {
  pub subscription_id: String,
  pub batch_id:        String,
  pub batch_index:     i64,
  pub op:              String,
  pub path:            String,
  pub value_json:      String,
  pub applied_at:      String,
}

impl RawLogEntry {
  pub fn encode(entry: &PatchLogEntry) -> Result<Self> {
    Ok(Self {
      subscription_id: encode_uuid(entry.subscription_id),
      batch_id:        encode_uuid(entry.batch_id),
      batch_index:     entry.batch_index as i64,
      op:              entry.op.clone(),
      path:            entry.path.clone(),
      value_json:      serde_json::to_string(&entry.value)?,
      applied_at:      encode_dt(entry.applied_at),
    })
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subscription_id: row.get(0)?,
      batch_id:        row.get(1)?,
      batch_index:     row.get(2)?,
      op:              row.get(3)?,
      path:            row.get(4)?,
      value_json:      row.get(5)?,
      applied_at:      row.get(6)?,
    })
  }

  pub fn into_entry(self) -> Result<PatchLogEntry> {
    Ok(PatchLogEntry {
      subscription_id: decode_uuid(&self.subscription_id)?,
      batch_id:        decode_uuid(&self.batch_id)?,
      batch_index:     self.batch_index as usize,
      op:              self.op,
      path:            self.path,
      value:           serde_json::from_str(&self.value_json)?,
      applied_at:      decode_dt(&self.applied_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_survive_encoding() {
    let dt = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
    assert_eq!(decode_dt(&encode_dt(dt)).unwrap(), dt);
  }

  #[test]
  fn bad_timestamp_is_a_parse_error() {
    assert!(matches!(decode_dt("yesterday"), Err(Error::DateParse(_))));
  }
}
