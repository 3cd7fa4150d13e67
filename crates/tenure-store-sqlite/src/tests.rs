//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tenure_core::{
  period::Period,
  plan::{Price, RateCard},
  spec::{ItemSpec, PhaseSpec, Specification},
  store::{ResourceManager, SubscriptionStore, Transaction},
  view::{Materialized, SubscriptionRecord},
};
use tenure_patch::Patch;
use tenure_sync::{SubscriptionService, reconcile};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn seats() -> RateCard {
  RateCard {
    key:                  "seats".into(),
    name:                 "Seats".into(),
    description:          None,
    feature_key:          Some("seats".into()),
    entitlement_template: None,
    price:                Some(Price::Unit { amount: Decimal::new(1999, 2) }),
    billing_cadence:      Some(Period::months(1)),
  }
}

/// `trial` from 2024-01-01, `default` a month later, each with `seats`.
fn spec(customer_id: Uuid) -> Specification {
  let mut phases = BTreeMap::new();
  for (key, months) in [("trial", 0), ("default", 1)] {
    let mut phase = PhaseSpec::new(key, key, Period::months(months));
    phase.items.insert("seats".into(), vec![ItemSpec::new(key, seats())]);
    phases.insert(key.to_string(), phase);
  }
  Specification {
    plan: None,
    customer_id,
    name: "team".into(),
    currency: "EUR".into(),
    billing_anchor: at(2024, 1, 1),
    billing_cadence: Period::months(1),
    active_from: at(2024, 1, 1),
    active_to: None,
    phases,
  }
}

// ─── Views ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_subscription_has_no_view() {
  let s = store().await;
  assert!(s.get_view(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn created_view_reads_back_unchanged() {
  let s = store().await;
  let service = SubscriptionService::new(s.clone());
  let created = service.create(spec(Uuid::new_v4())).await.unwrap();

  let view = s.get_view(created.id()).await.unwrap().unwrap();
  assert_eq!(view, created);
  assert_eq!(view.phases.len(), 2);
  assert_eq!(view.phases[0].phase.value.key, "trial");
  let seats = &view.phase("default").unwrap().items["seats"][0];
  assert_eq!(seats.price.as_ref().unwrap().value.active_from, at(2024, 2, 1));

  // Decoded records compare equal to a freshly derived target.
  let mut tx = s.begin().await.unwrap();
  let report = reconcile(&mut tx, Some(&view), Some(&view.as_spec())).await.unwrap();
  assert!(report.is_noop(), "{report:?}");
}

#[tokio::test]
async fn list_filters_by_customer() {
  let s = store().await;
  let service = SubscriptionService::new(s.clone());
  let alice = Uuid::new_v4();
  service.create(spec(alice)).await.unwrap();
  service.create(spec(alice)).await.unwrap();
  service.create(spec(Uuid::new_v4())).await.unwrap();

  assert_eq!(s.list_subscriptions(None).await.unwrap().len(), 3);
  let mine = s.list_subscriptions(Some(alice)).await.unwrap();
  assert_eq!(mine.len(), 2);
  assert!(mine.iter().all(|r| r.value.customer_id == alice));
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn dropped_transaction_writes_nothing() {
  let s = store().await;
  let mut tx = s.begin().await.unwrap();
  reconcile(&mut tx, None, Some(&spec(Uuid::new_v4()))).await.unwrap();
  drop(tx);

  assert!(s.list_subscriptions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_commit_is_atomic() {
  let s = store().await;
  let record = SubscriptionRecord::from_spec(&spec(Uuid::new_v4()));

  let mut tx = s.begin().await.unwrap();
  ResourceManager::<SubscriptionRecord>::create(&mut tx, &record).await.unwrap();
  let ghost = Materialized { id: Uuid::new_v4(), value: record.clone() };
  ResourceManager::<SubscriptionRecord>::delete(&mut tx, &ghost).await.unwrap();

  let err = tx.commit().await.unwrap_err();
  assert!(
    matches!(err, Error::RowNotFound { table: "subscriptions", id } if id == ghost.id),
    "{err:?}"
  );
  assert!(s.list_subscriptions(None).await.unwrap().is_empty());
}

// ─── Workflow ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn edit_persists_records_and_patch_log() {
  let s = store().await;
  let service = SubscriptionService::new(s.clone());
  let id = service.create(spec(Uuid::new_v4())).await.unwrap().id();
  let now = at(2024, 1, 11);

  let patches = [
    Patch::from_parts("remove", "/phases/trial/items/seats", json!(null)).unwrap(),
    Patch::from_parts("stretch", "/phases/trial", json!({ "duration": "P1W" })).unwrap(),
  ];
  service.edit(id, &patches, now).await.unwrap();

  let view = s.get_view(id).await.unwrap().unwrap();
  let trial_seats = &view.phase("trial").unwrap().items["seats"][0];
  assert_eq!(trial_seats.item.value.active_to, Some(now));
  assert_eq!(view.phase("default").unwrap().phase.value.active_from, at(2024, 2, 8));

  let log = s.patch_log(id).await.unwrap();
  assert_eq!(log.len(), 2);
  assert_eq!(log[0].op, "remove");
  assert_eq!(log[1].op, "stretch");
  assert_eq!(log[1].batch_index, 1);
  assert_eq!(log[0].applied_at, now);
  let replayed: Vec<Patch> = log
    .iter()
    .map(|e| Patch::from_parts(&e.op, &e.path, e.value.clone()).unwrap())
    .collect();
  assert_eq!(replayed, patches);
}

#[tokio::test]
async fn delete_removes_every_row() {
  let s = store().await;
  let service = SubscriptionService::new(s.clone());
  let mut scheduled = spec(Uuid::new_v4());
  scheduled.active_from = at(2025, 1, 1);
  scheduled.billing_anchor = at(2025, 1, 1);
  let id = service.create(scheduled).await.unwrap().id();

  service.delete(id, at(2024, 6, 1)).await.unwrap();
  assert!(s.get_view(id).await.unwrap().is_none());
  assert!(s.list_subscriptions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn reopening_a_file_store_keeps_data() {
  let dir = std::env::temp_dir().join(format!("tenure-{}", Uuid::new_v4()));
  std::fs::create_dir_all(&dir).unwrap();
  let path = dir.join("tenure.db");

  let id = {
    let s = SqliteStore::open(&path).await.unwrap();
    SubscriptionService::new(s).create(spec(Uuid::new_v4())).await.unwrap().id()
  };

  let reopened = SqliteStore::open(&path).await.unwrap();
  assert!(reopened.get_view(id).await.unwrap().is_some());
  std::fs::remove_dir_all(&dir).ok();
}
