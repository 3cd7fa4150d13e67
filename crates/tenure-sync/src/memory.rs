//! In-memory store used by the reconciler and workflow tests.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex},
};

use tenure_core::{
  store::{PatchLogEntry, ResourceManager, SubscriptionStore, Transaction},
  view::{
    EntitlementRecord, ItemRecord, Materialized, PhaseRecord, PriceRecord, Resource,
    SubscriptionRecord, SubscriptionView,
  },
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
  #[error("injected failure for {0}")]
  Injected(&'static str),
  #[error("{0} {1} does not exist")]
  Missing(&'static str, Uuid),
  #[error(transparent)]
  Core(#[from] tenure_core::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
  subscriptions: BTreeMap<Uuid, SubscriptionRecord>,
  phases:        BTreeMap<Uuid, PhaseRecord>,
  items:         BTreeMap<Uuid, ItemRecord>,
  entitlements:  BTreeMap<Uuid, EntitlementRecord>,
  prices:        BTreeMap<Uuid, PriceRecord>,
  log:           Vec<PatchLogEntry>,
}

pub trait TableFor<T> {
  fn table(&mut self) -> &mut BTreeMap<Uuid, T>;
}

macro_rules! table_for {
  ($record:ty, $field:ident) => {
    impl TableFor<$record> for Tables {
      fn table(&mut self) -> &mut BTreeMap<Uuid, $record> { &mut self.$field }
    }
  };
}

table_for!(SubscriptionRecord, subscriptions);
table_for!(PhaseRecord, phases);
table_for!(ItemRecord, items);
table_for!(EntitlementRecord, entitlements);
table_for!(PriceRecord, prices);

fn rows<T: Clone>(
  table: &BTreeMap<Uuid, T>,
  keep: impl Fn(&T) -> bool,
) -> Vec<Materialized<T>> {
  table
    .iter()
    .filter(|(_, v)| keep(v))
    .map(|(id, v)| Materialized { id: *id, value: v.clone() })
    .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  tables:  Arc<Mutex<Tables>>,
  fail_on: Arc<Mutex<Option<&'static str>>>,
}

impl MemoryStore {
  /// Make every manager call for `kind` fail.
  pub fn fail_on(&self, kind: &'static str) { *self.fail_on.lock().unwrap() = Some(kind); }
}

pub struct MemoryTransaction {
  tables:  Arc<Mutex<Tables>>,
  staged:  Tables,
  fail_on: Option<&'static str>,
}

impl MemoryTransaction {
  fn check<T: Resource>(&self) -> Result<(), MemoryError> {
    match self.fail_on {
      Some(kind) if kind == T::KIND => Err(MemoryError::Injected(T::KIND)),
      _ => Ok(()),
    }
  }
}

impl<T> ResourceManager<T> for MemoryTransaction
where
  T: Resource + Clone + Send + Sync,
  Tables: TableFor<T>,
{
  type Error = MemoryError;

  async fn create(&mut self, target: &T) -> Result<Materialized<T>, MemoryError> {
    self.check::<T>()?;
    let id = Uuid::new_v4();
    TableFor::<T>::table(&mut self.staged).insert(id, target.clone());
    Ok(Materialized { id, value: target.clone() })
  }

  async fn update(
    &mut self,
    current: &Materialized<T>,
    target: &T,
  ) -> Result<Materialized<T>, MemoryError> {
    self.check::<T>()?;
    let row = TableFor::<T>::table(&mut self.staged)
      .get_mut(&current.id)
      .ok_or(MemoryError::Missing(T::KIND, current.id))?;
    *row = target.clone();
    Ok(Materialized { id: current.id, value: target.clone() })
  }

  async fn delete(&mut self, current: &Materialized<T>) -> Result<(), MemoryError> {
    self.check::<T>()?;
    TableFor::<T>::table(&mut self.staged)
      .remove(&current.id)
      .map(|_| ())
      .ok_or(MemoryError::Missing(T::KIND, current.id))
  }
}

impl Transaction for MemoryTransaction {
  type StoreError = MemoryError;

  async fn append_patch_log(&mut self, entries: Vec<PatchLogEntry>) -> Result<(), MemoryError> {
    self.staged.log.extend(entries);
    Ok(())
  }

  async fn commit(self) -> Result<(), MemoryError> {
    *self.tables.lock().unwrap() = self.staged;
    Ok(())
  }
}

impl SubscriptionStore for MemoryStore {
  type Error = MemoryError;
  type Transaction = MemoryTransaction;

  async fn get_view(&self, id: Uuid) -> Result<Option<SubscriptionView>, MemoryError> {
    let tables = self.tables.lock().unwrap().clone();
    let Some(subscription) = tables.subscriptions.get(&id) else { return Ok(None) };
    let view = SubscriptionView::assemble(
      Materialized { id, value: subscription.clone() },
      rows(&tables.phases, |r| r.subscription_id == id),
      rows(&tables.items, |r| r.subscription_id == id),
      rows(&tables.entitlements, |r| r.subscription_id == id),
      rows(&tables.prices, |r| r.subscription_id == id),
    )?;
    Ok(Some(view))
  }

  async fn list_subscriptions(
    &self,
    customer_id: Option<Uuid>,
  ) -> Result<Vec<Materialized<SubscriptionRecord>>, MemoryError> {
    let tables = self.tables.lock().unwrap();
    Ok(rows(&tables.subscriptions, |r| customer_id.is_none_or(|c| r.customer_id == c)))
  }

  async fn patch_log(&self, id: Uuid) -> Result<Vec<PatchLogEntry>, MemoryError> {
    let tables = self.tables.lock().unwrap();
    Ok(tables.log.iter().filter(|e| e.subscription_id == id).cloned().collect())
  }

  async fn begin(&self) -> Result<MemoryTransaction, MemoryError> {
    Ok(MemoryTransaction {
      tables:  self.tables.clone(),
      staged:  self.tables.lock().unwrap().clone(),
      fail_on: *self.fail_on.lock().unwrap(),
    })
  }
}

pub mod fixtures {
  use std::collections::BTreeMap;

  use chrono::{DateTime, TimeZone, Utc};
  use rust_decimal::Decimal;
  use tenure_core::{
    period::Period,
    plan::{Price, RateCard},
    spec::{ItemSpec, PhaseSpec, Specification},
  };
  use uuid::Uuid;

  pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
  }

  pub fn rate_card(key: &str) -> RateCard {
    RateCard {
      key:                  key.into(),
      name:                 key.into(),
      description:          None,
      feature_key:          Some(key.into()),
      entitlement_template: None,
      price:                Some(Price::Unit { amount: Decimal::new(250, 2) }),
      billing_cadence:      Some(Period::months(1)),
    }
  }

  /// `trial` from 2024-01-01, `default` from 2024-02-01, each with `seats`.
  pub fn spec() -> Specification {
    let mut phases = BTreeMap::new();
    for (key, months) in [("trial", 0), ("default", 1)] {
      let mut phase = PhaseSpec::new(key, key, Period::months(months));
      phase
        .items
        .insert("seats".into(), vec![ItemSpec::new(key, rate_card("seats"))]);
      phases.insert(key.to_string(), phase);
    }
    Specification {
      plan: None,
      customer_id: Uuid::new_v4(),
      name: "custom".into(),
      currency: "USD".into(),
      billing_anchor: at(2024, 1, 1),
      billing_cadence: Period::months(1),
      active_from: at(2024, 1, 1),
      active_to: None,
      phases,
    }
  }
}
