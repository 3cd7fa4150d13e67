//! State-diff reconciliation: materialized view → target specification.
//!
//! Every resource kind goes through [`reconcile_one`], the only caller of the
//! [`ResourceManager`] methods. A resource whose stored value already equals
//! its target is left alone, which makes a second run against an unchanged
//! target a no-op.

use std::collections::BTreeSet;

use tenure_core::{
  Error, Result,
  spec::Specification,
  store::{ResourceManager, Transaction},
  view::{ItemView, Materialized, PhaseView, Resource, SubscriptionRecord, SubscriptionView},
};
use tracing::debug;
use uuid::Uuid;

use crate::target::{self, TargetItem, TargetPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
  Create,
  Update,
  Delete,
}

/// One manager call issued by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
  pub resource: &'static str,
  pub op:       Operation,
  pub id:       Uuid,
}

/// What a reconciliation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
  /// Id of the subscription record; `None` after a delete.
  pub subscription_id: Option<Uuid>,
  pub applied:         Vec<Applied>,
}

impl SyncReport {
  pub fn is_noop(&self) -> bool { self.applied.is_empty() }

  pub fn count(&self, op: Operation) -> usize {
    self.applied.iter().filter(|a| a.op == op).count()
  }

  fn record(&mut self, resource: &'static str, op: Operation, id: Uuid) {
    debug!(resource, %op, %id, "reconciled resource");
    self.applied.push(Applied { resource, op, id });
  }
}

fn manager_error<T: Resource>(e: impl std::error::Error + Send + Sync + 'static) -> Error {
  Error::Resource { resource: T::KIND, source: Box::new(e) }
}

/// Bring one resource from `current` to `target`.
///
/// | current | target | call |
/// |---------|--------|------|
/// | none    | none   | –    |
/// | none    | some   | `create` |
/// | some    | equal  | –    |
/// | some    | differs| `update` |
/// | some    | none   | `delete` |
pub async fn reconcile_one<T, M>(
  manager: &mut M,
  current: Option<&Materialized<T>>,
  target: Option<&T>,
  report: &mut SyncReport,
) -> Result<Option<Materialized<T>>>
where
  T: Resource + PartialEq + Clone + Sync,
  M: ResourceManager<T>,
{
  match (current, target) {
    (None, None) => Ok(None),
    (None, Some(target)) => {
      let created = manager.create(target).await.map_err(manager_error::<T>)?;
      report.record(T::KIND, Operation::Create, created.id);
      Ok(Some(created))
    }
    (Some(current), Some(target)) if current.value == *target => Ok(Some(current.clone())),
    (Some(current), Some(target)) => {
      let updated = manager
        .update(current, target)
        .await
        .map_err(manager_error::<T>)?;
      report.record(T::KIND, Operation::Update, updated.id);
      Ok(Some(updated))
    }
    (Some(current), None) => {
      manager.delete(current).await.map_err(manager_error::<T>)?;
      report.record(T::KIND, Operation::Delete, current.id);
      Ok(None)
    }
  }
}

/// Reconcile a whole subscription inside `tx`.
///
/// `view == None` means nothing is materialized yet; `target == None` means
/// everything materialized must go. Parents are created before and deleted
/// after their children.
pub async fn reconcile<Tx: Transaction>(
  tx: &mut Tx,
  view: Option<&SubscriptionView>,
  target: Option<&Specification>,
) -> Result<SyncReport> {
  let mut report = SyncReport::default();

  let Some(spec) = target else {
    if let Some(view) = view {
      for phase in &view.phases {
        reconcile_phase(tx, Some(phase), None, &mut report).await?;
      }
      reconcile_one(tx, Some(&view.subscription), None, &mut report).await?;
    }
    return Ok(report);
  };

  let record = SubscriptionRecord::from_spec(spec);
  let subscription = reconcile_one(tx, view.map(|v| &v.subscription), Some(&record), &mut report)
    .await?
    .ok_or_else(|| Error::conflict("subscription record was not materialized"))?;
  report.subscription_id = Some(subscription.id);

  let targets = target::phases(spec, subscription.id)?;
  let current_phases = view.map(|v| v.phases.as_slice()).unwrap_or_default();

  for current in current_phases {
    let target = targets.iter().find(|t| t.phase.key == current.phase.value.key);
    reconcile_phase(tx, Some(current), target, &mut report).await?;
  }
  for target in &targets {
    if !current_phases.iter().any(|c| c.phase.value.key == target.phase.key) {
      reconcile_phase(tx, None, Some(target), &mut report).await?;
    }
  }
  Ok(report)
}

async fn reconcile_phase<Tx: Transaction>(
  tx: &mut Tx,
  current: Option<&PhaseView>,
  target: Option<&TargetPhase>,
  report: &mut SyncReport,
) -> Result<()> {
  if let Some(target) = target {
    reconcile_one(tx, current.map(|c| &c.phase), Some(&target.phase), report).await?;
  }

  let mut slots = BTreeSet::new();
  for (key, versions) in current.iter().flat_map(|c| &c.items) {
    slots.extend(versions.iter().map(|v| (key.clone(), v.item.value.version)));
  }
  for (key, versions) in target.iter().flat_map(|t| &t.items) {
    slots.extend((0..versions.len()).map(|version| (key.clone(), version)));
  }

  for (key, version) in slots {
    let current_item = current
      .and_then(|c| c.items.get(&key))
      .and_then(|versions| versions.iter().find(|v| v.item.value.version == version));
    let target_item = target.and_then(|t| t.item(&key, version));
    reconcile_item(tx, current_item, target_item, report).await?;
  }

  if target.is_none() {
    reconcile_one(tx, current.map(|c| &c.phase), None, report).await?;
  }
  Ok(())
}

async fn reconcile_item<Tx: Transaction>(
  tx: &mut Tx,
  current: Option<&ItemView>,
  target: Option<&TargetItem>,
  report: &mut SyncReport,
) -> Result<()> {
  let item = current.map(|c| &c.item);
  let entitlement = current.and_then(|c| c.entitlement.as_ref());
  let price = current.and_then(|c| c.price.as_ref());

  if let Some(target) = target {
    reconcile_one(tx, item, Some(&target.item), report).await?;
    reconcile_one(tx, entitlement, target.entitlement.as_ref(), report).await?;
    reconcile_one(tx, price, target.price.as_ref(), report).await?;
  } else {
    reconcile_one(tx, price, None, report).await?;
    reconcile_one(tx, entitlement, None, report).await?;
    reconcile_one(tx, item, None, report).await?;
  }
  Ok(())
}
