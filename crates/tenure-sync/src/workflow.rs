//! Top-level subscription operations.
//!
//! Each operation runs as one critical section per customer: read the view,
//! check the state machine, compute the target specification in memory,
//! reconcile inside one transaction, commit. Any failure drops the
//! transaction and the working specification.

use chrono::{DateTime, Utc};
use tenure_core::{
  spec::Specification,
  state::{SubscriptionAction, SubscriptionStatus, transition},
  store::{PatchLogEntry, SubscriptionStore, Transaction},
  view::SubscriptionView,
};
use tenure_patch::{ApplyContext, Patch, apply, ensure_history_preserved};
use tracing::info;
use uuid::Uuid;

use crate::{
  Error, Result,
  lock::KeyedLock,
  reconcile::{Operation, SyncReport, reconcile},
};

pub struct SubscriptionService<S> {
  store: S,
  locks: KeyedLock<Uuid>,
}

impl<S: SubscriptionStore> SubscriptionService<S> {
  pub fn new(store: S) -> Self { Self { store, locks: KeyedLock::new() } }

  pub fn store(&self) -> &S { &self.store }

  /// The materialized view of `id`.
  pub async fn view(&self, id: Uuid) -> Result<SubscriptionView> {
    self
      .store
      .get_view(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(id))
  }

  /// Materialize a new subscription.
  pub async fn create(&self, spec: Specification) -> Result<SubscriptionView> {
    transition(SubscriptionStatus::Inactive, SubscriptionAction::Create)?;
    spec.validate()?;

    let _guard = self.locks.lock(&spec.customer_id).await;
    let report = self.sync(None, Some(&spec), Vec::new()).await?;
    let id = report.subscription_id.ok_or(tenure_core::Error::conflict(
      "subscription was not materialized",
    ))?;
    log_report("created", id, &report);
    self.view(id).await
  }

  /// Apply a patch batch to the subscription.
  pub async fn edit(
    &self,
    id: Uuid,
    patches: &[Patch],
    now: DateTime<Utc>,
  ) -> Result<SubscriptionView> {
    let (view, _guard) = self.locked_view(id).await?;
    transition(view.status_at(now), SubscriptionAction::Update)?;

    let ctx = ApplyContext { current_time: now };
    let target = apply(view.as_spec(), patches, &ctx)?;

    let batch_id = Uuid::new_v4();
    let log = patches
      .iter()
      .enumerate()
      .map(|(batch_index, patch)| -> tenure_core::Result<PatchLogEntry> {
        let doc = patch.to_document()?;
        Ok(PatchLogEntry {
          subscription_id: id,
          batch_id,
          batch_index,
          op: doc.op.to_string(),
          path: doc.path,
          value: doc.value,
          applied_at: now,
        })
      })
      .collect::<tenure_core::Result<Vec<_>>>()?;

    let report = self.sync(Some(&view), Some(&target), log).await?;
    log_report("edited", id, &report);
    self.view(id).await
  }

  /// End the subscription at `at`, which must not lie in the past.
  ///
  /// Phases scheduled after `at` are kept, so [`Self::resume`] restores
  /// them.
  pub async fn cancel(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<SubscriptionView> {
    let (view, _guard) = self.locked_view(id).await?;
    transition(view.status_at(now), SubscriptionAction::Cancel)?;
    if at < now {
      return Err(
        tenure_core::Error::forbidden(format!("cannot cancel at {at}, which is in the past"))
          .into(),
      );
    }

    let before = view.as_spec();
    let mut target = before.clone();
    target.active_to = Some(at);
    target.validate()?;
    ensure_history_preserved(&before, &target, now)?;

    let report = self.sync(Some(&view), Some(&target), Vec::new()).await?;
    log_report("canceled", id, &report);
    self.view(id).await
  }

  /// Undo a scheduled cancellation.
  pub async fn resume(&self, id: Uuid, now: DateTime<Utc>) -> Result<SubscriptionView> {
    let (view, _guard) = self.locked_view(id).await?;
    transition(view.status_at(now), SubscriptionAction::Continue)?;

    let mut target = view.as_spec();
    target.active_to = None;
    target.validate()?;

    let report = self.sync(Some(&view), Some(&target), Vec::new()).await?;
    log_report("continued", id, &report);
    self.view(id).await
  }

  /// Remove a subscription that has not started, with everything it owns.
  pub async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let (view, _guard) = self.locked_view(id).await?;
    transition(view.status_at(now), SubscriptionAction::Delete)?;

    let report = self.sync(Some(&view), None, Vec::new()).await?;
    log_report("deleted", id, &report);
    Ok(())
  }

  /// Read a view, then re-read it under its customer's lock.
  async fn locked_view(
    &self,
    id: Uuid,
  ) -> Result<(SubscriptionView, tokio::sync::OwnedMutexGuard<()>)> {
    let customer_id = self.view(id).await?.subscription.value.customer_id;
    let guard = self.locks.lock(&customer_id).await;
    Ok((self.view(id).await?, guard))
  }

  async fn sync(
    &self,
    view: Option<&SubscriptionView>,
    target: Option<&Specification>,
    log: Vec<PatchLogEntry>,
  ) -> Result<SyncReport> {
    let mut tx = self.store.begin().await.map_err(Error::store)?;
    let report = reconcile(&mut tx, view, target).await?;
    if !log.is_empty() {
      tx.append_patch_log(log).await.map_err(Error::store)?;
    }
    tx.commit().await.map_err(Error::store)?;
    Ok(report)
  }
}

fn log_report(action: &str, id: Uuid, report: &SyncReport) {
  info!(
    subscription_id = %id,
    created = report.count(Operation::Create),
    updated = report.count(Operation::Update),
    deleted = report.count(Operation::Delete),
    "subscription {action}"
  );
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tenure_core::ErrorKind;

  use super::*;
  use crate::memory::{MemoryStore, fixtures};

  async fn created() -> (SubscriptionService<MemoryStore>, Uuid) {
    let service = SubscriptionService::new(MemoryStore::default());
    let view = service.create(fixtures::spec()).await.unwrap();
    (service, view.id())
  }

  fn remove_seats(phase: &str) -> Patch {
    Patch::from_parts("remove", &format!("/phases/{phase}/items/seats"), json!(null)).unwrap()
  }

  #[tokio::test]
  async fn edit_applies_patches_and_logs_them() {
    let (service, id) = created().await;
    let now = fixtures::at(2024, 1, 11);

    let patches = [
      remove_seats("trial"),
      Patch::from_parts(
        "add",
        "/phases/bridge",
        json!({ "name": "Bridge", "start_after": "P1M", "duration": "P2W" }),
      )
      .unwrap(),
    ];
    let view = service.edit(id, &patches, now).await.unwrap();

    let trial = view.phase("trial").unwrap();
    let seats = &trial.items["seats"][0];
    assert_eq!(seats.item.value.active_to, Some(now));
    assert_eq!(seats.price.as_ref().unwrap().value.active_to, Some(now));
    let default = view.phase("default").unwrap();
    assert_eq!(default.phase.value.active_from, fixtures::at(2024, 2, 15));

    let log = service.store().patch_log(id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].batch_id, log[1].batch_id);
    assert_eq!(log[1].batch_index, 1);
    let replayed: Vec<Patch> = log
      .iter()
      .map(|e| Patch::from_parts(&e.op, &e.path, e.value.clone()).unwrap())
      .collect();
    assert_eq!(replayed, patches);
  }

  #[tokio::test]
  async fn failed_batch_leaves_store_untouched() {
    let (service, id) = created().await;
    let before = service.view(id).await.unwrap();

    let patches = [remove_seats("default"), remove_seats("nope")];
    let err = service.edit(id, &patches, fixtures::at(2024, 1, 11)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(service.view(id).await.unwrap(), before);
    assert!(service.store().patch_log(id).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn cancel_then_continue() {
    let (service, id) = created().await;
    let now = fixtures::at(2024, 1, 11);

    let view = service.cancel(id, fixtures::at(2024, 1, 20), now).await.unwrap();
    assert_eq!(view.status_at(now), SubscriptionStatus::Canceled);
    // The later phase survives with nothing billable in it.
    let default = view.phase("default").unwrap();
    assert!(default.items["seats"][0].price.is_none());

    let err = service.edit(id, &[remove_seats("trial")], now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let view = service.resume(id, now).await.unwrap();
    assert_eq!(view.status_at(now), SubscriptionStatus::Active);
    assert!(view.phase("default").unwrap().items["seats"][0].price.is_some());
  }

  #[tokio::test]
  async fn cancel_in_the_past_is_forbidden() {
    let (service, id) = created().await;
    let err = service
      .cancel(id, fixtures::at(2024, 1, 5), fixtures::at(2024, 1, 11))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[tokio::test]
  async fn delete_only_before_start() {
    let (service, id) = created().await;

    let err = service.delete(id, fixtures::at(2024, 1, 11)).await.unwrap_err();
    assert!(matches!(err, Error::Core(tenure_core::Error::ForbiddenAction { .. })));

    service.delete(id, fixtures::at(2023, 12, 1)).await.unwrap();
    assert!(matches!(service.view(id).await.unwrap_err(), Error::NotFound(_)));
  }
}
