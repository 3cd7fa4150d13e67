//! Storage and resource-manager contracts.
//!
//! Implemented by storage backends (e.g. `tenure-store-sqlite`). The
//! reconciler and workflow layer depend on these traits only.
//!
//! All writes of one edit happen inside a [`Transaction`]. Dropping a
//! transaction without calling [`Transaction::commit`] discards every write
//! made through it.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::view::{
  EntitlementRecord, ItemRecord, Materialized, PhaseRecord, PriceRecord,
  SubscriptionRecord, SubscriptionView,
};

// ─── Patch log ───────────────────────────────────────────────────────────────

/// One applied patch, as recorded for audit and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchLogEntry {
  pub subscription_id: Uuid,
  /// Shared by every patch applied in the same edit.
  pub batch_id:        Uuid,
  /// Position of the patch within its batch.
  pub batch_index:     usize,
  pub op:              String,
  pub path:            String,
  pub value:           serde_json::Value,
  pub applied_at:      DateTime<Utc>,
}

// ─── Resource managers ───────────────────────────────────────────────────────

/// Create/update/delete contract for one kind of dependent resource.
///
/// `T` is the record type; the reconciler is the only caller.
pub trait ResourceManager<T> {
  type Error: std::error::Error + Send + Sync + 'static;

  fn create(
    &mut self,
    target: &T,
  ) -> impl Future<Output = Result<Materialized<T>, Self::Error>> + Send;

  fn update(
    &mut self,
    current: &Materialized<T>,
    target: &T,
  ) -> impl Future<Output = Result<Materialized<T>, Self::Error>> + Send;

  fn delete(
    &mut self,
    current: &Materialized<T>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A unit of work spanning every resource kind of a subscription.
pub trait Transaction:
  Send
  + ResourceManager<SubscriptionRecord>
  + ResourceManager<PhaseRecord>
  + ResourceManager<ItemRecord>
  + ResourceManager<EntitlementRecord>
  + ResourceManager<PriceRecord>
{
  type StoreError: std::error::Error + Send + Sync + 'static;

  /// Append entries to the patch log. The log is never read back by the
  /// engine.
  fn append_patch_log(
    &mut self,
    entries: Vec<PatchLogEntry>,
  ) -> impl Future<Output = Result<(), Self::StoreError>> + Send;

  /// Make every write of this transaction durable, atomically.
  fn commit(self) -> impl Future<Output = Result<(), Self::StoreError>> + Send;
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Read side plus transaction factory of a subscription backend.
pub trait SubscriptionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;
  type Transaction: Transaction<StoreError = Self::Error>;

  /// Materialized view of a subscription. `None` if it does not exist.
  fn get_view(
    &self,
    subscription_id: Uuid,
  ) -> impl Future<Output = Result<Option<SubscriptionView>, Self::Error>> + Send + '_;

  /// Subscriptions, optionally restricted to one customer.
  fn list_subscriptions(
    &self,
    customer_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<Materialized<SubscriptionRecord>>, Self::Error>>
  + Send
  + '_;

  /// The patch log of a subscription in application order.
  fn patch_log(
    &self,
    subscription_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PatchLogEntry>, Self::Error>> + Send + '_;

  fn begin(
    &self,
  ) -> impl Future<Output = Result<Self::Transaction, Self::Error>> + Send + '_;
}
