//! Materialized records and the assembled subscription view.
//!
//! Each record type is both the *target* the reconciler derives from a
//! specification and, wrapped in [`Materialized`], the persisted resource.
//! A resource is up to date exactly when its stored value equals the target.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  cadence::{Cadence, CadenceOverride},
  period::Period,
  plan::{EntitlementTemplate, PlanRef, Price, RateCard},
  spec::{DiscountSpec, ItemSpec, PhaseSpec, Specification},
  state::SubscriptionStatus,
};

/// A persisted resource: a store-assigned id plus the materialized value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materialized<T> {
  pub id:    Uuid,
  #[serde(flatten)]
  pub value: T,
}

/// Names a record type in logs and errors.
pub trait Resource {
  const KIND: &'static str;
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
  pub customer_id:     Uuid,
  pub plan:            Option<PlanRef>,
  pub name:            String,
  pub currency:        String,
  pub billing_anchor:  DateTime<Utc>,
  pub billing_cadence: Period,
  pub active_from:     DateTime<Utc>,
  pub active_to:       Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
  pub fn from_spec(spec: &Specification) -> Self {
    Self {
      customer_id:     spec.customer_id,
      plan:            spec.plan.clone(),
      name:            spec.name.clone(),
      currency:        spec.currency.clone(),
      billing_anchor:  spec.billing_anchor,
      billing_cadence: spec.billing_cadence,
      active_from:     spec.active_from,
      active_to:       spec.active_to,
    }
  }

  pub fn cadence(&self) -> Cadence { Cadence::new(self.active_from, self.active_to) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
  pub subscription_id: Uuid,
  pub key:             String,
  pub name:            String,
  pub description:     Option<String>,
  pub start_after:     Period,
  /// Resolved start; kept so stores can order phases without the anchor.
  pub active_from:     DateTime<Utc>,
  pub discounts:       Vec<DiscountSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
  pub subscription_id: Uuid,
  pub phase_key:       String,
  pub item_key:        String,
  /// Position among the versions of `item_key`, oldest first.
  pub version:         usize,
  pub rate_card:       RateCard,
  pub overrides:       CadenceOverride,
  pub active_from:     DateTime<Utc>,
  pub active_to:       Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementRecord {
  pub subscription_id: Uuid,
  pub customer_id:     Uuid,
  pub phase_key:       String,
  pub item_key:        String,
  pub version:         usize,
  pub feature_key:     String,
  pub template:        EntitlementTemplate,
  pub active_from:     DateTime<Utc>,
  pub active_to:       Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
  pub subscription_id: Uuid,
  pub phase_key:       String,
  pub item_key:        String,
  pub version:         usize,
  pub currency:        String,
  pub price:           Price,
  pub billing_cadence: Option<Period>,
  pub active_from:     DateTime<Utc>,
  pub active_to:       Option<DateTime<Utc>>,
}

impl Resource for SubscriptionRecord {
  const KIND: &'static str = "subscription";
}

impl Resource for PhaseRecord {
  const KIND: &'static str = "phase";
}

impl Resource for ItemRecord {
  const KIND: &'static str = "item";
}

impl Resource for EntitlementRecord {
  const KIND: &'static str = "entitlement";
}

impl Resource for PriceRecord {
  const KIND: &'static str = "price";
}

// ─── View ────────────────────────────────────────────────────────────────────

/// The already-materialized state of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionView {
  pub subscription: Materialized<SubscriptionRecord>,
  /// Ordered by phase start.
  pub phases:       Vec<PhaseView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseView {
  pub phase: Materialized<PhaseRecord>,
  /// Item versions per item key, ordered by version.
  pub items: BTreeMap<String, Vec<ItemView>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
  pub item:        Materialized<ItemRecord>,
  pub entitlement: Option<Materialized<EntitlementRecord>>,
  pub price:       Option<Materialized<PriceRecord>>,
}

impl SubscriptionView {
  /// Group flat record lists (as a store reads them) into a view.
  pub fn assemble(
    subscription: Materialized<SubscriptionRecord>,
    phases: Vec<Materialized<PhaseRecord>>,
    items: Vec<Materialized<ItemRecord>>,
    entitlements: Vec<Materialized<EntitlementRecord>>,
    prices: Vec<Materialized<PriceRecord>>,
  ) -> Result<Self> {
    type Slot = (String, String, usize);

    let mut entitlements: BTreeMap<Slot, _> = entitlements
      .into_iter()
      .map(|e| ((e.value.phase_key.clone(), e.value.item_key.clone(), e.value.version), e))
      .collect();
    let mut prices: BTreeMap<Slot, _> = prices
      .into_iter()
      .map(|p| ((p.value.phase_key.clone(), p.value.item_key.clone(), p.value.version), p))
      .collect();

    let mut phase_views: BTreeMap<String, PhaseView> = phases
      .into_iter()
      .map(|phase| {
        (phase.value.key.clone(), PhaseView { phase, items: BTreeMap::new() })
      })
      .collect();

    for item in items {
      let slot = (
        item.value.phase_key.clone(),
        item.value.item_key.clone(),
        item.value.version,
      );
      let phase = phase_views.get_mut(&slot.0).ok_or_else(|| {
        Error::conflict(format!(
          "item {}/{} belongs to a phase that is not materialized",
          slot.0, slot.1
        ))
      })?;
      phase.items.entry(slot.1.clone()).or_default().push(ItemView {
        entitlement: entitlements.remove(&slot),
        price: prices.remove(&slot),
        item,
      });
    }

    if let Some((phase, item, version)) = entitlements.into_keys().chain(prices.into_keys()).next() {
      return Err(Error::conflict(format!(
        "resource for {phase}/{item} v{version} has no materialized item"
      )));
    }

    let mut phases: Vec<PhaseView> = phase_views.into_values().collect();
    for phase in &mut phases {
      for versions in phase.items.values_mut() {
        versions.sort_by_key(|v| v.item.value.version);
      }
    }
    phases.sort_by(|a, b| {
      a.phase
        .value
        .active_from
        .cmp(&b.phase.value.active_from)
        .then_with(|| a.phase.value.key.cmp(&b.phase.value.key))
    });

    Ok(Self { subscription, phases })
  }

  pub fn id(&self) -> Uuid { self.subscription.id }

  pub fn status_at(&self, at: DateTime<Utc>) -> SubscriptionStatus {
    SubscriptionStatus::at(&self.subscription.value.cadence(), at)
  }

  pub fn phase(&self, key: &str) -> Option<&PhaseView> {
    self.phases.iter().find(|p| p.phase.value.key == key)
  }

  /// Rebuild the specification this view was materialized from.
  pub fn as_spec(&self) -> Specification {
    let sub = &self.subscription.value;
    let phases = self
      .phases
      .iter()
      .map(|pv| {
        let record = &pv.phase.value;
        let mut phase = PhaseSpec::new(&record.key, &record.name, record.start_after);
        phase.description = record.description.clone();
        phase.discounts = record.discounts.clone();
        phase.items = pv
          .items
          .iter()
          .map(|(key, versions)| {
            let specs = versions
              .iter()
              .map(|v| ItemSpec {
                phase_key: v.item.value.phase_key.clone(),
                rate_card: v.item.value.rate_card.clone(),
                overrides: v.item.value.overrides,
              })
              .collect();
            (key.clone(), specs)
          })
          .collect();
        (record.key.clone(), phase)
      })
      .collect();

    Specification {
      plan: sub.plan.clone(),
      customer_id: sub.customer_id,
      name: sub.name.clone(),
      currency: sub.currency.clone(),
      billing_anchor: sub.billing_anchor,
      billing_cadence: sub.billing_cadence,
      active_from: sub.active_from,
      active_to: sub.active_to,
      phases,
    }
  }
}
