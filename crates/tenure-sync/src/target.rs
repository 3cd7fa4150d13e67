//! The records a specification should materialize into.

use std::collections::BTreeMap;

use tenure_core::{
  Result,
  cadence::Cadence,
  spec::{ItemSpec, Specification},
  view::{EntitlementRecord, ItemRecord, PhaseRecord, PriceRecord},
};
use uuid::Uuid;

/// One item version and the dependent resources it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetItem {
  pub item:        ItemRecord,
  pub entitlement: Option<EntitlementRecord>,
  pub price:       Option<PriceRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetPhase {
  pub phase: PhaseRecord,
  pub items: BTreeMap<String, Vec<TargetItem>>,
}

impl TargetPhase {
  pub fn item(&self, key: &str, version: usize) -> Option<&TargetItem> {
    self.items.get(key).and_then(|versions| versions.get(version))
  }
}

/// Phase targets of `spec`, ordered by phase start.
pub fn phases(spec: &Specification, subscription_id: Uuid) -> Result<Vec<TargetPhase>> {
  let mut out = Vec::with_capacity(spec.phases.len());
  for phase in spec.sorted_phases()? {
    let cadence = spec.phase_cadence(&phase.key)?;
    let record = PhaseRecord {
      subscription_id,
      key: phase.key.clone(),
      name: phase.name.clone(),
      description: phase.description.clone(),
      start_after: phase.start_after,
      active_from: cadence.active_from,
      discounts: phase.discounts.clone(),
    };

    let mut items = BTreeMap::new();
    for (key, versions) in &phase.items {
      let targets = versions
        .iter()
        .enumerate()
        .map(|(version, item)| {
          item_target(spec, subscription_id, &cadence, item, version)
        })
        .collect::<Result<Vec<_>>>()?;
      items.insert(key.clone(), targets);
    }
    out.push(TargetPhase { phase: record, items });
  }
  Ok(out)
}

/// Entitlements and prices exist only for versions that are ever active.
fn item_target(
  spec: &Specification,
  subscription_id: Uuid,
  phase: &Cadence,
  item: &ItemSpec,
  version: usize,
) -> Result<TargetItem> {
  let mut cadence = item.cadence(phase)?;
  // Phases scheduled past a cancellation have an empty window.
  if phase.is_empty() {
    cadence.active_to = Some(cadence.active_from);
  }
  let rate_card = &item.rate_card;

  let record = ItemRecord {
    subscription_id,
    phase_key: item.phase_key.clone(),
    item_key: rate_card.key.clone(),
    version,
    rate_card: rate_card.clone(),
    overrides: item.overrides,
    active_from: cadence.active_from,
    active_to: cadence.active_to,
  };
  if cadence.is_empty() {
    return Ok(TargetItem { item: record, entitlement: None, price: None });
  }

  let entitlement = match (&rate_card.feature_key, &rate_card.entitlement_template) {
    (Some(feature_key), Some(template)) => Some(EntitlementRecord {
      subscription_id,
      customer_id: spec.customer_id,
      phase_key: item.phase_key.clone(),
      item_key: rate_card.key.clone(),
      version,
      feature_key: feature_key.clone(),
      template: template.clone(),
      active_from: cadence.active_from,
      active_to: cadence.active_to,
    }),
    _ => None,
  };
  let price = rate_card.price.as_ref().map(|price| PriceRecord {
    subscription_id,
    phase_key: item.phase_key.clone(),
    item_key: rate_card.key.clone(),
    version,
    currency: spec.currency.clone(),
    price: price.clone(),
    billing_cadence: rate_card.billing_cadence,
    active_from: cadence.active_from,
    active_to: cadence.active_to,
  });

  Ok(TargetItem { item: record, entitlement, price })
}
