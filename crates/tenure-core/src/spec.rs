//! The subscription specification: the desired-state tree that patches
//! edit and the reconciler materializes.
//!
//! Nothing below the subscription stores an absolute timestamp. Phases are
//! positioned by `start_after` (relative to the subscription start) and
//! items/discounts by a [`CadenceOverride`] relative to their phase start, so
//! moving a phase is a single-field rewrite.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  cadence::{Cadence, CadenceOverride},
  period::Period,
  plan::{Discount, Plan, PlanRef, RateCard},
};

// ─── Specification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
  /// The plan this specification was created from; `None` for custom
  /// subscriptions.
  pub plan:            Option<PlanRef>,
  pub customer_id:     Uuid,
  pub name:            String,
  /// ISO 4217 currency code.
  pub currency:        String,
  pub billing_anchor:  DateTime<Utc>,
  pub billing_cadence: Period,
  pub active_from:     DateTime<Utc>,
  pub active_to:       Option<DateTime<Utc>>,
  pub phases:          BTreeMap<String, PhaseSpec>,
}

/// Customer-provided facts used when materializing a plan.
#[derive(Debug, Clone)]
pub struct CustomerInput {
  pub customer_id:    Uuid,
  pub active_from:    DateTime<Utc>,
  /// Overrides the plan name.
  pub name:           Option<String>,
  /// Defaults to `active_from`.
  pub billing_anchor: Option<DateTime<Utc>>,
}

impl Specification {
  /// Materialize a plan into a fresh specification. Phase offsets are the
  /// running sum of the preceding phase durations.
  pub fn from_plan(plan: &Plan, customer: CustomerInput) -> Result<Self> {
    let mut phases = BTreeMap::new();
    let mut start_after = Period::ZERO;
    let last = plan.phases.len().saturating_sub(1);

    for (i, plan_phase) in plan.phases.iter().enumerate() {
      let mut phase = PhaseSpec::new(&plan_phase.key, &plan_phase.name, start_after);
      phase.description = plan_phase.description.clone();

      for rate_card in &plan_phase.rate_cards {
        let item = ItemSpec::new(&plan_phase.key, rate_card.clone());
        if phase.items.insert(rate_card.key.clone(), vec![item]).is_some() {
          return Err(Error::validation(format!(
            "plan phase {} lists rate card {} twice",
            plan_phase.key, rate_card.key
          )));
        }
      }
      phase.discounts = plan_phase
        .discounts
        .iter()
        .map(|d| DiscountSpec::new(&plan_phase.key, d.clone()))
        .collect();

      match plan_phase.duration {
        Some(duration) => start_after = start_after + duration,
        None if i != last => {
          return Err(Error::validation(format!(
            "plan phase {} has no duration but is not the last phase",
            plan_phase.key
          )));
        }
        None => {}
      }

      if phases.insert(plan_phase.key.clone(), phase).is_some() {
        return Err(Error::validation(format!(
          "plan lists phase {} twice",
          plan_phase.key
        )));
      }
    }

    let spec = Self {
      plan:            Some(plan.reference()),
      customer_id:     customer.customer_id,
      name:            customer.name.unwrap_or_else(|| plan.name.clone()),
      currency:        plan.currency.clone(),
      billing_anchor:  customer.billing_anchor.unwrap_or(customer.active_from),
      billing_cadence: plan.billing_cadence,
      active_from:     customer.active_from,
      active_to:       None,
      phases,
    };
    spec.validate()?;
    Ok(spec)
  }

  pub fn cadence(&self) -> Cadence { Cadence::new(self.active_from, self.active_to) }

  pub fn phase(&self, key: &str) -> Result<&PhaseSpec> {
    self
      .phases
      .get(key)
      .ok_or_else(|| Error::conflict(format!("phase {key} not found")))
  }

  pub fn phase_mut(&mut self, key: &str) -> Result<&mut PhaseSpec> {
    self
      .phases
      .get_mut(key)
      .ok_or_else(|| Error::conflict(format!("phase {key} not found")))
  }

  /// Absolute start of a phase.
  pub fn phase_start(&self, phase: &PhaseSpec) -> Result<DateTime<Utc>> {
    phase.start_after.add_to(self.active_from)
  }

  /// Phases ordered by resolved start time (ties broken by key).
  pub fn sorted_phases(&self) -> Result<Vec<&PhaseSpec>> {
    let mut keyed = self
      .phases
      .values()
      .map(|p| Ok((self.phase_start(p)?, p)))
      .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|(a_start, a), (b_start, b)| {
      a_start.cmp(b_start).then_with(|| a.key.cmp(&b.key))
    });
    Ok(keyed.into_iter().map(|(_, p)| p).collect())
  }

  /// Phase keys ordered by resolved start time.
  pub fn sorted_phase_keys(&self) -> Result<Vec<String>> {
    Ok(self.sorted_phases()?.into_iter().map(|p| p.key.clone()).collect())
  }

  /// The window during which `key` is the current phase: from its start to
  /// the next phase's start, clipped to the subscription end.
  pub fn phase_cadence(&self, key: &str) -> Result<Cadence> {
    let sorted = self.sorted_phases()?;
    let idx = sorted
      .iter()
      .position(|p| p.key == key)
      .ok_or_else(|| Error::conflict(format!("phase {key} not found")))?;

    let active_from = self.phase_start(sorted[idx])?;
    let next_start = sorted
      .get(idx + 1)
      .map(|next| self.phase_start(next))
      .transpose()?;
    let active_to = match (next_start, self.active_to) {
      (Some(next), Some(end)) => Some(next.min(end)),
      (next, end) => next.or(end),
    };
    Ok(Cadence { active_from, active_to })
  }

  /// The phase active at `at`, if any.
  pub fn current_phase_at(&self, at: DateTime<Utc>) -> Result<Option<&PhaseSpec>> {
    if !self.cadence().is_active_at(at) {
      return Ok(None);
    }
    let mut current = None;
    for phase in self.sorted_phases()? {
      if self.phase_start(phase)? <= at {
        current = Some(phase);
      } else {
        break;
      }
    }
    Ok(current)
  }

  /// Check every structural and temporal invariant of the tree.
  pub fn validate(&self) -> Result<()> {
    if self.currency.len() != 3
      || !self.currency.chars().all(|c| c.is_ascii_uppercase())
    {
      return Err(Error::validation(format!(
        "currency {:?} is not an ISO 4217 code",
        self.currency
      )));
    }
    if self.billing_cadence.is_zero() {
      return Err(Error::validation("billing cadence must not be empty"));
    }
    if let Some(to) = self.active_to
      && to <= self.active_from
    {
      return Err(Error::validation(format!(
        "subscription ends at {to}, not after it starts at {}",
        self.active_from
      )));
    }
    if self.phases.is_empty() {
      return Err(Error::validation("subscription has no phases"));
    }

    for (key, phase) in &self.phases {
      if &phase.key != key {
        return Err(Error::validation(format!(
          "phase stored under {key} is keyed {}",
          phase.key
        )));
      }
      if phase.start_after.is_negative_at(self.active_from)? {
        return Err(Error::validation(format!(
          "phase {key} starts before the subscription"
        )));
      }
    }

    let sorted = self.sorted_phases()?;
    for pair in sorted.windows(2) {
      if self.phase_start(pair[0])? >= self.phase_start(pair[1])? {
        return Err(Error::validation(format!(
          "phases {} and {} start at the same time",
          pair[0].key, pair[1].key
        )));
      }
    }

    for phase in sorted {
      phase.validate(&self.phase_cadence(&phase.key)?)?;
    }
    Ok(())
  }
}

// ─── Phase ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
  pub key:         String,
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  /// Offset of the phase start from the subscription's `active_from`.
  pub start_after: Period,
  /// Item versions per item key, oldest first.
  #[serde(default)]
  pub items:       BTreeMap<String, Vec<ItemSpec>>,
  /// Discounts in storage order.
  #[serde(default)]
  pub discounts:   Vec<DiscountSpec>,
}

impl PhaseSpec {
  pub fn new(key: &str, name: &str, start_after: Period) -> Self {
    Self {
      key: key.to_owned(),
      name: name.to_owned(),
      description: None,
      start_after,
      items: BTreeMap::new(),
      discounts: Vec::new(),
    }
  }

  /// Storage indices of the discounts active at `at`, in storage order.
  pub fn active_discount_indices(
    &self,
    phase: &Cadence,
    at: DateTime<Utc>,
  ) -> Result<Vec<usize>> {
    let mut active = Vec::new();
    for (i, discount) in self.discounts.iter().enumerate() {
      if discount.cadence(phase)?.is_active_at(at) {
        active.push(i);
      }
    }
    Ok(active)
  }

  fn validate(&self, cadence: &Cadence) -> Result<()> {
    let phase_start = cadence.active_from;

    for (key, versions) in &self.items {
      if versions.is_empty() {
        return Err(Error::validation(format!(
          "item {key} in phase {} has no versions",
          self.key
        )));
      }
      for item in versions {
        if item.phase_key != self.key || item.rate_card.key != *key {
          return Err(Error::validation(format!(
            "item stored under {}/{key} is keyed {}/{}",
            self.key, item.phase_key, item.rate_card.key
          )));
        }
        item.rate_card.validate()?;
        validate_override(&item.overrides, phase_start, || {
          format!("item {}/{key}", self.key)
        })?;
      }
      for pair in versions.windows(2) {
        let earlier_end = pair[0].overrides.resolve_end(phase_start)?;
        let later_start = pair[1].overrides.resolve_start(phase_start)?;
        if earlier_end.is_none_or(|end| end > later_start) {
          return Err(Error::validation(format!(
            "item {}/{key} has overlapping versions",
            self.key
          )));
        }
      }
    }

    for discount in &self.discounts {
      if discount.phase_key != self.key {
        return Err(Error::validation(format!(
          "discount in phase {} is keyed to phase {}",
          self.key, discount.phase_key
        )));
      }
      discount.discount.validate()?;
      for rate_card in discount.discount.rate_card_keys() {
        if !self.items.contains_key(rate_card) {
          return Err(Error::validation(format!(
            "discount in phase {} references unknown item {rate_card}",
            self.key
          )));
        }
      }
      validate_override(&discount.overrides, phase_start, || {
        format!("discount in phase {}", self.key)
      })?;
    }
    Ok(())
  }
}

fn validate_override(
  overrides: &CadenceOverride,
  phase_start: DateTime<Utc>,
  what: impl Fn() -> String,
) -> Result<()> {
  let start = overrides.resolve_start(phase_start)?;
  if start < phase_start {
    return Err(Error::validation(format!("{} starts before its phase", what())));
  }
  if let Some(end) = overrides.resolve_end(phase_start)?
    && end < start
  {
    return Err(Error::validation(format!("{} ends before it starts", what())));
  }
  Ok(())
}

// ─── Item ────────────────────────────────────────────────────────────────────

/// One version of an item. The item key is the rate card key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
  pub phase_key: String,
  pub rate_card: RateCard,
  #[serde(default)]
  pub overrides: CadenceOverride,
}

impl ItemSpec {
  pub fn new(phase_key: &str, rate_card: RateCard) -> Self {
    Self {
      phase_key: phase_key.to_owned(),
      rate_card,
      overrides: CadenceOverride::default(),
    }
  }

  pub fn key(&self) -> &str { &self.rate_card.key }

  pub fn cadence(&self, phase: &Cadence) -> Result<Cadence> {
    self.overrides.resolve(phase)
  }
}

// ─── Discount ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountSpec {
  pub phase_key: String,
  pub discount:  Discount,
  #[serde(default)]
  pub overrides: CadenceOverride,
}

impl DiscountSpec {
  pub fn new(phase_key: &str, discount: Discount) -> Self {
    Self {
      phase_key: phase_key.to_owned(),
      discount,
      overrides: CadenceOverride::default(),
    }
  }

  pub fn cadence(&self, phase: &Cadence) -> Result<Cadence> {
    self.overrides.resolve(phase)
  }
}
