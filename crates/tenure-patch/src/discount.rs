//! Discount patches.
//!
//! A discount's position is logical: index `N` means "the N-th discount
//! active at the evaluation instant", counted in storage order. Inactive
//! discounts are skipped when counting.

use chrono::{DateTime, Utc};
use tenure_core::{
  Error, Result,
  cadence::Cadence,
  period::Period,
  relation::PhaseRelation,
  spec::{DiscountSpec, PhaseSpec, Specification},
};

use crate::{
  ApplyContext, PatchOp, PatchPath, SpecPatch, check_override, path::check_key,
  pin_start_in_current_phase,
};

/// Storage position that puts a new discount at logical `index` among the
/// discounts active at `at`.
pub(crate) fn insert_position(
  phase: &PhaseSpec,
  cadence: &Cadence,
  at: DateTime<Utc>,
  index: usize,
) -> Result<usize> {
  let active = phase.active_discount_indices(cadence, at)?;
  Ok(match active.get(index) {
    Some(&pos) => pos,
    None => active.last().map_or(phase.discounts.len(), |&last| last + 1),
  })
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddDiscount {
  pub phase_key: String,
  /// Logical position among the discounts active when this one starts.
  pub index:     usize,
  pub discount:  DiscountSpec,
}

impl SpecPatch for AddDiscount {
  fn op(&self) -> PatchOp { PatchOp::Add }

  fn path(&self) -> PatchPath { PatchPath::discounts(&self.phase_key) }

  fn validate(&self) -> Result<()> {
    check_key("phase", &self.phase_key)?;
    if self.discount.phase_key != self.phase_key {
      return Err(Error::validation(format!(
        "discount is keyed to phase {} but added to phase {}",
        self.discount.phase_key, self.phase_key
      )));
    }
    self.discount.discount.validate()
  }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    let relation = PhaseRelation::editable(spec, &self.phase_key, now)?;
    let cadence = spec.phase_cadence(&self.phase_key)?;
    let what = format!("discount in phase {}", self.phase_key);

    let mut discount = self.discount.clone();
    check_override(&discount.overrides, cadence.active_from, &what)?;
    pin_start_in_current_phase(
      &mut discount.overrides,
      relation,
      cadence.active_from,
      now,
      &what,
    )?;
    let start = discount.overrides.resolve_start(cadence.active_from)?;

    let phase = spec.phase_mut(&self.phase_key)?;
    if let Some(missing) = discount
      .discount
      .rate_card_keys()
      .iter()
      .find(|key| !phase.items.contains_key(*key))
    {
      return Err(Error::conflict(format!(
        "{what} references item {missing}, which is not in the phase"
      )));
    }

    let pos = insert_position(phase, &cadence, start, self.index)?;
    phase.discounts.insert(pos, discount);
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveDiscount {
  pub phase_key: String,
  /// Logical position among the discounts active at `at`.
  pub index:     usize,
  /// Evaluation instant. Defaults to now, or the phase start for a phase
  /// that has not started.
  pub at:        Option<DateTime<Utc>>,
}

impl SpecPatch for RemoveDiscount {
  fn op(&self) -> PatchOp { PatchOp::Remove }

  fn path(&self) -> PatchPath { PatchPath::discounts(&self.phase_key) }

  fn validate(&self) -> Result<()> { check_key("phase", &self.phase_key) }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    let relation = PhaseRelation::editable(spec, &self.phase_key, now)?;
    let cadence = spec.phase_cadence(&self.phase_key)?;
    let phase_start = cadence.active_from;
    let at = self.at.unwrap_or(now.max(phase_start));

    let phase = spec.phase_mut(&self.phase_key)?;
    let active = phase.active_discount_indices(&cadence, at)?;
    let Some(&pos) = active.get(self.index) else {
      return Err(Error::validation(format!(
        "discount index {} is out of range: {} discounts are active in phase {} at {at}",
        self.index,
        active.len(),
        self.phase_key
      )));
    };

    let started = phase.discounts[pos].overrides.resolve_start(phase_start)? <= now;
    if relation == PhaseRelation::Future || !started {
      phase.discounts.remove(pos);
      return Ok(());
    }

    let discount = &mut phase.discounts[pos];
    if let Some(end) = discount.overrides.resolve_end(phase_start)?
      && end <= now
    {
      return Err(Error::conflict(format!(
        "discount {} in phase {} already ended at {end}",
        self.index, self.phase_key
      )));
    }
    discount.overrides.active_to_override = Some(Period::between(phase_start, now));
    Ok(())
  }
}
