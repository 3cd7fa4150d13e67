//! Structural edits to a subscription specification.
//!
//! A [`Patch`] targets one node of the specification tree by [`PatchPath`]
//! and one operation ([`PatchOp`]). Patches are pure: they mutate an
//! in-memory [`Specification`] and never touch storage. Batches go through
//! [`apply`], which validates after every patch and rejects any batch that
//! would rewrite history.
//!
//! # Quick start
//!
//! ```no_run
//! use chrono::Utc;
//! use tenure_patch::{ApplyContext, Patch, apply};
//! # fn spec() -> tenure_core::spec::Specification { unimplemented!() }
//!
//! let patch = Patch::from_parts("remove", "/phases/default/items/seats", serde_json::Value::Null)
//!   .unwrap();
//! let ctx = ApplyContext { current_time: Utc::now() };
//! let edited = apply(spec(), &[patch], &ctx).unwrap();
//! ```

mod apply;
mod codec;
mod discount;
mod item;
mod path;
mod phase;
mod shift;
mod unschedule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenure_core::{
  Error, Result,
  cadence::CadenceOverride,
  period::Period,
  relation::PhaseRelation,
  spec::Specification,
};

pub use apply::{apply, ensure_history_preserved};
pub use codec::PatchDocument;
pub use discount::{AddDiscount, RemoveDiscount};
pub use item::{AddItem, RemoveItem};
pub use path::PatchPath;
pub use phase::{AddPhase, NewPhase, RemovePhase, RemovePhaseShifting, StretchPhase};
pub use unschedule::UnscheduleEdit;

// ─── Public types ────────────────────────────────────────────────────────────

/// The instant patches are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
  pub current_time: DateTime<Utc>,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatchOp {
  Add,
  Remove,
  Stretch,
  Unschedule,
}

/// Behaviour shared by every patch type.
pub trait SpecPatch {
  fn op(&self) -> PatchOp;

  fn path(&self) -> PatchPath;

  /// Structural checks that need no specification.
  fn validate(&self) -> Result<()>;

  /// Mutate `spec`. Leaves `spec` in an unspecified state on error; the
  /// pipeline discards it.
  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()>;
}

/// Any supported edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
  AddPhase(AddPhase),
  RemovePhase(RemovePhase),
  StretchPhase(StretchPhase),
  AddItem(AddItem),
  RemoveItem(RemoveItem),
  AddDiscount(AddDiscount),
  RemoveDiscount(RemoveDiscount),
  UnscheduleEdit(UnscheduleEdit),
}

impl Patch {
  fn inner(&self) -> &dyn SpecPatch {
    match self {
      Self::AddPhase(p) => p,
      Self::RemovePhase(p) => p,
      Self::StretchPhase(p) => p,
      Self::AddItem(p) => p,
      Self::RemoveItem(p) => p,
      Self::AddDiscount(p) => p,
      Self::RemoveDiscount(p) => p,
      Self::UnscheduleEdit(p) => p,
    }
  }
}

impl SpecPatch for Patch {
  fn op(&self) -> PatchOp { self.inner().op() }

  fn path(&self) -> PatchPath { self.inner().path() }

  fn validate(&self) -> Result<()> { self.inner().validate() }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    self.inner().apply_to(spec, ctx)
  }
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

/// Pin the start of a child added to the current phase.
///
/// Without an explicit start the child begins now (rounded up to the
/// second). An explicit start in the past is rejected.
pub(crate) fn pin_start_in_current_phase(
  overrides: &mut CadenceOverride,
  relation: PhaseRelation,
  phase_start: DateTime<Utc>,
  now: DateTime<Utc>,
  what: &str,
) -> Result<()> {
  if relation != PhaseRelation::Current {
    return Ok(());
  }
  match overrides.active_from_override {
    None => {
      overrides.active_from_override = Some(Period::between(phase_start, now));
    }
    Some(_) => {
      let start = overrides.resolve_start(phase_start)?;
      if start < now {
        return Err(Error::forbidden(format!(
          "{what} would start at {start}, which is in the past"
        )));
      }
    }
  }
  Ok(())
}

/// Explicit overrides must be non-negative offsets from the phase start.
pub(crate) fn check_override(
  overrides: &CadenceOverride,
  anchor: DateTime<Utc>,
  what: &str,
) -> Result<()> {
  for (name, offset) in [
    ("start", overrides.active_from_override),
    ("end", overrides.active_to_override),
  ] {
    if let Some(offset) = offset
      && offset.is_negative_at(anchor)?
    {
      return Err(Error::validation(format!(
        "{what} has a negative {name} offset {offset}"
      )));
    }
  }
  Ok(())
}
