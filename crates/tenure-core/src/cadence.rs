//! Activity windows and phase-relative overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, period::Period};

/// A half-open activity window `[active_from, active_to)`. An absent
/// `active_to` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
  pub active_from: DateTime<Utc>,
  pub active_to:   Option<DateTime<Utc>>,
}

impl Cadence {
  pub fn new(active_from: DateTime<Utc>, active_to: Option<DateTime<Utc>>) -> Self {
    Self { active_from, active_to }
  }

  pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
    self.active_from <= at && self.active_to.is_none_or(|to| at < to)
  }

  /// True when the window contains no instant at all.
  pub fn is_empty(&self) -> bool {
    self.active_to.is_some_and(|to| to <= self.active_from)
  }

  /// True when some instant lies in both windows.
  pub fn overlaps(&self, other: &Cadence) -> bool {
    let starts_before_other_ends =
      other.active_to.is_none_or(|to| self.active_from < to);
    let other_starts_before_self_ends =
      self.active_to.is_none_or(|to| other.active_from < to);
    !self.is_empty()
      && !other.is_empty()
      && starts_before_other_ends
      && other_starts_before_self_ends
  }

  /// Has the window ended by `at`?
  pub fn has_ended_by(&self, at: DateTime<Utc>) -> bool {
    self.active_to.is_some_and(|to| to <= at)
  }
}

/// When a phase child (item version or discount) is active, relative to the
/// start of its phase. `None` means "from the phase start" and "until the
/// phase end" respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceOverride {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active_from_override: Option<Period>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub active_to_override:   Option<Period>,
}

impl CadenceOverride {
  /// Absolute start, ignoring the phase end.
  pub fn resolve_start(&self, phase_start: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match self.active_from_override {
      Some(offset) => offset.add_to(phase_start),
      None => Ok(phase_start),
    }
  }

  /// Absolute end as scheduled by the override alone.
  pub fn resolve_end(&self, phase_start: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    self
      .active_to_override
      .map(|offset| offset.add_to(phase_start))
      .transpose()
  }

  /// Resolve against the phase window. The end is clipped to the phase end.
  pub fn resolve(&self, phase: &Cadence) -> Result<Cadence> {
    let active_from = self.resolve_start(phase.active_from)?;
    let active_to = match (self.resolve_end(phase.active_from)?, phase.active_to) {
      (Some(own), Some(phase_end)) => Some(own.min(phase_end)),
      (own, phase_end) => own.or(phase_end),
    };
    Ok(Cadence { active_from, active_to })
  }
}
