//! Where a phase sits relative to "now", and which edits that allows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, spec::Specification};

/// Classification of a phase relative to an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PhaseRelation {
  /// Starts before the phase that is current; its contents are history.
  Elapsed,
  Current,
  Future,
}

impl PhaseRelation {
  /// Classify phase `key` of `spec` at `now`.
  ///
  /// Without a current phase (subscription not started yet, or already
  /// ended) a phase is future iff it starts after `now`.
  pub fn of(spec: &Specification, key: &str, now: DateTime<Utc>) -> Result<Self> {
    let phase = spec.phase(key)?;
    let start = spec.phase_start(phase)?;

    let Some(current) = spec.current_phase_at(now)? else {
      return Ok(if start > now { Self::Future } else { Self::Elapsed });
    };
    if current.key == key {
      return Ok(Self::Current);
    }
    let current_start = spec.phase_start(current)?;
    Ok(if start < current_start { Self::Elapsed } else { Self::Future })
  }

  /// Classify and reject elapsed phases.
  pub fn editable(spec: &Specification, key: &str, now: DateTime<Utc>) -> Result<Self> {
    match Self::of(spec, key, now)? {
      Self::Elapsed => Err(Error::forbidden(format!(
        "cannot change contents of phase {key} which starts before current phase"
      ))),
      relation => Ok(relation),
    }
  }
}
