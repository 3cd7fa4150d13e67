//! Phase-offset rewrites that keep the timeline gap-free.
//!
//! Every function here touches `start_after` only. Item and discount offsets
//! are relative to their phase start, so they move along for free.

use chrono::{DateTime, Utc};
use tenure_core::{Error, Result, period::Period, spec::Specification};

fn shift_phases(spec: &mut Specification, keys: &[String], delta: Period) -> Result<()> {
  for key in keys {
    let phase = spec.phase_mut(key)?;
    phase.start_after = phase.start_after + delta;
  }
  Ok(())
}

/// Push back every phase starting at or after `start` so that a phase of
/// `duration` fits in front of them.
///
/// Every later phase moves by the fixed distance from the first of them to
/// `start + duration`, so the inserted phase spans exactly `duration` even
/// when it has calendar components. `duration` may be omitted only when
/// nothing follows `start`.
pub fn make_room(
  spec: &mut Specification,
  key: &str,
  start: DateTime<Utc>,
  duration: Option<Period>,
) -> Result<()> {
  let mut later = Vec::new();
  let mut next_start = None;
  for phase in spec.sorted_phases()? {
    let phase_start = spec.phase_start(phase)?;
    if phase_start >= start {
      next_start.get_or_insert(phase_start);
      later.push(phase.key.clone());
    }
  }

  let Some(next_start) = next_start else { return Ok(()) };
  let duration = duration.ok_or_else(|| {
    Error::validation(format!(
      "phase {key} is inserted before phase {} and needs a duration",
      later[0]
    ))
  })?;
  // Calendar components resolve against `start`, not the subscription
  // anchor the later offsets hang off.
  let end = duration.add_to(start)?;
  shift_phases(spec, &later, Period::between(next_start, end))
}

/// Pull every phase after `key` forward by the length of `key`.
pub fn close_gap(spec: &mut Specification, key: &str) -> Result<()> {
  let keys = spec.sorted_phase_keys()?;
  let Some(idx) = keys.iter().position(|k| k == key) else {
    return Err(Error::conflict(format!("phase {key} not found")));
  };
  let Some(next) = keys.get(idx + 1) else { return Ok(()) };

  let removed_start = spec.phase_start(spec.phase(key)?)?;
  let next_start = spec.phase_start(spec.phase(next)?)?;
  let gap = Period::between(removed_start, next_start);
  shift_phases(spec, &keys[idx + 1..], -gap)
}

/// Move every phase after `key` by `by`, lengthening (or shortening) `key`.
///
/// Returns the key of the first shifted phase, if any. A shifted phase must
/// still start strictly after its predecessor.
pub fn stretch(spec: &mut Specification, key: &str, by: Period) -> Result<Option<String>> {
  let keys = spec.sorted_phase_keys()?;
  if keys.len() < 2 {
    return Err(Error::conflict(format!(
      "phase {key} is the only phase and cannot be stretched"
    )));
  }
  let Some(idx) = keys.iter().position(|k| k == key) else {
    return Err(Error::conflict(format!("phase {key} not found")));
  };

  for i in idx + 1..keys.len() {
    let phase = spec.phase_mut(&keys[i])?;
    phase.start_after = phase.start_after + by;

    let start = spec.phase_start(spec.phase(&keys[i])?)?;
    let prev_start = spec.phase_start(spec.phase(&keys[i - 1])?)?;
    if start <= prev_start {
      return Err(Error::conflict(format!(
        "phase {} would disappear due to stretching",
        keys[i - 1]
      )));
    }
  }
  Ok(keys.get(idx + 1).cloned())
}
