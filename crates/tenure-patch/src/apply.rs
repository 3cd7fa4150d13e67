//! Batch application with whole-tree revalidation.

use chrono::{DateTime, Utc};
use tenure_core::{Error, Result, cadence::Cadence, spec::Specification};
use tracing::debug;

use crate::{ApplyContext, Patch, SpecPatch};

/// Apply `patches` in order to a working copy of `spec`.
///
/// Each patch is validated, applied, and followed by a full
/// [`Specification::validate`] plus a history check against the state
/// before that patch. The first failure aborts the batch with
/// [`Error::Patch`] naming the offending index; the working copy is dropped.
pub fn apply(spec: Specification, patches: &[Patch], ctx: &ApplyContext) -> Result<Specification> {
  let mut working = spec;
  for (index, patch) in patches.iter().enumerate() {
    debug!(index, op = %patch.op(), path = %patch.path(), "applying patch");
    let before = working.clone();
    apply_one(&mut working, &before, patch, ctx)
      .map_err(|source| Error::Patch { index, source: Box::new(source) })?;
  }
  Ok(working)
}

fn apply_one(
  spec: &mut Specification,
  before: &Specification,
  patch: &Patch,
  ctx: &ApplyContext,
) -> Result<()> {
  patch.validate()?;
  patch.apply_to(spec, ctx)?;
  spec.validate()?;
  ensure_history_preserved(before, spec, ctx.current_time)
}

/// Reject any change to the past.
///
/// Phases and item versions that started at or before `now` must keep
/// their start. An end at or before `now` is frozen; any other end may only
/// be set or moved to an instant at or after `now`.
pub fn ensure_history_preserved(
  before: &Specification,
  after: &Specification,
  now: DateTime<Utc>,
) -> Result<()> {
  if before.active_from <= now && after.active_from != before.active_from {
    return Err(Error::forbidden("subscription start cannot move once it has started"));
  }
  if !end_preserved(before.active_to, after.active_to, now) {
    return Err(Error::forbidden("subscription end cannot be moved into the past"));
  }

  for phase in before.phases.values() {
    let start = before.phase_start(phase)?;
    if start > now {
      continue;
    }
    let Some(after_phase) = after.phases.get(&phase.key) else {
      return Err(Error::forbidden(format!(
        "phase {} has started and cannot be removed",
        phase.key
      )));
    };
    if after.phase_start(after_phase)? != start {
      return Err(Error::forbidden(format!(
        "phase {} has started and cannot move",
        phase.key
      )));
    }

    let before_cadence = before.phase_cadence(&phase.key)?;
    let after_cadence = after.phase_cadence(&phase.key)?;
    for (key, versions) in &phase.items {
      for (version, item) in versions.iter().enumerate() {
        let was = item.cadence(&before_cadence)?;
        if was.active_from > now {
          continue;
        }
        let what = || format!("item {}/{key} version {version}", phase.key);
        let Some(is) = after_phase.items.get(key).and_then(|vs| vs.get(version)) else {
          return Err(Error::forbidden(format!("{} has started and cannot be deleted", what())));
        };
        let is = is.cadence(&after_cadence)?;
        if !window_preserved(&was, &is, now) {
          return Err(Error::forbidden(format!("{} would rewrite its history", what())));
        }
      }
    }
  }
  Ok(())
}

fn window_preserved(was: &Cadence, is: &Cadence, now: DateTime<Utc>) -> bool {
  was.active_from == is.active_from && end_preserved(was.active_to, is.active_to, now)
}

fn end_preserved(
  was: Option<DateTime<Utc>>,
  is: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> bool {
  match was {
    Some(end) if end <= now => is == Some(end),
    _ => is.is_none_or(|end| end >= now),
  }
}
