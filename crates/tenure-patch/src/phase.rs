use serde::{Deserialize, Serialize};
use tenure_core::{
  Error, Result,
  period::Period,
  relation::PhaseRelation,
  spec::{PhaseSpec, Specification},
};

use crate::{ApplyContext, PatchOp, PatchPath, SpecPatch, path::check_key, shift};

/// The contents of a phase being inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPhase {
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  /// Offset from the subscription start.
  pub start_after: Period,
  /// Required when a phase follows the insertion point.
  #[serde(default)]
  pub duration:    Option<Period>,
}

/// Insert an empty phase, shifting later phases to make room.
#[derive(Debug, Clone, PartialEq)]
pub struct AddPhase {
  pub phase_key: String,
  pub phase:     NewPhase,
}

impl SpecPatch for AddPhase {
  fn op(&self) -> PatchOp { PatchOp::Add }

  fn path(&self) -> PatchPath { PatchPath::phase(&self.phase_key) }

  fn validate(&self) -> Result<()> {
    check_key("phase", &self.phase_key)?;
    if self.phase.name.trim().is_empty() {
      return Err(Error::validation(format!("phase {} needs a name", self.phase_key)));
    }
    if let Some(duration) = self.phase.duration
      && duration.is_zero()
    {
      return Err(Error::validation(format!(
        "phase {} has an empty duration",
        self.phase_key
      )));
    }
    Ok(())
  }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    if spec.phases.contains_key(&self.phase_key) {
      return Err(Error::conflict(format!("phase {} already exists", self.phase_key)));
    }

    let start = self.phase.start_after.add_to(spec.active_from)?;
    if start <= now {
      return Err(Error::forbidden(format!(
        "phase {} would start at {start}, which is not after the current time",
        self.phase_key
      )));
    }
    if let Some(end) = spec.active_to
      && start >= end
    {
      return Err(Error::forbidden(format!(
        "phase {} would start at {start}, after the subscription ends at {end}",
        self.phase_key
      )));
    }
    if let Some(duration) = self.phase.duration
      && duration.is_negative_at(start)?
    {
      return Err(Error::validation(format!(
        "phase {} has a negative duration",
        self.phase_key
      )));
    }

    shift::make_room(spec, &self.phase_key, start, self.phase.duration)?;

    let mut phase = PhaseSpec::new(&self.phase_key, &self.phase.name, self.phase.start_after);
    phase.description = self.phase.description.clone();
    spec.phases.insert(self.phase_key.clone(), phase);
    Ok(())
  }
}

/// What happens to the time a removed phase occupied.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemovePhaseShifting {
  /// Later phases move forward to close the gap.
  #[default]
  Next,
  /// Nothing moves; the preceding phase runs on through the gap.
  Prev,
}

/// Remove a phase that has not started.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovePhase {
  pub phase_key: String,
  pub shift:     RemovePhaseShifting,
}

impl SpecPatch for RemovePhase {
  fn op(&self) -> PatchOp { PatchOp::Remove }

  fn path(&self) -> PatchPath { PatchPath::phase(&self.phase_key) }

  fn validate(&self) -> Result<()> { check_key("phase", &self.phase_key) }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let relation = PhaseRelation::of(spec, &self.phase_key, ctx.current_time)?;
    if relation != PhaseRelation::Future {
      return Err(Error::forbidden(format!(
        "cannot remove phase {} which is {relation}",
        self.phase_key
      )));
    }

    if self.shift == RemovePhaseShifting::Next {
      shift::close_gap(spec, &self.phase_key)?;
    }
    spec.phases.remove(&self.phase_key);
    Ok(())
  }
}

/// Lengthen (positive) or shorten (negative) a phase by moving every later
/// phase.
#[derive(Debug, Clone, PartialEq)]
pub struct StretchPhase {
  pub phase_key: String,
  pub duration:  Period,
}

impl SpecPatch for StretchPhase {
  fn op(&self) -> PatchOp { PatchOp::Stretch }

  fn path(&self) -> PatchPath { PatchPath::phase(&self.phase_key) }

  fn validate(&self) -> Result<()> {
    check_key("phase", &self.phase_key)?;
    if self.duration.is_zero() {
      return Err(Error::validation(format!(
        "stretching phase {} by an empty duration",
        self.phase_key
      )));
    }
    Ok(())
  }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    PhaseRelation::editable(spec, &self.phase_key, now)?;

    let Some(next) = shift::stretch(spec, &self.phase_key, self.duration)? else {
      return Ok(());
    };
    let next_start = spec.phase_start(spec.phase(&next)?)?;
    if next_start <= now {
      return Err(Error::forbidden(format!(
        "phase {} would end at {next_start}, which is not after the current time",
        self.phase_key
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tenure_core::ErrorKind;

  use super::*;
  use crate::fixtures::{at, ctx, spec};

  fn add(key: &str, start_after: Period, duration: Option<Period>) -> AddPhase {
    AddPhase {
      phase_key: key.into(),
      phase:     NewPhase {
        name: key.into(),
        description: None,
        start_after,
        duration,
      },
    }
  }

  fn start_of(s: &Specification, key: &str) -> chrono::DateTime<chrono::Utc> {
    s.phase_start(s.phase(key).unwrap()).unwrap()
  }

  #[test]
  fn add_phase_shifts_later_phases() {
    let mut s = spec(&[("p1", 0), ("p2", 1), ("p3", 2)]);
    add("x", Period::months(1), Some(Period::weeks(2)))
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap();

    assert_eq!(start_of(&s, "x"), at(2024, 2, 1));
    assert_eq!(start_of(&s, "p2"), at(2024, 2, 15));
    assert_eq!(start_of(&s, "p3"), at(2024, 3, 15));
    assert_eq!(s.sorted_phase_keys().unwrap(), ["p1", "x", "p2", "p3"]);
    s.validate().unwrap();
  }

  #[test]
  fn month_long_phase_inserted_mid_month_keeps_its_length() {
    let mut s = spec(&[("p1", 0), ("p2", 1)]);
    add("x", Period::days(14), Some(Period::months(1)))
      .apply_to(&mut s, &ctx(at(2024, 1, 5)))
      .unwrap();

    let x = s.phase_cadence("x").unwrap();
    assert_eq!(x.active_from, at(2024, 1, 15));
    assert_eq!(x.active_to, Some(at(2024, 2, 15)));
    assert_eq!(start_of(&s, "p2"), at(2024, 2, 15));
    s.validate().unwrap();
  }

  #[test]
  fn add_phase_in_the_past_is_forbidden() {
    let mut s = spec(&[("p1", 0), ("p2", 1)]);
    let err = add("x", Period::days(5), Some(Period::days(1)))
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn add_phase_after_cancellation_is_forbidden() {
    let mut s = spec(&[("p1", 0)]);
    s.active_to = Some(at(2024, 3, 1));
    let err = add("x", Period::months(3), None)
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn add_existing_phase_is_a_conflict() {
    let mut s = spec(&[("p1", 0), ("p2", 1)]);
    let err = add("p2", Period::months(3), None)
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
  }

  #[test]
  fn remove_phase_shift_next_collapses_gap() {
    let mut s = spec(&[("p1", 0), ("p2", 1), ("p3", 2)]);
    RemovePhase { phase_key: "p2".into(), shift: RemovePhaseShifting::Next }
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap();
    assert_eq!(start_of(&s, "p3"), at(2024, 2, 1));
    s.validate().unwrap();
  }

  #[test]
  fn remove_phase_shift_prev_leaves_offsets() {
    let mut s = spec(&[("p1", 0), ("p2", 1), ("p3", 2)]);
    RemovePhase { phase_key: "p2".into(), shift: RemovePhaseShifting::Prev }
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap();
    assert_eq!(start_of(&s, "p3"), at(2024, 3, 1));
    assert_eq!(s.phase_cadence("p1").unwrap().active_to, Some(at(2024, 3, 1)));
  }

  #[test]
  fn remove_current_phase_is_forbidden() {
    let mut s = spec(&[("p1", 0), ("p2", 1)]);
    let err = RemovePhase { phase_key: "p1".into(), shift: RemovePhaseShifting::Next }
      .apply_to(&mut s, &ctx(at(2024, 1, 10)))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn stretch_current_phase_moves_only_later_phases() {
    let mut s = spec(&[("p1", 0), ("p2", 1), ("p3", 2)]);
    StretchPhase { phase_key: "p2".into(), duration: Period::days(10) }
      .apply_to(&mut s, &ctx(at(2024, 2, 10)))
      .unwrap();
    assert_eq!(start_of(&s, "p1"), at(2024, 1, 1));
    assert_eq!(start_of(&s, "p2"), at(2024, 2, 1));
    assert_eq!(start_of(&s, "p3"), at(2024, 3, 11));
  }

  #[test]
  fn shrinking_current_phase_into_the_past_is_forbidden() {
    let mut s = spec(&[("p1", 0), ("p2", 1)]);
    let err = StretchPhase { phase_key: "p1".into(), duration: -Period::days(20) }
      .apply_to(&mut s, &ctx(at(2024, 1, 20)))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn stretch_elapsed_phase_is_forbidden() {
    let mut s = spec(&[("p1", 0), ("p2", 1)]);
    let err = StretchPhase { phase_key: "p1".into(), duration: Period::days(1) }
      .apply_to(&mut s, &ctx(at(2024, 2, 10)))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn zero_stretch_fails_validation() {
    let patch = StretchPhase { phase_key: "p1".into(), duration: Period::ZERO };
    assert_eq!(patch.validate().unwrap_err().kind(), ErrorKind::Validation);
  }
}
