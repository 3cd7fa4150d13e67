use chrono::{DateTime, Utc};
use tenure_core::{
  Error, Result,
  period::Period,
  relation::PhaseRelation,
  spec::{ItemSpec, Specification},
};

use crate::{
  ApplyContext, PatchOp, PatchPath, SpecPatch, check_override, path::check_key,
  pin_start_in_current_phase,
};

/// Add an item to a phase, or a new version of an existing item.
#[derive(Debug, Clone, PartialEq)]
pub struct AddItem {
  pub phase_key: String,
  pub item_key:  String,
  pub item:      ItemSpec,
}

impl SpecPatch for AddItem {
  fn op(&self) -> PatchOp { PatchOp::Add }

  fn path(&self) -> PatchPath { PatchPath::item(&self.phase_key, &self.item_key) }

  fn validate(&self) -> Result<()> {
    check_key("phase", &self.phase_key)?;
    check_key("item", &self.item_key)?;
    if self.item.phase_key != self.phase_key {
      return Err(Error::validation(format!(
        "item is keyed to phase {} but added to phase {}",
        self.item.phase_key, self.phase_key
      )));
    }
    if self.item.rate_card.key != self.item_key {
      return Err(Error::validation(format!(
        "rate card {} cannot be added as item {}",
        self.item.rate_card.key, self.item_key
      )));
    }
    self.item.rate_card.validate()
  }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    let relation = PhaseRelation::editable(spec, &self.phase_key, now)?;
    let phase_cadence = spec.phase_cadence(&self.phase_key)?;
    let phase_start = phase_cadence.active_from;
    let what = format!("item {}/{}", self.phase_key, self.item_key);

    let mut item = self.item.clone();
    check_override(&item.overrides, phase_start, &what)?;
    pin_start_in_current_phase(&mut item.overrides, relation, phase_start, now, &what)?;
    let start = item.overrides.resolve_start(phase_start)?;
    if phase_cadence.has_ended_by(start) {
      return Err(Error::validation(format!("{what} would start after its phase ends")));
    }

    let phase = spec.phase_mut(&self.phase_key)?;
    let existing = phase.items.get_mut(&self.item_key);
    match (relation, existing) {
      (_, None) => {
        phase.items.insert(self.item_key.clone(), vec![item]);
      }
      (PhaseRelation::Current, Some(versions)) => {
        supersede_last(versions, start, phase_start, now, &what)?;
        versions.push(item);
      }
      (_, Some(_)) => {
        return Err(Error::conflict(format!(
          "{what} already exists; remove it before adding it again"
        )));
      }
    }
    Ok(())
  }
}

/// Make room for a new version starting at `start` by closing the latest one.
///
/// A latest version still running at `start` is cut back to end there. One
/// that already ended by `now` stays as it is. One scheduled to end between
/// `now` and `start` must be removed first.
fn supersede_last(
  versions: &mut [ItemSpec],
  start: DateTime<Utc>,
  phase_start: DateTime<Utc>,
  now: DateTime<Utc>,
  what: &str,
) -> Result<()> {
  let Some(last) = versions.last_mut() else { return Ok(()) };

  let last_start = last.overrides.resolve_start(phase_start)?;
  if start < last_start {
    return Err(Error::conflict(format!(
      "{what} has a version starting at {last_start}, after the new one"
    )));
  }
  match last.overrides.resolve_end(phase_start)? {
    Some(end) if end < start && end <= now => {}
    Some(end) if end < start => {
      return Err(Error::conflict(format!(
        "{what} is already scheduled to end at {end}; remove it before adding a version at {start}"
      )));
    }
    _ => {
      last.overrides.active_to_override = Some(Period::between(phase_start, start));
    }
  }
  Ok(())
}

/// Remove an item from a future phase, or end it now in the current phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveItem {
  pub phase_key: String,
  pub item_key:  String,
}

impl SpecPatch for RemoveItem {
  fn op(&self) -> PatchOp { PatchOp::Remove }

  fn path(&self) -> PatchPath { PatchPath::item(&self.phase_key, &self.item_key) }

  fn validate(&self) -> Result<()> {
    check_key("phase", &self.phase_key)?;
    check_key("item", &self.item_key)
  }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    let relation = PhaseRelation::editable(spec, &self.phase_key, now)?;
    let phase_start = spec.phase_cadence(&self.phase_key)?.active_from;
    let what = format!("item {}/{}", self.phase_key, self.item_key);

    let phase = spec.phase_mut(&self.phase_key)?;
    let Some(versions) = phase.items.get_mut(&self.item_key) else {
      return Err(Error::validation(format!("{what} not found")));
    };

    if relation == PhaseRelation::Future {
      versions.pop();
    } else {
      let mut discarded = false;
      while let Some(last) = versions.last() {
        if last.overrides.resolve_start(phase_start)? <= now {
          break;
        }
        versions.pop();
        discarded = true;
      }

      if let Some(last) = versions.last_mut() {
        match last.overrides.resolve_end(phase_start)? {
          Some(end) if end <= now && !discarded => {
            return Err(Error::conflict(format!("{what} is not active")));
          }
          Some(end) if end <= now => {}
          _ => {
            last.overrides.active_to_override = Some(Period::between(phase_start, now));
          }
        }
      }
    }

    if versions.is_empty() {
      phase.items.remove(&self.item_key);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tenure_core::ErrorKind;

  use super::*;
  use crate::fixtures::{at, ctx, rate_card, spec};

  fn add(phase: &str, key: &str) -> AddItem {
    AddItem {
      phase_key: phase.into(),
      item_key:  key.into(),
      item:      ItemSpec::new(phase, rate_card(key)),
    }
  }

  fn remove(phase: &str, key: &str) -> RemoveItem {
    RemoveItem { phase_key: phase.into(), item_key: key.into() }
  }

  #[test]
  fn remove_in_current_phase_closes_at_now() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    let now = at(2024, 1, 11);
    remove("trial", "seats").apply_to(&mut s, &ctx(now)).unwrap();

    let versions = &s.phases["trial"].items["seats"];
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].overrides.active_to_override, Some(Period::days(10)));
    s.validate().unwrap();
  }

  #[test]
  fn readding_after_remove_starts_no_earlier_than_the_removal() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    remove("trial", "seats").apply_to(&mut s, &ctx(at(2024, 1, 11))).unwrap();

    let later = at(2024, 1, 15);
    add("trial", "seats").apply_to(&mut s, &ctx(later)).unwrap();
    let versions = &s.phases["trial"].items["seats"];
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].overrides.active_from_override, Some(Period::days(14)));
    s.validate().unwrap();
  }

  #[test]
  fn add_in_current_phase_supersedes_open_version() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    add("trial", "seats").apply_to(&mut s, &ctx(at(2024, 1, 6))).unwrap();

    let versions = &s.phases["trial"].items["seats"];
    assert_eq!(versions[0].overrides.active_to_override, Some(Period::days(5)));
    assert_eq!(versions[1].overrides.active_from_override, Some(Period::days(5)));
    s.validate().unwrap();
  }

  #[test]
  fn add_in_current_phase_cuts_back_a_later_scheduled_end() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    s.phases.get_mut("trial").unwrap().items.get_mut("seats").unwrap()[0]
      .overrides
      .active_to_override = Some(Period::days(20));

    add("trial", "seats").apply_to(&mut s, &ctx(at(2024, 1, 11))).unwrap();

    let versions = &s.phases["trial"].items["seats"];
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].overrides.active_to_override, Some(Period::days(10)));
    assert_eq!(versions[1].overrides.active_from_override, Some(Period::days(10)));
    s.validate().unwrap();
  }

  #[test]
  fn add_in_current_phase_after_a_pending_end_is_a_conflict() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    s.phases.get_mut("trial").unwrap().items.get_mut("seats").unwrap()[0]
      .overrides
      .active_to_override = Some(Period::days(15));

    let mut patch = add("trial", "seats");
    patch.item.overrides.active_from_override = Some(Period::days(20));
    let err = patch.apply_to(&mut s, &ctx(at(2024, 1, 11))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("remove it before"), "{err}");
    assert_eq!(s.phases["trial"].items["seats"].len(), 1);
  }

  #[test]
  fn add_with_past_start_is_forbidden() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    let mut patch = add("trial", "storage");
    patch.item.overrides.active_from_override = Some(Period::days(2));
    let err = patch.apply_to(&mut s, &ctx(at(2024, 1, 6))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn add_to_future_phase_requires_absent_key() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    let now = at(2024, 1, 6);
    let err = add("default", "seats").apply_to(&mut s, &ctx(now)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    add("default", "storage").apply_to(&mut s, &ctx(now)).unwrap();
    assert!(s.phases["default"].items["storage"][0].overrides.active_from_override.is_none());
  }

  #[test]
  fn remove_from_future_phase_deletes_key() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    remove("default", "seats").apply_to(&mut s, &ctx(at(2024, 1, 6))).unwrap();
    assert!(!s.phases["default"].items.contains_key("seats"));
  }

  #[test]
  fn remove_unknown_item_is_a_validation_error() {
    let mut s = spec(&[("trial", 0)]);
    let err = remove("trial", "nope").apply_to(&mut s, &ctx(at(2024, 1, 6))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = remove("nope", "seats").apply_to(&mut s, &ctx(at(2024, 1, 6))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
  }

  #[test]
  fn removing_twice_is_a_conflict() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    remove("trial", "seats").apply_to(&mut s, &ctx(at(2024, 1, 6))).unwrap();
    let err = remove("trial", "seats").apply_to(&mut s, &ctx(at(2024, 1, 8))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
  }

  #[test]
  fn elapsed_phase_is_read_only() {
    let mut s = spec(&[("trial", 0), ("default", 1)]);
    let err = add("trial", "storage").apply_to(&mut s, &ctx(at(2024, 2, 6))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }

  #[test]
  fn mismatched_rate_card_key_fails_validation() {
    let mut patch = add("trial", "seats");
    patch.item_key = "storage".into();
    assert_eq!(patch.validate().unwrap_err().kind(), ErrorKind::Validation);
  }
}
