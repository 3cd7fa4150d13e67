use tenure_core::{Error, Result, spec::Specification};

use crate::{ApplyContext, PatchOp, PatchPath, SpecPatch};

/// Drop every pending item edit of the current phase: versions that have
/// not started are discarded, and the running version loses its scheduled
/// end.
///
/// Future phases are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnscheduleEdit;

impl SpecPatch for UnscheduleEdit {
  fn op(&self) -> PatchOp { PatchOp::Unschedule }

  fn path(&self) -> PatchPath { PatchPath::Subscription }

  fn validate(&self) -> Result<()> { Ok(()) }

  fn apply_to(&self, spec: &mut Specification, ctx: &ApplyContext) -> Result<()> {
    let now = ctx.current_time;
    let Some(current) = spec.current_phase_at(now)? else {
      return Err(Error::conflict("subscription has no current phase"));
    };
    let key = current.key.clone();
    let phase_start = spec.phase_cadence(&key)?.active_from;

    let phase = spec.phase_mut(&key)?;
    for versions in phase.items.values_mut() {
      while let Some(last) = versions.last_mut() {
        if last.overrides.resolve_start(phase_start)? > now {
          versions.pop();
          continue;
        }
        let running = last
          .overrides
          .resolve_end(phase_start)?
          .is_none_or(|end| end > now);
        if running {
          last.overrides.active_to_override = None;
        }
        break;
      }
    }
    phase.items.retain(|_, versions| !versions.is_empty());
    Ok(())
  }
}
