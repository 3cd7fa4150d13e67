//! Subscription status and the action graph gating top-level operations.
//!
//! ```text
//! inactive ──create──► active ──cancel──► canceled
//!                      │  ▲                  │
//!        update,       └──┘ ◄───continue─────┘
//!        change_addons
//!
//! scheduled ──delete──► (gone)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, cadence::Cadence};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
  /// Not started yet.
  Scheduled,
  Active,
  /// Running, with an end scheduled.
  Canceled,
  /// Ended, or never created.
  Inactive,
}

impl SubscriptionStatus {
  /// Derive the status of a subscription window at `at`.
  pub fn at(window: &Cadence, at: DateTime<Utc>) -> Self {
    if window.active_from > at {
      return Self::Scheduled;
    }
    match window.active_to {
      Some(to) if to <= at => Self::Inactive,
      Some(_) => Self::Canceled,
      None => Self::Active,
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionAction {
  Create,
  Update,
  ChangeAddons,
  Cancel,
  Continue,
  Delete,
}

/// The state a subscription ends up in after a permitted action. `None`
/// means the subscription no longer exists.
pub fn transition(
  state: SubscriptionStatus,
  action: SubscriptionAction,
) -> Result<Option<SubscriptionStatus>> {
  use SubscriptionAction as A;
  use SubscriptionStatus as S;

  match (state, action) {
    (S::Inactive, A::Create) => Ok(Some(S::Active)),
    (S::Active, A::Update | A::ChangeAddons) => Ok(Some(S::Active)),
    (S::Active, A::Cancel) => Ok(Some(S::Canceled)),
    (S::Canceled, A::Continue) => Ok(Some(S::Active)),
    (S::Scheduled, A::Delete) => Ok(None),
    (state, action) => Err(Error::ForbiddenAction { action, state }),
  }
}

/// Is `action` permitted in `state`?
pub fn can(state: SubscriptionStatus, action: SubscriptionAction) -> bool {
  transition(state, action).is_ok()
}

/// Actions permitted in `state`.
pub fn allowed_actions(state: SubscriptionStatus) -> Vec<SubscriptionAction> {
  use SubscriptionAction as A;
  [A::Create, A::Update, A::ChangeAddons, A::Cancel, A::Continue, A::Delete]
    .into_iter()
    .filter(|a| can(state, *a))
    .collect()
}
