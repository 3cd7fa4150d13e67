//! Error types for `tenure-core`.
//!
//! Every failure raised while validating or editing a specification belongs
//! to one of three kinds (see [`ErrorKind`]). Callers map kinds to responses
//! with [`Error::kind`] rather than by matching on messages.

use thiserror::Error;

use crate::state::{SubscriptionAction, SubscriptionStatus};

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  /// The request is structurally invalid. Retrying it unchanged never helps.
  Validation,
  /// The addressed entity does not exist, or already exists.
  Conflict,
  /// Well-formed and addressable, but it would rewrite history or violate a
  /// temporal rule.
  Forbidden,
  /// A collaborator (resource manager, store) failed.
  Internal,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("action {action} is not allowed for a subscription in state {state}")]
  ForbiddenAction {
    action: SubscriptionAction,
    state:  SubscriptionStatus,
  },

  /// A patch in a batch failed. The kind is the kind of `source`.
  #[error("patch {index} failed: {source}")]
  Patch {
    index:  usize,
    #[source]
    source: Box<Error>,
  },

  /// A dependent-resource manager failed during reconciliation.
  #[error("{resource} manager error: {source}")]
  Resource {
    resource: &'static str,
    #[source]
    source:   Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn conflict(msg: impl Into<String>) -> Self { Self::Conflict(msg.into()) }

  pub fn forbidden(msg: impl Into<String>) -> Self {
    Self::Forbidden(msg.into())
  }

  /// The category of this error. Wrapped patch errors report the kind of the
  /// underlying failure.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) | Self::Serialization(_) => ErrorKind::Validation,
      Self::Conflict(_) => ErrorKind::Conflict,
      Self::Forbidden(_) | Self::ForbiddenAction { .. } => ErrorKind::Forbidden,
      Self::Patch { source, .. } => source.kind(),
      Self::Resource { .. } => ErrorKind::Internal,
    }
  }

  /// Index of the failing patch, if this error came out of a batch.
  pub fn patch_index(&self) -> Option<usize> {
    match self {
      Self::Patch { index, .. } => Some(*index),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
