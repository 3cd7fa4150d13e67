//! Error type for `tenure-sync`.

use tenure_core::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] tenure_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("subscription not found: {0}")]
  NotFound(Uuid),
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      Self::Store(_) => ErrorKind::Internal,
      Self::NotFound(_) => ErrorKind::Conflict,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
