//! Structural paths addressing the node a patch edits.

use std::{fmt, str::FromStr};

use tenure_core::{Error, Result};

/// `/`, `/phases/{phase}`, `/phases/{phase}/items/{item}` or
/// `/phases/{phase}/discounts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatchPath {
  Subscription,
  Phase { phase: String },
  Item { phase: String, item: String },
  Discounts { phase: String },
}

impl PatchPath {
  pub fn phase(phase: &str) -> Self { Self::Phase { phase: phase.to_owned() } }

  pub fn item(phase: &str, item: &str) -> Self {
    Self::Item { phase: phase.to_owned(), item: item.to_owned() }
  }

  pub fn discounts(phase: &str) -> Self { Self::Discounts { phase: phase.to_owned() } }

  /// The phase key this path points into, if any.
  pub fn phase_key(&self) -> Option<&str> {
    match self {
      Self::Subscription => None,
      Self::Phase { phase } | Self::Item { phase, .. } | Self::Discounts { phase } => {
        Some(phase)
      }
    }
  }
}

/// Keys become path segments, so they must be non-empty and slash-free.
pub fn check_key(what: &str, key: &str) -> Result<()> {
  if key.is_empty() {
    return Err(Error::validation(format!("{what} key must not be empty")));
  }
  if key.contains('/') {
    return Err(Error::validation(format!("{what} key {key:?} must not contain '/'")));
  }
  Ok(())
}

impl fmt::Display for PatchPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Subscription => f.write_str("/"),
      Self::Phase { phase } => write!(f, "/phases/{phase}"),
      Self::Item { phase, item } => write!(f, "/phases/{phase}/items/{item}"),
      Self::Discounts { phase } => write!(f, "/phases/{phase}/discounts"),
    }
  }
}

impl FromStr for PatchPath {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let invalid = || Error::validation(format!("invalid patch path: {s:?}"));
    if s == "/" {
      return Ok(Self::Subscription);
    }

    let segments: Vec<&str> = s.strip_prefix('/').ok_or_else(invalid)?.split('/').collect();
    if segments.iter().any(|seg| seg.is_empty()) {
      return Err(invalid());
    }
    match segments.as_slice() {
      ["phases", phase] => Ok(Self::phase(phase)),
      ["phases", phase, "items", item] => Ok(Self::item(phase, item)),
      ["phases", phase, "discounts"] => Ok(Self::discounts(phase)),
      _ => Err(invalid()),
    }
  }
}
