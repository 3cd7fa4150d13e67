//! `(op, path, value)` encoding of patches.
//!
//! The path carries the keys, the value carries the rest. Decoding is keyed
//! on the path shape and the operation together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tenure_core::{
  Error, Result,
  cadence::CadenceOverride,
  period::Period,
  plan::{Discount, RateCard},
  spec::{DiscountSpec, ItemSpec},
};

use crate::{
  AddDiscount, AddItem, AddPhase, NewPhase, Patch, PatchOp, PatchPath, RemoveDiscount,
  RemoveItem, RemovePhase, RemovePhaseShifting, SpecPatch, StretchPhase, UnscheduleEdit,
};

/// The wire shape of one patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDocument {
  pub op:    PatchOp,
  pub path:  String,
  #[serde(default)]
  pub value: Value,
}

#[derive(Serialize, Deserialize)]
struct RemovePhaseBody {
  #[serde(default)]
  shift: RemovePhaseShifting,
}

#[derive(Serialize, Deserialize)]
struct StretchBody {
  duration: Period,
}

#[derive(Serialize, Deserialize)]
struct ItemBody {
  rate_card: RateCard,
  #[serde(default)]
  overrides: CadenceOverride,
}

#[derive(Serialize, Deserialize)]
struct AddDiscountBody {
  index:     usize,
  discount:  Discount,
  #[serde(default)]
  overrides: CadenceOverride,
}

#[derive(Serialize, Deserialize)]
struct RemoveDiscountBody {
  index: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  at:    Option<DateTime<Utc>>,
}

/// A missing value decodes like an empty object.
fn body<T: DeserializeOwned>(value: Value) -> Result<T> {
  let value = match value {
    Value::Null => Value::Object(Default::default()),
    other => other,
  };
  Ok(serde_json::from_value(value)?)
}

impl Patch {
  /// Decode a patch from its operation name, path and value.
  pub fn from_parts(op: &str, path: &str, value: Value) -> Result<Self> {
    let op: PatchOp = op
      .parse()
      .map_err(|_| Error::validation(format!("unknown patch operation {op:?}")))?;
    Self::decode(op, path.parse()?, value)
  }

  fn decode(op: PatchOp, path: PatchPath, value: Value) -> Result<Self> {
    let patch = match (path, op) {
      (PatchPath::Subscription, PatchOp::Unschedule) => Self::UnscheduleEdit(UnscheduleEdit),

      (PatchPath::Phase { phase }, PatchOp::Add) => {
        let phase_body: NewPhase = body(value)?;
        Self::AddPhase(AddPhase { phase_key: phase, phase: phase_body })
      }
      (PatchPath::Phase { phase }, PatchOp::Remove) => {
        let RemovePhaseBody { shift } = body(value)?;
        Self::RemovePhase(RemovePhase { phase_key: phase, shift })
      }
      (PatchPath::Phase { phase }, PatchOp::Stretch) => {
        let StretchBody { duration } = body(value)?;
        Self::StretchPhase(StretchPhase { phase_key: phase, duration })
      }

      (PatchPath::Item { phase, item }, PatchOp::Add) => {
        let ItemBody { rate_card, overrides } = body(value)?;
        let spec = ItemSpec { phase_key: phase.clone(), rate_card, overrides };
        Self::AddItem(AddItem { phase_key: phase, item_key: item, item: spec })
      }
      (PatchPath::Item { phase, item }, PatchOp::Remove) => {
        Self::RemoveItem(RemoveItem { phase_key: phase, item_key: item })
      }

      (PatchPath::Discounts { phase }, PatchOp::Add) => {
        let AddDiscountBody { index, discount, overrides } = body(value)?;
        let spec = DiscountSpec { phase_key: phase.clone(), discount, overrides };
        Self::AddDiscount(AddDiscount { phase_key: phase, index, discount: spec })
      }
      (PatchPath::Discounts { phase }, PatchOp::Remove) => {
        let RemoveDiscountBody { index, at } = body(value)?;
        Self::RemoveDiscount(RemoveDiscount { phase_key: phase, index, at })
      }

      (path, op) => {
        return Err(Error::validation(format!("operation {op} is not supported on {path}")));
      }
    };
    Ok(patch)
  }

  /// Encode into the document form accepted by [`Patch::from_parts`].
  pub fn to_document(&self) -> Result<PatchDocument> {
    let value = match self {
      Self::UnscheduleEdit(_) | Self::RemoveItem(_) => Value::Null,
      Self::AddPhase(p) => serde_json::to_value(&p.phase)?,
      Self::RemovePhase(p) => serde_json::to_value(RemovePhaseBody { shift: p.shift })?,
      Self::StretchPhase(p) => serde_json::to_value(StretchBody { duration: p.duration })?,
      Self::AddItem(p) => serde_json::to_value(ItemBody {
        rate_card: p.item.rate_card.clone(),
        overrides: p.item.overrides,
      })?,
      Self::AddDiscount(p) => serde_json::to_value(AddDiscountBody {
        index:     p.index,
        discount:  p.discount.discount.clone(),
        overrides: p.discount.overrides,
      })?,
      Self::RemoveDiscount(p) => serde_json::to_value(RemoveDiscountBody {
        index: p.index,
        at:    p.at,
      })?,
    };
    Ok(PatchDocument { op: self.op(), path: self.path().to_string(), value })
  }
}

impl TryFrom<PatchDocument> for Patch {
  type Error = Error;

  fn try_from(doc: PatchDocument) -> Result<Self> {
    Self::decode(doc.op, doc.path.parse()?, doc.value)
  }
}

impl Serialize for Patch {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    self
      .to_document()
      .map_err(serde::ser::Error::custom)?
      .serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Patch {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let doc = PatchDocument::deserialize(deserializer)?;
    Patch::try_from(doc).map_err(serde::de::Error::custom)
  }
}
