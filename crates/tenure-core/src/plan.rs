//! Read-only product-catalog input.
//!
//! A [`Plan`] seeds a new specification once, at creation time. Rate cards,
//! prices, entitlement templates and discounts are copied into the
//! specification and carry on independently of the plan afterwards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, period::Period};

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Identifies the plan a specification was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRef {
  pub key:     String,
  pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
  pub key:             String,
  pub version:         u32,
  pub name:            String,
  pub currency:        String,
  pub billing_cadence: Period,
  /// Phases in chronological order.
  pub phases:          Vec<PlanPhase>,
}

impl Plan {
  pub fn reference(&self) -> PlanRef {
    PlanRef { key: self.key.clone(), version: self.version }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
  pub key:         String,
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  /// Length of the phase. Only the last phase may be open-ended.
  #[serde(default)]
  pub duration:    Option<Period>,
  #[serde(default)]
  pub rate_cards:  Vec<RateCard>,
  #[serde(default)]
  pub discounts:   Vec<Discount>,
}

// ─── Rate cards ──────────────────────────────────────────────────────────────

/// One line of billable and/or entitlable content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
  pub key:                  String,
  pub name:                 String,
  #[serde(default)]
  pub description:          Option<String>,
  #[serde(default)]
  pub feature_key:          Option<String>,
  #[serde(default)]
  pub entitlement_template: Option<EntitlementTemplate>,
  #[serde(default)]
  pub price:                Option<Price>,
  /// How often the price is billed; absent for one-time charges.
  #[serde(default)]
  pub billing_cadence:      Option<Period>,
}

impl RateCard {
  pub fn validate(&self) -> Result<()> {
    if self.key.is_empty() {
      return Err(Error::validation("rate card key must not be empty"));
    }
    if self.entitlement_template.is_some() && self.feature_key.is_none() {
      return Err(Error::validation(format!(
        "rate card {} has an entitlement template but no feature",
        self.key
      )));
    }
    if let Some(EntitlementTemplate::Metered { usage_period, .. }) =
      &self.entitlement_template
    {
      if usage_period.is_zero() {
        return Err(Error::validation(format!(
          "rate card {} has an empty usage period",
          self.key
        )));
      }
    }
    if let Some(cadence) = &self.billing_cadence
      && cadence.is_zero()
    {
      return Err(Error::validation(format!(
        "rate card {} has an empty billing cadence",
        self.key
      )));
    }
    if let Some(price) = &self.price {
      price.validate().map_err(|e| {
        Error::validation(format!("rate card {}: {e}", self.key))
      })?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerm {
  #[default]
  InAdvance,
  InArrears,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Price {
  Flat {
    amount:       Decimal,
    #[serde(default)]
    payment_term: PaymentTerm,
  },
  Unit {
    amount: Decimal,
  },
}

impl Price {
  pub fn amount(&self) -> Decimal {
    match self {
      Self::Flat { amount, .. } | Self::Unit { amount } => *amount,
    }
  }

  fn validate(&self) -> Result<()> {
    if self.amount().is_sign_negative() {
      return Err(Error::validation("price amount must not be negative"));
    }
    Ok(())
  }
}

/// The shape of the entitlement granted for a rate card's feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntitlementTemplate {
  Boolean,
  Static {
    config: serde_json::Value,
  },
  Metered {
    usage_period:      Period,
    #[serde(default)]
    issue_after_reset: Option<Decimal>,
    #[serde(default)]
    is_soft_limit:     bool,
  },
}

// ─── Discounts ───────────────────────────────────────────────────────────────

/// A discount definition. An empty `rate_cards` list applies the discount to
/// every item of the phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discount {
  Percentage {
    percentage: Decimal,
    #[serde(default)]
    rate_cards: Vec<String>,
  },
  Usage {
    quantity:   Decimal,
    #[serde(default)]
    rate_cards: Vec<String>,
  },
}

impl Discount {
  pub fn rate_card_keys(&self) -> &[String] {
    match self {
      Self::Percentage { rate_cards, .. } | Self::Usage { rate_cards, .. } => {
        rate_cards
      }
    }
  }

  pub fn validate(&self) -> Result<()> {
    match self {
      Self::Percentage { percentage, .. } => {
        if percentage.is_sign_negative() || *percentage > Decimal::ONE_HUNDRED {
          return Err(Error::validation(format!(
            "discount percentage {percentage} is outside 0..=100"
          )));
        }
      }
      Self::Usage { quantity, .. } => {
        if quantity.is_sign_negative() || quantity.is_zero() {
          return Err(Error::validation(format!(
            "usage discount quantity {quantity} must be positive"
          )));
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn card(key: &str) -> RateCard {
    RateCard {
      key:                  key.into(),
      name:                 key.into(),
      description:          None,
      feature_key:          None,
      entitlement_template: None,
      price:                Some(Price::Unit { amount: Decimal::new(5, 1) }),
      billing_cadence:      Some(Period::months(1)),
    }
  }

  #[test]
  fn entitlement_template_requires_feature() {
    let mut rc = card("api_calls");
    rc.entitlement_template = Some(EntitlementTemplate::Boolean);
    assert!(rc.validate().is_err());
    rc.feature_key = Some("api".into());
    assert!(rc.validate().is_ok());
  }

  #[test]
  fn negative_price_is_rejected() {
    let mut rc = card("seats");
    rc.price = Some(Price::Flat {
      amount:       Decimal::new(-1, 0),
      payment_term: PaymentTerm::InAdvance,
    });
    assert!(rc.validate().is_err());
  }

  #[test]
  fn percentage_bounds() {
    let ok = Discount::Percentage {
      percentage: Decimal::new(25, 0),
      rate_cards: vec![],
    };
    assert!(ok.validate().is_ok());
    let too_much = Discount::Percentage {
      percentage: Decimal::new(101, 0),
      rate_cards: vec![],
    };
    assert!(too_much.validate().is_err());
  }

  #[test]
  fn discount_deserializes_from_tagged_json() {
    let d: Discount = serde_json::from_value(serde_json::json!({
      "type": "percentage",
      "percentage": "10",
      "rate_cards": ["seats"]
    }))
    .unwrap();
    assert_eq!(d.rate_card_keys(), ["seats".to_string()]);
  }
}
