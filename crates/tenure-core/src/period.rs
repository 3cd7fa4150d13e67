//! Signed ISO-8601 durations and anchor-relative arithmetic.
//!
//! A [`Period`] is never converted to a fixed number of seconds: months and
//! years only mean something relative to an anchor, so every comparison goes
//! through [`Period::add_to`].

use std::{
  cmp::Ordering,
  fmt,
  ops::{Add, Neg, Sub},
  str::FromStr,
};

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const SECONDS_PER_DAY: i64 = 86_400;

/// A signed calendar duration such as `P1M`, `-P2W` or `P1DT12H`.
///
/// Components are stored separately and may carry different signs after
/// arithmetic (e.g. `P1M` minus `P3D`). Serialised as its ISO-8601 string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
  years:   i64,
  months:  i64,
  weeks:   i64,
  days:    i64,
  hours:   i64,
  minutes: i64,
  seconds: i64,
}

impl Period {
  pub const ZERO: Period = Period {
    years:   0,
    months:  0,
    weeks:   0,
    days:    0,
    hours:   0,
    minutes: 0,
    seconds: 0,
  };

  pub const fn years(n: i64) -> Self { Self { years: n, ..Self::ZERO } }

  pub const fn months(n: i64) -> Self { Self { months: n, ..Self::ZERO } }

  pub const fn weeks(n: i64) -> Self { Self { weeks: n, ..Self::ZERO } }

  pub const fn days(n: i64) -> Self { Self { days: n, ..Self::ZERO } }

  pub const fn hours(n: i64) -> Self { Self { hours: n, ..Self::ZERO } }

  pub const fn minutes(n: i64) -> Self { Self { minutes: n, ..Self::ZERO } }

  pub const fn seconds(n: i64) -> Self { Self { seconds: n, ..Self::ZERO } }

  /// The exact distance from `from` to `to`, expressed in days and clock
  /// units so that `from + between(from, to) == to` at whole-second
  /// precision. Sub-second remainders round up.
  pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
    let delta = to - from;
    let mut total = delta.num_seconds();
    if delta.subsec_nanos() > 0 {
      total += 1;
    }
    Self {
      days: total / SECONDS_PER_DAY,
      hours: (total % SECONDS_PER_DAY) / 3_600,
      minutes: (total % 3_600) / 60,
      seconds: total % 60,
      ..Self::ZERO
    }
  }

  pub fn is_zero(&self) -> bool { *self == Self::ZERO }

  /// Resolve against `anchor`. Calendar components (years, months) are
  /// applied first, then the fixed-length ones.
  pub fn checked_add_to(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let months = self.years.checked_mul(12)?.checked_add(self.months)?;
    let shifted = if months >= 0 {
      anchor.checked_add_months(Months::new(u32::try_from(months).ok()?))?
    } else {
      anchor.checked_sub_months(Months::new(u32::try_from(-months).ok()?))?
    };

    let days = self.weeks.checked_mul(7)?.checked_add(self.days)?;
    let secs = days
      .checked_mul(SECONDS_PER_DAY)?
      .checked_add(self.hours.checked_mul(3_600)?)?
      .checked_add(self.minutes.checked_mul(60)?)?
      .checked_add(self.seconds)?;

    shifted.checked_add_signed(TimeDelta::try_seconds(secs)?)
  }

  /// Like [`Period::checked_add_to`], failing with a validation error on
  /// overflow.
  pub fn add_to(&self, anchor: DateTime<Utc>) -> Result<DateTime<Utc>> {
    self.checked_add_to(anchor).ok_or_else(|| {
      Error::validation(format!("period {self} overflows when added to {anchor}"))
    })
  }

  /// Compare two periods by where they land when both are added to `anchor`.
  pub fn cmp_at(&self, other: &Period, anchor: DateTime<Utc>) -> Result<Ordering> {
    Ok(self.add_to(anchor)?.cmp(&other.add_to(anchor)?))
  }

  /// True when this period moves `anchor` backwards.
  pub fn is_negative_at(&self, anchor: DateTime<Utc>) -> Result<bool> {
    Ok(self.add_to(anchor)? < anchor)
  }

  fn components(&self) -> [i64; 7] {
    [
      self.years,
      self.months,
      self.weeks,
      self.days,
      self.hours,
      self.minutes,
      self.seconds,
    ]
  }

  fn from_components(c: [i64; 7]) -> Self {
    Self {
      years:   c[0],
      months:  c[1],
      weeks:   c[2],
      days:    c[3],
      hours:   c[4],
      minutes: c[5],
      seconds: c[6],
    }
  }
}

// ─── Arithmetic ──────────────────────────────────────────────────────────────

impl Add for Period {
  type Output = Period;

  fn add(self, rhs: Period) -> Period {
    let (a, b) = (self.components(), rhs.components());
    Period::from_components(std::array::from_fn(|i| a[i] + b[i]))
  }
}

impl Neg for Period {
  type Output = Period;

  fn neg(self) -> Period {
    Period::from_components(self.components().map(|c| -c))
  }
}

impl Sub for Period {
  type Output = Period;

  fn sub(self, rhs: Period) -> Period { self + (-rhs) }
}

// ─── ISO-8601 text form ──────────────────────────────────────────────────────

const DATE_UNITS: [char; 4] = ['Y', 'M', 'W', 'D'];
const TIME_UNITS: [char; 3] = ['H', 'M', 'S'];

impl fmt::Display for Period {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_zero() {
      return f.write_str("PT0S");
    }

    let c = self.components();
    let all_non_positive = c.iter().all(|v| *v <= 0);
    let c = if all_non_positive {
      f.write_str("-")?;
      c.map(|v| -v)
    } else {
      c
    };

    f.write_str("P")?;
    for (value, unit) in c[..4].iter().zip(DATE_UNITS) {
      if *value != 0 {
        write!(f, "{value}{unit}")?;
      }
    }
    if c[4..].iter().any(|v| *v != 0) {
      f.write_str("T")?;
      for (value, unit) in c[4..].iter().zip(TIME_UNITS) {
        if *value != 0 {
          write!(f, "{value}{unit}")?;
        }
      }
    }
    Ok(())
  }
}

impl FromStr for Period {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let invalid = || Error::validation(format!("invalid ISO-8601 duration: {s:?}"));

    let (negative, rest) = match s.strip_prefix('-') {
      Some(rest) => (true, rest),
      None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let rest = rest.strip_prefix('P').ok_or_else(invalid)?;

    let mut components = [0i64; 7];
    let mut seen_any = false;
    // Index of the next component we may still fill; enforces ISO order.
    let mut next_slot = 0usize;
    let mut in_time = false;
    let mut number = String::new();

    for ch in rest.chars() {
      match ch {
        'T' if !in_time && number.is_empty() => {
          in_time = true;
          next_slot = next_slot.max(4);
        }
        '0'..='9' => number.push(ch),
        '-' if number.is_empty() => number.push(ch),
        unit => {
          let slot = if in_time {
            TIME_UNITS.iter().position(|u| *u == unit).map(|i| i + 4)
          } else {
            DATE_UNITS.iter().position(|u| *u == unit)
          }
          .ok_or_else(invalid)?;
          if slot < next_slot || number.is_empty() || number == "-" {
            return Err(invalid());
          }
          components[slot] = number.parse().map_err(|_| invalid())?;
          number.clear();
          next_slot = slot + 1;
          seen_any = true;
        }
      }
    }

    if !seen_any || !number.is_empty() {
      return Err(invalid());
    }

    let period = Period::from_components(components);
    Ok(if negative { -period } else { period })
  }
}

impl TryFrom<String> for Period {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { value.parse() }
}

impl From<Period> for String {
  fn from(value: Period) -> Self { value.to_string() }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
  }

  #[test]
  fn parses_and_formats_common_forms() {
    for text in ["P1M", "P2W", "P1Y2M", "P1DT12H", "PT30M", "-P3D", "PT0S"] {
      let p: Period = text.parse().unwrap();
      assert_eq!(p.to_string(), text);
    }
  }

  #[test]
  fn rejects_malformed_input() {
    for text in ["", "P", "1M", "PM", "P1X", "PT", "P1D2Y", "P1H"] {
      assert!(text.parse::<Period>().is_err(), "{text} should not parse");
    }
  }

  #[test]
  fn mixed_sign_components_survive_display() {
    let p = Period::months(1) - Period::days(3);
    assert_eq!(p.to_string(), "P1M-3D");
    assert_eq!(p.to_string().parse::<Period>().unwrap(), p);
  }

  #[test]
  fn months_are_calendar_aware() {
    let jan31 = at(2024, 1, 31);
    assert_eq!(Period::months(1).add_to(jan31).unwrap(), at(2024, 2, 29));
    assert_eq!(Period::months(-1).add_to(at(2024, 3, 31)).unwrap(), at(2024, 2, 29));
  }

  #[test]
  fn between_lands_exactly_on_target() {
    let from = at(2024, 1, 1);
    let to = Utc.with_ymd_and_hms(2024, 2, 13, 7, 5, 9).unwrap();
    let p = Period::between(from, to);
    assert_eq!(p.add_to(from).unwrap(), to);

    let back = Period::between(to, from);
    assert_eq!(back.add_to(to).unwrap(), from);
    assert!(back.is_negative_at(to).unwrap());
  }

  #[test]
  fn between_rounds_subseconds_up() {
    let from = at(2024, 1, 1);
    let to = from + TimeDelta::milliseconds(1_500);
    assert_eq!(Period::between(from, to), Period::seconds(2));
  }

  #[test]
  fn serde_uses_iso_string() {
    let json = serde_json::to_string(&Period::weeks(2)).unwrap();
    assert_eq!(json, "\"P2W\"");
    let back: Period = serde_json::from_str("\"-P1M\"").unwrap();
    assert_eq!(back, Period::months(-1));
    assert!(serde_json::from_str::<Period>("\"two weeks\"").is_err());
  }

  #[test]
  fn cmp_at_depends_on_anchor() {
    let month = Period::months(1);
    let thirty = Period::days(30);
    assert_eq!(month.cmp_at(&thirty, at(2024, 2, 1)).unwrap(), Ordering::Less);
    assert_eq!(month.cmp_at(&thirty, at(2024, 1, 1)).unwrap(), Ordering::Greater);
  }
}
