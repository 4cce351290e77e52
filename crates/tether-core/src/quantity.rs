//! Fixed-point resource quantities.
//!
//! A [`Quantity`] is a non-negative amount of some resource, stored in
//! milli-units: CPU quantities count millicores, memory and storage count
//! bytes (whole units, milli precision unused in practice). The parser
//! accepts the unit-suffixed decimal notation agents advertise with:
//!
//! - `m` — milli-units (`500m` is half a core)
//! - no suffix — whole units (`2`, `0.5`)
//! - `k`, `M`, `G`, `T` — decimal multiples
//! - `Ki`, `Mi`, `Gi`, `Ti` — binary multiples (`1Gi` is 2^30 bytes)
//!
//! Values finer than a milli-unit are rejected rather than rounded, so
//! parse/display round-trips are exact and quantities compare by value:
//! `1Gi == 1024Mi`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

const MILLI: i128 = 1000;

const KIB: i128 = 1 << 10;
const MIB: i128 = 1 << 20;
const GIB: i128 = 1 << 30;
const TIB: i128 = 1 << 40;

/// A non-negative fixed-point resource quantity in milli-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    /// The zero quantity.
    pub const ZERO: Self = Self { millis: 0 };

    /// Creates a quantity from a raw milli-unit count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] if `millis` is negative.
    pub fn from_millis(millis: i64) -> Result<Self> {
        if millis < 0 {
            return Err(Error::InvalidQuantity(format!(
                "quantity must be non-negative, got {millis}m"
            )));
        }
        Ok(Self { millis })
    }

    /// Returns the raw milli-unit count.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.millis
    }

    /// Returns the value in whole units as a float (for scoring only;
    /// all accounting stays in integer millis).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_units_f64(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    /// Returns true if this quantity is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Returns true if this quantity is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.millis > 0
    }

    /// Adds two quantities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] on overflow.
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        self.millis
            .checked_add(other.millis)
            .map(|millis| Self { millis })
            .ok_or_else(|| {
                Error::InvalidQuantity(format!("quantity overflow adding {other} to {self}"))
            })
    }

    /// Subtracts `other` from this quantity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuantity`] if the result would be negative.
    pub fn checked_sub(&self, other: &Self) -> Result<Self> {
        if other.millis > self.millis {
            return Err(Error::InvalidQuantity(format!(
                "cannot subtract {other} from smaller quantity {self}"
            )));
        }
        Ok(Self {
            millis: self.millis - other.millis,
        })
    }

    /// Subtracts `other`, clamping at zero instead of failing.
    ///
    /// Only the availability computation uses this; accounting paths go
    /// through [`Quantity::checked_sub`].
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            millis: (self.millis - other.millis).max(0),
        }
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidQuantity("empty quantity string".to_string()));
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);

        // Multiplier in milli-units per parsed unit.
        let multiplier: i128 = match suffix {
            "m" => 1,
            "" => MILLI,
            "k" => MILLI * 1_000,
            "M" => MILLI * 1_000_000,
            "G" => MILLI * 1_000_000_000,
            "T" => MILLI * 1_000_000_000_000,
            "Ki" => MILLI * KIB,
            "Mi" => MILLI * MIB,
            "Gi" => MILLI * GIB,
            "Ti" => MILLI * TIB,
            other => {
                return Err(Error::InvalidQuantity(format!(
                    "unknown unit suffix '{other}' in '{s}'"
                )));
            }
        };

        let (digits, scale) = parse_decimal(number, s)?;

        // value = digits / 10^scale, in suffix units.
        let scaled = digits
            .checked_mul(multiplier)
            .ok_or_else(|| Error::InvalidQuantity(format!("quantity out of range: '{s}'")))?;
        let divisor = 10_i128
            .checked_pow(scale)
            .ok_or_else(|| Error::InvalidQuantity(format!("quantity out of range: '{s}'")))?;
        if scaled % divisor != 0 {
            return Err(Error::InvalidQuantity(format!(
                "'{s}' is finer than milli-unit precision"
            )));
        }

        let millis = scaled / divisor;
        let millis = i64::try_from(millis)
            .map_err(|_| Error::InvalidQuantity(format!("quantity out of range: '{s}'")))?;
        Self::from_millis(millis)
    }
}

/// Parses a plain decimal into `(digits, scale)` where the value is
/// `digits / 10^scale`.
fn parse_decimal(number: &str, original: &str) -> Result<(i128, u32)> {
    if number.is_empty() {
        return Err(Error::InvalidQuantity(format!(
            "missing numeric value in '{original}'"
        )));
    }
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::InvalidQuantity(format!(
            "missing numeric value in '{original}'"
        )));
    }
    if number.matches('.').count() > 1 {
        return Err(Error::InvalidQuantity(format!(
            "malformed number in '{original}'"
        )));
    }

    let mut digits: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        let d = c
            .to_digit(10)
            .ok_or_else(|| Error::InvalidQuantity(format!("malformed number in '{original}'")))?;
        digits = digits
            .checked_mul(10)
            .and_then(|v| v.checked_add(i128::from(d)))
            .ok_or_else(|| Error::InvalidQuantity(format!("quantity out of range: '{original}'")))?;
    }

    let scale = u32::try_from(frac_part.len())
        .map_err(|_| Error::InvalidQuantity(format!("malformed number in '{original}'")))?;
    Ok((digits, scale))
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis == 0 {
            return write!(f, "0");
        }
        if self.millis % 1000 != 0 {
            return write!(f, "{}m", self.millis);
        }
        let units = i128::from(self.millis) / MILLI;
        for (factor, suffix) in [(TIB, "Ti"), (GIB, "Gi"), (MIB, "Mi"), (KIB, "Ki")] {
            if units % factor == 0 {
                return write!(f, "{}{}", units / factor, suffix);
            }
        }
        write!(f, "{units}")
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().expect(s)
    }

    #[test]
    fn parses_milli_and_unit_forms() {
        assert_eq!(q("500m").millis(), 500);
        assert_eq!(q("2").millis(), 2000);
        assert_eq!(q("0").millis(), 0);
        assert_eq!(q("0.5").millis(), 500);
        assert_eq!(q("1.5").millis(), 1500);
    }

    #[test]
    fn parses_decimal_suffixes() {
        assert_eq!(q("1k").millis(), 1_000_000);
        assert_eq!(q("2M").millis(), 2_000_000_000);
        assert_eq!(q("1G").millis(), 1_000_000_000_000);
    }

    #[test]
    fn parses_binary_suffixes() {
        assert_eq!(q("1Ki").millis(), 1024 * 1000);
        assert_eq!(q("1Mi").millis(), (1 << 20) * 1000);
        assert_eq!(q("1Gi").millis(), (1i64 << 30) * 1000);
        assert_eq!(q("1.5Gi").millis(), (1i64 << 30) * 1500);
        assert_eq!(q("8Ti").millis(), (1i64 << 40) * 8 * 1000);
    }

    #[test]
    fn binary_and_decimal_forms_compare_by_value() {
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert_eq!(q("4000m"), q("4"));
        assert!(q("1G") < q("1Gi"));
    }

    #[test]
    fn rejects_malformed_input() {
        for s in ["", "  ", "abc", "1X", "--2", "1.2.3", "1..", "500mm", "-1"] {
            assert!(s.parse::<Quantity>().is_err(), "should reject '{s}'");
        }
    }

    #[test]
    fn rejects_sub_milli_precision() {
        assert!("0.0001".parse::<Quantity>().is_err());
        assert!("1.5m".parse::<Quantity>().is_err());
    }

    #[test]
    fn checked_sub_rejects_negative_result() {
        let err = q("1Gi").checked_sub(&q("2Gi")).unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity(_)));
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        assert_eq!(q("500m").saturating_sub(&q("2")), Quantity::ZERO);
        assert_eq!(q("3").saturating_sub(&q("1")), q("2"));
    }

    #[test]
    fn checked_add_accumulates() {
        assert_eq!(q("500m").checked_add(&q("500m")).unwrap(), q("1"));
        assert_eq!(q("1Gi").checked_add(&q("1Gi")).unwrap(), q("2Gi"));
    }

    #[test]
    fn display_round_trips() {
        for s in ["0", "500m", "2", "4000m", "1Gi", "1024Mi", "10Gi", "3Ti", "1500m"] {
            let parsed = q(s);
            let redisplayed: Quantity = parsed.to_string().parse().unwrap();
            assert_eq!(parsed, redisplayed, "round-trip of '{s}'");
        }
    }

    #[test]
    fn display_prefers_binary_suffix_when_exact() {
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("2500m").to_string(), "2500m");
        assert_eq!(q("4").to_string(), "4");
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&q("1Gi")).unwrap();
        assert_eq!(json, "\"1Gi\"");
        let back: Quantity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q("1Gi"));
    }
}
