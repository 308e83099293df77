//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Amounts are persisted and returned over the API as canonical strings, so
//! the JSON representation is a string rather than a float.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for fund accounting.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Build `mantissa * 10^-scale`, e.g. `from_parts(1, 2)` is 0.01.
    pub fn from_parts(mantissa: i64, scale: u32) -> Self {
        Decimal(RustDecimal::new(mantissa, scale))
    }

    /// Format the Decimal as a canonical string (no exponent, no trailing zeros).
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }

    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Multiplication that returns `None` on overflow.
    pub fn checked_mul(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    pub fn checked_add(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    /// Division that returns `None` for a zero divisor or on overflow.
    pub fn checked_div(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    /// Round to `digits` significant digits.
    pub fn round_significant(&self, digits: u32) -> Decimal {
        if self.is_zero() {
            return Decimal::zero();
        }
        self.0.round_sf(digits).map(Decimal).unwrap_or(*self)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<u64> for Decimal {
    fn from(value: u64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Decimal {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_string_strips_trailing_zeros() {
        let d = Decimal::from_str_canonical("100.500").unwrap();
        assert_eq!(d.to_canonical_string(), "100.5");
        assert_eq!(Decimal::from_str_canonical("250.00").unwrap().to_string(), "250");
    }

    #[test]
    fn test_json_is_string() {
        let d = Decimal::from_str_canonical("123.456").unwrap();
        let json = serde_json::to_value(d).unwrap();
        assert_eq!(json, serde_json::json!("123.456"));

        let back: Decimal = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_checked_div_by_zero() {
        let a = Decimal::from(10u64);
        assert_eq!(a.checked_div(Decimal::zero()), None);
        assert_eq!(a.checked_div(Decimal::from(4u64)).unwrap().to_string(), "2.5");
    }

    #[test]
    fn test_checked_mul_overflow() {
        let max = Decimal::new(RustDecimal::MAX);
        assert_eq!(max.checked_mul(Decimal::from(2u64)), None);
        assert_eq!(max.checked_add(Decimal::one()), None);
        assert_eq!(
            Decimal::from(6u64).checked_mul(Decimal::from_parts(5, 1)),
            Some(Decimal::from(3u64))
        );
    }

    #[test]
    fn test_round_significant() {
        let third = Decimal::one().checked_div(Decimal::from(3u64)).unwrap();
        assert_eq!(third.round_significant(4).to_string(), "0.3333");

        let big = Decimal::from_str_canonical("123456.789").unwrap();
        assert_eq!(big.round_significant(3).to_string(), "123000");
        assert_eq!(Decimal::zero().round_significant(15), Decimal::zero());
    }

    #[test]
    fn test_from_parts_and_sum() {
        let cent = Decimal::from_parts(1, 2);
        assert_eq!(cent.to_string(), "0.01");

        let total: Decimal = vec![cent, cent, Decimal::one()].into_iter().sum();
        assert_eq!(total.to_string(), "1.02");
    }
}
