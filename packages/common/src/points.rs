use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::Sign;
use serde::{Deserialize, Serialize};

/// Number of decimal places points are kept at.
pub const POINTS_SCALE: i64 = 2;

/// Largest value a single rubric entry may carry.
pub const MAX_RUBRIC_POINTS: &str = "9999.99";

/// Fixed-precision point value, always held at two decimal places.
///
/// Arithmetic is exact decimal arithmetic; equality and ordering compare
/// numeric value, so `10.0` and `10.00` are equal.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(BigDecimal);

impl Points {
    pub fn zero() -> Self {
        Self(BigDecimal::from(0).with_scale(POINTS_SCALE))
    }

    /// Wrap a decimal, rejecting values with more than two decimal places.
    pub fn from_decimal(value: BigDecimal) -> Result<Self, PointsError> {
        let (_, exponent) = value.normalized().as_bigint_and_exponent();
        if exponent > POINTS_SCALE {
            return Err(PointsError::TooPrecise(value.to_string()));
        }
        Ok(Self(value.with_scale(POINTS_SCALE)))
    }

    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < BigDecimal::from(0)
    }

    /// Check that the value is usable as a rubric weight.
    pub fn validate_rubric_range(&self) -> Result<(), PointsError> {
        let max = Points::from_str(MAX_RUBRIC_POINTS)?;
        if self.is_negative() || *self > max {
            return Err(PointsError::OutOfRange(self.to_string()));
        }
        Ok(())
    }
}

impl Default for Points {
    fn default() -> Self {
        Self::zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PointsError {
    #[error("invalid point value '{0}'")]
    Invalid(String),
    #[error("point value '{0}' has more than two decimal places")]
    TooPrecise(String),
    #[error("point value {0} is outside 0.00..={MAX_RUBRIC_POINTS}")]
    OutOfRange(String),
}

impl FromStr for Points {
    type Err = PointsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value =
            BigDecimal::from_str(s.trim()).map_err(|_| PointsError::Invalid(s.to_string()))?;
        Self::from_decimal(value)
    }
}

impl From<i64> for Points {
    fn from(value: i64) -> Self {
        Self(BigDecimal::from(value).with_scale(POINTS_SCALE))
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, rhs: Points) -> Points {
        Points((self.0 + rhs.0).with_scale(POINTS_SCALE))
    }
}

impl<'a> Add<&'a Points> for &'a Points {
    type Output = Points;

    fn add(self, rhs: &'a Points) -> Points {
        Points((&self.0 + &rhs.0).with_scale(POINTS_SCALE))
    }
}

impl AddAssign<&Points> for Points {
    fn add_assign(&mut self, rhs: &Points) {
        *self = &*self + rhs;
    }
}

impl Sum for Points {
    fn sum<I: Iterator<Item = Points>>(iter: I) -> Self {
        iter.fold(Points::zero(), |acc, p| acc + p)
    }
}

impl<'a> Sum<&'a Points> for Points {
    fn sum<I: Iterator<Item = &'a Points>>(iter: I) -> Self {
        iter.fold(Points::zero(), |acc, p| &acc + p)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cents, _) = self.0.with_scale(POINTS_SCALE).into_bigint_and_exponent();
        let digits = format!("{:0>3}", cents.magnitude());
        let (whole, fraction) = digits.split_at(digits.len() - POINTS_SCALE as usize);
        let sign = if cents.sign() == Sign::Minus { "-" } else { "" };
        write!(f, "{sign}{whole}.{fraction}")
    }
}

impl fmt::Debug for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Points({self})")
    }
}

impl Serialize for Points {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Points::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Points {
        s.parse().unwrap()
    }

    #[test]
    fn sum_is_exact() {
        let total: Points = [p("10.00"), p("0.01")].into_iter().sum();
        assert_eq!(total.to_string(), "10.01");

        let many: Points = std::iter::repeat_n(p("0.10"), 3).sum();
        assert_eq!(many, p("0.30"));
        assert_eq!(many.to_string(), "0.30");
    }

    #[test]
    fn display_always_has_two_decimals() {
        assert_eq!(Points::zero().to_string(), "0.00");
        assert_eq!(p("7").to_string(), "7.00");
        assert_eq!(Points::from(3).to_string(), "3.00");
        assert_eq!((p("0") + p("0.00")).to_string(), "0.00");
        assert_eq!(p("0.05").to_string(), "0.05");
        assert_eq!(p("-12.5").to_string(), "-12.50");
        assert_eq!(serde_json::to_string(&Points::zero()).unwrap(), "\"0.00\"");
    }

    #[test]
    fn equality_is_numeric() {
        assert_eq!(p("10.0"), p("10.00"));
        assert!(p("4.00") > p("3.99"));
    }

    #[test]
    fn rejects_extra_precision() {
        assert!(matches!(
            "1.005".parse::<Points>(),
            Err(PointsError::TooPrecise(_))
        ));
        assert!(matches!("abc".parse::<Points>(), Err(PointsError::Invalid(_))));
        assert!(p("1.500").to_string() == "1.50");
    }

    #[test]
    fn rubric_range() {
        assert!(p("0").validate_rubric_range().is_ok());
        assert!(p("9999.99").validate_rubric_range().is_ok());
        assert!(p("10000").validate_rubric_range().is_err());
        assert!(p("-0.01").validate_rubric_range().is_err());
    }

    #[test]
    fn serde_uses_strings() {
        let json = serde_json::to_string(&p("2.5")).unwrap();
        assert_eq!(json, "\"2.50\"");
        let back: Points = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("2.50"));
    }
}
