//! Integer satoshi amounts.
//!
//! Amounts never go through floating point except at the JSON boundary,
//! where the node reports decimal coins.

use crate::config::COIN;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::iter::Sum;
use std::ops::Add;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const ONE_COIN: Amount = Amount(COIN);

    pub const fn from_sat(sat: u64) -> Self {
        Amount(sat)
    }

    pub const fn to_sat(self) -> u64 {
        self.0
    }

    /// Convert a decimal coin value, rounding to the nearest satoshi.
    /// Negative, non-finite or out of range values are rejected.
    pub fn from_coins(coins: f64) -> Option<Self> {
        if !coins.is_finite() || coins < 0.0 {
            return None;
        }
        let sat = (coins * COIN as f64).round();
        if sat > u64::MAX as f64 {
            return None;
        }
        Some(Amount(sat as u64))
    }

    pub fn to_coins(self) -> f64 {
        self.0 as f64 / COIN as f64
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, self.0 % COIN)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_coins())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let coins = f64::deserialize(deserializer)?;
        Amount::from_coins(coins)
            .ok_or_else(|| SerdeError::custom(format!("invalid coin amount {}", coins)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_coins_rounds_to_satoshi() {
        assert_eq!(Amount::from_coins(1.0), Some(Amount::ONE_COIN));
        // 0.1 + 0.2 is not exact in binary
        assert_eq!(Amount::from_coins(0.1 + 0.2), Some(Amount::from_sat(30_000_000)));
        assert_eq!(Amount::from_coins(0.00000001), Some(Amount::from_sat(1)));
        assert_eq!(Amount::from_coins(-1.0), None);
        assert_eq!(Amount::from_coins(f64::NAN), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_sat(150_000_001).to_string(), "1.50000001");
        assert_eq!(Amount::ZERO.to_string(), "0.00000000");
    }

    #[test]
    fn test_json_boundary() {
        let amount: Amount = serde_json::from_str("49.99998").unwrap();
        assert_eq!(amount.to_sat(), 4_999_998_000);
        assert_eq!(serde_json::to_string(&Amount::ONE_COIN).unwrap(), "1.0");
        assert!(serde_json::from_str::<Amount>("-0.5").is_err());
    }

    #[test]
    fn test_saturating_sub() {
        let a = Amount::from_sat(5);
        assert_eq!(a.saturating_sub(Amount::from_sat(9)), Amount::ZERO);
        assert_eq!(a.checked_sub(Amount::from_sat(9)), None);
    }
}
