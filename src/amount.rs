// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Arbitrary-precision signed amounts.
//!
//! Amounts are persisted and exchanged as canonical hexadecimal strings:
//! a `0x` prefix followed by the lowercase magnitude with no leading zeros
//! (`0x0` for zero). Negative values carry a leading `-`.
//!
//! # Example
//!
//! ```
//! use mortgage_ledger::Amount;
//!
//! let amount: Amount = "0x64".parse().unwrap();
//! assert_eq!(amount, Amount::from(100u64));
//! assert_eq!(amount.to_hex(), "0x64");
//! ```

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, Zero};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Errors from decoding an amount string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("hex amount must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("hex amount has no digits: {0}")]
    NoDigits(String),

    #[error("hex amount has leading zero digits: {0}")]
    LeadingZero(String),

    #[error("invalid digit in amount: {0}")]
    InvalidDigit(String),

    #[error("zero must not carry a sign: {0}")]
    SignedZero(String),
}

/// Signed, arbitrary-precision integer amount.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(BigInt);

impl Amount {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// Encodes as canonical `0x` hex.
    pub fn to_hex(&self) -> String {
        let digits = self.0.magnitude().to_str_radix(16);
        if self.0.sign() == Sign::Minus {
            format!("-0x{digits}")
        } else {
            format!("0x{digits}")
        }
    }

    /// Decodes a canonical `0x` hex string.
    ///
    /// Upper and lower case digits are accepted. Leading zero digits are
    /// rejected so every value has exactly one encoding.
    pub fn from_hex(input: &str) -> Result<Self, AmountError> {
        if input.is_empty() {
            return Err(AmountError::Empty);
        }
        let (negative, unsigned) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        let digits = unsigned
            .strip_prefix("0x")
            .or_else(|| unsigned.strip_prefix("0X"))
            .ok_or_else(|| AmountError::MissingPrefix(input.to_owned()))?;
        if digits.is_empty() {
            return Err(AmountError::NoDigits(input.to_owned()));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(AmountError::LeadingZero(input.to_owned()));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AmountError::InvalidDigit(input.to_owned()));
        }
        let magnitude = BigUint::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| AmountError::InvalidDigit(input.to_owned()))?;
        if negative && magnitude.is_zero() {
            return Err(AmountError::SignedZero(input.to_owned()));
        }
        let sign = if negative { Sign::Minus } else { Sign::Plus };
        Ok(Self(BigInt::from_biguint(sign, magnitude)))
    }
}

impl From<BigInt> for Amount {
    fn from(value: BigInt) -> Self {
        Self(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value))
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(BigInt::from(value))
    }
}

/// Accepts `0x` hex or plain decimal.
impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unsigned = s.strip_prefix('-').unwrap_or(s);
        if unsigned.starts_with("0x") || unsigned.starts_with("0X") {
            return Self::from_hex(s);
        }
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidDigit(s.to_owned()));
        }
        BigInt::from_str(s)
            .map(Self)
            .map_err(|_| AmountError::InvalidDigit(s.to_owned()))
    }
}

/// Displays in decimal.
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl Sub<&Amount> for &Amount {
    type Output = Amount;

    fn sub(self, rhs: &Amount) -> Amount {
        Amount(&self.0 - &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl SubAssign<&Amount> for Amount {
    fn sub_assign(&mut self, rhs: &Amount) {
        self.0 -= &rhs.0;
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Amount::from_hex(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding_is_canonical() {
        assert_eq!(Amount::zero().to_hex(), "0x0");
        assert_eq!(Amount::from(255u64).to_hex(), "0xff");
        assert_eq!(Amount::from(-16i64).to_hex(), "-0x10");
    }

    #[test]
    fn hex_decoding_accepts_either_case() {
        assert_eq!(Amount::from_hex("0xFF").unwrap(), Amount::from(255u64));
        assert_eq!(Amount::from_hex("0Xff").unwrap(), Amount::from(255u64));
        assert_eq!(Amount::from_hex("-0x10").unwrap(), Amount::from(-16i64));
    }

    #[test]
    fn hex_decoding_rejects_malformed_input() {
        assert_eq!(Amount::from_hex(""), Err(AmountError::Empty));
        assert!(matches!(Amount::from_hex("ff"), Err(AmountError::MissingPrefix(_))));
        assert!(matches!(Amount::from_hex("0x"), Err(AmountError::NoDigits(_))));
        assert!(matches!(Amount::from_hex("0x01"), Err(AmountError::LeadingZero(_))));
        assert!(matches!(Amount::from_hex("0xzz"), Err(AmountError::InvalidDigit(_))));
        assert!(matches!(Amount::from_hex("0x1_0"), Err(AmountError::InvalidDigit(_))));
    }

    #[test]
    fn zero_has_a_single_encoding() {
        assert_eq!(Amount::zero().to_hex(), "0x0");
        assert_eq!(Amount::from_hex("0x0").unwrap(), Amount::zero());
        assert!(matches!(Amount::from_hex("-0x0"), Err(AmountError::SignedZero(_))));
        assert!(matches!("-0x0".parse::<Amount>(), Err(AmountError::SignedZero(_))));
    }

    #[test]
    fn values_beyond_u128_survive_hex() {
        let big: Amount = "340282366920938463463374607431768211456000".parse().unwrap();
        let decoded = Amount::from_hex(&big.to_hex()).unwrap();
        assert_eq!(decoded, big);
    }

    #[test]
    fn parse_accepts_decimal_and_hex() {
        assert_eq!("100".parse::<Amount>().unwrap(), Amount::from(100u64));
        assert_eq!("0x64".parse::<Amount>().unwrap(), Amount::from(100u64));
        assert_eq!("-5".parse::<Amount>().unwrap(), Amount::from(-5i64));
        assert!("12.5".parse::<Amount>().is_err());
        assert!("-".parse::<Amount>().is_err());
    }

    #[test]
    fn arithmetic_by_reference() {
        let a = Amount::from(100u64);
        let b = Amount::from(40u64);
        assert_eq!(&a - &b, Amount::from(60u64));
        assert_eq!(&b - &a, Amount::from(-60i64));
        let mut acc = Amount::zero();
        acc += &a;
        acc -= &b;
        assert_eq!(acc, Amount::from(60u64));
    }

    #[test]
    fn serde_uses_hex_strings() {
        let json = serde_json::to_string(&Amount::from(60u64)).unwrap();
        assert_eq!(json, "\"0x3c\"");
        let parsed: Amount = serde_json::from_str("\"0x3c\"").unwrap();
        assert_eq!(parsed, Amount::from(60u64));
        assert!(serde_json::from_str::<Amount>("\"60\"").is_err());
    }
}
