//! Fixed-point asset amounts with eight decimal places.

use crate::{CoreError, CoreResult};
use appchain_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

/// An amount stored as `value * 10^8` in an `i64`.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fixed8(i64);

impl Fixed8 {
    pub const DECIMALS: i64 = 100_000_000;
    pub const ZERO: Fixed8 = Fixed8(0);
    pub const ONE: Fixed8 = Fixed8(Self::DECIMALS);
    pub const MAX: Fixed8 = Fixed8(i64::MAX);

    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Whole units, e.g. `Fixed8::from_units(3)` is `3.00000000`.
    pub fn from_units(units: i64) -> CoreResult<Self> {
        units
            .checked_mul(Self::DECIMALS)
            .map(Self)
            .ok_or(CoreError::Overflow)
    }

    #[must_use]
    pub const fn raw(&self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Multiplies two fixed-point values, keeping eight decimals.
    pub fn checked_mul(self, other: Self) -> Option<Self> {
        let product = (self.0 as i128).checked_mul(other.0 as i128)? / Self::DECIMALS as i128;
        i64::try_from(product).ok().map(Self)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl Add for Fixed8 {
    type Output = Fixed8;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Sub for Fixed8 {
    type Output = Fixed8;

    fn sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Neg for Fixed8 {
    type Output = Fixed8;

    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl Sum for Fixed8 {
    fn sum<I: Iterator<Item = Fixed8>>(iter: I) -> Self {
        iter.fold(Fixed8::ZERO, |acc, v| acc + v)
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let int = abs / Self::DECIMALS as u64;
        let frac = abs % Self::DECIMALS as u64;
        if frac == 0 {
            write!(f, "{sign}{int}")
        } else {
            let frac = format!("{frac:08}");
            write!(f, "{sign}{int}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl fmt::Debug for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serializable for Fixed8 {
    fn size(&self) -> usize {
        8
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_i64(self.0);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self(reader.read_i64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Fixed8::from_units(3).unwrap().to_string(), "3");
        assert_eq!(Fixed8::from_raw(150_000_000).to_string(), "1.5");
        assert_eq!(Fixed8::from_raw(-1).to_string(), "-0.00000001");
    }

    #[test]
    fn test_checked_mul() {
        let price = Fixed8::from_raw(50_000_000); // 0.5
        let limit = Fixed8::from_units(10).unwrap();
        assert_eq!(price.checked_mul(limit), Some(Fixed8::from_units(5).unwrap()));
        assert_eq!(Fixed8::MAX.checked_mul(Fixed8::from_units(2).unwrap()), None);
    }

    #[test]
    fn test_sum_and_overflow() {
        let total: Fixed8 = [Fixed8::ONE, Fixed8::ONE].into_iter().sum();
        assert_eq!(total, Fixed8::from_units(2).unwrap());
        assert!(Fixed8::MAX.checked_add(Fixed8::ONE).is_none());
        assert!(Fixed8::from_units(i64::MAX).is_err());
    }
}
