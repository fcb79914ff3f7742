//! Chain work calculation for determining the best chain
//!
//! This module decodes compact difficulty targets and accumulates the
//! resulting proof of work. Values are arbitrary precision so that no
//! compact encoding can overflow, and are persisted as fixed-width hex.

use std::fmt;
use std::ops::Add;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ChainWorkError;

/// Width in hex characters of a serialized chainwork value.
pub const CHAIN_WORK_HEX_LEN: usize = 64;

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Cumulative proof of work, an arbitrary precision non-negative integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChainWork(BigUint);

impl ChainWork {
    /// Create a new ChainWork with zero work
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// Work contributed by a single header with the given compact bits.
    pub fn from_bits(bits: u32) -> Self {
        work_from_bits(bits)
    }

    /// Add the work of one more header to this cumulative value.
    pub fn accumulate(&self, bits: u32) -> Self {
        accumulate_work(self, bits)
    }

    /// Check if this work is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Serialize as 64 lowercase hex characters, zero padded on the left.
    pub fn to_hex(&self) -> String {
        let encoded = if self.0.is_zero() {
            String::new()
        } else {
            hex::encode(self.0.to_bytes_be())
        };
        let trimmed = encoded.trim_start_matches('0');
        format!("{:0>width$}", trimmed, width = CHAIN_WORK_HEX_LEN)
    }

    /// Create ChainWork from a hex string
    pub fn from_hex(value: &str) -> Result<Self, ChainWorkError> {
        let digits = value.strip_prefix("0x").unwrap_or(value);

        if digits.is_empty() {
            return Err(ChainWorkError::InvalidHex {
                value: value.to_string(),
                reason: "empty string".to_string(),
            });
        }

        let bytes = hex::decode(digits).map_err(|e| ChainWorkError::InvalidHex {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self(BigUint::from_bytes_be(&bytes)))
    }
}

impl From<BigUint> for ChainWork {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl From<u64> for ChainWork {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl Add for ChainWork {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl<'a> Add<&'a ChainWork> for &'a ChainWork {
    type Output = ChainWork;

    fn add(self, other: &'a ChainWork) -> ChainWork {
        ChainWork(&self.0 + &other.0)
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ChainWork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainWork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        ChainWork::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Decode a compact ("nBits") target into a signed integer.
///
/// The high byte is the size in bytes of the target, the low 23 bits are the
/// mantissa and bit 23 is the sign.
pub fn compact_to_target(bits: u32) -> BigInt {
    let exponent = bits >> 24;
    let mantissa = bits & MANTISSA_MASK;

    let magnitude = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3) as usize)
    };

    let sign = if bits & SIGN_BIT != 0 {
        Sign::Minus
    } else {
        Sign::Plus
    };

    BigInt::from_biguint(sign, magnitude)
}

/// Work represented by a target: `2^256 / (target + 1)`, or zero when the
/// target is not positive.
pub fn target_to_work(target: &BigInt) -> ChainWork {
    match target.to_biguint() {
        Some(target) if !target.is_zero() => {
            let numerator = BigUint::one() << 256usize;
            ChainWork(numerator / (target + BigUint::one()))
        }
        _ => ChainWork::zero(),
    }
}

/// Work of a single header with the given compact bits.
pub fn work_from_bits(bits: u32) -> ChainWork {
    target_to_work(&compact_to_target(bits))
}

/// `total + work(bits)`.
pub fn accumulate_work(total: &ChainWork, bits: u32) -> ChainWork {
    total + &work_from_bits(bits)
}
