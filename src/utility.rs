//! Utility functions useful throughout the codebase.

use bitvec::{order::Msb0, slice::BitSlice, vec::BitVec};
use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};
use serde::{Deserialize, Deserializer, Serializer};
use z3::{ast::BV, Model};

/// Converts `value` into a bit-vector of the given `width` using two's
/// complement, wrapping values that do not fit.
#[must_use]
pub fn bigint_to_bv(value: &BigInt, width: u32) -> BV {
    let modulus = BigInt::one() << width;
    let mut wrapped = value % &modulus;
    if wrapped.sign() == Sign::Minus {
        wrapped += &modulus;
    }
    let (_, digits) = wrapped.to_u64_digits();

    let chunks = width.div_ceil(64);
    let mut result: Option<BV> = None;
    for index in (0..chunks).rev() {
        let digit = digits.get(index as usize).copied().unwrap_or(0);
        let chunk_width = if index == chunks - 1 {
            width - 64 * (chunks - 1)
        } else {
            64
        };
        let chunk = BV::from_u64(digit, chunk_width);
        result = Some(match result {
            None => chunk,
            Some(high) => high.concat(&chunk),
        });
    }

    result.unwrap_or_else(|| BV::from_u64(0, width))
}

/// Evaluates `value` in `model`, reading it back as a signed or unsigned
/// integer.
///
/// Returns [`None`] if the model cannot provide an interpretation.
#[must_use]
pub fn bv_to_bigint(model: &Model, value: &BV, signed: bool) -> Option<BigInt> {
    let width = value.get_size();
    let mut result = BigInt::zero();
    let mut low = 0;
    while low < width {
        let high = (low + 63).min(width - 1);
        let chunk = model.eval(&value.extract(high, low), true)?.as_u64()?;
        result += BigInt::from(chunk) << low;
        low = high + 1;
    }

    if signed && result.bit(u64::from(width - 1)) {
        result -= BigInt::one() << width;
    }
    Some(result)
}

/// Interprets `bits` as a big-endian integer.
#[must_use]
pub fn bits_to_bigint(bits: &BitSlice<u8, Msb0>, signed: bool) -> BigInt {
    let mut result = BigInt::zero();
    for bit in bits {
        result <<= 1;
        if *bit {
            result += 1;
        }
    }
    if signed && bits.first().is_some_and(|b| *b) {
        result -= BigInt::one() << bits.len();
    }
    result
}

/// Writes the low `width` bits of `value` in two's complement, most
/// significant first.
#[must_use]
pub fn bigint_to_bits(value: &BigInt, width: usize) -> BitVec<u8, Msb0> {
    let modulus = BigInt::one() << width;
    let mut wrapped = value % &modulus;
    if wrapped.sign() == Sign::Minus {
        wrapped += &modulus;
    }
    (0..width).rev().map(|index| wrapped.bit(index as u64)).collect()
}

/// Places `bits` at the most significant end of a bit-vector of `width` bits,
/// leaving the remaining low bits zero.
#[must_use]
pub fn bits_to_bv(bits: &BitSlice<u8, Msb0>, width: u32) -> BV {
    let value = bits_to_bigint(bits, false) << (width as usize - bits.len());
    bigint_to_bv(&value, width)
}

/// Checks whether `value` is representable as a signed integer of `bits` bits.
#[must_use]
pub fn fits_signed(value: &BigInt, bits: u32) -> bool {
    if bits == 0 {
        return value.is_zero();
    }
    let bound = BigInt::one() << (bits - 1);
    value >= &-bound.clone() && value < &bound
}

/// Checks whether `value` is representable as an unsigned integer of `bits`
/// bits.
#[must_use]
pub fn fits_unsigned(value: &BigInt, bits: u32) -> bool {
    value.sign() != Sign::Minus && value.bits() <= u64::from(bits)
}

/// Renders `bits` as a string of `0` and `1` characters.
#[must_use]
pub fn bit_string(bits: &BitSlice<u8, Msb0>) -> String {
    bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
}

/// Serializes big integers as decimal strings so that they survive JSON
/// consumers that cannot hold 257-bit numbers.
pub mod decimal {
    use super::{BigInt, Deserialize, Deserializer, Serializer};

    /// Serializes `value` as a decimal string.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the serializer fails.
    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserializes a decimal string into a big integer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the input is not a decimal integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use bitvec::{bits, order::Msb0};
    use num_bigint::BigInt;

    use crate::utility::{bits_to_bigint, fits_signed, fits_unsigned};

    #[test]
    fn reads_signed_and_unsigned_bit_strings() {
        let bits = bits![u8, Msb0; 1, 1, 1, 0, 1];
        assert_eq!(bits_to_bigint(bits, false), BigInt::from(29));
        assert_eq!(bits_to_bigint(bits, true), BigInt::from(-3));
    }

    #[test]
    fn checks_integer_ranges() {
        assert!(fits_signed(&BigInt::from(-16), 5));
        assert!(!fits_signed(&BigInt::from(16), 5));
        assert!(fits_unsigned(&BigInt::from(31), 5));
        assert!(!fits_unsigned(&BigInt::from(-1), 5));
    }
}
