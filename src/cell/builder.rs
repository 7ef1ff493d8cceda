//! The concrete builder, an exclusively owned accumulator of bits and
//! references that is sealed into a [`Cell`] exactly once.

use bitvec::{order::Msb0, slice::BitSlice, vec::BitVec};
use num_bigint::BigInt;
use num_traits::Zero;

use crate::{
    cell::{Cell, CellSlice},
    constant::{MAX_CELL_BITS, MAX_CELL_REFS},
    error::cell::{Error, Result},
    utility::{fits_signed, fits_unsigned},
};

/// A builder for concrete cells.
///
/// Every store operation checks the cell limits before mutating the builder,
/// so a failed store leaves the builder untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CellBuilder {
    data: BitVec<u8, Msb0>,
    refs: Vec<Cell>,
}

impl CellBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of bits stored so far.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.data.len()
    }

    /// Gets the number of bits that can still be stored.
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        MAX_CELL_BITS - self.data.len()
    }

    /// Gets the number of references that can still be stored.
    #[must_use]
    pub fn remaining_refs(&self) -> usize {
        MAX_CELL_REFS - self.refs.len()
    }

    /// Gets the bits stored so far.
    #[must_use]
    pub fn data(&self) -> &BitSlice<u8, Msb0> {
        &self.data
    }

    /// Gets the references stored so far.
    #[must_use]
    pub fn refs(&self) -> &[Cell] {
        &self.refs
    }

    fn ensure_bits(&self, requested: usize) -> Result<()> {
        if requested > self.remaining_bits() {
            return Err(Error::DataOverflow {
                requested,
                available: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Stores a single bit.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the builder is full.
    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.ensure_bits(1)?;
        self.data.push(bit);
        Ok(self)
    }

    /// Stores all of `bits`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the bits do not fit.
    pub fn store_bits(&mut self, bits: &BitSlice<u8, Msb0>) -> Result<&mut Self> {
        self.ensure_bits(bits.len())?;
        self.data.extend_from_bitslice(bits);
        Ok(self)
    }

    /// Stores the low `width` bits of `value` in big-endian order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the value does not fit into `width` bits or the
    /// builder lacks the space.
    pub fn store_uint(&mut self, value: u64, width: usize) -> Result<&mut Self> {
        self.store_bigint(&BigInt::from(value), width, false)
    }

    /// Stores `value` as a two's complement integer of `width` bits.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the value does not fit into `width` bits or the
    /// builder lacks the space.
    pub fn store_int(&mut self, value: i64, width: usize) -> Result<&mut Self> {
        self.store_bigint(&BigInt::from(value), width, true)
    }

    /// Stores `value` as a `width`-bit integer, signed or unsigned.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the value is out of range or the builder lacks the
    /// space.
    #[allow(clippy::cast_possible_truncation)] // Widths are bounded by the cell size
    pub fn store_bigint(&mut self, value: &BigInt, width: usize, signed: bool) -> Result<&mut Self> {
        let fits = if signed {
            fits_signed(value, width as u32)
        } else {
            fits_unsigned(value, width as u32)
        };
        if !fits {
            return Err(Error::ValueOutOfRange {
                value: value.to_string(),
                width,
            });
        }
        self.ensure_bits(width)?;

        // Two's complement bits are read off from the most significant end.
        let wrapped = if value < &BigInt::zero() {
            value + (BigInt::from(1) << width)
        } else {
            value.clone()
        };
        for index in (0..width).rev() {
            self.data.push(wrapped.bit(index as u64));
        }
        Ok(self)
    }

    /// Stores an amount of coins using the variable-length `VarUInteger 16`
    /// encoding: a 4-bit byte count followed by that many bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the amount is negative, does not fit in 15 bytes, or
    /// the builder lacks the space.
    pub fn store_coins(&mut self, amount: &BigInt) -> Result<&mut Self> {
        if !fits_unsigned(amount, 120) {
            return Err(Error::ValueOutOfRange {
                value: amount.to_string(),
                width: 120,
            });
        }
        let bytes = usize::try_from(amount.bits().div_ceil(8)).unwrap_or(15);
        self.ensure_bits(4 + bytes * 8)?;
        self.store_uint(bytes as u64, 4)?;
        self.store_bigint(amount, bytes * 8, false)
    }

    /// Stores a reference to `cell`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the builder already holds the maximum number of
    /// references.
    pub fn store_ref(&mut self, cell: Cell) -> Result<&mut Self> {
        if self.remaining_refs() == 0 {
            return Err(Error::RefOverflow {
                limit: MAX_CELL_REFS,
            });
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Stores the remaining bits and references of `slice`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if either would exceed the builder's limits.
    pub fn store_slice(&mut self, slice: &CellSlice) -> Result<&mut Self> {
        self.ensure_bits(slice.remaining_bits())?;
        if slice.remaining_refs() > self.remaining_refs() {
            return Err(Error::RefOverflow {
                limit: MAX_CELL_REFS,
            });
        }
        self.data.extend_from_bitslice(slice.remaining_data());
        self.refs.extend(slice.remaining_cells().iter().cloned());
        Ok(self)
    }

    /// Seals the builder into a cell, consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contents violate the cell limits.
    pub fn build(self) -> Result<Cell> {
        Cell::new(self.data, self.refs)
    }
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{cell::CellBuilder, error::cell::Error, utility::bit_string};

    #[test]
    fn stores_signed_values_in_twos_complement() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_int(-3, 5)?.store_uint(3, 5)?;
        let cell = builder.build()?;

        assert_eq!(bit_string(cell.data()), "1110100011");
        Ok(())
    }

    #[test]
    fn rejects_values_that_do_not_fit() {
        let mut builder = CellBuilder::new();
        let result = builder.store_int(16, 5).map(|_| ());
        assert!(matches!(result, Err(Error::ValueOutOfRange { .. })));
        assert_eq!(builder.bit_len(), 0);
    }

    #[test]
    fn encodes_coins_with_a_length_prefix() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_coins(&BigInt::from(0x1234))?;
        assert_eq!(bit_string(builder.data()), "00100001001000110100");

        let mut zero = CellBuilder::new();
        zero.store_coins(&BigInt::from(0))?;
        assert_eq!(bit_string(zero.data()), "0000");
        Ok(())
    }

    #[test]
    fn refuses_a_fifth_reference() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        for _ in 0..4 {
            builder.store_ref(crate::cell::Cell::empty())?;
        }
        assert!(builder.store_ref(crate::cell::Cell::empty()).is_err());
        Ok(())
    }
}
