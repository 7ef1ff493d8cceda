//! The concrete slice, a read cursor over a window of a [`Cell`].

use bitvec::{order::Msb0, slice::BitSlice, vec::BitVec};
use num_bigint::BigInt;

use crate::{
    cell::{Cell, CellHash},
    error::cell::{Error, Result},
    utility::bits_to_bigint,
};

/// A read cursor into a cell.
///
/// The cursor positions only ever move forward. A slice may also be bounded to
/// a window of its cell, as is the case for continuations whose code is
/// embedded inline in another instruction.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CellSlice {
    cell:     Cell,
    data_pos: usize,
    data_end: usize,
    ref_pos:  usize,
    ref_end:  usize,
}

impl CellSlice {
    /// Creates a slice over the entirety of `cell`.
    #[must_use]
    pub fn new(cell: Cell) -> Self {
        let data_end = cell.bit_len();
        let ref_end = cell.refs().len();
        Self {
            cell,
            data_pos: 0,
            data_end,
            ref_pos: 0,
            ref_end,
        }
    }

    /// Gets the cell underlying the slice.
    #[must_use]
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// Gets the hash of the cell underlying the slice.
    #[must_use]
    pub fn cell_hash(&self) -> CellHash {
        self.cell.hash()
    }

    /// Gets the absolute bit offset of the cursor within its cell.
    #[must_use]
    pub fn data_pos(&self) -> usize {
        self.data_pos
    }

    /// Gets the absolute reference index of the cursor within its cell.
    #[must_use]
    pub fn ref_pos(&self) -> usize {
        self.ref_pos
    }

    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        self.data_end - self.data_pos
    }

    #[must_use]
    pub fn remaining_refs(&self) -> usize {
        self.ref_end - self.ref_pos
    }

    /// Checks whether the slice has neither bits nor references left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    /// Gets the bits that have not been read yet.
    #[must_use]
    pub fn remaining_data(&self) -> &BitSlice<u8, Msb0> {
        &self.cell.data()[self.data_pos..self.data_end]
    }

    /// Gets the references that have not been read yet.
    #[must_use]
    pub fn remaining_cells(&self) -> &[Cell] {
        &self.cell.refs()[self.ref_pos..self.ref_end]
    }

    fn ensure_bits(&self, requested: usize) -> Result<()> {
        if requested > self.remaining_bits() {
            return Err(Error::DataUnderflow {
                requested,
                available: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Reads `count` bits without advancing the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if fewer than `count` bits remain.
    pub fn preload_bits(&self, count: usize) -> Result<&BitSlice<u8, Msb0>> {
        self.ensure_bits(count)?;
        Ok(&self.cell.data()[self.data_pos..self.data_pos + count])
    }

    /// Reads `count` bits as a big-endian unsigned integer without advancing
    /// the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if fewer than `count` bits remain or `count` exceeds 64.
    pub fn preload_uint(&self, count: usize) -> Result<u64> {
        if count > 64 {
            return Err(Error::InvalidWidth { width: count });
        }
        let bits = self.preload_bits(count)?;
        Ok(bits.iter().fold(0u64, |acc, bit| (acc << 1) | u64::from(*bit)))
    }

    /// Advances the cursor by `count` bits.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if fewer than `count` bits remain.
    pub fn skip_bits(&mut self, count: usize) -> Result<()> {
        self.ensure_bits(count)?;
        self.data_pos += count;
        Ok(())
    }

    /// Reads a single bit.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slice has no bits left.
    pub fn load_bit(&mut self) -> Result<bool> {
        let bit = self.preload_bits(1)?[0];
        self.data_pos += 1;
        Ok(bit)
    }

    /// Reads `count` bits into a new bit vector.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if fewer than `count` bits remain.
    pub fn load_bits(&mut self, count: usize) -> Result<BitVec<u8, Msb0>> {
        let bits = self.preload_bits(count)?.to_bitvec();
        self.data_pos += count;
        Ok(bits)
    }

    /// Reads `count` bits as an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if fewer than `count` bits remain or `count` exceeds 64.
    pub fn load_uint(&mut self, count: usize) -> Result<u64> {
        let value = self.preload_uint(count)?;
        self.data_pos += count;
        Ok(value)
    }

    /// Reads `count` bits as an integer of arbitrary width.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if fewer than `count` bits remain.
    pub fn load_bigint(&mut self, count: usize, signed: bool) -> Result<BigInt> {
        let value = bits_to_bigint(self.preload_bits(count)?, signed);
        self.data_pos += count;
        Ok(value)
    }

    /// Reads a `VarUInteger 16` amount of coins.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slice is too short.
    #[allow(clippy::cast_possible_truncation)] // The length prefix is four bits
    pub fn load_coins(&mut self) -> Result<BigInt> {
        let mut probe = self.clone();
        let bytes = probe.load_uint(4)? as usize;
        let value = probe.load_bigint(bytes * 8, false)?;
        *self = probe;
        Ok(value)
    }

    /// Reads the next reference.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slice has no references left.
    pub fn load_ref(&mut self) -> Result<Cell> {
        let cell = self.preload_ref()?;
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Reads the next reference without advancing the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slice has no references left.
    pub fn preload_ref(&self) -> Result<Cell> {
        if self.remaining_refs() == 0 {
            return Err(Error::RefUnderflow);
        }
        Ok(self.cell.refs()[self.ref_pos].clone())
    }

    /// Splits off a slice holding the next `bits` bits and `refs` references,
    /// advancing this slice past them.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if not enough bits or references remain.
    pub fn split_prefix(&mut self, bits: usize, refs: usize) -> Result<CellSlice> {
        self.ensure_bits(bits)?;
        if refs > self.remaining_refs() {
            return Err(Error::RefUnderflow);
        }
        let prefix = Self {
            cell:     self.cell.clone(),
            data_pos: self.data_pos,
            data_end: self.data_pos + bits,
            ref_pos:  self.ref_pos,
            ref_end:  self.ref_pos + refs,
        };
        self.data_pos += bits;
        self.ref_pos += refs;
        Ok(prefix)
    }

    /// Removes the trailing completion tag (a `1` followed by any number of
    /// `0`s) from the window of this slice.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slice holds no set bit.
    pub fn strip_completion_tag(&mut self) -> Result<()> {
        let tag = self
            .remaining_data()
            .last_one()
            .ok_or(Error::MissingCompletionTag)?;
        self.data_end = self.data_pos + tag;
        Ok(())
    }

    /// Copies the unread window of this slice into a fresh cell.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the resulting cell cannot be built.
    pub fn to_cell(&self) -> Result<Cell> {
        Cell::new(
            self.remaining_data().to_bitvec(),
            self.remaining_cells().to_vec(),
        )
    }
}

#[cfg(test)]
mod test {
    use bitvec::{bitvec, order::Msb0};
    use num_bigint::BigInt;

    use crate::{
        cell::{Cell, CellBuilder},
        error::cell::Error,
    };

    #[test]
    fn reads_advance_the_cursor() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_uint(0b101, 3)?.store_int(-2, 8)?;
        let mut slice = builder.build()?.to_slice();

        assert_eq!(slice.load_uint(3)?, 0b101);
        assert_eq!(slice.data_pos(), 3);
        assert_eq!(slice.load_bigint(8, true)?, BigInt::from(-2));
        assert_eq!(slice.remaining_bits(), 0);
        Ok(())
    }

    #[test]
    fn fails_on_underflow_without_moving() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_uint(1, 4)?;
        let mut slice = builder.build()?.to_slice();

        assert_eq!(
            slice.load_uint(5),
            Err(Error::DataUnderflow {
                requested: 5,
                available: 4,
            })
        );
        assert_eq!(slice.data_pos(), 0);
        assert_eq!(slice.load_ref(), Err(Error::RefUnderflow));
        Ok(())
    }

    #[test]
    fn splits_windows_off_the_front() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_uint(0xab, 8)?.store_ref(Cell::empty())?;
        let mut slice = builder.build()?.to_slice();

        let prefix = slice.split_prefix(4, 1)?;
        assert_eq!(prefix.remaining_bits(), 4);
        assert_eq!(prefix.remaining_refs(), 1);
        assert_eq!(slice.load_uint(4)?, 0xb);
        assert_eq!(slice.remaining_refs(), 0);
        Ok(())
    }

    #[test]
    fn strips_completion_tags() -> anyhow::Result<()> {
        let cell = Cell::new(bitvec![u8, Msb0; 1, 0, 1, 1, 0, 0], vec![])?;
        let mut slice = cell.to_slice();
        slice.strip_completion_tag()?;

        assert_eq!(slice.remaining_bits(), 3);
        Ok(())
    }
}
