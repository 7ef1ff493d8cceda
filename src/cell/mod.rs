//! This module contains the concrete cell model: immutable, content-addressed
//! tree nodes holding up to [`MAX_CELL_BITS`] bits of data and up to
//! [`MAX_CELL_REFS`] references to child cells.
//!
//! Concrete cells are what contract code and data are made of, and what the
//! [`crate::resolver`] materialises test values into. Their symbolic
//! counterparts live in [`crate::vm::state::heap`].

pub mod boc;
pub mod builder;
pub mod dictionary;
pub mod slice;

use std::{
    fmt::{Debug, Display, Formatter},
    rc::Rc,
};

use bitvec::{order::Msb0, slice::BitSlice, vec::BitVec};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

pub use crate::cell::{builder::CellBuilder, slice::CellSlice};
use crate::{
    constant::{MAX_CELL_BITS, MAX_CELL_REFS},
    error::cell::{Error, Result},
    utility::bit_string,
};

/// The representation hash of a cell.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CellHash([u8; 32]);

impl CellHash {
    /// Wraps the raw hash `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Gets the raw bytes of the hash.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for CellHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl Debug for CellHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CellHash({self})")
    }
}

impl Serialize for CellHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// An immutable ordinary cell.
///
/// Cloning a cell is cheap, as the contents are shared. Two cells compare equal
/// exactly when their representation hashes do.
#[derive(Clone)]
pub struct Cell(Rc<CellData>);

struct CellData {
    data:  BitVec<u8, Msb0>,
    refs:  Vec<Cell>,
    hash:  CellHash,
    depth: u16,
}

impl Cell {
    /// Creates a new cell from its `data` bits and child `refs`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the data or the references exceed the cell limits.
    pub fn new(data: BitVec<u8, Msb0>, refs: Vec<Cell>) -> Result<Self> {
        if data.len() > MAX_CELL_BITS {
            return Err(Error::DataOverflow {
                requested: data.len(),
                available: MAX_CELL_BITS,
            });
        }
        if refs.len() > MAX_CELL_REFS {
            return Err(Error::RefOverflow {
                limit: MAX_CELL_REFS,
            });
        }

        let depth = refs.iter().map(|r| r.depth() + 1).max().unwrap_or(0);
        let hash = Self::representation_hash(&data, &refs);
        Ok(Self(Rc::new(CellData {
            data,
            refs,
            hash,
            depth,
        })))
    }

    /// Creates a cell with no data and no references.
    #[must_use]
    pub fn empty() -> Self {
        let data = BitVec::new();
        let refs = Vec::new();
        let hash = Self::representation_hash(&data, &refs);
        Self(Rc::new(CellData {
            data,
            refs,
            hash,
            depth: 0,
        }))
    }

    /// Gets the data bits of the cell.
    #[must_use]
    pub fn data(&self) -> &BitSlice<u8, Msb0> {
        &self.0.data
    }

    /// Gets the number of data bits in the cell.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.0.data.len()
    }

    /// Gets the children of the cell.
    #[must_use]
    pub fn refs(&self) -> &[Cell] {
        &self.0.refs
    }

    /// Gets the child at `index`, if it exists.
    #[must_use]
    pub fn reference(&self, index: usize) -> Option<&Cell> {
        self.0.refs.get(index)
    }

    /// Gets the representation hash of the cell.
    #[must_use]
    pub fn hash(&self) -> CellHash {
        self.0.hash
    }

    /// Gets the depth of the tree rooted at this cell.
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.0.depth
    }

    /// Creates a slice covering the whole of this cell.
    #[must_use]
    pub fn to_slice(&self) -> CellSlice {
        CellSlice::new(self.clone())
    }

    /// The pair of descriptor bytes that prefix the cell in both its
    /// representation and its serialized form.
    #[must_use]
    pub fn descriptors(&self) -> [u8; 2] {
        Self::descriptors_for(self.bit_len(), self.refs().len())
    }

    /// The data bytes padded with a completion tag when the length is not a
    /// multiple of eight.
    #[must_use]
    pub fn padded_data(&self) -> Vec<u8> {
        Self::pad(&self.0.data)
    }

    #[allow(clippy::cast_possible_truncation)] // Limits are checked on construction
    fn descriptors_for(bits: usize, refs: usize) -> [u8; 2] {
        let d1 = refs as u8;
        let d2 = (bits / 8 + bits.div_ceil(8)) as u8;
        [d1, d2]
    }

    fn pad(data: &BitSlice<u8, Msb0>) -> Vec<u8> {
        let mut padded: BitVec<u8, Msb0> = data.to_bitvec();
        if padded.len() % 8 != 0 {
            padded.push(true);
            while padded.len() % 8 != 0 {
                padded.push(false);
            }
        }
        padded.into_vec()
    }

    fn representation_hash(data: &BitSlice<u8, Msb0>, refs: &[Cell]) -> CellHash {
        let mut hasher = Sha256::new();
        hasher.update(Self::descriptors_for(data.len(), refs.len()));
        hasher.update(Self::pad(data));
        for child in refs {
            hasher.update(child.depth().to_be_bytes());
        }
        for child in refs {
            hasher.update(child.hash().as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        CellHash(bytes)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash().hash(state);
    }
}

impl Debug for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("data", &bit_string(self.data()))
            .field("refs", &self.refs())
            .finish()
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod test {
    use bitvec::{bitvec, order::Msb0, vec::BitVec};

    use crate::{
        cell::{Cell, CellBuilder},
        error::cell::Error,
    };

    #[test]
    fn hashes_the_empty_cell_to_the_known_value() {
        assert_eq!(
            Cell::empty().hash().to_string(),
            "96A296D224F285C67BEE93C30F8A309157F0DAA35DC5B87E410B78630A09CFC7"
        );
    }

    #[test]
    fn identical_contents_are_interchangeable() -> anyhow::Result<()> {
        let mut left = CellBuilder::new();
        left.store_uint(0xdead, 16)?;
        let mut right = CellBuilder::new();
        right.store_uint(0xdead, 16)?;

        assert_eq!(left.build()?, right.build()?);
        Ok(())
    }

    #[test]
    fn rejects_oversized_cells() {
        let result = Cell::new(bitvec![u8, Msb0; 0; 1024], vec![]);
        assert_eq!(
            result.err(),
            Some(Error::DataOverflow {
                requested: 1024,
                available: 1023,
            })
        );
    }

    #[test]
    fn tracks_depth_through_children() -> anyhow::Result<()> {
        let leaf = Cell::empty();
        let middle = Cell::new(BitVec::new(), vec![leaf])?;
        let root = Cell::new(bitvec![u8, Msb0; 1], vec![middle.clone(), middle])?;

        assert_eq!(root.depth(), 2);
        Ok(())
    }
}
