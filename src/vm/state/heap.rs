//! This module contains the symbolic heap: the cells a state knows about,
//! addressed by [`CellAddr`].
//!
//! Cells on the heap come from three places. Concrete cells (contract code and
//! data, constants pushed by the code) have fully known contents. Input cells
//! are unconstrained solver variables standing for data supplied from outside,
//! such as an inbound message. Built cells are the result of sealing a
//! builder, and may mix the two.
//!
//! Bits are kept concrete for as long as every operation on them is concrete.
//! Symbolic cell data is a 1023-bit vector holding the cell's bits at its most
//! significant end, with every bit past the cell's length set to zero.

use std::{fmt::Display, rc::Rc};

use bitvec::{order::Msb0, vec::BitVec};
use num_bigint::BigInt;
use serde::Serialize;
use z3::ast::{Bool, BV};

use crate::{
    cell::{Cell, CellHash},
    constant::{CELL_DATA_BITS, INT_BITS, LENGTH_BITS, MAX_CELL_BITS, MAX_CELL_REFS},
    error::execution::Error,
    solver::{SymBool, SymInt},
    utility::{bigint_to_bits, bits_to_bigint, bits_to_bv},
};

/// The address of a cell on the heap of a state.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CellAddr(u32);

impl CellAddr {
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl Display for CellAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A reference to a cell, which may be a choice between several cells.
#[derive(Clone, Debug)]
pub enum SymRef {
    Concrete(CellAddr),
    Ite {
        condition: Bool,
        then:      Rc<SymRef>,
        otherwise: Rc<SymRef>,
    },
}

impl SymRef {
    /// Chooses between `then` and `otherwise` on `condition`.
    #[must_use]
    pub fn select(condition: &SymBool, then: SymRef, otherwise: SymRef) -> SymRef {
        match condition {
            SymBool::Concrete(true) => then,
            SymBool::Concrete(false) => otherwise,
            SymBool::Symbolic(condition) => SymRef::Ite {
                condition: condition.clone(),
                then:      Rc::new(then),
                otherwise: Rc::new(otherwise),
            },
        }
    }

    #[must_use]
    pub fn as_concrete(&self) -> Option<CellAddr> {
        match self {
            Self::Concrete(addr) => Some(*addr),
            Self::Ite { .. } => None,
        }
    }

    /// Lowers the reference into the disjoint cases it stands for, each with
    /// the condition under which it is the referenced cell.
    #[must_use]
    pub fn flatten(&self) -> Vec<(SymBool, CellAddr)> {
        let mut cases = Vec::new();
        self.flatten_into(&SymBool::Concrete(true), &mut cases);
        cases
    }

    fn flatten_into(&self, guard: &SymBool, cases: &mut Vec<(SymBool, CellAddr)>) {
        match self {
            Self::Concrete(addr) => cases.push((guard.clone(), *addr)),
            Self::Ite {
                condition,
                then,
                otherwise,
            } => {
                let condition = SymBool::Symbolic(condition.clone());
                then.flatten_into(&guard.and(&condition), cases);
                otherwise.flatten_into(&guard.and(&condition.not()), cases);
            }
        }
    }
}

/// A length or position within a cell, in bits or references.
#[derive(Clone, Debug)]
pub enum SymLen {
    Concrete(u16),
    Symbolic(BV),
}

impl SymLen {
    #[must_use]
    pub fn zero() -> Self {
        Self::Concrete(0)
    }

    #[must_use]
    pub fn as_concrete(&self) -> Option<u16> {
        match self {
            Self::Concrete(n) => Some(*n),
            Self::Symbolic(_) => None,
        }
    }

    /// Gets the length as a 16-bit solver term.
    #[must_use]
    pub fn to_bv(&self) -> BV {
        match self {
            Self::Concrete(n) => BV::from_u64(u64::from(*n), LENGTH_BITS),
            Self::Symbolic(bv) => bv.clone(),
        }
    }

    /// Gets the length zero-extended to the width of cell data, for use as a
    /// shift amount.
    #[must_use]
    pub fn to_data_width(&self) -> BV {
        self.to_bv().zero_ext(CELL_DATA_BITS - LENGTH_BITS)
    }

    /// Converts a VM integer known to be in `0..=1023` into a length.
    #[allow(clippy::cast_possible_truncation)] // The caller checks the range
    #[must_use]
    pub fn from_int(value: &SymInt) -> Self {
        match value {
            SymInt::Concrete(n) => Self::Concrete(u16::try_from(n).unwrap_or(u16::MAX)),
            SymInt::Symbolic(bv) => Self::Symbolic(bv.extract(LENGTH_BITS - 1, 0)),
        }
    }

    /// Gets the length as a VM integer.
    #[must_use]
    pub fn to_int(&self) -> SymInt {
        match self {
            Self::Concrete(n) => SymInt::Concrete(BigInt::from(*n)),
            Self::Symbolic(bv) => SymInt::Symbolic(bv.zero_ext(INT_BITS - LENGTH_BITS)),
        }
    }

    #[must_use]
    pub fn add(&self, other: &SymLen) -> SymLen {
        match (self, other) {
            (Self::Concrete(l), Self::Concrete(r)) => Self::Concrete(l.wrapping_add(*r)),
            _ => Self::Symbolic(self.to_bv().bvadd(&other.to_bv())),
        }
    }

    #[must_use]
    pub fn sub(&self, other: &SymLen) -> SymLen {
        match (self, other) {
            (Self::Concrete(l), Self::Concrete(r)) => Self::Concrete(l.wrapping_sub(*r)),
            _ => Self::Symbolic(self.to_bv().bvsub(&other.to_bv())),
        }
    }

    /// Checks `self <= other`.
    #[must_use]
    pub fn le(&self, other: &SymLen) -> SymBool {
        match (self, other) {
            (Self::Concrete(l), Self::Concrete(r)) => SymBool::Concrete(l <= r),
            _ => SymBool::Symbolic(self.to_bv().bvule(&other.to_bv())),
        }
    }

    #[must_use]
    pub fn equals(&self, other: &SymLen) -> SymBool {
        match (self, other) {
            (Self::Concrete(l), Self::Concrete(r)) => SymBool::Concrete(l == r),
            _ => SymBool::Symbolic(self.to_bv().eq(&other.to_bv())),
        }
    }
}

impl From<u16> for SymLen {
    fn from(value: u16) -> Self {
        Self::Concrete(value)
    }
}

/// The data bits of a cell, slice window or builder.
#[derive(Clone, Debug)]
pub enum CellBits {
    Concrete(BitVec<u8, Msb0>),
    Symbolic { data: BV, len: SymLen },
}

impl CellBits {
    #[must_use]
    pub fn empty() -> Self {
        Self::Concrete(BitVec::new())
    }

    #[must_use]
    pub fn as_concrete(&self) -> Option<&BitVec<u8, Msb0>> {
        match self {
            Self::Concrete(bits) => Some(bits),
            Self::Symbolic { .. } => None,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // Cell data never exceeds 1023 bits
    #[must_use]
    pub fn len(&self) -> SymLen {
        match self {
            Self::Concrete(bits) => SymLen::Concrete(bits.len() as u16),
            Self::Symbolic { len, .. } => len.clone(),
        }
    }

    /// Gets the bits as a left-aligned 1023-bit solver term.
    #[must_use]
    pub fn to_bv(&self) -> BV {
        match self {
            Self::Concrete(bits) => bits_to_bv(bits, CELL_DATA_BITS),
            Self::Symbolic { data, .. } => data.clone(),
        }
    }

    /// Gets the `width` bits starting at `pos`.
    ///
    /// The caller is responsible for checking that the window lies within the
    /// bits.
    #[must_use]
    pub fn window(&self, pos: &SymLen, width: &SymLen) -> CellBits {
        if let (Self::Concrete(bits), Some(p), Some(w)) = (self, pos.as_concrete(), width.as_concrete()) {
            let (p, w) = (usize::from(p), usize::from(w));
            if p + w <= bits.len() {
                return Self::Concrete(bits[p..p + w].to_bitvec());
            }
        }
        let shifted = self.to_bv().bvshl(&pos.to_data_width());
        Self::Symbolic {
            data: shifted.bvand(&top_mask(width)),
            len:  width.clone(),
        }
    }

    /// Appends `other` to the end of these bits.
    #[must_use]
    pub fn append(&self, other: &CellBits) -> CellBits {
        if let (Self::Concrete(l), Self::Concrete(r)) = (self, other) {
            let mut bits = l.clone();
            bits.extend_from_bitslice(r);
            return Self::Concrete(bits);
        }
        let len = self.len();
        let data = self.to_bv().bvor(&other.to_bv().bvlshr(&len.to_data_width()));
        Self::Symbolic {
            data,
            len: len.add(&other.len()),
        }
    }

    /// Reads the first `width` bits as an integer.
    #[must_use]
    pub fn read_int(&self, width: u16, signed: bool) -> SymInt {
        if width == 0 {
            return SymInt::from_i64(0);
        }
        match self {
            Self::Concrete(bits) => {
                let end = usize::from(width).min(bits.len());
                SymInt::Concrete(bits_to_bigint(&bits[..end], signed))
            }
            Self::Symbolic { data, .. } => {
                let width = u32::from(width);
                let value = data.extract(CELL_DATA_BITS - 1, CELL_DATA_BITS - width);
                let extension = INT_BITS.saturating_sub(width);
                let value = match (extension, signed) {
                    (0, _) => value.extract(INT_BITS - 1, 0),
                    (n, true) => value.sign_ext(n),
                    (n, false) => value.zero_ext(n),
                };
                SymInt::Symbolic(value)
            }
        }
    }

    /// Writes the low `width` bits of `value` in two's complement.
    #[must_use]
    pub fn from_int(value: &SymInt, width: u16) -> CellBits {
        match value {
            SymInt::Concrete(n) => Self::Concrete(bigint_to_bits(n, usize::from(width))),
            SymInt::Symbolic(_) if width == 0 => Self::empty(),
            SymInt::Symbolic(bv) => {
                let width = u32::from(width);
                let low = if width >= INT_BITS {
                    bv.zero_ext(width - INT_BITS)
                } else {
                    bv.extract(width - 1, 0)
                };
                let data = if width < CELL_DATA_BITS {
                    low.concat(&BV::from_u64(0, CELL_DATA_BITS - width))
                } else {
                    low.extract(CELL_DATA_BITS - 1, 0)
                };
                Self::Symbolic {
                    data,
                    len: SymLen::Concrete(width as u16),
                }
            }
        }
    }
}

/// A mask with the top `width` bits of cell data set.
fn top_mask(width: &SymLen) -> BV {
    let ones = BV::from_u64(0, CELL_DATA_BITS).bvnot();
    ones.bvlshr(&width.to_data_width()).bvnot()
}

/// Where a heap cell came from.
#[derive(Clone, Debug)]
pub enum CellOrigin {
    /// Supplied from outside the contract, with the given name.
    Input { name: String },

    /// Sealed from a builder during execution.
    Built,

    /// Fully known ahead of execution.
    Concrete(Cell),
}

/// A cell on the heap.
#[derive(Clone, Debug)]
pub struct HeapCell {
    pub bits:     CellBits,
    pub refs_len: SymLen,
    refs:         im::Vector<Option<SymRef>>,
    pub origin:   CellOrigin,
}

impl HeapCell {
    /// Gets the child at `index` if it has already been materialised.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<&SymRef> {
        self.refs.get(index).and_then(Option::as_ref)
    }

    /// Gets the concrete cell this heap cell was created from, if any.
    #[must_use]
    pub fn concrete(&self) -> Option<&Cell> {
        match &self.origin {
            CellOrigin::Concrete(cell) => Some(cell),
            _ => None,
        }
    }
}

/// The heap of a single state.
///
/// Cloning is cheap, as the underlying maps are persistent.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    cells:   im::OrdMap<CellAddr, HeapCell>,
    by_hash: im::HashMap<CellHash, CellAddr>,
    loaded:  im::HashSet<CellAddr>,
    next:    u32,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the cell at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no cell lives at `addr`.
    pub fn get(&self, addr: CellAddr) -> Result<&HeapCell, Error> {
        self.cells.get(&addr).ok_or(Error::NoSuchCell { address: addr.0 })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn insert(&mut self, cell: HeapCell) -> CellAddr {
        let addr = CellAddr(self.next);
        self.next += 1;
        self.cells.insert(addr, cell);
        addr
    }

    /// Places the concrete `cell` on the heap, reusing the address of an
    /// identical cell if one is already present.
    #[allow(clippy::cast_possible_truncation)] // Cells have at most four refs
    pub fn allocate_concrete(&mut self, cell: &Cell) -> CellAddr {
        if let Some(addr) = self.by_hash.get(&cell.hash()) {
            return *addr;
        }
        let refs_len = cell.refs().len();
        let addr = self.insert(HeapCell {
            bits:     CellBits::Concrete(cell.data().to_bitvec()),
            refs_len: SymLen::Concrete(refs_len as u16),
            refs:     std::iter::repeat(None).take(refs_len).collect(),
            origin:   CellOrigin::Concrete(cell.clone()),
        });
        self.by_hash.insert(cell.hash(), addr);
        addr
    }

    /// Places a fresh unconstrained cell called `name` on the heap.
    ///
    /// The returned formula holds the well-formedness constraints of the new
    /// cell and must be added to the path.
    pub fn allocate_input(&mut self, name: &str) -> (CellAddr, Bool) {
        let data = BV::new_const(format!("{name}.data"), CELL_DATA_BITS);
        let len = BV::new_const(format!("{name}.len"), LENGTH_BITS);
        let refs_len = BV::new_const(format!("{name}.refs"), LENGTH_BITS);

        #[allow(clippy::cast_possible_truncation)] // Both limits are small constants
        let (max_bits, max_refs) = (MAX_CELL_BITS as u64, MAX_CELL_REFS as u64);
        let len_ok = len.bvule(&BV::from_u64(max_bits, LENGTH_BITS));
        let refs_ok = refs_len.bvule(&BV::from_u64(max_refs, LENGTH_BITS));
        let len = SymLen::Symbolic(len);
        let trailing = BV::from_u64(0, CELL_DATA_BITS)
            .bvnot()
            .bvlshr(&len.to_data_width());
        let trailing_zero = data.bvand(&trailing).eq(&BV::from_u64(0, CELL_DATA_BITS));

        let addr = self.insert(HeapCell {
            bits:     CellBits::Symbolic { data, len },
            refs_len: SymLen::Symbolic(refs_len),
            refs:     std::iter::repeat(None).take(MAX_CELL_REFS).collect(),
            origin:   CellOrigin::Input {
                name: name.to_string(),
            },
        });
        (addr, len_ok & refs_ok & trailing_zero)
    }

    /// Places a cell sealed from a builder on the heap.
    #[allow(clippy::cast_possible_truncation)] // Builders hold at most four refs
    pub fn allocate_built(&mut self, bits: CellBits, refs: Vec<SymRef>) -> CellAddr {
        let refs_len = SymLen::Concrete(refs.len() as u16);
        self.insert(HeapCell {
            bits,
            refs_len,
            refs: refs.into_iter().map(Some).collect(),
            origin: CellOrigin::Built,
        })
    }

    /// Gets the child of `addr` at `index`, materialising it on first access.
    ///
    /// Children of input cells are themselves fresh input cells, in which case
    /// their well-formedness constraints are returned alongside.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `addr` does not exist or `index` is beyond the
    /// children any cell could have.
    pub fn child(&mut self, addr: CellAddr, index: usize) -> Result<(SymRef, Option<Bool>), Error> {
        let cell = self.get(addr)?;
        if let Some(existing) = cell.child(index) {
            return Ok((existing.clone(), None));
        }

        let (child, constraints) = match &cell.origin {
            CellOrigin::Concrete(concrete) => {
                let child = concrete
                    .reference(index)
                    .cloned()
                    .ok_or_else(|| Error::inconsistent(format!("{addr} has no child {index}")))?;
                (self.allocate_concrete(&child), None)
            }
            CellOrigin::Input { name } => {
                if index >= MAX_CELL_REFS {
                    return Err(Error::inconsistent(format!("{addr} has no child {index}")));
                }
                let name = format!("{name}.{index}");
                let (child, constraints) = self.allocate_input(&name);
                (child, Some(constraints))
            }
            CellOrigin::Built => {
                return Err(Error::inconsistent(format!("built cell {addr} lacks child {index}")))
            }
        };

        let reference = SymRef::Concrete(child);
        if let Some(cell) = self.cells.get_mut(&addr) {
            cell.refs.set(index, Some(reference.clone()));
        }
        Ok((reference, constraints))
    }

    /// Records that the cell at `addr` was loaded, returning whether this is
    /// its first load.
    pub fn mark_loaded(&mut self, addr: CellAddr) -> bool {
        self.loaded.insert(addr).is_none()
    }

    /// Iterates over every cell on the heap in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&CellAddr, &HeapCell)> {
        self.cells.iter()
    }
}

#[cfg(test)]
mod test {
    use bitvec::{bits, order::Msb0};
    use num_bigint::BigInt;

    use crate::{
        cell::{Cell, CellBuilder},
        solver::SymInt,
        vm::state::heap::{CellBits, Heap, SymLen, SymRef},
    };

    #[test]
    fn deduplicates_concrete_cells() -> anyhow::Result<()> {
        let mut heap = Heap::new();
        let mut builder = CellBuilder::new();
        builder.store_uint(7, 3)?.store_ref(Cell::empty())?;
        let cell = builder.build()?;

        let a = heap.allocate_concrete(&cell);
        let b = heap.allocate_concrete(&cell.clone());
        assert_eq!(a, b);

        let (child, constraints) = heap.child(a, 0)?;
        assert!(constraints.is_none());
        assert_eq!(child.as_concrete(), Some(heap.allocate_concrete(&Cell::empty())));
        Ok(())
    }

    #[test]
    fn concrete_bits_stay_concrete() {
        let bits = CellBits::Concrete(bits![u8, Msb0; 1, 0, 1, 1, 0].to_bitvec());
        let window = bits.window(&SymLen::Concrete(1), &SymLen::Concrete(3));

        assert_eq!(window.read_int(3, false).as_concrete(), Some(&BigInt::from(0b011)));
        let joined = window.append(&CellBits::from_int(&SymInt::from_i64(-1), 2));
        assert_eq!(joined.len().as_concrete(), Some(5));
        assert_eq!(joined.read_int(5, false).as_concrete(), Some(&BigInt::from(0b01111)));
    }

    #[test]
    fn flattens_choices_between_cells() {
        let mut heap = Heap::new();
        let a = heap.allocate_concrete(&Cell::empty());
        let (b, _) = heap.allocate_input("in");
        let x = SymInt::fresh("x");
        let choice = SymRef::select(
            &x.is_zero(),
            SymRef::Concrete(a),
            SymRef::Concrete(b),
        );

        let cases = choice.flatten();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].1, a);
        assert_eq!(cases[1].1, b);
    }
}
