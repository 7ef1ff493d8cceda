//! This module implements the bag-of-cells container format, the serialized
//! form of a cell DAG with deduplicated node storage and one or more roots.
//!
//! Containers read from bytes remember their exact layout (cell order, field
//! sizes, index and checksum flags) so that writing an unmodified container
//! reproduces its original bytes.

use std::collections::{HashMap, HashSet};

use bitvec::{order::Msb0, vec::BitVec};

use crate::{
    cell::{Cell, CellHash},
    error::cell::{Error, Result},
};

/// The magic number that starts every container.
pub const BOC_MAGIC: u32 = 0xb5ee_9c72;

/// The layout parameters of a serialized container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    pub has_index:      bool,
    pub has_crc32c:     bool,
    pub has_cache_bits: bool,

    /// The number of bytes used for cell indices.
    pub ref_size: usize,

    /// The number of bytes used for byte offsets into the cell data.
    pub offset_size: usize,

    /// The raw index entries as read, retained to reproduce cache bits.
    pub index: Option<Vec<u64>>,
}

/// A deserialized (or freshly assembled) bag of cells.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BagOfCells {
    /// The cells in container order, parents before children.
    cells: Vec<Cell>,

    /// For every cell, the container indices of its references.
    ref_indices: Vec<Vec<usize>>,

    /// The container indices of the roots.
    roots: Vec<usize>,

    layout: Layout,
}

impl BagOfCells {
    /// Assembles a container holding the DAGs rooted at `roots`, storing each
    /// distinct cell once and using the smallest field sizes that fit.
    #[must_use]
    pub fn from_roots(roots: &[Cell]) -> Self {
        let mut order: Vec<Cell> = Vec::new();
        let mut visited: HashSet<CellHash> = HashSet::new();
        for root in roots {
            Self::post_order(root, &mut visited, &mut order);
        }
        order.reverse();

        let positions: HashMap<CellHash, usize> = order
            .iter()
            .enumerate()
            .map(|(index, cell)| (cell.hash(), index))
            .collect();
        let ref_indices = order
            .iter()
            .map(|cell| cell.refs().iter().map(|r| positions[&r.hash()]).collect())
            .collect();
        let root_indices = roots.iter().map(|r| positions[&r.hash()]).collect();

        let ref_size = Self::bytes_for(order.len() as u64);
        let data_size: usize = order
            .iter()
            .map(|cell| 2 + cell.bit_len().div_ceil(8) + cell.refs().len() * ref_size)
            .sum();
        let offset_size = Self::bytes_for(data_size as u64);

        Self {
            cells: order,
            ref_indices,
            roots: root_indices,
            layout: Layout {
                has_index: false,
                has_crc32c: true,
                has_cache_bits: false,
                ref_size,
                offset_size,
                index: None,
            },
        }
    }

    fn post_order(cell: &Cell, visited: &mut HashSet<CellHash>, order: &mut Vec<Cell>) {
        if !visited.insert(cell.hash()) {
            return;
        }
        for child in cell.refs().iter().rev() {
            Self::post_order(child, visited, order);
        }
        order.push(cell.clone());
    }

    fn bytes_for(value: u64) -> usize {
        let bits = 64 - value.leading_zeros() as usize;
        bits.div_ceil(8).max(1)
    }

    /// Gets the root cells of the container.
    #[must_use]
    pub fn roots(&self) -> Vec<Cell> {
        self.roots.iter().map(|i| self.cells[*i].clone()).collect()
    }

    /// Gets the first root of the container.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the container has no roots.
    pub fn root(&self) -> Result<Cell> {
        self.roots
            .first()
            .map(|i| self.cells[*i].clone())
            .ok_or(Error::InvalidRootIndex {
                index: 0,
                cells: self.cells.len(),
            })
    }

    /// Gets the number of cells stored in the container.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Gets the layout parameters of the container.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Parses a container from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the bytes are not a well-formed container of
    /// ordinary cells.
    #[allow(clippy::cast_possible_truncation)] // Sizes are bounded by the input length
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let magic = reader.read_uint(4)? as u32;
        if magic != BOC_MAGIC {
            return Err(Error::InvalidMagic { found: magic });
        }

        let flags = reader.read_uint(1)? as u8;
        let has_index = flags & 0x80 != 0;
        let has_crc32c = flags & 0x40 != 0;
        let has_cache_bits = flags & 0x20 != 0;
        let ref_size = usize::from(flags & 0x07);
        if ref_size == 0 || ref_size > 4 {
            return Err(Error::InvalidSize {
                field: "references",
                size:  ref_size,
            });
        }
        let offset_size = reader.read_uint(1)? as usize;
        if offset_size == 0 || offset_size > 8 {
            return Err(Error::InvalidSize {
                field: "offsets",
                size:  offset_size,
            });
        }

        let cell_count = reader.read_uint(ref_size)? as usize;
        let root_count = reader.read_uint(ref_size)? as usize;
        let absent = reader.read_uint(ref_size)? as usize;
        if absent != 0 {
            return Err(Error::InvalidSize {
                field: "absent cells",
                size:  absent,
            });
        }
        let total_size = reader.read_uint(offset_size)? as usize;

        let mut roots = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            let index = reader.read_uint(ref_size)? as usize;
            if index >= cell_count {
                return Err(Error::InvalidRootIndex {
                    index,
                    cells: cell_count,
                });
            }
            roots.push(index);
        }

        let index = if has_index {
            let mut entries = Vec::with_capacity(cell_count);
            for _ in 0..cell_count {
                entries.push(reader.read_uint(offset_size)?);
            }
            Some(entries)
        } else {
            None
        };

        let data_start = reader.pos;
        let mut raw_cells = Vec::with_capacity(cell_count);
        for cell_index in 0..cell_count {
            raw_cells.push(reader.read_cell(cell_index, cell_count, ref_size)?);
        }
        if reader.pos - data_start != total_size {
            return Err(Error::InvalidSize {
                field: "cell data",
                size:  reader.pos - data_start,
            });
        }

        if has_crc32c {
            let expected = crc32c(&bytes[..reader.pos]);
            let found = u32::from_le_bytes(reader.take(4)?.try_into().unwrap_or_default());
            if expected != found {
                return Err(Error::ChecksumMismatch { expected, found });
            }
        }
        if reader.pos != bytes.len() {
            return Err(Error::TrailingBytes {
                count: bytes.len() - reader.pos,
            });
        }

        // References always point forward, so building back to front sees
        // every child before its parents.
        let mut built: Vec<Option<Cell>> = vec![None; cell_count];
        for index in (0..cell_count).rev() {
            let (data, refs) = &raw_cells[index];
            let children = refs
                .iter()
                .map(|r| {
                    built[*r].clone().ok_or(Error::InvalidRefIndex {
                        cell:      index,
                        reference: *r,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            built[index] = Some(Cell::new(data.clone(), children)?);
        }
        let cells = built.into_iter().flatten().collect();
        let ref_indices = raw_cells.into_iter().map(|(_, refs)| refs).collect();

        Ok(Self {
            cells,
            ref_indices,
            roots,
            layout: Layout {
                has_index,
                has_crc32c,
                has_cache_bits,
                ref_size,
                offset_size,
                index,
            },
        })
    }

    /// Writes the container out using its layout.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let layout = &self.layout;
        let mut cell_data = Vec::new();
        let mut ends = Vec::with_capacity(self.cells.len());
        for (cell, refs) in self.cells.iter().zip(&self.ref_indices) {
            cell_data.extend_from_slice(&cell.descriptors());
            cell_data.extend(cell.padded_data());
            for r in refs {
                write_uint(&mut cell_data, *r as u64, layout.ref_size);
            }
            ends.push(cell_data.len() as u64);
        }

        let mut out = Vec::new();
        write_uint(&mut out, u64::from(BOC_MAGIC), 4);
        #[allow(clippy::cast_possible_truncation)] // The reference size is at most four
        let mut flags = layout.ref_size as u8;
        if layout.has_index {
            flags |= 0x80;
        }
        if layout.has_crc32c {
            flags |= 0x40;
        }
        if layout.has_cache_bits {
            flags |= 0x20;
        }
        out.push(flags);
        out.push(u8::try_from(layout.offset_size).unwrap_or(8));
        write_uint(&mut out, self.cells.len() as u64, layout.ref_size);
        write_uint(&mut out, self.roots.len() as u64, layout.ref_size);
        write_uint(&mut out, 0, layout.ref_size);
        write_uint(&mut out, cell_data.len() as u64, layout.offset_size);
        for root in &self.roots {
            write_uint(&mut out, *root as u64, layout.ref_size);
        }
        if layout.has_index {
            let entries = layout.index.as_ref().unwrap_or(&ends);
            for entry in entries {
                write_uint(&mut out, *entry, layout.offset_size);
            }
        }
        out.extend(cell_data);
        if layout.has_crc32c {
            let checksum = crc32c(&out);
            out.extend_from_slice(&checksum.to_le_bytes());
        }
        out
    }
}

/// Parses the container in `bytes` and returns its first root.
///
/// # Errors
///
/// Returns [`Err`] if the container is malformed or has no roots.
pub fn deserialize_root(bytes: &[u8]) -> Result<Cell> {
    BagOfCells::deserialize(bytes)?.root()
}

/// Serializes the DAG rooted at `cell` into a fresh container.
#[must_use]
pub fn serialize_root(cell: &Cell) -> Vec<u8> {
    BagOfCells::from_roots(std::slice::from_ref(cell)).serialize()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos:   usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self.pos + count;
        if end > self.bytes.len() {
            return Err(Error::Truncated {
                needed:    end,
                available: self.bytes.len(),
            });
        }
        let chunk = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(chunk)
    }

    fn read_uint(&mut self, size: usize) -> Result<u64> {
        Ok(self
            .take(size)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    #[allow(clippy::cast_possible_truncation)] // Indices are bounded by the cell count
    fn read_cell(
        &mut self,
        cell_index: usize,
        cell_count: usize,
        ref_size: usize,
    ) -> Result<(BitVec<u8, Msb0>, Vec<usize>)> {
        let descriptors = self.take(2)?;
        let (d1, d2) = (descriptors[0], descriptors[1]);
        let ref_count = usize::from(d1 & 0x07);
        if d1 & 0x08 != 0 || d1 & 0x10 != 0 || d1 >> 5 != 0 {
            return Err(Error::UnsupportedExoticCell);
        }
        if ref_count > 4 {
            return Err(Error::InvalidDescriptor {
                cell: cell_index,
                d1,
                d2,
            });
        }

        let byte_len = usize::from(d2).div_ceil(2);
        let raw = self.take(byte_len)?;
        let mut data: BitVec<u8, Msb0> = BitVec::from_slice(raw);
        if d2 % 2 == 1 {
            let tag = data.last_one().ok_or(Error::MissingCompletionTag)?;
            data.truncate(tag);
        }

        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let reference = self.read_uint(ref_size)? as usize;
            if reference <= cell_index || reference >= cell_count {
                return Err(Error::InvalidRefIndex {
                    cell: cell_index,
                    reference,
                });
            }
            refs.push(reference);
        }
        Ok((data, refs))
    }
}

fn write_uint(out: &mut Vec<u8>, value: u64, size: usize) {
    for index in (0..size).rev() {
        #[allow(clippy::cast_possible_truncation)] // Masked to a byte
        out.push((value >> (index * 8)) as u8);
    }
}

/// Computes the CRC-32C (Castagnoli) checksum of `bytes`.
///
/// No crate in our dependency stack provides this polynomial, and the table
/// free bitwise form is short enough to carry here.
#[must_use]
pub fn crc32c(bytes: &[u8]) -> u32 {
    let mut crc = 0xffff_ffff_u32;
    for byte in bytes {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0x82f6_3b78 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod test {
    use crate::{
        cell::{
            boc::{crc32c, deserialize_root, serialize_root, BagOfCells},
            Cell,
            CellBuilder,
        },
        error::cell::Error,
    };

    fn sample_tree() -> anyhow::Result<Cell> {
        let mut leaf = CellBuilder::new();
        leaf.store_uint(0x5, 3)?;
        let leaf = leaf.build()?;

        let mut middle = CellBuilder::new();
        middle.store_uint(0xbeef, 16)?.store_ref(leaf.clone())?;
        let middle = middle.build()?;

        let mut root = CellBuilder::new();
        root.store_bit(true)?
            .store_ref(middle)?
            .store_ref(leaf)?;
        Ok(root.build()?)
    }

    #[test]
    fn computes_the_reference_checksum() {
        assert_eq!(crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn round_trips_trees_with_shared_children() -> anyhow::Result<()> {
        let root = sample_tree()?;
        let bytes = serialize_root(&root);
        let decoded = deserialize_root(&bytes)?;

        assert_eq!(decoded, root);
        assert_eq!(BagOfCells::deserialize(&bytes)?.cell_count(), 3);
        Ok(())
    }

    #[test]
    fn reserializes_foreign_layouts_byte_for_byte() -> anyhow::Result<()> {
        // An indexed container without a checksum holding a single cell with
        // the 8 data bits 0x01.
        let bytes = hex::decode("b5ee9c728101010100030003000201")?;
        let container = BagOfCells::deserialize(&bytes)?;

        assert!(container.layout().has_index);
        assert_eq!(container.serialize(), bytes);
        Ok(())
    }

    #[test]
    fn rejects_corrupted_checksums() -> anyhow::Result<()> {
        let mut bytes = serialize_root(&sample_tree()?);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        assert!(matches!(
            BagOfCells::deserialize(&bytes),
            Err(Error::ChecksumMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn rejects_bad_magic() {
        let result = BagOfCells::deserialize(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(result.err(), Some(Error::InvalidMagic { found: 0x0001_0203 }));
    }
}
