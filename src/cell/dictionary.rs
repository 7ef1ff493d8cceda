//! Concrete reading and writing of `Hashmap n X` dictionaries, the prefix
//! trees in which compiled contracts store their method tables.

use bitvec::{order::Msb0, slice::BitSlice, vec::BitVec};

use crate::{
    cell::{Cell, CellBuilder, CellSlice},
    error::cell::{Error, Result},
    utility::bits_to_bigint,
};

/// Parses the non-empty dictionary rooted at `root` whose keys are `key_bits`
/// wide, returning its entries ordered by key bits.
///
/// # Errors
///
/// Returns [`Err`] if the cell tree is not a well-formed dictionary.
pub fn parse_dictionary(root: &Cell, key_bits: usize) -> Result<Vec<(BitVec<u8, Msb0>, CellSlice)>> {
    let mut entries = Vec::new();
    walk(root, key_bits, BitVec::new(), &mut entries)?;
    Ok(entries)
}

/// Parses a dictionary whose keys are signed integers, as used for the method
/// table of a contract.
///
/// # Errors
///
/// Returns [`Err`] if the cell tree is not a well-formed dictionary.
pub fn parse_signed_dictionary(root: &Cell, key_bits: usize) -> Result<Vec<(i64, CellSlice)>> {
    parse_dictionary(root, key_bits)?
        .into_iter()
        .map(|(key, value)| {
            let key = i64::try_from(bits_to_bigint(&key, true)).map_err(|_| {
                Error::InvalidDictionary {
                    reason: "key does not fit into 64 bits".into(),
                }
            })?;
            Ok((key, value))
        })
        .collect()
}

fn walk(
    cell: &Cell,
    remaining: usize,
    mut prefix: BitVec<u8, Msb0>,
    entries: &mut Vec<(BitVec<u8, Msb0>, CellSlice)>,
) -> Result<()> {
    let mut slice = cell.to_slice();
    let label = read_label(&mut slice, remaining)?;
    if label.len() > remaining {
        return Err(Error::InvalidDictionary {
            reason: format!("label of {} bits exceeds the {remaining} remaining", label.len()),
        });
    }
    prefix.extend_from_bitslice(&label);
    let remaining = remaining - label.len();

    if remaining == 0 {
        entries.push((prefix, slice));
        return Ok(());
    }

    let left = slice.load_ref()?;
    let right = slice.load_ref()?;
    for (bit, child) in [(false, left), (true, right)] {
        let mut child_prefix = prefix.clone();
        child_prefix.push(bit);
        walk(&child, remaining - 1, child_prefix, entries)?;
    }
    Ok(())
}

/// The number of bits needed to write any length in `0..=max`.
fn length_bits(max: usize) -> usize {
    (usize::BITS - max.leading_zeros()) as usize
}

#[allow(clippy::cast_possible_truncation)] // Label lengths are bounded by the key width
fn read_label(slice: &mut CellSlice, max: usize) -> Result<BitVec<u8, Msb0>> {
    if !slice.load_bit()? {
        // hml_short$0 len:(Unary ~n) s:(n * Bit)
        let mut len = 0;
        while slice.load_bit()? {
            len += 1;
        }
        return slice.load_bits(len);
    }
    if !slice.load_bit()? {
        // hml_long$10 n:(#<= m) s:(n * Bit)
        let len = slice.load_uint(length_bits(max))? as usize;
        return slice.load_bits(len);
    }
    // hml_same$11 v:Bit n:(#<= m)
    let bit = slice.load_bit()?;
    let len = slice.load_uint(length_bits(max))? as usize;
    let mut label = BitVec::new();
    label.resize(len, bit);
    Ok(label)
}

/// Builds a dictionary with `key_bits`-bit keys holding `entries`, storing
/// each value slice inline in its leaf.
///
/// # Errors
///
/// Returns [`Err`] if `entries` is empty, holds duplicate or mis-sized keys,
/// or a value does not fit into its leaf.
pub fn build_dictionary(entries: &[(BitVec<u8, Msb0>, CellSlice)], key_bits: usize) -> Result<Cell> {
    if entries.is_empty() {
        return Err(Error::InvalidDictionary {
            reason: "an empty dictionary has no root cell".into(),
        });
    }
    if entries.iter().any(|(key, _)| key.len() != key_bits) {
        return Err(Error::InvalidDictionary {
            reason: format!("all keys must be {key_bits} bits wide"),
        });
    }
    let mut sorted: Vec<&(BitVec<u8, Msb0>, CellSlice)> = entries.iter().collect();
    sorted.sort_by(|l, r| l.0.cmp(&r.0));
    build_node(&sorted, 0, key_bits)
}

fn build_node(entries: &[&(BitVec<u8, Msb0>, CellSlice)], start: usize, key_bits: usize) -> Result<Cell> {
    let first: &BitSlice<u8, Msb0> = &entries[0].0[start..];
    let common = entries
        .iter()
        .map(|(key, _)| {
            key[start..]
                .iter()
                .zip(first.iter())
                .take_while(|(l, r)| **l == **r)
                .count()
        })
        .min()
        .unwrap_or(0);

    let remaining = key_bits - start;
    let mut builder = CellBuilder::new();
    builder
        .store_bit(true)?
        .store_bit(false)?
        .store_uint(common as u64, length_bits(remaining))?
        .store_bits(&first[..common])?;

    if common == remaining {
        if entries.len() > 1 {
            return Err(Error::InvalidDictionary {
                reason: "duplicate keys".into(),
            });
        }
        builder.store_slice(&entries[0].1)?;
        return builder.build();
    }

    let split = start + common;
    let (left, right): (Vec<_>, Vec<_>) = entries.iter().copied().partition(|(key, _)| !key[split]);
    builder.store_ref(build_node(&left, split + 1, key_bits)?)?;
    builder.store_ref(build_node(&right, split + 1, key_bits)?)?;
    builder.build()
}

#[cfg(test)]
mod test {
    use bitvec::{order::Msb0, vec::BitVec};

    use crate::cell::{
        dictionary::{build_dictionary, parse_signed_dictionary},
        CellBuilder,
    };

    fn key(value: i64, bits: usize) -> BitVec<u8, Msb0> {
        let mut builder = CellBuilder::new();
        builder.store_int(value, bits).expect("key fits");
        builder.data().to_bitvec()
    }

    #[test]
    fn round_trips_signed_method_tables() -> anyhow::Result<()> {
        let mut entries = Vec::new();
        for (id, payload) in [(0, 0xa0), (-1, 0xa1), (85143, 0xa2)] {
            let mut value = CellBuilder::new();
            value.store_uint(payload, 8)?;
            entries.push((key(id, 19), value.build()?.to_slice()));
        }

        let root = build_dictionary(&entries, 19)?;
        let parsed = parse_signed_dictionary(&root, 19)?;

        let mut ids: Vec<i64> = parsed.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![-1, 0, 85143]);
        for (id, mut value) in parsed {
            let expected = match id {
                0 => 0xa0,
                -1 => 0xa1,
                _ => 0xa2,
            };
            assert_eq!(value.load_uint(8)?, expected);
        }
        Ok(())
    }

    #[test]
    fn rejects_duplicate_keys() -> anyhow::Result<()> {
        let value = CellBuilder::new().build()?.to_slice();
        let entries = vec![(key(3, 8), value.clone()), (key(3, 8), value)];
        assert!(build_dictionary(&entries, 8).is_err());
        Ok(())
    }
}
