//! Concrete decoding of cells against labels.
//!
//! This is the concrete counterpart of the structural constraints generated by
//! the inference manager: a cell that satisfies those constraints decodes
//! successfully here, and one that does not yields the same
//! [`StructuralError`] that the symbolic path is classified with.

use bitvec::{order::Msb0, vec::BitVec};
use num_bigint::BigInt;
use serde::Serialize;

use crate::{
    cell::{Cell, CellSlice},
    error::cell,
    schema::{
        label::{Label, LabelArena, LabelId, Structure},
        Endianness,
        StructuralError,
    },
    utility::{bit_string, bits_to_bigint},
};

/// A value read out of a cell according to a label.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodedValue {
    Integer {
        #[serde(with = "crate::utility::decimal")]
        value:  BigInt,
        width:  u16,
        offset: usize,
    },
    Coins {
        #[serde(with = "crate::utility::decimal")]
        value:  BigInt,
        offset: usize,
    },
    Address {
        address: Address,
        offset:  usize,
    },
    Composite {
        name:   String,
        fields: Vec<DecodedValue>,
    },
    Ref {
        value: Box<DecodedValue>,
    },
    MaybeRef {
        value: Option<Box<DecodedValue>>,
    },
    Either {
        right: bool,
        value: Box<DecodedValue>,
    },

    /// Content read under the [`Label::Unknown`] label, kept as-is.
    Opaque {
        offset: usize,
        bits:   String,
        refs:   usize,
    },
}

/// A decoded `MsgAddress`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Address {
    None,
    External { bits: String },
    Std { workchain: i32, address: String },
    Var { workchain: i32, address: String },
}

/// Decodes cells against the labels of an arena.
///
/// Nesting deeper than `max_depth` cells is not decoded further, yielding
/// [`DecodedValue::Opaque`] content instead.
#[derive(Clone, Copy, Debug)]
pub struct Decoder<'a> {
    arena:     &'a LabelArena,
    max_depth: usize,
}

type Result<T> = std::result::Result<T, StructuralError>;

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(arena: &'a LabelArena, max_depth: usize) -> Self {
        Self { arena, max_depth }
    }

    /// Decodes the whole of `cell` as a value of `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the cell does not match the label, including when it
    /// holds data beyond what a fully determined label describes.
    pub fn decode_cell(&self, label: LabelId, cell: &Cell) -> Result<DecodedValue> {
        self.decode_cell_at(label, cell, 0)
    }

    /// Decodes a value of `label` from the front of `slice`, advancing it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slice does not match the label.
    pub fn decode(&self, label: LabelId, slice: &mut CellSlice) -> Result<DecodedValue> {
        self.decode_at(label, slice, 0)
    }

    fn decode_cell_at(&self, label: LabelId, cell: &Cell, depth: usize) -> Result<DecodedValue> {
        let mut slice = cell.to_slice();
        let value = self.decode_at(label, &mut slice, depth)?;
        if !self.arena[label].definitely_has_any() && !slice.is_empty() {
            return Err(StructuralError::TrailingData);
        }
        Ok(value)
    }

    fn decode_at(&self, label: LabelId, slice: &mut CellSlice, depth: usize) -> Result<DecodedValue> {
        if depth > self.max_depth {
            return Ok(opaque(slice));
        }
        let offset = slice.data_pos();
        let value = match &self.arena[label] {
            Label::Primitive {
                width,
                signed,
                endianness,
            } => {
                let bits = slice.load_bits(usize::from(*width)).map_err(structural)?;
                let bits = match endianness {
                    Endianness::Little if width % 8 == 0 => {
                        let bytes = bits.chunks(8).rev();
                        bytes.flat_map(|b| b.iter().by_vals()).collect::<BitVec<u8, Msb0>>()
                    }
                    _ => bits,
                };
                DecodedValue::Integer {
                    value: bits_to_bigint(&bits, *signed),
                    width: *width,
                    offset,
                }
            }
            Label::Coins => DecodedValue::Coins {
                value: slice.load_coins().map_err(structural)?,
                offset,
            },
            Label::MsgAddress => DecodedValue::Address {
                address: load_address(slice)?,
                offset,
            },
            Label::MaybeRef(inner) => {
                let value = if slice.load_bit().map_err(structural)? {
                    let child = slice.load_ref().map_err(structural)?;
                    Some(Box::new(self.decode_cell_at(*inner, &child, depth + 1)?))
                } else {
                    None
                };
                DecodedValue::MaybeRef { value }
            }
            Label::Either { left, right } => {
                let is_right = slice.load_bit().map_err(structural)?;
                let target = if is_right { *right } else { *left };
                DecodedValue::Either {
                    right: is_right,
                    value: Box::new(self.decode_at(target, slice, depth)?),
                }
            }
            Label::Unknown => opaque(slice),
            Label::Composite(composite) => {
                let mut fields = Vec::new();
                let mut structure = composite.structure.as_ref();
                loop {
                    match structure {
                        Structure::Empty => break,
                        Structure::KnownTypePrefix { label, rest } => {
                            let field = self.decode_at(*label, slice, depth)?;
                            let stop = matches!(field, DecodedValue::Opaque { .. });
                            fields.push(field);
                            if stop {
                                break;
                            }
                            structure = rest.as_ref();
                        }
                        Structure::LoadRef { label, rest } => {
                            let child = slice.load_ref().map_err(structural)?;
                            let value = self.decode_cell_at(*label, &child, depth + 1)?;
                            fields.push(DecodedValue::Ref {
                                value: Box::new(value),
                            });
                            structure = rest.as_ref();
                        }
                        Structure::SwitchPrefix { width, variants } => {
                            let key = slice.load_uint(usize::from(*width)).map_err(structural)?;
                            let (_, next) = variants
                                .iter()
                                .find(|(k, _)| *k == key)
                                .ok_or(StructuralError::NoMatchingConstructor { width: *width })?;
                            structure = next.as_ref();
                        }
                    }
                }
                DecodedValue::Composite {
                    name: composite.name.clone(),
                    fields,
                }
            }
        };
        Ok(value)
    }
}

/// Consumes everything left in `slice` as opaque content.
fn opaque(slice: &mut CellSlice) -> DecodedValue {
    let offset = slice.data_pos();
    let bits = bit_string(slice.remaining_data());
    let refs = slice.remaining_refs();
    // Taking the whole remainder cannot fail.
    let _ = slice.split_prefix(slice.remaining_bits(), refs);
    DecodedValue::Opaque { offset, bits, refs }
}

fn structural(error: cell::Error) -> StructuralError {
    match error {
        cell::Error::RefUnderflow => StructuralError::ExpectedRef,
        _ => StructuralError::EndOfData,
    }
}

#[allow(clippy::cast_possible_truncation)] // Field widths are at most 32 bits
fn load_address(slice: &mut CellSlice) -> Result<Address> {
    let tag = slice.load_uint(2).map_err(structural)?;
    let address = match tag {
        0b00 => Address::None,
        0b01 => {
            let len = slice.load_uint(9).map_err(structural)? as usize;
            let bits = slice.load_bits(len).map_err(structural)?;
            Address::External {
                bits: bit_string(&bits),
            }
        }
        _ => {
            if slice.load_bit().map_err(structural)? {
                // anycast_info$_ depth:(#<= 30) rewrite_pfx:(bits depth)
                let depth = slice.load_uint(5).map_err(structural)? as usize;
                slice.skip_bits(depth).map_err(structural)?;
            }
            if tag == 0b10 {
                let workchain = slice.load_bigint(8, true).map_err(structural)?;
                let address = slice.load_bits(256).map_err(structural)?;
                Address::Std {
                    workchain: i32::try_from(workchain).unwrap_or_default(),
                    address:   format!("{:064x}", bits_to_bigint(&address, false)),
                }
            } else {
                let len = slice.load_uint(9).map_err(structural)? as usize;
                let workchain = slice.load_bigint(32, true).map_err(structural)?;
                let address = slice.load_bits(len).map_err(structural)?;
                Address::Var {
                    workchain: i32::try_from(workchain).unwrap_or_default(),
                    address:   bit_string(&address),
                }
            }
        }
    };
    Ok(address)
}

#[cfg(test)]
mod test {
    use bitvec::{order::Msb0, vec::BitVec};
    use num_bigint::BigInt;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::{
        cell::{Cell, CellBuilder},
        schema::{
            decode::{Address, DecodedValue, Decoder},
            label::{Endianness, LabelArena},
            transformer::SchemaTransformer,
            SchemaDocument,
            StructuralError,
        },
        utility::bits_to_bigint,
    };

    fn arena(value: serde_json::Value) -> anyhow::Result<LabelArena> {
        let doc: SchemaDocument = serde_json::from_value(value)?;
        Ok(SchemaTransformer::new(&doc).transform()?)
    }

    #[test]
    fn reads_a_five_bit_integer_at_offset_zero() -> anyhow::Result<()> {
        let mut arena = LabelArena::new();
        let label = arena.primitive(5, true, Endianness::Big);
        let mut builder = CellBuilder::new();
        builder.store_int(3, 5)?;
        let cell = builder.build()?;

        let value = Decoder::new(&arena, 10).decode_cell(label, &cell)?;
        assert_eq!(value, DecodedValue::Integer {
            value:  BigInt::from(3),
            width:  5,
            offset: 0,
        });
        Ok(())
    }

    fn maybe_cell_schema() -> anyhow::Result<LabelArena> {
        arena(json!({"definitions": [{
            "name": "Holder",
            "constructors": [{"name": "holder", "fields": [
                {"type": {"kind": "maybe", "inner": {"kind": "ref", "inner": {"kind": "cell"}}}}
            ]}]
        }]}))
    }

    #[test]
    fn present_maybe_without_a_reference_is_a_structural_error() -> anyhow::Result<()> {
        let arena = maybe_cell_schema()?;
        let holder = arena.by_name("Holder").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut builder = CellBuilder::new();
        builder.store_bit(true)?;
        let cell = builder.build()?;

        let result = Decoder::new(&arena, 10).decode_cell(holder, &cell);
        assert_eq!(result, Err(StructuralError::ExpectedRef));
        assert_eq!(
            StructuralError::ExpectedRef.to_string(),
            "expected a reference but none found"
        );
        Ok(())
    }

    #[test]
    fn present_maybe_with_a_reference_decodes() -> anyhow::Result<()> {
        let arena = maybe_cell_schema()?;
        let holder = arena.by_name("Holder").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut builder = CellBuilder::new();
        builder.store_bit(true)?.store_ref(Cell::empty())?;
        let cell = builder.build()?;

        let value = Decoder::new(&arena, 10).decode_cell(holder, &cell)?;
        let DecodedValue::Composite { fields, .. } = value else {
            anyhow::bail!("expected a composite");
        };
        assert!(matches!(&fields[0], DecodedValue::MaybeRef { value: Some(_) }));
        Ok(())
    }

    #[test]
    fn selects_constructors_and_reports_mismatches() -> anyhow::Result<()> {
        let arena = arena(json!({"definitions": [{
            "name": "Op",
            "constructors": [
                {"name": "a", "tag": "$00", "fields": [{"type": {"kind": "uint", "bits": 4}}]},
                {"name": "b", "tag": "$01", "fields": [{"type": {"kind": "coins"}}]}
            ]
        }]}))?;
        let op = arena.by_name("Op").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let decoder = Decoder::new(&arena, 10);

        let mut builder = CellBuilder::new();
        builder.store_uint(0b01, 2)?.store_coins(&BigInt::from(1000))?;
        let value = decoder.decode_cell(op, &builder.build()?)?;
        let DecodedValue::Composite { fields, .. } = value else {
            anyhow::bail!("expected a composite");
        };
        assert_eq!(fields, vec![DecodedValue::Coins {
            value:  BigInt::from(1000),
            offset: 2,
        }]);

        let mut builder = CellBuilder::new();
        builder.store_uint(0b10, 2)?;
        assert_eq!(
            decoder.decode_cell(op, &builder.build()?),
            Err(StructuralError::NoMatchingConstructor { width: 1 })
        );

        let mut builder = CellBuilder::new();
        builder.store_uint(0b00, 2)?.store_uint(1, 4)?.store_bit(true)?;
        assert_eq!(
            decoder.decode_cell(op, &builder.build()?),
            Err(StructuralError::TrailingData)
        );
        Ok(())
    }

    #[test]
    fn decodes_standard_addresses() -> anyhow::Result<()> {
        let arena = LabelArena::new();
        let mut builder = CellBuilder::new();
        builder.store_uint(0b100, 3)?.store_int(-1, 8)?;
        for _ in 0..32 {
            builder.store_uint(0xab, 8)?;
        }
        let value = Decoder::new(&arena, 10).decode_cell(arena.msg_address(), &builder.build()?)?;

        assert_eq!(value, DecodedValue::Address {
            address: Address::Std {
                workchain: -1,
                address:   "ab".repeat(32),
            },
            offset:  0,
        });
        Ok(())
    }

    #[test]
    fn serializes_integers_as_decimal_strings() -> anyhow::Result<()> {
        let value = DecodedValue::Integer {
            value:  BigInt::from(-7),
            width:  8,
            offset: 3,
        };
        assert_eq!(
            serde_json::to_value(&value)?,
            json!({"kind": "integer", "value": "-7", "width": 8, "offset": 3})
        );
        Ok(())
    }

    fn pair_schema() -> anyhow::Result<LabelArena> {
        arena(json!({"definitions": [{
            "name": "Pair",
            "constructors": [{"name": "pair", "fields": [
                {"name": "flag", "type": {"kind": "maybe", "inner": {"kind": "uint", "bits": 8}}},
                {"name": "choice", "type": {
                    "kind": "either",
                    "left": {"kind": "uint", "bits": 4},
                    "right": {"kind": "int", "bits": 16}
                }},
                {"name": "extra", "type": {"kind": "maybe", "inner": {"kind": "ref", "inner": {"kind": "uint", "bits": 16}}}}
            ]}]
        }]}))
    }

    proptest! {
        #[test]
        fn integers_decode_to_the_values_they_were_built_from(
            bits in prop::collection::vec(any::<bool>(), 1..=257),
            signed in any::<bool>(),
        ) {
            let width = bits.len();
            let bits: BitVec<u8, Msb0> = bits.into_iter().collect();
            let value = bits_to_bigint(&bits, signed);

            let mut arena = LabelArena::new();
            let label = arena.primitive(u16::try_from(width).unwrap(), signed, Endianness::Big);
            let mut builder = CellBuilder::new();
            builder.store_bigint(&value, width, signed).unwrap();
            let cell = builder.build().unwrap();

            let decoded = Decoder::new(&arena, 10).decode_cell(label, &cell).unwrap();
            prop_assert_eq!(decoded, DecodedValue::Integer {
                value,
                width: u16::try_from(width).unwrap(),
                offset: 0,
            });
        }

        #[test]
        fn composites_decode_to_the_values_they_were_built_from(
            flag in prop::option::of(any::<u8>()),
            right in any::<bool>(),
            left_value in 0u64..16,
            right_value in any::<i16>(),
            extra in prop::option::of(any::<u16>()),
        ) {
            let arena = pair_schema().unwrap();
            let pair = arena.by_name("Pair").unwrap();
            let mut expected = Vec::new();
            let mut builder = CellBuilder::new();

            builder.store_bit(flag.is_some()).unwrap();
            if let Some(flag) = flag {
                expected.push(DecodedValue::Integer {
                    value:  BigInt::from(flag),
                    width:  8,
                    offset: builder.bit_len(),
                });
                builder.store_uint(u64::from(flag), 8).unwrap();
            }

            builder.store_bit(right).unwrap();
            let offset = builder.bit_len();
            if right {
                expected.push(DecodedValue::Integer {
                    value: BigInt::from(right_value),
                    width: 16,
                    offset,
                });
                builder.store_int(i64::from(right_value), 16).unwrap();
            } else {
                expected.push(DecodedValue::Integer {
                    value: BigInt::from(left_value),
                    width: 4,
                    offset,
                });
                builder.store_uint(left_value, 4).unwrap();
            }

            builder.store_bit(extra.is_some()).unwrap();
            let value = match extra {
                Some(extra) => {
                    let mut child = CellBuilder::new();
                    child.store_uint(u64::from(extra), 16).unwrap();
                    builder.store_ref(child.build().unwrap()).unwrap();
                    Some(Box::new(DecodedValue::Integer {
                        value:  BigInt::from(extra),
                        width:  16,
                        offset: 0,
                    }))
                }
                None => None,
            };
            expected.push(DecodedValue::MaybeRef { value });

            let decoded = Decoder::new(&arena, 10).decode_cell(pair, &builder.build().unwrap()).unwrap();
            let DecodedValue::Composite { fields, .. } = decoded else {
                panic!("expected a composite");
            };
            prop_assert_eq!(fields, expected);
        }
    }
}
