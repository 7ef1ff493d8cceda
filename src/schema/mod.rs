//! This module contains the schema subsystem: the externally supplied schema
//! document, the labels it compiles down to, and the concrete decoding of cells
//! against those labels.
//!
//! A schema document lists named type definitions. Each definition has one or
//! more constructors, each with a fixed bit tag and an ordered list of typed
//! fields. The [`transformer`] compiles definitions into [`label::Label`]s held
//! in a [`label::LabelArena`].

pub mod decode;
pub mod label;
pub mod transformer;

use bitvec::{order::Msb0, vec::BitVec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::schema::{Error, Result};

/// A schema document: the set of type definitions available for labelling
/// cells.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SchemaDocument {
    pub definitions: Vec<Definition>,
}

impl SchemaDocument {
    /// Parses a schema document from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `text` is not a valid schema document.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Malformed {
            reason: e.to_string(),
        })
    }

    /// Gets the definition called `name`, if it exists.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Adds the built-in definitions of the inbound message headers,
    /// [`INTERNAL_MESSAGE_HEADER`] and [`EXTERNAL_MESSAGE_HEADER`], unless the
    /// document already defines them.
    #[must_use]
    pub fn with_message_headers(mut self) -> Self {
        let field = |name: &str, ty: TypeExpr| Field {
            name: Some(name.to_string()),
            ty,
        };
        let uint = |bits: u16| TypeExpr::Uint {
            bits:       Width::Const(bits),
            endianness: Endianness::Big,
        };
        let rest = Field { name: None, ty: TypeExpr::Any };

        let internal = Definition {
            name:         INTERNAL_MESSAGE_HEADER.into(),
            params:       Vec::new(),
            constructors: vec![Constructor {
                name:   "int_msg_info".into(),
                tag:    "$0".into(),
                fields: vec![
                    field("ihr_disabled", TypeExpr::Bool),
                    field("bounce", TypeExpr::Bool),
                    field("bounced", TypeExpr::Bool),
                    field("src", TypeExpr::MsgAddress),
                    field("dest", TypeExpr::MsgAddress),
                    field("value", TypeExpr::Coins),
                    field("extra", TypeExpr::Maybe {
                        inner: Box::new(TypeExpr::Ref {
                            inner: Box::new(TypeExpr::Cell),
                        }),
                    }),
                    field("ihr_fee", TypeExpr::Coins),
                    field("fwd_fee", TypeExpr::Coins),
                    field("created_lt", uint(64)),
                    field("created_at", uint(32)),
                    rest.clone(),
                ],
            }],
        };
        let external = Definition {
            name:         EXTERNAL_MESSAGE_HEADER.into(),
            params:       Vec::new(),
            constructors: vec![Constructor {
                name:   "ext_in_msg_info".into(),
                tag:    "$10".into(),
                fields: vec![
                    field("src", TypeExpr::MsgAddress),
                    field("dest", TypeExpr::MsgAddress),
                    field("import_fee", TypeExpr::Coins),
                    rest,
                ],
            }],
        };

        for definition in [internal, external] {
            if self.definition(&definition.name).is_none() {
                self.definitions.push(definition);
            }
        }
        self
    }
}

/// The name of the built-in definition of an inbound internal message.
pub const INTERNAL_MESSAGE_HEADER: &str = "InternalMessageHeader";

/// The name of the built-in definition of an inbound external message.
pub const EXTERNAL_MESSAGE_HEADER: &str = "ExternalMessageHeader";

/// A named type definition, possibly parameterized.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Definition {
    pub name: String,

    /// The names of the type parameters, bound positionally by the arguments
    /// at each use of the definition.
    #[serde(default)]
    pub params: Vec<String>,

    pub constructors: Vec<Constructor>,
}

/// One constructor of a definition.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Constructor {
    pub name: String,

    /// The constructor tag, either binary (`$0110`) or hexadecimal
    /// (`#0f8a7ea5`). An empty tag (or `$_`/`#_`) matches without consuming
    /// any bits.
    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Constructor {
    /// Parses the constructor's tag into its bits.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the tag is malformed.
    pub fn tag_bits(&self) -> Result<BitVec<u8, Msb0>> {
        parse_tag(&self.tag)
    }
}

/// A field of a constructor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Field {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub ty: TypeExpr,
}

/// The byte order of a primitive integer field.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// A field type expression.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeExpr {
    /// `#`, a 32-bit unsigned integer.
    Nat,
    Uint {
        bits: Width,
        #[serde(default)]
        endianness: Endianness,
    },
    Int {
        bits: Width,
        #[serde(default)]
        endianness: Endianness,
    },
    Bits {
        bits: Width,
    },
    Bool,
    Coins,
    MsgAddress,

    /// Arbitrary remaining content of the current cell.
    Cell,

    /// Arbitrary content, equivalent to [`TypeExpr::Cell`] when inline.
    Any,

    /// `^X`, a value of type `X` stored in the next child cell.
    Ref {
        inner: Box<TypeExpr>,
    },
    Maybe {
        inner: Box<TypeExpr>,
    },
    Either {
        left:  Box<TypeExpr>,
        right: Box<TypeExpr>,
    },

    /// A use of another definition.
    Named {
        name: String,
        #[serde(default)]
        args: Vec<TypeArg>,
    },

    /// A use of a type parameter of the enclosing definition.
    Param {
        name: String,
    },
}

/// The width of a sized field, fixed or bound through a parameter.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Width {
    Const(u16),
    Param(String),
}

/// An argument supplied to a parameterized definition.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypeArg {
    Nat(u16),
    Type(TypeExpr),
}

/// A mismatch between the contents of a cell and the label assigned to it.
///
/// These are recorded as the result of the path on which they were found,
/// never raised as engine errors.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralError {
    #[error("expected a reference but none found")]
    ExpectedRef,

    #[error("read past the end of the cell data")]
    EndOfData,

    #[error("no constructor matches the {width}-bit prefix")]
    NoMatchingConstructor { width: u16 },

    #[error("the cell holds data beyond its schema")]
    TrailingData,
}

/// Parses a constructor tag into its bits.
///
/// # Errors
///
/// Returns [`Err`] if the tag is neither binary nor hexadecimal.
pub fn parse_tag(tag: &str) -> Result<BitVec<u8, Msb0>> {
    let malformed = || Error::MalformedTag {
        tag: tag.to_string(),
    };
    let mut bits = BitVec::new();
    if tag.is_empty() || tag == "$_" || tag == "#_" {
        return Ok(bits);
    }
    if let Some(binary) = tag.strip_prefix('$') {
        for c in binary.chars() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ => return Err(malformed()),
            }
        }
    } else if let Some(hex) = tag.strip_prefix('#') {
        for c in hex.chars() {
            let nibble = c.to_digit(16).ok_or_else(malformed)?;
            for shift in (0..4).rev() {
                bits.push((nibble >> shift) & 1 == 1);
            }
        }
    } else {
        return Err(malformed());
    }
    Ok(bits)
}

#[cfg(test)]
mod test {
    use crate::{
        schema::{parse_tag, SchemaDocument, TypeArg, TypeExpr, Width},
        utility::bit_string,
    };

    #[test]
    fn parses_binary_and_hex_tags() -> anyhow::Result<()> {
        assert_eq!(bit_string(&parse_tag("$0110")?), "0110");
        assert_eq!(bit_string(&parse_tag("#a5")?), "10100101");
        assert!(parse_tag("$_")?.is_empty());
        assert!(parse_tag("0110").is_err());
        Ok(())
    }

    #[test]
    fn reads_documents_from_json() -> anyhow::Result<()> {
        let document = SchemaDocument::from_json(
            r#"{"definitions": [{
                "name": "Pair",
                "params": ["X"],
                "constructors": [{"name": "pair", "tag": "$1", "fields": [
                    {"name": "a", "type": {"kind": "uint", "bits": 8}},
                    {"name": "b", "type": {"kind": "param", "name": "X"}},
                    {"name": "c", "type": {"kind": "named", "name": "Pair", "args": [4]}}
                ]}]
            }]}"#,
        )?;

        let pair = document.definition("Pair").expect("definition exists");
        let fields = &pair.constructors[0].fields;
        assert_eq!(
            fields[0].ty,
            TypeExpr::Uint {
                bits:       Width::Const(8),
                endianness: crate::schema::Endianness::Big,
            }
        );
        assert_eq!(
            fields[2].ty,
            TypeExpr::Named {
                name: "Pair".into(),
                args: vec![TypeArg::Nat(4)],
            }
        );
        Ok(())
    }
}
