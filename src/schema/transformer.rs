//! This module contains the [`SchemaTransformer`], which compiles the
//! definitions of a [`SchemaDocument`] into [`Label`]s.

use std::{collections::HashMap, rc::Rc};

use bitvec::{order::Msb0, slice::BitSlice, vec::BitVec};
use tracing::debug;

use crate::{
    error::schema::{Error, Result},
    schema::{
        label::{Composite, Label, LabelArena, LabelId, Structure},
        Definition,
        Endianness,
        SchemaDocument,
        TypeArg,
        TypeExpr,
        Width,
    },
};

/// The widest integer field the VM can load in a single instruction.
const MAX_INTEGER_WIDTH: u16 = 257;

/// The widest bit string that fits into a single cell.
const MAX_BITS_WIDTH: u16 = 1023;

/// The widest switch prefix, beyond which constructor tags are split over
/// nested switches.
const MAX_PREFIX_WIDTH: usize = 64;

/// Compiles schema definitions into labels.
///
/// Every `(definition, arguments)` pair is compiled at most once. The handle for
/// a definition is registered before its constructors are compiled, so that
/// recursive uses of the definition resolve to the handle rather than being
/// expanded again.
#[derive(Debug)]
pub struct SchemaTransformer<'doc> {
    document: &'doc SchemaDocument,
    arena:    LabelArena,
    memo:     HashMap<(String, Vec<TypeArg>), LabelId>,
}

impl<'doc> SchemaTransformer<'doc> {
    /// Creates a new transformer over `document`.
    #[must_use]
    pub fn new(document: &'doc SchemaDocument) -> Self {
        Self {
            document,
            arena: LabelArena::new(),
            memo: HashMap::new(),
        }
    }

    /// Compiles every definition in the document that takes no parameters,
    /// returning the arena holding their labels.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any definition is malformed.
    pub fn transform(mut self) -> Result<LabelArena> {
        for definition in &self.document.definitions {
            if definition.params.is_empty() {
                self.label_for_named(&definition.name, &[])?;
            }
        }
        debug!(labels = self.arena.len(), "Transformed schema document");
        Ok(self.arena)
    }

    /// Compiles the definition `name` applied to `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the definition or anything it uses is malformed.
    pub fn label_for_named(&mut self, name: &str, args: &[TypeArg]) -> Result<LabelId> {
        let key = (name.to_string(), args.to_vec());
        if let Some(id) = self.memo.get(&key) {
            return Ok(*id);
        }

        let definition = self.definition(name)?;
        if definition.params.len() != args.len() {
            return Err(Error::ArityMismatch {
                name:     name.to_string(),
                expected: definition.params.len(),
                actual:   args.len(),
            });
        }
        if definition.constructors.is_empty() {
            return Err(Error::NoConstructors {
                name: name.to_string(),
            });
        }

        let id = self.arena.push(Label::Composite(Composite {
            name:               name.to_string(),
            structure:          Structure::empty(),
            definitely_has_any: false,
        }));
        self.memo.insert(key, id);

        let env: HashMap<&str, &TypeArg> =
            definition.params.iter().map(String::as_str).zip(args.iter()).collect();

        let mut variants = Vec::with_capacity(definition.constructors.len());
        let mut has_any = false;
        for constructor in &definition.constructors {
            let fields = constructor
                .fields
                .iter()
                .map(|f| substitute(&f.ty, &env))
                .collect::<Result<Vec<_>>>()?;
            let (structure, any) = self.compile_fields(&fields)?;
            has_any |= any;
            variants.push((constructor.tag_bits()?, structure));
        }
        let structure = switch(name, &variants)?;

        self.arena.replace(
            id,
            Label::Composite(Composite {
                name: name.to_string(),
                structure,
                definitely_has_any: has_any,
            }),
        );
        if args.is_empty() {
            self.arena.name(name, id);
        }
        Ok(id)
    }

    /// Gets the label for a type used on its own, such as the target of a
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the type is malformed.
    pub fn label_for(&mut self, ty: &TypeExpr) -> Result<LabelId> {
        let id = match ty {
            TypeExpr::Nat => self.arena.primitive(32, false, Endianness::Big),
            TypeExpr::Bool => self.arena.primitive(1, false, Endianness::Big),
            TypeExpr::Uint { bits, endianness } => {
                let width = integer_width(bits, "uint")?;
                self.arena.primitive(width, false, *endianness)
            }
            TypeExpr::Int { bits, endianness } => {
                let width = integer_width(bits, "int")?;
                self.arena.primitive(width, true, *endianness)
            }
            TypeExpr::Bits { bits } => {
                let width = bits_width(bits)?;
                self.arena.primitive(width, false, Endianness::Big)
            }
            TypeExpr::Coins => self.arena.coins(),
            TypeExpr::MsgAddress => self.arena.msg_address(),
            TypeExpr::Cell | TypeExpr::Any => self.arena.unknown(),
            TypeExpr::Named { name, args } => self.label_for_named(name, args)?,
            TypeExpr::Maybe { inner } if matches!(**inner, TypeExpr::Ref { .. }) => {
                let target = match &**inner {
                    TypeExpr::Ref { inner } => self.label_for(inner)?,
                    _ => self.arena.unknown(),
                };
                self.arena.push(Label::MaybeRef(target))
            }
            TypeExpr::Either { left, right } => {
                let left = self.label_for(left)?;
                let right = self.label_for(right)?;
                self.arena.push(Label::Either { left, right })
            }
            TypeExpr::Ref { .. } | TypeExpr::Maybe { .. } => {
                let (structure, definitely_has_any) =
                    self.compile_field(ty, Structure::empty(), true)?;
                self.arena.push(Label::Composite(Composite {
                    name: anonymous_name(ty).to_string(),
                    structure,
                    definitely_has_any,
                }))
            }
            TypeExpr::Param { name } => {
                return Err(Error::UnboundParameter { name: name.clone() })
            }
        };
        Ok(id)
    }

    fn definition(&self, name: &str) -> Result<&'doc Definition> {
        self.document
            .definition(name)
            .ok_or_else(|| Error::UnknownDefinition {
                name: name.to_string(),
            })
    }

    /// Compiles an ordered field list into a structure, right to left so that
    /// each field knows its continuation.
    fn compile_fields(&mut self, fields: &[TypeExpr]) -> Result<(Rc<Structure>, bool)> {
        let mut rest = Structure::empty();
        let mut has_any = false;
        for (index, ty) in fields.iter().enumerate().rev() {
            let trailing = index + 1 == fields.len();
            let (structure, any) = self.compile_field(ty, rest, trailing)?;
            rest = structure;
            has_any |= any;
        }
        Ok((rest, has_any))
    }

    /// Compiles a single field of type `ty` followed by `rest`.
    fn compile_field(
        &mut self,
        ty: &TypeExpr,
        rest: Rc<Structure>,
        trailing: bool,
    ) -> Result<(Rc<Structure>, bool)> {
        let result = match ty {
            TypeExpr::Nat
            | TypeExpr::Bool
            | TypeExpr::Uint { .. }
            | TypeExpr::Int { .. }
            | TypeExpr::Bits { .. }
            | TypeExpr::Coins
            | TypeExpr::MsgAddress => (prefix(self.label_for(ty)?, rest), false),
            TypeExpr::Cell | TypeExpr::Any => (prefix(self.arena.unknown(), rest), true),
            TypeExpr::Ref { inner } => {
                let label = self.label_for(inner)?;
                (Rc::new(Structure::LoadRef { label, rest }), false)
            }
            TypeExpr::Maybe { inner } => {
                if matches!(**inner, TypeExpr::Ref { .. }) {
                    (prefix(self.label_for(ty)?, rest), false)
                } else {
                    let (present, any) = self.compile_field(inner, rest.clone(), trailing)?;
                    let structure = Structure::SwitchPrefix {
                        width:    1,
                        variants: vec![(0, rest), (1, present)],
                    };
                    (Rc::new(structure), any)
                }
            }
            TypeExpr::Either { left, right } => {
                let (left, left_any) = self.compile_field(left, rest.clone(), trailing)?;
                let (right, right_any) = self.compile_field(right, rest, trailing)?;
                let structure = Structure::SwitchPrefix {
                    width:    1,
                    variants: vec![(0, left), (1, right)],
                };
                (Rc::new(structure), left_any || right_any)
            }
            TypeExpr::Named { name, args } => {
                let label = self.label_for_named(name, args)?;
                match &self.arena[label] {
                    Label::Composite(composite) if trailing && composite.definitely_has_any => {
                        (composite.structure.clone(), true)
                    }
                    other => {
                        let any = other.definitely_has_any();
                        (prefix(label, rest), any)
                    }
                }
            }
            TypeExpr::Param { name } => {
                return Err(Error::UnboundParameter { name: name.clone() })
            }
        };
        Ok(result)
    }
}

fn prefix(label: LabelId, rest: Rc<Structure>) -> Rc<Structure> {
    Rc::new(Structure::KnownTypePrefix { label, rest })
}

/// Replaces every use of a type parameter in `ty` by its binding in `env`.
fn substitute(ty: &TypeExpr, env: &HashMap<&str, &TypeArg>) -> Result<TypeExpr> {
    let width = |width: &Width| -> Result<Width> {
        match width {
            Width::Const(_) => Ok(width.clone()),
            Width::Param(name) => match env.get(name.as_str()) {
                Some(TypeArg::Nat(n)) => Ok(Width::Const(*n)),
                Some(TypeArg::Type(_)) => Err(Error::ParameterKindMismatch {
                    name:     name.clone(),
                    expected: "natural number",
                }),
                None => Err(Error::UnboundParameter { name: name.clone() }),
            },
        }
    };
    let boxed = |inner: &TypeExpr| substitute(inner, env).map(Box::new);

    let result = match ty {
        TypeExpr::Uint { bits, endianness } => TypeExpr::Uint {
            bits:       width(bits)?,
            endianness: *endianness,
        },
        TypeExpr::Int { bits, endianness } => TypeExpr::Int {
            bits:       width(bits)?,
            endianness: *endianness,
        },
        TypeExpr::Bits { bits } => TypeExpr::Bits { bits: width(bits)? },
        TypeExpr::Ref { inner } => TypeExpr::Ref {
            inner: boxed(inner)?,
        },
        TypeExpr::Maybe { inner } => TypeExpr::Maybe {
            inner: boxed(inner)?,
        },
        TypeExpr::Either { left, right } => TypeExpr::Either {
            left:  boxed(left)?,
            right: boxed(right)?,
        },
        TypeExpr::Named { name, args } => TypeExpr::Named {
            name: name.clone(),
            args: args
                .iter()
                .map(|arg| match arg {
                    TypeArg::Nat(_) => Ok(arg.clone()),
                    TypeArg::Type(TypeExpr::Param { name }) => env
                        .get(name.as_str())
                        .map(|bound| (*bound).clone())
                        .ok_or_else(|| Error::UnboundParameter { name: name.clone() }),
                    TypeArg::Type(ty) => substitute(ty, env).map(TypeArg::Type),
                })
                .collect::<Result<_>>()?,
        },
        TypeExpr::Param { name } => match env.get(name.as_str()) {
            Some(TypeArg::Type(bound)) => bound.clone(),
            Some(TypeArg::Nat(_)) => {
                return Err(Error::ParameterKindMismatch {
                    name:     name.clone(),
                    expected: "type",
                })
            }
            None => return Err(Error::UnboundParameter { name: name.clone() }),
        },
        TypeExpr::Nat
        | TypeExpr::Bool
        | TypeExpr::Coins
        | TypeExpr::MsgAddress
        | TypeExpr::Cell
        | TypeExpr::Any => ty.clone(),
    };
    Ok(result)
}

fn integer_width(width: &Width, kind: &'static str) -> Result<u16> {
    match width {
        Width::Const(w) if *w <= MAX_INTEGER_WIDTH => Ok(*w),
        Width::Const(w) => Err(Error::InvalidWidth { kind, width: *w }),
        Width::Param(name) => Err(Error::UnboundParameter { name: name.clone() }),
    }
}

fn bits_width(width: &Width) -> Result<u16> {
    match width {
        Width::Const(w) if *w <= MAX_BITS_WIDTH => Ok(*w),
        Width::Const(w) => Err(Error::InvalidWidth {
            kind:  "bits",
            width: *w,
        }),
        Width::Param(name) => Err(Error::UnboundParameter { name: name.clone() }),
    }
}

fn anonymous_name(ty: &TypeExpr) -> &'static str {
    match ty {
        TypeExpr::Ref { .. } => "Ref",
        TypeExpr::Maybe { .. } => "Maybe",
        _ => "Anonymous",
    }
}

/// Builds the switch trie that selects between constructors by their tags.
///
/// At each level the switch reads the longest prefix shared by every tag in
/// the group if there is one, and otherwise the length of the shortest tag in
/// the group. Groups of constructors that agree on that prefix are split
/// further on the remainder of their tags.
fn switch(name: &str, constructors: &[(BitVec<u8, Msb0>, Rc<Structure>)]) -> Result<Rc<Structure>> {
    let entries: Vec<(&BitSlice<u8, Msb0>, &Rc<Structure>)> = constructors
        .iter()
        .map(|(tag, structure)| (tag.as_bitslice(), structure))
        .collect();
    partition(name, &entries)
}

#[allow(clippy::cast_possible_truncation)] // Widths are bounded by MAX_PREFIX_WIDTH
fn partition(name: &str, entries: &[(&BitSlice<u8, Msb0>, &Rc<Structure>)]) -> Result<Rc<Structure>> {
    let ambiguous = || Error::AmbiguousConstructors {
        name: name.to_string(),
    };
    match entries {
        [] => return Err(ambiguous()),
        [(tag, structure)] if tag.is_empty() => return Ok((*structure).clone()),
        _ if entries.iter().any(|(tag, _)| tag.is_empty()) => return Err(ambiguous()),
        _ => {}
    }

    let first = entries[0].0;
    let common = entries
        .iter()
        .map(|(tag, _)| tag.iter().zip(first.iter()).take_while(|(l, r)| **l == **r).count())
        .min()
        .unwrap_or(0);
    let shortest = entries.iter().map(|(tag, _)| tag.len()).min().unwrap_or(0);
    let width = if common > 0 { common } else { shortest }.min(MAX_PREFIX_WIDTH);

    let mut groups: Vec<(u64, Vec<(&BitSlice<u8, Msb0>, &Rc<Structure>)>)> = Vec::new();
    for (tag, structure) in entries {
        let key = tag[..width]
            .iter()
            .fold(0u64, |acc, bit| (acc << 1) | u64::from(*bit));
        let entry = (&tag[width..], *structure);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push(entry),
            None => groups.push((key, vec![entry])),
        }
    }
    groups.sort_by_key(|(key, _)| *key);

    let variants = groups
        .into_iter()
        .map(|(key, group)| Ok((key, partition(name, &group)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Rc::new(Structure::SwitchPrefix {
        width: width as u16,
        variants,
    }))
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use bitvec::{order::Msb0, vec::BitVec};
    use proptest::prelude::*;
    use serde_json::json;

    use crate::{
        error::schema::Error,
        schema::{
            label::{Label, LabelArena, Structure},
            transformer::SchemaTransformer,
            SchemaDocument,
        },
        utility::bit_string,
    };

    fn document(value: serde_json::Value) -> anyhow::Result<SchemaDocument> {
        Ok(serde_json::from_value(value)?)
    }

    fn structure_of(arena: &LabelArena, name: &str) -> anyhow::Result<std::rc::Rc<Structure>> {
        let id = arena.by_name(name).ok_or_else(|| anyhow::anyhow!("missing {name}"))?;
        match &arena[id] {
            Label::Composite(composite) => Ok(composite.structure.clone()),
            other => anyhow::bail!("expected a composite, got {other:?}"),
        }
    }

    /// Follows the switches of `structure` along `bits`, returning the width of
    /// the first primitive field of the selected constructor.
    fn select(arena: &LabelArena, structure: &Structure, bits: &[bool]) -> Option<u16> {
        match structure {
            Structure::SwitchPrefix { width, variants } => {
                let width = *width as usize;
                if bits.len() < width {
                    return None;
                }
                let key = bits[..width].iter().fold(0u64, |acc, b| (acc << 1) | u64::from(*b));
                let (_, next) = variants.iter().find(|(k, _)| *k == key)?;
                select(arena, next, &bits[width..])
            }
            Structure::KnownTypePrefix { label, .. } => match arena[*label] {
                Label::Primitive { width, .. } => Some(width),
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn compiles_primitive_fields_in_order() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [{
            "name": "Pair",
            "constructors": [{"name": "pair", "tag": "$_", "fields": [
                {"type": {"kind": "int", "bits": 5}},
                {"type": {"kind": "uint", "bits": 8}}
            ]}]
        }]}))?;
        let arena = SchemaTransformer::new(&doc).transform()?;
        let structure = structure_of(&arena, "Pair")?;

        let Structure::KnownTypePrefix { label, rest } = &*structure else {
            anyhow::bail!("expected a prefix");
        };
        assert!(matches!(arena[*label], Label::Primitive { width: 5, signed: true, .. }));
        let Structure::KnownTypePrefix { label, rest } = &**rest else {
            anyhow::bail!("expected a prefix");
        };
        assert!(matches!(arena[*label], Label::Primitive { width: 8, signed: false, .. }));
        assert_eq!(**rest, Structure::Empty);
        Ok(())
    }

    #[test]
    fn terminates_on_recursive_definitions() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [{
            "name": "List",
            "constructors": [
                {"name": "nil", "tag": "$0"},
                {"name": "cons", "tag": "$1", "fields": [
                    {"type": {"kind": "uint", "bits": 8}},
                    {"type": {"kind": "ref", "inner": {"kind": "named", "name": "List"}}}
                ]}
            ]
        }]}))?;
        let arena = SchemaTransformer::new(&doc).transform()?;
        let list = arena.by_name("List").ok_or_else(|| anyhow::anyhow!("missing List"))?;

        let Structure::SwitchPrefix { width, variants } = &*structure_of(&arena, "List")? else {
            anyhow::bail!("expected a switch");
        };
        assert_eq!(*width, 1);
        let cons = &variants[1].1;
        let Structure::KnownTypePrefix { rest, .. } = &**cons else {
            anyhow::bail!("expected a prefix");
        };
        assert_eq!(**rest, Structure::LoadRef {
            label: list,
            rest:  Structure::empty(),
        });
        Ok(())
    }

    #[test]
    fn memoizes_parameterized_uses() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [
            {"name": "Wrap", "params": ["n"], "constructors": [{"name": "wrap", "fields": [
                {"type": {"kind": "uint", "bits": "n"}}
            ]}]},
            {"name": "Both", "constructors": [{"name": "both", "fields": [
                {"type": {"kind": "named", "name": "Wrap", "args": [4]}},
                {"type": {"kind": "named", "name": "Wrap", "args": [4]}},
                {"type": {"kind": "named", "name": "Wrap", "args": [9]}}
            ]}]}
        ]}))?;
        let arena = SchemaTransformer::new(&doc).transform()?;
        let mut labels = Vec::new();
        let mut structure = structure_of(&arena, "Both")?;
        while let Structure::KnownTypePrefix { label, rest } = &*structure.clone() {
            labels.push(*label);
            structure = rest.clone();
        }

        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[1], labels[2]);
        Ok(())
    }

    #[test]
    fn maybe_of_ref_is_a_maybe_ref_label() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [{
            "name": "Holder",
            "constructors": [{"name": "holder", "fields": [
                {"type": {"kind": "maybe", "inner": {"kind": "ref", "inner": {"kind": "cell"}}}}
            ]}]
        }]}))?;
        let arena = SchemaTransformer::new(&doc).transform()?;
        let Structure::KnownTypePrefix { label, .. } = &*structure_of(&arena, "Holder")? else {
            anyhow::bail!("expected a prefix");
        };
        assert_eq!(arena[*label], Label::MaybeRef(arena.unknown()));
        Ok(())
    }

    #[test]
    fn inlines_trailing_opaque_definitions() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [
            {"name": "Body", "constructors": [{"name": "body", "tag": "#0000000f", "fields": [
                {"type": {"kind": "uint", "bits": 64}},
                {"type": {"kind": "any"}}
            ]}]},
            {"name": "Message", "constructors": [{"name": "message", "fields": [
                {"type": {"kind": "uint", "bits": 4}},
                {"type": {"kind": "named", "name": "Body"}}
            ]}]}
        ]}))?;
        let arena = SchemaTransformer::new(&doc).transform()?;
        let body = structure_of(&arena, "Body")?;
        let Structure::KnownTypePrefix { rest, .. } = &*structure_of(&arena, "Message")? else {
            anyhow::bail!("expected a prefix");
        };

        assert_eq!(rest, &body);
        let message = arena.by_name("Message").ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert!(arena[message].definitely_has_any());
        Ok(())
    }

    #[test]
    fn rejects_overlapping_tags() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [{
            "name": "Bad",
            "constructors": [{"name": "a", "tag": "$01"}, {"name": "b", "tag": "$01"}]
        }]}))?;
        assert_eq!(
            SchemaTransformer::new(&doc).transform().err(),
            Some(Error::AmbiguousConstructors { name: "Bad".into() })
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_definitions_and_arity() -> anyhow::Result<()> {
        let doc = document(json!({"definitions": [
            {"name": "One", "params": ["X"], "constructors": [{"name": "one"}]},
            {"name": "Uses", "constructors": [{"name": "uses", "fields": [
                {"type": {"kind": "named", "name": "One"}}
            ]}]}
        ]}))?;
        assert!(matches!(
            SchemaTransformer::new(&doc).transform(),
            Err(Error::ArityMismatch { expected: 1, actual: 0, .. })
        ));
        Ok(())
    }

    fn prefix_free(tags: Vec<Vec<bool>>) -> Vec<Vec<bool>> {
        let unique: BTreeSet<Vec<bool>> = tags.into_iter().collect();
        let mut kept: Vec<Vec<bool>> = Vec::new();
        let mut sorted: Vec<Vec<bool>> = unique.into_iter().collect();
        sorted.sort_by_key(Vec::len);
        for tag in sorted {
            if !kept.iter().any(|k| tag.starts_with(k)) {
                kept.push(tag);
            }
        }
        kept
    }

    proptest! {
        #[test]
        fn every_prefix_selects_at_most_one_constructor(
            tags in prop::collection::vec(prop::collection::vec(any::<bool>(), 1..7), 1..8),
            probe in prop::collection::vec(any::<bool>(), 6),
        ) {
            let tags = prefix_free(tags);
            let constructors: Vec<serde_json::Value> = tags
                .iter()
                .enumerate()
                .map(|(i, tag)| {
                    let bits: BitVec<u8, Msb0> = tag.iter().copied().collect();
                    json!({"name": format!("c{i}"), "tag": format!("${}", bit_string(&bits)), "fields": [
                        {"type": {"kind": "uint", "bits": i + 1}}
                    ]})
                })
                .collect();
            let doc: SchemaDocument = serde_json::from_value(json!({"definitions": [{
                "name": "Union", "constructors": constructors
            }]})).unwrap();
            let arena = SchemaTransformer::new(&doc).transform().unwrap();
            let structure = structure_of(&arena, "Union").unwrap();

            let expected: Vec<usize> = tags
                .iter()
                .enumerate()
                .filter(|(_, tag)| probe.starts_with(tag))
                .map(|(i, _)| i + 1)
                .collect();
            prop_assert!(expected.len() <= 1);
            let selected = select(&arena, &structure, &probe).map(usize::from);
            prop_assert_eq!(selected, expected.first().copied());
        }
    }
}
