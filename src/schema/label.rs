//! The compiled form of schema definitions.
//!
//! Labels live in a [`LabelArena`] and refer to each other by [`LabelId`], so
//! recursive definitions form a graph through the arena rather than through
//! nested values.

use std::{collections::HashMap, ops::Index, rc::Rc};

use serde::Serialize;

pub use crate::schema::Endianness;

/// A handle to a label in a [`LabelArena`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LabelId(usize);

/// A compiled schema type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Label {
    Primitive {
        width:      u16,
        signed:     bool,
        endianness: Endianness,
    },
    Composite(Composite),

    /// A single presence bit, followed by a reference to a cell of the inner
    /// label when set.
    MaybeRef(LabelId),

    /// A single bit choosing between two inline labels.
    Either {
        left:  LabelId,
        right: LabelId,
    },
    Coins,
    MsgAddress,

    /// Content about which nothing is known.
    Unknown,
}

impl Label {
    /// Checks whether the label could not be fully determined statically.
    #[must_use]
    pub fn definitely_has_any(&self) -> bool {
        match self {
            Label::Composite(composite) => composite.definitely_has_any,
            Label::Unknown => true,
            _ => false,
        }
    }
}

/// A record or tagged union compiled from a definition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Composite {
    pub name:               String,
    pub structure:          Rc<Structure>,
    pub definitely_has_any: bool,
}

/// The internal layout of a composite, read front to back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Structure {
    Empty,

    /// A field of a known label stored inline, followed by `rest`.
    KnownTypePrefix {
        label: LabelId,
        rest:  Rc<Structure>,
    },

    /// A field stored in the next child reference, followed by `rest`.
    LoadRef {
        label: LabelId,
        rest:  Rc<Structure>,
    },

    /// A `width`-bit prefix selecting one of `variants`. Prefixes not present
    /// in `variants` match no constructor.
    SwitchPrefix {
        width:    u16,
        variants: Vec<(u64, Rc<Structure>)>,
    },
}

impl Structure {
    /// An empty structure, shareable between composites.
    #[must_use]
    pub fn empty() -> Rc<Self> {
        Rc::new(Self::Empty)
    }
}

/// The arena holding every label produced by the schema transformer.
#[derive(Clone, Debug)]
pub struct LabelArena {
    labels:      Vec<Label>,
    named:       HashMap<String, LabelId>,
    primitives:  HashMap<(u16, bool, Endianness), LabelId>,
    coins:       LabelId,
    msg_address: LabelId,
    unknown:     LabelId,
}

impl LabelArena {
    /// Creates an arena holding only the built-in labels.
    #[must_use]
    pub fn new() -> Self {
        let labels = vec![Label::Coins, Label::MsgAddress, Label::Unknown];
        Self {
            labels,
            named: HashMap::new(),
            primitives: HashMap::new(),
            coins: LabelId(0),
            msg_address: LabelId(1),
            unknown: LabelId(2),
        }
    }

    /// Adds `label` to the arena.
    pub fn push(&mut self, label: Label) -> LabelId {
        self.labels.push(label);
        LabelId(self.labels.len() - 1)
    }

    /// Replaces the label behind `id`, used to complete recursive labels whose
    /// handle had to exist before their structure did.
    pub(crate) fn replace(&mut self, id: LabelId, label: Label) {
        self.labels[id.0] = label;
    }

    /// Gets the label for an integer primitive, creating it when needed.
    pub fn primitive(&mut self, width: u16, signed: bool, endianness: Endianness) -> LabelId {
        if let Some(id) = self.primitives.get(&(width, signed, endianness)) {
            return *id;
        }
        let id = self.push(Label::Primitive {
            width,
            signed,
            endianness,
        });
        self.primitives.insert((width, signed, endianness), id);
        id
    }

    /// Registers `id` as the label for the definition called `name`.
    pub fn name(&mut self, name: impl Into<String>, id: LabelId) {
        self.named.insert(name.into(), id);
    }

    /// Gets the label registered for the definition called `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<LabelId> {
        self.named.get(name).copied()
    }

    /// Gets the label behind `id`.
    #[must_use]
    pub fn get(&self, id: LabelId) -> Option<&Label> {
        self.labels.get(id.0)
    }

    #[must_use]
    pub fn coins(&self) -> LabelId {
        self.coins
    }

    #[must_use]
    pub fn msg_address(&self) -> LabelId {
        self.msg_address
    }

    #[must_use]
    pub fn unknown(&self) -> LabelId {
        self.unknown
    }

    /// Gets the number of labels in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Checks whether the arena holds only the built-in labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.len() <= 3
    }
}

impl Default for LabelArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Label handles are only ever minted by their arena, so indexing with one
/// from another arena is a programmer error.
impl Index<LabelId> for LabelArena {
    type Output = Label;

    fn index(&self, index: LabelId) -> &Self::Output {
        &self.labels[index.0]
    }
}

#[cfg(test)]
mod test {
    use crate::schema::label::{Endianness, Label, LabelArena};

    #[test]
    fn interns_primitives() {
        let mut arena = LabelArena::new();
        let a = arena.primitive(32, false, Endianness::Big);
        let b = arena.primitive(32, false, Endianness::Big);
        let c = arena.primitive(32, true, Endianness::Big);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            arena[c],
            Label::Primitive {
                width:      32,
                signed:     true,
                endianness: Endianness::Big,
            }
        );
    }

    #[test]
    fn provides_built_in_labels() {
        let arena = LabelArena::new();
        assert_eq!(arena[arena.coins()], Label::Coins);
        assert!(arena[arena.unknown()].definitely_has_any());
        assert!(arena.is_empty());
    }
}
