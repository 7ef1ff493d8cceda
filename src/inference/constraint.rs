//! Generation of the structural constraints that a label places on a symbolic
//! cell.
//!
//! The walk follows the label front to back with a cursor over the cell's
//! data and references. Wherever the label branches (a constructor tag, a
//! `Maybe` bit, an `Either` bit) the cursors of the branches are merged with
//! `ite` terms, so a single formula covers every shape the cell may take.

use z3::ast::{Bool, BV};

use crate::{
    constant::{CELL_DATA_BITS, LENGTH_BITS, MAX_CELL_REFS},
    schema::label::{Label, LabelArena, LabelId, Structure},
    vm::state::heap::HeapCell,
};

/// A label for a child of the walked cell, applying when `guard` holds.
#[derive(Clone, Debug)]
pub struct ChildLabel {
    pub index: usize,
    pub guard: Bool,
    pub label: LabelId,
}

/// The outcome of walking a label over a cell.
#[derive(Clone, Debug)]
pub struct Walk {
    /// The condition under which the cell matches the label.
    pub formula: Bool,

    /// The labels of the cell's children, in the order they were found.
    pub children: Vec<ChildLabel>,
}

/// Walks `label` over `cell`, generating the constraints under which the cell
/// has the label's shape.
///
/// Inline nesting deeper than `max_depth` is left unconstrained.
#[must_use]
pub fn walk(arena: &LabelArena, max_depth: usize, label: LabelId, cell: &HeapCell) -> Walk {
    let mut walker = Walker {
        arena,
        max_depth,
        data: cell.bits.to_bv(),
        len: cell.bits.len().to_bv(),
        refs_len: cell.refs_len.to_bv(),
        children: Vec::new(),
    };
    let start = Cursor {
        pos:       length(0),
        refs:      length(0),
        ref_index: Some(0),
    };
    let outcome = walker.label(label, &start, &Bool::from_bool(true), 0);
    let exact = outcome.end.pos.eq(&walker.len) & outcome.end.refs.eq(&walker.refs_len);
    Walk {
        formula:  outcome.ok & outcome.closed.implies(&exact),
        children: walker.children,
    }
}

/// A position within the walked cell.
#[derive(Clone, Debug)]
struct Cursor {
    pos:  BV,
    refs: BV,

    /// The reference position, when it is the same on every branch.
    ref_index: Option<usize>,
}

/// The result of walking one label or structure.
struct Outcome {
    /// The condition under which the content matches.
    ok: Bool,

    /// The cursor after the content.
    end: Cursor,

    /// The condition under which the content has a known end, rather than
    /// ending in opaque content that swallows the rest of the cell.
    closed: Bool,
}

impl Outcome {
    fn closed(ok: Bool, end: Cursor) -> Self {
        Self {
            ok,
            end,
            closed: Bool::from_bool(true),
        }
    }

    fn open(at: &Cursor) -> Self {
        Self {
            ok:     Bool::from_bool(true),
            end:    at.clone(),
            closed: Bool::from_bool(false),
        }
    }

    /// Chooses between `self` and `other` on `condition`.
    fn select(condition: &Bool, then: Outcome, otherwise: Outcome) -> Self {
        Self {
            ok:     condition.ite(&then.ok, &otherwise.ok),
            end:    Cursor {
                pos:       condition.ite(&then.end.pos, &otherwise.end.pos),
                refs:      condition.ite(&then.end.refs, &otherwise.end.refs),
                ref_index: if then.end.ref_index == otherwise.end.ref_index {
                    then.end.ref_index
                } else {
                    None
                },
            },
            closed: condition.ite(&then.closed, &otherwise.closed),
        }
    }
}

struct Walker<'a> {
    arena:     &'a LabelArena,
    max_depth: usize,
    data:      BV,
    len:       BV,
    refs_len:  BV,
    children:  Vec<ChildLabel>,
}

impl Walker<'_> {
    fn label(&mut self, label: LabelId, at: &Cursor, guard: &Bool, depth: usize) -> Outcome {
        if depth > self.max_depth {
            return Outcome::open(at);
        }
        match &self.arena[label] {
            Label::Primitive { width, .. } => {
                let end = at.pos.bvadd(&length(*width));
                Outcome::closed(self.fits(&end), at.with_pos(end))
            }
            Label::Coins => {
                let value_pos = at.pos.bvadd(&length(4));
                let bytes = self.bits_at(&at.pos, 4).zero_ext(LENGTH_BITS - 4);
                let end = value_pos.bvadd(&bytes.bvmul(&length(8)));
                Outcome::closed(self.fits(&value_pos) & self.fits(&end), at.with_pos(end))
            }
            Label::MsgAddress => self.address(at),
            Label::MaybeRef(inner) => {
                let present = self.bit_at(&at.pos);
                self.record_child(at, &(guard.clone() & present.clone()), *inner);
                let has_ref = at.refs.bvult(&self.refs_len);
                let end = Cursor {
                    pos:       at.pos.bvadd(&length(1)),
                    refs:      at.refs.bvadd(&present.ite(&length(1), &length(0))),
                    ref_index: None,
                };
                let ok = self.fits(&end.pos) & present.implies(&has_ref);
                Outcome::closed(ok, end)
            }
            Label::Either { left, right } => {
                let is_right = self.bit_at(&at.pos);
                let after = at.with_pos(at.pos.bvadd(&length(1)));
                let fits = self.fits(&after.pos);
                let (left, right) = (*left, *right);
                let r = self.label(right, &after, &(guard.clone() & is_right.clone()), depth + 1);
                let l = self.label(left, &after, &(guard.clone() & is_right.not()), depth + 1);
                let mut outcome = Outcome::select(&is_right, r, l);
                outcome.ok = fits & outcome.ok;
                outcome
            }
            Label::Unknown => Outcome::open(at),
            Label::Composite(composite) => {
                let structure = composite.structure.clone();
                self.structure(&structure, at, guard, depth + 1)
            }
        }
    }

    fn structure(&mut self, structure: &Structure, at: &Cursor, guard: &Bool, depth: usize) -> Outcome {
        match structure {
            Structure::Empty => Outcome::closed(Bool::from_bool(true), at.clone()),
            Structure::KnownTypePrefix { label, rest } => {
                let first = self.label(*label, at, guard, depth);
                if matches!(self.arena[*label], Label::Unknown) {
                    return first;
                }
                let rest = self.structure(rest, &first.end, guard, depth);
                Outcome {
                    ok:     first.ok & first.closed.implies(&rest.ok),
                    end:    rest.end,
                    closed: first.closed & rest.closed,
                }
            }
            Structure::LoadRef { label, rest } => {
                let has_ref = at.refs.bvult(&self.refs_len);
                self.record_child(at, guard, *label);
                let next = Cursor {
                    pos:       at.pos.clone(),
                    refs:      at.refs.bvadd(&length(1)),
                    ref_index: at.ref_index.map(|i| i + 1),
                };
                let mut rest = self.structure(rest, &next, guard, depth);
                rest.ok = has_ref & rest.ok;
                rest
            }
            Structure::SwitchPrefix { width, variants } => {
                let after = at.with_pos(at.pos.bvadd(&length(*width)));
                let fits = self.fits(&after.pos);
                if *width == 0 {
                    return match variants.first() {
                        Some((_, next)) => self.structure(next, at, guard, depth),
                        None => Outcome::closed(Bool::from_bool(false), at.clone()),
                    };
                }
                let tag = self.bits_at(&at.pos, u32::from(*width));
                let mut outcome = Outcome::closed(Bool::from_bool(false), after.clone());
                for (key, next) in variants.iter().rev() {
                    let matches = tag.eq(&BV::from_u64(*key, u32::from(*width)));
                    let branch = self.structure(next, &after, &(guard.clone() & matches.clone()), depth);
                    outcome = Outcome::select(&matches, branch, outcome);
                }
                outcome.ok = fits & outcome.ok;
                outcome
            }
        }
    }

    /// Walks a `MsgAddress`. Anycast addresses are excluded.
    fn address(&mut self, at: &Cursor) -> Outcome {
        let pos = &at.pos;
        let tag = self.bits_at(pos, 2);
        let is = |kind: u64| tag.eq(&BV::from_u64(kind, 2));

        // addr_extern$01 len:(## 9) external_address:(bits len)
        let extern_len = self.bits_at(&pos.bvadd(&length(2)), 9).zero_ext(LENGTH_BITS - 9);
        let extern_end = pos.bvadd(&length(11)).bvadd(&extern_len);
        let extern_ok = self.fits(&pos.bvadd(&length(11))) & self.fits(&extern_end);

        let no_anycast = self.bit_at(&pos.bvadd(&length(2))).not();

        // addr_std$10 anycast:(Maybe Anycast) workchain_id:int8 address:bits256
        let std_end = pos.bvadd(&length(3 + 8 + 256));
        let std_ok = no_anycast.clone() & self.fits(&std_end);

        // addr_var$11 anycast:(Maybe Anycast) addr_len:(## 9) workchain_id:int32
        //   address:(bits addr_len)
        let var_len = self.bits_at(&pos.bvadd(&length(3)), 9).zero_ext(LENGTH_BITS - 9);
        let var_end = pos.bvadd(&length(3 + 9 + 32)).bvadd(&var_len);
        let var_ok = no_anycast & self.fits(&pos.bvadd(&length(12))) & self.fits(&var_end);

        let none_end = pos.bvadd(&length(2));
        let end = is(0).ite(&none_end, &is(1).ite(&extern_end, &is(2).ite(&std_end, &var_end)));
        let ok = is(0).ite(
            &Bool::from_bool(true),
            &is(1).ite(&extern_ok, &is(2).ite(&std_ok, &var_ok)),
        );
        Outcome::closed(self.fits(&none_end) & ok, at.with_pos(end))
    }

    /// Records `label` for the child at the reference position of `at`.
    fn record_child(&mut self, at: &Cursor, guard: &Bool, label: LabelId) {
        match at.ref_index {
            Some(index) if index < MAX_CELL_REFS => self.children.push(ChildLabel {
                index,
                guard: guard.clone(),
                label,
            }),
            Some(_) => {}
            None => {
                for index in 0..MAX_CELL_REFS {
                    let here = at.refs.eq(&length(index as u16));
                    self.children.push(ChildLabel {
                        index,
                        guard: guard.clone() & here,
                        label,
                    });
                }
            }
        }
    }

    fn fits(&self, end: &BV) -> Bool {
        end.bvule(&self.len)
    }

    /// Gets the `width` bits of data starting at `pos`.
    fn bits_at(&self, pos: &BV, width: u32) -> BV {
        let shifted = self.data.bvshl(&pos.zero_ext(CELL_DATA_BITS - LENGTH_BITS));
        shifted.extract(CELL_DATA_BITS - 1, CELL_DATA_BITS - width)
    }

    fn bit_at(&self, pos: &BV) -> Bool {
        self.bits_at(pos, 1).eq(&BV::from_u64(1, 1))
    }
}

impl Cursor {
    fn with_pos(&self, pos: BV) -> Cursor {
        Cursor {
            pos,
            refs: self.refs.clone(),
            ref_index: self.ref_index,
        }
    }
}

fn length(value: u16) -> BV {
    BV::from_u64(u64::from(value), LENGTH_BITS)
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use z3::{ast::BV, SatResult, Solver};

    use crate::{
        constant::{CELL_DATA_BITS, LENGTH_BITS},
        inference::constraint::walk,
        schema::{label::LabelArena, transformer::SchemaTransformer, SchemaDocument},
        vm::state::heap::Heap,
    };

    fn arena(value: serde_json::Value) -> anyhow::Result<LabelArena> {
        let doc: SchemaDocument = serde_json::from_value(value)?;
        Ok(SchemaTransformer::new(&doc).transform()?)
    }

    #[test]
    fn fixes_the_length_of_fixed_width_records() -> anyhow::Result<()> {
        let arena = arena(json!({"definitions": [{
            "name": "Pair",
            "constructors": [{"name": "pair", "fields": [
                {"type": {"kind": "uint", "bits": 8}},
                {"type": {"kind": "int", "bits": 24}}
            ]}]
        }]}))?;
        let pair = arena.by_name("Pair").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut heap = Heap::new();
        let (addr, well_formed) = heap.allocate_input("in");
        let cell = heap.get(addr)?;

        let walk = walk(&arena, 10, pair, cell);
        let solver = Solver::new();
        solver.assert(&well_formed);
        solver.assert(&walk.formula);
        assert_eq!(solver.check(), SatResult::Sat);

        let len = cell.bits.len().to_bv();
        solver.assert(&len.eq(&BV::from_u64(31, LENGTH_BITS)));
        assert_eq!(solver.check(), SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn constrains_constructor_tags() -> anyhow::Result<()> {
        let arena = arena(json!({"definitions": [{
            "name": "Op",
            "constructors": [
                {"name": "a", "tag": "$00", "fields": []},
                {"name": "b", "tag": "$01", "fields": [{"type": {"kind": "uint", "bits": 4}}]}
            ]
        }]}))?;
        let op = arena.by_name("Op").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut heap = Heap::new();
        let (addr, well_formed) = heap.allocate_input("in");
        let cell = heap.get(addr)?;
        let walk = walk(&arena, 10, op, cell);

        let solver = Solver::new();
        solver.assert(&well_formed);
        solver.assert(&walk.formula);
        let top = cell.bits.to_bv().extract(CELL_DATA_BITS - 1, CELL_DATA_BITS - 1);
        solver.assert(&top.eq(&BV::from_u64(1, 1)));
        assert_eq!(solver.check(), SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn labels_children_of_references() -> anyhow::Result<()> {
        let arena = arena(json!({"definitions": [{
            "name": "Holder",
            "constructors": [{"name": "holder", "fields": [
                {"type": {"kind": "ref", "inner": {"kind": "uint", "bits": 8}}},
                {"type": {"kind": "maybe", "inner": {"kind": "ref", "inner": {"kind": "cell"}}}}
            ]}]
        }]}))?;
        let holder = arena.by_name("Holder").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut heap = Heap::new();
        let (addr, _) = heap.allocate_input("in");
        let walk = walk(&arena, 10, holder, heap.get(addr)?);

        let indices: Vec<_> = walk.children.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);
        Ok(())
    }
}
