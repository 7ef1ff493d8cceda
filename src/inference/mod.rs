//! This module contains the [`FieldManager`], which tracks what is known about
//! the structure of the cells on a path and commits cells to their schema
//! labels lazily.
//!
//! A cell is only committed to its label when its data is first read. At that
//! point the label is walked over the cell to produce the structural
//! constraints the [`constraint`] module describes, and the constraints are
//! handed back to the caller to be asserted on the path exactly once. The
//! labels of the children of the cell are recorded at the same time, and are
//! passed on to the children as they are materialised.

pub mod constraint;

use tracing::trace;
use z3::ast::Bool;

use crate::{
    error::execution,
    schema::{decode::Decoder, label::LabelArena, label::LabelId, StructuralError},
    vm::state::heap::{CellAddr, CellOrigin, HeapCell, SymLen},
};

/// A label assigned to a cell, possibly only under some condition.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub label: LabelId,

    /// The condition under which the label applies, or [`None`] if it always
    /// does.
    pub guard: Option<Bool>,
}

/// The structural side tables of the cells of a path.
///
/// All tables are persistent maps so that forking a state shares them.
#[derive(Clone, Debug, Default)]
pub struct FieldManager {
    /// The labels assigned to each cell.
    labels: im::HashMap<CellAddr, im::Vector<Assignment>>,

    /// The labels of children that have not yet been materialised, keyed by
    /// parent and child index.
    children: im::HashMap<(CellAddr, usize), im::Vector<Assignment>>,

    /// Cells whose data has been read.
    requested: im::HashSet<CellAddr>,

    /// Cells whose structural constraints have been generated.
    fixated: im::HashSet<CellAddr>,

    /// Known upper bounds on the data length of cells.
    bounds: im::HashMap<CellAddr, u16>,

    /// The number of times constraints have been generated.
    fixations: usize,
}

impl FieldManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `label` to the cell at `addr` unconditionally.
    pub fn request(&mut self, addr: CellAddr, label: LabelId) {
        self.assign(addr, Assignment { label, guard: None });
    }

    fn assign(&mut self, addr: CellAddr, assignment: Assignment) {
        self.labels.entry(addr).or_default().push_back(assignment);
    }

    /// Handles a read of the data of the cell at `addr`.
    ///
    /// On the first read the cell is committed to its labels. For a symbolic
    /// cell this returns the structural constraints to assert on the path. A
    /// concrete cell is instead decoded directly. Later reads return nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a concrete cell does not match its label.
    pub fn read_data(
        &mut self,
        arena: &LabelArena,
        max_depth: usize,
        addr: CellAddr,
        cell: &HeapCell,
    ) -> Result<Option<Bool>, StructuralError> {
        self.requested.insert(addr);
        if self.fixated.insert(addr).is_some() {
            return Ok(None);
        }
        let assignments = self.labels.get(&addr).cloned().unwrap_or_default();
        if assignments.is_empty() {
            return Ok(None);
        }

        match &cell.origin {
            CellOrigin::Concrete(concrete) => {
                let decoder = Decoder::new(arena, max_depth);
                for assignment in assignments.iter().filter(|a| a.guard.is_none()) {
                    decoder.decode_cell(assignment.label, concrete)?;
                }
                trace!(%addr, "Decoded concrete cell against its label");
                Ok(None)
            }
            CellOrigin::Input { .. } => {
                let mut formula = Bool::from_bool(true);
                for assignment in &assignments {
                    let walk = constraint::walk(arena, max_depth, assignment.label, cell);
                    formula = match &assignment.guard {
                        Some(guard) => formula & guard.implies(&walk.formula),
                        None => formula & walk.formula,
                    };
                    for child in walk.children {
                        let guard = match &assignment.guard {
                            Some(outer) => outer.clone() & child.guard,
                            None => child.guard,
                        };
                        let child_assignment = Assignment {
                            label: child.label,
                            guard: Some(guard),
                        };
                        match cell.child(child.index).and_then(|r| r.as_concrete()) {
                            Some(existing) => self.assign(existing, child_assignment),
                            None => self
                                .children
                                .entry((addr, child.index))
                                .or_default()
                                .push_back(child_assignment),
                        }
                    }
                }
                self.fixations += 1;
                Ok(Some(formula))
            }
            CellOrigin::Built => Ok(None),
        }
    }

    /// Passes the labels recorded for child `index` of `parent` on to the
    /// freshly materialised `child`.
    pub fn on_child(&mut self, parent: CellAddr, index: usize, child: CellAddr) {
        if let Some(assignments) = self.children.remove(&(parent, index)) {
            trace!(%parent, index, %child, count = assignments.len(), "Labelled child cell");
            for assignment in assignments {
                self.assign(child, assignment);
            }
        }
    }

    /// Gets the first label assigned to `addr`, without committing the cell to
    /// it.
    ///
    /// This generates no constraints, and must not stand in for
    /// [`Self::read_data`] wherever the constraints are needed.
    #[must_use]
    pub fn label(&self, addr: CellAddr) -> Option<LabelId> {
        self.labels.get(&addr).and_then(|a| a.front()).map(|a| a.label)
    }

    #[must_use]
    pub fn is_requested(&self, addr: CellAddr) -> bool {
        self.requested.contains(&addr)
    }

    #[must_use]
    pub fn is_fixated(&self, addr: CellAddr) -> bool {
        self.fixated.contains(&addr)
    }

    /// Gets the number of times structural constraints were generated.
    #[must_use]
    pub fn fixations(&self) -> usize {
        self.fixations
    }

    #[must_use]
    pub fn upper_bound(&self, addr: CellAddr) -> Option<u16> {
        self.bounds.get(&addr).copied()
    }

    /// Records that the data of `addr` is at most `bound` bits long, keeping
    /// the tighter of the bounds if one is already known.
    pub fn record_upper_bound(&mut self, addr: CellAddr, bound: u16) {
        let bound = self.upper_bound(addr).map_or(bound, |b| b.min(bound));
        self.bounds.insert(addr, bound);
    }

    /// Carries the upper bound of `from`, if any, over to `to`.
    pub fn copy_upper_bound(&mut self, from: CellAddr, to: CellAddr) {
        if let Some(bound) = self.upper_bound(from) {
            self.record_upper_bound(to, bound);
        }
    }

    /// Checks a length read from `addr` against its recorded upper bound.
    ///
    /// Only concrete lengths can be checked.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the length exceeds the bound.
    pub fn check_upper_bound(&self, addr: CellAddr, length: &SymLen) -> Result<(), execution::Error> {
        match (self.upper_bound(addr), length.as_concrete()) {
            (Some(bound), Some(length)) if length > bound => Err(execution::Error::UpperBoundViolated {
                address: addr.index(),
                length: usize::from(length),
                bound,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::{
        cell::{Cell, CellBuilder},
        inference::FieldManager,
        schema::{label::LabelArena, transformer::SchemaTransformer, SchemaDocument, StructuralError},
        vm::state::heap::{CellBits, Heap, SymLen},
    };

    fn arena() -> anyhow::Result<LabelArena> {
        let doc: SchemaDocument = serde_json::from_value(json!({"definitions": [{
            "name": "Holder",
            "constructors": [{"name": "holder", "fields": [
                {"type": {"kind": "uint", "bits": 16}},
                {"type": {"kind": "ref", "inner": {"kind": "uint", "bits": 8}}}
            ]}]
        }]}))?;
        Ok(SchemaTransformer::new(&doc).transform()?)
    }

    #[test]
    fn generates_constraints_once_per_cell() -> anyhow::Result<()> {
        let arena = arena()?;
        let holder = arena.by_name("Holder").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut heap = Heap::new();
        let (addr, _) = heap.allocate_input("in");
        let mut fields = FieldManager::new();
        fields.request(addr, holder);

        let first = fields.read_data(&arena, 10, addr, heap.get(addr)?)?;
        let second = fields.read_data(&arena, 10, addr, heap.get(addr)?)?;
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(fields.fixations(), 1);
        assert!(fields.is_fixated(addr));
        Ok(())
    }

    #[test]
    fn passes_labels_on_to_children() -> anyhow::Result<()> {
        let arena = arena()?;
        let holder = arena.by_name("Holder").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut heap = Heap::new();
        let (addr, _) = heap.allocate_input("in");
        let mut fields = FieldManager::new();
        fields.request(addr, holder);
        fields.read_data(&arena, 10, addr, heap.get(addr)?)?;

        let (child, _) = heap.child(addr, 0)?;
        let child = child.as_concrete().ok_or_else(|| anyhow::anyhow!("symbolic child"))?;
        assert!(fields.label(child).is_none());
        fields.on_child(addr, 0, child);
        assert!(fields.label(child).is_some());
        assert!(fields.read_data(&arena, 10, child, heap.get(child)?)?.is_some());
        Ok(())
    }

    #[test]
    fn decodes_concrete_cells_directly() -> anyhow::Result<()> {
        let arena = arena()?;
        let holder = arena.by_name("Holder").ok_or_else(|| anyhow::anyhow!("missing"))?;
        let mut heap = Heap::new();
        let mut builder = CellBuilder::new();
        builder.store_uint(7, 16)?;
        let addr = heap.allocate_concrete(&builder.build()?);
        let mut fields = FieldManager::new();
        fields.request(addr, holder);

        let result = fields.read_data(&arena, 10, addr, heap.get(addr)?);
        assert_eq!(result.map(|f| f.is_some()), Err(StructuralError::ExpectedRef));

        let empty = heap.allocate_concrete(&Cell::empty());
        assert!(fields.read_data(&arena, 10, empty, heap.get(empty)?)?.is_none());
        Ok(())
    }

    #[test]
    fn checks_lengths_against_recorded_bounds() {
        let mut heap = Heap::new();
        let addr = heap.allocate_concrete(&Cell::empty());
        let mut fields = FieldManager::new();
        fields.record_upper_bound(addr, 32);
        fields.record_upper_bound(addr, 64);
        assert_eq!(fields.upper_bound(addr), Some(32));

        let other = heap.allocate_built(CellBits::empty(), Vec::new());
        assert!(fields.check_upper_bound(addr, &SymLen::from(32)).is_ok());
        assert!(fields.check_upper_bound(addr, &SymLen::from(33)).is_err());
        assert!(fields.check_upper_bound(other, &SymLen::from(900)).is_ok());
    }
}
