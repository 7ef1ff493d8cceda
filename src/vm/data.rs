//! This module contains miscellaneous small data-types that are used throughout
//! the virtual machine to enforce its exploration bounds.

use serde::Serialize;

/// The identifier of one occurrence of a loop on a path.
///
/// Every execution of a loop instruction creates a new occurrence, so nested
/// and repeated loops are bounded independently.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LoopId(pub u32);

/// Tracks the loops that are active on a path and how many times the path has
/// forked inside each of them.
///
/// Only forks count towards the iteration bound. Iterations whose control flow
/// is fully determined never branch and so cannot multiply paths.
#[derive(Clone, Debug, Default)]
pub struct LoopTracker {
    active: im::Vector<LoopId>,
    forks:  im::HashMap<LoopId, u32>,
}

impl LoopTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records entry into an iteration of `id`, making it the innermost loop.
    pub fn enter(&mut self, id: LoopId) {
        if self.active.last() != Some(&id) {
            self.active.retain(|active| *active != id);
            self.active.push_back(id);
        }
    }

    /// Records that `id` was left, along with any loops nested inside it.
    pub fn exit(&mut self, id: LoopId) {
        if let Some(position) = self.active.iter().position(|active| *active == id) {
            self.active.truncate(position);
        }
    }

    /// Gets the innermost active loop.
    #[must_use]
    pub fn innermost(&self) -> Option<LoopId> {
        self.active.last().copied()
    }

    /// Records a fork inside the innermost loop, returning the number of forks
    /// made inside it so far.
    pub fn record_fork(&mut self) -> Option<u32> {
        let id = self.innermost()?;
        let count = self.forks.entry(id).or_insert(0);
        *count += 1;
        Some(*count)
    }

    /// Gets the number of forks made inside `id`.
    #[must_use]
    pub fn forks(&self, id: LoopId) -> u32 {
        self.forks.get(&id).copied().unwrap_or(0)
    }
}

/// The methods currently being executed on a path, innermost last.
#[derive(Clone, Debug, Default)]
pub struct CallStack {
    frames: im::Vector<i32>,
}

impl CallStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, method: i32) {
        self.frames.push_back(method);
    }

    pub fn pop(&mut self) -> Option<i32> {
        self.frames.pop_back()
    }

    /// Counts the frames of `method` on the stack.
    #[must_use]
    pub fn occurrences(&self, method: i32) -> u32 {
        #[allow(clippy::cast_possible_truncation)] // Bounded by the recursion limit
        let count = self.frames.iter().filter(|m| **m == method).count() as u32;
        count
    }

    /// Gets the deepest simultaneous nesting of any single method.
    #[must_use]
    pub fn max_occurrences(&self) -> u32 {
        self.frames
            .iter()
            .map(|m| self.occurrences(*m))
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod test {
    use crate::vm::data::{CallStack, LoopId, LoopTracker};

    #[test]
    fn counts_forks_per_innermost_loop() {
        let mut loops = LoopTracker::new();
        assert_eq!(loops.record_fork(), None);

        loops.enter(LoopId(0));
        assert_eq!(loops.record_fork(), Some(1));
        loops.enter(LoopId(1));
        assert_eq!(loops.record_fork(), Some(1));
        assert_eq!(loops.record_fork(), Some(2));

        loops.exit(LoopId(1));
        assert_eq!(loops.innermost(), Some(LoopId(0)));
        assert_eq!(loops.record_fork(), Some(2));

        loops.exit(LoopId(0));
        assert_eq!(loops.innermost(), None);
        assert_eq!(loops.forks(LoopId(1)), 2);
    }

    #[test]
    fn counts_method_occurrences() {
        let mut calls = CallStack::new();
        calls.push(3);
        calls.push(4);
        calls.push(3);

        assert_eq!(calls.occurrences(3), 2);
        assert_eq!(calls.max_occurrences(), 2);
        assert_eq!(calls.pop(), Some(3));
        assert_eq!(calls.occurrences(3), 1);
    }
}
