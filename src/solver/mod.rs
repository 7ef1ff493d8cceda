//! This module contains the interface between the exploration and the
//! constraint solver.
//!
//! A single [`SolverSession`] is shared by every state of an exploration. Each
//! state carries its own [`PathConstraints`], and before the solver is asked
//! anything on behalf of a state the session is brought in line with that
//! state's ancestry: assertion levels belonging to abandoned branches are
//! popped, and the state's remaining constraints are pushed.

pub mod value;

use std::{
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{trace, warn};
use z3::{ast::Bool, Model, SatResult, Solver};

pub use crate::solver::value::{SymBool, SymInt};

/// The source of identifiers for path constraints.
///
/// Identifiers only need to be unique within a process, as they are what the
/// session uses to recognise the shared prefix of two paths.
static NEXT_CONSTRAINT_ID: AtomicU64 = AtomicU64::new(0);

/// A single formula asserted on a path.
#[derive(Debug)]
pub struct PathConstraint {
    id:      u64,
    formula: Bool,
}

impl PathConstraint {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn formula(&self) -> &Bool {
        &self.formula
    }
}

/// The constraints accumulated along a path, oldest first.
///
/// Cloning is cheap and shares the common prefix, so a forked state can extend
/// its copy without affecting its sibling.
#[derive(Clone, Debug, Default)]
pub struct PathConstraints {
    items: im::Vector<Rc<PathConstraint>>,
}

impl PathConstraints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `formula` to the end of the path.
    pub fn push(&mut self, formula: Bool) {
        let id = NEXT_CONSTRAINT_ID.fetch_add(1, Ordering::Relaxed);
        self.items.push_back(Rc::new(PathConstraint { id, formula }));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<PathConstraint>> {
        self.items.iter()
    }

    /// Gets the conjunction of every constraint on the path.
    #[must_use]
    pub fn conjunction(&self) -> Bool {
        self.items
            .iter()
            .fold(Bool::from_bool(true), |acc, c| acc & c.formula.clone())
    }
}

/// A solver session whose assertion stack mirrors the path of the state
/// currently being worked on.
///
/// Every constraint sits on its own assertion level, so retracting the
/// constraints of an abandoned branch is a matter of popping levels.
#[derive(Debug)]
pub struct SolverSession {
    solver:     Solver,
    levels:     Vec<u64>,
    assertions: usize,
}

impl SolverSession {
    /// Creates a new session, configuring the solver to give up on a single
    /// query after `timeout_ms` milliseconds.
    #[must_use]
    pub fn new(timeout_ms: u32) -> Self {
        z3::Context::thread_local().update_param_value("timeout", &timeout_ms.to_string());
        Self {
            solver:     Solver::new(),
            levels:     Vec::new(),
            assertions: 0,
        }
    }

    /// Brings the solver's assertion stack in line with `path`.
    pub fn sync(&mut self, path: &PathConstraints) {
        let common = self
            .levels
            .iter()
            .zip(path.iter())
            .take_while(|(level, constraint)| **level == constraint.id)
            .count();

        let stale = self.levels.len() - common;
        if stale > 0 {
            #[allow(clippy::cast_possible_truncation)] // Paths are far shorter than u32::MAX
            self.solver.pop(stale as u32);
            self.levels.truncate(common);
        }

        for constraint in path.iter().skip(common) {
            self.solver.push();
            self.solver.assert(&constraint.formula);
            self.levels.push(constraint.id);
            self.assertions += 1;
        }
        trace!(depth = self.levels.len(), popped = stale, "Synchronised solver session");
    }

    /// Checks whether `path` is satisfiable.
    ///
    /// An `unknown` answer from the solver (such as on timeout) is treated as
    /// infeasible.
    pub fn check(&mut self, path: &PathConstraints) -> bool {
        self.sync(path);
        Self::interpret(self.solver.check())
    }

    /// Checks whether `path` is satisfiable together with `extra`, without
    /// recording `extra` in the session.
    pub fn check_with(&mut self, path: &PathConstraints, extra: &Bool) -> bool {
        self.sync(path);
        Self::interpret(self.solver.check_assumptions(&[extra.clone()]))
    }

    /// Gets a model satisfying `path`, if there is one.
    pub fn model(&mut self, path: &PathConstraints) -> Option<Model> {
        if self.check(path) {
            self.solver.get_model()
        } else {
            None
        }
    }

    /// Gets the number of assertions ever made through this session.
    #[must_use]
    pub fn assertion_count(&self) -> usize {
        self.assertions
    }

    /// Gets the current depth of the solver's assertion stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    fn interpret(result: SatResult) -> bool {
        match result {
            SatResult::Sat => true,
            SatResult::Unsat => false,
            SatResult::Unknown => {
                warn!("Solver returned unknown, treating the query as infeasible");
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use z3::ast::BV;

    use crate::solver::{PathConstraints, SolverSession};

    #[test]
    fn retracts_constraints_of_abandoned_branches() {
        let mut session = SolverSession::new(1000);
        let x = BV::new_const("x", 8);

        let mut base = PathConstraints::new();
        base.push(x.bvugt(&BV::from_u64(10, 8)));

        let mut left = base.clone();
        left.push(x.eq(&BV::from_u64(5, 8)));
        let mut right = base.clone();
        right.push(x.eq(&BV::from_u64(20, 8)));

        assert!(!session.check(&left));
        assert_eq!(session.depth(), 2);
        assert!(session.check(&right));
        assert_eq!(session.depth(), 2);
        assert!(session.check(&base));
        assert_eq!(session.depth(), 1);

        // The shared prefix is asserted once.
        assert_eq!(session.assertion_count(), 3);
    }

    #[test]
    fn checks_assumptions_without_recording_them() {
        let mut session = SolverSession::new(1000);
        let x = BV::new_const("y", 8);
        let mut path = PathConstraints::new();
        path.push(x.bvult(&BV::from_u64(4, 8)));

        assert!(!session.check_with(&path, &x.eq(&BV::from_u64(9, 8))));
        assert!(session.check_with(&path, &x.eq(&BV::from_u64(3, 8))));
        assert!(session.check(&path));
        assert_eq!(session.depth(), 1);
    }
}
