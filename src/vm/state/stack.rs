//! This module contains the implementation of the symbolic virtual machine's
//! stack.

use crate::vm::value::Value;

/// The representation of the symbolic virtual machine's stack.
///
/// # Indexing
///
/// Indexing into this stack is zero-based, where `s0` is the top of the stack.
///
/// # Sharing
///
/// The stack is a persistent vector, so the copies of it held by forked states
/// and by exception handlers share their common contents.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    data: im::Vector<Value>,
}

impl Stack {
    /// Creates a new stack without any items on it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the provided value onto the top of the stack.
    pub fn push(&mut self, value: Value) {
        self.data.push_back(value);
    }

    /// Pops the top value from the stack.
    pub fn pop(&mut self) -> Option<Value> {
        self.data.pop_back()
    }

    /// Places `value` at the very bottom of the stack.
    pub fn push_bottom(&mut self, value: Value) {
        self.data.push_front(value);
    }

    /// Reads the value at `depth`.
    #[must_use]
    pub fn get(&self, depth: usize) -> Option<&Value> {
        self.index_of(depth).and_then(|i| self.data.get(i))
    }

    /// Overwrites the value at `depth`, returning whether it existed.
    pub fn set(&mut self, depth: usize, value: Value) -> bool {
        match self.index_of(depth) {
            Some(i) => {
                self.data.set(i, value);
                true
            }
            None => false,
        }
    }

    /// Swaps the values at depths `i` and `j`, returning whether both existed.
    pub fn swap(&mut self, i: usize, j: usize) -> bool {
        match (self.index_of(i), self.index_of(j)) {
            (Some(i), Some(j)) => {
                self.data.swap(i, j);
                true
            }
            _ => false,
        }
    }

    /// Removes the value at `depth`, shifting the values above it down.
    pub fn remove(&mut self, depth: usize) -> Option<Value> {
        let index = self.index_of(depth)?;
        Some(self.data.remove(index))
    }

    /// Inserts `value` so that it ends up at `depth`.
    pub fn insert(&mut self, depth: usize, value: Value) -> bool {
        if depth > self.data.len() {
            return false;
        }
        let index = self.data.len() - depth;
        self.data.insert(index, value);
        true
    }

    /// Gets the number of values on the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over the values from the bottom of the stack to the top.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.data.iter()
    }

    fn index_of(&self, depth: usize) -> Option<usize> {
        self.data.len().checked_sub(depth + 1)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        solver::SymInt,
        vm::{state::stack::Stack, value::Value},
    };

    fn int(value: &Value) -> Option<i64> {
        match value {
            Value::Int(SymInt::Concrete(n)) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    #[test]
    fn indexes_from_the_top() {
        let mut stack = Stack::new();
        for n in 1..=3 {
            stack.push(Value::Int(SymInt::from_i64(n)));
        }

        assert_eq!(stack.get(0).and_then(int), Some(3));
        assert_eq!(stack.get(2).and_then(int), Some(1));
        assert!(stack.get(3).is_none());

        assert!(stack.swap(0, 2));
        assert_eq!(stack.pop().as_ref().and_then(int), Some(1));
        assert!(stack.insert(2, Value::Null));
        assert!(matches!(stack.get(2), Some(Value::Null)));
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn values_pushed_to_the_bottom_are_popped_last() {
        let mut stack = Stack::new();
        stack.push(Value::Int(SymInt::from_i64(1)));
        stack.push_bottom(Value::Int(SymInt::from_i64(2)));

        assert_eq!(stack.pop().as_ref().and_then(int), Some(1));
        assert_eq!(stack.pop().as_ref().and_then(int), Some(2));
        assert!(stack.is_empty());
    }
}
