//! This module contains the instruction model used by the interpreter: real
//! instructions decoded from code cells and the artificial instructions the
//! engine inserts between them.
//!
//! # Locations
//!
//! Code lives in cells rather than in a flat byte stream, so the location of a
//! real instruction is the representation hash of the cell it was decoded from
//! together with the bit offset of the instruction within that cell's data.
//! Identical code cells therefore share locations, which is exactly what is
//! wanted for coverage.

pub mod decoder;

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use serde::Serialize;
use tracing::debug;

use crate::{
    cell::{CellHash, CellSlice},
    opcode::{artificial::Artificial, Opcode},
};

/// The location of a real instruction within the code of a contract.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Location {
    /// The representation hash of the code cell containing the instruction.
    pub cell: CellHash,

    /// The bit offset of the instruction in the data of that cell.
    pub offset: u16,
}

impl Location {
    #[must_use]
    pub fn new(cell: CellHash, offset: u16) -> Self {
        Self { cell, offset }
    }

    /// Gets the location of the instruction at the cursor of `code`.
    #[allow(clippy::cast_possible_truncation)] // Offsets are bounded by the cell size
    #[must_use]
    pub fn of(code: &CellSlice) -> Self {
        Self::new(code.cell_hash(), code.data_pos() as u16)
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.cell.as_bytes()), self.offset)
    }
}

/// An instruction as executed by the interpreter.
#[derive(Clone, Debug)]
pub enum Instruction {
    /// An instruction decoded from the contract's code.
    Real {
        opcode:   Opcode,
        location: Location,

        /// The number of code bits the instruction occupies.
        bits: u16,

        /// The number of code references the instruction consumes.
        refs: u8,
    },

    /// An instruction inserted by the engine.
    Artificial(Artificial),
}

impl Instruction {
    /// Gets the location of the instruction, if it is a real one.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        match self {
            Self::Real { location, .. } => Some(*location),
            Self::Artificial(_) => None,
        }
    }

    #[must_use]
    pub fn mnemonic(&self) -> String {
        match self {
            Self::Real { opcode, .. } => opcode.mnemonic(),
            Self::Artificial(artificial) => artificial.name(),
        }
    }
}

/// The result of statically sweeping over a piece of code.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticCode {
    /// The location of every real instruction that could be decoded.
    pub locations: BTreeSet<Location>,

    /// The identifiers of the methods called through `CALLDICT`.
    pub calls: BTreeSet<i32>,

    /// The number of places at which decoding failed.
    pub undecodable: usize,
}

/// Statically decodes every instruction reachable from `code` by following
/// inline continuations and code references.
///
/// Decoding of a cell stops at the first instruction that cannot be decoded,
/// as the bits after it cannot be reliably interpreted.
#[must_use]
pub fn sweep(code: &CellSlice) -> StaticCode {
    let mut result = StaticCode::default();
    let mut visited = BTreeSet::new();
    let mut pending = vec![code.clone()];

    while let Some(mut code) = pending.pop() {
        if !visited.insert((code.cell_hash(), code.data_pos(), code.remaining_bits())) {
            continue;
        }
        loop {
            if code.remaining_bits() == 0 {
                if let Some(next) = code.remaining_cells().first() {
                    pending.push(next.to_slice());
                }
                break;
            }
            let location = Location::of(&code);
            let opcode = match decoder::decode(&mut code) {
                Ok(opcode) => opcode,
                Err(error) => {
                    debug!(%location, ?error, "Static sweep stopped at undecodable code");
                    result.undecodable += 1;
                    break;
                }
            };
            result.locations.insert(location);
            match opcode {
                Opcode::PushCont(body) => pending.push(body),
                Opcode::PushRefCont(cell)
                | Opcode::IfRef(cell)
                | Opcode::IfNotRef(cell)
                | Opcode::IfJmpRef(cell)
                | Opcode::IfNotJmpRef(cell) => pending.push(cell.to_slice()),
                Opcode::CallDict(id) => {
                    result.calls.insert(i32::from(id));
                }
                _ => (),
            }
        }
    }

    result
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{
        cell::CellBuilder,
        disassembly::{decoder::encode, sweep},
        opcode::{arithmetic::BinaryOp, Opcode},
    };

    #[test]
    fn sweep_follows_continuations_and_references() -> anyhow::Result<()> {
        let mut branch = CellBuilder::new();
        encode(&Opcode::PushInt(BigInt::from(2)), &mut branch)?;
        encode(&Opcode::CallDict(7), &mut branch)?;
        let branch = branch.build()?;

        let mut body = CellBuilder::new();
        encode(&Opcode::PushInt(BigInt::from(1)), &mut body)?;
        let body = body.build()?;

        let mut code = CellBuilder::new();
        encode(&Opcode::PushCont(body.to_slice()), &mut code)?;
        encode(&Opcode::IfJmpRef(branch), &mut code)?;
        encode(&Opcode::Binary(BinaryOp::Add), &mut code)?;
        let code = code.build()?;

        let swept = sweep(&code.to_slice());
        assert_eq!(swept.locations.len(), 6);
        assert_eq!(swept.calls.iter().copied().collect::<Vec<_>>(), vec![7]);
        assert_eq!(swept.undecodable, 0);
        Ok(())
    }
}
