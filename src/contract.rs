//! This module contains types useful for dealing with concrete contracts that
//! you want to analyze.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use tracing::debug;

use crate::{
    cell::{boc, dictionary::parse_signed_dictionary, Cell, CellBuilder, CellSlice},
    constant::{METHOD_ID_BITS, RECV_INTERNAL_METHOD_ID},
    disassembly::decoder,
    error::cell::{Error, Result},
    opcode::Opcode,
};

/// The balance a contract is assumed to hold when none is given.
const DEFAULT_BALANCE: u64 = 1_000_000_000;

/// A representation of a contract that is passed to the library.
#[derive(Clone, Debug)]
pub struct Contract {
    code:    Cell,
    data:    Option<Cell>,
    methods: BTreeMap<i32, CellSlice>,
    address: Cell,
    balance: BigInt,
}

impl Contract {
    /// Creates a new contract from its `code` cell.
    ///
    /// Code that starts with the standard method dispatch prologue
    /// (`SETCP0; DICTPUSHCONST 19; DICTIGETJMPZ`) has its methods read out of
    /// the dictionary the prologue dispatches through. Any other code is
    /// treated as a single `recv_internal` method.
    ///
    /// The contract has no data, so its persistent data is symbolic, and
    /// lives at the standard address in the basechain whose account id is the
    /// hash of its code.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the method dictionary is malformed.
    pub fn new(code: Cell) -> Result<Self> {
        let methods = match method_table(&code)? {
            Some(methods) => methods,
            None => BTreeMap::from([(RECV_INTERNAL_METHOD_ID, code.to_slice())]),
        };
        debug!(methods = methods.len(), "Loaded contract code");
        let address = std_address(0, code.hash().as_bytes())?;
        Ok(Self {
            code,
            data: None,
            methods,
            address,
            balance: BigInt::from(DEFAULT_BALANCE),
        })
    }

    /// Creates a new contract from serialized bag-of-cells containers of its
    /// code and, optionally, its data.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if either container is malformed.
    pub fn from_boc(code: &[u8], data: Option<&[u8]>) -> Result<Self> {
        let contract = Self::new(boc::deserialize_root(code)?)?;
        match data {
            Some(bytes) => Ok(contract.with_data(boc::deserialize_root(bytes)?)),
            None => Ok(contract),
        }
    }

    /// Sets the persistent data of the contract.
    #[must_use]
    pub fn with_data(mut self, data: Cell) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_balance(mut self, balance: BigInt) -> Self {
        self.balance = balance;
        self
    }

    /// Sets the address of the contract to the standard address of
    /// `account` in `workchain`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the address cannot be encoded.
    pub fn with_address(mut self, workchain: i8, account: &[u8; 32]) -> Result<Self> {
        self.address = std_address(workchain, account)?;
        Ok(self)
    }

    /// Gets a reference to the code of the contract.
    #[must_use]
    pub fn code(&self) -> &Cell {
        &self.code
    }

    /// Gets the persistent data of the contract, if it is known.
    #[must_use]
    pub fn data(&self) -> Option<&Cell> {
        self.data.as_ref()
    }

    /// Gets the code of the method with the given `id`.
    #[must_use]
    pub fn method(&self, id: i32) -> Option<&CellSlice> {
        self.methods.get(&id)
    }

    /// Iterates over the methods of the contract in order of their ids.
    pub fn methods(&self) -> impl Iterator<Item = (i32, &CellSlice)> {
        self.methods.iter().map(|(id, code)| (*id, code))
    }

    /// Gets the cell holding the address of the contract.
    #[must_use]
    pub fn address(&self) -> &Cell {
        &self.address
    }

    #[must_use]
    pub fn balance(&self) -> &BigInt {
        &self.balance
    }
}

/// Reads the method table of `code` if it starts with the dispatch prologue.
fn method_table(code: &Cell) -> Result<Option<BTreeMap<i32, CellSlice>>> {
    let mut slice = code.to_slice();
    let mut prologue = std::iter::from_fn(|| decoder::decode(&mut slice).ok());
    let (Some(Opcode::SetCp0), Some(Opcode::DictPushConst { dictionary, key_bits }), Some(Opcode::DictIGetJmpZ)) =
        (prologue.next(), prologue.next(), prologue.next())
    else {
        return Ok(None);
    };
    if usize::from(key_bits) != METHOD_ID_BITS {
        return Ok(None);
    }

    let mut methods = BTreeMap::new();
    for (id, body) in parse_signed_dictionary(&dictionary, METHOD_ID_BITS)? {
        let id = i32::try_from(id).map_err(|_| Error::InvalidDictionary {
            reason: format!("method id {id} is out of range"),
        })?;
        methods.insert(id, body);
    }
    Ok(Some(methods))
}

/// Encodes `addr_std$10 anycast:nothing workchain_id:int8 address:bits256`.
fn std_address(workchain: i8, account: &[u8; 32]) -> Result<Cell> {
    let mut builder = CellBuilder::new();
    builder.store_uint(0b100, 3)?;
    builder.store_int(i64::from(workchain), 8)?;
    for byte in account {
        builder.store_uint(u64::from(*byte), 8)?;
    }
    builder.build()
}

#[cfg(test)]
mod test {
    use bitvec::{order::Msb0, vec::BitVec};

    use crate::{
        cell::{dictionary::build_dictionary, Cell, CellBuilder},
        constant::{METHOD_ID_BITS, RECV_INTERNAL_METHOD_ID, STD_ADDRESS_BITS},
        contract::Contract,
        disassembly::decoder,
        opcode::Opcode,
        utility::bigint_to_bits,
    };

    fn method_key(id: i64) -> BitVec<u8, Msb0> {
        bigint_to_bits(&id.into(), METHOD_ID_BITS)
    }

    #[test]
    fn treats_plain_code_as_a_receiver() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        decoder::encode(&Opcode::Nop, &mut builder)?;
        let contract = Contract::new(builder.build()?)?;

        let ids: Vec<_> = contract.methods().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![RECV_INTERNAL_METHOD_ID]);
        assert_eq!(contract.address().bit_len(), usize::from(STD_ADDRESS_BITS));
        Ok(())
    }

    #[test]
    fn reads_methods_through_the_dispatch_prologue() -> anyhow::Result<()> {
        let body = |value: u64| -> anyhow::Result<Cell> {
            let mut builder = CellBuilder::new();
            builder.store_uint(value, 8)?;
            Ok(builder.build()?)
        };
        let entries = vec![
            (method_key(-1), body(1)?.to_slice()),
            (method_key(0), body(2)?.to_slice()),
            (method_key(85143), body(3)?.to_slice()),
        ];
        let dictionary = build_dictionary(&entries, METHOD_ID_BITS)?;

        let mut builder = CellBuilder::new();
        for opcode in [
            Opcode::SetCp0,
            Opcode::DictPushConst {
                dictionary,
                key_bits: 19,
            },
            Opcode::DictIGetJmpZ,
        ] {
            decoder::encode(&opcode, &mut builder)?;
        }
        let contract = Contract::new(builder.build()?)?;

        let ids: Vec<_> = contract.methods().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![-1, 0, 85143]);
        let getter = contract.method(85143).ok_or_else(|| anyhow::anyhow!("missing getter"))?;
        assert_eq!(getter.preload_uint(8)?, 3);
        Ok(())
    }
}
