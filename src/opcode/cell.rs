//! Opcodes that create, build and parse cells.
//!
//! The `take_*` functions read from a symbolic slice on behalf of an
//! instruction, fixating the underlying cell to its schema label first and
//! throwing a cell underflow on the paths where the data runs out. They are
//! shared with the action phase, which parses out messages the same way.

use num_bigint::BigInt;
use z3::ast::BV;

use crate::{
    cell::{Cell, CellSlice},
    constant::{
        exit_code,
        CELL_CREATE_GAS_PRICE,
        CELL_DATA_BITS,
        INT_BITS,
        LENGTH_BITS,
        MAX_CELL_BITS,
        MAX_CELL_REFS,
    },
    opcode::arithmetic::out_of_range,
    solver::{SymBool, SymInt},
    vm::{
        state::{
            heap::{CellAddr, CellBits, SymLen, SymRef},
            VMState,
        },
        step::{Interrupt, StepContext},
        value::{SymBuilder, SymSlice, Value},
    },
};

/// The width of the length prefix of a `Coins` amount.
const COINS_LENGTH_BITS: u16 = 4;

/// The widest amount of `Coins`, in bits.
const COINS_VALUE_BITS: u32 = 120;

#[allow(clippy::cast_possible_truncation)] // MAX_CELL_BITS is a small constant
const MAX_BITS: u16 = MAX_CELL_BITS as u16;

/// Seals `bits` and `refs` into a cell on the heap.
///
/// The cell stays concrete if every part of it is, so that it can later be
/// decoded against a schema label.
///
/// # Errors
///
/// Returns [`Err`] if a concrete cell cannot be formed.
pub fn seal(state: &mut VMState, bits: CellBits, refs: Vec<SymRef>) -> Result<CellAddr, Interrupt> {
    if let Some(data) = bits.as_concrete() {
        let children: Option<Vec<Cell>> = refs
            .iter()
            .map(|r| {
                r.as_concrete()
                    .and_then(|addr| state.heap.get(addr).ok())
                    .and_then(|cell| cell.concrete().cloned())
            })
            .collect();
        if let Some(children) = children {
            let cell = Cell::new(data.clone(), children)?;
            return Ok(state.heap.allocate_concrete(&cell));
        }
    }
    Ok(state.heap.allocate_built(bits, refs))
}

/// Takes `width` bits from `slice`.
///
/// # Errors
///
/// Throws a cell underflow on the paths where fewer bits remain.
pub fn take_bits(
    ctx: &mut StepContext,
    state: &mut VMState,
    slice: &mut SymSlice,
    width: &SymLen,
) -> Result<CellBits, Interrupt> {
    ctx.fixate(state, slice.cell)?;
    let bits = state.heap.get(slice.cell)?.bits.clone();
    let end = slice.data_pos.add(width);
    ctx.check(state, &end.le(&bits.len()).not(), exit_code::CELL_UNDERFLOW)?;
    let window = bits.window(&slice.data_pos, width);
    slice.data_pos = end;
    Ok(window)
}

/// Takes a `width`-bit integer from `slice`.
///
/// # Errors
///
/// Throws a cell underflow on the paths where fewer bits remain.
pub fn take_int(
    ctx: &mut StepContext,
    state: &mut VMState,
    slice: &mut SymSlice,
    width: u16,
    signed: bool,
) -> Result<SymInt, Interrupt> {
    Ok(take_bits(ctx, state, slice, &SymLen::from(width))?.read_int(width, signed))
}

/// Reads an unsigned integer of a possibly symbolic `width`, at most
/// `max_bits` wide, from the start of `bits`.
fn read_var_uint(bits: &CellBits, width: &SymLen, max_bits: u32) -> SymInt {
    if let Some(width) = width.as_concrete() {
        return bits.read_int(width, false);
    }
    let shift = BV::from_u64(u64::from(CELL_DATA_BITS), CELL_DATA_BITS).bvsub(&width.to_data_width());
    let value = bits.to_bv().bvlshr(&shift).extract(max_bits - 1, 0);
    SymInt::Symbolic(value.zero_ext(INT_BITS - max_bits))
}

/// Takes a `Coins` amount: a 4-bit byte length followed by that many bytes.
///
/// # Errors
///
/// Throws a cell underflow on the paths where the data runs out.
pub fn take_coins(ctx: &mut StepContext, state: &mut VMState, slice: &mut SymSlice) -> Result<SymInt, Interrupt> {
    let length = take_int(ctx, state, slice, COINS_LENGTH_BITS, false)?;
    let width = match &length {
        SymInt::Concrete(n) => SymLen::Concrete(u16::try_from(n).unwrap_or(0) * 8),
        SymInt::Symbolic(bv) => {
            SymLen::Symbolic(bv.extract(LENGTH_BITS - 1, 0).bvmul(&BV::from_u64(8, LENGTH_BITS)))
        }
    };
    let bits = take_bits(ctx, state, slice, &width)?;
    Ok(read_var_uint(&bits, &width, COINS_VALUE_BITS))
}

/// Takes a reference from `slice`.
///
/// # Errors
///
/// Throws a cell underflow on the paths where no reference remains.
pub fn take_ref(ctx: &mut StepContext, state: &mut VMState, slice: &mut SymSlice) -> Result<SymRef, Interrupt> {
    ctx.fixate(state, slice.cell)?;
    let refs_len = state.heap.get(slice.cell)?.refs_len.clone();
    let position = SymLen::from(u16::from(slice.ref_pos));
    ctx.check(state, &refs_len.le(&position), exit_code::CELL_UNDERFLOW)?;
    let child = ctx.child(state, slice.cell, usize::from(slice.ref_pos))?;
    slice.ref_pos += 1;
    Ok(child)
}

/// Takes a message address, forking on its kind.
///
/// # Errors
///
/// Throws a cell underflow on the paths where the data runs out, and reports
/// anycast addresses as unsupported.
pub fn take_address(ctx: &mut StepContext, state: &mut VMState, slice: &mut SymSlice) -> Result<(), Interrupt> {
    let tag = take_int(ctx, state, slice, 2, false)?;
    let is = |kind: i64| tag.equals(&SymInt::from_i64(kind));

    // addr_none$00
    if ctx.decide(state, &is(0))? {
        return Ok(());
    }
    // addr_extern$01 len:(## 9) external_address:(bits len)
    if ctx.decide(state, &is(1))? {
        let length = take_int(ctx, state, slice, 9, false)?;
        take_bits(ctx, state, slice, &SymLen::from_int(&length))?;
        return Ok(());
    }
    let anycast = take_int(ctx, state, slice, 1, false)?;
    if ctx.decide(state, &anycast.is_zero().not())? {
        return Err(Interrupt::unsupported("LDMSGADDR of an anycast address"));
    }
    // addr_std$10 workchain_id:int8 address:bits256
    if ctx.decide(state, &is(2))? {
        take_bits(ctx, state, slice, &SymLen::from(8 + 256))?;
        return Ok(());
    }
    // addr_var$11 addr_len:(## 9) workchain_id:int32 address:(bits addr_len)
    let length = take_int(ctx, state, slice, 9, false)?;
    take_bits(ctx, state, slice, &SymLen::from(32))?;
    take_bits(ctx, state, slice, &SymLen::from_int(&length))?;
    Ok(())
}

/// Gets the bits of `slice` that have not been read yet.
fn remaining_bits(state: &VMState, slice: &SymSlice) -> Result<(CellBits, SymLen), Interrupt> {
    let bits = &state.heap.get(slice.cell)?.bits;
    let width = bits.len().sub(&slice.data_pos);
    Ok((bits.window(&slice.data_pos, &width), width))
}

/// Pops a cell reference and resolves it to a single cell.
fn pop_addr(ctx: &mut StepContext, state: &mut VMState) -> Result<CellAddr, Interrupt> {
    let reference = state.pop_cell()?;
    ctx.resolve(state, &reference)
}

/// Throws a cell overflow on the paths where `builder` cannot take `bits`
/// more bits and `refs` more references.
fn check_room(
    ctx: &mut StepContext,
    state: &mut VMState,
    builder: &SymBuilder,
    bits: &SymLen,
    bound: u16,
    refs: usize,
) -> Result<(), Interrupt> {
    if builder.refs.len() + refs > MAX_CELL_REFS {
        return Err(Interrupt::throw(exit_code::CELL_OVERFLOW));
    }
    if builder.upper_bound.saturating_add(bound) <= MAX_BITS {
        return Ok(());
    }
    let total = builder.bits.len().add(bits);
    let overflow = total.le(&SymLen::from(MAX_BITS)).not();
    ctx.check(state, &overflow, exit_code::CELL_OVERFLOW)
}

/// `PUSHREF` pushes a constant cell.
///
/// # Errors
///
/// Never fails.
pub fn push_ref(state: &mut VMState, cell: &Cell) -> Result<(), Interrupt> {
    let addr = state.heap.allocate_concrete(cell);
    state.push(Value::Cell(SymRef::Concrete(addr)));
    Ok(())
}

/// `PUSHSLICE` pushes a constant slice.
///
/// # Errors
///
/// Never fails for slices decoded from valid code.
pub fn push_slice(state: &mut VMState, slice: &CellSlice) -> Result<(), Interrupt> {
    let addr = state.heap.allocate_concrete(&slice.to_cell()?);
    state.push(Value::Slice(SymSlice::new(addr)));
    Ok(())
}

/// # Errors
///
/// Never fails.
pub fn new_builder(state: &mut VMState) -> Result<(), Interrupt> {
    state.push(Value::Builder(SymBuilder::new()));
    Ok(())
}

/// `ENDC` seals a builder into a cell.
///
/// # Errors
///
/// Throws if the top value is not a builder.
pub fn end_builder(_ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let builder = state.pop_builder()?;
    state.charge(CELL_CREATE_GAS_PRICE);
    let bound = builder.upper_bound;
    let addr = seal(state, builder.bits, builder.refs.into_iter().collect())?;
    state.fields.record_upper_bound(addr, bound);
    state.push(Value::Cell(SymRef::Concrete(addr)));
    Ok(())
}

/// `STI n` and `STU n` store an integer into a builder.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `b`   | `b'`   |
/// | 1           | `x`   |        |
///
/// # Errors
///
/// Throws a range check error if `x` does not fit and a cell overflow if the
/// builder is full.
pub fn store_int(ctx: &mut StepContext, state: &mut VMState, width: u16, signed: bool) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let mut builder = state.pop_builder()?;
    let x = state.pop_int()?;
    ctx.check(state, &out_of_range(&x, u32::from(width), signed), exit_code::RANGE_CHECK)?;
    check_room(ctx, state, &builder, &SymLen::from(width), width, 0)?;

    builder.bits = builder.bits.append(&CellBits::from_int(&x, width));
    builder.upper_bound = builder.upper_bound.saturating_add(width).min(MAX_BITS);
    state.push(Value::Builder(builder));
    Ok(())
}

/// `STREF` stores a cell as the next reference of a builder.
///
/// # Errors
///
/// Throws a cell overflow if the builder already holds four references.
pub fn store_ref(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let mut builder = state.pop_builder()?;
    let cell = state.pop_cell()?;
    check_room(ctx, state, &builder, &SymLen::zero(), 0, 1)?;
    builder.refs.push_back(cell);
    state.push(Value::Builder(builder));
    Ok(())
}

/// `STSLICE` appends the unread part of a slice to a builder.
///
/// # Errors
///
/// Throws a cell overflow if the builder cannot take the slice.
pub fn store_slice(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let mut builder = state.pop_builder()?;
    let mut slice = state.pop_slice()?;
    ctx.fixate(state, slice.cell)?;

    let refs_len = state.heap.get(slice.cell)?.refs_len.clone();
    let mut refs = Vec::new();
    while usize::from(slice.ref_pos) < MAX_CELL_REFS {
        let position = SymLen::from(u16::from(slice.ref_pos));
        if !ctx.decide(state, &refs_len.le(&position).not())? {
            break;
        }
        refs.push(take_ref(ctx, state, &mut slice)?);
    }

    let (bits, width) = remaining_bits(state, &slice)?;
    let bound = state.fields.upper_bound(slice.cell).unwrap_or(MAX_BITS);
    check_room(ctx, state, &builder, &width, bound, refs.len())?;

    builder.bits = builder.bits.append(&bits);
    builder.refs.extend(refs);
    builder.upper_bound = builder.upper_bound.saturating_add(bound).min(MAX_BITS);
    state.push(Value::Builder(builder));
    Ok(())
}

/// `STGRAMS` stores a `Coins` amount into a builder.
///
/// # Errors
///
/// Throws a range check error unless `0 <= x < 2^120`, and a cell overflow
/// if the builder is full.
pub fn store_coins(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let mut builder = state.pop_builder()?;
    let x = state.pop_int()?;
    ctx.check(state, &out_of_range(&x, COINS_VALUE_BITS, false), exit_code::RANGE_CHECK)?;

    let bits = match x.as_concrete() {
        Some(amount) => {
            #[allow(clippy::cast_possible_truncation)] // At most fifteen bytes
            let bytes = amount.bits().div_ceil(8) as u16;
            let length = CellBits::from_int(&SymInt::from_i64(i64::from(bytes)), COINS_LENGTH_BITS);
            length.append(&CellBits::from_int(&x, bytes * 8))
        }
        None => coins_bits(&x),
    };
    let bound = COINS_LENGTH_BITS + 120;
    check_room(ctx, state, &builder, &bits.len(), bound, 0)?;

    builder.bits = builder.bits.append(&bits);
    builder.upper_bound = builder.upper_bound.saturating_add(bound).min(MAX_BITS);
    state.push(Value::Builder(builder));
    Ok(())
}

/// Encodes a symbolic amount known to lie in `0..2^120` as `Coins`.
fn coins_bits(x: &SymInt) -> CellBits {
    let value = x.to_bv();
    let one = BV::from_u64(1, LENGTH_BITS);
    let zero = BV::from_u64(0, LENGTH_BITS);

    // The byte length is the number of byte boundaries the amount reaches.
    let mut bytes = zero.clone();
    for k in 0..15u32 {
        let boundary = SymInt::Concrete(BigInt::from(1) << (8 * k)).to_bv();
        bytes = bytes.bvadd(&value.bvuge(&boundary).ite(&one, &zero));
    }
    let width = bytes.bvmul(&BV::from_u64(8, LENGTH_BITS));

    let length = CellBits::Symbolic {
        data: bytes.extract(3, 0).concat(&BV::from_u64(0, CELL_DATA_BITS - 4)),
        len:  SymLen::Concrete(COINS_LENGTH_BITS),
    };
    let width = SymLen::Symbolic(width);
    let shift = BV::from_u64(u64::from(CELL_DATA_BITS), CELL_DATA_BITS).bvsub(&width.to_data_width());
    let body = CellBits::Symbolic {
        data: value
            .extract(COINS_VALUE_BITS - 1, 0)
            .zero_ext(CELL_DATA_BITS - COINS_VALUE_BITS)
            .bvshl(&shift),
        len:  width,
    };
    length.append(&body)
}

/// Pushes the number of data bits in a builder.
///
/// # Errors
///
/// Throws if the top value is not a builder.
pub fn builder_bits(state: &mut VMState) -> Result<(), Interrupt> {
    let builder = state.pop_builder()?;
    state.push(builder.bits.len().to_int());
    Ok(())
}

/// Pushes the number of references in a builder.
///
/// # Errors
///
/// Throws if the top value is not a builder.
pub fn builder_refs(state: &mut VMState) -> Result<(), Interrupt> {
    let builder = state.pop_builder()?;
    state.push(SymInt::from_i64(builder.refs.len() as i64));
    Ok(())
}

/// Pushes the number of data bits that still fit into a builder.
///
/// # Errors
///
/// Throws if the top value is not a builder.
pub fn builder_remaining_bits(state: &mut VMState) -> Result<(), Interrupt> {
    let builder = state.pop_builder()?;
    state.push(SymLen::from(MAX_BITS).sub(&builder.bits.len()).to_int());
    Ok(())
}

/// `CTOS` opens a cell for reading.
///
/// # Errors
///
/// Throws if the top value is not a cell, and ends the path with a structural
/// failure if the cell does not match its label.
pub fn ctos(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let addr = pop_addr(ctx, state)?;
    ctx.open_cell(state, addr)?;
    state.push(Value::Slice(SymSlice::new(addr)));
    Ok(())
}

/// `ENDS` checks that a slice has been read completely.
///
/// # Errors
///
/// Throws a cell underflow on the paths where data or references remain.
pub fn ends(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let slice = state.pop_slice()?;
    let remaining = remaining_condition(ctx, state, &slice, true, true)?;
    ctx.check(state, &remaining, exit_code::CELL_UNDERFLOW)
}

/// Gets the condition under which `slice` still has data or references left.
fn remaining_condition(
    ctx: &mut StepContext,
    state: &mut VMState,
    slice: &SymSlice,
    data: bool,
    refs: bool,
) -> Result<SymBool, Interrupt> {
    ctx.fixate(state, slice.cell)?;
    let cell = state.heap.get(slice.cell)?;
    let mut condition = SymBool::Concrete(false);
    if data {
        condition = condition.or(&cell.bits.len().equals(&slice.data_pos).not());
    }
    if refs {
        let position = SymLen::from(u16::from(slice.ref_pos));
        condition = condition.or(&cell.refs_len.equals(&position).not());
    }
    Ok(condition)
}

/// `LDI n`, `LDU n`, `PLDI n` and `PLDU n` read an integer from a slice.
///
/// # Semantics
///
/// | Stack Index | Input | Output      |
/// | :---------: | :---: | :---------: |
/// | 0           | `s`   | `s'`        |
/// | 1           |       | `x`         |
///
/// The preloading forms leave only `x`.
///
/// # Errors
///
/// Throws a cell underflow on the paths where fewer than `n` bits remain.
pub fn load_int(
    ctx: &mut StepContext,
    state: &mut VMState,
    width: u16,
    signed: bool,
    preload: bool,
) -> Result<(), Interrupt> {
    let mut slice = state.pop_slice()?;
    let value = take_int(ctx, state, &mut slice, width, signed)?;
    state.push(value);
    if !preload {
        state.push(Value::Slice(slice));
    }
    Ok(())
}

/// `LDREF` and `PLDREF` read a reference from a slice.
///
/// # Errors
///
/// Throws a cell underflow on the paths where no reference remains.
pub fn load_ref(ctx: &mut StepContext, state: &mut VMState, preload: bool) -> Result<(), Interrupt> {
    let mut slice = state.pop_slice()?;
    let child = take_ref(ctx, state, &mut slice)?;
    state.push(Value::Cell(child));
    if !preload {
        state.push(Value::Slice(slice));
    }
    Ok(())
}

/// `LDREFRTOS` reads a reference from a slice and opens it.
///
/// # Semantics
///
/// | Stack Index | Input | Output          |
/// | :---------: | :---: | :-------------: |
/// | 0           | `s`   | `CTOS(ref)`     |
/// | 1           |       | `s'`            |
///
/// # Errors
///
/// Throws a cell underflow on the paths where no reference remains.
pub fn load_ref_to_slice(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let mut slice = state.pop_slice()?;
    let child = take_ref(ctx, state, &mut slice)?;
    let addr = ctx.resolve(state, &child)?;
    ctx.open_cell(state, addr)?;
    state.push(Value::Slice(slice));
    state.push(Value::Slice(SymSlice::new(addr)));
    Ok(())
}

/// `LDSLICE n` splits the first `n` bits off a slice.
///
/// # Semantics
///
/// | Stack Index | Input | Output    |
/// | :---------: | :---: | :-------: |
/// | 0           | `s`   | `s'`      |
/// | 1           |       | `prefix`  |
///
/// # Errors
///
/// Throws a cell underflow on the paths where fewer than `n` bits remain.
pub fn load_slice(ctx: &mut StepContext, state: &mut VMState, width: u16) -> Result<(), Interrupt> {
    let mut slice = state.pop_slice()?;
    let bits = take_bits(ctx, state, &mut slice, &SymLen::from(width))?;
    let prefix = seal(state, bits, Vec::new())?;
    let bound = state.fields.upper_bound(slice.cell).map_or(width, |b| b.min(width));
    state.fields.record_upper_bound(prefix, bound);
    state.push(Value::Slice(SymSlice::new(prefix)));
    state.push(Value::Slice(slice));
    Ok(())
}

/// `LDGRAMS` reads a `Coins` amount.
///
/// # Errors
///
/// Throws a cell underflow on the paths where the data runs out.
pub fn load_coins(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let mut slice = state.pop_slice()?;
    let amount = take_coins(ctx, state, &mut slice)?;
    state.push(amount);
    state.push(Value::Slice(slice));
    Ok(())
}

/// `LDMSGADDR` splits a message address off a slice.
///
/// # Errors
///
/// Throws a cell underflow on the paths where the data runs out.
pub fn load_msg_addr(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let mut slice = state.pop_slice()?;
    let start = slice.data_pos.clone();
    take_address(ctx, state, &mut slice)?;

    let width = slice.data_pos.sub(&start);
    let bits = state.heap.get(slice.cell)?.bits.window(&start, &width);
    let address = seal(state, bits, Vec::new())?;
    state.fields.copy_upper_bound(slice.cell, address);
    state.push(Value::Slice(SymSlice::new(address)));
    state.push(Value::Slice(slice));
    Ok(())
}

/// `SBITS` pushes the number of unread data bits of a slice.
///
/// # Errors
///
/// Fails the exploration if the length of the cell exceeds a bound recorded
/// for it.
pub fn slice_bits(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let slice = state.pop_slice()?;
    ctx.fixate(state, slice.cell)?;
    let length = state.heap.get(slice.cell)?.bits.len();
    state.fields.check_upper_bound(slice.cell, &length)?;
    state.push(length.sub(&slice.data_pos).to_int());
    Ok(())
}

/// `SREFS` pushes the number of unread references of a slice.
///
/// # Errors
///
/// Throws if the top value is not a slice.
pub fn slice_refs(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let slice = state.pop_slice()?;
    ctx.fixate(state, slice.cell)?;
    let refs_len = state.heap.get(slice.cell)?.refs_len.clone();
    state.push(refs_len.sub(&SymLen::from(u16::from(slice.ref_pos))).to_int());
    Ok(())
}

/// `SEMPTY`, `SDEMPTY` and `SREMPTY` check whether a slice is exhausted.
///
/// # Errors
///
/// Throws if the top value is not a slice.
pub fn slice_empty(ctx: &mut StepContext, state: &mut VMState, check_data: bool, check_refs: bool) -> Result<(), Interrupt> {
    let slice = state.pop_slice()?;
    let remaining = remaining_condition(ctx, state, &slice, check_data, check_refs)?;
    state.push_bool(&remaining.not());
    Ok(())
}

#[cfg(test)]
mod test {
    use bitvec::{bitvec, order::Msb0};
    use num_bigint::BigInt;

    use crate::{
        cell::CellBuilder,
        opcode::cell::{coins_bits, seal},
        solver::SymInt,
        vm::{
            state::{
                heap::{CellBits, SymLen},
                registers::Registers,
                VMState,
            },
            value::Value,
        },
    };

    #[test]
    fn sealing_concrete_parts_yields_a_concrete_cell() -> anyhow::Result<()> {
        let mut state = VMState::new(
            0,
            0,
            CellBuilder::new().build()?.to_slice(),
            Registers::new(Value::Null, Value::Null),
            1000,
        );
        let bits = CellBits::Concrete(bitvec![u8, Msb0; 1, 0, 1]);
        let addr = seal(&mut state, bits, Vec::new()).map_err(|e| anyhow::anyhow!("{e:?}"))?;

        let mut expected = CellBuilder::new();
        expected.store_uint(0b101, 3)?;
        assert_eq!(
            state.heap.get(addr)?.concrete().map(crate::cell::Cell::hash),
            Some(expected.build()?.hash())
        );
        Ok(())
    }

    #[test]
    fn symbolic_coins_have_a_bounded_length() {
        let bits = coins_bits(&SymInt::fresh("amount"));
        assert!(matches!(bits.len(), SymLen::Symbolic(_)));
        assert_eq!(
            CellBits::from_int(&SymInt::Concrete(BigInt::from(3)), 4)
                .len()
                .as_concrete(),
            Some(4)
        );
    }
}
