//! This module contains the [`Opcode`] type, the closed set of real VM
//! instructions that the interpreter understands, along with their semantics.
//!
//! Instructions outside this set decode to an error and terminate the path
//! that reaches them as unsupported, rather than being skipped.
//!
//! # Terminology
//!
//! When referring to stack slots, `s0` is the top of the stack.

pub mod arithmetic;
pub mod artificial;
pub mod cell;
pub mod control;
pub mod message;
pub mod stack;

use num_bigint::BigInt;

use crate::{
    cell::{Cell, CellSlice},
    opcode::arithmetic::{BinaryOp, Comparison, DivisionKind, UnaryOp},
    vm::{
        state::VMState,
        step::{Interrupt, StepContext},
    },
};

/// A real instruction, decoded from the code of a contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Opcode {
    Nop,

    /// `XCHG s(i),s(j)`, with `XCHG s0,s(j)` and `SWAP` as special cases.
    Xchg(u8, u8),
    Push(u8),
    Pop(u8),
    Rot,
    RotRev,
    Swap2,
    Drop2,
    Dup2,
    Over2,
    Pick,
    Roll,
    RollRev,
    Depth,

    PushNull,
    IsNull,
    Tuple(u8),
    Index(u8),
    Untuple(u8),
    SetIndex(u8),

    PushInt(BigInt),
    PushPow2(u16),
    PushPow2Dec(u16),
    PushNegPow2(u16),
    PushRef(Cell),
    PushRefSlice(Cell),
    PushRefCont(Cell),
    PushSlice(CellSlice),
    PushCont(CellSlice),

    Binary(BinaryOp),
    Unary(UnaryOp),
    AddConst(i8),
    MulConst(i8),
    Divide(DivisionKind),
    LShift(u16),
    RShift(u16),
    Fits(u16),
    UFits(u16),
    Compare(Comparison),
    CompareInt(Comparison, i8),

    NewC,
    EndC,
    StoreInt { width: u16, signed: bool },
    StoreRef,
    StoreSlice,
    StoreCoins,
    BuilderBits,
    BuilderRefs,
    BuilderRemainingBits,
    Ctos,
    Ends,
    LoadInt { width: u16, signed: bool, preload: bool },
    LoadRef,
    LoadRefToSlice,
    PreloadRef,
    LoadSlice(u16),
    LoadCoins,
    LoadMsgAddr,
    SliceBits,
    SliceRefs,
    SliceEmpty,
    SliceDataEmpty,
    SliceRefsEmpty,

    Execute,
    JmpX,
    Ret,
    RetAlt,
    IfRet,
    IfNotRet,
    If,
    IfNot,
    IfJmp,
    IfNotJmp,
    IfElse,
    IfRef(Cell),
    IfNotRef(Cell),
    IfJmpRef(Cell),
    IfNotJmpRef(Cell),
    Repeat,
    Until,
    While,
    Again,
    CallDict(u16),

    Throw(u16),
    ThrowIf(u16),
    ThrowIfNot(u16),
    Try,

    SetCp0,
    DictPushConst { dictionary: Cell, key_bits: u16 },
    DictIGetJmpZ,

    Accept,
    SetGasLimit,
    Commit,
    GetParam(u8),
    PushCtr(u8),
    PopCtr(u8),
    SendRawMsg,
    Debug(u8),
}

impl Opcode {
    /// Executes the instruction against `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if execution of the instruction interrupts the normal
    /// flow of the path, such as by throwing a VM exception.
    pub fn execute(&self, ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
        match self {
            Self::Nop | Self::SetCp0 | Self::Accept | Self::Commit | Self::Debug(_) => Ok(()),
            Self::Xchg(i, j) => stack::xchg(state, *i, *j),
            Self::Push(i) => stack::push(state, *i),
            Self::Pop(i) => stack::pop(state, *i),
            Self::Rot => stack::rot(state),
            Self::RotRev => stack::rot_rev(state),
            Self::Swap2 => stack::swap2(state),
            Self::Drop2 => stack::drop2(state),
            Self::Dup2 => stack::dup2(state),
            Self::Over2 => stack::over2(state),
            Self::Pick => stack::pick(state),
            Self::Roll => stack::roll(state, false),
            Self::RollRev => stack::roll(state, true),
            Self::Depth => stack::depth(state),
            Self::PushNull => stack::push_null(state),
            Self::IsNull => stack::is_null(state),
            Self::Tuple(n) => stack::tuple(state, *n),
            Self::Index(k) => stack::index(state, *k),
            Self::Untuple(n) => stack::untuple(state, *n),
            Self::SetIndex(k) => stack::set_index(state, *k),

            Self::PushInt(value) => arithmetic::push_int(state, value.clone()),
            Self::PushPow2(n) => arithmetic::push_pow2(state, *n, 0, false),
            Self::PushPow2Dec(n) => arithmetic::push_pow2(state, *n, -1, false),
            Self::PushNegPow2(n) => arithmetic::push_pow2(state, *n, 0, true),
            Self::PushRef(cell) => cell::push_ref(state, cell),
            Self::PushRefSlice(cell) => cell::push_slice(state, &cell.to_slice()),
            Self::PushRefCont(cell) => control::push_cont(state, cell.to_slice()),
            Self::PushSlice(slice) => cell::push_slice(state, slice),
            Self::PushCont(code) => control::push_cont(state, code.clone()),

            Self::Binary(op) => arithmetic::binary(ctx, state, *op),
            Self::Unary(op) => arithmetic::unary(ctx, state, *op),
            Self::AddConst(c) => arithmetic::with_const(ctx, state, BinaryOp::Add, *c),
            Self::MulConst(c) => arithmetic::with_const(ctx, state, BinaryOp::Mul, *c),
            Self::Divide(kind) => arithmetic::divide(ctx, state, *kind),
            Self::LShift(bits) => arithmetic::shift_const(ctx, state, *bits, true),
            Self::RShift(bits) => arithmetic::shift_const(ctx, state, *bits, false),
            Self::Fits(bits) => arithmetic::fits(ctx, state, *bits, true),
            Self::UFits(bits) => arithmetic::fits(ctx, state, *bits, false),
            Self::Compare(cmp) => arithmetic::compare(ctx, state, *cmp),
            Self::CompareInt(cmp, value) => arithmetic::compare_int(ctx, state, *cmp, *value),

            Self::NewC => cell::new_builder(state),
            Self::EndC => cell::end_builder(ctx, state),
            Self::StoreInt { width, signed } => cell::store_int(ctx, state, *width, *signed),
            Self::StoreRef => cell::store_ref(ctx, state),
            Self::StoreSlice => cell::store_slice(ctx, state),
            Self::StoreCoins => cell::store_coins(ctx, state),
            Self::BuilderBits => cell::builder_bits(state),
            Self::BuilderRefs => cell::builder_refs(state),
            Self::BuilderRemainingBits => cell::builder_remaining_bits(state),
            Self::Ctos => cell::ctos(ctx, state),
            Self::Ends => cell::ends(ctx, state),
            Self::LoadInt {
                width,
                signed,
                preload,
            } => cell::load_int(ctx, state, *width, *signed, *preload),
            Self::LoadRef => cell::load_ref(ctx, state, false),
            Self::LoadRefToSlice => cell::load_ref_to_slice(ctx, state),
            Self::PreloadRef => cell::load_ref(ctx, state, true),
            Self::LoadSlice(width) => cell::load_slice(ctx, state, *width),
            Self::LoadCoins => cell::load_coins(ctx, state),
            Self::LoadMsgAddr => cell::load_msg_addr(ctx, state),
            Self::SliceBits => cell::slice_bits(ctx, state),
            Self::SliceRefs => cell::slice_refs(ctx, state),
            Self::SliceEmpty => cell::slice_empty(ctx, state, true, true),
            Self::SliceDataEmpty => cell::slice_empty(ctx, state, true, false),
            Self::SliceRefsEmpty => cell::slice_empty(ctx, state, false, true),

            Self::Execute => control::execute(state),
            Self::JmpX => control::jmpx(state),
            Self::Ret => control::ret(state),
            Self::RetAlt => control::ret_alt(state),
            Self::IfRet => control::if_ret(ctx, state, false),
            Self::IfNotRet => control::if_ret(ctx, state, true),
            Self::If => control::if_(ctx, state, false, false),
            Self::IfNot => control::if_(ctx, state, true, false),
            Self::IfJmp => control::if_(ctx, state, false, true),
            Self::IfNotJmp => control::if_(ctx, state, true, true),
            Self::IfElse => control::if_else(ctx, state),
            Self::IfRef(code) => control::if_ref(ctx, state, code, false, false),
            Self::IfNotRef(code) => control::if_ref(ctx, state, code, true, false),
            Self::IfJmpRef(code) => control::if_ref(ctx, state, code, false, true),
            Self::IfNotJmpRef(code) => control::if_ref(ctx, state, code, true, true),
            Self::Repeat => control::repeat(ctx, state),
            Self::Until => control::until(state),
            Self::While => control::while_(state),
            Self::Again => control::again(state),
            Self::CallDict(id) => control::call_dict(ctx, state, i32::from(*id)),

            Self::Throw(code) => Err(Interrupt::Throw {
                code: i32::from(*code),
            }),
            Self::ThrowIf(code) => control::throw_if(ctx, state, i32::from(*code), false),
            Self::ThrowIfNot(code) => control::throw_if(ctx, state, i32::from(*code), true),
            Self::Try => control::try_(state),

            Self::DictPushConst { .. } | Self::DictIGetJmpZ => Err(Interrupt::Unsupported {
                mnemonic: self.mnemonic(),
            }),

            Self::SetGasLimit => message::set_gas_limit(ctx, state),
            Self::GetParam(index) => message::get_param(state, *index),
            Self::PushCtr(index) => control::push_ctr(state, *index),
            Self::PopCtr(index) => control::pop_ctr(state, *index),
            Self::SendRawMsg => message::send_raw_msg(state),
        }
    }

    /// Gets the assembler name of the instruction.
    #[must_use]
    pub fn mnemonic(&self) -> String {
        match self {
            Self::Nop => "NOP".into(),
            Self::Xchg(0, 1) => "SWAP".into(),
            Self::Xchg(i, j) => format!("XCHG s{i},s{j}"),
            Self::Push(0) => "DUP".into(),
            Self::Push(1) => "OVER".into(),
            Self::Push(i) => format!("PUSH s{i}"),
            Self::Pop(0) => "DROP".into(),
            Self::Pop(1) => "NIP".into(),
            Self::Pop(i) => format!("POP s{i}"),
            Self::Rot => "ROT".into(),
            Self::RotRev => "-ROT".into(),
            Self::Swap2 => "2SWAP".into(),
            Self::Drop2 => "2DROP".into(),
            Self::Dup2 => "2DUP".into(),
            Self::Over2 => "2OVER".into(),
            Self::Pick => "PICK".into(),
            Self::Roll => "ROLLX".into(),
            Self::RollRev => "-ROLLX".into(),
            Self::Depth => "DEPTH".into(),
            Self::PushNull => "NULL".into(),
            Self::IsNull => "ISNULL".into(),
            Self::Tuple(n) => format!("TUPLE {n}"),
            Self::Index(k) => format!("INDEX {k}"),
            Self::Untuple(n) => format!("UNTUPLE {n}"),
            Self::SetIndex(k) => format!("SETINDEX {k}"),
            Self::PushInt(value) => format!("PUSHINT {value}"),
            Self::PushPow2(n) => format!("PUSHPOW2 {n}"),
            Self::PushPow2Dec(n) => format!("PUSHPOW2DEC {n}"),
            Self::PushNegPow2(n) => format!("PUSHNEGPOW2 {n}"),
            Self::PushRef(_) => "PUSHREF".into(),
            Self::PushRefSlice(_) => "PUSHREFSLICE".into(),
            Self::PushRefCont(_) => "PUSHREFCONT".into(),
            Self::PushSlice(_) => "PUSHSLICE".into(),
            Self::PushCont(_) => "PUSHCONT".into(),
            Self::Binary(op) => op.mnemonic().into(),
            Self::Unary(op) => op.mnemonic().into(),
            Self::AddConst(c) => format!("ADDCONST {c}"),
            Self::MulConst(c) => format!("MULCONST {c}"),
            Self::Divide(kind) => kind.mnemonic().into(),
            Self::LShift(bits) => format!("LSHIFT {bits}"),
            Self::RShift(bits) => format!("RSHIFT {bits}"),
            Self::Fits(bits) => format!("FITS {bits}"),
            Self::UFits(bits) => format!("UFITS {bits}"),
            Self::Compare(cmp) => cmp.mnemonic().into(),
            Self::CompareInt(cmp, value) => format!("{} {value}", cmp.int_mnemonic()),
            Self::NewC => "NEWC".into(),
            Self::EndC => "ENDC".into(),
            Self::StoreInt { width, signed } => {
                format!("{} {width}", if *signed { "STI" } else { "STU" })
            }
            Self::StoreRef => "STREF".into(),
            Self::StoreSlice => "STSLICE".into(),
            Self::StoreCoins => "STGRAMS".into(),
            Self::BuilderBits => "BBITS".into(),
            Self::BuilderRefs => "BREFS".into(),
            Self::BuilderRemainingBits => "BREMBITS".into(),
            Self::Ctos => "CTOS".into(),
            Self::Ends => "ENDS".into(),
            Self::LoadInt {
                width,
                signed,
                preload,
            } => {
                let prefix = if *preload { "PLD" } else { "LD" };
                let kind = if *signed { "I" } else { "U" };
                format!("{prefix}{kind} {width}")
            }
            Self::LoadRef => "LDREF".into(),
            Self::LoadRefToSlice => "LDREFRTOS".into(),
            Self::PreloadRef => "PLDREF".into(),
            Self::LoadSlice(width) => format!("LDSLICE {width}"),
            Self::LoadCoins => "LDGRAMS".into(),
            Self::LoadMsgAddr => "LDMSGADDR".into(),
            Self::SliceBits => "SBITS".into(),
            Self::SliceRefs => "SREFS".into(),
            Self::SliceEmpty => "SEMPTY".into(),
            Self::SliceDataEmpty => "SDEMPTY".into(),
            Self::SliceRefsEmpty => "SREMPTY".into(),
            Self::Execute => "EXECUTE".into(),
            Self::JmpX => "JMPX".into(),
            Self::Ret => "RET".into(),
            Self::RetAlt => "RETALT".into(),
            Self::IfRet => "IFRET".into(),
            Self::IfNotRet => "IFNOTRET".into(),
            Self::If => "IF".into(),
            Self::IfNot => "IFNOT".into(),
            Self::IfJmp => "IFJMP".into(),
            Self::IfNotJmp => "IFNOTJMP".into(),
            Self::IfElse => "IFELSE".into(),
            Self::IfRef(_) => "IFREF".into(),
            Self::IfNotRef(_) => "IFNOTREF".into(),
            Self::IfJmpRef(_) => "IFJMPREF".into(),
            Self::IfNotJmpRef(_) => "IFNOTJMPREF".into(),
            Self::Repeat => "REPEAT".into(),
            Self::Until => "UNTIL".into(),
            Self::While => "WHILE".into(),
            Self::Again => "AGAIN".into(),
            Self::CallDict(id) => format!("CALLDICT {id}"),
            Self::Throw(code) => format!("THROW {code}"),
            Self::ThrowIf(code) => format!("THROWIF {code}"),
            Self::ThrowIfNot(code) => format!("THROWIFNOT {code}"),
            Self::Try => "TRY".into(),
            Self::SetCp0 => "SETCP0".into(),
            Self::DictPushConst { key_bits, .. } => format!("DICTPUSHCONST {key_bits}"),
            Self::DictIGetJmpZ => "DICTIGETJMPZ".into(),
            Self::Accept => "ACCEPT".into(),
            Self::SetGasLimit => "SETGASLIMIT".into(),
            Self::Commit => "COMMIT".into(),
            Self::GetParam(3) => "NOW".into(),
            Self::GetParam(7) => "BALANCE".into(),
            Self::GetParam(8) => "MYADDR".into(),
            Self::GetParam(index) => format!("GETPARAM {index}"),
            Self::PushCtr(index) => format!("PUSH c{index}"),
            Self::PopCtr(index) => format!("POP c{index}"),
            Self::SendRawMsg => "SENDRAWMSG".into(),
            Self::Debug(n) => format!("DEBUG {n}"),
        }
    }
}
