//! The bit-level codec between code cells and [`Opcode`]s.
//!
//! Instructions are prefix codes of varying length, so decoding peeks at a
//! window of up to 24 bits, matches the known prefixes and only then consumes
//! the bits of the recognised instruction.

use bitvec::{order::Msb0, vec::BitVec};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::{
    cell::{CellBuilder, CellSlice},
    error::cell::{Error, Result},
    opcode::{
        arithmetic::{BinaryOp, Comparison, DivisionKind, UnaryOp},
        Opcode,
    },
    utility::fits_signed,
};

/// The number of bits that are peeked to recognise an instruction.
const WINDOW: usize = 24;

/// The reasons that decoding the next instruction can fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// The bits do not start with any instruction this decoder knows.
    Unknown { prefix: String },

    /// The code ended in the middle of an instruction.
    Truncated,
}

impl From<Error> for DecodeError {
    fn from(_: Error) -> Self {
        Self::Truncated
    }
}

struct Peek {
    word:      u32,
    available: usize,
}

impl Peek {
    fn new(code: &CellSlice) -> std::result::Result<Self, DecodeError> {
        let available = code.remaining_bits().min(WINDOW);
        if available == 0 {
            return Err(DecodeError::Truncated);
        }
        #[allow(clippy::cast_possible_truncation)] // At most 24 bits are read
        let word = (code.preload_uint(available)? << (WINDOW - available)) as u32;
        Ok(Self { word, available })
    }

    fn bits(&self, from: usize, len: usize) -> u32 {
        (self.word >> (WINDOW - from - len)) & ((1 << len) - 1)
    }

    #[allow(clippy::cast_possible_truncation)] // Callers read at most eight bits
    fn byte(&self, from: usize) -> u8 {
        self.bits(from, 8) as u8
    }

    fn need(&self, len: usize) -> std::result::Result<(), DecodeError> {
        if len > self.available {
            Err(DecodeError::Truncated)
        } else {
            Ok(())
        }
    }

    fn unknown(&self) -> DecodeError {
        let shown = self.available.min(16);
        DecodeError::Unknown {
            prefix: format!("{:0width$x}", self.bits(0, shown), width = shown.div_ceil(4)),
        }
    }
}

/// Decodes the next instruction from `code`, advancing it past the
/// instruction's bits and references.
///
/// # Errors
///
/// Returns [`Err`] if the bits at the cursor are not a known instruction or the
/// code ends in the middle of one.
#[allow(clippy::too_many_lines)] // It is one table
pub fn decode(code: &mut CellSlice) -> std::result::Result<Opcode, DecodeError> {
    let peek = Peek::new(code)?;
    let b0 = peek.byte(0);
    let low = b0 & 0x0f;

    let (opcode, len) = match b0 {
        0x00 => (Opcode::Nop, 8),
        0x01..=0x0f => (Opcode::Xchg(0, low), 8),
        0x10 => {
            peek.need(16)?;
            let (i, j) = (peek.bits(8, 4), peek.bits(12, 4));
            if i == 0 || j <= i {
                return Err(peek.unknown());
            }
            #[allow(clippy::cast_possible_truncation)] // Both are nibbles
            (Opcode::Xchg(i as u8, j as u8), 16)
        }
        0x11 => (Opcode::Xchg(0, peek.byte(8)), 16),
        0x12..=0x1f => (Opcode::Xchg(1, low), 8),
        0x20..=0x2f => (Opcode::Push(low), 8),
        0x30..=0x3f => (Opcode::Pop(low), 8),
        0x56 => (Opcode::Push(peek.byte(8)), 16),
        0x57 => (Opcode::Pop(peek.byte(8)), 16),
        0x58 => (Opcode::Rot, 8),
        0x59 => (Opcode::RotRev, 8),
        0x5a => (Opcode::Swap2, 8),
        0x5b => (Opcode::Drop2, 8),
        0x5c => (Opcode::Dup2, 8),
        0x5d => (Opcode::Over2, 8),
        0x60 => (Opcode::Pick, 8),
        0x61 => (Opcode::Roll, 8),
        0x62 => (Opcode::RollRev, 8),
        0x68 => (Opcode::Depth, 8),
        0x6d => (Opcode::PushNull, 8),
        0x6e => (Opcode::IsNull, 8),
        0x6f => {
            let n = peek.byte(8) & 0x0f;
            let opcode = match peek.bits(8, 4) {
                0x0 => Opcode::Tuple(n),
                0x1 => Opcode::Index(n),
                0x2 => Opcode::Untuple(n),
                0x5 => Opcode::SetIndex(n),
                _ => return Err(peek.unknown()),
            };
            (opcode, 16)
        }
        0x70..=0x7f => {
            let value = if low <= 10 { i64::from(low) } else { i64::from(low) - 16 };
            (Opcode::PushInt(BigInt::from(value)), 8)
        }
        #[allow(clippy::cast_possible_wrap)] // Reinterpreting as signed is the encoding
        0x80 => (Opcode::PushInt(BigInt::from(peek.byte(8) as i8)), 16),
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        0x81 => (Opcode::PushInt(BigInt::from(peek.bits(8, 16) as u16 as i16)), 24),
        0x82 => {
            peek.need(13)?;
            let width = 8 * peek.bits(8, 5) as usize + 19;
            code.skip_bits(13)?;
            return Ok(Opcode::PushInt(code.load_bigint(width, true)?));
        }
        0x83 if peek.byte(8) != 0xff => (Opcode::PushPow2(u16::from(peek.byte(8)) + 1), 16),
        0x84 => (Opcode::PushPow2Dec(u16::from(peek.byte(8)) + 1), 16),
        0x85 => (Opcode::PushNegPow2(u16::from(peek.byte(8)) + 1), 16),
        0x88 | 0x89 | 0x8a => {
            code.skip_bits(8)?;
            let cell = code.load_ref()?;
            return Ok(match b0 {
                0x88 => Opcode::PushRef(cell),
                0x89 => Opcode::PushRefSlice(cell),
                _ => Opcode::PushRefCont(cell),
            });
        }
        0x8b => {
            peek.need(12)?;
            let width = 8 * peek.bits(8, 4) as usize + 4;
            code.skip_bits(12)?;
            let mut slice = code.split_prefix(width, 0)?;
            slice.strip_completion_tag()?;
            return Ok(Opcode::PushSlice(slice));
        }
        0x8e | 0x8f => {
            peek.need(16)?;
            let refs = peek.bits(7, 2) as usize;
            let bytes = peek.bits(9, 7) as usize;
            code.skip_bits(16)?;
            return Ok(Opcode::PushCont(code.split_prefix(8 * bytes, refs)?));
        }
        0x90..=0x9f => {
            code.skip_bits(8)?;
            return Ok(Opcode::PushCont(code.split_prefix(8 * usize::from(low), 0)?));
        }
        0xa0 => (Opcode::Binary(BinaryOp::Add), 8),
        0xa1 => (Opcode::Binary(BinaryOp::Sub), 8),
        0xa2 => (Opcode::Binary(BinaryOp::SubR), 8),
        0xa3 => (Opcode::Unary(UnaryOp::Negate), 8),
        0xa4 => (Opcode::Unary(UnaryOp::Inc), 8),
        0xa5 => (Opcode::Unary(UnaryOp::Dec), 8),
        #[allow(clippy::cast_possible_wrap)]
        0xa6 => (Opcode::AddConst(peek.byte(8) as i8), 16),
        #[allow(clippy::cast_possible_wrap)]
        0xa7 => (Opcode::MulConst(peek.byte(8) as i8), 16),
        0xa8 => (Opcode::Binary(BinaryOp::Mul), 8),
        0xa9 => {
            let kind = match peek.byte(8) {
                0x04 => DivisionKind::Div,
                0x08 => DivisionKind::Mod,
                0x0c => DivisionKind::DivMod,
                _ => return Err(peek.unknown()),
            };
            (Opcode::Divide(kind), 16)
        }
        0xaa => (Opcode::LShift(u16::from(peek.byte(8)) + 1), 16),
        0xab => (Opcode::RShift(u16::from(peek.byte(8)) + 1), 16),
        0xac => (Opcode::Binary(BinaryOp::Shl), 8),
        0xad => (Opcode::Binary(BinaryOp::Shr), 8),
        0xb0 => (Opcode::Binary(BinaryOp::And), 8),
        0xb1 => (Opcode::Binary(BinaryOp::Or), 8),
        0xb2 => (Opcode::Binary(BinaryOp::Xor), 8),
        0xb3 => (Opcode::Unary(UnaryOp::Not), 8),
        0xb4 => (Opcode::Fits(u16::from(peek.byte(8)) + 1), 16),
        0xb5 => (Opcode::UFits(u16::from(peek.byte(8)) + 1), 16),
        0xb6 => {
            let opcode = match peek.byte(8) {
                0x08 => Opcode::Binary(BinaryOp::Min),
                0x09 => Opcode::Binary(BinaryOp::Max),
                0x0b => Opcode::Unary(UnaryOp::Abs),
                _ => return Err(peek.unknown()),
            };
            (opcode, 16)
        }
        0xb8 => (Opcode::Unary(UnaryOp::Sgn), 8),
        0xb9 => (Opcode::Compare(Comparison::Less), 8),
        0xba => (Opcode::Compare(Comparison::Equal), 8),
        0xbb => (Opcode::Compare(Comparison::Leq), 8),
        0xbc => (Opcode::Compare(Comparison::Greater), 8),
        0xbd => (Opcode::Compare(Comparison::Neq), 8),
        0xbe => (Opcode::Compare(Comparison::Geq), 8),
        0xbf => (Opcode::Compare(Comparison::Cmp), 8),
        0xc0..=0xc3 => {
            let cmp = match b0 {
                0xc0 => Comparison::Equal,
                0xc1 => Comparison::Less,
                0xc2 => Comparison::Greater,
                _ => Comparison::Neq,
            };
            #[allow(clippy::cast_possible_wrap)]
            (Opcode::CompareInt(cmp, peek.byte(8) as i8), 16)
        }
        0xc7 => {
            let opcode = match peek.byte(8) {
                0x00 => Opcode::SliceEmpty,
                0x01 => Opcode::SliceDataEmpty,
                0x02 => Opcode::SliceRefsEmpty,
                _ => return Err(peek.unknown()),
            };
            (opcode, 16)
        }
        0xc8 => (Opcode::NewC, 8),
        0xc9 => (Opcode::EndC, 8),
        0xca | 0xcb => {
            let width = u16::from(peek.byte(8)) + 1;
            (
                Opcode::StoreInt {
                    width,
                    signed: b0 == 0xca,
                },
                16,
            )
        }
        0xcc => (Opcode::StoreRef, 8),
        0xce => (Opcode::StoreSlice, 8),
        0xcf => {
            let opcode = match peek.byte(8) {
                0x31 => Opcode::BuilderBits,
                0x32 => Opcode::BuilderRefs,
                0x35 => Opcode::BuilderRemainingBits,
                _ => return Err(peek.unknown()),
            };
            (opcode, 16)
        }
        0xd0 => (Opcode::Ctos, 8),
        0xd1 => (Opcode::Ends, 8),
        0xd2 | 0xd3 => {
            let width = u16::from(peek.byte(8)) + 1;
            (
                Opcode::LoadInt {
                    width,
                    signed: b0 == 0xd2,
                    preload: false,
                },
                16,
            )
        }
        0xd4 => (Opcode::LoadRef, 8),
        0xd5 => (Opcode::LoadRefToSlice, 8),
        0xd6 => (Opcode::LoadSlice(u16::from(peek.byte(8)) + 1), 16),
        0xd7 => match peek.byte(8) {
            0x0a | 0x0b => {
                peek.need(24)?;
                let opcode = Opcode::LoadInt {
                    width:   u16::from(peek.byte(16)) + 1,
                    signed:  peek.byte(8) == 0x0a,
                    preload: true,
                };
                (opcode, 24)
            }
            0x49 => (Opcode::SliceBits, 16),
            0x4a => (Opcode::SliceRefs, 16),
            0x4c => (Opcode::PreloadRef, 16),
            _ => return Err(peek.unknown()),
        },
        0xd8 => (Opcode::Execute, 8),
        0xd9 => (Opcode::JmpX, 8),
        0xdb => match peek.byte(8) {
            0x30 => (Opcode::Ret, 16),
            0x31 => (Opcode::RetAlt, 16),
            _ => return Err(peek.unknown()),
        },
        0xdc => (Opcode::IfRet, 8),
        0xdd => (Opcode::IfNotRet, 8),
        0xde => (Opcode::If, 8),
        0xdf => (Opcode::IfNot, 8),
        0xe0 => (Opcode::IfJmp, 8),
        0xe1 => (Opcode::IfNotJmp, 8),
        0xe2 => (Opcode::IfElse, 8),
        0xe3 => {
            peek.need(16)?;
            let variant = peek.byte(8);
            if variant > 0x03 {
                return Err(peek.unknown());
            }
            code.skip_bits(16)?;
            let cell = code.load_ref()?;
            return Ok(match variant {
                0x00 => Opcode::IfRef(cell),
                0x01 => Opcode::IfNotRef(cell),
                0x02 => Opcode::IfJmpRef(cell),
                _ => Opcode::IfNotJmpRef(cell),
            });
        }
        0xe4 => (Opcode::Repeat, 8),
        0xe6 => (Opcode::Until, 8),
        0xe8 => (Opcode::While, 8),
        0xea => (Opcode::Again, 8),
        0xed => match peek.bits(8, 4) {
            0x4 => (Opcode::PushCtr(peek.byte(8) & 0x0f), 16),
            0x5 => (Opcode::PopCtr(peek.byte(8) & 0x0f), 16),
            _ => return Err(peek.unknown()),
        },
        0xf0 => (Opcode::CallDict(u16::from(peek.byte(8))), 16),
        #[allow(clippy::cast_possible_truncation)] // Fourteen bits
        0xf1 if peek.bits(8, 2) == 0 => (Opcode::CallDict(peek.bits(10, 14) as u16), 24),
        0xf2 => {
            #[allow(clippy::cast_possible_truncation)] // Six bits
            let short = peek.bits(10, 6) as u16;
            #[allow(clippy::cast_possible_truncation)] // Eleven bits
            let long = peek.bits(13, 11) as u16;
            match (peek.bits(8, 2), peek.bits(8, 5), peek.byte(8)) {
                (_, _, 0xff) => (Opcode::Try, 16),
                (0b00, _, _) => (Opcode::Throw(short), 16),
                (0b01, _, _) => (Opcode::ThrowIf(short), 16),
                (0b10, _, _) => (Opcode::ThrowIfNot(short), 16),
                (_, 0b11000, _) => (Opcode::Throw(long), 24),
                (_, 0b11010, _) => (Opcode::ThrowIf(long), 24),
                (_, 0b11100, _) => (Opcode::ThrowIfNot(long), 24),
                _ => return Err(peek.unknown()),
            }
        }
        0xf4 if peek.byte(8) == 0xbc => (Opcode::DictIGetJmpZ, 16),
        0xf4 if peek.bits(8, 6) == 0b10_1001 => {
            peek.need(24)?;
            #[allow(clippy::cast_possible_truncation)] // Ten bits
            let key_bits = peek.bits(14, 10) as u16;
            code.skip_bits(24)?;
            let dictionary = code.load_ref()?;
            return Ok(Opcode::DictPushConst {
                dictionary,
                key_bits,
            });
        }
        0xf8 => match peek.byte(8) {
            0x00 => (Opcode::Accept, 16),
            0x01 => (Opcode::SetGasLimit, 16),
            0x0f => (Opcode::Commit, 16),
            0x20..=0x2f => (Opcode::GetParam(peek.byte(8) & 0x0f), 16),
            _ => return Err(peek.unknown()),
        },
        0xfa => match peek.byte(8) {
            0x00 => (Opcode::LoadCoins, 16),
            0x02 => (Opcode::StoreCoins, 16),
            0x40 => (Opcode::LoadMsgAddr, 16),
            _ => return Err(peek.unknown()),
        },
        0xfb if peek.byte(8) == 0x00 => (Opcode::SendRawMsg, 16),
        0xfe if peek.byte(8) < 0xf0 => (Opcode::Debug(peek.byte(8)), 16),
        0xff if peek.byte(8) == 0x00 => (Opcode::SetCp0, 16),
        _ => return Err(peek.unknown()),
    };

    peek.need(len)?;
    code.skip_bits(len)?;
    Ok(opcode)
}

/// Encodes `opcode` onto the end of `builder`, using the shortest encoding
/// available.
///
/// # Errors
///
/// Returns [`Err`] if an operand is outside the range that can be encoded or
/// the builder runs out of space.
#[allow(clippy::too_many_lines)] // It is one table
pub fn encode(opcode: &Opcode, builder: &mut CellBuilder) -> Result<()> {
    let out_of_range = |value: &dyn ToString, width: usize| Error::ValueOutOfRange {
        value: value.to_string(),
        width,
    };
    let byte = |builder: &mut CellBuilder, b: u64| builder.store_uint(b, 8).map(|_| ());
    let word = |builder: &mut CellBuilder, w: u64| builder.store_uint(w, 16).map(|_| ());
    let with_byte = |builder: &mut CellBuilder, b: u64, operand: u64| {
        builder.store_uint(b, 8)?.store_uint(operand, 8).map(|_| ())
    };
    let minus_one = |n: u16| u64::from(n).checked_sub(1).filter(|n| *n <= 0xff);

    match opcode {
        Opcode::Nop => byte(builder, 0x00),
        Opcode::Xchg(i, j) => {
            let (i, j) = (u64::from(*i.min(j)), u64::from(*i.max(j)));
            match (i, j) {
                (0, 1..=15) => byte(builder, j),
                (0, _) => with_byte(builder, 0x11, j),
                (1, 2..=15) => byte(builder, 0x10 | j),
                (1..=15, 1..=15) if i < j => with_byte(builder, 0x10, (i << 4) | j),
                _ => Err(out_of_range(&format!("s{i},s{j}"), 4)),
            }
        }
        Opcode::Push(i) if *i < 16 => byte(builder, 0x20 | u64::from(*i)),
        Opcode::Push(i) => with_byte(builder, 0x56, u64::from(*i)),
        Opcode::Pop(i) if *i < 16 => byte(builder, 0x30 | u64::from(*i)),
        Opcode::Pop(i) => with_byte(builder, 0x57, u64::from(*i)),
        Opcode::Rot => byte(builder, 0x58),
        Opcode::RotRev => byte(builder, 0x59),
        Opcode::Swap2 => byte(builder, 0x5a),
        Opcode::Drop2 => byte(builder, 0x5b),
        Opcode::Dup2 => byte(builder, 0x5c),
        Opcode::Over2 => byte(builder, 0x5d),
        Opcode::Pick => byte(builder, 0x60),
        Opcode::Roll => byte(builder, 0x61),
        Opcode::RollRev => byte(builder, 0x62),
        Opcode::Depth => byte(builder, 0x68),
        Opcode::PushNull => byte(builder, 0x6d),
        Opcode::IsNull => byte(builder, 0x6e),
        Opcode::Tuple(n) | Opcode::Index(n) | Opcode::Untuple(n) | Opcode::SetIndex(n) => {
            if *n > 15 {
                return Err(out_of_range(n, 4));
            }
            let group = match opcode {
                Opcode::Tuple(_) => 0x00,
                Opcode::Index(_) => 0x10,
                Opcode::Untuple(_) => 0x20,
                _ => 0x50,
            };
            with_byte(builder, 0x6f, group | u64::from(*n))
        }
        Opcode::PushInt(value) => encode_push_int(value, builder),
        Opcode::PushPow2(n) | Opcode::PushPow2Dec(n) | Opcode::PushNegPow2(n) => {
            let operand = minus_one(*n).ok_or_else(|| out_of_range(n, 8))?;
            let prefix = match opcode {
                Opcode::PushPow2(_) if operand == 0xff => return Err(out_of_range(n, 8)),
                Opcode::PushPow2(_) => 0x83,
                Opcode::PushPow2Dec(_) => 0x84,
                _ => 0x85,
            };
            with_byte(builder, prefix, operand)
        }
        Opcode::PushRef(cell) | Opcode::PushRefSlice(cell) | Opcode::PushRefCont(cell) => {
            let prefix = match opcode {
                Opcode::PushRef(_) => 0x88,
                Opcode::PushRefSlice(_) => 0x89,
                _ => 0x8a,
            };
            builder.store_uint(prefix, 8)?.store_ref(cell.clone())?;
            Ok(())
        }
        Opcode::PushSlice(slice) => {
            let data = slice.remaining_bits();
            if slice.remaining_refs() > 0 || data > 123 {
                return Err(Error::InvalidWidth { width: data });
            }
            let x = (data + 1).saturating_sub(4).div_ceil(8);
            let mut padded: BitVec<u8, Msb0> = slice.remaining_data().to_bitvec();
            padded.push(true);
            padded.resize(8 * x + 4, false);
            builder.store_uint(0x8b, 8)?.store_uint(x as u64, 4)?.store_bits(&padded)?;
            Ok(())
        }
        Opcode::PushCont(code) => {
            let (data, refs) = (code.remaining_bits(), code.remaining_refs());
            if data % 8 != 0 {
                return Err(Error::InvalidWidth { width: data });
            }
            let bytes = (data / 8) as u64;
            if refs == 0 && bytes <= 15 {
                builder.store_uint(0x90 | bytes, 8)?;
            } else if refs <= 3 && bytes <= 127 {
                builder
                    .store_uint(0b100_0111, 7)?
                    .store_uint(refs as u64, 2)?
                    .store_uint(bytes, 7)?;
            } else {
                return Err(Error::InvalidWidth { width: data });
            }
            builder.store_slice(code)?;
            Ok(())
        }
        Opcode::Binary(op) => match op {
            BinaryOp::Add => byte(builder, 0xa0),
            BinaryOp::Sub => byte(builder, 0xa1),
            BinaryOp::SubR => byte(builder, 0xa2),
            BinaryOp::Mul => byte(builder, 0xa8),
            BinaryOp::Shl => byte(builder, 0xac),
            BinaryOp::Shr => byte(builder, 0xad),
            BinaryOp::And => byte(builder, 0xb0),
            BinaryOp::Or => byte(builder, 0xb1),
            BinaryOp::Xor => byte(builder, 0xb2),
            BinaryOp::Min => word(builder, 0xb608),
            BinaryOp::Max => word(builder, 0xb609),
        },
        Opcode::Unary(op) => match op {
            UnaryOp::Negate => byte(builder, 0xa3),
            UnaryOp::Inc => byte(builder, 0xa4),
            UnaryOp::Dec => byte(builder, 0xa5),
            UnaryOp::Not => byte(builder, 0xb3),
            UnaryOp::Sgn => byte(builder, 0xb8),
            UnaryOp::Abs => word(builder, 0xb60b),
        },
        #[allow(clippy::cast_sign_loss)]
        Opcode::AddConst(c) => with_byte(builder, 0xa6, u64::from(*c as u8)),
        #[allow(clippy::cast_sign_loss)]
        Opcode::MulConst(c) => with_byte(builder, 0xa7, u64::from(*c as u8)),
        Opcode::Divide(kind) => match kind {
            DivisionKind::Div => word(builder, 0xa904),
            DivisionKind::Mod => word(builder, 0xa908),
            DivisionKind::DivMod => word(builder, 0xa90c),
        },
        Opcode::LShift(n) | Opcode::RShift(n) | Opcode::Fits(n) | Opcode::UFits(n) => {
            let operand = minus_one(*n).ok_or_else(|| out_of_range(n, 8))?;
            let prefix = match opcode {
                Opcode::LShift(_) => 0xaa,
                Opcode::RShift(_) => 0xab,
                Opcode::Fits(_) => 0xb4,
                _ => 0xb5,
            };
            with_byte(builder, prefix, operand)
        }
        Opcode::Compare(cmp) => byte(builder, match cmp {
            Comparison::Less => 0xb9,
            Comparison::Equal => 0xba,
            Comparison::Leq => 0xbb,
            Comparison::Greater => 0xbc,
            Comparison::Neq => 0xbd,
            Comparison::Geq => 0xbe,
            Comparison::Cmp => 0xbf,
        }),
        Opcode::CompareInt(cmp, value) => {
            let prefix = match cmp {
                Comparison::Equal => 0xc0,
                Comparison::Less => 0xc1,
                Comparison::Greater => 0xc2,
                Comparison::Neq => 0xc3,
                _ => return Err(out_of_range(&cmp.mnemonic(), 8)),
            };
            #[allow(clippy::cast_sign_loss)]
            with_byte(builder, prefix, u64::from(*value as u8))
        }
        Opcode::SliceEmpty => word(builder, 0xc700),
        Opcode::SliceDataEmpty => word(builder, 0xc701),
        Opcode::SliceRefsEmpty => word(builder, 0xc702),
        Opcode::NewC => byte(builder, 0xc8),
        Opcode::EndC => byte(builder, 0xc9),
        Opcode::StoreInt { width, signed } => {
            let operand = minus_one(*width).ok_or_else(|| out_of_range(width, 8))?;
            with_byte(builder, if *signed { 0xca } else { 0xcb }, operand)
        }
        Opcode::StoreRef => byte(builder, 0xcc),
        Opcode::StoreSlice => byte(builder, 0xce),
        Opcode::BuilderBits => word(builder, 0xcf31),
        Opcode::BuilderRefs => word(builder, 0xcf32),
        Opcode::BuilderRemainingBits => word(builder, 0xcf35),
        Opcode::Ctos => byte(builder, 0xd0),
        Opcode::Ends => byte(builder, 0xd1),
        Opcode::LoadInt {
            width,
            signed,
            preload,
        } => {
            let operand = minus_one(*width).ok_or_else(|| out_of_range(width, 8))?;
            match (preload, signed) {
                (false, true) => with_byte(builder, 0xd2, operand),
                (false, false) => with_byte(builder, 0xd3, operand),
                (true, signed) => {
                    let prefix = if *signed { 0xd70a } else { 0xd70b };
                    builder.store_uint(prefix, 16)?.store_uint(operand, 8)?;
                    Ok(())
                }
            }
        }
        Opcode::LoadRef => byte(builder, 0xd4),
        Opcode::LoadRefToSlice => byte(builder, 0xd5),
        Opcode::LoadSlice(width) => {
            let operand = minus_one(*width).ok_or_else(|| out_of_range(width, 8))?;
            with_byte(builder, 0xd6, operand)
        }
        Opcode::SliceBits => word(builder, 0xd749),
        Opcode::SliceRefs => word(builder, 0xd74a),
        Opcode::PreloadRef => word(builder, 0xd74c),
        Opcode::Execute => byte(builder, 0xd8),
        Opcode::JmpX => byte(builder, 0xd9),
        Opcode::Ret => word(builder, 0xdb30),
        Opcode::RetAlt => word(builder, 0xdb31),
        Opcode::IfRet => byte(builder, 0xdc),
        Opcode::IfNotRet => byte(builder, 0xdd),
        Opcode::If => byte(builder, 0xde),
        Opcode::IfNot => byte(builder, 0xdf),
        Opcode::IfJmp => byte(builder, 0xe0),
        Opcode::IfNotJmp => byte(builder, 0xe1),
        Opcode::IfElse => byte(builder, 0xe2),
        Opcode::IfRef(cell)
        | Opcode::IfNotRef(cell)
        | Opcode::IfJmpRef(cell)
        | Opcode::IfNotJmpRef(cell) => {
            let variant = match opcode {
                Opcode::IfRef(_) => 0x00,
                Opcode::IfNotRef(_) => 0x01,
                Opcode::IfJmpRef(_) => 0x02,
                _ => 0x03,
            };
            builder.store_uint(0xe300 | variant, 16)?.store_ref(cell.clone())?;
            Ok(())
        }
        Opcode::Repeat => byte(builder, 0xe4),
        Opcode::Until => byte(builder, 0xe6),
        Opcode::While => byte(builder, 0xe8),
        Opcode::Again => byte(builder, 0xea),
        Opcode::CallDict(id) if *id <= 0xff => with_byte(builder, 0xf0, u64::from(*id)),
        Opcode::CallDict(id) if *id < (1 << 14) => {
            builder.store_uint(0xf1 << 2, 10)?.store_uint(u64::from(*id), 14)?;
            Ok(())
        }
        Opcode::CallDict(id) => Err(out_of_range(id, 14)),
        Opcode::Throw(code) | Opcode::ThrowIf(code) | Opcode::ThrowIfNot(code) => {
            let (short, long) = match opcode {
                Opcode::Throw(_) => (0b00, 0b11000),
                Opcode::ThrowIf(_) => (0b01, 0b11010),
                _ => (0b10, 0b11100),
            };
            if *code < 64 {
                builder
                    .store_uint(0xf2, 8)?
                    .store_uint(short, 2)?
                    .store_uint(u64::from(*code), 6)?;
            } else if *code < (1 << 11) {
                builder
                    .store_uint(0xf2, 8)?
                    .store_uint(long, 5)?
                    .store_uint(u64::from(*code), 11)?;
            } else {
                return Err(out_of_range(code, 11));
            }
            Ok(())
        }
        Opcode::Try => word(builder, 0xf2ff),
        Opcode::SetCp0 => word(builder, 0xff00),
        Opcode::DictPushConst {
            dictionary,
            key_bits,
        } => {
            if *key_bits >= (1 << 10) {
                return Err(out_of_range(key_bits, 10));
            }
            builder
                .store_uint(0b1111_0100_1010_01, 14)?
                .store_uint(u64::from(*key_bits), 10)?
                .store_ref(dictionary.clone())?;
            Ok(())
        }
        Opcode::DictIGetJmpZ => word(builder, 0xf4bc),
        Opcode::Accept => word(builder, 0xf800),
        Opcode::SetGasLimit => word(builder, 0xf801),
        Opcode::Commit => word(builder, 0xf80f),
        Opcode::GetParam(index) if *index < 16 => word(builder, 0xf820 | u64::from(*index)),
        Opcode::PushCtr(index) if *index < 16 => word(builder, 0xed40 | u64::from(*index)),
        Opcode::PopCtr(index) if *index < 16 => word(builder, 0xed50 | u64::from(*index)),
        Opcode::GetParam(index) | Opcode::PushCtr(index) | Opcode::PopCtr(index) => {
            Err(out_of_range(index, 4))
        }
        Opcode::LoadCoins => word(builder, 0xfa00),
        Opcode::StoreCoins => word(builder, 0xfa02),
        Opcode::LoadMsgAddr => word(builder, 0xfa40),
        Opcode::SendRawMsg => word(builder, 0xfb00),
        Opcode::Debug(n) if *n < 0xf0 => with_byte(builder, 0xfe, u64::from(*n)),
        Opcode::Debug(n) => Err(out_of_range(n, 8)),
    }
}

fn encode_push_int(value: &BigInt, builder: &mut CellBuilder) -> Result<()> {
    if let Some(small) = value.to_i64() {
        if (-5..=10).contains(&small) {
            #[allow(clippy::cast_sign_loss)] // Masked to a nibble
            builder.store_uint(0x70 | (small as u64 & 0x0f), 8)?;
            return Ok(());
        }
        if i8::try_from(small).is_ok() {
            builder.store_uint(0x80, 8)?.store_int(small, 8)?;
            return Ok(());
        }
        if i16::try_from(small).is_ok() {
            builder.store_uint(0x81, 8)?.store_int(small, 16)?;
            return Ok(());
        }
    }
    let l = (0..=30u32)
        .find(|l| fits_signed(value, 8 * l + 19))
        .ok_or_else(|| Error::ValueOutOfRange {
            value: value.to_string(),
            width: 259,
        })?;
    builder
        .store_uint(0x82, 8)?
        .store_uint(u64::from(l), 5)?
        .store_bigint(value, 8 * l as usize + 19, true)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;
    use proptest::prelude::*;

    use crate::{
        cell::{Cell, CellBuilder},
        disassembly::decoder::{decode, encode, DecodeError},
        opcode::{arithmetic::BinaryOp, Opcode},
    };

    fn assemble(opcodes: &[Opcode]) -> anyhow::Result<Cell> {
        let mut builder = CellBuilder::new();
        for opcode in opcodes {
            encode(opcode, &mut builder)?;
        }
        Ok(builder.build()?)
    }

    #[test]
    fn decodes_a_sequence_of_instructions() -> anyhow::Result<()> {
        let program = vec![
            Opcode::PushInt(BigInt::from(1)),
            Opcode::PushInt(BigInt::from(-300)),
            Opcode::Binary(BinaryOp::Add),
            Opcode::Xchg(0, 1),
            Opcode::Throw(200),
            Opcode::CallDict(1000),
        ];
        let mut code = assemble(&program)?.to_slice();

        let mut decoded = Vec::new();
        while code.remaining_bits() > 0 {
            decoded.push(decode(&mut code).map_err(|e| anyhow::anyhow!("{e:?}"))?);
        }
        assert_eq!(decoded, program);
        Ok(())
    }

    #[test]
    fn reports_unknown_prefixes() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_uint(0xc4, 8)?;
        let mut code = builder.build()?.to_slice();

        assert_eq!(
            decode(&mut code),
            Err(DecodeError::Unknown {
                prefix: "c4".into(),
            })
        );
        Ok(())
    }

    #[test]
    fn reports_truncated_instructions() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_uint(0x80, 8)?;
        let mut code = builder.build()?.to_slice();

        assert_eq!(decode(&mut code), Err(DecodeError::Truncated));
        Ok(())
    }

    proptest! {
        #[test]
        fn integer_constants_use_a_decodable_encoding(value in any::<i128>()) {
            let program = vec![Opcode::PushInt(BigInt::from(value))];
            let mut code = assemble(&program).unwrap().to_slice();
            prop_assert_eq!(decode(&mut code), Ok(program[0].clone()));
            prop_assert_eq!(code.remaining_bits(), 0);
        }
    }
}
