//! Constants used throughout the codebase.

/// The maximum number of data bits that a single cell can hold.
pub const MAX_CELL_BITS: usize = 1023;

/// The maximum number of child references that a single cell can hold.
pub const MAX_CELL_REFS: usize = 4;

/// The width of the VM's integers in bits.
pub const INT_BITS: u32 = 257;

/// The width of the bit-vectors used to represent a cell's data in the solver.
#[allow(clippy::cast_possible_truncation)] // MAX_CELL_BITS is a small constant
pub const CELL_DATA_BITS: u32 = MAX_CELL_BITS as u32;

/// The width of the bit-vectors used for symbolic lengths and cursor
/// positions.
pub const LENGTH_BITS: u32 = 16;

/// The number of bits used for the method identifiers in the method dictionary.
pub const METHOD_ID_BITS: usize = 19;

/// The method identifier of the `recv_internal` entry point.
pub const RECV_INTERNAL_METHOD_ID: i32 = 0;

/// The method identifier of the `recv_external` entry point.
pub const RECV_EXTERNAL_METHOD_ID: i32 = -1;

/// The operation code carried by every bounced message body.
pub const BOUNCED_MESSAGE_OP: u32 = 0xffff_ffff;

/// The width of message operation codes.
pub const MESSAGE_OP_BITS: u32 = 32;

/// The number of bits in a standard internal address (`addr_std$10` with no
/// anycast, an 8-bit workchain and a 256-bit account id).
pub const STD_ADDRESS_BITS: u16 = 267;

/// The maximum number of out actions a single compute phase may register.
pub const MAX_OUT_ACTIONS: usize = 255;

/// The default amount of gas a single path may consume.
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// The default number of times a method may appear on the call stack at once.
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 2;

/// The default number of forks allowed within a single loop occurrence.
pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 3;

/// The default maximum depth of nested schema structures that are walked when
/// generating structural constraints.
pub const DEFAULT_MAX_SCHEMA_DEPTH: usize = 10;

/// The default number of inter-contract message deliveries along one path.
pub const DEFAULT_MAX_MESSAGE_HOPS: usize = 8;

/// The default solver timeout for a single satisfiability check.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u32 = 10_000;

/// The default number of steps the VM performs before polling a watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The gas charged for every instruction on top of its bit and reference
/// lengths.
pub const BASIC_GAS_PRICE: u64 = 10;

/// The gas charged per reference an instruction loads from the code cell.
pub const REF_GAS_PRICE: u64 = 5;

/// The gas charged for the first load of a cell.
pub const CELL_LOAD_GAS_PRICE: u64 = 100;

/// The gas charged for loading a cell that has already been loaded.
pub const CELL_RELOAD_GAS_PRICE: u64 = 25;

/// The gas charged for sealing a builder into a cell.
pub const CELL_CREATE_GAS_PRICE: u64 = 500;

/// The gas charged for an implicit return at the end of a continuation.
pub const IMPLICIT_RET_GAS_PRICE: u64 = 5;

/// The gas charged for an implicit jump into the first reference of a
/// continuation.
pub const IMPLICIT_JMPREF_GAS_PRICE: u64 = 10;

/// The gas charged for throwing an exception.
pub const EXCEPTION_GAS_PRICE: u64 = 50;

/// The gas charged per tuple entry created or destructured.
pub const TUPLE_ENTRY_GAS_PRICE: u64 = 1;

/// Standard exit codes of the compute and action phases.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const ALTERNATIVE_SUCCESS: i32 = 1;
    pub const STACK_UNDERFLOW: i32 = 2;
    pub const STACK_OVERFLOW: i32 = 3;
    pub const INTEGER_OVERFLOW: i32 = 4;
    pub const RANGE_CHECK: i32 = 5;
    pub const INVALID_OPCODE: i32 = 6;
    pub const TYPE_CHECK: i32 = 7;
    pub const CELL_OVERFLOW: i32 = 8;
    pub const CELL_UNDERFLOW: i32 = 9;
    pub const DICTIONARY: i32 = 10;
    pub const UNKNOWN: i32 = 11;
    pub const FATAL: i32 = 12;
    pub const OUT_OF_GAS: i32 = -14;
    pub const ACTION_LIST_INVALID: i32 = 32;
    pub const TOO_MANY_ACTIONS: i32 = 33;
    pub const UNSUPPORTED_ACTION: i32 = 34;
}
