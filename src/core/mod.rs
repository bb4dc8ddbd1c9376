//! Core data types for reanal.
//!
//! Functions, basic blocks, decoded ops and references, plus the
//! capability traits (decoder, register resolver, symbol lookup) the
//! analysis core consumes.

pub mod address_range;
pub mod basic_block;
pub mod disassembler;
pub mod function;
pub mod op;
pub mod reference;
pub mod register;
pub mod symbol;
pub mod variable;

pub use address_range::AddressRange;
pub use basic_block::{BasicBlock, BlockKind};
pub use disassembler::{
    ArchInfo, Architecture, Decoder, DecoderPlugin, DisassemblerError, DisassemblerResult,
};
pub use function::{CallingConvention, Function, FunctionKind};
pub use op::{Op, OpKind, OpOperand, StackEffect};
pub use reference::{Xref, XrefKind};
pub use register::{ArgClass, Register, RegisterKind, RegisterProfile, RegisterResolver};
pub use symbol::{SymbolLookup, SymbolTable};
pub use variable::{Variable, VariableAccess, VariableKind};
