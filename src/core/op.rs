//! Decoded instruction descriptors.
//!
//! An [`Op`] is what a decoder hands to the walker: where the instruction
//! is, how long it is, what kind of control transfer it performs and the
//! postfix semantic expression describing its effects. The walker consumes
//! ops, it never owns instruction semantics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control-flow relevant classification of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OpKind {
    /// Anything without control-flow or stack significance
    #[default]
    Other,
    /// Invalid encoding
    Illegal,
    /// Breakpoint / trap instruction
    Trap,
    Nop,
    Mov,
    Push,
    Pop,
    /// Unconditional direct jump
    Jmp,
    /// Conditional direct jump
    Cjmp,
    /// Indirect jump (register or memory target)
    Ujmp,
    /// Direct call
    Call,
    /// Conditional call
    Ccall,
    /// Indirect call
    Ucall,
    Ret,
    /// Software interrupt / syscall
    Swi,
    Cmp,
}

impl OpKind {
    pub fn value(&self) -> &'static str {
        match self {
            OpKind::Other => "other",
            OpKind::Illegal => "illegal",
            OpKind::Trap => "trap",
            OpKind::Nop => "nop",
            OpKind::Mov => "mov",
            OpKind::Push => "push",
            OpKind::Pop => "pop",
            OpKind::Jmp => "jmp",
            OpKind::Cjmp => "cjmp",
            OpKind::Ujmp => "ujmp",
            OpKind::Call => "call",
            OpKind::Ccall => "ccall",
            OpKind::Ucall => "ucall",
            OpKind::Ret => "ret",
            OpKind::Swi => "swi",
            OpKind::Cmp => "cmp",
        }
    }

    /// True for kinds that transfer control somewhere other than the next instruction.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            OpKind::Jmp
                | OpKind::Cjmp
                | OpKind::Ujmp
                | OpKind::Call
                | OpKind::Ccall
                | OpKind::Ucall
                | OpKind::Ret
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Effect an instruction has on the stack pointer or the frame.
///
/// `Set`/`Get` carry the signed offset of the accessed slot relative to the
/// frame or stack pointer: positive offsets are arguments, negative ones locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StackEffect {
    #[default]
    None,
    /// Stack pointer moves by this many bytes
    Increment(i64),
    /// Store into a frame slot
    Set(i64),
    /// Load from a frame slot
    Get(i64),
}

/// A simplified operand as exposed by decoders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpOperand {
    /// Register name, lowercase
    pub register: Option<String>,
    /// Memory displacement (absolute for pc-relative forms)
    pub displacement: Option<i64>,
    /// Immediate value
    pub immediate: Option<i64>,
}

impl OpOperand {
    pub fn register(name: impl Into<String>) -> Self {
        Self {
            register: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn memory(base: Option<String>, displacement: i64) -> Self {
        Self {
            register: base,
            displacement: Some(displacement),
            immediate: None,
        }
    }

    pub fn immediate(value: i64) -> Self {
        Self {
            immediate: Some(value),
            ..Self::default()
        }
    }
}

/// A decoded instruction descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Op {
    /// Address of the instruction
    pub address: u64,
    /// Encoded length in bytes
    pub size: usize,
    pub kind: OpKind,
    /// Branch/call target
    pub jump: Option<u64>,
    /// Fallthrough address of a conditional transfer
    pub fail: Option<u64>,
    /// Data pointer referenced by the instruction (table base for indirect jumps)
    pub ptr: Option<u64>,
    /// Immediate value (the pushed constant for PUSH)
    pub val: Option<u64>,
    /// Number of delay slots following a branch
    pub delay: u32,
    /// Conditional return or trap
    pub conditional: bool,
    pub stack: StackEffect,
    /// Postfix semantic expression, empty when the decoder has none
    pub semantics: String,
    pub dst: Option<OpOperand>,
    pub src: Vec<OpOperand>,
    pub mnemonic: String,
}

impl Op {
    /// Create an op of `kind` with no targets.
    pub fn new(address: u64, size: usize, kind: OpKind) -> Self {
        Self {
            address,
            size,
            kind,
            ..Self::default()
        }
    }

    pub fn with_jump(mut self, target: u64) -> Self {
        self.jump = Some(target);
        self
    }

    pub fn with_fail(mut self, fail: u64) -> Self {
        self.fail = Some(fail);
        self
    }

    pub fn with_ptr(mut self, ptr: u64) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub fn with_val(mut self, val: u64) -> Self {
        self.val = Some(val);
        self
    }

    pub fn with_delay(mut self, slots: u32) -> Self {
        self.delay = slots;
        self
    }

    pub fn with_stack(mut self, effect: StackEffect) -> Self {
        self.stack = effect;
        self
    }

    pub fn with_semantics(mut self, expr: impl Into<String>) -> Self {
        self.semantics = expr.into();
        self
    }

    pub fn with_mnemonic(mut self, mnemonic: impl Into<String>) -> Self {
        self.mnemonic = mnemonic.into();
        self
    }

    /// Address of the following instruction.
    pub fn next(&self) -> u64 {
        self.address.wrapping_add(self.size as u64)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {} ({} bytes)", self.address, self.kind, self.size)?;
        if let Some(j) = self.jump {
            write!(f, " jump={:#x}", j)?;
        }
        if let Some(fl) = self.fail {
            write!(f, " fail={:#x}", fl)?;
        }
        Ok(())
    }
}
