//! Three-address IR instructions and operands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of translator temporaries. Names carrying it are always temps.
pub const TEMP_PREFIX: &str = "V_";

/// Prefix used when rendering physical registers.
pub const REG_PREFIX: &str = "R_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrOpcode {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Not,
    Lt,
    Eq,
    /// Load from memory
    Ldm,
    /// Store to memory
    Stm,
    /// Store to register or temporary
    Str,
    /// Conditional jump
    Jcc,
    /// Untranslatable instruction
    Unk,
}

impl IrOpcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IrOpcode::Add => "ADD",
            IrOpcode::Sub => "SUB",
            IrOpcode::Mul => "MUL",
            IrOpcode::Div => "DIV",
            IrOpcode::Mod => "MOD",
            IrOpcode::And => "AND",
            IrOpcode::Or => "OR",
            IrOpcode::Xor => "XOR",
            IrOpcode::Shl => "SHL",
            IrOpcode::Shr => "SHR",
            IrOpcode::Not => "NOT",
            IrOpcode::Lt => "LT",
            IrOpcode::Eq => "EQ",
            IrOpcode::Ldm => "LDM",
            IrOpcode::Stm => "STM",
            IrOpcode::Str => "STR",
            IrOpcode::Jcc => "JCC",
            IrOpcode::Unk => "UNK",
        }
    }
}

impl fmt::Display for IrOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operand names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    Register,
    Constant,
    Temp,
    /// Flag pseudo-variable such as `$z`, only seen on the operand stack
    Internal,
    /// Jump target inside the IR of one instruction (`addr.seq`)
    Label,
    None,
}

/// An IR operand: a name plus its width in bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IrArg {
    pub kind: ArgKind,
    pub name: String,
    pub size: u16,
}

impl IrArg {
    pub fn new(kind: ArgKind, name: impl Into<String>, size: u16) -> Self {
        Self {
            kind,
            name: name.into(),
            size,
        }
    }

    /// Empty operand slot.
    pub fn none() -> Self {
        Self::new(ArgKind::None, "", 0)
    }

    pub fn register(name: impl Into<String>, size: u16) -> Self {
        Self::new(ArgKind::Register, name, size)
    }

    pub fn constant(value: u64, size: u16) -> Self {
        Self::new(ArgKind::Constant, value.to_string(), size)
    }

    /// Temporary number `n`, rendered `V_<nn>`.
    pub fn temp(n: u32, size: u16) -> Self {
        Self::new(ArgKind::Temp, format!("{}{:02}", TEMP_PREFIX, n), size)
    }

    pub fn label(addr: u64, seq: u32) -> Self {
        Self::new(ArgKind::Label, format!("{:#x}.{:02}", addr, seq), 0)
    }

    pub fn is_none(&self) -> bool {
        self.kind == ArgKind::None
    }
}

impl fmt::Display for IrArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArgKind::None => Ok(()),
            ArgKind::Label => f.write_str(&self.name),
            ArgKind::Register => write!(f, "{}{}:{}", REG_PREFIX, self.name, self.size),
            _ => write!(f, "{}:{}", self.name, self.size),
        }
    }
}

/// One three-address instruction. `args[2]` is the destination for every
/// opcode except `STM` (address) and `JCC` (target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrInstruction {
    /// Address of the source instruction
    pub addr: u64,
    /// Position within that instruction's translation
    pub seq: u32,
    pub opcode: IrOpcode,
    pub args: [IrArg; 3],
}

impl IrInstruction {
    pub fn new(addr: u64, seq: u32, opcode: IrOpcode, a0: IrArg, a1: IrArg, a2: IrArg) -> Self {
        Self {
            addr,
            seq,
            opcode,
            args: [a0, a1, a2],
        }
    }

    /// Placeholder for an instruction whose semantics could not be translated.
    pub fn unknown(addr: u64) -> Self {
        Self::new(
            addr,
            0,
            IrOpcode::Unk,
            IrArg::none(),
            IrArg::none(),
            IrArg::none(),
        )
    }

    pub fn dst(&self) -> &IrArg {
        &self.args[2]
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}.{:02x}: {:>4} {:>12}, {:>12}, {:>12}",
            self.addr,
            self.seq,
            self.opcode,
            self.args[0].to_string(),
            self.args[1].to_string(),
            self.args[2].to_string()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_operands() {
        assert_eq!(IrArg::register("eax", 32).to_string(), "R_eax:32");
        assert_eq!(IrArg::temp(3, 8).to_string(), "V_03:8");
        assert_eq!(IrArg::constant(16, 32).to_string(), "16:32");
        assert_eq!(IrArg::label(0x1000, 4).to_string(), "0x1000.04");
        assert_eq!(IrArg::none().to_string(), "");
    }

    #[test]
    fn render_instruction() {
        let ins = IrInstruction::new(
            0x1000,
            1,
            IrOpcode::Add,
            IrArg::register("eax", 32),
            IrArg::constant(1, 32),
            IrArg::temp(0, 32),
        );
        let text = ins.to_string();
        assert!(text.starts_with("1000.01:  ADD"));
        assert!(text.contains("R_eax:32"));
        assert!(text.ends_with("V_00:32"));
        assert_eq!(ins.dst().name, "V_00");
        assert_eq!(IrInstruction::unknown(0x10).opcode, IrOpcode::Unk);
    }
}
