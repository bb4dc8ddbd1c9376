//! Register profiles and operand classification.
//!
//! The IR translator and the frame-variable extractor need to know which
//! names in a semantic expression are registers, how wide they are, and
//! which register is the program counter. That knowledge comes from a
//! [`RegisterResolver`]; [`RegisterProfile`] is the table-backed one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Role of a register in the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    General,
    Flags,
    ProgramCounter,
    StackPointer,
    FramePointer,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::General => write!(f, "gpr"),
            RegisterKind::Flags => write!(f, "flg"),
            RegisterKind::ProgramCounter => write!(f, "pc"),
            RegisterKind::StackPointer => write!(f, "sp"),
            RegisterKind::FramePointer => write!(f, "bp"),
        }
    }
}

/// A named register with its width in bits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub size: u16,
    pub kind: RegisterKind,
}

impl Register {
    pub fn new(name: impl Into<String>, size: u16, kind: RegisterKind) -> Self {
        Self {
            name: name.into(),
            size,
            kind,
        }
    }

    pub fn general(name: impl Into<String>, size: u16) -> Self {
        Self::new(name, size, RegisterKind::General)
    }

    pub fn flags(name: impl Into<String>, size: u16) -> Self {
        Self::new(name, size, RegisterKind::Flags)
    }
}

/// What a token of a semantic expression denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    /// Physical register of the given width
    Register(u16),
    /// Numeric literal
    Constant(u64),
    /// Translator pseudo-variable such as `$z`
    Internal,
    /// Not recognised
    Unknown,
}

/// Parse a decimal or `0x` hexadecimal literal, optionally negative.
pub fn parse_number(token: &str) -> Option<u64> {
    let (neg, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
        body.parse::<u64>().ok()?
    } else {
        return None;
    };
    Some(if neg { value.wrapping_neg() } else { value })
}

/// Register-name resolver consumed by the translator and the walker.
pub trait RegisterResolver {
    /// Width in bits of a register, `None` if the name is not a register
    fn register_size(&self, name: &str) -> Option<u16>;

    /// Name of the program counter
    fn pc_register_name(&self) -> &str;

    fn frame_pointer(&self) -> Option<&str> {
        None
    }

    fn stack_pointer(&self) -> Option<&str> {
        None
    }

    /// Classify an expression token.
    fn classify(&self, name: &str) -> ArgClass {
        if name.starts_with('$') {
            return ArgClass::Internal;
        }
        if let Some(v) = parse_number(name) {
            return ArgClass::Constant(v);
        }
        match self.register_size(name) {
            Some(size) => ArgClass::Register(size),
            None => ArgClass::Unknown,
        }
    }
}

/// Table-backed register profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterProfile {
    registers: HashMap<String, Register>,
    pc: String,
    sp: Option<String>,
    bp: Option<String>,
}

impl RegisterProfile {
    /// Create a profile with the given program counter name.
    pub fn new(pc: impl Into<String>, pc_size: u16) -> Self {
        let pc = pc.into();
        let mut profile = Self {
            registers: HashMap::new(),
            pc: pc.clone(),
            sp: None,
            bp: None,
        };
        profile.add(Register::new(pc, pc_size, RegisterKind::ProgramCounter));
        profile
    }

    pub fn add(&mut self, reg: Register) -> &mut Self {
        match reg.kind {
            RegisterKind::StackPointer => self.sp = Some(reg.name.clone()),
            RegisterKind::FramePointer => self.bp = Some(reg.name.clone()),
            _ => {}
        }
        self.registers.insert(reg.name.clone(), reg);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Register> {
        self.registers.get(name)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// 32-bit x86 profile, including 16/8-bit aliases and the flag bits.
    pub fn x86() -> Self {
        let mut p = Self::new("eip", 32);
        p.add(Register::new("esp", 32, RegisterKind::StackPointer));
        p.add(Register::new("ebp", 32, RegisterKind::FramePointer));
        for r in ["eax", "ebx", "ecx", "edx", "esi", "edi", "eflags"] {
            p.add(Register::general(r, 32));
        }
        Self::add_x86_aliases(&mut p);
        p
    }

    /// 64-bit x86 profile.
    pub fn x86_64() -> Self {
        let mut p = Self::new("rip", 64);
        p.add(Register::new("rsp", 64, RegisterKind::StackPointer));
        p.add(Register::new("rbp", 64, RegisterKind::FramePointer));
        for r in [
            "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
            "r14", "r15", "rflags",
        ] {
            p.add(Register::general(r, 64));
        }
        for r in [
            "eax", "ebx", "ecx", "edx", "esi", "edi", "esp", "ebp", "eip", "r8d", "r9d", "r10d",
            "r11d",
        ] {
            p.add(Register::general(r, 32));
        }
        Self::add_x86_aliases(&mut p);
        p
    }

    fn add_x86_aliases(p: &mut Self) {
        for r in ["ax", "bx", "cx", "dx", "si", "di", "sp", "bp"] {
            p.add(Register::general(r, 16));
        }
        for r in ["al", "ah", "bl", "bh", "cl", "ch", "dl", "dh"] {
            p.add(Register::general(r, 8));
        }
        for f in ["cf", "pf", "af", "zf", "sf", "tf", "df", "of"] {
            p.add(Register::flags(f, 1));
        }
    }
}

impl RegisterResolver for RegisterProfile {
    fn register_size(&self, name: &str) -> Option<u16> {
        self.registers.get(name).map(|r| r.size)
    }

    fn pc_register_name(&self) -> &str {
        &self.pc
    }

    fn frame_pointer(&self) -> Option<&str> {
        self.bp.as_deref()
    }

    fn stack_pointer(&self) -> Option<&str> {
        self.sp.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("16"), Some(16));
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number("-1"), Some(u64::MAX));
        assert_eq!(parse_number("rax"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("0xzz"), None);
    }

    #[test]
    fn test_classify() {
        let p = RegisterProfile::x86_64();
        assert_eq!(p.classify("rax"), ArgClass::Register(64));
        assert_eq!(p.classify("al"), ArgClass::Register(8));
        assert_eq!(p.classify("zf"), ArgClass::Register(1));
        assert_eq!(p.classify("0x20"), ArgClass::Constant(0x20));
        assert_eq!(p.classify("$z"), ArgClass::Internal);
        assert_eq!(p.classify("xyz"), ArgClass::Unknown);
    }

    #[test]
    fn test_special_registers() {
        let p = RegisterProfile::x86();
        assert_eq!(p.pc_register_name(), "eip");
        assert_eq!(p.stack_pointer(), Some("esp"));
        assert_eq!(p.frame_pointer(), Some("ebp"));
        assert_eq!(p.get("eip").map(|r| r.kind), Some(RegisterKind::ProgramCounter));
        assert!(!p.is_empty());
        assert_eq!(RegisterKind::StackPointer.to_string(), "sp");
    }
}
