//! x86 / x86-64 decoder backed by iced-x86.
//!
//! Produces op descriptors: control-flow kind, targets, table pointers,
//! stack effects, operands and a postfix semantic expression for the
//! common integer instructions.

use iced_x86::{
    Decoder as IcedRawDecoder, DecoderError, DecoderOptions, FlowControl, Instruction, Mnemonic,
    OpKind as IOpKind, Register as IReg,
};

use crate::core::disassembler::{
    ArchInfo, Architecture, Decoder, DisassemblerError, DisassemblerResult,
};
use crate::core::op::{Op, OpKind, OpOperand, StackEffect};

pub struct IcedDecoder {
    bits: u32,
}

fn reg_name(r: IReg) -> String {
    format!("{:?}", r).to_ascii_lowercase()
}

fn is_immediate(kind: IOpKind) -> bool {
    matches!(
        kind,
        IOpKind::Immediate8
            | IOpKind::Immediate16
            | IOpKind::Immediate32
            | IOpKind::Immediate64
            | IOpKind::Immediate8to16
            | IOpKind::Immediate8to32
            | IOpKind::Immediate8to64
            | IOpKind::Immediate32to64
    )
}

fn is_near_branch(kind: IOpKind) -> bool {
    matches!(
        kind,
        IOpKind::NearBranch16 | IOpKind::NearBranch32 | IOpKind::NearBranch64
    )
}

impl IcedDecoder {
    pub fn new(bits: u8) -> DisassemblerResult<Self> {
        match bits {
            16 | 32 | 64 => Ok(Self {
                bits: u32::from(bits),
            }),
            other => Err(DisassemblerError::UnsupportedBits(other)),
        }
    }

    fn mask(&self, v: u64) -> u64 {
        if self.bits >= 64 {
            v
        } else {
            v & ((1u64 << self.bits) - 1)
        }
    }

    fn word(&self) -> u32 {
        self.bits / 8
    }

    fn pc(&self) -> &'static str {
        match self.bits {
            64 => "rip",
            32 => "eip",
            _ => "ip",
        }
    }

    fn sp(&self) -> &'static str {
        match self.bits {
            64 => "rsp",
            32 => "esp",
            _ => "sp",
        }
    }

    fn displacement(&self, instr: &Instruction) -> i64 {
        if self.bits == 64 {
            instr.memory_displacement64() as i64
        } else {
            i64::from(instr.memory_displacement32() as i32)
        }
    }

    /// Absolute address referenced by a memory operand without a base register.
    fn memory_pointer(&self, instr: &Instruction) -> Option<u64> {
        if instr.is_ip_rel_memory_operand() {
            return Some(instr.ip_rel_memory_address());
        }
        if instr.memory_base() == IReg::None {
            return Some(self.mask(self.displacement(instr) as u64));
        }
        None
    }

    fn operand(&self, instr: &Instruction, i: u32) -> Option<OpOperand> {
        let kind = instr.op_kind(i);
        match kind {
            IOpKind::Register => Some(OpOperand::register(reg_name(instr.op_register(i)))),
            IOpKind::Memory => {
                let base = match instr.memory_base() {
                    IReg::None => None,
                    r => Some(reg_name(r)),
                };
                let disp = match self.memory_pointer(instr) {
                    Some(ptr) => ptr as i64,
                    None => self.displacement(instr),
                };
                Some(OpOperand::memory(base, disp))
            }
            k if is_immediate(k) => Some(OpOperand::immediate(instr.immediate(i) as i64)),
            k if is_near_branch(k) => {
                Some(OpOperand::immediate(instr.near_branch_target() as i64))
            }
            _ => None,
        }
    }

    fn kind(instr: &Instruction) -> OpKind {
        match instr.flow_control() {
            FlowControl::Next => match instr.mnemonic() {
                Mnemonic::Nop => OpKind::Nop,
                Mnemonic::Push => OpKind::Push,
                Mnemonic::Pop => OpKind::Pop,
                Mnemonic::Mov | Mnemonic::Movzx | Mnemonic::Movsx | Mnemonic::Lea => OpKind::Mov,
                Mnemonic::Cmp | Mnemonic::Test => OpKind::Cmp,
                _ => OpKind::Other,
            },
            FlowControl::UnconditionalBranch if is_near_branch(instr.op0_kind()) => OpKind::Jmp,
            FlowControl::UnconditionalBranch | FlowControl::IndirectBranch => OpKind::Ujmp,
            FlowControl::ConditionalBranch => OpKind::Cjmp,
            FlowControl::Return => OpKind::Ret,
            FlowControl::Call => OpKind::Call,
            FlowControl::IndirectCall => OpKind::Ucall,
            FlowControl::Interrupt if instr.mnemonic() == Mnemonic::Int3 => OpKind::Trap,
            FlowControl::Interrupt => OpKind::Swi,
            FlowControl::Exception => OpKind::Illegal,
            _ => OpKind::Other,
        }
    }

    fn stack_effect(&self, instr: &Instruction) -> StackEffect {
        let word = i64::from(self.word());
        match instr.mnemonic() {
            Mnemonic::Push => return StackEffect::Increment(word),
            Mnemonic::Pop => return StackEffect::Increment(-word),
            Mnemonic::Sub | Mnemonic::Add
                if instr.op_count() == 2
                    && instr.op0_kind() == IOpKind::Register
                    && instr.op0_register().full_register() == IReg::RSP
                    && is_immediate(instr.op1_kind()) =>
            {
                let imm = instr.immediate(1) as i64;
                return if instr.mnemonic() == Mnemonic::Sub {
                    StackEffect::Increment(imm)
                } else {
                    StackEffect::Increment(-imm)
                };
            }
            _ => {}
        }
        if instr.memory_base().full_register() != IReg::RBP || instr.memory_index() != IReg::None
        {
            return StackEffect::None;
        }
        let delta = self.displacement(instr);
        if instr.op0_kind() == IOpKind::Memory {
            StackEffect::Set(delta)
        } else if (0..instr.op_count()).any(|i| instr.op_kind(i) == IOpKind::Memory) {
            StackEffect::Get(delta)
        } else {
            StackEffect::None
        }
    }

    /// Semantic text of operand `i`, `None` for unsupported forms.
    fn expr_operand(&self, instr: &Instruction, i: u32) -> Option<String> {
        match instr.op_kind(i) {
            IOpKind::Register => Some(reg_name(instr.op_register(i))),
            k if is_immediate(k) => Some(format!("{:#x}", self.mask(instr.immediate(i)))),
            _ => None,
        }
    }

    /// Address expression of the memory operand.
    fn expr_address(&self, instr: &Instruction) -> Option<String> {
        if instr.memory_index() != IReg::None {
            return None;
        }
        if let Some(ptr) = self.memory_pointer(instr) {
            return Some(format!("{:#x}", ptr));
        }
        let base = reg_name(instr.memory_base());
        let disp = self.displacement(instr);
        Some(match disp {
            0 => base,
            d if d < 0 => format!("{:#x},{},-", d.unsigned_abs(), base),
            d => format!("{:#x},{},+", d, base),
        })
    }

    fn semantics(&self, instr: &Instruction) -> String {
        self.try_semantics(instr).unwrap_or_default()
    }

    fn try_semantics(&self, instr: &Instruction) -> Option<String> {
        let n = self.word();
        let (pc, sp) = (self.pc(), self.sp());
        let width = instr.op0_register().size() * 8;
        let flags = "$z,zf,=,$s,sf,=";
        let two_regs = || -> Option<(String, String)> {
            if instr.op0_kind() != IOpKind::Register {
                return None;
            }
            Some((self.expr_operand(instr, 1)?, reg_name(instr.op0_register())))
        };
        let expr = match instr.mnemonic() {
            Mnemonic::Nop => String::new(),
            Mnemonic::Mov | Mnemonic::Lea if instr.op_count() == 2 => {
                match (instr.op0_kind(), instr.op1_kind()) {
                    (IOpKind::Register, IOpKind::Memory) => {
                        let dst = reg_name(instr.op0_register());
                        let addr = self.expr_address(instr)?;
                        if instr.mnemonic() == Mnemonic::Lea {
                            format!("{},{},=", addr, dst)
                        } else {
                            let size = instr.memory_size().size();
                            format!("{},[{}],{},=", addr, size, dst)
                        }
                    }
                    (IOpKind::Memory, _) => {
                        let src = self.expr_operand(instr, 1)?;
                        let size = instr.memory_size().size();
                        format!("{},{},=[{}]", src, self.expr_address(instr)?, size)
                    }
                    _ => {
                        let (src, dst) = two_regs()?;
                        format!("{},{},=", src, dst)
                    }
                }
            }
            Mnemonic::Add => {
                let (src, dst) = two_regs()?;
                format!("{},{},+=,{},$c{},cf,=", src, dst, flags, width - 1)
            }
            Mnemonic::Sub => {
                let (src, dst) = two_regs()?;
                format!("{},{},-=,{},$b{},cf,=", src, dst, flags, width)
            }
            Mnemonic::And | Mnemonic::Or | Mnemonic::Xor => {
                let (src, dst) = two_regs()?;
                let op = match instr.mnemonic() {
                    Mnemonic::And => "&",
                    Mnemonic::Or => "|",
                    _ => "^",
                };
                format!("{},{},{}=,{},0,cf,=", src, dst, op, flags)
            }
            Mnemonic::Cmp => {
                let (src, dst) = two_regs()?;
                format!("{},{},==,{},$b{},cf,=", src, dst, flags, width)
            }
            Mnemonic::Inc | Mnemonic::Dec if instr.op0_kind() == IOpKind::Register => {
                let op = if instr.mnemonic() == Mnemonic::Inc { "++=" } else { "--=" };
                format!("{},{},{}", reg_name(instr.op0_register()), op, flags)
            }
            Mnemonic::Push => {
                let src = self.expr_operand(instr, 0)?;
                format!("{},{},-=,{},{},=[{}]", n, sp, src, sp, n)
            }
            Mnemonic::Pop if instr.op0_kind() == IOpKind::Register => {
                let dst = reg_name(instr.op0_register());
                format!("{},[{}],{},=,{},{},+=", sp, n, dst, n, sp)
            }
            Mnemonic::Jmp if is_near_branch(instr.op0_kind()) => {
                format!("{:#x},{},=", instr.near_branch_target(), pc)
            }
            Mnemonic::Call if is_near_branch(instr.op0_kind()) => format!(
                "{},{},-=,{},{},=[{}],{:#x},{},=",
                n,
                sp,
                pc,
                sp,
                n,
                instr.near_branch_target(),
                pc
            ),
            Mnemonic::Ret if instr.op_count() == 0 => {
                format!("{},[{}],{},=,{},{},+=", sp, n, pc, n, sp)
            }
            Mnemonic::Je | Mnemonic::Jne | Mnemonic::Jb | Mnemonic::Jae | Mnemonic::Js
            | Mnemonic::Jns => {
                let cond = match instr.mnemonic() {
                    Mnemonic::Je => "zf",
                    Mnemonic::Jne => "zf,!",
                    Mnemonic::Jb => "cf",
                    Mnemonic::Jae => "cf,!",
                    Mnemonic::Js => "sf",
                    _ => "sf,!",
                };
                format!(
                    "{},?{{,{:#x},{},=,}}",
                    cond,
                    instr.near_branch_target(),
                    pc
                )
            }
            _ => return None,
        };
        Some(expr)
    }
}

impl Decoder for IcedDecoder {
    fn decode(&self, addr: u64, bytes: &[u8]) -> DisassemblerResult<Op> {
        let mut decoder = IcedRawDecoder::with_ip(self.bits, bytes, addr, DecoderOptions::NONE);
        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(match decoder.last_error() {
                DecoderError::NoMoreBytes => DisassemblerError::InsufficientBytes(),
                _ => DisassemblerError::InvalidInstruction(),
            });
        }

        let kind = Self::kind(&instr);
        let mut op = Op::new(addr, instr.len(), kind)
            .with_mnemonic(format!("{:?}", instr.mnemonic()).to_ascii_lowercase())
            .with_stack(self.stack_effect(&instr))
            .with_semantics(self.semantics(&instr));

        match kind {
            OpKind::Jmp | OpKind::Call => op.jump = Some(instr.near_branch_target()),
            OpKind::Cjmp => {
                op.jump = Some(instr.near_branch_target());
                op.fail = Some(instr.next_ip());
            }
            OpKind::Push if is_immediate(instr.op0_kind()) => {
                op.val = Some(self.mask(instr.immediate(0)));
            }
            _ => {}
        }
        if (0..instr.op_count()).any(|i| instr.op_kind(i) == IOpKind::Memory) {
            op.ptr = self.memory_pointer(&instr);
        }

        let operands: Vec<OpOperand> = (0..instr.op_count())
            .filter_map(|i| self.operand(&instr, i))
            .collect();
        let writes_first = matches!(kind, OpKind::Mov | OpKind::Other | OpKind::Pop)
            && instr.op_count() > 0;
        if writes_first {
            let mut it = operands.into_iter();
            op.dst = it.next();
            op.src = it.collect();
        } else {
            op.src = operands;
        }
        Ok(op)
    }

    fn arch_info(&self) -> ArchInfo {
        ArchInfo {
            min_op_size: 1,
            max_op_size: 15,
            align: 1,
        }
    }

    fn architecture(&self) -> Architecture {
        if self.bits == 64 {
            Architecture::X86_64
        } else {
            Architecture::X86
        }
    }

    /// Indirect jumps inside PLT stubs do not end the function.
    fn ujmp_continues(&self, _addr: u64, section: Option<&str>) -> bool {
        section.is_some_and(|s| s.contains(".plt"))
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}
