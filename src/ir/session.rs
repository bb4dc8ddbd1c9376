//! Postfix semantic expression to three-address IR.
//!
//! A [`TranslatorSession`] owns everything a translation needs: the operand
//! stack, the temporary counter and the pre/post image of the last mutated
//! value (the flag state). Each call to [`TranslatorSession::translate_expr`]
//! handles one instruction; only the temp counter and the flag state carry
//! over to the next call.

use tracing::trace;

use crate::core::op::Op;
use crate::core::register::{ArgClass, RegisterResolver};
use crate::error::{ReanalError, Result};

use super::instruction::{ArgKind, IrArg, IrInstruction, IrOpcode, TEMP_PREFIX};

/// Last mutated value, kept for lazy flag synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagState {
    pub old: Option<IrArg>,
    pub cur: Option<IrArg>,
    pub width: u16,
}

#[derive(Debug, Clone)]
struct Snapshot {
    next_temp: u32,
    flags: FlagState,
}

/// Translation state for one run over a sequence of instructions.
pub struct TranslatorSession<'r> {
    resolver: &'r dyn RegisterResolver,
    bits: u8,
    pc: String,
    next_temp: u32,
    addr: u64,
    seq: u32,
    pub(super) flags: FlagState,
    stack: Vec<IrArg>,
    /// Indices into `out` of jumps still waiting for their label
    pending: Vec<usize>,
    /// Current expression, for error reports
    expr: String,
    out: Vec<IrInstruction>,
}

impl<'r> TranslatorSession<'r> {
    pub fn new(resolver: &'r dyn RegisterResolver, bits: u8) -> Self {
        Self {
            resolver,
            bits,
            pc: resolver.pc_register_name().to_string(),
            next_temp: 0,
            addr: 0,
            seq: 0,
            flags: FlagState::default(),
            stack: Vec::new(),
            pending: Vec::new(),
            expr: String::new(),
            out: Vec::new(),
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn pc_register(&self) -> &str {
        &self.pc
    }

    /// Number of temporaries handed out so far.
    pub fn temps_used(&self) -> u32 {
        self.next_temp
    }

    pub fn flag_state(&self) -> &FlagState {
        &self.flags
    }

    /// Translate the semantics attached to `op`.
    pub fn translate(&mut self, op: &Op) -> Result<Vec<IrInstruction>> {
        self.translate_expr(op.address, &op.semantics)
    }

    /// Translate one instruction's expression. On failure nothing is
    /// emitted and the session is left as it was before the call.
    pub fn translate_expr(&mut self, addr: u64, expr: &str) -> Result<Vec<IrInstruction>> {
        let snapshot = Snapshot {
            next_temp: self.next_temp,
            flags: self.flags.clone(),
        };
        self.addr = addr;
        self.seq = 0;
        self.stack.clear();
        self.pending.clear();
        self.out.clear();
        self.expr = expr.to_string();

        let result = self.run(expr);
        let out = std::mem::take(&mut self.out);
        self.stack.clear();
        self.pending.clear();
        match result {
            Ok(()) => {
                trace!(addr = format!("{:#x}", addr), expr, count = out.len(), "translated");
                Ok(out)
            }
            Err(e) => {
                self.next_temp = snapshot.next_temp;
                self.flags = snapshot.flags;
                Err(e)
            }
        }
    }

    fn run(&mut self, expr: &str) -> Result<()> {
        for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !self.apply_operator(token)? {
                let arg = self.operand(token)?;
                self.stack.push(arg);
            }
        }
        if !self.pending.is_empty() {
            return Err(self.fail("unterminated conditional block"));
        }
        Ok(())
    }

    /// Execute `token` if it is an operator. Returns false for operands.
    fn apply_operator(&mut self, token: &str) -> Result<bool> {
        match token {
            "=" => self.assign()?,
            "==" => self.compare()?,
            "<" => self.stack_binop(IrOpcode::Lt)?,
            ">" => self.greater()?,
            "<=" => self.less_equal(false)?,
            ">=" => self.less_equal(true)?,
            "!" => self.negate()?,
            "!=" => {
                let dst = self.pop()?;
                self.stack.push(dst.clone());
                self.negate()?;
                self.stack.push(dst);
                self.assign()?;
            }
            "++" => self.step(IrOpcode::Add)?,
            "--" => self.step(IrOpcode::Sub)?,
            "++=" => {
                let dst = self.pop()?;
                self.stack.push(dst.clone());
                self.step(IrOpcode::Add)?;
                self.stack.push(dst);
                self.assign()?;
            }
            "--=" => {
                let dst = self.pop()?;
                self.stack.push(dst.clone());
                self.step(IrOpcode::Sub)?;
                self.stack.push(dst);
                self.assign()?;
            }
            "?{" => self.cond_begin()?,
            "}" => self.cond_end()?,
            "}{" => self.cond_else()?,
            _ => {
                if let Some(opcode) = binop_opcode(token) {
                    self.stack_binop(opcode)?;
                } else if let Some(opcode) = token.strip_suffix('=').and_then(binop_opcode) {
                    self.compound(opcode)?;
                } else if let Some(n) = load_width(token) {
                    self.load(n.unwrap_or(self.bits as u16 / 8))?;
                } else if let Some(n) = token.strip_prefix('=').and_then(load_width) {
                    self.store(n.unwrap_or(self.bits as u16 / 8))?;
                } else if let Some((op, n)) = memory_compound(token) {
                    let n = n.unwrap_or(self.bits as u16 / 8);
                    match op {
                        MemoryOp::Bin(opcode) => self.memory_compound(opcode, n)?,
                        MemoryOp::Step(opcode) => {
                            let addr = self.pop()?;
                            self.stack.push(IrArg::constant(1, n * 8));
                            self.stack.push(addr);
                            self.memory_compound(opcode, n)?;
                        }
                    }
                } else {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Classify an operand token. `name:size` fixes the width explicitly.
    fn operand(&self, token: &str) -> Result<IrArg> {
        let (name, explicit) = match token.rsplit_once(':') {
            Some((name, size)) => match size.parse::<u16>() {
                Ok(size) if size <= 64 => (name, Some(size)),
                _ => return Err(self.fail(format!("bad operand size in `{}`", token))),
            },
            None => (token, None),
        };
        if name.starts_with(TEMP_PREFIX) {
            return Ok(IrArg::new(ArgKind::Temp, name, explicit.unwrap_or(self.bits as u16)));
        }
        match self.resolver.classify(name) {
            ArgClass::Register(size) => Ok(IrArg::register(name, explicit.unwrap_or(size))),
            ArgClass::Constant(_) => Ok(IrArg::new(
                ArgKind::Constant,
                name,
                explicit.unwrap_or(self.bits as u16),
            )),
            ArgClass::Internal => Ok(IrArg::new(ArgKind::Internal, name, explicit.unwrap_or(0))),
            ArgClass::Unknown => Err(self.fail(format!("unknown token `{}`", name))),
        }
    }

    pub(super) fn fail(&self, reason: impl Into<String>) -> ReanalError {
        ReanalError::malformed(&self.expr, reason)
    }

    fn pop(&mut self) -> Result<IrArg> {
        self.stack.pop().ok_or_else(|| self.fail("stack underflow"))
    }

    /// Pop a value, resolving a flag pseudo-variable if that is what was pushed.
    fn pop_value(&mut self) -> Result<IrArg> {
        let arg = self.pop()?;
        if arg.kind == ArgKind::Internal {
            return self.resolve_flag(&arg.name);
        }
        Ok(arg)
    }

    pub(super) fn fresh_temp(&mut self, size: u16) -> IrArg {
        let t = IrArg::temp(self.next_temp, size);
        self.next_temp += 1;
        t
    }

    pub(super) fn emit(&mut self, opcode: IrOpcode, a0: IrArg, a1: IrArg, a2: IrArg) -> usize {
        let ins = IrInstruction::new(self.addr, self.seq, opcode, a0, a1, a2);
        self.seq += 1;
        self.out.push(ins);
        self.out.len() - 1
    }

    /// Emit `lhs OP rhs` into a fresh temp and return it.
    pub(super) fn binop(&mut self, opcode: IrOpcode, lhs: IrArg, rhs: IrArg) -> IrArg {
        let size = if opcode == IrOpcode::Lt {
            1
        } else {
            lhs.size.max(rhs.size)
        };
        let dst = self.fresh_temp(size);
        self.emit(opcode, lhs, rhs, dst.clone());
        dst
    }

    /// Emit a one-operand instruction (`NOT`, `STR`, `LDM`) into a fresh temp.
    pub(super) fn unop(&mut self, opcode: IrOpcode, src: IrArg, size: u16) -> IrArg {
        let dst = self.fresh_temp(size);
        self.emit(opcode, src, IrArg::none(), dst.clone());
        dst
    }

    /// Top of stack is the left operand.
    fn stack_binop(&mut self, opcode: IrOpcode) -> Result<()> {
        let lhs = self.pop_value()?;
        let rhs = self.pop_value()?;
        let dst = self.binop(opcode, lhs, rhs);
        self.stack.push(dst);
        Ok(())
    }

    fn compound(&mut self, opcode: IrOpcode) -> Result<()> {
        let dst = self.pop()?;
        self.stack.push(dst.clone());
        self.stack_binop(opcode)?;
        self.stack.push(dst);
        self.assign()
    }

    fn greater(&mut self) -> Result<()> {
        let lhs = self.pop_value()?;
        let rhs = self.pop_value()?;
        let dst = self.binop(IrOpcode::Lt, rhs, lhs);
        self.stack.push(dst);
        Ok(())
    }

    /// `lhs <= rhs` as `(lhs < rhs) | (lhs == rhs)`; `swap` gives `>=`.
    fn less_equal(&mut self, swap: bool) -> Result<()> {
        let mut lhs = self.pop_value()?;
        let mut rhs = self.pop_value()?;
        if swap {
            std::mem::swap(&mut lhs, &mut rhs);
        }
        let lt = self.binop(IrOpcode::Lt, lhs.clone(), rhs.clone());
        let eq = self.fresh_temp(1);
        self.emit(IrOpcode::Eq, lhs, rhs, eq.clone());
        let dst = self.binop(IrOpcode::Or, lt, eq);
        self.stack.push(dst);
        Ok(())
    }

    /// `==` computes `lhs - rhs` for the flags and pushes nothing.
    fn compare(&mut self) -> Result<()> {
        let lhs = self.pop_value()?;
        let rhs = self.pop_value()?;
        let width = if lhs.kind == ArgKind::Register {
            lhs.size
        } else if rhs.kind == ArgKind::Register {
            rhs.size
        } else {
            lhs.size.max(rhs.size)
        };
        let diff = self.binop(IrOpcode::Sub, lhs.clone(), rhs);
        self.flags = FlagState {
            old: Some(lhs),
            cur: Some(diff),
            width,
        };
        Ok(())
    }

    fn negate(&mut self) -> Result<()> {
        let value = self.pop_value()?;
        let zero = IrArg::constant(0, value.size);
        let dst = self.fresh_temp(1);
        self.emit(IrOpcode::Eq, value, zero, dst.clone());
        self.stack.push(dst);
        Ok(())
    }

    fn step(&mut self, opcode: IrOpcode) -> Result<()> {
        let value = self.pop_value()?;
        let one = IrArg::constant(1, value.size);
        let dst = self.binop(opcode, value, one);
        self.stack.push(dst);
        Ok(())
    }

    /// Narrow or widen `src` to `size` bits with an explicit mask.
    fn cast(&mut self, src: IrArg, size: u16) -> IrArg {
        if src.size == size {
            return src;
        }
        let mask = IrArg::constant(mask_for(size), size);
        let dst = self.fresh_temp(size);
        self.emit(IrOpcode::And, src, mask, dst.clone());
        dst
    }

    fn assign(&mut self) -> Result<()> {
        let dst = self.pop()?;
        let src = self.pop()?;
        match dst.kind {
            ArgKind::Register | ArgKind::Temp => {}
            _ => return Err(self.fail(format!("cannot assign to `{}`", dst.name))),
        }

        let from_flag = src.kind == ArgKind::Internal;
        let src = match src.kind {
            ArgKind::Internal => self.resolve_flag(&src.name)?,
            ArgKind::Register => {
                let size = src.size;
                self.unop(IrOpcode::Str, src, size)
            }
            _ => src,
        };

        if dst.kind == ArgKind::Register && !from_flag {
            let pre = self.unop(IrOpcode::Str, dst.clone(), dst.size);
            self.flags = FlagState {
                old: Some(pre),
                cur: Some(dst.clone()),
                width: dst.size,
            };
        }

        if dst.name == self.pc {
            self.emit(IrOpcode::Jcc, IrArg::constant(1, 1), IrArg::none(), src);
            return Ok(());
        }

        let src = self.cast(src, dst.size);
        self.emit(IrOpcode::Str, src, IrArg::none(), dst);
        Ok(())
    }

    fn load(&mut self, n: u16) -> Result<()> {
        let addr = self.pop_value()?;
        let dst = self.unop(IrOpcode::Ldm, addr, n * 8);
        self.stack.push(dst);
        Ok(())
    }

    fn store(&mut self, n: u16) -> Result<()> {
        let addr = self.pop_value()?;
        let value = self.pop()?;
        let value = if value.kind == ArgKind::Internal {
            self.resolve_flag(&value.name)?
        } else {
            let pre = self.unop(IrOpcode::Ldm, addr.clone(), n * 8);
            self.flags = FlagState {
                old: Some(pre),
                cur: Some(value.clone()),
                width: n * 8,
            };
            value
        };
        let value = self.cast(value, n * 8);
        self.emit(IrOpcode::Stm, value, IrArg::none(), addr);
        Ok(())
    }

    /// `[addr] = [addr] OP operand`
    fn memory_compound(&mut self, opcode: IrOpcode, n: u16) -> Result<()> {
        let addr = self.pop_value()?;
        let operand = self.pop_value()?;
        let loaded = self.unop(IrOpcode::Ldm, addr.clone(), n * 8);
        let result = self.binop(opcode, loaded, operand);
        self.stack.push(result);
        self.stack.push(addr);
        self.store(n)
    }

    /// `cond,?{` jumps over the block when the condition is false.
    fn cond_begin(&mut self) -> Result<()> {
        let cond = self.pop_value()?;
        let size = cond.size;
        let negated = self.unop(IrOpcode::Not, cond, size);
        let idx = self.emit(IrOpcode::Jcc, negated, IrArg::none(), IrArg::label(0, 0));
        self.pending.push(idx);
        Ok(())
    }

    fn cond_end(&mut self) -> Result<()> {
        let idx = self
            .pending
            .pop()
            .ok_or_else(|| self.fail("`}` without `?{`"))?;
        self.out[idx].args[2] = IrArg::label(self.addr, self.seq);
        Ok(())
    }

    /// Close the taken branch with a jump past the else block.
    fn cond_else(&mut self) -> Result<()> {
        let idx = self
            .pending
            .pop()
            .ok_or_else(|| self.fail("`}{` without `?{`"))?;
        let skip = self.emit(
            IrOpcode::Jcc,
            IrArg::constant(1, 1),
            IrArg::none(),
            IrArg::label(0, 0),
        );
        self.out[idx].args[2] = IrArg::label(self.addr, self.seq);
        self.pending.push(skip);
        Ok(())
    }
}

pub(super) fn mask_for(size: u16) -> u64 {
    if size >= 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

fn binop_opcode(token: &str) -> Option<IrOpcode> {
    Some(match token {
        "+" => IrOpcode::Add,
        "-" => IrOpcode::Sub,
        "*" => IrOpcode::Mul,
        "/" => IrOpcode::Div,
        "%" => IrOpcode::Mod,
        "&" => IrOpcode::And,
        "|" => IrOpcode::Or,
        "^" => IrOpcode::Xor,
        "<<" => IrOpcode::Shl,
        ">>" => IrOpcode::Shr,
        _ => return None,
    })
}

/// `[]` or `[n]` with n in 1, 2, 4, 8. The inner `None` means word size.
fn load_width(token: &str) -> Option<Option<u16>> {
    match token {
        "[]" => Some(None),
        "[1]" => Some(Some(1)),
        "[2]" => Some(Some(2)),
        "[4]" => Some(Some(4)),
        "[8]" => Some(Some(8)),
        _ => None,
    }
}

enum MemoryOp {
    Bin(IrOpcode),
    Step(IrOpcode),
}

/// `op=[n]` forms such as `+=[4]` or `++=[]`.
fn memory_compound(token: &str) -> Option<(MemoryOp, Option<u16>)> {
    let bracket = token.find("=[")?;
    let (op, rest) = token.split_at(bracket);
    let width = load_width(&rest[1..])?;
    let op = match op {
        "++" => MemoryOp::Step(IrOpcode::Add),
        "--" => MemoryOp::Step(IrOpcode::Sub),
        "+" | "-" | "*" | "&" | "|" | "^" => MemoryOp::Bin(binop_opcode(op)?),
        _ => return None,
    };
    Some((op, width))
}
