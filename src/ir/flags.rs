//! Lazy synthesis of flag pseudo-variables (`$z`, `$c31`, `$o`, ...).
//!
//! Flags are computed from the session's remembered pre-image (`old`),
//! post-image (`cur`) and width of the last mutated value.

use crate::core::register::parse_number;
use crate::error::Result;

use super::instruction::{IrArg, IrOpcode};
use super::session::{mask_for, TranslatorSession};

impl<'r> TranslatorSession<'r> {
    /// Emit the instructions computing flag `name` and return the result.
    pub(super) fn resolve_flag(&mut self, name: &str) -> Result<IrArg> {
        let flag = name.strip_prefix('$').unwrap_or(name);
        let mut chars = flag.chars();
        let head = chars.next();
        let tail = chars.as_str();
        match head {
            Some('r') if tail.is_empty() => {
                Ok(IrArg::constant(u64::from(self.bits() / 8), self.bits() as u16))
            }
            Some('z') if tail.is_empty() => {
                let (_, cur, width) = self.flag_inputs(name)?;
                let dst = self.fresh_temp(1);
                self.emit(IrOpcode::Eq, cur, IrArg::constant(0, width), dst.clone());
                Ok(dst)
            }
            Some('c') => {
                let bit = self.flag_bit(name, tail)?;
                self.carry(name, bit)
            }
            Some('b') => {
                let bit = self.flag_bit(name, tail)?;
                self.borrow(name, bit)
            }
            Some('o') if tail.is_empty() => self.overflow(name),
            Some('p') if tail.is_empty() => self.parity(name),
            Some('s') if tail.is_empty() => self.sign(name),
            _ => Err(self.fail(format!("unknown flag `{}`", name))),
        }
    }

    fn flag_inputs(&self, name: &str) -> Result<(IrArg, IrArg, u16)> {
        match (&self.flags.old, &self.flags.cur) {
            (Some(old), Some(cur)) => Ok((old.clone(), cur.clone(), self.flags.width)),
            _ => Err(self.fail(format!("flag `{}` used before any assignment", name))),
        }
    }

    fn flag_bit(&self, name: &str, tail: &str) -> Result<u16> {
        parse_number(tail)
            .filter(|b| *b < 64)
            .map(|b| b as u16)
            .ok_or_else(|| self.fail(format!("bad bit index in `{}`", name)))
    }

    /// Masked `(old, cur)` pair over bits `0..=bit`.
    fn masked(&mut self, name: &str, bit: u16) -> Result<(IrArg, IrArg)> {
        let (old, cur, _) = self.flag_inputs(name)?;
        let mask = IrArg::constant(mask_for(bit + 1), old.size.max(cur.size));
        let old_m = self.binop(IrOpcode::And, old, mask.clone());
        let cur_m = self.binop(IrOpcode::And, cur, mask);
        Ok((old_m, cur_m))
    }

    /// Carry out of `bit`: the masked result wrapped below the masked input.
    fn carry(&mut self, name: &str, bit: u16) -> Result<IrArg> {
        let (old_m, cur_m) = self.masked(name, bit)?;
        Ok(self.binop(IrOpcode::Lt, cur_m, old_m))
    }

    /// Borrow into `bit`: looks at bits below it.
    fn borrow(&mut self, name: &str, bit: u16) -> Result<IrArg> {
        let below = if bit == 0 { 63 } else { bit - 1 };
        let (old_m, cur_m) = self.masked(name, below)?;
        Ok(self.binop(IrOpcode::Lt, old_m, cur_m))
    }

    fn overflow(&mut self, name: &str) -> Result<IrArg> {
        let (_, _, width) = self.flag_inputs(name)?;
        if width < 2 {
            return Ok(IrArg::constant(0, 1));
        }
        let b = self.borrow(name, width)?;
        let c = self.carry(name, width - 2)?;
        Ok(self.binop(IrOpcode::Xor, b, c))
    }

    /// Even parity of the low byte of the result.
    fn parity(&mut self, name: &str) -> Result<IrArg> {
        let (_, cur, _) = self.flag_inputs(name)?;
        let size = cur.size;
        let low = self.binop(IrOpcode::And, cur, IrArg::constant(0xff, size));
        let mut acc = low.clone();
        for shift in 1..8u64 {
            let bit = self.binop(IrOpcode::Shr, low.clone(), IrArg::constant(shift, size));
            acc = self.binop(IrOpcode::Xor, acc, bit);
        }
        let odd = self.binop(IrOpcode::And, acc, IrArg::constant(1, size));
        let size = odd.size;
        Ok(self.unop(IrOpcode::Not, odd, size))
    }

    fn sign(&mut self, name: &str) -> Result<IrArg> {
        let (_, cur, width) = self.flag_inputs(name)?;
        if width == 0 {
            return Ok(IrArg::constant(0, 1));
        }
        let size = cur.size;
        let top = width - 1;
        let bit = 1u64
            .checked_shl(u32::from(top))
            .ok_or_else(|| self.fail(format!("`{}` on a {}-bit value", name, width)))?;
        let masked = self.binop(IrOpcode::And, cur, IrArg::constant(bit, size));
        Ok(self.binop(IrOpcode::Shr, masked, IrArg::constant(u64::from(top), size)))
    }
}
