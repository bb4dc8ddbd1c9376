//! Frame variables recovered from semantic expressions.
//!
//! Decoders that do not tag stack effects still describe frame accesses in
//! their expressions, e.g. `0x8,ebp,+,[4]` or `eax,0x4,ebp,-,=[4]`. The
//! offset literal right before `,<reg>,<sign>` names the slot.

use crate::core::function::Function;
use crate::core::op::Op;
use crate::core::register::parse_number;
use crate::core::variable::VariableKind;

/// Offset literal preceding `,<reg>,<sign>` in `expr`.
fn slot_offset(expr: &str, reg: &str, sign: char) -> Option<u64> {
    let needle = format!(",{},{}", reg, sign);
    let end = expr.find(&needle)?;
    let token = expr[..end].rsplit(',').next()?;
    if !token.starts_with("0x") {
        return None;
    }
    parse_number(token)
}

/// Signed frame delta for `off`; offsets that do not fit an `i64` name no slot.
fn delta(off: u64, negative: bool) -> Option<i64> {
    let off = i64::try_from(off).ok()?;
    if negative {
        off.checked_neg()
    } else {
        Some(off)
    }
}

/// Record the frame slots `op` touches through `bp` and `sp`.
pub fn extract_frame_vars(fcn: &mut Function, op: &Op, bp: Option<&str>, sp: Option<&str>) {
    if op.semantics.is_empty() {
        return;
    }
    let expr = op.semantics.as_str();
    let slot = |reg: &str, sign: char| {
        slot_offset(expr, reg, sign).and_then(|off| delta(off, sign == '-'))
    };
    if let Some(bp) = bp {
        if let Some(d) = slot(bp, '+') {
            fcn.record_var(VariableKind::Argument, d, false, op.address);
        }
        if let Some(d) = slot(bp, '-') {
            fcn.record_var(VariableKind::Local, d, true, op.address);
        }
    }
    if let Some(sp) = sp {
        if let Some(d) = slot(sp, '+') {
            fcn.record_var(VariableKind::StackArgument, d, false, op.address);
        }
    }
}
