//! Semantic expression to three-address IR translation.
//!
//! Decoded ops carry their register and memory effects as a postfix
//! expression (`0x8,ebp,+,[4],eax,=`). The translator runs that expression
//! over a virtual operand stack and emits REIL-style instructions with
//! fresh temporaries for every intermediate value.

mod flags;
pub mod instruction;
pub mod session;

pub use instruction::{ArgKind, IrArg, IrInstruction, IrOpcode};
pub use session::{FlagState, TranslatorSession};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::op::Op;
use crate::error::Result;

/// What to do with an op whose semantics fail to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Drop the op and keep going
    #[default]
    Skip,
    /// Emit a single `UNK` instruction in its place
    Placeholder,
    /// Stop and return the error
    Abort,
}

/// Translate a run of ops in order, sharing one session.
pub fn translate_ops(
    session: &mut TranslatorSession<'_>,
    ops: &[Op],
    policy: FailurePolicy,
) -> Result<Vec<IrInstruction>> {
    let mut out = Vec::new();
    for op in ops {
        match session.translate(op) {
            Ok(ir) => out.extend(ir),
            Err(e) => match policy {
                FailurePolicy::Skip => {
                    warn!(addr = format!("{:#x}", op.address), error = %e, "skipping op");
                }
                FailurePolicy::Placeholder => {
                    debug!(addr = format!("{:#x}", op.address), error = %e, "placeholder");
                    out.push(IrInstruction::unknown(op.address));
                }
                FailurePolicy::Abort => return Err(e),
            },
        }
    }
    Ok(out)
}
