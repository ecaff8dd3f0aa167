//! Pass 7: `VerificationPass`, debug-only per spec.md §4.3 ("compiled out
//! of release builds; a failed check is a bug in an earlier pass, not in
//! guest code").
//!
//! Re-checks the invariants a malformed optimizer pass could have broken:
//! every instruction's arguments still type-check against its opcode's
//! signature (spec.md §3, "types are checked at construction" — re-checked
//! here since a pass rewrites `args` directly, bypassing the constructor),
//! every `InstRef` an instruction or the terminal names points at an index
//! that actually exists in the block, and every pseudo-op (`GetCarryFromOp`
//! / `GetOverflowFromOp` / `GetNZCVFromOp`) still names a producer that
//! either still produces flags or has been folded to a plain value.
//!
//! No teacher equivalent — the teacher has no release/debug split for its
//! optimizer. Grounded on spec.md §4.3's "VerificationPass (debug only)"
//! line item and §8's confluence/idempotence invariants.

use crate::ir::block::{Block, Terminal};
use crate::ir::opcode::Opcode;
use crate::ir::value::{InstRef, Value};

#[derive(Debug, PartialEq, Eq)]
pub struct VerificationError(pub String);

fn check_inst_ref(block: &Block, r: InstRef, context: &str) -> Result<(), VerificationError> {
    if (r.0 as usize) >= block.insts.len() {
        return Err(VerificationError(format!(
            "{context} references out-of-range InstRef({})",
            r.0
        )));
    }
    Ok(())
}

fn check_value(block: &Block, v: &Value, context: &str) -> Result<(), VerificationError> {
    match v {
        Value::InstRef(r) => check_inst_ref(block, *r, context),
        Value::Table(items) => {
            for item in items {
                check_value(block, item, context)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_terminal(block: &Block, t: &Terminal) -> Result<(), VerificationError> {
    match t {
        Terminal::CheckBit { bit, then, otherwise } => {
            check_inst_ref(block, *bit, "terminal CheckBit")?;
            check_terminal(block, then)?;
            check_terminal(block, otherwise)
        }
        Terminal::If { then, otherwise, .. } => {
            check_terminal(block, then)?;
            check_terminal(block, otherwise)
        }
        Terminal::PushRSB { next, .. }
        | Terminal::PopRSBHint(next)
        | Terminal::FastDispatchHint(next)
        | Terminal::CheckHalt(next) => check_terminal(block, next),
        Terminal::Interpret(_)
        | Terminal::ReturnToDispatch
        | Terminal::LinkBlock(_)
        | Terminal::LinkBlockFast(_) => Ok(()),
    }
}

/// Runs every check, short-circuiting on the first failure. Intended to be
/// invoked only under `#[cfg(debug_assertions)]` by [`super::run_pipeline`].
pub fn run(block: &Block) -> Result<(), VerificationError> {
    for (i, inst) in block.insts.iter().enumerate() {
        let context = format!("inst[{i}] ({:?})", inst.opcode);

        if let Err(e) = inst.verify_types() {
            return Err(VerificationError(format!("{context}: {e}")));
        }

        for arg in &inst.args {
            check_value(block, arg, &context)?;
        }

        if inst.opcode.is_pseudo_op() {
            let producer = inst.args.first().and_then(Value::as_inst_ref).ok_or_else(|| {
                VerificationError(format!("{context}: pseudo-op missing a producer arg"))
            })?;
            let producer_opcode = block.inst(producer).opcode;
            if !producer_opcode.produces_flags() && producer_opcode != Opcode::Identity {
                return Err(VerificationError(format!(
                    "{context}: producer inst[{}] ({:?}) neither produces flags nor was folded",
                    producer.0, producer_opcode
                )));
            }
        }
    }

    check_terminal(block, &block.terminal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{Fpscr, Psr};
    use crate::ir::emitter::IREmitter;
    use crate::loc::LocationDescriptor;

    #[test]
    fn a_freshly_emitted_block_passes() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let a = e.imm32(1);
        let b = e.imm32(2);
        let sum = e.add32(a, b).result;
        e.set_reg_a32(0, sum);
        let block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        assert_eq!(run(&block), Ok(()));
    }

    #[test]
    fn catches_a_dangling_inst_ref() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let a = e.imm32(1);
        e.set_reg_a32(0, a);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        block.insts[0].args[1] = Value::InstRef(InstRef(99));
        assert!(run(&block).is_err());
    }
}
