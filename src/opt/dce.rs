//! Pass 5: `DeadCodeElimination`, per spec.md §4.3.5 and invariant 4 in §8:
//! "removes an Inst iff it has zero uses and `has_side_effect(opcode) ==
//! false`."
//!
//! Dead instructions are converted in place to `Identity` over a throwaway
//! immediate rather than physically removed from `Block::insts`, since
//! every `InstRef` in this crate is a plain index into that vector
//! (spec.md §9's "compact indices into a per-compile arena") and removing
//! an element would invalidate every later index. [`crate::backend::x64::
//! X64Emitter`] already treats `Identity` as a pure no-op, so a dead
//! instruction costs nothing at emission time either way.
//!
//! No teacher equivalent beyond `opt::BasicBlock::prune_dead_vars` (`src/
//! opt.rs`), which walks backwards marking live variables on a flat
//! instruction vector for the same reason; this iterates to a fixed point
//! instead, since eliminating one instruction can zero out another's use
//! count in turn.

use crate::ir::block::Block;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{Immediate, Value};

pub fn run(block: &mut Block) {
    loop {
        let mut changed = false;
        for inst in &mut block.insts {
            if inst.use_count == 0 && inst.opcode != Opcode::Identity && !inst.has_side_effect() {
                inst.opcode = Opcode::Identity;
                inst.args = vec![Value::Imm(Immediate::new(Type::Opaque, 0))];
                changed = true;
            }
        }
        if !changed {
            break;
        }
        block.recount_uses();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{Fpscr, Psr};
    use crate::ir::emitter::IREmitter;
    use crate::loc::LocationDescriptor;

    #[test]
    fn removes_an_unused_pure_op() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let a = e.imm32(1);
        let b = e.imm32(2);
        let _unused = e.add32(a, b);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        block.recount_uses();
        run(&mut block);
        assert!(block.insts.iter().all(|i| i.opcode == Opcode::Identity));
    }

    #[test]
    fn keeps_a_side_effecting_op_even_when_unused() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let v = e.imm32(5);
        e.set_reg_a32(0, v);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        block.recount_uses();
        run(&mut block);
        assert!(block.insts.iter().any(|i| i.opcode == Opcode::SetRegisterA32));
    }

    #[test]
    fn cascades_through_a_chain_of_dead_values() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let a = e.imm32(1);
        let b = e.imm32(2);
        let sum = e.add32(a, b).result;
        let c = e.imm32(3);
        let _unused = e.add32(sum, c);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        block.recount_uses();
        run(&mut block);
        assert!(block.insts.iter().all(|i| i.opcode == Opcode::Identity));
    }
}
