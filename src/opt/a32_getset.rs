//! Pass 2: `A32GetSetElimination`, per spec.md §4.3.2.
//!
//! Forwards the latest `SetRegister`/`SetExtendedRegister`/flag-setter
//! value to subsequent `GetRegister`/flag-reader uses within the same
//! block, and elides an earlier store made dead by a later store to the
//! same location. Kept arch-specific (A32 only) per spec.md's framing of
//! this pass as "(arch-specific)" — ungrounded in any A64 equivalent this
//! pack's teacher or original source name, per SPEC_FULL.md §13.
//!
//! Grounded on the teacher's `opt::GuestRegGraph`/`GuestRegInterval`
//! (`src/opt.rs`), which tracks guest-register liveness across a block for
//! the same purpose; reshaped here into a forward single pass over the
//! richer `ir::Block` model instead of an interval graph.

use std::collections::HashMap;

use crate::ir::block::Block;
use crate::ir::inst::Inst;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{Immediate, RegRef, Value};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Reg(RegRef),
    CFlag,
    ZFlag,
    NFlag,
    VFlag,
    Nzcv,
}

/// Side-effecting ops that must not be reordered past, per spec.md §4.3.2:
/// "Preserves observable order at: any call-out (SVC, memory op, exception
/// raise)". Register/flag stores are handled by the forwarding logic below,
/// not treated as a barrier here.
fn is_barrier(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        CallSupervisor
            | ExceptionRaised
            | WriteMemory8
            | WriteMemory16
            | WriteMemory32
            | WriteMemory64
            | WriteMemory128
            | CoprocInternalOperation
            | CoprocSendOneWord
            | CoprocSendTwoWords
            | CoprocGetOneWord
            | CoprocGetTwoWords
            | InstructionCacheOperationRaised
            | DataCacheOperationRaised
    )
}

/// Turns `inst` into a dead placeholder: [`DeadCodeElimination`](super::dce)
/// removes it on the next pass once use counts are recomputed, since
/// `Identity` carries no side effect and nothing ever references a store's
/// result by `InstRef`.
fn tombstone(inst: &mut Inst) {
    inst.opcode = Opcode::Identity;
    inst.args = vec![Value::Imm(Immediate::new(Type::Opaque, 0))];
}

pub fn run(block: &mut Block) {
    use Opcode::*;

    let mut known: HashMap<Key, Value> = HashMap::new();
    let mut last_set: HashMap<Key, usize> = HashMap::new();

    for i in 0..block.insts.len() {
        let opcode = block.insts[i].opcode;

        if is_barrier(opcode) {
            known.clear();
            last_set.clear();
            continue;
        }

        match opcode {
            GetRegisterA32 | GetExtendedRegisterA32 => {
                if let Value::Reg(r) = block.insts[i].args[0] {
                    forward(block, i, Key::Reg(r), &known);
                }
            }
            SetRegisterA32 | SetExtendedRegisterA32 => {
                if let Value::Reg(r) = block.insts[i].args[0] {
                    record_store(block, i, Key::Reg(r), &mut known, &mut last_set);
                }
            }
            GetCFlag => forward(block, i, Key::CFlag, &known),
            SetCFlag => {
                known.remove(&Key::Nzcv);
                last_set.remove(&Key::Nzcv);
                record_store(block, i, Key::CFlag, &mut known, &mut last_set);
            }
            GetZFlag => forward(block, i, Key::ZFlag, &known),
            SetZFlag => {
                known.remove(&Key::Nzcv);
                last_set.remove(&Key::Nzcv);
                record_store(block, i, Key::ZFlag, &mut known, &mut last_set);
            }
            GetNFlag => forward(block, i, Key::NFlag, &known),
            SetNFlag => {
                known.remove(&Key::Nzcv);
                last_set.remove(&Key::Nzcv);
                record_store(block, i, Key::NFlag, &mut known, &mut last_set);
            }
            GetVFlag => forward(block, i, Key::VFlag, &known),
            SetVFlag => {
                known.remove(&Key::Nzcv);
                last_set.remove(&Key::Nzcv);
                record_store(block, i, Key::VFlag, &mut known, &mut last_set);
            }
            GetNZCV => forward(block, i, Key::Nzcv, &known),
            SetNZCV => {
                for k in [Key::CFlag, Key::ZFlag, Key::NFlag, Key::VFlag] {
                    known.remove(&k);
                    last_set.remove(&k);
                }
                record_store(block, i, Key::Nzcv, &mut known, &mut last_set);
            }
            _ => {}
        }
    }

    block.recount_uses();
}

fn forward(block: &mut Block, i: usize, key: Key, known: &HashMap<Key, Value>) {
    if let Some(v) = known.get(&key) {
        let inst = &mut block.insts[i];
        inst.opcode = Opcode::Identity;
        inst.args = vec![v.clone()];
    }
}

fn record_store(
    block: &mut Block,
    i: usize,
    key: Key,
    known: &mut HashMap<Key, Value>,
    last_set: &mut HashMap<Key, usize>,
) {
    let value = block.insts[i].args.last().expect("store opcode takes a value arg").clone();
    if let Some(&prev) = last_set.get(&key) {
        tombstone(&mut block.insts[prev]);
    }
    known.insert(key, value);
    last_set.insert(key, i);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{Fpscr, Psr};
    use crate::ir::emitter::IREmitter;
    use crate::loc::LocationDescriptor;

    fn new_emitter() -> IREmitter {
        IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)))
    }

    #[test]
    fn forwards_set_to_get() {
        let mut e = new_emitter();
        let v = e.imm32(42);
        e.set_reg_a32(0, v);
        let got = e.get_reg_a32(0);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        let r = got.as_inst_ref().unwrap();
        assert_eq!(block.inst(r).opcode, Opcode::Identity);
    }

    #[test]
    fn elides_overwritten_store() {
        let mut e = new_emitter();
        let a = e.imm32(1);
        e.set_reg_a32(0, a);
        let b = e.imm32(2);
        e.set_reg_a32(0, b);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        // The first SetRegisterA32 should have been tombstoned.
        let first_set = block.insts.iter().find(|inst| inst.opcode == Opcode::SetRegisterA32);
        assert!(first_set.is_some(), "surviving store should be the second one");
        let tombstoned = block.insts.iter().filter(|inst| inst.opcode == Opcode::Identity).count();
        assert!(tombstoned >= 1);
    }

    #[test]
    fn does_not_forward_across_a_barrier() {
        let mut e = new_emitter();
        let v = e.imm32(7);
        e.set_reg_a32(0, v);
        let svc_imm = e.imm32(0x1000);
        e.call_supervisor(svc_imm);
        let got = e.get_reg_a32(0);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        let r = got.as_inst_ref().unwrap();
        assert_eq!(block.inst(r).opcode, Opcode::GetRegisterA32);
    }
}
