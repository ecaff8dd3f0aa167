//! Pass 4: `ConstantPropagation`, per spec.md §4.3.4.
//!
//! "Folds IR arithmetic/logic/shift/compare/bitfield/float-convert ops whose
//! arguments are all immediates; propagates zero/identity laws (x+0, x*1,
//! x&~0, x|0, etc.)." `Add32`/`Sub32` also fold their `GetCarryFromOp`/
//! `GetOverflowFromOp`/`GetNZCVFromOp` pseudo-op consumers at the same time,
//! since deleting a flag-producing instruction out from under a pseudo-op
//! that still reads its carry/overflow would silently break codegen;
//! shift/rotate producers are left unfolded when a pseudo-op still consumes
//! them (a missed optimization, not a correctness gap — see `DESIGN.md`).
//!
//! Grounded on the teacher's constant-folding absence (the teacher never
//! folds at the IR level, only at decode time) and `original_source`'s
//! `ConstantPropagation` pass naming; the fold tables themselves are
//! straight arithmetic on the `Immediate` representation already in
//! `ir::value`.

use std::collections::HashMap;

use crate::ir::block::Block;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{Immediate, Value};

fn all_immediate(args: &[Value]) -> Option<Vec<u128>> {
    args.iter()
        .take_while(|v| !matches!(v, Value::AccType(_)))
        .map(|v| v.as_imm().map(|i| i.bits))
        .collect()
}

/// `x+0`/`x*1`/`x&~0`/`x|0`-style peepholes that don't need every operand to
/// be immediate. Restricted to opcodes with no carry/overflow pseudo-op
/// (`Add32`/`Sub32`/shifts are folded, flags and all, by the full constant
/// fold below instead).
fn try_identity_law(opcode: Opcode, args: &[Value]) -> Option<Value> {
    use Opcode::*;
    let (a, b) = (args.first()?, args.get(1)?);
    let imm = |v: &Value| v.as_imm().map(|i| i.bits);
    match opcode {
        And32 => {
            if imm(b) == Some(0xFFFF_FFFF) {
                return Some(a.clone());
            }
            if imm(a) == Some(0xFFFF_FFFF) {
                return Some(b.clone());
            }
            if imm(b) == Some(0) || imm(a) == Some(0) {
                return Some(Value::Imm(Immediate::u32(0)));
            }
            None
        }
        Or32 => {
            if imm(b) == Some(0) {
                return Some(a.clone());
            }
            if imm(a) == Some(0) {
                return Some(b.clone());
            }
            None
        }
        Eor32 => {
            if imm(b) == Some(0) {
                return Some(a.clone());
            }
            if imm(a) == Some(0) {
                return Some(b.clone());
            }
            None
        }
        Mul32 => {
            if imm(b) == Some(1) {
                return Some(a.clone());
            }
            if imm(a) == Some(1) {
                return Some(b.clone());
            }
            if imm(b) == Some(0) || imm(a) == Some(0) {
                return Some(Value::Imm(Immediate::u32(0)));
            }
            None
        }
        _ => None,
    }
}

/// `result`, `carry_out`, `overflow` for a fully-immediate `Add32`/`Sub32`.
fn add_sub(opcode: Opcode, a: u32, b: u32) -> (u32, bool, bool) {
    match opcode {
        Opcode::Add32 => {
            let wide = a as u64 + b as u64;
            let result = wide as u32;
            let carry = wide > 0xFFFF_FFFF;
            let overflow = !(a ^ b) & (a ^ result) & 0x8000_0000 != 0;
            (result, carry, overflow)
        }
        Opcode::Sub32 => {
            let result = a.wrapping_sub(b);
            let carry = a as u64 >= b as u64; // ARM convention: C = NOT borrow.
            let overflow = (a ^ b) & (a ^ result) & 0x8000_0000 != 0;
            (result, carry, overflow)
        }
        other => unreachable!("add_sub called with {other:?}"),
    }
}

fn fold_pure(opcode: Opcode, imms: &[u128], result_ty: Type) -> Option<Immediate> {
    use Opcode::*;
    let a32 = || imms[0] as u32;
    let bits = match opcode {
        And32 => a32() & imms[1] as u32,
        Or32 => a32() | imms[1] as u32,
        Eor32 => a32() ^ imms[1] as u32,
        Not32 => !a32(),
        Mul32 => a32().wrapping_mul(imms[1] as u32),
        IsZero32 => (a32() == 0) as u32,
        IsNegative32 => ((a32() as i32) < 0) as u32,
        SignExtendByteToWord => (imms[0] as i8 as i32) as u32,
        SignExtendHalfToWord => (imms[0] as i16 as i32) as u32,
        ZeroExtendByteToWord => imms[0] as u8 as u32,
        ZeroExtendHalfToWord => imms[0] as u16 as u32,
        ByteReverseWord => a32().swap_bytes(),
        ByteReverseHalf => return Some(Immediate::u16((imms[0] as u16).swap_bytes())),
        ByteReversePackedHalf => {
            let v = a32();
            (v & 0xFF00_FF00) >> 8 | (v & 0x00FF_00FF) << 8
        }
        LeastSignificantHalf => return Some(Immediate::u16(imms[0] as u16)),
        LeastSignificantByte => return Some(Immediate::u8(imms[0] as u8)),
        _ => return None,
    };
    Some(Immediate::new(result_ty, bits as u128))
}

fn fold_shift(opcode: Opcode, a: u32, amount: u32) -> u32 {
    match opcode {
        Opcode::LogicalShiftLeft32 => {
            if amount >= 32 {
                0
            } else {
                a << amount
            }
        }
        Opcode::LogicalShiftRight32 => {
            if amount >= 32 {
                0
            } else {
                a >> amount
            }
        }
        Opcode::ArithmeticShiftRight32 => {
            let amount = amount.min(31);
            ((a as i32) >> amount) as u32
        }
        Opcode::RotateRight32 => a.rotate_right(amount % 32),
        other => unreachable!("fold_shift called with {other:?}"),
    }
}

pub fn run(block: &mut Block) {
    let mut pseudo_users: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, inst) in block.insts.iter().enumerate() {
        if inst.opcode.is_pseudo_op() {
            if let Some(Value::InstRef(r)) = inst.args.first() {
                pseudo_users.entry(r.0 as usize).or_default().push(i);
            }
        }
    }

    for i in 0..block.insts.len() {
        let opcode = block.insts[i].opcode;
        if opcode.is_pseudo_op() {
            continue;
        }

        if let Some(replacement) = try_identity_law(opcode, &block.insts[i].args) {
            block.insts[i].opcode = Opcode::Identity;
            block.insts[i].args = vec![replacement];
            continue;
        }

        if !opcode.is_foldable() {
            continue;
        }
        let Some(imms) = all_immediate(&block.insts[i].args) else { continue };

        match opcode {
            Opcode::Add32 | Opcode::Sub32 => {
                let (result, carry, overflow) = add_sub(opcode, imms[0] as u32, imms[1] as u32);
                if let Some(users) = pseudo_users.get(&i).cloned() {
                    for u in users {
                        let value = match block.insts[u].opcode {
                            Opcode::GetCarryFromOp => Value::Imm(Immediate::u1(carry)),
                            Opcode::GetOverflowFromOp => Value::Imm(Immediate::u1(overflow)),
                            Opcode::GetNZCVFromOp => {
                                let n = (result >> 31) & 1 != 0;
                                let z = result == 0;
                                let nzcv = ((n as u8) << 3)
                                    | ((z as u8) << 2)
                                    | ((carry as u8) << 1)
                                    | overflow as u8;
                                Value::Imm(Immediate::new(Type::NZCVFlags, nzcv as u128))
                            }
                            _ => continue,
                        };
                        block.insts[u].opcode = Opcode::Identity;
                        block.insts[u].args = vec![value];
                    }
                }
                block.insts[i].opcode = Opcode::Identity;
                block.insts[i].args = vec![Value::Imm(Immediate::u32(result))];
            }
            Opcode::LogicalShiftLeft32
            | Opcode::LogicalShiftRight32
            | Opcode::ArithmeticShiftRight32
            | Opcode::RotateRight32 => {
                if pseudo_users.contains_key(&i) {
                    continue;
                }
                let result = fold_shift(opcode, imms[0] as u32, imms[1] as u32);
                block.insts[i].opcode = Opcode::Identity;
                block.insts[i].args = vec![Value::Imm(Immediate::u32(result))];
            }
            _ => {
                let result_ty = block.insts[i].opcode.signature().result;
                if let Some(v) = fold_pure(opcode, &imms, result_ty) {
                    block.insts[i].opcode = Opcode::Identity;
                    block.insts[i].args = vec![Value::Imm(v)];
                }
            }
        }
    }

    block.recount_uses();
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
    fn folds_add_of_two_immediates() {
        let mut e = new_emitter();
        let a = e.imm32(2);
        let b = e.imm32(2);
        let r = e.add32(a, b);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        let result_ref = r.result.as_inst_ref().unwrap();
        assert_eq!(block.inst(result_ref).opcode, Opcode::Identity);
        assert_eq!(block.inst(result_ref).args[0], Value::Imm(Immediate::u32(4)));
    }

    #[test]
    fn folds_carry_consumer_alongside_its_producer() {
        let mut e = new_emitter();
        let a = e.imm32(0xFFFF_FFFF);
        let b = e.imm32(1);
        let r = e.add32(a, b);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        let carry_ref = r.carry.as_inst_ref().unwrap();
        assert_eq!(block.inst(carry_ref).opcode, Opcode::Identity);
        assert_eq!(block.inst(carry_ref).args[0], Value::Imm(Immediate::u1(true)));
    }

    #[test]
    fn leaves_shift_unfolded_when_carry_is_consumed() {
        let mut e = new_emitter();
        let a = e.imm32(1);
        let amount = e.imm32(31);
        let r = e.lsl32(a, amount);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        let result_ref = r.result.as_inst_ref().unwrap();
        assert_eq!(block.inst(result_ref).opcode, Opcode::LogicalShiftLeft32);
    }

    #[test]
    fn applies_or_with_zero_identity_law() {
        let mut e = new_emitter();
        let reg = e.get_reg_a32(3);
        let zero = e.imm32(0);
        let r = e.or32(reg, zero);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);
        run(&mut block);
        let r = r.as_inst_ref().unwrap();
        assert_eq!(block.inst(r).opcode, Opcode::Identity);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn byte_reverse_word_is_its_own_inverse(x: u32) {
            prop_assert_eq!(x.swap_bytes().swap_bytes(), x);
        }

        #[test]
        fn rotate_right_is_reversible(x: u32, n in 0u32..32) {
            let rotated = x.rotate_right(n);
            prop_assert_eq!(rotated.rotate_left(n), x);
        }

        #[test]
        fn sign_extend_byte_then_truncate_roundtrips(b: u8) {
            let extended = (b as i8 as i32) as u32;
            prop_assert_eq!(extended as u8, b);
        }

        #[test]
        fn add_sub_fold_agrees_with_wrapping_arithmetic(a: u32, b: u32) {
            let (result, _, _) = add_sub(Opcode::Add32, a, b);
            prop_assert_eq!(result, a.wrapping_add(b));
            let (result, _, _) = add_sub(Opcode::Sub32, a, b);
            prop_assert_eq!(result, a.wrapping_sub(b));
        }
    }
}
