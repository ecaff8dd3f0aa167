//! Per-instruction visitors: one function per [`super::decode::ArmInst`] /
//! [`super::decode::ThumbInst`] variant, each pushing [`IREmitter`] ops for
//! that instruction's semantics and returning how the block should continue.
//!
//! Grounded in the teacher's `lift::arm::{dataproc,branch,loadstore}`
//! visitors (same one-function-per-instruction shape, same
//! "compute operand2, emit ALU op, conditionally write flags" structure),
//! generalized to push through [`IREmitter`] instead of a flat
//! `Vec<Instruction>`.

use crate::guest::Cond;
use crate::ir::block::Terminal;
use crate::ir::emitter::IREmitter;
use crate::ir::value::{AccType, Value};
use crate::ir::Type;
use crate::loc::LocationDescriptor;

/// What a visitor wants the translator loop to do next.
pub enum Flow {
    /// Keep decoding guest instructions after `next`.
    Continue(LocationDescriptor),
    /// The visitor has set a terminal; stop decoding this block.
    Terminated,
}

fn cond_of(opcd: u32) -> Cond {
    Cond::from(opcd >> 28)
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Wraps `taken`/`not_taken` in a conditional terminal unless `cond` is
/// always-true, matching the teacher's `branch.rs` handling of predicated
/// branches.
fn branch_terminal(cond: Cond, taken: Terminal, not_taken: Terminal) -> Terminal {
    if cond == Cond::AL {
        taken
    } else {
        Terminal::If { cond, then: Box::new(taken), otherwise: Box::new(not_taken) }
    }
}

// -- ARM (A32) data processing -----------------------------------------------

pub fn mov_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let rd = (opcd >> 12) & 0xf;
    let s = (opcd >> 20) & 1 != 0;
    let (imm, _) = decode_shifter_imm(opcd);
    let v = e.imm32(imm);
    e.set_reg_a32(rd as u8, v.clone());
    if s {
        let z = e.is_zero32(v.clone());
        e.set_zflag(z);
        let n = e.is_negative32(v);
        e.set_nflag(n);
    }
    Flow::Continue(pc.advance_a32(4))
}

pub fn mov_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let rd = (opcd >> 12) & 0xf;
    let rm = opcd & 0xf;
    let s = (opcd >> 20) & 1 != 0;
    let v = e.get_reg_a32(rm as u8);
    e.set_reg_a32(rd as u8, v.clone());
    if s {
        let z = e.is_zero32(v.clone());
        e.set_zflag(z);
        let n = e.is_negative32(v);
        e.set_nflag(n);
    }
    Flow::Continue(pc.advance_a32(4))
}

pub fn add_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_imm(e, opcd, |e, a, b| e.add32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn add_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_reg(e, opcd, |e, a, b| e.add32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn sub_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_imm(e, opcd, |e, a, b| e.sub32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn sub_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_reg(e, opcd, |e, a, b| e.sub32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn and_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_reg_logical(e, opcd, |e, a, b| e.and32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn orr_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_reg_logical(e, opcd, |e, a, b| e.or32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn eor_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    dataproc_reg_logical(e, opcd, |e, a, b| e.eor32(a, b));
    Flow::Continue(pc.advance_a32(4))
}

pub fn cmp_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let rn = (opcd >> 16) & 0xf;
    let (imm, _) = decode_shifter_imm(opcd);
    let a = e.get_reg_a32(rn as u8);
    let b = e.imm32(imm);
    let r = e.sub32(a, b);
    let z = e.is_zero32(r.result.clone());
    e.set_zflag(z);
    let n = e.is_negative32(r.result);
    e.set_nflag(n);
    e.set_cflag(r.carry);
    e.set_vflag(r.overflow);
    Flow::Continue(pc.advance_a32(4))
}

pub fn cmp_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let rn = (opcd >> 16) & 0xf;
    let rm = opcd & 0xf;
    let a = e.get_reg_a32(rn as u8);
    let b = e.get_reg_a32(rm as u8);
    let r = e.sub32(a, b);
    let z = e.is_zero32(r.result.clone());
    e.set_zflag(z);
    let n = e.is_negative32(r.result);
    e.set_nflag(n);
    e.set_cflag(r.carry);
    e.set_vflag(r.overflow);
    Flow::Continue(pc.advance_a32(4))
}

/// `operand2` for the immediate data-processing forms: an 8-bit immediate
/// rotated right by twice the 4-bit rotate field. Returns `(value,
/// carry_out)`; carry_out is only meaningful when the rotate is nonzero.
fn decode_shifter_imm(opcd: u32) -> (u32, bool) {
    let rotate = (opcd >> 8) & 0xf;
    let imm8 = opcd & 0xff;
    let amount = rotate * 2;
    let value = imm8.rotate_right(amount);
    let carry = if amount == 0 { false } else { value & 0x8000_0000 != 0 };
    (value, carry)
}

fn dataproc_imm(e: &mut IREmitter, opcd: u32, op: impl Fn(&mut IREmitter, Value, Value) -> crate::ir::emitter::FlagResult) {
    let rd = (opcd >> 12) & 0xf;
    let rn = (opcd >> 16) & 0xf;
    let s = (opcd >> 20) & 1 != 0;
    let (imm, _) = decode_shifter_imm(opcd);
    let a = e.get_reg_a32(rn as u8);
    let b = e.imm32(imm);
    let r = op(e, a, b);
    e.set_reg_a32(rd as u8, r.result.clone());
    if s {
        let z = e.is_zero32(r.result.clone());
        e.set_zflag(z);
        let n = e.is_negative32(r.result);
        e.set_nflag(n);
        e.set_cflag(r.carry);
        e.set_vflag(r.overflow);
    }
}

fn dataproc_reg(e: &mut IREmitter, opcd: u32, op: impl Fn(&mut IREmitter, Value, Value) -> crate::ir::emitter::FlagResult) {
    let rd = (opcd >> 12) & 0xf;
    let rn = (opcd >> 16) & 0xf;
    let rm = opcd & 0xf;
    let s = (opcd >> 20) & 1 != 0;
    let a = e.get_reg_a32(rn as u8);
    let b = e.get_reg_a32(rm as u8);
    let r = op(e, a, b);
    e.set_reg_a32(rd as u8, r.result.clone());
    if s {
        let z = e.is_zero32(r.result.clone());
        e.set_zflag(z);
        let n = e.is_negative32(r.result);
        e.set_nflag(n);
        e.set_cflag(r.carry);
        e.set_vflag(r.overflow);
    }
}

fn dataproc_reg_logical(e: &mut IREmitter, opcd: u32, op: impl Fn(&mut IREmitter, Value, Value) -> Value) {
    let rd = (opcd >> 12) & 0xf;
    let rn = (opcd >> 16) & 0xf;
    let rm = opcd & 0xf;
    let s = (opcd >> 20) & 1 != 0;
    let a = e.get_reg_a32(rn as u8);
    let b = e.get_reg_a32(rm as u8);
    let r = op(e, a, b);
    e.set_reg_a32(rd as u8, r.clone());
    if s {
        let z = e.is_zero32(r.clone());
        e.set_zflag(z);
        let n = e.is_negative32(r);
        e.set_nflag(n);
    }
}

// -- ARM (A32) load/store -----------------------------------------------------

pub fn ldr_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let (base_addr, rd) = amode(e, opcd);
    let v = e.read_memory(Type::U32, base_addr, AccType::Normal);
    e.set_reg_a32(rd, v);
    Flow::Continue(pc.advance_a32(4))
}

pub fn str_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let (base_addr, rd) = amode(e, opcd);
    let v = e.get_reg_a32(rd);
    e.write_memory(base_addr, v, Type::U32, AccType::Normal);
    Flow::Continue(pc.advance_a32(4))
}

/// Offset addressing mode shared by `LDR`/`STR` (immediate): `[Rn, #+/-imm12]`.
/// Pre/post-indexed writeback is out of scope for this representative subset,
/// matching spec.md §1's decoder Non-goal.
fn amode(e: &mut IREmitter, opcd: u32) -> (Value, u8) {
    let rd = ((opcd >> 12) & 0xf) as u8;
    let rn = (opcd >> 16) & 0xf;
    let u = (opcd >> 23) & 1 != 0;
    let imm12 = opcd & 0xfff;
    let base = e.get_reg_a32(rn as u8);
    let offset = e.imm32(imm12);
    let addr = if u { e.add32(base, offset).result } else { e.sub32(base, offset).result };
    (addr, rd)
}

// -- ARM (A32) branches --------------------------------------------------------

pub fn b(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let cond = cond_of(opcd);
    let simm24 = sign_extend(opcd & 0x00ff_ffff, 24);
    let target_pc = (pc.pc() as i64 + 8 + (simm24 as i64) * 4) as u32;
    let target = pc.with_pc32(target_pc);
    let fallthrough = pc.advance_a32(4);
    e.set_terminal(branch_terminal(cond, Terminal::LinkBlock(target), Terminal::LinkBlock(fallthrough)));
    Flow::Terminated
}

pub fn bl_imm(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let cond = cond_of(opcd);
    let simm24 = sign_extend(opcd & 0x00ff_ffff, 24);
    let target_pc = (pc.pc() as i64 + 8 + (simm24 as i64) * 4) as u32;
    let target = pc.with_pc32(target_pc);
    let return_to = pc.advance_a32(4);
    let lr = e.imm32(return_to.pc() as u32);
    e.set_reg_a32(14, lr);
    let taken = Terminal::PushRSB { return_to, next: Box::new(Terminal::LinkBlock(target)) };
    e.set_terminal(branch_terminal(cond, taken, Terminal::LinkBlock(return_to)));
    Flow::Terminated
}

pub fn blx_reg(e: &mut IREmitter, pc: LocationDescriptor, opcd: u32) -> Flow {
    let rm = opcd & 0xf;
    let return_to = pc.advance_a32(4);
    let lr = e.imm32(return_to.pc() as u32);
    e.set_reg_a32(14, lr);
    let target = e.get_reg_a32(rm as u8);
    e.set_reg_a32(15, target);
    e.terminal_check_halt(Terminal::ReturnToDispatch);
    Flow::Terminated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_shifter_imm_rotates() {
        // #4, rotate 0.
        assert_eq!(decode_shifter_imm(0x0000_0004), (4, false));
    }

    #[test]
    fn sign_extend_handles_negative_offsets() {
        assert_eq!(sign_extend(0x00ff_ffff, 24), -1);
        assert_eq!(sign_extend(0x0000_0001, 24), 1);
    }
}
