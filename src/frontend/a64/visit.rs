//! Per-instruction visitors for the minimal A64 subset, one function per
//! [`super::decode::A64Inst`] variant. Same "emit IR, report how to
//! continue" shape as [`crate::frontend::a32::visit`], generalized to
//! 64-bit registers and the dedicated `pc`/`x30` fields `A64JitState`
//! keeps instead of indexing them out of a 16-entry `regs` array.

use crate::ir::block::Terminal;
use crate::ir::emitter::IREmitter;
use crate::loc::LocationDescriptor;

/// What a visitor wants the translator loop to do next.
pub enum Flow {
    Continue(LocationDescriptor),
    Terminated,
}

fn sign_extend64(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

pub fn nop(e: &mut IREmitter, pc: LocationDescriptor, _word: u32) -> Flow {
    let _ = e;
    Flow::Continue(pc.advance_a64(4))
}

/// `MOVZ Xd, #imm16, LSL #(16*hw)`. Always non-flag-setting, so there's
/// nothing for this visitor to do but compute the immediate and write it.
pub fn movz_xd(e: &mut IREmitter, pc: LocationDescriptor, word: u32) -> Flow {
    let rd = word & 0x1f;
    let hw = (word >> 21) & 0b11;
    let imm16 = (word >> 5) & 0xffff;
    let value = (imm16 as u64) << (hw * 16);
    let v = e.imm64(value);
    e.set_reg_a64(rd as u8, v);
    Flow::Continue(pc.advance_a64(4))
}

fn add_sub_imm(e: &mut IREmitter, word: u32, op: impl FnOnce(&mut IREmitter, crate::ir::Value, crate::ir::Value) -> crate::ir::Value) {
    let rd = word & 0x1f;
    let rn = (word >> 5) & 0x1f;
    let imm12 = (word >> 10) & 0xfff;
    let shift = (word >> 22) & 1;
    let imm = if shift == 1 { (imm12 as u64) << 12 } else { imm12 as u64 };

    let a = e.get_reg_a64(rn as u8);
    let b = e.imm64(imm);
    let result = op(e, a, b);
    e.set_reg_a64(rd as u8, result);
}

pub fn add_imm(e: &mut IREmitter, pc: LocationDescriptor, word: u32) -> Flow {
    add_sub_imm(e, word, |e, a, b| e.add64(a, b));
    Flow::Continue(pc.advance_a64(4))
}

pub fn sub_imm(e: &mut IREmitter, pc: LocationDescriptor, word: u32) -> Flow {
    add_sub_imm(e, word, |e, a, b| e.sub64(a, b));
    Flow::Continue(pc.advance_a64(4))
}

pub fn b(e: &mut IREmitter, pc: LocationDescriptor, word: u32) -> Flow {
    let simm26 = sign_extend64((word & 0x03ff_ffff) as u64, 26);
    let target_pc = (pc.pc() as i64 + simm26 * 4) as u64;
    let target = pc.with_pc64(target_pc);
    e.set_terminal(Terminal::LinkBlock(target));
    Flow::Terminated
}

/// `BL`: links `x30` to the fall-through address, then jumps. Uses a plain
/// `LinkBlock` rather than `Terminal::PushRSB`, since the RSB codegen this
/// crate generates (`backend::x64::emitter`) is scoped to `A32JitState`'s
/// field layout; a shared RSB ring would need to be parameterised by
/// architecture before `BL` could push to it.
pub fn bl(e: &mut IREmitter, pc: LocationDescriptor, word: u32) -> Flow {
    let simm26 = sign_extend64((word & 0x03ff_ffff) as u64, 26);
    let target_pc = (pc.pc() as i64 + simm26 * 4) as u64;
    let target = pc.with_pc64(target_pc);
    let return_to = pc.advance_a64(4);
    let lr = e.imm64(return_to.pc());
    e.set_reg_a64(30, lr);
    e.set_terminal(Terminal::LinkBlock(target));
    Flow::Terminated
}
