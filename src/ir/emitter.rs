//! [`IREmitter`]: the builder the front-end pushes instructions through.
//!
//! One method per opcode family, mirroring the teacher's `lift::alu`
//! helpers but targeting the richer `ir::Block`/`Terminal` model instead of
//! the teacher's flat `Vec<Instruction>`.

use crate::guest::Cond;
use crate::ir::block::{Block, Terminal};
use crate::ir::inst::Inst;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{AccType, Immediate, RegRef, Value};
use crate::loc::LocationDescriptor;

/// Result of an arithmetic op that also produces carry/overflow, so callers
/// don't have to manually wire up `GetCarryFromOp`/`GetOverflowFromOp`.
pub struct FlagResult {
    pub result: Value,
    pub carry: Value,
    pub overflow: Value,
}

/// Result of a shift op, which carries a carry-out but never overflow.
pub struct ShiftResult {
    pub result: Value,
    pub carry: Value,
}

pub struct IREmitter {
    pub block: Block,
    current_guest_op: u32,
}

impl IREmitter {
    pub fn new(entry: LocationDescriptor) -> Self {
        IREmitter { block: Block::new(entry), current_guest_op: 0 }
    }

    /// Marks the guest opcode word subsequent `push` calls should be
    /// attributed to, for diagnostics.
    pub fn set_guest_op(&mut self, op: u32) {
        self.current_guest_op = op;
    }

    fn push(&mut self, opcode: Opcode, args: Vec<Value>) -> Value {
        let inst = Inst::new(opcode, args, self.current_guest_op);
        #[cfg(debug_assertions)]
        if let Err(e) = inst.verify_types() {
            panic!("ill-typed IR instruction: {e}");
        }
        let r = self.block.push(inst);
        Value::InstRef(r)
    }

    fn pseudo(&mut self, opcode: Opcode, producer: &Value) -> Value {
        debug_assert!(
            matches!(producer, Value::InstRef(r) if self.block.inst(*r).opcode.produces_flags()),
            "{:?} pseudo-op applied to a non-flag-producing value",
            opcode
        );
        self.push(opcode, vec![producer.clone()])
    }

    // -- immediates -------------------------------------------------------

    pub fn imm1(&self, v: bool) -> Value { Value::Imm(Immediate::u1(v)) }
    pub fn imm8(&self, v: u8) -> Value { Value::Imm(Immediate::u8(v)) }
    pub fn imm16(&self, v: u16) -> Value { Value::Imm(Immediate::u16(v)) }
    pub fn imm32(&self, v: u32) -> Value { Value::Imm(Immediate::u32(v)) }
    pub fn imm64(&self, v: u64) -> Value { Value::Imm(Immediate::u64(v)) }

    // -- arithmetic / logic -------------------------------------------------

    pub fn add32(&mut self, a: Value, b: Value) -> FlagResult {
        let result = self.push(Opcode::Add32, vec![a, b]);
        let carry = self.pseudo(Opcode::GetCarryFromOp, &result);
        let overflow = self.pseudo(Opcode::GetOverflowFromOp, &result);
        FlagResult { result, carry, overflow }
    }

    pub fn sub32(&mut self, a: Value, b: Value) -> FlagResult {
        let result = self.push(Opcode::Sub32, vec![a, b]);
        let carry = self.pseudo(Opcode::GetCarryFromOp, &result);
        let overflow = self.pseudo(Opcode::GetOverflowFromOp, &result);
        FlagResult { result, carry, overflow }
    }

    /// 64-bit add, A64's non-`S` `ADD` form: no carry/overflow side channel.
    pub fn add64(&mut self, a: Value, b: Value) -> Value {
        self.push(Opcode::Add64, vec![a, b])
    }
    /// 64-bit subtract, A64's non-`S` `SUB` form.
    pub fn sub64(&mut self, a: Value, b: Value) -> Value {
        self.push(Opcode::Sub64, vec![a, b])
    }

    pub fn and32(&mut self, a: Value, b: Value) -> Value {
        self.push(Opcode::And32, vec![a, b])
    }
    pub fn or32(&mut self, a: Value, b: Value) -> Value {
        self.push(Opcode::Or32, vec![a, b])
    }
    pub fn eor32(&mut self, a: Value, b: Value) -> Value {
        self.push(Opcode::Eor32, vec![a, b])
    }
    pub fn not32(&mut self, a: Value) -> Value {
        self.push(Opcode::Not32, vec![a])
    }
    pub fn mul32(&mut self, a: Value, b: Value) -> Value {
        self.push(Opcode::Mul32, vec![a, b])
    }

    pub fn lsl32(&mut self, a: Value, shift: Value) -> ShiftResult {
        let result = self.push(Opcode::LogicalShiftLeft32, vec![a, shift]);
        let carry = self.pseudo(Opcode::GetCarryFromOp, &result);
        ShiftResult { result, carry }
    }
    pub fn lsr32(&mut self, a: Value, shift: Value) -> ShiftResult {
        let result = self.push(Opcode::LogicalShiftRight32, vec![a, shift]);
        let carry = self.pseudo(Opcode::GetCarryFromOp, &result);
        ShiftResult { result, carry }
    }
    pub fn asr32(&mut self, a: Value, shift: Value) -> ShiftResult {
        let result = self.push(Opcode::ArithmeticShiftRight32, vec![a, shift]);
        let carry = self.pseudo(Opcode::GetCarryFromOp, &result);
        ShiftResult { result, carry }
    }
    pub fn ror32(&mut self, a: Value, shift: Value) -> ShiftResult {
        let result = self.push(Opcode::RotateRight32, vec![a, shift]);
        let carry = self.pseudo(Opcode::GetCarryFromOp, &result);
        ShiftResult { result, carry }
    }

    pub fn is_zero32(&mut self, a: Value) -> Value {
        self.push(Opcode::IsZero32, vec![a])
    }
    pub fn is_negative32(&mut self, a: Value) -> Value {
        self.push(Opcode::IsNegative32, vec![a])
    }

    pub fn sign_extend_byte(&mut self, a: Value) -> Value {
        self.push(Opcode::SignExtendByteToWord, vec![a])
    }
    pub fn sign_extend_half(&mut self, a: Value) -> Value {
        self.push(Opcode::SignExtendHalfToWord, vec![a])
    }
    pub fn zero_extend_byte(&mut self, a: Value) -> Value {
        self.push(Opcode::ZeroExtendByteToWord, vec![a])
    }
    pub fn zero_extend_half(&mut self, a: Value) -> Value {
        self.push(Opcode::ZeroExtendHalfToWord, vec![a])
    }

    pub fn byte_reverse_word(&mut self, a: Value) -> Value {
        self.push(Opcode::ByteReverseWord, vec![a])
    }
    pub fn byte_reverse_half(&mut self, a: Value) -> Value {
        self.push(Opcode::ByteReverseHalf, vec![a])
    }
    pub fn byte_reverse_packed_half(&mut self, a: Value) -> Value {
        self.push(Opcode::ByteReversePackedHalf, vec![a])
    }

    pub fn least_significant_half(&mut self, a: Value) -> Value {
        self.push(Opcode::LeastSignificantHalf, vec![a])
    }
    pub fn least_significant_byte(&mut self, a: Value) -> Value {
        self.push(Opcode::LeastSignificantByte, vec![a])
    }

    // -- flags --------------------------------------------------------------

    pub fn get_cflag(&mut self) -> Value { self.push(Opcode::GetCFlag, vec![]) }
    pub fn set_cflag(&mut self, v: Value) { self.push(Opcode::SetCFlag, vec![v]); }
    pub fn get_zflag(&mut self) -> Value { self.push(Opcode::GetZFlag, vec![]) }
    pub fn set_zflag(&mut self, v: Value) { self.push(Opcode::SetZFlag, vec![v]); }
    pub fn get_nflag(&mut self) -> Value { self.push(Opcode::GetNFlag, vec![]) }
    pub fn set_nflag(&mut self, v: Value) { self.push(Opcode::SetNFlag, vec![v]); }
    pub fn get_vflag(&mut self) -> Value { self.push(Opcode::GetVFlag, vec![]) }
    pub fn set_vflag(&mut self, v: Value) { self.push(Opcode::SetVFlag, vec![v]); }

    pub fn get_nzcv(&mut self) -> Value { self.push(Opcode::GetNZCV, vec![]) }
    pub fn set_nzcv(&mut self, v: Value) { self.push(Opcode::SetNZCV, vec![v]); }
    pub fn set_nzcv_from(&mut self, producer: &Value) {
        let nzcv = self.pseudo(Opcode::GetNZCVFromOp, producer);
        self.set_nzcv(nzcv);
    }

    // -- registers ------------------------------------------------------------

    pub fn get_reg_a32(&mut self, n: u8) -> Value {
        self.push(Opcode::GetRegisterA32, vec![Value::Reg(RegRef::A32(n))])
    }
    pub fn set_reg_a32(&mut self, n: u8, v: Value) {
        self.push(Opcode::SetRegisterA32, vec![Value::Reg(RegRef::A32(n)), v]);
    }
    pub fn get_ext_reg_a32(&mut self, n: u8) -> Value {
        self.push(Opcode::GetExtendedRegisterA32, vec![Value::Reg(RegRef::A32Ext(n))])
    }
    pub fn set_ext_reg_a32(&mut self, n: u8, v: Value) {
        self.push(Opcode::SetExtendedRegisterA32, vec![Value::Reg(RegRef::A32Ext(n)), v]);
    }

    pub fn get_reg_a64(&mut self, n: u8) -> Value {
        self.push(Opcode::GetRegisterA64, vec![Value::Reg(RegRef::A64(n))])
    }
    pub fn set_reg_a64(&mut self, n: u8, v: Value) {
        self.push(Opcode::SetRegisterA64, vec![Value::Reg(RegRef::A64(n)), v]);
    }
    pub fn get_vector_a64(&mut self, n: u8) -> Value {
        self.push(Opcode::GetVectorA64, vec![Value::Reg(RegRef::A64Vec(n))])
    }
    pub fn set_vector_a64(&mut self, n: u8, v: Value) {
        self.push(Opcode::SetVectorA64, vec![Value::Reg(RegRef::A64Vec(n)), v]);
    }

    // -- memory ---------------------------------------------------------------

    pub fn read_memory(&mut self, ty: Type, addr: Value, acc: AccType) -> Value {
        let opcode = match ty {
            Type::U8 => Opcode::ReadMemory8,
            Type::U16 => Opcode::ReadMemory16,
            Type::U32 => Opcode::ReadMemory32,
            Type::U64 => Opcode::ReadMemory64,
            Type::U128 => Opcode::ReadMemory128,
            other => panic!("read_memory: unsupported type {other:?}"),
        };
        self.push(opcode, vec![addr, Value::AccType(acc)])
    }

    pub fn write_memory(&mut self, addr: Value, data: Value, ty: Type, acc: AccType) {
        let opcode = match ty {
            Type::U8 => Opcode::WriteMemory8,
            Type::U16 => Opcode::WriteMemory16,
            Type::U32 => Opcode::WriteMemory32,
            Type::U64 => Opcode::WriteMemory64,
            Type::U128 => Opcode::WriteMemory128,
            other => panic!("write_memory: unsupported type {other:?}"),
        };
        self.push(opcode, vec![addr, data, Value::AccType(acc)]);
    }

    // -- control flow side channels -------------------------------------------

    pub fn call_supervisor(&mut self, imm: Value) {
        self.push(Opcode::CallSupervisor, vec![imm]);
    }
    pub fn exception_raised(&mut self, pc: Value, exception: Value) {
        self.push(Opcode::ExceptionRaised, vec![pc, exception]);
    }

    // -- terminal setters -----------------------------------------------------

    pub fn set_terminal(&mut self, terminal: Terminal) {
        self.block.terminal = terminal;
    }

    pub fn terminal_link(&mut self, target: LocationDescriptor) {
        self.set_terminal(Terminal::LinkBlock(target));
    }

    pub fn terminal_link_fast(&mut self, target: LocationDescriptor) {
        self.set_terminal(Terminal::LinkBlockFast(target));
    }

    pub fn terminal_if(&mut self, cond: Cond, then: Terminal, otherwise: Terminal) {
        self.set_terminal(Terminal::If { cond, then: Box::new(then), otherwise: Box::new(otherwise) });
    }

    /// Wraps `inner` in a halt check, as the translator does at backward
    /// branch targets so long-running guest loops stay interruptible
    /// (spec.md §4.5 "Halt").
    pub fn terminal_check_halt(&mut self, inner: Terminal) {
        self.set_terminal(Terminal::CheckHalt(Box::new(inner)));
    }

    /// Finalizes the block: recomputes use counts and returns it.
    pub fn finish(mut self, end: LocationDescriptor, cycle_count: u32) -> Block {
        self.block.end = end;
        self.block.cycle_count = cycle_count;
        self.block.recount_uses();
        self.block
    }
}
