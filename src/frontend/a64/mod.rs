//! A64 front-end: decode + lift one basic block.
//!
//! Same two-tier shape as [`crate::frontend::a32`] (coarse bitmask
//! classification in [`decode`], one-function-per-instruction visitors in
//! [`visit`]), trimmed to a representative subset: `NOP`, `MOVZ` (64-bit),
//! `ADD`/`SUB` (64-bit immediate, non-flag-setting), and `B`/`BL`.
//! `LocationDescriptor`, `JitState`, the optimizer's pass list, and the
//! backend's `Emitter` trait are all already architecture-generic, so this
//! subset is additive: nothing upstream or downstream needed to change to
//! accommodate it. Indirect branches (`RET`/`BR`/`BLR`) are out of scope
//! for this subset — A64's `pc` is a dedicated `A64JitState` field rather
//! than one of the 31 indexed GPRs, so writing it from a register value
//! has no existing codegen path to build on; encountering one falls back
//! to the interpreter like any other undecoded instruction.

pub mod decode;
pub mod visit;

use crate::error::{DecodeError, TranslateError};
use crate::external::MemoryCallbacks;
use crate::frontend::TranslateOptions;
use crate::ir::block::Terminal;
use crate::ir::emitter::IREmitter;
use crate::ir::Block;
use crate::loc::LocationDescriptor;

use self::decode::A64Inst;
use self::visit::Flow;

pub fn translate_block(
    start: LocationDescriptor,
    mem: &dyn MemoryCallbacks,
    options: &TranslateOptions,
) -> Result<Block, TranslateError> {
    let mut emitter = IREmitter::new(start);
    let mut cur = start;
    let mut count = 0usize;

    loop {
        if count >= options.max_block_instructions {
            emitter.set_terminal(Terminal::LinkBlock(cur));
            break;
        }

        let pc = cur.pc();
        let word = mem
            .fetch_instruction(pc)
            .map_err(|_| TranslateError::Decode(DecodeError::Truncated { pc }))?;
        emitter.set_guest_op(word);

        let flow = match A64Inst::decode(word) {
            A64Inst::Nop => visit::nop(&mut emitter, cur, word),
            A64Inst::MovzXd => visit::movz_xd(&mut emitter, cur, word),
            A64Inst::AddImm => visit::add_imm(&mut emitter, cur, word),
            A64Inst::SubImm => visit::sub_imm(&mut emitter, cur, word),
            A64Inst::B => visit::b(&mut emitter, cur, word),
            A64Inst::Bl => visit::bl(&mut emitter, cur, word),
            A64Inst::Undefined => {
                return Err(TranslateError::Decode(DecodeError::Unallocated { pc, word }));
            }
        };
        count += 1;

        match flow {
            Flow::Continue(next) => cur = next,
            Flow::Terminated => break,
        }
    }

    Ok(emitter.finish(cur, count as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeMem {
        words: RefCell<HashMap<u64, u32>>,
    }

    impl FakeMem {
        fn new(words: &[(u64, u32)]) -> Self {
            FakeMem { words: RefCell::new(words.iter().copied().collect()) }
        }
    }

    impl MemoryCallbacks for FakeMem {
        fn read8(&self, _vaddr: u64) -> Result<u8, MemoryError> {
            unimplemented!()
        }
        fn read16(&self, _vaddr: u64) -> Result<u16, MemoryError> {
            unimplemented!()
        }
        fn read32(&self, _vaddr: u64) -> Result<u32, MemoryError> {
            unimplemented!()
        }
        fn read64(&self, _vaddr: u64) -> Result<u64, MemoryError> {
            unimplemented!()
        }
        fn read128(&self, _vaddr: u64) -> Result<u128, MemoryError> {
            unimplemented!()
        }
        fn write8(&mut self, _vaddr: u64, _value: u8) -> Result<(), MemoryError> {
            unimplemented!()
        }
        fn write16(&mut self, _vaddr: u64, _value: u16) -> Result<(), MemoryError> {
            unimplemented!()
        }
        fn write32(&mut self, _vaddr: u64, _value: u32) -> Result<(), MemoryError> {
            unimplemented!()
        }
        fn write64(&mut self, _vaddr: u64, _value: u64) -> Result<(), MemoryError> {
            unimplemented!()
        }
        fn write128(&mut self, _vaddr: u64, _value: u128) -> Result<(), MemoryError> {
            unimplemented!()
        }
        fn fetch_instruction(&self, vaddr: u64) -> Result<u32, MemoryError> {
            self.words.borrow().get(&vaddr).copied().ok_or(MemoryError::OutOfBounds { addr: vaddr, len: 4 })
        }
    }

    fn a64_loc(pc: u64) -> LocationDescriptor {
        LocationDescriptor::a64(pc, 0, false)
    }

    #[test]
    fn lifts_movz_then_add_then_b_self() {
        // movz x0, #5
        let movz: u32 = 0xd280_00a0;
        // add x0, x0, #1
        let add: u32 = 0x9100_0400;
        // b . (branch to self, imm26=0)
        let b: u32 = 0x1400_0000;
        let mem = FakeMem::new(&[(0x1000, movz), (0x1004, add), (0x1008, b)]);
        let block = translate_block(a64_loc(0x1000), &mem, &TranslateOptions::default()).unwrap();
        assert!(block.insts.len() >= 2);
        assert!(matches!(block.terminal, Terminal::LinkBlock(_)));
    }

    #[test]
    fn lifts_bl_forward() {
        // bl #16 (imm26=4, target = pc+16)
        let bl: u32 = 0x9400_0004;
        let mem = FakeMem::new(&[(0x2000, bl)]);
        let block = translate_block(a64_loc(0x2000), &mem, &TranslateOptions::default()).unwrap();
        match block.terminal {
            Terminal::LinkBlock(target) => assert_eq!(target.pc(), 0x2010),
            other => panic!("expected LinkBlock terminal, got {other:?}"),
        }
    }

    #[test]
    fn undefined_encoding_errors() {
        let mem = FakeMem::new(&[(0x3000, 0xffff_ffffu32)]);
        let err = translate_block(a64_loc(0x3000), &mem, &TranslateOptions::default()).unwrap_err();
        assert!(matches!(err, TranslateError::Decode(DecodeError::Unallocated { .. })));
    }
}
