//! Pass 3: `A32ConstantMemoryReads`, per spec.md §4.3.3.
//!
//! "If `IsReadOnlyMemory(vaddr)` returns true for a `MemoryRead*` with a
//! constant-propagated address, replaces the read with the observed
//! immediate." Running before the general `ConstantPropagation` pass (item
//! 4 in the fixed order), this only catches reads whose address is already
//! a literal immediate at lift time — the common case for PC-relative
//! literal pool loads — not ones an arithmetic fold would still need to
//! resolve first.
//!
//! No teacher equivalent (the teacher has no constant-memory folding);
//! grounded directly on spec.md §4.3.3 and `original_source`'s
//! `IsReadOnlyMemory`/`A32ConstantMemoryReads` naming (see SPEC_FULL.md
//! §11).

use crate::error::MemoryError;
use crate::external::MemoryCallbacks;
use crate::ir::block::Block;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{Immediate, Value};

fn read_type(opcode: Opcode) -> Option<Type> {
    use Opcode::*;
    match opcode {
        ReadMemory8 => Some(Type::U8),
        ReadMemory16 => Some(Type::U16),
        ReadMemory32 => Some(Type::U32),
        ReadMemory64 => Some(Type::U64),
        ReadMemory128 => Some(Type::U128),
        _ => None,
    }
}

fn fetch(mem: &dyn MemoryCallbacks, ty: Type, vaddr: u64) -> Result<u128, MemoryError> {
    Ok(match ty {
        Type::U8 => mem.read8(vaddr)? as u128,
        Type::U16 => mem.read16(vaddr)? as u128,
        Type::U32 => mem.read32(vaddr)? as u128,
        Type::U64 => mem.read64(vaddr)? as u128,
        Type::U128 => mem.read128(vaddr)?,
        other => unreachable!("read_type never yields {other:?}"),
    })
}

pub fn run(block: &mut Block, mem: &dyn MemoryCallbacks) {
    for inst in &mut block.insts {
        let Some(ty) = read_type(inst.opcode) else { continue };
        let Value::Imm(addr) = &inst.args[0] else { continue };
        let vaddr = addr.as_u64();
        if !mem.is_read_only_memory(vaddr) {
            continue;
        }
        if let Ok(bits) = fetch(mem, ty, vaddr) {
            inst.opcode = Opcode::Identity;
            inst.args = vec![Value::Imm(Immediate::new(ty, bits))];
        }
    }
    block.recount_uses();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{Fpscr, Psr};
    use crate::ir::emitter::IREmitter;
    use crate::ir::value::AccType;
    use crate::loc::LocationDescriptor;
    use std::cell::Cell;

    struct RomStub {
        value: u32,
        reads: Cell<u32>,
    }

    impl MemoryCallbacks for RomStub {
        fn read8(&self, _vaddr: u64) -> Result<u8, MemoryError> {
            unimplemented!()
        }
        fn read16(&self, _vaddr: u64) -> Result<u16, MemoryError> {
            unimplemented!()
        }
        fn read32(&self, _vaddr: u64) -> Result<u32, MemoryError> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.value)
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
        fn fetch_instruction(&self, _vaddr: u64) -> Result<u32, MemoryError> {
            unimplemented!()
        }
        fn is_read_only_memory(&self, _vaddr: u64) -> bool {
            true
        }
    }

    #[test]
    fn folds_a_literal_pool_read() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let addr = e.imm64(0x8000);
        let got = e.read_memory(Type::U32, addr, AccType::Normal);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);

        let mem = RomStub { value: 0xCAFEBABE, reads: Cell::new(0) };
        run(&mut block, &mem);

        let r = got.as_inst_ref().unwrap();
        assert_eq!(block.inst(r).opcode, Opcode::Identity);
        assert_eq!(mem.reads.get(), 1);
    }
}
