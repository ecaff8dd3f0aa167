//! The optimizer pipeline, per spec.md §4.3: a fixed sequence of passes
//! run once per freshly-translated [`crate::ir::block::Block`], in this
//! exact order — "the order is part of the contract; a pass may assume
//! the invariants the previous pass established."
//!
//! 1. [`polyfill`] — lower host-feature-gated opcodes.
//! 2. [`a32_getset`] — forward/elide redundant register and flag stores.
//! 3. [`a32_const_mem`] — fold reads of known-constant read-only memory.
//! 4. [`const_prop`] — fold pure ops over immediate operands.
//! 5. [`dce`] — remove instructions with no uses and no side effect.
//! 6. [`identity_removal`] — rewrite away the `Identity` placeholders the
//!    passes above leave behind.
//! 7. [`verify`] — debug-only re-check of IR invariants.

pub mod a32_const_mem;
pub mod a32_getset;
pub mod const_prop;
pub mod dce;
pub mod identity_removal;
pub mod polyfill;
pub mod verify;

pub use polyfill::PolyfillOptions;
pub use verify::VerificationError;

use crate::external::MemoryCallbacks;
use crate::ir::block::Block;

/// Runs the full fixed-order pipeline over `block` in place.
///
/// `mem` backs [`a32_const_mem`]'s constant-memory folding; `polyfill`
/// configures [`polyfill`]'s host-feature lowering. Panics in debug builds
/// if [`verify::run`] finds a broken invariant, since that can only mean a
/// bug in one of the passes above, never in guest code.
pub fn run_pipeline(block: &mut Block, mem: &dyn MemoryCallbacks, polyfill: PolyfillOptions) {
    polyfill::run(block, polyfill);
    a32_getset::run(block);
    a32_const_mem::run(block, mem);
    const_prop::run(block);
    dce::run(block);
    identity_removal::run(block);

    #[cfg(debug_assertions)]
    if let Err(e) = verify::run(block) {
        panic!("optimizer pipeline produced an invalid block: {}", e.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::guest::{Fpscr, Psr};
    use crate::ir::emitter::IREmitter;
    use crate::ir::opcode::Opcode;
    use crate::loc::LocationDescriptor;

    struct NoMem;
    impl MemoryCallbacks for NoMem {
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
        fn fetch_instruction(&self, _vaddr: u64) -> Result<u32, MemoryError> {
            unimplemented!()
        }
    }

    #[test]
    fn folds_a_dead_redundant_store_end_to_end() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let a = e.imm32(1);
        let b = e.imm32(2);
        let sum = e.add32(a, b).result;
        e.set_reg_a32(0, sum);
        let c = e.imm32(99);
        e.set_reg_a32(0, c);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);

        run_pipeline(&mut block, &NoMem, PolyfillOptions::default());

        let stores: Vec<_> =
            block.insts.iter().filter(|i| i.opcode == Opcode::SetRegisterA32).collect();
        assert_eq!(stores.len(), 1, "only the final store to r0 should survive");
        assert!(matches!(stores[0].args[1], crate::ir::value::Value::Imm(_)));
    }

    #[test]
    fn running_the_pipeline_twice_is_idempotent() {
        let mut e = IREmitter::new(LocationDescriptor::a32(0, Psr(0), Fpscr(0)));
        let a = e.imm32(5);
        let b = e.imm32(7);
        let sum = e.add32(a, b).result;
        e.set_reg_a32(0, sum);
        let mut block = e.finish(LocationDescriptor::a32(4, Psr(0), Fpscr(0)), 1);

        run_pipeline(&mut block, &NoMem, PolyfillOptions::default());
        let once = format!("{:?}", block.insts);
        run_pipeline(&mut block, &NoMem, PolyfillOptions::default());
        let twice = format!("{:?}", block.insts);
        assert_eq!(once, twice);
    }
}
