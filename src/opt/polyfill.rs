//! Pass 1: rewrites opcodes unsupported by the current host feature set
//! into sequences the backend can lower, per spec.md §4.3.1.

use crate::backend::HostFeature;
use crate::ir::Block;

/// Configures [`run`]. Spec.md names this `PolyfillOptions` explicitly
/// ("Configurable by `PolyfillOptions`").
#[derive(Clone, Copy, Debug)]
pub struct PolyfillOptions {
    pub features: HostFeature,
}

impl Default for PolyfillOptions {
    fn default() -> Self {
        PolyfillOptions { features: HostFeature::empty() }
    }
}

/// Lowers any opcode this host's `features` can't execute directly into an
/// equivalent sequence of opcodes it can.
///
/// This crate's opcode table (see `DESIGN.md`'s scope note on `ir::opcode`)
/// doesn't yet include any opcode gated on a host feature — no population-
/// count, AES, or SHA helpers are lifted by the front-end this crate ships.
/// The pass still runs as pipeline stage one, unconditionally a no-op today,
/// so a future feature-gated opcode has a fixed place to add its lowering
/// without reordering the rest of the pipeline.
pub fn run(_block: &mut Block, _options: PolyfillOptions) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{Fpscr, Psr};
    use crate::loc::LocationDescriptor;

    #[test]
    fn is_a_no_op_over_an_empty_block() {
        let loc = LocationDescriptor::a32(0, Psr(0), Fpscr(0));
        let mut block = Block::new(loc);
        run(&mut block, PolyfillOptions::default());
        assert!(block.insts.is_empty());
    }
}
