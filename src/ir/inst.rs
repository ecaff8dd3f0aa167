//! [`Inst`]: one IR instruction.

use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{InstRef, Value};

/// Maximum argument count for a scalar opcode. Vector/table ops instead
/// carry a single `Value::Table` argument, so this bound is not violated by
/// them (spec.md §3: "bounded array of argument Values (max 4 for scalar
/// ops, larger for vector table ops)").
pub const MAX_SCALAR_ARGS: usize = 4;

/// One instruction inside an [`super::block::Block`].
///
/// Instructions are appended in program order and never reordered by this
/// crate's optimizer passes (spec.md §4.2: "the optimizer may reorder only
/// across known-independent ops" — none of the passes implemented here
/// perform such a reorder, so program order is preserved end to end).
#[derive(Clone, Debug)]
pub struct Inst {
    pub opcode: Opcode,
    pub args: Vec<Value>,
    /// Number of times this instruction's result is referenced elsewhere in
    /// the block, including by pseudo-ops. Maintained by
    /// [`super::block::Block::recount_uses`] rather than incrementally,
    /// since every optimizer pass that changes use counts already walks the
    /// whole block.
    pub use_count: u32,
    /// The guest opcode word this IR instruction was lifted from, kept for
    /// diagnostics and disassembly interleaving (`disas_ir` in the teacher).
    pub guest_op: u32,
}

impl Inst {
    pub fn new(opcode: Opcode, args: Vec<Value>, guest_op: u32) -> Self {
        debug_assert!(
            args.len() <= MAX_SCALAR_ARGS || matches!(args.last(), Some(Value::Table(_))),
            "opcode {:?} exceeds MAX_SCALAR_ARGS without a trailing Table arg",
            opcode
        );
        Inst { opcode, args, use_count: 0, guest_op }
    }

    pub fn result_type(&self) -> Type {
        self.opcode.signature().result
    }

    /// `true` for instructions whose removal (even at zero use-count) would
    /// change behaviour. See spec.md §8 invariant 4.
    pub fn has_side_effect(&self) -> bool {
        self.opcode.has_side_effect()
    }

    /// For the `GetXFromOp` pseudo-op family, the producer instruction this
    /// one extracts a side channel from.
    pub fn pseudo_producer(&self) -> Option<InstRef> {
        if !self.opcode.is_pseudo_op() {
            return None;
        }
        self.args.first().and_then(Value::as_inst_ref)
    }

    /// Every `InstRef` this instruction reads, in argument order, including
    /// references nested inside a `Value::Table`.
    pub fn referenced_insts(&self) -> Vec<InstRef> {
        fn walk(v: &Value, out: &mut Vec<InstRef>) {
            match v {
                Value::InstRef(r) => out.push(*r),
                Value::Table(items) => items.iter().for_each(|i| walk(i, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        self.args.iter().for_each(|v| walk(v, &mut out));
        out
    }

    /// Type-checks `self.args` against `self.opcode`'s declared signature.
    /// Debug-only per spec.md §3 ("Types are checked at construction").
    #[cfg(debug_assertions)]
    pub fn verify_types(&self) -> Result<(), String> {
        let sig = self.opcode.signature();
        if self.args.len() < sig.args.len() {
            return Err(format!(
                "{:?} expects {} args, got {}",
                self.opcode,
                sig.args.len(),
                self.args.len()
            ));
        }
        for (i, (arg, want)) in self.args.iter().zip(sig.args.iter()).enumerate() {
            if !arg.ty().compatible(*want) {
                return Err(format!(
                    "{:?} arg {} expected {:?}, got {:?}",
                    self.opcode, i, want, arg.ty()
                ));
            }
        }
        Ok(())
    }
}
