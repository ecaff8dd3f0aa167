//! [`Block`]: one translated unit of guest code, and its [`Terminal`].

use crate::ir::inst::Inst;
use crate::ir::value::InstRef;
use crate::loc::LocationDescriptor;

/// How a [`Block`] hands control back to the dispatcher. Exactly one of
/// these terminates every block (spec.md §3: "a block has exactly one
/// terminal").
#[derive(Clone, Debug)]
pub enum Terminal {
    /// Bail out to the interpreter/fallback path entirely; used for guest
    /// instructions this crate chooses not to translate.
    Interpret(LocationDescriptor),
    /// Hand control back to the dispatcher with no cached successor.
    ReturnToDispatch,
    /// Jump to a known successor via a full cache lookup.
    LinkBlock(LocationDescriptor),
    /// Jump to a known successor via the fast-dispatch table, skipping the
    /// cache lookup when the slot is still valid.
    LinkBlockFast(LocationDescriptor),
    /// Push `return_to` onto the return-stack buffer before falling through
    /// to `next`, so a matching future `PopRSBHint` can skip straight back.
    PushRSB {
        return_to: LocationDescriptor,
        next: Box<Terminal>,
    },
    /// Attempt a return-stack-buffer hit before falling back to `next`.
    PopRSBHint(Box<Terminal>),
    /// Attempt a fast-dispatch-table hit keyed on a runtime-computed
    /// address before falling back to `next`.
    FastDispatchHint(Box<Terminal>),
    /// Branch on a condition-code flag known at emission time: `then` if
    /// set, `otherwise` if not.
    If {
        cond: crate::guest::Cond,
        then: Box<Terminal>,
        otherwise: Box<Terminal>,
    },
    /// Branch on an arbitrary host-resident bit (used for IT-block
    /// predicates and A64 conditional branches already folded to a flag).
    CheckBit {
        bit: InstRef,
        then: Box<Terminal>,
        otherwise: Box<Terminal>,
    },
    /// Check the runtime halt flag before continuing to `next`; inserted at
    /// backward-branch targets so long-running loops stay interruptible.
    CheckHalt(Box<Terminal>),
}

/// A straight-line sequence of [`Inst`]s lifted from guest code at one
/// [`LocationDescriptor`], ending in exactly one [`Terminal`].
#[derive(Clone, Debug)]
pub struct Block {
    pub entry: LocationDescriptor,
    /// Location immediately following the last guest instruction folded
    /// into this block; used to detect cache invalidation ranges.
    pub end: LocationDescriptor,
    pub insts: Vec<Inst>,
    pub terminal: Terminal,
    /// Guest cycles this block is worth, charged to the tick counter on
    /// entry (spec.md §4.7 tick accounting).
    pub cycle_count: u32,
    /// Condition under which the whole block executes, for A32/T32
    /// instructions predicated outside an IT block; `None` means
    /// unconditional (already true for the common case).
    pub cond: Option<crate::guest::Cond>,
}

impl Block {
    pub fn new(entry: LocationDescriptor) -> Self {
        Block {
            entry,
            end: entry,
            insts: Vec::new(),
            terminal: Terminal::ReturnToDispatch,
            cycle_count: 0,
            cond: None,
        }
    }

    pub fn push(&mut self, inst: Inst) -> InstRef {
        let idx = self.insts.len() as u32;
        self.insts.push(inst);
        InstRef(idx)
    }

    pub fn inst(&self, r: InstRef) -> &Inst {
        &self.insts[r.0 as usize]
    }

    pub fn inst_mut(&mut self, r: InstRef) -> &mut Inst {
        &mut self.insts[r.0 as usize]
    }

    /// Recomputes every instruction's `use_count` from scratch by walking
    /// all live references, including those reachable only through the
    /// terminal (e.g. a `CheckBit` condition). Optimizer passes that delete
    /// or rewrite instructions call this rather than patch counts
    /// incrementally.
    pub fn recount_uses(&mut self) {
        let mut counts = vec![0u32; self.insts.len()];
        for inst in &self.insts {
            for r in inst.referenced_insts() {
                counts[r.0 as usize] += 1;
            }
        }
        fn walk_terminal(t: &Terminal, counts: &mut [u32]) {
            match t {
                Terminal::CheckBit { bit, then, otherwise } => {
                    counts[bit.0 as usize] += 1;
                    walk_terminal(then, counts);
                    walk_terminal(otherwise, counts);
                }
                Terminal::If { then, otherwise, .. } => {
                    walk_terminal(then, counts);
                    walk_terminal(otherwise, counts);
                }
                Terminal::PushRSB { next, .. }
                | Terminal::PopRSBHint(next)
                | Terminal::FastDispatchHint(next)
                | Terminal::CheckHalt(next) => walk_terminal(next, counts),
                Terminal::Interpret(_)
                | Terminal::ReturnToDispatch
                | Terminal::LinkBlock(_)
                | Terminal::LinkBlockFast(_) => {}
            }
        }
        walk_terminal(&self.terminal, &mut counts);
        for (inst, count) in self.insts.iter_mut().zip(counts) {
            inst.use_count = count;
        }
    }

    /// Every successor location this block may hand control to, used by
    /// the cache to pre-link known targets.
    pub fn successors(&self) -> Vec<LocationDescriptor> {
        fn walk(t: &Terminal, out: &mut Vec<LocationDescriptor>) {
            match t {
                Terminal::Interpret(loc) | Terminal::LinkBlock(loc) | Terminal::LinkBlockFast(loc) => {
                    out.push(*loc)
                }
                Terminal::PushRSB { next, .. } => walk(next, out),
                Terminal::PopRSBHint(next)
                | Terminal::FastDispatchHint(next)
                | Terminal::CheckHalt(next) => walk(next, out),
                Terminal::If { then, otherwise, .. }
                | Terminal::CheckBit { then, otherwise, .. } => {
                    walk(then, out);
                    walk(otherwise, out);
                }
                Terminal::ReturnToDispatch => {}
            }
        }
        let mut out = Vec::new();
        walk(&self.terminal, &mut out);
        out
    }
}
