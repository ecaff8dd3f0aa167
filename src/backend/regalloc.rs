//! Single-pass register allocation, interleaved with code emission rather
//! than run as a separate pass over the block.
//!
//! Generalized from the teacher's `regalloc.rs` linear-scan allocator
//! (`RegisterPool`/`IntervalMap`/`StorageMap`/`allocate_registers`), which
//! computes live intervals for a whole block up front and then colors them
//! in one sweep. The allocator here instead exposes a
//! read/write/release protocol the x64 emitter drives instruction by
//! instruction, since the backend never gets a second look at a block once
//! it starts emitting it.

use std::collections::{BTreeMap, VecDeque};

use crate::ir::InstRef;

/// A host general-purpose register, numbered the same way `dynasmrt::x64::Rq`
/// is so a `HostGpr` converts to a `Rq` with a plain cast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostGpr {
    Rax = 0x0,
    Rcx = 0x1,
    Rdx = 0x2,
    Rbx = 0x3,
    Rsp = 0x4,
    Rbp = 0x5,
    Rsi = 0x6,
    Rdi = 0x7,
    R8 = 0x8,
    R9 = 0x9,
    R10 = 0xA,
    R11 = 0xB,
    R12 = 0xC,
    R13 = 0xD,
    R14 = 0xE,
    R15 = 0xF,
}

impl HostGpr {
    /// General-purpose registers available to the allocator. `rsp`/`rbp`
    /// anchor the runtime stack frame and `r13`/`r14`/`r15` are pinned to
    /// the CPSR/FPSCR pointer, fastmem base, and register-file base for the
    /// duration of `run_code` (see `dispatch::abi`), so none of the six are
    /// ever handed out here.
    pub const ALLOCATABLE: [HostGpr; 10] = [
        HostGpr::Rax,
        HostGpr::Rcx,
        HostGpr::Rdx,
        HostGpr::Rbx,
        HostGpr::Rsi,
        HostGpr::Rdi,
        HostGpr::R8,
        HostGpr::R9,
        HostGpr::R10,
        HostGpr::R11,
    ];
}

/// Where a value currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageLoc {
    Gpr(HostGpr),
    /// Index into the block's spill area, one machine word per slot.
    Spill(u32),
}

/// Maximum spill slots a block's stack frame reserves, per spec.md §4.4's
/// "fixed count, default 64" — `backend::x64::abi::SPILL_FRAME_SIZE` sizes
/// the emitted frame to match.
pub const MAX_SPILL_SLOTS: usize = 64;

/// A register evicted to make room for a new allocation: the caller must
/// emit a store preserving `reg`'s value at `slot` before overwriting `reg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Eviction {
    pub reg: HostGpr,
    pub slot: u32,
}

struct ActiveValue {
    loc: StorageLoc,
    /// Remaining read sites for this value, decremented by
    /// [`RegAlloc::use_register`]; once it hits zero the register is
    /// released automatically unless the caller locked it.
    remaining_uses: u32,
    locked: bool,
}

/// What the emitter should do to read a value: it's already in a register,
/// or it needs to be reloaded from a spill slot into one first.
pub enum ReadLoc {
    Gpr(HostGpr),
    Spill { slot: u32, into: HostGpr },
}

/// Drives host-register assignment for one block, one instruction at a
/// time.
pub struct RegAlloc {
    /// Registers not currently holding a live value, ordered
    /// least-recently-freed first (see `DESIGN.md`'s Open Question
    /// decision on the eviction policy): `take()` pops the front, `free()`
    /// pushes to the back.
    free: VecDeque<HostGpr>,
    /// Live values, keyed by the `InstRef` that produced them. A
    /// `BTreeMap` keeps eviction order deterministic (oldest-defined
    /// `InstRef` first) rather than depending on hash iteration order.
    active: BTreeMap<InstRef, ActiveValue>,
    spill_slots: Vec<Option<InstRef>>,
}

impl RegAlloc {
    pub fn new() -> Self {
        RegAlloc {
            free: HostGpr::ALLOCATABLE.iter().copied().collect(),
            active: BTreeMap::new(),
            spill_slots: Vec::new(),
        }
    }

    fn alloc_spill_slot(&mut self, value: InstRef) -> u32 {
        if let Some(idx) = self.spill_slots.iter().position(|s| s.is_none()) {
            self.spill_slots[idx] = Some(value);
            return idx as u32;
        }
        assert!(
            self.spill_slots.len() < MAX_SPILL_SLOTS,
            "register allocator needs more than {MAX_SPILL_SLOTS} simultaneously-spilled values"
        );
        self.spill_slots.push(Some(value));
        (self.spill_slots.len() - 1) as u32
    }

    /// Picks a register to evict when `free` is empty: the least-recently
    /// defined unlocked active value (smallest `InstRef`, via the
    /// `BTreeMap`'s natural order), spilled to a fresh slot. Panics if
    /// every active value is locked, which would indicate the emitter
    /// asked for more simultaneously-live registers than the backend
    /// reserves for a single instruction's operands — a bug in the
    /// instruction handler, not a guest-triggerable condition. Returns the
    /// freed register and the slot its old value now lives in; the caller
    /// owns emitting the store that actually preserves it there before
    /// reusing the register — `RegAlloc` has no `Assembler` handle to do so
    /// itself.
    fn evict_one(&mut self) -> Eviction {
        let victim = self
            .active
            .iter()
            .find(|(_, v)| matches!(v.loc, StorageLoc::Gpr(_)) && !v.locked)
            .map(|(r, _)| *r)
            .expect("register allocator exhausted with no evictable value");
        let entry = self.active.get_mut(&victim).unwrap();
        let reg = match entry.loc {
            StorageLoc::Gpr(r) => r,
            StorageLoc::Spill(_) => unreachable!(),
        };
        let slot = self.alloc_spill_slot(victim);
        entry.loc = StorageLoc::Spill(slot);
        Eviction { reg, slot }
    }

    /// Takes a free register, reporting an [`Eviction`] the caller must
    /// store to its spill slot before overwriting the register if the pool
    /// was exhausted.
    fn take_register(&mut self) -> (HostGpr, Option<Eviction>) {
        match self.free.pop_front() {
            Some(reg) => (reg, None),
            None => {
                let evicted = self.evict_one();
                (evicted.reg, Some(evicted))
            }
        }
    }

    /// Registers a newly-defined value with `uses` remaining reads,
    /// allocating it a register immediately (spilling a victim if none are
    /// free — reported back to the caller, which must emit the spill store
    /// before using the returned register for anything else).
    pub fn define(&mut self, value: InstRef, uses: u32) -> (HostGpr, Option<Eviction>) {
        let (reg, evicted) = self.take_register();
        self.active.insert(value, ActiveValue { loc: StorageLoc::Gpr(reg), remaining_uses: uses, locked: false });
        (reg, evicted)
    }

    /// Reads `value`, decrementing its remaining-use count and releasing
    /// its register back to the pool once it reaches zero (unless locked).
    /// Returns `ReadLoc::Spill` when the value had been evicted; the caller
    /// must emit a reload from `slot` into `into` before using it. The
    /// second element of the pair reports an eviction that finding a
    /// register for the reload itself caused (the caller must emit that
    /// store too, before the reload).
    pub fn use_register(&mut self, value: InstRef) -> (ReadLoc, Option<Eviction>) {
        let fresh_reg = {
            let entry = self.active.get(&value).unwrap_or_else(|| {
                panic!("use_register({value:?}) on a value the allocator never saw defined")
            });
            match entry.loc {
                StorageLoc::Gpr(_) => None,
                StorageLoc::Spill(slot) => Some(slot),
            }
        };
        if let Some(slot) = fresh_reg {
            let (reg, evicted) = self.take_register();
            let entry = self.active.get_mut(&value).unwrap();
            entry.loc = StorageLoc::Gpr(reg);
            self.spill_slots[slot as usize] = None;
            self.decrement_and_maybe_release(value);
            return (ReadLoc::Spill { slot, into: reg }, evicted);
        }
        let reg = match self.active.get(&value).unwrap().loc {
            StorageLoc::Gpr(r) => r,
            StorageLoc::Spill(_) => unreachable!(),
        };
        self.decrement_and_maybe_release(value);
        (ReadLoc::Gpr(reg), None)
    }

    fn decrement_and_maybe_release(&mut self, value: InstRef) {
        let entry = self.active.get_mut(&value).unwrap();
        entry.remaining_uses = entry.remaining_uses.saturating_sub(1);
        if entry.remaining_uses == 0 && !entry.locked {
            self.release(value);
        }
    }

    /// Pins `value`'s current register so it survives a `use_register`
    /// call that would otherwise hit zero remaining uses and release it —
    /// used when an instruction handler needs an operand to stay resident
    /// across several emitted host instructions before its result is
    /// bound.
    pub fn lock(&mut self, value: InstRef) {
        if let Some(entry) = self.active.get_mut(&value) {
            entry.locked = true;
        }
    }

    pub fn unlock(&mut self, value: InstRef) {
        if let Some(entry) = self.active.get_mut(&value) {
            entry.locked = false;
            if entry.remaining_uses == 0 {
                self.release(value);
            }
        }
    }

    /// Releases `value`'s register (or spill slot) back to the pool,
    /// called once an instruction is verified dead by the emitter (mirrors
    /// `DeadCodeElimination` at emission time for values the optimizer
    /// left with a zero use-count because they're only read by a pseudo-op
    /// the backend folded away).
    pub fn release(&mut self, value: InstRef) {
        if let Some(entry) = self.active.remove(&value) {
            match entry.loc {
                StorageLoc::Gpr(r) => self.free.push_back(r),
                StorageLoc::Spill(slot) => self.spill_slots[slot as usize] = None,
            }
        }
    }

    pub fn spill_slot_count(&self) -> usize {
        self.spill_slots.len()
    }

    pub fn loc_of(&self, value: InstRef) -> Option<StorageLoc> {
        self.active.get(&value).map(|v| v.loc)
    }
}

impl Default for RegAlloc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_hands_out_distinct_registers() {
        let mut ra = RegAlloc::new();
        let (a, evicted_a) = ra.define(InstRef(0), 1);
        let (b, evicted_b) = ra.define(InstRef(1), 1);
        assert_ne!(a, b);
        assert!(evicted_a.is_none());
        assert!(evicted_b.is_none());
    }

    #[test]
    fn use_register_releases_at_zero_remaining_uses() {
        let mut ra = RegAlloc::new();
        let v = InstRef(0);
        ra.define(v, 1);
        let (loc, evicted) = ra.use_register(v);
        assert!(matches!(loc, ReadLoc::Gpr(_)));
        assert!(evicted.is_none());
        assert!(ra.loc_of(v).is_none());
    }

    #[test]
    fn exhausting_the_pool_spills_the_oldest_unlocked_value() {
        let mut ra = RegAlloc::new();
        let values: Vec<InstRef> = (0..HostGpr::ALLOCATABLE.len() as u32).map(InstRef).collect();
        for &v in &values {
            let (_, evicted) = ra.define(v, 10);
            assert!(evicted.is_none());
        }
        let overflow = InstRef(values.len() as u32);
        let (_, evicted) = ra.define(overflow, 10);
        assert!(evicted.is_some());
        assert_eq!(evicted.unwrap().slot, 0);
        assert!(matches!(ra.loc_of(values[0]), Some(StorageLoc::Spill(_))));
    }
}
