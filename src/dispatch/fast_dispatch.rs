//! Fast-dispatch table: a direct-mapped cache from a `LocationDescriptor`'s
//! unique hash to a compiled block's entry point, consulted before falling
//! back to the full [`crate::cache::BlockCache`] lookup.
//!
//! Unlike the full cache (a `HashMap` with no collision budget concerns),
//! this is sized and indexed so the common case — a backward branch to a
//! loop head, a `BL`/`RET` pair outside RSB range — resolves in a handful
//! of host instructions. The teacher has no equivalent; this is built
//! directly from spec.md's description of a fast-dispatch hash table
//! layer sitting in front of the block cache.

/// Table size; a power of two so indexing is a mask rather than a modulo.
const TABLE_SIZE: usize = 1024;

#[derive(Clone, Copy)]
struct Slot {
    loc_hash: u64,
    code_ptr: usize,
    cycle_count: u32,
}

pub struct FastDispatchTable {
    slots: Vec<Slot>,
}

impl FastDispatchTable {
    pub fn new() -> Self {
        FastDispatchTable { slots: vec![Slot { loc_hash: 0, code_ptr: 0, cycle_count: 0 }; TABLE_SIZE] }
    }

    fn index(loc_hash: u64) -> usize {
        (loc_hash as usize) & (TABLE_SIZE - 1)
    }

    /// Inserts or overwrites the slot for `loc_hash`; a collision simply
    /// evicts whatever else hashed to the same slot; that is fine since a
    /// miss here just falls back to the full cache.
    pub fn insert(&mut self, loc_hash: u64, code_ptr: usize, cycle_count: u32) {
        let idx = Self::index(loc_hash);
        self.slots[idx] = Slot { loc_hash, code_ptr, cycle_count };
    }

    /// Returns the cached entry point and static cycle count only if the
    /// slot's tag matches `loc_hash` exactly, since two descriptors can
    /// alias the same index.
    pub fn lookup(&self, loc_hash: u64) -> Option<(usize, u32)> {
        let idx = Self::index(loc_hash);
        let slot = self.slots[idx];
        (slot.code_ptr != 0 && slot.loc_hash == loc_hash).then_some((slot.code_ptr, slot.cycle_count))
    }

    pub fn invalidate_range(&mut self, start: usize, end: usize) {
        for slot in &mut self.slots {
            if slot.code_ptr >= start && slot.code_ptr < end {
                *slot = Slot { loc_hash: 0, code_ptr: 0, cycle_count: 0 };
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot { loc_hash: 0, code_ptr: 0, cycle_count: 0 };
        }
    }
}

impl Default for FastDispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_hash_collision_evicts_the_previous_entry() {
        let mut t = FastDispatchTable::new();
        let a = 5u64;
        let b = a + TABLE_SIZE as u64;
        t.insert(a, 0x1000, 3);
        t.insert(b, 0x2000, 7);
        assert_eq!(t.lookup(a), None);
        assert_eq!(t.lookup(b), Some((0x2000, 7)));
    }
}
