//! `BlockCache`: maps a [`LocationDescriptor`] to the entry point of its
//! compiled code, owning every compiled block's executable buffer for as
//! long as it stays cached.
//!
//! Generalized from the teacher's `Jit::cache: HashMap<u32, BasicBlock>`
//! (`src/lib.rs`), which keys by bare PC and embeds each block's
//! `ExecutableBuffer` inside the `BasicBlock` itself. Here the key is the
//! full `LocationDescriptor` (so a Thumb and an ARM translation of the same
//! PC don't collide); a `LinkBlock`/`LinkBlockFast` terminal never rewrites
//! a sibling block's code in place, it just falls through to the dispatcher
//! like `ReturnToDispatch` and leaves it to the RSB/fast-dispatch hints to
//! skip the slow path on the next iteration.

use std::collections::HashMap;

use dynasmrt::ExecutableBuffer;

use crate::backend::CompiledBlock;
use crate::dispatch::{FastDispatchTable, ReturnStackBuffer};
use crate::loc::LocationDescriptor;

struct CacheEntry {
    #[allow(dead_code)]
    code: ExecutableBuffer,
    entry_ptr: usize,
    cycle_count: u32,
    /// Byte range `[start, end)` this entry's code occupies, as raw host
    /// addresses, used to answer invalidate-by-range queries against the
    /// RSB and fast-dispatch table without re-deriving it from `code`.
    range: (usize, usize),
}

/// Owns every compiled block and the two fast paths
/// ([`FastDispatchTable`], [`ReturnStackBuffer`]) that try to avoid a full
/// `HashMap` lookup on each dispatch cycle.
pub struct BlockCache {
    blocks: HashMap<u64, CacheEntry>,
    pub fast_dispatch: FastDispatchTable,
    pub rsb: ReturnStackBuffer,
}

impl BlockCache {
    pub fn new() -> Self {
        BlockCache { blocks: HashMap::new(), fast_dispatch: FastDispatchTable::new(), rsb: ReturnStackBuffer::new() }
    }

    /// Looks up a block's entry point and its static guest cycle count, so
    /// the dispatcher can charge `cycles_remaining` without a second lookup.
    pub fn lookup(&self, loc: LocationDescriptor) -> Option<(usize, u32)> {
        let hash = loc.unique_hash();
        if let Some(hit) = self.fast_dispatch.lookup(hash) {
            return Some(hit);
        }
        self.blocks.get(&hash).map(|e| (e.entry_ptr, e.cycle_count))
    }

    /// Inserts a freshly compiled block, registering it with the
    /// fast-dispatch table as well so the next lookup for the same
    /// location hits the fast path.
    pub fn insert(&mut self, loc: LocationDescriptor, compiled: CompiledBlock) -> (usize, u32) {
        let hash = loc.unique_hash();
        let entry_ptr = compiled.code.ptr(compiled.entry) as usize;
        let start = compiled.code.ptr(dynasmrt::AssemblyOffset(0)) as usize;
        let end = start + compiled.code.len();
        let cycle_count = compiled.cycle_count;
        self.blocks.insert(
            hash,
            CacheEntry { code: compiled.code, entry_ptr, cycle_count, range: (start, end) },
        );
        self.fast_dispatch.insert(hash, entry_ptr, cycle_count);
        (entry_ptr, cycle_count)
    }

    /// Drops every cached block whose code falls in `[start, end)`,
    /// matching spec.md's cache-invalidation contract for self-modifying
    /// guest code. Also clears any RSB/fast-dispatch entries pointing into
    /// the freed range so neither hands back a dangling pointer.
    pub fn invalidate_range(&mut self, start: usize, end: usize) {
        self.blocks.retain(|_, e| !(e.range.0 < end && start < e.range.1));
        self.fast_dispatch.invalidate_range(start, end);
        self.rsb.invalidate_range(start, end);
    }

    pub fn invalidate_all(&mut self) {
        self.blocks.clear();
        self.fast_dispatch.invalidate_all();
        self.rsb = ReturnStackBuffer::new();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}
