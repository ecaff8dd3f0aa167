//! Return-stack buffer: a small fixed-size ring caching recent
//! call/return pairs, used by `Terminal::PushRSB`/`PopRSBHint` so a guest
//! `BL`/`RET` pair that stays within already-compiled code can skip the
//! cache lookup entirely.
//!
//! The teacher has no RSB; the ring discipline here mirrors the one
//! embedded directly in [`crate::guest::state::A32JitState`]/
//! `A64JitState` (`rsb_push`/`rsb_find`), factored out as a standalone type
//! so the cache and tests can exercise it without a full `JitState`.

pub const RSB_SIZE: usize = 8;

#[derive(Clone, Copy, Default)]
struct Entry {
    loc_hash: u64,
    code_ptr: usize,
}

pub struct ReturnStackBuffer {
    entries: [Entry; RSB_SIZE],
    next: usize,
}

impl ReturnStackBuffer {
    pub fn new() -> Self {
        ReturnStackBuffer { entries: [Entry::default(); RSB_SIZE], next: 0 }
    }

    pub fn push(&mut self, loc_hash: u64, code_ptr: usize) {
        self.entries[self.next] = Entry { loc_hash, code_ptr };
        self.next = (self.next + 1) % RSB_SIZE;
    }

    /// Scans newest-to-oldest for a matching return location, as the
    /// hardware return-address predictor this buffer stands in for would.
    pub fn find(&self, loc_hash: u64) -> Option<usize> {
        (0..RSB_SIZE)
            .map(|i| (self.next + RSB_SIZE - 1 - i) % RSB_SIZE)
            .find(|&slot| self.entries[slot].code_ptr != 0 && self.entries[slot].loc_hash == loc_hash)
            .map(|slot| self.entries[slot].code_ptr)
    }

    /// Drops every entry whose code pointer falls inside `[start, end)`,
    /// called when the cache invalidates a range of compiled code so the
    /// RSB can't hand back a pointer into freed pages.
    pub fn invalidate_range(&mut self, start: usize, end: usize) {
        for e in &mut self.entries {
            if e.code_ptr >= start && e.code_ptr < end {
                *e = Entry::default();
            }
        }
    }
}

impl Default for ReturnStackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_most_recently_pushed_match() {
        let mut rsb = ReturnStackBuffer::new();
        rsb.push(1, 0x1000);
        rsb.push(1, 0x2000);
        assert_eq!(rsb.find(1), Some(0x2000));
    }

    #[test]
    fn wraps_around_and_evicts_the_oldest_entry() {
        let mut rsb = ReturnStackBuffer::new();
        for i in 0..RSB_SIZE as u64 + 1 {
            rsb.push(i, 0x1000 + i as usize);
        }
        assert_eq!(rsb.find(0), None);
        assert_eq!(rsb.find(RSB_SIZE as u64), Some(0x1000 + RSB_SIZE));
    }
}
