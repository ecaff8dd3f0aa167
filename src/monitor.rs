//! `ExclusiveMonitor`: load-linked/store-conditional reservation tracking
//! for guest `LDREX`/`STREX` (A32) and `LDXR`/`STXR` (A64) instruction
//! pairs.
//!
//! The teacher has no equivalent; this is built directly from the
//! `A32::ExclusiveMonitor`/`A64::ExclusiveMonitor` contract in the original
//! dynarmic sources — a single shared spin flag guarding a small
//! fixed-size table of per-processor `(address, size)` reservations, with
//! the actual read/write performed inside caller-supplied closures so the
//! monitor never needs to know how to access guest memory itself.
//!
//! Per spec.md §4.7/§6, one monitor is meant to be shared by every `Jit`
//! modelling a processor in the same guest address space, so the table
//! takes `&self` rather than `&mut self`: the spin lock, not Rust's borrow
//! checker, is what serializes access, exactly as it would across real
//! cores. Wrap in `Arc` to hand the same monitor to multiple `Jit`s.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sentinel reservation address meaning "no reservation held," matching
/// the invalid-address constant the original source uses.
const INVALID_EXCLUSIVE_ADDRESS: u64 = 0xDEAD_DEAD_DEAD_DEAD;

struct Reservation {
    address: u64,
    size: usize,
}

/// Whether `[a_addr, a_addr+a_size)` and `[b_addr, b_addr+b_size)` overlap.
/// A reservation of size 0 (the invalid sentinel's resting state) never
/// overlaps anything.
fn ranges_overlap(a_addr: u64, a_size: usize, b_addr: u64, b_size: usize) -> bool {
    if a_size == 0 || b_size == 0 {
        return false;
    }
    a_addr < b_addr + b_size as u64 && b_addr < a_addr + a_size as u64
}

/// Tracks exclusive-access reservations for up to `processor_count`
/// logical cores sharing one guest address space.
pub struct ExclusiveMonitor {
    lock: AtomicBool,
    reservations: UnsafeCell<Vec<Reservation>>,
}

// Safety: every access to `reservations` happens between `lock()`/`unlock()`,
// which establish a single-writer critical section via the atomic spin flag,
// mirroring the original source's single shared spin lock guarding reservations
// accessed by multiple cores.
unsafe impl Sync for ExclusiveMonitor {}

impl ExclusiveMonitor {
    pub fn new(processor_count: usize) -> Self {
        ExclusiveMonitor {
            lock: AtomicBool::new(false),
            reservations: UnsafeCell::new(
                (0..processor_count)
                    .map(|_| Reservation { address: INVALID_EXCLUSIVE_ADDRESS, size: 0 })
                    .collect(),
            ),
        }
    }

    fn lock(&self) {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    #[allow(clippy::mut_from_ref)]
    fn reservations(&self) -> &mut Vec<Reservation> {
        // Safety: only called while `self.lock` is held.
        unsafe { &mut *self.reservations.get() }
    }

    /// Performs a load-linked: records `(address, size)` as `processor_id`'s
    /// reservation, then runs `op` to perform the actual memory read while
    /// the shared spin lock is held, so no other processor can observe a
    /// torn read racing a concurrent exclusive store.
    ///
    /// Marking an address also invalidates any *other* processor's existing
    /// reservation that overlaps `[address, address+size)` — a second
    /// exclusive load on the same line means the first processor's pair is
    /// no longer guaranteed to commit, per spec §8 scenario 6.
    pub fn read_and_mark<T>(
        &self,
        processor_id: usize,
        address: u64,
        size: usize,
        op: impl FnOnce() -> T,
    ) -> T {
        self.lock();
        for (id, r) in self.reservations().iter_mut().enumerate() {
            if id != processor_id && ranges_overlap(r.address, r.size, address, size) {
                r.address = INVALID_EXCLUSIVE_ADDRESS;
            }
        }
        self.reservations()[processor_id] = Reservation { address, size };
        let value = op();
        self.unlock();
        value
    }

    /// Performs a store-conditional: if `processor_id`'s reservation still
    /// covers `(address, size)`, clears every processor's reservation to
    /// that same address (a store anywhere invalidates all matching
    /// reservations, per the architecture) and runs `op` with the
    /// previously-marked value, returning `op`'s success bit. If the
    /// reservation no longer matches, `op` is not called and this returns
    /// `false`.
    pub fn do_exclusive_operation<T>(
        &self,
        processor_id: usize,
        address: u64,
        size: usize,
        recorded: T,
        op: impl FnOnce(T) -> bool,
    ) -> bool {
        self.lock();
        let matches = {
            let r = &self.reservations()[processor_id];
            r.address == address && r.size == size
        };
        if !matches {
            self.unlock();
            return false;
        }
        let committed = op(recorded);
        if committed {
            for r in self.reservations().iter_mut() {
                if ranges_overlap(r.address, r.size, address, size) {
                    r.address = INVALID_EXCLUSIVE_ADDRESS;
                }
            }
        }
        self.unlock();
        committed
    }

    /// Clears every reservation, used when guest code makes an exclusive
    /// monitor invalid (e.g. `CLREX`, a context switch, or cache
    /// invalidation crossing a reserved line).
    pub fn clear(&self) {
        self.lock();
        for r in self.reservations().iter_mut() {
            r.address = INVALID_EXCLUSIVE_ADDRESS;
        }
        self.unlock();
    }

    pub fn clear_processor(&self, processor_id: usize) {
        self.lock();
        self.reservations()[processor_id].address = INVALID_EXCLUSIVE_ADDRESS;
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conditional_fails_without_a_matching_load_linked() {
        let mon = ExclusiveMonitor::new(2);
        let committed = mon.do_exclusive_operation(0, 0x1000, 4, 0xAAu32, |_| true);
        assert!(!committed);
    }

    #[test]
    fn store_conditional_succeeds_after_a_matching_load_linked() {
        let mon = ExclusiveMonitor::new(2);
        let loaded = mon.read_and_mark(0, 0x1000, 4, || 0x1234u32);
        let committed = mon.do_exclusive_operation(0, 0x1000, 4, loaded, |v| v == 0x1234);
        assert!(committed);
    }

    #[test]
    fn a_load_linked_by_one_processor_invalidates_another_processors_reservation() {
        let mon = ExclusiveMonitor::new(2);
        mon.read_and_mark(0, 0x1000, 4, || 0u32);
        mon.read_and_mark(1, 0x1000, 4, || 0u32);
        // P1's mark invalidated P0's earlier reservation on the same line.
        assert!(!mon.do_exclusive_operation(0, 0x1000, 4, (), |_| true));
        assert!(mon.do_exclusive_operation(1, 0x1000, 4, (), |_| true));
    }
}
