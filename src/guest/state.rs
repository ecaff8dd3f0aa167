//! The host-visible register file the backend reads and writes directly,
//! pinned at fixed offsets so emitted code can address it without an
//! indirection.
//!
//! Generalized from the teacher's `GuestState` (`reg`/`pc`/`cpsr`), split
//! into an A32 and an A64 variant and extended with the return-stack
//! buffer, fast-dispatch slot, tick counters, halt flag, and exclusive-
//! monitor scratch that spec.md's dispatcher and monitor need. Three
//! callee-pinned host GPRs index into this struct for the lifetime of
//! `run_code` (see `dispatch::abi`): CPSR/FPSCR pointer, register-file base,
//! and the fastmem base.

use crate::guest::{Cond, Fpscr, Fpcr, Psr};

/// Depth of the return-stack buffer ring. Matches the teacher's dispatch
/// loop cadence; deep enough to absorb typical call/return nesting between
/// dispatcher re-entries without thrashing.
pub const RSB_SIZE: usize = 8;

/// A32/T32 register file plus the scheduling/dispatch scratch the backend
/// and dispatcher share with it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct A32JitState {
    /// r0-r12, r13 (SP), r14 (LR), r15 (PC, kept in sync with the block's
    /// `LocationDescriptor` rather than updated per instruction).
    pub regs: [u32; 16],
    /// Sixty-four 32-bit lanes backing S0-S31 and, pairwise, D0-D31.
    pub ext_regs: [u32; 64],
    pub cpsr: Psr,
    pub fpscr: Fpscr,

    pub rsb_loc_descriptors: [u64; RSB_SIZE],
    pub rsb_code_ptrs: [usize; RSB_SIZE],
    pub rsb_ptr: u32,

    pub fast_dispatch_entry_loc: u64,
    pub fast_dispatch_entry_ptr: usize,

    /// Guest cycles left to run before `run_code` returns control to the
    /// host; decremented by each block's `cycle_count` at entry.
    pub cycles_remaining: i64,
    pub cycles_to_run: i64,

    pub halt_requested: bool,

    /// Scratch the `ExclusiveMonitor` glue writes into before a
    /// load-linked so the matching store-conditional's generated code can
    /// re-check it without a function call.
    pub exclusive_address: u64,
    pub exclusive_state: u8,
}

impl A32JitState {
    pub fn new(pc: u32, cpsr: u32) -> Self {
        A32JitState {
            regs: [0; 16],
            ext_regs: [0; 64],
            cpsr: Psr(cpsr),
            fpscr: Fpscr(0),
            rsb_loc_descriptors: [0; RSB_SIZE],
            rsb_code_ptrs: [0; RSB_SIZE],
            rsb_ptr: 0,
            fast_dispatch_entry_loc: 0,
            fast_dispatch_entry_ptr: 0,
            cycles_remaining: 0,
            cycles_to_run: 0,
            halt_requested: false,
            exclusive_address: u64::MAX,
            exclusive_state: 0,
        }
        .with_pc(pc)
    }

    fn with_pc(mut self, pc: u32) -> Self {
        self.regs[15] = pc;
        self
    }

    pub fn pc(&self) -> u32 { self.regs[15] }
    pub fn sp(&self) -> u32 { self.regs[13] }
    pub fn lr(&self) -> u32 { self.regs[14] }

    pub fn test_cond(&self, cond: Cond) -> bool {
        self.cpsr.test(cond)
    }

    pub fn rsb_push(&mut self, loc_hash: u64, code_ptr: usize) {
        let slot = (self.rsb_ptr as usize) % RSB_SIZE;
        self.rsb_loc_descriptors[slot] = loc_hash;
        self.rsb_code_ptrs[slot] = code_ptr;
        self.rsb_ptr = self.rsb_ptr.wrapping_add(1);
    }

    /// Looks for `loc_hash` among the most recent `RSB_SIZE` pushes,
    /// matching the teacher-absent `PopRSBHint` terminal's runtime
    /// behaviour: a linear scan over a small ring, newest first.
    pub fn rsb_find(&self, loc_hash: u64) -> Option<usize> {
        (0..RSB_SIZE)
            .map(|i| (self.rsb_ptr as usize + RSB_SIZE - 1 - i) % RSB_SIZE)
            .find(|&slot| self.rsb_loc_descriptors[slot] == loc_hash)
            .map(|slot| self.rsb_code_ptrs[slot])
    }
}

/// A64 register file plus shared dispatch/cycle/exclusive-monitor scratch.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct A64JitState {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub nzcv: u8,
    pub vecs: [u128; 32],
    pub fpcr: Fpcr,
    pub fpsr: u32,

    pub rsb_loc_descriptors: [u64; RSB_SIZE],
    pub rsb_code_ptrs: [usize; RSB_SIZE],
    pub rsb_ptr: u32,

    pub fast_dispatch_entry_loc: u64,
    pub fast_dispatch_entry_ptr: usize,

    pub cycles_remaining: i64,
    pub cycles_to_run: i64,

    pub halt_requested: bool,

    pub exclusive_address: u64,
    pub exclusive_state: u8,
}

impl A64JitState {
    pub fn new(pc: u64, sp: u64) -> Self {
        A64JitState {
            regs: [0; 31],
            sp,
            pc,
            nzcv: 0,
            vecs: [0; 32],
            fpcr: Fpcr(0),
            fpsr: 0,
            rsb_loc_descriptors: [0; RSB_SIZE],
            rsb_code_ptrs: [0; RSB_SIZE],
            rsb_ptr: 0,
            fast_dispatch_entry_loc: 0,
            fast_dispatch_entry_ptr: 0,
            cycles_remaining: 0,
            cycles_to_run: 0,
            halt_requested: false,
            exclusive_address: u64::MAX,
            exclusive_state: 0,
        }
    }

    pub fn rsb_push(&mut self, loc_hash: u64, code_ptr: usize) {
        let slot = (self.rsb_ptr as usize) % RSB_SIZE;
        self.rsb_loc_descriptors[slot] = loc_hash;
        self.rsb_code_ptrs[slot] = code_ptr;
        self.rsb_ptr = self.rsb_ptr.wrapping_add(1);
    }

    pub fn rsb_find(&self, loc_hash: u64) -> Option<usize> {
        (0..RSB_SIZE)
            .map(|i| (self.rsb_ptr as usize + RSB_SIZE - 1 - i) % RSB_SIZE)
            .find(|&slot| self.rsb_loc_descriptors[slot] == loc_hash)
            .map(|slot| self.rsb_code_ptrs[slot])
    }
}

/// Either architecture's state, for the parts of `jit.rs` that are generic
/// over which guest is running.
pub enum GuestState {
    A32(Box<A32JitState>),
    A64(Box<A64JitState>),
}

impl GuestState {
    pub fn halt_requested(&self) -> bool {
        match self {
            GuestState::A32(s) => s.halt_requested,
            GuestState::A64(s) => s.halt_requested,
        }
    }

    pub fn request_halt(&mut self) {
        match self {
            GuestState::A32(s) => s.halt_requested = true,
            GuestState::A64(s) => s.halt_requested = true,
        }
    }

    pub fn cycles_remaining(&self) -> i64 {
        match self {
            GuestState::A32(s) => s.cycles_remaining,
            GuestState::A64(s) => s.cycles_remaining,
        }
    }

    pub fn set_cycles_remaining(&mut self, cycles: i64) {
        match self {
            GuestState::A32(s) => s.cycles_remaining = cycles,
            GuestState::A64(s) => s.cycles_remaining = cycles,
        }
    }
}
