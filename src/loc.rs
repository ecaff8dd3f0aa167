//! [`LocationDescriptor`]: the key identifying one translation unit.
//!
//! A block is not identified by PC alone: the Thumb/ARM state bit and the
//! floating-point rounding/vector-length mode bits change how the same PC
//! must be decoded, so both ride along in the same 64-bit key used for
//! cache lookups, RSB entries, and fast-dispatch hashing.

use std::fmt;

use crate::guest::{Fpscr, Psr};

/// Bits of `FPSCR` that affect translation: rounding mode, flush-to-zero,
/// and the vector stride/length fields. `pub(crate)` so the backend can
/// recompute a `unique_hash()`-compatible value from live `JitState` for
/// `PopRSBHint`/`FastDispatchHint` codegen without duplicating the mask.
pub(crate) const FPSCR_MODE_MASK: u32 = 0x07F7_0000;

/// Bits of A64 `FPCR` (rounding mode, flush-to-zero, default-NaN and
/// friends) plus the single-step bit that change how code at a PC must be
/// decoded/emitted; packed into the low 13 bits of the A64 unique hash.
const A64_MODE_BITS: u32 = 13;
const A64_MODE_MASK: u64 = (1 << A64_MODE_BITS) - 1;

/// Identifies one basic block: a guest program counter plus the handful of
/// mode bits that change how code at that address is decoded.
///
/// `A32`/`T32` descriptors pack `(pc << 32) | (fpscr & FPSCR_MODE_MASK) |
/// (T ? 1 : 0) | (E ? 2 : 0)`. Packing a 64-bit A64 PC alongside mode bits
/// the same way (PC in the high 32 bits) isn't viable, since A64 PCs are
/// full 64-bit values; instead the low 13 bits hold the FPCR mode bits and
/// the single-step flag, and the PC occupies the remaining high bits
/// (truncating its own top 13 bits, which is lossless for the canonical
/// 48-bit virtual address space every supported host actually uses).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocationDescriptor {
    A32 { pc: u32, cpsr_bits: u32, fpscr_bits: u32 },
    A64 { pc: u64, fpcr_bits: u32, single_step: bool },
}

impl LocationDescriptor {
    pub fn a32(pc: u32, cpsr: Psr, fpscr: Fpscr) -> Self {
        let t = if cpsr.thumb() { 1 } else { 0 };
        let e = if cpsr.big_endian() { 2 } else { 0 };
        LocationDescriptor::A32 {
            pc,
            cpsr_bits: t | e,
            fpscr_bits: fpscr.0 & FPSCR_MODE_MASK,
        }
    }

    pub fn a64(pc: u64, fpcr: u32, single_step: bool) -> Self {
        LocationDescriptor::A64 { pc, fpcr_bits: fpcr & (A64_MODE_MASK as u32 >> 1), single_step }
    }

    pub fn pc(self) -> u64 {
        match self {
            LocationDescriptor::A32 { pc, .. } => pc as u64,
            LocationDescriptor::A64 { pc, .. } => pc,
        }
    }

    pub fn is_thumb(self) -> bool {
        matches!(self, LocationDescriptor::A32 { cpsr_bits, .. } if cpsr_bits & 1 != 0)
    }

    pub fn is_big_endian(self) -> bool {
        matches!(self, LocationDescriptor::A32 { cpsr_bits, .. } if cpsr_bits & 2 != 0)
    }

    pub fn with_pc32(self, new_pc: u32) -> Self {
        match self {
            LocationDescriptor::A32 { cpsr_bits, fpscr_bits, .. } => {
                LocationDescriptor::A32 { pc: new_pc, cpsr_bits, fpscr_bits }
            }
            a64 => a64,
        }
    }

    pub fn advance_a32(self, amount: i32) -> Self {
        match self {
            LocationDescriptor::A32 { pc, cpsr_bits, fpscr_bits } => LocationDescriptor::A32 {
                pc: (pc as i64 + amount as i64) as u32,
                cpsr_bits,
                fpscr_bits,
            },
            a64 => a64,
        }
    }

    pub fn with_pc64(self, new_pc: u64) -> Self {
        match self {
            LocationDescriptor::A64 { fpcr_bits, single_step, .. } => {
                LocationDescriptor::A64 { pc: new_pc, fpcr_bits, single_step }
            }
            a32 => a32,
        }
    }

    pub fn advance_a64(self, amount: i64) -> Self {
        match self {
            LocationDescriptor::A64 { pc, fpcr_bits, single_step } => LocationDescriptor::A64 {
                pc: (pc as i64 + amount) as u64,
                fpcr_bits,
                single_step,
            },
            a32 => a32,
        }
    }

    pub fn set_thumb(self, thumb: bool) -> Self {
        match self {
            LocationDescriptor::A32 { pc, cpsr_bits, fpscr_bits } => LocationDescriptor::A32 {
                pc,
                cpsr_bits: if thumb { cpsr_bits | 1 } else { cpsr_bits & !1 },
                fpscr_bits,
            },
            a64 => a64,
        }
    }

    /// The value this descriptor hashes to for cache/RSB/fast-dispatch
    /// lookups. Must match `EmitTerminalPopRSBHint`'s packing exactly so a
    /// runtime-computed hash can recognise a cache hit.
    pub fn unique_hash(self) -> u64 {
        match self {
            LocationDescriptor::A32 { pc, cpsr_bits, fpscr_bits } => {
                let pc_u64 = (pc as u64) << 32;
                let fpscr_u64 = fpscr_bits as u64;
                let t_u64 = (cpsr_bits & 1) as u64;
                let e_u64 = (cpsr_bits & 2) as u64;
                pc_u64 | fpscr_u64 | t_u64 | e_u64
            }
            LocationDescriptor::A64 { pc, fpcr_bits, single_step } => {
                let pc_bits = (pc << A64_MODE_BITS) & !A64_MODE_MASK;
                let mode_bits = ((fpcr_bits as u64) << 1) | (single_step as u64);
                pc_bits | (mode_bits & A64_MODE_MASK)
            }
        }
    }
}

impl fmt::Display for LocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationDescriptor::A32 { pc, cpsr_bits, .. } => {
                write!(f, "{}:{:#010x}", if cpsr_bits & 1 != 0 { "T32" } else { "A32" }, pc)
            }
            LocationDescriptor::A64 { pc, .. } => write!(f, "A64:{pc:#018x}"),
        }
    }
}
