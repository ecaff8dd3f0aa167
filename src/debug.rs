//! Trace-level disassembly helpers, mirroring the teacher's
//! `BasicBlock::disas_guest`/`disas_host` (`examples/eigenform-nil/src/
//! block/mod.rs`), which print guest and host instructions through the same
//! `yaxpeax_arm`/`yaxpeax_x86` decoders this crate's own front-end and
//! backend target. Unlike the teacher, which `println!`s unconditionally,
//! these only ever run behind `log::trace!`'s `log_enabled!` guard: decoding
//! a block a second time through an independent decoder is pure overhead
//! when nobody is watching the trace log.
//!
//! These are for human-readable log lines only — never consulted by the
//! translator, optimizer, or backend, and a decode failure here (an
//! encoding the `yaxpeax` tables don't recognise) degrades to a placeholder
//! line rather than aborting compilation.

use yaxpeax_arch::{Decoder, LengthedInstruction};

/// Disassembles a run of fixed-width A32 (non-Thumb) guest words starting at
/// `base_pc`, one line per instruction. Thumb blocks are skipped by callers
/// since `yaxpeax_arm`'s ARMv7 decoder does not speak the 16/32-bit mixed
/// Thumb encoding the way `frontend::a32::thumb` does.
pub fn disas_guest_a32(words: &[u32], base_pc: u32) -> String {
    use yaxpeax_arm::armv7::InstDecoder;

    let dec = InstDecoder::armv5();
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        let pc = base_pc.wrapping_add((i as u32) * 4);
        match dec.decode(word.to_le_bytes().iter().copied()) {
            Ok(inst) => out.push_str(&format!("{pc:08x}  {inst}\n")),
            Err(e) => out.push_str(&format!("{pc:08x}  <undecoded: {e:?}>\n")),
        }
    }
    out
}

/// Disassembles a run of emitted x86-64 host bytes, one line per
/// instruction, stopping at the first byte `yaxpeax_x86` can't decode (code
/// emitted past the block's last instruction, e.g. constant-pool padding,
/// is expected to trip this and is silently dropped from the trace).
pub fn disas_host(code: &[u8]) -> String {
    use yaxpeax_x86::long_mode::InstDecoder;

    let dec = InstDecoder::default();
    let mut out = String::new();
    let mut cur: u64 = 0;
    while (cur as usize) < code.len() {
        match dec.decode(code[(cur as usize)..].iter().copied()) {
            Ok(inst) => {
                out.push_str(&format!("{inst}\n"));
                cur += inst.len();
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_a_single_known_arm_word() {
        // `MOV r0, r0` (the canonical ARM NOP encoding).
        let out = disas_guest_a32(&[0xE1A0_0000], 0x1000);
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("00001000"));
    }

    #[test]
    fn an_undecodable_word_degrades_to_a_placeholder_line_instead_of_panicking() {
        let out = disas_guest_a32(&[0xFFFF_FFFF], 0);
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("undecoded"));
    }

    #[test]
    fn disassembles_a_single_ret_byte() {
        // `ret` (0xC3) is a single-byte x86-64 instruction in every mode.
        let out = disas_host(&[0xC3]);
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn stops_at_the_first_undecodable_byte_instead_of_panicking() {
        let out = disas_host(&[0xC3, 0x0F, 0x0B, 0xFF, 0xFF]);
        assert!(out.lines().count() >= 1);
    }
}
