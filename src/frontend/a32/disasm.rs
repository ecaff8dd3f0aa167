//! Textual A32 disassembler, independent of [`super::visit`]'s IR lifting.
//!
//! Exists purely as a debugging aid (spec.md §8's disassembler scenario is
//! about confirming a decode was read correctly, not about driving
//! translation) so it re-decodes with [`super::decode::ArmInst`] rather than
//! sharing state with the translator.

use super::decode::ArmInst;
use crate::guest::Cond;

fn reg_name(n: u32) -> String {
    match n {
        13 => "sp".to_string(),
        14 => "lr".to_string(),
        15 => "pc".to_string(),
        n => format!("r{n}"),
    }
}

fn cond_suffix(cond: Cond) -> &'static str {
    use Cond::*;
    match cond {
        EQ => "eq",
        NE => "ne",
        CS => "cs",
        CC => "cc",
        MI => "mi",
        PL => "pl",
        VS => "vs",
        VC => "vc",
        HI => "hi",
        LS => "ls",
        GE => "ge",
        LT => "lt",
        GT => "gt",
        LE => "le",
        AL => "",
    }
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Decodes to the same representative subset [`super::visit`] lifts, plus
/// a generic fallback for instructions that subset leaves as `Undefined`.
pub fn disassemble_arm(opcd: u32) -> String {
    let cond = Cond::from(opcd >> 28);
    let suffix = cond_suffix(cond);
    match ArmInst::decode(opcd) {
        ArmInst::B => {
            let simm24 = sign_extend(opcd & 0x00ff_ffff, 24);
            // Displacement relative to this instruction's own address: the
            // PC-relative target is `addr + 8 + simm24*4`, and the `+8`
            // read-ahead bias is folded in here so the printed offset reads
            // relative to the branch instruction itself.
            let disp = simm24 * 4 + 8;
            if disp >= 0 {
                format!("b{suffix} +#{disp}")
            } else {
                format!("b{suffix} -#{}", -disp)
            }
        }
        ArmInst::BlImm => {
            let simm24 = sign_extend(opcd & 0x00ff_ffff, 24);
            let disp = simm24 * 4 + 8;
            if disp >= 0 {
                format!("bl{suffix} +#{disp}")
            } else {
                format!("bl{suffix} -#{}", -disp)
            }
        }
        ArmInst::BlxReg => {
            let rm = opcd & 0xf;
            format!("blx{suffix} {}", reg_name(rm))
        }
        ArmInst::AddImm => {
            let rd = (opcd >> 12) & 0xf;
            let rn = (opcd >> 16) & 0xf;
            let rotate = (opcd >> 8) & 0xf;
            let imm8 = opcd & 0xff;
            let imm = imm8.rotate_right(rotate * 2);
            format!("add{suffix} {}, {}, #{imm}", reg_name(rd), reg_name(rn))
        }
        ArmInst::SubImm => {
            let rd = (opcd >> 12) & 0xf;
            let rn = (opcd >> 16) & 0xf;
            let rotate = (opcd >> 8) & 0xf;
            let imm8 = opcd & 0xff;
            let imm = imm8.rotate_right(rotate * 2);
            format!("sub{suffix} {}, {}, #{imm}", reg_name(rd), reg_name(rn))
        }
        ArmInst::MovImm => {
            let rd = (opcd >> 12) & 0xf;
            let rotate = (opcd >> 8) & 0xf;
            let imm8 = opcd & 0xff;
            let imm = imm8.rotate_right(rotate * 2);
            format!("mov{suffix} {}, #{imm}", reg_name(rd))
        }
        ArmInst::MovReg => {
            let rd = (opcd >> 12) & 0xf;
            let rm = opcd & 0xf;
            format!("mov{suffix} {}, {}", reg_name(rd), reg_name(rm))
        }
        _ => format!("<unknown {opcd:#010x}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b_offset_zero() {
        assert_eq!(disassemble_arm(0xEAFF_FFFE), "b +#0");
    }

    #[test]
    fn blx_register_name() {
        assert_eq!(disassemble_arm(0xE12F_FF3D), "blx sp");
    }

    #[test]
    fn add_immediate_operands() {
        assert_eq!(disassemble_arm(0xE285_3004), "add r3, r5, #4");
    }
}
