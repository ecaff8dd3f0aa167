//! Textual dump of IR blocks, in the same vein as the teacher's
//! `block/fmt.rs` disassembly listings — used by the `elfloader` demo's
//! `-v` flag and by tests that assert on emitted IR shape.

use std::fmt;

use crate::ir::block::{Block, Terminal};
use crate::ir::value::{RegRef, Value};

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Imm(imm) => write!(f, "#{:#x}", imm.bits),
            Value::InstRef(r) => write!(f, "%{}", r.0),
            Value::Reg(RegRef::A32(n)) => write!(f, "r{n}"),
            Value::Reg(RegRef::A32Ext(n)) => write!(f, "s{n}"),
            Value::Reg(RegRef::A64(n)) => write!(f, "x{n}"),
            Value::Reg(RegRef::A64Vec(n)) => write!(f, "v{n}"),
            Value::Cond(c) => write!(f, "{c:?}"),
            Value::AccType(a) => write!(f, "{a:?}"),
            Value::Table(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Interpret(loc) => write!(f, "Interpret({loc})"),
            Terminal::ReturnToDispatch => write!(f, "ReturnToDispatch"),
            Terminal::LinkBlock(loc) => write!(f, "LinkBlock({loc})"),
            Terminal::LinkBlockFast(loc) => write!(f, "LinkBlockFast({loc})"),
            Terminal::PushRSB { return_to, next } => write!(f, "PushRSB({return_to}) -> {next}"),
            Terminal::PopRSBHint(next) => write!(f, "PopRSBHint -> {next}"),
            Terminal::FastDispatchHint(next) => write!(f, "FastDispatchHint -> {next}"),
            Terminal::If { cond, then, otherwise } => {
                write!(f, "If({cond:?}) {{ {then} }} else {{ {otherwise} }}")
            }
            Terminal::CheckBit { bit, then, otherwise } => {
                write!(f, "CheckBit(%{}) {{ {then} }} else {{ {otherwise} }}", bit.0)
            }
            Terminal::CheckHalt(next) => write!(f, "CheckHalt -> {next}"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "block {} -> {} [{} cycles]", self.entry, self.end, self.cycle_count)?;
        for (i, inst) in self.insts.iter().enumerate() {
            write!(f, "  %{i} = {:?}", inst.opcode)?;
            if !inst.args.is_empty() {
                write!(f, " ")?;
                for (j, arg) in inst.args.iter().enumerate() {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
            }
            if inst.use_count == 0 && !inst.has_side_effect() {
                write!(f, "  ; unused")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "  {}", self.terminal)
    }
}
