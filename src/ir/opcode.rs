//! IR opcode table.
//!
//! spec.md treats the *full* opcode enumeration as an external concern owned
//! by the middle-end but documented outside this crate ("the per-instruction
//! ARM decoder tables... a reference list of IR opcodes and their type
//! signatures is owned by the middle-end but enumerated outside this
//! document", §1). What lives here is the *shape* of that table plus the
//! representative opcode set the front-end, optimizer, and backend in this
//! crate actually exercise.

use crate::ir::types::Type;

/// One IR operation.
///
/// Every variant has a fixed argument-type signature and result type,
/// checked by [`crate::ir::emitter::IREmitter`] at construction (debug only,
/// per spec.md §3) and re-checked by [`crate::opt::verify`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `Identity(x)`. Inserted by optimizer passes as a placeholder for a
    /// value that has been folded away; removed by `IdentityRemoval`.
    Identity,

    // -- arithmetic / logic, 32-bit -----------------------------------
    Add32,
    Sub32,

    // -- arithmetic, 64-bit (A64 minimal subset, non-flag-setting) -----
    /// `ADD (immediate)`/register-register add without the `S` suffix:
    /// does not set NZCV, unlike [`Opcode::Add32`]'s `S`-only A32 usage.
    Add64,
    /// `SUB (immediate)`/register-register sub without the `S` suffix.
    Sub64,
    And32,
    Or32,
    Eor32,
    Not32,
    Mul32,

    /// Barrel-shifter family. Each carries its own carry-out, extracted via
    /// [`Opcode::GetCarryFromOp`].
    LogicalShiftLeft32,
    LogicalShiftRight32,
    ArithmeticShiftRight32,
    RotateRight32,

    IsZero32,
    IsNegative32,

    SignExtendByteToWord,
    SignExtendHalfToWord,
    ZeroExtendByteToWord,
    ZeroExtendHalfToWord,

    ByteReverseWord,
    ByteReverseHalf,
    ByteReversePackedHalf,

    /// Truncates a 32-bit value to its low halfword. Named after
    /// dynarmic's `LeastSignificantHalf`.
    LeastSignificantHalf,
    /// Truncates a 32-bit value to its low byte. Named after dynarmic's
    /// `LeastSignificantByte`.
    LeastSignificantByte,

    // -- pseudo-ops: extract a side channel from a flag-producing op ---
    /// Extracts the carry-out of the instruction it references. Valid only
    /// when that instruction is one of the carry-producing arithmetic or
    /// shift opcodes.
    GetCarryFromOp,
    /// Extracts the signed-overflow flag of the instruction it references.
    GetOverflowFromOp,
    /// Extracts the packed {N,Z,C,V} flags of the instruction it references.
    GetNZCVFromOp,

    // -- direct flag/register access ------------------------------------
    GetCFlag,
    SetCFlag,
    GetZFlag,
    SetZFlag,
    GetNFlag,
    SetNFlag,
    GetVFlag,
    SetVFlag,
    GetNZCV,
    SetNZCV,

    GetRegisterA32,
    SetRegisterA32,
    GetExtendedRegisterA32,
    SetExtendedRegisterA32,

    GetRegisterA64,
    SetRegisterA64,
    GetVectorA64,
    SetVectorA64,

    // -- memory -----------------------------------------------------------
    ReadMemory8,
    ReadMemory16,
    ReadMemory32,
    ReadMemory64,
    ReadMemory128,
    WriteMemory8,
    WriteMemory16,
    WriteMemory32,
    WriteMemory64,
    WriteMemory128,

    // -- control-flow side channels (lowered to Terminal, not host code) --
    CallSupervisor,
    ExceptionRaised,

    // -- coprocessor (A32) -------------------------------------------------
    CoprocInternalOperation,
    CoprocSendOneWord,
    CoprocSendTwoWords,
    CoprocGetOneWord,
    CoprocGetTwoWords,

    // -- cache maintenance (A64) -------------------------------------------
    InstructionCacheOperationRaised,
    DataCacheOperationRaised,
}

/// Signature of an opcode: argument types in order, and result type.
pub struct Signature {
    pub args: &'static [Type],
    pub result: Type,
}

impl Opcode {
    pub fn signature(self) -> Signature {
        use Opcode::*;
        use Type::*;
        match self {
            Identity => Signature { args: &[Opaque], result: Opaque },

            Add32 | Sub32 | And32 | Or32 | Eor32 | Mul32 => {
                Signature { args: &[U32, U32], result: U32 }
            }
            Not32 => Signature { args: &[U32], result: U32 },

            Add64 | Sub64 => Signature { args: &[U64, U64], result: U64 },

            LogicalShiftLeft32 | LogicalShiftRight32 | ArithmeticShiftRight32
            | RotateRight32 => Signature { args: &[U32, U8], result: U32 },

            IsZero32 | IsNegative32 => Signature { args: &[U32], result: U1 },

            SignExtendByteToWord | ZeroExtendByteToWord => {
                Signature { args: &[U8], result: U32 }
            }
            SignExtendHalfToWord | ZeroExtendHalfToWord => {
                Signature { args: &[U16], result: U32 }
            }

            ByteReverseWord => Signature { args: &[U32], result: U32 },
            ByteReverseHalf => Signature { args: &[U16], result: U16 },
            ByteReversePackedHalf => Signature { args: &[U32], result: U32 },

            LeastSignificantHalf => Signature { args: &[U32], result: U16 },
            LeastSignificantByte => Signature { args: &[U32], result: U8 },

            GetCarryFromOp | GetOverflowFromOp => {
                Signature { args: &[Opaque], result: U1 }
            }
            GetNZCVFromOp => Signature { args: &[Opaque], result: NZCVFlags },

            GetCFlag | GetZFlag | GetNFlag | GetVFlag => {
                Signature { args: &[], result: U1 }
            }
            SetCFlag | SetZFlag | SetNFlag | SetVFlag => {
                Signature { args: &[U1], result: Void }
            }
            GetNZCV => Signature { args: &[], result: NZCVFlags },
            SetNZCV => Signature { args: &[NZCVFlags], result: Void },

            GetRegisterA32 => Signature { args: &[A32Reg], result: U32 },
            SetRegisterA32 => Signature { args: &[A32Reg, U32], result: Void },
            GetExtendedRegisterA32 => {
                Signature { args: &[A32ExtReg], result: U32 }
            }
            SetExtendedRegisterA32 => {
                Signature { args: &[A32ExtReg, U32], result: Void }
            }

            GetRegisterA64 => Signature { args: &[A64Reg], result: U64 },
            SetRegisterA64 => Signature { args: &[A64Reg, U64], result: Void },
            GetVectorA64 => Signature { args: &[A64Vec], result: U128 },
            SetVectorA64 => Signature { args: &[A64Vec, U128], result: Void },

            ReadMemory8 => Signature { args: &[U64, AccType], result: U8 },
            ReadMemory16 => Signature { args: &[U64, AccType], result: U16 },
            ReadMemory32 => Signature { args: &[U64, AccType], result: U32 },
            ReadMemory64 => Signature { args: &[U64, AccType], result: U64 },
            ReadMemory128 => Signature { args: &[U64, AccType], result: U128 },
            WriteMemory8 => Signature { args: &[U64, U8, AccType], result: Void },
            WriteMemory16 => Signature { args: &[U64, U16, AccType], result: Void },
            WriteMemory32 => Signature { args: &[U64, U32, AccType], result: Void },
            WriteMemory64 => Signature { args: &[U64, U64, AccType], result: Void },
            WriteMemory128 => {
                Signature { args: &[U64, U128, AccType], result: Void }
            }

            CallSupervisor => Signature { args: &[U32], result: Void },
            ExceptionRaised => Signature { args: &[U64, U32], result: Void },

            CoprocInternalOperation => {
                Signature { args: &[CoprocInfo], result: Void }
            }
            CoprocSendOneWord => {
                Signature { args: &[CoprocInfo, U32], result: Void }
            }
            CoprocSendTwoWords => {
                Signature { args: &[CoprocInfo, U32, U32], result: Void }
            }
            CoprocGetOneWord => Signature { args: &[CoprocInfo], result: U32 },
            CoprocGetTwoWords => {
                Signature { args: &[CoprocInfo], result: Table }
            }

            InstructionCacheOperationRaised | DataCacheOperationRaised => {
                Signature { args: &[U8, U64], result: Void }
            }
        }
    }

    /// `true` for the `GetXFromOp` pseudo-op family described in spec.md
    /// §3 ("IR::Inst... a pseudo-op link").
    pub fn is_pseudo_op(self) -> bool {
        matches!(
            self,
            Opcode::GetCarryFromOp | Opcode::GetOverflowFromOp | Opcode::GetNZCVFromOp
        )
    }

    /// `true` if this opcode is a valid producer for a pseudo-op extracting
    /// its carry-out/overflow/NZCV side channel.
    pub fn produces_flags(self) -> bool {
        matches!(
            self,
            Opcode::Add32
                | Opcode::Sub32
                | Opcode::LogicalShiftLeft32
                | Opcode::LogicalShiftRight32
                | Opcode::ArithmeticShiftRight32
                | Opcode::RotateRight32
        )
    }

    /// `true` if removing an otherwise-unused instance of this opcode would
    /// change observable behaviour. Drives `DeadCodeElimination`
    /// (spec.md §4.3.5, invariant 4 in §8).
    pub fn has_side_effect(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            SetCFlag
                | SetZFlag
                | SetNFlag
                | SetVFlag
                | SetNZCV
                | SetRegisterA32
                | SetExtendedRegisterA32
                | SetRegisterA64
                | SetVectorA64
                | WriteMemory8
                | WriteMemory16
                | WriteMemory32
                | WriteMemory64
                | WriteMemory128
                | CallSupervisor
                | ExceptionRaised
                | CoprocInternalOperation
                | CoprocSendOneWord
                | CoprocSendTwoWords
                | InstructionCacheOperationRaised
                | DataCacheOperationRaised
        )
    }

    /// `true` for ops the optimizer's constant-propagation pass knows how to
    /// fold when every argument is an immediate.
    pub fn is_foldable(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add32 | Sub32
                | And32
                | Or32
                | Eor32
                | Not32
                | Mul32
                | LogicalShiftLeft32
                | LogicalShiftRight32
                | ArithmeticShiftRight32
                | RotateRight32
                | IsZero32
                | IsNegative32
                | SignExtendByteToWord
                | SignExtendHalfToWord
                | ZeroExtendByteToWord
                | ZeroExtendHalfToWord
                | ByteReverseWord
                | ByteReverseHalf
                | ByteReversePackedHalf
                | LeastSignificantHalf
                | LeastSignificantByte
        )
    }
}
