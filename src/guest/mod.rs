//! Architectural guest state: program status registers, condition codes,
//! and the host-visible register file laid out for direct access by
//! emitted code.

pub mod fpscr;
pub mod psr;
pub mod state;

pub use fpscr::{Fpcr, Fpscr, RoundingMode};
pub use psr::{Cond, CpuMode, Psr};
pub use state::{A32JitState, A64JitState, GuestState, RSB_SIZE};
