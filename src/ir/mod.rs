//! Typed intermediate representation.
//!
//! A [`block::Block`] is a straight-line run of [`inst::Inst`]s built by an
//! [`emitter::IREmitter`] during translation, then rewritten in place by the
//! passes in [`crate::opt`] before the backend in [`crate::backend`] walks
//! it once to allocate registers and emit host code.

pub mod block;
pub mod emitter;
pub mod fmt;
pub mod inst;
pub mod opcode;
pub mod types;
pub mod value;

pub use block::{Block, Terminal};
pub use emitter::{FlagResult, IREmitter, ShiftResult};
pub use inst::{Inst, MAX_SCALAR_ARGS};
pub use opcode::{Opcode, Signature};
pub use types::Type;
pub use value::{AccType, Immediate, InstRef, RegRef, Value, MAX_INLINE_TABLE};
