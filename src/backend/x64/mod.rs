//! The x86-64 backend: the only [`super::Emitter`] implementation this
//! crate ships, since the pack's teacher and its `dynasmrt` dependency are
//! both x86-64-specific.

pub mod abi;
pub mod constant_pool;
pub mod emitter;

pub use emitter::X64Emitter;
