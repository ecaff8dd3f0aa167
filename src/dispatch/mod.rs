//! The dispatch loop: drives `run_code` cycles, consults the fast-dispatch
//! table and return-stack buffer before falling back to the full
//! [`crate::cache::BlockCache`], and accounts for guest cycles spent.

pub mod fast_dispatch;
pub mod rsb;
pub mod runtime;

pub use fast_dispatch::FastDispatchTable;
pub use rsb::ReturnStackBuffer;
pub use runtime::{BlockExitCode, Runtime};
