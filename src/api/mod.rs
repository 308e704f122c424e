//! Purpose: Define the public Rust API boundary for hosts and Rust-written modules.
//! Exports: Context, invocation, and the core types hosts need to drive a module.
//! Role: Public, additive-only surface; the C ABI in `abi` is built on top of it.
//! Invariants: Every invocation owns its own context; nothing here is shared between runs.

mod context;
mod invocation;

pub use crate::config::RuntimeConfig;
#[doc(hidden)]
pub use crate::core::error::to_status_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::fault::{BarrierState, FaultKind, FaultReport, Termination};
pub use crate::core::format::FormatBuilder;
pub use crate::core::output::{CallbackType, OutputBuffer};
pub use crate::core::parser::{ArgPacker, ArgType, Parser, empty_sentinel, is_sentinel};
pub use context::{Module, ModuleContext};
pub use invocation::{Invocation, InvocationReport, Runtime};
