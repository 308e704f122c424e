//! Purpose: Runtime support layer for loadable object modules.
//! Exports: `api` (host and module surface), `abi` (C function table), `config`, `core`.
//! Role: Hosts run a module per invocation; modules reach the host only through a context.
//! Invariants: A fault inside a module ends that invocation only, never the host.
//! Invariants: Module-facing calls degrade to defaults instead of returning errors.
pub mod abi;
pub mod api;
pub mod config;
pub mod core;

pub use crate::core::diag::init_tracing;
