//! soldb-dap - Debug Adapter Protocol server for recorded EVM traces
//!
//! An editor launches the adapter, which loads one transaction trace through
//! a [`evm::DebugBackend`] and lets the user step through it, set breakpoints
//! and inspect the stack, memory and storage at each step.

pub mod adapter;
pub mod common;
pub mod dap;
pub mod diagnostics;
pub mod evm;

// Re-export commonly used types for tests
pub use adapter::{Adapter, Server};
pub use common::{Error, Result};
