//! Debug Adapter Protocol (DAP) implementation
//!
//! This module implements the wire framing and message types for the
//! adapter side of DAP.

pub mod codec;
pub mod types;

pub use types::*;
