//! Utilities shared by the adapter and its binary

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
