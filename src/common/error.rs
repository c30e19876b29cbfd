//! Error types for the debug adapter
//!
//! Every handler failure ends up as the `message` of a failed DAP response,
//! so the display strings are written for the person looking at the editor's
//! debug console.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug adapter
#[derive(Error, Debug)]
pub enum Error {
    // === Launch/Configuration Errors ===
    #[error("{0}")]
    LaunchConfig(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Collaborator Errors ===
    #[error("Failed to generate execution trace: {0}")]
    Simulation(String),

    #[error("Simulation failed to generate trace - check function name and arguments")]
    EmptyTrace,

    #[error("Contract deployment failed: {0}")]
    Deploy(String),

    #[error("{0}")]
    Backend(String),

    #[error("{capability} is not supported by this debugger backend")]
    Unsupported { capability: &'static str },

    // === Breakpoint Errors ===
    #[error("Failed to set breakpoint at {location}: {reason}")]
    BreakpointFailed { location: String, reason: String },

    // === Trace State Errors ===
    #[error("Step {index} is outside the trace (length {len})")]
    StepOutOfRange { index: usize, len: usize },

    #[error("list index out of range: stack[{index}] with {len} entries")]
    StackIndexOutOfRange { index: i64, len: usize },

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a breakpoint failed error
    pub fn breakpoint_failed(location: &str, reason: &str) -> Self {
        Self::BreakpointFailed {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid arguments error for a request
    pub fn invalid_arguments(command: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}
