//! Seams to the external debugger machinery
//!
//! The adapter drives a recorded trace but never produces one: a
//! [`DebugBackend`] runs the simulation and answers source-map, variable and
//! decoding queries. Optional capabilities are explicit: a backend without a
//! source map returns `None` rather than being probed at runtime.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

use super::trace::{FunctionInvocation, Simulation, Step, Word};

/// Everything needed to bind a debugger to one deployed contract
#[derive(Debug, Clone, PartialEq)]
pub struct DebugTarget {
    pub contract_address: String,
    pub ethdebug_dir: PathBuf,
    pub rpc_url: String,
    pub function_name: String,
    pub function_args: Vec<Value>,
    pub abi_path: Option<PathBuf>,
}

/// A source position expressed as a byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOffset {
    pub path: String,
    pub offset: usize,
}

/// Where a variable lives at a given program counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Stack,
    Memory,
    Storage,
}

/// A named variable and its location, as reported by debug info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLocation {
    pub name: String,
    pub type_name: String,
    pub kind: LocationKind,
    pub offset: u64,
}

/// A requested breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointDescriptor {
    Line { path: String, line: u32 },
    Function { name: String },
}

impl std::fmt::Display for BreakpointDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line { path, line } => write!(f, "{}:{}", path, line),
            Self::Function { name } => f.write_str(name),
        }
    }
}

/// Program counter <-> source text mapping
pub trait SourceMap {
    /// Source file and byte offset for an instruction
    fn source_info(&self, pc: u64) -> Option<SourceOffset>;

    /// Convert a byte offset to 1-based line and column
    fn offset_to_line_col(&self, path: &str, offset: usize) -> Option<(u32, u32)>;

    /// Every program counter that maps to `line` of `path`
    fn pcs_for_line(&self, path: &str, line: u32) -> Vec<u64>;

    /// File and line for an instruction
    fn line_at(&self, pc: u64) -> Option<(String, u32)> {
        let info = self.source_info(pc)?;
        let (line, _) = self.offset_to_line_col(&info.path, info.offset)?;
        Some((info.path, line))
    }
}

/// Variables live at a program counter
pub trait VariableLocator {
    fn variables_at(&self, pc: u64) -> Vec<VariableLocation>;
}

/// Type-aware decoding of raw machine values for display
pub trait ValueDecoder {
    fn decode_word(&self, word: &Word, type_name: &str) -> Option<String>;

    fn decode_memory(&self, memory: &str, offset: u64, type_name: &str) -> Option<String>;

    fn decode_storage(
        &self,
        storage: &BTreeMap<String, String>,
        slot: u64,
        type_name: &str,
    ) -> Option<String>;
}

/// One live debugger binding
pub trait DebugBackend {
    /// Run the transaction and return its trace
    ///
    /// Anything the simulation wants to print goes to `out`, never to the
    /// process stdout.
    fn run_simulation(&mut self, out: &mut dyn Write) -> Result<Simulation>;

    fn source_map(&self) -> Option<&dyn SourceMap> {
        None
    }

    fn variable_locator(&self) -> Option<&dyn VariableLocator> {
        None
    }

    fn decoder(&self) -> &dyn ValueDecoder;

    /// Program counters a breakpoint stops at; errors mark it unverified
    fn resolve_breakpoint(
        &self,
        breakpoint: &BreakpointDescriptor,
        steps: &[Step],
        functions: Option<&[FunctionInvocation]>,
    ) -> Result<Vec<u64>> {
        resolve_breakpoint(self.source_map(), breakpoint, steps, functions)
    }

    fn load_abi(&mut self, _path: &Path) -> Result<()> {
        Err(Error::Unsupported {
            capability: "Loading an ABI",
        })
    }

    /// Record a baseline chain state to revert to
    fn snapshot_state(&mut self) -> Result<()> {
        Err(Error::Unsupported {
            capability: "State snapshots",
        })
    }
}

/// Creates backends for resolved launch targets
pub trait BackendFactory {
    fn create(&self, target: &DebugTarget) -> Result<Box<dyn DebugBackend>>;
}

/// Options forwarded verbatim to the deploy tool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub contract_file: PathBuf,
    pub rpc_url: String,
    pub constructor_args: Vec<Value>,
    pub fork_url: Option<String>,
    pub fork_block: Option<u64>,
    pub fork_port: u16,
    pub reuse_fork: bool,
    pub keep_fork: bool,
    pub auto_snapshot: bool,
}

/// What the deploy tool reports back
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub contract_address: String,
    pub ethdebug_dir: PathBuf,
    #[serde(default)]
    pub abi_path: Option<PathBuf>,
    /// RPC of the fork the contract was deployed to, if it changed
    #[serde(default)]
    pub rpc_url: Option<String>,
}

/// Compiles and deploys a contract file
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: &DeployRequest) -> Result<Deployment>;
}

/// Default breakpoint resolution
///
/// Line breakpoints go through the source map. Function breakpoints match
/// invocation names; a numeric name (`0x1f`, `31`) is taken as a raw program
/// counter.
pub fn resolve_breakpoint(
    source_map: Option<&dyn SourceMap>,
    breakpoint: &BreakpointDescriptor,
    steps: &[Step],
    functions: Option<&[FunctionInvocation]>,
) -> Result<Vec<u64>> {
    let location = breakpoint.to_string();
    let pcs = match breakpoint {
        BreakpointDescriptor::Line { path, line } => {
            let map = source_map
                .ok_or_else(|| Error::breakpoint_failed(&location, "no source mapping loaded"))?;
            map.pcs_for_line(path, *line)
        }
        BreakpointDescriptor::Function { name } => {
            if let Some(pc) = parse_pc(name) {
                return Ok(vec![pc]);
            }
            functions
                .unwrap_or_default()
                .iter()
                .filter(|f| f.name == *name)
                .filter_map(|f| steps.get(f.entry_step).map(|s| s.pc))
                .collect()
        }
    };

    if pcs.is_empty() {
        return Err(Error::breakpoint_failed(&location, "no instructions map here"));
    }
    Ok(pcs)
}

fn parse_pc(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
