//! Replay backend for pre-recorded traces
//!
//! Reads `<ethdebugDir>/trace.json`, written by the tracing toolchain after a
//! transaction has been simulated:
//!
//! ```json
//! {
//!   "contractAddress": "0x...",
//!   "steps": [{ "pc": 0, "op": "PUSH1", "stack": [] }],
//!   "functions": [{ "name": "transfer", "entryStep": 12, "exitStep": 40 }],
//!   "sources": { "0": "src/Token.sol" },
//!   "instructions": [{ "pc": 0, "sourceId": 0, "offset": 120 }],
//!   "variables": [{ "name": "amount", "type": "uint256", "location": "stack",
//!                   "offset": 1, "pcRange": [30, 90] }]
//! }
//! ```
//!
//! Source files are looked up next to the debug directory so offsets can be
//! turned into lines.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy_json_abi::JsonAbi;
use serde::Deserialize;

use crate::common::{Error, Result};

use super::backend::{
    BackendFactory, DebugBackend, DebugTarget, LocationKind, SourceMap, SourceOffset,
    ValueDecoder, VariableLocation, VariableLocator,
};
use super::decode::AbiDecoder;
use super::trace::{FunctionInvocation, Simulation, Step};

/// File name of the recorded trace inside the debug directory
pub const TRACE_FILE: &str = "trace.json";

/// How many parent directories to search for source files
const SOURCE_SEARCH_DEPTH: usize = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordedTrace {
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    contract_name: Option<String>,
    steps: Vec<Step>,
    #[serde(default)]
    functions: Option<Vec<FunctionInvocation>>,
    #[serde(default)]
    sources: BTreeMap<u32, String>,
    #[serde(default)]
    instructions: Vec<InstructionMapping>,
    #[serde(default)]
    variables: Vec<RecordedVariable>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionMapping {
    pc: u64,
    source_id: u32,
    offset: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordedVariable {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    location: LocationKind,
    offset: u64,
    pc_range: (u64, u64),
}

/// Source text with precomputed line starts
#[derive(Debug)]
struct SourceText {
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceText {
    fn new(text: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            line_starts,
            len: text.len(),
        }
    }

    fn line_col(&self, offset: usize) -> Option<(u32, u32)> {
        if offset > self.len {
            return None;
        }
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let col = offset - self.line_starts[line - 1];
        Some((line as u32, col as u32 + 1))
    }
}

/// Backend replaying a `trace.json`
pub struct RecordedBackend {
    target: DebugTarget,
    trace_path: PathBuf,
    contract_name: Option<String>,
    recorded_address: Option<String>,
    steps: Option<Vec<Step>>,
    functions: Option<Vec<FunctionInvocation>>,
    sources: BTreeMap<u32, String>,
    texts: HashMap<String, SourceText>,
    pc_sources: HashMap<u64, SourceOffset>,
    variables: Vec<RecordedVariable>,
    abi_functions: Option<BTreeSet<String>>,
    decoder: AbiDecoder,
}

impl RecordedBackend {
    /// Load the recording for a target
    pub fn open(target: &DebugTarget) -> Result<Self> {
        let trace_path = target.ethdebug_dir.join(TRACE_FILE);
        let content = std::fs::read_to_string(&trace_path).map_err(|e| Error::FileRead {
            path: trace_path.display().to_string(),
            error: e.to_string(),
        })?;
        let recorded: RecordedTrace = serde_json::from_str(&content).map_err(|e| {
            Error::Backend(format!("Invalid trace file {}: {}", trace_path.display(), e))
        })?;

        let mut texts = HashMap::new();
        for path in recorded.sources.values() {
            match find_source(path, &target.ethdebug_dir) {
                Some(file) => match std::fs::read_to_string(&file) {
                    Ok(text) => {
                        texts.insert(path.clone(), SourceText::new(&text));
                    }
                    Err(e) => {
                        tracing::warn!("Cannot read source file {}: {}", file.display(), e)
                    }
                },
                None => tracing::warn!("Source file not found: {}", path),
            }
        }

        let pc_sources = recorded
            .instructions
            .iter()
            .filter_map(|i| {
                let path = recorded.sources.get(&i.source_id)?;
                Some((
                    i.pc,
                    SourceOffset {
                        path: path.clone(),
                        offset: i.offset,
                    },
                ))
            })
            .collect();

        Ok(Self {
            target: target.clone(),
            trace_path,
            contract_name: recorded.contract_name,
            recorded_address: recorded.contract_address,
            steps: Some(recorded.steps),
            functions: recorded.functions,
            sources: recorded.sources,
            texts,
            pc_sources,
            variables: recorded.variables,
            abi_functions: None,
            decoder: AbiDecoder,
        })
    }
}

impl DebugBackend for RecordedBackend {
    fn run_simulation(&mut self, out: &mut dyn Write) -> Result<Simulation> {
        if let Some(recorded) = &self.recorded_address {
            if !recorded.eq_ignore_ascii_case(&self.target.contract_address) {
                return Err(Error::Simulation(format!(
                    "{} was recorded for {}, not {}",
                    self.trace_path.display(),
                    recorded,
                    self.target.contract_address
                )));
            }
        }

        if let Some(known) = &self.abi_functions {
            let name = self
                .target
                .function_name
                .split('(')
                .next()
                .unwrap_or_default();
            if !name.is_empty() && !known.contains(name) {
                writeln!(out, "Warning: function '{}' not found in ABI", name)?;
            }
        }

        let steps = self
            .steps
            .take()
            .ok_or_else(|| Error::Simulation("trace has already been replayed".to_string()))?;

        if let Some(name) = &self.contract_name {
            writeln!(out, "Contract: {}", name)?;
        }
        writeln!(
            out,
            "Loaded {} steps from {}",
            steps.len(),
            self.trace_path.display()
        )?;

        Ok(Simulation {
            steps,
            functions: self.functions.clone(),
        })
    }

    fn source_map(&self) -> Option<&dyn SourceMap> {
        (!self.pc_sources.is_empty()).then_some(self as &dyn SourceMap)
    }

    fn variable_locator(&self) -> Option<&dyn VariableLocator> {
        (!self.variables.is_empty()).then_some(self as &dyn VariableLocator)
    }

    fn decoder(&self) -> &dyn ValueDecoder {
        &self.decoder
    }

    fn load_abi(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let mut value: serde_json::Value = serde_json::from_str(&content)?;
        // Compiler artifacts wrap the ABI in an object
        if let Some(abi) = value.get_mut("abi") {
            value = abi.take();
        }
        let abi: JsonAbi = serde_json::from_value(value)?;
        self.abi_functions = Some(abi.functions.keys().cloned().collect());
        Ok(())
    }
}

impl SourceMap for RecordedBackend {
    fn source_info(&self, pc: u64) -> Option<SourceOffset> {
        self.pc_sources.get(&pc).cloned()
    }

    fn offset_to_line_col(&self, path: &str, offset: usize) -> Option<(u32, u32)> {
        self.texts.get(path)?.line_col(offset)
    }

    fn pcs_for_line(&self, path: &str, line: u32) -> Vec<u64> {
        let sources = matching_sources(self.sources.values(), path);
        let mut pcs: Vec<u64> = self
            .pc_sources
            .iter()
            .filter(|(_, info)| sources.contains(info.path.as_str()))
            .filter(|(_, info)| {
                self.offset_to_line_col(&info.path, info.offset)
                    .is_some_and(|(l, _)| l == line)
            })
            .map(|(pc, _)| *pc)
            .collect();
        pcs.sort_unstable();
        pcs
    }
}

impl VariableLocator for RecordedBackend {
    fn variables_at(&self, pc: u64) -> Vec<VariableLocation> {
        self.variables
            .iter()
            .filter(|v| (v.pc_range.0..=v.pc_range.1).contains(&pc))
            .map(|v| VariableLocation {
                name: v.name.clone(),
                type_name: v.type_name.clone(),
                kind: v.location.clone(),
                offset: v.offset,
            })
            .collect()
    }
}

impl std::fmt::Debug for RecordedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedBackend")
            .field("trace_path", &self.trace_path)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

/// Factory producing [`RecordedBackend`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedFactory;

impl BackendFactory for RecordedFactory {
    fn create(&self, target: &DebugTarget) -> Result<Box<dyn DebugBackend>> {
        Ok(Box::new(RecordedBackend::open(target)?))
    }
}

/// Recorded sources an editor path refers to
///
/// Editors send absolute paths while recordings keep project-relative ones,
/// so a recorded path matches when it is a suffix of the requested one. Only
/// when nothing matches that way does the bare file name decide.
fn matching_sources<'a>(
    recorded: impl IntoIterator<Item = &'a String>,
    requested: &str,
) -> BTreeSet<&'a str> {
    let requested = Path::new(requested);
    let recorded: Vec<&str> = recorded.into_iter().map(String::as_str).collect();

    let by_suffix: BTreeSet<&str> = recorded
        .iter()
        .copied()
        .filter(|path| requested.ends_with(path))
        .collect();
    if !by_suffix.is_empty() {
        return by_suffix;
    }

    let Some(name) = requested.file_name() else {
        return BTreeSet::new();
    };
    recorded
        .into_iter()
        .filter(|path| Path::new(path).file_name() == Some(name))
        .collect()
}

fn find_source(path: &str, debug_dir: &Path) -> Option<PathBuf> {
    let direct = PathBuf::from(path);
    if direct.is_file() {
        return Some(direct);
    }

    let file_name = direct.file_name()?;
    let mut dir = Some(debug_dir);
    for _ in 0..=SOURCE_SEARCH_DEPTH {
        let current = dir?;
        for candidate in [current.join(path), current.join(file_name)] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        dir = current.parent();
    }
    None
}
