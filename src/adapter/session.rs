//! Trace and breakpoint state for one debugging session
//!
//! The session is created empty when the server starts and becomes live once
//! `launch` installs a backend and its trace. Everything here is owned by the
//! server loop; nothing is shared with other tasks.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::common::{Error, Result};
use crate::evm::backend::SourceMap;
use crate::evm::{BreakpointDescriptor, DebugBackend, FunctionInvocation, Simulation, Step};

/// The only thread the adapter ever reports
pub const THREAD_ID: i64 = 1;

/// Breakpoints as requested by the client, grouped by source path
///
/// Each `setBreakpoints` replaces the requests and the resolved program
/// counters of its path. The set the navigation engine stops at is the union
/// over all paths.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    requests: HashMap<String, Vec<BreakpointDescriptor>>,
    pcs_by_source: HashMap<String, BTreeSet<u64>>,
    pcs: HashSet<u64>,
}

impl BreakpointStore {
    /// Replace everything stored for `path`
    pub fn replace(&mut self, path: &str, requests: Vec<BreakpointDescriptor>) {
        self.requests.insert(path.to_string(), requests);
        self.pcs_by_source.remove(path);
        self.rebuild();
    }

    /// Record program counters resolved for a breakpoint in `path`
    pub fn register(&mut self, path: &str, pcs: impl IntoIterator<Item = u64>) {
        self.pcs_by_source
            .entry(path.to_string())
            .or_default()
            .extend(pcs);
        self.rebuild();
    }

    pub fn requests(&self, path: &str) -> &[BreakpointDescriptor] {
        self.requests.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Paths with at least one stored request
    pub fn paths(&self) -> Vec<String> {
        self.requests
            .iter()
            .filter(|(_, requests)| !requests.is_empty())
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn pcs(&self) -> &HashSet<u64> {
        &self.pcs
    }

    fn rebuild(&mut self) {
        self.pcs = self.pcs_by_source.values().flatten().copied().collect();
    }
}

/// Where a freshly launched session stops first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub step: usize,
    /// Index into the function trace
    pub function: Option<usize>,
}

/// Session state driven by the request handlers
#[derive(Default)]
pub struct Session {
    backend: Option<Box<dyn DebugBackend>>,
    trace: Option<Vec<Step>>,
    functions: Option<Vec<FunctionInvocation>>,
    current_step: usize,
    current_function: Option<usize>,
    pub breakpoints: BreakpointStore,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a launched backend and its trace current
    pub fn install(
        &mut self,
        backend: Box<dyn DebugBackend>,
        simulation: Simulation,
        entry: EntryPoint,
    ) -> Result<()> {
        let len = simulation.steps.len();
        if entry.step >= len {
            return Err(Error::StepOutOfRange {
                index: entry.step,
                len,
            });
        }

        self.backend = Some(backend);
        self.trace = Some(simulation.steps);
        self.functions = simulation.functions;
        self.current_step = entry.step;
        self.current_function = entry.function;
        Ok(())
    }

    /// Drop the backend and trace, keeping stored breakpoints
    pub fn clear(&mut self) {
        self.backend = None;
        self.trace = None;
        self.functions = None;
        self.current_step = 0;
        self.current_function = None;
        self.breakpoints.pcs_by_source.clear();
        self.breakpoints.rebuild();
    }

    pub fn is_live(&self) -> bool {
        self.backend.is_some() && self.trace.is_some()
    }

    pub fn trace(&self) -> Option<&[Step]> {
        self.trace.as_deref()
    }

    pub fn functions(&self) -> Option<&[FunctionInvocation]> {
        self.functions.as_deref()
    }

    pub fn backend(&self) -> Option<&dyn DebugBackend> {
        self.backend.as_deref()
    }

    pub fn source_map(&self) -> Option<&dyn SourceMap> {
        self.backend()?.source_map()
    }

    pub fn current_index(&self) -> usize {
        self.current_step
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.trace()?.get(self.current_step)
    }

    pub fn current_function(&self) -> Option<&FunctionInvocation> {
        self.functions()?.get(self.current_function?)
    }

    /// Move to `index` and refresh the current function
    ///
    /// The current function becomes the innermost invocation containing the
    /// new index. It is kept unchanged when no invocation contains it.
    pub fn move_to(&mut self, index: usize) -> Result<()> {
        let len = self.trace().map_or(0, <[Step]>::len);
        if index >= len {
            return Err(Error::StepOutOfRange { index, len });
        }
        self.current_step = index;

        if let Some(functions) = self.functions() {
            let innermost = functions
                .iter()
                .enumerate()
                .filter(|(_, f)| f.contains(index))
                .max_by_key(|(_, f)| f.entry_step)
                .map(|(i, _)| i);
            if innermost.is_some() {
                self.current_function = innermost;
            }
        }
        Ok(())
    }

    /// Resolve one breakpoint against the live trace
    pub fn resolve(&self, breakpoint: &BreakpointDescriptor) -> Result<Vec<u64>> {
        let (Some(backend), Some(trace)) = (self.backend(), self.trace()) else {
            return Err(Error::breakpoint_failed(
                &breakpoint.to_string(),
                "no active debugging session",
            ));
        };
        backend.resolve_breakpoint(breakpoint, trace, self.functions())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("live", &self.is_live())
            .field("steps", &self.trace().map(<[Step]>::len))
            .field("current_step", &self.current_step)
            .field("current_function", &self.current_function().map(|f| &f.name))
            .field("breakpoints", &self.breakpoints)
            .finish()
    }
}
