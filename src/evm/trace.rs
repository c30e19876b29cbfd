//! Recorded execution trace types
//!
//! A trace is produced once per launch by the backend and is read-only to
//! the adapter afterwards.

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One stack slot as recorded by the tracer
///
/// Tracers emit words as hex strings (with or without `0x`) or as JSON
/// integers. Anything that does not parse as a 256-bit word is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Int(U256),
    Text(String),
}

impl Word {
    /// Parse a hex word, `0x` prefix optional
    pub fn from_hex(s: &str) -> Self {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() {
            return Self::Text(s.to_string());
        }
        U256::from_str_radix(digits, 16)
            .map(Self::Int)
            .unwrap_or_else(|_| Self::Text(s.to_string()))
    }

    pub fn as_u256(&self) -> Option<U256> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl From<u64> for Word {
    fn from(v: u64) -> Self {
        Self::Int(U256::from(v))
    }
}

impl From<U256> for Word {
    fn from(v: U256) -> Self {
        Self::Int(v)
    }
}

/// Integral words render as lowercase hex, everything else as recorded
impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "0x{:x}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Word {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self::from(n),
            Raw::Text(s) => Self::from_hex(&s),
        })
    }
}

/// One instruction of the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub pc: u64,
    pub op: String,
    #[serde(default)]
    pub stack: Vec<Word>,
    /// Memory as a hex string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Storage snapshot, slot -> word, both hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    /// Bare step, used by tests and synthetic traces
    pub fn new(pc: u64, op: impl Into<String>) -> Self {
        Self {
            pc,
            op: op.into(),
            stack: Vec::new(),
            memory: None,
            storage: None,
            gas: None,
            depth: None,
            error: None,
        }
    }

    pub fn with_stack(mut self, stack: impl IntoIterator<Item = Word>) -> Self {
        self.stack = stack.into_iter().collect();
        self
    }
}

/// A named function call reconstructed from the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInvocation {
    pub name: String,
    pub entry_step: usize,
    #[serde(default)]
    pub exit_step: Option<usize>,
}

impl FunctionInvocation {
    pub fn new(name: impl Into<String>, entry_step: usize, exit_step: Option<usize>) -> Self {
        Self {
            name: name.into(),
            entry_step,
            exit_step,
        }
    }

    /// Whether `index` lies inside this call; an open call extends to the end
    pub fn contains(&self, index: usize) -> bool {
        index >= self.entry_step && self.exit_step.map_or(true, |exit| index <= exit)
    }
}

/// Result of running the simulation
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    pub steps: Vec<Step>,
    /// `None` when the backend cannot reconstruct calls at all
    pub functions: Option<Vec<FunctionInvocation>>,
}
