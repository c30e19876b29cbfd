//! Stack trace, scopes, variables and evaluate
//!
//! The model has one synthetic frame. Scopes are fixed and addressed by
//! constant references; every variable is a leaf.

use std::path::Path;

use crate::common::{Error, Result};
use crate::dap::{
    EvaluateResponseBody, Scope, ScopesResponseBody, Source, StackFrame, StackTraceResponseBody,
    Variable, VariablesResponseBody,
};
use crate::evm::backend::{LocationKind, VariableLocation};
use crate::evm::{DebugBackend, Step, Word};

use super::session::Session;

pub const FRAME_ID: i64 = 1;
pub const LOCALS_REF: i64 = 1001;
pub const STACK_REF: i64 = 1002;
pub const STORAGE_REF: i64 = 1003;

/// Displayed for a variable the decoder cannot read
pub const UNAVAILABLE: &str = "<unavailable>";

/// Result of an expression `evaluate` does not understand
pub const NOT_AVAILABLE: &str = "n/a";

pub fn stack_trace(session: &Session) -> StackTraceResponseBody {
    let Some(step) = session.current_step() else {
        return StackTraceResponseBody {
            stack_frames: Vec::new(),
            total_frames: 0,
        };
    };

    let name = session
        .current_function()
        .map(|f| f.name.clone())
        .unwrap_or_else(|| format!("pc:{}", step.pc));

    let mut frame = StackFrame {
        id: FRAME_ID,
        name,
        source: Source::default(),
        line: 1,
        column: 1,
    };

    if let Some(info) = session.source_map().and_then(|map| map.source_info(step.pc)) {
        if let Some((line, column)) = session
            .source_map()
            .and_then(|map| map.offset_to_line_col(&info.path, info.offset))
        {
            frame.line = line;
            frame.column = column;
        }
        frame.source = Source {
            name: Path::new(&info.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            path: Some(info.path),
        };
    }

    StackTraceResponseBody {
        stack_frames: vec![frame],
        total_frames: 1,
    }
}

pub fn scopes() -> ScopesResponseBody {
    let scope = |name: &str, variables_reference| Scope {
        name: name.to_string(),
        variables_reference,
        expensive: false,
    };
    ScopesResponseBody {
        scopes: vec![
            scope("Locals", LOCALS_REF),
            scope("Stack", STACK_REF),
            scope("Storage", STORAGE_REF),
        ],
    }
}

pub fn variables(session: &Session, reference: i64) -> VariablesResponseBody {
    let variables = match (session.current_step(), session.backend()) {
        (Some(step), Some(backend)) => match reference {
            LOCALS_REF => locals(step, backend),
            STACK_REF => stack(step),
            STORAGE_REF => storage(step),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    VariablesResponseBody { variables }
}

fn locals(step: &Step, backend: &dyn DebugBackend) -> Vec<Variable> {
    let Some(locator) = backend.variable_locator() else {
        return Vec::new();
    };
    locator
        .variables_at(step.pc)
        .into_iter()
        .map(|location| {
            let value = read_variable(step, backend, &location);
            Variable {
                name: location.name,
                value: value.unwrap_or_else(|| UNAVAILABLE.to_string()),
                type_name: Some(location.type_name),
                variables_reference: 0,
            }
        })
        .collect()
}

fn read_variable(
    step: &Step,
    backend: &dyn DebugBackend,
    at: &VariableLocation,
) -> Option<String> {
    let decoder = backend.decoder();
    match at.kind {
        LocationKind::Stack => {
            let word = step.stack.get(usize::try_from(at.offset).ok()?)?;
            decoder.decode_word(word, &at.type_name)
        }
        LocationKind::Memory => {
            decoder.decode_memory(step.memory.as_deref()?, at.offset, &at.type_name)
        }
        LocationKind::Storage => {
            decoder.decode_storage(step.storage.as_ref()?, at.offset, &at.type_name)
        }
    }
}

fn leaf(name: String, value: String) -> Variable {
    Variable {
        name,
        value,
        type_name: None,
        variables_reference: 0,
    }
}

fn stack(step: &Step) -> Vec<Variable> {
    step.stack
        .iter()
        .enumerate()
        .map(|(i, word)| leaf(format!("stack[{}]", i), word.to_string()))
        .collect()
}

/// Storage snapshot, one entry per slot in slot order
fn storage(step: &Step) -> Vec<Variable> {
    let Some(snapshot) = &step.storage else {
        return Vec::new();
    };
    let mut slots: Vec<_> = snapshot.iter().collect();
    slots.sort_by_key(|(slot, _)| Word::from_hex(slot).as_u256());
    slots
        .into_iter()
        .map(|(slot, value)| leaf(slot.clone(), Word::from_hex(value).to_string()))
        .collect()
}

/// Evaluate `stack[<n>]` against the current step
///
/// A negative index counts back from the end of the stack list.
/// Anything else evaluates to `n/a`.
pub fn evaluate(session: &Session, expression: &str) -> Result<EvaluateResponseBody> {
    let result = match session.current_step() {
        Some(step) => match parse_stack_index(expression)? {
            Some(index) => stack_entry(step, index)?.to_string(),
            None => NOT_AVAILABLE.to_string(),
        },
        None => NOT_AVAILABLE.to_string(),
    };
    Ok(EvaluateResponseBody {
        result,
        variables_reference: 0,
    })
}

fn parse_stack_index(expression: &str) -> Result<Option<i64>> {
    let Some(inner) = expression
        .trim()
        .strip_prefix("stack[")
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return Ok(None);
    };
    inner
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::InvalidExpression(format!("invalid stack index '{}'", inner)))
}

fn stack_entry(step: &Step, index: i64) -> Result<&Word> {
    let len = step.stack.len();
    let resolved = if index < 0 {
        i64::try_from(len).ok().map(|l| l + index)
    } else {
        Some(index)
    };
    resolved
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| step.stack.get(i))
        .ok_or(Error::StackIndexOutOfRange { index, len })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::adapter::session::EntryPoint;
    use crate::evm::backend::{SourceMap, SourceOffset, ValueDecoder, VariableLocator};
    use crate::evm::decode::AbiDecoder;
    use crate::evm::{FunctionInvocation, Simulation};

    /// Backend whose every pc maps to `contracts/Token.sol` at line 4, col 9
    struct Mapped;

    impl SourceMap for Mapped {
        fn source_info(&self, _pc: u64) -> Option<SourceOffset> {
            Some(SourceOffset {
                path: "contracts/Token.sol".into(),
                offset: 60,
            })
        }

        fn offset_to_line_col(&self, _path: &str, _offset: usize) -> Option<(u32, u32)> {
            Some((4, 9))
        }

        fn pcs_for_line(&self, _path: &str, _line: u32) -> Vec<u64> {
            Vec::new()
        }
    }

    impl VariableLocator for Mapped {
        fn variables_at(&self, _pc: u64) -> Vec<VariableLocation> {
            vec![
                VariableLocation {
                    name: "amount".into(),
                    type_name: "uint256".into(),
                    kind: LocationKind::Stack,
                    offset: 2,
                },
                VariableLocation {
                    name: "owner".into(),
                    type_name: "uint256".into(),
                    kind: LocationKind::Storage,
                    offset: 0,
                },
                VariableLocation {
                    name: "missing".into(),
                    type_name: "uint256".into(),
                    kind: LocationKind::Stack,
                    offset: 9,
                },
            ]
        }
    }

    impl DebugBackend for Mapped {
        fn run_simulation(&mut self, _out: &mut dyn std::io::Write) -> Result<Simulation> {
            Ok(Simulation::default())
        }

        fn source_map(&self) -> Option<&dyn SourceMap> {
            Some(self as &dyn SourceMap)
        }

        fn variable_locator(&self) -> Option<&dyn VariableLocator> {
            Some(self as &dyn VariableLocator)
        }

        fn decoder(&self) -> &dyn ValueDecoder {
            &AbiDecoder
        }
    }

    fn session(functions: Option<Vec<FunctionInvocation>>) -> Session {
        let mut storage = BTreeMap::new();
        storage.insert("0xa".to_string(), "0x5".to_string());
        storage.insert("0x0".to_string(), "0x2a".to_string());
        let mut step = Step::new(0x44, "SLOAD").with_stack([1u64, 2, 300].map(Word::from));
        step.storage = Some(storage);

        let mut session = Session::new();
        session
            .install(
                Box::new(Mapped),
                Simulation {
                    steps: vec![step],
                    functions,
                },
                EntryPoint {
                    step: 0,
                    function: Some(0),
                },
            )
            .unwrap();
        session
    }

    #[test]
    fn test_stack_trace_without_trace_is_empty() {
        let body = stack_trace(&Session::new());
        assert!(body.stack_frames.is_empty());
        assert_eq!(body.total_frames, 0);
    }

    #[test]
    fn test_stack_trace_uses_source_map() {
        let session = session(Some(vec![FunctionInvocation::new("transfer", 0, None)]));
        let body = stack_trace(&session);
        let frame = &body.stack_frames[0];
        assert_eq!(frame.id, 1);
        assert_eq!(frame.name, "transfer");
        assert_eq!((frame.line, frame.column), (4, 9));
        assert_eq!(frame.source.name.as_deref(), Some("Token.sol"));
        assert_eq!(frame.source.path.as_deref(), Some("contracts/Token.sol"));
    }

    #[test]
    fn test_frame_name_falls_back_to_pc() {
        let body = stack_trace(&session(None));
        assert_eq!(body.stack_frames[0].name, "pc:68");
    }

    #[test]
    fn test_scopes_are_fixed() {
        let refs: Vec<i64> = scopes().scopes.iter().map(|s| s.variables_reference).collect();
        assert_eq!(refs, vec![1001, 1002, 1003]);
    }

    #[test]
    fn test_locals_decode_by_location() {
        let vars = variables(&session(None), LOCALS_REF).variables;
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0].value, "300");
        assert_eq!(vars[0].type_name.as_deref(), Some("uint256"));
        assert_eq!(vars[1].value, "42");
        assert_eq!(vars[2].value, UNAVAILABLE);
    }

    #[test]
    fn test_stack_scope_is_hex() {
        let vars = variables(&session(None), STACK_REF).variables;
        let rendered: Vec<_> = vars.iter().map(|v| (v.name.as_str(), v.value.as_str())).collect();
        assert_eq!(
            rendered,
            vec![("stack[0]", "0x1"), ("stack[1]", "0x2"), ("stack[2]", "0x12c")]
        );
    }

    #[test]
    fn test_storage_scope_sorted_by_slot() {
        let vars = variables(&session(None), STORAGE_REF).variables;
        let slots: Vec<_> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(slots, vec!["0x0", "0xa"]);
        assert_eq!(vars[0].value, "0x2a");
    }

    #[test]
    fn test_unknown_reference_is_empty() {
        assert!(variables(&session(None), 7).variables.is_empty());
        assert!(variables(&Session::new(), STACK_REF).variables.is_empty());
    }

    #[test]
    fn test_evaluate_stack_index() {
        let session = session(None);
        assert_eq!(evaluate(&session, "stack[2]").unwrap().result, "0x12c");
        assert_eq!(evaluate(&session, "stack[-1]").unwrap().result, "0x12c");
        assert_eq!(evaluate(&session, "balance").unwrap().result, "n/a");
    }

    #[test]
    fn test_evaluate_out_of_range_fails() {
        let err = evaluate(&session(None), "stack[5]").unwrap_err();
        assert!(matches!(err, Error::StackIndexOutOfRange { index: 5, len: 3 }));
        assert!(evaluate(&session(None), "stack[x]").is_err());
    }

    #[test]
    fn test_evaluate_without_trace_is_placeholder() {
        assert_eq!(evaluate(&Session::new(), "stack[0]").unwrap().result, "n/a");
        assert_eq!(evaluate(&Session::new(), "stack[x]").unwrap().result, "n/a");
    }
}
