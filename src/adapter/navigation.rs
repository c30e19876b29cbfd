//! Walking the trace: continue, source step and instruction step
//!
//! All movement is forward and pinned at the last step. These functions only
//! compute the next index; the handler commits it to the session.

use std::collections::HashSet;

use crate::evm::backend::SourceMap;
use crate::evm::Step;

/// Why the session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Step,
    Breakpoint,
    EndOfTrace,
}

impl StopReason {
    /// Value of the `reason` field of a `stopped` event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Step => "step",
            Self::Breakpoint => "breakpoint",
            Self::EndOfTrace => "end-of-trace",
        }
    }

    pub fn description(&self) -> Option<&'static str> {
        match self {
            Self::EndOfTrace => Some("Reached the end of the trace"),
            _ => None,
        }
    }
}

fn last_index(steps: &[Step]) -> usize {
    steps.len().saturating_sub(1)
}

/// Scan forward from `from + 1` to the first step whose pc is a breakpoint
///
/// Stops on the last step when nothing matches. Already sitting on the last
/// step means no movement.
pub fn run_to_breakpoint(
    steps: &[Step],
    from: usize,
    breakpoints: &HashSet<u64>,
) -> (usize, StopReason) {
    let last = last_index(steps);
    let mut index = from.min(last);
    while index < last {
        index += 1;
        if breakpoints.contains(&steps[index].pc) {
            return (index, StopReason::Breakpoint);
        }
    }
    (index, StopReason::EndOfTrace)
}

/// One instruction forward
pub fn step_instruction(steps: &[Step], from: usize) -> usize {
    (from + 1).min(last_index(steps))
}

/// Forward to the first step on a different source line
///
/// Steps without a mapping are passed over. Without a source map, or when
/// the starting step itself is unmapped, this is one instruction step.
pub fn step_source(steps: &[Step], from: usize, source_map: Option<&dyn SourceMap>) -> usize {
    let last = last_index(steps);
    let start = source_map.zip(steps.get(from)).and_then(|(map, step)| {
        map.line_at(step.pc).map(|line| (map, line))
    });
    let Some((map, start_line)) = start else {
        return step_instruction(steps, from);
    };

    let mut index = from;
    while index < last {
        index += 1;
        if map
            .line_at(steps[index].pc)
            .is_some_and(|line| line != start_line)
        {
            break;
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::backend::SourceOffset;

    fn trace(len: u64) -> Vec<Step> {
        (0..len).map(|i| Step::new(i * 10, "JUMPDEST")).collect()
    }

    /// Maps pc `p` to line `p / 30 + 1`; pcs in 100..120 are unmapped
    struct Lines;

    impl SourceMap for Lines {
        fn source_info(&self, pc: u64) -> Option<SourceOffset> {
            (!(100..120).contains(&pc)).then(|| SourceOffset {
                path: "Token.sol".into(),
                offset: pc as usize,
            })
        }

        fn offset_to_line_col(&self, _path: &str, offset: usize) -> Option<(u32, u32)> {
            Some((offset as u32 / 30 + 1, 1))
        }

        fn pcs_for_line(&self, _path: &str, _line: u32) -> Vec<u64> {
            Vec::new()
        }
    }

    #[test]
    fn test_continue_lands_on_breakpoint() {
        let mut steps = trace(50);
        steps[30].pc = 200;
        steps[20].pc = 7;
        let (index, reason) = run_to_breakpoint(&steps, 10, &HashSet::from([200]));
        assert_eq!(index, 30);
        assert_eq!(reason, StopReason::Breakpoint);
    }

    #[test]
    fn test_continue_skips_current_step() {
        let steps = trace(10);
        let (index, _) = run_to_breakpoint(&steps, 3, &HashSet::from([30, 50]));
        assert_eq!(index, 5);
    }

    #[test]
    fn test_continue_without_match_pins_at_end() {
        let steps = trace(50);
        let (index, reason) = run_to_breakpoint(&steps, 10, &HashSet::from([12345]));
        assert_eq!(index, 49);
        assert_eq!(reason, StopReason::EndOfTrace);

        let (index, reason) = run_to_breakpoint(&steps, 49, &HashSet::new());
        assert_eq!(index, 49);
        assert_eq!(reason, StopReason::EndOfTrace);
    }

    #[test]
    fn test_instruction_step_pins_at_end() {
        let steps = trace(3);
        assert_eq!(step_instruction(&steps, 0), 1);
        assert_eq!(step_instruction(&steps, 2), 2);
    }

    #[test]
    fn test_source_step_moves_to_next_line() {
        // pcs 0,10,20 are line 1; 30 starts line 2
        let steps = trace(8);
        assert_eq!(step_source(&steps, 0, Some(&Lines)), 3);
        assert_eq!(step_source(&steps, 3, Some(&Lines)), 6);
    }

    #[test]
    fn test_source_step_passes_unmapped_steps() {
        // 90 is line 4, 100 and 110 unmapped, 120 is line 5
        let steps = trace(20);
        assert_eq!(step_source(&steps, 9, Some(&Lines)), 12);
    }

    #[test]
    fn test_source_step_falls_back_to_instruction() {
        let steps = trace(20);
        assert_eq!(step_source(&steps, 4, None), 5);
        // unmapped start
        assert_eq!(step_source(&steps, 10, Some(&Lines)), 11);
    }

    #[test]
    fn test_source_step_pins_at_end() {
        let steps = trace(5);
        assert_eq!(step_source(&steps, 3, Some(&Lines)), 4);
        assert_eq!(step_source(&steps, 4, Some(&Lines)), 4);
    }

    #[test]
    fn test_end_of_trace_reason() {
        assert_eq!(StopReason::EndOfTrace.as_str(), "end-of-trace");
        assert!(StopReason::EndOfTrace.description().is_some());
        assert!(StopReason::Breakpoint.description().is_none());
    }
}
