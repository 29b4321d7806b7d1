//! Rebuilds the terminal view from the output and input logs.
//!
//! Output and input are captured through separate pipes, so the only evidence of
//! where a typed line belongs is timing: the scheduler waits before each send,
//! which shows up as a gap in the output stream. Any gap longer than half that
//! delay is a place where the next input line may be shown. This is a heuristic.
//! A slow program, a loaded machine, or output that pauses mid-line can all move
//! or hide a gap; callers get a [`DesyncError`] when the evidence does not line up,
//! never a guarantee that it does.

use crate::types::TimestampedUnit;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesyncError {
    Misplaced {
        last_output: String,
        pending_input: String,
        gap_start_ms: u64,
        gap_end_ms: u64,
        input_sent_ms: u64,
    },
    Unconsumed { pending: Vec<String> },
}

impl std::fmt::Display for DesyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Misplaced {
                last_output,
                pending_input,
                gap_start_ms,
                gap_end_ms,
                input_sent_ms,
            } => write!(
                f,
                "cannot match input and output lines: last output `{last_output}`, \
                 pending input `{pending_input}` sent at {input_sent_ms}ms, \
                 outside output gap {gap_start_ms}ms..{gap_end_ms}ms"
            ),
            Self::Unconsumed { pending } => write!(
                f,
                "{} input line(s) could not be placed in the output: {}",
                pending.len(),
                pending.join(" | ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub transcript: Vec<String>,
    pub consumed_inputs: usize,
    pub desync: Option<DesyncError>,
}

pub struct TranscriptAssembler {
    threshold: Duration,
}

impl TranscriptAssembler {
    pub fn new(input_delay: Duration) -> Self {
        Self {
            threshold: input_delay / 2,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn assemble(&self, output: &[TimestampedUnit], input: &[TimestampedUnit]) -> Assembly {
        let origin = earliest(output, input);
        let mut text = String::new();
        let mut next_input = 0usize;
        let mut desync = None;

        for (i, unit) in output.iter().enumerate() {
            text.push_str(&unit.text);
            let Some(next) = output.get(i + 1) else {
                break;
            };
            let gap = next.timestamp.saturating_duration_since(unit.timestamp);
            if gap <= self.threshold {
                continue;
            }
            let Some(pending) = input.get(next_input) else {
                continue;
            };
            if pending.timestamp <= unit.timestamp || pending.timestamp > next.timestamp {
                desync = Some(DesyncError::Misplaced {
                    last_output: last_fragment(&text),
                    pending_input: pending.text.clone(),
                    gap_start_ms: millis_since(origin, unit.timestamp),
                    gap_end_ms: millis_since(origin, next.timestamp),
                    input_sent_ms: millis_since(origin, pending.timestamp),
                });
                break;
            }
            text.push_str(&pending.text);
            text.push('\n');
            next_input += 1;
        }

        if desync.is_none() && next_input < input.len() {
            desync = Some(DesyncError::Unconsumed {
                pending: input[next_input..].iter().map(|u| u.text.clone()).collect(),
            });
        }

        Assembly {
            transcript: split_lines(&text),
            consumed_inputs: next_input,
            desync,
        }
    }
}

pub fn split_lines(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut lines = normalized
        .split('\n')
        .map(str::to_string)
        .collect::<Vec<_>>();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

fn last_fragment(text: &str) -> String {
    text.trim_end_matches(['\r', '\n'])
        .rsplit('\n')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn earliest(output: &[TimestampedUnit], input: &[TimestampedUnit]) -> Option<Instant> {
    output
        .first()
        .into_iter()
        .chain(input.first())
        .map(|u| u.timestamp)
        .min()
}

fn millis_since(origin: Option<Instant>, at: Instant) -> u64 {
    origin
        .map(|o| at.saturating_duration_since(o).as_millis() as u64)
        .unwrap_or(0)
}
