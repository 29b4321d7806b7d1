use crate::assembler::DesyncError;
use crate::errors::HarnessError;
use crate::harness::TestCaseRun;
use crate::runtime::Terminal;
use crate::session::Termination;
use crate::verifier::{RULE, THIN_RULE};

pub const OUTPUT_HEADER: &str = "Output:";

pub fn render_run(run: &TestCaseRun) -> Vec<String> {
    let mut lines = vec![
        RULE.to_string(),
        OUTPUT_HEADER.to_string(),
        THIN_RULE.to_string(),
    ];
    lines.extend(run.transcript.iter().cloned());
    if let Some(desync) = &run.desync {
        lines.extend(render_desync(desync));
    }
    if let Termination::TimedOut { after } = run.termination {
        lines.push(format!(
            "Program terminated after {}ms without finishing.",
            after.as_millis()
        ));
    }
    if let Some(report) = &run.report {
        lines.extend(report.render());
    }
    for artifact in &run.artifacts {
        lines.extend(artifact.render());
    }
    if let Some(path) = &run.recorded_result {
        lines.push(format!("Recorded expected output: {}", path.display()));
    }
    lines
}

fn render_desync(desync: &DesyncError) -> Vec<String> {
    match desync {
        DesyncError::Misplaced {
            last_output,
            pending_input,
            gap_start_ms,
            gap_end_ms,
            input_sent_ms,
        } => vec![
            "Cannot match input and output lines.".to_string(),
            format!("The last output line: {last_output}"),
            format!("The last input line: {pending_input}"),
            format!(
                "Input sent at {input_sent_ms}ms, output paused {gap_start_ms}ms..{gap_end_ms}ms."
            ),
        ],
        DesyncError::Unconsumed { pending } => {
            let mut lines = vec![format!(
                "{} input line(s) were not echoed into the output:",
                pending.len()
            )];
            lines.extend(pending.iter().map(|line| format!("  {line}")));
            lines
        }
    }
}

pub fn emit_run(terminal: &dyn Terminal, run: &TestCaseRun) -> Result<(), HarnessError> {
    for line in render_run(run) {
        terminal.write_line(&line)?;
    }
    for line in &run.stderr_lines {
        terminal.write_error_line(line)?;
    }
    Ok(())
}
