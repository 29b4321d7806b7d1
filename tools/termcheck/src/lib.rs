pub mod assembler;
pub mod command;
pub mod config;
pub mod errors;
pub mod harness;
pub mod log_retention;
pub mod logging;
pub mod recorder;
pub mod report;
pub mod runtime;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod types;
pub mod verifier;

use clap::{error::ErrorKind, Parser};
use config::{absolutize_path, load_config, resolve_working_dir, CliOverrides, HarnessConfig};
use errors::HarnessError;
use harness::run_test_case;
use logging::{append_run_log, clear_run_logger, init_run_logger, JsonlLogger};
use report::emit_run;
use runtime::HarnessRuntime;
use serde_json::json;
use session::Termination;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "termcheck")]
#[command(about = "Drive an interactive console program from a script and check its output")]
pub struct Cli {
    /// Test script; `<script>Result` next to it holds the expected output.
    pub script: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory the program runs in. Defaults to the script's directory.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
    /// Kill the program after this many milliseconds; 0 waits forever.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Write the transcript to `<script>Result` when that file is absent.
    #[arg(long, default_value_t = false)]
    pub record_missing_result: bool,
}

pub fn run() -> Result<i32, HarnessError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| HarnessError::Io(e.to_string()))?;
    let runtime = HarnessRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &HarnessRuntime,
) -> Result<i32, HarnessError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(HarnessError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.as_deref().map(|p| absolutize_path(cwd, p)),
        working_dir: cli.working_dir.clone(),
        timeout_ms: cli.timeout_ms,
        record_missing_result: cli.record_missing_result,
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;
    let script_path = absolutize_path(cwd, &cli.script);
    let workdir = resolve_working_dir(cwd, &cli.script, &overrides);

    if cfg.logging.enabled {
        init_run_logger(run_logger(&cfg, cwd));
    }
    let outcome = run_case(runtime, &cfg, &script_path, &workdir);
    clear_run_logger();
    outcome
}

fn run_logger(cfg: &HarnessConfig, cwd: &Path) -> JsonlLogger {
    let mut logger = JsonlLogger::new(absolutize_path(cwd, &cfg.logging.path));
    logger.max_payload_bytes = cfg.logging.max_payload_bytes;
    logger.budget_bytes = cfg.logging.budget_bytes;
    logger
}

fn run_case(
    runtime: &HarnessRuntime,
    cfg: &HarnessConfig,
    script_path: &Path,
    workdir: &Path,
) -> Result<i32, HarnessError> {
    append_run_log(
        "info",
        "run.start",
        json!({
            "script": script_path.display().to_string(),
            "working_dir": workdir.display().to_string(),
            "delay_ms": cfg.scheduler.default_delay_ms,
            "timeout_ms": cfg.session.timeout_ms,
        }),
    );

    let run = match run_test_case(runtime, cfg, script_path, workdir) {
        Ok(run) => run,
        Err(error) => {
            append_run_log(
                "error",
                "run.complete",
                json!({ "error": error.to_string(), "aborted": error.aborts_without_report() }),
            );
            return Err(error);
        }
    };

    emit_run(runtime.terminal.as_ref(), &run)?;
    let status = run.exit_status();
    append_run_log(
        "info",
        "run.complete",
        json!({
            "case_id": run.case_id,
            "exit_status": status,
            "inputs_sent": run.inputs_sent,
            "transcript_lines": run.transcript.len(),
            "verified": run.report.is_some(),
            "flagged": run.verification_flagged(),
            "desync": run.desync.is_some(),
        }),
    );

    if let Termination::TimedOut { after } = run.termination {
        return Err(HarnessError::Timeout {
            after_ms: after.as_millis() as u64,
        });
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeFileSystem, FakeTerminal};
    use std::ffi::OsString;
    use std::sync::Arc;

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn help_exits_cleanly() {
        let code = run_with_runtime(
            &args(&["termcheck", "--help"]),
            Path::new("/"),
            &HarnessRuntime::new(),
        )
        .expect("help");
        assert_eq!(code, 0);
    }

    #[test]
    fn missing_script_argument_is_a_cli_error() {
        let err = run_with_runtime(&args(&["termcheck"]), Path::new("/"), &HarnessRuntime::new())
            .expect_err("cli");
        assert!(matches!(err, HarnessError::Cli(_)));
    }

    #[test]
    fn unreadable_script_reports_nothing_and_fails() {
        let terminal = FakeTerminal::default();
        let runtime = HarnessRuntime {
            file_system: Arc::new(FakeFileSystem::with_file(
                "/cfg.toml",
                "[logging]\nenabled = false\n",
            )),
            terminal: Arc::new(terminal.clone()),
            ..HarnessRuntime::new()
        };
        let err = run_with_runtime(
            &args(&["termcheck", "--config", "/cfg.toml", "cases/TestCase0"]),
            Path::new("/grading"),
            &runtime,
        )
        .expect_err("script");
        assert!(matches!(err, HarnessError::ScriptRead { .. }));
        assert!(terminal.written_lines().is_empty());
    }
}
