use crate::assembler::{DesyncError, TranscriptAssembler};
use crate::command::resolve_launch;
use crate::config::HarnessConfig;
use crate::errors::HarnessError;
use crate::logging::{append_run_log, set_run_case_id};
use crate::recorder::{capture_lines, OutputRecorder};
use crate::runtime::{CancelToken, FileSystem, HarnessRuntime};
use crate::scheduler::InputScheduler;
use crate::script::{expected_result_path, has_extension, TestScript};
use crate::session::{ProcessSession, SessionChannels, Termination};
use crate::types::RuntimeKind;
use crate::verifier::{load_expected, ArtifactOutcome, OutputVerifier, VerificationReport};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseRun {
    pub case_id: String,
    pub runtime_kind: RuntimeKind,
    pub transcript: Vec<String>,
    pub report: Option<VerificationReport>,
    pub artifacts: Vec<ArtifactOutcome>,
    pub desync: Option<DesyncError>,
    pub stderr_lines: Vec<String>,
    pub termination: Termination,
    pub inputs_sent: usize,
    pub recorded_result: Option<PathBuf>,
}

impl TestCaseRun {
    pub fn verification_flagged(&self) -> bool {
        self.report.as_ref().is_some_and(|r| !r.is_clean())
            || self.artifacts.iter().any(|a| !a.is_clean())
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.termination, Termination::TimedOut { .. })
    }

    pub fn exit_status(&self) -> i32 {
        if self.timed_out() {
            1
        } else if self.verification_flagged() {
            2
        } else {
            0
        }
    }
}

pub fn case_id(script_path: &Path, contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script_path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(contents.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn run_test_case(
    runtime: &HarnessRuntime,
    cfg: &HarnessConfig,
    script_path: &Path,
    workdir: &Path,
) -> Result<TestCaseRun, HarnessError> {
    let fs = runtime.file_system.as_ref();
    let contents = fs
        .read_to_string(script_path)
        .map_err(|e| HarnessError::ScriptRead {
            path: script_path.display().to_string(),
            message: e.to_string(),
        })?;
    let case_id = case_id(script_path, &contents);
    set_run_case_id(&case_id);

    let script = TestScript::parse(&contents)?;
    if has_extension(script_path) {
        append_run_log(
            "warn",
            "script.parsed",
            json!({
                "warning": "script name has an extension",
                "path": script_path.display().to_string(),
            }),
        );
    }
    append_run_log(
        "info",
        "script.parsed",
        json!({
            "path": script_path.display().to_string(),
            "executable": script.command.executable,
            "args": script.command.args,
            "inputs": script.input_count(),
            "steps": script.steps.len(),
        }),
    );

    let (request, runtime_kind) = resolve_launch(&script.command, workdir, &cfg.runtime, fs);
    let pace = cfg.scheduler.pacing.applies_to(runtime_kind);
    let (mut session, channels) = ProcessSession::start(&request)?;
    append_run_log(
        "info",
        "session.launched",
        json!({
            "program": request.program,
            "args": request.args,
            "cwd": request.cwd.display().to_string(),
            "pid": session.id(),
            "runtime": runtime_kind.as_str(),
            "paced": pace,
        }),
    );

    let SessionChannels {
        mut input,
        stdout,
        stderr,
    } = channels;
    let clock = runtime.clock.as_ref();
    let cancel = CancelToken::new();

    let (waited, scheduled, recorded, stderr_lines) = thread::scope(|scope| {
        let recorder = scope.spawn(move || OutputRecorder::new(clock).record(stdout));
        let drain = scope.spawn(move || capture_lines(stderr));
        let scheduler = scope.spawn(|| {
            InputScheduler::new(clock, cfg.input_delay(), pace).run(
                &script.steps,
                &mut input,
                &cancel,
            )
        });

        let waited = session.wait_with_deadline(cfg.timeout(), cfg.poll_interval());
        if waited.is_err() {
            let _ = session.kill();
        }
        // leftover children would keep stdout and stderr open
        session.kill_process_group();
        // unsent lines have no process left to read them
        cancel.cancel();

        let scheduled = scheduler
            .join()
            .map_err(|_| HarnessError::Process("input scheduler thread panicked".to_string()));
        let recorded = recorder
            .join()
            .map_err(|_| HarnessError::Process("output recorder thread panicked".to_string()));
        let stderr_lines = drain
            .join()
            .map_err(|_| HarnessError::Process("stderr drain thread panicked".to_string()));
        (waited, scheduled, recorded, stderr_lines)
    });
    let termination = waited?;
    let scheduled = scheduled?;
    let recorded = recorded?;
    let stderr_lines = stderr_lines?;

    if let Termination::TimedOut { after } = termination {
        append_run_log(
            "warn",
            "session.timeout",
            json!({
                "after_ms": after.as_millis() as u64,
                "inputs_sent": scheduled.log.len(),
                "captured": recorded.log.len(),
            }),
        );
    }

    let assembly =
        TranscriptAssembler::new(scheduled.final_delay).assemble(&recorded.log, &scheduled.log);
    if let Some(desync) = &assembly.desync {
        append_run_log(
            "warn",
            "assembler.desync",
            json!({
                "consumed_inputs": assembly.consumed_inputs,
                "detail": desync,
            }),
        );
    }

    let verifier = OutputVerifier::new(cfg.verifier.tail_alignment);
    let result_path = expected_result_path(script_path);
    let report = load_expected(fs, &result_path)
        .map(|expected| verifier.verify(&assembly.transcript, &expected));
    if let Some(report) = &report {
        append_run_log(
            "info",
            "verifier.summary",
            json!({
                "clean": report.is_clean(),
                "mismatches": report.mismatch_count(),
                "alignment": report.alignment,
                "entries": report.entries,
            }),
        );
    }

    let script_dir = script_path.parent().unwrap_or(workdir);
    let artifacts = cfg
        .artifacts
        .iter()
        .filter_map(|artifact| {
            verifier.verify_file(
                fs,
                &workdir.join(&artifact.actual),
                &script_dir.join(&artifact.expected),
            )
        })
        .collect::<Vec<_>>();

    let recorded_result = if cfg.record_missing_result && report.is_none() {
        record_missing_result(fs, &result_path, &assembly.transcript)?
    } else {
        None
    };

    Ok(TestCaseRun {
        case_id,
        runtime_kind,
        transcript: assembly.transcript,
        report,
        artifacts,
        desync: assembly.desync,
        stderr_lines,
        termination,
        inputs_sent: scheduled.log.len(),
        recorded_result,
    })
}

fn record_missing_result(
    fs: &dyn FileSystem,
    path: &Path,
    transcript: &[String],
) -> Result<Option<PathBuf>, HarnessError> {
    if fs.exists(path) {
        return Ok(None);
    }
    let mut contents = transcript.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs.write_string(path, &contents)?;
    Ok(Some(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    #[test]
    fn case_id_is_stable_and_sensitive_to_contents() {
        let first = case_id(Path::new("/t/TestCase0"), "Prog\n1\n");
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, case_id(Path::new("/t/TestCase0"), "Prog\n1\n"));
        assert_ne!(first, case_id(Path::new("/t/TestCase0"), "Prog\n2\n"));
        assert_ne!(first, case_id(Path::new("/t/TestCase1"), "Prog\n1\n"));
    }

    #[test]
    fn missing_result_is_written_once() {
        let fs = FakeFileSystem::default();
        let path = Path::new("/t/TestCase0Result");
        let transcript = vec!["Name: Ada".to_string(), "Hello Ada".to_string()];

        let written = record_missing_result(&fs, path, &transcript).expect("record");
        assert_eq!(written.as_deref(), Some(path));
        assert_eq!(
            fs.contents(path).as_deref(),
            Some("Name: Ada\nHello Ada\n")
        );

        let again = record_missing_result(&fs, path, &["other".to_string()]).expect("record");
        assert!(again.is_none());
        assert_eq!(
            fs.contents(path).as_deref(),
            Some("Name: Ada\nHello Ada\n")
        );
    }

    #[test]
    fn missing_script_aborts_before_launch() {
        let runtime = HarnessRuntime {
            file_system: std::sync::Arc::new(FakeFileSystem::default()),
            ..HarnessRuntime::new()
        };
        let err = run_test_case(
            &runtime,
            &HarnessConfig::default(),
            Path::new("/t/TestCase9"),
            Path::new("/t"),
        )
        .expect_err("missing");
        assert!(matches!(err, HarnessError::ScriptRead { .. }));
        assert!(err.aborts_without_report());
    }

    #[test]
    fn malformed_pause_aborts_before_launch() {
        let fs = FakeFileSystem::with_file("/t/TestCase1", "Prog\n__pause__ soon\n");
        let runtime = HarnessRuntime {
            file_system: std::sync::Arc::new(fs),
            ..HarnessRuntime::new()
        };
        let err = run_test_case(
            &runtime,
            &HarnessConfig::default(),
            Path::new("/t/TestCase1"),
            Path::new("/t"),
        )
        .expect_err("format");
        assert!(matches!(err, HarnessError::ScriptFormat { line: 2, .. }));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::config::ArtifactConfig;
        use crate::runtime::ProductionFileSystem;
        use crate::types::Pacing;
        use std::sync::Arc;

        fn paced_config(delay_ms: u64) -> HarnessConfig {
            let mut cfg = HarnessConfig::default();
            cfg.scheduler.default_delay_ms = delay_ms;
            cfg.scheduler.pacing = Pacing::Always;
            cfg.session.timeout_ms = 10_000;
            cfg
        }

        fn disk_runtime() -> HarnessRuntime {
            HarnessRuntime {
                file_system: Arc::new(ProductionFileSystem),
                ..HarnessRuntime::new()
            }
        }

        #[test]
        fn prompting_program_is_verified_against_its_result_file() {
            let dir = tempfile::tempdir().expect("tempdir");
            std::fs::write(
                dir.path().join("greet.sh"),
                "printf 'Name: '\nread name\necho \"Hello $name\"\n\
                 printf 'Again: '\nread other\necho \"Bye $other\"\n",
            )
            .expect("program");
            let script = dir.path().join("TestCase0");
            std::fs::write(&script, "sh greet.sh\n// two answers\nAda\nBob\n").expect("script");
            std::fs::write(
                dir.path().join("TestCase0Result"),
                "Name: Ada\nHello Ada\nAgain: Bob\nBye Bob\n",
            )
            .expect("result");

            let run = run_test_case(&disk_runtime(), &paced_config(400), &script, dir.path())
                .expect("run");
            assert_eq!(run.termination, Termination::Exited(Some(0)));
            assert_eq!(run.inputs_sent, 2);
            assert_eq!(run.runtime_kind, RuntimeKind::Native);
            assert_eq!(
                run.transcript,
                vec!["Name: Ada", "Hello Ada", "Again: Bob", "Bye Bob"]
            );
            assert!(run.desync.is_none());
            assert!(run.report.as_ref().is_some_and(VerificationReport::is_clean));
            assert_eq!(run.exit_status(), 0);
        }

        #[test]
        fn missing_result_file_skips_verification_and_can_be_recorded() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = dir.path().join("TestCase1");
            std::fs::write(&script, "echo hello\n").expect("script");

            let mut cfg = paced_config(100);
            cfg.record_missing_result = true;
            let run = run_test_case(&disk_runtime(), &cfg, &script, dir.path()).expect("run");
            assert!(run.report.is_none());
            assert_eq!(run.transcript, vec!["hello"]);
            assert_eq!(run.exit_status(), 0);
            let recorded = run.recorded_result.expect("recorded");
            assert_eq!(
                std::fs::read_to_string(recorded).expect("read"),
                "hello\n"
            );
        }

        #[test]
        fn stderr_is_collected_apart_from_the_transcript() {
            let dir = tempfile::tempdir().expect("tempdir");
            std::fs::write(
                dir.path().join("warn.sh"),
                "echo out\necho problem >&2\n",
            )
            .expect("program");
            let script = dir.path().join("TestCase2");
            std::fs::write(&script, "sh warn.sh\n").expect("script");

            let run = run_test_case(&disk_runtime(), &paced_config(100), &script, dir.path())
                .expect("run");
            assert_eq!(run.transcript, vec!["out"]);
            assert_eq!(run.stderr_lines, vec!["problem"]);
        }

        #[test]
        fn artifacts_are_checked_after_the_run() {
            let dir = tempfile::tempdir().expect("tempdir");
            std::fs::write(dir.path().join("expected.txt"), "one\ntwo\n").expect("expected");
            let script = dir.path().join("TestCase3");
            std::fs::write(&script, "true\n").expect("script");

            let mut cfg = paced_config(100);
            cfg.artifacts = vec![ArtifactConfig {
                actual: PathBuf::from("never-written.txt"),
                expected: PathBuf::from("expected.txt"),
            }];
            let run = run_test_case(&disk_runtime(), &cfg, &script, dir.path()).expect("run");
            assert_eq!(
                run.artifacts,
                vec![ArtifactOutcome::MissingActual {
                    name: "never-written.txt".to_string()
                }]
            );
            assert!(run.verification_flagged());
            assert_eq!(run.exit_status(), 2);
        }

        #[test]
        fn hung_program_is_killed_at_the_deadline() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = dir.path().join("TestCase4");
            std::fs::write(&script, "sleep 30\n__pause__ 20000\nnever\n").expect("script");

            let mut cfg = paced_config(100);
            cfg.session.timeout_ms = 300;
            let run = run_test_case(&disk_runtime(), &cfg, &script, dir.path()).expect("run");
            assert!(run.timed_out());
            assert_eq!(run.inputs_sent, 0);
            assert_eq!(run.exit_status(), 1);
        }

        #[test]
        fn deadline_reaches_children_the_program_forked() {
            let dir = tempfile::tempdir().expect("tempdir");
            std::fs::write(
                dir.path().join("hang.sh"),
                "echo started\nsleep 30\necho done\n",
            )
            .expect("program");
            let script = dir.path().join("TestCase6");
            std::fs::write(&script, "sh hang.sh\n").expect("script");

            let mut cfg = paced_config(100);
            cfg.session.timeout_ms = 300;
            let started = std::time::Instant::now();
            let run = run_test_case(&disk_runtime(), &cfg, &script, dir.path()).expect("run");
            assert!(started.elapsed() < std::time::Duration::from_secs(10));
            assert!(run.timed_out());
            assert_eq!(run.transcript, vec!["started"]);
        }

        #[test]
        fn unknown_program_is_a_launch_error() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = dir.path().join("TestCase5");
            std::fs::write(&script, "termcheck-no-such-program-xyz\n").expect("script");
            let err = run_test_case(&disk_runtime(), &paced_config(100), &script, dir.path())
                .expect_err("launch");
            assert!(matches!(err, HarnessError::Launch { .. }));
        }
    }
}
