use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn help_lists_flags() {
    let mut cmd = cargo_bin_cmd!("termcheck");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("--timeout-ms"));
    assert!(stdout.contains("--record-missing-result"));
    assert!(stdout.contains("--working-dir"));
}

#[test]
fn missing_script_exits_one_without_a_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("termcheck");
    cmd.arg("--config")
        .arg(fixture("configs/paced.toml"))
        .arg(temp.path().join("TestCase0"));
    let out = cmd.assert().code(1);
    let output = out.get_output();
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr.clone()).expect("utf8");
    assert!(stderr.contains("cannot read test script"));
}

#[test]
fn invalid_config_path_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("termcheck");
    cmd.arg("--config")
        .arg(fixture("configs/missing.toml"))
        .arg(fixture("cases/greet/TestCase0"));
    cmd.assert().failure();
}

#[cfg(unix)]
mod process {
    use super::fixture;
    use assert_cmd::cargo::cargo_bin_cmd;

    #[test]
    fn matching_transcript_passes() {
        let mut cmd = cargo_bin_cmd!("termcheck");
        cmd.arg("--config")
            .arg(fixture("configs/paced.toml"))
            .arg(fixture("cases/greet/TestCase0"));
        let out = cmd.assert().code(0);
        let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

        assert!(stdout.contains("Output:"));
        assert!(stdout.contains("Name: Ada\nHello Ada\nAgain: Bob\nBye Bob\n"));
        assert!(stdout.contains("Compared to expected output:"));
        assert!(stdout.contains("No error."));
    }

    #[test]
    fn mismatching_transcript_exits_two() {
        let mut cmd = cargo_bin_cmd!("termcheck");
        cmd.arg("--config")
            .arg(fixture("configs/paced.toml"))
            .arg(fixture("cases/greet/TestCase1"));
        let out = cmd.assert().code(2);
        let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

        assert!(stdout.contains("Mismatch 1:"));
        assert!(stdout.contains("  Expected : Again: Eve"));
        assert!(stdout.contains("  Actual   : Again: Bob"));
        assert!(stdout.contains("Mismatch 2:"));
        assert!(!stdout.contains("No error."));
    }

    #[test]
    fn hung_program_times_out_after_printing_partial_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("hang.sh"), "echo started\nexec sleep 30\n")
            .expect("program");
        let script = temp.path().join("TestCase0");
        std::fs::write(&script, "sh hang.sh\n").expect("script");

        let mut cmd = cargo_bin_cmd!("termcheck");
        cmd.arg("--config")
            .arg(fixture("configs/paced.toml"))
            .arg("--timeout-ms")
            .arg("500")
            .arg(&script);
        let out = cmd.assert().code(1);
        let output = out.get_output();
        let stdout = String::from_utf8(output.stdout.clone()).expect("utf8");
        let stderr = String::from_utf8(output.stderr.clone()).expect("utf8");

        assert!(stdout.contains("Output:\n-------------------------------\nstarted\n"));
        assert!(stdout.contains("Program terminated after"));
        assert!(stderr.contains("did not finish within 500ms"));
    }

    #[test]
    fn missing_result_is_recorded_and_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("logs").join("run.jsonl");
        let config = temp.path().join("termcheck.toml");
        std::fs::write(
            &config,
            format!(
                "[scheduler]\npacing = \"never\"\n\n[logging]\npath = \"{}\"\n",
                log_path.display()
            ),
        )
        .expect("config");
        let script = temp.path().join("TestCase0");
        std::fs::write(&script, "echo recorded output\n").expect("script");

        let mut cmd = cargo_bin_cmd!("termcheck");
        cmd.arg("--config")
            .arg(&config)
            .arg("--record-missing-result")
            .arg(&script);
        cmd.assert().code(0);

        let recorded =
            std::fs::read_to_string(temp.path().join("TestCase0Result")).expect("recorded");
        assert_eq!(recorded, "recorded output\n");

        let log = std::fs::read_to_string(&log_path).expect("log");
        assert!(log.lines().any(|line| line.contains("\"event_type\":\"run.start\"")));
        assert!(log
            .lines()
            .any(|line| line.contains("\"event_type\":\"run.complete\"")
                && line.contains("\"case_id\"")));

        // second run verifies against the recorded file instead of rewriting it
        let mut again = cargo_bin_cmd!("termcheck");
        again
            .arg("--config")
            .arg(&config)
            .arg("--record-missing-result")
            .arg(&script);
        let out = again.assert().code(0);
        let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");
        assert!(stdout.contains("No error."));
        assert!(!stdout.contains("Recorded expected output"));
    }

    #[test]
    fn working_dir_flag_changes_where_the_program_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run_dir = temp.path().join("run");
        std::fs::create_dir_all(&run_dir).expect("run dir");
        std::fs::write(run_dir.join("marker.txt"), "found me\n").expect("marker");
        let script = temp.path().join("TestCase0");
        std::fs::write(&script, "cat marker.txt\n").expect("script");

        let mut cmd = cargo_bin_cmd!("termcheck");
        cmd.arg("--config")
            .arg(fixture("configs/paced.toml"))
            .arg("--working-dir")
            .arg(&run_dir)
            .arg(&script);
        let out = cmd.assert().code(0);
        let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");
        assert!(stdout.contains("found me"));
    }
}
