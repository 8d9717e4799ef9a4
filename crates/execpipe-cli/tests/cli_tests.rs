//! Tests for the execpipe binary.

use std::process::{Command, Output};

use rstest::rstest;

fn execpipe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_execpipe"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run execpipe")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn string_through_cat_and_md5sum() {
    let out = execpipe(&["-s", "test123", "--", "cat", "|", "md5sum"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "cc03e747a6afbbcbf8be7668acfebee5  -\n");
}

#[test]
fn file_in_file_out() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    std::fs::write(&input, "b\na\nb\nc\n").unwrap();

    let out = execpipe(&[
        "-i",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "sort",
        "|",
        "uniq",
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "");
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "a\nb\nc\n");
}

#[test]
fn digest_of_first_stage() {
    let out = execpipe(&["-s", "abc", "--digest", "cat"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "abc");
    assert!(
        stderr(&out)
            .contains("sha256 ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
        "stderr: {}",
        stderr(&out)
    );
}

#[test]
fn digest_mid_chain_keeps_data_flowing() {
    let out = execpipe(&["-s", "abc", "--digest", "cat", "|", "tr", "a-z", "A-Z"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "ABC");
    assert!(stderr(&out).contains("sha256 ba7816bf"));
}

#[test]
fn explicit_environment() {
    let out = execpipe(&["-e", "TEST=123", "/bin/sh", "-c", "echo $TEST"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "123\n");
}

#[test]
fn missing_program_fails_with_report() {
    let out = execpipe(&["xyz-non-existing-program"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("exit 255"), "stderr: {}", stderr(&out));
}

#[test]
fn no_path_does_not_search() {
    let dir = tempfile::tempdir().unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_execpipe"))
        .args(["--no-path", "true"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(stderr(&out).contains("exit 255"), "stderr: {}", stderr(&out));
}

#[test]
fn crash_reports_signal_name() {
    let out = execpipe(&["/bin/sh", "-c", "kill -SEGV $$"]);
    assert!(!out.status.success());
    assert!(
        stderr(&out).contains("signal 11 (SIGSEGV)"),
        "stderr: {}",
        stderr(&out)
    );
}

#[test]
fn json_result() {
    let out = execpipe(&["--json", "/bin/sh", "-c", "exit 3", "|", "cat"]);
    assert!(!out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(json["stages"][0]["program"], "/bin/sh");
    assert_eq!(json["stages"][0]["status"]["kind"], "exited");
    assert_eq!(json["stages"][0]["status"]["code"], 3);
    assert_eq!(json["stages"][1]["status"]["code"], 0);
}

#[test]
fn verbose_prints_debug_lines() {
    let out = execpipe(&["-vv", "true"]);
    assert!(out.status.success());
    assert!(stderr(&out).contains("execpipe: stage 0: spawned true"), "stderr: {}", stderr(&out));
}

#[test]
fn rust_log_traces_pipeline_start() {
    let out = Command::new(env!("CARGO_BIN_EXE_execpipe"))
        .args(["-s", "hi", "--digest", "cat"])
        .env("RUST_LOG", "execpipe=debug")
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hi");
    assert!(stderr(&out).contains("starting pipeline"), "stderr: {}", stderr(&out));
}

#[test]
fn config_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "debug_level = \"info\"\nbuffer_capacity = 8\n").unwrap();

    let out = execpipe(&["--config", config.to_str().unwrap(), "-s", "hi", "cat"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hi");
    assert!(stderr(&out).contains("spawned cat"));
}

#[rstest]
#[case::no_pipeline(&[])]
#[case::unknown_option(&["--bogus", "cat"])]
#[case::empty_stage(&["cat", "|", "|", "sort"])]
#[case::bad_env(&["-e", "NOPE", "cat"])]
#[case::missing_input(&["-i", "/nonexistent/input", "cat"])]
fn usage_and_engine_errors(#[case] args: &[&str]) {
    let out = execpipe(args);
    assert!(!out.status.success());
    assert!(stderr(&out).starts_with("execpipe: "), "stderr: {}", stderr(&out));
}

#[rstest]
#[case::short("-h")]
#[case::long("--help")]
fn help(#[case] flag: &str) {
    let out = execpipe(&[flag]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Usage:"));
}

#[test]
fn version() {
    let out = execpipe(&["-V"]);
    assert!(out.status.success());
    assert_eq!(
        stdout(&out),
        format!("execpipe {}\n", env!("CARGO_PKG_VERSION"))
    );
}
