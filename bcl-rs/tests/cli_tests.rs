//! Runner tests: drive the built `bcl` binary on temporary scripts and check
//! its output and exit status.
//!
//! Every run gets a fresh temporary `HOME` and working directory so that no
//! real `~/.bclrc` leaks into the results.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bcl"))
}

fn command(home: &Path) -> Command {
    let mut cmd = Command::new(binary());
    cmd.current_dir(home)
        .env("HOME", home)
        .env_remove("BCL_LOG")
        .env_remove("RUST_LOG")
        .env_remove("BCL_STRICT")
        .env_remove("BCL_MAX_RECURSION")
        .env_remove("BCL_MAX_SCOPE_DEPTH");
    cmd
}

/// Write `src` to `name` inside `dir` and return its path.
fn script(dir: &TempDir, name: &str, src: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, src).unwrap();
    path
}

fn run(dir: &TempDir, args: &[&str]) -> Output {
    command(dir.path()).args(args).output().unwrap()
}

fn run_stdin(dir: &TempDir, args: &[&str], input: &str) -> Output {
    let mut child = command(dir.path())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// ── Exit status ───────────────────────────────────────────────────────────────

#[test]
fn runs_a_script_file() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "hello.bcl", "SET n 6\nPUTS [EXPR $n * 7]\n");
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
}

#[test]
fn exit_code_becomes_status() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "exit.bcl", "PUTS before\nEXIT 3\nPUTS after\n");
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(stdout(&out), "before\n");
}

#[test]
fn error_prints_message_and_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "bad.bcl", "PUTS ok\nNOPE 1 2\n");
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout(&out), "ok\n");
    assert!(stderr(&out).contains("Error: invalid command name \"NOPE\""), "{}", stderr(&out));
}

#[test]
fn top_level_break_exits_0() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "brk.bcl", "PUTS a\nBREAK\nPUTS b\n");
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "a\n");
}

#[test]
fn missing_script_file_exits_1() {
    let dir = TempDir::new().unwrap();
    let out = run(&dir, &["no-such-script.bcl"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("couldn't read file"), "{}", stderr(&out));
}

#[test]
fn usage_error_exits_2() {
    let dir = TempDir::new().unwrap();
    let out = run(&dir, &["-z"]);
    assert_eq!(out.status.code(), Some(2));
    let err = stderr(&out);
    assert!(err.contains("unknown option: -z"), "{err}");
    assert!(err.contains("Usage: bcl"), "{err}");
}

// ── Script sources ────────────────────────────────────────────────────────────

#[test]
fn inline_script_with_arguments() {
    let dir = TempDir::new().unwrap();
    let out = run(&dir, &["-c", "PUTS [ARGV]", "x", "y"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert_eq!(stdout(&out), "x y\n");
}

#[test]
fn file_script_sees_arguments() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "args.bcl", "FOREACH a [ARGV] DO\nPUTS <$a>\nEND\n");
    let out = run(&dir, &[path.to_str().unwrap(), "one", "-two"]);
    assert_eq!(stdout(&out), "<one>\n<-two>\n");
}

#[test]
fn reads_stdin_without_a_script() {
    let dir = TempDir::new().unwrap();
    let out = run_stdin(&dir, &[], "FOR 1 TO 3 DO\nPUTSN $__FOR\nEND\nPUTS\n");
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert_eq!(stdout(&out), "123\n");
}

#[test]
fn dash_reads_stdin() {
    let dir = TempDir::new().unwrap();
    let out = run_stdin(&dir, &["-", "arg"], "PUTS [ARGV]\n");
    assert_eq!(stdout(&out), "arg\n");
}

// ── Strictness and configuration ──────────────────────────────────────────────

const STRAY_END: &str = "PUTS a\nEND\n";

#[test]
fn stray_end_tolerated_by_default() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "stray.bcl", STRAY_END);
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "a\n");
}

#[test]
fn strict_flag_rejects_stray_end() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "stray.bcl", STRAY_END);
    let out = run(&dir, &["-s", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Error: syntax error at line 2"), "{}", stderr(&out));
    assert_eq!(stdout(&out), "");
}

#[test]
fn strict_from_environment() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "stray.bcl", STRAY_END);
    let out = command(dir.path()).env("BCL_STRICT", "on").arg(&path).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn user_config_in_home_is_loaded() {
    let dir = TempDir::new().unwrap();
    script(&dir, ".bclrc", "SET strict_blocks on\n");
    let path = script(&dir, "stray.bcl", STRAY_END);
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn dash_f_alone_skips_user_config() {
    let dir = TempDir::new().unwrap();
    script(&dir, ".bclrc", "SET strict_blocks on\n");
    let path = script(&dir, "stray.bcl", STRAY_END);
    let out = run(&dir, &["-f", "--", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
}

#[test]
fn explicit_config_file_sets_limits() {
    let dir = TempDir::new().unwrap();
    let rc = script(&dir, "limits.rc", "max_recursion = 20\n");
    let path = script(&dir, "deep.bcl", "PROC down DO\ndown\nEND\ndown\n");
    let flag = format!("-f{}", rc.display());
    let out = run(&dir, &[&flag, path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("limit 20"), "{}", stderr(&out));
}

#[test]
fn dash_f_then_script_runs_the_script() {
    let dir = TempDir::new().unwrap();
    script(&dir, ".bclrc", "SET strict_blocks on\n");
    let path = script(&dir, "stray.bcl", "PUTS ran\nEND\n");
    let out = run(&dir, &["-f", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert_eq!(stdout(&out), "ran\n");
}

#[test]
fn exit_inside_subcommand_stops_the_script() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "quit.bcl", "PUTS before\nSET x [EXIT 4]\nPUTS after\n");
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(4));
    assert_eq!(stdout(&out), "before\n");
}

#[test]
fn deeply_nested_script_reports_an_error() {
    let dir = TempDir::new().unwrap();
    let depth = 20_000;
    let src = format!("{}PUTS deep\n{}", "WHILE 1 DO\n".repeat(depth), "END\n".repeat(depth));
    let path = script(&dir, "deep.bcl", &src);
    let out = run(&dir, &[path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("recursion"), "{}", stderr(&out));
}

#[test]
fn debug_flag_logs_to_stderr() {
    let dir = TempDir::new().unwrap();
    let out = run(&dir, &["-d", "-c", "PROC p DO\nEND"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stderr(&out).contains("define procedure"), "{}", stderr(&out));
    assert_eq!(stdout(&out), "");
}
