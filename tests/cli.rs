//! # Command Line Tests
//!
//! Drives the `bagpipe` binary end to end.

use std::fs;
use std::process::{Command, Output};

fn bagpipe(args: &[&str]) -> Output {
  Command::new(env!("CARGO_BIN_EXE_bagpipe"))
    .args(args)
    .env_remove("RUST_LOG")
    .output()
    .unwrap()
}

fn stdout(output: &Output) -> String {
  String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
  String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_version() {
  let output = bagpipe(&["version"]);
  assert!(output.status.success());
  assert_eq!(stdout(&output).trim(), format!("bagpipe {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_list() {
  let output = bagpipe(&["list"]);
  assert!(output.status.success());
  let listing = stdout(&output);
  assert!(listing.contains("types.strings"));
  assert!(listing.contains("strings.transform"));
}

#[test]
fn test_run_builtin_quiet() {
  for strategy in ["sequential", "threaded", "processed"] {
    let output = bagpipe(&["run", "-m", "types.strings", "--quiet", "--strategy", strategy]);
    assert!(output.status.success(), "{}: {}", strategy, stderr(&output));
    let lines: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 3, "{strategy}");
    assert!(lines[0].starts_with("Foo "));
    assert!(lines[1].starts_with("Bar "));
    assert!(lines[2].starts_with("Baz "));
  }
}

#[test]
fn test_run_verbose_prints_summary() {
  let output = bagpipe(&["run", "--module", "types.strings"]);
  assert!(output.status.success());
  assert!(stdout(&output).contains("load: (\"Foo (3)\")"));
  assert!(stderr(&output).contains("SUCCESS"));
}

#[test]
fn test_run_passes_environment() {
  let output = bagpipe(&[
    "run",
    "-m",
    "env_vars.get_passed_env",
    "-q",
    "--env",
    "ENV_TEST_USER=cwandrews",
    "--env",
    "ENV_TEST_NUMBER=123",
    "--env",
    "ENV_TEST_STRING='my_test_string'",
  ]);
  assert!(output.status.success(), "{}", stderr(&output));
  assert_eq!(stdout(&output), "cwandrews\n123\nmy_test_string\n");
}

#[test]
fn test_run_definition_directory() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(
    dir.path().join("pipeline.toml"),
    r#"
    name = "from_file"

    [run]
    quiet = true
    strategy = "threaded"

    [[chain]]
    nodes = ["strings.extract", "strings.transform", "strings.load"]
    "#,
  )
  .unwrap();
  let output = bagpipe(&["run", dir.path().to_str().unwrap()]);
  assert!(output.status.success(), "{}", stderr(&output));
  assert_eq!(stdout(&output), "Foo (3)\nBar (3)\nBaz (3)\n");
}

#[test]
fn test_failed_run_exits_non_zero() {
  let dir = tempfile::tempdir().unwrap();
  let file = dir.path().join("failing.toml");
  fs::write(
    &file,
    r#"
    [[chain]]
    nodes = ["strings.extract", "util.fail"]
    "#,
  )
  .unwrap();
  let output = bagpipe(&["run", "-q", file.to_str().unwrap()]);
  assert!(!output.status.success());
  assert!(stdout(&output).is_empty());
  let errors = stderr(&output);
  assert!(errors.contains("Rejected"));
  assert!(errors.contains("is defunct after 3 failure(s)"));
}

#[test]
fn test_usage_errors() {
  assert!(!bagpipe(&[]).status.success());
  assert!(!bagpipe(&["run"]).status.success());
  assert!(!bagpipe(&["run", "-m", "types.strings", "--strategy", "forked"]).status.success());
  assert!(!bagpipe(&["run", "--env", "NO_EQUALS", "-m", "types.strings"]).status.success());

  let unknown = bagpipe(&["run", "-m", "no.such.pipeline"]);
  assert!(!unknown.status.success());
  assert!(stderr(&unknown).contains("no pipeline registered as 'no.such.pipeline'"));
}
