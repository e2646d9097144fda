use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const COUNTER: &str = r#"---- MODULE Counter ----
EXTENDS Integers
CONSTANT N

(* --algorithm Counter
variables counter = 0;
process Worker \in 1..N
variable tmp = 0;
begin
  read: tmp := counter;
  write: counter := tmp + 1;
end process;
end algorithm *)
====
"#;

const HELLO: &str = r#"---- MODULE Hello ----
EXTENDS Integers

(* --algorithm Hello
variables greeting = "hello";
begin
  l1: print greeting;
end algorithm *)
====
"#;

fn write_input(dir: &Path, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}

fn pgo() -> Command {
    let mut command = Command::cargo_bin("pgo").unwrap();
    command.args(["--no-gofmt", "--no-color"]);
    command
}

#[test]
fn test_compiles_into_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", HELLO);
    let out = dir.path().join("out");

    pgo().arg(&input).arg("-o").arg(&out).assert().success();

    let generated = fs::read_to_string(out.join("main.go")).unwrap();
    assert!(generated.starts_with("package main\n"));
    assert!(generated.contains("fmt.Println(greeting)"));
}

#[test]
fn test_diagnostics_fail_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", &HELLO.replace("print greeting", "print missing"));
    let out = dir.path().join("out");

    pgo()
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown-identifier"))
        .stderr(predicate::str::contains("Hello.tla:7:"));
    assert!(!out.join("main.go").exists());
}

#[test]
fn test_rejected_input_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", &HELLO.replace("print greeting", "print missing"));

    pgo()
        .arg(&input)
        .arg("--check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"))
        .stderr(predicate::str::contains("<INPUT>"));
}

#[test]
fn test_config_file_supplies_constants_and_names() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Counter.tla", COUNTER);
    fs::write(
        dir.path().join("pgo.toml"),
        "[build]\noutput_dir = \"gen\"\noutput_file = \"counter.go\"\npackage = \"counter\"\n\n[constants]\nN = \"2\"\n",
    )
    .unwrap();

    pgo()
        .arg(&input)
        .arg("--config")
        .arg(dir.path().join("pgo.toml"))
        .assert()
        .success();

    let generated = fs::read_to_string(dir.path().join("gen").join("counter.go")).unwrap();
    assert!(generated.starts_with("package counter\n"));
    assert!(generated.contains("sync.RWMutex"));
}

#[test]
fn test_missing_constant_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Counter.tla", COUNTER);

    pgo()
        .arg(&input)
        .arg("--check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("option-incompatibility"));
}

#[test]
fn test_state_server_strategy_flag() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Counter.tla", COUNTER);
    let out = dir.path().join("out");

    pgo()
        .arg(&input)
        .args(["-c", "N=3", "--strategy", "state-server", "-o"])
        .arg(&out)
        .assert()
        .success();

    let generated = fs::read_to_string(out.join("main.go")).unwrap();
    assert!(generated.contains("distsys.NewStateServerResource("));
}

#[test]
fn test_runtime_tree_is_copied() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", HELLO);
    let runtime = dir.path().join("runtime");
    fs::create_dir_all(runtime.join("datatypes")).unwrap();
    fs::write(runtime.join("datatypes").join("set.go"), "package datatypes\n").unwrap();
    let out = dir.path().join("out");

    pgo()
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .arg("--runtime-dir")
        .arg(&runtime)
        .assert()
        .success();

    assert!(out.join("src").join("pgo").join("datatypes").join("set.go").is_file());
}

#[test]
fn test_explicit_runtime_dir_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", HELLO);

    pgo()
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join("out"))
        .arg("--runtime-dir")
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent"));
}

#[test]
fn test_check_does_not_write() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", HELLO);

    pgo().arg(&input).arg("--check").assert().success();
    assert!(!dir.path().join("main.go").exists());
}

#[test]
fn test_missing_output_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "Hello.tla", HELLO);

    pgo()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("build.output_dir"));
}

#[test]
fn test_unreadable_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    pgo()
        .arg(dir.path().join("Nope.tla"))
        .arg("--check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nope.tla"));
}
