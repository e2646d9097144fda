use std::path::{Path, PathBuf};

use pgo_compiler::{compile_file, compile_source, CompileOptions, CompilerError, IssueKind};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

#[test]
fn test_unlabeled_bodies_stop_before_scoping() {
    let _ = env_logger::builder().is_test(true).try_init();
    let error = compile_file(&fixture("Unlabeled.tla"), &CompileOptions::default()).unwrap_err();
    let issues = error.issues();
    assert_eq!(issues.len(), 1);
    assert!(matches!(issues[0].kind, IssueKind::MissingLabel { .. }));
    assert!(issues[0].to_string().contains("Helper"));
}

#[test]
fn test_missing_module_lists_checked_paths() {
    let error = compile_file(&fixture("Missing.tla"), &CompileOptions::default()).unwrap_err();
    let issues = error.issues();
    assert_eq!(issues.len(), 1);
    match &issues[0].kind {
        IssueKind::ModuleNotFound { name, paths_checked } => {
            assert_eq!(name, "NoSuchModule");
            assert_eq!(paths_checked.len(), 1);
            assert!(paths_checked[0].ends_with("NoSuchModule.tla"));
        }
        other => panic!("module-not-found が期待されます: {:?}", other),
    }
}

#[test]
fn test_module_path_is_searched_after_input_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("NoSuchModule.tla"), "---- MODULE NoSuchModule ----\nUnit == 1\n====\n").unwrap();
    let options = CompileOptions::default().with_module_path(dir.path());
    let output = compile_file(&fixture("Missing.tla"), &options).unwrap();
    assert!(output.go_source.contains("func main() {"));
}

#[test]
fn test_unknown_identifier_is_reported_with_location() {
    let source = "---- MODULE Bad ----
(* --algorithm Bad
begin
  l1: print undefined_name;
end algorithm *)
====
";
    let error = compile_source("Bad.tla", source, None, &CompileOptions::default()).unwrap_err();
    let issues = error.issues();
    assert_eq!(issues.len(), 1);
    assert!(matches!(&issues[0].kind, IssueKind::UnknownIdentifier { name } if name == "undefined_name"));
    assert_eq!(issues[0].location.start_line, 4);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let error = compile_file(&fixture("DoesNotExist.tla"), &CompileOptions::default()).unwrap_err();
    assert!(matches!(error, CompilerError::Io { .. }));
    assert!(error.issues().is_empty());
}

#[test]
fn test_type_mismatch_is_reported() {
    let source = "---- MODULE Types ----
EXTENDS Integers
(* --algorithm Types
variables x = 0;
begin
  l1: x := \"text\";
end algorithm *)
====
";
    let error = compile_source("Types.tla", source, None, &CompileOptions::default()).unwrap_err();
    assert!(error
        .issues()
        .iter()
        .any(|issue| matches!(issue.kind, IssueKind::TypeMismatch { .. })));
}
