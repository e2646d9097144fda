use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use pgo_compiler::backend::go::{GoDeclaration, GoExpression, GoStatement};
use pgo_compiler::{compile_file, compile_source, CompileOptions, CompileOutput, CompilerError, Strategy};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(name: &str, options: &CompileOptions) -> CompileOutput {
    init_logging();
    match compile_file(&fixture(name), options) {
        Ok(output) => output,
        Err(error) => {
            let details: Vec<String> = error.issues().iter().map(ToString::to_string).collect();
            panic!("{} のコンパイルに失敗しました: {}\n{}", name, error, details.join("\n"))
        }
    }
}

fn issue_codes(error: &CompilerError) -> Vec<&'static str> {
    error.issues().iter().map(|issue| issue.kind.code()).collect()
}

#[test]
fn test_extended_module_operators_are_available() {
    let output = compile("Adder.tla", &CompileOptions::default());
    let source = &output.go_source;
    assert!(source.starts_with("package main\n"));
    assert!(source.contains("func main() {"));
    assert!(source.contains("fmt.Println(total)"));
    assert!(output.issues.is_empty());
}

#[test]
fn test_multi_process_in_process_uses_locks_and_goroutines() {
    let options = CompileOptions::default().with_constant("N", "3");
    let output = compile("Counter.tla", &options);
    let source = &output.go_source;
    assert!(source.contains("\"sync\""));
    assert!(source.contains("sync.RWMutex"));
    assert!(source.contains(".Lock()"));
    assert!(source.contains(".Unlock()"));
    assert!(source.contains("go "));
    assert!(source.contains("func main() {"));
    // 大域変数 counter を読み書きするラベルは同じロックグループに入る
    assert!(!source.contains("pGoLock[1]"));
}

#[test]
fn test_multi_process_state_server_uses_resources() {
    let options = CompileOptions::default()
        .with_constant("N", "2")
        .with_strategy(Strategy::StateServer);
    let output = compile("Counter.tla", &options);
    let source = &output.go_source;
    assert!(source.contains("\"pgo/distsys\""));
    assert!(source.contains("distsys.NewStateServerResource("));
    assert!(source.contains("distsys.AcquireResources("));
    assert!(source.contains("distsys.ReleaseResources("));
    assert!(!source.contains("sync.RWMutex"));
}

#[test]
fn test_state_server_rejects_single_process() {
    let options = CompileOptions::default().with_strategy(Strategy::StateServer);
    let error = compile_file(&fixture("Adder.tla"), &options).unwrap_err();
    assert_eq!(issue_codes(&error), vec!["option-incompatibility"]);
}

#[test]
fn test_missing_constant_value_is_reported() {
    let error = compile_file(&fixture("Counter.tla"), &CompileOptions::default()).unwrap_err();
    assert!(issue_codes(&error).contains(&"option-incompatibility"));
}

#[test]
fn test_unused_constant_is_a_warning() {
    let options = CompileOptions::default().with_constant("Unused", "1");
    let output = compile("Adder.tla", &options);
    let codes: Vec<&str> = output.issues.iter().map(|issue| issue.kind.code()).collect();
    assert_eq!(codes, vec!["unused-constant"]);
    assert!(output.issues.iter().all(|issue| !issue.is_error()));
}

#[test]
fn test_while_loop_becomes_for_with_break() {
    let output = compile("Loop.tla", &CompileOptions::default());
    let source = &output.go_source;
    assert!(source.contains("for {"));
    assert!(source.contains("break"));
    assert!(source.contains("datatypes.SeqAppend("));
    assert!(source.contains("\"pgo/datatypes\""));
}

#[test]
fn test_modular_archetype_takes_resources() {
    let output = compile("Echo.tla", &CompileOptions::default());
    let source = &output.go_source;
    assert!(source.contains("distsys.ArchetypeResource"));
    assert!(source.contains(".Read()"));
    assert!(source.contains(".Write("));
    assert!(source.contains("error {"));
    assert!(!source.contains("func main()"));
}

#[test]
fn test_modular_with_in_process_is_only_a_warning() {
    let options = CompileOptions::default().with_strategy(Strategy::InProcess);
    let output = compile("Echo.tla", &options);
    assert!(output
        .issues
        .iter()
        .any(|issue| issue.kind.code() == "option-incompatibility" && !issue.is_error()));
}

#[test]
fn test_package_name_is_configurable() {
    let options = CompileOptions {
        package: "adder".to_string(),
        ..CompileOptions::default()
    };
    let output = compile("Adder.tla", &options);
    assert!(output.go_source.starts_with("package adder\n"));
    assert_eq!(output.module.package, "adder");
}

fn compile_text(name: &str, algorithm: &str) -> CompileOutput {
    init_logging();
    let source = format!("---- MODULE {} ----\nEXTENDS Integers\n{}\n====\n", name, algorithm);
    match compile_source(&format!("{}.tla", name), &source, None, &CompileOptions::default()) {
        Ok(output) => output,
        Err(error) => {
            let details: Vec<String> = error.issues().iter().map(ToString::to_string).collect();
            panic!("{} のコンパイルに失敗しました: {}\n{}", name, error, details.join("\n"))
        }
    }
}

/// ロックを取る文なら `(対象, true)`、解放する文なら `(対象, false)`
fn lock_action(statement: &GoStatement) -> Option<(String, bool)> {
    let GoStatement::Expression(GoExpression::Call { function, args, .. }) = statement else {
        return None;
    };
    let GoExpression::Selector { target, field } = function.as_ref() else {
        return None;
    };
    if !args.is_empty() {
        return None;
    }
    match field.as_str() {
        "Lock" | "RLock" => Some((format!("{:?}", target), true)),
        "Unlock" | "RUnlock" => Some((format!("{:?}", target), false)),
        _ => None,
    }
}

type Held = BTreeSet<String>;

/// 文の並びを実行したときのロックの状態。`None` は制御が途切れた
fn run_locks(statements: &[GoStatement], held: Held, breaks: &mut Vec<Held>) -> Option<Held> {
    let mut held = held;
    for statement in statements {
        if let Some((target, acquire)) = lock_action(statement) {
            if acquire {
                assert!(held.insert(target.clone()), "{} を二重に取っています", target);
            } else {
                assert!(held.remove(&target), "{} を取らずに解放しています", target);
            }
            continue;
        }
        match statement {
            GoStatement::Label(label) => assert!(held.is_empty(), "ラベル {} でロック {:?} を保持しています", label, held),
            GoStatement::Goto(label) => {
                assert!(held.is_empty(), "goto {} でロック {:?} を保持しています", label, held);
                return None;
            }
            GoStatement::Return(_) => {
                assert!(held.is_empty(), "return でロック {:?} を保持しています", held);
                return None;
            }
            GoStatement::Break => {
                breaks.push(held);
                return None;
            }
            GoStatement::Block(inner) => held = run_locks(inner, held, breaks)?,
            GoStatement::If { then, otherwise, .. } => {
                let yes = run_locks(then, held.clone(), breaks);
                let no = run_locks(otherwise.as_deref().unwrap_or(&[]), held, breaks);
                held = match (yes, no) {
                    (Some(yes), Some(no)) => {
                        assert_eq!(yes, no, "if の分岐でロックの状態が食い違います");
                        yes
                    }
                    (Some(state), None) | (None, Some(state)) => state,
                    (None, None) => return None,
                };
            }
            GoStatement::For { condition, body } => {
                let mut loop_breaks = Vec::new();
                if let Some(end) = run_locks(body, held.clone(), &mut loop_breaks) {
                    assert_eq!(end, held, "ループの一周でロックの状態が変わります");
                }
                for state in &loop_breaks {
                    assert_eq!(*state, held, "break でロックの状態が変わります");
                }
                if condition.is_none() && loop_breaks.is_empty() {
                    return None;
                }
            }
            GoStatement::ForRange { body, .. } => {
                let mut loop_breaks = Vec::new();
                if let Some(end) = run_locks(body, held.clone(), &mut loop_breaks) {
                    assert_eq!(end, held);
                }
            }
            _ => {}
        }
    }
    Some(held)
}

fn assert_well_bracketed(output: &CompileOutput) {
    for declaration in &output.module.declarations {
        if let GoDeclaration::Function { name, body, .. } = declaration {
            if let Some(end) = run_locks(body, Held::new(), &mut Vec::new()) {
                assert!(end.is_empty(), "{} の終わりでロック {:?} を保持しています", name, end);
            }
        }
    }
}

fn empty_sections(statements: &[GoStatement]) -> usize {
    let mut count = 0;
    for pair in statements.windows(2) {
        if let (Some((a, true)), Some((b, false))) = (lock_action(&pair[0]), lock_action(&pair[1])) {
            if a == b {
                count += 1;
            }
        }
    }
    for statement in statements {
        count += match statement {
            GoStatement::Block(inner) | GoStatement::For { body: inner, .. } => empty_sections(inner),
            GoStatement::If { then, otherwise, .. } => {
                empty_sections(then) + otherwise.as_deref().map_or(0, empty_sections)
            }
            _ => 0,
        };
    }
    count
}

#[test]
fn test_read_only_group_takes_read_lock() {
    let output = compile_text(
        "Readers",
        "(* --algorithm Readers {
    variables x = 0, y = 5;
    process (P \\in 1..2) {
        w: x := x + 1;
        r: print y;
    }
} *)",
    );
    let source = &output.go_source;
    assert!(source.contains(".RLock()"), "{}", source);
    assert!(source.contains(".RUnlock()"), "{}", source);
    assert!(source.contains(".Lock()"), "{}", source);
    assert_well_bracketed(&output);
}

#[test]
fn test_locks_are_released_on_every_path() {
    let output = compile_text(
        "Paths",
        "(* --algorithm Paths {
    variables x = 0, y = 0;
    process (P \\in 1..2) {
        a: await x >= 0;
           if (x > 5) { x := 0; goto c; } else { y := y + 1; };
        b: while (x < 3) {
               x := x + 1;
           };
        c: if (y > 2) { d: y := 0; } else { skip; };
        e: print y;
    }
} *)",
    );
    let source = &output.go_source;
    assert!(source.contains("goto "), "{}", source);
    assert!(source.contains("for {"), "{}", source);
    assert_well_bracketed(&output);
}

#[test]
fn test_procedure_call_and_return_shapes() {
    let output = compile_text(
        "Calls",
        "(* --algorithm Calls {
    variables x = 0;
    procedure Bump() {
        p: x := x + 1;
        return;
    }
    process (P \\in 1..2) {
        c: call Bump();
        d: print x;
    }
} *)",
    );
    let source = &output.go_source;
    assert!(source.contains("err = Bump("), "{}", source);
    // 本体が return で終わるプロシージャに末尾の return を重ねない
    assert_eq!(source.matches("return nil").count(), 1, "{}", source);
    for declaration in &output.module.declarations {
        if let GoDeclaration::Function { name, body, .. } = declaration {
            assert_eq!(empty_sections(body), 0, "{} に空の区間があります", name);
        }
    }
    assert_well_bracketed(&output);
}

#[test]
fn test_choose_filters_then_picks() {
    let output = compile_text(
        "Pick",
        "(* --algorithm Pick {
    variables s = {1, 2, 3}, x = 0;
    { l: x := CHOOSE v \\in s : v > 1;
         print x; }
} *)",
    );
    let source = &output.go_source;
    assert!(source.contains("datatypes.Choose("), "{}", source);
    assert!(source.contains("append("), "{}", source);
    assert!(source.contains("\"pgo/datatypes\""), "{}", source);
}

#[test]
fn test_function_parameter_becomes_resource_per_element() {
    let output = compile_text(
        "Mapped",
        "(* --mpcal Mapped {
    archetype Bumper(ref c)
    variable t = 0;
    {
    l1:
        t := c[self];
    l2:
        c[self] := t + 1;
    }

    variables counts = [i \\in 1..2 |-> 0];

    fair process (Worker = 1) == instance Bumper(ref counts);
} *)",
    );
    let source = &output.go_source;
    assert!(source.contains("c []distsys.ArchetypeResource"), "{}", source);
    assert!(source.contains("distsys.AcquireResources(distsys.WriteAccess, c[self])"), "{}", source);
    assert!(source.contains("c[self].Read()"), "{}", source);
    assert!(source.contains("c[self].Write(t + 1)"), "{}", source);
    assert!(source.contains("distsys.ReleaseResources(c...)"), "{}", source);
    assert!(!source.contains("MapSet"), "{}", source);
}
