use std::path::Path;

use pgo_compiler::frontend::ast::{
    AlgorithmKind, BoundPattern, Processes, QuantifierKind, TlaExpression, TlaExpressionKind, TlaModule, TlaUnit,
};
use pgo_compiler::frontend::parser;
use pgo_compiler::module::read_source;
use pgo_compiler::IssueContext;

fn read_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name);
    read_source(&path).unwrap()
}

#[test]
fn test_every_fixture_parses() {
    for name in ["Adder.tla", "Counter.tla", "Echo.tla", "Loop.tla", "Missing.tla", "Unlabeled.tla"] {
        let source = read_fixture(name);
        let mut issues = IssueContext::new();
        let algorithm = parser::parse_algorithm(name, &source, &mut issues).unwrap();
        let module = parser::parse_module(name, &source, &mut issues).unwrap();
        assert!(issues.is_empty(), "{}: {}", name, issues.format());
        assert!(algorithm.is_some(), "{}", name);
        assert!(module.is_some(), "{}", name);
    }
}

#[test]
fn test_module_without_algorithm_parses_definitions() {
    let source = read_fixture("Sum.tla");
    let mut issues = IssueContext::new();
    let module = parser::parse_module("Sum.tla", &source, &mut issues).unwrap().unwrap();
    assert!(issues.is_empty());
    assert_eq!(module.name.id, "Sum");
    let names: Vec<&str> = module
        .units
        .iter()
        .filter_map(|unit| match unit {
            TlaUnit::Operator(definition) => Some(definition.name.id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["Sum", "Twice"]);
}

#[test]
fn test_process_set_and_modular_shapes() {
    let mut issues = IssueContext::new();
    let counter = parser::parse_algorithm("Counter.tla", &read_fixture("Counter.tla"), &mut issues)
        .unwrap()
        .unwrap();
    assert_eq!(counter.kind, AlgorithmKind::PlusCal);
    match &counter.processes {
        Processes::Multi(processes) => {
            assert_eq!(processes.len(), 1);
            assert!(processes[0].name.is_set);
            assert_eq!(processes[0].variables.len(), 1);
        }
        Processes::Single(_) => panic!("プロセス集合が期待されます"),
    }

    let echo = parser::parse_algorithm("Echo.tla", &read_fixture("Echo.tla"), &mut issues)
        .unwrap()
        .unwrap();
    assert_eq!(echo.kind, AlgorithmKind::Modular);
    assert_eq!(echo.archetypes.len(), 1);
    assert_eq!(echo.instances.len(), 1);
    assert_eq!(echo.variables.len(), 2);
    assert!(echo.instances[0].arguments.iter().all(|argument| argument.is_ref));
    assert!(issues.is_empty(), "{}", issues.format());
}

const QUEENS: &str = "---- MODULE Queens ----
EXTENDS Integers, Sequences
CONSTANT N
Attacks(queens, i, j) == queens[i] = queens[j] \\/ queens[i] - queens[j] = i - j
IsSolution(queens) == \\A i \\in 1..Len(queens)-1 : \\A j \\in i+1..Len(queens) : ~Attacks(queens, i, j)
Solutions == {q \\in [1..N -> 1..N] : IsSolution(q)}
Pick == CHOOSE s \\in Solutions : TRUE
Board == [k \\in 1..N |-> IF k > 1 THEN <<k, \"x\">> ELSE <<0, \"y\">>]
Moved == [Board EXCEPT ![1] = <<2, \"z\">>]
====
";

fn parse_text(name: &str, source: &str) -> TlaModule {
    let mut issues = IssueContext::new();
    let module = parser::parse_module(name, source, &mut issues).unwrap().unwrap();
    assert!(issues.is_empty(), "{}", issues.format());
    module
}

fn operator<'m>(module: &'m TlaModule, name: &str) -> &'m TlaExpression {
    module
        .units
        .iter()
        .find_map(|unit| match unit {
            TlaUnit::Operator(definition) if definition.name.id == name => Some(&definition.body),
            _ => None,
        })
        .unwrap()
}

fn binary_operator(expression: &TlaExpression) -> Option<&str> {
    match &expression.kind {
        TlaExpressionKind::Binary { operator, .. } => Some(operator.as_str()),
        _ => None,
    }
}

#[test]
fn test_printed_module_parses_back_unchanged() {
    let module = parse_text("Queens.tla", QUEENS);
    let printed = module.to_string();
    let reparsed = parse_text("Queens.tla", &printed);
    assert_eq!(reparsed.units.len(), module.units.len());
    assert_eq!(reparsed.to_string(), printed);
    for unit in &module.units {
        if let TlaUnit::Operator(definition) = unit {
            assert_eq!(operator(&reparsed, &definition.name.id), &definition.body, "{}", definition.name);
        }
    }
}

#[test]
fn test_is_solution_is_a_nested_universal_quantifier() {
    let module = parse_text("Queens.tla", QUEENS);
    let TlaExpressionKind::Quantified { kind, bounds, body } = &operator(&module, "IsSolution").kind else {
        panic!("量化子が期待されます");
    };
    assert_eq!(*kind, QuantifierKind::Universal);
    assert_eq!(bounds.len(), 1);
    assert!(matches!(&bounds[0].pattern, BoundPattern::Ids(ids) if ids.len() == 1 && ids[0].id == "i"));
    let TlaExpressionKind::Binary { operator, rhs, .. } = &bounds[0].set.kind else {
        panic!("範囲が期待されます");
    };
    assert_eq!(operator, "..");
    assert_eq!(binary_operator(rhs), Some("-"));

    let TlaExpressionKind::Quantified { kind, bounds, body } = &body.kind else {
        panic!("内側の量化子が期待されます");
    };
    assert_eq!(*kind, QuantifierKind::Universal);
    assert!(matches!(&bounds[0].pattern, BoundPattern::Ids(ids) if ids[0].id == "j"));
    assert!(matches!(&body.kind, TlaExpressionKind::Unary { operator, .. } if operator == "~"));
}
