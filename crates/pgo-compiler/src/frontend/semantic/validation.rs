//! # 構造検査
//!
//! アーキタイプ・プロシージャ・プロセスの本体は、ラベル付きの文から
//! 始まらなければなりません。違反した本体ごとに先頭の文を指す
//! `missing-label` を1件報告します。

use crate::frontend::ast::{PlusCalAlgorithm, Processes, Statement};
use crate::frontend::error::{IssueContext, IssueKind};

fn check_first_statement(context: String, body: &[Statement], issues: &mut IssueContext) {
    if let Some(first) = body.first() {
        if !first.is_labeled() {
            issues.error(first.location().clone(), IssueKind::MissingLabel { context });
        }
    }
}

/// 本体の先頭ラベルを検査する（アーキタイプ、プロシージャ、プロセスの順）
pub fn validate(algorithm: &PlusCalAlgorithm, issues: &mut IssueContext) {
    for archetype in &algorithm.archetypes {
        check_first_statement(format!("アーキタイプ `{}`", archetype.name), &archetype.body, issues);
    }
    for procedure in &algorithm.procedures {
        check_first_statement(format!("プロシージャ `{}`", procedure.name), &procedure.body, issues);
    }
    if let Processes::Multi(processes) = &algorithm.processes {
        for process in processes {
            check_first_statement(format!("プロセス `{}`", process.name.name.id), &process.body, issues);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser;

    fn parse(source: &str) -> PlusCalAlgorithm {
        let mut issues = IssueContext::new();
        let algorithm = parser::parse_algorithm("Test.tla", source, &mut issues).unwrap();
        assert!(issues.is_empty(), "{}", issues.format());
        algorithm.unwrap()
    }

    #[test]
    fn test_labelled_bodies_pass() {
        let algorithm = parse(
            "(* --mpcal NoIssues {
                procedure MyProcedure() { l2: print(3 - 3); }
                archetype MyArchetype() { l1: print(1 + 1); }
                process (MyProcess = 32) { l3: print(2 * 2); }
            } *)",
        );
        let mut issues = IssueContext::new();
        validate(&algorithm, &mut issues);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_each_unlabelled_body_is_reported() {
        let algorithm = parse(
            "(* --mpcal MoreThanOneIssue {
                procedure InvalidProcedure() { print(\"invalid procedure!\"); }
                archetype ValidArchetype() { l1: print(1 + 1); }
                archetype InvalidArchetype() { print(\"invalid archetype!\"); }
                process (InvalidProcess = 64) { print(\"invalid process!\"); }
            } *)",
        );
        let mut issues = IssueContext::new();
        validate(&algorithm, &mut issues);
        let kinds: Vec<&str> = issues.issues().iter().map(|i| i.kind.code()).collect();
        assert_eq!(kinds, vec!["missing-label"; 3]);
        assert!(issues.issues()[0].to_string().contains("InvalidArchetype"));
        assert!(issues.issues()[2].to_string().contains("InvalidProcess"));
    }
}
