//! # オプションの整合性検査
//!
//! 入力の形（単一プロセスか、Modular PlusCal か）と宣言された定数に
//! 対して、指定されたオプションが矛盾しないかを確認します。

use std::collections::BTreeSet;

use crate::driver::options::{CompileOptions, Strategy};
use crate::frontend::ast::{AlgorithmKind, PlusCalAlgorithm, Processes, TlaModule, TlaUnit};
use crate::frontend::error::{IssueContext, IssueKind, SourceLocation};

/// モジュールで `CONSTANT` 宣言された名前と位置
fn declared_constants(module: &TlaModule) -> Vec<(String, SourceLocation)> {
    module
        .units
        .iter()
        .filter_map(|unit| match unit {
            TlaUnit::Constant { declarations, .. } => Some(declarations),
            _ => None,
        })
        .flatten()
        .map(|decl| (decl.name.id.clone(), decl.meta.location.clone()))
        .collect()
}

/// オプションを検査し、問題を `issues` に記録する
pub fn check_options(
    algorithm: &PlusCalAlgorithm,
    module: &TlaModule,
    options: &CompileOptions,
    issues: &mut IssueContext,
) {
    match (algorithm.kind, &algorithm.processes, options.strategy) {
        (AlgorithmKind::PlusCal, Processes::Single(_), Some(Strategy::StateServer)) => issues.error(
            algorithm.location().clone(),
            IssueKind::OptionIncompatibility {
                reason: "state-server 戦略は単一プロセスのアルゴリズムには使えません".to_string(),
            },
        ),
        (AlgorithmKind::Modular, _, Some(Strategy::InProcess)) => issues.warning(
            algorithm.location().clone(),
            IssueKind::OptionIncompatibility {
                reason: "Modular PlusCal は常にリソース戦略でコンパイルされるため in-process は無視されます"
                    .to_string(),
            },
        ),
        _ => {}
    }

    let declared = declared_constants(module);
    let declared_names: BTreeSet<&str> = declared.iter().map(|(name, _)| name.as_str()).collect();
    for name in options.constants.keys() {
        if !declared_names.contains(name.as_str()) {
            issues.warning(module.meta.location.clone(), IssueKind::UnusedConstant { name: name.clone() });
        }
    }
    for (name, location) in &declared {
        if !options.constants.contains_key(name) {
            issues.error(
                location.clone(),
                IssueKind::OptionIncompatibility {
                    reason: format!("定数 `{}` に値が与えられていません", name),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{Fairness, OpDecl, TlaIdentifier};
    use crate::frontend::uid::Meta;

    fn algorithm(kind: AlgorithmKind, processes: Processes) -> PlusCalAlgorithm {
        PlusCalAlgorithm {
            meta: Meta::synthetic(),
            kind,
            fairness: Fairness::Unfair,
            name: TlaIdentifier::synthetic("Test"),
            variables: Vec::new(),
            units: Vec::new(),
            macros: Vec::new(),
            procedures: Vec::new(),
            archetypes: Vec::new(),
            instances: Vec::new(),
            processes,
        }
    }

    fn module(constants: &[&str]) -> TlaModule {
        let declarations = constants
            .iter()
            .map(|name| OpDecl {
                meta: Meta::synthetic(),
                name: TlaIdentifier::synthetic(*name),
                arity: 0,
            })
            .collect();
        TlaModule {
            meta: Meta::synthetic(),
            name: TlaIdentifier::synthetic("Test"),
            extends: Vec::new(),
            units: vec![TlaUnit::Constant {
                meta: Meta::synthetic(),
                declarations,
            }],
        }
    }

    #[test]
    fn test_state_server_rejects_single_process() {
        let mut issues = IssueContext::new();
        let options = CompileOptions::default().with_strategy(Strategy::StateServer);
        check_options(
            &algorithm(AlgorithmKind::PlusCal, Processes::Single(Vec::new())),
            &module(&[]),
            &options,
            &mut issues,
        );
        assert_eq!(issues.errors().count(), 1);
        assert_eq!(issues.issues()[0].kind.code(), "option-incompatibility");
    }

    #[test]
    fn test_in_process_for_modular_is_warning() {
        let mut issues = IssueContext::new();
        let options = CompileOptions::default().with_strategy(Strategy::InProcess);
        check_options(
            &algorithm(AlgorithmKind::Modular, Processes::Multi(Vec::new())),
            &module(&[]),
            &options,
            &mut issues,
        );
        assert!(!issues.has_errors());
        assert_eq!(issues.warnings().count(), 1);
    }

    #[test]
    fn test_constants_are_checked_against_declarations() {
        let mut issues = IssueContext::new();
        let options = CompileOptions::default().with_constant("M", "1");
        check_options(
            &algorithm(AlgorithmKind::PlusCal, Processes::Single(Vec::new())),
            &module(&["N"]),
            &options,
            &mut issues,
        );
        let codes: Vec<&str> = issues.issues().iter().map(|i| i.kind.code()).collect();
        assert!(codes.contains(&"unused-constant"));
        assert!(codes.contains(&"option-incompatibility"));
        assert_eq!(issues.errors().count(), 1);
    }
}
