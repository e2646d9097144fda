//! # マクロ展開
//!
//! マクロ呼び出しを、仮引数を実引数で置き換えた本体の複製で置き換えます。
//! 本体中のラベルには展開ごとの接尾辞が付くため、`goto` の飛び先は
//! 一意に保たれます。入れ子の呼び出しは不動点まで展開されます。

use std::collections::{HashMap, HashSet};

use crate::frontend::ast::{
    walk_statements, AssignmentPair, Label, Macro, PlusCalAlgorithm, Processes, Statement, StatementKind,
    TlaExpression, TlaExpressionKind, TlaUnit, VariableDeclaration,
};
use crate::frontend::error::{IssueContext, IssueKind, SourceLocation};

/// 展開の入れ子の上限
const MAX_EXPANSION_DEPTH: usize = 64;

/// 識別子を置き換えた深い複製（新しい識別子が払い出される）
fn deep_copy(expression: &TlaExpression) -> TlaExpression {
    expression.map_children(&mut |child| deep_copy(child))
}

/// この式が新たに束縛する名前
fn bound_names(expression: &TlaExpression) -> Vec<&str> {
    use TlaExpressionKind as K;
    match &expression.kind {
        K::Quantified { bounds, .. } | K::SetComprehension { bounds, .. } | K::Function { bounds, .. } => bounds
            .iter()
            .flat_map(|b| b.pattern.identifiers())
            .map(|id| id.id.as_str())
            .collect(),
        K::SetRefinement { binding, .. } | K::Choose { binding, .. } => binding.identifiers().iter().map(|id| id.id.as_str()).collect(),
        K::Let { definitions, .. } => definitions
            .iter()
            .filter_map(TlaUnit::defined_name)
            .map(|id| id.id.as_str())
            .collect(),
        _ => Vec::new(),
    }
}

fn without(substitution: &HashMap<String, TlaExpression>, names: &[&str]) -> HashMap<String, TlaExpression> {
    substitution
        .iter()
        .filter(|(name, _)| !names.contains(&name.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// 仮引数の名前を実引数の式で置き換える
pub fn substitute(expression: &TlaExpression, substitution: &HashMap<String, TlaExpression>) -> TlaExpression {
    if let Some(name) = expression.as_simple_identifier() {
        if let Some(value) = substitution.get(&name.id) {
            return deep_copy(value);
        }
    }
    let shadowed = bound_names(expression);
    if shadowed.iter().any(|name| substitution.contains_key(*name)) {
        let inner = without(substitution, &shadowed);
        return expression.map_children(&mut |child| substitute(child, &inner));
    }
    expression.map_children(&mut |child| substitute(child, substitution))
}

/// 1回の展開で使う置換
struct Instantiation<'a> {
    substitution: &'a HashMap<String, TlaExpression>,
    labels: &'a HashMap<String, String>,
}

impl Instantiation<'_> {
    fn rename(&self, label: &str) -> String {
        self.labels.get(label).cloned().unwrap_or_else(|| label.to_string())
    }

    fn declaration(
        &self,
        declaration: &VariableDeclaration,
        substitution: &HashMap<String, TlaExpression>,
    ) -> VariableDeclaration {
        VariableDeclaration {
            meta: declaration.meta.refreshed(),
            name: declaration.name.refreshed(),
            is_ref: declaration.is_ref,
            is_set: declaration.is_set,
            value: substitute(&declaration.value, substitution),
        }
    }

    fn statements(&self, statements: &[Statement]) -> Vec<Statement> {
        self.statements_with(statements, self.substitution)
    }

    fn statements_with(
        &self,
        statements: &[Statement],
        substitution: &HashMap<String, TlaExpression>,
    ) -> Vec<Statement> {
        statements.iter().map(|s| self.statement(s, substitution)).collect()
    }

    fn statement(&self, statement: &Statement, substitution: &HashMap<String, TlaExpression>) -> Statement {
        let expr = |e: &TlaExpression| substitute(e, substitution);
        let kind = match &statement.kind {
            StatementKind::LabeledStatements { label, statements } => StatementKind::LabeledStatements {
                label: Label {
                    meta: label.meta.refreshed(),
                    name: self.rename(&label.name),
                    modifier: label.modifier,
                },
                statements: self.statements_with(statements, substitution),
            },
            StatementKind::Assignment(pairs) => StatementKind::Assignment(
                pairs
                    .iter()
                    .map(|pair| AssignmentPair {
                        meta: pair.meta.refreshed(),
                        lhs: expr(&pair.lhs),
                        rhs: expr(&pair.rhs),
                    })
                    .collect(),
            ),
            StatementKind::Await(e) => StatementKind::Await(expr(e)),
            StatementKind::Print(e) => StatementKind::Print(expr(e)),
            StatementKind::Assert(e) => StatementKind::Assert(expr(e)),
            StatementKind::Skip => StatementKind::Skip,
            StatementKind::Return => StatementKind::Return,
            StatementKind::Goto(target) => StatementKind::Goto(self.rename(target)),
            StatementKind::Call { target, arguments } => StatementKind::Call {
                target: target.clone(),
                arguments: arguments.iter().map(expr).collect(),
            },
            StatementKind::MacroCall { target, arguments } => StatementKind::MacroCall {
                target: target.clone(),
                arguments: arguments.iter().map(expr).collect(),
            },
            StatementKind::If { condition, yes, no } => StatementKind::If {
                condition: expr(condition),
                yes: self.statements_with(yes, substitution),
                no: self.statements_with(no, substitution),
            },
            StatementKind::While { condition, body } => StatementKind::While {
                condition: expr(condition),
                body: self.statements_with(body, substitution),
            },
            StatementKind::Either(branches) => StatementKind::Either(
                branches
                    .iter()
                    .map(|branch| self.statements_with(branch, substitution))
                    .collect(),
            ),
            StatementKind::With { variables, body } => {
                let mut inner = substitution.clone();
                let mut declarations = Vec::with_capacity(variables.len());
                for variable in variables {
                    declarations.push(self.declaration(variable, &inner));
                    inner.remove(&variable.name.id);
                }
                StatementKind::With {
                    variables: declarations,
                    body: self.statements_with(body, &inner),
                }
            }
        };
        Statement {
            meta: statement.meta.refreshed(),
            kind,
        }
    }
}

struct Expander<'a> {
    macros: HashMap<String, &'a Macro>,
    issues: &'a mut IssueContext,
    stack: Vec<String>,
    expansions: usize,
}

impl<'a> Expander<'a> {
    fn body(&mut self, statements: &[Statement]) -> Vec<Statement> {
        let mut expanded = Vec::with_capacity(statements.len());
        for statement in statements {
            self.statement(statement, &mut expanded);
        }
        expanded
    }

    fn statement(&mut self, statement: &Statement, out: &mut Vec<Statement>) {
        let kind = match &statement.kind {
            StatementKind::MacroCall { target, arguments } => {
                self.expand_call(statement, target, arguments, out);
                return;
            }
            StatementKind::LabeledStatements { label, statements } => StatementKind::LabeledStatements {
                label: label.clone(),
                statements: self.body(statements),
            },
            StatementKind::If { condition, yes, no } => StatementKind::If {
                condition: condition.clone(),
                yes: self.body(yes),
                no: self.body(no),
            },
            StatementKind::While { condition, body } => StatementKind::While {
                condition: condition.clone(),
                body: self.body(body),
            },
            StatementKind::Either(branches) => {
                StatementKind::Either(branches.iter().map(|branch| self.body(branch)).collect())
            }
            StatementKind::With { variables, body } => StatementKind::With {
                variables: variables.clone(),
                body: self.body(body),
            },
            other => other.clone(),
        };
        out.push(Statement {
            meta: statement.meta.clone(),
            kind,
        });
    }

    fn expand_call(&mut self, call: &Statement, target: &str, arguments: &[TlaExpression], out: &mut Vec<Statement>) {
        let Some(definition) = self.macros.get(target).copied() else {
            self.issues.error(
                call.location().clone(),
                IssueKind::UnknownIdentifier {
                    name: target.to_string(),
                },
            );
            return;
        };
        if definition.params.len() != arguments.len() {
            self.issues.error(
                call.location().clone(),
                IssueKind::ArityMismatch {
                    name: target.to_string(),
                    expected: definition.params.len(),
                    actual: arguments.len(),
                },
            );
            return;
        }
        if self.stack.iter().any(|name| name == target) || self.stack.len() >= MAX_EXPANSION_DEPTH {
            self.issues.error(
                call.location().clone(),
                IssueKind::MacroRecursion {
                    name: target.to_string(),
                },
            );
            return;
        }

        self.expansions += 1;
        let suffix = self.expansions;
        let substitution: HashMap<String, TlaExpression> = definition
            .params
            .iter()
            .zip(arguments)
            .map(|(param, argument)| (param.id.clone(), argument.clone()))
            .collect();
        let mut labels = HashMap::new();
        walk_statements(&definition.body, &mut |s| {
            if let StatementKind::LabeledStatements { label, .. } = &s.kind {
                labels.insert(label.name.clone(), format!("{}_{}", label.name, suffix));
            }
        });
        let instance = Instantiation {
            substitution: &substitution,
            labels: &labels,
        }
        .statements(&definition.body);

        self.stack.push(target.to_string());
        let expanded = self.body(&instance);
        self.stack.pop();
        out.extend(expanded);
    }
}

/// すべての本体のマクロ呼び出しを展開した新しいアルゴリズムを返す
pub fn expand_macros(algorithm: &PlusCalAlgorithm, issues: &mut IssueContext) -> PlusCalAlgorithm {
    let mut macros = HashMap::new();
    let mut seen = HashSet::new();
    for definition in &algorithm.macros {
        if !seen.insert(definition.name.as_str()) {
            issues.error(
                definition.meta.location.clone(),
                IssueKind::DuplicateDefinition {
                    name: definition.name.clone(),
                    previous: macros
                        .get(&definition.name)
                        .map(|m: &&Macro| m.meta.location.clone())
                        .unwrap_or_else(SourceLocation::unknown),
                },
            );
            continue;
        }
        macros.insert(definition.name.clone(), definition);
    }

    let mut expander = Expander {
        macros,
        issues,
        stack: Vec::new(),
        expansions: 0,
    };
    let mut expanded = algorithm.clone();
    expanded.processes = match &algorithm.processes {
        Processes::Single(body) => Processes::Single(expander.body(body)),
        Processes::Multi(processes) => Processes::Multi(
            processes
                .iter()
                .map(|process| {
                    let mut process = process.clone();
                    process.body = expander.body(&process.body);
                    process
                })
                .collect(),
        ),
    };
    for procedure in &mut expanded.procedures {
        procedure.body = expander.body(&procedure.body);
    }
    for archetype in &mut expanded.archetypes {
        archetype.body = expander.body(&archetype.body);
    }
    log::debug!("マクロ呼び出しを {} 件展開しました", expander.expansions);
    expanded
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

    fn single_body(algorithm: &PlusCalAlgorithm) -> &[Statement] {
        match &algorithm.processes {
            Processes::Single(body) => body,
            Processes::Multi(_) => panic!("単一プロセスが期待されます"),
        }
    }

    fn count_macro_calls(statements: &[Statement]) -> usize {
        let mut count = 0;
        walk_statements(statements, &mut |s| {
            if matches!(s.kind, StatementKind::MacroCall { .. }) {
                count += 1;
            }
        });
        count
    }

    #[test]
    fn test_expands_with_substitution() {
        let algorithm = parse(
            "(* --algorithm M {
                variables x = 0;
                macro inc(v, by) { v := v + by; }
                { l: inc(x, 2); }
            } *)",
        );
        let mut issues = IssueContext::new();
        let expanded = expand_macros(&algorithm, &mut issues);
        assert!(issues.is_empty());
        let body = single_body(&expanded);
        assert_eq!(count_macro_calls(body), 0);
        let mut assignment = None;
        walk_statements(body, &mut |s| {
            if let StatementKind::Assignment(pairs) = &s.kind {
                assignment = Some(format!("{} := {}", pairs[0].lhs, pairs[0].rhs));
            }
        });
        assert_eq!(assignment.as_deref(), Some("x := x + 2"));
    }

    #[test]
    fn test_quantifier_shadows_parameter() {
        let mut substitution = HashMap::new();
        substitution.insert("i".to_string(), TlaExpression::number("5"));
        let mut issues = IssueContext::new();
        let e = parser::parse_expression("t", "i + (\\A i \\in S : i > 0)", &mut issues).unwrap();
        let substituted = substitute(&e, &substitution);
        assert_eq!(substituted.to_string(), "5 + (\\A i \\in S : i > 0)");
    }

    #[test]
    fn test_recursive_macro_is_reported() {
        let algorithm = parse(
            "(* --algorithm M {
                macro a() { b(); }
                macro b() { a(); }
                { l: a(); }
            } *)",
        );
        let mut issues = IssueContext::new();
        expand_macros(&algorithm, &mut issues);
        assert_eq!(issues.errors().count(), 1);
        assert_eq!(issues.issues()[0].kind.code(), "macro-recursion");
    }

    #[test]
    fn test_arity_mismatch() {
        let algorithm = parse(
            "(* --algorithm M {
                macro m(a) { print a; }
                { l: m(1, 2); }
            } *)",
        );
        let mut issues = IssueContext::new();
        expand_macros(&algorithm, &mut issues);
        assert_eq!(issues.issues()[0].kind.code(), "arity-mismatch");
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let algorithm = parse(
            "(* --algorithm M {
                variables x = 0;
                macro twice(v) { v := v * 2; }
                { l: twice(x); twice(x); }
            } *)",
        );
        let mut issues = IssueContext::new();
        let once = expand_macros(&algorithm, &mut issues);
        let twice = expand_macros(&once, &mut issues);
        assert!(issues.is_empty());
        assert_eq!(once, twice);
    }
}
