//! # 文の変換
//!
//! PlusCal の文を Go の文にします。ラベルは同名の Go のラベルになり、
//! そこで臨界区間を開き直します。`goto` と `return` の前では区間を閉じます。

use crate::backend::go::{GoExpression, GoStatement, GoType};
use crate::frontend::ast::{AssignmentPair, Statement, StatementKind, TlaExpression, TlaExpressionKind};
use crate::frontend::error::{IssueKind, SourceLocation};
use crate::frontend::semantic::DefinitionKind;

use super::critical_section::CriticalSection;
use super::expression::{datatypes, update_path, zero_value, PathStep, ResolvedStep};
use super::{CodeGenerator, ErrorExit, FunctionContext};

/// 代入の左辺を根の名前と経路に分ける
fn decompose(lhs: &TlaExpression) -> Option<(&TlaExpression, Vec<PathStep<'_>>)> {
    match &lhs.kind {
        TlaExpressionKind::Identifier { .. } => Some((lhs, Vec::new())),
        TlaExpressionKind::FunctionCall { function, args } => {
            let (root, mut steps) = decompose(function)?;
            steps.push(PathStep::Index(args));
            Some((root, steps))
        }
        TlaExpressionKind::RecordAccess { record, field } => {
            let (root, mut steps) = decompose(record)?;
            steps.push(PathStep::Field(&field.id));
            Some((root, steps))
        }
        _ => None,
    }
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn statements(&mut self, f: &mut FunctionContext, statements: &[Statement]) {
        for statement in statements {
            self.statement(f, statement);
        }
    }

    /// 一時変数を閉じ込めるブロックの中で `body` を生成する
    fn scoped(&mut self, f: &mut FunctionContext, body: impl FnOnce(&mut Self, &mut FunctionContext)) {
        f.builder.open();
        body(self, f);
        let block = f.builder.close();
        if !block.is_empty() {
            f.builder.add(GoStatement::Block(block));
        }
    }

    fn statement(&mut self, f: &mut FunctionContext, statement: &Statement) {
        if f.tracker.needs_label() && !statement.is_labeled() {
            f.issues.error(
                statement.location().clone(),
                IssueKind::MissingLabel {
                    context: "制御が合流または途切れた直後".to_string(),
                },
            );
            f.tracker.clear_needs_label();
        }
        let location = statement.location();
        match &statement.kind {
            StatementKind::LabeledStatements { label, statements } => {
                let Some(go_label) = f.labels.get(&label.meta.uid).cloned() else {
                    self.internal_error(f, location, format!("ラベル {} に名前がありません", label.name));
                    return;
                };
                // ラベルへ飛んできた制御は区間の外にいる
                self.end_section(f);
                f.builder.add(GoStatement::Label(go_label.clone()));
                let group = self.registry.lock_group(label.meta.uid);
                self.start_section(f, CriticalSection { group, label: go_label });
                self.statements(f, statements);
            }
            StatementKind::Assignment(pairs) => self.scoped(f, |g, f| g.assignment(f, pairs)),
            StatementKind::Await(condition) => self.scoped(f, |g, f| {
                let condition = g.expression(f, condition);
                f.builder.open();
                g.abort_section(f);
                let abort = f.builder.close();
                f.builder.add(GoStatement::If {
                    condition: GoExpression::not(condition),
                    then: abort,
                    otherwise: None,
                });
            }),
            StatementKind::Print(value) => self.scoped(f, |g, f| {
                let value = g.expression(f, value);
                f.builder.import("fmt");
                f.builder
                    .add(GoStatement::expression(GoExpression::call("fmt.Println", vec![value])));
            }),
            StatementKind::Assert(condition) => self.scoped(f, |g, f| {
                let message = format!("assertion failed: {}", condition);
                let condition = g.expression(f, condition);
                f.builder.add(GoStatement::If {
                    condition: GoExpression::not(condition),
                    then: vec![GoStatement::expression(GoExpression::call(
                        "panic",
                        vec![GoExpression::String(message)],
                    ))],
                    otherwise: None,
                });
            }),
            StatementKind::Skip => {}
            StatementKind::Return => {
                self.end_section(f);
                let values = match f.error_exit {
                    ErrorExit::Return => vec![GoExpression::identifier("nil")],
                    ErrorExit::Panic => Vec::new(),
                };
                f.builder.add(GoStatement::Return(values));
                f.tracker.unreachable();
            }
            StatementKind::Goto(target) => {
                let label = self
                    .registry
                    .resolve(statement.meta.uid)
                    .and_then(|uid| f.labels.get(&uid).cloned());
                let Some(label) = label else {
                    self.internal_error(f, location, format!("goto の行き先 {} が見つかりません", target));
                    return;
                };
                self.end_section(f);
                f.builder.add(GoStatement::Goto(label));
                f.tracker.unreachable();
            }
            StatementKind::Call { target, arguments } => self.call(f, statement, target, arguments),
            StatementKind::MacroCall { target, .. } => {
                self.internal_error(f, location, format!("マクロ {} が展開されていません", target));
            }
            StatementKind::If { condition, yes, no } => self.if_statement(f, condition, yes, no),
            StatementKind::While { condition, body } => self.while_statement(f, condition, body),
            StatementKind::Either(branches) => {
                if let Some((first, rest)) = branches.split_first() {
                    self.statements(f, first);
                    for (i, _) in rest.iter().enumerate() {
                        f.builder
                            .add(GoStatement::Comment(format!("either: branch {} omitted", i + 2)));
                    }
                }
            }
            StatementKind::With { variables, body } => self.scoped(f, |g, f| {
                for variable in variables {
                    let value = g.expression(f, &variable.value);
                    let value = if variable.is_set {
                        datatypes(f, "Choose", vec![value])
                    } else {
                        value
                    };
                    let bound = f.unused_temp(&variable.name.id, value);
                    f.bindings.insert(variable.name.meta.uid, bound);
                }
                g.statements(f, body);
            }),
        }
    }

    /// 右辺はすべて代入前の値で評価する
    fn assignment(&mut self, f: &mut FunctionContext, pairs: &[AssignmentPair]) {
        let mut values = Vec::new();
        for pair in pairs {
            let value = self.expression(f, &pair.rhs);
            // 並行代入では名前の参照も代入前の値に固定する
            let fixed = matches!(value, GoExpression::Literal(_) | GoExpression::String(_));
            values.push(if pairs.len() > 1 && !fixed {
                f.temp("value", value)
            } else {
                value
            });
        }
        for (pair, value) in pairs.iter().zip(values) {
            match decompose(&pair.lhs) {
                Some((root, steps)) => self.assign_target(f, root, &steps, value, &pair.meta.location),
                None => {
                    self.internal_error(f, &pair.meta.location, format!("代入できない左辺 {}", pair.lhs));
                }
            }
        }
    }

    fn assign_target(
        &mut self,
        f: &mut FunctionContext,
        root: &TlaExpression,
        steps: &[PathStep<'_>],
        value: GoExpression,
        location: &SourceLocation,
    ) {
        let registry = self.registry;
        let Some((uid, definition)) = registry.resolved_definition(root.meta.uid) else {
            self.internal_error(f, location, format!("`{}` が解決されていません", root));
            return;
        };
        let shared = !f.bindings.contains_key(&uid)
            && (f.resources.contains_key(&uid) || matches!(definition.kind, DefinitionKind::GlobalVariable));
        let root_type = self.type_of(uid);
        let resolved = if steps.is_empty() {
            Vec::new()
        } else {
            match self.resolve_path(f, &root_type, steps, location) {
                Some(resolved) => resolved,
                None => return,
            }
        };
        if shared && f.mapped_resources.contains(&uid) {
            let Some((ResolvedStep::MapKey(key), rest)) = resolved.split_first() else {
                self.unsupported(f, location, format!("要素ごとのリソース {} 全体への代入", definition.name));
                return;
            };
            let value = if rest.is_empty() {
                value
            } else {
                let current = self.strategy.read_global_element(f, uid, key.clone(), location);
                update_path(f, current, rest, value)
            };
            self.strategy.write_global_element(f, uid, key.clone(), value, location);
            f.tracker.mark_write();
        } else if shared {
            let value = if resolved.is_empty() {
                value
            } else {
                let current = self.strategy.read_global_variable(f, uid, location);
                update_path(f, current, &resolved, value)
            };
            self.strategy.write_global_variable(f, uid, value, location);
            f.tracker.mark_write();
        } else {
            let Some(target) = f.bindings.get(&uid).cloned() else {
                self.internal_error(f, location, format!("`{}` に代入先がありません", definition.name));
                return;
            };
            let value = update_path(f, target.clone(), &resolved, value);
            f.builder.add(GoStatement::assign(target, value));
        }
    }

    /// `err = P(self, args...)`。呼び出しの間は区間を閉じる
    fn call(&mut self, f: &mut FunctionContext, statement: &Statement, target: &str, arguments: &[TlaExpression]) {
        let algorithm = self.algorithm;
        let procedure = self
            .registry
            .resolve(statement.meta.uid)
            .and_then(|uid| algorithm.procedures.iter().find(|p| p.meta.uid == uid));
        let Some(procedure) = procedure else {
            self.internal_error(f, statement.location(), format!("プロシージャ {} が見つかりません", target));
            return;
        };
        let self_type: GoType = self.go_type_of(procedure.self_meta.uid);
        let function = self.package_name(procedure.meta.uid);
        self.scoped(f, |g, f| {
            let mut args = vec![f.self_value.clone().unwrap_or_else(|| zero_value(&self_type))];
            // 区間を閉じる前に共有変数を読み終える
            let locked = f.tracker.current().map_or(false, |section| section.group.is_some());
            for argument in arguments {
                let value = g.expression(f, argument);
                let fixed = matches!(value, GoExpression::Literal(_) | GoExpression::String(_));
                args.push(if locked && !fixed {
                    f.temp("arg", value)
                } else {
                    g.simple(f, "arg", value)
                });
            }
            let saved = f.tracker.current().cloned();
            g.end_section(f);
            f.builder.add(GoStatement::assign(
                GoExpression::identifier("err"),
                GoExpression::call(function, args),
            ));
            f.check_error();
            g.restore_section(f, saved);
        });
    }

    fn if_statement(&mut self, f: &mut FunctionContext, condition: &TlaExpression, yes: &[Statement], no: &[Statement]) {
        f.builder.open();
        let condition = self.expression(f, condition);
        let hoisted = f.builder.close();

        let before = f.tracker.clone();
        f.builder.open();
        self.statements(f, yes);
        let mut then = f.builder.close();
        let yes_tracker = std::mem::replace(&mut f.tracker, before);
        f.builder.open();
        self.statements(f, no);
        let mut otherwise = f.builder.close();
        let no_tracker = f.tracker.clone();

        if yes_tracker.compatible(&no_tracker) {
            f.tracker = yes_tracker;
            f.tracker.merge(&no_tracker);
        } else {
            // 分岐ごとに区間を閉じ、合流後の文にはラベルを求める
            f.tracker = yes_tracker;
            then.extend(self.end_section_statements(f));
            f.tracker = no_tracker;
            otherwise.extend(self.end_section_statements(f));
            f.tracker.unreachable();
        }

        let statement = GoStatement::If {
            condition,
            then,
            otherwise: if otherwise.is_empty() { None } else { Some(otherwise) },
        };
        if hoisted.is_empty() {
            f.builder.add(statement);
        } else {
            let mut block = hoisted;
            block.push(statement);
            f.builder.add(GoStatement::Block(block));
        }
    }

    /// 本体の終わりで区間を閉じ、ループ開始時の区間を開き直してから条件を見る
    fn while_statement(&mut self, f: &mut FunctionContext, condition: &TlaExpression, body: &[Statement]) {
        let loop_section = f.tracker.current().cloned();
        let wrote = f.tracker.wrote();
        f.builder.open();
        self.scoped(f, |g, f| {
            let condition = g.expression(f, condition);
            f.builder.add(GoStatement::If {
                condition: GoExpression::not(condition),
                then: vec![GoStatement::Break],
                otherwise: None,
            });
        });
        self.statements(f, body);
        self.end_section(f);
        self.restore_section(f, loop_section.clone());
        let body = f.builder.close();
        f.builder.add(GoStatement::For { condition: None, body });
        f.tracker.resume(loop_section, wrote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::TlaIdentifier;

    #[test]
    fn test_decompose_collects_path_from_root() {
        let lhs = TlaExpression::synthetic(TlaExpressionKind::RecordAccess {
            record: Box::new(TlaExpression::synthetic(TlaExpressionKind::FunctionCall {
                function: Box::new(TlaExpression::identifier("x")),
                args: vec![TlaExpression::number("1")],
            })),
            field: TlaIdentifier::synthetic("f"),
        });
        let (root, steps) = decompose(&lhs).expect("左辺");
        assert_eq!(root.as_simple_identifier().map(|id| id.id.as_str()), Some("x"));
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], PathStep::Index(args) if args.len() == 1));
        assert!(matches!(steps[1], PathStep::Field("f")));
    }

    #[test]
    fn test_decompose_rejects_non_paths() {
        let lhs = TlaExpression::binary("+", TlaExpression::identifier("x"), TlaExpression::number("1"));
        assert!(decompose(&lhs).is_none());
    }
}
