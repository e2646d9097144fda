//! # 生成コードの正規化
//!
//! コード生成は素直だが冗長な Go を出します。ここでは意味を変えずに
//! 次の書き換えを不動点まで繰り返します。
//!
//! - 隣り合うラベルを1つにまとめ、`goto` の行き先を付け替える
//! - `goto` されないラベルを消す（Go では未使用ラベルはエラー）
//! - 条件が定数の `if` を畳む
//! - 変数を宣言しないブロックを外側に展開する
//! - 間に何もない `Lock()` と `Unlock()` の組を消す
//! - インポートを整列して重複を除く
//!
//! 2回適用しても結果は変わりません。

use std::collections::{BTreeSet, HashMap, HashSet};

use super::ast::{GoDeclaration, GoExpression, GoModule, GoStatement};

fn for_each_list(statements: &mut Vec<GoStatement>, f: &mut dyn FnMut(&mut Vec<GoStatement>)) {
    f(statements);
    for statement in statements.iter_mut() {
        match statement {
            GoStatement::Block(inner) => for_each_list(inner, f),
            GoStatement::If { then, otherwise, .. } => {
                for_each_list(then, f);
                if let Some(otherwise) = otherwise {
                    for_each_list(otherwise, f);
                }
            }
            GoStatement::For { body, .. } | GoStatement::ForRange { body, .. } => for_each_list(body, f),
            _ => {}
        }
    }
}

fn visit(statements: &[GoStatement], f: &mut dyn FnMut(&GoStatement)) {
    for statement in statements {
        f(statement);
        match statement {
            GoStatement::Block(inner) => visit(inner, f),
            GoStatement::If { then, otherwise, .. } => {
                visit(then, f);
                if let Some(otherwise) = otherwise {
                    visit(otherwise, f);
                }
            }
            GoStatement::For { body, .. } | GoStatement::ForRange { body, .. } => visit(body, f),
            _ => {}
        }
    }
}

fn merge_adjacent_labels(body: &mut Vec<GoStatement>) -> bool {
    let mut renames: HashMap<String, String> = HashMap::new();
    for_each_list(body, &mut |list| {
        let mut kept: Vec<GoStatement> = Vec::with_capacity(list.len());
        for statement in list.drain(..) {
            if let GoStatement::Label(name) = &statement {
                if let Some(GoStatement::Label(previous)) = kept.last() {
                    renames.insert(name.clone(), previous.clone());
                    continue;
                }
            }
            kept.push(statement);
        }
        *list = kept;
    });
    if renames.is_empty() {
        return false;
    }
    let resolve = |name: &str| {
        let mut current = name.to_string();
        while let Some(next) = renames.get(&current) {
            current = next.clone();
        }
        current
    };
    for_each_list(body, &mut |list| {
        for statement in list.iter_mut() {
            if let GoStatement::Goto(target) = statement {
                *target = resolve(target);
            }
        }
    });
    true
}

fn remove_unused_labels(body: &mut Vec<GoStatement>) -> bool {
    let mut targets: HashSet<String> = HashSet::new();
    visit(body, &mut |statement| {
        if let GoStatement::Goto(target) = statement {
            targets.insert(target.clone());
        }
    });
    let mut changed = false;
    for_each_list(body, &mut |list| {
        let before = list.len();
        list.retain(|statement| match statement {
            GoStatement::Label(name) => targets.contains(name),
            _ => true,
        });
        changed |= list.len() != before;
    });
    changed
}

fn fold_constant_ifs(body: &mut Vec<GoStatement>) -> bool {
    let mut changed = false;
    for_each_list(body, &mut |list| {
        for statement in list.iter_mut() {
            let replacement = match statement {
                GoStatement::If {
                    condition, then, ..
                } if condition.is_true() => Some(GoStatement::Block(std::mem::take(then))),
                GoStatement::If {
                    condition, otherwise, ..
                } if condition.is_false() => Some(GoStatement::Block(otherwise.take().unwrap_or_default())),
                GoStatement::If { otherwise, .. } if otherwise.as_ref().map_or(false, |o| o.is_empty()) => {
                    *otherwise = None;
                    changed = true;
                    None
                }
                _ => None,
            };
            if let Some(replacement) = replacement {
                *statement = replacement;
                changed = true;
            }
        }
    });
    changed
}

fn hoist_blocks(body: &mut Vec<GoStatement>) -> bool {
    let mut changed = false;
    for_each_list(body, &mut |list| {
        if !list.iter().any(|s| matches!(s, GoStatement::Block(inner) if !inner.iter().any(GoStatement::declares))) {
            return;
        }
        let mut flattened = Vec::with_capacity(list.len());
        for statement in list.drain(..) {
            match statement {
                GoStatement::Block(inner) if !inner.iter().any(GoStatement::declares) => {
                    flattened.extend(inner);
                    changed = true;
                }
                other => flattened.push(other),
            }
        }
        *list = flattened;
    });
    changed
}

/// 引数なしのメソッド呼び出し文の受け手とメソッド名
fn method_statement(statement: &GoStatement) -> Option<(&GoExpression, &str)> {
    let GoStatement::Expression(GoExpression::Call { function, args, .. }) = statement else {
        return None;
    };
    match function.as_ref() {
        GoExpression::Selector { target, field } if args.is_empty() => Some((target.as_ref(), field.as_str())),
        _ => None,
    }
}

fn is_empty_section(lock: &GoStatement, unlock: &GoStatement) -> bool {
    match (method_statement(lock), method_statement(unlock)) {
        (Some((a, "Lock")), Some((b, "Unlock"))) | (Some((a, "RLock")), Some((b, "RUnlock"))) => a == b,
        _ => false,
    }
}

fn drop_empty_sections(body: &mut Vec<GoStatement>) -> bool {
    let mut changed = false;
    for_each_list(body, &mut |list| {
        let mut kept: Vec<GoStatement> = Vec::with_capacity(list.len());
        for statement in list.drain(..) {
            if kept.last().map_or(false, |last| is_empty_section(last, &statement)) {
                kept.pop();
                changed = true;
                continue;
            }
            kept.push(statement);
        }
        *list = kept;
    });
    changed
}

/// 関数本体を正規化する
pub fn normalise_body(body: &mut Vec<GoStatement>) {
    loop {
        let mut changed = false;
        changed |= fold_constant_ifs(body);
        changed |= hoist_blocks(body);
        changed |= drop_empty_sections(body);
        changed |= merge_adjacent_labels(body);
        changed |= remove_unused_labels(body);
        if !changed {
            break;
        }
    }
}

/// モジュール全体を正規化する
pub fn normalise(module: &mut GoModule) {
    let imports: BTreeSet<String> = module.imports.drain(..).collect();
    module.imports = imports.into_iter().collect();
    for declaration in &mut module.declarations {
        if let GoDeclaration::Function { body, .. } = declaration {
            normalise_body(body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::go::ast::GoExpression;

    fn call(name: &str) -> GoStatement {
        GoStatement::Expression(GoExpression::call(name, Vec::new()))
    }

    #[test]
    fn test_merges_adjacent_labels_and_rewrites_gotos() {
        let mut body = vec![
            GoStatement::Label("a".to_string()),
            GoStatement::Label("b".to_string()),
            call("f"),
            GoStatement::Goto("b".to_string()),
        ];
        normalise_body(&mut body);
        assert_eq!(
            body,
            vec![GoStatement::Label("a".to_string()), call("f"), GoStatement::Goto("a".to_string())]
        );
    }

    #[test]
    fn test_removes_unreferenced_labels_and_hoists_blocks() {
        let mut body = vec![
            GoStatement::Label("unused".to_string()),
            GoStatement::Block(vec![call("f"), GoStatement::Block(vec![call("g")])]),
            GoStatement::Block(vec![GoStatement::define("t", GoExpression::literal("1")), call("h")]),
        ];
        normalise_body(&mut body);
        assert_eq!(body.len(), 3);
        assert_eq!(body[0], call("f"));
        assert_eq!(body[1], call("g"));
        assert!(matches!(&body[2], GoStatement::Block(inner) if inner.len() == 2));
    }

    #[test]
    fn test_folds_constant_conditions() {
        let mut body = vec![
            GoStatement::If {
                condition: GoExpression::boolean(true),
                then: vec![call("yes")],
                otherwise: Some(vec![call("no")]),
            },
            GoStatement::If {
                condition: GoExpression::boolean(false),
                then: vec![call("never")],
                otherwise: None,
            },
        ];
        normalise_body(&mut body);
        assert_eq!(body, vec![call("yes")]);
    }

    #[test]
    fn test_drops_lock_immediately_released() {
        let lock = |method: &str| {
            GoStatement::expression(GoExpression::method(
                GoExpression::index(GoExpression::identifier("pGoLock"), GoExpression::identifier("0")),
                method,
                Vec::new(),
            ))
        };
        let mut body = vec![
            lock("Lock"),
            GoStatement::Block(vec![lock("Unlock"), call("f"), lock("Lock")]),
            call("g"),
            lock("Unlock"),
            lock("RLock"),
            lock("Unlock"),
        ];
        normalise_body(&mut body);
        assert_eq!(
            body,
            vec![call("f"), lock("Lock"), call("g"), lock("Unlock"), lock("RLock"), lock("Unlock")]
        );
    }

    #[test]
    fn test_drops_empty_else_branch() {
        let mut body = vec![GoStatement::If {
            condition: GoExpression::identifier("ok"),
            then: vec![call("f")],
            otherwise: Some(Vec::new()),
        }];
        normalise_body(&mut body);
        assert_eq!(
            body,
            vec![GoStatement::If {
                condition: GoExpression::identifier("ok"),
                then: vec![call("f")],
                otherwise: None,
            }]
        );
    }

    #[test]
    fn test_is_idempotent() {
        let mut body = vec![
            GoStatement::Label("l1".to_string()),
            GoStatement::Block(vec![call("f")]),
            GoStatement::Goto("l1".to_string()),
        ];
        normalise_body(&mut body);
        let once = body.clone();
        normalise_body(&mut body);
        assert_eq!(body, once);
    }

    #[test]
    fn test_sorts_and_dedupes_imports() {
        let mut module = GoModule {
            package: "main".to_string(),
            imports: vec!["sync".to_string(), "fmt".to_string(), "sync".to_string()],
            declarations: Vec::new(),
        };
        normalise(&mut module);
        assert_eq!(module.imports, vec!["fmt".to_string(), "sync".to_string()]);
    }
}
