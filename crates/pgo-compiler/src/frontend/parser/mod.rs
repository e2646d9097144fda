//! # 構文解析器
//!
//! 1つの入力バッファから TLA+ モジュールと PlusCal アルゴリズムの
//! 2つの抽象構文木を作ります。失敗は最も遠くまで読んだ位置の
//! 1件の `parse` 診断として報告されます。

pub mod combinator;
pub mod pcal;
pub mod tla;

use std::sync::Arc;

use regex::Regex;

use crate::frontend::ast::{PlusCalAlgorithm, TlaExpression, TlaModule, TlaUnit};
use crate::frontend::error::{CompilerError, IssueContext, IssueKind, Result};

pub use combinator::{Grammar, LexicalContext, ParseFailure, VariableMap};
pub use pcal::{add_automatic_labels, PlusCalGrammar};
pub use tla::TlaGrammar;

/// アルゴリズムの開始位置（グループ1がキーワード）
const ALGORITHM_START: &str = r"(?s)\(\*.*?(--algorithm|--fair\s+algorithm|--mpcal)";
/// アルゴリズムを閉じるコメント終端まで
const ALGORITHM_END: &str = r"(?s)^.*?\*\)";
const TRANSLATION_BEGIN: &str = r"\\\* BEGIN (?:PLUSCAL )?TRANSLATION";
const TRANSLATION_END: &str = r"\\\* END (?:PLUSCAL )?TRANSLATION[^\n]*";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CompilerError::Internal(format!("正規表現 `{}` が不正です: {}", pattern, e)))
}

fn report(issues: &mut IssueContext, failure: ParseFailure) {
    issues.error(
        failure.location.clone(),
        IssueKind::Parse {
            expected: failure.expected.into_iter().collect(),
            end_of_input: failure.end_of_input,
        },
    );
}

fn run<T: 'static>(ctx: &mut LexicalContext, grammar: &Grammar<T>, issues: &mut IssueContext) -> Option<T> {
    match combinator::read_or_except(ctx, grammar) {
        Ok(value) => Some(value),
        Err(failure) => {
            report(issues, failure);
            None
        }
    }
}

/// 生成済みの翻訳（`\* BEGIN TRANSLATION` から `\* END TRANSLATION` まで）を
/// 改行を残して空白に置き換える
pub fn blank_translation(source: &str) -> Result<String> {
    let begin = compile(TRANSLATION_BEGIN)?;
    let end = compile(TRANSLATION_END)?;
    let Some(start) = begin.find(source).map(|m| m.start()) else {
        return Ok(source.to_string());
    };
    let Some(stop) = end.find_at(source, start).map(|m| m.end()) else {
        return Ok(source.to_string());
    };
    let blanked: String = source[start..stop]
        .chars()
        .map(|c| if c == '\n' || c == '\r' { c } else { ' ' })
        .collect();
    Ok(format!("{}{}{}", &source[..start], blanked, &source[stop..]))
}

/// TLA+ モジュールを解析する。構文エラーは `issues` に記録され `None` が返る
pub fn parse_module(file: &str, source: &str, issues: &mut IssueContext) -> Result<Option<TlaModule>> {
    let text = blank_translation(source)?;
    let grammar = TlaGrammar::new();
    let mut ctx = LexicalContext::new(Arc::<str>::from(file), text);
    Ok(run(&mut ctx, &grammar.module(), issues))
}

/// コメント中の PlusCal アルゴリズムを解析する
///
/// `--algorithm` の本体では先頭のラベルなしの文に自動でラベルが付きます。
pub fn parse_algorithm(file: &str, source: &str, issues: &mut IssueContext) -> Result<Option<PlusCalAlgorithm>> {
    let start_pattern = compile(ALGORITHM_START)?;
    let end_pattern = compile(ALGORITHM_END)?;
    let text = blank_translation(source)?;
    let mut ctx = LexicalContext::new(Arc::<str>::from(file), text);

    let start = start_pattern
        .captures(ctx.source())
        .and_then(|captures| captures.get(1))
        .map(|m| m.start());
    let Some(start) = start else {
        let failure = ctx.fail("`(* --algorithm` または `(* --mpcal`");
        report(issues, failure);
        return Ok(None);
    };
    ctx.set_offset(start);

    let grammar = PlusCalGrammar::new();
    let Some(mut algorithm) = run(&mut ctx, &grammar.algorithm(), issues) else {
        return Ok(None);
    };
    match end_pattern.find(ctx.remaining()).map(|m| m.end()) {
        Some(len) => ctx.advance(len),
        None => {
            let failure = ctx.fail("`*)`");
            report(issues, failure);
            return Ok(None);
        }
    }
    add_automatic_labels(&mut algorithm);
    log::debug!("アルゴリズム `{}` を解析しました", algorithm.name.id);
    Ok(Some(algorithm))
}

/// 単独の TLA+ 式を解析する（入力全体を消費しなければならない）
pub fn parse_expression(file: &str, source: &str, issues: &mut IssueContext) -> Option<TlaExpression> {
    let grammar = TlaGrammar::new();
    let whole = grammar
        .expression()
        .skip(Grammar::new(|ctx: &mut LexicalContext, _: &VariableMap| {
            ctx.skip_whitespace()?;
            if ctx.is_at_end() {
                Ok(())
            } else {
                Err(ctx.fail("入力の終わり"))
            }
        }));
    let mut ctx = LexicalContext::new(Arc::<str>::from(file), source);
    run(&mut ctx, &whole, issues)
}

/// 単独の TLA+ 単位を解析する。先頭の `----` 区切りは読み飛ばす
pub fn parse_unit(file: &str, source: &str, issues: &mut IssueContext) -> Option<TlaUnit> {
    let grammar = TlaGrammar::new();
    let separators = combinator::repeat(Grammar::new(|ctx: &mut LexicalContext, vars: &VariableMap| {
        combinator::lexeme(ctx, vars, "`----`", |rest| {
            let len = rest.chars().take_while(|&c| c == '-').count();
            (len >= 4).then_some(len)
        })
        .map(|_| ())
    }));
    let unit = grammar.unit().preceded_by(separators);
    let mut ctx = LexicalContext::new(Arc::<str>::from(file), source);
    run(&mut ctx, &unit, issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_translation_keeps_lines() {
        let source = "a\n\\* BEGIN TRANSLATION\nVARIABLES pc\n\\* END TRANSLATION\nb";
        let blanked = blank_translation(source).unwrap();
        assert_eq!(blanked.len(), source.len());
        assert_eq!(blanked.lines().count(), source.lines().count());
        assert!(!blanked.contains("VARIABLES"));
        assert!(blanked.ends_with("\nb"));
    }

    #[test]
    fn test_parse_module_skips_algorithm_comment() {
        let source = "---- MODULE Test ----\nEXTENDS Integers\n(* --algorithm Test {\n { print 1 }\n}\n*)\nInit == TRUE\n====\n";
        let mut issues = IssueContext::new();
        let module = parse_module("Test.tla", source, &mut issues).unwrap().unwrap();
        assert!(issues.is_empty());
        assert_eq!(module.name.id, "Test");
        assert_eq!(module.units.len(), 1);
    }

    #[test]
    fn test_parse_algorithm_reports_missing_algorithm() {
        let mut issues = IssueContext::new();
        let result = parse_algorithm("Test.tla", "---- MODULE Test ----\n====\n", &mut issues).unwrap();
        assert!(result.is_none());
        assert_eq!(issues.errors().count(), 1);
        assert_eq!(issues.issues()[0].kind.code(), "parse");
    }

    #[test]
    fn test_parse_expression_requires_whole_input() {
        let mut issues = IssueContext::new();
        assert!(parse_expression("const", "1 + 2", &mut issues).is_some());
        assert!(parse_expression("const", "1 + ", &mut issues).is_none());
        assert!(issues.has_errors());
    }
}
