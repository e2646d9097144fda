//! # 定数定義の解析
//!
//! 設定から与えられた `NAME = TLA+式` を式の構文木に変換します。

use std::collections::BTreeMap;

use crate::frontend::ast::TlaExpression;
use crate::frontend::error::{IssueContext, IssueKind, SourceLocation};
use crate::frontend::parser;

/// `NAME = expression` を名前と式のテキストに分ける
pub fn split_definition(definition: &str) -> Option<(String, String)> {
    let (name, value) = definition.split_once('=')?;
    let name = name.trim();
    let value = value.trim();
    let valid_name = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.chars().any(|c| c.is_ascii_alphabetic());
    if !valid_name || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// 各定数の値を TLA+ 式として解析する
///
/// 解析できなかった定義は診断を残して結果から外されます。
pub fn parse_constant_definitions(
    definitions: &BTreeMap<String, String>,
    issues: &mut IssueContext,
) -> BTreeMap<String, TlaExpression> {
    let mut parsed = BTreeMap::new();
    for (name, text) in definitions {
        let file = format!("<定数 {}>", name);
        if let Some(expression) = parser::parse_expression(&file, text, issues) {
            log::debug!("定数 {} = {}", name, expression);
            parsed.insert(name.clone(), expression);
        }
    }
    parsed
}

/// `NAME = expression` 形式の文字列の列を解析する
pub fn parse_constant_strings(definitions: &[String], issues: &mut IssueContext) -> BTreeMap<String, TlaExpression> {
    let mut map = BTreeMap::new();
    for definition in definitions {
        match split_definition(definition) {
            Some((name, value)) => {
                map.insert(name, value);
            }
            None => issues.error(
                SourceLocation::unknown(),
                IssueKind::Parse {
                    expected: vec!["`NAME = TLA+式`".to_string()],
                    end_of_input: false,
                },
            ),
        }
    }
    parse_constant_definitions(&map, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::TlaExpressionKind;

    #[test]
    fn test_split_definition() {
        assert_eq!(split_definition("N = 3"), Some(("N".to_string(), "3".to_string())));
        assert_eq!(
            split_definition("Procs={1, 2}"),
            Some(("Procs".to_string(), "{1, 2}".to_string()))
        );
        assert_eq!(split_definition("= 3"), None);
        assert_eq!(split_definition("N ="), None);
        assert_eq!(split_definition("N"), None);
    }

    #[test]
    fn test_parse_constant_definitions() {
        let mut issues = IssueContext::new();
        let mut definitions = BTreeMap::new();
        definitions.insert("N".to_string(), "2 + 1".to_string());
        definitions.insert("Bad".to_string(), "{1,".to_string());
        let parsed = parse_constant_definitions(&definitions, &mut issues);
        assert_eq!(parsed.len(), 1);
        assert!(matches!(parsed["N"].kind, TlaExpressionKind::Binary { .. }));
        assert_eq!(issues.errors().count(), 1);
    }

    #[test]
    fn test_parse_constant_strings_rejects_malformed() {
        let mut issues = IssueContext::new();
        let parsed = parse_constant_strings(&["N = 3".to_string(), "oops".to_string()], &mut issues);
        assert_eq!(parsed.len(), 1);
        assert!(issues.has_errors());
    }
}
