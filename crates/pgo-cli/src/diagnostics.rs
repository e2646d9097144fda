//! 診断の表示
//!
//! 1件1行の `file:line:col: kind: message` 形式を保ったまま、
//! 重大度ごとに行全体を色付けして標準エラーに出します。

use colored::Colorize;
use pgo_compiler::{Issue, Severity};

/// 1件の診断を表示用の1行にする
pub fn render(issue: &Issue) -> String {
    let line = issue.to_string();
    match issue.severity {
        Severity::Error => line.red().bold().to_string(),
        Severity::Warning => line.yellow().to_string(),
    }
}

pub fn report(issues: &[Issue]) {
    for issue in issues {
        eprintln!("{}", render(issue));
    }
}

/// 最後に出す件数の要約
pub fn summary(issues: &[Issue]) -> Option<String> {
    let errors = issues.iter().filter(|issue| issue.is_error()).count();
    let warnings = issues.len() - errors;
    match (errors, warnings) {
        (0, 0) => None,
        (0, w) => Some(format!("警告 {} 件", w).yellow().to_string()),
        (e, 0) => Some(format!("エラー {} 件", e).red().bold().to_string()),
        (e, w) => Some(format!("エラー {} 件, 警告 {} 件", e, w).red().bold().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgo_compiler::{IssueKind, SourceLocation};

    fn issue(severity: Severity) -> Issue {
        Issue {
            kind: IssueKind::UnusedConstant { name: "N".to_string() },
            severity,
            location: SourceLocation::unknown(),
        }
    }

    #[test]
    fn test_render_keeps_plain_text_without_color() {
        colored::control::set_override(false);
        let line = render(&issue(Severity::Warning));
        assert!(line.starts_with("unused-constant: "));
        assert!(line.contains('N'));
    }

    #[test]
    fn test_summary_counts() {
        colored::control::set_override(false);
        assert_eq!(summary(&[]), None);
        assert_eq!(summary(&[issue(Severity::Warning)]).as_deref(), Some("警告 1 件"));
        assert_eq!(
            summary(&[issue(Severity::Error), issue(Severity::Warning)]).as_deref(),
            Some("エラー 1 件, 警告 1 件")
        );
    }
}
