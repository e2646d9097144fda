//! # エラー処理モジュール
//!
//! コンパイラの各パスが報告する診断（Issue）と、それを蓄積する
//! `IssueContext` を定義します。パスは診断を追加するだけで、
//! 後続のパスを実行するかどうかはドライバが `has_errors` を見て決めます。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// ソースコード内の位置情報
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    /// ソースファイル名
    pub file: Arc<str>,
    /// 開始行（1から始まる）
    pub start_line: usize,
    /// 開始列（1から始まる）
    pub start_column: usize,
    /// 終了行
    pub end_line: usize,
    /// 終了列
    pub end_column: usize,
    /// 開始位置のバイトオフセット
    pub offset: usize,
}

impl SourceLocation {
    /// 新しい位置情報を作成
    pub fn new(
        file: Arc<str>,
        start_line: usize,
        start_column: usize,
        end_line: usize,
        end_column: usize,
        offset: usize,
    ) -> Self {
        Self {
            file,
            start_line,
            start_column,
            end_line,
            end_column,
            offset,
        }
    }

    /// 位置を持たない値（合成されたノードなど）に使う位置情報
    pub fn unknown() -> Self {
        Self {
            file: Arc::from(""),
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
            offset: 0,
        }
    }

    /// 位置情報が有効かどうかを確認
    pub fn is_known(&self) -> bool {
        self.start_line > 0
    }

    /// 2つの位置を覆う範囲を作成
    pub fn merge_with(&self, other: &SourceLocation) -> Self {
        if !self.is_known() {
            return other.clone();
        }
        if !other.is_known() {
            return self.clone();
        }
        let (start, end) = if self.offset <= other.offset {
            (self, other)
        } else {
            (other, self)
        };
        Self {
            file: Arc::clone(&start.file),
            start_line: start.start_line,
            start_column: start.start_column,
            end_line: end.end_line,
            end_column: end.end_column,
            offset: start.offset,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}:{}:{}", self.file, self.start_line, self.start_column)
        } else {
            write!(f, "<不明な位置>")
        }
    }
}

/// 診断の重大度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// コンパイルを止める
    Error,
    /// 報告のみ
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "エラー"),
            Severity::Warning => write!(f, "警告"),
        }
    }
}

fn describe_expected(expected: &[String], end_of_input: &bool) -> String {
    let mut message = if *end_of_input {
        "予期しない入力の終わりです".to_string()
    } else {
        "予期しない入力です".to_string()
    };
    if !expected.is_empty() {
        message.push_str(&format!("（期待: {}）", expected.join(", ")));
    }
    message
}

fn describe_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "検索パスなし".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 診断の種類
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IssueKind {
    #[error("構文解析に失敗しました: {}", describe_expected(.expected, .end_of_input))]
    Parse {
        expected: Vec<String>,
        end_of_input: bool,
    },

    #[error("未定義の識別子 `{name}` です")]
    UnknownIdentifier { name: String },

    #[error("未定義のラベル `{name}` です")]
    UnknownLabel { name: String },

    #[error("`{name}` は既に {previous} で定義されています")]
    DuplicateDefinition {
        name: String,
        previous: SourceLocation,
    },

    #[error("`{name}` の引数の数が一致しません（期待: {expected}, 実際: {actual}）")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("`{name}` は変数ではないため代入できません")]
    NotAVariable { name: String },

    #[error("局所的な名前 `{name}` にプライムを付けることはできません")]
    PrimedLocal { name: String },

    #[error("型の不一致: {expected} が必要ですが {actual} が見つかりました")]
    TypeMismatch {
        expected: String,
        actual: String,
        related: Vec<SourceLocation>,
    },

    #[error("無限型になります: {variable} が {ty} の中に現れます")]
    OccursCheck { variable: String, ty: String },

    #[error("マクロ `{name}` の展開が再帰しています")]
    MacroRecursion { name: String },

    #[error("{context} の最初の文にはラベルが必要です")]
    MissingLabel { context: String },

    #[error("モジュール `{name}` が見つかりません（検索したパス: {}）", describe_paths(.paths_checked))]
    ModuleNotFound {
        name: String,
        paths_checked: Vec<PathBuf>,
    },

    #[error("オプションが入力と整合しません: {reason}")]
    OptionIncompatibility { reason: String },

    #[error("定数 `{name}` はモジュール内で宣言されていません")]
    UnusedConstant { name: String },

    #[error("`{construct}` はGoへのコード生成に対応していません")]
    UnsupportedConstruct { construct: String },

    #[error("ラベル `{label}` で書き込みの後に await があります。中断時に書き込みは巻き戻されません")]
    AbortWithoutRollback { label: String },

    #[error("内部コンパイラエラー: {message}")]
    InternalCompilerError { message: String },
}

impl IssueKind {
    /// 機械可読な診断コード
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::Parse { .. } => "parse",
            IssueKind::UnknownIdentifier { .. } => "unknown-identifier",
            IssueKind::UnknownLabel { .. } => "unknown-label",
            IssueKind::DuplicateDefinition { .. } => "duplicate-definition",
            IssueKind::ArityMismatch { .. } => "arity-mismatch",
            IssueKind::NotAVariable { .. } => "not-a-variable",
            IssueKind::PrimedLocal { .. } => "primed-local",
            IssueKind::TypeMismatch { .. } => "type-mismatch",
            IssueKind::OccursCheck { .. } => "occurs-check",
            IssueKind::MacroRecursion { .. } => "macro-recursion",
            IssueKind::MissingLabel { .. } => "missing-label",
            IssueKind::ModuleNotFound { .. } => "module-not-found",
            IssueKind::OptionIncompatibility { .. } => "option-incompatibility",
            IssueKind::UnusedConstant { .. } => "unused-constant",
            IssueKind::UnsupportedConstruct { .. } => "unsupported-construct",
            IssueKind::AbortWithoutRollback { .. } => "abort-without-rollback",
            IssueKind::InternalCompilerError { .. } => "internal-compiler-error",
        }
    }
}

/// 1件の診断
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    /// 診断の種類
    pub kind: IssueKind,
    /// 重大度
    pub severity: Severity,
    /// 発生位置
    pub location: SourceLocation,
}

impl Issue {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_known() {
            write!(f, "{}: {}: {}", self.location, self.kind.code(), self.kind)
        } else {
            write!(f, "{}: {}", self.kind.code(), self.kind)
        }
    }
}

/// パス間で共有される診断の蓄積先
#[derive(Debug, Default, Clone)]
pub struct IssueContext {
    issues: Vec<Issue>,
}

impl IssueContext {
    /// 空のコンテキストを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// エラーを追加
    pub fn error(&mut self, location: SourceLocation, kind: IssueKind) {
        log::debug!("エラーを記録: {} {}", location, kind.code());
        self.issues.push(Issue {
            kind,
            severity: Severity::Error,
            location,
        });
    }

    /// 警告を追加
    pub fn warning(&mut self, location: SourceLocation, kind: IssueKind) {
        log::debug!("警告を記録: {} {}", location, kind.code());
        self.issues.push(Issue {
            kind,
            severity: Severity::Warning,
            location,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(Issue::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    /// 位置順に並べた診断（報告順は同じ位置の中で保たれる）
    pub fn sorted(&self) -> Vec<Issue> {
        let mut sorted = self.issues.clone();
        sorted.sort_by(|a, b| a.location.cmp(&b.location));
        sorted
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    /// `file:line:col: kind: message` 形式で1行ずつ、位置順に整形する
    pub fn format(&self) -> String {
        self.sorted()
            .iter()
            .map(Issue::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 別のコンテキストの診断を取り込む
    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }
}

/// コンパイラのトップレベルエラー
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("ファイル `{}` を読み込めません: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ファイル `{}` はUTF-8として解釈できません", .path.display())]
    Encoding { path: PathBuf },

    #[error("コンパイルに失敗しました（{} 件のエラー）", .issues.iter().filter(|i| i.is_error()).count())]
    Failed { issues: Vec<Issue> },

    #[error("内部コンパイラエラー: {0}")]
    Internal(String),
}

impl CompilerError {
    /// 失敗の原因となった診断（なければ空）
    pub fn issues(&self) -> &[Issue] {
        match self {
            CompilerError::Failed { issues } => issues,
            _ => &[],
        }
    }
}

/// コンパイラの結果型
pub type Result<T> = std::result::Result<T, CompilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn location(line: usize, column: usize) -> SourceLocation {
        SourceLocation::new(Arc::from("Test.tla"), line, column, line, column + 1, 0)
    }

    #[test]
    fn test_issue_format() {
        let mut ctx = IssueContext::new();
        ctx.error(
            location(3, 7),
            IssueKind::UnknownIdentifier {
                name: "foo".to_string(),
            },
        );
        let text = ctx.issues()[0].to_string();
        assert!(text.starts_with("Test.tla:3:7: unknown-identifier: "), "{}", text);
        assert!(text.contains("foo"));
        assert!(ctx.has_errors());
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let mut ctx = IssueContext::new();
        ctx.warning(
            location(1, 1),
            IssueKind::UnusedConstant {
                name: "N".to_string(),
            },
        );
        assert!(!ctx.has_errors());
        assert_eq!(ctx.warnings().count(), 1);
    }

    #[test]
    fn test_sorted_by_location() {
        let mut ctx = IssueContext::new();
        ctx.error(location(5, 1), IssueKind::MacroRecursion { name: "b".into() });
        ctx.error(location(2, 1), IssueKind::MacroRecursion { name: "a".into() });
        let sorted = ctx.sorted();
        assert_eq!(sorted[0].location.start_line, 2);
        assert_eq!(sorted[1].location.start_line, 5);
    }

    #[test]
    fn test_merge_locations() {
        let a = SourceLocation::new(Arc::from("f"), 1, 1, 1, 3, 0);
        let b = SourceLocation::new(Arc::from("f"), 2, 4, 2, 9, 20);
        let merged = b.merge_with(&a);
        assert_eq!((merged.start_line, merged.start_column), (1, 1));
        assert_eq!((merged.end_line, merged.end_column), (2, 9));
        assert_eq!(SourceLocation::unknown().merge_with(&a), a);
    }
}
