//! # 文の組み立て
//!
//! 式の変換は途中で一時変数やループを前置きすることがあるため、
//! 生成中の文はブロックのスタックに積んでいきます。

use std::collections::{BTreeSet, HashSet};

use super::ast::GoStatement;

const GO_KEYWORDS: &[&str] = &[
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough", "for", "func", "go",
    "goto", "if", "import", "interface", "map", "package", "range", "return", "select", "struct", "switch", "type",
    "var",
];

/// 生成コードが使う事前宣言の名前とパッケージ名
const RESERVED: &[&str] = &[
    "append", "bool", "cap", "close", "copy", "delete", "error", "false", "float64", "int", "len", "make", "new",
    "nil", "panic", "print", "println", "string", "true", "main", "init", "fmt", "sync", "reflect", "math",
    "datatypes", "distsys", "err", "_", "pGoLock", "pGoStart", "pGoWait",
];

/// Go の識別子として安全で、かつ重複しない名前を払い出す
#[derive(Debug, Clone, Default)]
pub struct NameCleaner {
    used: HashSet<String>,
}

impl NameCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 外側のスコープで使われた名前を引き継ぐ
    pub fn nested(&self) -> Self {
        self.clone()
    }

    /// 名前を予約済みにする（既に使われていても構わない）
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// `base` をもとに新しい名前を作る。衝突すれば `base0`、`base1` … を試す
    pub fn clean(&mut self, base: &str) -> String {
        let mut sanitized: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
            sanitized.insert(0, 'v');
        }
        let blocked = |name: &str, used: &HashSet<String>| {
            GO_KEYWORDS.contains(&name) || RESERVED.contains(&name) || used.contains(name)
        };
        if !blocked(&sanitized, &self.used) {
            self.used.insert(sanitized.clone());
            return sanitized;
        }
        let mut counter = 0usize;
        loop {
            let candidate = format!("{}{}", sanitized, counter);
            if !blocked(&candidate, &self.used) {
                self.used.insert(candidate.clone());
                return candidate;
            }
            counter += 1;
        }
    }
}

/// 関数本体を組み立てる
#[derive(Debug)]
pub struct BlockBuilder {
    pub names: NameCleaner,
    blocks: Vec<Vec<GoStatement>>,
    imports: BTreeSet<String>,
}

impl BlockBuilder {
    pub fn new(names: NameCleaner) -> Self {
        Self {
            names,
            blocks: vec![Vec::new()],
            imports: BTreeSet::new(),
        }
    }

    pub fn fresh(&mut self, base: &str) -> String {
        self.names.clean(base)
    }

    pub fn add(&mut self, statement: GoStatement) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(statement);
        }
    }

    pub fn extend(&mut self, statements: impl IntoIterator<Item = GoStatement>) {
        for statement in statements {
            self.add(statement);
        }
    }

    pub fn import(&mut self, path: &str) {
        self.imports.insert(path.to_string());
    }

    /// 入れ子のブロックを開く
    pub fn open(&mut self) {
        self.blocks.push(Vec::new());
    }

    /// 最も内側のブロックを閉じてその文を返す
    pub fn close(&mut self) -> Vec<GoStatement> {
        if self.blocks.len() > 1 {
            self.blocks.pop().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    /// `f` の生成した文を独立したブロックとして取り出す
    pub fn capture<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> (Vec<GoStatement>, T) {
        self.open();
        let value = f(self);
        (self.close(), value)
    }

    /// まだ何も出力していないか
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(Vec::is_empty)
    }

    /// 最も内側のブロックが `return` か `goto` で終わっているか
    pub fn ends_with_exit(&self) -> bool {
        matches!(
            self.blocks.last().and_then(|block| block.last()),
            Some(GoStatement::Return(_) | GoStatement::Goto(_))
        )
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn imports(&self) -> &BTreeSet<String> {
        &self.imports
    }

    /// 本体と使ったインポートを返す
    pub fn finish(mut self) -> (Vec<GoStatement>, BTreeSet<String>) {
        while self.blocks.len() > 1 {
            let inner = self.close();
            self.add(GoStatement::Block(inner));
        }
        (self.blocks.pop().unwrap_or_default(), self.imports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::go::ast::GoExpression;

    #[test]
    fn test_clean_avoids_keywords_and_duplicates() {
        let mut names = NameCleaner::new();
        assert_eq!(names.clean("x"), "x");
        assert_eq!(names.clean("x"), "x0");
        assert_eq!(names.clean("x"), "x1");
        assert_eq!(names.clean("type"), "type0");
        assert_eq!(names.clean("len"), "len0");
        assert_eq!(names.clean("my-var"), "my_var");
        assert_eq!(names.clean("1st"), "v1st");
    }

    #[test]
    fn test_capture_returns_inner_statements() {
        let mut builder = BlockBuilder::new(NameCleaner::new());
        builder.add(GoStatement::Break);
        let (inner, value) = builder.capture(|b| {
            b.add(GoStatement::Continue);
            42
        });
        assert_eq!(value, 42);
        assert_eq!(inner, vec![GoStatement::Continue]);
        builder.add(GoStatement::Expression(GoExpression::identifier("x")));
        let (body, _) = builder.finish();
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_ends_with_exit_looks_at_innermost_block() {
        let mut builder = BlockBuilder::new(NameCleaner::new());
        assert!(!builder.ends_with_exit());
        builder.add(GoStatement::Return(Vec::new()));
        assert!(builder.ends_with_exit());
        builder.open();
        assert!(!builder.ends_with_exit());
        builder.add(GoStatement::Goto("l".to_string()));
        assert!(builder.ends_with_exit());
    }
}
