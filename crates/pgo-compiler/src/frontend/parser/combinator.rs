//! # パーサコンビネータ
//!
//! TLA+ と PlusCal の文法を組み立てるための小さなコンビネータ群です。
//!
//! - 失敗時には入力位置が必ず元に戻ります
//! - `cut` は局所的なコミットで、同じ選択点の残りの候補を打ち切ります
//! - 最も遠くまで進んだ失敗を記録し、同じ位置の期待集合は合成されます
//! - `ReferenceGrammar` 経由の非終端記号は (位置, 規則, 変数表) でメモ化されます

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use regex::Regex;

use crate::frontend::error::SourceLocation;

/// トークンの最小列（これ以下の列にあるトークンは受理しない）
pub const MIN_COLUMN: &str = "MIN_COLUMN";

/// 文法の切り替えに使う変数表
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VariableMap {
    values: BTreeMap<&'static str, i64>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: &'static str, value: i64) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    /// 最小列（未設定なら -1）
    pub fn min_column(&self) -> i64 {
        self.get(MIN_COLUMN).unwrap_or(-1)
    }
}

/// 構文解析の失敗
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    /// 失敗した位置
    pub offset: usize,
    pub location: SourceLocation,
    /// その位置で期待されていたもの
    pub expected: BTreeSet<String>,
    /// 入力の終わりで失敗したか
    pub end_of_input: bool,
}

impl ParseFailure {
    /// より遠い方を残し、同じ位置なら期待集合を合成する
    pub fn merge(mut self, other: ParseFailure) -> ParseFailure {
        if other.offset > self.offset {
            other
        } else if other.offset < self.offset {
            self
        } else {
            self.expected.extend(other.expected);
            self
        }
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseFailure>;

/// 入力位置の記録
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    offset: usize,
}

type MemoKey = (usize, usize, VariableMap);

struct MemoEntry {
    result: Rc<dyn Any>,
    end: usize,
    cut: bool,
}

/// 解析中の入力と状態
pub struct LexicalContext {
    file: Arc<str>,
    source: String,
    line_starts: Vec<usize>,
    offset: usize,
    cut: bool,
    furthest: Option<ParseFailure>,
    memo: HashMap<MemoKey, MemoEntry>,
}

impl LexicalContext {
    /// 新しい解析コンテキストを作成
    pub fn new(file: impl Into<Arc<str>>, source: impl Into<String>) -> Self {
        let source = source.into();
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            file: file.into(),
            source,
            line_starts,
            offset: 0,
            cut: false,
            furthest: None,
            memo: HashMap::new(),
        }
    }

    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> &str {
        &self.source[self.offset..]
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.source.len()
    }

    pub fn mark(&self) -> Mark {
        Mark { offset: self.offset }
    }

    pub fn reset(&mut self, mark: Mark) {
        self.offset = mark.offset;
    }

    pub fn advance(&mut self, bytes: usize) {
        self.offset = (self.offset + bytes).min(self.source.len());
    }

    /// 位置を直接設定（`skip_to` のような読み飛ばし用）
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.source.len());
    }

    fn line_and_column(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self.source[start..offset.min(self.source.len())].chars().count() + 1;
        (line + 1, column)
    }

    /// 指定位置の列（1から始まる）
    pub fn column_of(&self, offset: usize) -> i64 {
        self.line_and_column(offset).1 as i64
    }

    /// 範囲の位置情報
    pub fn location_between(&self, start: usize, end: usize) -> SourceLocation {
        let (start_line, start_column) = self.line_and_column(start);
        let (end_line, end_column) = self.line_and_column(end.max(start));
        SourceLocation::new(
            Arc::clone(&self.file),
            start_line,
            start_column,
            end_line,
            end_column,
            start,
        )
    }

    pub fn location_here(&self) -> SourceLocation {
        self.location_between(self.offset, self.offset)
    }

    /// 失敗を作成し、最遠失敗として記録する
    pub fn fail(&mut self, expected: impl Into<String>) -> ParseFailure {
        let failure = ParseFailure {
            offset: self.offset,
            location: self.location_here(),
            expected: BTreeSet::from([expected.into()]),
            end_of_input: self.is_at_end(),
        };
        self.record(failure.clone());
        failure
    }

    fn record(&mut self, failure: ParseFailure) {
        self.furthest = Some(match self.furthest.take() {
            Some(previous) => previous.merge(failure),
            None => failure,
        });
    }

    pub fn furthest_failure(&self) -> Option<&ParseFailure> {
        self.furthest.as_ref()
    }

    fn take_cut(&mut self) -> bool {
        std::mem::replace(&mut self.cut, false)
    }

    /// 空白とコメント（`\*` 行コメント、入れ子可能な `(* *)`）を読み飛ばした先の位置
    pub fn whitespace_end(&self, from: usize) -> std::result::Result<usize, usize> {
        let bytes = self.source.as_bytes();
        let mut i = from;
        loop {
            while i < bytes.len() && (bytes[i] as char).is_ascii_whitespace() {
                i += 1;
            }
            if bytes[i..].starts_with(b"\\*") {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            if bytes[i..].starts_with(b"(*") {
                let comment_start = i;
                let mut depth = 0usize;
                loop {
                    if i >= bytes.len() {
                        return Err(comment_start);
                    }
                    if bytes[i..].starts_with(b"(*") {
                        depth += 1;
                        i += 2;
                    } else if bytes[i..].starts_with(b"*)") {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                continue;
            }
            return Ok(i);
        }
    }

    /// 空白とコメントを読み飛ばす。閉じられていないコメントは字句エラー
    pub fn skip_whitespace(&mut self) -> ParseResult<()> {
        match self.whitespace_end(self.offset) {
            Ok(end) => {
                self.offset = end;
                Ok(())
            }
            Err(start) => {
                let saved = self.offset;
                self.offset = start;
                let failure = self.fail("コメントの終端 `*)`");
                self.offset = saved;
                Err(failure)
            }
        }
    }

    /// 次のトークンの開始位置（空白を消費しない）
    pub fn peek_token_start(&self) -> usize {
        self.whitespace_end(self.offset).unwrap_or(self.offset)
    }

    fn memo_lookup<T: Clone + 'static>(&mut self, key: &MemoKey) -> Option<ParseResult<T>> {
        let entry = self.memo.get(key)?;
        let result = entry.result.downcast_ref::<ParseResult<T>>()?.clone();
        let (end, cut) = (entry.end, entry.cut);
        if result.is_ok() {
            self.offset = end;
        }
        self.cut |= cut;
        Some(result)
    }

    fn memo_store<T: Clone + 'static>(&mut self, key: MemoKey, result: &ParseResult<T>, cut: bool) {
        let entry = MemoEntry {
            result: Rc::new(result.clone()),
            end: self.offset,
            cut,
        };
        self.memo.insert(key, entry);
    }
}

type ParseFn<T> = dyn Fn(&mut LexicalContext, &VariableMap) -> ParseResult<T>;

/// 文法。共有可能な解析関数
pub struct Grammar<T> {
    parse_fn: Rc<ParseFn<T>>,
}

impl<T> Clone for Grammar<T> {
    fn clone(&self) -> Self {
        Self {
            parse_fn: Rc::clone(&self.parse_fn),
        }
    }
}

impl<T: 'static> Grammar<T> {
    /// 関数から文法を作成
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut LexicalContext, &VariableMap) -> ParseResult<T> + 'static,
    {
        Self { parse_fn: Rc::new(f) }
    }

    /// 解析を実行する。失敗時は開始位置に戻る
    pub fn parse(&self, ctx: &mut LexicalContext, vars: &VariableMap) -> ParseResult<T> {
        let mark = ctx.mark();
        let result = (self.parse_fn)(ctx, vars);
        if result.is_err() {
            ctx.reset(mark);
        }
        result
    }

    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> Grammar<U> {
        Grammar::new(move |ctx, vars| self.parse(ctx, vars).map(&f))
    }

    /// 消費した範囲の位置情報とともに変換する
    pub fn map_located<U: 'static>(self, f: impl Fn(SourceLocation, T) -> U + 'static) -> Grammar<U> {
        Grammar::new(move |ctx, vars| {
            let start = ctx.peek_token_start();
            let value = self.parse(ctx, vars)?;
            let location = ctx.location_between(start, ctx.offset());
            Ok(f(location, value))
        })
    }

    /// 連接し、両方の結果を組にする
    pub fn then<U: 'static>(self, next: Grammar<U>) -> Grammar<(T, U)> {
        Grammar::new(move |ctx, vars| {
            let first = self.parse(ctx, vars)?;
            let second = next.parse(ctx, vars)?;
            Ok((first, second))
        })
    }

    /// 連接し、後ろの結果を捨てる
    pub fn skip<U: 'static>(self, next: Grammar<U>) -> Grammar<T> {
        Grammar::new(move |ctx, vars| {
            let value = self.parse(ctx, vars)?;
            next.parse(ctx, vars)?;
            Ok(value)
        })
    }

    /// 連接し、前の結果を捨てる
    pub fn preceded_by<U: 'static>(self, prefix: Grammar<U>) -> Grammar<T> {
        Grammar::new(move |ctx, vars| {
            prefix.parse(ctx, vars)?;
            self.parse(ctx, vars)
        })
    }
}

/// 候補を順に試す。コミット（`cut`）後の失敗では残りを試さない
pub fn one_of<T: 'static>(alternatives: Vec<Grammar<T>>) -> Grammar<T> {
    Grammar::new(move |ctx, vars| {
        let mut failure: Option<ParseFailure> = None;
        for alternative in &alternatives {
            let saved = ctx.take_cut();
            let result = alternative.parse(ctx, vars);
            let committed = ctx.cut;
            ctx.cut = saved;
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    failure = Some(match failure {
                        Some(previous) => previous.merge(e),
                        None => e,
                    });
                    if committed {
                        break;
                    }
                }
            }
        }
        Err(failure.unwrap_or_else(|| ctx.fail("候補")))
    })
}

/// 0回以上の繰り返し
pub fn repeat<T: 'static>(element: Grammar<T>) -> Grammar<Vec<T>> {
    Grammar::new(move |ctx, vars| {
        let mut values = Vec::new();
        loop {
            let start = ctx.offset();
            let saved = ctx.take_cut();
            let result = element.parse(ctx, vars);
            let committed = ctx.cut;
            ctx.cut = saved;
            match result {
                Ok(value) => {
                    values.push(value);
                    if ctx.offset() == start {
                        break;
                    }
                }
                Err(e) if committed => return Err(e),
                Err(_) => break,
            }
        }
        Ok(values)
    })
}

/// 1回以上の繰り返し
pub fn repeat_one_or_more<T: 'static>(element: Grammar<T>) -> Grammar<Vec<T>> {
    let rest = repeat(element.clone());
    Grammar::new(move |ctx, vars| {
        let first = element.parse(ctx, vars)?;
        let mut values = vec![first];
        values.extend(rest.parse(ctx, vars)?);
        Ok(values)
    })
}

/// 省略可能
pub fn optional<T: 'static>(element: Grammar<T>) -> Grammar<Option<T>> {
    Grammar::new(move |ctx, vars| {
        let saved = ctx.take_cut();
        let result = element.parse(ctx, vars);
        let committed = ctx.cut;
        ctx.cut = saved;
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if committed => Err(e),
            Err(_) => Ok(None),
        }
    })
}

/// 区切り付きの1個以上のリスト
pub fn list_of<T: 'static, S: 'static>(element: Grammar<T>, separator: Grammar<S>) -> Grammar<Vec<T>> {
    Grammar::new(move |ctx, vars| {
        let mut values = vec![element.parse(ctx, vars)?];
        loop {
            let mark = ctx.mark();
            let saved = ctx.take_cut();
            let result = separator.parse(ctx, vars).and_then(|_| element.parse(ctx, vars));
            let committed = ctx.cut;
            ctx.cut = saved;
            match result {
                Ok(value) => values.push(value),
                Err(e) if committed => return Err(e),
                Err(_) => {
                    ctx.reset(mark);
                    break;
                }
            }
        }
        Ok(values)
    })
}

/// 成功したら現在の選択点にコミットする
pub fn cut<T: 'static>(element: Grammar<T>) -> Grammar<T> {
    Grammar::new(move |ctx, vars| {
        let value = element.parse(ctx, vars)?;
        ctx.cut = true;
        Ok(value)
    })
}

/// `element` が現在位置で成功するなら失敗する。入力は消費しない
pub fn reject<T: 'static>(element: Grammar<T>, description: &'static str) -> Grammar<()> {
    Grammar::new(move |ctx, vars| {
        let mark = ctx.mark();
        let saved = ctx.take_cut();
        let result = element.parse(ctx, vars);
        ctx.cut = saved;
        ctx.reset(mark);
        match result {
            Ok(_) => Err(ctx.fail(description)),
            Err(_) => Ok(()),
        }
    })
}

/// 何も消費せず、現在位置を返す
pub fn nop() -> Grammar<SourceLocation> {
    Grammar::new(|ctx, _| Ok(ctx.location_here()))
}

/// 次のトークンの情報と現在の変数表から、新しい変数表を計算して解析する
pub fn dependent_part<T: 'static>(
    element: Grammar<T>,
    f: impl Fn(&TokenInfo, &VariableMap) -> VariableMap + 'static,
) -> Grammar<T> {
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let info = TokenInfo {
            offset: start,
            column: ctx.column_of(start),
        };
        let inner = f(&info, vars);
        element.parse(ctx, &inner)
    })
}

/// `dependent_part` に渡される次のトークンの情報
#[derive(Debug, Clone, Copy)]
pub struct TokenInfo {
    pub offset: usize,
    pub column: i64,
}

/// 再帰的な文法のための前方参照
pub struct ReferenceGrammar<T> {
    id: usize,
    cell: Rc<RefCell<Option<Grammar<T>>>>,
}

impl<T> Clone for ReferenceGrammar<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

static NEXT_RULE_ID: AtomicUsize = AtomicUsize::new(1);

impl<T: Clone + 'static> ReferenceGrammar<T> {
    pub fn new() -> Self {
        Self {
            id: NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed),
            cell: Rc::new(RefCell::new(None)),
        }
    }

    /// 参照先を設定する
    pub fn set(&self, grammar: Grammar<T>) {
        *self.cell.borrow_mut() = Some(grammar);
    }

    /// 参照を通して解析するメモ化された文法
    pub fn grammar(&self) -> Grammar<T> {
        let cell = Rc::clone(&self.cell);
        let id = self.id;
        Grammar::new(move |ctx, vars| {
            let key = (ctx.offset(), id, vars.clone());
            if let Some(result) = ctx.memo_lookup::<T>(&key) {
                return result;
            }
            let inner = cell.borrow().clone();
            let Some(inner) = inner else {
                return Err(ctx.fail("<未設定の文法参照>"));
            };
            let saved = ctx.take_cut();
            let result = inner.parse(ctx, vars);
            let cut_here = ctx.cut;
            ctx.cut = saved || cut_here;
            ctx.memo_store(key, &result, cut_here);
            result
        })
    }
}

impl<T: Clone + 'static> Default for ReferenceGrammar<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 参照の循環を断ち切るための操作
pub trait ClearReference {
    fn clear(&self);
}

impl<T> ClearReference for ReferenceGrammar<T> {
    fn clear(&self) {
        self.cell.borrow_mut().take();
    }
}

/// 文法一式が破棄されるときに参照をすべて解放する
#[derive(Default)]
pub struct GrammarScope {
    references: Vec<Box<dyn ClearReference>>,
}

impl GrammarScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: 'static>(&mut self, reference: &ReferenceGrammar<T>) {
        self.references.push(Box::new(ReferenceGrammar {
            id: reference.id,
            cell: Rc::clone(&reference.cell),
        }));
    }
}

impl Drop for GrammarScope {
    fn drop(&mut self) {
        for reference in &self.references {
            reference.clear();
        }
    }
}

/// 文字列に完全一致する（空白は読み飛ばさない）
pub fn match_string(literal: &'static str) -> Grammar<SourceLocation> {
    Grammar::new(move |ctx, _| {
        if ctx.remaining().starts_with(literal) {
            let start = ctx.offset();
            ctx.advance(literal.len());
            Ok(ctx.location_between(start, ctx.offset()))
        } else {
            Err(ctx.fail(format!("`{}`", literal)))
        }
    })
}

/// 正規表現に一致する（`^` で始まるパターンを渡すこと）
pub fn match_pattern(pattern: Regex, description: &'static str) -> Grammar<(SourceLocation, String)> {
    Grammar::new(move |ctx, _| {
        let found = pattern.find(ctx.remaining()).filter(|m| m.start() == 0).map(|m| m.end());
        match found {
            Some(len) => {
                let start = ctx.offset();
                let text = ctx.remaining()[..len].to_string();
                ctx.advance(len);
                Ok((ctx.location_between(start, ctx.offset()), text))
            }
            None => Err(ctx.fail(description)),
        }
    })
}

/// 空白とコメントを読み飛ばす文法
pub fn skip_whitespace_and_comments() -> Grammar<()> {
    Grammar::new(|ctx, _| ctx.skip_whitespace())
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// 1つの字句を読む。空白を読み飛ばし、最小列を検査し、`matcher` が返した長さだけ消費する
pub fn lexeme(
    ctx: &mut LexicalContext,
    vars: &VariableMap,
    expected: &str,
    matcher: impl Fn(&str) -> Option<usize>,
) -> ParseResult<(SourceLocation, String)> {
    let mark = ctx.mark();
    ctx.skip_whitespace()?;
    let start = ctx.offset();
    let min_column = vars.min_column();
    if min_column >= 0 && ctx.column_of(start) <= min_column {
        let failure = ctx.fail(expected);
        ctx.reset(mark);
        return Err(failure);
    }
    match matcher(ctx.remaining()) {
        Some(len) if len > 0 => {
            let text = ctx.remaining()[..len].to_string();
            ctx.advance(len);
            Ok((ctx.location_between(start, ctx.offset()), text))
        }
        _ => {
            let failure = ctx.fail(expected);
            ctx.reset(mark);
            Err(failure)
        }
    }
}

/// 字句としての固定文字列。英数字で終わるものは単語境界を要求する
pub fn token(literal: &'static str) -> Grammar<SourceLocation> {
    token_not_followed_by(literal, &[])
}

/// 後続が `forbidden` のいずれかで始まる場合は一致としない固定文字列
pub fn token_not_followed_by(literal: &'static str, forbidden: &'static [&'static str]) -> Grammar<SourceLocation> {
    Grammar::new(move |ctx, vars| {
        let expected = format!("`{}`", literal);
        lexeme(ctx, vars, &expected, |rest| token_length(rest, literal, forbidden)).map(|(location, _)| location)
    })
}

/// `rest` が `literal` で始まり、境界条件を満たすなら、その長さ
pub fn token_length(rest: &str, literal: &str, forbidden: &[&str]) -> Option<usize> {
    if !rest.starts_with(literal) {
        return None;
    }
    let after = &rest[literal.len()..];
    let ends_with_word = literal.chars().last().map_or(false, is_identifier_char);
    if ends_with_word && after.chars().next().map_or(false, is_identifier_char) {
        return None;
    }
    if forbidden.iter().any(|f| after.starts_with(f)) {
        return None;
    }
    Some(literal.len())
}

/// 識別子を読む。`reserved` に含まれる語は受理しない
pub fn match_identifier(reserved: &'static [&'static str]) -> Grammar<(SourceLocation, String)> {
    Grammar::new(move |ctx, vars| {
        let mark = ctx.mark();
        let (location, text) = lexeme(ctx, vars, "識別子", identifier_length)?;
        if reserved.contains(&text.as_str()) {
            ctx.reset(mark);
            return Err(ctx.fail("識別子"));
        }
        Ok((location, text))
    })
}

/// TLA+ の識別子 `[A-Za-z0-9_]*[A-Za-z][A-Za-z0-9_]*` の長さ
pub fn identifier_length(rest: &str) -> Option<usize> {
    let len = rest.chars().take_while(|c| is_identifier_char(*c)).count();
    let word = &rest[..len];
    if len > 0 && word.chars().any(|c| c.is_ascii_alphabetic()) {
        Some(len)
    } else {
        None
    }
}

/// 全体を解析し、失敗時には最も遠い失敗を返す
pub fn read_or_except<T: 'static>(ctx: &mut LexicalContext, grammar: &Grammar<T>) -> ParseResult<T> {
    match grammar.parse(ctx, &VariableMap::new()) {
        Ok(value) => Ok(value),
        Err(failure) => Err(match ctx.furthest_failure() {
            Some(furthest) => furthest.clone().merge(failure),
            None => failure,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(source: &str) -> LexicalContext {
        LexicalContext::new("test", source)
    }

    #[test]
    fn test_one_of_backtracks() {
        let g = one_of(vec![
            token("ab").then(token("cd")).map(|_| 1),
            token("ab").then(token("ef")).map(|_| 2),
        ]);
        let mut c = ctx("ab ef");
        assert_eq!(g.parse(&mut c, &VariableMap::new()), Ok(2));
    }

    #[test]
    fn test_cut_commits_alternative() {
        let g = one_of(vec![
            cut(token("ab")).then(token("cd")).map(|_| 1),
            token("ab").then(token("ef")).map(|_| 2),
        ]);
        let mut c = ctx("ab ef");
        assert!(g.parse(&mut c, &VariableMap::new()).is_err());
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn test_cut_is_local_to_choice() {
        // 内側の選択でのコミットは外側の選択に影響しない
        let inner = one_of(vec![cut(token("a")).map(|_| ()), token("b").map(|_| ())]);
        let outer = one_of(vec![
            inner.then(token("x")).map(|_| 1),
            token("a").then(token("y")).map(|_| 2),
        ]);
        let mut c = ctx("a y");
        assert_eq!(outer.parse(&mut c, &VariableMap::new()), Ok(2));
    }

    #[test]
    fn test_furthest_failure_merges_expected() {
        let g = one_of(vec![
            token("a").then(token("b")).map(|_| ()),
            token("a").then(token("c")).map(|_| ()),
        ]);
        let mut c = ctx("a d");
        let failure = read_or_except(&mut c, &g).unwrap_err();
        assert_eq!(failure.offset, 2);
        assert!(failure.expected.contains("`b`"));
        assert!(failure.expected.contains("`c`"));
    }

    #[test]
    fn test_list_of_restores_separator() {
        let g = list_of(token("a"), token(",")).skip(token(",")).skip(token("b"));
        let mut c = ctx("a, a, b");
        assert_eq!(g.parse(&mut c, &VariableMap::new()).map(|v| v.len()), Ok(2));
    }

    #[test]
    fn test_keyword_boundary() {
        let g = token("if");
        assert!(g.parse(&mut ctx("iffy"), &VariableMap::new()).is_err());
        assert!(g.parse(&mut ctx("  if (x)"), &VariableMap::new()).is_ok());
    }

    #[test]
    fn test_nested_comments_skipped() {
        let g = token("x");
        let mut c = ctx("(* a (* nested *) comment *) \\* line\n x");
        assert!(g.parse(&mut c, &VariableMap::new()).is_ok());
        let mut unterminated = ctx("(* open");
        let failure = g.parse(&mut unterminated, &VariableMap::new()).unwrap_err();
        assert!(failure.expected.iter().any(|e| e.contains("*)")));
    }

    #[test]
    fn test_min_column() {
        let vars = VariableMap::new().put(MIN_COLUMN, 3);
        let g = token("x");
        assert!(g.parse(&mut ctx("\n  x"), &vars).is_err());
        assert!(g.parse(&mut ctx("\n    x"), &vars).is_ok());
    }

    #[test]
    fn test_identifier_rejects_reserved() {
        let g = match_identifier(&["IF"]);
        assert!(g.parse(&mut ctx("IF"), &VariableMap::new()).is_err());
        let (_, id) = g.parse(&mut ctx("x1_"), &VariableMap::new()).unwrap();
        assert_eq!(id, "x1_");
        assert!(g.parse(&mut ctx("123"), &VariableMap::new()).is_err());
    }

    #[test]
    fn test_reference_memoises_and_recurses() {
        // S := "(" S ")" | "x"
        let s: ReferenceGrammar<usize> = ReferenceGrammar::new();
        let mut scope = GrammarScope::new();
        scope.register(&s);
        let inner = s.grammar();
        s.set(one_of(vec![
            inner.preceded_by(token("(")).skip(token(")")).map(|depth| depth + 1),
            token("x").map(|_| 0),
        ]));
        let mut c = ctx("((x))");
        assert_eq!(s.grammar().parse(&mut c, &VariableMap::new()), Ok(2));
    }

    #[test]
    fn test_locations() {
        let g = token("b").map_located(|loc, _| loc);
        let mut c = ctx("a\n  b");
        c.advance(1);
        let loc = g.parse(&mut c, &VariableMap::new()).unwrap();
        assert_eq!((loc.start_line, loc.start_column), (2, 3));
    }
}
