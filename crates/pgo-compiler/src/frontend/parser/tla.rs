//! # TLA+ 構文解析器
//!
//! 式は演算子優先順位法で解析します。`/\` と `\/` の箇条書きは
//! 先頭記号の列に揃った項目を左結合の二項演算へ畳み込みます。
//! 項目の中のトークンは `MIN_COLUMN` によって箇条書き記号より右に
//! なければならず、括弧類の内側ではこの制約が解除されます。

use std::rc::Rc;

use super::combinator::*;
use crate::frontend::ast::*;
use crate::frontend::error::SourceLocation;

/// TLA+ の予約語
pub const TLA_RESERVED_WORDS: &[&str] = &[
    "ASSUME", "ASSUMPTION", "AXIOM", "CASE", "CHOOSE", "CONSTANT", "CONSTANTS", "DOMAIN", "ELSE",
    "ENABLED", "EXCEPT", "EXTENDS", "IF", "IN", "INSTANCE", "LET", "LOCAL", "MODULE", "OTHER",
    "SF_", "SUBSET", "THEN", "THEOREM", "UNCHANGED", "UNION", "VARIABLE", "VARIABLES", "WF_",
    "WITH", "LAMBDA", "RECURSIVE", "TRUE", "FALSE",
];

/// 演算子の仕様
#[derive(Debug, Clone, Copy)]
pub struct OperatorSpec {
    pub symbol: &'static str,
    /// 優先順位の下限
    pub low: u32,
    /// 優先順位の上限
    pub high: u32,
    /// 直後に続いてはならない文字列
    pub rejects: &'static [&'static str],
}

const fn op(symbol: &'static str, low: u32, high: u32) -> OperatorSpec {
    OperatorSpec {
        symbol,
        low,
        high,
        rejects: &[],
    }
}

const fn op_rejecting(symbol: &'static str, low: u32, high: u32, rejects: &'static [&'static str]) -> OperatorSpec {
    OperatorSpec {
        symbol,
        low,
        high,
        rejects,
    }
}

const PREFIX_OPERATORS: &[OperatorSpec] = &[
    op("\\lnot", 4, 4),
    op("\\neg", 4, 4),
    op_rejecting("~", 4, 4, &[">"]),
    op("[]", 4, 15),
    op("<>", 4, 15),
    op("DOMAIN", 9, 9),
    op("ENABLED", 4, 15),
    op("SUBSET", 8, 8),
    op("UNCHANGED", 4, 15),
    op("UNION", 8, 8),
    op_rejecting("-", 12, 12, &[">", "-"]),
];

const INFIX_OPERATORS: &[OperatorSpec] = &[
    op("!!", 9, 13),
    op_rejecting("#", 5, 5, &["#"]),
    op("##", 9, 13),
    op("$", 9, 13),
    op("$$", 9, 13),
    op("%", 10, 11),
    op("%%", 10, 11),
    op("&", 13, 13),
    op("&&", 13, 13),
    op("(+)", 10, 10),
    op("(-)", 11, 11),
    op("(.)", 13, 13),
    op("(/)", 13, 13),
    op("(\\X)", 10, 10),
    op_rejecting("*", 13, 13, &[")"]),
    op("**", 13, 13),
    op("+", 10, 10),
    op("++", 10, 10),
    op_rejecting("-", 11, 11, &[">"]),
    op("-+->", 2, 2),
    op("--", 11, 11),
    op("-|", 5, 5),
    op("..", 9, 9),
    op("...", 9, 9),
    op("/", 13, 13),
    op("//", 13, 13),
    op("/=", 5, 5),
    op("/\\", 3, 3),
    op("::=", 5, 5),
    op(":=", 5, 5),
    op(":>", 7, 7),
    op_rejecting("<", 5, 5, &["<", "-"]),
    op("<:", 7, 7),
    op("<=>", 2, 2),
    op_rejecting("=", 5, 5, &["="]),
    op("=<", 5, 5),
    op("=>", 1, 1),
    op("=|", 5, 5),
    op_rejecting(">", 5, 5, &[">"]),
    op(">=", 5, 5),
    op("??", 9, 13),
    op("@@", 6, 6),
    op("\\", 8, 8),
    op("\\/", 3, 3),
    op("^", 14, 14),
    op("^^", 14, 14),
    op_rejecting("|", 10, 11, &["-"]),
    op_rejecting("|-", 5, 5, &[">"]),
    op("|=", 5, 5),
    op("||", 10, 11),
    op("~>", 2, 2),
    op("\\approx", 5, 5),
    op("\\asymp", 5, 5),
    op("\\bigcirc", 13, 13),
    op("\\bullet", 13, 13),
    op("\\cap", 8, 8),
    op("\\cdot", 5, 14),
    op("\\circ", 13, 13),
    op("\\cong", 5, 5),
    op("\\cup", 8, 8),
    op("\\div", 13, 13),
    op("\\doteq", 5, 5),
    op("\\equiv", 2, 2),
    op("\\geq", 5, 5),
    op("\\gg", 5, 5),
    op("\\in", 5, 5),
    op("\\notin", 5, 5),
    op("\\intersect", 8, 8),
    op("\\union", 8, 8),
    op("\\land", 3, 3),
    op("\\lor", 3, 3),
    op("\\leq", 5, 5),
    op("\\ll", 5, 5),
    op("\\o", 13, 13),
    op("\\odot", 13, 13),
    op("\\ominus", 11, 11),
    op("\\oplus", 10, 10),
    op("\\oslash", 13, 13),
    op("\\otimes", 13, 13),
    op("\\prec", 5, 5),
    op("\\preceq", 5, 5),
    op("\\propto", 5, 5),
    op("\\sim", 5, 5),
    op("\\simeq", 5, 5),
    op("\\sqcap", 9, 13),
    op("\\sqcup", 9, 13),
    op("\\sqsubset", 5, 5),
    op("\\sqsupset", 5, 5),
    op("\\sqsubseteq", 5, 5),
    op("\\sqsupseteq", 5, 5),
    op("\\star", 13, 13),
    op("\\subset", 5, 5),
    op("\\subseteq", 5, 5),
    op("\\succ", 5, 5),
    op("\\succeq", 5, 5),
    op("\\supset", 5, 5),
    op("\\supseteq", 5, 5),
    op("\\uplus", 9, 13),
    op("\\wr", 9, 14),
    op("\\times", 10, 13),
    op("\\X", 10, 13),
];

const POSTFIX_OPERATOR_SPECS: &[OperatorSpec] = &[op("'", 15, 15), op("^+", 15, 15), op("^*", 15, 15), op("^#", 15, 15)];

/// 演算子表（長い記号から順に照合する）
#[derive(Debug, Clone)]
pub struct OperatorTables {
    prefix: Vec<OperatorSpec>,
    infix: Vec<OperatorSpec>,
    postfix: Vec<OperatorSpec>,
}

impl OperatorTables {
    /// TLA+ 標準の演算子表
    pub fn standard() -> Self {
        let sorted = |ops: &[OperatorSpec]| {
            let mut ops = ops.to_vec();
            ops.sort_by(|a, b| b.symbol.len().cmp(&a.symbol.len()));
            ops
        };
        Self {
            prefix: sorted(PREFIX_OPERATORS),
            infix: sorted(INFIX_OPERATORS),
            postfix: sorted(POSTFIX_OPERATOR_SPECS),
        }
    }

    /// 指定した中置演算子を除いた表
    pub fn without_infix(mut self, symbols: &[&str]) -> Self {
        self.infix.retain(|op| !symbols.contains(&op.symbol));
        self
    }
}

fn match_operator(ctx: &mut LexicalContext, vars: &VariableMap, operators: &[OperatorSpec]) -> Option<OperatorSpec> {
    let start = ctx.whitespace_end(ctx.offset()).ok()?;
    let min_column = vars.min_column();
    if min_column >= 0 && ctx.column_of(start) <= min_column {
        return None;
    }
    let rest = &ctx.source()[start..];
    if rest.starts_with("----") || rest.starts_with("====") {
        return None;
    }
    let matched = *operators
        .iter()
        .find(|op| token_length(rest, op.symbol, op.rejects).is_some())?;
    ctx.set_offset(start + matched.symbol.len());
    Some(matched)
}

fn parse_operator_expression(
    ctx: &mut LexicalContext,
    vars: &VariableMap,
    tables: &OperatorTables,
    primary: &Grammar<TlaExpression>,
    min_precedence: u32,
) -> ParseResult<TlaExpression> {
    let start = ctx.peek_token_start();
    let entry = ctx.mark();
    let mut lhs = match match_operator(ctx, vars, &tables.prefix) {
        Some(prefix) => match parse_operator_expression(ctx, vars, tables, primary, prefix.high + 1) {
            Ok(operand) => TlaExpression::new(
                ctx.location_between(start, ctx.offset()),
                TlaExpressionKind::Unary {
                    operator: prefix.symbol.to_string(),
                    operand: Box::new(operand),
                },
            ),
            Err(e) => {
                ctx.reset(entry);
                return Err(e);
            }
        },
        None => primary.parse(ctx, vars)?,
    };
    loop {
        let mark = ctx.mark();
        if let Some(postfix) = match_operator(ctx, vars, &tables.postfix) {
            if postfix.low >= min_precedence {
                lhs = TlaExpression::new(
                    ctx.location_between(start, ctx.offset()),
                    TlaExpressionKind::Unary {
                        operator: postfix.symbol.to_string(),
                        operand: Box::new(lhs),
                    },
                );
                continue;
            }
            ctx.reset(mark);
            break;
        }
        let Some(infix) = match_operator(ctx, vars, &tables.infix) else {
            break;
        };
        if infix.low < min_precedence {
            ctx.reset(mark);
            break;
        }
        match parse_operator_expression(ctx, vars, tables, primary, infix.high + 1) {
            Ok(rhs) => {
                lhs = TlaExpression::new(
                    ctx.location_between(start, ctx.offset()),
                    TlaExpressionKind::Binary {
                        operator: infix.symbol.to_string(),
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                );
            }
            Err(_) => {
                ctx.reset(mark);
                break;
            }
        }
    }
    Ok(lhs)
}

/// 閉じ引用符までの長さ（改行をまたぐ文字列は認めない）
fn string_literal_length(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices();
    if chars.next()?.1 != '"' {
        return None;
    }
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some(i + 1),
            '\\' => {
                chars.next()?;
            }
            '\n' => return None,
            _ => {}
        }
    }
    None
}

/// 同じ文字が `minimum` 個以上続く長さ
fn run_length(rest: &str, c: char, minimum: usize) -> Option<usize> {
    let len = rest.chars().take_while(|&x| x == c).count();
    (len >= minimum).then_some(len)
}

/// 括弧類の内側で列の制約を解除する
fn unconstrained<T: 'static>(grammar: Grammar<T>) -> Grammar<T> {
    dependent_part(grammar, |_, _| VariableMap::new())
}

/// `:` 単体（`:=` `::=` `:>` を除く）
fn colon() -> Grammar<SourceLocation> {
    token_not_followed_by(":", &["=", ":", ">"])
}

fn identifier() -> Grammar<TlaIdentifier> {
    match_identifier(TLA_RESERVED_WORDS).map(|(location, id)| TlaIdentifier::new(location, id))
}

fn number() -> Grammar<TlaExpression> {
    Grammar::new(|ctx, vars| {
        let (location, text) = lexeme(ctx, vars, "数値", |rest| {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                return None;
            }
            let mut len = digits;
            let after = &rest[len..];
            if after.starts_with('.') {
                let fraction = after[1..].chars().take_while(|c| c.is_ascii_digit()).count();
                if fraction > 0 {
                    len += 1 + fraction;
                }
            }
            let next = rest[len..].chars().next();
            if next.map_or(false, |c| c.is_ascii_alphabetic() || c == '_') {
                return None;
            }
            Some(len)
        })?;
        Ok(TlaExpression::new(location, TlaExpressionKind::Number(text)))
    })
}

fn unescape(body: &str) -> String {
    let mut result = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('f') => result.push('\x0c'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

fn string() -> Grammar<TlaExpression> {
    Grammar::new(move |ctx, vars| {
        let mark = ctx.mark();
        match lexeme(ctx, vars, "文字列", string_literal_length) {
            Ok((location, text)) => Ok(TlaExpression::new(
                location,
                TlaExpressionKind::String(unescape(&text[1..text.len() - 1])),
            )),
            Err(e) => {
                // 開き引用符があるなら閉じ引用符の欠落として報告する
                let start = ctx.peek_token_start();
                if ctx.source()[start..].starts_with('"') {
                    ctx.set_offset(start);
                    let failure = ctx.fail("文字列の終端 `\"`");
                    ctx.reset(mark);
                    return Err(failure);
                }
                Err(e)
            }
        }
    })
}

fn boolean() -> Grammar<TlaExpression> {
    one_of(vec![
        token("TRUE").map(|location| TlaExpression::new(location, TlaExpressionKind::Bool(true))),
        token("FALSE").map(|location| TlaExpression::new(location, TlaExpressionKind::Bool(false))),
    ])
}

fn bullet_list(expression: Grammar<TlaExpression>, bullet: &'static str) -> Grammar<TlaExpression> {
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let column = ctx.column_of(start);
        token(bullet).parse(ctx, vars)?;
        let item_vars = vars.clone().put(MIN_COLUMN, column);
        let mut result = expression.parse(ctx, &item_vars)?;
        loop {
            let mark = ctx.mark();
            let next = ctx.peek_token_start();
            if ctx.column_of(next) != column || !ctx.source()[next..].starts_with(bullet) {
                break;
            }
            ctx.set_offset(next + bullet.len());
            match expression.parse(ctx, &item_vars) {
                Ok(item) => {
                    result = TlaExpression::new(
                        ctx.location_between(start, ctx.offset()),
                        TlaExpressionKind::Binary {
                            operator: bullet.to_string(),
                            lhs: Box::new(result),
                            rhs: Box::new(item),
                        },
                    );
                }
                Err(_) => {
                    ctx.reset(mark);
                    break;
                }
            }
        }
        Ok(result)
    })
}

fn parenthesized(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    unconstrained(expression).preceded_by(token("(")).skip(unconstrained(token(")")))
}

fn quantifier_bound(expression: Grammar<TlaExpression>) -> Grammar<QuantifierBound> {
    let tuple = list_of(identifier(), token(","))
        .preceded_by(token("<<"))
        .skip(token(">>"))
        .map(BoundPattern::Tuple);
    let ids = list_of(identifier(), token(",")).map(BoundPattern::Ids);
    one_of(vec![tuple, ids])
        .skip(token("\\in"))
        .then(expression)
        .map_located(|location, (pattern, set)| QuantifierBound {
            meta: crate::frontend::uid::Meta::new(location),
            pattern,
            set,
        })
}

fn quantifier_bounds(expression: Grammar<TlaExpression>) -> Grammar<Vec<QuantifierBound>> {
    list_of(quantifier_bound(expression), token(","))
}

fn if_expression(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        token("IF").parse(ctx, vars)?;
        let condition = expression.parse(ctx, vars)?;
        token("THEN").parse(ctx, vars)?;
        let then = expression.parse(ctx, vars)?;
        token("ELSE").parse(ctx, vars)?;
        let otherwise = expression.parse(ctx, vars)?;
        Ok(TlaExpression::new(
            ctx.location_between(start, ctx.offset()),
            TlaExpressionKind::If {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        ))
    })
}

fn let_expression(expression: Grammar<TlaExpression>, unit: Grammar<TlaUnit>) -> Grammar<TlaExpression> {
    let definitions = repeat_one_or_more(unconstrained(unit));
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        token("LET").parse(ctx, vars)?;
        let definitions = definitions.parse(ctx, vars)?;
        token("IN").parse(ctx, vars)?;
        let body = expression.parse(ctx, vars)?;
        Ok(TlaExpression::new(
            ctx.location_between(start, ctx.offset()),
            TlaExpressionKind::Let {
                definitions,
                body: Box::new(body),
            },
        ))
    })
}

fn quantified(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let kind = one_of(vec![
        token("\\A").map(|_| QuantifierKind::Universal),
        token("\\forall").map(|_| QuantifierKind::Universal),
        token("\\E").map(|_| QuantifierKind::Existential),
        token("\\exists").map(|_| QuantifierKind::Existential),
    ]);
    let bounds = quantifier_bounds(expression.clone());
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let kind = kind.parse(ctx, vars)?;
        let bounds = bounds.parse(ctx, vars)?;
        colon().parse(ctx, vars)?;
        let body = expression.parse(ctx, vars)?;
        Ok(TlaExpression::new(
            ctx.location_between(start, ctx.offset()),
            TlaExpressionKind::Quantified {
                kind,
                bounds,
                body: Box::new(body),
            },
        ))
    })
}

/// `CHOOSE x \in S : P`
fn choose(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let binding = one_of(vec![
        list_of(identifier(), token(","))
            .preceded_by(token("<<"))
            .skip(token(">>"))
            .map(BoundPattern::Tuple),
        identifier().map(|id| BoundPattern::Ids(vec![id])),
    ]);
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        token("CHOOSE").parse(ctx, vars)?;
        let binding = binding.parse(ctx, vars)?;
        token("\\in").parse(ctx, vars)?;
        let from = expression.parse(ctx, vars)?;
        colon().parse(ctx, vars)?;
        let predicate = expression.parse(ctx, vars)?;
        Ok(TlaExpression::new(
            ctx.location_between(start, ctx.offset()),
            TlaExpressionKind::Choose {
                binding,
                from: Box::new(from),
                predicate: Box::new(predicate),
            },
        ))
    })
}

fn braces(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let inner = unconstrained(expression.clone());
    let close = || unconstrained(token("}"));
    let binding = unconstrained(one_of(vec![
        list_of(identifier(), token(","))
            .preceded_by(token("<<"))
            .skip(token(">>"))
            .map(BoundPattern::Tuple),
        identifier().map(|id| BoundPattern::Ids(vec![id])),
    ]));

    let empty = close().map(|_| TlaExpressionKind::Set(Vec::new()));
    let refinement = {
        let inner = inner.clone();
        let binding = binding.clone();
        let close = close();
        Grammar::new(move |ctx, _| {
            let free = VariableMap::new();
            let binding = binding.parse(ctx, &free)?;
            token("\\in").parse(ctx, &free)?;
            let from = inner.parse(ctx, &free)?;
            colon().parse(ctx, &free)?;
            let predicate = inner.parse(ctx, &free)?;
            close.parse(ctx, &free)?;
            Ok(TlaExpressionKind::SetRefinement {
                binding,
                from: Box::new(from),
                predicate: Box::new(predicate),
            })
        })
    };
    let comprehension = {
        let inner = inner.clone();
        let bounds = unconstrained(quantifier_bounds(expression.clone()));
        let close = close();
        Grammar::new(move |ctx, _| {
            let free = VariableMap::new();
            let body = inner.parse(ctx, &free)?;
            colon().parse(ctx, &free)?;
            let bounds = bounds.parse(ctx, &free)?;
            close.parse(ctx, &free)?;
            Ok(TlaExpressionKind::SetComprehension {
                body: Box::new(body),
                bounds,
            })
        })
    };
    let literal = list_of(inner, unconstrained(token(",")))
        .skip(close())
        .map(TlaExpressionKind::Set);
    let body = one_of(vec![empty, refinement, comprehension, literal]);
    body.preceded_by(token("{"))
        .map_located(TlaExpression::new)
}

fn brackets(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let inner = unconstrained(expression.clone());
    let close = || unconstrained(token("]"));
    let comma = || unconstrained(token(","));

    let record_field = |separator: Grammar<SourceLocation>| {
        unconstrained(identifier())
            .skip(unconstrained(separator))
            .then(unconstrained(expression.clone()))
            .map(|(name, value)| RecordField { name, value })
    };
    let record = list_of(record_field(token("|->")), comma())
        .skip(close())
        .map(TlaExpressionKind::Record);
    let record_set = list_of(record_field(colon()), comma())
        .skip(close())
        .map(TlaExpressionKind::RecordSet);
    let function = unconstrained(quantifier_bounds(expression.clone()))
        .skip(unconstrained(token("|->")))
        .then(inner.clone())
        .skip(close())
        .map(|(bounds, body)| TlaExpressionKind::Function {
            bounds,
            body: Box::new(body),
        });

    let key = one_of(vec![
        list_of(inner.clone(), comma())
            .preceded_by(unconstrained(token("[")))
            .skip(close())
            .map(SubstitutionKey::Index),
        unconstrained(identifier())
            .preceded_by(unconstrained(token(".")))
            .map(SubstitutionKey::Field),
    ]);
    let substitution = repeat_one_or_more(key)
        .preceded_by(unconstrained(token_not_followed_by("!", &["!"])))
        .skip(unconstrained(token_not_followed_by("=", &["=", "<", ">", "|"])))
        .then(inner.clone())
        .map_located(|location, (keys, value)| FunctionSubstitutionPair {
            meta: crate::frontend::uid::Meta::new(location),
            keys,
            value,
        });
    let except = inner
        .clone()
        .skip(unconstrained(token("EXCEPT")))
        .then(list_of(substitution, comma()))
        .skip(close())
        .map(|(source, substitutions)| TlaExpressionKind::FunctionSubstitution {
            source: Box::new(source),
            substitutions,
        });
    let function_set = inner
        .clone()
        .skip(unconstrained(token("->")))
        .then(inner)
        .skip(close())
        .map(|(from, to)| TlaExpressionKind::FunctionSet {
            from: Box::new(from),
            to: Box::new(to),
        });

    one_of(vec![record, record_set, function, except, function_set])
        .preceded_by(token_not_followed_by("[", &["]"]))
        .map_located(TlaExpression::new)
}

fn tuple(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let elements = optional(list_of(unconstrained(expression), unconstrained(token(","))));
    elements
        .preceded_by(token("<<"))
        .skip(unconstrained(token(">>")))
        .map_located(|location, elements| {
            TlaExpression::new(location, TlaExpressionKind::Tuple(elements.unwrap_or_default()))
        })
}

fn fairness(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let prefix = Grammar::new(|ctx, vars| {
        let (_, text) = lexeme(ctx, vars, "`WF_` または `SF_`", |rest| {
            if rest.starts_with("WF_") || rest.starts_with("SF_") {
                Some(3)
            } else {
                None
            }
        })?;
        Ok(if text == "WF_" {
            FairnessKind::Weak
        } else {
            FairnessKind::Strong
        })
    });
    let subscript = one_of(vec![
        tuple(expression.clone()),
        match_identifier(TLA_RESERVED_WORDS).map(|(location, id)| {
            TlaExpression::new(
                location.clone(),
                TlaExpressionKind::Identifier {
                    prefix: Vec::new(),
                    name: TlaIdentifier::new(location, id),
                },
            )
        }),
    ]);
    let body = unconstrained(expression)
        .preceded_by(token("("))
        .skip(unconstrained(token(")")));
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let kind = prefix.parse(ctx, vars)?;
        // 添字は `WF_` の直後に空白なしで続く
        let vars_expression = subscript.parse(ctx, &VariableMap::new())?;
        let expression = body.parse(ctx, vars)?;
        Ok(TlaExpression::new(
            ctx.location_between(start, ctx.offset()),
            TlaExpressionKind::Fairness {
                kind,
                vars: Box::new(vars_expression),
                expression: Box::new(expression),
            },
        ))
    })
}

fn at() -> Grammar<TlaExpression> {
    token_not_followed_by("@", &["@"]).map(|location| TlaExpression::new(location, TlaExpressionKind::SubstitutionAt))
}

fn identifier_or_call(expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let id = identifier();
    let bang = token_not_followed_by("!", &["!"]);
    let args = list_of(unconstrained(expression), unconstrained(token(",")))
        .preceded_by(token("("))
        .skip(unconstrained(token(")")));
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let mut prefix = Vec::new();
        loop {
            let mark = ctx.mark();
            match id.parse(ctx, vars) {
                Ok(part) if bang.parse(ctx, vars).is_ok() => prefix.push(part),
                _ => {
                    ctx.reset(mark);
                    break;
                }
            }
        }
        let name = id.parse(ctx, vars)?;
        let args = optional(args.clone()).parse(ctx, vars)?;
        let location = ctx.location_between(start, ctx.offset());
        Ok(match args {
            Some(args) => TlaExpression::new(location, TlaExpressionKind::OperatorCall { prefix, name, args }),
            None => TlaExpression::new(location, TlaExpressionKind::Identifier { prefix, name }),
        })
    })
}

fn field_access() -> Grammar<TlaIdentifier> {
    Grammar::new(|ctx, vars| {
        let (location, text) = lexeme(ctx, vars, "フィールド名", |rest| {
            if !rest.starts_with('.') || rest[1..].starts_with('.') {
                return None;
            }
            identifier_length(&rest[1..]).map(|len| len + 1)
        })?;
        Ok(TlaIdentifier::new(location, &text[1..]))
    })
}

fn with_suffixes(atom: Grammar<TlaExpression>, expression: Grammar<TlaExpression>) -> Grammar<TlaExpression> {
    let open = token_not_followed_by("[", &["]"]);
    let args = list_of(unconstrained(expression), unconstrained(token(",")));
    let close = unconstrained(token("]"));
    let field = field_access();
    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let mut result = atom.parse(ctx, vars)?;
        loop {
            let mark = ctx.mark();
            if open.parse(ctx, vars).is_ok() {
                match args.parse(ctx, vars).and_then(|args| close.parse(ctx, vars).map(|_| args)) {
                    Ok(args) => {
                        result = TlaExpression::new(
                            ctx.location_between(start, ctx.offset()),
                            TlaExpressionKind::FunctionCall {
                                function: Box::new(result),
                                args,
                            },
                        );
                        continue;
                    }
                    Err(_) => {
                        ctx.reset(mark);
                        break;
                    }
                }
            }
            if let Ok(field) = field.parse(ctx, vars) {
                result = TlaExpression::new(
                    ctx.location_between(start, ctx.offset()),
                    TlaExpressionKind::RecordAccess {
                        record: Box::new(result),
                        field,
                    },
                );
                continue;
            }
            break;
        }
        Ok(result)
    })
}

fn build_expression(
    tables: Rc<OperatorTables>,
    expression: Grammar<TlaExpression>,
    unit: Grammar<TlaUnit>,
) -> Grammar<TlaExpression> {
    let atom = one_of(vec![
        bullet_list(expression.clone(), "/\\"),
        bullet_list(expression.clone(), "\\/"),
        number(),
        string(),
        boolean(),
        parenthesized(expression.clone()),
        if_expression(expression.clone()),
        let_expression(expression.clone(), unit),
        quantified(expression.clone()),
        choose(expression.clone()),
        braces(expression.clone()),
        brackets(expression.clone()),
        tuple(expression.clone()),
        fairness(expression.clone()),
        at(),
        identifier_or_call(expression.clone()),
    ]);
    let primary = with_suffixes(atom, expression);
    Grammar::new(move |ctx, vars| parse_operator_expression(ctx, vars, &tables, &primary, 0))
}

fn op_decl() -> Grammar<OpDecl> {
    let holes = list_of(token("_"), token(","))
        .preceded_by(token("("))
        .skip(token(")"))
        .map(|holes| holes.len());
    identifier()
        .then(optional(holes))
        .map_located(|location, (name, arity)| OpDecl {
            meta: crate::frontend::uid::Meta::new(location),
            name,
            arity: arity.unwrap_or(0),
        })
}

fn definition_token() -> Grammar<SourceLocation> {
    token_not_followed_by("==", &["="])
}

fn build_instance(expression: Grammar<TlaExpression>) -> Grammar<Instance> {
    let remapping = identifier()
        .skip(token("<-"))
        .then(expression)
        .map(|(from, to)| InstanceRemapping { from, to });
    let remappings = list_of(remapping, token(",")).preceded_by(token("WITH"));
    identifier()
        .preceded_by(token("INSTANCE"))
        .then(optional(remappings))
        .map_located(|location, (module, remappings)| Instance {
            meta: crate::frontend::uid::Meta::new(location),
            module,
            remappings: remappings.unwrap_or_default(),
            local: false,
        })
}

fn build_unit(expression: Grammar<TlaExpression>) -> Grammar<TlaUnit> {
    use crate::frontend::uid::Meta;

    let free = unconstrained(expression.clone());
    let args = || list_of(op_decl(), token(",")).preceded_by(token("(")).skip(token(")"));
    let instance = build_instance(free.clone());

    let module_definition = identifier()
        .then(optional(args()))
        .skip(definition_token())
        .then(instance.clone())
        .map_located(|location, ((name, args), instance)| {
            TlaUnit::ModuleDefinition(ModuleDefinition {
                meta: Meta::new(location),
                name,
                args: args.unwrap_or_default(),
                instance,
                local: false,
            })
        });
    let function_definition = {
        let bounds = quantifier_bounds(free.clone())
            .preceded_by(token("["))
            .skip(token("]"));
        identifier()
            .then(bounds)
            .skip(definition_token())
            .then(free.clone())
            .map_located(|location, ((name, bounds), body)| {
                TlaUnit::Function(FunctionDefinition {
                    meta: Meta::new(location.clone()),
                    name,
                    function: TlaExpression::new(
                        location,
                        TlaExpressionKind::Function {
                            bounds,
                            body: Box::new(body),
                        },
                    ),
                    local: false,
                })
            })
    };
    let operator_definition = identifier()
        .then(optional(args()))
        .skip(definition_token())
        .then(free.clone())
        .map_located(|location, ((name, args), body)| {
            TlaUnit::Operator(OperatorDefinition {
                meta: Meta::new(location),
                name,
                args: args.unwrap_or_default(),
                body,
                local: false,
            })
        });
    let definition = one_of(vec![
        instance.map(TlaUnit::Instance),
        module_definition,
        function_definition,
        operator_definition,
    ]);
    let possibly_local = optional(token("LOCAL"))
        .then(definition)
        .map(|(local, unit)| match (local.is_some(), unit) {
            (true, TlaUnit::Operator(mut def)) => {
                def.local = true;
                TlaUnit::Operator(def)
            }
            (true, TlaUnit::Function(mut def)) => {
                def.local = true;
                TlaUnit::Function(def)
            }
            (true, TlaUnit::ModuleDefinition(mut def)) => {
                def.local = true;
                def.instance.local = true;
                TlaUnit::ModuleDefinition(def)
            }
            (true, TlaUnit::Instance(mut instance)) => {
                instance.local = true;
                TlaUnit::Instance(instance)
            }
            (_, unit) => unit,
        });

    let constants = list_of(op_decl(), token(","))
        .preceded_by(one_of(vec![token("CONSTANTS"), token("CONSTANT")]))
        .map_located(|location, declarations| TlaUnit::Constant {
            meta: Meta::new(location),
            declarations,
        });
    let variables = list_of(identifier(), token(","))
        .preceded_by(one_of(vec![token("VARIABLES"), token("VARIABLE")]))
        .map_located(|location, names| TlaUnit::Variable {
            meta: Meta::new(location),
            names,
        });
    let recursive = list_of(op_decl(), token(","))
        .preceded_by(token("RECURSIVE"))
        .map_located(|location, declarations| TlaUnit::Recursive {
            meta: Meta::new(location),
            declarations,
        });
    let theorem = free
        .clone()
        .preceded_by(token("THEOREM"))
        .map_located(|location, expression| TlaUnit::Theorem {
            meta: Meta::new(location),
            expression,
        });
    let assumption = free
        .preceded_by(one_of(vec![token("ASSUMPTION"), token("ASSUME"), token("AXIOM")]))
        .map_located(|location, expression| TlaUnit::Assumption {
            meta: Meta::new(location),
            expression,
        });

    one_of(vec![possibly_local, constants, variables, recursive, theorem, assumption])
}

fn separator() -> Grammar<()> {
    Grammar::new(|ctx, vars| {
        lexeme(ctx, vars, "`----`", |rest| run_length(rest, '-', 4))?;
        Ok(())
    })
}

fn module_end() -> Grammar<()> {
    Grammar::new(|ctx, vars| {
        lexeme(ctx, vars, "`====`", |rest| run_length(rest, '=', 4))?;
        Ok(())
    })
}

/// `----` の後に空白を挟んで `MODULE` が続く位置
fn find_module_header(text: &str) -> Option<usize> {
    let mut search = 0;
    while let Some(found) = text[search..].find("----") {
        let start = search + found;
        let after_dashes = start + run_length(&text[start..], '-', 4).unwrap_or(4);
        if text[after_dashes..].trim_start().starts_with("MODULE") {
            return Some(start);
        }
        search = after_dashes;
    }
    None
}

fn skip_to_module() -> Grammar<()> {
    Grammar::new(|ctx, _| match find_module_header(ctx.remaining()) {
        Some(start) => {
            let offset = ctx.offset() + start;
            ctx.set_offset(offset);
            Ok(())
        }
        None => Err(ctx.fail("`---- MODULE`")),
    })
}

fn build_module(unit: Grammar<TlaUnit>) -> Grammar<TlaModule> {
    let extends = list_of(identifier(), token(",")).preceded_by(token("EXTENDS"));
    let units = repeat(one_of(vec![separator().map(|_| None), unit.map(Some)]));
    let header = identifier()
        .preceded_by(token("MODULE"))
        .preceded_by(separator())
        .skip(separator());
    Grammar::new(move |ctx, vars| {
        skip_to_module().parse(ctx, vars)?;
        let start = ctx.offset();
        let name = header.parse(ctx, vars)?;
        let extends = optional(extends.clone()).parse(ctx, vars)?.unwrap_or_default();
        let units = units.parse(ctx, vars)?.into_iter().flatten().collect();
        module_end().parse(ctx, vars)?;
        Ok(TlaModule {
            meta: crate::frontend::uid::Meta::new(ctx.location_between(start, ctx.offset())),
            name,
            extends,
            units,
        })
    })
}

/// TLA+ の文法一式
pub struct TlaGrammar {
    expression: Grammar<TlaExpression>,
    pcal_expression: Grammar<TlaExpression>,
    unit: Grammar<TlaUnit>,
    module: Grammar<TlaModule>,
    _scope: GrammarScope,
}

impl TlaGrammar {
    /// 文法を組み立てる
    pub fn new() -> Self {
        let mut scope = GrammarScope::new();
        let expression = ReferenceGrammar::new();
        let pcal_expression = ReferenceGrammar::new();
        let unit = ReferenceGrammar::new();
        scope.register(&expression);
        scope.register(&pcal_expression);
        scope.register(&unit);

        let standard = Rc::new(OperatorTables::standard());
        // PlusCal の中では `||` と `:=` は文の区切りとして使われる
        let restricted = Rc::new(OperatorTables::standard().without_infix(&["||", ":="]));

        expression.set(build_expression(standard, expression.grammar(), unit.grammar()));
        pcal_expression.set(build_expression(restricted, pcal_expression.grammar(), unit.grammar()));
        unit.set(build_unit(expression.grammar()));
        let module = build_module(unit.grammar());

        Self {
            expression: expression.grammar(),
            pcal_expression: pcal_expression.grammar(),
            unit: unit.grammar(),
            module,
            _scope: scope,
        }
    }

    /// 式の文法
    pub fn expression(&self) -> Grammar<TlaExpression> {
        self.expression.clone()
    }

    /// PlusCal 内で使う式の文法（`||` と `:=` を含まない）
    pub fn pcal_expression(&self) -> Grammar<TlaExpression> {
        self.pcal_expression.clone()
    }

    /// 単位（定義・宣言）の文法
    pub fn unit(&self) -> Grammar<TlaUnit> {
        self.unit.clone()
    }

    /// モジュールの文法
    pub fn module(&self) -> Grammar<TlaModule> {
        self.module.clone()
    }
}

impl Default for TlaGrammar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expression(source: &str) -> TlaExpression {
        let grammar = TlaGrammar::new();
        let mut ctx = LexicalContext::new("test", source);
        let result = read_or_except(&mut ctx, &grammar.expression());
        assert!(result.is_ok(), "式の解析に失敗: {:?}", result);
        result.unwrap()
    }

    fn id(name: &str) -> TlaExpression {
        TlaExpression::identifier(name)
    }

    fn num(n: &str) -> TlaExpression {
        TlaExpression::number(n)
    }

    #[test]
    fn test_precedence() {
        let e = parse_expression("1 + 2 * 3");
        assert_eq!(
            e,
            TlaExpression::binary("+", num("1"), TlaExpression::binary("*", num("2"), num("3")))
        );
    }

    #[test]
    fn test_left_associative() {
        let e = parse_expression("a - b - c");
        assert_eq!(
            e,
            TlaExpression::binary("-", TlaExpression::binary("-", id("a"), id("b")), id("c"))
        );
    }

    #[test]
    fn test_prime_is_postfix() {
        let e = parse_expression("x' = x + 1");
        assert_eq!(
            e,
            TlaExpression::binary(
                "=",
                TlaExpression::unary("'", id("x")),
                TlaExpression::binary("+", id("x"), num("1"))
            )
        );
    }

    #[test]
    fn test_range_is_not_decimal() {
        let e = parse_expression("1..N");
        assert_eq!(e, TlaExpression::binary("..", num("1"), id("N")));
    }

    #[test]
    fn test_bullet_list_alignment() {
        let e = parse_expression("/\\ a\n/\\ b \\/ c\n/\\ d");
        assert_eq!(
            e,
            TlaExpression::binary(
                "/\\",
                TlaExpression::binary("/\\", id("a"), TlaExpression::binary("\\/", id("b"), id("c"))),
                id("d")
            )
        );
    }

    #[test]
    fn test_function_application_and_record_access() {
        let e = parse_expression("pc[self].state");
        let expected = TlaExpression::synthetic(TlaExpressionKind::RecordAccess {
            record: Box::new(TlaExpression::synthetic(TlaExpressionKind::FunctionCall {
                function: Box::new(id("pc")),
                args: vec![id("self")],
            })),
            field: TlaIdentifier::synthetic("state"),
        });
        assert_eq!(e, expected);
    }

    #[test]
    fn test_set_forms() {
        assert!(matches!(parse_expression("{}").kind, TlaExpressionKind::Set(ref v) if v.is_empty()));
        assert!(matches!(
            parse_expression("{x \\in S : x > 1}").kind,
            TlaExpressionKind::SetRefinement { .. }
        ));
        assert!(matches!(
            parse_expression("{x * 2 : x \\in S}").kind,
            TlaExpressionKind::SetComprehension { .. }
        ));
        assert!(matches!(parse_expression("{1, 2, 3}").kind, TlaExpressionKind::Set(ref v) if v.len() == 3));
    }

    #[test]
    fn test_choose_binds_one_name() {
        let e = parse_expression("CHOOSE x \\in S : x > 1");
        match &e.kind {
            TlaExpressionKind::Choose { binding, from, predicate } => {
                assert_eq!(binding.identifiers().len(), 1);
                assert_eq!(**from, id("S"));
                assert!(matches!(predicate.kind, TlaExpressionKind::Binary { ref operator, .. } if operator == ">"));
            }
            other => panic!("CHOOSE が期待されます: {:?}", other),
        }
        assert_eq!(e.to_string(), "CHOOSE x \\in S : x > 1");
    }

    #[test]
    fn test_bracket_forms() {
        assert!(matches!(parse_expression("[a |-> 1, b |-> 2]").kind, TlaExpressionKind::Record(_)));
        assert!(matches!(parse_expression("[a : S]").kind, TlaExpressionKind::RecordSet(_)));
        assert!(matches!(parse_expression("[x \\in S |-> x]").kind, TlaExpressionKind::Function { .. }));
        assert!(matches!(parse_expression("[S -> T]").kind, TlaExpressionKind::FunctionSet { .. }));
        assert!(matches!(
            parse_expression("[f EXCEPT ![1] = @ + 1, !.a = 2]").kind,
            TlaExpressionKind::FunctionSubstitution { .. }
        ));
    }

    #[test]
    fn test_unterminated_string() {
        let grammar = TlaGrammar::new();
        let mut ctx = LexicalContext::new("test", "\"abc");
        let failure = read_or_except(&mut ctx, &grammar.expression()).unwrap_err();
        assert!(failure.expected.iter().any(|e| e.contains("文字列の終端")));
    }

    #[test]
    fn test_pcal_expression_excludes_parallel_assignment() {
        let grammar = TlaGrammar::new();
        let mut ctx = LexicalContext::new("test", "a || b");
        let e = grammar.pcal_expression().parse(&mut ctx, &VariableMap::new()).unwrap();
        assert_eq!(e, id("a"));
        assert_eq!(ctx.offset(), 1);
    }
}
