//! # TLA+ 抽象構文木
//!
//! 式・単位（定義や宣言）・モジュールを表します。すべてのノードは
//! `Meta` を持ち、構造比較ではその中身は無視されます。

use crate::frontend::error::SourceLocation;
use crate::frontend::uid::Meta;

/// 識別子
#[derive(Debug, Clone, PartialEq)]
pub struct TlaIdentifier {
    pub meta: Meta,
    pub id: String,
}

impl TlaIdentifier {
    pub fn new(location: SourceLocation, id: impl Into<String>) -> Self {
        Self {
            meta: Meta::new(location),
            id: id.into(),
        }
    }

    /// 位置を持たない識別子
    pub fn synthetic(id: impl Into<String>) -> Self {
        Self::new(SourceLocation::unknown(), id)
    }

    pub(crate) fn refreshed(&self) -> Self {
        Self {
            meta: self.meta.refreshed(),
            id: self.id.clone(),
        }
    }
}

/// 量化子の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    /// `\A`
    Universal,
    /// `\E`
    Existential,
}

/// 公平性の種類（`WF_` / `SF_`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FairnessKind {
    Weak,
    Strong,
}

/// 束縛のパターン
#[derive(Debug, Clone, PartialEq)]
pub enum BoundPattern {
    /// `a, b \in S` のように各名前を個別に束縛する
    Ids(Vec<TlaIdentifier>),
    /// `<<a, b>> \in S` のようにタプルを分解して束縛する
    Tuple(Vec<TlaIdentifier>),
}

impl BoundPattern {
    pub fn identifiers(&self) -> &[TlaIdentifier] {
        match self {
            BoundPattern::Ids(ids) | BoundPattern::Tuple(ids) => ids,
        }
    }

    fn refreshed(&self) -> Self {
        match self {
            BoundPattern::Ids(ids) => BoundPattern::Ids(ids.iter().map(TlaIdentifier::refreshed).collect()),
            BoundPattern::Tuple(ids) => {
                BoundPattern::Tuple(ids.iter().map(TlaIdentifier::refreshed).collect())
            }
        }
    }
}

/// 量化子や関数定義の束縛 `pattern \in set`
#[derive(Debug, Clone, PartialEq)]
pub struct QuantifierBound {
    pub meta: Meta,
    pub pattern: BoundPattern,
    pub set: TlaExpression,
}

/// レコードのフィールド（リテラルとレコード集合で共用）
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: TlaIdentifier,
    pub value: TlaExpression,
}

/// EXCEPT の経路の1要素
#[derive(Debug, Clone, PartialEq)]
pub enum SubstitutionKey {
    /// `![e1, e2]`
    Index(Vec<TlaExpression>),
    /// `!.field`
    Field(TlaIdentifier),
}

/// EXCEPT の `!path = value`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSubstitutionPair {
    pub meta: Meta,
    pub keys: Vec<SubstitutionKey>,
    pub value: TlaExpression,
}

/// 式
#[derive(Debug, Clone, PartialEq)]
pub struct TlaExpression {
    pub meta: Meta,
    pub kind: TlaExpressionKind,
}

/// 式の種類
#[derive(Debug, Clone, PartialEq)]
pub enum TlaExpressionKind {
    Bool(bool),
    /// 数値リテラル（テキストのまま保持。小数点を含めば実数）
    Number(String),
    String(String),
    /// `M!x` のような接頭辞付きの参照
    Identifier {
        prefix: Vec<TlaIdentifier>,
        name: TlaIdentifier,
    },
    OperatorCall {
        prefix: Vec<TlaIdentifier>,
        name: TlaIdentifier,
        args: Vec<TlaExpression>,
    },
    /// `f[a, b]`
    FunctionCall {
        function: Box<TlaExpression>,
        args: Vec<TlaExpression>,
    },
    /// `r.field`
    RecordAccess {
        record: Box<TlaExpression>,
        field: TlaIdentifier,
    },
    /// `[a |-> 1, b |-> 2]`
    Record(Vec<RecordField>),
    /// `[a : S, b : T]`
    RecordSet(Vec<RecordField>),
    Set(Vec<TlaExpression>),
    /// `{x \in S : P}`
    SetRefinement {
        binding: BoundPattern,
        from: Box<TlaExpression>,
        predicate: Box<TlaExpression>,
    },
    /// `{e : x \in S}`
    SetComprehension {
        body: Box<TlaExpression>,
        bounds: Vec<QuantifierBound>,
    },
    /// `[x \in S |-> e]`
    Function {
        bounds: Vec<QuantifierBound>,
        body: Box<TlaExpression>,
    },
    /// `[S -> T]`
    FunctionSet {
        from: Box<TlaExpression>,
        to: Box<TlaExpression>,
    },
    /// `[f EXCEPT ![k] = v]`
    FunctionSubstitution {
        source: Box<TlaExpression>,
        substitutions: Vec<FunctionSubstitutionPair>,
    },
    /// EXCEPT 内の `@`
    SubstitutionAt,
    Binary {
        operator: String,
        lhs: Box<TlaExpression>,
        rhs: Box<TlaExpression>,
    },
    /// 前置および後置の単項演算（プライム `'` は後置）
    Unary {
        operator: String,
        operand: Box<TlaExpression>,
    },
    If {
        condition: Box<TlaExpression>,
        then: Box<TlaExpression>,
        otherwise: Box<TlaExpression>,
    },
    Quantified {
        kind: QuantifierKind,
        bounds: Vec<QuantifierBound>,
        body: Box<TlaExpression>,
    },
    /// `CHOOSE x \in S : P`
    Choose {
        binding: BoundPattern,
        from: Box<TlaExpression>,
        predicate: Box<TlaExpression>,
    },
    Let {
        definitions: Vec<TlaUnit>,
        body: Box<TlaExpression>,
    },
    Tuple(Vec<TlaExpression>),
    /// `WF_vars(A)` / `SF_vars(A)`
    Fairness {
        kind: FairnessKind,
        vars: Box<TlaExpression>,
        expression: Box<TlaExpression>,
    },
    /// PlusCal の初期値省略時の既定値
    DefaultInit,
}

/// 後置演算子
pub const POSTFIX_OPERATORS: &[&str] = &["'", "^+", "^*", "^#"];

pub fn is_postfix_operator(operator: &str) -> bool {
    POSTFIX_OPERATORS.contains(&operator)
}

impl TlaExpression {
    pub fn new(location: SourceLocation, kind: TlaExpressionKind) -> Self {
        Self {
            meta: Meta::new(location),
            kind,
        }
    }

    pub fn synthetic(kind: TlaExpressionKind) -> Self {
        Self::new(SourceLocation::unknown(), kind)
    }

    pub fn location(&self) -> &SourceLocation {
        &self.meta.location
    }

    pub fn number(value: impl Into<String>) -> Self {
        Self::synthetic(TlaExpressionKind::Number(value.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::synthetic(TlaExpressionKind::String(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::synthetic(TlaExpressionKind::Bool(value))
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::synthetic(TlaExpressionKind::Identifier {
            prefix: Vec::new(),
            name: TlaIdentifier::synthetic(name),
        })
    }

    pub fn binary(operator: impl Into<String>, lhs: TlaExpression, rhs: TlaExpression) -> Self {
        Self::synthetic(TlaExpressionKind::Binary {
            operator: operator.into(),
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn unary(operator: impl Into<String>, operand: TlaExpression) -> Self {
        Self::synthetic(TlaExpressionKind::Unary {
            operator: operator.into(),
            operand: Box::new(operand),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<TlaExpression>) -> Self {
        Self::synthetic(TlaExpressionKind::OperatorCall {
            prefix: Vec::new(),
            name: TlaIdentifier::synthetic(name),
            args,
        })
    }

    pub fn set(elements: Vec<TlaExpression>) -> Self {
        Self::synthetic(TlaExpressionKind::Set(elements))
    }

    pub fn tuple(elements: Vec<TlaExpression>) -> Self {
        Self::synthetic(TlaExpressionKind::Tuple(elements))
    }

    /// 接頭辞なしの単純な識別子なら、その名前
    pub fn as_simple_identifier(&self) -> Option<&TlaIdentifier> {
        match &self.kind {
            TlaExpressionKind::Identifier { prefix, name } if prefix.is_empty() => Some(name),
            _ => None,
        }
    }

    /// 直下の部分式それぞれに `f` を適用する
    pub fn for_each_child(&self, f: &mut dyn FnMut(&TlaExpression)) {
        use TlaExpressionKind as K;
        match &self.kind {
            K::Bool(_)
            | K::Number(_)
            | K::String(_)
            | K::Identifier { .. }
            | K::SubstitutionAt
            | K::DefaultInit => {}
            K::OperatorCall { args, .. } => args.iter().for_each(|a| f(a)),
            K::FunctionCall { function, args } => {
                f(function);
                args.iter().for_each(|a| f(a));
            }
            K::RecordAccess { record, .. } => f(record),
            K::Record(fields) | K::RecordSet(fields) => fields.iter().for_each(|fd| f(&fd.value)),
            K::Set(elements) | K::Tuple(elements) => elements.iter().for_each(|e| f(e)),
            K::SetRefinement { from, predicate, .. } | K::Choose { from, predicate, .. } => {
                f(from);
                f(predicate);
            }
            K::SetComprehension { body, bounds } | K::Function { bounds, body } => {
                bounds.iter().for_each(|b| f(&b.set));
                f(body);
            }
            K::Quantified { bounds, body, .. } => {
                bounds.iter().for_each(|b| f(&b.set));
                f(body);
            }
            K::FunctionSet { from, to } => {
                f(from);
                f(to);
            }
            K::FunctionSubstitution {
                source,
                substitutions,
            } => {
                f(source);
                for pair in substitutions {
                    for key in &pair.keys {
                        if let SubstitutionKey::Index(indices) = key {
                            indices.iter().for_each(|i| f(i));
                        }
                    }
                    f(&pair.value);
                }
            }
            K::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            K::Unary { operand, .. } => f(operand),
            K::If {
                condition,
                then,
                otherwise,
            } => {
                f(condition);
                f(then);
                f(otherwise);
            }
            K::Let { definitions, body } => {
                for unit in definitions {
                    unit.for_each_expression(f);
                }
                f(body);
            }
            K::Fairness {
                vars, expression, ..
            } => {
                f(vars);
                f(expression);
            }
        }
    }

    /// 直下の部分式を `f` の結果に置き換えた複製を作る
    ///
    /// 複製されたノード（束縛名を含む）には新しい識別子が払い出されます。
    pub fn map_children(&self, f: &mut dyn FnMut(&TlaExpression) -> TlaExpression) -> TlaExpression {
        use TlaExpressionKind as K;
        let bounds_map = |bounds: &[QuantifierBound], f: &mut dyn FnMut(&TlaExpression) -> TlaExpression| {
            bounds
                .iter()
                .map(|b| QuantifierBound {
                    meta: b.meta.refreshed(),
                    pattern: b.pattern.refreshed(),
                    set: f(&b.set),
                })
                .collect::<Vec<_>>()
        };
        let kind = match &self.kind {
            K::Bool(b) => K::Bool(*b),
            K::Number(n) => K::Number(n.clone()),
            K::String(s) => K::String(s.clone()),
            K::Identifier { prefix, name } => K::Identifier {
                prefix: prefix.iter().map(TlaIdentifier::refreshed).collect(),
                name: name.refreshed(),
            },
            K::OperatorCall { prefix, name, args } => K::OperatorCall {
                prefix: prefix.iter().map(TlaIdentifier::refreshed).collect(),
                name: name.refreshed(),
                args: args.iter().map(|a| f(a)).collect(),
            },
            K::FunctionCall { function, args } => K::FunctionCall {
                function: Box::new(f(function)),
                args: args.iter().map(|a| f(a)).collect(),
            },
            K::RecordAccess { record, field } => K::RecordAccess {
                record: Box::new(f(record)),
                field: field.refreshed(),
            },
            K::Record(fields) => K::Record(map_fields(fields, f)),
            K::RecordSet(fields) => K::RecordSet(map_fields(fields, f)),
            K::Set(elements) => K::Set(elements.iter().map(|e| f(e)).collect()),
            K::Tuple(elements) => K::Tuple(elements.iter().map(|e| f(e)).collect()),
            K::SetRefinement {
                binding,
                from,
                predicate,
            } => K::SetRefinement {
                binding: binding.refreshed(),
                from: Box::new(f(from)),
                predicate: Box::new(f(predicate)),
            },
            K::Choose {
                binding,
                from,
                predicate,
            } => K::Choose {
                binding: binding.refreshed(),
                from: Box::new(f(from)),
                predicate: Box::new(f(predicate)),
            },
            K::SetComprehension { body, bounds } => {
                let bounds = bounds_map(bounds, f);
                K::SetComprehension {
                    body: Box::new(f(body)),
                    bounds,
                }
            }
            K::Function { bounds, body } => {
                let bounds = bounds_map(bounds, f);
                K::Function {
                    bounds,
                    body: Box::new(f(body)),
                }
            }
            K::Quantified { kind, bounds, body } => {
                let bounds = bounds_map(bounds, f);
                K::Quantified {
                    kind: *kind,
                    bounds,
                    body: Box::new(f(body)),
                }
            }
            K::FunctionSet { from, to } => K::FunctionSet {
                from: Box::new(f(from)),
                to: Box::new(f(to)),
            },
            K::FunctionSubstitution {
                source,
                substitutions,
            } => K::FunctionSubstitution {
                source: Box::new(f(source)),
                substitutions: substitutions
                    .iter()
                    .map(|pair| FunctionSubstitutionPair {
                        meta: pair.meta.refreshed(),
                        keys: pair
                            .keys
                            .iter()
                            .map(|key| match key {
                                SubstitutionKey::Index(indices) => {
                                    SubstitutionKey::Index(indices.iter().map(|i| f(i)).collect())
                                }
                                SubstitutionKey::Field(field) => SubstitutionKey::Field(field.refreshed()),
                            })
                            .collect(),
                        value: f(&pair.value),
                    })
                    .collect(),
            },
            K::SubstitutionAt => K::SubstitutionAt,
            K::Binary { operator, lhs, rhs } => K::Binary {
                operator: operator.clone(),
                lhs: Box::new(f(lhs)),
                rhs: Box::new(f(rhs)),
            },
            K::Unary { operator, operand } => K::Unary {
                operator: operator.clone(),
                operand: Box::new(f(operand)),
            },
            K::If {
                condition,
                then,
                otherwise,
            } => K::If {
                condition: Box::new(f(condition)),
                then: Box::new(f(then)),
                otherwise: Box::new(f(otherwise)),
            },
            K::Let { definitions, body } => K::Let {
                definitions: definitions.iter().map(|u| u.map_expressions(f)).collect(),
                body: Box::new(f(body)),
            },
            K::Fairness {
                kind,
                vars,
                expression,
            } => K::Fairness {
                kind: *kind,
                vars: Box::new(f(vars)),
                expression: Box::new(f(expression)),
            },
            K::DefaultInit => K::DefaultInit,
        };
        TlaExpression {
            meta: self.meta.refreshed(),
            kind,
        }
    }
}

fn map_fields(fields: &[RecordField], f: &mut dyn FnMut(&TlaExpression) -> TlaExpression) -> Vec<RecordField> {
    fields
        .iter()
        .map(|field| RecordField {
            name: field.name.refreshed(),
            value: f(&field.value),
        })
        .collect()
}

/// 演算子宣言 `F(_, _)` や定数宣言の1要素
#[derive(Debug, Clone, PartialEq)]
pub struct OpDecl {
    pub meta: Meta,
    pub name: TlaIdentifier,
    /// 引数の数（単なる名前なら0）
    pub arity: usize,
}

impl OpDecl {
    fn refreshed(&self) -> Self {
        Self {
            meta: self.meta.refreshed(),
            name: self.name.refreshed(),
            arity: self.arity,
        }
    }
}

/// 演算子定義 `Op(a, b) == body`
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDefinition {
    pub meta: Meta,
    pub name: TlaIdentifier,
    pub args: Vec<OpDecl>,
    pub body: TlaExpression,
    pub local: bool,
}

/// 関数定義 `f[x \in S] == body`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub meta: Meta,
    pub name: TlaIdentifier,
    /// 束縛と本体を持つ関数式
    pub function: TlaExpression,
    pub local: bool,
}

/// `WITH a <- e` の置換
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRemapping {
    pub from: TlaIdentifier,
    pub to: TlaExpression,
}

/// `INSTANCE M WITH ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub meta: Meta,
    pub module: TlaIdentifier,
    pub remappings: Vec<InstanceRemapping>,
    pub local: bool,
}

/// `N == INSTANCE M`
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDefinition {
    pub meta: Meta,
    pub name: TlaIdentifier,
    pub args: Vec<OpDecl>,
    pub instance: Instance,
    pub local: bool,
}

/// モジュールの構成要素
#[derive(Debug, Clone, PartialEq)]
pub enum TlaUnit {
    Operator(OperatorDefinition),
    Function(FunctionDefinition),
    ModuleDefinition(ModuleDefinition),
    Instance(Instance),
    Constant { meta: Meta, declarations: Vec<OpDecl> },
    Variable { meta: Meta, names: Vec<TlaIdentifier> },
    Recursive { meta: Meta, declarations: Vec<OpDecl> },
    Theorem { meta: Meta, expression: TlaExpression },
    Assumption { meta: Meta, expression: TlaExpression },
}

impl TlaUnit {
    pub fn meta(&self) -> &Meta {
        match self {
            TlaUnit::Operator(def) => &def.meta,
            TlaUnit::Function(def) => &def.meta,
            TlaUnit::ModuleDefinition(def) => &def.meta,
            TlaUnit::Instance(instance) => &instance.meta,
            TlaUnit::Constant { meta, .. }
            | TlaUnit::Variable { meta, .. }
            | TlaUnit::Recursive { meta, .. }
            | TlaUnit::Theorem { meta, .. }
            | TlaUnit::Assumption { meta, .. } => meta,
        }
    }

    /// この単位が定義する名前（定義でなければ `None`）
    pub fn defined_name(&self) -> Option<&TlaIdentifier> {
        match self {
            TlaUnit::Operator(def) => Some(&def.name),
            TlaUnit::Function(def) => Some(&def.name),
            TlaUnit::ModuleDefinition(def) => Some(&def.name),
            _ => None,
        }
    }

    pub fn for_each_expression(&self, f: &mut dyn FnMut(&TlaExpression)) {
        match self {
            TlaUnit::Operator(def) => f(&def.body),
            TlaUnit::Function(def) => f(&def.function),
            TlaUnit::ModuleDefinition(def) => def.instance.remappings.iter().for_each(|r| f(&r.to)),
            TlaUnit::Instance(instance) => instance.remappings.iter().for_each(|r| f(&r.to)),
            TlaUnit::Theorem { expression, .. } | TlaUnit::Assumption { expression, .. } => f(expression),
            TlaUnit::Constant { .. } | TlaUnit::Variable { .. } | TlaUnit::Recursive { .. } => {}
        }
    }

    /// 含まれる式を `f` で置き換えた複製（識別子は新しく払い出す）
    pub fn map_expressions(&self, f: &mut dyn FnMut(&TlaExpression) -> TlaExpression) -> TlaUnit {
        let map_instance = |instance: &Instance, f: &mut dyn FnMut(&TlaExpression) -> TlaExpression| Instance {
            meta: instance.meta.refreshed(),
            module: instance.module.refreshed(),
            remappings: instance
                .remappings
                .iter()
                .map(|r| InstanceRemapping {
                    from: r.from.refreshed(),
                    to: f(&r.to),
                })
                .collect(),
            local: instance.local,
        };
        match self {
            TlaUnit::Operator(def) => TlaUnit::Operator(OperatorDefinition {
                meta: def.meta.refreshed(),
                name: def.name.refreshed(),
                args: def.args.iter().map(OpDecl::refreshed).collect(),
                body: f(&def.body),
                local: def.local,
            }),
            TlaUnit::Function(def) => TlaUnit::Function(FunctionDefinition {
                meta: def.meta.refreshed(),
                name: def.name.refreshed(),
                function: f(&def.function),
                local: def.local,
            }),
            TlaUnit::ModuleDefinition(def) => TlaUnit::ModuleDefinition(ModuleDefinition {
                meta: def.meta.refreshed(),
                name: def.name.refreshed(),
                args: def.args.iter().map(OpDecl::refreshed).collect(),
                instance: map_instance(&def.instance, f),
                local: def.local,
            }),
            TlaUnit::Instance(instance) => TlaUnit::Instance(map_instance(instance, f)),
            TlaUnit::Constant { meta, declarations } => TlaUnit::Constant {
                meta: meta.refreshed(),
                declarations: declarations.iter().map(OpDecl::refreshed).collect(),
            },
            TlaUnit::Variable { meta, names } => TlaUnit::Variable {
                meta: meta.refreshed(),
                names: names.iter().map(TlaIdentifier::refreshed).collect(),
            },
            TlaUnit::Recursive { meta, declarations } => TlaUnit::Recursive {
                meta: meta.refreshed(),
                declarations: declarations.iter().map(OpDecl::refreshed).collect(),
            },
            TlaUnit::Theorem { meta, expression } => TlaUnit::Theorem {
                meta: meta.refreshed(),
                expression: f(expression),
            },
            TlaUnit::Assumption { meta, expression } => TlaUnit::Assumption {
                meta: meta.refreshed(),
                expression: f(expression),
            },
        }
    }
}

/// TLA+ モジュール
#[derive(Debug, Clone, PartialEq)]
pub struct TlaModule {
    pub meta: Meta,
    pub name: TlaIdentifier,
    pub extends: Vec<TlaIdentifier>,
    pub units: Vec<TlaUnit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality_ignores_uids() {
        let a = TlaExpression::binary("+", TlaExpression::number("1"), TlaExpression::identifier("x"));
        let b = TlaExpression::binary("+", TlaExpression::number("1"), TlaExpression::identifier("x"));
        assert_ne!(a.meta.uid, b.meta.uid);
        assert_eq!(a, b);
    }

    #[test]
    fn test_map_children_refreshes_identity() {
        let e = TlaExpression::binary("*", TlaExpression::identifier("a"), TlaExpression::identifier("b"));
        let copy = e.map_children(&mut |child| child.map_children(&mut |c| c.clone()));
        assert_eq!(e, copy);
        assert_ne!(e.meta.uid, copy.meta.uid);
        if let (TlaExpressionKind::Binary { lhs: l1, .. }, TlaExpressionKind::Binary { lhs: l2, .. }) =
            (&e.kind, &copy.kind)
        {
            assert_ne!(l1.meta.uid, l2.meta.uid);
        } else {
            panic!("二項演算が期待されます");
        }
    }

    #[test]
    fn test_for_each_child_visits_let_bodies() {
        let def = TlaUnit::Operator(OperatorDefinition {
            meta: Meta::synthetic(),
            name: TlaIdentifier::synthetic("A"),
            args: Vec::new(),
            body: TlaExpression::number("1"),
            local: false,
        });
        let e = TlaExpression::synthetic(TlaExpressionKind::Let {
            definitions: vec![def],
            body: Box::new(TlaExpression::identifier("A")),
        });
        let mut count = 0;
        e.for_each_child(&mut |_| count += 1);
        assert_eq!(count, 2);
    }
}
