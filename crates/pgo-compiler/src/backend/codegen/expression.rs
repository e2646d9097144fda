//! # 式の変換
//!
//! TLA+ の式を Go の式にします。Go の式として書けない部分（量化子、
//! 集合の内包、`IF`、`EXCEPT` など）は一時変数とループを現在のブロックに
//! 前置きし、結果を持つ変数を返します。
//!
//! 値はすべて不変として扱います。集合・列・関数を更新するときは
//! ランタイムの関数が新しい値を返し、元の値は書き換えません。

use crate::backend::go::{GoExpression, GoStatement, GoType};
use crate::frontend::ast::{
    BoundPattern, FunctionSubstitutionPair, OperatorDefinition, QuantifierBound, QuantifierKind, SubstitutionKey,
    TlaExpression, TlaExpressionKind, TlaUnit,
};
use crate::frontend::error::{IssueKind, SourceLocation};
use crate::frontend::semantic::{Builtin, DefinitionKind};
use crate::frontend::uid::Uid;
use crate::typesystem::Type;

use super::types::{field_name, go_type, tuple_field};
use super::{CodeGenerator, FunctionContext};

pub(crate) const DATATYPES: &str = "pgo/datatypes";

/// 添字アクセスや部分更新の経路の1段（型を見る前）
#[derive(Debug, Clone, Copy)]
pub enum PathStep<'e> {
    Index(&'e [TlaExpression]),
    Field(&'e str),
}

impl<'e> PathStep<'e> {
    pub fn from_key(key: &'e SubstitutionKey) -> Self {
        match key {
            SubstitutionKey::Index(args) => PathStep::Index(args),
            SubstitutionKey::Field(name) => PathStep::Field(&name.id),
        }
    }
}

/// 型を確かめたあとの経路の1段
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedStep {
    MapKey(GoExpression),
    /// 1始まりの添字
    SeqIndex(GoExpression),
    /// 構造体のフィールド（レコードとタプル）
    Field(String),
}

/// 束縛1つ分のループ
struct LoopLevel {
    target: GoExpression,
    ids: Vec<(Uid, String)>,
    /// タプルを分解して束縛する
    destructure: bool,
}

type LoopBody<'g, 'a> = dyn FnMut(&mut CodeGenerator<'a>, &mut FunctionContext, &[GoExpression]) + 'g;

/// 二度評価しても構わない式か
pub(crate) fn is_simple(expression: &GoExpression) -> bool {
    matches!(
        expression,
        GoExpression::Identifier(_) | GoExpression::Literal(_) | GoExpression::String(_)
    )
}

/// 1始まりの添字を Go の添字にする
fn minus_one(index: GoExpression) -> GoExpression {
    if let GoExpression::Literal(text) = &index {
        if let Ok(n) = text.parse::<i64>() {
            return GoExpression::literal((n - 1).to_string());
        }
    }
    GoExpression::binary("-", index, GoExpression::literal("1"))
}

/// 型のゼロ値
pub(crate) fn zero_value(ty: &GoType) -> GoExpression {
    match ty {
        GoType::Named(name) if name == "int" => GoExpression::literal("0"),
        GoType::Named(name) if name == "float64" => GoExpression::literal("0.0"),
        GoType::Named(name) if name == "bool" => GoExpression::boolean(false),
        GoType::Named(name) if name == "string" => GoExpression::String(String::new()),
        _ => GoExpression::unary("*", GoExpression::call("new", vec![GoExpression::Type(ty.clone())])),
    }
}

/// `datatypes.<function>(args...)`
pub(crate) fn datatypes(f: &mut FunctionContext, function: &str, args: Vec<GoExpression>) -> GoExpression {
    f.builder.import(DATATYPES);
    GoExpression::call(format!("datatypes.{}", function), args)
}

/// 経路をたどって値を読む式
pub(crate) fn access_path(base: GoExpression, steps: &[ResolvedStep]) -> GoExpression {
    steps.iter().fold(base, |current, step| match step {
        ResolvedStep::MapKey(key) => GoExpression::index(current, key.clone()),
        ResolvedStep::SeqIndex(index) => GoExpression::index(current, minus_one(index.clone())),
        ResolvedStep::Field(name) => GoExpression::selector(current, name.clone()),
    })
}

/// 経路の先を `value` に置き換えた新しい値を作る
pub(crate) fn update_path(
    f: &mut FunctionContext,
    base: GoExpression,
    steps: &[ResolvedStep],
    value: GoExpression,
) -> GoExpression {
    let Some((step, rest)) = steps.split_first() else {
        return value;
    };
    match step {
        ResolvedStep::MapKey(key) => {
            let inner = update_path(f, GoExpression::index(base.clone(), key.clone()), rest, value);
            datatypes(f, "MapSet", vec![base, key.clone(), inner])
        }
        ResolvedStep::SeqIndex(index) => {
            let inner = update_path(f, GoExpression::index(base.clone(), minus_one(index.clone())), rest, value);
            datatypes(f, "SeqSet", vec![base, index.clone(), inner])
        }
        ResolvedStep::Field(name) => {
            // 構造体は値渡しなのでコピーしてから書き換える
            let copy = f.temp("record", base);
            let inner = update_path(f, GoExpression::selector(copy.clone(), name.clone()), rest, value);
            f.builder
                .add(GoStatement::assign(GoExpression::selector(copy.clone(), name.clone()), inner));
            copy
        }
    }
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn unsupported(
        &self,
        f: &mut FunctionContext,
        location: &SourceLocation,
        construct: impl Into<String>,
    ) -> GoExpression {
        f.issues.error(
            location.clone(),
            IssueKind::UnsupportedConstruct {
                construct: construct.into(),
            },
        );
        GoExpression::identifier("nil")
    }

    pub(crate) fn internal_error(
        &self,
        f: &mut FunctionContext,
        location: &SourceLocation,
        message: impl Into<String>,
    ) -> GoExpression {
        f.issues.error(
            location.clone(),
            IssueKind::InternalCompilerError {
                message: message.into(),
            },
        );
        GoExpression::identifier("nil")
    }

    /// 要素ごとにリソースを持つ引数を指す名前なら、その定義とキーの型
    pub(crate) fn mapped_resource(&self, f: &FunctionContext, e: &TlaExpression) -> Option<(Uid, Type)> {
        let (uid, _) = self.registry.resolved_definition(e.meta.uid)?;
        if f.bindings.contains_key(&uid) || !f.mapped_resources.contains(&uid) {
            return None;
        }
        match self.type_of(uid) {
            Type::Map(key, _) => Some((uid, *key)),
            _ => None,
        }
    }

    /// 複数回使う値を一時変数に逃がす
    pub(crate) fn simple(&self, f: &mut FunctionContext, base: &str, value: GoExpression) -> GoExpression {
        if is_simple(&value) {
            value
        } else {
            f.temp(base, value)
        }
    }

    pub(crate) fn expression(&mut self, f: &mut FunctionContext, e: &TlaExpression) -> GoExpression {
        use TlaExpressionKind as K;
        match &e.kind {
            K::Bool(value) => GoExpression::boolean(*value),
            K::Number(text) => {
                if self.type_of(e.meta.uid) == Type::Real && !text.contains('.') {
                    GoExpression::literal(format!("{}.0", text))
                } else {
                    GoExpression::literal(text.clone())
                }
            }
            K::String(text) => GoExpression::String(text.clone()),
            K::Identifier { .. } => self.reference(f, e, &[]),
            K::OperatorCall { args, .. } => self.reference(f, e, args),
            K::FunctionCall { function, args } => {
                if let Some((uid, key_type)) = self.mapped_resource(f, function) {
                    let key = self.key(f, args, &key_type);
                    let key = self.simple(f, "key", key);
                    return self.strategy.read_global_element(f, uid, key, e.location());
                }
                let ty = self.type_of(function.meta.uid);
                let target = self.expression(f, function);
                match self.resolve_path(f, &ty, &[PathStep::Index(args)], e.location()) {
                    Some(steps) => access_path(target, &steps),
                    None => GoExpression::identifier("nil"),
                }
            }
            K::RecordAccess { record, field } => {
                let record = self.expression(f, record);
                GoExpression::selector(record, field_name(&field.id))
            }
            K::Record(fields) => {
                let ty = self.go_type_of(e.meta.uid);
                let mut entries = Vec::new();
                for field in fields {
                    let value = self.expression(f, &field.value);
                    entries.push((GoExpression::identifier(field_name(&field.name.id)), value));
                }
                GoExpression::Keyed { ty, entries }
            }
            K::Set(elements) => {
                let ty = self.go_type_of(e.meta.uid);
                if elements.is_empty() {
                    return GoExpression::Composite {
                        ty,
                        elements: Vec::new(),
                    };
                }
                let mut values = Vec::new();
                for element in elements {
                    values.push(self.expression(f, element));
                }
                datatypes(f, "NewSet", values)
            }
            K::Tuple(elements) => self.tuple(f, e, elements),
            K::SetRefinement {
                binding,
                from,
                predicate,
            } => {
                let set_type = self.go_type_of(e.meta.uid);
                self.filter_set(f, set_type, binding, from, predicate)
            }
            K::Choose {
                binding,
                from,
                predicate,
            } => {
                let set_type = GoType::slice(self.go_type_of(e.meta.uid));
                let candidates = self.filter_set(f, set_type, binding, from, predicate);
                datatypes(f, "Choose", vec![candidates])
            }
            K::SetComprehension { body, bounds } => self.set_comprehension(f, e, body, bounds),
            K::Function { bounds, body } => self.function_constructor(f, e, bounds, body),
            K::FunctionSubstitution { source, substitutions } => self.except(f, source, substitutions),
            K::SubstitutionAt => match f.at_values.last() {
                Some(value) => value.clone(),
                None => self.internal_error(f, e.location(), "EXCEPT の外に @ があります"),
            },
            K::Binary { operator, lhs, rhs } => self.binary(f, e, operator, lhs, rhs),
            K::Unary { operator, operand } => self.unary(f, e, operator, operand),
            K::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expression(f, condition);
                let result = f.builder.fresh("ifResult");
                f.builder.add(GoStatement::Var {
                    name: result.clone(),
                    ty: Some(self.go_type_of(e.meta.uid)),
                    value: None,
                });
                let result = GoExpression::identifier(result);
                f.builder.open();
                let value = self.expression(f, then);
                f.builder.add(GoStatement::assign(result.clone(), value));
                let then = f.builder.close();
                f.builder.open();
                let value = self.expression(f, otherwise);
                f.builder.add(GoStatement::assign(result.clone(), value));
                let otherwise = f.builder.close();
                f.builder.add(GoStatement::If {
                    condition,
                    then,
                    otherwise: Some(otherwise),
                });
                result
            }
            K::Quantified { kind, bounds, body } => self.quantified(f, *kind, bounds, body),
            K::Let { definitions, body } => {
                for definition in definitions {
                    self.let_definition(f, definition);
                }
                self.expression(f, body)
            }
            K::DefaultInit => zero_value(&self.go_type_of(e.meta.uid)),
            K::RecordSet(_) => self.unsupported(f, e.location(), "レコードの集合 [f : S]"),
            K::FunctionSet { .. } => self.unsupported(f, e.location(), "関数の集合 [S -> T]"),
            K::Fairness { .. } => self.unsupported(f, e.location(), "公平性条件 WF_/SF_"),
        }
    }

    /// 名前の参照または演算子の呼び出し
    fn reference(&mut self, f: &mut FunctionContext, e: &TlaExpression, args: &[TlaExpression]) -> GoExpression {
        let registry = self.registry;
        let Some((uid, definition)) = registry.resolved_definition(e.meta.uid) else {
            return self.internal_error(f, e.location(), format!("`{}` が解決されていません", e));
        };
        if let Some(bound) = f.bindings.get(&uid) {
            return bound.clone();
        }
        if let Some(operator) = f.let_operators.get(&uid).cloned() {
            return self.inline_operator(f, e, uid, &operator, args);
        }
        if f.resources.contains_key(&uid) || matches!(definition.kind, DefinitionKind::GlobalVariable) {
            return self.strategy.read_global_variable(f, uid, e.location());
        }
        match &definition.kind {
            DefinitionKind::Constant => GoExpression::identifier(self.package_name(uid)),
            DefinitionKind::Operator { .. } => match registry.operator(uid) {
                Some(operator) if self.inline_operators.contains(&uid) => {
                    self.inline_operator(f, e, uid, operator, args)
                }
                Some(_) => {
                    let mut values = Vec::new();
                    for arg in args {
                        values.push(self.expression(f, arg));
                    }
                    GoExpression::call(self.package_name(uid), values)
                }
                None => self.internal_error(f, e.location(), format!("演算子 `{}` の定義がありません", definition.name)),
            },
            DefinitionKind::Builtin(builtin) => self.builtin(f, e, *builtin, args),
            DefinitionKind::OperatorParameter { arity } if *arity > 0 => {
                self.unsupported(f, e.location(), format!("演算子引数 {} の呼び出し", definition.name))
            }
            DefinitionKind::TlaVariable => {
                self.unsupported(f, e.location(), format!("モジュール変数 {} の参照", definition.name))
            }
            DefinitionKind::ModuleInstance => {
                self.unsupported(f, e.location(), format!("インスタンス {} の参照", definition.name))
            }
            _ => self.internal_error(f, e.location(), format!("`{}` に値が束縛されていません", definition.name)),
        }
    }

    /// 演算子の本体を呼び出し位置で展開する
    fn inline_operator(
        &mut self,
        f: &mut FunctionContext,
        e: &TlaExpression,
        uid: Uid,
        operator: &OperatorDefinition,
        args: &[TlaExpression],
    ) -> GoExpression {
        if f.inlining.contains(&uid) {
            return self.unsupported(f, e.location(), format!("再帰する演算子 {}", operator.name.id));
        }
        if operator.args.iter().any(|arg| arg.arity > 0) {
            return self.unsupported(f, e.location(), format!("演算子を引数に取る演算子 {}", operator.name.id));
        }
        let mut previous = Vec::new();
        for (param, arg) in operator.args.iter().zip(args) {
            let value = self.expression(f, arg);
            let value = if is_simple(&value) {
                value
            } else {
                f.unused_temp(&param.name.id, value)
            };
            previous.push((param.name.meta.uid, f.bindings.insert(param.name.meta.uid, value)));
        }
        f.inlining.push(uid);
        let result = self.expression(f, &operator.body);
        f.inlining.pop();
        for (param, old) in previous.into_iter().rev() {
            match old {
                Some(value) => f.bindings.insert(param, value),
                None => f.bindings.remove(&param),
            };
        }
        result
    }

    fn builtin(
        &mut self,
        f: &mut FunctionContext,
        e: &TlaExpression,
        builtin: Builtin,
        args: &[TlaExpression],
    ) -> GoExpression {
        match builtin {
            Builtin::Nat | Builtin::Int => {
                return self.unsupported(f, e.location(), format!("無限集合 {} の値", builtin.name()))
            }
            Builtin::Seq => return self.unsupported(f, e.location(), "Seq(S)"),
            Builtin::Boolean => {
                return GoExpression::Composite {
                    ty: GoType::slice(GoType::bool()),
                    elements: vec![GoExpression::boolean(false), GoExpression::boolean(true)],
                }
            }
            _ => {}
        }
        let mut values = Vec::new();
        for arg in args {
            values.push(self.expression(f, arg));
        }
        match (builtin, values.as_slice()) {
            (Builtin::Len, [s]) | (Builtin::Cardinality, [s]) => GoExpression::call("len", vec![s.clone()]),
            (Builtin::Append, [s, x]) => datatypes(f, "SeqAppend", vec![s.clone(), x.clone()]),
            (Builtin::Head, [s]) => GoExpression::index(s.clone(), GoExpression::literal("0")),
            (Builtin::Tail, [s]) => datatypes(f, "SeqTail", vec![s.clone()]),
            (Builtin::SubSeq, [s, m, n]) => datatypes(f, "SeqSubSeq", vec![s.clone(), m.clone(), n.clone()]),
            (Builtin::IsFiniteSet, [s]) => {
                if !is_simple(s) {
                    f.builder
                        .add(GoStatement::assign(GoExpression::identifier("_"), s.clone()));
                }
                GoExpression::boolean(true)
            }
            (Builtin::ToString, [x]) => {
                f.builder.import("fmt");
                GoExpression::call("fmt.Sprint", vec![x.clone()])
            }
            (Builtin::Print, [value, result]) => {
                f.builder.import("fmt");
                f.builder
                    .add(GoStatement::expression(GoExpression::call("fmt.Println", vec![value.clone()])));
                result.clone()
            }
            (Builtin::Assert, [condition, message]) => {
                f.builder.add(GoStatement::If {
                    condition: GoExpression::not(condition.clone()),
                    then: vec![GoStatement::expression(GoExpression::call("panic", vec![message.clone()]))],
                    otherwise: None,
                });
                GoExpression::boolean(true)
            }
            _ => self.internal_error(
                f,
                e.location(),
                format!("{} の引数の数が合いません", builtin.name()),
            ),
        }
    }

    fn tuple(&mut self, f: &mut FunctionContext, e: &TlaExpression, elements: &[TlaExpression]) -> GoExpression {
        let ty = self.type_of(e.meta.uid);
        let mut values = Vec::new();
        for element in elements {
            values.push(self.expression(f, element));
        }
        match ty {
            Type::Tuple(_) => GoExpression::Keyed {
                ty: go_type(&ty),
                entries: values
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| (GoExpression::identifier(tuple_field(i)), value))
                    .collect(),
            },
            _ => GoExpression::Composite {
                ty: go_type(&ty),
                elements: values,
            },
        }
    }

    /// 多引数の関数適用では引数をタプルにまとめてキーにする
    fn key(&mut self, f: &mut FunctionContext, args: &[TlaExpression], key_type: &Type) -> GoExpression {
        if let [arg] = args {
            return self.expression(f, arg);
        }
        let mut entries = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let value = self.expression(f, arg);
            entries.push((GoExpression::identifier(tuple_field(i)), value));
        }
        GoExpression::Keyed {
            ty: go_type(key_type),
            entries,
        }
    }

    /// 経路の各段を値の型に照らして解決する。添字の式はここで一度だけ評価する
    pub(crate) fn resolve_path(
        &mut self,
        f: &mut FunctionContext,
        root: &Type,
        steps: &[PathStep<'_>],
        location: &SourceLocation,
    ) -> Option<Vec<ResolvedStep>> {
        let mut container = root.clone();
        let mut resolved = Vec::new();
        for step in steps {
            let (next, next_type) = match (step, &container) {
                (PathStep::Index(args), Type::Map(key, value)) => {
                    let key = self.key(f, args, key);
                    (ResolvedStep::MapKey(self.simple(f, "key", key)), (**value).clone())
                }
                (PathStep::Index([index]), Type::Seq(element)) => {
                    let index = self.expression(f, index);
                    (ResolvedStep::SeqIndex(self.simple(f, "index", index)), (**element).clone())
                }
                (
                    PathStep::Index(
                        [TlaExpression {
                            kind: TlaExpressionKind::Number(text),
                            ..
                        }],
                    ),
                    Type::Tuple(elements),
                ) => match text.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= elements.len() => {
                        (ResolvedStep::Field(tuple_field(n - 1)), elements[n - 1].clone())
                    }
                    _ => {
                        self.unsupported(f, location, format!("タプルの範囲外の添字 {}", text));
                        return None;
                    }
                },
                (PathStep::Field(name), Type::Record { fields, .. }) => match fields.get(*name) {
                    Some(ty) => (ResolvedStep::Field(field_name(name)), ty.clone()),
                    None => {
                        self.internal_error(f, location, format!("レコードにフィールド {} がありません", name));
                        return None;
                    }
                },
                (_, other) => {
                    self.unsupported(f, location, format!("型 {} の値への添字アクセス", other));
                    return None;
                }
            };
            resolved.push(next);
            container = next_type;
        }
        Some(resolved)
    }

    fn except(
        &mut self,
        f: &mut FunctionContext,
        source: &TlaExpression,
        substitutions: &[FunctionSubstitutionPair],
    ) -> GoExpression {
        let ty = self.type_of(source.meta.uid);
        let value = self.expression(f, source);
        let current = GoExpression::identifier(f.builder.fresh("updated"));
        f.builder.add(GoStatement::Assign {
            lhs: vec![current.clone()],
            rhs: vec![value],
            define: true,
        });
        for pair in substitutions {
            let steps: Vec<PathStep<'_>> = pair.keys.iter().map(PathStep::from_key).collect();
            let Some(resolved) = self.resolve_path(f, &ty, &steps, &pair.meta.location) else {
                continue;
            };
            f.at_values.push(access_path(current.clone(), &resolved));
            let value = self.expression(f, &pair.value);
            f.at_values.pop();
            let updated = update_path(f, current.clone(), &resolved, value);
            f.builder.add(GoStatement::assign(current.clone(), updated));
        }
        current
    }

    fn binary(
        &mut self,
        f: &mut FunctionContext,
        e: &TlaExpression,
        operator: &str,
        lhs: &TlaExpression,
        rhs: &TlaExpression,
    ) -> GoExpression {
        match operator {
            "/\\" | "\\land" => {
                let l = self.expression(f, lhs);
                return self.short_circuit(f, l, rhs, true);
            }
            "\\/" | "\\lor" => {
                let l = self.expression(f, lhs);
                return self.short_circuit(f, l, rhs, false);
            }
            "=>" => {
                let l = self.expression(f, lhs);
                return self.short_circuit(f, GoExpression::not(l), rhs, false);
            }
            "\\in" => return self.membership(f, lhs, rhs),
            "\\notin" => {
                let member = self.membership(f, lhs, rhs);
                return GoExpression::not(member);
            }
            _ => {}
        }
        let operand_type = self.type_of(lhs.meta.uid);
        let l = self.expression(f, lhs);
        let r = self.expression(f, rhs);
        match operator {
            "+" | "-" | "*" | "/" | "<" | ">" => GoExpression::binary(operator, l, r),
            "\\div" => GoExpression::binary("/", l, r),
            "<=" | "=<" | "\\leq" => GoExpression::binary("<=", l, r),
            ">=" | "\\geq" => GoExpression::binary(">=", l, r),
            "%" => {
                // TLA+ の剰余は常に非負
                let r = self.simple(f, "divisor", r);
                GoExpression::binary(
                    "%",
                    GoExpression::binary("+", GoExpression::binary("%", l, r.clone()), r.clone()),
                    r,
                )
            }
            "^" if operand_type == Type::Real => {
                f.builder.import("math");
                GoExpression::call("math.Pow", vec![l, r])
            }
            "^" => datatypes(f, "IntPow", vec![l, r]),
            "=" | "<=>" | "\\equiv" => self.equality(f, &operand_type, l, r, false),
            "#" | "/=" => self.equality(f, &operand_type, l, r, true),
            "\\subseteq" => datatypes(f, "SetIsSubset", vec![l, r]),
            "\\supseteq" => datatypes(f, "SetIsSubset", vec![r, l]),
            "\\subset" => self.proper_subset(f, l, r),
            "\\supset" => self.proper_subset(f, r, l),
            "\\cup" | "\\union" => datatypes(f, "SetUnion", vec![l, r]),
            "\\cap" | "\\intersect" => datatypes(f, "SetIntersection", vec![l, r]),
            "\\" => datatypes(f, "SetDifference", vec![l, r]),
            ".." => datatypes(f, "Range", vec![l, r]),
            "\\o" => datatypes(f, "SeqConcat", vec![l, r]),
            ":>" => GoExpression::Keyed {
                ty: self.go_type_of(e.meta.uid),
                entries: vec![(l, r)],
            },
            "@@" => datatypes(f, "MapMerge", vec![l, r]),
            other => self.unsupported(f, e.location(), format!("演算子 {}", other)),
        }
    }

    fn equality(
        &mut self,
        f: &mut FunctionContext,
        operand_type: &Type,
        l: GoExpression,
        r: GoExpression,
        negate: bool,
    ) -> GoExpression {
        if go_type(operand_type).is_basic() {
            return GoExpression::binary(if negate { "!=" } else { "==" }, l, r);
        }
        f.builder.import("reflect");
        let equal = GoExpression::call("reflect.DeepEqual", vec![l, r]);
        if negate {
            GoExpression::not(equal)
        } else {
            equal
        }
    }

    fn proper_subset(&mut self, f: &mut FunctionContext, l: GoExpression, r: GoExpression) -> GoExpression {
        let l = self.simple(f, "subset", l);
        let r = self.simple(f, "superset", r);
        let subset = datatypes(f, "SetIsSubset", vec![l.clone(), r.clone()]);
        GoExpression::binary(
            "&&",
            subset,
            GoExpression::binary(
                "<",
                GoExpression::call("len", vec![l]),
                GoExpression::call("len", vec![r]),
            ),
        )
    }

    /// 右辺が文を前置きするなら、左辺の結果を見てから評価する
    fn short_circuit(
        &mut self,
        f: &mut FunctionContext,
        l: GoExpression,
        rhs: &TlaExpression,
        conjunction: bool,
    ) -> GoExpression {
        f.builder.open();
        let r = self.expression(f, rhs);
        let mut hoisted = f.builder.close();
        if hoisted.is_empty() {
            return GoExpression::binary(if conjunction { "&&" } else { "||" }, l, r);
        }
        let result = GoExpression::identifier(f.builder.fresh("cond"));
        f.builder.add(GoStatement::Assign {
            lhs: vec![result.clone()],
            rhs: vec![l],
            define: true,
        });
        hoisted.push(GoStatement::assign(result.clone(), r));
        f.builder.add(GoStatement::If {
            condition: if conjunction {
                result.clone()
            } else {
                GoExpression::not(result.clone())
            },
            then: hoisted,
            otherwise: None,
        });
        result
    }

    fn membership(&mut self, f: &mut FunctionContext, lhs: &TlaExpression, rhs: &TlaExpression) -> GoExpression {
        let registry = self.registry;
        if let Some((_, definition)) = registry.resolved_definition(rhs.meta.uid) {
            match definition.kind {
                DefinitionKind::Builtin(Builtin::Nat) => {
                    let x = self.expression(f, lhs);
                    return GoExpression::binary(">=", x, GoExpression::literal("0"));
                }
                DefinitionKind::Builtin(Builtin::Int) | DefinitionKind::Builtin(Builtin::Boolean) => {
                    return GoExpression::boolean(true)
                }
                _ => {}
            }
        }
        if let TlaExpressionKind::Binary {
            operator,
            lhs: low,
            rhs: high,
        } = &rhs.kind
        {
            if operator == ".." {
                let x = self.expression(f, lhs);
                let x = self.simple(f, "element", x);
                let low = self.expression(f, low);
                let high = self.expression(f, high);
                return GoExpression::binary(
                    "&&",
                    GoExpression::binary(">=", x.clone(), low),
                    GoExpression::binary("<=", x, high),
                );
            }
        }
        let x = self.expression(f, lhs);
        let set = self.expression(f, rhs);
        datatypes(f, "SetContains", vec![set, x])
    }

    fn unary(
        &mut self,
        f: &mut FunctionContext,
        e: &TlaExpression,
        operator: &str,
        operand: &TlaExpression,
    ) -> GoExpression {
        match operator {
            "~" | "\\lnot" | "\\neg" => {
                let value = self.expression(f, operand);
                GoExpression::not(value)
            }
            "-" => {
                let value = self.expression(f, operand);
                GoExpression::unary("-", value)
            }
            "DOMAIN" => {
                let ty = self.type_of(operand.meta.uid);
                let value = self.expression(f, operand);
                match ty {
                    Type::Map(..) => datatypes(f, "MapDomain", vec![value]),
                    Type::Seq(_) => {
                        let value = self.simple(f, "sequence", value);
                        let length = GoExpression::call("len", vec![value]);
                        datatypes(f, "Range", vec![GoExpression::literal("1"), length])
                    }
                    Type::Tuple(elements) => datatypes(
                        f,
                        "Range",
                        vec![GoExpression::literal("1"), GoExpression::literal(elements.len().to_string())],
                    ),
                    other => self.unsupported(f, e.location(), format!("型 {} の DOMAIN", other)),
                }
            }
            other => self.unsupported(f, e.location(), format!("演算子 {}", other)),
        }
    }

    fn let_definition(&mut self, f: &mut FunctionContext, unit: &TlaUnit) {
        match unit {
            TlaUnit::Operator(operator) if operator.args.is_empty() => {
                let value = self.expression(f, &operator.body);
                let value = f.unused_temp(&operator.name.id, value);
                f.bindings.insert(operator.name.meta.uid, value);
            }
            TlaUnit::Operator(operator) => {
                f.let_operators.insert(operator.name.meta.uid, operator.clone());
            }
            TlaUnit::Function(function) => {
                let value = self.expression(f, &function.function);
                let value = f.unused_temp(&function.name.id, value);
                f.bindings.insert(function.name.meta.uid, value);
            }
            other => {
                self.unsupported(f, &other.meta().location, "LET 内のこの定義");
            }
        }
    }

    fn pattern_levels(pattern: &BoundPattern, target: GoExpression) -> Vec<LoopLevel> {
        match pattern {
            BoundPattern::Ids(ids) => ids
                .iter()
                .map(|id| LoopLevel {
                    target: target.clone(),
                    ids: vec![(id.meta.uid, id.id.clone())],
                    destructure: false,
                })
                .collect(),
            BoundPattern::Tuple(ids) => vec![LoopLevel {
                target,
                ids: ids.iter().map(|id| (id.meta.uid, id.id.clone())).collect(),
                destructure: true,
            }],
        }
    }

    /// 束縛の集合を先に評価してループの段を作る
    fn loop_levels(&mut self, f: &mut FunctionContext, bounds: &[QuantifierBound]) -> Vec<LoopLevel> {
        let mut levels = Vec::new();
        for bound in bounds {
            let set = self.expression(f, &bound.set);
            let target = self.simple(f, "domain", set);
            levels.extend(Self::pattern_levels(&bound.pattern, target));
        }
        levels
    }

    /// 入れ子の `for range` を組み、最も内側で `inner` を呼ぶ
    ///
    /// `guard` が真になったら各段の先頭で抜ける。
    fn loops(
        &mut self,
        f: &mut FunctionContext,
        levels: &[LoopLevel],
        guard: Option<&GoExpression>,
        elements: &mut Vec<GoExpression>,
        inner: &mut LoopBody<'_, 'a>,
    ) {
        let Some((level, rest)) = levels.split_first() else {
            inner(self, f, elements);
            return;
        };
        let base = match (level.destructure, level.ids.first()) {
            (false, Some((_, name))) => name.as_str(),
            _ => "tuple",
        };
        let element = f.builder.fresh(base);
        let element_expression = GoExpression::identifier(element.clone());
        f.builder.open();
        if let Some(guard) = guard {
            f.builder.add(GoStatement::If {
                condition: guard.clone(),
                then: vec![GoStatement::Break],
                otherwise: None,
            });
        }
        f.builder.add(GoStatement::assign(
            GoExpression::identifier("_"),
            element_expression.clone(),
        ));
        if level.destructure {
            for (i, (uid, name)) in level.ids.iter().enumerate() {
                let part = f.unused_temp(
                    name,
                    GoExpression::selector(element_expression.clone(), tuple_field(i)),
                );
                f.bindings.insert(*uid, part);
            }
        } else if let Some((uid, _)) = level.ids.first() {
            f.bindings.insert(*uid, element_expression.clone());
        }
        elements.push(element_expression);
        self.loops(f, rest, guard, elements, inner);
        elements.pop();
        let body = f.builder.close();
        f.builder.add(GoStatement::ForRange {
            key: None,
            value: Some(element),
            target: level.target.clone(),
            body,
        });
    }

    fn quantified(
        &mut self,
        f: &mut FunctionContext,
        kind: QuantifierKind,
        bounds: &[QuantifierBound],
        body: &TlaExpression,
    ) -> GoExpression {
        let universal = kind == QuantifierKind::Universal;
        let levels = self.loop_levels(f, bounds);
        let result = GoExpression::identifier(f.builder.fresh(if universal { "forAll" } else { "exists" }));
        f.builder.add(GoStatement::Assign {
            lhs: vec![result.clone()],
            rhs: vec![GoExpression::boolean(universal)],
            define: true,
        });
        let guard = if universal {
            GoExpression::not(result.clone())
        } else {
            result.clone()
        };
        let target = result.clone();
        self.loops(
            f,
            &levels,
            Some(&guard),
            &mut Vec::new(),
            &mut |g: &mut CodeGenerator<'a>, f: &mut FunctionContext, _: &[GoExpression]| {
                let value = g.expression(f, body);
                let condition = if universal { GoExpression::not(value) } else { value };
                f.builder.add(GoStatement::If {
                    condition,
                    then: vec![GoStatement::assign(target.clone(), GoExpression::boolean(!universal))],
                    otherwise: None,
                });
            },
        );
        result
    }

    /// `{x \in S : P}` と `CHOOSE` の候補。整列済みの集合を順に絞り込むので結果も整列済み
    fn filter_set(
        &mut self,
        f: &mut FunctionContext,
        set_type: GoType,
        binding: &BoundPattern,
        from: &TlaExpression,
        predicate: &TlaExpression,
    ) -> GoExpression {
        let source = self.expression(f, from);
        let source = self.simple(f, "domain", source);
        let mut levels = Self::pattern_levels(binding, source);
        levels.truncate(1);
        let filtered = f.temp(
            "filtered",
            GoExpression::Composite {
                ty: set_type,
                elements: Vec::new(),
            },
        );
        let target = filtered.clone();
        self.loops(
            f,
            &levels,
            None,
            &mut Vec::new(),
            &mut |g: &mut CodeGenerator<'a>, f: &mut FunctionContext, elements: &[GoExpression]| {
                let keep = g.expression(f, predicate);
                if let Some(element) = elements.first() {
                    f.builder.add(GoStatement::If {
                        condition: keep,
                        then: vec![GoStatement::assign(
                            target.clone(),
                            GoExpression::call("append", vec![target.clone(), element.clone()]),
                        )],
                        otherwise: None,
                    });
                }
            },
        );
        filtered
    }

    /// `{e : x \in S}`。集めた値は `NewSet` で整列し重複を除く
    fn set_comprehension(
        &mut self,
        f: &mut FunctionContext,
        e: &TlaExpression,
        body: &TlaExpression,
        bounds: &[QuantifierBound],
    ) -> GoExpression {
        let set_type = self.go_type_of(e.meta.uid);
        let levels = self.loop_levels(f, bounds);
        let image = f.temp(
            "image",
            GoExpression::Composite {
                ty: set_type,
                elements: Vec::new(),
            },
        );
        let target = image.clone();
        self.loops(
            f,
            &levels,
            None,
            &mut Vec::new(),
            &mut |g: &mut CodeGenerator<'a>, f: &mut FunctionContext, _: &[GoExpression]| {
                let value = g.expression(f, body);
                f.builder.add(GoStatement::assign(
                    target.clone(),
                    GoExpression::call("append", vec![target.clone(), value]),
                ));
            },
        );
        f.builder.import(DATATYPES);
        GoExpression::Call {
            function: Box::new(GoExpression::identifier("datatypes.NewSet")),
            args: vec![image],
            ellipsis: true,
        }
    }

    /// `[x \in S |-> e]`
    fn function_constructor(
        &mut self,
        f: &mut FunctionContext,
        e: &TlaExpression,
        bounds: &[QuantifierBound],
        body: &TlaExpression,
    ) -> GoExpression {
        let ty = self.type_of(e.meta.uid);
        let Type::Map(key, _) = &ty else {
            return self.internal_error(f, e.location(), format!("関数の型が {} になっています", ty));
        };
        let key_type = go_type(key);
        let levels = self.loop_levels(f, bounds);
        let function = f.temp(
            "function",
            GoExpression::call("make", vec![GoExpression::Type(go_type(&ty))]),
        );
        let target = function.clone();
        self.loops(
            f,
            &levels,
            None,
            &mut Vec::new(),
            &mut |g: &mut CodeGenerator<'a>, f: &mut FunctionContext, elements: &[GoExpression]| {
                let value = g.expression(f, body);
                let key = match elements {
                    [element] => element.clone(),
                    _ => GoExpression::Keyed {
                        ty: key_type.clone(),
                        entries: elements
                            .iter()
                            .enumerate()
                            .map(|(i, element)| (GoExpression::identifier(tuple_field(i)), element.clone()))
                            .collect(),
                    },
                };
                f.builder
                    .add(GoStatement::assign(GoExpression::index(target.clone(), key), value));
            },
        );
        function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::go::printer::print_expression;
    use crate::backend::go::NameCleaner;
    use crate::backend::codegen::ErrorExit;

    #[test]
    fn test_minus_one_folds_literals() {
        assert_eq!(minus_one(GoExpression::literal("3")), GoExpression::literal("2"));
        assert_eq!(
            print_expression(&minus_one(GoExpression::identifier("i"))),
            "i - 1"
        );
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(print_expression(&zero_value(&GoType::int())), "0");
        assert_eq!(print_expression(&zero_value(&GoType::string())), "\"\"");
        assert_eq!(
            print_expression(&zero_value(&GoType::slice(GoType::int()))),
            "*new([]int)"
        );
    }

    #[test]
    fn test_access_path_adjusts_sequence_indices() {
        let steps = vec![
            ResolvedStep::MapKey(GoExpression::identifier("k")),
            ResolvedStep::SeqIndex(GoExpression::literal("1")),
            ResolvedStep::Field("value".to_string()),
        ];
        assert_eq!(
            print_expression(&access_path(GoExpression::identifier("f"), &steps)),
            "f[k][0].value"
        );
    }

    #[test]
    fn test_update_path_copies_structs_and_uses_persistent_updates() {
        let mut f = FunctionContext::new(NameCleaner::new(), ErrorExit::Panic);
        let steps = vec![
            ResolvedStep::MapKey(GoExpression::identifier("k")),
            ResolvedStep::Field("count".to_string()),
        ];
        let updated = update_path(
            &mut f,
            GoExpression::identifier("f"),
            &steps,
            GoExpression::literal("1"),
        );
        assert_eq!(print_expression(&updated), "datatypes.MapSet(f, k, record)");
        assert!(f.builder.imports().contains(DATATYPES));
        let (body, _) = f.builder.finish();
        assert_eq!(body.len(), 2);
        assert_eq!(
            body[1],
            GoStatement::assign(
                GoExpression::selector(GoExpression::identifier("record"), "count"),
                GoExpression::literal("1"),
            )
        );
    }
}
