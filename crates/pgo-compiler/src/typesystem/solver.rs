//! # 単一化ソルバー
//!
//! 型変数から型への代入を保持し、等式制約を即座に単一化します。
//! `f[x]` のように関数側の形が決まるまで判断できない制約は保留され、
//! 全体の走査が終わってから [`Solver::solve`] でまとめて解かれます。

use std::collections::{BTreeMap, HashMap};

use crate::frontend::error::SourceLocation;

use super::types::{Type, TypeVariable};

/// 単一化の失敗
#[derive(Debug, Clone, PartialEq)]
pub enum UnifyError {
    Mismatch { expected: Type, actual: Type },
    Occurs { variable: TypeVariable, ty: Type },
}

/// 保留中の制約
#[derive(Debug, Clone)]
pub enum Deferred {
    /// `callee[args]` の結果が `result`。`index` はリテラルの添字
    Callable {
        callee: Type,
        args: Vec<Type>,
        index: Option<usize>,
        result: Type,
        origin: SourceLocation,
    },
    /// `DOMAIN function` の結果が `result`
    Domain {
        function: Type,
        result: Type,
        origin: SourceLocation,
    },
    /// `<<e1, ..., en>>` はタプルか列のどちらか
    TupleOrSeq {
        ty: Type,
        elements: Vec<Type>,
        origin: SourceLocation,
    },
}

impl Deferred {
    fn origin(&self) -> &SourceLocation {
        match self {
            Deferred::Callable { origin, .. }
            | Deferred::Domain { origin, .. }
            | Deferred::TupleOrSeq { origin, .. } => origin,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Solver {
    next_variable: u32,
    substitution: HashMap<u32, Type>,
    deferred: Vec<Deferred>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_variable(&mut self, numeric: bool) -> TypeVariable {
        let id = self.next_variable;
        self.next_variable += 1;
        TypeVariable { id, numeric }
    }

    /// 新しい型変数
    pub fn fresh(&mut self) -> Type {
        Type::Variable(self.fresh_variable(false))
    }

    /// `Int` か `Real` に決まる数値型変数
    pub fn fresh_number(&mut self) -> Type {
        Type::Variable(self.fresh_variable(true))
    }

    /// 開いたレコードの残り部分に使う型変数
    pub fn fresh_row(&mut self) -> TypeVariable {
        self.fresh_variable(false)
    }

    pub fn defer(&mut self, constraint: Deferred) {
        self.deferred.push(constraint);
    }

    fn is_bound(&self, variable: TypeVariable) -> bool {
        self.substitution.contains_key(&variable.id)
    }

    /// 開いたレコードの残り部分を、束縛されている限りたどって併合する
    fn flatten_record(&self, mut fields: BTreeMap<String, Type>, mut rest: Option<TypeVariable>) -> Type {
        while let Some(variable) = rest {
            match self.substitution.get(&variable.id) {
                Some(Type::Record {
                    fields: more,
                    rest: next,
                }) => {
                    for (name, ty) in more {
                        fields.entry(name.clone()).or_insert_with(|| ty.clone());
                    }
                    rest = *next;
                }
                Some(Type::Variable(next)) => rest = Some(*next),
                _ => break,
            }
        }
        Type::Record { fields, rest }
    }

    /// 最上位の束縛だけをたどる
    pub fn shallow(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        while let Type::Variable(variable) = &current {
            match self.substitution.get(&variable.id) {
                Some(bound) => current = bound.clone(),
                None => break,
            }
        }
        match current {
            Type::Record { fields, rest } => self.flatten_record(fields, rest),
            other => other,
        }
    }

    /// 代入を深く適用する
    pub fn resolve(&self, ty: &Type) -> Type {
        match self.shallow(ty) {
            Type::Set(inner) => Type::set(self.resolve(&inner)),
            Type::Seq(inner) => Type::seq(self.resolve(&inner)),
            Type::Map(key, value) => Type::map(self.resolve(&key), self.resolve(&value)),
            Type::Operator { params, result } => {
                Type::operator(params.iter().map(|p| self.resolve(p)).collect(), self.resolve(&result))
            }
            Type::Record { fields, rest } => Type::Record {
                fields: fields.iter().map(|(name, ty)| (name.clone(), self.resolve(ty))).collect(),
                rest,
            },
            Type::Tuple(elements) => Type::Tuple(elements.iter().map(|e| self.resolve(e)).collect()),
            other => other,
        }
    }

    fn mismatch(&self, expected: &Type, actual: &Type) -> UnifyError {
        UnifyError::Mismatch {
            expected: self.resolve(expected),
            actual: self.resolve(actual),
        }
    }

    fn bind(&mut self, variable: TypeVariable, ty: &Type) -> Result<(), UnifyError> {
        if variable.numeric && !matches!(ty, Type::Int | Type::Real | Type::Variable(_)) {
            return Err(UnifyError::Mismatch {
                expected: Type::Variable(variable),
                actual: self.resolve(ty),
            });
        }
        let resolved = self.resolve(ty);
        let mut occurs = false;
        resolved.for_each_variable(&mut |v| occurs |= v.id == variable.id);
        if occurs {
            return Err(UnifyError::Occurs { variable, ty: resolved });
        }
        self.substitution.insert(variable.id, ty.clone());
        Ok(())
    }

    /// `expected` と `actual` を等しくする
    pub fn unify(&mut self, expected: &Type, actual: &Type) -> Result<(), UnifyError> {
        let a = self.shallow(expected);
        let b = self.shallow(actual);
        match (&a, &b) {
            (Type::Variable(x), Type::Variable(y)) if x.id == y.id => Ok(()),
            (Type::Variable(x), Type::Variable(y)) => {
                if x.numeric && !y.numeric {
                    self.bind(*y, &a)
                } else {
                    self.bind(*x, &b)
                }
            }
            (Type::Variable(x), _) => self.bind(*x, &b),
            (_, Type::Variable(_)) => self.unify(&b, &a).map_err(|e| match e {
                UnifyError::Mismatch { expected, actual } => UnifyError::Mismatch {
                    expected: actual,
                    actual: expected,
                },
                occurs => occurs,
            }),
            (Type::Bool, Type::Bool) | (Type::Int, Type::Int) | (Type::Real, Type::Real) | (Type::String, Type::String) => {
                Ok(())
            }
            (Type::Set(x), Type::Set(y)) | (Type::Seq(x), Type::Seq(y)) => self.unify(x, y).map_err(|e| match e {
                UnifyError::Mismatch { .. } => self.mismatch(&a, &b),
                occurs => occurs,
            }),
            (Type::Map(k1, v1), Type::Map(k2, v2)) => {
                self.unify(k1, k2)?;
                self.unify(v1, v2)
            }
            (
                Type::Operator {
                    params: p1,
                    result: r1,
                },
                Type::Operator {
                    params: p2,
                    result: r2,
                },
            ) if p1.len() == p2.len() => {
                for (x, y) in p1.iter().zip(p2) {
                    self.unify(x, y)?;
                }
                self.unify(r1, r2)
            }
            (Type::Tuple(x), Type::Tuple(y)) if x.len() == y.len() => {
                for (x, y) in x.iter().zip(y) {
                    self.unify(x, y)?;
                }
                Ok(())
            }
            (
                Type::Record {
                    fields: f1,
                    rest: r1,
                },
                Type::Record {
                    fields: f2,
                    rest: r2,
                },
            ) => self.unify_records(f1, *r1, f2, *r2).map_err(|e| match e {
                UnifyError::Mismatch { .. } => self.mismatch(&a, &b),
                occurs => occurs,
            }),
            _ => Err(self.mismatch(&a, &b)),
        }
    }

    fn unify_records(
        &mut self,
        f1: &BTreeMap<String, Type>,
        r1: Option<TypeVariable>,
        f2: &BTreeMap<String, Type>,
        r2: Option<TypeVariable>,
    ) -> Result<(), UnifyError> {
        for (name, t1) in f1 {
            if let Some(t2) = f2.get(name) {
                self.unify(t1, t2)?;
            }
        }
        let only1: BTreeMap<String, Type> = f1
            .iter()
            .filter(|(name, _)| !f2.contains_key(*name))
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        let only2: BTreeMap<String, Type> = f2
            .iter()
            .filter(|(name, _)| !f1.contains_key(*name))
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        let closed_mismatch = || UnifyError::Mismatch {
            expected: Type::record(f1.clone()),
            actual: Type::record(f2.clone()),
        };
        match (r1, r2) {
            (None, None) if only1.is_empty() && only2.is_empty() => Ok(()),
            (None, None) => Err(closed_mismatch()),
            (Some(r), None) if only1.is_empty() => self.bind(r, &Type::record(only2)),
            (None, Some(r)) if only2.is_empty() => self.bind(r, &Type::record(only1)),
            (Some(_), None) | (None, Some(_)) => Err(closed_mismatch()),
            (Some(x), Some(y)) if x.id == y.id => {
                if only1.is_empty() && only2.is_empty() {
                    Ok(())
                } else {
                    Err(closed_mismatch())
                }
            }
            (Some(x), Some(y)) => {
                let shared = self.fresh_variable(false);
                self.bind(
                    x,
                    &Type::Record {
                        fields: only2,
                        rest: Some(shared),
                    },
                )?;
                self.bind(
                    y,
                    &Type::Record {
                        fields: only1,
                        rest: Some(shared),
                    },
                )
            }
        }
    }

    fn key_type(args: &[Type]) -> Type {
        if args.len() == 1 {
            args[0].clone()
        } else {
            Type::Tuple(args.to_vec())
        }
    }

    /// 保留制約を1つ進める。`force` なら形が未定でも既定の解釈で決める
    fn step(&mut self, constraint: &Deferred, force: bool) -> Result<bool, UnifyError> {
        match constraint {
            Deferred::Callable {
                callee,
                args,
                index,
                result,
                ..
            } => match self.shallow(callee) {
                Type::Map(key, value) => {
                    self.unify(&key, &Self::key_type(args))?;
                    self.unify(&value, result)?;
                    Ok(true)
                }
                Type::Seq(element) if args.len() == 1 => {
                    self.unify(&Type::Int, &args[0])?;
                    self.unify(&element, result)?;
                    Ok(true)
                }
                Type::Tuple(elements) if args.len() == 1 => {
                    self.unify(&Type::Int, &args[0])?;
                    match index {
                        Some(i) if *i >= 1 && *i <= elements.len() => self.unify(&elements[*i - 1], result)?,
                        _ => {
                            for element in &elements {
                                self.unify(element, result)?;
                            }
                        }
                    }
                    Ok(true)
                }
                Type::Variable(_) if !force => Ok(false),
                _ => {
                    let expected = Type::map(Self::key_type(args), result.clone());
                    self.unify(&expected, callee)?;
                    Ok(true)
                }
            },
            Deferred::Domain { function, result, .. } => match self.shallow(function) {
                Type::Map(key, _) => {
                    self.unify(result, &Type::Set(key))?;
                    Ok(true)
                }
                Type::Seq(_) | Type::Tuple(_) => {
                    self.unify(result, &Type::set(Type::Int))?;
                    Ok(true)
                }
                Type::Record { .. } => {
                    self.unify(result, &Type::set(Type::String))?;
                    Ok(true)
                }
                Type::Variable(_) if !force => Ok(false),
                _ => {
                    let key = self.fresh();
                    let value = self.fresh();
                    self.unify(&Type::map(key.clone(), value), function)?;
                    self.unify(result, &Type::set(key))?;
                    Ok(true)
                }
            },
            Deferred::TupleOrSeq { ty, elements, .. } => match self.shallow(ty) {
                Type::Seq(element) => {
                    for e in elements {
                        self.unify(&element, e)?;
                    }
                    Ok(true)
                }
                Type::Tuple(_) => {
                    self.unify(ty, &Type::Tuple(elements.clone()))?;
                    Ok(true)
                }
                Type::Variable(_) if !force => Ok(false),
                Type::Variable(_) => {
                    let snapshot = self.clone();
                    let element = match elements.first() {
                        Some(first) => first.clone(),
                        None => self.fresh(),
                    };
                    let uniform = elements.iter().skip(1).all(|e| self.unify(&element, e).is_ok());
                    if uniform {
                        self.unify(ty, &Type::seq(element))?;
                    } else {
                        *self = snapshot;
                        self.unify(ty, &Type::Tuple(elements.clone()))?;
                    }
                    Ok(true)
                }
                _ => {
                    self.unify(&Type::Tuple(elements.clone()), ty)?;
                    Ok(true)
                }
            },
        }
    }

    /// 保留制約を解く。失敗した制約はその発生位置とともに返す
    pub fn solve(&mut self) -> Vec<(SourceLocation, UnifyError)> {
        let mut errors = Vec::new();
        let mut pending = std::mem::take(&mut self.deferred);
        loop {
            let mut progressed = true;
            while progressed {
                progressed = false;
                let mut remaining = Vec::new();
                for constraint in pending {
                    match self.step(&constraint, false) {
                        Ok(true) => progressed = true,
                        Ok(false) => remaining.push(constraint),
                        Err(e) => {
                            progressed = true;
                            errors.push((constraint.origin().clone(), e));
                        }
                    }
                }
                pending = remaining;
                pending.append(&mut self.deferred);
            }
            if pending.is_empty() {
                break;
            }
            let constraint = pending.remove(0);
            if let Err(e) = self.step(&constraint, true) {
                errors.push((constraint.origin().clone(), e));
            }
            pending.append(&mut self.deferred);
        }
        errors
    }

    /// 未束縛の型変数に既定値を与える
    ///
    /// 数値型変数と通常の型変数は `Int` に、開いたレコードは閉じたレコードになります。
    pub fn apply_defaults(&mut self, ty: &Type) {
        let resolved = self.resolve(ty);
        self.default_resolved(&resolved);
    }

    fn default_resolved(&mut self, ty: &Type) {
        match ty {
            Type::Bool | Type::Int | Type::Real | Type::String => {}
            Type::Set(inner) | Type::Seq(inner) => self.default_resolved(inner),
            Type::Map(key, value) => {
                self.default_resolved(key);
                self.default_resolved(value);
            }
            Type::Operator { params, result } => {
                for param in params {
                    self.default_resolved(param);
                }
                self.default_resolved(result);
            }
            Type::Record { fields, rest } => {
                for field in fields.values() {
                    self.default_resolved(field);
                }
                if let Some(rest) = rest {
                    if !self.is_bound(*rest) {
                        self.substitution.insert(rest.id, Type::record(BTreeMap::new()));
                    }
                }
            }
            Type::Tuple(elements) => {
                for element in elements {
                    self.default_resolved(element);
                }
            }
            Type::Variable(variable) => {
                if !self.is_bound(*variable) {
                    self.substitution.insert(variable.id, Type::Int);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_record(solver: &mut Solver, field: &str, ty: Type) -> Type {
        let rest = solver.fresh_row();
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), ty);
        Type::Record {
            fields,
            rest: Some(rest),
        }
    }

    #[test]
    fn test_number_promotes_to_real_and_defaults_to_int() {
        let mut solver = Solver::new();
        let a = solver.fresh_number();
        let b = solver.fresh_number();
        solver.unify(&a, &Type::Real).unwrap();
        assert_eq!(solver.resolve(&a), Type::Real);
        solver.apply_defaults(&b);
        assert_eq!(solver.resolve(&b), Type::Int);
        assert!(solver.unify(&b, &Type::Real).is_err());
    }

    #[test]
    fn test_number_rejects_non_numeric() {
        let mut solver = Solver::new();
        let a = solver.fresh_number();
        assert!(matches!(
            solver.unify(&a, &Type::String),
            Err(UnifyError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_occurs_check() {
        let mut solver = Solver::new();
        let a = solver.fresh();
        let err = solver.unify(&a, &Type::set(a.clone())).unwrap_err();
        assert!(matches!(err, UnifyError::Occurs { .. }));
    }

    #[test]
    fn test_open_records_merge() {
        let mut solver = Solver::new();
        let r = solver.fresh();
        let with_a = open_record(&mut solver, "a", Type::Int);
        let with_b = open_record(&mut solver, "b", Type::Bool);
        solver.unify(&r, &with_a).unwrap();
        solver.unify(&r, &with_b).unwrap();
        solver.apply_defaults(&r);
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), Type::Int);
        expected.insert("b".to_string(), Type::Bool);
        assert_eq!(solver.resolve(&r), Type::record(expected));
    }

    #[test]
    fn test_closed_record_rejects_unknown_field() {
        let mut solver = Solver::new();
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), Type::Int);
        let closed = Type::record(fields);
        let access = open_record(&mut solver, "b", Type::Int);
        assert!(solver.unify(&closed, &access).is_err());
    }

    #[test]
    fn test_callable_waits_for_sequence_then_resolves() {
        let mut solver = Solver::new();
        let f = solver.fresh();
        let result = solver.fresh();
        let index = solver.fresh_number();
        solver.defer(Deferred::Callable {
            callee: f.clone(),
            args: vec![index.clone()],
            index: None,
            result: result.clone(),
            origin: SourceLocation::unknown(),
        });
        solver.unify(&f, &Type::seq(Type::String)).unwrap();
        assert!(solver.solve().is_empty());
        assert_eq!(solver.resolve(&result), Type::String);
        assert_eq!(solver.resolve(&index), Type::Int);
    }

    #[test]
    fn test_unknown_callable_defaults_to_map() {
        let mut solver = Solver::new();
        let f = solver.fresh();
        let result = solver.fresh();
        solver.defer(Deferred::Callable {
            callee: f.clone(),
            args: vec![Type::String],
            index: None,
            result: result.clone(),
            origin: SourceLocation::unknown(),
        });
        assert!(solver.solve().is_empty());
        solver.apply_defaults(&f);
        assert_eq!(solver.resolve(&f), Type::map(Type::String, Type::Int));
    }

    #[test]
    fn test_heterogeneous_tuple_literal() {
        let mut solver = Solver::new();
        let t = solver.fresh();
        solver.defer(Deferred::TupleOrSeq {
            ty: t.clone(),
            elements: vec![Type::Int, Type::String],
            origin: SourceLocation::unknown(),
        });
        assert!(solver.solve().is_empty());
        assert_eq!(solver.resolve(&t), Type::Tuple(vec![Type::Int, Type::String]));

        let s = solver.fresh();
        solver.defer(Deferred::TupleOrSeq {
            ty: s.clone(),
            elements: vec![Type::Int, Type::Int],
            origin: SourceLocation::unknown(),
        });
        assert!(solver.solve().is_empty());
        assert_eq!(solver.resolve(&s), Type::seq(Type::Int));
    }
}
