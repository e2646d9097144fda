//! # 型推論
//!
//! 名前解決済みの構文木を走査して制約を生成し、ソルバーで解きます。
//! 結果の [`TypeMap`] は、式の識別子と定義の識別子のそれぞれに
//! 型変数を含まない型を対応させます。
//!
//! 演算子定義は単相です。同じ演算子を異なる型で使うと `type-mismatch`
//! になります。組み込み演算子だけは参照ごとに新しい型変数で具体化されます。

use std::collections::{BTreeMap, HashMap};

use crate::frontend::ast::{
    Archetype, BoundPattern, OpDecl, PlusCalAlgorithm, Procedure, Processes, QuantifierBound, Statement,
    StatementKind, SubstitutionKey, TlaExpression, TlaExpressionKind, TlaUnit, VariableDeclaration,
};
use crate::frontend::error::{IssueContext, IssueKind, SourceLocation};
use crate::frontend::semantic::{Builtin, DefinitionKind, DefinitionRegistry};
use crate::frontend::uid::Uid;

use super::solver::{Deferred, Solver, UnifyError};
use super::types::{Type, TypeVariable};

/// 推論結果
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    types: HashMap<Uid, Type>,
}

impl TypeMap {
    pub fn get(&self, uid: Uid) -> Option<&Type> {
        self.types.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Uid, &Type)> + '_ {
        self.types.iter().map(|(uid, ty)| (*uid, ty))
    }
}

struct Inference<'a> {
    registry: &'a DefinitionRegistry,
    issues: &'a mut IssueContext,
    solver: Solver,
    types: HashMap<Uid, Type>,
    procedures: HashMap<Uid, &'a Procedure>,
    archetypes: HashMap<Uid, &'a Archetype>,
    self_type: Type,
    at_stack: Vec<Type>,
    /// 型変数が最初に現れた位置
    origins: HashMap<TypeVariable, SourceLocation>,
}

impl<'a> Inference<'a> {
    fn report(&mut self, location: SourceLocation, error: UnifyError, related: Vec<SourceLocation>) {
        match error {
            UnifyError::Mismatch { expected, actual } => {
                let mut related = related;
                self.collect_origins(&[&expected, &actual], &location, &mut related);
                self.issues.error(
                    location,
                    IssueKind::TypeMismatch {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                        related,
                    },
                )
            }
            UnifyError::Occurs { variable, ty } => self.issues.error(
                location,
                IssueKind::OccursCheck {
                    variable: variable.to_string(),
                    ty: ty.to_string(),
                },
            ),
        }
    }

    fn unify(&mut self, expected: &Type, actual: &Type, location: &SourceLocation) {
        if let Err(error) = self.solver.unify(expected, actual) {
            let mut related = Vec::new();
            self.collect_origins(&[expected, actual], location, &mut related);
            self.report(location.clone(), error, related);
        }
    }

    /// 型に含まれる型変数の出現位置を `related` に加える
    fn collect_origins(&self, types: &[&Type], location: &SourceLocation, related: &mut Vec<SourceLocation>) {
        for ty in types {
            ty.for_each_variable(&mut |variable| {
                if let Some(origin) = self.origins.get(&variable) {
                    if origin != location && !related.contains(origin) {
                        related.push(origin.clone());
                    }
                }
            });
        }
    }

    fn record_origin(&mut self, ty: &Type, location: &SourceLocation) {
        if let Type::Variable(variable) = ty {
            self.origins.entry(*variable).or_insert_with(|| location.clone());
        }
    }

    /// 指定したフィールドを少なくとも持つ開いたレコード
    fn open_record(&mut self, field: &str, ty: Type) -> Type {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), ty);
        Type::Record {
            fields,
            rest: Some(self.solver.fresh_row()),
        }
    }

    fn builtin_type(&mut self, builtin: Builtin) -> Type {
        let a = self.solver.fresh();
        match builtin {
            Builtin::Nat | Builtin::Int => Type::set(Type::Int),
            Builtin::Boolean => Type::set(Type::Bool),
            Builtin::Seq => Type::operator(vec![Type::set(a.clone())], Type::set(Type::seq(a))),
            Builtin::Len => Type::operator(vec![Type::seq(a)], Type::Int),
            Builtin::Append => Type::operator(vec![Type::seq(a.clone()), a.clone()], Type::seq(a)),
            Builtin::Head => Type::operator(vec![Type::seq(a.clone())], a),
            Builtin::Tail => Type::operator(vec![Type::seq(a.clone())], Type::seq(a)),
            Builtin::SubSeq => Type::operator(vec![Type::seq(a.clone()), Type::Int, Type::Int], Type::seq(a)),
            Builtin::Cardinality => Type::operator(vec![Type::set(a)], Type::Int),
            Builtin::IsFiniteSet => Type::operator(vec![Type::set(a)], Type::Bool),
            Builtin::ToString => Type::operator(vec![a], Type::String),
            Builtin::Print => {
                let b = self.solver.fresh();
                Type::operator(vec![a, b.clone()], b)
            }
            Builtin::Assert => Type::operator(vec![Type::Bool, Type::String], Type::Bool),
        }
    }

    /// 定義の型。組み込み演算子以外は定義ごとに1つ
    fn definition_type(&mut self, uid: Uid) -> Type {
        if let Some(ty) = self.types.get(&uid) {
            return ty.clone();
        }
        let registry = self.registry;
        match registry.definition(uid).map(|d| &d.kind) {
            Some(DefinitionKind::Builtin(builtin)) => self.builtin_type(*builtin),
            Some(DefinitionKind::Operator { .. }) => self.operator_type(uid),
            Some(DefinitionKind::ProcessSelf) => {
                let ty = self.self_type.clone();
                self.types.insert(uid, ty.clone());
                ty
            }
            Some(DefinitionKind::Constant) => {
                let ty = self.solver.fresh();
                if let Some(definition) = registry.definition(uid) {
                    self.record_origin(&ty, &definition.location);
                }
                self.types.insert(uid, ty.clone());
                if let Some(value) = registry.constant_value(uid) {
                    let value_type = self.expression(value);
                    self.unify(&ty, &value_type, value.location());
                }
                ty
            }
            _ => {
                let ty = self.solver.fresh();
                if let Some(definition) = registry.definition(uid) {
                    self.record_origin(&ty, &definition.location);
                }
                self.types.insert(uid, ty.clone());
                ty
            }
        }
    }

    fn signature(&mut self, args: &[OpDecl]) -> (Vec<Type>, Type, Type) {
        let params: Vec<Type> = args.iter().map(|arg| self.definition_type(arg.name.meta.uid)).collect();
        let result = self.solver.fresh();
        let signature = if params.is_empty() {
            result.clone()
        } else {
            Type::operator(params.clone(), result.clone())
        };
        (params, result, signature)
    }

    /// 演算子の型。引数がなければ値の型、あれば `Operator`
    fn operator_type(&mut self, uid: Uid) -> Type {
        if let Some(ty) = self.types.get(&uid) {
            return ty.clone();
        }
        let registry = self.registry;
        let Some(definition) = registry.operator(uid) else {
            let ty = self.solver.fresh();
            self.types.insert(uid, ty.clone());
            return ty;
        };
        let (_, result, signature) = self.signature(&definition.args);
        self.types.insert(uid, signature.clone());
        let body = self.expression(&definition.body);
        self.unify(&result, &body, definition.body.location());
        signature
    }

    fn let_definition(&mut self, unit: &TlaUnit) {
        match unit {
            TlaUnit::Operator(definition) => {
                let (_, result, signature) = self.signature(&definition.args);
                self.types.insert(definition.name.meta.uid, signature);
                let body = self.expression(&definition.body);
                self.unify(&result, &body, definition.body.location());
            }
            TlaUnit::Function(definition) => {
                let ty = self.solver.fresh();
                self.types.insert(definition.name.meta.uid, ty.clone());
                let function = self.expression(&definition.function);
                self.unify(&ty, &function, definition.function.location());
            }
            _ => {}
        }
    }

    /// 演算子の適用
    fn apply(&mut self, signature: Type, args: Vec<Type>, location: &SourceLocation) -> Type {
        if args.is_empty() {
            return signature;
        }
        let result = self.solver.fresh();
        let expected = Type::operator(args, result.clone());
        self.unify(&signature, &expected, location);
        result
    }

    /// 束縛パターンの各変数に型を付け、要素型を返す
    fn bind_pattern(&mut self, pattern: &BoundPattern, set: &Type, location: &SourceLocation) -> Vec<Type> {
        match pattern {
            BoundPattern::Ids(ids) => ids
                .iter()
                .map(|id| {
                    let ty = self.definition_type(id.meta.uid);
                    self.unify(&Type::set(ty.clone()), set, location);
                    ty
                })
                .collect(),
            BoundPattern::Tuple(ids) => {
                let elements: Vec<Type> = ids.iter().map(|id| self.definition_type(id.meta.uid)).collect();
                self.unify(&Type::set(Type::Tuple(elements.clone())), set, location);
                vec![Type::Tuple(elements)]
            }
        }
    }

    fn bounds(&mut self, bounds: &[QuantifierBound]) -> Vec<Type> {
        let mut keys = Vec::new();
        for bound in bounds {
            let set = self.expression(&bound.set);
            keys.extend(self.bind_pattern(&bound.pattern, &set, bound.set.location()));
        }
        keys
    }

    fn expression(&mut self, expression: &TlaExpression) -> Type {
        let ty = self.expression_kind(expression);
        self.record_origin(&ty, expression.location());
        self.types.insert(expression.meta.uid, ty.clone());
        ty
    }

    fn expression_kind(&mut self, expression: &TlaExpression) -> Type {
        use TlaExpressionKind as K;
        let location = expression.location();
        match &expression.kind {
            K::Bool(_) => Type::Bool,
            K::Number(text) if text.contains('.') => Type::Real,
            K::Number(_) => self.solver.fresh_number(),
            K::String(_) => Type::String,
            K::Identifier { .. } => match self.registry.resolve(expression.meta.uid) {
                Some(definition) => self.definition_type(definition),
                None => self.solver.fresh(),
            },
            K::OperatorCall { args, .. } => {
                let arg_types: Vec<Type> = args.iter().map(|a| self.expression(a)).collect();
                let registry = self.registry;
                match registry.resolved_definition(expression.meta.uid) {
                    Some((_, definition)) if matches!(definition.kind, DefinitionKind::OperatorParameter { .. }) => {
                        self.solver.fresh()
                    }
                    Some((uid, _)) => {
                        let signature = self.definition_type(uid);
                        self.apply(signature, arg_types, location)
                    }
                    None => self.solver.fresh(),
                }
            }
            K::FunctionCall { function, args } => {
                let callee = self.expression(function);
                let arg_types: Vec<Type> = args.iter().map(|a| self.expression(a)).collect();
                let index = match args.as_slice() {
                    [TlaExpression {
                        kind: K::Number(text), ..
                    }] => text.parse::<usize>().ok(),
                    _ => None,
                };
                let result = self.solver.fresh();
                self.solver.defer(Deferred::Callable {
                    callee,
                    args: arg_types,
                    index,
                    result: result.clone(),
                    origin: location.clone(),
                });
                result
            }
            K::RecordAccess { record, field } => {
                let record_type = self.expression(record);
                let field_type = self.solver.fresh();
                let expected = self.open_record(&field.id, field_type.clone());
                self.unify(&expected, &record_type, location);
                field_type
            }
            K::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|f| (f.name.id.clone(), self.expression(&f.value)))
                    .collect();
                Type::record(fields)
            }
            K::RecordSet(fields) => {
                let mut record = BTreeMap::new();
                for field in fields {
                    let set = self.expression(&field.value);
                    let element = self.solver.fresh();
                    self.unify(&Type::set(element.clone()), &set, field.value.location());
                    record.insert(field.name.id.clone(), element);
                }
                Type::set(Type::record(record))
            }
            K::Set(elements) => {
                let element = self.solver.fresh();
                for e in elements {
                    let ty = self.expression(e);
                    self.unify(&element, &ty, e.location());
                }
                Type::set(element)
            }
            K::SetRefinement {
                binding,
                from,
                predicate,
            } => {
                let set = self.expression(from);
                let element = match self.bind_pattern(binding, &set, from.location()).as_slice() {
                    [single] => single.clone(),
                    _ => self.solver.fresh(),
                };
                let condition = self.expression(predicate);
                self.unify(&Type::Bool, &condition, predicate.location());
                Type::set(element)
            }
            K::Choose {
                binding,
                from,
                predicate,
            } => {
                let set = self.expression(from);
                let element = match self.bind_pattern(binding, &set, from.location()).as_slice() {
                    [single] => single.clone(),
                    _ => self.solver.fresh(),
                };
                let condition = self.expression(predicate);
                self.unify(&Type::Bool, &condition, predicate.location());
                element
            }
            K::SetComprehension { body, bounds } => {
                self.bounds(bounds);
                Type::set(self.expression(body))
            }
            K::Function { bounds, body } => {
                let mut keys = self.bounds(bounds);
                let key = if keys.len() == 1 {
                    keys.remove(0)
                } else {
                    Type::Tuple(keys)
                };
                Type::map(key, self.expression(body))
            }
            K::FunctionSet { from, to } => {
                let domain = self.solver.fresh();
                let range = self.solver.fresh();
                let from_type = self.expression(from);
                let to_type = self.expression(to);
                self.unify(&Type::set(domain.clone()), &from_type, from.location());
                self.unify(&Type::set(range.clone()), &to_type, to.location());
                Type::set(Type::map(domain, range))
            }
            K::FunctionSubstitution { source, substitutions } => {
                let function = self.expression(source);
                for pair in substitutions {
                    let target = self.path_type(&function, &pair.keys, &pair.meta.location);
                    self.at_stack.push(target.clone());
                    let value = self.expression(&pair.value);
                    self.at_stack.pop();
                    self.unify(&target, &value, pair.value.location());
                }
                function
            }
            K::SubstitutionAt => match self.at_stack.last() {
                Some(ty) => ty.clone(),
                None => self.solver.fresh(),
            },
            K::Binary { operator, lhs, rhs } => self.binary(operator, lhs, rhs, location),
            K::Unary { operator, operand } => self.unary(operator, operand, location),
            K::If {
                condition,
                then,
                otherwise,
            } => {
                let c = self.expression(condition);
                self.unify(&Type::Bool, &c, condition.location());
                let t = self.expression(then);
                let o = self.expression(otherwise);
                self.unify(&t, &o, otherwise.location());
                t
            }
            K::Quantified { bounds, body, .. } => {
                self.bounds(bounds);
                let b = self.expression(body);
                self.unify(&Type::Bool, &b, body.location());
                Type::Bool
            }
            K::Let { definitions, body } => {
                for definition in definitions {
                    self.let_definition(definition);
                }
                self.expression(body)
            }
            K::Tuple(elements) => {
                let element_types: Vec<Type> = elements.iter().map(|e| self.expression(e)).collect();
                if element_types.is_empty() {
                    return Type::seq(self.solver.fresh());
                }
                let ty = self.solver.fresh();
                self.solver.defer(Deferred::TupleOrSeq {
                    ty: ty.clone(),
                    elements: element_types,
                    origin: location.clone(),
                });
                ty
            }
            K::Fairness { vars, expression, .. } => {
                self.expression(vars);
                self.expression(expression);
                Type::Bool
            }
            K::DefaultInit => self.solver.fresh(),
        }
    }

    /// `EXCEPT` の `!path` が指す位置の型
    fn path_type(&mut self, root: &Type, keys: &[SubstitutionKey], location: &SourceLocation) -> Type {
        let mut current = root.clone();
        for key in keys {
            current = match key {
                SubstitutionKey::Index(args) => {
                    let arg_types: Vec<Type> = args.iter().map(|a| self.expression(a)).collect();
                    let result = self.solver.fresh();
                    self.solver.defer(Deferred::Callable {
                        callee: current,
                        args: arg_types,
                        index: None,
                        result: result.clone(),
                        origin: location.clone(),
                    });
                    result
                }
                SubstitutionKey::Field(name) => {
                    let field = self.solver.fresh();
                    let expected = self.open_record(&name.id, field.clone());
                    self.unify(&expected, &current, location);
                    field
                }
            };
        }
        current
    }

    fn both(&mut self, expected: &Type, lhs: &TlaExpression, rhs: &TlaExpression) {
        let l = self.expression(lhs);
        self.unify(expected, &l, lhs.location());
        let r = self.expression(rhs);
        self.unify(expected, &r, rhs.location());
    }

    fn binary(
        &mut self,
        operator: &str,
        lhs: &TlaExpression,
        rhs: &TlaExpression,
        location: &SourceLocation,
    ) -> Type {
        match operator {
            "+" | "-" | "*" | "^" => {
                let number = self.solver.fresh_number();
                self.both(&number, lhs, rhs);
                number
            }
            "%" | "\\div" => {
                self.both(&Type::Int, lhs, rhs);
                Type::Int
            }
            "/" => {
                self.both(&Type::Real, lhs, rhs);
                Type::Real
            }
            "<" | ">" | "<=" | ">=" | "=<" | "\\leq" | "\\geq" => {
                let number = self.solver.fresh_number();
                self.both(&number, lhs, rhs);
                Type::Bool
            }
            "=" | "#" | "/=" => {
                let operand = self.solver.fresh();
                self.both(&operand, lhs, rhs);
                Type::Bool
            }
            "/\\" | "\\/" | "\\land" | "\\lor" | "=>" | "<=>" | "\\equiv" | "~>" | "-+->" => {
                self.both(&Type::Bool, lhs, rhs);
                Type::Bool
            }
            "\\in" | "\\notin" => {
                let element = self.expression(lhs);
                let set = self.expression(rhs);
                self.unify(&Type::set(element), &set, rhs.location());
                Type::Bool
            }
            "\\subseteq" | "\\subset" | "\\supseteq" | "\\supset" => {
                let set = Type::set(self.solver.fresh());
                self.both(&set, lhs, rhs);
                Type::Bool
            }
            "\\cup" | "\\union" | "\\cap" | "\\intersect" | "\\" => {
                let set = Type::set(self.solver.fresh());
                self.both(&set, lhs, rhs);
                set
            }
            ".." => {
                self.both(&Type::Int, lhs, rhs);
                Type::set(Type::Int)
            }
            "\\o" => {
                let seq = Type::seq(self.solver.fresh());
                self.both(&seq, lhs, rhs);
                seq
            }
            ":>" => {
                let key = self.expression(lhs);
                let value = self.expression(rhs);
                Type::map(key, value)
            }
            "@@" => {
                let map = Type::map(self.solver.fresh(), self.solver.fresh());
                self.both(&map, lhs, rhs);
                map
            }
            "\\X" | "\\times" => {
                let a = self.solver.fresh();
                let b = self.solver.fresh();
                let l = self.expression(lhs);
                self.unify(&Type::set(a.clone()), &l, lhs.location());
                let r = self.expression(rhs);
                self.unify(&Type::set(b.clone()), &r, rhs.location());
                Type::set(Type::Tuple(vec![a, b]))
            }
            other => {
                self.expression(lhs);
                self.expression(rhs);
                self.issues.error(
                    location.clone(),
                    IssueKind::UnsupportedConstruct {
                        construct: other.to_string(),
                    },
                );
                self.solver.fresh()
            }
        }
    }

    fn unary(&mut self, operator: &str, operand: &TlaExpression, location: &SourceLocation) -> Type {
        match operator {
            "~" | "\\lnot" | "\\neg" => {
                let ty = self.expression(operand);
                self.unify(&Type::Bool, &ty, operand.location());
                Type::Bool
            }
            "-" => {
                let number = self.solver.fresh_number();
                let ty = self.expression(operand);
                self.unify(&number, &ty, operand.location());
                number
            }
            "'" => self.expression(operand),
            "DOMAIN" => {
                let function = self.expression(operand);
                let result = self.solver.fresh();
                self.solver.defer(Deferred::Domain {
                    function,
                    result: result.clone(),
                    origin: location.clone(),
                });
                result
            }
            "SUBSET" => {
                let set = Type::set(self.solver.fresh());
                let ty = self.expression(operand);
                self.unify(&set, &ty, operand.location());
                Type::set(set)
            }
            "UNION" => {
                let element = self.solver.fresh();
                let ty = self.expression(operand);
                self.unify(&Type::set(Type::set(element.clone())), &ty, operand.location());
                Type::set(element)
            }
            "UNCHANGED" | "ENABLED" | "[]" | "<>" => {
                self.expression(operand);
                Type::Bool
            }
            other => {
                self.expression(operand);
                self.issues.error(
                    location.clone(),
                    IssueKind::UnsupportedConstruct {
                        construct: other.to_string(),
                    },
                );
                self.solver.fresh()
            }
        }
    }

    fn declaration(&mut self, declaration: &VariableDeclaration) -> Type {
        let ty = self.definition_type(declaration.name.meta.uid);
        let value = self.expression(&declaration.value);
        let expected = if declaration.is_set { Type::set(ty.clone()) } else { ty.clone() };
        self.unify(&expected, &value, declaration.value.location());
        ty
    }

    fn condition(&mut self, expression: &TlaExpression) {
        let ty = self.expression(expression);
        self.unify(&Type::Bool, &ty, expression.location());
    }

    fn statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::LabeledStatements { statements, .. } => self.statements(statements),
            StatementKind::Assignment(pairs) => {
                for pair in pairs {
                    let lhs = self.expression(&pair.lhs);
                    let rhs = self.expression(&pair.rhs);
                    if let Err(error) = self.solver.unify(&lhs, &rhs) {
                        let related = self
                            .root_definition(&pair.lhs)
                            .map(|d| vec![d])
                            .unwrap_or_default();
                        self.report(pair.meta.location.clone(), error, related);
                    }
                }
            }
            StatementKind::Await(e) | StatementKind::Assert(e) => self.condition(e),
            StatementKind::Print(e) => {
                self.expression(e);
            }
            StatementKind::If { condition, yes, no } => {
                self.condition(condition);
                self.statements(yes);
                self.statements(no);
            }
            StatementKind::While { condition, body } => {
                self.condition(condition);
                self.statements(body);
            }
            StatementKind::Either(branches) => {
                for branch in branches {
                    self.statements(branch);
                }
            }
            StatementKind::With { variables, body } => {
                for variable in variables {
                    self.declaration(variable);
                }
                self.statements(body);
            }
            StatementKind::Call { arguments, .. } => {
                let target = self
                    .registry
                    .resolve(statement.meta.uid)
                    .and_then(|uid| self.procedures.get(&uid).copied());
                let argument_types: Vec<Type> = arguments.iter().map(|a| self.expression(a)).collect();
                if let Some(procedure) = target {
                    for (param, (argument, ty)) in procedure.params.iter().zip(arguments.iter().zip(argument_types)) {
                        let expected = self.definition_type(param.name.meta.uid);
                        self.unify(&expected, &ty, argument.location());
                    }
                }
            }
            StatementKind::MacroCall { arguments, .. } => {
                for argument in arguments {
                    self.expression(argument);
                }
            }
            StatementKind::Skip | StatementKind::Return | StatementKind::Goto(_) => {}
        }
    }

    /// 代入の左辺の根にある変数の定義位置
    fn root_definition(&self, lhs: &TlaExpression) -> Option<SourceLocation> {
        match &lhs.kind {
            TlaExpressionKind::FunctionCall { function, .. } => self.root_definition(function),
            TlaExpressionKind::RecordAccess { record, .. } => self.root_definition(record),
            _ => self
                .registry
                .resolved_definition(lhs.meta.uid)
                .map(|(_, d)| d.location.clone()),
        }
    }

    fn algorithm(&mut self, algorithm: &'a PlusCalAlgorithm) {
        for procedure in &algorithm.procedures {
            self.procedures.insert(procedure.meta.uid, procedure);
        }
        for archetype in &algorithm.archetypes {
            self.archetypes.insert(archetype.meta.uid, archetype);
        }
        let registry = self.registry;
        for constant in registry.constants() {
            self.definition_type(*constant);
        }
        for variable in &algorithm.variables {
            self.declaration(variable);
        }

        for procedure in &algorithm.procedures {
            self.types.insert(procedure.self_meta.uid, self.self_type.clone());
            for param in &procedure.params {
                self.declaration(param);
            }
            for variable in &procedure.variables {
                self.declaration(variable);
            }
            self.statements(&procedure.body);
        }
        for archetype in &algorithm.archetypes {
            self.types.insert(archetype.self_meta.uid, self.self_type.clone());
            for param in &archetype.params {
                self.declaration(param);
            }
            for variable in &archetype.variables {
                self.declaration(variable);
            }
            self.statements(&archetype.body);
        }
        match &algorithm.processes {
            Processes::Single(body) => self.statements(body),
            Processes::Multi(processes) => {
                for process in processes {
                    let self_type = self.self_type.clone();
                    self.types.insert(process.name.name.meta.uid, self_type.clone());
                    let value = self.expression(&process.name.value);
                    let expected = if process.name.is_set {
                        Type::set(self_type)
                    } else {
                        self_type
                    };
                    self.unify(&expected, &value, process.name.value.location());
                    for variable in &process.variables {
                        self.declaration(variable);
                    }
                    self.statements(&process.body);
                }
            }
        }
        for instance in &algorithm.instances {
            let value = self.expression(&instance.name.value);
            let expected = if instance.name.is_set {
                Type::set(self.self_type.clone())
            } else {
                self.self_type.clone()
            };
            self.unify(&expected, &value, instance.name.value.location());
            let target = registry
                .resolve(instance.meta.uid)
                .and_then(|uid| self.archetypes.get(&uid).copied());
            let argument_types: Vec<Type> = instance.arguments.iter().map(|a| self.expression(&a.value)).collect();
            if let Some(archetype) = target {
                for (param, (argument, ty)) in archetype.params.iter().zip(instance.arguments.iter().zip(argument_types)) {
                    let expected = self.definition_type(param.name.meta.uid);
                    self.unify(&expected, &ty, argument.value.location());
                }
            }
        }
        for (uid, _) in registry.operators() {
            self.operator_type(uid);
        }
    }

    fn finish(mut self) -> TypeMap {
        for (location, error) in self.solver.solve() {
            self.report(location, error, Vec::new());
        }
        let recorded: Vec<Type> = self.types.values().cloned().collect();
        for ty in &recorded {
            self.solver.apply_defaults(ty);
        }
        let types = self
            .types
            .iter()
            .map(|(uid, ty)| (*uid, self.solver.resolve(ty)))
            .collect();
        TypeMap { types }
    }
}

/// アルゴリズム全体の型を推論する
pub fn infer_types(algorithm: &PlusCalAlgorithm, registry: &DefinitionRegistry, issues: &mut IssueContext) -> TypeMap {
    let mut solver = Solver::new();
    let self_type = solver.fresh();
    let mut inference = Inference {
        registry,
        issues,
        solver,
        types: HashMap::new(),
        procedures: HashMap::new(),
        archetypes: HashMap::new(),
        self_type,
        at_stack: Vec::new(),
        origins: HashMap::new(),
    };
    inference.algorithm(algorithm);
    let types = inference.finish();
    log::debug!("型推論: {} 件の型を決定しました", types.len());
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser;
    use crate::frontend::semantic::resolve_scopes;
    use crate::module::TlaModuleLoader;

    fn infer(source: &str) -> (TypeMap, DefinitionRegistry, IssueContext) {
        let mut issues = IssueContext::new();
        let module = parser::parse_module("Test.tla", source, &mut issues).unwrap().unwrap();
        let algorithm = parser::parse_algorithm("Test.tla", source, &mut issues).unwrap().unwrap();
        let mut loader = TlaModuleLoader::new(Vec::new());
        let registry =
            resolve_scopes(&module, &algorithm, &mut loader, &BTreeMap::new(), &mut issues).unwrap();
        assert!(issues.is_empty(), "{}", issues.format());
        let types = infer_types(&algorithm, &registry, &mut issues);
        (types, registry, issues)
    }

    fn global(types: &TypeMap, registry: &DefinitionRegistry, name: &str) -> Type {
        let uid = registry
            .global_variables()
            .iter()
            .copied()
            .find(|uid| registry.definition(*uid).map(|d| d.name == name).unwrap_or(false))
            .unwrap();
        types.get(uid).cloned().unwrap()
    }

    fn wrap(body: &str) -> String {
        format!(
            "---- MODULE Test ----\nEXTENDS Integers, Sequences\n(* --algorithm Test {{\n{}\n}} *)\n====\n",
            body
        )
    }

    #[test]
    fn test_basic_globals() {
        let (types, registry, issues) = infer(&wrap(
            "variables x = 1, y = \"a\", b = TRUE;\n{ l: x := x + 1; }",
        ));
        assert!(issues.is_empty(), "{}", issues.format());
        assert_eq!(global(&types, &registry, "x"), Type::Int);
        assert_eq!(global(&types, &registry, "y"), Type::String);
        assert_eq!(global(&types, &registry, "b"), Type::Bool);
    }

    #[test]
    fn test_real_promotion() {
        let (types, registry, issues) = infer(&wrap("variables r = 1.5;\n{ l: r := r + 1; }"));
        assert!(issues.is_empty(), "{}", issues.format());
        assert_eq!(global(&types, &registry, "r"), Type::Real);
    }

    #[test]
    fn test_sequences_and_records() {
        let (types, registry, issues) = infer(&wrap(
            "variables s = <<1, 2>>, r = [a |-> 1, b |-> \"x\"];\n{ l: s := Append(s, r.a); }",
        ));
        assert!(issues.is_empty(), "{}", issues.format());
        assert_eq!(global(&types, &registry, "s"), Type::seq(Type::Int));
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), Type::Int);
        fields.insert("b".to_string(), Type::String);
        assert_eq!(global(&types, &registry, "r"), Type::record(fields));
    }

    #[test]
    fn test_assignment_mismatch_reports_definition() {
        let (_, _, issues) = infer(&wrap("variables x = 1;\n{ l: x := \"s\"; }"));
        let mismatches: Vec<_> = issues.issues().iter().filter(|i| i.kind.code() == "type-mismatch").collect();
        assert_eq!(mismatches.len(), 1);
        match &mismatches[0].kind {
            IssueKind::TypeMismatch { related, .. } => assert!(!related.is_empty()),
            other => panic!("type-mismatch が期待されます: {:?}", other),
        }
    }

    #[test]
    fn test_await_mismatch_points_at_declaration() {
        let (_, _, issues) = infer(&wrap("variables a = 0;\n{ l: await a; }"));
        let mismatch = issues
            .issues()
            .iter()
            .find(|i| i.kind.code() == "type-mismatch")
            .expect("type-mismatch");
        match &mismatch.kind {
            IssueKind::TypeMismatch { expected, actual, related } => {
                assert_eq!(expected, "Bool");
                assert_eq!(actual, "Number");
                assert!(!related.is_empty());
                assert!(related.iter().all(|r| *r != mismatch.location));
            }
            other => panic!("type-mismatch が期待されます: {:?}", other),
        }
    }

    #[test]
    fn test_operand_mismatch_has_second_origin() {
        let (_, _, issues) = infer(&wrap("variables a = 1, s = <<1>>;\n{ l: print a + s; }"));
        let related = issues.issues().iter().find_map(|i| match &i.kind {
            IssueKind::TypeMismatch { related, .. } => Some(related.clone()),
            _ => None,
        });
        assert!(!related.expect("type-mismatch").is_empty());
    }

    #[test]
    fn test_while_condition_must_be_bool() {
        let (_, _, issues) = infer(&wrap("variables x = 1;\n{ l: while (x) { x := x - 1; } }"));
        assert_eq!(issues.issues()[0].kind.code(), "type-mismatch");
    }

    #[test]
    fn test_with_binds_element_type_and_functions_are_maps() {
        let (types, registry, issues) = infer(&wrap(
            "variables f = [i \\in 1..3 |-> \"v\"], x = \"\";\n{ l: with (i \\in {1, 2}) { x := f[i]; } }",
        ));
        assert!(issues.is_empty(), "{}", issues.format());
        assert_eq!(global(&types, &registry, "f"), Type::map(Type::Int, Type::String));
    }

    #[test]
    fn test_operators_are_typed() {
        let source = "---- MODULE Test ----\nEXTENDS Integers\nDouble(v) == v * 2\n(* --algorithm Test {\nvariables x = Double(2);\n{ l: print x; }\n} *)\n====\n";
        let (types, registry, issues) = infer(source);
        assert!(issues.is_empty(), "{}", issues.format());
        let (uid, _) = registry.operators().next().unwrap();
        assert_eq!(types.get(uid), Some(&Type::operator(vec![Type::Int], Type::Int)));
        assert!(types.iter().all(|(_, ty)| ty.is_ground()));
    }
}
