//! # 名前解決
//!
//! 2段階で両方の構文木を巡回します。
//!
//! 1. 大域的な定義（定数、モジュールの演算子、`EXTENDS` 先の定義、
//!    アルゴリズムの大域変数、マクロ、プロシージャ、アーキタイプ、プロセス）を
//!    登録する。重複は `duplicate-definition` になります。
//! 2. 名前の出現を内側のスコープから順に解決し、参照位置の識別子から
//!    定義の識別子への対応をレジストリに記録する。
//!
//! 演算子定義の本体は、アルゴリズムから到達したときに初めて解決されます。
//! 到達しない定義（生成済み翻訳を前提にした性質など）は検査されません。

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::frontend::ast::{
    walk_statements, OperatorDefinition, PlusCalAlgorithm, Processes, Statement, StatementKind, TlaExpression,
    TlaExpressionKind, TlaIdentifier, TlaModule, TlaUnit, VariableDeclaration,
};
use crate::frontend::error::{IssueContext, IssueKind, Result, SourceLocation};
use crate::frontend::uid::{Meta, Uid};
use crate::module::TlaModuleLoader;

use super::builtins::{self, Builtin};
use super::registry::{Definition, DefinitionKind, DefinitionRegistry};

type Scope = HashMap<String, Uid>;

struct Scoper<'a> {
    registry: DefinitionRegistry,
    issues: &'a mut IssueContext,
    scopes: Vec<Scope>,
    owner: Option<Uid>,
    labels: HashMap<String, Uid>,
    unscoped: HashMap<Uid, OperatorDefinition>,
    pending: VecDeque<OperatorDefinition>,
    loaded_modules: HashSet<String>,
}

impl<'a> Scoper<'a> {
    fn new(issues: &'a mut IssueContext) -> Self {
        Self {
            registry: DefinitionRegistry::new(),
            issues,
            scopes: vec![Scope::new()],
            owner: None,
            labels: HashMap::new(),
            unscoped: HashMap::new(),
            pending: VecDeque::new(),
            loaded_modules: HashSet::new(),
        }
    }

    fn push(&mut self) {
        self.scopes.push(Scope::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<Uid> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn previous_location(&self, uid: Uid) -> SourceLocation {
        self.registry
            .definition(uid)
            .map(|d| d.location.clone())
            .unwrap_or_else(SourceLocation::unknown)
    }

    /// 現在のスコープに名前を定義する
    fn declare(&mut self, uid: Uid, name: &str, location: &SourceLocation, kind: DefinitionKind) {
        let current = self.scopes.len() - 1;
        if let Some(previous) = self.scopes[current].get(name).copied() {
            let previous = self.previous_location(previous);
            self.issues.error(
                location.clone(),
                IssueKind::DuplicateDefinition {
                    name: name.to_string(),
                    previous,
                },
            );
            return;
        }
        self.scopes[current].insert(name.to_string(), uid);
        self.registry.define(
            uid,
            Definition {
                name: name.to_string(),
                kind,
                location: location.clone(),
                owner: self.owner,
            },
        );
    }

    fn declare_identifier(&mut self, identifier: &TlaIdentifier, kind: DefinitionKind) {
        self.declare(identifier.meta.uid, &identifier.id, &identifier.meta.location, kind);
    }

    fn declare_builtin(&mut self, builtin: Builtin) {
        if self.scopes[0].contains_key(builtin.name()) {
            return;
        }
        let uid = Uid::fresh();
        self.scopes[0].insert(builtin.name().to_string(), uid);
        self.registry.define(
            uid,
            Definition {
                name: builtin.name().to_string(),
                kind: DefinitionKind::Builtin(builtin),
                location: SourceLocation::unknown(),
                owner: None,
            },
        );
    }

    /// `EXTENDS` 先を読み込み、その定義を大域スコープに加える
    fn load_extends(&mut self, extends: &[TlaIdentifier], loader: &mut TlaModuleLoader) -> Result<()> {
        for name in extends {
            if !self.loaded_modules.insert(name.id.clone()) {
                continue;
            }
            if let Some(operators) = builtins::standard_module(&name.id) {
                for builtin in operators {
                    self.declare_builtin(*builtin);
                }
                continue;
            }
            if let Some(module) = loader.load(&name.id, &name.meta.location, self.issues)? {
                self.load_extends(&module.extends, loader)?;
                self.declare_units(&module.units);
            }
        }
        Ok(())
    }

    fn declare_operator(&mut self, definition: OperatorDefinition) {
        let uid = definition.name.meta.uid;
        let arity = definition.args.len();
        self.declare_identifier(&definition.name, DefinitionKind::Operator { arity });
        self.unscoped.insert(uid, definition);
    }

    fn declare_units(&mut self, units: &[TlaUnit]) {
        for unit in units {
            match unit {
                TlaUnit::Operator(definition) => self.declare_operator(definition.clone()),
                TlaUnit::Function(definition) => self.declare_operator(OperatorDefinition {
                    meta: definition.meta.clone(),
                    name: definition.name.clone(),
                    args: Vec::new(),
                    body: definition.function.clone(),
                    local: definition.local,
                }),
                TlaUnit::ModuleDefinition(definition) => {
                    self.declare_identifier(&definition.name, DefinitionKind::ModuleInstance)
                }
                TlaUnit::Constant { declarations, .. } => {
                    for declaration in declarations {
                        self.declare_identifier(&declaration.name, DefinitionKind::Constant);
                    }
                }
                TlaUnit::Variable { names, .. } => {
                    for name in names {
                        self.declare_identifier(name, DefinitionKind::TlaVariable);
                    }
                }
                TlaUnit::Instance(_)
                | TlaUnit::Recursive { .. }
                | TlaUnit::Theorem { .. }
                | TlaUnit::Assumption { .. } => {}
            }
        }
    }

    /// 初めて参照された演算子を解決待ちに入れる
    fn mark_reachable(&mut self, uid: Uid) {
        if let Some(definition) = self.unscoped.remove(&uid) {
            self.pending.push_back(definition);
        }
    }

    fn drain_operators(&mut self) {
        while let Some(definition) = self.pending.pop_front() {
            let saved = self.scopes.split_off(1);
            let saved_owner = self.owner.take();
            self.push();
            for arg in &definition.args {
                self.declare_identifier(&arg.name, DefinitionKind::OperatorParameter { arity: arg.arity });
            }
            self.expression(&definition.body);
            self.pop();
            self.scopes.extend(saved);
            self.owner = saved_owner;
            self.registry.add_operator(definition.name.meta.uid, definition);
        }
    }

    fn reference(&mut self, site: &TlaExpression, prefix: &[TlaIdentifier], name: &TlaIdentifier, arity: usize) {
        if !prefix.is_empty() {
            self.issues.error(
                site.location().clone(),
                IssueKind::UnsupportedConstruct {
                    construct: format!("{}!{}", prefix[0].id, name.id),
                },
            );
            return;
        }
        let Some(uid) = self.lookup(&name.id) else {
            self.issues.error(
                site.location().clone(),
                IssueKind::UnknownIdentifier { name: name.id.clone() },
            );
            return;
        };
        self.registry.add_reference(site.meta.uid, uid);
        let expected = match self.registry.definition(uid).map(|d| &d.kind) {
            Some(DefinitionKind::Operator { arity }) | Some(DefinitionKind::OperatorParameter { arity }) => {
                Some(*arity)
            }
            Some(DefinitionKind::Builtin(builtin)) => Some(builtin.arity()),
            _ => None,
        };
        if let Some(expected) = expected {
            if expected != arity {
                self.issues.error(
                    site.location().clone(),
                    IssueKind::ArityMismatch {
                        name: name.id.clone(),
                        expected,
                        actual: arity,
                    },
                );
            }
        }
        self.mark_reachable(uid);
    }

    fn bind_bounds(&mut self, identifiers: &[TlaIdentifier]) {
        for identifier in identifiers {
            self.declare_identifier(identifier, DefinitionKind::Bound);
        }
    }

    fn expression(&mut self, expression: &TlaExpression) {
        use TlaExpressionKind as K;
        match &expression.kind {
            K::Identifier { prefix, name } => self.reference(expression, prefix, name, 0),
            K::OperatorCall { prefix, name, args } => {
                self.reference(expression, prefix, name, args.len());
                for arg in args {
                    self.expression(arg);
                }
            }
            K::Unary { operator, operand } if operator == "'" => {
                if let Some(name) = operand.as_simple_identifier() {
                    let local = self
                        .lookup(&name.id)
                        .and_then(|uid| self.registry.definition(uid))
                        .map(|d| d.kind.is_local())
                        .unwrap_or(false);
                    if local {
                        self.issues.error(
                            expression.location().clone(),
                            IssueKind::PrimedLocal { name: name.id.clone() },
                        );
                    }
                }
                self.expression(operand);
            }
            K::Quantified { bounds, body, .. } | K::SetComprehension { body, bounds } | K::Function { bounds, body } => {
                for bound in bounds {
                    self.expression(&bound.set);
                }
                self.push();
                for bound in bounds {
                    self.bind_bounds(bound.pattern.identifiers());
                }
                self.expression(body);
                self.pop();
            }
            K::SetRefinement {
                binding,
                from,
                predicate,
            }
            | K::Choose {
                binding,
                from,
                predicate,
            } => {
                self.expression(from);
                self.push();
                self.bind_bounds(binding.identifiers());
                self.expression(predicate);
                self.pop();
            }
            K::Let { definitions, body } => {
                self.push();
                for definition in definitions {
                    self.let_definition(definition);
                }
                self.expression(body);
                self.pop();
            }
            _ => expression.for_each_child(&mut |child| self.expression(child)),
        }
    }

    /// `LET` の定義は外側の束縛が見えるため、その場で解決する
    fn let_definition(&mut self, unit: &TlaUnit) {
        match unit {
            TlaUnit::Operator(definition) => {
                self.declare_identifier(&definition.name, DefinitionKind::Operator {
                    arity: definition.args.len(),
                });
                self.push();
                for arg in &definition.args {
                    self.declare_identifier(&arg.name, DefinitionKind::OperatorParameter { arity: arg.arity });
                }
                self.expression(&definition.body);
                self.pop();
            }
            TlaUnit::Function(definition) => {
                self.declare_identifier(&definition.name, DefinitionKind::Operator { arity: 0 });
                self.expression(&definition.function);
            }
            other => self.issues.error(
                other.meta().location.clone(),
                IssueKind::UnsupportedConstruct {
                    construct: "LET 内の宣言".to_string(),
                },
            ),
        }
    }

    /// 代入の左辺。根の識別子は代入可能な変数でなければならない
    fn lhs(&mut self, expression: &TlaExpression) {
        match &expression.kind {
            TlaExpressionKind::FunctionCall { function, args } => {
                self.lhs(function);
                for arg in args {
                    self.expression(arg);
                }
            }
            TlaExpressionKind::RecordAccess { record, .. } => self.lhs(record),
            TlaExpressionKind::Identifier { prefix, name } if prefix.is_empty() => {
                let Some(uid) = self.lookup(&name.id) else {
                    self.issues.error(
                        expression.location().clone(),
                        IssueKind::UnknownIdentifier { name: name.id.clone() },
                    );
                    return;
                };
                self.registry.add_reference(expression.meta.uid, uid);
                let assignable = self
                    .registry
                    .definition(uid)
                    .map(|d| d.kind.is_assignable())
                    .unwrap_or(false);
                if !assignable {
                    self.issues.error(
                        expression.location().clone(),
                        IssueKind::NotAVariable { name: name.id.clone() },
                    );
                }
            }
            _ => {
                self.expression(expression);
                self.issues.error(
                    expression.location().clone(),
                    IssueKind::NotAVariable {
                        name: expression.to_string(),
                    },
                );
            }
        }
    }

    fn declare_variable(&mut self, declaration: &VariableDeclaration, kind: DefinitionKind) {
        self.expression(&declaration.value);
        self.declare_identifier(&declaration.name, kind);
    }

    fn declare_self(&mut self, meta: &Meta) {
        self.declare(meta.uid, "self", &meta.location, DefinitionKind::ProcessSelf);
    }

    /// 本体のラベルを集めて登録する
    fn collect_labels(&mut self, body: &[Statement]) {
        self.labels.clear();
        let mut found = Vec::new();
        walk_statements(body, &mut |s| {
            if let StatementKind::LabeledStatements { label, .. } = &s.kind {
                found.push(label.clone());
            }
        });
        for label in found {
            if let Some(previous) = self.labels.get(&label.name).copied() {
                let previous = self.previous_location(previous);
                self.issues.error(
                    label.meta.location.clone(),
                    IssueKind::DuplicateDefinition {
                        name: label.name.clone(),
                        previous,
                    },
                );
                continue;
            }
            self.labels.insert(label.name.clone(), label.meta.uid);
            self.registry.define(
                label.meta.uid,
                Definition {
                    name: label.name.clone(),
                    kind: DefinitionKind::Label,
                    location: label.meta.location.clone(),
                    owner: self.owner,
                },
            );
        }
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
                    self.lhs(&pair.lhs);
                    self.expression(&pair.rhs);
                }
            }
            StatementKind::Await(e) | StatementKind::Print(e) | StatementKind::Assert(e) => self.expression(e),
            StatementKind::Skip | StatementKind::Return => {}
            StatementKind::Goto(target) => match self.labels.get(target).copied() {
                Some(label) => self.registry.add_reference(statement.meta.uid, label),
                None => self.issues.error(
                    statement.location().clone(),
                    IssueKind::UnknownLabel { name: target.clone() },
                ),
            },
            StatementKind::Call { target, arguments } => {
                match self.registry.procedure(target) {
                    Some(procedure) => {
                        self.registry.add_reference(statement.meta.uid, procedure);
                        if let Some(DefinitionKind::Procedure { arity }) =
                            self.registry.definition(procedure).map(|d| d.kind.clone())
                        {
                            if arity != arguments.len() {
                                self.issues.error(
                                    statement.location().clone(),
                                    IssueKind::ArityMismatch {
                                        name: target.clone(),
                                        expected: arity,
                                        actual: arguments.len(),
                                    },
                                );
                            }
                        }
                    }
                    None => self.issues.error(
                        statement.location().clone(),
                        IssueKind::UnknownIdentifier { name: target.clone() },
                    ),
                }
                for argument in arguments {
                    self.expression(argument);
                }
            }
            StatementKind::MacroCall { arguments, .. } => {
                for argument in arguments {
                    self.expression(argument);
                }
            }
            StatementKind::If { condition, yes, no } => {
                self.expression(condition);
                self.statements(yes);
                self.statements(no);
            }
            StatementKind::While { condition, body } => {
                self.expression(condition);
                self.statements(body);
            }
            StatementKind::Either(branches) => {
                for branch in branches {
                    self.statements(branch);
                }
            }
            StatementKind::With { variables, body } => {
                self.push();
                for variable in variables {
                    self.declare_variable(variable, DefinitionKind::Bound);
                }
                self.statements(body);
                self.pop();
            }
        }
    }

    fn declare_top_level(&mut self, uid: Uid, name: &str, location: &SourceLocation, kind: DefinitionKind) {
        let previous = match kind {
            DefinitionKind::Procedure { .. } => self.registry.procedure(name),
            DefinitionKind::Archetype { .. } => self.registry.archetype(name),
            _ => None,
        };
        if let Some(previous) = previous {
            let previous = self.previous_location(previous);
            self.issues.error(
                location.clone(),
                IssueKind::DuplicateDefinition {
                    name: name.to_string(),
                    previous,
                },
            );
            return;
        }
        self.registry.define(
            uid,
            Definition {
                name: name.to_string(),
                kind,
                location: location.clone(),
                owner: None,
            },
        );
    }

    fn algorithm(&mut self, algorithm: &PlusCalAlgorithm) {
        for variable in &algorithm.variables {
            self.declare_variable(variable, DefinitionKind::GlobalVariable);
        }
        self.declare_units(&algorithm.units);

        for definition in &algorithm.macros {
            self.declare_top_level(definition.meta.uid, &definition.name, &definition.meta.location, DefinitionKind::Macro);
        }
        for procedure in &algorithm.procedures {
            self.declare_top_level(
                procedure.meta.uid,
                &procedure.name,
                &procedure.meta.location,
                DefinitionKind::Procedure {
                    arity: procedure.params.len(),
                },
            );
        }
        for archetype in &algorithm.archetypes {
            self.declare_top_level(
                archetype.meta.uid,
                &archetype.name,
                &archetype.meta.location,
                DefinitionKind::Archetype {
                    arity: archetype.params.len(),
                },
            );
        }

        for procedure in &algorithm.procedures {
            self.owner = Some(procedure.meta.uid);
            self.push();
            for param in &procedure.params {
                self.declare_variable(param, DefinitionKind::Parameter { is_ref: param.is_ref });
            }
            self.declare_self(&procedure.self_meta);
            for variable in &procedure.variables {
                self.declare_variable(variable, DefinitionKind::LocalVariable);
            }
            self.collect_labels(&procedure.body);
            self.statements(&procedure.body);
            self.pop();
        }

        for archetype in &algorithm.archetypes {
            self.owner = Some(archetype.meta.uid);
            self.push();
            for param in &archetype.params {
                self.declare_identifier(&param.name, DefinitionKind::Parameter { is_ref: param.is_ref });
            }
            self.declare_self(&archetype.self_meta);
            for variable in &archetype.variables {
                self.declare_variable(variable, DefinitionKind::LocalVariable);
            }
            self.collect_labels(&archetype.body);
            self.statements(&archetype.body);
            self.pop();
        }

        match &algorithm.processes {
            Processes::Single(body) => {
                self.owner = None;
                self.push();
                self.collect_labels(body);
                self.statements(body);
                self.pop();
            }
            Processes::Multi(processes) => {
                for process in processes {
                    self.owner = None;
                    self.expression(&process.name.value);
                    self.registry.define(
                        process.meta.uid,
                        Definition {
                            name: process.name.name.id.clone(),
                            kind: DefinitionKind::Process,
                            location: process.meta.location.clone(),
                            owner: None,
                        },
                    );
                    self.owner = Some(process.meta.uid);
                    self.push();
                    self.declare_self(&process.name.name.meta);
                    for variable in &process.variables {
                        self.declare_variable(variable, DefinitionKind::LocalVariable);
                    }
                    self.collect_labels(&process.body);
                    self.statements(&process.body);
                    self.pop();
                }
            }
        }
        self.owner = None;

        for instance in &algorithm.instances {
            for argument in &instance.arguments {
                self.expression(&argument.value);
            }
            self.expression(&instance.name.value);
            match self.registry.archetype(&instance.target.id) {
                Some(archetype) => {
                    self.registry.add_reference(instance.meta.uid, archetype);
                    if let Some(DefinitionKind::Archetype { arity }) =
                        self.registry.definition(archetype).map(|d| d.kind.clone())
                    {
                        if arity != instance.arguments.len() {
                            self.issues.error(
                                instance.meta.location.clone(),
                                IssueKind::ArityMismatch {
                                    name: instance.target.id.clone(),
                                    expected: arity,
                                    actual: instance.arguments.len(),
                                },
                            );
                        }
                    }
                }
                None => self.issues.error(
                    instance.target.meta.location.clone(),
                    IssueKind::UnknownIdentifier {
                        name: instance.target.id.clone(),
                    },
                ),
            }
        }
    }
}

/// モジュールとアルゴリズムの名前を解決し、定義レジストリを作る
///
/// `constants` の値は宣言された定数に結び付けられ、大域スコープで解決されます。
pub fn resolve_scopes(
    module: &TlaModule,
    algorithm: &PlusCalAlgorithm,
    loader: &mut TlaModuleLoader,
    constants: &BTreeMap<String, TlaExpression>,
    issues: &mut IssueContext,
) -> Result<DefinitionRegistry> {
    let mut scoper = Scoper::new(issues);
    for builtin in builtins::ALWAYS_VISIBLE {
        scoper.declare_builtin(*builtin);
    }
    scoper.load_extends(&module.extends, loader)?;
    scoper.declare_units(&module.units);

    let declared: Vec<(Uid, String)> = scoper
        .registry
        .constants()
        .iter()
        .filter_map(|uid| scoper.registry.definition(*uid).map(|d| (*uid, d.name.clone())))
        .collect();
    for (uid, name) in declared {
        if let Some(value) = constants.get(&name) {
            scoper.expression(value);
            scoper.registry.set_constant_value(uid, value.clone());
        }
    }

    scoper.algorithm(algorithm);
    scoper.drain_operators();
    log::debug!(
        "名前解決: 演算子 {} 件, 大域変数 {} 件",
        scoper.registry.operators().count(),
        scoper.registry.global_variables().len()
    );
    Ok(scoper.registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser;

    fn scope(module_source: &str, constants: &[(&str, &str)]) -> (DefinitionRegistry, PlusCalAlgorithm, IssueContext) {
        let mut issues = IssueContext::new();
        let module = parser::parse_module("Test.tla", module_source, &mut issues).unwrap().unwrap();
        let algorithm = parser::parse_algorithm("Test.tla", module_source, &mut issues).unwrap().unwrap();
        assert!(issues.is_empty(), "{}", issues.format());
        let constants: BTreeMap<String, TlaExpression> = constants
            .iter()
            .map(|(name, value)| {
                let e = parser::parse_expression("c", value, &mut issues).unwrap();
                (name.to_string(), e)
            })
            .collect();
        let mut loader = TlaModuleLoader::new(Vec::new());
        let registry = resolve_scopes(&module, &algorithm, &mut loader, &constants, &mut issues).unwrap();
        (registry, algorithm, issues)
    }

    fn codes(issues: &IssueContext) -> Vec<&'static str> {
        issues.issues().iter().map(|i| i.kind.code()).collect()
    }

    #[test]
    fn test_resolves_globals_constants_and_builtins() {
        let (registry, _, issues) = scope(
            "---- MODULE Test ----
EXTENDS Integers, Sequences
CONSTANT N
(* --algorithm Test {
    variables s = <<>>;
    { l: s := Append(s, N); }
} *)
====",
            &[("N", "3")],
        );
        assert!(issues.is_empty(), "{}", issues.format());
        assert_eq!(registry.global_variables().len(), 1);
        let constant = registry.constants()[0];
        assert!(registry.constant_value(constant).is_some());
        let builtins: Vec<_> = registry
            .references()
            .filter_map(|(_, def)| registry.definition(def))
            .filter(|d| matches!(d.kind, DefinitionKind::Builtin(Builtin::Append)))
            .collect();
        assert_eq!(builtins.len(), 1);
    }

    #[test]
    fn test_reports_unknown_identifier_and_label() {
        let (_, _, issues) = scope(
            "---- MODULE Test ----
(* --algorithm Test {
    { l: print y; goto nowhere; }
} *)
====",
            &[],
        );
        assert_eq!(codes(&issues), vec!["unknown-identifier", "unknown-label"]);
    }

    #[test]
    fn test_assignment_to_constant_is_rejected() {
        let (_, _, issues) = scope(
            "---- MODULE Test ----
CONSTANT N
(* --algorithm Test {
    { l: N := 1; }
} *)
====",
            &[("N", "1")],
        );
        assert_eq!(codes(&issues), vec!["not-a-variable"]);
    }

    #[test]
    fn test_duplicate_and_primed_local() {
        let (_, _, issues) = scope(
            "---- MODULE Test ----
(* --algorithm Test {
    variables x = 1, x = 2;
    { l: with (i \\in {1, 2}) { print i'; } }
} *)
====",
            &[],
        );
        assert_eq!(codes(&issues), vec!["duplicate-definition", "primed-local"]);
    }

    #[test]
    fn test_self_and_process_locals_resolve() {
        let (registry, algorithm, issues) = scope(
            "---- MODULE Test ----
EXTENDS Integers
(* --algorithm Test {
    variables total = 0;
    process (P \\in 1..2)
    variables mine = self;
    { l: total := total + mine; }
} *)
====",
            &[],
        );
        assert!(issues.is_empty(), "{}", issues.format());
        let Processes::Multi(processes) = &algorithm.processes else {
            panic!("複数プロセスが期待されます");
        };
        let self_uid = processes[0].name.name.meta.uid;
        let self_def = registry.definition(self_uid).unwrap();
        assert_eq!(self_def.kind, DefinitionKind::ProcessSelf);
        assert_eq!(self_def.owner, Some(processes[0].meta.uid));
    }

    #[test]
    fn test_unreachable_operators_are_not_checked() {
        let (registry, _, issues) = scope(
            "---- MODULE Test ----
EXTENDS Integers
Double(v) == v * 2
Unused == undefined_name
(* --algorithm Test {
    variables x = Double(2);
    { l: print x; }
} *)
====",
            &[],
        );
        assert!(issues.is_empty(), "{}", issues.format());
        let names: Vec<&str> = registry.operators().map(|(_, d)| d.name.id.as_str()).collect();
        assert_eq!(names, vec!["Double"]);
    }

    #[test]
    fn test_call_arity_is_checked() {
        let (_, _, issues) = scope(
            "---- MODULE Test ----
(* --algorithm Test {
    procedure p(a) { l1: return; }
    { l: call p(1, 2); }
} *)
====",
            &[],
        );
        assert_eq!(codes(&issues), vec!["arity-mismatch"]);
    }
}
