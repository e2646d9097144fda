//! # Go コード生成
//!
//! 型と原子性の情報が揃ったアルゴリズムから Go のモジュールを作ります。
//! 大域変数の扱いは [`GlobalVariableStrategy`] に任せ、ここでは
//! パッケージ全体の構成と関数ごとの骨組みを担当します。
//!
//! 生成される関数は次の形に揃えます。
//!
//! - 局所変数はすべて関数の先頭で宣言する（`goto` が宣言を飛び越えないように）
//! - 式の変換で生じる一時変数は文ごとの入れ子ブロックに閉じ込める
//! - PlusCal のラベルは同名の Go のラベルになる

pub mod critical_section;
pub mod expression;
pub mod in_process;
pub mod resources;
pub mod statement;
pub mod strategy;
pub mod types;

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::backend::go::{
    BlockBuilder, GoDeclaration, GoExpression, GoField, GoModule, GoStatement, GoType, NameCleaner,
};
use crate::driver::options::{CompileOptions, Strategy};
use crate::frontend::ast::{
    walk_statements, AlgorithmKind, Archetype, OperatorDefinition, PlusCalAlgorithm, Procedure, Process, Processes,
    Statement, StatementKind, TlaExpression, TlaExpressionKind, VariableDeclaration,
};
use crate::frontend::error::{IssueContext, SourceLocation};
use crate::frontend::semantic::{DefinitionKind, DefinitionRegistry};
use crate::frontend::uid::Uid;
use crate::typesystem::{Type, TypeMap};

pub use critical_section::{CriticalSection, CriticalSectionTracker};
pub use in_process::InProcessStrategy;
pub use resources::{ResourceMode, ResourceStrategy};
pub use strategy::{GlobalVariableStrategy, GroupAccess};

/// 関数の中でエラーを受け取ったときの振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorExit {
    /// `panic(err)`（プロセス関数と `main`）
    Panic,
    /// `return err`（プロシージャとアーキタイプ）
    Return,
}

/// 1つの Go 関数を生成している間の状態
pub struct FunctionContext {
    pub builder: BlockBuilder,
    /// 定義 → その値を表す Go の式（局所変数・引数・束縛変数・`self`）
    pub bindings: HashMap<Uid, GoExpression>,
    /// 定義 → リソースを表す Go の式（アーキタイプの引数）
    pub resources: HashMap<Uid, GoExpression>,
    /// 要素ごとにリソースを持つアーキタイプの引数（`[]distsys.ArchetypeResource`）
    pub mapped_resources: HashSet<Uid>,
    /// ラベルの定義 → Go のラベル名
    pub labels: HashMap<Uid, String>,
    label_sources: HashMap<String, (String, SourceLocation)>,
    pub tracker: CriticalSectionTracker,
    pub error_exit: ErrorExit,
    pub self_value: Option<GoExpression>,
    /// 展開中の演算子（再帰の検出用）
    pub inlining: Vec<Uid>,
    /// 引数を取る `LET` 定義。呼び出し位置で展開する
    pub let_operators: HashMap<Uid, OperatorDefinition>,
    /// `EXCEPT` の `@` が指す値
    pub at_values: Vec<GoExpression>,
    pub issues: IssueContext,
}

impl FunctionContext {
    pub fn new(names: NameCleaner, error_exit: ErrorExit) -> Self {
        Self {
            builder: BlockBuilder::new(names),
            bindings: HashMap::new(),
            resources: HashMap::new(),
            mapped_resources: HashSet::new(),
            labels: HashMap::new(),
            label_sources: HashMap::new(),
            tracker: CriticalSectionTracker::default(),
            error_exit,
            self_value: None,
            inlining: Vec::new(),
            let_operators: HashMap::new(),
            at_values: Vec::new(),
            issues: IssueContext::new(),
        }
    }

    pub fn error_exit_statement(&self) -> GoStatement {
        let err = GoExpression::identifier("err");
        match self.error_exit {
            ErrorExit::Panic => GoStatement::expression(GoExpression::call("panic", vec![err])),
            ErrorExit::Return => GoStatement::Return(vec![err]),
        }
    }

    /// `if err != nil { <exit> }`
    pub fn check_error(&mut self) {
        let exit = self.error_exit_statement();
        self.builder.add(GoStatement::If {
            condition: GoExpression::binary("!=", GoExpression::identifier("err"), GoExpression::identifier("nil")),
            then: vec![exit],
            otherwise: None,
        });
    }

    /// 値を一時変数に束縛し、その名前を返す
    pub fn temp(&mut self, base: &str, value: GoExpression) -> GoExpression {
        let name = self.builder.fresh(base);
        self.builder.add(GoStatement::define(name.clone(), value));
        GoExpression::identifier(name)
    }

    /// 使われないかもしれない一時変数
    pub fn unused_temp(&mut self, base: &str, value: GoExpression) -> GoExpression {
        let temp = self.temp(base, value);
        self.builder.add(GoStatement::assign(GoExpression::identifier("_"), temp.clone()));
        temp
    }

    pub fn add_label(&mut self, uid: Uid, name: &str, location: &SourceLocation) -> String {
        let go_name = self.builder.fresh(name);
        self.labels.insert(uid, go_name.clone());
        self.label_sources
            .insert(go_name.clone(), (name.to_string(), location.clone()));
        go_name
    }

    /// Go のラベル名から元のラベル名と位置を引く
    pub fn label_source(&self, go_label: &str) -> (String, SourceLocation) {
        self.label_sources
            .get(go_label)
            .cloned()
            .unwrap_or_else(|| (go_label.to_string(), SourceLocation::unknown()))
    }
}

pub struct CodeGenerator<'a> {
    algorithm: &'a PlusCalAlgorithm,
    registry: &'a DefinitionRegistry,
    types: &'a TypeMap,
    strategy: Box<dyn GlobalVariableStrategy + 'a>,
    names: NameCleaner,
    package_names: HashMap<Uid, String>,
    /// 共有状態を読むため Go の関数にできず、呼び出し位置で展開する演算子
    inline_operators: HashSet<Uid>,
    imports: BTreeSet<String>,
    declarations: Vec<GoDeclaration>,
    issues: IssueContext,
}

/// 演算子が（他の演算子を通して）共有状態を読むか
fn reads_shared_state(
    registry: &DefinitionRegistry,
    expression: &TlaExpression,
    visiting: &mut HashSet<Uid>,
) -> bool {
    let mut found = false;
    if let Some((uid, definition)) = registry.resolved_definition(expression.meta.uid) {
        found = match &definition.kind {
            DefinitionKind::GlobalVariable | DefinitionKind::TlaVariable => true,
            DefinitionKind::Parameter { .. } => true,
            DefinitionKind::Operator { .. } => match registry.operator(uid) {
                Some(operator) if visiting.insert(uid) => reads_shared_state(registry, &operator.body, visiting),
                _ => false,
            },
            _ => false,
        };
    }
    if !found {
        expression.for_each_child(&mut |child| {
            if !found && reads_shared_state(registry, child, visiting) {
                found = true;
            }
        });
    }
    found
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        algorithm: &'a PlusCalAlgorithm,
        registry: &'a DefinitionRegistry,
        types: &'a TypeMap,
        options: &CompileOptions,
    ) -> Self {
        let mut names = NameCleaner::new();
        let mut package_names = HashMap::new();
        let name_of = |uid: Uid, names: &mut NameCleaner, package_names: &mut HashMap<Uid, String>| {
            if let Some(definition) = registry.definition(uid) {
                package_names.insert(uid, names.clean(&definition.name));
            }
        };
        for constant in registry.constants() {
            name_of(*constant, &mut names, &mut package_names);
        }
        for variable in registry.global_variables() {
            name_of(*variable, &mut names, &mut package_names);
        }

        let mut inline_operators = HashSet::new();
        for (uid, operator) in registry.operators() {
            let higher_order = operator.args.iter().any(|arg| arg.arity > 0);
            if higher_order || reads_shared_state(registry, &operator.body, &mut HashSet::from([uid])) {
                inline_operators.insert(uid);
            } else {
                name_of(uid, &mut names, &mut package_names);
            }
        }
        for procedure in &algorithm.procedures {
            package_names.insert(procedure.meta.uid, names.clean(&procedure.name));
        }
        for archetype in &algorithm.archetypes {
            package_names.insert(archetype.meta.uid, names.clean(&archetype.name));
        }
        if let Processes::Multi(processes) = &algorithm.processes {
            for process in processes {
                package_names.insert(process.meta.uid, names.clean(&process.name.name.id));
            }
        }

        let globals: HashMap<Uid, String> = registry
            .global_variables()
            .iter()
            .filter_map(|uid| package_names.get(uid).map(|name| (*uid, name.clone())))
            .collect();
        let groups = strategy::group_accesses(registry);
        let multi_process = matches!(algorithm.processes, Processes::Multi(_));
        let strategy: Box<dyn GlobalVariableStrategy + 'a> = match (algorithm.kind, options.strategy) {
            (AlgorithmKind::Modular, _) | (AlgorithmKind::PlusCal, Some(Strategy::StateServer)) => {
                let mode = if algorithm.kind == AlgorithmKind::Modular {
                    ResourceMode::Archetypes
                } else {
                    ResourceMode::StateServer { multi_process }
                };
                let mut source_names = HashMap::new();
                let mut value_types = HashMap::new();
                for (uid, definition) in registry.references().filter_map(|(_, uid)| {
                    registry.definition(uid).map(|d| (uid, d))
                }) {
                    if matches!(definition.kind, DefinitionKind::GlobalVariable | DefinitionKind::Parameter { .. }) {
                        source_names.insert(uid, definition.name.clone());
                        let ty = types.get(uid).cloned().unwrap_or(Type::Int);
                        value_types.insert(uid, types::go_type(&ty));
                    }
                }
                Box::new(ResourceStrategy::new(mode, globals, source_names, groups, value_types))
            }
            (AlgorithmKind::PlusCal, _) => Box::new(InProcessStrategy::new(globals, groups, multi_process)),
        };

        Self {
            algorithm,
            registry,
            types,
            strategy,
            names,
            package_names,
            inline_operators,
            imports: BTreeSet::new(),
            declarations: Vec::new(),
            issues: IssueContext::new(),
        }
    }

    /// 定義や式の型。推論に現れなかったものは `Int` とみなす
    pub(crate) fn type_of(&self, uid: Uid) -> Type {
        self.types.get(uid).cloned().unwrap_or(Type::Int)
    }

    pub(crate) fn go_type_of(&self, uid: Uid) -> GoType {
        types::go_type(&self.type_of(uid))
    }

    pub(crate) fn package_name(&self, uid: Uid) -> String {
        self.package_names
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| format!("undefined{}", uid.raw()))
    }

    fn new_function(&self, error_exit: ErrorExit) -> FunctionContext {
        FunctionContext::new(self.names.nested(), error_exit)
    }

    /// 関数を閉じて宣言に加える
    fn finish_function(
        &mut self,
        f: FunctionContext,
        name: String,
        params: Vec<GoField>,
        results: Vec<GoType>,
    ) {
        let FunctionContext { builder, issues, .. } = f;
        let (body, imports) = builder.finish();
        self.imports.extend(imports);
        self.issues.extend(issues.into_issues());
        self.declarations.push(GoDeclaration::Function {
            name,
            params,
            results,
            body,
        });
    }

    /// `var err error` を先頭に置く
    fn declare_err(&self, f: &mut FunctionContext) {
        f.builder.add(GoStatement::Var {
            name: "err".to_string(),
            ty: Some(GoType::error()),
            value: None,
        });
        f.builder.add(GoStatement::assign(
            GoExpression::identifier("_"),
            GoExpression::identifier("err"),
        ));
    }

    /// 局所変数を宣言してから初期値を与える
    fn local_variables(&mut self, f: &mut FunctionContext, variables: &[VariableDeclaration]) {
        let mut declared = Vec::new();
        for variable in variables {
            let name = f.builder.fresh(&variable.name.id);
            let ty = self.go_type_of(variable.name.meta.uid);
            f.builder.add(GoStatement::Var {
                name: name.clone(),
                ty: Some(ty),
                value: None,
            });
            f.builder.add(GoStatement::assign(
                GoExpression::identifier("_"),
                GoExpression::identifier(name.clone()),
            ));
            declared.push((variable, name));
        }
        for (variable, name) in declared {
            f.builder.open();
            if !matches!(variable.value.kind, TlaExpressionKind::DefaultInit) {
                let value = self.initial_value(f, variable);
                f.builder
                    .add(GoStatement::assign(GoExpression::identifier(name.clone()), value));
            }
            let block = f.builder.close();
            f.builder.add(GoStatement::Block(block));
            f.bindings
                .insert(variable.name.meta.uid, GoExpression::identifier(name));
        }
    }

    /// `x = e` なら `e`、`x \in S` なら `S` から1つ選んだ値
    fn initial_value(&mut self, f: &mut FunctionContext, variable: &VariableDeclaration) -> GoExpression {
        let value = self.expression(f, &variable.value);
        if variable.is_set {
            f.builder.import("pgo/datatypes");
            GoExpression::call("datatypes.Choose", vec![value])
        } else {
            value
        }
    }

    /// 本体に現れるラベルに Go のラベル名を割り当てる
    fn collect_labels(&self, f: &mut FunctionContext, body: &[Statement]) {
        let mut labels = Vec::new();
        walk_statements(body, &mut |statement| {
            if let StatementKind::LabeledStatements { label, .. } = &statement.kind {
                labels.push(label.clone());
            }
        });
        for label in labels {
            f.add_label(label.meta.uid, &label.name, &label.meta.location);
        }
    }

    fn self_parameter(&self, f: &mut FunctionContext, self_uid: Uid) -> GoField {
        let name = f.builder.fresh("self");
        let expression = GoExpression::identifier(name.clone());
        f.bindings.insert(self_uid, expression.clone());
        f.self_value = Some(expression);
        GoField::new(name, self.go_type_of(self_uid))
    }

    fn body(&mut self, f: &mut FunctionContext, body: &[Statement]) {
        self.collect_labels(f, body);
        self.statements(f, body);
        self.end_section(f);
    }

    fn constants_and_globals(&mut self) {
        let registry = self.registry;
        let mut constants: Vec<(String, Uid)> = registry
            .constants()
            .iter()
            .map(|uid| (self.package_name(*uid), *uid))
            .collect();
        constants.sort();
        for (name, uid) in &constants {
            let ty = self.go_type_of(*uid);
            self.declarations.push(GoDeclaration::Var { name: name.clone(), ty });
        }
        for uid in registry.global_variables() {
            let value_type = self.go_type_of(*uid);
            if let Some(ty) = self.strategy.global_type(*uid, &value_type) {
                self.declarations.push(GoDeclaration::Var {
                    name: self.package_name(*uid),
                    ty,
                });
            }
        }
        let strategy_variables = self.strategy.package_variables();
        if !strategy_variables.is_empty() {
            for import in self.strategy.imports() {
                self.imports.insert(import.to_string());
            }
        }
        for (name, ty) in strategy_variables {
            self.declarations.push(GoDeclaration::Var { name, ty });
        }

        let mut f = self.new_function(ErrorExit::Panic);
        for (name, uid) in &constants {
            if let Some(value) = registry.constant_value(*uid) {
                f.builder.open();
                let value = self.expression(&mut f, value);
                f.builder
                    .add(GoStatement::assign(GoExpression::identifier(name.clone()), value));
                let block = f.builder.close();
                f.builder.add(GoStatement::Block(block));
            }
        }
        let algorithm = self.algorithm;
        let value_types: HashMap<Uid, GoType> = algorithm
            .variables
            .iter()
            .map(|v| (v.name.meta.uid, self.go_type_of(v.name.meta.uid)))
            .collect();
        for variable in &algorithm.variables {
            let uid = variable.name.meta.uid;
            if self.strategy.global_type(uid, &value_types[&uid]).is_none() {
                continue;
            }
            let initial = f.builder.fresh(&format!("{}Init", variable.name.id));
            f.builder.add(GoStatement::Var {
                name: initial.clone(),
                ty: Some(value_types[&uid].clone()),
                value: None,
            });
            if !matches!(variable.value.kind, TlaExpressionKind::DefaultInit) {
                f.builder.open();
                let value = self.initial_value(&mut f, variable);
                f.builder
                    .add(GoStatement::assign(GoExpression::identifier(initial.clone()), value));
                let block = f.builder.close();
                f.builder.add(GoStatement::Block(block));
            }
            self.strategy
                .init_global(&mut f, uid, GoExpression::identifier(initial.clone()));
            f.bindings.insert(uid, GoExpression::identifier(initial));
        }
        self.strategy.init_postlude(&mut f);
        if f.builder.is_empty() {
            self.issues.extend(f.issues.into_issues());
        } else {
            self.finish_function(f, "init".to_string(), Vec::new(), Vec::new());
        }
    }

    /// 共有状態を読まない演算子を Go の関数にする
    fn operators(&mut self) {
        let registry = self.registry;
        for (uid, operator) in registry.operators() {
            if self.inline_operators.contains(&uid) {
                continue;
            }
            let mut f = self.new_function(ErrorExit::Panic);
            let mut params = Vec::new();
            for arg in &operator.args {
                let name = f.builder.fresh(&arg.name.id);
                f.bindings
                    .insert(arg.name.meta.uid, GoExpression::identifier(name.clone()));
                params.push(GoField::new(name, self.go_type_of(arg.name.meta.uid)));
            }
            let result_type = match self.type_of(uid) {
                Type::Operator { result, .. } => types::go_type(&result),
                other => types::go_type(&other),
            };
            let value = self.expression(&mut f, &operator.body);
            f.builder.add(GoStatement::Return(vec![value]));
            let name = self.package_name(uid);
            self.finish_function(f, name, params, vec![result_type]);
        }
    }

    /// `func P(self T, args...) error`
    fn procedure(&mut self, procedure: &Procedure) {
        let mut f = self.new_function(ErrorExit::Return);
        let mut params = vec![self.self_parameter(&mut f, procedure.self_meta.uid)];
        for param in &procedure.params {
            let name = f.builder.fresh(&param.name.id);
            f.bindings
                .insert(param.name.meta.uid, GoExpression::identifier(name.clone()));
            params.push(GoField::new(name, self.go_type_of(param.name.meta.uid)));
        }
        self.declare_err(&mut f);
        self.local_variables(&mut f, &procedure.variables);
        self.body(&mut f, &procedure.body);
        if !f.builder.ends_with_exit() {
            f.builder.add(GoStatement::Return(vec![GoExpression::identifier("nil")]));
        }
        let name = self.package_name(procedure.meta.uid);
        self.finish_function(f, name, params, vec![GoType::error()]);
    }

    /// `func A(self T, resources...) error`
    fn archetype(&mut self, archetype: &Archetype) {
        let mut f = self.new_function(ErrorExit::Return);
        let mut params = vec![self.self_parameter(&mut f, archetype.self_meta.uid)];
        for param in &archetype.params {
            let uid = param.name.meta.uid;
            let name = f.builder.fresh(&param.name.id);
            f.resources.insert(uid, GoExpression::identifier(name.clone()));
            // 整数をキーとする関数は要素ごとのリソースの列として受け取る
            let ty = match self.type_of(uid) {
                Type::Map(key, _) if *key == Type::Int => {
                    f.mapped_resources.insert(uid);
                    GoType::slice(resources::resource_type())
                }
                _ => resources::resource_type(),
            };
            params.push(GoField::new(name, ty));
        }
        self.imports.insert("pgo/distsys".to_string());
        self.declare_err(&mut f);
        self.local_variables(&mut f, &archetype.variables);
        self.strategy.process_prelude(&mut f);
        self.body(&mut f, &archetype.body);
        if !f.builder.ends_with_exit() {
            f.builder.add(GoStatement::Return(vec![GoExpression::identifier("nil")]));
        }
        let name = self.package_name(archetype.meta.uid);
        self.finish_function(f, name, params, vec![GoType::error()]);
    }

    /// `func P(self T)`。エラーは `panic` にする
    fn process(&mut self, process: &Process) {
        let mut f = self.new_function(ErrorExit::Panic);
        let params = vec![self.self_parameter(&mut f, process.name.name.meta.uid)];
        self.declare_err(&mut f);
        self.local_variables(&mut f, &process.variables);
        self.strategy.process_prelude(&mut f);
        self.body(&mut f, &process.body);
        let name = self.package_name(process.meta.uid);
        self.finish_function(f, name, params, Vec::new());
    }

    /// 単一プロセスのアルゴリズムでは本体がそのまま `main` になる
    fn single_main(&mut self, body: &[Statement]) {
        let mut f = self.new_function(ErrorExit::Panic);
        self.declare_err(&mut f);
        self.body(&mut f, body);
        self.finish_function(f, "main".to_string(), Vec::new(), Vec::new());
    }

    /// 各プロセスを goroutine として起動する `main`
    fn multi_main(&mut self, processes: &[Process]) {
        let mut f = self.new_function(ErrorExit::Panic);
        for process in processes {
            let function = self.package_name(process.meta.uid);
            f.builder.open();
            let value = self.expression(&mut f, &process.name.value);
            if process.name.is_set {
                let element = f.builder.fresh("id");
                f.builder.open();
                self.strategy.spawn(
                    &mut f,
                    GoExpression::call(function, vec![GoExpression::identifier(element.clone())]),
                );
                let body = f.builder.close();
                f.builder.add(GoStatement::ForRange {
                    key: None,
                    value: Some(element),
                    target: value,
                    body,
                });
            } else {
                self.strategy.spawn(&mut f, GoExpression::call(function, vec![value]));
            }
            let block = f.builder.close();
            f.builder.add(GoStatement::Block(block));
        }
        self.strategy.main_postlude(&mut f);
        self.finish_function(f, "main".to_string(), Vec::new(), Vec::new());
    }

    fn run(&mut self) {
        self.constants_and_globals();
        self.operators();
        let algorithm = self.algorithm;
        for procedure in &algorithm.procedures {
            self.procedure(procedure);
        }
        match algorithm.kind {
            AlgorithmKind::Modular => {
                for archetype in &algorithm.archetypes {
                    self.archetype(archetype);
                }
            }
            AlgorithmKind::PlusCal => match &algorithm.processes {
                Processes::Single(body) => self.single_main(body),
                Processes::Multi(processes) => {
                    for process in processes {
                        self.process(process);
                    }
                    self.multi_main(processes);
                }
            },
        }
    }
}

/// アルゴリズムを Go のモジュールにする
///
/// 返すモジュールは正規化前です。問題は `issues` に追記します。
pub fn generate(
    algorithm: &PlusCalAlgorithm,
    registry: &DefinitionRegistry,
    types: &TypeMap,
    options: &CompileOptions,
    issues: &mut IssueContext,
) -> GoModule {
    let mut generator = CodeGenerator::new(algorithm, registry, types, options);
    generator.run();
    log::debug!(
        "コード生成: 宣言 {} 件, インポート {} 件",
        generator.declarations.len(),
        generator.imports.len()
    );
    issues.extend(generator.issues.into_issues());
    GoModule {
        package: options.package.clone(),
        imports: generator.imports.into_iter().collect(),
        declarations: generator.declarations,
    }
}
