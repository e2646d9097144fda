//! # 原子性解析
//!
//! ラベルブロックごとに読み書きする共有変数を集め、同じ変数に触れる
//! ラベルを Union-Find で同じロックグループにまとめます。
//!
//! 共有変数はアルゴリズムの大域変数と、Modular PlusCal ではアーキタイプの
//! 引数（リソース）です。`call` は呼び出し先プロシージャ全体のアクセスを
//! 推移的に加えます。`define` の演算子が読む大域変数も読みとして数えます。

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::frontend::ast::{walk_statements, PlusCalAlgorithm, Statement, StatementKind, TlaExpression};
use crate::frontend::semantic::{DefinitionKind, DefinitionRegistry, LabelAccesses};
use crate::frontend::uid::Uid;

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }
}

struct Collector<'a> {
    registry: &'a DefinitionRegistry,
    shared: HashSet<Uid>,
    procedures: HashMap<Uid, LabelAccesses>,
}

impl<'a> Collector<'a> {
    fn new(registry: &'a DefinitionRegistry) -> Self {
        let shared = registry
            .global_variables()
            .iter()
            .copied()
            .chain(registry.references().filter_map(|(_, uid)| {
                let definition = registry.definition(uid)?;
                let owner = definition.owner.and_then(|o| registry.definition(o))?;
                match (&definition.kind, &owner.kind) {
                    (DefinitionKind::Parameter { .. }, DefinitionKind::Archetype { .. }) => Some(uid),
                    _ => None,
                }
            }))
            .collect();
        Self {
            registry,
            shared,
            procedures: HashMap::new(),
        }
    }

    /// 式が読む共有変数
    fn reads(&self, expression: &TlaExpression, out: &mut BTreeSet<Uid>, visiting: &mut HashSet<Uid>) {
        if let Some(definition) = self.registry.resolve(expression.meta.uid) {
            if self.shared.contains(&definition) {
                out.insert(definition);
            } else if let Some(operator) = self.registry.operator(definition) {
                if visiting.insert(definition) {
                    self.reads(&operator.body, out, visiting);
                }
            }
        }
        expression.for_each_child(&mut |child| self.reads(child, out, visiting));
    }

    /// 代入の左辺。根の変数は書き込み、添字は読み込み
    fn lhs(&self, lhs: &TlaExpression, accesses: &mut LabelAccesses) {
        use crate::frontend::ast::TlaExpressionKind as K;
        match &lhs.kind {
            K::FunctionCall { function, args } => {
                self.lhs(function, accesses);
                for arg in args {
                    self.reads(arg, &mut accesses.reads, &mut HashSet::new());
                }
            }
            K::RecordAccess { record, .. } => self.lhs(record, accesses),
            _ => {
                if let Some(definition) = self.registry.resolve(lhs.meta.uid) {
                    if self.shared.contains(&definition) {
                        accesses.writes.insert(definition);
                    }
                }
            }
        }
    }

    /// ラベル直下の文のアクセス。入れ子のラベルは別のブロックとして扱う
    fn statements(&self, statements: &[Statement], nested_labels: bool, accesses: &mut LabelAccesses) {
        for statement in statements {
            self.statement(statement, nested_labels, accesses);
        }
    }

    fn statement(&self, statement: &Statement, nested_labels: bool, accesses: &mut LabelAccesses) {
        let read = |e: &TlaExpression, accesses: &mut LabelAccesses| {
            self.reads(e, &mut accesses.reads, &mut HashSet::new())
        };
        match &statement.kind {
            StatementKind::LabeledStatements { statements, .. } => {
                if nested_labels {
                    self.statements(statements, nested_labels, accesses);
                }
            }
            StatementKind::Assignment(pairs) => {
                for pair in pairs {
                    self.lhs(&pair.lhs, accesses);
                    read(&pair.rhs, accesses);
                }
            }
            StatementKind::Await(e) | StatementKind::Print(e) | StatementKind::Assert(e) => read(e, accesses),
            StatementKind::If { condition, yes, no } => {
                read(condition, accesses);
                self.statements(yes, nested_labels, accesses);
                self.statements(no, nested_labels, accesses);
            }
            StatementKind::While { condition, body } => {
                read(condition, accesses);
                self.statements(body, nested_labels, accesses);
            }
            StatementKind::Either(branches) => {
                for branch in branches {
                    self.statements(branch, nested_labels, accesses);
                }
            }
            StatementKind::With { variables, body } => {
                for variable in variables {
                    read(&variable.value, accesses);
                }
                self.statements(body, nested_labels, accesses);
            }
            StatementKind::Call { arguments, .. } => {
                for argument in arguments {
                    read(argument, accesses);
                }
                if let Some(callee) = self
                    .registry
                    .resolve(statement.meta.uid)
                    .and_then(|uid| self.procedures.get(&uid))
                {
                    accesses.reads.extend(callee.reads.iter().copied());
                    accesses.writes.extend(callee.writes.iter().copied());
                }
            }
            StatementKind::MacroCall { arguments, .. } => {
                for argument in arguments {
                    read(argument, accesses);
                }
            }
            StatementKind::Skip | StatementKind::Return | StatementKind::Goto(_) => {}
        }
    }

    /// 各プロシージャ全体のアクセスを、呼び出しを含めて不動点まで求める
    fn procedure_accesses(&mut self, algorithm: &PlusCalAlgorithm) {
        loop {
            let mut changed = false;
            for procedure in &algorithm.procedures {
                let mut accesses = LabelAccesses::default();
                self.statements(&procedure.body, true, &mut accesses);
                let previous = self.procedures.get(&procedure.meta.uid);
                if previous != Some(&accesses) {
                    changed = true;
                    self.procedures.insert(procedure.meta.uid, accesses);
                }
            }
            if !changed {
                break;
            }
        }
    }
}

/// ラベルをロックグループに分け、結果をレジストリに書き込む
pub fn infer_atomicity(algorithm: &PlusCalAlgorithm, registry: &mut DefinitionRegistry) {
    let (labels, accesses) = {
        let mut collector = Collector::new(registry);
        collector.procedure_accesses(algorithm);

        let mut labels: Vec<Uid> = Vec::new();
        let mut accesses: Vec<LabelAccesses> = Vec::new();
        for body in algorithm.bodies() {
            walk_statements(body, &mut |statement| {
                if let StatementKind::LabeledStatements { label, statements } = &statement.kind {
                    let mut label_accesses = LabelAccesses::default();
                    collector.statements(statements, false, &mut label_accesses);
                    labels.push(label.meta.uid);
                    accesses.push(label_accesses);
                }
            });
        }
        (labels, accesses)
    };

    let mut sets = UnionFind::new(labels.len());
    let mut first_accessor: HashMap<Uid, usize> = HashMap::new();
    for (index, label_accesses) in accesses.iter().enumerate() {
        for variable in label_accesses.all() {
            match first_accessor.get(&variable) {
                Some(first) => sets.union(*first, index),
                None => {
                    first_accessor.insert(variable, index);
                }
            }
        }
    }

    let mut group_ids: HashMap<usize, usize> = HashMap::new();
    for (index, (label, label_accesses)) in labels.iter().zip(accesses).enumerate() {
        if !label_accesses.is_empty() {
            let root = sets.find(index);
            let next = group_ids.len();
            let group = *group_ids.entry(root).or_insert(next);
            registry.set_lock_group(*label, group);
            for variable in &label_accesses.reads {
                registry.add_read(group, *variable);
            }
            for variable in &label_accesses.writes {
                registry.add_write(group, *variable);
            }
        }
        registry.set_label_accesses(*label, label_accesses);
    }
    registry.set_lock_group_count(group_ids.len());
    log::debug!("原子性解析: ラベル {} 件, ロックグループ {} 件", labels.len(), group_ids.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::frontend::error::IssueContext;
    use crate::frontend::parser;
    use crate::frontend::semantic::resolve_scopes;
    use crate::module::TlaModuleLoader;

    fn analyse(algorithm_source: &str) -> (PlusCalAlgorithm, DefinitionRegistry) {
        let source = format!("---- MODULE Test ----\nEXTENDS Integers\n{}\n====\n", algorithm_source);
        let mut issues = IssueContext::new();
        let module = parser::parse_module("Test.tla", &source, &mut issues).unwrap().unwrap();
        let algorithm = parser::parse_algorithm("Test.tla", &source, &mut issues).unwrap().unwrap();
        let mut loader = TlaModuleLoader::new(Vec::new());
        let mut registry = resolve_scopes(&module, &algorithm, &mut loader, &BTreeMap::new(), &mut issues).unwrap();
        assert!(issues.is_empty(), "{}", issues.format());
        infer_atomicity(&algorithm, &mut registry);
        (algorithm, registry)
    }

    fn labels(algorithm: &PlusCalAlgorithm) -> HashMap<String, Uid> {
        let mut found = HashMap::new();
        for body in algorithm.bodies() {
            walk_statements(body, &mut |s| {
                if let StatementKind::LabeledStatements { label, .. } = &s.kind {
                    found.insert(label.name.clone(), label.meta.uid);
                }
            });
        }
        found
    }

    #[test]
    fn test_disjoint_labels_get_distinct_groups() {
        let (algorithm, registry) = analyse(
            "(* --algorithm Test {
    variables x = 0, y = 0;
    process (Writer = 1) { w: x := 1; }
    process (Reader = 2) { r: print y; }
} *)",
        );
        let labels = labels(&algorithm);
        let writer = registry.lock_group(labels["w"]).unwrap();
        let reader = registry.lock_group(labels["r"]).unwrap();
        assert_ne!(writer, reader);
        assert_eq!(registry.lock_group_count(), 2);
        assert!(registry.writes_in_group(reader).is_empty());
        assert_eq!(registry.writes_in_group(writer).len(), 1);
    }

    #[test]
    fn test_shared_variable_joins_groups() {
        let (algorithm, registry) = analyse(
            "(* --algorithm Test {
    variables x = 0, y = 0;
    process (A = 1) { a1: x := x + 1; a2: y := 2; }
    process (B = 2) { b1: print x; b2: skip; }
} *)",
        );
        let labels = labels(&algorithm);
        assert_eq!(registry.lock_group(labels["a1"]), registry.lock_group(labels["b1"]));
        assert_ne!(registry.lock_group(labels["a1"]), registry.lock_group(labels["a2"]));
        assert_eq!(registry.lock_group(labels["b2"]), None);
        assert_eq!(registry.lock_group_count(), 2);
    }

    #[test]
    fn test_calls_carry_procedure_accesses() {
        let (algorithm, registry) = analyse(
            "(* --algorithm Test {
    variables x = 0, y = 0;
    procedure bump() { p1: x := x + 1; return; }
    process (A = 1) { a1: call bump(); a2: skip; }
    process (B = 2) { b1: x := 0; }
} *)",
        );
        let labels = labels(&algorithm);
        let caller = registry.label_accesses(labels["a1"]).unwrap();
        assert_eq!(caller.writes.len(), 1);
        assert_eq!(registry.lock_group(labels["a1"]), registry.lock_group(labels["b1"]));
        assert_eq!(registry.lock_group(labels["p1"]), registry.lock_group(labels["b1"]));
    }
}
