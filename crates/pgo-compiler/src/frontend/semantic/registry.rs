//! # 定義レジストリ
//!
//! 名前解決の結果を識別子をキーにして保持します。定義は識別子ごとに
//! 一度だけ書き込まれ、その後は原子性解析がロックグループの情報を
//! 追記するだけです。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::frontend::ast::{OperatorDefinition, TlaExpression};
use crate::frontend::error::SourceLocation;
use crate::frontend::uid::Uid;

use super::builtins::Builtin;

/// 定義の種類
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionKind {
    /// アルゴリズムの大域変数
    GlobalVariable,
    /// プロセス・プロシージャ・アーキタイプの局所変数
    LocalVariable,
    /// プロシージャやアーキタイプの引数
    Parameter { is_ref: bool },
    /// `self`
    ProcessSelf,
    /// `CONSTANT` 宣言
    Constant,
    /// モジュールの `VARIABLE` 宣言
    TlaVariable,
    /// 演算子・関数定義
    Operator { arity: usize },
    /// 演算子定義の仮引数
    OperatorParameter { arity: usize },
    /// 量化子・`with`・集合内包などの束縛変数
    Bound,
    Builtin(Builtin),
    /// `N == INSTANCE M`
    ModuleInstance,
    Macro,
    Procedure { arity: usize },
    Process,
    Archetype { arity: usize },
    Label,
}

impl DefinitionKind {
    /// 代入の対象になれるか
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            DefinitionKind::GlobalVariable
                | DefinitionKind::LocalVariable
                | DefinitionKind::Parameter { .. }
                | DefinitionKind::TlaVariable
        )
    }

    /// プライムを付けられない局所的な名前か
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            DefinitionKind::LocalVariable
                | DefinitionKind::Parameter { .. }
                | DefinitionKind::ProcessSelf
                | DefinitionKind::OperatorParameter { .. }
                | DefinitionKind::Bound
        )
    }
}

/// 1つの定義
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub kind: DefinitionKind,
    pub location: SourceLocation,
    /// 局所的な定義を持つプロセス・プロシージャ・アーキタイプ
    pub owner: Option<Uid>,
}

/// 名前解決と原子性解析の結果
#[derive(Debug, Default, Clone)]
pub struct DefinitionRegistry {
    definitions: HashMap<Uid, Definition>,
    references: HashMap<Uid, Uid>,
    operators: HashMap<Uid, OperatorDefinition>,
    operator_order: Vec<Uid>,
    constants: Vec<Uid>,
    constant_values: HashMap<Uid, TlaExpression>,
    global_variables: Vec<Uid>,
    procedures: HashMap<String, Uid>,
    archetypes: HashMap<String, Uid>,
    lock_groups: HashMap<Uid, usize>,
    group_reads: BTreeMap<usize, BTreeSet<Uid>>,
    group_writes: BTreeMap<usize, BTreeSet<Uid>>,
    label_accesses: HashMap<Uid, LabelAccesses>,
    lock_group_count: usize,
}

/// 1つのラベルブロックが触れる大域変数
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LabelAccesses {
    pub reads: BTreeSet<Uid>,
    pub writes: BTreeSet<Uid>,
}

impl LabelAccesses {
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    pub fn all(&self) -> BTreeSet<Uid> {
        self.reads.union(&self.writes).copied().collect()
    }
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 定義を書き込む。既にあれば書き込まずにその定義を返す
    pub fn define(&mut self, uid: Uid, definition: Definition) -> Option<&Definition> {
        if self.definitions.contains_key(&uid) {
            return self.definitions.get(&uid);
        }
        match definition.kind {
            DefinitionKind::Constant => self.constants.push(uid),
            DefinitionKind::GlobalVariable => self.global_variables.push(uid),
            DefinitionKind::Procedure { .. } => {
                self.procedures.insert(definition.name.clone(), uid);
            }
            DefinitionKind::Archetype { .. } => {
                self.archetypes.insert(definition.name.clone(), uid);
            }
            _ => {}
        }
        self.definitions.insert(uid, definition);
        None
    }

    pub fn definition(&self, uid: Uid) -> Option<&Definition> {
        self.definitions.get(&uid)
    }

    pub fn add_reference(&mut self, site: Uid, definition: Uid) {
        self.references.insert(site, definition);
    }

    /// 参照位置から定義の識別子を引く
    pub fn resolve(&self, site: Uid) -> Option<Uid> {
        self.references.get(&site).copied()
    }

    /// 参照位置から定義を引く
    pub fn resolved_definition(&self, site: Uid) -> Option<(Uid, &Definition)> {
        let uid = self.resolve(site)?;
        self.definition(uid).map(|d| (uid, d))
    }

    pub fn references(&self) -> impl Iterator<Item = (Uid, Uid)> + '_ {
        self.references.iter().map(|(k, v)| (*k, *v))
    }

    /// 到達可能な演算子定義を登録する（名前の識別子がキー）
    pub fn add_operator(&mut self, uid: Uid, definition: OperatorDefinition) {
        if self.operators.insert(uid, definition).is_none() {
            self.operator_order.push(uid);
        }
    }

    pub fn operator(&self, uid: Uid) -> Option<&OperatorDefinition> {
        self.operators.get(&uid)
    }

    /// 登録順の演算子定義
    pub fn operators(&self) -> impl Iterator<Item = (Uid, &OperatorDefinition)> + '_ {
        self.operator_order
            .iter()
            .filter_map(move |uid| self.operators.get(uid).map(|d| (*uid, d)))
    }

    pub fn constants(&self) -> &[Uid] {
        &self.constants
    }

    pub fn set_constant_value(&mut self, uid: Uid, value: TlaExpression) {
        self.constant_values.insert(uid, value);
    }

    pub fn constant_value(&self, uid: Uid) -> Option<&TlaExpression> {
        self.constant_values.get(&uid)
    }

    pub fn global_variables(&self) -> &[Uid] {
        &self.global_variables
    }

    pub fn procedure(&self, name: &str) -> Option<Uid> {
        self.procedures.get(name).copied()
    }

    pub fn archetype(&self, name: &str) -> Option<Uid> {
        self.archetypes.get(name).copied()
    }

    pub fn set_lock_group(&mut self, label: Uid, group: usize) {
        self.lock_groups.insert(label, group);
    }

    pub fn lock_group(&self, label: Uid) -> Option<usize> {
        self.lock_groups.get(&label).copied()
    }

    pub fn add_read(&mut self, group: usize, variable: Uid) {
        self.group_reads.entry(group).or_default().insert(variable);
    }

    pub fn add_write(&mut self, group: usize, variable: Uid) {
        self.group_writes.entry(group).or_default().insert(variable);
    }

    pub fn reads_in_group(&self, group: usize) -> BTreeSet<Uid> {
        self.group_reads.get(&group).cloned().unwrap_or_default()
    }

    pub fn writes_in_group(&self, group: usize) -> BTreeSet<Uid> {
        self.group_writes.get(&group).cloned().unwrap_or_default()
    }

    pub fn set_label_accesses(&mut self, label: Uid, accesses: LabelAccesses) {
        self.label_accesses.insert(label, accesses);
    }

    pub fn label_accesses(&self, label: Uid) -> Option<&LabelAccesses> {
        self.label_accesses.get(&label)
    }

    pub fn set_lock_group_count(&mut self, count: usize) {
        self.lock_group_count = count;
    }

    pub fn lock_group_count(&self) -> usize {
        self.lock_group_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, kind: DefinitionKind) -> Definition {
        Definition {
            name: name.to_string(),
            kind,
            location: SourceLocation::unknown(),
            owner: None,
        }
    }

    #[test]
    fn test_define_is_write_once() {
        let mut registry = DefinitionRegistry::new();
        let uid = Uid::fresh();
        assert!(registry.define(uid, definition("x", DefinitionKind::GlobalVariable)).is_none());
        let previous = registry.define(uid, definition("y", DefinitionKind::Constant));
        assert_eq!(previous.map(|d| d.name.as_str()), Some("x"));
        assert_eq!(registry.global_variables(), &[uid]);
        assert!(registry.constants().is_empty());
    }

    #[test]
    fn test_references_and_lock_groups() {
        let mut registry = DefinitionRegistry::new();
        let def = Uid::fresh();
        let site = Uid::fresh();
        registry.define(def, definition("P", DefinitionKind::Procedure { arity: 0 }));
        registry.add_reference(site, def);
        assert_eq!(registry.resolve(site), Some(def));
        assert_eq!(registry.procedure("P"), Some(def));

        let label = Uid::fresh();
        registry.set_lock_group(label, 0);
        registry.add_read(0, def);
        assert_eq!(registry.lock_group(label), Some(0));
        assert!(registry.writes_in_group(0).is_empty());
        assert_eq!(registry.reads_in_group(0).len(), 1);
    }
}
