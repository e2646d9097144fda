//! # リソース経由の戦略
//!
//! 共有状態を `distsys.ArchetypeResource` として扱います。臨界区間は
//! `AcquireResources` で始め、失敗すればラベルからやり直します。
//! 読み書きの失敗は `AbortResources` で取り消してからやり直します。
//!
//! Modular PlusCal ではアーキタイプの引数がリソースです。整数をキーとする
//! 関数型の引数は要素ごとのリソースの列で、触れた要素だけを区間の途中で
//! 取得し、区間の終わりに列ごと解放します。PlusCal の
//! 複数プロセスを状態サーバーで動かすときは、大域変数を
//! `distsys.NewStateServerResource` で作ったパッケージ変数にします。

use std::collections::HashMap;

use crate::backend::go::{GoExpression, GoStatement, GoType};
use crate::frontend::error::{IssueKind, SourceLocation};
use crate::frontend::uid::Uid;

use super::strategy::{self, GlobalVariableStrategy, GroupAccess};
use super::FunctionContext;

/// リソースの持ち主
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMode {
    /// アーキタイプの引数
    Archetypes,
    /// 状態サーバー上の大域変数
    StateServer { multi_process: bool },
}

pub struct ResourceStrategy {
    mode: ResourceMode,
    globals: HashMap<Uid, String>,
    source_names: HashMap<Uid, String>,
    groups: Vec<GroupAccess>,
    value_types: HashMap<Uid, GoType>,
}

pub fn resource_type() -> GoType {
    GoType::named("distsys.ArchetypeResource")
}

impl ResourceStrategy {
    /// `source_names` は状態サーバー上でのリソース名（元の変数名）
    pub fn new(
        mode: ResourceMode,
        globals: HashMap<Uid, String>,
        source_names: HashMap<Uid, String>,
        groups: Vec<GroupAccess>,
        value_types: HashMap<Uid, GoType>,
    ) -> Self {
        Self {
            mode,
            globals,
            source_names,
            groups,
            value_types,
        }
    }

    fn multi_process(&self) -> bool {
        matches!(self.mode, ResourceMode::StateServer { multi_process: true })
    }

    fn resource(&self, f: &FunctionContext, variable: Uid) -> Option<GoExpression> {
        if let Some(resource) = f.resources.get(&variable) {
            return Some(resource.clone());
        }
        match self.mode {
            ResourceMode::StateServer { .. } => self.globals.get(&variable).map(|n| GoExpression::identifier(n.clone())),
            ResourceMode::Archetypes => None,
        }
    }

    /// グループの変数のリソース。`mapped` なら要素ごとのリソースの列だけを返す
    fn group_resources(&self, f: &FunctionContext, group: usize, mapped: bool) -> Vec<GoExpression> {
        self.groups
            .get(group)
            .map(|g| {
                g.variables
                    .iter()
                    .filter(|v| f.mapped_resources.contains(*v) == mapped)
                    .filter_map(|v| self.resource(f, *v))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn group_writes(&self, group: usize) -> bool {
        self.groups.get(group).map(|g| g.writes).unwrap_or(true)
    }

    fn access(writes: bool) -> GoExpression {
        GoExpression::identifier(if writes { "distsys.WriteAccess" } else { "distsys.ReadAccess" })
    }

    fn resources_call(function: &str, mut args: Vec<GoExpression>, resources: Vec<GoExpression>) -> GoExpression {
        args.extend(resources);
        GoExpression::call(format!("distsys.{}", function), args)
    }

    /// `distsys.F(list...)`
    fn spread_call(function: &str, list: GoExpression) -> GoExpression {
        GoExpression::Call {
            function: Box::new(GoExpression::identifier(format!("distsys.{}", function))),
            args: vec![list],
            ellipsis: true,
        }
    }

    /// `err = call` に続けて失敗時の `exit`
    fn checked(f: &mut FunctionContext, call: GoExpression, exit: Vec<GoStatement>) {
        f.builder.add(GoStatement::assign(Self::err(), call));
        f.builder.add(GoStatement::If {
            condition: Self::err_is_set(),
            then: exit,
            otherwise: None,
        });
    }

    fn err() -> GoExpression {
        GoExpression::identifier("err")
    }

    fn err_is_set() -> GoExpression {
        GoExpression::binary("!=", Self::err(), GoExpression::identifier("nil"))
    }

    /// 現在の臨界区間を取り消してラベルからやり直す文。区間の外なら呼び出し元へ返す
    fn retry(&self, f: &mut FunctionContext) -> Vec<GoStatement> {
        let current = f.tracker.current().cloned();
        f.builder.open();
        match current {
            Some(section) => {
                if let Some(group) = section.group {
                    self.abort_critical_section(f, group, &section.label);
                }
                f.builder.add(GoStatement::Goto(section.label));
            }
            None => {
                let exit = f.error_exit_statement();
                f.builder.add(exit);
            }
        }
        f.builder.close()
    }

    fn unknown_resource(&self, f: &mut FunctionContext, variable: Uid, location: &SourceLocation) {
        f.issues.error(
            location.clone(),
            IssueKind::UnsupportedConstruct {
                construct: format!(
                    "アーキタイプの外での大域変数 {} へのアクセス",
                    self.source_names.get(&variable).cloned().unwrap_or_else(|| variable.to_string())
                ),
            },
        );
    }

    fn whole_mapped_resource(&self, f: &mut FunctionContext, variable: Uid, location: &SourceLocation) {
        f.issues.error(
            location.clone(),
            IssueKind::UnsupportedConstruct {
                construct: format!(
                    "要素ごとのリソース {} 全体の読み書き",
                    self.source_names.get(&variable).cloned().unwrap_or_else(|| variable.to_string())
                ),
            },
        );
    }

    /// 要素のリソースを取り出し、現在の区間の権限で取得する
    fn element(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        key: GoExpression,
        location: &SourceLocation,
    ) -> Option<GoExpression> {
        let Some(list) = self.resource(f, variable) else {
            self.unknown_resource(f, variable, location);
            return None;
        };
        let element = GoExpression::index(list, key);
        let writes = f
            .tracker
            .current()
            .and_then(|section| section.group)
            .map_or(true, |group| self.group_writes(group));
        let retry = self.retry(f);
        Self::checked(
            f,
            Self::resources_call("AcquireResources", vec![Self::access(writes)], vec![element.clone()]),
            retry,
        );
        Some(element)
    }

    fn read_resource(&self, f: &mut FunctionContext, resource: GoExpression, value_type: GoType) -> GoExpression {
        let raw = f.builder.fresh("raw");
        f.builder.add(GoStatement::Var {
            name: raw.clone(),
            ty: Some(GoType::Interface),
            value: None,
        });
        f.builder.add(GoStatement::Assign {
            lhs: vec![GoExpression::identifier(raw.clone()), Self::err()],
            rhs: vec![GoExpression::method(resource, "Read", Vec::new())],
            define: false,
        });
        let retry = self.retry(f);
        f.builder.add(GoStatement::If {
            condition: Self::err_is_set(),
            then: retry,
            otherwise: None,
        });
        let value = f.builder.fresh("value");
        f.builder.add(GoStatement::define(
            value.clone(),
            GoExpression::TypeAssertion {
                target: Box::new(GoExpression::identifier(raw)),
                ty: value_type,
            },
        ));
        GoExpression::identifier(value)
    }

    fn write_resource(&self, f: &mut FunctionContext, resource: GoExpression, value: GoExpression) {
        let retry = self.retry(f);
        Self::checked(f, GoExpression::method(resource, "Write", vec![value]), retry);
    }
}

impl GlobalVariableStrategy for ResourceStrategy {
    fn imports(&self) -> Vec<&'static str> {
        match self.mode {
            ResourceMode::StateServer { multi_process: true } => vec!["pgo/distsys", "sync"],
            _ => vec!["pgo/distsys"],
        }
    }

    fn global_type(&self, _variable: Uid, _value_type: &GoType) -> Option<GoType> {
        match self.mode {
            ResourceMode::StateServer { .. } => Some(resource_type()),
            ResourceMode::Archetypes => None,
        }
    }

    fn package_variables(&self) -> Vec<(String, GoType)> {
        if self.multi_process() {
            strategy::start_channel_variables()
        } else {
            Vec::new()
        }
    }

    fn init_global(&self, f: &mut FunctionContext, variable: Uid, value: GoExpression) {
        if let (ResourceMode::StateServer { .. }, Some(name)) = (self.mode, self.globals.get(&variable)) {
            let source = self.source_names.get(&variable).cloned().unwrap_or_else(|| name.clone());
            f.builder.add(GoStatement::assign(
                GoExpression::identifier(name.clone()),
                GoExpression::call("distsys.NewStateServerResource", vec![GoExpression::String(source), value]),
            ));
        }
    }

    fn init_postlude(&self, f: &mut FunctionContext) {
        if self.multi_process() {
            strategy::make_start_channel(f);
        }
    }

    fn process_prelude(&self, f: &mut FunctionContext) {
        if self.multi_process() {
            strategy::wait_for_start(f);
        }
    }

    fn spawn(&self, f: &mut FunctionContext, call: GoExpression) {
        strategy::spawn_with_wait_group(f, call);
    }

    fn main_postlude(&self, f: &mut FunctionContext) {
        if self.multi_process() {
            strategy::release_and_wait(f);
        }
    }

    fn start_critical_section(&self, f: &mut FunctionContext, group: usize, label: &str) {
        let resources = self.group_resources(f, group, false);
        if resources.is_empty() {
            return;
        }
        let access = Self::access(self.group_writes(group));
        Self::checked(
            f,
            Self::resources_call("AcquireResources", vec![access], resources),
            vec![GoStatement::Goto(label.to_string())],
        );
    }

    fn end_critical_section(&self, f: &mut FunctionContext, group: usize, _label: &str) {
        let resources = self.group_resources(f, group, false);
        if !resources.is_empty() {
            let exit = f.error_exit_statement();
            Self::checked(f, Self::resources_call("ReleaseResources", Vec::new(), resources), vec![exit]);
        }
        for list in self.group_resources(f, group, true) {
            let exit = f.error_exit_statement();
            Self::checked(f, Self::spread_call("ReleaseResources", list), vec![exit]);
        }
    }

    fn abort_critical_section(&self, f: &mut FunctionContext, group: usize, _label: &str) {
        let resources = self.group_resources(f, group, false);
        if !resources.is_empty() {
            f.builder.add(GoStatement::expression(Self::resources_call(
                "AbortResources",
                Vec::new(),
                resources,
            )));
        }
        for list in self.group_resources(f, group, true) {
            f.builder
                .add(GoStatement::expression(Self::spread_call("AbortResources", list)));
        }
    }

    fn rolls_back(&self) -> bool {
        true
    }

    fn read_global_variable(&self, f: &mut FunctionContext, variable: Uid, location: &SourceLocation) -> GoExpression {
        let Some(resource) = self.resource(f, variable) else {
            self.unknown_resource(f, variable, location);
            return GoExpression::identifier("nil");
        };
        if f.mapped_resources.contains(&variable) {
            self.whole_mapped_resource(f, variable, location);
            return GoExpression::identifier("nil");
        }
        let value_type = self.value_types.get(&variable).cloned().unwrap_or(GoType::Interface);
        self.read_resource(f, resource, value_type)
    }

    fn write_global_variable(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        value: GoExpression,
        location: &SourceLocation,
    ) {
        let Some(resource) = self.resource(f, variable) else {
            self.unknown_resource(f, variable, location);
            return;
        };
        if f.mapped_resources.contains(&variable) {
            self.whole_mapped_resource(f, variable, location);
            return;
        }
        self.write_resource(f, resource, value);
    }

    fn read_global_element(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        key: GoExpression,
        location: &SourceLocation,
    ) -> GoExpression {
        let Some(element) = self.element(f, variable, key, location) else {
            return GoExpression::identifier("nil");
        };
        let value_type = match self.value_types.get(&variable) {
            Some(GoType::Map(_, value)) => (**value).clone(),
            _ => GoType::Interface,
        };
        self.read_resource(f, element, value_type)
    }

    fn write_global_element(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        key: GoExpression,
        value: GoExpression,
        location: &SourceLocation,
    ) {
        if let Some(element) = self.element(f, variable, key, location) {
            self.write_resource(f, element, value);
        }
    }
}
