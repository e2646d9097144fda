//! # プロセス内実行の戦略
//!
//! 大域変数はパッケージ変数になり、ロックグループごとに
//! `sync.RWMutex` を1つ持ちます。書き込みのないグループは読み取り
//! ロックで済ませます。プロセスは goroutine として起動し、全員が
//! 揃うまで `pGoStart` を待ちます。
//!
//! 臨界区間の中断は書き込みを巻き戻しません。

use std::collections::HashMap;

use crate::backend::go::{GoExpression, GoStatement, GoType};
use crate::frontend::error::{IssueKind, SourceLocation};
use crate::frontend::uid::Uid;

use super::strategy::{self, GlobalVariableStrategy, GroupAccess};
use super::FunctionContext;

pub struct InProcessStrategy {
    globals: HashMap<Uid, String>,
    groups: Vec<GroupAccess>,
    multi_process: bool,
}

impl InProcessStrategy {
    pub fn new(globals: HashMap<Uid, String>, groups: Vec<GroupAccess>, multi_process: bool) -> Self {
        Self {
            globals,
            groups,
            multi_process,
        }
    }

    fn lock(&self, group: usize) -> GoExpression {
        GoExpression::index(GoExpression::identifier("pGoLock"), GoExpression::literal(group.to_string()))
    }

    fn writes(&self, group: usize) -> bool {
        self.groups.get(group).map(|g| g.writes).unwrap_or(true)
    }

    fn unlock(&self, f: &mut FunctionContext, group: usize) {
        let method = if self.writes(group) { "Unlock" } else { "RUnlock" };
        f.builder
            .add(GoStatement::expression(GoExpression::method(self.lock(group), method, Vec::new())));
    }

    fn global(&self, f: &mut FunctionContext, variable: Uid, location: &SourceLocation) -> GoExpression {
        match self.globals.get(&variable) {
            Some(name) => GoExpression::identifier(name.clone()),
            None => {
                f.issues.error(
                    location.clone(),
                    IssueKind::InternalCompilerError {
                        message: format!("大域変数 {} の名前がありません", variable),
                    },
                );
                GoExpression::identifier("nil")
            }
        }
    }
}

impl GlobalVariableStrategy for InProcessStrategy {
    fn imports(&self) -> Vec<&'static str> {
        vec!["sync"]
    }

    fn global_type(&self, _variable: Uid, value_type: &GoType) -> Option<GoType> {
        Some(value_type.clone())
    }

    fn package_variables(&self) -> Vec<(String, GoType)> {
        let mut variables = vec![("pGoLock".to_string(), GoType::slice(GoType::named("sync.RWMutex")))];
        if self.multi_process {
            variables.extend(strategy::start_channel_variables());
        }
        variables
    }

    fn init_global(&self, f: &mut FunctionContext, variable: Uid, value: GoExpression) {
        if let Some(name) = self.globals.get(&variable) {
            f.builder
                .add(GoStatement::assign(GoExpression::identifier(name.clone()), value));
        }
    }

    fn init_postlude(&self, f: &mut FunctionContext) {
        f.builder.add(GoStatement::assign(
            GoExpression::identifier("pGoLock"),
            GoExpression::call(
                "make",
                vec![
                    GoExpression::Type(GoType::slice(GoType::named("sync.RWMutex"))),
                    GoExpression::literal(self.groups.len().to_string()),
                ],
            ),
        ));
        if self.multi_process {
            strategy::make_start_channel(f);
        }
    }

    fn process_prelude(&self, f: &mut FunctionContext) {
        if self.multi_process {
            strategy::wait_for_start(f);
        }
    }

    fn spawn(&self, f: &mut FunctionContext, call: GoExpression) {
        strategy::spawn_with_wait_group(f, call);
    }

    fn main_postlude(&self, f: &mut FunctionContext) {
        if self.multi_process {
            strategy::release_and_wait(f);
        }
    }

    fn start_critical_section(&self, f: &mut FunctionContext, group: usize, _label: &str) {
        let method = if self.writes(group) { "Lock" } else { "RLock" };
        f.builder
            .add(GoStatement::expression(GoExpression::method(self.lock(group), method, Vec::new())));
    }

    fn end_critical_section(&self, f: &mut FunctionContext, group: usize, _label: &str) {
        self.unlock(f, group);
    }

    fn abort_critical_section(&self, f: &mut FunctionContext, group: usize, _label: &str) {
        self.unlock(f, group);
    }

    fn rolls_back(&self) -> bool {
        false
    }

    fn read_global_variable(&self, f: &mut FunctionContext, variable: Uid, location: &SourceLocation) -> GoExpression {
        self.global(f, variable, location)
    }

    fn write_global_variable(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        value: GoExpression,
        location: &SourceLocation,
    ) {
        let target = self.global(f, variable, location);
        f.builder.add(GoStatement::assign(target, value));
    }
}
