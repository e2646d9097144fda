//! # 大域変数の扱い方
//!
//! 大域変数（と Modular PlusCal のアーキタイプ引数）への読み書きや
//! 臨界区間の出入りは戦略ごとに異なるため、コード生成はこのトレイト
//! 越しにだけそれらを出力します。

use std::collections::BTreeSet;

use crate::backend::go::{GoExpression, GoStatement, GoType};
use crate::frontend::error::{IssueKind, SourceLocation};
use crate::frontend::semantic::DefinitionRegistry;
use crate::frontend::uid::Uid;

use super::FunctionContext;

/// 1つのロックグループが触れる変数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAccess {
    pub variables: BTreeSet<Uid>,
    pub writes: bool,
}

/// レジストリからロックグループごとのアクセスを集める
pub fn group_accesses(registry: &DefinitionRegistry) -> Vec<GroupAccess> {
    (0..registry.lock_group_count())
        .map(|group| {
            let writes = registry.writes_in_group(group);
            let mut variables = registry.reads_in_group(group);
            variables.extend(writes.iter().copied());
            GroupAccess {
                variables,
                writes: !writes.is_empty(),
            }
        })
        .collect()
}

pub trait GlobalVariableStrategy {
    /// 戦略が使うパッケージ
    fn imports(&self) -> Vec<&'static str>;

    /// 大域変数をパッケージ変数として宣言するときの型。宣言しないなら `None`
    fn global_type(&self, variable: Uid, value_type: &GoType) -> Option<GoType>;

    /// 戦略固有のパッケージ変数
    fn package_variables(&self) -> Vec<(String, GoType)>;

    /// `init` の中で大域変数に初期値を与える
    fn init_global(&self, f: &mut FunctionContext, variable: Uid, value: GoExpression);

    /// `init` の末尾
    fn init_postlude(&self, f: &mut FunctionContext);

    /// プロセス関数の本体の先頭
    fn process_prelude(&self, f: &mut FunctionContext);

    /// `main` からプロセスを1つ起動する
    fn spawn(&self, f: &mut FunctionContext, call: GoExpression);

    /// すべてのプロセスを起動したあとの `main`
    fn main_postlude(&self, f: &mut FunctionContext);

    fn start_critical_section(&self, f: &mut FunctionContext, group: usize, label: &str);

    fn end_critical_section(&self, f: &mut FunctionContext, group: usize, label: &str);

    fn abort_critical_section(&self, f: &mut FunctionContext, group: usize, label: &str);

    /// 臨界区間の中断で書き込みが取り消されるか
    fn rolls_back(&self) -> bool;

    fn read_global_variable(&self, f: &mut FunctionContext, variable: Uid, location: &SourceLocation) -> GoExpression;

    fn write_global_variable(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        value: GoExpression,
        location: &SourceLocation,
    );

    /// 要素ごとにリソースを持つ変数の `key` の要素を読む
    fn read_global_element(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        _key: GoExpression,
        location: &SourceLocation,
    ) -> GoExpression {
        element_access_unsupported(f, variable, location);
        GoExpression::identifier("nil")
    }

    /// 要素ごとにリソースを持つ変数の `key` の要素に書く
    fn write_global_element(
        &self,
        f: &mut FunctionContext,
        variable: Uid,
        _key: GoExpression,
        _value: GoExpression,
        location: &SourceLocation,
    ) {
        element_access_unsupported(f, variable, location);
    }
}

fn element_access_unsupported(f: &mut FunctionContext, variable: Uid, location: &SourceLocation) {
    f.issues.error(
        location.clone(),
        IssueKind::UnsupportedConstruct {
            construct: format!("この戦略での要素ごとのリソース {} へのアクセス", variable),
        },
    );
}

/// `pGoWait.Add(1)` に続けて `go call`
pub(crate) fn spawn_with_wait_group(f: &mut FunctionContext, call: GoExpression) {
    f.builder.add(GoStatement::expression(GoExpression::method(
        GoExpression::identifier("pGoWait"),
        "Add",
        vec![GoExpression::literal("1")],
    )));
    f.builder.add(GoStatement::Go(call));
}

/// 開始の合図を待ち、終わったら待ち合わせに報告する
pub(crate) fn wait_for_start(f: &mut FunctionContext) {
    f.builder.add(GoStatement::Defer(GoExpression::method(
        GoExpression::identifier("pGoWait"),
        "Done",
        Vec::new(),
    )));
    f.builder.add(GoStatement::Receive(GoExpression::identifier("pGoStart")));
}

/// 開始の合図を出し、全プロセスの終了を待つ
pub(crate) fn release_and_wait(f: &mut FunctionContext) {
    f.builder.add(GoStatement::expression(GoExpression::call(
        "close",
        vec![GoExpression::identifier("pGoStart")],
    )));
    f.builder.add(GoStatement::expression(GoExpression::method(
        GoExpression::identifier("pGoWait"),
        "Wait",
        Vec::new(),
    )));
}

pub(crate) fn start_channel_variables() -> Vec<(String, GoType)> {
    vec![
        ("pGoStart".to_string(), GoType::Chan(Box::new(GoType::bool()))),
        ("pGoWait".to_string(), GoType::named("sync.WaitGroup")),
    ]
}

pub(crate) fn make_start_channel(f: &mut FunctionContext) {
    f.builder.add(GoStatement::assign(
        GoExpression::identifier("pGoStart"),
        GoExpression::call(
            "make",
            vec![GoExpression::Type(GoType::Chan(Box::new(GoType::bool())))],
        ),
    ));
}
