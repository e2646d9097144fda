//! # コンパイルオプション
//!
//! ライブラリ側のオプションを表す構造体です。コマンドラインや設定ファイル
//! からの変換は CLI クレート側で行います。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// 大域変数の実現方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// 大域変数を通常の Go 変数とし、ロックグループごとに読み書きロックを持つ
    InProcess,
    /// 大域変数を外部の状態サーバー上のリソースとして扱う
    StateServer,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::InProcess => write!(f, "in-process"),
            Strategy::StateServer => write!(f, "state-server"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in-process" | "inprocess" | "multithreaded" => Ok(Strategy::InProcess),
            "state-server" | "stateserver" => Ok(Strategy::StateServer),
            _ => Err(format!("不明な大域変数戦略: {}", s)),
        }
    }
}

/// コンパイルオプション
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 生成する Go パッケージ名
    pub package: String,
    /// 大域変数戦略。`None` なら入力の形から決める
    pub strategy: Option<Strategy>,
    /// 定数定義（名前 → TLA+ 式のテキスト）
    pub constants: BTreeMap<String, String>,
    /// `EXTENDS` されたモジュールの検索パス
    pub module_paths: Vec<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            package: "main".to_string(),
            strategy: None,
            constants: BTreeMap::new(),
            module_paths: Vec::new(),
        }
    }
}

impl CompileOptions {
    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_paths.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("in-process".parse::<Strategy>(), Ok(Strategy::InProcess));
        assert_eq!("State-Server".parse::<Strategy>(), Ok(Strategy::StateServer));
        assert!("pthreads".parse::<Strategy>().is_err());
        assert_eq!(Strategy::StateServer.to_string(), "state-server");
    }

    #[test]
    fn test_builder_methods() {
        let options = CompileOptions::default()
            .with_constant("N", "3")
            .with_strategy(Strategy::InProcess)
            .with_module_path("modules");
        assert_eq!(options.package, "main");
        assert_eq!(options.constants.get("N").map(String::as_str), Some("3"));
        assert_eq!(options.module_paths.len(), 1);
    }
}
