//! 設定ファイル（TOML）の読み込み
//!
//! ```toml
//! [build]
//! output_dir = "out"
//! output_file = "main.go"
//! package = "main"
//! strategy = "in-process"
//! module_paths = ["modules"]
//!
//! [constants]
//! N = "3"
//! ```
//!
//! 相対パスは設定ファイルのあるディレクトリを基準に解決します。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pgo_compiler::Strategy;
use serde::Deserialize;

/// `[build]` テーブル
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub output_dir: Option<PathBuf>,
    pub output_file: Option<String>,
    pub package: Option<String>,
    pub strategy: Option<Strategy>,
    pub module_paths: Vec<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
}

/// 設定ファイル全体
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub build: BuildConfig,
    /// 定数名 → TLA+ 式
    pub constants: BTreeMap<String, String>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("設定ファイルの形式が正しくありません")
    }

    /// パスを読み込み、相対パスを `base` 基準に直す
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("設定ファイル {} を読み込めません", path.display()))?;
        let mut config =
            Self::parse(&text).with_context(|| format!("設定ファイル {} の解析に失敗しました", path.display()))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        log::debug!("設定ファイル {} を読み込みました", path.display());
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        self.build.output_dir = self.build.output_dir.as_ref().map(join);
        self.build.runtime_dir = self.build.runtime_dir.as_ref().map(join);
        self.build.module_paths = self.build.module_paths.iter().map(join).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
[build]
output_dir = "out"
output_file = "counter.go"
package = "counter"
strategy = "state-server"
module_paths = ["modules", "/opt/tla"]

[constants]
N = "3"
Procs = "{1, 2}"
"#,
        )
        .unwrap();
        assert_eq!(config.build.output_dir, Some(PathBuf::from("out")));
        assert_eq!(config.build.output_file.as_deref(), Some("counter.go"));
        assert_eq!(config.build.strategy, Some(Strategy::StateServer));
        assert_eq!(config.build.module_paths.len(), 2);
        assert_eq!(config.constants.get("Procs").map(String::as_str), Some("{1, 2}"));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert!(config.build.output_dir.is_none());
        assert!(config.constants.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::parse("[build]\noptimize = true\n").is_err());
        assert!(Config::parse("[build]\nstrategy = \"pthreads\"\n").is_err());
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgo.toml");
        fs::write(&path, "[build]\noutput_dir = \"out\"\nmodule_paths = [\"/abs\"]\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.build.output_dir, Some(dir.path().join("out")));
        assert_eq!(config.build.module_paths, vec![PathBuf::from("/abs")]);
    }
}
