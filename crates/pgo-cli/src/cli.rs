/*
 * PGo CLI - コマンドライン引数処理モジュール
 *
 * 引数と設定ファイルをまとめて `CompileOptions` に変換し、
 * コンパイル結果の出力までを行います。
 */

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::Colorize;
use log::{debug, info, warn};
use pgo_compiler::frontend::semantic::constdef::split_definition;
use pgo_compiler::{compile_file, CompileOptions, CompilerError, Strategy};

use crate::config::Config;
use crate::diagnostics;
use crate::output;

/// 既定の実行時ライブラリの場所
pub const DEFAULT_RUNTIME_DIR: &str = "runtime/pgo";
/// 既定の出力ファイル名
pub const DEFAULT_OUTPUT_FILE: &str = "main.go";

/// PlusCal / Modular PlusCal を Go に変換するコンパイラ
#[derive(Parser, Debug)]
#[command(name = "pgo")]
#[command(version)]
#[command(about = "PlusCal / Modular PlusCal から Go へのコンパイラ", long_about = None)]
pub struct Cli {
    /// 入力の TLA+ モジュール
    #[arg(required = true)]
    pub input: PathBuf,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// 出力ファイル名（既定: main.go）
    #[arg(long, value_name = "FILE")]
    pub output_file: Option<String>,

    /// 生成する Go パッケージ名（既定: main）
    #[arg(short, long)]
    pub package: Option<String>,

    /// 大域変数戦略（in-process または state-server）
    #[arg(short, long)]
    pub strategy: Option<Strategy>,

    /// 定数の定義 `NAME=式`（繰り返し指定可）
    #[arg(short = 'c', long = "constant", value_name = "NAME=EXPR", value_parser = parse_constant)]
    pub constants: Vec<(String, String)>,

    /// `EXTENDS` されたモジュールの検索パス（繰り返し指定可）
    #[arg(short = 'm', long = "module-path", value_name = "DIR")]
    pub module_paths: Vec<PathBuf>,

    /// 設定ファイル（TOML）
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 実行時ライブラリのディレクトリ（既定: runtime/pgo）
    #[arg(long, value_name = "DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// 出力せずに検査だけ行う
    #[arg(long, default_value = "false")]
    pub check: bool,

    /// gofmt を呼ばない
    #[arg(long, default_value = "false")]
    pub no_gofmt: bool,

    /// 診断を色付けしない
    #[arg(long, default_value = "false")]
    pub no_color: bool,

    /// 詳細なログ出力を有効にする
    #[arg(short, long, default_value = "false", conflicts_with = "quiet")]
    pub verbose: bool,

    /// 警告以外のログを抑制する
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,
}

fn parse_constant(text: &str) -> std::result::Result<(String, String), String> {
    split_definition(text).ok_or_else(|| format!("`NAME=式` の形式ではありません: {}", text))
}

/// コンパイルの結末
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Compiled,
    /// エラーの診断が出た
    Rejected,
}

/// 引数と設定ファイルを合わせた最終的な設定
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: Option<PathBuf>,
    pub output_file: String,
    pub runtime_dir: PathBuf,
    /// 実行時ライブラリの場所が明示された
    pub runtime_explicit: bool,
    pub options: CompileOptions,
}

impl Settings {
    /// コマンドライン引数が設定ファイルより優先される
    pub fn resolve(cli: &Cli, config: Config) -> Self {
        let build = config.build;
        let mut options = CompileOptions {
            package: cli
                .package
                .clone()
                .or(build.package)
                .unwrap_or_else(|| CompileOptions::default().package),
            strategy: cli.strategy.or(build.strategy),
            constants: config.constants,
            module_paths: build.module_paths,
        };
        for (name, value) in &cli.constants {
            options.constants.insert(name.clone(), value.clone());
        }
        options.module_paths.extend(cli.module_paths.iter().cloned());

        let explicit_runtime = cli.runtime_dir.clone().or(build.runtime_dir);
        Self {
            output_dir: cli.output.clone().or(build.output_dir),
            output_file: cli
                .output_file
                .clone()
                .or(build.output_file)
                .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string()),
            runtime_explicit: explicit_runtime.is_some(),
            runtime_dir: explicit_runtime.unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR)),
            options,
        }
    }
}

/// CLIからコンパイル処理を実行
pub fn run(cli: &Cli) -> Result<Outcome> {
    if cli.no_color {
        colored::control::set_override(false);
    }
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let settings = Settings::resolve(cli, config);
    debug!("設定: {:?}", settings);

    let output = match compile_file(&cli.input, &settings.options) {
        Ok(output) => output,
        Err(CompilerError::Failed { issues }) => {
            diagnostics::report(&issues);
            if let Some(summary) = diagnostics::summary(&issues) {
                eprintln!("{}", summary);
            }
            eprintln!("{}", Cli::command().render_usage());
            return Ok(Outcome::Rejected);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("{} のコンパイルに失敗しました", cli.input.display()));
        }
    };
    diagnostics::report(&output.issues);

    if cli.check {
        info!("{} の検査が完了しました", cli.input.display());
        return Ok(Outcome::Compiled);
    }
    let Some(output_dir) = settings.output_dir.as_deref() else {
        bail!("出力ディレクトリが指定されていません（-o または設定ファイルの build.output_dir）");
    };
    let path = output::write_source(output_dir, &settings.output_file, &output.go_source)?;
    install_runtime(&settings, output_dir)?;
    if !cli.no_gofmt {
        output::run_gofmt(&path);
    }
    println!("{} {}", "生成:".green().bold(), path.display());
    Ok(Outcome::Compiled)
}

/// 実行時ライブラリをコピーする。既定の場所に無いだけなら警告で済ませる
fn install_runtime(settings: &Settings, output_dir: &Path) -> Result<()> {
    if !settings.runtime_dir.is_dir() {
        if settings.runtime_explicit {
            bail!("実行時ライブラリ {} が見つかりません", settings.runtime_dir.display());
        }
        warn!(
            "実行時ライブラリ {} が見つからないためコピーを省略します",
            settings.runtime_dir.display()
        );
        return Ok(());
    }
    output::copy_runtime(&settings.runtime_dir, output_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "pgo",
            "Counter.tla",
            "-o",
            "cli-out",
            "-c",
            "N=5",
            "--strategy",
            "state-server",
            "-m",
            "extra",
        ]);
        let config = Config::parse(
            "[build]\noutput_dir = \"cfg-out\"\npackage = \"counter\"\nstrategy = \"in-process\"\nmodule_paths = [\"base\"]\n[constants]\nN = \"3\"\nM = \"2\"\n",
        )
        .unwrap();
        let settings = Settings::resolve(&cli, config);
        assert_eq!(settings.output_dir, Some(PathBuf::from("cli-out")));
        assert_eq!(settings.output_file, DEFAULT_OUTPUT_FILE);
        assert_eq!(settings.options.package, "counter");
        assert_eq!(settings.options.strategy, Some(Strategy::StateServer));
        assert_eq!(settings.options.constants.get("N").map(String::as_str), Some("5"));
        assert_eq!(settings.options.constants.get("M").map(String::as_str), Some("2"));
        assert_eq!(
            settings.options.module_paths,
            vec![PathBuf::from("base"), PathBuf::from("extra")]
        );
        assert!(!settings.runtime_explicit);
    }

    #[test]
    fn test_malformed_constant_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["pgo", "A.tla", "-c", "no-equals"]).is_err());
        assert!(Cli::try_parse_from(["pgo", "A.tla", "--strategy", "threads"]).is_err());
    }
}
