/*
 * PGo CLI - メインエントリーポイント
 *
 * コマンドライン引数と設定ファイルを読み、コンパイラを呼び出して
 * Go のソースと実行時ライブラリを出力ディレクトリに書き出します。
 */

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use log::LevelFilter;

mod cli;
mod config;
mod diagnostics;
mod output;

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.format_timestamp(None);
    builder.init();
}

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    log::debug!("pgo v{} を起動しました", env!("CARGO_PKG_VERSION"));

    match cli::run(&cli) {
        Ok(cli::Outcome::Compiled) => ExitCode::SUCCESS,
        Ok(cli::Outcome::Rejected) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "エラー:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
