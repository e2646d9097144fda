//! # PGo コンパイラ
//!
//! TLA+ モジュールのコメントに書かれた PlusCal / Modular PlusCal の
//! アルゴリズムを、goroutine で動く Go のプログラムに変換するライブラリです。
//!
//! パイプラインは次の順に進みます。
//!
//! 1. アルゴリズムとモジュールの構文解析（`frontend::parser`）
//! 2. 定数定義の解析とオプションの検査
//! 3. マクロ展開と構造検査
//! 4. 名前解決（`EXTENDS` のモジュールは `module` が読み込む）
//! 5. 型推論（`typesystem`）と原子性解析（`middleend`）
//! 6. Go のコード生成・正規化・出力（`backend`）
//!
//! 入口は [`driver::compile_file`] と [`driver::compile_source`] です。

pub mod backend;
pub mod driver;
pub mod frontend;
pub mod middleend;
pub mod module;
pub mod typesystem;

pub use driver::{compile_file, compile_source, CompilationStage, CompileOptions, CompileOutput, Strategy};
pub use frontend::error::{CompilerError, Issue, IssueContext, IssueKind, Result, Severity, SourceLocation};
