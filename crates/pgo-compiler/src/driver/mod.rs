//! # コンパイラドライバー
//!
//! 各パスを決まった順に走らせ、パスの合間に診断を確かめます。
//! ファイルの書き出しや `gofmt` の呼び出しは CLI 側の仕事です。

pub mod options;
pub mod pipeline;

pub use options::{CompileOptions, Strategy};
pub use pipeline::{compile_file, compile_source, CompilationStage, CompileOutput};
