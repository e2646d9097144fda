//! # フロントエンド
//!
//! ソーステキストから、名前解決済みの構文木と定義レジストリまで。

pub mod ast;
pub mod error;
pub mod parser;
pub mod semantic;
pub mod uid;

pub use error::{CompilerError, Issue, IssueContext, IssueKind, Result, Severity, SourceLocation};
pub use uid::{Meta, Uid};
