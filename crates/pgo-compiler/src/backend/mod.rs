//! # バックエンド
//!
//! Go の構文木とその出力（`go`）、型付きのアルゴリズムから構文木を作る
//! コード生成（`codegen`）。

pub mod codegen;
pub mod go;
