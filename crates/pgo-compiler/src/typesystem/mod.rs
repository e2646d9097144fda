//! # 型システム
//!
//! TLA+ の式と PlusCal の文に対する Hindley-Milner 風の型推論です。
//! 数値リテラルは `Int` と `Real` のどちらにもなれる数値型変数で表され、
//! 最後まで決まらなければ `Int` になります。

pub mod inference;
pub mod solver;
pub mod types;

pub use inference::{infer_types, TypeMap};
pub use solver::{Deferred, Solver, UnifyError};
pub use types::{Type, TypeVariable};
