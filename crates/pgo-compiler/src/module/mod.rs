//! # モジュールシステム
//!
//! `EXTENDS` で参照される TLA+ モジュールの探索と読み込みを扱います。
//! 標準モジュールはここを通らず、組み込みの表から解決されます。

pub mod loader;

pub use loader::{read_source, TlaModuleLoader, TLA_EXTENSION};
