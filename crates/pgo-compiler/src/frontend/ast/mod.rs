//! # 抽象構文木
//!
//! TLA+ と PlusCal の構文木、およびその整形出力。

pub mod format;
pub mod pcal;
pub mod tla;

pub use pcal::*;
pub use tla::*;
