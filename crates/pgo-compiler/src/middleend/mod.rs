//! # 中間解析
//!
//! 型推論の後、コード生成の前に走る解析です。現在は原子性解析のみで、
//! 結果は定義レジストリに書き込まれます。

pub mod atomicity;

pub use atomicity::infer_atomicity;
