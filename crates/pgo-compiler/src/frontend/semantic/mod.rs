//! # 意味解析
//!
//! 構文解析の後、型推論の前に走るパス群です。定数定義の読み込み、
//! オプションの整合性検査、マクロ展開、構造検査、名前解決を含みます。

pub mod builtins;
pub mod constdef;
pub mod macro_expansion;
pub mod options_check;
pub mod registry;
pub mod scoping;
pub mod validation;

pub use builtins::Builtin;
pub use constdef::{parse_constant_definitions, parse_constant_strings};
pub use macro_expansion::expand_macros;
pub use options_check::check_options;
pub use registry::{Definition, DefinitionKind, DefinitionRegistry, LabelAccesses};
pub use scoping::resolve_scopes;
pub use validation::validate;
