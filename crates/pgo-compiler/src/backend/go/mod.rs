//! # Go バックエンドの構文と出力

pub mod ast;
pub mod builder;
pub mod normalise;
pub mod printer;

pub use ast::{GoDeclaration, GoExpression, GoField, GoModule, GoStatement, GoType};
pub use builder::{BlockBuilder, NameCleaner};
pub use normalise::normalise;
pub use printer::print_module;
