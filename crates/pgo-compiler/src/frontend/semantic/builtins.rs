//! # 標準モジュールの組み込み演算子
//!
//! `Naturals` / `Integers` / `Sequences` / `FiniteSets` / `TLC` は
//! ファイルを読まずにこの表から解決されます。

/// 組み込み演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Nat,
    Int,
    Boolean,
    Seq,
    Len,
    Append,
    Head,
    Tail,
    SubSeq,
    Cardinality,
    IsFiniteSet,
    ToString,
    Print,
    Assert,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Nat => "Nat",
            Builtin::Int => "Int",
            Builtin::Boolean => "BOOLEAN",
            Builtin::Seq => "Seq",
            Builtin::Len => "Len",
            Builtin::Append => "Append",
            Builtin::Head => "Head",
            Builtin::Tail => "Tail",
            Builtin::SubSeq => "SubSeq",
            Builtin::Cardinality => "Cardinality",
            Builtin::IsFiniteSet => "IsFiniteSet",
            Builtin::ToString => "ToString",
            Builtin::Print => "Print",
            Builtin::Assert => "Assert",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Nat | Builtin::Int | Builtin::Boolean => 0,
            Builtin::Seq
            | Builtin::Len
            | Builtin::Head
            | Builtin::Tail
            | Builtin::Cardinality
            | Builtin::IsFiniteSet
            | Builtin::ToString => 1,
            Builtin::Append | Builtin::Print | Builtin::Assert => 2,
            Builtin::SubSeq => 3,
        }
    }
}

const NATURALS: &[Builtin] = &[Builtin::Nat];
const INTEGERS: &[Builtin] = &[Builtin::Nat, Builtin::Int];
const SEQUENCES: &[Builtin] = &[
    Builtin::Seq,
    Builtin::Len,
    Builtin::Append,
    Builtin::Head,
    Builtin::Tail,
    Builtin::SubSeq,
];
const FINITE_SETS: &[Builtin] = &[Builtin::Cardinality, Builtin::IsFiniteSet];
const TLC: &[Builtin] = &[Builtin::ToString, Builtin::Print, Builtin::Assert];

/// どのモジュールにも属さず常に見える名前
pub const ALWAYS_VISIBLE: &[Builtin] = &[Builtin::Boolean];

/// 標準モジュールなら、それが導入する演算子
pub fn standard_module(name: &str) -> Option<&'static [Builtin]> {
    match name {
        "Naturals" => Some(NATURALS),
        "Integers" => Some(INTEGERS),
        "Sequences" => Some(SEQUENCES),
        "FiniteSets" => Some(FINITE_SETS),
        "TLC" => Some(TLC),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_modules() {
        let sequences = standard_module("Sequences").unwrap();
        assert!(sequences.iter().any(|b| b.name() == "Len"));
        assert_eq!(Builtin::SubSeq.arity(), 3);
        assert!(standard_module("Integers").unwrap().contains(&Builtin::Nat));
        assert!(standard_module("Sum").is_none());
    }
}
