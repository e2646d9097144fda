//! # 型の表現
//!
//! TLA+ の値と PlusCal の変数に付く型です。Go の型への対応は
//! コード生成側で行います。

use std::collections::BTreeMap;
use std::fmt;

/// 型変数
///
/// `numeric` が真の変数は `Int` か `Real` にしか束縛されません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVariable {
    pub id: u32,
    pub numeric: bool,
}

/// 型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    Real,
    String,
    Set(Box<Type>),
    /// 長さ可変の列（1始まりの添字）
    Seq(Box<Type>),
    /// TLA+ の関数。`[x \in S |-> e]` と `[S -> T]` の値
    Map(Box<Type>, Box<Type>),
    /// 演算子定義のシグネチャ
    Operator { params: Vec<Type>, result: Box<Type> },
    /// レコード。`rest` が `Some` なら未知のフィールドを許す開いたレコード
    Record {
        fields: BTreeMap<String, Type>,
        rest: Option<TypeVariable>,
    },
    Tuple(Vec<Type>),
    Variable(TypeVariable),
}

impl Type {
    pub fn set(element: Type) -> Self {
        Type::Set(Box::new(element))
    }

    pub fn seq(element: Type) -> Self {
        Type::Seq(Box::new(element))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn operator(params: Vec<Type>, result: Type) -> Self {
        Type::Operator {
            params,
            result: Box::new(result),
        }
    }

    /// 閉じたレコード
    pub fn record(fields: BTreeMap<String, Type>) -> Self {
        Type::Record { fields, rest: None }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Type::Variable(_))
    }

    /// 型変数を含まないか
    pub fn is_ground(&self) -> bool {
        let mut ground = true;
        self.for_each_variable(&mut |_| ground = false);
        ground
    }

    /// `Bool` / `Int` / `Real` / `String` のいずれか
    pub fn is_basic(&self) -> bool {
        matches!(self, Type::Bool | Type::Int | Type::Real | Type::String)
    }

    /// 含まれる型変数（開いたレコードの残り部分を含む）を巡回する
    pub fn for_each_variable(&self, f: &mut dyn FnMut(TypeVariable)) {
        match self {
            Type::Bool | Type::Int | Type::Real | Type::String => {}
            Type::Set(inner) | Type::Seq(inner) => inner.for_each_variable(f),
            Type::Map(key, value) => {
                key.for_each_variable(f);
                value.for_each_variable(f);
            }
            Type::Operator { params, result } => {
                for param in params {
                    param.for_each_variable(f);
                }
                result.for_each_variable(f);
            }
            Type::Record { fields, rest } => {
                for field in fields.values() {
                    field.for_each_variable(f);
                }
                if let Some(rest) = rest {
                    f(*rest);
                }
            }
            Type::Tuple(elements) => {
                for element in elements {
                    element.for_each_variable(f);
                }
            }
            Type::Variable(variable) => f(*variable),
        }
    }
}

impl fmt::Display for TypeVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.numeric {
            // 未解決の数値型は利用者には区別しない
            write!(f, "Number")
        } else {
            write!(f, "τ{}", self.id)
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "Bool"),
            Type::Int => write!(f, "Int"),
            Type::Real => write!(f, "Real"),
            Type::String => write!(f, "String"),
            Type::Set(inner) => write!(f, "Set[{}]", inner),
            Type::Seq(inner) => write!(f, "Seq[{}]", inner),
            Type::Map(key, value) => write!(f, "Map[{}, {}]", key, value),
            Type::Operator { params, result } => {
                write!(f, "(")?;
                write_list(f, params)?;
                write!(f, ") -> {}", result)
            }
            Type::Record { fields, rest } => {
                write!(f, "[")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                if let Some(rest) = rest {
                    if !fields.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "..{}", rest)?;
                }
                write!(f, "]")
            }
            Type::Tuple(elements) => {
                write!(f, "<<")?;
                write_list(f, elements)?;
                write!(f, ">>")
            }
            Type::Variable(variable) => write!(f, "{}", variable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), Type::Int);
        fields.insert("b".to_string(), Type::seq(Type::String));
        assert_eq!(Type::record(fields).to_string(), "[a: Int, b: Seq[String]]");
        assert_eq!(
            Type::operator(vec![Type::Int, Type::Bool], Type::set(Type::Int)).to_string(),
            "(Int, Bool) -> Set[Int]"
        );
        assert_eq!(Type::Tuple(vec![Type::Int, Type::Real]).to_string(), "<<Int, Real>>");
    }

    #[test]
    fn test_numeric_variable_displays_as_number() {
        let numeric = TypeVariable { id: 7, numeric: true };
        let plain = TypeVariable { id: 7, numeric: false };
        assert_eq!(Type::set(Type::Variable(numeric)).to_string(), "Set[Number]");
        assert_eq!(Type::Variable(plain).to_string(), "τ7");
    }

    #[test]
    fn test_groundness() {
        let variable = TypeVariable { id: 1, numeric: false };
        assert!(Type::map(Type::Int, Type::Bool).is_ground());
        assert!(!Type::set(Type::Variable(variable)).is_ground());
        let open = Type::Record {
            fields: BTreeMap::new(),
            rest: Some(variable),
        };
        assert!(!open.is_ground());
    }
}
