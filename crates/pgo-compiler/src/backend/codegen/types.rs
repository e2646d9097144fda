//! 推論した型から Go の型への対応

use crate::backend::go::GoType;
use crate::typesystem::Type;

const GO_KEYWORDS: &[&str] = &[
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough", "for", "func", "go",
    "goto", "if", "import", "interface", "map", "package", "range", "return", "select", "struct", "switch", "type",
    "var",
];

/// レコードのフィールド名。Go のキーワードなら `_` を付ける
pub fn field_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if GO_KEYWORDS.contains(&sanitized.as_str()) {
        format!("{}_", sanitized)
    } else {
        sanitized
    }
}

/// タプルの `index` 番目（0始まり）のフィールド名
pub fn tuple_field(index: usize) -> String {
    format!("e{}", index)
}

/// 集合と列はどちらもスライス、関数はマップ、レコードとタプルは匿名構造体
pub fn go_type(ty: &Type) -> GoType {
    match ty {
        Type::Bool => GoType::bool(),
        Type::Int => GoType::int(),
        Type::Real => GoType::float(),
        Type::String => GoType::string(),
        Type::Set(element) | Type::Seq(element) => GoType::slice(go_type(element)),
        Type::Map(key, value) => GoType::map(go_type(key), go_type(value)),
        Type::Record { fields, .. } => GoType::Struct(
            fields
                .iter()
                .map(|(name, ty)| (field_name(name), go_type(ty)))
                .collect(),
        ),
        Type::Tuple(elements) => GoType::Struct(
            elements
                .iter()
                .enumerate()
                .map(|(i, ty)| (tuple_field(i), go_type(ty)))
                .collect(),
        ),
        Type::Operator { result, .. } => go_type(result),
        Type::Variable(_) => GoType::Interface,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::go::printer::print_type;
    use std::collections::BTreeMap;

    #[test]
    fn test_collections_map_to_slices_and_maps() {
        assert_eq!(print_type(&go_type(&Type::set(Type::Int))), "[]int");
        assert_eq!(print_type(&go_type(&Type::seq(Type::String))), "[]string");
        assert_eq!(print_type(&go_type(&Type::map(Type::Int, Type::Real))), "map[int]float64");
    }

    #[test]
    fn test_records_and_tuples_become_structs() {
        let mut fields = BTreeMap::new();
        fields.insert("type".to_string(), Type::String);
        fields.insert("value".to_string(), Type::Int);
        assert_eq!(
            print_type(&go_type(&Type::record(fields))),
            "struct{type_ string; value int}"
        );
        assert_eq!(
            print_type(&go_type(&Type::Tuple(vec![Type::Int, Type::Bool]))),
            "struct{e0 int; e1 bool}"
        );
    }
}
