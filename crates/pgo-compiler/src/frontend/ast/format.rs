//! # TLA+ の整形出力
//!
//! `Display` 実装を提供します。出力は構文解析器でそのまま読み戻せる形で、
//! 複合式を演算子の被演算子として置くときは必ず括弧で囲みます。

use std::fmt;

use super::tla::*;

fn needs_parens(expression: &TlaExpression) -> bool {
    matches!(
        expression.kind,
        TlaExpressionKind::Binary { .. }
            | TlaExpressionKind::Unary { .. }
            | TlaExpressionKind::If { .. }
            | TlaExpressionKind::Quantified { .. }
            | TlaExpressionKind::Choose { .. }
            | TlaExpressionKind::Let { .. }
    )
}

struct Operand<'a>(&'a TlaExpression);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if needs_parens(self.0) {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_prefix(f: &mut fmt::Formatter<'_>, prefix: &[TlaIdentifier]) -> fmt::Result {
    for part in prefix {
        write!(f, "{}!", part.id)?;
    }
    Ok(())
}

fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            '\x0c' => escaped.push_str("\\f"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl fmt::Display for TlaIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Display for BoundPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundPattern::Ids(ids) => write_list(f, ids),
            BoundPattern::Tuple(ids) => {
                write!(f, "<<")?;
                write_list(f, ids)?;
                write!(f, ">>")
            }
        }
    }
}

impl fmt::Display for QuantifierBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \\in {}", self.pattern, Operand(&self.set))
    }
}

impl fmt::Display for OpDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.arity > 0 {
            let holes = vec!["_"; self.arity];
            write!(f, "({})", holes.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for TlaExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TlaExpressionKind as K;
        match &self.kind {
            K::Bool(true) => write!(f, "TRUE"),
            K::Bool(false) => write!(f, "FALSE"),
            K::Number(n) => write!(f, "{}", n),
            K::String(s) => write!(f, "\"{}\"", escape_string(s)),
            K::Identifier { prefix, name } => {
                write_prefix(f, prefix)?;
                write!(f, "{}", name)
            }
            K::OperatorCall { prefix, name, args } => {
                write_prefix(f, prefix)?;
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            K::FunctionCall { function, args } => {
                write!(f, "{}[", Operand(function))?;
                write_list(f, args)?;
                write!(f, "]")
            }
            K::RecordAccess { record, field } => write!(f, "{}.{}", Operand(record), field),
            K::Record(fields) => {
                write!(f, "[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} |-> {}", field.name, field.value)?;
                }
                write!(f, "]")
            }
            K::RecordSet(fields) => {
                write!(f, "[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} : {}", field.name, field.value)?;
                }
                write!(f, "]")
            }
            K::Set(elements) => {
                write!(f, "{{")?;
                write_list(f, elements)?;
                write!(f, "}}")
            }
            K::SetRefinement {
                binding,
                from,
                predicate,
            } => write!(f, "{{{} \\in {} : {}}}", binding, Operand(from), predicate),
            K::Choose {
                binding,
                from,
                predicate,
            } => write!(f, "CHOOSE {} \\in {} : {}", binding, Operand(from), predicate),
            K::SetComprehension { body, bounds } => {
                write!(f, "{{{} : ", body)?;
                write_list(f, bounds)?;
                write!(f, "}}")
            }
            K::Function { bounds, body } => {
                write!(f, "[")?;
                write_list(f, bounds)?;
                write!(f, " |-> {}]", body)
            }
            K::FunctionSet { from, to } => write!(f, "[{} -> {}]", Operand(from), Operand(to)),
            K::FunctionSubstitution {
                source,
                substitutions,
            } => {
                write!(f, "[{} EXCEPT ", Operand(source))?;
                for (i, pair) in substitutions.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "!")?;
                    for key in &pair.keys {
                        match key {
                            SubstitutionKey::Index(indices) => {
                                write!(f, "[")?;
                                write_list(f, indices)?;
                                write!(f, "]")?;
                            }
                            SubstitutionKey::Field(field) => write!(f, ".{}", field)?,
                        }
                    }
                    write!(f, " = {}", pair.value)?;
                }
                write!(f, "]")
            }
            K::SubstitutionAt => write!(f, "@"),
            K::Binary { operator, lhs, rhs } => {
                write!(f, "{} {} {}", Operand(lhs), operator, Operand(rhs))
            }
            K::Unary { operator, operand } => {
                if is_postfix_operator(operator) {
                    write!(f, "{}{}", Operand(operand), operator)
                } else if operator.chars().all(|c| c.is_ascii_alphabetic()) || operator.starts_with('\\') {
                    write!(f, "{} {}", operator, Operand(operand))
                } else {
                    write!(f, "{}{}", operator, Operand(operand))
                }
            }
            K::If {
                condition,
                then,
                otherwise,
            } => write!(f, "IF {} THEN {} ELSE {}", condition, then, otherwise),
            K::Quantified { kind, bounds, body } => {
                match kind {
                    QuantifierKind::Universal => write!(f, "\\A ")?,
                    QuantifierKind::Existential => write!(f, "\\E ")?,
                }
                write_list(f, bounds)?;
                write!(f, " : {}", body)
            }
            K::Let { definitions, body } => {
                write!(f, "LET")?;
                for definition in definitions {
                    write!(f, " {}", definition)?;
                }
                write!(f, " IN {}", body)
            }
            K::Tuple(elements) => {
                write!(f, "<<")?;
                write_list(f, elements)?;
                write!(f, ">>")
            }
            K::Fairness {
                kind,
                vars,
                expression,
            } => {
                let prefix = match kind {
                    FairnessKind::Weak => "WF_",
                    FairnessKind::Strong => "SF_",
                };
                write!(f, "{}{}({})", prefix, Operand(vars), expression)
            }
            K::DefaultInit => write!(f, "defaultInitValue"),
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local {
            write!(f, "LOCAL ")?;
        }
        write!(f, "INSTANCE {}", self.module)?;
        for (i, remapping) in self.remappings.iter().enumerate() {
            write!(f, "{}", if i == 0 { " WITH " } else { ", " })?;
            write!(f, "{} <- {}", remapping.from, remapping.to)?;
        }
        Ok(())
    }
}

impl fmt::Display for TlaUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlaUnit::Operator(def) => {
                if def.local {
                    write!(f, "LOCAL ")?;
                }
                write!(f, "{}", def.name)?;
                if !def.args.is_empty() {
                    write!(f, "(")?;
                    write_list(f, &def.args)?;
                    write!(f, ")")?;
                }
                write!(f, " == {}", def.body)
            }
            TlaUnit::Function(def) => {
                if def.local {
                    write!(f, "LOCAL ")?;
                }
                match &def.function.kind {
                    TlaExpressionKind::Function { bounds, body } => {
                        write!(f, "{}[", def.name)?;
                        write_list(f, bounds)?;
                        write!(f, "] == {}", body)
                    }
                    _ => write!(f, "{} == {}", def.name, def.function),
                }
            }
            TlaUnit::ModuleDefinition(def) => {
                if def.local {
                    write!(f, "LOCAL ")?;
                }
                write!(f, "{}", def.name)?;
                if !def.args.is_empty() {
                    write!(f, "(")?;
                    write_list(f, &def.args)?;
                    write!(f, ")")?;
                }
                write!(f, " == {}", def.instance)
            }
            TlaUnit::Instance(instance) => write!(f, "{}", instance),
            TlaUnit::Constant { declarations, .. } => {
                write!(f, "CONSTANTS ")?;
                write_list(f, declarations)
            }
            TlaUnit::Variable { names, .. } => {
                write!(f, "VARIABLES ")?;
                write_list(f, names)
            }
            TlaUnit::Recursive { declarations, .. } => {
                write!(f, "RECURSIVE ")?;
                write_list(f, declarations)
            }
            TlaUnit::Theorem { expression, .. } => write!(f, "THEOREM {}", expression),
            TlaUnit::Assumption { expression, .. } => write!(f, "ASSUME {}", expression),
        }
    }
}

impl fmt::Display for TlaModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- MODULE {} ----", self.name)?;
        if !self.extends.is_empty() {
            write!(f, "EXTENDS ")?;
            write_list(f, &self.extends)?;
            writeln!(f)?;
        }
        for unit in &self.units {
            writeln!(f, "{}", unit)?;
        }
        write!(f, "====")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_binary_is_parenthesised() {
        let e = TlaExpression::binary(
            "*",
            TlaExpression::binary("+", TlaExpression::number("1"), TlaExpression::number("2")),
            TlaExpression::identifier("x"),
        );
        assert_eq!(e.to_string(), "(1 + 2) * x");
    }

    #[test]
    fn test_prime_and_prefix() {
        let primed = TlaExpression::unary("'", TlaExpression::identifier("x"));
        assert_eq!(primed.to_string(), "x'");
        let domain = TlaExpression::unary("DOMAIN", TlaExpression::identifier("f"));
        assert_eq!(domain.to_string(), "DOMAIN f");
        let not = TlaExpression::unary("~", TlaExpression::boolean(true));
        assert_eq!(not.to_string(), "~TRUE");
    }

    #[test]
    fn test_string_escapes() {
        let s = TlaExpression::string("a\"b\\c\n");
        assert_eq!(s.to_string(), "\"a\\\"b\\\\c\\n\"");
    }
}
