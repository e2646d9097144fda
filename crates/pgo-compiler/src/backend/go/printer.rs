//! # Go ソースの整形出力
//!
//! インデントは2空白です。`gofmt` を通せば標準の体裁になりますが、
//! 通さなくてもそのままコンパイルできる形で出力します。

use std::fmt::Write;

use super::ast::{GoDeclaration, GoExpression, GoField, GoModule, GoStatement, GoType};

const INDENT: &str = "  ";

/// 二項演算子の優先順位（Go の仕様どおり5段階）
fn precedence(operator: &str) -> u8 {
    match operator {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" | "<" | "<=" | ">" | ">=" => 3,
        "+" | "-" | "|" | "^" => 4,
        _ => 5,
    }
}

/// Go の解釈済み文字列リテラルにする
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(quoted, "\\x{:02x}", c as u32);
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

pub fn print_type(ty: &GoType) -> String {
    match ty {
        GoType::Named(name) => name.clone(),
        GoType::Slice(element) => format!("[]{}", print_type(element)),
        GoType::Map(key, value) => format!("map[{}]{}", print_type(key), print_type(value)),
        GoType::Struct(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, ty)| format!("{} {}", name, print_type(ty)))
                .collect();
            format!("struct{{{}}}", fields.join("; "))
        }
        GoType::Chan(element) => format!("chan {}", print_type(element)),
        GoType::Interface => "interface{}".to_string(),
    }
}

fn print_list(expressions: &[GoExpression]) -> String {
    expressions.iter().map(print_expression).collect::<Vec<_>>().join(", ")
}

/// 被演算子やレシーバーの位置で括弧が要るなら付ける
fn operand(expression: &GoExpression) -> String {
    match expression {
        GoExpression::Binary { .. } | GoExpression::Unary { .. } => format!("({})", print_expression(expression)),
        _ => print_expression(expression),
    }
}

fn binary_side(expression: &GoExpression, parent: u8, right: bool) -> String {
    match expression {
        GoExpression::Binary { operator, .. } => {
            let own = precedence(operator);
            if own < parent || (right && own == parent) {
                format!("({})", print_expression(expression))
            } else {
                print_expression(expression)
            }
        }
        _ => print_expression(expression),
    }
}

pub fn print_expression(expression: &GoExpression) -> String {
    match expression {
        GoExpression::Identifier(name) | GoExpression::Literal(name) => name.clone(),
        GoExpression::String(text) => quote(text),
        GoExpression::Binary { operator, lhs, rhs } => {
            let parent = precedence(operator);
            format!(
                "{} {} {}",
                binary_side(lhs, parent, false),
                operator,
                binary_side(rhs, parent, true)
            )
        }
        GoExpression::Unary { operator, operand: inner } => {
            let printed = operand(inner);
            // `--x` は減算演算子として字句解析される
            if printed.starts_with(operator.as_str()) {
                format!("{}({})", operator, printed)
            } else {
                format!("{}{}", operator, printed)
            }
        }
        GoExpression::Call {
            function,
            args,
            ellipsis,
        } => format!(
            "{}({}{})",
            operand(function),
            print_list(args),
            if *ellipsis { "..." } else { "" }
        ),
        GoExpression::Index { target, index } => format!("{}[{}]", operand(target), print_expression(index)),
        GoExpression::Selector { target, field } => format!("{}.{}", operand(target), field),
        GoExpression::TypeAssertion { target, ty } => format!("{}.({})", operand(target), print_type(ty)),
        GoExpression::Composite { ty, elements } => format!("{}{{{}}}", print_type(ty), print_list(elements)),
        GoExpression::Keyed { ty, entries } => {
            let entries: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{}: {}", print_expression(key), print_expression(value)))
                .collect();
            format!("{}{{{}}}", print_type(ty), entries.join(", "))
        }
        GoExpression::Type(ty) => print_type(ty),
    }
}

struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, statements: &[GoStatement]) {
        self.depth += 1;
        for statement in statements {
            self.statement(statement);
        }
        self.depth -= 1;
    }

    fn statement(&mut self, statement: &GoStatement) {
        match statement {
            GoStatement::Expression(expression) => self.line(&print_expression(expression)),
            GoStatement::Assign { lhs, rhs, define } => {
                let operator = if *define { ":=" } else { "=" };
                self.line(&format!("{} {} {}", print_list(lhs), operator, print_list(rhs)));
            }
            GoStatement::Var { name, ty, value } => {
                let mut text = format!("var {}", name);
                if let Some(ty) = ty {
                    text.push(' ');
                    text.push_str(&print_type(ty));
                }
                if let Some(value) = value {
                    text.push_str(" = ");
                    text.push_str(&print_expression(value));
                }
                self.line(&text);
            }
            GoStatement::Block(statements) => {
                self.line("{");
                self.block(statements);
                self.line("}");
            }
            GoStatement::If {
                condition,
                then,
                otherwise,
            } => {
                self.line(&format!("if {} {{", print_expression(condition)));
                self.block(then);
                match otherwise {
                    Some(otherwise) => {
                        self.line("} else {");
                        self.block(otherwise);
                        self.line("}");
                    }
                    None => self.line("}"),
                }
            }
            GoStatement::For { condition, body } => {
                match condition {
                    Some(condition) => self.line(&format!("for {} {{", print_expression(condition))),
                    None => self.line("for {"),
                }
                self.block(body);
                self.line("}");
            }
            GoStatement::ForRange {
                key,
                value,
                target,
                body,
            } => {
                let target = print_expression(target);
                let header = match (key, value) {
                    (Some(key), Some(value)) => format!("for {}, {} := range {} {{", key, value, target),
                    (Some(key), None) => format!("for {} := range {} {{", key, target),
                    (None, Some(value)) => format!("for _, {} := range {} {{", value, target),
                    (None, None) => format!("for range {} {{", target),
                };
                self.line(&header);
                self.block(body);
                self.line("}");
            }
            GoStatement::Label(name) => {
                let depth = self.depth;
                self.depth = depth.saturating_sub(1);
                self.line(&format!("{}:", name));
                self.depth = depth;
            }
            GoStatement::Goto(label) => self.line(&format!("goto {}", label)),
            GoStatement::Break => self.line("break"),
            GoStatement::Continue => self.line("continue"),
            GoStatement::Return(values) => {
                if values.is_empty() {
                    self.line("return");
                } else {
                    self.line(&format!("return {}", print_list(values)));
                }
            }
            GoStatement::Go(call) => self.line(&format!("go {}", print_expression(call))),
            GoStatement::Defer(call) => self.line(&format!("defer {}", print_expression(call))),
            GoStatement::Receive(channel) => self.line(&format!("<-{}", operand(channel))),
            GoStatement::Comment(text) => {
                for line in text.lines() {
                    self.line(format!("// {}", line).trim_end());
                }
            }
        }
    }

    fn params(params: &[GoField]) -> String {
        params
            .iter()
            .map(|field| format!("{} {}", field.name, print_type(&field.ty)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn declaration(&mut self, declaration: &GoDeclaration) {
        match declaration {
            GoDeclaration::Function {
                name,
                params,
                results,
                body,
            } => {
                let results = match results.len() {
                    0 => String::new(),
                    1 => format!(" {}", print_type(&results[0])),
                    _ => format!(
                        " ({})",
                        results.iter().map(print_type).collect::<Vec<_>>().join(", ")
                    ),
                };
                self.line(&format!("func {}({}){} {{", name, Self::params(params), results));
                self.block(body);
                self.line("}");
            }
            GoDeclaration::Var { name, ty } => self.line(&format!("var {} {}", name, print_type(ty))),
            GoDeclaration::Comment(text) => {
                for line in text.lines() {
                    self.line(format!("// {}", line).trim_end());
                }
            }
        }
    }
}

/// モジュール全体を Go のソースにする
pub fn print_module(module: &GoModule) -> String {
    let mut printer = Printer {
        out: String::new(),
        depth: 0,
    };
    printer.line(&format!("package {}", module.package));
    if !module.imports.is_empty() {
        printer.out.push('\n');
        printer.line("import (");
        printer.depth += 1;
        for import in &module.imports {
            printer.line(&quote(import));
        }
        printer.depth -= 1;
        printer.line(")");
    }
    let mut previous_was_var = false;
    for declaration in &module.declarations {
        let is_var = matches!(declaration, GoDeclaration::Var { .. });
        if !(is_var && previous_was_var) {
            printer.out.push('\n');
        }
        printer.declaration(declaration);
        previous_was_var = is_var;
    }
    printer.out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parenthesises_by_precedence() {
        let sum = GoExpression::binary("+", GoExpression::identifier("a"), GoExpression::identifier("b"));
        let product = GoExpression::binary("*", sum.clone(), GoExpression::identifier("c"));
        assert_eq!(print_expression(&product), "(a + b) * c");
        let difference = GoExpression::binary("-", GoExpression::identifier("a"), sum);
        assert_eq!(print_expression(&difference), "a - (a + b)");
        let negated = GoExpression::not(GoExpression::binary(
            "==",
            GoExpression::identifier("x"),
            GoExpression::literal("1"),
        ));
        assert_eq!(print_expression(&negated), "!(x == 1)");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(quote("\u{1b}"), "\"\\x1b\"");
    }

    #[test]
    fn test_print_module_layout() {
        let module = GoModule {
            package: "main".to_string(),
            imports: vec!["fmt".to_string()],
            declarations: vec![
                GoDeclaration::Var {
                    name: "x".to_string(),
                    ty: GoType::int(),
                },
                GoDeclaration::Function {
                    name: "main".to_string(),
                    params: Vec::new(),
                    results: Vec::new(),
                    body: vec![
                        GoStatement::Label("l1".to_string()),
                        GoStatement::Expression(GoExpression::call(
                            "fmt.Println",
                            vec![GoExpression::identifier("x")],
                        )),
                    ],
                },
            ],
        };
        let printed = print_module(&module);
        assert_eq!(
            printed,
            "package main\n\nimport (\n  \"fmt\"\n)\n\nvar x int\n\nfunc main() {\nl1:\n  fmt.Println(x)\n}\n"
        );
        assert!(printed.lines().all(|line| line == line.trim_end()));
    }
}
