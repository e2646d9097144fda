//! # PlusCal / Modular PlusCal 構文解析器
//!
//! P 構文（`begin ... end`）、C 構文（波括弧）、`--mpcal` ブロックの3つを
//! 扱います。文の葉（代入・await・print など）は共通で、複合文の形と
//! 終端記号だけが構文ごとに異なります。

use super::combinator::*;
use super::tla::TlaGrammar;
use crate::frontend::ast::*;
use crate::frontend::error::SourceLocation;
use crate::frontend::uid::Meta;

/// PlusCal の識別子として使えない語（TLA+ の予約語を含む）
pub const PLUSCAL_RESERVED_WORDS: &[&str] = &[
    "ASSUME", "ASSUMPTION", "AXIOM", "CASE", "CHOOSE", "CONSTANT", "CONSTANTS", "DOMAIN", "ELSE",
    "ENABLED", "EXCEPT", "EXTENDS", "IF", "IN", "INSTANCE", "LET", "LOCAL", "MODULE", "OTHER",
    "SF_", "SUBSET", "THEN", "THEOREM", "UNCHANGED", "UNION", "VARIABLE", "VARIABLES", "WF_",
    "WITH", "LAMBDA", "RECURSIVE", "TRUE", "FALSE", "algorithm", "archetype", "assert", "await",
    "begin", "call", "define", "do", "either", "else", "elsif", "end", "fair", "goto", "if",
    "instance", "macro", "or", "print", "procedure", "process", "ref", "return", "skip", "then",
    "variable", "variables", "when", "while", "with",
];

/// 自動で付けるラベルの接頭辞
pub const AUTO_LABEL_PREFIX: &str = "Lbl_";

fn identifier() -> Grammar<(SourceLocation, String)> {
    match_identifier(PLUSCAL_RESERVED_WORDS)
}

fn tla_identifier() -> Grammar<TlaIdentifier> {
    identifier().map(|(location, id)| TlaIdentifier::new(location, id))
}

fn default_init(location: SourceLocation) -> TlaExpression {
    TlaExpression::new(location, TlaExpressionKind::DefaultInit)
}

fn equals() -> Grammar<SourceLocation> {
    token_not_followed_by("=", &["=", "<", ">", "|"])
}

fn semicolon_or_comma() -> Grammar<SourceLocation> {
    one_of(vec![token(";"), token(",")])
}

fn optional_semicolon() -> Grammar<Option<SourceLocation>> {
    optional(token(";"))
}

fn empty_if_absent<T: 'static>(grammar: Grammar<Vec<T>>) -> Grammar<Vec<T>> {
    optional(grammar).map(Option::unwrap_or_default)
}

fn fairness() -> Grammar<Fairness> {
    one_of(vec![
        token("+").preceded_by(token("fair")).map(|_| Fairness::StrongFair),
        token("fair").map(|_| Fairness::WeakFair),
        nop().map(|_| Fairness::Unfair),
    ])
}

/// 文の葉と宣言で共有する部品
struct Leaves {
    expression: Grammar<TlaExpression>,
    unit: Grammar<TlaUnit>,
}

impl Leaves {
    fn new(tla: &TlaGrammar) -> Self {
        let expression = cut(dependent_part(tla.pcal_expression(), |_, _| VariableMap::new()));
        Self {
            expression,
            unit: dependent_part(tla.unit(), |_, _| VariableMap::new()),
        }
    }

    fn expression(&self) -> Grammar<TlaExpression> {
        self.expression.clone()
    }

    /// `x = e` / `x \in S`
    fn variable_declaration(&self) -> Grammar<VariableDeclaration> {
        let relation = one_of(vec![token("\\in").map(|_| true), equals().map(|_| false)]);
        tla_identifier()
            .then(relation)
            .then(self.expression())
            .map_located(|location, ((name, is_set), value)| VariableDeclaration {
                meta: Meta::new(location),
                name,
                is_ref: false,
                is_set,
                value,
            })
    }

    /// `variables` 宣言の1要素（初期値は省略可能）
    fn var_decl(&self) -> Grammar<VariableDeclaration> {
        let uninitialized = tla_identifier().map_located(|location, name| VariableDeclaration {
            meta: Meta::new(location.clone()),
            name,
            is_ref: false,
            is_set: false,
            value: default_init(location),
        });
        one_of(vec![self.variable_declaration(), uninitialized]).skip(semicolon_or_comma())
    }

    fn var_decls(&self) -> Grammar<Vec<VariableDeclaration>> {
        cut(repeat_one_or_more(self.var_decl())).preceded_by(one_of(vec![token("variables"), token("variable")]))
    }

    /// プロシージャの仮引数と局所変数 `x [= e]`
    fn pvar_decl(&self) -> Grammar<VariableDeclaration> {
        tla_identifier()
            .then(optional(self.expression().preceded_by(equals())))
            .map_located(|location, (name, value)| VariableDeclaration {
                meta: Meta::new(location.clone()),
                name,
                is_ref: false,
                is_set: false,
                value: value.unwrap_or_else(|| default_init(location)),
            })
    }

    fn pvar_decls(&self) -> Grammar<Vec<VariableDeclaration>> {
        cut(repeat_one_or_more(self.pvar_decl().skip(semicolon_or_comma())))
            .preceded_by(one_of(vec![token("variables"), token("variable")]))
    }

    fn arguments(&self) -> Grammar<Vec<TlaExpression>> {
        empty_if_absent(list_of(self.expression(), token(",")))
            .preceded_by(token("("))
            .skip(token(")"))
    }

    /// 代入の左辺 `x`, `f[e, ...]`, `r.field` とその組み合わせ
    fn lhs(&self) -> Grammar<TlaExpression> {
        let root = identifier();
        let index = list_of(self.expression(), token(","))
            .preceded_by(token_not_followed_by("[", &["]"]))
            .skip(token("]"));
        let field = tla_identifier().preceded_by(token_not_followed_by(".", &["."]));
        Grammar::new(move |ctx, vars| {
            let start = ctx.peek_token_start();
            let (location, name) = root.parse(ctx, vars)?;
            let mut result = TlaExpression::new(
                location.clone(),
                TlaExpressionKind::Identifier {
                    prefix: Vec::new(),
                    name: TlaIdentifier::new(location, name),
                },
            );
            loop {
                if let Some(args) = optional(index.clone()).parse(ctx, vars)? {
                    result = TlaExpression::new(
                        ctx.location_between(start, ctx.offset()),
                        TlaExpressionKind::FunctionCall {
                            function: Box::new(result),
                            args,
                        },
                    );
                    continue;
                }
                if let Some(field) = optional(field.clone()).parse(ctx, vars)? {
                    result = TlaExpression::new(
                        ctx.location_between(start, ctx.offset()),
                        TlaExpressionKind::RecordAccess {
                            record: Box::new(result),
                            field,
                        },
                    );
                    continue;
                }
                break;
            }
            Ok(result)
        })
    }

    fn assign(&self) -> Grammar<Statement> {
        let pair = self
            .lhs()
            .skip(token(":="))
            .then(self.expression())
            .map_located(|location, (lhs, rhs)| AssignmentPair {
                meta: Meta::new(location),
                lhs,
                rhs,
            });
        list_of(pair, token("||")).map_located(|location, pairs| Statement::new(location, StatementKind::Assignment(pairs)))
    }

    fn await_statement(&self) -> Grammar<Statement> {
        self.expression()
            .preceded_by(one_of(vec![token("await"), token("when")]))
            .map_located(|location, e| Statement::new(location, StatementKind::Await(e)))
    }

    fn print(&self) -> Grammar<Statement> {
        self.expression()
            .preceded_by(token("print"))
            .map_located(|location, e| Statement::new(location, StatementKind::Print(e)))
    }

    fn assert(&self) -> Grammar<Statement> {
        self.expression()
            .preceded_by(token("assert"))
            .map_located(|location, e| Statement::new(location, StatementKind::Assert(e)))
    }

    fn skip_statement(&self) -> Grammar<Statement> {
        token("skip").map(|location| Statement::new(location, StatementKind::Skip))
    }

    fn return_statement(&self) -> Grammar<Statement> {
        token("return").map(|location| Statement::new(location, StatementKind::Return))
    }

    fn goto(&self) -> Grammar<Statement> {
        identifier()
            .preceded_by(token("goto"))
            .map_located(|location, (_, target)| Statement::new(location, StatementKind::Goto(target)))
    }

    fn call(&self) -> Grammar<Statement> {
        identifier()
            .preceded_by(token("call"))
            .then(self.arguments())
            .map_located(|location, ((_, target), arguments)| {
                Statement::new(location, StatementKind::Call { target, arguments })
            })
    }

    fn macro_call(&self) -> Grammar<Statement> {
        identifier()
            .then(self.arguments())
            .map_located(|location, ((_, target), arguments)| {
                Statement::new(location, StatementKind::MacroCall { target, arguments })
            })
    }

    /// `l:` / `l:+` / `l:-`
    fn label(&self) -> Grammar<Label> {
        let modifier = one_of(vec![
            token("+").map(|_| LabelModifier::Plus),
            token_not_followed_by("-", &["-"]).map(|_| LabelModifier::Minus),
            nop().map(|_| LabelModifier::None),
        ]);
        identifier()
            .skip(token_not_followed_by(":", &["=", ":"]))
            .then(modifier)
            .map_located(|location, ((_, name), modifier)| Label {
                meta: Meta::new(location),
                name,
                modifier,
            })
    }

    /// 構文に依存しない文の葉
    fn common_leaves(&self) -> Vec<Grammar<Statement>> {
        vec![
            self.await_statement(),
            self.print(),
            self.assert(),
            self.skip_statement(),
            self.return_statement(),
            self.goto(),
            self.call(),
            self.macro_call(),
        ]
    }

    fn definitions_in_braces(&self) -> Grammar<Vec<TlaUnit>> {
        cut(repeat(self.unit.clone()))
            .preceded_by(token("{"))
            .preceded_by(token("define"))
            .skip(token("}"))
            .skip(optional_semicolon())
    }
}

fn labeled(location: SourceLocation, label: Label, statements: Vec<Statement>) -> Statement {
    Statement::new(location, StatementKind::LabeledStatements { label, statements })
}

/// C 構文の文法
struct CSyntax {
    compound: Grammar<Vec<Statement>>,
}

impl CSyntax {
    fn new(leaves: &Leaves, scope: &mut GrammarScope) -> Self {
        let statement = ReferenceGrammar::<Vec<Statement>>::new();
        let compound = ReferenceGrammar::<Vec<Statement>>::new();
        let unlabeled = ReferenceGrammar::<Statement>::new();
        scope.register(&statement);
        scope.register(&compound);
        scope.register(&unlabeled);

        let stmt = statement.grammar();
        let expression = leaves.expression();

        let condition = || expression.clone().preceded_by(token("(")).skip(token(")"));

        let else_branch = stmt
            .clone()
            .preceded_by(token("else"))
            .preceded_by(optional_semicolon());
        let if_statement = condition()
            .preceded_by(token("if"))
            .then(stmt.clone())
            .then(optional(else_branch))
            .map_located(|location, ((condition, yes), no)| {
                Statement::new(
                    location,
                    StatementKind::If {
                        condition,
                        yes,
                        no: no.unwrap_or_default(),
                    },
                )
            });
        let while_statement = condition()
            .preceded_by(token("while"))
            .then(stmt.clone())
            .map_located(|location, (condition, body)| {
                Statement::new(location, StatementKind::While { condition, body })
            });
        let either = stmt
            .clone()
            .preceded_by(token("either"))
            .then(cut(repeat_one_or_more(stmt.clone().preceded_by(token("or")))))
            .map_located(|location, (first, rest)| {
                let mut branches = vec![first];
                branches.extend(rest);
                Statement::new(location, StatementKind::Either(branches))
            });
        let with = list_of(leaves.variable_declaration(), semicolon_or_comma())
            .preceded_by(token("("))
            .preceded_by(token("with"))
            .skip(optional(semicolon_or_comma()))
            .skip(token(")"))
            .then(stmt.clone())
            .map_located(|location, (variables, body)| {
                Statement::new(location, StatementKind::With { variables, body })
            });

        let mut alternatives = vec![leaves.assign(), if_statement, while_statement, either, with];
        alternatives.extend(leaves.common_leaves());
        unlabeled.set(one_of(alternatives));

        let labeled_statement = leaves
            .label()
            .then(one_of(vec![
                list_of(unlabeled.grammar(), token(";")),
                compound.grammar(),
            ]))
            .map_located(|location, (label, statements)| vec![labeled(location, label, statements)]);
        statement.set(one_of(vec![
            labeled_statement,
            unlabeled.grammar().map(|s| vec![s]),
            compound.grammar(),
        ]));
        compound.set(cut(empty_if_absent(list_of(stmt, token(";")))
            .preceded_by(token("{"))
            .skip(optional_semicolon())
            .skip(token("}")))
        .map(|statements| statements.into_iter().flatten().collect()));

        Self {
            compound: compound.grammar(),
        }
    }

    fn macro_definition(&self) -> Grammar<Macro> {
        let params = empty_if_absent(list_of(tla_identifier(), token(",")));
        identifier()
            .preceded_by(token("macro"))
            .then(params.preceded_by(token("(")).skip(token(")")))
            .then(self.compound.clone())
            .skip(optional_semicolon())
            .map_located(|location, (((_, name), params), body)| Macro {
                meta: Meta::new(location),
                name,
                params,
                body,
            })
    }

    fn procedure(&self, leaves: &Leaves) -> Grammar<Procedure> {
        let params = empty_if_absent(list_of(leaves.pvar_decl(), token(",")));
        identifier()
            .preceded_by(token("procedure"))
            .then(params.preceded_by(token("(")).skip(token(")")))
            .then(empty_if_absent(leaves.pvar_decls()))
            .then(self.compound.clone())
            .skip(optional_semicolon())
            .map_located(|location, ((((_, name), params), variables), body)| Procedure {
                meta: Meta::new(location),
                name,
                params,
                variables,
                body,
                self_meta: Meta::synthetic(),
            })
    }

    /// `process (P = e)` の見出し
    fn process_header(&self, leaves: &Leaves) -> Grammar<(Fairness, VariableDeclaration)> {
        fairness().then(
            leaves
                .variable_declaration()
                .preceded_by(token("("))
                .preceded_by(token("process"))
                .skip(token(")")),
        )
    }

    fn process(&self, leaves: &Leaves) -> Grammar<Process> {
        self.process_header(leaves)
            .then(empty_if_absent(leaves.var_decls()))
            .then(self.compound.clone())
            .skip(optional_semicolon())
            .map_located(|location, (((fairness, name), variables), body)| Process {
                meta: Meta::new(location),
                name,
                fairness,
                variables,
                body,
            })
    }

    fn algorithm(&self, leaves: &Leaves) -> Grammar<PlusCalAlgorithm> {
        let processes = one_of(vec![
            self.compound.clone().map(Processes::Single),
            cut(repeat_one_or_more(self.process(leaves))).map(Processes::Multi),
        ]);
        algorithm_header()
            .then(tla_identifier())
            .skip(token("{"))
            .then(empty_if_absent(leaves.var_decls()))
            .then(empty_if_absent(leaves.definitions_in_braces()))
            .then(cut(repeat(self.macro_definition())))
            .then(cut(repeat(self.procedure(leaves))))
            .then(processes)
            .skip(token("}"))
            .map_located(
                |location, ((((((fairness, name), variables), units), macros), procedures), processes)| {
                    PlusCalAlgorithm {
                        meta: Meta::new(location),
                        kind: AlgorithmKind::PlusCal,
                        fairness,
                        name,
                        variables,
                        units,
                        macros,
                        procedures,
                        archetypes: Vec::new(),
                        instances: Vec::new(),
                        processes,
                    }
                },
            )
    }
}

fn algorithm_header() -> Grammar<Fairness> {
    one_of(vec![
        token("--algorithm").map(|_| Fairness::Unfair),
        token("algorithm").preceded_by(token("--fair")).map(|_| Fairness::WeakFair),
    ])
}

/// P 構文の文法
struct PSyntax {
    statement: Grammar<Statement>,
}

impl PSyntax {
    fn new(leaves: &Leaves, scope: &mut GrammarScope) -> Self {
        let statement = ReferenceGrammar::<Statement>::new();
        let if_else = ReferenceGrammar::<Vec<Statement>>::new();
        scope.register(&statement);
        scope.register(&if_else);

        let stmt = statement.grammar();
        let body = || cut(repeat_one_or_more(stmt.clone()));
        let expression = leaves.expression();
        let end = |keyword: &'static str| token(keyword).preceded_by(token("end"));

        let elsif = expression
            .clone()
            .preceded_by(token("elsif"))
            .skip(token("then"))
            .then(body())
            .then(if_else.grammar())
            .map_located(|location, ((condition, yes), no)| {
                vec![Statement::new(location, StatementKind::If { condition, yes, no })]
            });
        if_else.set(one_of(vec![
            elsif,
            body().preceded_by(token("else")),
            nop().map(|_| Vec::new()),
        ]));

        let if_statement = expression
            .clone()
            .preceded_by(token("if"))
            .skip(token("then"))
            .then(body())
            .then(if_else.grammar())
            .skip(end("if"))
            .map_located(|location, ((condition, yes), no)| {
                Statement::new(location, StatementKind::If { condition, yes, no })
            });
        let while_statement = expression
            .clone()
            .preceded_by(token("while"))
            .skip(token("do"))
            .then(body())
            .skip(end("while"))
            .map_located(|location, (condition, body)| {
                Statement::new(location, StatementKind::While { condition, body })
            });
        let either = body()
            .preceded_by(token("either"))
            .then(cut(repeat_one_or_more(
                repeat_one_or_more(stmt.clone()).preceded_by(token("or")),
            )))
            .skip(end("either"))
            .map_located(|location, (first, rest)| {
                let mut branches = vec![first];
                branches.extend(rest);
                Statement::new(location, StatementKind::Either(branches))
            });
        let with = cut(list_of(leaves.variable_declaration(), semicolon_or_comma()))
            .preceded_by(token("with"))
            .skip(optional(semicolon_or_comma()))
            .skip(token("do"))
            .then(body())
            .skip(end("with"))
            .map_located(|location, (variables, body)| {
                Statement::new(location, StatementKind::With { variables, body })
            });

        let mut alternatives = vec![leaves.assign(), if_statement, while_statement, either, with];
        alternatives.extend(leaves.common_leaves());
        let unlabeled = one_of(alternatives);

        let labeled_statement = leaves
            .label()
            .then(cut(list_of(unlabeled.clone(), token(";"))))
            .skip(optional_semicolon())
            .map_located(|location, (label, statements)| labeled(location, label, statements));
        statement.set(one_of(vec![labeled_statement, unlabeled.skip(optional_semicolon())]));

        Self {
            statement: statement.grammar(),
        }
    }

    fn body(&self) -> Grammar<Vec<Statement>> {
        cut(repeat_one_or_more(self.statement.clone()))
    }

    fn end(keyword: &'static str) -> Grammar<()> {
        token(keyword)
            .preceded_by(token("end"))
            .skip(optional_semicolon())
            .map(|_| ())
    }

    fn algorithm(&self, leaves: &Leaves) -> Grammar<PlusCalAlgorithm> {
        let definitions = cut(repeat(leaves.unit.clone()))
            .preceded_by(token("define"))
            .skip(Self::end("define"));
        let macro_definition = identifier()
            .preceded_by(token("macro"))
            .then(
                empty_if_absent(list_of(tla_identifier(), token(",")))
                    .preceded_by(token("("))
                    .skip(token(")")),
            )
            .skip(token("begin"))
            .then(self.body())
            .skip(Self::end("macro"))
            .map_located(|location, (((_, name), params), body)| Macro {
                meta: Meta::new(location),
                name,
                params,
                body,
            });
        let procedure = identifier()
            .preceded_by(token("procedure"))
            .then(
                empty_if_absent(list_of(leaves.pvar_decl(), token(",")))
                    .preceded_by(token("("))
                    .skip(token(")")),
            )
            .then(empty_if_absent(leaves.pvar_decls()))
            .skip(token("begin"))
            .then(self.body())
            .skip(Self::end("procedure"))
            .map_located(|location, ((((_, name), params), variables), body)| Procedure {
                meta: Meta::new(location),
                name,
                params,
                variables,
                body,
                self_meta: Meta::synthetic(),
            });
        let process = fairness()
            .skip(token("process"))
            .then(leaves.variable_declaration())
            .then(empty_if_absent(leaves.var_decls()))
            .skip(token("begin"))
            .then(self.body())
            .skip(Self::end("process"))
            .map_located(|location, (((fairness, name), variables), body)| Process {
                meta: Meta::new(location),
                name,
                fairness,
                variables,
                body,
            });
        let processes = one_of(vec![
            self.body().preceded_by(token("begin")).map(Processes::Single),
            cut(repeat_one_or_more(process)).map(Processes::Multi),
        ]);
        algorithm_header()
            .then(tla_identifier())
            .skip(reject(token("{"), "`{` 以外"))
            .then(empty_if_absent(leaves.var_decls()))
            .then(empty_if_absent(definitions))
            .then(cut(repeat(macro_definition)))
            .then(cut(repeat(procedure)))
            .then(processes)
            .skip(token("algorithm").preceded_by(token("end")))
            .map_located(
                |location, ((((((fairness, name), variables), units), macros), procedures), processes)| {
                    PlusCalAlgorithm {
                        meta: Meta::new(location),
                        kind: AlgorithmKind::PlusCal,
                        fairness,
                        name,
                        variables,
                        units,
                        macros,
                        procedures,
                        archetypes: Vec::new(),
                        instances: Vec::new(),
                        processes,
                    }
                },
            )
    }
}

/// `--mpcal` ブロック内のプロセス宣言
enum ProcessOrInstance {
    Process(Process),
    Instance(ArchetypeInstance),
}

fn modular_block(leaves: &Leaves, c: &CSyntax) -> Grammar<PlusCalAlgorithm> {
    let archetype_param = optional(token("ref"))
        .then(tla_identifier())
        .map_located(|location, (is_ref, name)| VariableDeclaration {
            meta: Meta::new(location.clone()),
            name,
            is_ref: is_ref.is_some(),
            is_set: false,
            value: default_init(location),
        });
    let archetype = identifier()
        .preceded_by(token("archetype"))
        .then(
            empty_if_absent(list_of(archetype_param, token(",")))
                .preceded_by(token("("))
                .skip(token(")")),
        )
        .then(empty_if_absent(leaves.var_decls()))
        .then(c.compound.clone())
        .skip(optional_semicolon())
        .map_located(|location, ((((_, name), params), variables), body)| Archetype {
            meta: Meta::new(location),
            name,
            params,
            variables,
            body,
            self_meta: Meta::synthetic(),
        });

    let instance_argument = optional(token("ref"))
        .then(leaves.expression())
        .map(|(is_ref, value)| InstanceArgument {
            is_ref: is_ref.is_some(),
            value,
        });
    let instance_tail = tla_identifier()
        .preceded_by(token("instance"))
        .preceded_by(token_not_followed_by("==", &["="]))
        .then(
            empty_if_absent(list_of(instance_argument, token(",")))
                .preceded_by(token("("))
                .skip(token(")")),
        )
        .skip(optional_semicolon());
    let process_tail = empty_if_absent(leaves.var_decls())
        .then(c.compound.clone())
        .skip(optional_semicolon());
    let header = c.process_header(leaves);
    let process_or_instance = Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let (fairness, name) = header.parse(ctx, vars)?;
        if let Some((target, arguments)) = optional(instance_tail.clone()).parse(ctx, vars)? {
            return Ok(ProcessOrInstance::Instance(ArchetypeInstance {
                meta: Meta::new(ctx.location_between(start, ctx.offset())),
                name,
                fairness,
                target,
                arguments,
            }));
        }
        let (variables, body) = process_tail.parse(ctx, vars)?;
        Ok(ProcessOrInstance::Process(Process {
            meta: Meta::new(ctx.location_between(start, ctx.offset())),
            name,
            fairness,
            variables,
            body,
        }))
    });

    let leading_variables = empty_if_absent(leaves.var_decls());
    let definitions = empty_if_absent(leaves.definitions_in_braces());
    let macros = cut(repeat(c.macro_definition()));
    let procedures = cut(repeat(c.procedure(leaves)));
    let archetypes = cut(repeat(archetype));
    let trailing_variables = empty_if_absent(leaves.var_decls());
    let declarations = cut(repeat(process_or_instance));
    let name = tla_identifier().preceded_by(token("--mpcal")).skip(token("{"));

    Grammar::new(move |ctx, vars| {
        let start = ctx.peek_token_start();
        let name = name.parse(ctx, vars)?;
        let mut variables = leading_variables.parse(ctx, vars)?;
        let units = definitions.parse(ctx, vars)?;
        let macros = macros.parse(ctx, vars)?;
        let procedures = procedures.parse(ctx, vars)?;
        let archetypes = archetypes.parse(ctx, vars)?;
        variables.extend(trailing_variables.parse(ctx, vars)?);
        let mut processes = Vec::new();
        let mut instances = Vec::new();
        for declaration in declarations.parse(ctx, vars)? {
            match declaration {
                ProcessOrInstance::Process(process) => processes.push(process),
                ProcessOrInstance::Instance(instance) => instances.push(instance),
            }
        }
        token("}").parse(ctx, vars)?;
        Ok(PlusCalAlgorithm {
            meta: Meta::new(ctx.location_between(start, ctx.offset())),
            kind: AlgorithmKind::Modular,
            fairness: Fairness::Unfair,
            name,
            variables,
            units,
            macros,
            procedures,
            archetypes,
            instances,
            processes: Processes::Multi(processes),
        })
    })
}

/// 本体の先頭にあるラベルなしの文をまとめて自動ラベルで包む
fn label_leading_statements(body: &mut Vec<Statement>, counter: &mut usize) {
    let unlabeled = body.iter().take_while(|s| !s.is_labeled()).count();
    if unlabeled == 0 {
        return;
    }
    let statements: Vec<Statement> = body.drain(..unlabeled).collect();
    let location = statements
        .first()
        .map(|s| s.location().merge_with(statements[statements.len() - 1].location()))
        .unwrap_or_else(SourceLocation::unknown);
    *counter += 1;
    let label = Label {
        meta: Meta::new(statements[0].location().clone()),
        name: format!("{}{}", AUTO_LABEL_PREFIX, counter),
        modifier: LabelModifier::None,
    };
    body.insert(0, labeled(location, label, statements));
}

/// `--algorithm` の各本体に自動ラベルを補う
pub fn add_automatic_labels(algorithm: &mut PlusCalAlgorithm) {
    if algorithm.kind != AlgorithmKind::PlusCal {
        return;
    }
    let mut counter = 0;
    match &mut algorithm.processes {
        Processes::Single(body) => label_leading_statements(body, &mut counter),
        Processes::Multi(processes) => {
            for process in processes {
                label_leading_statements(&mut process.body, &mut counter);
            }
        }
    }
    for procedure in &mut algorithm.procedures {
        label_leading_statements(&mut procedure.body, &mut counter);
    }
}

/// PlusCal の文法一式
pub struct PlusCalGrammar {
    algorithm: Grammar<PlusCalAlgorithm>,
    _tla: TlaGrammar,
    _scope: GrammarScope,
}

impl PlusCalGrammar {
    pub fn new() -> Self {
        let tla = TlaGrammar::new();
        let mut scope = GrammarScope::new();
        let leaves = Leaves::new(&tla);
        let c = CSyntax::new(&leaves, &mut scope);
        let p = PSyntax::new(&leaves, &mut scope);
        // P 構文を先に試す（名前の後の `{` で C 構文と区別する）
        let algorithm = one_of(vec![p.algorithm(&leaves), c.algorithm(&leaves), modular_block(&leaves, &c)]);
        Self {
            algorithm,
            _tla: tla,
            _scope: scope,
        }
    }

    /// `--algorithm` / `--fair algorithm` / `--mpcal` の位置から始まるアルゴリズム
    pub fn algorithm(&self) -> Grammar<PlusCalAlgorithm> {
        self.algorithm.clone()
    }
}

impl Default for PlusCalGrammar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> PlusCalAlgorithm {
        let grammar = PlusCalGrammar::new();
        let mut ctx = LexicalContext::new("test", source);
        let result = read_or_except(&mut ctx, &grammar.algorithm());
        assert!(result.is_ok(), "解析に失敗: {:?}", result.err());
        let mut algorithm = result.unwrap();
        add_automatic_labels(&mut algorithm);
        algorithm
    }

    fn single_body(algorithm: &PlusCalAlgorithm) -> &[Statement] {
        match &algorithm.processes {
            Processes::Single(body) => body,
            Processes::Multi(_) => panic!("単一プロセスではありません"),
        }
    }

    #[test]
    fn test_c_syntax_single_process_is_auto_labeled() {
        let algorithm = parse(
            "--algorithm Test {\n    variables a = 2;\n          b = 2;\n          c = 3;\n    {\n        print (a)*((b)+(c))\n    }\n}",
        );
        assert_eq!(algorithm.variables.len(), 3);
        let body = single_body(&algorithm);
        assert_eq!(body.len(), 1);
        match &body[0].kind {
            StatementKind::LabeledStatements { label, statements } => {
                assert_eq!(label.name, "Lbl_1");
                assert_eq!(statements.len(), 1);
                assert!(matches!(statements[0].kind, StatementKind::Print(_)));
            }
            other => panic!("ラベル付きの文ではありません: {:?}", other),
        }
    }

    #[test]
    fn test_p_syntax_processes() {
        let algorithm = parse(
            "--algorithm Counter\nvariables x = 0;\nprocess P \\in 1..2\nvariable t = 0;\nbegin\n  l1: t := x;\n  l2: x := t + 1;\nend process;\nend algorithm",
        );
        match &algorithm.processes {
            Processes::Multi(processes) => {
                assert_eq!(processes.len(), 1);
                assert!(processes[0].name.is_set);
                assert_eq!(processes[0].variables.len(), 1);
                assert_eq!(processes[0].body.len(), 2);
            }
            Processes::Single(_) => panic!("複数プロセスのはずです"),
        }
    }

    #[test]
    fn test_p_syntax_elsif_chain_nests() {
        let algorithm = parse(
            "--algorithm A\nvariables x = 0;\nbegin\n l: if x = 0 then x := 1;\n    elsif x = 1 then x := 2;\n    else x := 3;\n    end if;\nend algorithm",
        );
        let body = single_body(&algorithm);
        let StatementKind::LabeledStatements { statements, .. } = &body[0].kind else {
            panic!("ラベルがありません");
        };
        let StatementKind::If { no, .. } = &statements[0].kind else {
            panic!("if 文ではありません");
        };
        assert_eq!(no.len(), 1);
        assert!(matches!(no[0].kind, StatementKind::If { .. }));
    }

    #[test]
    fn test_c_syntax_label_groups_following_statements() {
        let algorithm = parse("--algorithm A {\n variables x = 0, y = 0;\n {\n  l1: x := 1; y := 2;\n  l2: x := y || y := x;\n }\n}");
        let body = single_body(&algorithm);
        assert_eq!(body.len(), 2);
        let StatementKind::LabeledStatements { statements, .. } = &body[1].kind else {
            panic!("ラベルがありません");
        };
        let StatementKind::Assignment(pairs) = &statements[0].kind else {
            panic!("代入ではありません");
        };
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_modular_block() {
        let algorithm = parse(
            "--mpcal M {\n  archetype A(ref r, n) {\n    l1: r := n;\n  }\n  variables shared = 0;\n  fair process (P = 1) == instance A(ref shared, 3);\n  process (Q = 2) {\n    l2: print 1;\n  }\n}",
        );
        assert_eq!(algorithm.kind, AlgorithmKind::Modular);
        assert_eq!(algorithm.archetypes.len(), 1);
        assert!(algorithm.archetypes[0].params[0].is_ref);
        assert!(!algorithm.archetypes[0].params[1].is_ref);
        assert_eq!(algorithm.instances.len(), 1);
        assert_eq!(algorithm.instances[0].fairness, Fairness::WeakFair);
        assert!(algorithm.instances[0].arguments[0].is_ref);
        match &algorithm.processes {
            Processes::Multi(processes) => assert_eq!(processes.len(), 1),
            Processes::Single(_) => panic!("複数プロセスのはずです"),
        }
    }

    #[test]
    fn test_modular_block_is_not_auto_labeled() {
        let algorithm = parse("--mpcal X {\n  archetype A() {\n    print(1 + 1);\n  }\n}");
        assert!(!algorithm.archetypes[0].body[0].is_labeled());
    }

    #[test]
    fn test_lhs_forms() {
        let algorithm = parse("--algorithm A {\n variables f = <<1>>, r = [a |-> 1];\n {\n  l: f[1] := 2; r.a := 3;\n }\n}");
        let body = single_body(&algorithm);
        let StatementKind::LabeledStatements { statements, .. } = &body[0].kind else {
            panic!("ラベルがありません");
        };
        let StatementKind::Assignment(pairs) = &statements[0].kind else {
            panic!("代入ではありません");
        };
        assert!(matches!(pairs[0].lhs.kind, TlaExpressionKind::FunctionCall { .. }));
        let StatementKind::Assignment(pairs) = &statements[1].kind else {
            panic!("代入ではありません");
        };
        assert!(matches!(pairs[0].lhs.kind, TlaExpressionKind::RecordAccess { .. }));
    }
}
