//! # Go の構文木
//!
//! コード生成が出力し、正規化と整形出力が読む最小限の Go の構文です。

/// Go の型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GoType {
    /// `int` や `distsys.ArchetypeResource` のような名前付きの型
    Named(String),
    Slice(Box<GoType>),
    Map(Box<GoType>, Box<GoType>),
    /// 匿名構造体（フィールドは宣言順）
    Struct(Vec<(String, GoType)>),
    Chan(Box<GoType>),
    /// `interface{}`
    Interface,
}

impl GoType {
    pub fn named(name: impl Into<String>) -> Self {
        GoType::Named(name.into())
    }

    pub fn int() -> Self {
        GoType::named("int")
    }

    pub fn bool() -> Self {
        GoType::named("bool")
    }

    pub fn string() -> Self {
        GoType::named("string")
    }

    pub fn float() -> Self {
        GoType::named("float64")
    }

    pub fn error() -> Self {
        GoType::named("error")
    }

    pub fn slice(element: GoType) -> Self {
        GoType::Slice(Box::new(element))
    }

    pub fn map(key: GoType, value: GoType) -> Self {
        GoType::Map(Box::new(key), Box::new(value))
    }

    /// `==` で比較できる基本型か
    pub fn is_basic(&self) -> bool {
        matches!(self, GoType::Named(name) if matches!(name.as_str(), "int" | "bool" | "string" | "float64"))
    }
}

/// Go の式
#[derive(Debug, Clone, PartialEq)]
pub enum GoExpression {
    Identifier(String),
    /// 数値などのリテラル（テキストのまま）
    Literal(String),
    /// 文字列リテラル（エスケープ前の内容）
    String(String),
    Binary {
        operator: String,
        lhs: Box<GoExpression>,
        rhs: Box<GoExpression>,
    },
    Unary {
        operator: String,
        operand: Box<GoExpression>,
    },
    Call {
        function: Box<GoExpression>,
        args: Vec<GoExpression>,
        /// 最後の引数を `...` で展開する
        ellipsis: bool,
    },
    Index {
        target: Box<GoExpression>,
        index: Box<GoExpression>,
    },
    Selector {
        target: Box<GoExpression>,
        field: String,
    },
    TypeAssertion {
        target: Box<GoExpression>,
        ty: GoType,
    },
    /// `T{e1, e2}`
    Composite {
        ty: GoType,
        elements: Vec<GoExpression>,
    },
    /// `T{k1: v1, k2: v2}`
    Keyed {
        ty: GoType,
        entries: Vec<(GoExpression, GoExpression)>,
    },
    /// 型そのもの（`make` の引数や変換に使う）
    Type(GoType),
}

impl GoExpression {
    pub fn identifier(name: impl Into<String>) -> Self {
        GoExpression::Identifier(name.into())
    }

    pub fn literal(text: impl Into<String>) -> Self {
        GoExpression::Literal(text.into())
    }

    pub fn boolean(value: bool) -> Self {
        GoExpression::identifier(if value { "true" } else { "false" })
    }

    pub fn binary(operator: impl Into<String>, lhs: GoExpression, rhs: GoExpression) -> Self {
        GoExpression::Binary {
            operator: operator.into(),
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(operator: impl Into<String>, operand: GoExpression) -> Self {
        GoExpression::Unary {
            operator: operator.into(),
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: GoExpression) -> Self {
        GoExpression::unary("!", operand)
    }

    pub fn call(function: impl Into<String>, args: Vec<GoExpression>) -> Self {
        GoExpression::Call {
            function: Box::new(GoExpression::identifier(function)),
            args,
            ellipsis: false,
        }
    }

    pub fn method(target: GoExpression, method: impl Into<String>, args: Vec<GoExpression>) -> Self {
        GoExpression::Call {
            function: Box::new(GoExpression::Selector {
                target: Box::new(target),
                field: method.into(),
            }),
            args,
            ellipsis: false,
        }
    }

    pub fn index(target: GoExpression, index: GoExpression) -> Self {
        GoExpression::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    pub fn selector(target: GoExpression, field: impl Into<String>) -> Self {
        GoExpression::Selector {
            target: Box::new(target),
            field: field.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, GoExpression::Identifier(name) if name == "true")
    }

    pub fn is_false(&self) -> bool {
        matches!(self, GoExpression::Identifier(name) if name == "false")
    }
}

/// Go の文
#[derive(Debug, Clone, PartialEq)]
pub enum GoStatement {
    Expression(GoExpression),
    /// `lhs = rhs`、`define` なら `lhs := rhs`
    Assign {
        lhs: Vec<GoExpression>,
        rhs: Vec<GoExpression>,
        define: bool,
    },
    /// `var name T = value`
    Var {
        name: String,
        ty: Option<GoType>,
        value: Option<GoExpression>,
    },
    Block(Vec<GoStatement>),
    If {
        condition: GoExpression,
        then: Vec<GoStatement>,
        otherwise: Option<Vec<GoStatement>>,
    },
    /// `for cond { }`（条件なしなら無限ループ）
    For {
        condition: Option<GoExpression>,
        body: Vec<GoStatement>,
    },
    /// `for key, value := range target { }`
    ForRange {
        key: Option<String>,
        value: Option<String>,
        target: GoExpression,
        body: Vec<GoStatement>,
    },
    /// 後続の文に付くラベル
    Label(String),
    Goto(String),
    Break,
    Continue,
    Return(Vec<GoExpression>),
    Go(GoExpression),
    Defer(GoExpression),
    /// `<-ch`
    Receive(GoExpression),
    Comment(String),
}

impl GoStatement {
    pub fn assign(lhs: GoExpression, rhs: GoExpression) -> Self {
        GoStatement::Assign {
            lhs: vec![lhs],
            rhs: vec![rhs],
            define: false,
        }
    }

    pub fn define(name: impl Into<String>, rhs: GoExpression) -> Self {
        GoStatement::Assign {
            lhs: vec![GoExpression::identifier(name)],
            rhs: vec![rhs],
            define: true,
        }
    }

    pub fn expression(expression: GoExpression) -> Self {
        GoStatement::Expression(expression)
    }

    /// 変数を宣言するか（ブロックの平坦化を妨げる）
    pub fn declares(&self) -> bool {
        matches!(self, GoStatement::Var { .. } | GoStatement::Assign { define: true, .. })
    }
}

/// 仮引数
#[derive(Debug, Clone, PartialEq)]
pub struct GoField {
    pub name: String,
    pub ty: GoType,
}

impl GoField {
    pub fn new(name: impl Into<String>, ty: GoType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// パッケージレベルの宣言
#[derive(Debug, Clone, PartialEq)]
pub enum GoDeclaration {
    Function {
        name: String,
        params: Vec<GoField>,
        results: Vec<GoType>,
        body: Vec<GoStatement>,
    },
    Var {
        name: String,
        ty: GoType,
    },
    Comment(String),
}

/// 1つの Go ソースファイル
#[derive(Debug, Clone, PartialEq)]
pub struct GoModule {
    pub package: String,
    pub imports: Vec<String>,
    pub declarations: Vec<GoDeclaration>,
}
