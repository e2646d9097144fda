//! # PlusCal / Modular PlusCal 抽象構文木

use super::tla::{TlaExpression, TlaIdentifier, TlaUnit};
use crate::frontend::error::SourceLocation;
use crate::frontend::uid::Meta;

/// アルゴリズムの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    /// `--algorithm`
    PlusCal,
    /// `--mpcal`
    Modular,
}

/// 公平性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fairness {
    Unfair,
    WeakFair,
    StrongFair,
}

/// 変数宣言 `x = e` / `x \in S`
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub meta: Meta,
    pub name: TlaIdentifier,
    /// アーキタイプ引数の `ref` 修飾
    pub is_ref: bool,
    /// `\in` による初期化
    pub is_set: bool,
    pub value: TlaExpression,
}

impl VariableDeclaration {
    pub fn location(&self) -> &SourceLocation {
        &self.meta.location
    }
}

/// ラベルの公平性修飾
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelModifier {
    None,
    /// `l:+`
    Plus,
    /// `l:-`
    Minus,
}

/// ラベル
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub meta: Meta,
    pub name: String,
    pub modifier: LabelModifier,
}

/// 並行代入の1組 `lhs := rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentPair {
    pub meta: Meta,
    pub lhs: TlaExpression,
    pub rhs: TlaExpression,
}

/// 文
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub meta: Meta,
    pub kind: StatementKind,
}

/// 文の種類
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    LabeledStatements {
        label: Label,
        statements: Vec<Statement>,
    },
    Assignment(Vec<AssignmentPair>),
    Await(TlaExpression),
    Print(TlaExpression),
    Assert(TlaExpression),
    Skip,
    Return,
    Goto(String),
    Call {
        target: String,
        arguments: Vec<TlaExpression>,
    },
    MacroCall {
        target: String,
        arguments: Vec<TlaExpression>,
    },
    If {
        condition: TlaExpression,
        yes: Vec<Statement>,
        no: Vec<Statement>,
    },
    While {
        condition: TlaExpression,
        body: Vec<Statement>,
    },
    Either(Vec<Vec<Statement>>),
    With {
        variables: Vec<VariableDeclaration>,
        body: Vec<Statement>,
    },
}

impl Statement {
    pub fn new(location: SourceLocation, kind: StatementKind) -> Self {
        Self {
            meta: Meta::new(location),
            kind,
        }
    }

    pub fn synthetic(kind: StatementKind) -> Self {
        Self::new(SourceLocation::unknown(), kind)
    }

    pub fn location(&self) -> &SourceLocation {
        &self.meta.location
    }

    pub fn is_labeled(&self) -> bool {
        matches!(self.kind, StatementKind::LabeledStatements { .. })
    }
}

/// マクロ
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub meta: Meta,
    pub name: String,
    pub params: Vec<TlaIdentifier>,
    pub body: Vec<Statement>,
}

/// プロシージャ
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub meta: Meta,
    pub name: String,
    pub params: Vec<VariableDeclaration>,
    pub variables: Vec<VariableDeclaration>,
    pub body: Vec<Statement>,
    /// 本体から参照される `self` の定義位置
    pub self_meta: Meta,
}

/// プロセス
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub meta: Meta,
    /// `process (P = e)` / `process (P \in S)` の名前と識別値
    pub name: VariableDeclaration,
    pub fairness: Fairness,
    pub variables: Vec<VariableDeclaration>,
    pub body: Vec<Statement>,
}

/// アーキタイプ（Modular PlusCal）
#[derive(Debug, Clone, PartialEq)]
pub struct Archetype {
    pub meta: Meta,
    pub name: String,
    pub params: Vec<VariableDeclaration>,
    pub variables: Vec<VariableDeclaration>,
    pub body: Vec<Statement>,
    pub self_meta: Meta,
}

/// インスタンス引数 `[ref] e`
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceArgument {
    pub is_ref: bool,
    pub value: TlaExpression,
}

/// インスタンス宣言 `process (P = e) == instance A(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct ArchetypeInstance {
    pub meta: Meta,
    pub name: VariableDeclaration,
    pub fairness: Fairness,
    pub target: TlaIdentifier,
    pub arguments: Vec<InstanceArgument>,
}

/// プロセス構成
#[derive(Debug, Clone, PartialEq)]
pub enum Processes {
    /// 単一プロセスの本体
    Single(Vec<Statement>),
    /// 複数プロセス
    Multi(Vec<Process>),
}

/// アルゴリズム全体
#[derive(Debug, Clone, PartialEq)]
pub struct PlusCalAlgorithm {
    pub meta: Meta,
    pub kind: AlgorithmKind,
    pub fairness: Fairness,
    pub name: TlaIdentifier,
    pub variables: Vec<VariableDeclaration>,
    pub units: Vec<TlaUnit>,
    pub macros: Vec<Macro>,
    pub procedures: Vec<Procedure>,
    pub archetypes: Vec<Archetype>,
    pub instances: Vec<ArchetypeInstance>,
    pub processes: Processes,
}

impl PlusCalAlgorithm {
    pub fn location(&self) -> &SourceLocation {
        &self.meta.location
    }

    /// すべての本体（プロセス・プロシージャ・アーキタイプ・単一本体）を巡回
    pub fn bodies(&self) -> Vec<&[Statement]> {
        let mut bodies: Vec<&[Statement]> = Vec::new();
        match &self.processes {
            Processes::Single(body) => bodies.push(body),
            Processes::Multi(processes) => bodies.extend(processes.iter().map(|p| p.body.as_slice())),
        }
        bodies.extend(self.procedures.iter().map(|p| p.body.as_slice()));
        bodies.extend(self.archetypes.iter().map(|a| a.body.as_slice()));
        bodies
    }
}

/// 文の列を深さ優先で巡回する
pub fn walk_statements(statements: &[Statement], f: &mut dyn FnMut(&Statement)) {
    for statement in statements {
        f(statement);
        match &statement.kind {
            StatementKind::LabeledStatements { statements, .. } => walk_statements(statements, f),
            StatementKind::If { yes, no, .. } => {
                walk_statements(yes, f);
                walk_statements(no, f);
            }
            StatementKind::While { body, .. } | StatementKind::With { body, .. } => walk_statements(body, f),
            StatementKind::Either(branches) => {
                for branch in branches {
                    walk_statements(branch, f);
                }
            }
            _ => {}
        }
    }
}
