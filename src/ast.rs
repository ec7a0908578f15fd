//! The already-parsed input AST.
//!
//! Lexing and parsing happen upstream of this crate; a [`Program`] is the
//! boundary artifact the CLI reads from a `<input>.ast.json` file (see
//! `src/bin/yulangc.rs`). The shapes mirror
//! `parser::ast::{TopLevelStatement, Statement, Expression, TypeName}`'s
//! tagged unions, extended with nodes a minimal grammar tends to omit at
//! first pass (imports, foreign declarations, casts, `new`/`delete`,
//! unsafe blocks).

use serde::{Deserialize, Serialize};

use crate::error::Position;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<TopLevelItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopLevelItem {
    Import(ImportDecl),
    DeclareFn(DeclareFnDecl),
    StructDecl(StructDecl),
    ClassDecl(ClassDecl),
    FunctionDecl(FunctionDecl),
    GlobalLet(GlobalBinding),
    GlobalConst(GlobalBinding),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDecl {
    /// `std`, `std/io`, `./sibling`, or an absolute path — resolved by the
    /// parser's module table, never by this crate.
    pub path: String,
    pub alias: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclareFnDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeAnnotation,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<StructMember>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructMember {
    pub name: String,
    pub type_annotation: TypeAnnotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub members: Vec<StructMember>,
    /// Method declarations, in source order. A method named `constructor`
    /// (if present) is invoked by `NewExpr` instead of being callable
    /// directly.
    pub methods: Vec<FunctionDecl>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeAnnotation,
    pub body: Block,
    /// Whether this top-level function is re-exported for a module that
    /// imports this source file; feeds the NameMangler's export rule.
    pub exported: bool,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_annotation: TypeAnnotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalBinding {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    pub value: Expr,
    pub exported: bool,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Let(LetStmt),
    Assignment(AssignmentStmt),
    If(IfStmt),
    WhileLoop(WhileStmt),
    Return(Option<Expr>, Position),
    Expression(Expr),
    FunctionDecl(FunctionDecl),
    StructDecl(StructDecl),
    ClassDecl(ClassDecl),
    UsingStmt(UsingStmt),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    pub value: Option<Expr>,
    pub mutable: bool,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentStmt {
    pub target: Expr,
    pub value: Expr,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Block,
    pub position: Position,
}

/// No IR is emitted for this node; it only affects linking, which is out of
/// scope for this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsingStmt {
    pub path: String,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeAnnotation {
    Named(String),
    Pointer(Box<TypeAnnotation>),
    Array(Box<TypeAnnotation>),
    Function { params: Vec<TypeAnnotation>, return_type: Box<TypeAnnotation> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    IntLiteral(i64, Position),
    FloatLiteral(f64, Position),
    BoolLiteral(bool, Position),
    CharLiteral(u8, Position),
    StringLiteral(String, Position),
    NullLiteral(Position),
    Id(String, Position),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr>, position: Position },
    Prefix { op: PrefixOp, operand: Box<Expr>, position: Position },
    AddressOf(Box<Expr>, Position),
    Dereference(Box<Expr>, Position),
    Call { callee: Box<Expr>, args: Vec<Expr>, position: Position },
    Get { receiver: Box<Expr>, member: String, position: Position },
    As { operand: Box<Expr>, target_type: TypeAnnotation, position: Position },
    New { class_name: String, args: Vec<Expr>, position: Position },
    Delete(Box<Expr>, Position),
    ObjectLiteral { type_name: Option<String>, fields: Vec<(String, Expr)>, position: Position },
    FunctionLiteral {
        params: Vec<Param>,
        return_type: TypeAnnotation,
        body: Block,
        position: Position,
    },
    Block(Block, Position),
    If {
        condition: Box<Expr>,
        then_block: Block,
        else_block: Option<Block>,
        position: Position,
    },
    UnsafeBlock(Block, Position),
    Parens(Box<Expr>, Position),
}

impl Expr {
    pub fn position(&self) -> &Position {
        match self {
            Expr::IntLiteral(_, p)
            | Expr::FloatLiteral(_, p)
            | Expr::BoolLiteral(_, p)
            | Expr::CharLiteral(_, p)
            | Expr::StringLiteral(_, p)
            | Expr::NullLiteral(p)
            | Expr::Id(_, p)
            | Expr::Binary { position: p, .. }
            | Expr::Prefix { position: p, .. }
            | Expr::AddressOf(_, p)
            | Expr::Dereference(_, p)
            | Expr::Call { position: p, .. }
            | Expr::Get { position: p, .. }
            | Expr::As { position: p, .. }
            | Expr::New { position: p, .. }
            | Expr::Delete(_, p)
            | Expr::ObjectLiteral { position: p, .. }
            | Expr::FunctionLiteral { position: p, .. }
            | Expr::Block(_, p)
            | Expr::If { position: p, .. }
            | Expr::UnsafeBlock(_, p)
            | Expr::Parens(_, p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefixOp {
    Neg,
    Not,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_round_trips_through_json() {
        let program = Program {
            items: vec![TopLevelItem::GlobalConst(GlobalBinding {
                name: "answer".into(),
                type_annotation: Some(TypeAnnotation::Named("int".into())),
                value: Expr::IntLiteral(42, ("t.yu".into(), 1, 1)),
                exported: false,
                position: ("t.yu".into(), 1, 1),
            })],
        };
        let json = serde_json::to_string(&program).expect("serialize");
        let back: Program = serde_json::from_str(&json).expect("deserialize");
        match &back.items[0] {
            TopLevelItem::GlobalConst(binding) => assert_eq!(binding.name, "answer"),
            _ => panic!("expected GlobalConst"),
        }
    }
}
