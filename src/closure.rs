//! ClosureAnalyzer: free-variable analysis for function literals.
//!
//! Grounded on `why_lib`'s lambda capture-info computation (walk the body,
//! look up each identifier's defining depth, keep the ones strictly between
//! the global scope and the literal's own body) — reimplemented here as a
//! read-only AST walk with no type-checking side effects, since this engine
//! has no separate type-checking phase (see DESIGN.md).

use std::collections::HashSet;

use crate::ast::{Block, Expr, Stmt};
use crate::scope::ScopeStack;

/// One free variable bound by a closure.
#[derive(Debug, Clone)]
pub struct CapturedVariableInfo {
    pub name: String,
    pub llvm_type: String,
    pub ptr: String,
    pub defined_in_scope_depth: usize,
}

pub struct ClosureAnalyzer;

impl ClosureAnalyzer {
    /// Walks `body` looking for identifiers bound in `outer_scope` at a
    /// depth `d` with `0 < d < function_body_depth`. Nested function
    /// literals are not descended into: their own captures are discovered
    /// independently when they are themselves lowered.
    pub fn analyze(
        body: &Block,
        outer_scope: &ScopeStack,
        function_body_depth: usize,
    ) -> Vec<CapturedVariableInfo> {
        let mut seen = HashSet::new();
        let mut captures = Vec::new();
        walk_block(body, outer_scope, function_body_depth, &mut seen, &mut captures);
        captures
    }
}

fn record_candidate(
    name: &str,
    outer_scope: &ScopeStack,
    function_body_depth: usize,
    seen: &mut HashSet<String>,
    captures: &mut Vec<CapturedVariableInfo>,
) {
    if seen.contains(name) {
        return;
    }
    if let Some(entry) = outer_scope.lookup(name) {
        let depth = entry.defined_in_scope_depth;
        if depth > 0 && depth < function_body_depth {
            seen.insert(name.to_string());
            captures.push(CapturedVariableInfo {
                name: name.to_string(),
                llvm_type: entry.llvm_type.clone(),
                ptr: entry.ptr.clone(),
                defined_in_scope_depth: depth,
            });
        }
    }
}

fn walk_block(
    block: &Block,
    outer_scope: &ScopeStack,
    function_body_depth: usize,
    seen: &mut HashSet<String>,
    captures: &mut Vec<CapturedVariableInfo>,
) {
    for stmt in &block.statements {
        walk_stmt(stmt, outer_scope, function_body_depth, seen, captures);
    }
}

fn walk_stmt(
    stmt: &Stmt,
    outer_scope: &ScopeStack,
    function_body_depth: usize,
    seen: &mut HashSet<String>,
    captures: &mut Vec<CapturedVariableInfo>,
) {
    match stmt {
        Stmt::Let(let_stmt) => {
            if let Some(value) = &let_stmt.value {
                walk_expr(value, outer_scope, function_body_depth, seen, captures);
            }
        }
        Stmt::Assignment(assignment) => {
            walk_expr(&assignment.target, outer_scope, function_body_depth, seen, captures);
            walk_expr(&assignment.value, outer_scope, function_body_depth, seen, captures);
        }
        Stmt::If(if_stmt) => {
            walk_expr(&if_stmt.condition, outer_scope, function_body_depth, seen, captures);
            walk_block(&if_stmt.then_block, outer_scope, function_body_depth, seen, captures);
            if let Some(else_block) = &if_stmt.else_block {
                walk_block(else_block, outer_scope, function_body_depth, seen, captures);
            }
        }
        Stmt::WhileLoop(while_stmt) => {
            walk_expr(&while_stmt.condition, outer_scope, function_body_depth, seen, captures);
            walk_block(&while_stmt.body, outer_scope, function_body_depth, seen, captures);
        }
        Stmt::Return(Some(expr), _) => {
            walk_expr(expr, outer_scope, function_body_depth, seen, captures);
        }
        Stmt::Return(None, _) => {}
        Stmt::Expression(expr) => {
            walk_expr(expr, outer_scope, function_body_depth, seen, captures);
        }
        // Nested declarations introduce their own bindings/scopes and are
        // not themselves a use of an outer variable.
        Stmt::FunctionDecl(_) | Stmt::StructDecl(_) | Stmt::ClassDecl(_) | Stmt::UsingStmt(_) => {}
    }
}

fn walk_expr(
    expr: &Expr,
    outer_scope: &ScopeStack,
    function_body_depth: usize,
    seen: &mut HashSet<String>,
    captures: &mut Vec<CapturedVariableInfo>,
) {
    match expr {
        Expr::Id(name, _) => {
            record_candidate(name, outer_scope, function_body_depth, seen, captures);
        }
        Expr::Binary { left, right, .. } => {
            walk_expr(left, outer_scope, function_body_depth, seen, captures);
            walk_expr(right, outer_scope, function_body_depth, seen, captures);
        }
        Expr::Prefix { operand, .. }
        | Expr::AddressOf(operand, _)
        | Expr::Dereference(operand, _)
        | Expr::Delete(operand, _)
        | Expr::Parens(operand, _) => {
            walk_expr(operand, outer_scope, function_body_depth, seen, captures);
        }
        Expr::Call { callee, args, .. } => {
            walk_expr(callee, outer_scope, function_body_depth, seen, captures);
            for arg in args {
                walk_expr(arg, outer_scope, function_body_depth, seen, captures);
            }
        }
        Expr::Get { receiver, .. } => {
            walk_expr(receiver, outer_scope, function_body_depth, seen, captures);
        }
        Expr::As { operand, .. } => {
            walk_expr(operand, outer_scope, function_body_depth, seen, captures);
        }
        Expr::New { args, .. } => {
            for arg in args {
                walk_expr(arg, outer_scope, function_body_depth, seen, captures);
            }
        }
        Expr::ObjectLiteral { fields, .. } => {
            for (_, value) in fields {
                walk_expr(value, outer_scope, function_body_depth, seen, captures);
            }
        }
        Expr::Block(block, _) | Expr::UnsafeBlock(block, _) => {
            walk_block(block, outer_scope, function_body_depth, seen, captures);
        }
        Expr::If { condition, then_block, else_block, .. } => {
            walk_expr(condition, outer_scope, function_body_depth, seen, captures);
            walk_block(then_block, outer_scope, function_body_depth, seen, captures);
            if let Some(else_block) = else_block {
                walk_block(else_block, outer_scope, function_body_depth, seen, captures);
            }
        }
        // A nested function literal analyzes its own captures when it is
        // itself lowered; do not descend.
        Expr::FunctionLiteral { .. } => {}
        Expr::IntLiteral(..)
        | Expr::FloatLiteral(..)
        | Expr::BoolLiteral(..)
        | Expr::CharLiteral(..)
        | Expr::StringLiteral(..)
        | Expr::NullLiteral(..) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignmentStmt, LetStmt};
    use crate::scope::SymbolEntry;

    fn pos() -> (String, usize, usize) {
        ("t.yu".into(), 1, 1)
    }

    #[test]
    fn captures_a_variable_from_the_immediately_enclosing_scope() {
        let mut scope = ScopeStack::new();
        scope.enter_scope(); // depth 1: make_counter's body
        scope.define("n", SymbolEntry::new("i64", "%n", 1));
        let body = Block {
            statements: vec![Stmt::Assignment(AssignmentStmt {
                target: Expr::Id("n".into(), pos()),
                value: Expr::Binary {
                    op: crate::ast::BinaryOp::Add,
                    left: Box::new(Expr::Id("n".into(), pos())),
                    right: Box::new(Expr::IntLiteral(1, pos())),
                    position: pos(),
                },
                position: pos(),
            })],
        };
        // the closure literal lives at depth 2 (one nested block below n's
        // defining scope)
        let captures = ClosureAnalyzer::analyze(&body, &scope, 2);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].name, "n");
    }

    #[test]
    fn does_not_capture_globals() {
        let mut scope = ScopeStack::new();
        scope.define_global("g", SymbolEntry::new("i64", "@g", 0));
        let body = Block { statements: vec![Stmt::Expression(Expr::Id("g".into(), pos()))] };
        let captures = ClosureAnalyzer::analyze(&body, &scope, 3);
        assert!(captures.is_empty());
    }

    #[test]
    fn does_not_descend_into_nested_function_literals() {
        let mut scope = ScopeStack::new();
        scope.enter_scope();
        scope.define("x", SymbolEntry::new("i64", "%x", 1));
        let nested = Expr::FunctionLiteral {
            params: vec![],
            return_type: crate::ast::TypeAnnotation::Named("void".into()),
            body: Block { statements: vec![Stmt::Expression(Expr::Id("x".into(), pos()))] },
            position: pos(),
        };
        let body = Block { statements: vec![Stmt::Expression(nested)] };
        let captures = ClosureAnalyzer::analyze(&body, &scope, 2);
        assert!(captures.is_empty());
    }

    #[test]
    fn let_without_initializer_is_not_a_capture() {
        let mut scope = ScopeStack::new();
        scope.enter_scope();
        scope.define("unused", SymbolEntry::new("i64", "%unused", 1));
        let body = Block {
            statements: vec![Stmt::Let(LetStmt {
                name: "m".into(),
                type_annotation: None,
                value: None,
                mutable: false,
                position: pos(),
            })],
        };
        let captures = ClosureAnalyzer::analyze(&body, &scope, 2);
        assert!(captures.is_empty());
    }
}
