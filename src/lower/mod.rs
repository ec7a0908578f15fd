//! The two visitor halves: expressions and statements. Split into separate
//! files the way `codegen/expressions/*.rs` is split from
//! `codegen/statements/*.rs` upstream, but each kept as one exhaustive
//! match over the AST's tagged unions rather than one file per variant.

pub mod expr;
pub mod stmt;
