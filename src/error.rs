//! The closed error taxonomy the lowering engine can raise.
//!
//! Every variant carries a source position so the CLI can print a
//! human-readable diagnostic; there is no local recovery anywhere in this
//! crate. A lowering run either produces a complete module or fails.

use std::error::Error;
use std::fmt::{self, Display};

/// `(file, line, column)`, mirroring the position tuple the teacher's AST
/// nodes carry.
pub type Position = (String, usize, usize);

#[derive(Debug, Clone)]
pub enum CodegenError {
    UndefinedIdentifier { name: String, position: Position },
    UnknownClass { name: String, position: Position },
    UnknownMember { class: String, member: String, position: Position },
    TypeMismatch { expected: String, found: String, position: Position },
    InvalidAssignmentTarget { position: Position },
    MalformedFunctionType { found: String, position: Position },
    InvalidLiteralInitializer { name: String, position: Position },
    BadCastShape { detail: String, position: Position },
    Arity { name: String, expected: usize, found: usize, position: Position },
    ArgumentKind { name: String, detail: String, position: Position },
}

impl CodegenError {
    pub fn position(&self) -> &Position {
        match self {
            CodegenError::UndefinedIdentifier { position, .. }
            | CodegenError::UnknownClass { position, .. }
            | CodegenError::UnknownMember { position, .. }
            | CodegenError::TypeMismatch { position, .. }
            | CodegenError::InvalidAssignmentTarget { position }
            | CodegenError::MalformedFunctionType { position, .. }
            | CodegenError::InvalidLiteralInitializer { position, .. }
            | CodegenError::BadCastShape { position, .. }
            | CodegenError::Arity { position, .. }
            | CodegenError::ArgumentKind { position, .. } => position,
        }
    }
}

impl Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (file, line, col) = self.position();
        let message = match self {
            CodegenError::UndefinedIdentifier { name, .. } => {
                format!("undefined identifier `{name}`")
            }
            CodegenError::UnknownClass { name, .. } => format!("unknown class `{name}`"),
            CodegenError::UnknownMember { class, member, .. } => {
                format!("class `{class}` has no member `{member}`")
            }
            CodegenError::TypeMismatch { expected, found, .. } => {
                format!("type mismatch: expected `{expected}`, found `{found}`")
            }
            CodegenError::InvalidAssignmentTarget { .. } => {
                "invalid assignment target (expected identifier, member access, or dereference)"
                    .to_string()
            }
            CodegenError::MalformedFunctionType { found, .. } => {
                format!("malformed function type `{found}`")
            }
            CodegenError::InvalidLiteralInitializer { name, .. } => {
                format!("global `{name}` requires a literal initializer")
            }
            CodegenError::BadCastShape { detail, .. } => format!("unsupported cast: {detail}"),
            CodegenError::Arity { name, expected, found, .. } => {
                format!("`{name}` expects {expected} argument(s), found {found}")
            }
            CodegenError::ArgumentKind { name, detail, .. } => {
                format!("`{name}`: {detail}")
            }
        };
        write!(f, "{message} ({file}:{line}:{col})")
    }
}

impl Error for CodegenError {}
