use thiserror::Error;

use crate::diag::Diagnostic;

/// Pipeline failure, one variant per stage class. The lexer stops at its
/// first fatal error; the other stages carry everything they collected,
/// already in source order.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Lex(Diagnostic),

    #[error("aborting due to {} syntax error(s)", .0.len())]
    Syntax(Vec<Diagnostic>),

    #[error("aborting due to {} name error(s)", .0.len())]
    Name(Vec<Diagnostic>),

    #[error("aborting due to {} type error(s)", .0.len())]
    Type(Vec<Diagnostic>),

    /// Reserved for code-generator bugs; never reachable from valid typed
    /// input.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// The diagnostics carried by this error, in source order. Empty for
    /// the internal class, which has no source position.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Lex(d) => std::slice::from_ref(d),
            CompileError::Syntax(ds) | CompileError::Name(ds) | CompileError::Type(ds) => ds,
            CompileError::Internal(_) => &[],
        }
    }
}
