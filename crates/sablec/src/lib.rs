pub mod ast;
pub mod codegen;
pub mod diag;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod typeck;
pub mod types;
#[cfg(test)]
mod tests;

pub use diag::{Diagnostic, Pos, Severity};
pub use error::CompileError;

use sable_bytecode::Module;

/// Compile source text to a bytecode module. Stages run strictly in
/// order and each later stage only sees clean input: a stage that
/// collected diagnostics stops the pipeline and reports everything it
/// found, in source order.
pub fn compile(name: &str, source: &str) -> Result<Module, CompileError> {
    let program = parse_source(source)?;
    let mut resolution = resolve::resolve(&program);
    if !resolution.diagnostics.is_empty() {
        return Err(CompileError::Name(std::mem::take(
            &mut resolution.diagnostics,
        )));
    }
    let types = typeck::check(&program, &mut resolution).map_err(CompileError::Type)?;
    codegen::emit(name, &program, &resolution, &types)
}

/// Lex and parse only, for tooling that wants the AST.
pub fn parse_source(source: &str) -> Result<ast::Program, CompileError> {
    let tokens = lexer::tokenize(source).map_err(CompileError::Lex)?;
    let (program, errors) = parser::parse(tokens);
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(CompileError::Syntax(errors))
    }
}
