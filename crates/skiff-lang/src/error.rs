//! Error types for the Skiff compilation pipeline.

use thiserror::Error;

/// A syntax error produced by the parser.
///
/// Rendered as `<file>:<line>: syntax error: <message>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}: syntax error: {message}")]
pub struct ParseError {
    /// Name of the source file being parsed.
    pub file: String,
    /// 1-based line of the offending token.
    pub line: usize,
    /// Description of what went wrong.
    pub message: String,
}

/// A semantic or capacity error produced by the bytecode compiler.
///
/// Rendered as `<file>:<line>: <message>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}: {message}")]
pub struct CompileError {
    /// Name of the source file being compiled.
    pub file: String,
    /// 1-based line of the offending node.
    pub line: usize,
    /// Description of what went wrong.
    pub message: String,
}

/// Any error the compilation pipeline can surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The parser rejected the source text.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The compiler rejected the AST.
    #[error(transparent)]
    Compile(#[from] CompileError),
}
