//! # skiff-lang
//!
//! Compiler core for Skiff, a small dynamically-typed scripting language.
//! Source text is compiled into a tree of function prototypes holding
//! register-based bytecode, ready to be consumed by a virtual machine (the
//! VM itself lives elsewhere).
//!
//! ## Pipeline
//!
//! - [`lexer`] - source text to tokens
//! - [`parser`] - tokens to AST, recursive descent with precedence climbing
//! - [`compiler`] - AST to prototypes: scope resolution, constant folding,
//!   register allocation, jump back-patching
//!
//! ## Quick Start
//!
//! ```rust
//! let proto = skiff_lang::compile("var x = 1 + 2", "example.skf")?;
//! assert_eq!(proto.code.len(), 2); // LOADCONST + RETURN
//! # Ok::<(), skiff_lang::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod value;

pub use compiler::FuncProto;
pub use error::{CompileError, Error, ParseError};
pub use value::Value;

/// Parses Skiff source text into an AST.
///
/// `filename` is carried into error messages.
pub fn parse(source: &str, filename: &str) -> Result<ast::Node, ParseError> {
    parser::Parser::new(source, filename).parse_program()
}

/// Compiles Skiff source text into the root function prototype.
///
/// This is the whole front half of the toolchain: tokenize, parse, and
/// compile. The result owns the prototypes of every nested function.
pub fn compile(source: &str, filename: &str) -> Result<FuncProto, Error> {
    let root = parse(source, filename)?;
    let proto = compiler::compile(&root, filename)?;
    Ok(proto)
}
