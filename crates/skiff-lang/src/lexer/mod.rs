//! Lexical analysis (tokenization) for Skiff source code.
//!
//! The lexer transforms source text into a stream of tokens consumed on
//! demand by the parser. Unlike most whitespace, line breaks are reported
//! (as `Newline` tokens): the parser uses them to reject expressions that
//! are left dangling across a line break.
//!
//! ## Structure
//!
//! - `scanner.rs` - Main `Scanner` struct that produces tokens
//! - `token.rs` - `Token` and `TokenKind` definitions, including the binary
//!   operator precedence table

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
