//! lox-lex - Lexical analysis for the Lox language.
//!
//! The scanner works on demand: the compiler pulls one token at a time, so no
//! token buffer is ever materialized. Invalid input is reported in-band as
//! [`TokenKind::Error`] tokens whose lexeme is the error message; the parser
//! turns those into compile errors with source positions.

pub mod cursor;
mod scanner;
mod token;

pub use cursor::Cursor;
pub use scanner::Scanner;
pub use token::{Token, TokenKind};
