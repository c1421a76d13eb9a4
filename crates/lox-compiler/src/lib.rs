//! lox-compiler - Single-pass compiler from Lox source to bytecode.
//!
//! Parsing and code generation are interleaved: a Pratt parser drives
//! emission directly into the chunk of the function being built, so no AST
//! is ever materialized. The compiler allocates functions and strings
//! through the VM's heap and registers everything it is still holding as GC
//! roots, making every compile-time allocation site a safepoint like any
//! other.
//!
//! The compiler is a pure function of the source: it prints nothing and
//! returns either the compiled script function or the collected list of
//! errors.

mod compiler;
mod error;
mod expr;
mod stmt;

pub use error::{CompileError, CompileErrors};

use lox_lex::TokenKind;
use lox_runtime::{FunId, Vm};

use compiler::Compiler;

/// Compile `source`, returning the script function on success.
///
/// All heap allocations the compiler makes are registered as compiler roots
/// for the duration of the call; the caller must root the returned function
/// (the VM pushes it on the stack) before the next allocation.
pub fn compile(vm: &mut Vm, source: &str) -> Result<FunId, CompileErrors> {
    let roots_base = vm.heap.compiler_roots_len();

    let mut compiler = Compiler::new(vm, source);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function, errors) = compiler.finish_script();

    vm.heap.truncate_compiler_roots(roots_base);

    if errors.is_empty() {
        Ok(function)
    } else {
        Err(CompileErrors(errors))
    }
}
