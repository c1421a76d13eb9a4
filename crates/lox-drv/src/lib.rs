//! lox-drv - The `lox` command-line driver.
//!
//! Wires the compiler and the VM together: `interpret` compiles a source
//! buffer, optionally dumps its bytecode, and runs it. The binary adds the
//! file runner, the REPL, and the conventional process exit codes
//! (65 compile error, 70 runtime error, 74 I/O error, 64 usage).

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use lox_compiler::{compile, CompileErrors};
use lox_runtime::{debug, GcConfig, RuntimeError, Vm};

/// Command-line interface of the `lox` binary.
#[derive(Debug, Parser)]
#[command(name = "lox", version, about = "A bytecode VM for the Lox language")]
pub struct Cli {
    /// Script to run. Starts a REPL when omitted.
    pub script: Option<PathBuf>,

    /// Print the compiled bytecode before executing.
    #[arg(long)]
    pub emit_bytecode: bool,

    /// Collect garbage before every allocation (also: LOX_GC_STRESS=1).
    #[arg(long)]
    pub gc_stress: bool,

    /// Log a summary of every collection cycle (also: LOX_GC_LOG=1).
    #[arg(long)]
    pub gc_log: bool,

    /// Verbose diagnostics on stderr (overridden by RUST_LOG).
    #[arg(short, long)]
    pub verbose: bool,
}

/// Everything that can end an `interpret` call early.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error(transparent)]
    Compile(#[from] CompileErrors),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Could not read file \"{path}\".")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl LoxError {
    /// The conventional process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoxError::Compile(_) => 65,
            LoxError::Runtime(_) => 70,
            LoxError::Io { .. } => 74,
        }
    }
}

/// One VM plus driver settings. Re-entrant `interpret` calls are not
/// supported, but sequential ones share globals, which is what the REPL
/// relies on.
pub struct Session {
    vm: Vm,
    emit_bytecode: bool,
}

impl Session {
    pub fn new(config: GcConfig) -> Self {
        Self {
            vm: Vm::new(config),
            emit_bytecode: false,
        }
    }

    pub fn with_emit_bytecode(mut self, emit: bool) -> Self {
        self.emit_bytecode = emit;
        self
    }

    /// Host access to the VM, for embedding and tests.
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Compile and run one source buffer to completion.
    ///
    /// Compile errors are returned without executing anything. Runtime
    /// faults have already written their message and stack trace to stderr
    /// when this returns.
    pub fn interpret(&mut self, source: &str) -> Result<(), LoxError> {
        let function = compile(&mut self.vm, source)?;

        if self.emit_bytecode {
            print!("{}", debug::disassemble_program(&self.vm.heap, function));
        }

        self.vm.execute(function)?;
        Ok(())
    }

    /// Run the script at `path`.
    pub fn run_file(&mut self, path: &Path) -> Result<(), LoxError> {
        let source = std::fs::read_to_string(path).map_err(|source| LoxError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.interpret(&source)
    }

    /// Read-eval-print loop over stdin, one line at a time. Errors are
    /// reported and the loop continues.
    pub fn repl(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            print!("> ");
            io::stdout().flush()?;

            let line = match lines.next() {
                Some(line) => line?,
                None => {
                    println!();
                    return Ok(());
                }
            };

            if let Err(LoxError::Compile(errors)) = self.interpret(&line) {
                eprintln!("{errors}");
            }
        }
    }
}
