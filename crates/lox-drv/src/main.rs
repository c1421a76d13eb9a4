use std::process;

use clap::error::ErrorKind;
use clap::Parser;

use lox_drv::{Cli, LoxError, Session};
use lox_runtime::GcConfig;

fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let code = match err.kind() {
            // --help and --version are not misuse.
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => 64,
        };
        let _ = err.print();
        process::exit(code);
    });

    init_tracing(cli.verbose);

    let mut config = GcConfig::from_env();
    config.stress |= cli.gc_stress;
    config.log |= cli.gc_log;

    let mut session = Session::new(config).with_emit_bytecode(cli.emit_bytecode);

    let code = match &cli.script {
        Some(path) => match session.run_file(path) {
            Ok(()) => 0,
            Err(error) => {
                // Runtime faults already reported themselves.
                if !matches!(error, LoxError::Runtime(_)) {
                    eprintln!("{error}");
                }
                error.exit_code()
            }
        },
        None => match session.repl() {
            Ok(()) => 0,
            Err(error) => {
                eprintln!("error: {error}");
                74
            }
        },
    };

    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
