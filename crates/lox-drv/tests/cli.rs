//! CLI e2e tests: the `lox` binary run against real script files,
//! asserting stdout, stderr, and the conventional exit codes.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn lox() -> Command {
    Command::new(PathBuf::from(env!("CARGO_BIN_EXE_lox")))
}

/// Write `source` to a script file inside a fresh temp dir.
fn script(dir: &TempDir, source: &str) -> PathBuf {
    let path = dir.path().join("program.lox");
    std::fs::write(&path, source).expect("write script");
    path
}

#[test]
fn test_arithmetic_output() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "print 1 + 2 * 3;");

    lox().arg(&path).assert().success().stdout("7\n");
}

#[test]
fn test_interned_string_equality_output() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "var a = \"foo\"; var b = \"foo\"; print a == b;");

    lox().arg(&path).assert().success().stdout("true\n");
}

#[test]
fn test_counter_closure_output() {
    let dir = TempDir::new().unwrap();
    let path = script(
        &dir,
        "fun mk(){var i=0; fun inc(){i=i+1; return i;} return inc;}\n\
         var c = mk(); print c(); print c(); print c();\n",
    );

    lox().arg(&path).assert().success().stdout("1\n2\n3\n");
}

#[test]
fn test_super_call_output() {
    let dir = TempDir::new().unwrap();
    let path = script(
        &dir,
        "class A{ greet(){print \"A\";} }\n\
         class B < A{ greet(){super.greet(); print \"B\";} }\n\
         B().greet();\n",
    );

    lox().arg(&path).assert().success().stdout("A\nB\n");
}

#[test]
fn test_initializer_output() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "class P{ init(x){ this.x = x; } }\nprint P(42).x;\n");

    lox().arg(&path).assert().success().stdout("42\n");
}

#[test]
fn test_value_printing_forms() {
    let dir = TempDir::new().unwrap();
    let path = script(
        &dir,
        "print nil;\n\
         print true;\n\
         print false;\n\
         print 2.5;\n\
         print \"verbatim\";\n\
         fun f() {}\n\
         print f;\n\
         print clock;\n\
         class K {}\n\
         print K;\n\
         print K();\n",
    );

    lox().arg(&path).assert().success().stdout(
        "nil\ntrue\nfalse\n2.5\nverbatim\n<fn f>\n<native fn>\n<K>\n<K instance>\n",
    );
}

#[test]
fn test_runtime_error_exit_code_and_trace() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "\"a\" - 1;");

    lox()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Operands must be numbers."))
        .stderr(predicate::str::contains("[line 1] in script"));
}

#[test]
fn test_runtime_trace_names_functions() {
    let dir = TempDir::new().unwrap();
    let path = script(
        &dir,
        "fun inner() { return \"a\" - 1; }\n\
         fun outer() { return inner(); }\n\
         outer();\n",
    );

    lox()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("[line 1] in inner()"))
        .stderr(predicate::str::contains("[line 2] in outer()"))
        .stderr(predicate::str::contains("[line 3] in script"));
}

#[test]
fn test_compile_error_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "var 1 = 2;");

    lox()
        .arg(&path)
        .assert()
        .code(65)
        .stderr(predicate::str::contains(
            "[line 1] Error at '1': Expect variable name.",
        ))
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_missing_file_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("does-not-exist.lox");

    lox()
        .arg(&path)
        .assert()
        .code(74)
        .stderr(predicate::str::contains("Could not read file"));
}

#[test]
fn test_usage_error_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "print 1;");

    // Two positionals are misuse.
    lox().arg(&path).arg("extra").assert().code(64);
    // So is an unknown flag.
    lox().arg("--no-such-flag").arg(&path).assert().code(64);
}

#[test]
fn test_help_is_not_misuse() {
    lox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_gc_stress_flag_keeps_output_identical() {
    let dir = TempDir::new().unwrap();
    let path = script(
        &dir,
        "fun mk(){var i=0; fun inc(){i=i+1; return i;} return inc;}\n\
         var c = mk();\n\
         var s = \"\";\n\
         for (var j = 0; j < 20; j = j + 1) { s = s + \"x\"; c(); }\n\
         print c();\n\
         print s == \"xxxxxxxxxxxxxxxxxxxx\";\n",
    );

    let plain = lox().arg(&path).assert().success();
    let plain_stdout = plain.get_output().stdout.clone();

    lox()
        .arg("--gc-stress")
        .arg(&path)
        .assert()
        .success()
        .stdout(plain_stdout);
}

#[test]
fn test_gc_stress_env_variable() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "print 1 + 2 * 3;");

    lox()
        .arg(&path)
        .env("LOX_GC_STRESS", "1")
        .assert()
        .success()
        .stdout("7\n");
}

#[test]
fn test_gc_log_writes_cycle_summaries() {
    let dir = TempDir::new().unwrap();
    let path = script(
        &dir,
        "var s = \"\"; for (var i = 0; i < 10; i = i + 1) { s = s + \"y\"; } print s;",
    );

    lox()
        .arg("--gc-stress")
        .arg("--gc-log")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("[GC] cycle"));
}

#[test]
fn test_emit_bytecode_dumps_before_running() {
    let dir = TempDir::new().unwrap();
    let path = script(&dir, "print 1;");

    lox()
        .arg("--emit-bytecode")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("== <script> =="))
        .stdout(predicate::str::contains("PRINT"))
        .stdout(predicate::str::contains("1\n"));
}

#[test]
fn test_repl_evaluates_lines_and_shares_globals() {
    lox()
        .write_stdin("var x = 21;\nprint x * 2;\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}

#[test]
fn test_repl_survives_errors() {
    lox()
        .write_stdin("print missing;\nprint 7;\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("7"))
        .stderr(predicate::str::contains("Undefined variable 'missing'."));
}
